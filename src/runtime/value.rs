//! Script value semantics over `serde_json::Value`.

use std::cmp::Ordering;

use serde_json::Value;

use crate::template::ast::BinaryOp;

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Text form used by `print`, `echo` and string concatenation.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse().ok(),
        Value::Null => Some(0.0),
        _ => None,
    }
}

/// Whole numbers come back as integers so `print 2 * 3` shows `6`.
pub fn from_f64(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

pub fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Numbers compare by value regardless of integer/float representation.
pub fn equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Result<Ordering, String> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => {
            let (a, b) = numeric_pair(left, right, "compare")?;
            a.partial_cmp(&b)
                .ok_or_else(|| "cannot compare NaN".to_string())
        }
    }
}

fn numeric_pair(left: &Value, right: &Value, verb: &str) -> Result<(f64, f64), String> {
    match (as_number(left), as_number(right)) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(format!(
            "cannot {verb} {} and {}",
            type_name(left),
            type_name(right)
        )),
    }
}

/// Evaluate a strict binary operator. `&&` and `||` short-circuit in the
/// interpreter and never reach here.
pub fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, String> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(equals(left, right))),
        BinaryOp::Ne => Ok(Value::Bool(!equals(left, right))),
        BinaryOp::Lt => Ok(Value::Bool(compare(left, right)? == Ordering::Less)),
        BinaryOp::Le => Ok(Value::Bool(compare(left, right)? != Ordering::Greater)),
        BinaryOp::Gt => Ok(Value::Bool(compare(left, right)? == Ordering::Greater)),
        BinaryOp::Ge => Ok(Value::Bool(compare(left, right)? != Ordering::Less)),
        BinaryOp::Add => match (left, right) {
            (Value::String(_), _) | (_, Value::String(_)) => {
                Ok(Value::String(to_text(left) + &to_text(right)))
            }
            (Value::Array(a), Value::Array(b)) => {
                Ok(Value::Array(a.iter().chain(b.iter()).cloned().collect()))
            }
            _ => {
                let (a, b) = numeric_pair(left, right, "add")?;
                Ok(from_f64(a + b))
            }
        },
        BinaryOp::Sub => {
            let (a, b) = numeric_pair(left, right, "subtract")?;
            Ok(from_f64(a - b))
        }
        BinaryOp::Mul => {
            let (a, b) = numeric_pair(left, right, "multiply")?;
            Ok(from_f64(a * b))
        }
        BinaryOp::Div => {
            let (a, b) = numeric_pair(left, right, "divide")?;
            if b == 0.0 {
                return Err("division by zero".to_string());
            }
            Ok(from_f64(a / b))
        }
        BinaryOp::Rem => {
            let (a, b) = numeric_pair(left, right, "divide")?;
            if b == 0.0 {
                return Err("division by zero".to_string());
            }
            Ok(from_f64(a % b))
        }
        BinaryOp::And | BinaryOp::Or => Err("logical operator evaluated eagerly".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(truthy(&json!("0")));
        assert!(truthy(&json!([])));
    }

    #[test]
    fn test_arithmetic_keeps_integers() {
        assert_eq!(binary(BinaryOp::Mul, &json!(2), &json!(3)).unwrap(), json!(6));
        assert_eq!(binary(BinaryOp::Div, &json!(1), &json!(4)).unwrap(), json!(0.25));
        assert!(binary(BinaryOp::Div, &json!(1), &json!(0)).is_err());
    }

    #[test]
    fn test_concatenation() {
        assert_eq!(
            binary(BinaryOp::Add, &json!("n="), &json!(5)).unwrap(),
            json!("n=5")
        );
        assert_eq!(
            binary(BinaryOp::Add, &json!([1]), &json!([2])).unwrap(),
            json!([1, 2])
        );
        assert!(binary(BinaryOp::Add, &json!({}), &json!(1)).is_err());
    }

    #[test]
    fn test_numeric_equality() {
        assert!(equals(&json!(1), &json!(1.0)));
        assert!(!equals(&json!("1"), &json!(1)));
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(
            html_escape(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;"
        );
    }
}
