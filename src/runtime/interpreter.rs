//! Tree-walking interpreter for compiled handlers.

use serde_json::{Map, Value};

use crate::coordinator::Runtime;
use crate::runtime::builtins;
use crate::runtime::error::RuntimeError;
use crate::runtime::value::{binary, html_escape, to_text, truthy, type_name};
use crate::template::ast::{AsyncCall, BinaryOp, Block, Call, Callback, Expr, Stmt, StmtKind, UnaryOp};

/// Whether a block ran to its end or hit `return`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Next,
    Return,
}

/// Run a handler's top-level block.
pub fn run_program(rt: &mut Runtime, program: &Block) -> Result<(), RuntimeError> {
    run_block(rt, program).map(|_| ())
}

pub fn run_block(rt: &mut Runtime, block: &[Stmt]) -> Result<Flow, RuntimeError> {
    for stmt in block {
        if exec(rt, stmt).map_err(|e| e.at_line(stmt.line))? == Flow::Return {
            return Ok(Flow::Return);
        }
    }
    Ok(Flow::Next)
}

fn exec(rt: &mut Runtime, stmt: &Stmt) -> Result<Flow, RuntimeError> {
    match &stmt.kind {
        StmtKind::Markup(text) => rt.print_unsafe(text),
        StmtKind::Print(expr) => {
            let value = eval(rt, expr)?;
            rt.print_unsafe(&html_escape(&to_text(&value)));
        }
        StmtKind::Echo(expr) => {
            let value = eval(rt, expr)?;
            rt.print_unsafe(&to_text(&value));
        }
        StmtKind::Let(name, expr) => {
            let value = eval(rt, expr)?;
            rt.context_mut().vars.insert(name.clone(), value);
        }
        StmtKind::Assign(name, expr) => {
            let value = eval(rt, expr)?;
            match rt.context_mut().vars.get_mut(name) {
                Some(slot) => *slot = value,
                None => return Err(RuntimeError::new(format!("{name} is not defined"))),
            }
        }
        StmtKind::If {
            cond,
            then_branch,
            else_branch,
        } => {
            let value = eval(rt, cond)?;
            if truthy(&value) {
                return run_block(rt, then_branch);
            } else if let Some(branch) = else_branch {
                return run_block(rt, branch);
            }
        }
        StmtKind::For {
            binding,
            iterable,
            body,
        } => {
            let items: Vec<Value> = match eval(rt, iterable)? {
                Value::Array(items) => items,
                Value::Object(map) => map.into_iter().map(|(k, _)| Value::String(k)).collect(),
                Value::Null => Vec::new(),
                other => {
                    return Err(RuntimeError::new(format!(
                        "cannot iterate over a {}",
                        type_name(&other)
                    )))
                }
            };
            for item in items {
                rt.context_mut().vars.insert(binding.clone(), item);
                if run_block(rt, body)? == Flow::Return {
                    return Ok(Flow::Return);
                }
            }
        }
        StmtKind::Call(call) => {
            let args = eval_args(rt, call)?;
            builtins::call(rt, &call.name, args)?;
        }
        StmtKind::Async(call) => start_async(rt, call)?,
        StmtKind::Defer(body) => {
            let body = body.clone();
            rt.run_after(Box::new(move |rt| run_block(rt, &body).map(|_| ())));
        }
        StmtKind::Throw(expr) => {
            let value = eval(rt, expr)?;
            return Err(RuntimeError::new(to_text(&value)));
        }
        StmtKind::Return => return Ok(Flow::Return),
    }
    Ok(Flow::Next)
}

/// Start one bridged operation and attach the optional callbacks.
fn start_async(rt: &mut Runtime, call: &AsyncCall) -> Result<(), RuntimeError> {
    let args = eval_args(rt, &call.call)?;
    let claim = builtins::claimed_upload(&call.call.name, &args);
    let op = builtins::start(rt, &call.call.name, args)?;
    let bridge = rt.bridge(op);

    // A kept upload is only exempt from cleanup once the move succeeded.
    if claim.is_some() || call.then.is_some() {
        let then = call.then.clone();
        rt.on_success(bridge, move |rt, value| {
            if let Some(field) = &claim {
                if let Some(upload) = rt.context_mut().upload_mut(field) {
                    upload.handled = true;
                }
            }
            match &then {
                Some(callback) => run_callback(rt, callback, value),
                None => Ok(()),
            }
        });
    }
    if let Some(callback) = &call.catch {
        let callback = callback.clone();
        rt.on_error(bridge, move |rt, message| {
            run_callback(rt, &callback, Value::String(message))
        });
    }
    Ok(())
}

fn run_callback(rt: &mut Runtime, callback: &Callback, value: Value) -> Result<(), RuntimeError> {
    if let Some(binding) = &callback.binding {
        rt.context_mut().vars.insert(binding.clone(), value);
    }
    run_block(rt, &callback.body).map(|_| ())
}

fn eval_args(rt: &mut Runtime, call: &Call) -> Result<Vec<Value>, RuntimeError> {
    call.args.iter().map(|a| eval(rt, a)).collect()
}

fn eval(rt: &mut Runtime, expr: &Expr) -> Result<Value, RuntimeError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Var(name) => rt
            .context()
            .vars
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::new(format!("{name} is not defined"))),
        Expr::List(items) => Ok(Value::Array(
            items.iter().map(|i| eval(rt, i)).collect::<Result<_, _>>()?,
        )),
        Expr::Map(entries) => {
            let mut map = Map::new();
            for (key, value) in entries {
                map.insert(key.clone(), eval(rt, value)?);
            }
            Ok(Value::Object(map))
        }
        Expr::Call(call) => {
            let args = eval_args(rt, call)?;
            builtins::call(rt, &call.name, args).map_err(|e| e.at_line(call.line))
        }
        Expr::Index(target, index) => {
            let target = eval(rt, target)?;
            let index = eval(rt, index)?;
            Ok(index_value(&target, &index))
        }
        Expr::Field(target, field) => {
            let target = eval(rt, target)?;
            Ok(target.get(field).cloned().unwrap_or(Value::Null))
        }
        Expr::Unary(op, operand) => {
            let value = eval(rt, operand)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                UnaryOp::Neg => binary(BinaryOp::Sub, &Value::from(0), &value).map_err(RuntimeError::new),
            }
        }
        Expr::Binary(BinaryOp::And, left, right) => {
            let left = eval(rt, left)?;
            if !truthy(&left) {
                return Ok(left);
            }
            eval(rt, right)
        }
        Expr::Binary(BinaryOp::Or, left, right) => {
            let left = eval(rt, left)?;
            if truthy(&left) {
                return Ok(left);
            }
            eval(rt, right)
        }
        Expr::Binary(op, left, right) => {
            let left = eval(rt, left)?;
            let right = eval(rt, right)?;
            binary(*op, &left, &right).map_err(RuntimeError::new)
        }
    }
}

/// Out-of-range and mismatched lookups yield `null`.
fn index_value(target: &Value, index: &Value) -> Value {
    match (target, index) {
        (Value::Array(items), Value::Number(n)) => n
            .as_u64()
            .and_then(|i| items.get(i as usize))
            .cloned()
            .unwrap_or(Value::Null),
        (Value::Object(map), key) => map.get(&to_text(key)).cloned().unwrap_or(Value::Null),
        (Value::String(s), Value::Number(n)) => n
            .as_u64()
            .and_then(|i| s.chars().nth(i as usize))
            .map(|c| Value::String(c.to_string()))
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}
