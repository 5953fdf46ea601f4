//! Builtin dispatch. Arity was checked at compile time against
//! `template::builtins::BUILTINS`.

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value};

use crate::coordinator::{Outcome, Runtime};
use crate::runtime::context::{Cookie, Redirect};
use crate::runtime::error::RuntimeError;
use crate::runtime::files;
use crate::runtime::value::{as_number, equals, from_f64, html_escape, to_text, type_name};

fn arg(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&Value::Null)
}

fn text_arg(args: &[Value], index: usize) -> String {
    to_text(arg(args, index))
}

fn type_error(name: &str, value: &Value) -> RuntimeError {
    RuntimeError::new(format!("{name}() does not accept a {}", type_name(value)))
}

/// Call a value or output builtin.
pub fn call(rt: &mut Runtime, name: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
    match name {
        "param" => {
            let key = text_arg(&args, 0);
            Ok(rt.context().params.get(&key).cloned().unwrap_or(Value::Null))
        }
        "params" => Ok(Value::Object(rt.context().params.clone())),
        "body" => Ok(rt.context().body.clone()),
        "method" => Ok(Value::String(rt.context().request.method.clone())),
        "path" => Ok(Value::String(rt.context().request.path.clone())),
        "request_header" => {
            let key = text_arg(&args, 0).to_ascii_lowercase();
            Ok(rt
                .context()
                .request
                .headers
                .get(&key)
                .map(|v| Value::String(v.clone()))
                .unwrap_or(Value::Null))
        }
        "upload" => {
            let field = text_arg(&args, 0);
            Ok(rt
                .context()
                .upload(&field)
                .map(|u| u.describe())
                .unwrap_or(Value::Null))
        }
        "uploads" => Ok(Value::Array(
            rt.context().uploads.iter().map(|u| u.describe()).collect(),
        )),
        "status_code" => Ok(Value::from(rt.context().status)),

        "len" => match arg(&args, 0) {
            Value::String(s) => Ok(Value::from(s.chars().count())),
            Value::Array(a) => Ok(Value::from(a.len())),
            Value::Object(o) => Ok(Value::from(o.len())),
            Value::Null => Ok(Value::from(0)),
            other => Err(type_error(name, other)),
        },
        "upper" => Ok(Value::String(text_arg(&args, 0).to_uppercase())),
        "lower" => Ok(Value::String(text_arg(&args, 0).to_lowercase())),
        "trim" => Ok(Value::String(text_arg(&args, 0).trim().to_string())),
        "str" => Ok(Value::String(text_arg(&args, 0))),
        "num" => {
            let value = arg(&args, 0);
            as_number(value)
                .map(from_f64)
                .ok_or_else(|| RuntimeError::new(format!("cannot convert {} to a number", type_name(value))))
        }
        "json" => serde_json::to_string(arg(&args, 0))
            .map(Value::String)
            .map_err(|e| RuntimeError::new(e.to_string())),
        "escape" => Ok(Value::String(html_escape(&text_arg(&args, 0)))),
        "contains" => {
            let needle = arg(&args, 1);
            match arg(&args, 0) {
                Value::String(s) => Ok(Value::Bool(s.contains(&to_text(needle)))),
                Value::Array(items) => Ok(Value::Bool(items.iter().any(|i| equals(i, needle)))),
                Value::Object(map) => Ok(Value::Bool(map.contains_key(&to_text(needle)))),
                Value::Null => Ok(Value::Bool(false)),
                other => Err(type_error(name, other)),
            }
        }
        "join" => match arg(&args, 0) {
            Value::Array(items) => Ok(Value::String(
                items
                    .iter()
                    .map(to_text)
                    .collect::<Vec<_>>()
                    .join(&text_arg(&args, 1)),
            )),
            other => Err(type_error(name, other)),
        },
        "keys" => match arg(&args, 0) {
            Value::Object(map) => Ok(Value::Array(
                map.keys().map(|k| Value::String(k.clone())).collect(),
            )),
            other => Err(type_error(name, other)),
        },

        "header" => {
            let header = text_arg(&args, 0);
            if header.is_empty() {
                return Err(RuntimeError::new("header name must not be empty"));
            }
            let value = text_arg(&args, 1);
            rt.context_mut().set_header(&header, value);
            Ok(Value::Null)
        }
        "status" => {
            let code = as_number(arg(&args, 0)).unwrap_or(0.0);
            if !(100.0..=599.0).contains(&code) || code.fract() != 0.0 {
                return Err(RuntimeError::new(format!(
                    "invalid status code: {}",
                    text_arg(&args, 0)
                )));
            }
            rt.context_mut().status = code as u16;
            Ok(Value::Null)
        }
        "cookie" => {
            let mut cookie = Cookie::new(text_arg(&args, 0), text_arg(&args, 1));
            if cookie.name.is_empty() {
                return Err(RuntimeError::new("cookie name must not be empty"));
            }
            match arg(&args, 2) {
                Value::Object(options) => apply_cookie_options(&mut cookie, options),
                Value::Null => {}
                other => return Err(type_error(name, other)),
            }
            rt.context_mut().cookies.push(cookie);
            Ok(Value::Null)
        }
        "redirect" => {
            let location = text_arg(&args, 0);
            let delay_secs = match arg(&args, 1) {
                Value::Null => None,
                other => Some(
                    as_number(other)
                        .filter(|d| *d >= 0.0)
                        .ok_or_else(|| RuntimeError::new("redirect delay must be a non-negative number"))?
                        as u64,
                ),
            };
            rt.context_mut().redirect = Some(Redirect {
                location,
                delay_secs,
            });
            Ok(Value::Null)
        }
        "log" => {
            rt.log_info(text_arg(&args, 0));
            Ok(Value::Null)
        }
        other => Err(RuntimeError::new(format!("{other}() cannot be used here"))),
    }
}

fn apply_cookie_options(cookie: &mut Cookie, options: &Map<String, Value>) {
    if let Some(max_age) = options.get("max_age").and_then(as_number) {
        cookie.max_age = Some(max_age as i64);
    }
    if let Some(path) = options.get("path").and_then(Value::as_str) {
        cookie.path = path.to_string();
    }
    if let Some(flag) = options.get("http_only").and_then(Value::as_bool) {
        cookie.http_only = flag;
    }
    if let Some(flag) = options.get("secure").and_then(Value::as_bool) {
        cookie.secure = flag;
    }
}

/// The upload field an async call takes ownership of once it succeeds.
pub fn claimed_upload(name: &str, args: &[Value]) -> Option<String> {
    (name == "keep_upload").then(|| text_arg(args, 0))
}

/// Validate arguments and build the future for an async builtin. Argument
/// errors surface synchronously at the calling statement.
pub fn start(
    rt: &mut Runtime,
    name: &str,
    args: Vec<Value>,
) -> Result<BoxFuture<'static, Outcome>, RuntimeError> {
    let scope = rt.env().files.clone();
    let path = |index: usize| scope.resolve(&text_arg(&args, index)).map_err(RuntimeError::new);

    let op = match name {
        "read_file" => files::read_file(path(0)?).boxed(),
        "write_file" => files::write_file(path(0)?, text_arg(&args, 1)).boxed(),
        "append_file" => files::append_file(path(0)?, text_arg(&args, 1)).boxed(),
        "stat" => files::stat(path(0)?).boxed(),
        "copy_file" => files::copy_file(path(0)?, path(1)?).boxed(),
        "move_file" => files::move_file(path(0)?, path(1)?).boxed(),
        "delete_file" => files::delete_file(path(0)?).boxed(),
        "sleep" => {
            let millis = as_number(arg(&args, 0))
                .filter(|m| *m >= 0.0)
                .ok_or_else(|| RuntimeError::new("sleep() expects a non-negative number"))?;
            files::sleep(millis as u64).boxed()
        }
        "keep_upload" => {
            let field = text_arg(&args, 0);
            let dest = path(1)?;
            let source = rt
                .context()
                .upload(&field)
                .map(|upload| upload.path.clone())
                .ok_or_else(|| RuntimeError::new(format!("no upload for field '{field}'")))?;
            files::move_file(source, dest).boxed()
        }
        other => return Err(RuntimeError::new(format!("{other}() is not asynchronous"))),
    };
    Ok(op)
}
