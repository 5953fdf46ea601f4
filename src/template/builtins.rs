//! Builtin function table shared by the parser (arity and kind checks)
//! and the runtime (dispatch).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKind {
    /// Pure function of its arguments and the request.
    Value,
    /// Mutates the response (headers, status, cookies, redirect).
    Output,
    /// Starts an asynchronous operation; statement position only.
    Async,
}

#[derive(Debug, Clone, Copy)]
pub struct BuiltinSpec {
    pub name: &'static str,
    pub kind: BuiltinKind,
    pub min_args: usize,
    pub max_args: usize,
}

const fn spec(name: &'static str, kind: BuiltinKind, min_args: usize, max_args: usize) -> BuiltinSpec {
    BuiltinSpec {
        name,
        kind,
        min_args,
        max_args,
    }
}

use BuiltinKind::{Async, Output, Value};

pub const BUILTINS: &[BuiltinSpec] = &[
    // request
    spec("param", Value, 1, 1),
    spec("params", Value, 0, 0),
    spec("body", Value, 0, 0),
    spec("method", Value, 0, 0),
    spec("path", Value, 0, 0),
    spec("request_header", Value, 1, 1),
    spec("upload", Value, 1, 1),
    spec("uploads", Value, 0, 0),
    spec("status_code", Value, 0, 0),
    // values
    spec("len", Value, 1, 1),
    spec("upper", Value, 1, 1),
    spec("lower", Value, 1, 1),
    spec("trim", Value, 1, 1),
    spec("str", Value, 1, 1),
    spec("num", Value, 1, 1),
    spec("json", Value, 1, 1),
    spec("escape", Value, 1, 1),
    spec("contains", Value, 2, 2),
    spec("join", Value, 2, 2),
    spec("keys", Value, 1, 1),
    // response
    spec("header", Output, 2, 2),
    spec("status", Output, 1, 1),
    spec("cookie", Output, 2, 3),
    spec("redirect", Output, 1, 2),
    spec("log", Output, 1, 1),
    // async
    spec("read_file", Async, 1, 1),
    spec("write_file", Async, 2, 2),
    spec("append_file", Async, 2, 2),
    spec("stat", Async, 1, 1),
    spec("copy_file", Async, 2, 2),
    spec("move_file", Async, 2, 2),
    spec("delete_file", Async, 1, 1),
    spec("sleep", Async, 1, 1),
    spec("keep_upload", Async, 2, 2),
];

pub fn lookup(name: &str) -> Option<&'static BuiltinSpec> {
    BUILTINS.iter().find(|b| b.name == name)
}
