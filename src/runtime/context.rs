//! Per-request state mutated by handler code.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use serde_json::{Map, Value};

use crate::runtime::error::RuntimeError;

/// Read-only view of the incoming request.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    pub method: String,
    pub path: String,
    pub host: String,
    /// Header names are lowercase.
    pub headers: BTreeMap<String, String>,
    pub remote_addr: Option<String>,
}

/// A multipart file staged in the site work directory.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub field: String,
    pub file_name: String,
    pub original_name: String,
    pub content_type: Option<String>,
    pub size: u64,
    pub path: PathBuf,
    /// Set once the handler has claimed the file; unclaimed files are
    /// deleted during finalisation.
    pub handled: bool,
}

impl UploadedFile {
    pub fn describe(&self) -> Value {
        serde_json::json!({
            "field": self.field,
            "name": self.file_name,
            "original_name": self.original_name,
            "type": self.content_type,
            "size": self.size,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub location: String,
    /// `Some` selects a `Refresh` header instead of `Location`.
    pub delay_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: String,
    pub max_age: Option<i64>,
    pub http_only: bool,
    pub secure: bool,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: "/".to_string(),
            max_age: None,
            http_only: false,
            secure: false,
        }
    }

    /// `Set-Cookie` header value.
    pub fn to_header_value(&self) -> String {
        let mut out = format!(
            "{}={}; Path={}",
            self.name,
            urlencoding::encode(&self.value),
            self.path
        );
        if let Some(max_age) = self.max_age {
            out.push_str(&format!("; Max-Age={max_age}"));
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if self.secure {
            out.push_str("; Secure");
        }
        out
    }
}

/// Everything a handler can read or write during one request.
#[derive(Debug)]
pub struct RuntimeContext {
    pub request: RequestInfo,
    /// Query parameters merged with form or JSON object fields.
    pub params: Map<String, Value>,
    pub body: Value,
    pub uploads: Vec<UploadedFile>,
    /// Set when relocating uploads into the work directory failed.
    pub upload_failure: Option<String>,

    pub output: Vec<String>,
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<Cookie>,
    pub redirect: Option<Redirect>,
    pub status: u16,

    pub vars: HashMap<String, Value>,
    exception: Option<RuntimeError>,
}

impl RuntimeContext {
    pub fn new(request: RequestInfo) -> Self {
        Self {
            request,
            params: Map::new(),
            body: Value::Null,
            uploads: Vec::new(),
            upload_failure: None,
            output: Vec::new(),
            headers: Vec::new(),
            cookies: Vec::new(),
            redirect: None,
            status: 200,
            vars: HashMap::new(),
            exception: None,
        }
    }

    /// Record a runtime error. The first one wins.
    pub fn capture(&mut self, err: RuntimeError) {
        if self.exception.is_none() {
            self.exception = Some(err);
        }
    }

    pub fn exception(&self) -> Option<&RuntimeError> {
        self.exception.as_ref()
    }

    pub fn take_exception(&mut self) -> Option<RuntimeError> {
        self.exception.take()
    }

    pub fn upload(&self, field: &str) -> Option<&UploadedFile> {
        self.uploads.iter().find(|u| u.field == field)
    }

    pub fn upload_mut(&mut self, field: &str) -> Option<&mut UploadedFile> {
        self.uploads.iter_mut().find(|u| u.field == field)
    }

    /// Replace an existing header of the same name (case-insensitive).
    pub fn set_header(&mut self, name: &str, value: String) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value));
    }
}
