//! Bound query parameters.
//!
//! Queries reference parameters as `{name:Type}` placeholders; values travel
//! separately (`param_<name>=...` on the HTTP interface) and are never
//! spliced into SQL text.

use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    UInt(u64),
}

impl ParamValue {
    /// Text form expected by the HTTP interface, which reads parameter values
    /// in escaped (TSV) format: backslash, tab and newline must be escaped.
    pub fn to_http_value(&self) -> String {
        match self {
            ParamValue::Str(s) => {
                let mut out = String::with_capacity(s.len());
                for c in s.chars() {
                    match c {
                        '\\' => out.push_str("\\\\"),
                        '\t' => out.push_str("\\t"),
                        '\n' => out.push_str("\\n"),
                        '\r' => out.push_str("\\r"),
                        other => out.push(other),
                    }
                }
                out
            }
            ParamValue::Int(n) => n.to_string(),
            ParamValue::UInt(n) => n.to_string(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ParamValue::UInt(n) => Some(*n),
            ParamValue::Int(n) => u64::try_from(*n).ok(),
            ParamValue::Str(_) => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Str(s) => write!(f, "{s:?}"),
            ParamValue::Int(n) => write!(f, "{n}"),
            ParamValue::UInt(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Str(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Str(s)
    }
}

impl From<i64> for ParamValue {
    fn from(n: i64) -> Self {
        ParamValue::Int(n)
    }
}

impl From<u32> for ParamValue {
    fn from(n: u32) -> Self {
        ParamValue::UInt(u64::from(n))
    }
}

impl From<u64> for ParamValue {
    fn from(n: u64) -> Self {
        ParamValue::UInt(n)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    values: BTreeMap<String, ParamValue>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// `(param_<name>, value)` pairs for the request URL.
    pub fn to_http_pairs(&self) -> Vec<(String, String)> {
        self.iter()
            .map(|(k, v)| (format!("param_{k}"), v.to_http_value()))
            .collect()
    }
}
