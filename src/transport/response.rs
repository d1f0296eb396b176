//! Line-oriented `key=value` replies terminated by `==END==`.

use std::str::FromStr;

use crate::transport::client::TransportError;
use crate::transport::codes::PrimeNetCode;

pub const END_SENTINEL: &str = "==END==";
const RESULT_KEY: &str = "pnErrorResult";
const DETAIL_KEY: &str = "pnErrorDetail";
const SUCCESS_DETAIL: &str = "SUCCESS";

/// Decoded reply fields. Later duplicates shadow earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMap {
    entries: Vec<(String, String)>,
}

impl ResponseMap {
    /// Lines after the sentinel are ignored. Lines without `=` map to an
    /// empty value. Carriage returns inside values become newlines, which is
    /// how the server transmits multi-line detail text.
    pub fn parse(body: &str) -> Self {
        let mut entries = Vec::new();
        for line in body.split('\n') {
            if line.trim_end_matches('\r') == END_SENTINEL {
                break;
            }
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once('=').unwrap_or((line, ""));
            entries.push((key.to_owned(), value.replace('\r', "\n")));
        }
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn require(&self, key: &'static str) -> Result<&str, TransportError> {
        self.get(key).ok_or(TransportError::MissingField { field: key })
    }

    /// Parses an optional field, rejecting values that are present but malformed.
    pub fn parse_opt<T: FromStr>(&self, key: &'static str) -> Result<Option<T>, TransportError> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| TransportError::InvalidField {
                    field: key,
                    value: raw.to_owned(),
                }),
        }
    }

    pub fn parse_required<T: FromStr>(&self, key: &'static str) -> Result<T, TransportError> {
        self.parse_opt(key)?
            .ok_or(TransportError::MissingField { field: key })
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A well-formed server answer. A non-zero code is still a successful
/// transport exchange; callers decide what the code means for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V5Response {
    pub code: PrimeNetCode,
    pub detail: String,
    pub fields: ResponseMap,
}

impl V5Response {
    pub fn from_body(body: &str) -> Result<Self, TransportError> {
        let fields = ResponseMap::parse(body);
        let code = fields.parse_required::<i64>(RESULT_KEY)?;
        let detail = fields.require(DETAIL_KEY)?.trim_end().to_owned();
        Ok(Self {
            code: PrimeNetCode::from_code(code),
            detail,
            fields,
        })
    }

    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }

    /// Detail text worth surfacing on an otherwise successful reply.
    pub fn notable_detail(&self) -> Option<&str> {
        (self.code.is_ok() && self.detail != SUCCESS_DETAIL).then_some(self.detail.as_str())
    }
}
