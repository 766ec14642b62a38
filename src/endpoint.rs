//! Endpoint candidates that may accept SQL execution

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::error::Error;

/// Function installed by `install-rpc`
pub const MIGRATION_RPC: &str = "execute_migration_sql";

/// How the SQL text travels in the request body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyShape {
    /// JSON object with the SQL under the given key
    JsonKey(String),
    /// The SQL itself, as plain text
    RawSql,
}

/// One guessed HTTP path that might execute SQL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointCandidate {
    /// Short label used in progress output
    pub name: String,
    /// Path relative to the project base URL
    pub path: String,
    pub body: BodyShape,
}

impl EndpointCandidate {
    /// A PostgREST RPC function taking the SQL under `key`
    pub fn rpc(function: &str, key: &str) -> Self {
        Self {
            name: function.to_string(),
            path: format!("rest/v1/rpc/{}", function),
            body: BodyShape::JsonKey(key.to_string()),
        }
    }

    /// A path accepting the raw SQL text as body
    pub fn raw(path: &str) -> Self {
        let path = path.trim_start_matches('/');
        Self {
            name: format!("/{}", path),
            path: path.to_string(),
            body: BodyShape::RawSql,
        }
    }

    /// Preference order used when nothing else is configured
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::rpc(MIGRATION_RPC, "sql_query"),
            Self::rpc("exec_sql", "query"),
            Self::rpc("execute_sql", "query"),
            Self::raw("sql"),
        ]
    }

    /// Serialized request body for one statement
    pub fn body_for(&self, sql: &str) -> Vec<u8> {
        match &self.body {
            BodyShape::JsonKey(key) => {
                let mut object = Map::new();
                object.insert(key.clone(), Value::String(sql.to_string()));
                Value::Object(object).to_string().into_bytes()
            }
            BodyShape::RawSql => sql.as_bytes().to_vec(),
        }
    }

    /// Content type matching [`body_for`](Self::body_for)
    pub fn content_type(&self) -> &'static str {
        match self.body {
            BodyShape::JsonKey(_) => "application/json",
            BodyShape::RawSql => "text/plain",
        }
    }
}

impl fmt::Display for EndpointCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Parses `function`, `function=key` or `/raw/path`.
///
/// Without an explicit key, `execute_migration_sql` takes `sql_query` and
/// every other function takes `query`.
impl FromStr for EndpointCandidate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::config("endpoint cannot be empty"));
        }
        if s.starts_with('/') {
            return Ok(Self::raw(s));
        }
        let (function, key) = match s.split_once('=') {
            Some((function, key)) => (function.trim(), key.trim()),
            None if s == MIGRATION_RPC => (s, "sql_query"),
            None => (s, "query"),
        };
        if function.is_empty() || key.is_empty() {
            return Err(Error::config(format!("invalid endpoint spec: {}", s)));
        }
        Ok(Self::rpc(function, key))
    }
}
