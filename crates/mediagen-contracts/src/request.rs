use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound payload for one invocation. Built fresh per call and never
/// shared; `endpoint` is relative to the platform's API base.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestDescriptor {
    pub method: HttpMethod,
    pub endpoint: String,
    pub body: Map<String, Value>,
}

impl RequestDescriptor {
    pub fn post(endpoint: impl Into<String>, body: Map<String, Value>) -> Self {
        Self {
            method: HttpMethod::Post,
            endpoint: endpoint.into(),
            body,
        }
    }

    pub fn body_value(&self) -> Value {
        Value::Object(self.body.clone())
    }

    /// Canonical bytes: keys are emitted in sorted order regardless of how
    /// the body map was populated.
    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        let canonical = serde_json::json!({
            "method": self.method,
            "endpoint": self.endpoint,
            "body": canonicalize(&self.body_value()),
        });
        serde_json::to_vec(&canonical).unwrap_or_default()
    }

    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.to_canonical_bytes());
        hex::encode(hasher.finalize())
    }
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys = map.keys().collect::<Vec<_>>();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                if let Some(row) = map.get(key) {
                    out.insert(key.clone(), canonicalize(row));
                }
            }
            Value::Object(out)
        }
        Value::Array(rows) => Value::Array(rows.iter().map(canonicalize).collect()),
        _ => value.clone(),
    }
}
