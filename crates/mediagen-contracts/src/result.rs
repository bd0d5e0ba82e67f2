use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::platforms::PlatformId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    InProgress,
    Succeeded,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Vendor-independent record handed back after normalization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub platform: PlatformId,
    pub model: String,
    pub prediction_id: Option<String>,
    pub status: JobStatus,
    pub output: Value,
    pub output_urls: Vec<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub diagnostics: Map<String, Value>,
}

impl ExecutionResult {
    pub fn new(platform: PlatformId, model: impl Into<String>, status: JobStatus) -> Self {
        Self {
            platform,
            model: model.into(),
            prediction_id: None,
            status,
            output: Value::Null,
            output_urls: Vec::new(),
            diagnostics: Map::new(),
        }
    }

    pub fn with_output(mut self, output: Value) -> Self {
        let mut urls = Vec::new();
        collect_output_urls(&output, &mut urls);
        self.output = output;
        self.output_urls = urls;
        self
    }

    pub fn with_prediction_id(mut self, id: Option<String>) -> Self {
        self.prediction_id = id;
        self
    }

    /// Copies the named vendor fields into `diagnostics` when present and
    /// non-null.
    pub fn with_diagnostics(mut self, raw: &Value, fields: &[&str]) -> Self {
        for field in fields {
            if let Some(value) = raw.get(*field).filter(|value| !value.is_null()) {
                self.diagnostics.insert((*field).to_string(), value.clone());
            }
        }
        self
    }
}

/// Walks a vendor output value and collects unique http(s) URLs in order.
pub fn collect_output_urls(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(url) => {
            let trimmed = url.trim();
            if (trimmed.starts_with("https://") || trimmed.starts_with("http://"))
                && !out.iter().any(|existing| existing == trimmed)
            {
                out.push(trimmed.to_string());
            }
        }
        Value::Array(rows) => {
            for row in rows {
                collect_output_urls(row, out);
            }
        }
        Value::Object(obj) => {
            for key in ["url", "urls", "images", "image", "video", "videos", "output"] {
                if let Some(nested) = obj.get(key) {
                    collect_output_urls(nested, out);
                }
            }
        }
        _ => {}
    }
}
