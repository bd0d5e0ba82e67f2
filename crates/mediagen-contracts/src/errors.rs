use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::models::InterfaceMode;
use crate::platforms::PlatformId;

const REDACTED: &str = "<redacted>";
const MAX_DIAGNOSTIC_STRING_CHARS: usize = 256;

/// Outbound request snapshot attached to remote and transport failures.
///
/// Header values that look like secrets are replaced before the snapshot is
/// stored, so the error can be logged or printed as-is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestDiagnostics {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RequestDiagnostics {
    pub fn new(
        method: impl Into<String>,
        url: impl Into<String>,
        headers: &[(String, String)],
        body: Option<&Value>,
    ) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: headers
                .iter()
                .map(|(name, value)| {
                    if is_secret_header(name) {
                        (name.clone(), REDACTED.to_string())
                    } else {
                        (name.clone(), value.clone())
                    }
                })
                .collect(),
            body: body.map(abbreviate_payload),
        }
    }
}

impl fmt::Display for RequestDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

fn is_secret_header(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    lowered == "authorization"
        || lowered == "proxy-authorization"
        || lowered.contains("key")
        || lowered.contains("token")
        || lowered.contains("secret")
}

fn abbreviate_payload(value: &Value) -> Value {
    match value {
        Value::String(text) if text.starts_with("data:") => {
            let head = text.split(',').next().unwrap_or("data:");
            Value::String(format!("{head},<{} chars omitted>", text.len()))
        }
        Value::String(text) if text.chars().count() > MAX_DIAGNOSTIC_STRING_CHARS => {
            let cut = text
                .chars()
                .take(MAX_DIAGNOSTIC_STRING_CHARS)
                .collect::<String>();
            Value::String(cut + "…")
        }
        Value::Array(rows) => Value::Array(rows.iter().map(abbreviate_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                out.insert(key.clone(), abbreviate_payload(row));
            }
            Value::Object(out)
        }
        _ => value.clone(),
    }
}

/// Stable label for each error class, used in logs, events and CLI output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Credential,
    UnsupportedOperation,
    Protocol,
    Remote,
    Transport,
    Timeout,
    Canceled,
    UnknownPlatform,
    UnknownModel,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Credential => "credential",
            Self::UnsupportedOperation => "unsupported_operation",
            Self::Protocol => "protocol",
            Self::Remote => "remote",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Canceled => "canceled",
            Self::UnknownPlatform => "unknown_platform",
            Self::UnknownModel => "unknown_model",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    #[error("invalid parameters: {0}")]
    Validation(String),

    #[error("credentials for {platform} rejected: {reason}")]
    Credential { platform: PlatformId, reason: String },

    #[error("{platform} model '{model}' does not support {mode} execution")]
    UnsupportedOperation {
        platform: PlatformId,
        model: String,
        mode: InterfaceMode,
    },

    #[error("{platform} violated its response contract: {message}")]
    Protocol { platform: PlatformId, message: String },

    #[error("{}", remote_message(.message, .status))]
    Remote {
        message: String,
        status: Option<u16>,
        request: Option<Box<RequestDiagnostics>>,
    },

    #[error("no response from {}: {message}", transport_target(.request))]
    Transport {
        message: String,
        request: Option<Box<RequestDiagnostics>>,
    },

    #[error("job {job_id} still running after {:.1}s", .waited.as_secs_f64())]
    Timeout { job_id: String, waited: Duration },

    #[error("{}", canceled_message(.job_id))]
    Canceled { job_id: Option<String> },

    #[error("unknown platform '{0}'")]
    UnknownPlatform(String),

    #[error("unknown model '{model}' for platform {platform}")]
    UnknownModel { platform: PlatformId, model: String },
}

fn remote_message(message: &str, status: &Option<u16>) -> String {
    match status {
        Some(code) => format!("remote error ({code}): {message}"),
        None => format!("remote error: {message}"),
    }
}

fn transport_target(request: &Option<Box<RequestDiagnostics>>) -> String {
    request
        .as_ref()
        .map(|diagnostics| diagnostics.to_string())
        .unwrap_or_else(|| "remote".to_string())
}

fn canceled_message(job_id: &Option<String>) -> String {
    match job_id {
        Some(id) => format!("invocation canceled while job {id} was in flight"),
        None => "invocation canceled".to_string(),
    }
}

impl GenerationError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn credential(platform: PlatformId, reason: impl Into<String>) -> Self {
        Self::Credential {
            platform,
            reason: reason.into(),
        }
    }

    pub fn protocol(platform: PlatformId, message: impl Into<String>) -> Self {
        Self::Protocol {
            platform,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Credential { .. } => ErrorKind::Credential,
            Self::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::Remote { .. } => ErrorKind::Remote,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Canceled { .. } => ErrorKind::Canceled,
            Self::UnknownPlatform(_) => ErrorKind::UnknownPlatform,
            Self::UnknownModel { .. } => ErrorKind::UnknownModel,
        }
    }

    pub fn request(&self) -> Option<&RequestDiagnostics> {
        match self {
            Self::Remote { request, .. } | Self::Transport { request, .. } => request.as_deref(),
            _ => None,
        }
    }

    /// JSON view for event logs and the partial-failure pass-through.
    pub fn to_value(&self) -> Value {
        let mut out = Map::new();
        out.insert(
            "kind".to_string(),
            Value::String(self.kind().as_str().to_string()),
        );
        out.insert("message".to_string(), Value::String(self.to_string()));
        if let Self::Remote {
            status: Some(code), ..
        } = self
        {
            out.insert("status".to_string(), Value::Number((*code).into()));
        }
        if let Some(request) = self.request() {
            out.insert(
                "request".to_string(),
                serde_json::to_value(request).unwrap_or(Value::Null),
            );
        }
        Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn diagnostics_redact_secret_headers() {
        let headers = vec![
            ("Authorization".to_string(), "Bearer r8_secret".to_string()),
            ("X-Api-Key".to_string(), "abc".to_string()),
            ("Prefer".to_string(), "wait=60".to_string()),
        ];
        let diagnostics = RequestDiagnostics::new("POST", "https://x/y", &headers, None);
        assert_eq!(
            diagnostics.headers,
            vec![
                ("Authorization".to_string(), "<redacted>".to_string()),
                ("X-Api-Key".to_string(), "<redacted>".to_string()),
                ("Prefer".to_string(), "wait=60".to_string()),
            ]
        );
    }

    #[test]
    fn diagnostics_abbreviate_data_urls() {
        let body = json!({
            "input": {
                "prompt": "a red fox",
                "start_image": format!("data:image/png;base64,{}", "A".repeat(4000)),
            }
        });
        let diagnostics = RequestDiagnostics::new("POST", "https://x/y", &[], Some(&body));
        let image = diagnostics.body.as_ref().unwrap()["input"]["start_image"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        assert!(image.starts_with("data:image/png;base64,<"));
        assert!(image.len() < 100);
        assert_eq!(
            diagnostics.body.as_ref().unwrap()["input"]["prompt"],
            json!("a red fox")
        );
    }

    #[test]
    fn remote_error_value_carries_status_and_request() {
        let err = GenerationError::Remote {
            message: "NSFW content detected".to_string(),
            status: Some(422),
            request: Some(Box::new(RequestDiagnostics::new(
                "POST",
                "https://api.replicate.com/v1/predictions",
                &[],
                None,
            ))),
        };
        assert_eq!(err.kind(), ErrorKind::Remote);
        assert_eq!(err.to_string(), "remote error (422): NSFW content detected");
        let value = err.to_value();
        assert_eq!(value["kind"], json!("remote"));
        assert_eq!(value["status"], json!(422));
        assert_eq!(value["request"]["method"], json!("POST"));
    }

    #[test]
    fn unsupported_operation_message_names_mode() {
        let err = GenerationError::UnsupportedOperation {
            platform: PlatformId::Fal,
            model: "kling-video".to_string(),
            mode: InterfaceMode::Sync,
        };
        assert_eq!(
            err.to_string(),
            "fal model 'kling-video' does not support sync execution"
        );
    }
}
