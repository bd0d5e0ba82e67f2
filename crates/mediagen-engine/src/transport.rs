use std::time::Duration;

use async_trait::async_trait;
use mediagen_contracts::{GenerationError, HttpMethod, PlatformId, RequestDiagnostics};
use reqwest::Client as HttpClient;
use serde_json::Value;

const MAX_ERROR_BODY_CHARS: usize = 512;

/// One outbound HTTP round trip, fully resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpCall {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub timeout: Option<Duration>,
}

impl HttpCall {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body),
            timeout: None,
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn diagnostics(&self) -> RequestDiagnostics {
        RequestDiagnostics::new(
            self.method.as_str(),
            self.url.as_str(),
            &self.headers,
            self.body.as_ref(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

/// The call never produced an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    pub message: String,
}

impl TransportFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn perform(&self, call: &HttpCall) -> Result<HttpReply, TransportFailure>;
}

/// Pooled `reqwest` client; cloning shares the pool.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    http: HttpClient,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn perform(&self, call: &HttpCall) -> Result<HttpReply, TransportFailure> {
        let mut builder = match call.method {
            HttpMethod::Get => self.http.get(&call.url),
            HttpMethod::Post => self.http.post(&call.url),
        };
        for (name, value) in &call.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = call.body.as_ref() {
            builder = builder.json(body);
        }
        if let Some(timeout) = call.timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder
            .send()
            .await
            .map_err(|err| TransportFailure::new(describe_reqwest_error(&err)))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| TransportFailure::new(describe_reqwest_error(&err)))?;
        Ok(HttpReply { status, body })
    }
}

fn describe_reqwest_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        return format!("request timed out: {err}");
    }
    if err.is_connect() {
        return format!("connection failed: {err}");
    }
    err.to_string()
}

/// Performs `call` once and maps the outcome into the error taxonomy:
/// no response is `Transport`, a non-2xx response or a bare vendor error
/// object is `Remote`, an unparseable 2xx body is `Protocol`.
pub async fn call_json(
    transport: &dyn HttpTransport,
    platform: PlatformId,
    call: &HttpCall,
) -> Result<Value, GenerationError> {
    let reply = match transport.perform(call).await {
        Ok(reply) => reply,
        Err(failure) => {
            return Err(GenerationError::Transport {
                message: failure.message,
                request: Some(Box::new(call.diagnostics())),
            })
        }
    };

    let parsed = serde_json::from_str::<Value>(&reply.body).ok();
    if !(200..300).contains(&reply.status) {
        let message = parsed
            .as_ref()
            .and_then(vendor_error_message)
            .unwrap_or_else(|| truncate_text(reply.body.trim(), MAX_ERROR_BODY_CHARS));
        return Err(GenerationError::Remote {
            message: if message.is_empty() {
                format!("{platform} returned HTTP {}", reply.status)
            } else {
                message
            },
            status: Some(reply.status),
            request: Some(Box::new(call.diagnostics())),
        });
    }

    let Some(payload) = parsed else {
        return Err(GenerationError::protocol(
            platform,
            format!(
                "response from {} is not JSON: {}",
                call.url,
                truncate_text(reply.body.trim(), 120)
            ),
        ));
    };
    if payload.get("status").is_none() {
        if let Some(message) = payload.get("error").and_then(error_text) {
            return Err(GenerationError::Remote {
                message,
                status: Some(reply.status),
                request: Some(Box::new(call.diagnostics())),
            });
        }
    }
    Ok(payload)
}

/// Pulls a human-readable message out of the common vendor error shapes.
pub fn vendor_error_message(payload: &Value) -> Option<String> {
    for key in ["error", "detail", "message", "title"] {
        if let Some(text) = payload.get(key).and_then(error_text) {
            return Some(text);
        }
    }
    None
}

fn error_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Object(obj) => obj
            .get("message")
            .or_else(|| obj.get("detail"))
            .and_then(error_text)
            .or_else(|| Some(Value::Object(obj.clone()).to_string())),
        Value::Array(rows) => {
            let parts = rows.iter().filter_map(error_text).collect::<Vec<String>>();
            (!parts.is_empty()).then(|| parts.join("; "))
        }
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
