//! Per-platform model bundles.
//!
//! Each platform contributes one struct that implements both capability
//! traits: [`ModelBundle`] (request building and response normalization) and
//! [`JobProtocol`] (where calls go and how the vendor reports job state).
//! [`PlatformModel`] is the closed set the execution strategies dispatch on.

mod fal;
mod genbo;
mod replicate;

use std::time::Duration;

use mediagen_contracts::{
    ExecutionResult, GenerationError, JobStatus, ModelConfig, PlatformId, RequestDescriptor,
};
use serde_json::{Map, Value};

use crate::config::EngineConfig;
use crate::transport::HttpCall;

pub use fal::FalModel;
pub use genbo::GenboModel;
pub use replicate::ReplicateModel;

pub trait ModelBundle {
    fn config(&self) -> &ModelConfig;

    /// Validates `params` and builds the outbound payload. Deterministic.
    fn build_request(&self, params: &Map<String, Value>)
        -> Result<RequestDescriptor, GenerationError>;

    /// Maps a vendor payload into the uniform record; missing optional
    /// fields are tolerated.
    fn normalize_sync(&self, raw: &Value) -> ExecutionResult;

    fn normalize_async(&self, raw: &Value) -> ExecutionResult {
        self.normalize_sync(raw)
    }
}

/// Vendor-issued identifier plus the URLs used to address the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: String,
    pub status_url: String,
    pub response_url: Option<String>,
}

pub trait JobProtocol {
    fn platform(&self) -> PlatformId;

    fn sync_call(&self, descriptor: &RequestDescriptor, wait: Duration) -> HttpCall;

    fn submit_call(&self, descriptor: &RequestDescriptor) -> HttpCall;

    fn job_handle(&self, submission: &Value) -> Option<JobHandle>;

    fn poll_call(&self, handle: &JobHandle) -> HttpCall {
        HttpCall::get(handle.status_url.as_str())
    }

    /// `None` when the payload carries no recognizable status.
    fn classify(&self, payload: &Value) -> Option<JobStatus>;

    fn failure_message(&self, payload: &Value) -> String;

    /// Extra request for the final payload once the status call reports
    /// success; `None` when the status payload already is the result.
    fn result_call(&self, _handle: &JobHandle) -> Option<HttpCall> {
        None
    }
}

#[derive(Debug, Clone)]
pub enum PlatformModel {
    Fal(FalModel),
    Genbo(GenboModel),
    Replicate(ReplicateModel),
}

impl PlatformModel {
    pub fn resolve(
        platform: PlatformId,
        config: ModelConfig,
        engine: &EngineConfig,
    ) -> Result<Self, GenerationError> {
        match platform {
            PlatformId::Fal => FalModel::new(config, engine).map(Self::Fal),
            PlatformId::Genbo => GenboModel::new(config, engine).map(Self::Genbo),
            PlatformId::Replicate => ReplicateModel::new(config, engine).map(Self::Replicate),
        }
    }

    fn bundle(&self) -> &dyn ModelBundle {
        match self {
            Self::Fal(model) => model,
            Self::Genbo(model) => model,
            Self::Replicate(model) => model,
        }
    }

    fn protocol(&self) -> &dyn JobProtocol {
        match self {
            Self::Fal(model) => model,
            Self::Genbo(model) => model,
            Self::Replicate(model) => model,
        }
    }
}

impl ModelBundle for PlatformModel {
    fn config(&self) -> &ModelConfig {
        self.bundle().config()
    }

    fn build_request(
        &self,
        params: &Map<String, Value>,
    ) -> Result<RequestDescriptor, GenerationError> {
        self.bundle().build_request(params)
    }

    fn normalize_sync(&self, raw: &Value) -> ExecutionResult {
        self.bundle().normalize_sync(raw)
    }

    fn normalize_async(&self, raw: &Value) -> ExecutionResult {
        self.bundle().normalize_async(raw)
    }
}

impl JobProtocol for PlatformModel {
    fn platform(&self) -> PlatformId {
        self.protocol().platform()
    }

    fn sync_call(&self, descriptor: &RequestDescriptor, wait: Duration) -> HttpCall {
        self.protocol().sync_call(descriptor, wait)
    }

    fn submit_call(&self, descriptor: &RequestDescriptor) -> HttpCall {
        self.protocol().submit_call(descriptor)
    }

    fn job_handle(&self, submission: &Value) -> Option<JobHandle> {
        self.protocol().job_handle(submission)
    }

    fn poll_call(&self, handle: &JobHandle) -> HttpCall {
        self.protocol().poll_call(handle)
    }

    fn classify(&self, payload: &Value) -> Option<JobStatus> {
        self.protocol().classify(payload)
    }

    fn failure_message(&self, payload: &Value) -> String {
        self.protocol().failure_message(payload)
    }

    fn result_call(&self, handle: &JobHandle) -> Option<HttpCall> {
        self.protocol().result_call(handle)
    }
}

fn unknown_model(platform: PlatformId, config: &ModelConfig) -> GenerationError {
    GenerationError::UnknownModel {
        platform,
        model: config.name.clone(),
    }
}

fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
}

fn lowercase_status(payload: &Value) -> Option<String> {
    non_empty_str(payload, "status").map(str::to_ascii_lowercase)
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
