use std::time::Duration;

use mediagen_contracts::{
    ExecutionResult, GenerationError, JobStatus, ModelConfig, PlatformId, RequestDescriptor,
};
use serde_json::{json, Map, Value};

use crate::config::EngineConfig;
use crate::params::{merge_extra, ParamReader};
use crate::transport::{vendor_error_message, HttpCall};

use super::{
    join_url, lowercase_status, map_object, non_empty_str, unknown_model, JobHandle,
    JobProtocol, ModelBundle,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GenboVariant {
    Image,
    Video,
}

/// Genbo task API: generations are tasks addressed by `task_id` and polled
/// at `tasks/<id>`.
#[derive(Debug, Clone)]
pub struct GenboModel {
    api_base: String,
    config: ModelConfig,
    variant: GenboVariant,
}

impl GenboModel {
    pub fn new(config: ModelConfig, engine: &EngineConfig) -> Result<Self, GenerationError> {
        let variant = match config.name.as_str() {
            "genbo-image" => GenboVariant::Image,
            "genbo-video" => GenboVariant::Video,
            _ => return Err(unknown_model(PlatformId::Genbo, &config)),
        };
        Ok(Self {
            api_base: engine.genbo_api_base.clone(),
            config,
            variant,
        })
    }

    fn task_id(payload: &Value) -> Option<&str> {
        non_empty_str(payload, "task_id").or_else(|| non_empty_str(payload, "id"))
    }
}

impl ModelBundle for GenboModel {
    fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn build_request(
        &self,
        params: &Map<String, Value>,
    ) -> Result<RequestDescriptor, GenerationError> {
        let reader = ParamReader::new(params);
        let prompt = reader.prompt("prompt")?;
        let mut body = match self.variant {
            GenboVariant::Image => {
                let mut body = map_object(json!({
                    "prompt": prompt,
                    "aspect_ratio": reader.choice(
                        "aspect_ratio",
                        "1:1",
                        &["1:1", "16:9", "9:16", "4:3", "3:4"],
                    )?,
                    "num_images": reader.int_in("num_images", Some(1), 1, 4)?,
                }));
                if let Some(style) = reader.optional_str("style")? {
                    body.insert("style".to_string(), Value::String(style));
                }
                body
            }
            GenboVariant::Video => {
                let mut body = map_object(json!({
                    "prompt": prompt,
                    "duration": reader.int_in("duration", Some(5), 2, 10)?,
                    "resolution": reader.choice("resolution", "720p", &["480p", "720p", "1080p"])?,
                }));
                if let Some(image) = reader.image_reference("image_url")? {
                    body.insert("image_url".to_string(), Value::String(image));
                }
                body
            }
        };
        if let Some(seed) = reader.int_in("seed", None, 0, i64::from(u32::MAX))? {
            body.insert("seed".to_string(), Value::Number(seed.into()));
        }
        merge_extra(&mut body, reader.extra()?);
        Ok(RequestDescriptor::post(self.config.endpoint.as_str(), body))
    }

    fn normalize_sync(&self, raw: &Value) -> ExecutionResult {
        let output = raw.get("output").cloned().unwrap_or(Value::Null);
        let status = self.classify(raw).unwrap_or(if output.is_null() {
            JobStatus::InProgress
        } else {
            JobStatus::Succeeded
        });
        ExecutionResult::new(PlatformId::Genbo, self.config.name.as_str(), status)
            .with_prediction_id(Self::task_id(raw).map(str::to_string))
            .with_output(output)
            .with_diagnostics(raw, &["error", "usage", "progress", "created_at", "finished_at"])
    }
}

impl JobProtocol for GenboModel {
    fn platform(&self) -> PlatformId {
        PlatformId::Genbo
    }

    fn sync_call(&self, descriptor: &RequestDescriptor, _wait: Duration) -> HttpCall {
        self.submit_call(descriptor).header("Prefer", "wait")
    }

    fn submit_call(&self, descriptor: &RequestDescriptor) -> HttpCall {
        HttpCall::post(
            join_url(&self.api_base, &descriptor.endpoint),
            descriptor.body_value(),
        )
    }

    fn job_handle(&self, submission: &Value) -> Option<JobHandle> {
        let id = Self::task_id(submission)?;
        Some(JobHandle {
            id: id.to_string(),
            status_url: join_url(&self.api_base, &format!("tasks/{id}")),
            response_url: None,
        })
    }

    fn classify(&self, payload: &Value) -> Option<JobStatus> {
        match lowercase_status(payload)?.as_str() {
            "queued" | "pending" | "running" | "processing" => Some(JobStatus::InProgress),
            "success" | "succeeded" | "completed" => Some(JobStatus::Succeeded),
            "failed" | "error" => Some(JobStatus::Failed),
            "canceled" | "cancelled" => Some(JobStatus::Canceled),
            _ => None,
        }
    }

    fn failure_message(&self, payload: &Value) -> String {
        vendor_error_message(payload).unwrap_or_else(|| "task failed".to_string())
    }
}
