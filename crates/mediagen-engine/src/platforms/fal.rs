use std::time::Duration;

use mediagen_contracts::{
    ExecutionResult, GenerationError, JobStatus, MediaKind, ModelConfig, PlatformId,
    RequestDescriptor,
};
use serde_json::{json, Map, Value};

use crate::config::EngineConfig;
use crate::params::{merge_extra, ParamReader};
use crate::transport::{vendor_error_message, HttpCall};

use super::{
    join_url, map_object, non_empty_str, unknown_model, JobHandle, JobProtocol, ModelBundle,
};

const IMAGE_SIZE_PRESETS: &[&str] = &[
    "square_hd",
    "square",
    "portrait_4_3",
    "portrait_16_9",
    "landscape_4_3",
    "landscape_16_9",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FalVariant {
    FluxDev,
    FastSdxl,
    KlingVideo,
}

/// fal.ai: `fal.run` answers synchronously with the result body, the queue
/// host runs the submit / status / response protocol.
#[derive(Debug, Clone)]
pub struct FalModel {
    api_base: String,
    queue_base: String,
    config: ModelConfig,
    variant: FalVariant,
}

impl FalModel {
    pub fn new(config: ModelConfig, engine: &EngineConfig) -> Result<Self, GenerationError> {
        let variant = match config.name.as_str() {
            "flux-dev" => FalVariant::FluxDev,
            "fast-sdxl" => FalVariant::FastSdxl,
            "kling-video" => FalVariant::KlingVideo,
            _ => return Err(unknown_model(PlatformId::Fal, &config)),
        };
        Ok(Self {
            api_base: engine.fal_api_base.clone(),
            queue_base: engine.fal_queue_base.clone(),
            config,
            variant,
        })
    }

    fn queue_url(&self, suffix: &str) -> String {
        join_url(
            &self.queue_base,
            &format!("{}/{suffix}", self.config.endpoint.trim_end_matches('/')),
        )
    }

    /// Explicit `width` + `height` win over the `image_size` preset.
    fn image_size(reader: ParamReader<'_>, default: &str) -> Result<Value, GenerationError> {
        let width = reader.int_in("width", None, 256, 2048)?;
        let height = reader.int_in("height", None, 256, 2048)?;
        match (width, height) {
            (Some(width), Some(height)) => Ok(json!({"width": width, "height": height})),
            (None, None) => Ok(Value::String(reader.choice(
                "image_size",
                default,
                IMAGE_SIZE_PRESETS,
            )?)),
            _ => Err(GenerationError::validation(
                "'width' and 'height' must be given together",
            )),
        }
    }
}

impl ModelBundle for FalModel {
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
            FalVariant::FluxDev => map_object(json!({
                "prompt": prompt,
                "image_size": Self::image_size(reader, "landscape_4_3")?,
                "num_inference_steps": reader.int_in("num_inference_steps", Some(28), 1, 50)?,
                "guidance_scale": reader.float_in("guidance_scale", 3.5, 1.0, 20.0)?,
                "num_images": reader.int_in("num_images", Some(1), 1, 4)?,
                "enable_safety_checker": reader.flag("enable_safety_checker", true)?,
            })),
            FalVariant::FastSdxl => map_object(json!({
                "prompt": prompt,
                "negative_prompt": reader.optional_str("negative_prompt")?.unwrap_or_default(),
                "image_size": Self::image_size(reader, "square_hd")?,
                "num_images": reader.int_in("num_images", Some(1), 1, 4)?,
            })),
            FalVariant::KlingVideo => {
                let Some(image_url) = reader.image_reference("image_url")? else {
                    return Err(GenerationError::validation("'image_url' is required"));
                };
                map_object(json!({
                    "prompt": prompt,
                    "image_url": image_url,
                    "duration": reader.choice("duration", "5", &["5", "10"])?,
                    "aspect_ratio": reader.choice("aspect_ratio", "16:9", &["16:9", "9:16", "1:1"])?,
                }))
            }
        };
        if self.variant != FalVariant::KlingVideo {
            if let Some(seed) = reader.int_in("seed", None, 0, i64::from(u32::MAX))? {
                body.insert("seed".to_string(), Value::Number(seed.into()));
            }
        }
        merge_extra(&mut body, reader.extra()?);
        Ok(RequestDescriptor::post(self.config.endpoint.as_str(), body))
    }

    fn normalize_sync(&self, raw: &Value) -> ExecutionResult {
        let status = if raw.get("error").is_some_and(|error| !error.is_null()) {
            JobStatus::Failed
        } else {
            JobStatus::Succeeded
        };
        let keys: &[&str] = match self.config.media {
            MediaKind::Video => &["video", "videos", "images", "image"],
            MediaKind::Image => &["images", "image", "video"],
        };
        let output = keys
            .iter()
            .find_map(|key| raw.get(*key).filter(|value| !value.is_null()))
            .cloned()
            .unwrap_or(Value::Null);
        ExecutionResult::new(PlatformId::Fal, self.config.name.as_str(), status)
            .with_prediction_id(non_empty_str(raw, "request_id").map(str::to_string))
            .with_output(output)
            .with_diagnostics(raw, &["seed", "timings", "has_nsfw_concepts", "error"])
    }
}

impl JobProtocol for FalModel {
    fn platform(&self) -> PlatformId {
        PlatformId::Fal
    }

    fn sync_call(&self, descriptor: &RequestDescriptor, _wait: Duration) -> HttpCall {
        HttpCall::post(
            join_url(&self.api_base, &descriptor.endpoint),
            descriptor.body_value(),
        )
    }

    fn submit_call(&self, descriptor: &RequestDescriptor) -> HttpCall {
        HttpCall::post(
            join_url(&self.queue_base, &descriptor.endpoint),
            descriptor.body_value(),
        )
    }

    fn job_handle(&self, submission: &Value) -> Option<JobHandle> {
        let id = non_empty_str(submission, "request_id")?;
        Some(JobHandle {
            id: id.to_string(),
            status_url: non_empty_str(submission, "status_url")
                .map(str::to_string)
                .unwrap_or_else(|| self.queue_url(&format!("requests/{id}/status"))),
            response_url: Some(
                non_empty_str(submission, "response_url")
                    .map(str::to_string)
                    .unwrap_or_else(|| self.queue_url(&format!("requests/{id}"))),
            ),
        })
    }

    fn classify(&self, payload: &Value) -> Option<JobStatus> {
        let status = non_empty_str(payload, "status")?.to_ascii_uppercase();
        match status.as_str() {
            "IN_QUEUE" | "IN_PROGRESS" => Some(JobStatus::InProgress),
            "COMPLETED" if payload.get("error").is_some_and(|error| !error.is_null()) => {
                Some(JobStatus::Failed)
            }
            "COMPLETED" => Some(JobStatus::Succeeded),
            "FAILED" | "ERROR" => Some(JobStatus::Failed),
            "CANCELLED" | "CANCELED" => Some(JobStatus::Canceled),
            _ => None,
        }
    }

    fn failure_message(&self, payload: &Value) -> String {
        vendor_error_message(payload).unwrap_or_else(|| "request failed".to_string())
    }

    fn result_call(&self, handle: &JobHandle) -> Option<HttpCall> {
        handle
            .response_url
            .as_ref()
            .map(|url| HttpCall::get(url.as_str()))
    }
}
