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
enum ReplicateVariant {
    FluxSchnell,
    Sdxl,
    KlingVideo,
}

/// Replicate predictions API. Sync and async share one endpoint; the sync
/// path only adds the `Prefer: wait` hint.
#[derive(Debug, Clone)]
pub struct ReplicateModel {
    api_base: String,
    config: ModelConfig,
    variant: ReplicateVariant,
}

impl ReplicateModel {
    pub fn new(config: ModelConfig, engine: &EngineConfig) -> Result<Self, GenerationError> {
        let variant = match config.name.as_str() {
            "flux-schnell" => ReplicateVariant::FluxSchnell,
            "sdxl" => ReplicateVariant::Sdxl,
            "kling-video" => ReplicateVariant::KlingVideo,
            _ => return Err(unknown_model(PlatformId::Replicate, &config)),
        };
        Ok(Self {
            api_base: engine.replicate_api_base.clone(),
            config,
            variant,
        })
    }

    fn build_input(&self, reader: ParamReader<'_>) -> Result<Map<String, Value>, GenerationError> {
        let prompt = reader.prompt("prompt")?;
        let mut input = match self.variant {
            ReplicateVariant::FluxSchnell => map_object(json!({
                "prompt": prompt,
                "width": reader.int_in("width", Some(1024), 256, 1440)?,
                "height": reader.int_in("height", Some(1024), 256, 1440)?,
                "num_outputs": reader.int_in("num_outputs", Some(1), 1, 4)?,
                "output_format": reader.choice("output_format", "webp", &["webp", "png", "jpg"])?,
                "go_fast": reader.flag("go_fast", true)?,
            })),
            ReplicateVariant::Sdxl => map_object(json!({
                "prompt": prompt,
                "negative_prompt": reader.optional_str("negative_prompt")?.unwrap_or_default(),
                "width": reader.int_in("width", Some(1024), 256, 1536)?,
                "height": reader.int_in("height", Some(1024), 256, 1536)?,
                "num_inference_steps": reader.int_in("num_inference_steps", Some(30), 1, 100)?,
                "guidance_scale": reader.float_in("guidance_scale", 7.5, 0.0, 20.0)?,
            })),
            ReplicateVariant::KlingVideo => {
                let mut input = map_object(json!({
                    "prompt": prompt,
                    "negative_prompt": reader.optional_str("negative_prompt")?.unwrap_or_default(),
                    "duration": reader
                        .choice("duration", "5", &["5", "10"])?
                        .parse::<u64>()
                        .unwrap_or(5),
                    "aspect_ratio": reader.choice("aspect_ratio", "16:9", &["16:9", "9:16", "1:1"])?,
                }));
                if let Some(image) = reader.image_reference("start_image")? {
                    input.insert("start_image".to_string(), Value::String(image));
                }
                input
            }
        };
        if let Some(seed) = reader.int_in("seed", None, 0, i64::from(u32::MAX))? {
            input.insert("seed".to_string(), Value::Number(seed.into()));
        }
        merge_extra(&mut input, reader.extra()?);
        Ok(input)
    }
}

impl ModelBundle for ReplicateModel {
    fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn build_request(
        &self,
        params: &Map<String, Value>,
    ) -> Result<RequestDescriptor, GenerationError> {
        let input = self.build_input(ParamReader::new(params))?;
        let mut body = Map::new();
        body.insert("input".to_string(), Value::Object(input));
        Ok(RequestDescriptor::post(self.config.endpoint.as_str(), body))
    }

    fn normalize_sync(&self, raw: &Value) -> ExecutionResult {
        let status = self.classify(raw).unwrap_or(JobStatus::InProgress);
        ExecutionResult::new(PlatformId::Replicate, self.config.name.as_str(), status)
            .with_prediction_id(non_empty_str(raw, "id").map(str::to_string))
            .with_output(raw.get("output").cloned().unwrap_or(Value::Null))
            .with_diagnostics(
                raw,
                &["error", "logs", "metrics", "created_at", "completed_at"],
            )
    }
}

impl JobProtocol for ReplicateModel {
    fn platform(&self) -> PlatformId {
        PlatformId::Replicate
    }

    fn sync_call(&self, descriptor: &RequestDescriptor, wait: Duration) -> HttpCall {
        // The hint must expire before the client timeout so a slow prediction
        // comes back as `processing` instead of a dropped connection.
        // Replicate accepts 1 to 60 seconds.
        let margin = (wait / 4).min(Duration::from_secs(5));
        let wait_secs = wait.saturating_sub(margin).as_secs().clamp(1, 60);
        HttpCall::post(
            join_url(&self.api_base, &descriptor.endpoint),
            descriptor.body_value(),
        )
        .header("Prefer", format!("wait={wait_secs}"))
    }

    fn submit_call(&self, descriptor: &RequestDescriptor) -> HttpCall {
        HttpCall::post(
            join_url(&self.api_base, &descriptor.endpoint),
            descriptor.body_value(),
        )
    }

    fn job_handle(&self, submission: &Value) -> Option<JobHandle> {
        let id = non_empty_str(submission, "id")?;
        let status_url = submission
            .get("urls")
            .and_then(|urls| non_empty_str(urls, "get"))
            .map(str::to_string)
            .unwrap_or_else(|| join_url(&self.api_base, &format!("predictions/{id}")));
        Some(JobHandle {
            id: id.to_string(),
            status_url,
            response_url: None,
        })
    }

    fn classify(&self, payload: &Value) -> Option<JobStatus> {
        match lowercase_status(payload)?.as_str() {
            "starting" | "processing" => Some(JobStatus::InProgress),
            "succeeded" => Some(JobStatus::Succeeded),
            "failed" => Some(JobStatus::Failed),
            "canceled" | "cancelled" | "aborted" => Some(JobStatus::Canceled),
            _ => None,
        }
    }

    fn failure_message(&self, payload: &Value) -> String {
        vendor_error_message(payload).unwrap_or_else(|| {
            format!(
                "prediction {}",
                lowercase_status(payload).unwrap_or_else(|| "failed".to_string())
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mediagen_contracts::{ErrorKind, JobStatus, ModelRegistry, PlatformId};
    use serde_json::{json, Map, Value};

    use crate::config::EngineConfig;
    use crate::platforms::{JobProtocol, ModelBundle};

    use super::ReplicateModel;

    fn model(name: &str) -> ReplicateModel {
        let config = ModelRegistry::for_platform(PlatformId::Replicate)
            .get(name)
            .cloned()
            .unwrap();
        ReplicateModel::new(config, &EngineConfig::default()).unwrap()
    }

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn flux_request_carries_prompt_dims_and_defaults() {
        let descriptor = model("flux-schnell")
            .build_request(&params(json!({
                "prompt": "a red fox",
                "width": 1024,
                "height": 768,
            })))
            .unwrap();
        assert_eq!(
            descriptor.endpoint,
            "models/black-forest-labs/flux-schnell/predictions"
        );
        assert_eq!(
            descriptor.body_value(),
            json!({
                "input": {
                    "prompt": "a red fox",
                    "width": 1024,
                    "height": 768,
                    "num_outputs": 1,
                    "output_format": "webp",
                    "go_fast": true,
                }
            })
        );
    }

    #[test]
    fn build_request_is_deterministic() {
        let model = model("sdxl");
        let bag = params(json!({
            "prompt": "a red fox",
            "seed": 7,
            "extra": {"scheduler": "K_EULER", "prompt": "ignored"},
        }));
        let first = model.build_request(&bag).unwrap();
        let second = model.build_request(&bag).unwrap();
        assert_eq!(first.to_canonical_bytes(), second.to_canonical_bytes());
        assert_eq!(first.body["input"]["prompt"], json!("a red fox"));
        assert_eq!(first.body["input"]["scheduler"], json!("K_EULER"));
        assert_eq!(first.body["input"]["seed"], json!(7));
    }

    #[test]
    fn out_of_domain_values_are_validation_errors() {
        let model = model("flux-schnell");
        for bag in [
            json!({"width": 1024}),
            json!({"prompt": "fox", "width": 4096}),
            json!({"prompt": "fox", "output_format": "tiff"}),
            json!({"prompt": "fox", "seed": -1}),
        ] {
            let kind = model.build_request(&params(bag)).err().map(|err| err.kind());
            assert_eq!(kind, Some(ErrorKind::Validation));
        }
    }

    #[test]
    fn normalizes_canned_prediction() {
        let result = model("flux-schnell").normalize_sync(&json!({
            "id": "abc",
            "status": "succeeded",
            "output": "https://x/y.png",
        }));
        assert_eq!(result.prediction_id.as_deref(), Some("abc"));
        assert_eq!(result.status, JobStatus::Succeeded);
        assert_eq!(result.output, json!("https://x/y.png"));
        assert_eq!(result.output_urls, vec!["https://x/y.png"]);
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn normalize_tolerates_sparse_payloads() {
        let result = model("kling-video").normalize_async(&json!({}));
        assert_eq!(result.prediction_id, None);
        assert_eq!(result.status, JobStatus::InProgress);
        assert_eq!(result.output, Value::Null);
    }

    #[test]
    fn sync_call_sends_wait_hint_and_submit_does_not() {
        let model = model("flux-schnell");
        let descriptor = model
            .build_request(&params(json!({"prompt": "a red fox"})))
            .unwrap();
        let sync = model.sync_call(&descriptor, Duration::from_secs(60));
        assert_eq!(
            sync.url,
            "https://api.replicate.com/v1/models/black-forest-labs/flux-schnell/predictions"
        );
        assert_eq!(sync.headers, vec![("Prefer".to_string(), "wait=55".to_string())]);
        assert!(model.submit_call(&descriptor).headers.is_empty());

        let hint = |secs| model.sync_call(&descriptor, Duration::from_secs(secs)).headers[0].1.clone();
        assert_eq!(hint(300), "wait=60");
        assert_eq!(hint(4), "wait=3");
        assert_eq!(hint(1), "wait=1");
    }

    #[test]
    fn job_handle_prefers_vendor_poll_url() {
        let model = model("sdxl");
        let handle = model
            .job_handle(&json!({
                "id": "abc",
                "status": "starting",
                "urls": {"get": "https://api.replicate.com/v1/predictions/abc"},
            }))
            .unwrap();
        assert_eq!(handle.status_url, "https://api.replicate.com/v1/predictions/abc");
        let fallback = model.job_handle(&json!({"id": "xyz"})).unwrap();
        assert_eq!(fallback.status_url, "https://api.replicate.com/v1/predictions/xyz");
        assert!(model.job_handle(&json!({"status": "starting"})).is_none());
        assert!(model.job_handle(&json!({"id": "  "})).is_none());
    }

    #[test]
    fn classifies_prediction_statuses() {
        let model = model("sdxl");
        let status = |raw: &str| model.classify(&json!({"status": raw}));
        assert_eq!(status("starting"), Some(JobStatus::InProgress));
        assert_eq!(status("Processing"), Some(JobStatus::InProgress));
        assert_eq!(status("succeeded"), Some(JobStatus::Succeeded));
        assert_eq!(status("failed"), Some(JobStatus::Failed));
        assert_eq!(status("canceled"), Some(JobStatus::Canceled));
        assert_eq!(status("exploded"), None);
        assert_eq!(
            model.failure_message(&json!({"status": "failed", "error": "CUDA out of memory"})),
            "CUDA out of memory"
        );
        assert_eq!(
            model.failure_message(&json!({"status": "canceled", "error": null})),
            "prediction canceled"
        );
    }
}
