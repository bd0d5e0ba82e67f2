mod polling;
mod sync;

use std::sync::Arc;

use mediagen_contracts::{
    AuthScheme, Credentials, EventLog, EventPayload, ExecutionResult, GenerationError,
    InterfaceMode, PlatformSpec,
};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::credentials::{CredentialCache, CredentialProvider};
use crate::platforms::{JobProtocol, ModelBundle, PlatformModel};
use crate::transport::{call_json, HttpCall, HttpTransport};

pub use polling::execute_async;
pub use sync::execute_sync;

/// One model bundle plus its memoized credentials. Instances are built per
/// invocation and never shared.
pub struct ModelInstance {
    model: PlatformModel,
    auth: AuthScheme,
    credentials: CredentialCache,
}

impl ModelInstance {
    pub fn new(
        model: PlatformModel,
        platform: &PlatformSpec,
        provider: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            model,
            auth: platform.auth,
            credentials: CredentialCache::new(platform.id, platform.credential.clone(), provider),
        }
    }

    pub fn model(&self) -> &PlatformModel {
        &self.model
    }

    pub async fn ensure_credentials(&self) -> Result<&Credentials, GenerationError> {
        self.credentials.ensure().await
    }

    async fn authorize(&self, call: HttpCall) -> Result<HttpCall, GenerationError> {
        let credentials = self.ensure_credentials().await?;
        Ok(call.header("Authorization", self.auth.header_value(credentials.secret())))
    }
}

/// Per-invocation identity, cancellation signal and optional event sink.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub id: String,
    pub cancel: CancellationToken,
    events: Option<EventLog>,
}

impl InvocationContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            cancel,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Option<EventLog>) -> Self {
        self.events = events;
        self
    }

    /// Appends one event off the async workers. Failures are logged and
    /// never fail the invocation.
    async fn emit(&self, event_type: &'static str, payload: Value) {
        let Some(events) = self.events.clone() else {
            return;
        };
        let payload: EventPayload = payload.as_object().cloned().unwrap_or_default();
        let id = self.id.clone();
        let written =
            tokio::task::spawn_blocking(move || events.emit(&id, event_type, payload)).await;
        let err = match written {
            Ok(Ok(_)) => return,
            Ok(Err(err)) => err.to_string(),
            Err(join) => join.to_string(),
        };
        warn!(
            invocation_id = %self.id,
            event = event_type,
            error = %err,
            "failed to append invocation event"
        );
    }
}

/// Runs one invocation through the strategy matching `mode` and records
/// the outcome.
pub async fn execute(
    instance: &ModelInstance,
    transport: &dyn HttpTransport,
    mode: InterfaceMode,
    params: &Map<String, Value>,
    ctx: &InvocationContext,
    config: &EngineConfig,
) -> Result<ExecutionResult, GenerationError> {
    let model = instance.model();
    info!(
        invocation_id = %ctx.id,
        platform = %model.platform(),
        model = %model.config().name,
        mode = %mode,
        "invocation started"
    );
    ctx.emit(
        "invocation_started",
        json!({
            "platform": model.platform(),
            "model": model.config().name,
            "mode": mode,
        }),
    )
    .await;

    let outcome = match mode {
        InterfaceMode::Sync => execute_sync(instance, transport, params, ctx, config.sync_timeout).await,
        InterfaceMode::Async => execute_async(instance, transport, params, ctx, config.poll).await,
    };

    match &outcome {
        Ok(result) => {
            info!(
                invocation_id = %ctx.id,
                prediction_id = result.prediction_id.as_deref().unwrap_or(""),
                status = %result.status,
                outputs = result.output_urls.len(),
                "invocation finished"
            );
            ctx.emit(
                "invocation_succeeded",
                json!({
                    "prediction_id": result.prediction_id,
                    "status": result.status,
                    "output_urls": result.output_urls,
                }),
            )
            .await;
        }
        Err(err) => {
            warn!(
                invocation_id = %ctx.id,
                kind = %err.kind(),
                error = %err,
                "invocation failed"
            );
            ctx.emit("invocation_failed", json!({ "error": err.to_value() })).await;
        }
    }
    outcome
}

fn ensure_mode(model: &PlatformModel, mode: InterfaceMode) -> Result<(), GenerationError> {
    if model.config().supports(mode) {
        return Ok(());
    }
    Err(GenerationError::UnsupportedOperation {
        platform: model.platform(),
        model: model.config().name.clone(),
        mode,
    })
}

/// One authorized call that yields to the cancellation token.
async fn send(
    instance: &ModelInstance,
    transport: &dyn HttpTransport,
    call: HttpCall,
    ctx: &InvocationContext,
    job_id: Option<&str>,
) -> Result<(Value, HttpCall), GenerationError> {
    let call = instance.authorize(call).await?;
    let platform = instance.model().platform();
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(GenerationError::Canceled {
            job_id: job_id.map(str::to_string),
        }),
        result = call_json(transport, platform, &call) => result.map(|payload| (payload, call)),
    }
}

fn remote_failure(message: String, call: &HttpCall) -> GenerationError {
    GenerationError::Remote {
        message,
        status: None,
        request: Some(Box::new(call.diagnostics())),
    }
}
