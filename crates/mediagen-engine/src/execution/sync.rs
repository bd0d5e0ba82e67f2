use std::time::Duration;

use mediagen_contracts::{ExecutionResult, GenerationError, InterfaceMode, JobStatus};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::platforms::{JobProtocol, ModelBundle};
use crate::transport::HttpTransport;

use super::{ensure_mode, remote_failure, send, InvocationContext, ModelInstance};

/// Single request against the synchronous endpoint, bounded by `timeout`.
///
/// A vendor that answers with a non-terminal status (its own wait hint ran
/// out) yields that status in the result; a reported failure is `Remote`.
pub async fn execute_sync(
    instance: &ModelInstance,
    transport: &dyn HttpTransport,
    params: &Map<String, Value>,
    ctx: &InvocationContext,
    timeout: Duration,
) -> Result<ExecutionResult, GenerationError> {
    let model = instance.model();
    ensure_mode(model, InterfaceMode::Sync)?;
    if ctx.cancel.is_cancelled() {
        return Err(GenerationError::Canceled { job_id: None });
    }

    instance.ensure_credentials().await?;
    let descriptor = model.build_request(params)?;
    debug!(
        invocation_id = %ctx.id,
        fingerprint = %descriptor.fingerprint(),
        endpoint = %descriptor.endpoint,
        "sync request built"
    );

    let call = model
        .sync_call(&descriptor, timeout)
        .with_timeout(timeout);
    let (raw, call) = send(instance, transport, call, ctx, None).await?;
    let result = model.normalize_sync(&raw);
    ctx.emit(
        "sync_response",
        json!({
            "prediction_id": result.prediction_id,
            "status": result.status,
        }),
    )
    .await;

    match result.status {
        JobStatus::Failed | JobStatus::Canceled => {
            Err(remote_failure(model.failure_message(&raw), &call))
        }
        JobStatus::InProgress | JobStatus::Succeeded => Ok(result),
    }
}
