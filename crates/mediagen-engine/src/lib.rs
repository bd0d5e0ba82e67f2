//! Uniform invocation surface over the supported media generation platforms.
//!
//! [`Engine`] resolves a platform + model pair, instantiates the model
//! bundle and runs it through the synchronous or asynchronous strategy.

pub mod config;
pub mod credentials;
pub mod execution;
pub mod params;
pub mod platforms;
pub mod transport;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use mediagen_contracts::{
    EventLog, ExecutionResult, GenerationError, InterfaceMode, ModelSelector, PlatformId,
    PlatformRegistry,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use config::{EngineConfig, PollOptions};
pub use credentials::{CredentialProvider, EnvCredentialProvider, StaticCredentialProvider};
pub use execution::{execute, execute_async, execute_sync, InvocationContext, ModelInstance};
pub use platforms::{JobHandle, JobProtocol, ModelBundle, PlatformModel};
pub use transport::{HttpCall, HttpReply, HttpTransport, ReqwestTransport, TransportFailure};

/// One inbound invocation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub platform: PlatformId,
    pub model: String,
    #[serde(default)]
    pub mode: InterfaceMode,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl InvocationRequest {
    pub fn new(platform: PlatformId, model: impl Into<String>, mode: InterfaceMode) -> Self {
        Self {
            platform,
            model: model.into(),
            mode,
            params: Map::new(),
        }
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchErrorPolicy {
    #[default]
    Abort,
    Continue,
}

#[derive(Debug)]
pub enum BatchOutcome {
    Completed(ExecutionResult),
    /// The failed input passed through unchanged, next to its error.
    Failed {
        input: InvocationRequest,
        error: GenerationError,
    },
}

impl BatchOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Completed(result) => json!({ "ok": true, "result": result }),
            Self::Failed { input, error } => json!({
                "ok": false,
                "input": input,
                "error": error.to_value(),
            }),
        }
    }
}

pub struct Engine {
    config: EngineConfig,
    selector: ModelSelector,
    credentials: Arc<dyn CredentialProvider>,
    transport: Arc<dyn HttpTransport>,
    events: Option<EventLog>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        credentials: Arc<dyn CredentialProvider>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            config,
            selector: ModelSelector::new(None),
            credentials,
            transport,
            events: None,
        }
    }

    /// Environment-driven engine: API bases and timing from `EngineConfig`,
    /// secrets from the platforms' credential variables.
    pub fn from_env() -> Self {
        let registry = PlatformRegistry::default();
        let credentials = Arc::new(EnvCredentialProvider::from_registry(&registry));
        Self::new(
            EngineConfig::from_env(),
            credentials,
            Arc::new(ReqwestTransport::new()),
        )
        .with_registry(registry)
    }

    pub fn with_registry(mut self, registry: PlatformRegistry) -> Self {
        self.selector = ModelSelector::new(Some(registry));
        self
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut EngineConfig {
        &mut self.config
    }

    pub fn registry(&self) -> &PlatformRegistry {
        &self.selector.registry
    }

    /// Fresh bundle instance for one invocation. Fails before any network
    /// activity when the model is unknown or lacks `mode`.
    pub fn instantiate(
        &self,
        platform: PlatformId,
        model: &str,
        mode: InterfaceMode,
    ) -> Result<ModelInstance, GenerationError> {
        let selection = self.selector.select(platform, model, mode)?;
        let bundle = PlatformModel::resolve(platform, selection.model, &self.config)?;
        Ok(ModelInstance::new(
            bundle,
            selection.platform,
            self.credentials.clone(),
        ))
    }

    pub async fn invoke(
        &self,
        request: &InvocationRequest,
    ) -> Result<ExecutionResult, GenerationError> {
        self.invoke_with_cancel(request, CancellationToken::new())
            .await
    }

    pub async fn invoke_with_cancel(
        &self,
        request: &InvocationRequest,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, GenerationError> {
        let instance = self.instantiate(request.platform, &request.model, request.mode)?;
        let ctx = InvocationContext::new(cancel).with_events(self.events.clone());
        execute(
            &instance,
            self.transport.as_ref(),
            request.mode,
            &request.params,
            &ctx,
            &self.config,
        )
        .await
    }

    /// Runs `items` one after another in input order.
    ///
    /// Under `Continue` a failed item is reported in place and the batch
    /// goes on; under `Abort` the first error is returned. Cancellation
    /// always ends the batch.
    pub async fn invoke_batch(
        &self,
        items: Vec<InvocationRequest>,
        on_error: BatchErrorPolicy,
        cancel: CancellationToken,
    ) -> Result<Vec<BatchOutcome>, GenerationError> {
        let total = items.len();
        let mut outcomes = Vec::with_capacity(total);
        for (index, item) in items.into_iter().enumerate() {
            match self.invoke_with_cancel(&item, cancel.clone()).await {
                Ok(result) => outcomes.push(BatchOutcome::Completed(result)),
                Err(error @ GenerationError::Canceled { .. }) => return Err(error),
                Err(error) if on_error == BatchErrorPolicy::Abort => {
                    warn!(item = index, total, kind = %error.kind(), "batch aborted");
                    return Err(error);
                }
                Err(error) => {
                    warn!(item = index, total, kind = %error.kind(), "batch item failed");
                    outcomes.push(BatchOutcome::Failed { input: item, error });
                }
            }
        }
        let failed = outcomes.iter().filter(|outcome| outcome.is_failed()).count();
        info!(total, failed, "batch finished");
        Ok(outcomes)
    }
}
