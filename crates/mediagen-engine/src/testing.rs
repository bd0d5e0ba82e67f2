use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mediagen_contracts::{ModelRegistry, PlatformId, PlatformRegistry};
use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::config::EngineConfig;
use crate::credentials::{CredentialProvider, StaticCredentialProvider};
use crate::execution::ModelInstance;
use crate::platforms::PlatformModel;
use crate::transport::{HttpCall, HttpReply, HttpTransport, TransportFailure};

type Scripted = Result<HttpReply, TransportFailure>;

/// Replays canned replies in order and records every call it receives.
/// Running past the end of the script yields a transport failure, or a
/// call that never completes when built with `hanging_after`.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<(HttpCall, Instant)>>,
    hang_when_exhausted: bool,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Scripted>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
            hang_when_exhausted: false,
        }
    }

    pub fn hanging_after(replies: Vec<Scripted>) -> Self {
        Self {
            hang_when_exhausted: true,
            ..Self::new(replies)
        }
    }

    pub fn json(status: u16, body: Value) -> Scripted {
        Ok(HttpReply {
            status,
            body: body.to_string(),
        })
    }

    pub fn unreachable(message: &str) -> Scripted {
        Err(TransportFailure::new(message))
    }

    pub fn calls(&self) -> Vec<HttpCall> {
        self.calls
            .lock()
            .map(|calls| calls.iter().map(|(call, _)| call.clone()).collect())
            .unwrap_or_default()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls
            .lock()
            .map(|calls| calls.iter().map(|(_, at)| *at).collect())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or_default()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn perform(&self, call: &HttpCall) -> Result<HttpReply, TransportFailure> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((call.clone(), Instant::now()));
        }
        let next = self
            .replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.pop_front());
        match next {
            Some(reply) => reply,
            None if self.hang_when_exhausted => std::future::pending().await,
            None => Err(TransportFailure::new("script exhausted")),
        }
    }
}

pub struct CountingCredentials {
    inner: StaticCredentialProvider,
    fetches: AtomicUsize,
}

impl CountingCredentials {
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for CountingCredentials {
    async fn get_credentials(&self, platform: PlatformId) -> Option<Value> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.get_credentials(platform).await
    }
}

pub fn instance(platform: PlatformId, model: &str, bag: Value) -> ModelInstance {
    counted_instance(platform, model, bag).0
}

pub fn counted_instance(
    platform: PlatformId,
    model: &str,
    bag: Value,
) -> (ModelInstance, Arc<CountingCredentials>) {
    configured_instance(platform, model, bag, &EngineConfig::default())
}

pub fn configured_instance(
    platform: PlatformId,
    model: &str,
    bag: Value,
    engine: &EngineConfig,
) -> (ModelInstance, Arc<CountingCredentials>) {
    let registry = PlatformRegistry::default();
    let spec = registry.get(platform).expect("platform registered");
    let config = ModelRegistry::for_platform(platform)
        .get(model)
        .cloned()
        .expect("model registered");
    let bundle = PlatformModel::resolve(platform, config, engine)
        .expect("bundle resolves");
    let provider = Arc::new(CountingCredentials {
        inner: StaticCredentialProvider::new().with(platform, bag),
        fetches: AtomicUsize::new(0),
    });
    (ModelInstance::new(bundle, spec, provider.clone()), provider)
}

pub fn params(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
