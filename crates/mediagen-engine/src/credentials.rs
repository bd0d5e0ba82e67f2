use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use async_trait::async_trait;
use mediagen_contracts::{
    validate_credentials, CredentialRequirement, Credentials, GenerationError, PlatformId,
    PlatformRegistry,
};
use serde_json::{json, Value};
use tokio::sync::OnceCell;

/// External source of per-platform credential bags.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_credentials(&self, platform: PlatformId) -> Option<Value>;
}

/// Reads each platform's API key from the environment variables its
/// registry entry names, first non-empty one wins.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialProvider {
    env_vars: HashMap<PlatformId, &'static [&'static str]>,
}

impl EnvCredentialProvider {
    pub fn from_registry(registry: &PlatformRegistry) -> Self {
        Self {
            env_vars: registry
                .platforms()
                .iter()
                .map(|platform| (platform.id, platform.credential.env_vars))
                .collect(),
        }
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn get_credentials(&self, platform: PlatformId) -> Option<Value> {
        self.env_vars
            .get(&platform)?
            .iter()
            .find_map(|key| non_empty_env(key))
            .map(|secret| json!({ "api_key": secret }))
    }
}

/// Fixed in-memory bags, keyed by platform.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialProvider {
    bags: HashMap<PlatformId, Value>,
}

impl StaticCredentialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, platform: PlatformId, bag: Value) -> Self {
        self.bags.insert(platform, bag);
        self
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn get_credentials(&self, platform: PlatformId) -> Option<Value> {
        self.bags.get(&platform).cloned()
    }
}

/// Per-instance memo: the provider is consulted at most once, and only a
/// bag that passes validation is cached.
pub struct CredentialCache {
    platform: PlatformId,
    requirement: CredentialRequirement,
    provider: Arc<dyn CredentialProvider>,
    cell: OnceCell<Credentials>,
}

impl CredentialCache {
    pub fn new(
        platform: PlatformId,
        requirement: CredentialRequirement,
        provider: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            platform,
            requirement,
            provider,
            cell: OnceCell::new(),
        }
    }

    pub async fn ensure(&self) -> Result<&Credentials, GenerationError> {
        self.cell
            .get_or_try_init(|| async {
                let raw = self.provider.get_credentials(self.platform).await;
                validate_credentials(self.platform, &self.requirement, raw.as_ref())
            })
            .await
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
