use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::GenerationError;
use crate::models::ModelRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformId {
    Fal,
    Genbo,
    Replicate,
}

impl PlatformId {
    pub const ALL: [PlatformId; 3] = [PlatformId::Fal, PlatformId::Genbo, PlatformId::Replicate];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fal => "fal",
            Self::Genbo => "genbo",
            Self::Replicate => "replicate",
        }
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformId {
    type Err = GenerationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        PlatformId::ALL
            .into_iter()
            .find(|platform| platform.as_str() == normalized)
            .ok_or_else(|| GenerationError::UnknownPlatform(raw.trim().to_string()))
    }
}

/// How the platform expects the secret in the `Authorization` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    Bearer,
    Key,
}

impl AuthScheme {
    pub fn header_value(&self, secret: &str) -> String {
        match self {
            Self::Bearer => format!("Bearer {secret}"),
            Self::Key => format!("Key {secret}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRequirement {
    pub secret_field: &'static str,
    pub env_vars: &'static [&'static str],
}

#[derive(Debug, Clone)]
pub struct PlatformSpec {
    pub id: PlatformId,
    pub display_name: &'static str,
    pub auth: AuthScheme,
    pub credential: CredentialRequirement,
    pub models: ModelRegistry,
}

#[derive(Debug, Clone)]
pub struct PlatformRegistry {
    platforms: Vec<PlatformSpec>,
}

impl Default for PlatformRegistry {
    fn default() -> Self {
        Self::new(default_platforms())
    }
}

impl PlatformRegistry {
    pub fn new(platforms: Vec<PlatformSpec>) -> Self {
        Self { platforms }
    }

    pub fn get(&self, id: PlatformId) -> Option<&PlatformSpec> {
        self.platforms.iter().find(|platform| platform.id == id)
    }

    pub fn resolve(&self, raw: &str) -> Result<&PlatformSpec, GenerationError> {
        let id = raw.parse::<PlatformId>()?;
        self.get(id)
            .ok_or_else(|| GenerationError::UnknownPlatform(raw.trim().to_string()))
    }

    pub fn list(&self) -> Vec<String> {
        let mut names = self
            .platforms
            .iter()
            .map(|platform| platform.id.to_string())
            .collect::<Vec<String>>();
        names.sort();
        names
    }

    pub fn platforms(&self) -> &[PlatformSpec] {
        self.platforms.as_slice()
    }
}

fn default_platforms() -> Vec<PlatformSpec> {
    vec![
        PlatformSpec {
            id: PlatformId::Replicate,
            display_name: "Replicate",
            auth: AuthScheme::Bearer,
            credential: CredentialRequirement {
                secret_field: "api_key",
                env_vars: &["REPLICATE_API_TOKEN", "REPLICATE_API_KEY"],
            },
            models: ModelRegistry::for_platform(PlatformId::Replicate),
        },
        PlatformSpec {
            id: PlatformId::Fal,
            display_name: "fal.ai",
            auth: AuthScheme::Key,
            credential: CredentialRequirement {
                secret_field: "api_key",
                env_vars: &["FAL_KEY", "FAL_API_KEY"],
            },
            models: ModelRegistry::for_platform(PlatformId::Fal),
        },
        PlatformSpec {
            id: PlatformId::Genbo,
            display_name: "Genbo",
            auth: AuthScheme::Bearer,
            credential: CredentialRequirement {
                secret_field: "api_key",
                env_vars: &["GENBO_API_KEY", "GENBO_API_TOKEN"],
            },
            models: ModelRegistry::for_platform(PlatformId::Genbo),
        },
    ]
}
