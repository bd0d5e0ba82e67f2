use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::GenerationError;
use crate::platforms::PlatformId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceMode {
    Sync,
    #[default]
    Async,
}

impl InterfaceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Async => "async",
        }
    }
}

impl fmt::Display for InterfaceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterfaceMode {
    type Err = GenerationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sync" | "synchronous" => Ok(Self::Sync),
            "async" | "asynchronous" => Ok(Self::Async),
            other => Err(GenerationError::validation(format!(
                "interface mode must be 'sync' or 'async', got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelConfig {
    pub name: String,
    pub display_name: String,
    pub endpoint: String,
    pub supports_sync: bool,
    pub supports_async: bool,
    pub media: MediaKind,
}

impl ModelConfig {
    pub fn supports(&self, mode: InterfaceMode) -> bool {
        match mode {
            InterfaceMode::Sync => self.supports_sync,
            InterfaceMode::Async => self.supports_async,
        }
    }

    pub fn modes(&self) -> Vec<InterfaceMode> {
        [InterfaceMode::Sync, InterfaceMode::Async]
            .into_iter()
            .filter(|mode| self.supports(*mode))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelConfig>,
}

impl ModelRegistry {
    pub fn new(models: IndexMap<String, ModelConfig>) -> Self {
        Self { models }
    }

    pub fn for_platform(platform: PlatformId) -> Self {
        Self::new(default_models(platform))
    }

    pub fn get(&self, name: &str) -> Option<&ModelConfig> {
        self.models.get(name.trim())
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelConfig> {
        self.models.values()
    }
}

fn default_models(platform: PlatformId) -> IndexMap<String, ModelConfig> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str,
                      display_name: &str,
                      endpoint: &str,
                      supports_sync: bool,
                      supports_async: bool,
                      media: MediaKind| {
        map.insert(
            name.to_string(),
            ModelConfig {
                name: name.to_string(),
                display_name: display_name.to_string(),
                endpoint: endpoint.to_string(),
                supports_sync,
                supports_async,
                media,
            },
        );
    };

    match platform {
        PlatformId::Replicate => {
            insert(
                "flux-schnell",
                "FLUX.1 [schnell]",
                "models/black-forest-labs/flux-schnell/predictions",
                true,
                true,
                MediaKind::Image,
            );
            insert(
                "sdxl",
                "Stable Diffusion XL",
                "models/stability-ai/sdxl/predictions",
                true,
                true,
                MediaKind::Image,
            );
            insert(
                "kling-video",
                "Kling v1.6 Standard",
                "models/kwaivgi/kling-v1.6-standard/predictions",
                false,
                true,
                MediaKind::Video,
            );
        }
        PlatformId::Fal => {
            insert(
                "flux-dev",
                "FLUX.1 [dev]",
                "fal-ai/flux/dev",
                true,
                true,
                MediaKind::Image,
            );
            insert(
                "fast-sdxl",
                "Fast SDXL",
                "fal-ai/fast-sdxl",
                true,
                true,
                MediaKind::Image,
            );
            insert(
                "kling-video",
                "Kling v1.6 Image to Video",
                "fal-ai/kling-video/v1.6/standard/image-to-video",
                false,
                true,
                MediaKind::Video,
            );
        }
        PlatformId::Genbo => {
            insert(
                "genbo-image",
                "Genbo Image",
                "images/generations",
                true,
                true,
                MediaKind::Image,
            );
            insert(
                "genbo-video",
                "Genbo Video",
                "videos/generations",
                false,
                true,
                MediaKind::Video,
            );
        }
    }

    map
}
