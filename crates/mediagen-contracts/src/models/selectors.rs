use crate::errors::GenerationError;
use crate::platforms::{PlatformId, PlatformRegistry, PlatformSpec};

use super::registry::{InterfaceMode, ModelConfig};

#[derive(Debug, Clone)]
pub struct ModelSelection<'a> {
    pub platform: &'a PlatformSpec,
    pub model: ModelConfig,
    pub mode: InterfaceMode,
}

/// Resolves `(platform, model, mode)` against the registries, enforcing the
/// capability flags before anything touches credentials or the network.
#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    pub registry: PlatformRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<PlatformRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_default(),
        }
    }

    pub fn select(
        &self,
        platform: PlatformId,
        model: &str,
        mode: InterfaceMode,
    ) -> Result<ModelSelection<'_>, GenerationError> {
        let spec = self
            .registry
            .get(platform)
            .ok_or_else(|| GenerationError::UnknownPlatform(platform.to_string()))?;
        let Some(config) = spec.models.get(model) else {
            return Err(GenerationError::UnknownModel {
                platform,
                model: model.trim().to_string(),
            });
        };
        if !config.supports(mode) {
            return Err(GenerationError::UnsupportedOperation {
                platform,
                model: config.name.clone(),
                mode,
            });
        }
        Ok(ModelSelection {
            platform: spec,
            model: config.clone(),
            mode,
        })
    }
}
