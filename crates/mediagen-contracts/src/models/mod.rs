mod registry;
mod selectors;

pub use registry::{InterfaceMode, MediaKind, ModelConfig, ModelRegistry};
pub use selectors::{ModelSelection, ModelSelector};
