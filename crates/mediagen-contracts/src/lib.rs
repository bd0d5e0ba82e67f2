pub mod credentials;
pub mod errors;
pub mod events;
pub mod models;
pub mod platforms;
pub mod request;
pub mod result;

pub use credentials::{validate_credentials, Credentials};
pub use errors::{ErrorKind, GenerationError, RequestDiagnostics};
pub use events::{EventLog, EventPayload};
pub use models::{InterfaceMode, MediaKind, ModelConfig, ModelRegistry, ModelSelection, ModelSelector};
pub use platforms::{AuthScheme, CredentialRequirement, PlatformId, PlatformRegistry, PlatformSpec};
pub use request::{HttpMethod, RequestDescriptor};
pub use result::{collect_output_urls, ExecutionResult, JobStatus};
