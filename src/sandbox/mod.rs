mod backends;
mod controller;
pub mod document;
mod factory;
pub mod protocol;
mod traits;
mod types;

pub use backends::NodeBackend;
pub use controller::{ControllerOptions, ExecutionController};
pub use document::{HarnessConfig, SandboxDocument};
pub use factory::{available_backends, create_backend, BackendInfo};
pub use protocol::{ConsoleLine, CorrelationId};
pub use traits::{BackendCapabilities, SandboxBackend, SandboxChannel, SandboxEvent, SandboxInfo};
pub use types::{ErrorKind, ExecutionResult, FunctionCall, TrackedData};
