use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::sandbox::document::SandboxDocument;

/// Capability flags indicating what the backend supports
#[derive(Debug, Clone, Default)]
pub struct BackendCapabilities {
    /// Accepts control messages (cancellation) while a document runs
    pub control_channel: bool,
    /// Every document runs in its own operating system process
    pub process_per_document: bool,
    /// Streams console lines before the execution completes
    pub live_console: bool,
}

/// Information about the running sandbox instance
#[derive(Debug, Clone)]
pub struct SandboxInfo {
    /// Backend type identifier
    pub backend_type: String,
    /// Instance identifier (process ID, etc.)
    pub instance_id: Option<String>,
    /// Whether a document is currently loaded
    pub running: bool,
    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Something the loaded document did.
#[derive(Debug, Clone, PartialEq)]
pub enum SandboxEvent {
    /// One line the document wrote to its message channel
    Line(String),
    /// The document is gone. Always the last event of a channel.
    Exited {
        status: Option<i32>,
        stderr: String,
    },
}

/// Connection to one loaded document.
pub struct SandboxChannel {
    pub events: mpsc::UnboundedReceiver<SandboxEvent>,
    /// Lines delivered to the document's control input
    pub control: mpsc::UnboundedSender<String>,
}

/// Trait for sandbox isolation backends.
///
/// A backend runs one document at a time. Loading a document discards
/// whatever ran before, so no state carries over between executions.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    /// Returns the backend name (e.g., "node")
    fn name(&self) -> &str;

    /// Returns the capabilities of this backend
    fn capabilities(&self) -> BackendCapabilities;

    /// Tear down the current document, if any, and start `document`.
    async fn load(&self, document: &SandboxDocument) -> Result<SandboxChannel>;

    /// Tear down the current document, if any.
    async fn unload(&self) -> Result<()>;

    /// Get information about the sandbox instance
    fn info(&self) -> SandboxInfo;

    /// Gracefully shutdown the sandbox.
    /// Default implementation unloads the current document.
    async fn shutdown(&self) -> Result<()> {
        self.unload().await
    }
}
