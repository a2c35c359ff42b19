//! Newline-delimited JSON messages between host and sandbox.
//!
//! The sandbox writes one [`Envelope`] per stdout line; the host writes one
//! [`HostMessage`] per stdin line.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{JudgeletError, Result};
use crate::sandbox::types::{ErrorKind, ExecutionResult, TrackedData};

/// Origin reported by sandboxed documents.
pub const OPAQUE_ORIGIN: &str = "null";

/// Pairs one request with its one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub origin: String,
    #[serde(rename = "targetOrigin")]
    pub target_origin: String,
    pub data: SandboxMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SandboxMessage {
    ExecutionComplete(Completion),
    Console(ConsoleLine),
}

impl SandboxMessage {
    pub fn correlation_id(&self) -> CorrelationId {
        match self {
            SandboxMessage::ExecutionComplete(c) => c.correlation_id,
            SandboxMessage::Console(c) => c.correlation_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub correlation_id: CorrelationId,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_kind: Option<ErrorKind>,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub tracked: Option<TrackedData>,
}

impl Completion {
    pub fn into_result(self) -> ExecutionResult {
        ExecutionResult {
            success: self.success,
            error: self.error,
            error_kind: self.error_kind,
            logs: self.logs,
            result: if self.cancelled { None } else { self.result },
            tracked: self.tracked,
            cancelled: self.cancelled,
        }
    }
}

/// A console call streamed while the program runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleLine {
    pub correlation_id: CorrelationId,
    pub level: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HostMessage {
    #[serde(rename_all = "camelCase")]
    CancelExecution { correlation_id: CorrelationId },
}

impl HostMessage {
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Parses one sandbox line. Snapshots of long linked lists nest one level
/// per node, so the recursion limit is lifted and the stack grows on demand.
pub fn parse_line(line: &str) -> Result<Envelope> {
    let malformed = |e: serde_json::Error| {
        JudgeletError::Protocol(format!("Malformed sandbox message: {}", e))
    };
    let mut de = serde_json::Deserializer::from_str(line);
    de.disable_recursion_limit();
    let envelope = Envelope::deserialize(serde_stacker::Deserializer::new(&mut de))
        .map_err(malformed)?;
    de.end().map_err(malformed)?;
    Ok(envelope)
}

/// Which envelopes the host accepts.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    host_origin: String,
}

impl OriginPolicy {
    pub fn new(host_origin: impl Into<String>) -> Self {
        Self {
            host_origin: host_origin.into(),
        }
    }

    pub fn host_origin(&self) -> &str {
        &self.host_origin
    }

    /// Sender must be the host itself or an opaque origin, and the message
    /// must be addressed to the host.
    pub fn accepts(&self, envelope: &Envelope) -> bool {
        let from_trusted = envelope.origin == self.host_origin || envelope.origin == OPAQUE_ORIGIN;
        from_trusted && envelope.target_origin == self.host_origin
    }
}
