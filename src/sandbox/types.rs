use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::instrument::TransformError;

/// Why an execution did not succeed cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Rejected before launch
    Syntax,
    /// Uncaught exception in the program
    Runtime,
    /// Cancelled after the timeout
    Timeout,
    /// Non-fatal restriction of the sandbox, such as storage access
    Environment,
    /// The runtime process failed or broke the protocol
    Sandbox,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Observations recorded by the instrumentation during one execution.
/// Values are harness snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackedData {
    /// Latest value per variable
    pub variables: BTreeMap<String, Value>,
    /// Every recorded value per variable, first assignment first
    pub variable_trace: BTreeMap<String, Vec<Value>>,
    /// Serialized top-level functions
    pub functions: BTreeMap<String, Value>,
    pub function_calls: Vec<FunctionCall>,
}

impl TrackedData {
    /// Value recorded at the first assignment of `name`.
    pub fn first_value(&self, name: &str) -> Option<&Value> {
        self.variable_trace.get(name).and_then(|trace| trace.first())
    }

    pub fn calls_to<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a FunctionCall> + 'a {
        self.function_calls.iter().filter(move |call| call.name == name)
    }
}

/// Outcome of one execution. A cancelled result never carries `result`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracked: Option<TrackedData>,
    #[serde(default)]
    pub cancelled: bool,
}

impl ExecutionResult {
    pub fn syntax_error(err: &TransformError) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
            error_kind: Some(ErrorKind::Syntax),
            ..Default::default()
        }
    }

    pub fn timed_out(timeout_ms: u64, logs: Vec<String>, tracked: Option<TrackedData>) -> Self {
        Self {
            success: false,
            error: Some(format!("Execution timed out after {}ms", timeout_ms)),
            error_kind: Some(ErrorKind::Timeout),
            logs,
            result: None,
            tracked,
            cancelled: true,
        }
    }

    pub fn sandbox_failure(message: impl Into<String>, logs: Vec<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            error_kind: Some(ErrorKind::Sandbox),
            logs,
            ..Default::default()
        }
    }
}
