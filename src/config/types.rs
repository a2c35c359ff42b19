use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeletConfig {
    pub sandbox: SandboxConfig,
    pub execution: ExecutionConfig,
}

/// The type of sandbox backend to use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// A fresh Node.js process per execution
    Node,
    /// Automatically select the best available backend
    #[default]
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Which backend to use
    pub backend: BackendType,
    /// Origin the host identifies as; sandbox messages must be addressed to it
    pub host_origin: String,
    /// Node-specific configuration
    pub node: NodeConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            host_origin: "judgelet://host".to_string(),
            node: NodeConfig::default(),
        }
    }
}

/// Node-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Path or name of the runtime binary (looked up on PATH)
    pub binary: PathBuf,
    /// Extra arguments passed before the document path
    pub args: Vec<String>,
    /// How much stderr to keep for crash reports
    pub max_stderr_bytes: usize,
    /// Run under the runtime's permission model: the document file is the
    /// only readable path, and writes and child processes are denied
    pub permissions: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("node"),
            args: vec!["--disallow-code-generation-from-strings".to_string()],
            max_stderr_bytes: 16 * 1024,
            permissions: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Timeout for plain runs in milliseconds
    pub run_timeout_ms: u64,
    /// Timeout for test-suite runs in milliseconds
    pub test_timeout_ms: u64,
    /// How long to wait for flushed output after a cancel request
    pub grace_period_ms: u64,
    /// Minimum spacing between macrotask yields inside loops
    pub yield_interval_ms: u64,
    /// Console lines kept per execution
    pub max_log_entries: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            run_timeout_ms: 5000,
            test_timeout_ms: 10000,
            grace_period_ms: 200,
            yield_interval_ms: 10,
            max_log_entries: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: JudgeletConfig = toml::from_str(
            r#"
            [sandbox]
            backend = "node"

            [execution]
            grace_period_ms = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.sandbox.backend, BackendType::Node);
        assert_eq!(config.sandbox.node.binary, PathBuf::from("node"));
        assert_eq!(config.execution.grace_period_ms, 50);
        assert_eq!(config.execution.run_timeout_ms, 5000);
    }

    #[test]
    fn test_default_round_trips_through_toml() {
        let text = toml::to_string_pretty(&JudgeletConfig::default()).unwrap();
        let parsed: JudgeletConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.execution.max_log_entries, 1000);
        assert_eq!(parsed.sandbox.host_origin, "judgelet://host");
    }
}
