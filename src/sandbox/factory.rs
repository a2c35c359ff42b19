use std::sync::Arc;

use crate::config::types::{BackendType, SandboxConfig};
use crate::error::{JudgeletError, Result};
use crate::sandbox::backends::NodeBackend;
use crate::sandbox::traits::SandboxBackend;

/// Create a sandbox backend based on the configuration.
///
/// This factory function selects and instantiates the appropriate backend
/// based on the configured backend type and platform availability.
pub fn create_backend(config: &SandboxConfig) -> Result<Arc<dyn SandboxBackend>> {
    let backend_type = resolve_backend_type(&config.backend, config)?;

    match backend_type {
        BackendType::Node => {
            let backend = NodeBackend::new(&config.node)?;
            Ok(Arc::new(backend))
        }
        BackendType::Auto => Err(JudgeletError::BackendNotAvailable {
            backend: "auto".to_string(),
            reason: "No sandbox backends available".to_string(),
        }),
    }
}

/// Resolve the backend type, handling Auto selection.
fn resolve_backend_type(requested: &BackendType, config: &SandboxConfig) -> Result<BackendType> {
    let node_available = which::which(&config.node.binary).is_ok();
    match requested {
        BackendType::Auto => {
            if node_available {
                return Ok(BackendType::Node);
            }
            Err(JudgeletError::BackendNotAvailable {
                backend: "auto".to_string(),
                reason: "No sandbox backends available. Install Node.js or set sandbox.node.binary"
                    .to_string(),
            })
        }
        BackendType::Node => {
            if !node_available {
                return Err(JudgeletError::BackendNotAvailable {
                    backend: "node".to_string(),
                    reason: format!(
                        "'{}' was not found. Install Node.js or set sandbox.node.binary",
                        config.node.binary.display()
                    ),
                });
            }
            Ok(BackendType::Node)
        }
    }
}

/// Get information about available backends on this system.
pub fn available_backends() -> Vec<BackendInfo> {
    let node = NodeBackend::is_available();
    vec![BackendInfo {
        name: "node",
        available: node,
        description: "Fresh Node.js process per execution",
        unavailable_reason: if node {
            None
        } else {
            Some("node not found on PATH")
        },
    }]
}

/// Information about a sandbox backend.
pub struct BackendInfo {
    pub name: &'static str,
    pub available: bool,
    pub description: &'static str,
    pub unavailable_reason: Option<&'static str>,
}
