//! Self-contained sandbox documents.

use serde::Serialize;

use crate::convert::js_literal;
use crate::sandbox::protocol::CorrelationId;

/// The runtime harness, spliced at the top of every document.
pub const HARNESS_SOURCE: &str = include_str!("../../assets/harness.js");

/// Settings the harness reads at startup.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HarnessConfig {
    pub correlation_id: CorrelationId,
    pub host_origin: String,
    pub timeout_ms: u64,
    pub yield_interval_ms: u64,
    pub max_log_entries: usize,
    pub function_names: Vec<String>,
}

/// A complete program for one execution.
#[derive(Debug, Clone)]
pub struct SandboxDocument {
    pub correlation_id: CorrelationId,
    pub source: String,
}

impl SandboxDocument {
    /// Wraps `program`, which must declare `__program` and may declare
    /// `__cases`. The program body sees `require`, `module`, `exports` and
    /// `process` as undefined.
    pub fn build(config: &HarnessConfig, program: &str) -> Self {
        let config_literal = serde_json::to_value(config)
            .map(|v| js_literal(&v))
            .unwrap_or_else(|_| "{}".to_string());

        let mut source = String::with_capacity(HARNESS_SOURCE.len() + program.len() + 256);
        source.push_str(HARNESS_SOURCE);
        source.push_str("\n;(function (require, module, exports, __filename, __dirname, process) {\n");
        source.push_str(program);
        source.push_str("\n__harness.start(__program, ");
        source.push_str(&config_literal);
        source.push_str(", typeof __cases === \"undefined\" ? null : __cases);\n})();\n");

        Self {
            correlation_id: config.correlation_id,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HarnessConfig {
        HarnessConfig {
            correlation_id: CorrelationId::new(),
            host_origin: "judgelet://host".to_string(),
            timeout_ms: 5000,
            yield_interval_ms: 10,
            max_log_entries: 1000,
            function_names: vec!["solve".to_string()],
        }
    }

    #[test]
    fn test_document_layout() {
        let config = config();
        let doc = SandboxDocument::build(&config, "async function __program(__expose) {}");
        assert!(doc.source.starts_with(HARNESS_SOURCE));
        assert!(doc.source.contains("async function __program(__expose) {}"));
        assert!(doc.source.contains(&format!("\"correlationId\":\"{}\"", config.correlation_id)));
        assert!(doc.source.contains("\"functionNames\":[\"solve\"]"));
        assert!(doc.source.trim_end().ends_with("})();"));
        assert_eq!(doc.correlation_id, config.correlation_id);
    }

    #[test]
    fn test_harness_defines_entry_points() {
        for name in ["__trackVariable", "__trackCall", "__trackMutation", "__shouldCancel", "__yield"] {
            assert!(HARNESS_SOURCE.contains(name), "harness is missing {}", name);
        }
        assert!(HARNESS_SOURCE.contains("__harness"));
    }
}
