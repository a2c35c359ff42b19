//! Type conversion between wire format and node graphs.
//!
//! Test content describes linked lists, trees and next-pointer graphs as
//! plain JSON arrays. Inputs are turned into JavaScript expressions that
//! build real node objects inside the sandbox; return values come back as
//! harness snapshots and are walked back into the same wire format.

mod graph;
pub mod snapshot;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use graph::{GraphNode, NodeGraph, NodeId};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    #[error("Expected an array for {tag}, found {found}")]
    ExpectedArray { tag: String, found: String },

    #[error("Expected a flat array for {tag}, found a nested value at index {index}")]
    NestedArray { tag: String, index: usize },

    #[error("Invalid {tag} input: {detail}")]
    InvalidInput { tag: String, detail: String },

    #[error("Cycle detected while converting {tag} back to wire format")]
    Cycle { tag: String },

    #[error("Unexpected value for {tag}: {detail}")]
    UnexpectedShape { tag: String, detail: String },

    #[error("Snapshot references unknown object #{0}")]
    DanglingReference(u64),
}

/// The node shape a type tag refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    List,
    Tree,
    Graph,
}

impl NodeKind {
    /// Tag name as written in function signatures.
    pub fn tag_name(self) -> &'static str {
        match self {
            NodeKind::List => "ListNode",
            NodeKind::Tree => "TreeNode",
            NodeKind::Graph => "graphNode",
        }
    }

    /// Constructor defined by the harness.
    pub fn class_name(self) -> &'static str {
        match self {
            NodeKind::List => "ListNode",
            NodeKind::Tree => "TreeNode",
            NodeKind::Graph => "Node",
        }
    }
}

/// Declared type of one parameter or return value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TypeTag {
    Node(NodeKind),
    NodeArray(NodeKind),
    /// Anything else is passed through as JSON.
    Plain(String),
}

impl Default for TypeTag {
    fn default() -> Self {
        TypeTag::Plain("any".to_string())
    }
}

impl From<&str> for TypeTag {
    fn from(s: &str) -> Self {
        let s = s.trim();
        let (base, is_array) = match s.strip_suffix("[]") {
            Some(base) => (base.trim(), true),
            None => (s, false),
        };
        let kind = match base {
            "ListNode" => Some(NodeKind::List),
            "TreeNode" => Some(NodeKind::Tree),
            "graphNode" | "GraphNode" | "Node" => Some(NodeKind::Graph),
            _ => None,
        };
        match (kind, is_array) {
            (Some(kind), false) => TypeTag::Node(kind),
            (Some(kind), true) => TypeTag::NodeArray(kind),
            (None, _) => TypeTag::Plain(s.to_string()),
        }
    }
}

impl From<String> for TypeTag {
    fn from(s: String) -> Self {
        TypeTag::from(s.as_str())
    }
}

impl From<TypeTag> for String {
    fn from(tag: TypeTag) -> Self {
        tag.to_string()
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Node(kind) => write!(f, "{}", kind.tag_name()),
            TypeTag::NodeArray(kind) => write!(f, "{}[]", kind.tag_name()),
            TypeTag::Plain(name) => write!(f, "{}", name),
        }
    }
}

pub(crate) fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "a boolean".to_string(),
        Value::Number(n) => format!("the number {}", n),
        Value::String(s) => format!("the string {:?}", s),
        Value::Array(_) => "an array".to_string(),
        Value::Object(_) => "an object".to_string(),
    }
}

/// JavaScript expression producing the argument value for `tag`.
pub fn to_js_argument(tag: &TypeTag, wire: &Value) -> Result<String, ConversionError> {
    match tag {
        TypeTag::Plain(_) => Ok(js_literal(wire)),
        TypeTag::Node(kind) => {
            let (graph, root) = NodeGraph::from_wire(*kind, wire)?;
            Ok(graph.to_js(*kind, root))
        }
        TypeTag::NodeArray(kind) => {
            let items = match wire {
                Value::Array(items) => items,
                other => {
                    return Err(ConversionError::ExpectedArray {
                        tag: tag.to_string(),
                        found: describe(other),
                    })
                }
            };
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                if !matches!(item, Value::Array(_) | Value::Null) {
                    return Err(ConversionError::ExpectedArray {
                        tag: kind.tag_name().to_string(),
                        found: describe(item),
                    });
                }
                let (graph, root) = NodeGraph::from_wire(*kind, item)?;
                parts.push(graph.to_js(*kind, root));
            }
            Ok(format!("[{}]", parts.join(", ")))
        }
    }
}

/// Wire-format value for a harness snapshot of a value declared as `tag`.
pub fn from_snapshot(tag: &TypeTag, snapshot_value: &Value) -> Result<Value, ConversionError> {
    match tag {
        TypeTag::Plain(_) => Ok(snapshot::to_plain(snapshot_value)),
        TypeTag::Node(kind) => {
            let (graph, roots) = snapshot::decode_graph(*kind, &[snapshot_value])?;
            graph.to_wire(*kind, roots.first().copied().flatten())
        }
        TypeTag::NodeArray(kind) => {
            if snapshot::is_nullish(snapshot_value) {
                return Ok(Value::Null);
            }
            let items = snapshot::array_items(snapshot_value).ok_or_else(|| {
                ConversionError::ExpectedArray {
                    tag: tag.to_string(),
                    found: describe(snapshot_value),
                }
            })?;
            let refs: Vec<&Value> = items.iter().collect();
            let (graph, roots) = snapshot::decode_graph(*kind, &refs)?;
            roots
                .into_iter()
                .map(|root| graph.to_wire(*kind, root))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
    }
}

/// JSON text is a valid JavaScript expression; line separators are escaped
/// for engines that predate JSON superset support.
pub fn js_literal(value: &Value) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| "null".to_string())
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}
