//! Decoding of harness value snapshots.
//!
//! The harness encodes values that JSON cannot carry with `$`-prefixed
//! marker objects: `{"$undefined": true}`, `{"$number": "NaN"}`,
//! `{"$function": name, "source": ...}` and so on. Objects reachable more
//! than once carry an `$id` on their first occurrence and are replaced by
//! `{"$ref": id}` afterwards; arrays that need an id are wrapped as
//! `{"$id": id, "$array": [...]}`.

use std::collections::HashMap;

use serde_json::{Map, Value};

use super::graph::{NodeGraph, NodeId};
use super::{describe, ConversionError, NodeKind};

pub fn is_nullish(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.contains_key("$undefined"),
        _ => false,
    }
}

fn ref_id(value: &Value) -> Option<u64> {
    value.as_object()?.get("$ref")?.as_u64()
}

/// Elements of an encoded array, looking through the `$array` wrapper.
pub fn array_items(value: &Value) -> Option<&Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(map) => map.get("$array")?.as_array(),
        _ => None,
    }
}

/// Converts a snapshot into plain JSON for display and comparison.
///
/// `undefined` becomes `null`, non-finite numbers become their names as
/// strings, functions become `"[Function: name]"` and back references
/// become `"[Circular]"`.
pub fn to_plain(value: &Value) -> Value {
    // Plain objects nest one level per linked node
    stacker::maybe_grow(64 * 1024, 1024 * 1024, || match value {
        Value::Array(items) => Value::Array(items.iter().map(to_plain).collect()),
        Value::Object(map) => plain_object(map),
        other => other.clone(),
    })
}

fn plain_object(map: &Map<String, Value>) -> Value {
    if map.contains_key("$undefined") {
        return Value::Null;
    }
    if let Some(n) = map.get("$number") {
        return n.clone();
    }
    if let Some(digits) = map.get("$bigint").and_then(Value::as_str) {
        return digits
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(digits.to_string()));
    }
    if let Some(name) = map.get("$function") {
        let name = name.as_str().unwrap_or_default();
        return Value::String(if name.is_empty() {
            "[Function (anonymous)]".to_string()
        } else {
            format!("[Function: {}]", name)
        });
    }
    if let Some(description) = map.get("$symbol") {
        return Value::String(format!("Symbol({})", description.as_str().unwrap_or_default()));
    }
    if map.contains_key("$ref") {
        return Value::String("[Circular]".to_string());
    }
    if let Some(items) = map.get("$array") {
        return to_plain(items);
    }
    if let Some(items) = map.get("$set") {
        return to_plain(items);
    }
    if let Some(entries) = map.get("$map") {
        return to_plain(entries);
    }
    if let Some(date) = map.get("$date") {
        return date.clone();
    }

    let mut out = Map::new();
    for (key, v) in map {
        if key == "$id" || key == "$class" {
            continue;
        }
        out.insert(key.clone(), to_plain(v));
    }
    Value::Object(out)
}

fn child_fields(kind: NodeKind) -> &'static [&'static str] {
    match kind {
        NodeKind::List => &["next"],
        NodeKind::Tree => &["left", "right"],
        NodeKind::Graph => &["left", "right", "next"],
    }
}

/// Rebuilds the node graph reachable from `roots`. Identifiers are shared
/// across roots, so two lists with a common tail decode to one graph.
pub fn decode_graph(
    kind: NodeKind,
    roots: &[&Value],
) -> Result<(NodeGraph, Vec<Option<NodeId>>), ConversionError> {
    let fields = child_fields(kind);
    let mut graph = NodeGraph::default();
    let mut by_ptr: HashMap<*const Value, NodeId> = HashMap::new();
    let mut by_id: HashMap<u64, NodeId> = HashMap::new();
    let mut pending: Vec<(NodeId, &Map<String, Value>)> = Vec::new();

    // First pass: one arena node per encoded object
    let mut stack: Vec<&Value> = roots.iter().rev().copied().collect();
    while let Some(value) = stack.pop() {
        if is_nullish(value) || ref_id(value).is_some() {
            continue;
        }
        let Some(map) = value.as_object() else {
            return Err(ConversionError::UnexpectedShape {
                tag: kind.tag_name().to_string(),
                detail: format!("expected a node or null, found {}", describe(value)),
            });
        };
        let ptr = value as *const Value;
        if by_ptr.contains_key(&ptr) {
            continue;
        }
        let id = graph.add(map.get("val").map(to_plain).unwrap_or(Value::Null));
        by_ptr.insert(ptr, id);
        if let Some(object_id) = map.get("$id").and_then(Value::as_u64) {
            by_id.insert(object_id, id);
        }
        pending.push((id, map));
        for field in fields.iter().rev() {
            if let Some(child) = map.get(*field) {
                stack.push(child);
            }
        }
    }

    let resolve = |value: &Value| -> Result<Option<NodeId>, ConversionError> {
        if is_nullish(value) {
            return Ok(None);
        }
        if let Some(object_id) = ref_id(value) {
            return by_id
                .get(&object_id)
                .copied()
                .map(Some)
                .ok_or(ConversionError::DanglingReference(object_id));
        }
        Ok(by_ptr.get(&(value as *const Value)).copied())
    };

    // Second pass: links
    for (id, map) in &pending {
        for field in fields {
            let target = match map.get(*field) {
                Some(child) => resolve(child)?,
                None => None,
            };
            let node = graph.node_mut(*id);
            match *field {
                "next" => node.next = target,
                "left" => node.left = target,
                _ => node.right = target,
            }
        }
    }

    let roots = roots
        .iter()
        .map(|root| resolve(root))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((graph, roots))
}
