use std::collections::{HashSet, VecDeque};

use serde_json::Value;

use super::{describe, js_literal, ConversionError, NodeKind};

pub type NodeId = usize;

/// End-of-level marker in `graphNode` wire arrays.
pub const LEVEL_SENTINEL: &str = "#";

#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub val: Value,
    pub next: Option<NodeId>,
    pub left: Option<NodeId>,
    pub right: Option<NodeId>,
}

/// Arena of nodes. Lists use `next`, trees use `left`/`right`, and
/// `graphNode` values use all three.
#[derive(Debug, Clone, Default)]
pub struct NodeGraph {
    nodes: Vec<GraphNode>,
}

impl NodeGraph {
    pub fn add(&mut self, val: Value) -> NodeId {
        self.nodes.push(GraphNode {
            val,
            next: None,
            left: None,
            right: None,
        });
        self.nodes.len() - 1
    }

    pub fn node(&self, id: NodeId) -> &GraphNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut GraphNode {
        &mut self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // ------------------------------------------------------------------
    // Wire -> graph
    // ------------------------------------------------------------------

    pub fn from_wire(kind: NodeKind, wire: &Value) -> Result<(Self, Option<NodeId>), ConversionError> {
        let items = flat_items(kind, wire)?;
        let mut graph = NodeGraph::default();
        let root = match kind {
            NodeKind::List => {
                let mut head = None;
                let mut prev: Option<NodeId> = None;
                for item in items {
                    let id = graph.add(item.clone());
                    match prev {
                        Some(p) => graph.nodes[p].next = Some(id),
                        None => head = Some(id),
                    }
                    prev = Some(id);
                }
                head
            }
            NodeKind::Tree => {
                let values: Vec<&Value> = items.iter().collect();
                graph.build_level_order(kind, &values)?.0
            }
            NodeKind::Graph => {
                let is_sentinel = |v: &Value| v.as_str() == Some(LEVEL_SENTINEL);
                let values: Vec<&Value> = items.iter().filter(|v| !is_sentinel(*v)).collect();
                let (root, slots) = graph.build_level_order(kind, &values)?;

                // Sentinels in the input spell out the next-pointer groups
                if items.iter().any(|v| is_sentinel(v)) {
                    let mut slot = 0;
                    let mut group: Vec<NodeId> = Vec::new();
                    for item in items {
                        if is_sentinel(item) {
                            graph.link_group(&group);
                            group.clear();
                        } else {
                            if let Some(Some(id)) = slots.get(slot) {
                                group.push(*id);
                            }
                            slot += 1;
                        }
                    }
                    graph.link_group(&group);
                }
                root
            }
        };
        Ok((graph, root))
    }

    /// Builds a tree from a level-order array with `null` holes. Returns the
    /// root and the node created for each position.
    fn build_level_order(
        &mut self,
        kind: NodeKind,
        values: &[&Value],
    ) -> Result<(Option<NodeId>, Vec<Option<NodeId>>), ConversionError> {
        let mut slots = vec![None; values.len()];
        let Some(first) = values.first().filter(|v| !v.is_null()) else {
            if let Some(index) = values.iter().position(|v| !v.is_null()) {
                return Err(orphan(kind, index));
            }
            return Ok((None, slots));
        };

        let root = self.add((*first).clone());
        slots[0] = Some(root);
        let mut queue = VecDeque::from([root]);
        let mut i = 1;
        while i < values.len() {
            let Some(parent) = queue.pop_front() else {
                return match values[i..].iter().position(|v| !v.is_null()) {
                    Some(offset) => Err(orphan(kind, i + offset)),
                    None => Ok((Some(root), slots)),
                };
            };
            for is_left in [true, false] {
                if i >= values.len() {
                    break;
                }
                if !values[i].is_null() {
                    let child = self.add(values[i].clone());
                    if is_left {
                        self.nodes[parent].left = Some(child);
                    } else {
                        self.nodes[parent].right = Some(child);
                    }
                    slots[i] = Some(child);
                    queue.push_back(child);
                }
                i += 1;
            }
        }
        Ok((Some(root), slots))
    }

    fn link_group(&mut self, group: &[NodeId]) {
        for pair in group.windows(2) {
            self.nodes[pair[0]].next = Some(pair[1]);
        }
    }

    // ------------------------------------------------------------------
    // Graph -> wire
    // ------------------------------------------------------------------

    pub fn to_wire(&self, kind: NodeKind, root: Option<NodeId>) -> Result<Value, ConversionError> {
        let cycle = || ConversionError::Cycle {
            tag: kind.tag_name().to_string(),
        };
        let mut visited = HashSet::new();
        let mut out = Vec::new();

        match kind {
            NodeKind::List => {
                let mut cur = root;
                while let Some(id) = cur {
                    if !visited.insert(id) {
                        return Err(cycle());
                    }
                    out.push(self.nodes[id].val.clone());
                    cur = self.nodes[id].next;
                }
            }
            NodeKind::Tree => {
                if root.is_some() {
                    let mut queue = VecDeque::from([root]);
                    while let Some(slot) = queue.pop_front() {
                        match slot {
                            Some(id) => {
                                if !visited.insert(id) {
                                    return Err(cycle());
                                }
                                let node = &self.nodes[id];
                                out.push(node.val.clone());
                                queue.push_back(node.left);
                                queue.push_back(node.right);
                            }
                            None => out.push(Value::Null),
                        }
                    }
                    while out.last().is_some_and(Value::is_null) {
                        out.pop();
                    }
                }
            }
            NodeKind::Graph => {
                let mut level = root;
                while let Some(start) = level {
                    let mut cur = Some(start);
                    let mut next_level = None;
                    while let Some(id) = cur {
                        if !visited.insert(id) {
                            return Err(cycle());
                        }
                        let node = &self.nodes[id];
                        out.push(node.val.clone());
                        if next_level.is_none() {
                            next_level = node.left.or(node.right);
                        }
                        cur = node.next;
                    }
                    out.push(Value::String(LEVEL_SENTINEL.to_string()));
                    level = next_level;
                }
            }
        }
        Ok(Value::Array(out))
    }

    // ------------------------------------------------------------------
    // Graph -> JavaScript
    // ------------------------------------------------------------------

    /// An immediately invoked function building the nodes with the
    /// harness constructors.
    pub fn to_js(&self, kind: NodeKind, root: Option<NodeId>) -> String {
        let Some(root) = root else {
            return "null".to_string();
        };
        let class = kind.class_name();
        let mut js = String::from("(() => {");
        for (i, node) in self.nodes.iter().enumerate() {
            js.push_str(&format!(" const n{} = new {}({});", i, class, js_literal(&node.val)));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            for (field, target) in [("next", node.next), ("left", node.left), ("right", node.right)] {
                if let Some(target) = target {
                    js.push_str(&format!(" n{}.{} = n{};", i, field, target));
                }
            }
        }
        js.push_str(&format!(" return n{}; }})()", root));
        js
    }
}

fn flat_items(kind: NodeKind, wire: &Value) -> Result<&[Value], ConversionError> {
    let items = match wire {
        Value::Null => return Ok(&[]),
        Value::Array(items) => items,
        other => {
            return Err(ConversionError::ExpectedArray {
                tag: kind.tag_name().to_string(),
                found: describe(other),
            })
        }
    };
    if let Some(index) = items
        .iter()
        .position(|v| matches!(v, Value::Array(_) | Value::Object(_)))
    {
        return Err(ConversionError::NestedArray {
            tag: kind.tag_name().to_string(),
            index,
        });
    }
    Ok(items)
}

fn orphan(kind: NodeKind, index: usize) -> ConversionError {
    ConversionError::InvalidInput {
        tag: kind.tag_name().to_string(),
        detail: format!("value at index {} has no parent node", index),
    }
}
