//! Turning the flat directory into a forest.
//!
//! Parent/child relations are not stored in the file. A node declaring `child_id`
//! owns the id range `[child_id, end)`, where `end` is its `next_id`, or the enclosing
//! bound when it has no next sibling: the node count at top level, the parent's own
//! bound when nested. Nodes are kept in an arena in flat order and refer to each other
//! by index.
use crate::error::SaveError;
use crate::ext::io::Peek;
use crate::types::NodeEntry;
use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::io::{Read, Seek};

fn index_by_id(nodes: &[NodeEntry]) -> Result<HashMap<i32, usize>> {
    let mut by_id = HashMap::with_capacity(nodes.len());
    for (index, node) in nodes.iter().enumerate() {
        if let Some(previous) = by_id.insert(node.id, index) {
            return Err(SaveError::corruption(format!(
                "Nodes {} ({}) and {} ({}) share id {}",
                previous, nodes[previous].name, index, node.name, node.id
            ))
            .into());
        }
    }
    Ok(by_id)
}

/// Read every node's id from the leading `i32` of its span in the body image.
pub fn assign_ids<R: Read + Seek>(nodes: &mut [NodeEntry], body: &mut R) -> Result<()> {
    for (index, node) in nodes.iter_mut().enumerate() {
        let offset = usize::try_from(node.offset).map_err(|_| {
            SaveError::corruption(format!(
                "Node {} ({}) has negative offset {}",
                index, node.name, node.offset
            ))
        })?;
        node.id = body.peek_i32_at(offset).map_err(|e| {
            SaveError::corruption(format!(
                "Node {} ({}) at offset {:#x} is outside the body: {}",
                index, node.name, offset, e
            ))
        })?;
    }
    index_by_id(nodes)?;
    Ok(())
}

struct Frame {
    node: usize,
    cursor: i32,
    end: i32,
}

fn attach(nodes: &mut [NodeEntry], parent: usize, child: usize) {
    nodes[child].is_child = true;
    nodes[child].parent = Some(parent);
    nodes[parent].children.push(child);
}

/// Attach children to their parents and resolve `next_id` links.
///
/// Returns the roots: nodes never attached, in flat order.
pub fn build_forest(nodes: &mut [NodeEntry]) -> Result<Vec<usize>> {
    for node in nodes.iter_mut() {
        node.children.clear();
        node.parent = None;
        node.next = None;
        node.is_child = false;
    }
    let by_id = index_by_id(nodes)?;
    let total = i32::try_from(nodes.len())
        .map_err(|_| SaveError::corruption(format!("Too many nodes: {}", nodes.len())))?;
    let mut expanded = vec![false; nodes.len()];
    let mut on_stack = vec![false; nodes.len()];
    let mut stack: Vec<Frame> = Vec::new();

    for start in 0..nodes.len() {
        if nodes[start].is_child || expanded[start] {
            continue;
        }
        let Some(child_id) = nodes[start].first_child_id() else {
            continue;
        };
        expanded[start] = true;
        on_stack[start] = true;
        stack.push(Frame {
            node: start,
            cursor: child_id,
            end: nodes[start].next_sibling_id().unwrap_or(total),
        });

        while let Some(frame) = stack.last_mut() {
            if frame.cursor >= frame.end {
                let done = frame.node;
                stack.pop();
                on_stack[done] = false;
                if let Some(parent) = stack.last() {
                    attach(nodes, parent.node, done);
                }
                continue;
            }
            let id = frame.cursor;
            frame.cursor += 1;
            let parent = frame.node;
            let parent_end = frame.end;

            let candidate = *by_id.get(&id).ok_or_else(|| {
                SaveError::corruption(format!(
                    "Node [{}] {} covers id {}, which does not exist",
                    nodes[parent].id, nodes[parent].name, id
                ))
            })?;
            if on_stack[candidate] {
                return Err(SaveError::corruption(format!(
                    "Node [{}] {} is its own ancestor",
                    nodes[candidate].id, nodes[candidate].name
                ))
                .into());
            }
            if nodes[candidate].is_child {
                continue;
            }
            if !expanded[candidate] {
                if let Some(grandchild) = nodes[candidate].first_child_id() {
                    expanded[candidate] = true;
                    on_stack[candidate] = true;
                    let end = nodes[candidate].next_sibling_id().unwrap_or(parent_end);
                    stack.push(Frame {
                        node: candidate,
                        cursor: grandchild,
                        end,
                    });
                    continue;
                }
            }
            attach(nodes, parent, candidate);
        }
    }

    for index in 0..nodes.len() {
        if let Some(child_id) = nodes[index].first_child_id() {
            if !by_id.contains_key(&child_id) {
                return Err(SaveError::corruption(format!(
                    "Node [{}] {} has dangling child id {}",
                    nodes[index].id, nodes[index].name, child_id
                ))
                .into());
            }
        }
        if let Some(next_id) = nodes[index].next_sibling_id() {
            let next = *by_id.get(&next_id).ok_or_else(|| {
                SaveError::corruption(format!(
                    "Node [{}] {} has dangling next id {}",
                    nodes[index].id, nodes[index].name, next_id
                ))
            })?;
            nodes[index].next = Some(next);
        }
    }

    Ok((0..nodes.len()).filter(|&i| !nodes[i].is_child).collect())
}

/// Derive each node's own span length from the offset of the node after it.
///
/// The last node keeps its declared size.
pub fn compute_true_sizes(nodes: &mut [NodeEntry]) -> Result<()> {
    for index in 0..nodes.len() {
        let size = match nodes.get(index + 1) {
            Some(following) => i64::from(following.offset) - i64::from(nodes[index].offset),
            None => i64::from(nodes[index].size),
        };
        nodes[index].true_size = usize::try_from(size).map_err(|_| {
            SaveError::corruption(format!(
                "Node {} ({}) has negative size {}",
                index, nodes[index].name, size
            ))
        })?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Structure of one node, without its decoded value.
pub struct NodeSummary {
    pub index: usize,
    pub id: i32,
    pub name: String,
    pub next_id: i32,
    pub child_id: i32,
    pub offset: i32,
    pub size: i32,
    pub true_size: usize,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
/// Nodes in flat order plus the indices of the roots.
pub struct SaveTree {
    nodes: Vec<NodeEntry>,
    roots: Vec<usize>,
}

impl SaveTree {
    /// Build a tree from nodes whose ids are already set.
    pub fn from_nodes(mut nodes: Vec<NodeEntry>) -> Result<Self> {
        let roots = build_forest(&mut nodes)?;
        Ok(Self { nodes, roots })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes in flat (directory) order.
    pub fn nodes(&self) -> &[NodeEntry] {
        &self.nodes
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut [NodeEntry] {
        &mut self.nodes
    }

    pub fn get(&self, index: usize) -> Option<&NodeEntry> {
        self.nodes.get(index)
    }

    /// Mutable access for editing a node's value. Structural fields are rewritten on save.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut NodeEntry> {
        self.nodes.get_mut(index)
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn root_nodes(&self) -> impl Iterator<Item = &NodeEntry> + '_ {
        self.roots.iter().map(move |&i| &self.nodes[i])
    }

    pub fn children(&self, index: usize) -> impl Iterator<Item = &NodeEntry> + '_ {
        self.nodes
            .get(index)
            .map(|n| n.children.as_slice())
            .unwrap_or_default()
            .iter()
            .map(move |&i| &self.nodes[i])
    }

    pub fn find_by_id(&self, id: i32) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    /// First node with the given name in flat order.
    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name == name)
    }

    /// Depth-first pre-order walk over the forest as `(depth, index)` pairs.
    pub fn walk(&self) -> Vec<(usize, usize)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(usize, usize)> = self.roots.iter().rev().map(|&r| (0, r)).collect();
        while let Some((depth, index)) = stack.pop() {
            out.push((depth, index));
            for &child in self.nodes[index].children.iter().rev() {
                stack.push((depth + 1, child));
            }
        }
        out
    }

    pub fn summary(&self) -> Vec<NodeSummary> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| NodeSummary {
                index,
                id: node.id,
                name: node.name.clone(),
                next_id: node.next_id,
                child_id: node.child_id,
                offset: node.offset,
                size: node.size,
                true_size: node.true_size,
                parent: node.parent,
                children: node.children.clone(),
            })
            .collect()
    }
}
