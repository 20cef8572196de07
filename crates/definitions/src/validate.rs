//! Structural validation of definition trees.
//!
//! Errors are reported per definition and never abort a batch: a
//! definition that fails validation resolves to `false`/`Null` downstream.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::segment::{SegmentDefinition, SegmentNode};
use crate::user_property::{GroupNode, UserPropertyDefinition};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("duplicate node id {0}")]
    DuplicateNodeId(String),
    #[error("node {parent} references missing child {child}")]
    MissingChild { parent: String, child: String },
    #[error("cycle detected through node {0}")]
    Cycle(String),
    #[error("group entry node {0} does not exist")]
    MissingGroupEntry(String),
    #[error("node {0} has an empty path")]
    EmptyPath(String),
    #[error("random bucket node {node} has out-of-range percent {percent}")]
    PercentOutOfRange { node: String, percent: String },
}

/// Validates a segment definition: unique ids, resolvable children, no
/// cycles reachable from the entry node, non-empty leaf paths.
pub fn validate_segment(definition: &SegmentDefinition) -> Result<(), Vec<DefinitionError>> {
    let mut errors = Vec::new();

    let mut by_id: HashMap<&str, &SegmentNode> = HashMap::new();
    for node in definition.all_nodes() {
        if by_id.insert(node.id(), node).is_some() {
            errors.push(DefinitionError::DuplicateNodeId(node.id().to_string()));
        }
    }

    for node in definition.all_nodes() {
        match node {
            SegmentNode::Trait { id, path, .. } => {
                if path.is_empty() {
                    errors.push(DefinitionError::EmptyPath(id.clone()));
                }
            }
            SegmentNode::RandomBucket { id, percent } => {
                if !(0.0..=100.0).contains(percent) {
                    errors.push(DefinitionError::PercentOutOfRange {
                        node: id.clone(),
                        percent: percent.to_string(),
                    });
                }
            }
            _ => {}
        }
        for child in node.children() {
            if !by_id.contains_key(child.as_str()) {
                errors.push(DefinitionError::MissingChild {
                    parent: node.id().to_string(),
                    child: child.clone(),
                });
            }
        }
    }

    // Iterative DFS from the entry node over child-id edges. A node on the
    // current stack seen again is a cycle.
    let mut visited: HashSet<&str> = HashSet::new();
    let mut on_stack: HashSet<&str> = HashSet::new();
    let mut stack: Vec<(&str, usize)> = vec![(definition.entry_node.id(), 0)];
    on_stack.insert(definition.entry_node.id());
    while let Some((id, child_index)) = stack.pop() {
        let Some(node) = by_id.get(id) else {
            continue;
        };
        let children = node.children();
        if child_index < children.len() {
            stack.push((id, child_index + 1));
            let child = children[child_index].as_str();
            if on_stack.contains(child) {
                errors.push(DefinitionError::Cycle(child.to_string()));
            } else if !visited.contains(child) && by_id.contains_key(child) {
                on_stack.insert(child);
                stack.push((child, 0));
            }
        } else {
            on_stack.remove(id);
            visited.insert(id);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validates a user-property definition. Only `Group` definitions have
/// structure to check: the entry must exist, children must resolve, and
/// the arena must be acyclic.
pub fn validate_user_property(
    definition: &UserPropertyDefinition,
) -> Result<(), Vec<DefinitionError>> {
    let mut errors = Vec::new();
    match definition {
        UserPropertyDefinition::Trait { path } => {
            if path.is_empty() {
                errors.push(DefinitionError::EmptyPath("trait".to_string()));
            }
        }
        UserPropertyDefinition::Performed { id, path, .. } => {
            if path.is_empty() {
                errors.push(DefinitionError::EmptyPath(id.clone()));
            }
        }
        UserPropertyDefinition::Group { entry, nodes } => {
            let mut by_id: HashMap<&str, &GroupNode> = HashMap::new();
            for node in nodes {
                if by_id.insert(node.id(), node).is_some() {
                    errors.push(DefinitionError::DuplicateNodeId(node.id().to_string()));
                }
            }
            if !by_id.contains_key(entry.as_str()) {
                errors.push(DefinitionError::MissingGroupEntry(entry.clone()));
            }
            for node in nodes {
                match node {
                    GroupNode::AnyOf { id, children } => {
                        for child in children {
                            if !by_id.contains_key(child.as_str()) {
                                errors.push(DefinitionError::MissingChild {
                                    parent: id.clone(),
                                    child: child.clone(),
                                });
                            }
                        }
                    }
                    GroupNode::Trait { id, path } => {
                        if path.is_empty() {
                            errors.push(DefinitionError::EmptyPath(id.clone()));
                        }
                    }
                }
            }

            // Same iterative DFS as the segment walk, over AnyOf children.
            let mut visited: HashSet<&str> = HashSet::new();
            let mut on_stack: HashSet<&str> = HashSet::new();
            let mut stack: Vec<(&str, usize)> = vec![(entry.as_str(), 0)];
            on_stack.insert(entry.as_str());
            while let Some((id, child_index)) = stack.pop() {
                let children: &[String] = match by_id.get(id) {
                    Some(GroupNode::AnyOf { children, .. }) => children,
                    _ => &[],
                };
                if child_index < children.len() {
                    stack.push((id, child_index + 1));
                    let child = children[child_index].as_str();
                    if on_stack.contains(child) {
                        errors.push(DefinitionError::Cycle(child.to_string()));
                    } else if !visited.contains(child) && by_id.contains_key(child) {
                        on_stack.insert(child);
                        stack.push((child, 0));
                    }
                } else {
                    on_stack.remove(id);
                    visited.insert(id);
                }
            }
        }
        _ => {}
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
