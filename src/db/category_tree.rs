//! In-memory view of the category forest.
//!
//! Categories come out of the database as a flat list; everything that
//! needs structure (the UI payload, import remapping, empty-category
//! cleanup, AI category paths) goes through [`CategoryForest`]: an arena
//! of nodes indexed by id with explicit parent/children links. Upward
//! walks carry a visited set so a corrupt tree surfaces as an error
//! instead of an infinite loop.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use thiserror::Error;

use super::entities::category;

/// Maximum nesting depth of the category forest (root = 0).
pub const MAX_DEPTH: i32 = 5;

/// The fields the forest needs from a category, decoupled from the
/// entity so API clients can feed their DTOs in as well.
#[derive(Debug, Clone)]
pub struct CategoryRecord {
    pub id: i32,
    pub name: String,
    pub parent_id: Option<i32>,
    pub depth: i32,
    pub position: i32,
    pub is_private: bool,
}

impl From<&category::Model> for CategoryRecord {
    fn from(m: &category::Model) -> Self {
        CategoryRecord {
            id: m.id,
            name: m.name.clone(),
            parent_id: m.parent_id,
            depth: m.depth,
            position: m.position,
            is_private: m.is_private,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    pub id: i32,
    pub name: String,
    pub parent_id: Option<i32>,
    pub depth: i32,
    pub position: i32,
    pub is_private: bool,
    /// Child ids in `position` order.
    pub children: Vec<i32>,
}

/// Nested rendition of a subtree, for JSON consumers that want the
/// hierarchy inline rather than the arena.
#[derive(Debug, Clone, Serialize)]
pub struct NestedNode {
    pub id: i32,
    pub name: String,
    pub parent_id: Option<i32>,
    pub depth: i32,
    pub position: i32,
    pub is_private: bool,
    pub children: Vec<NestedNode>,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("category tree is corrupt: cycle through category {0}")]
pub struct CycleDetected(pub i32);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoveError {
    #[error("Category cannot be its own parent")]
    SelfParent,
    #[error("Cannot set descendant as parent")]
    DescendantTarget,
    #[error("Maximum nesting depth ({MAX_DEPTH}) exceeded")]
    DepthExceeded,
    #[error("Parent category not found")]
    UnknownTarget,
}

pub struct CategoryForest {
    nodes: HashMap<i32, TreeNode>,
    roots: Vec<i32>,
}

impl CategoryForest {
    pub fn from_models(models: &[category::Model]) -> Self {
        Self::from_records(models.iter().map(CategoryRecord::from).collect())
    }

    pub fn from_records(records: Vec<CategoryRecord>) -> Self {
        let mut nodes: HashMap<i32, TreeNode> = records
            .iter()
            .map(|m| {
                (
                    m.id,
                    TreeNode {
                        id: m.id,
                        name: m.name.clone(),
                        parent_id: m.parent_id,
                        depth: m.depth,
                        position: m.position,
                        is_private: m.is_private,
                        children: Vec::new(),
                    },
                )
            })
            .collect();

        let mut roots = Vec::new();
        for m in &records {
            match m.parent_id {
                // A dangling parent_id demotes the node to a root rather
                // than losing it, matching how the UI tree builder treats
                // orphans.
                Some(parent) if nodes.contains_key(&parent) => {
                    nodes.get_mut(&parent).unwrap().children.push(m.id);
                }
                _ => roots.push(m.id),
            }
        }

        let position_of =
            |nodes: &HashMap<i32, TreeNode>, id: &i32| nodes.get(id).map(|n| (n.position, n.id));
        roots.sort_by_key(|id| position_of(&nodes, id));
        let ids: Vec<i32> = nodes.keys().copied().collect();
        for id in ids {
            let mut children = std::mem::take(&mut nodes.get_mut(&id).unwrap().children);
            children.sort_by_key(|c| position_of(&nodes, c));
            nodes.get_mut(&id).unwrap().children = children;
        }

        CategoryForest { nodes, roots }
    }

    pub fn get(&self, id: i32) -> Option<&TreeNode> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: i32) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[i32] {
        &self.roots
    }

    /// Depth-first flattening: every root followed by its subtree, all
    /// sibling groups in `position` order.
    pub fn flatten(&self) -> Vec<i32> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<i32> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(node) = self.nodes.get(&id) {
                stack.extend(node.children.iter().rev());
            }
        }
        out
    }

    /// Walks parent links from `id` up to its root. The visited set turns
    /// a cyclic parent chain into [`CycleDetected`] instead of a hang.
    pub fn path(&self, id: i32) -> Result<Vec<&TreeNode>, CycleDetected> {
        let mut path = Vec::new();
        let mut visited = HashSet::new();
        let mut current = self.nodes.get(&id);
        while let Some(node) = current {
            if !visited.insert(node.id) {
                return Err(CycleDetected(node.id));
            }
            path.push(node);
            current = node.parent_id.and_then(|p| self.nodes.get(&p));
        }
        path.reverse();
        Ok(path)
    }

    /// Root-to-node names joined with " / ".
    pub fn path_string(&self, id: i32) -> Result<String, CycleDetected> {
        let names: Vec<&str> = self.path(id)?.iter().map(|n| n.name.as_str()).collect();
        Ok(names.join(" / "))
    }

    /// Every id below `id`, depth-first.
    pub fn descendant_ids(&self, id: i32) -> Vec<i32> {
        let mut out = Vec::new();
        let mut stack: Vec<i32> = match self.nodes.get(&id) {
            Some(node) => node.children.iter().rev().copied().collect(),
            None => return out,
        };
        while let Some(child) = stack.pop() {
            out.push(child);
            if let Some(node) = self.nodes.get(&child) {
                stack.extend(node.children.iter().rev());
            }
        }
        out
    }

    /// Validates moving `id` under `new_parent` (None = to the roots).
    pub fn check_move(&self, id: i32, new_parent: Option<i32>) -> Result<(), MoveError> {
        let Some(target) = new_parent else {
            return Ok(());
        };
        if target == id {
            return Err(MoveError::SelfParent);
        }
        let Some(target_node) = self.nodes.get(&target) else {
            return Err(MoveError::UnknownTarget);
        };
        if self.descendant_ids(id).contains(&target) {
            return Err(MoveError::DescendantTarget);
        }
        if target_node.depth >= MAX_DEPTH {
            return Err(MoveError::DepthExceeded);
        }
        Ok(())
    }

    /// Depth a node would have under `parent` (None = root).
    pub fn depth_under(&self, parent: Option<i32>) -> i32 {
        parent
            .and_then(|p| self.nodes.get(&p))
            .map(|n| n.depth + 1)
            .unwrap_or(0)
    }

    pub fn nested(&self) -> Vec<NestedNode> {
        self.roots.iter().map(|id| self.nested_from(*id)).collect()
    }

    fn nested_from(&self, id: i32) -> NestedNode {
        // Bounded recursion: insertion invariants cap the tree at
        // MAX_DEPTH levels.
        let node = &self.nodes[&id];
        NestedNode {
            id: node.id,
            name: node.name.clone(),
            parent_id: node.parent_id,
            depth: node.depth,
            position: node.position,
            is_private: node.is_private,
            children: node
                .children
                .iter()
                .map(|child| self.nested_from(*child))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn cat(id: i32, name: &str, parent_id: Option<i32>, depth: i32, position: i32) -> category::Model {
        let now = Utc::now();
        category::Model {
            id,
            name: name.to_string(),
            parent_id,
            depth,
            position,
            is_private: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn builds_tree_map_and_flat_list() {
        let models = vec![
            cat(1, "A", None, 0, 0),
            cat(2, "B", Some(1), 1, 0),
            cat(3, "C", Some(1), 1, 1),
        ];
        let forest = CategoryForest::from_models(&models);

        assert_eq!(forest.roots(), &[1]);
        assert_eq!(forest.get(1).unwrap().children, vec![2, 3]);
        assert_eq!(forest.flatten(), vec![1, 2, 3]);
        assert_eq!(forest.path_string(3).unwrap(), "A / C");
    }

    #[test]
    fn sibling_groups_sorted_by_position() {
        let models = vec![
            cat(1, "A", None, 0, 1),
            cat(2, "B", None, 0, 0),
            cat(3, "C", Some(2), 1, 2),
            cat(4, "D", Some(2), 1, 0),
        ];
        let forest = CategoryForest::from_models(&models);

        assert_eq!(forest.roots(), &[2, 1]);
        assert_eq!(forest.get(2).unwrap().children, vec![4, 3]);
        assert_eq!(forest.flatten(), vec![2, 4, 3, 1]);
    }

    #[test]
    fn orphan_becomes_root() {
        let models = vec![cat(7, "Lost", Some(99), 1, 0)];
        let forest = CategoryForest::from_models(&models);
        assert_eq!(forest.roots(), &[7]);
    }

    #[test]
    fn path_terminates_on_cyclic_links() {
        // Corrupt data: 1 and 2 claim each other as parents. Must error,
        // not spin.
        let models = vec![cat(1, "A", Some(2), 1, 0), cat(2, "B", Some(1), 1, 0)];
        let forest = CategoryForest::from_models(&models);
        assert!(matches!(forest.path(1), Err(CycleDetected(_))));
    }

    #[test]
    fn descendants_cover_whole_subtree() {
        let models = vec![
            cat(1, "A", None, 0, 0),
            cat(2, "B", Some(1), 1, 0),
            cat(3, "C", Some(2), 2, 0),
            cat(4, "D", None, 0, 1),
        ];
        let forest = CategoryForest::from_models(&models);
        assert_eq!(forest.descendant_ids(1), vec![2, 3]);
        assert!(forest.descendant_ids(4).is_empty());
    }

    #[test]
    fn move_rejects_self_descendant_and_depth() {
        let models = vec![
            cat(1, "A", None, 0, 0),
            cat(2, "B", Some(1), 1, 0),
            cat(3, "C", Some(2), 2, 0),
            cat(9, "Deep", None, 5, 1),
        ];
        let forest = CategoryForest::from_models(&models);

        assert_eq!(forest.check_move(1, Some(1)), Err(MoveError::SelfParent));
        assert_eq!(forest.check_move(1, Some(3)), Err(MoveError::DescendantTarget));
        assert_eq!(forest.check_move(2, Some(9)), Err(MoveError::DepthExceeded));
        assert_eq!(forest.check_move(1, Some(88)), Err(MoveError::UnknownTarget));
        assert_eq!(forest.check_move(3, None), Ok(()));
        assert_eq!(forest.check_move(3, Some(1)), Ok(()));
    }

    #[test]
    fn depth_under_parent() {
        let models = vec![cat(1, "A", None, 0, 0), cat(2, "B", Some(1), 1, 0)];
        let forest = CategoryForest::from_models(&models);
        assert_eq!(forest.depth_under(None), 0);
        assert_eq!(forest.depth_under(Some(2)), 2);
    }
}
