use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;

use crate::models::Category;

/// Hard ceiling on nesting when materializing a tree. The real hierarchy is
/// three levels at most; the ceiling only guards against pathological data.
pub const MAX_TREE_DEPTH: usize = 32;

/// CategoryNode
///
/// A category together with its direct children, produced by [`build_tree`].
/// Serializes with the category fields inline and a `children` array, the
/// shape the admin tree view consumes.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CategoryNode {
    #[serde(flatten)]
    pub category: Category,
    #[schema(no_recursion)]
    pub children: Vec<CategoryNode>,
}

/// build_tree
///
/// Turns a flat, ordered category list into a forest. Two passes: index the
/// ids, then attach each category to its parent, or to the roots when it
/// has no parent or its parent is missing from the input. A category whose
/// `parent_id` equals its own id is treated as a root rather than attached
/// to itself.
///
/// Children keep the input order of the flat list. Nodes that sit on a
/// deeper parent cycle never reach a root and are simply dropped.
pub fn build_tree(flat: &[Category]) -> Vec<CategoryNode> {
    let ids: HashSet<i64> = flat.iter().map(|c| c.id).collect();

    let mut children_of: HashMap<i64, Vec<&Category>> = HashMap::new();
    let mut roots: Vec<&Category> = Vec::new();

    for category in flat {
        match category.parent_id {
            Some(parent) if parent != category.id && ids.contains(&parent) => {
                children_of.entry(parent).or_default().push(category);
            }
            _ => roots.push(category),
        }
    }

    roots
        .into_iter()
        .map(|root| attach(root, &children_of, 0))
        .collect()
}

fn attach(
    category: &Category,
    children_of: &HashMap<i64, Vec<&Category>>,
    depth: usize,
) -> CategoryNode {
    let children = if depth >= MAX_TREE_DEPTH {
        Vec::new()
    } else {
        children_of
            .get(&category.id)
            .map(|kids| {
                kids.iter()
                    .map(|kid| attach(kid, children_of, depth + 1))
                    .collect()
            })
            .unwrap_or_default()
    };

    CategoryNode {
        category: category.clone(),
        children,
    }
}

/// flatten
///
/// The inverse of [`build_tree`]: walks the forest in pre-order (parent
/// before children, siblings in order) and returns every descendant as a
/// flat list. Iterative, so depth costs no stack.
pub fn flatten(forest: &[CategoryNode]) -> Vec<Category> {
    let mut out = Vec::new();
    let mut stack: Vec<&CategoryNode> = forest.iter().rev().collect();

    while let Some(node) = stack.pop() {
        out.push(node.category.clone());
        for child in node.children.iter().rev() {
            stack.push(child);
        }
    }

    out
}

/// prune
///
/// Limits a forest to `levels` child levels below the roots: `prune(f, 2)`
/// keeps children and grandchildren and drops everything deeper. The list
/// endpoint uses this to serve at most two levels of nesting.
pub fn prune(forest: &mut Vec<CategoryNode>, levels: usize) {
    for node in forest {
        if levels == 0 {
            node.children.clear();
        } else {
            prune(&mut node.children, levels - 1);
        }
    }
}

/// find
///
/// Locates the node with the given id anywhere in the forest.
pub fn find(forest: &[CategoryNode], id: i64) -> Option<&CategoryNode> {
    let mut stack: Vec<&CategoryNode> = forest.iter().collect();

    while let Some(node) = stack.pop() {
        if node.category.id == id {
            return Some(node);
        }
        stack.extend(node.children.iter());
    }

    None
}
