use std::collections::HashSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FolderType {
    BookmarksBar,
    Other,
    Mobile,
}

/// A node of the external bookmark tree. Folders have no `url`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkNode {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_type: Option<FolderType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<BookmarkNode>>,
}

impl BookmarkNode {
    pub fn is_folder(&self) -> bool {
        self.url.is_none()
    }

    pub fn children(&self) -> &[BookmarkNode] {
        self.children.as_deref().unwrap_or(&[])
    }

    /// Leaf view of a bookmark node. Folders yield `None`.
    pub fn as_item(&self) -> Option<BookmarkItem> {
        let url = self.url.clone()?;
        Some(BookmarkItem {
            id: self.id.clone(),
            title: self.title.clone(),
            url,
            parent_id: self.parent_id.clone().unwrap_or_default(),
        })
    }
}

/// A bookmark leaf as scanned from the tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkItem {
    pub id: String,
    pub title: String,
    pub url: String,
    pub parent_id: String,
}

impl BookmarkItem {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
        parent_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            url: url.into(),
            parent_id: parent_id.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tree visitor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitOrder {
    /// Parent before children.
    Pre,
    /// Children before parent.
    Post,
}

/// Depth-first walk over a forest of bookmark nodes. `depth` is 0 for the
/// nodes passed in.
pub fn visit_tree<'a, F>(nodes: &'a [BookmarkNode], order: VisitOrder, visit: &mut F)
where
    F: FnMut(&'a BookmarkNode, usize),
{
    visit_at(nodes, order, 0, visit);
}

fn visit_at<'a, F>(nodes: &'a [BookmarkNode], order: VisitOrder, depth: usize, visit: &mut F)
where
    F: FnMut(&'a BookmarkNode, usize),
{
    for node in nodes {
        if order == VisitOrder::Pre {
            visit(node, depth);
        }
        visit_at(node.children(), order, depth + 1, visit);
        if order == VisitOrder::Post {
            visit(node, depth);
        }
    }
}

/// Folds every node into an accumulator, pre-order.
pub fn fold_tree<'a, A, F>(nodes: &'a [BookmarkNode], init: A, mut f: F) -> A
where
    F: FnMut(A, &'a BookmarkNode, usize) -> A,
{
    fold_at(nodes, init, 0, &mut f)
}

fn fold_at<'a, A, F>(nodes: &'a [BookmarkNode], init: A, depth: usize, f: &mut F) -> A
where
    F: FnMut(A, &'a BookmarkNode, usize) -> A,
{
    let mut acc = init;
    for node in nodes {
        acc = f(acc, node, depth);
        acc = fold_at(node.children(), acc, depth + 1, f);
    }
    acc
}

pub fn collect_nodes<'a, P>(nodes: &'a [BookmarkNode], mut predicate: P) -> Vec<&'a BookmarkNode>
where
    P: FnMut(&BookmarkNode, usize) -> bool,
{
    fold_tree(nodes, Vec::new(), |mut acc, node, depth| {
        if predicate(node, depth) {
            acc.push(node);
        }
        acc
    })
}

pub fn find_node<'a>(nodes: &'a [BookmarkNode], id: &str) -> Option<&'a BookmarkNode> {
    for node in nodes {
        if node.id == id {
            return Some(node);
        }
        if let Some(found) = find_node(node.children(), id) {
            return Some(found);
        }
    }
    None
}

/// All bookmark leaves under `nodes`, in tree order.
pub fn collect_items(nodes: &[BookmarkNode]) -> Vec<BookmarkItem> {
    collect_nodes(nodes, |node, _| !node.is_folder())
        .into_iter()
        .filter_map(BookmarkNode::as_item)
        .collect()
}

/// Folders that contain no bookmark at any depth, children listed before
/// their parents so they can be removed in order. Nodes whose id is in
/// `keep` are never reported, though they still count as empty for their
/// parents.
pub fn empty_folders(nodes: &[BookmarkNode], keep: &HashSet<String>) -> Vec<String> {
    let mut empty: HashSet<&str> = HashSet::new();
    let mut ordered = Vec::new();

    visit_tree(nodes, VisitOrder::Post, &mut |node, _| {
        if !node.is_folder() {
            return;
        }
        let all_children_empty = node
            .children()
            .iter()
            .all(|child| child.is_folder() && empty.contains(child.id.as_str()));
        if all_children_empty {
            empty.insert(node.id.as_str());
            if !keep.contains(&node.id) {
                ordered.push(node.id.clone());
            }
        }
    });

    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(id: &str, title: &str, children: Vec<BookmarkNode>) -> BookmarkNode {
        BookmarkNode {
            id: id.to_string(),
            parent_id: None,
            title: title.to_string(),
            url: None,
            folder_type: None,
            children: Some(children),
        }
    }

    fn leaf(id: &str, url: &str) -> BookmarkNode {
        BookmarkNode {
            id: id.to_string(),
            parent_id: None,
            title: format!("title {id}"),
            url: Some(url.to_string()),
            folder_type: None,
            children: None,
        }
    }

    fn sample_tree() -> Vec<BookmarkNode> {
        vec![folder(
            "0",
            "",
            vec![
                folder(
                    "1",
                    "Bar",
                    vec![leaf("10", "https://a.com"), folder("11", "Empty", vec![])],
                ),
                folder(
                    "2",
                    "Other",
                    vec![folder("20", "Outer", vec![folder("21", "Inner", vec![])])],
                ),
            ],
        )]
    }

    #[test]
    fn post_order_visits_children_first() {
        let tree = sample_tree();
        let mut seen = Vec::new();
        visit_tree(&tree, VisitOrder::Post, &mut |node, _| seen.push(node.id.clone()));
        let inner = seen.iter().position(|id| id == "21").unwrap();
        let outer = seen.iter().position(|id| id == "20").unwrap();
        assert!(inner < outer);
        assert_eq!(seen.last().unwrap(), "0");
    }

    #[test]
    fn fold_tree_tracks_depth() {
        let tree = sample_tree();
        let max_depth = fold_tree(&tree, 0, |acc, _, depth| acc.max(depth));
        assert_eq!(max_depth, 3);
    }

    #[test]
    fn collect_items_returns_only_leaves() {
        let items = collect_items(&sample_tree());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "10");
        assert_eq!(items[0].url, "https://a.com");
    }

    #[test]
    fn empty_folders_are_reported_bottom_up() {
        let keep: HashSet<String> = ["0", "1", "2"].iter().map(|s| s.to_string()).collect();
        let empty = empty_folders(&sample_tree(), &keep);
        assert_eq!(empty, vec!["11", "21", "20"]);
    }

    #[test]
    fn find_node_descends_into_children() {
        let tree = sample_tree();
        assert_eq!(find_node(&tree, "21").unwrap().title, "Inner");
        assert!(find_node(&tree, "99").is_none());
    }
}
