use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::bookmark::{BookmarkNode, FolderType};

pub const TREE_ROOT_ID: &str = "0";
pub const BOOKMARKS_BAR_ID: &str = "1";
pub const OTHER_BOOKMARKS_ID: &str = "2";
pub const MOBILE_BOOKMARKS_ID: &str = "3";

/// Creation request. A missing `url` creates a folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateBookmark {
    pub parent_id: String,
    pub title: String,
    pub url: Option<String>,
}

impl CreateBookmark {
    pub fn folder(parent_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            parent_id: parent_id.into(),
            title: title.into(),
            url: None,
        }
    }

    pub fn bookmark(
        parent_id: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            parent_id: parent_id.into(),
            title: title.into(),
            url: Some(url.into()),
        }
    }
}

/// The browser's mutable bookmark tree. Every call may fail, and the tree
/// may change between calls.
#[async_trait]
pub trait BookmarkStore: Send + Sync {
    async fn get_tree(&self) -> Result<Vec<BookmarkNode>, StoreError>;

    /// Single node without its children.
    async fn get(&self, id: &str) -> Result<Option<BookmarkNode>, StoreError>;

    /// Nodes whose title equals `title` exactly.
    async fn search_title(&self, title: &str) -> Result<Vec<BookmarkNode>, StoreError>;

    async fn create(&self, request: CreateBookmark) -> Result<BookmarkNode, StoreError>;

    async fn move_node(&self, id: &str, parent_id: &str) -> Result<BookmarkNode, StoreError>;

    async fn update_title(&self, id: &str, title: &str) -> Result<BookmarkNode, StoreError>;

    /// Removes a bookmark or an empty folder.
    async fn remove(&self, id: &str) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Entry {
    parent_id: Option<String>,
    title: String,
    url: Option<String>,
    folder_type: Option<FolderType>,
    children: Vec<String>,
}

impl Entry {
    fn is_folder(&self) -> bool {
        self.url.is_none()
    }

    fn is_permanent(&self) -> bool {
        self.parent_id.is_none() || self.folder_type.is_some()
    }
}

#[derive(Debug)]
struct Tree {
    entries: HashMap<String, Entry>,
    next_id: u64,
}

impl Tree {
    fn with_default_roots() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            TREE_ROOT_ID.to_string(),
            Entry {
                parent_id: None,
                title: String::new(),
                url: None,
                folder_type: None,
                children: Vec::new(),
            },
        );
        let mut tree = Self {
            entries,
            next_id: 100,
        };
        for (id, title, folder_type) in [
            (BOOKMARKS_BAR_ID, "Bookmarks bar", FolderType::BookmarksBar),
            (OTHER_BOOKMARKS_ID, "Other bookmarks", FolderType::Other),
            (MOBILE_BOOKMARKS_ID, "Mobile bookmarks", FolderType::Mobile),
        ] {
            tree.insert(id.to_string(), TREE_ROOT_ID, title, None, Some(folder_type));
        }
        tree
    }

    fn insert(
        &mut self,
        id: String,
        parent_id: &str,
        title: &str,
        url: Option<String>,
        folder_type: Option<FolderType>,
    ) {
        if let Some(parent) = self.entries.get_mut(parent_id) {
            parent.children.push(id.clone());
        }
        self.entries.insert(
            id,
            Entry {
                parent_id: Some(parent_id.to_string()),
                title: title.to_string(),
                url,
                folder_type,
                children: Vec::new(),
            },
        );
    }

    fn node(&self, id: &str, deep: bool) -> Option<BookmarkNode> {
        let entry = self.entries.get(id)?;
        let children = if entry.is_folder() {
            if deep {
                Some(
                    entry
                        .children
                        .iter()
                        .filter_map(|child| self.node(child, true))
                        .collect(),
                )
            } else {
                None
            }
        } else {
            None
        };
        Some(BookmarkNode {
            id: id.to_string(),
            parent_id: entry.parent_id.clone(),
            title: entry.title.clone(),
            url: entry.url.clone(),
            folder_type: entry.folder_type,
            children,
        })
    }

    fn folder(&self, op: &'static str, id: &str) -> Result<&Entry, StoreError> {
        match self.entries.get(id) {
            Some(entry) if entry.is_folder() => Ok(entry),
            Some(_) => Err(StoreError::failed(op, id, "not a folder")),
            None => Err(StoreError::failed(op, id, "parent folder not found")),
        }
    }

    fn is_ancestor(&self, ancestor: &str, id: &str) -> bool {
        let mut cursor = Some(id.to_string());
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self
                .entries
                .get(&current)
                .and_then(|entry| entry.parent_id.clone());
        }
        false
    }

    fn detach(&mut self, id: &str, parent_id: Option<&str>) {
        if let Some(parent) = parent_id.and_then(|pid| self.entries.get_mut(pid)) {
            parent.children.retain(|child| child != id);
        }
    }
}

/// Process-local [`BookmarkStore`] with the usual permanent roots: `0`
/// (tree root), `1` bookmarks bar, `2` other bookmarks, `3` mobile.
#[derive(Debug)]
pub struct MemoryBookmarkStore {
    tree: Mutex<Tree>,
}

impl Default for MemoryBookmarkStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBookmarkStore {
    pub fn new() -> Self {
        Self {
            tree: Mutex::new(Tree::with_default_roots()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tree> {
        self.tree
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn create_sync(&self, request: CreateBookmark) -> Result<BookmarkNode, StoreError> {
        let mut tree = self.lock();
        tree.folder("create", &request.parent_id)?;
        let id = tree.next_id.to_string();
        tree.next_id += 1;
        tree.insert(
            id.clone(),
            &request.parent_id,
            &request.title,
            request.url,
            None,
        );
        tree.node(&id, false)
            .ok_or_else(|| StoreError::failed("create", id, "node vanished"))
    }

    /// Adds a folder and returns its id.
    pub fn add_folder(&self, parent_id: &str, title: &str) -> Result<String, StoreError> {
        self.create_sync(CreateBookmark::folder(parent_id, title))
            .map(|node| node.id)
    }

    /// Adds a bookmark and returns its id.
    pub fn add_bookmark(&self, parent_id: &str, title: &str, url: &str) -> Result<String, StoreError> {
        self.create_sync(CreateBookmark::bookmark(parent_id, title, url))
            .map(|node| node.id)
    }

    pub fn snapshot(&self) -> Vec<BookmarkNode> {
        self.lock()
            .node(TREE_ROOT_ID, true)
            .into_iter()
            .collect()
    }
}

#[async_trait]
impl BookmarkStore for MemoryBookmarkStore {
    async fn get_tree(&self) -> Result<Vec<BookmarkNode>, StoreError> {
        Ok(self.snapshot())
    }

    async fn get(&self, id: &str) -> Result<Option<BookmarkNode>, StoreError> {
        Ok(self.lock().node(id, false))
    }

    async fn search_title(&self, title: &str) -> Result<Vec<BookmarkNode>, StoreError> {
        let tree = self.lock();
        let mut hits: Vec<BookmarkNode> = tree
            .entries
            .iter()
            .filter(|(_, entry)| entry.parent_id.is_some() && entry.title == title)
            .filter_map(|(id, _)| tree.node(id, false))
            .collect();
        hits.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(hits)
    }

    async fn create(&self, request: CreateBookmark) -> Result<BookmarkNode, StoreError> {
        self.create_sync(request)
    }

    async fn move_node(&self, id: &str, parent_id: &str) -> Result<BookmarkNode, StoreError> {
        let mut tree = self.lock();
        let entry = tree
            .entries
            .get(id)
            .ok_or_else(|| StoreError::failed("move", id, "bookmark not found"))?;
        if entry.is_permanent() {
            return Err(StoreError::failed("move", id, "cannot move a permanent folder"));
        }
        let old_parent = entry.parent_id.clone();
        tree.folder("move", parent_id)?;
        if tree.is_ancestor(id, parent_id) {
            return Err(StoreError::failed("move", id, "cannot move a folder into itself"));
        }

        tree.detach(id, old_parent.as_deref());
        if let Some(parent) = tree.entries.get_mut(parent_id) {
            parent.children.push(id.to_string());
        }
        if let Some(entry) = tree.entries.get_mut(id) {
            entry.parent_id = Some(parent_id.to_string());
        }
        tree.node(id, false)
            .ok_or_else(|| StoreError::failed("move", id, "node vanished"))
    }

    async fn update_title(&self, id: &str, title: &str) -> Result<BookmarkNode, StoreError> {
        let mut tree = self.lock();
        let entry = tree
            .entries
            .get_mut(id)
            .ok_or_else(|| StoreError::failed("update", id, "bookmark not found"))?;
        if entry.is_permanent() {
            return Err(StoreError::failed("update", id, "cannot rename a permanent folder"));
        }
        entry.title = title.to_string();
        tree.node(id, false)
            .ok_or_else(|| StoreError::failed("update", id, "node vanished"))
    }

    async fn remove(&self, id: &str) -> Result<(), StoreError> {
        let mut tree = self.lock();
        let entry = tree
            .entries
            .get(id)
            .ok_or_else(|| StoreError::failed("remove", id, "bookmark not found"))?;
        if entry.is_permanent() {
            return Err(StoreError::failed("remove", id, "cannot remove a permanent folder"));
        }
        if !entry.children.is_empty() {
            return Err(StoreError::failed("remove", id, "folder not empty"));
        }
        let parent = entry.parent_id.clone();
        tree.detach(id, parent.as_deref());
        tree.entries.remove(id);
        Ok(())
    }
}
