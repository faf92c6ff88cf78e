use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use crate::error::AppError;
use crate::models::bookmark::{collect_items, find_node, BookmarkItem, BookmarkNode, FolderType};
use crate::models::settings::Scope;
use crate::services::bookmark_store::{BookmarkStore, BOOKMARKS_BAR_ID, OTHER_BOOKMARKS_ID};

const BOOKMARK_MANAGER_PREFIX: &str = "chrome://bookmarks";
const ALL_BOOKMARKS: &str = "All Bookmarks";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub items: Vec<BookmarkItem>,
    pub description: String,
}

/// The folder the user is currently looking at, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkContext {
    pub folder_id: Option<String>,
    pub folder_name: String,
    pub parent_id: Option<String>,
}

impl BookmarkContext {
    pub fn all() -> Self {
        Self {
            folder_id: None,
            folder_name: ALL_BOOKMARKS.to_string(),
            parent_id: None,
        }
    }
}

fn top_level_folder(tree: &[BookmarkNode], folder_type: FolderType, fallback: &str) -> String {
    tree.iter()
        .flat_map(|root| root.children())
        .find(|child| child.folder_type == Some(folder_type))
        .map(|child| child.id.clone())
        .unwrap_or_else(|| fallback.to_string())
}

/// Bookmarks in `scope`. `bar` and `other` cover direct children of that
/// root only; `current` walks the given folder recursively and behaves
/// like `all` when no folder is given.
pub async fn scan(
    store: &dyn BookmarkStore,
    scope: Scope,
    current_folder: Option<&str>,
) -> Result<ScanResult, AppError> {
    let tree = store.get_tree().await?;
    let all = || collect_items(&tree);

    let (items, description) = match (scope, current_folder) {
        (Scope::Bar, _) => {
            let bar = top_level_folder(&tree, FolderType::BookmarksBar, BOOKMARKS_BAR_ID);
            let items = direct_items(&tree, &bar);
            let description = format!("Found {} bookmarks in \"Bookmarks Bar\"", items.len());
            (items, description)
        }
        (Scope::Other, _) => {
            let other = top_level_folder(&tree, FolderType::Other, OTHER_BOOKMARKS_ID);
            let items = direct_items(&tree, &other);
            let description = format!("Found {} bookmarks in \"Other Bookmarks\"", items.len());
            (items, description)
        }
        (Scope::Current, Some(folder_id)) => match find_node(&tree, folder_id) {
            Some(folder) if folder.is_folder() => {
                let items = collect_items(folder.children());
                let description = format!("Found {} bookmarks in \"{}\"", items.len(), folder.title);
                (items, description)
            }
            _ => {
                warn!("folder {folder_id} not found, nothing to scan");
                (Vec::new(), format!("Folder {folder_id} not found"))
            }
        },
        (Scope::All, _) | (Scope::Current, None) => {
            let items = all();
            let description = format!("Found {} bookmarks in \"{ALL_BOOKMARKS}\"", items.len());
            (items, description)
        }
    };

    debug!("{description}");
    Ok(ScanResult { items, description })
}

fn direct_items(tree: &[BookmarkNode], folder_id: &str) -> Vec<BookmarkItem> {
    collect_items(tree)
        .into_iter()
        .filter(|item| item.parent_id == folder_id)
        .collect()
}

/// Resolves the folder shown by a bookmark-manager page such as
/// `chrome://bookmarks/?id=42`. Anything else maps to all bookmarks.
pub async fn detect_context(store: &dyn BookmarkStore, page_url: Option<&str>) -> BookmarkContext {
    let Some(folder_id) = page_url
        .filter(|url| url.starts_with(BOOKMARK_MANAGER_PREFIX))
        .and_then(|url| Url::parse(url).ok())
        .and_then(|url| {
            url.query_pairs()
                .find(|(key, _)| key == "id")
                .map(|(_, value)| value.into_owned())
        })
    else {
        return BookmarkContext::all();
    };

    match store.get(&folder_id).await {
        Ok(Some(folder)) if folder.is_folder() => BookmarkContext {
            folder_id: Some(folder.id),
            folder_name: folder.title,
            parent_id: folder.parent_id,
        },
        Ok(_) => BookmarkContext::all(),
        Err(e) => {
            warn!("failed to detect bookmark context: {e}");
            BookmarkContext::all()
        }
    }
}
