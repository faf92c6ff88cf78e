use serde::{Deserialize, Serialize};

use crate::models::bookmark::BookmarkNode;

pub const MAX_SNAPSHOTS: usize = 10;

/// One recorded relocation and/or rename of a bookmark.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Move {
    pub id: String,
    pub prev_parent_id: String,
    pub new_parent_id: String,
    /// Title right before this move.
    pub title: String,
    /// First title ever recorded for this bookmark across retained history.
    pub original_title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    pub timestamp: i64,
    pub moves: Vec<Move>,
    #[serde(default)]
    pub undone: bool,
}

impl Snapshot {
    pub fn new(moves: Vec<Move>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            moves,
            undone: false,
        }
    }
}

/// Append-only snapshot list, oldest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct SnapshotHistory(pub Vec<Snapshot>);

impl SnapshotHistory {
    /// Earliest recorded title for `id`, oldest snapshot first.
    pub fn original_title_of(&self, id: &str) -> Option<&str> {
        self.0
            .iter()
            .flat_map(|snapshot| snapshot.moves.iter())
            .find(|mv| mv.id == id)
            .map(|mv| mv.original_title.as_str())
    }

    /// Appends and prunes the oldest entries beyond [`MAX_SNAPSHOTS`].
    pub fn push(&mut self, snapshot: Snapshot) {
        self.0.push(snapshot);
        if self.0.len() > MAX_SNAPSHOTS {
            let excess = self.0.len() - MAX_SNAPSHOTS;
            self.0.drain(..excess);
        }
    }

    pub fn mark_undone(&mut self, snapshot_id: &str) -> bool {
        match self.0.iter_mut().find(|snapshot| snapshot.id == snapshot_id) {
            Some(snapshot) => {
                snapshot.undone = true;
                true
            }
            None => false,
        }
    }

    /// Snapshots still in effect, most recent first.
    pub fn live_newest_first(&self) -> impl Iterator<Item = &Snapshot> {
        self.0.iter().rev().filter(|snapshot| !snapshot.undone)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Full tree captured before the first organization ever.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OriginalState {
    pub timestamp: i64,
    pub bookmarks: Vec<BookmarkNode>,
    pub saved: bool,
}
