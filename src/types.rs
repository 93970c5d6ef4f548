//! Core types shared across the overlay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a directory entry as seen through the filesystem surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Directory,
}

/// Stat result for a node.
///
/// Remote resources have no native timestamps, so everything beyond the kind
/// is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub kind: EntryKind,
    pub size: Option<u64>,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

impl FileStat {
    pub fn directory() -> Self {
        FileStat {
            kind: EntryKind::Directory,
            size: None,
            created: None,
            modified: None,
        }
    }

    pub fn file(size: u64) -> Self {
        FileStat {
            kind: EntryKind::File,
            size: Some(size),
            created: None,
            modified: None,
        }
    }
}

/// Pending publish state of an item.
///
/// `None` means the item matches the remote; the other three name the remote
/// call the next publish will issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublishAction {
    None,
    Create,
    Modify,
    Delete,
}

/// Lazy-load state of one cache dimension (stats or children).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    NotLoaded,
    Loading,
    Loaded,
}
