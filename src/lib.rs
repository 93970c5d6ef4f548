//! Loomfs: Virtual Filesystem Overlay for Remote Workspace Items
//!
//! Edits and publishes remotely-hosted, tree-shaped collections of multi-part
//! documents through ordinary filesystem verbs, caching remote state locally
//! and tracking which local changes still need to be pushed.

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod names;
pub mod overlay;
pub mod parts;
pub mod path;
pub mod publish;
pub mod remote;
pub mod types;

pub use config::OverlayConfig;
pub use error::OverlayError;
pub use overlay::{Overlay, WriteOptions};
pub use types::{EntryKind, FileStat, PublishAction};
