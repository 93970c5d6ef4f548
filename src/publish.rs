//! Publish tracking and long-running-operation polling
//!
//! The tracker records, per item cache key, which remote call the next
//! publish will issue. It is kept separate from the node cache so decoration
//! layers can ask "does this path have unpublished changes" without touching
//! nodes. Entries appear on write/create, survive failed publishes, and are
//! removed on successful publish or explicit reload.

use crate::error::OverlayError;
use crate::remote::{ItemSummary, OperationStatus, RemoteClient, RemoteFault};
use crate::types::PublishAction;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// What a local delete amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteDisposition {
    /// The item only ever existed locally; nothing to tell the remote.
    LocalOnly,
    /// The delete is recorded and will be published.
    Recorded,
}

/// Dirty-item registry: `item cache key -> pending publish action`.
#[derive(Default)]
pub struct PublishTracker {
    entries: RwLock<HashMap<String, PublishAction>>,
}

impl PublishTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an edit. `brand_new` marks items that do not exist remotely
    /// yet: their first edit is a create, and further edits keep the create
    /// pending rather than downgrading it to a modify.
    pub fn record_edit(&self, key: &str, brand_new: bool) {
        let mut entries = self.entries.write();
        match entries.get(key) {
            Some(PublishAction::Create) | Some(PublishAction::Delete) => {}
            _ => {
                let action = if brand_new {
                    PublishAction::Create
                } else {
                    PublishAction::Modify
                };
                entries.insert(key.to_string(), action);
            }
        }
    }

    /// Record a delete. An item still pending create has never been
    /// published, so its entry just disappears.
    pub fn record_delete(&self, key: &str) -> DeleteDisposition {
        let mut entries = self.entries.write();
        if entries.get(key) == Some(&PublishAction::Create) {
            entries.remove(key);
            return DeleteDisposition::LocalOnly;
        }
        entries.insert(key.to_string(), PublishAction::Delete);
        DeleteDisposition::Recorded
    }

    /// Force a specific pending action (cross-folder moves record a create
    /// at the destination key directly).
    pub fn set(&self, key: &str, action: PublishAction) {
        if action == PublishAction::None {
            self.entries.write().remove(key);
        } else {
            self.entries.write().insert(key.to_string(), action);
        }
    }

    pub fn action(&self, key: &str) -> PublishAction {
        self.entries
            .read()
            .get(key)
            .copied()
            .unwrap_or(PublishAction::None)
    }

    /// Remove the entry after a successful publish.
    pub fn clear(&self, key: &str) {
        self.entries.write().remove(key);
    }

    /// Drop every entry at or under `prefix` (explicit reload).
    pub fn clear_prefix(&self, prefix: &str) {
        self.entries
            .write()
            .retain(|key, _| !crate::path::key_under(key, prefix));
    }

    /// Decoration query: any unpublished change at or under this key?
    pub fn is_dirty_under(&self, prefix: &str) -> bool {
        self.entries
            .read()
            .keys()
            .any(|key| crate::path::key_under(key, prefix))
    }

    pub fn entries(&self) -> Vec<(String, PublishAction)> {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }
}

/// Backoff schedule for polling accepted-but-pending operations.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(8),
        }
    }
}

/// Poll a long-running operation to a terminal state, following the
/// redirect-style location pointers the remote returns. The backoff doubles
/// from `initial` up to `max`, honoring an explicit retry-after when the
/// remote supplies one. A failed poll step surfaces the remote's error
/// payload verbatim and is not retried beyond this loop.
pub async fn await_operation(
    remote: &dyn RemoteClient,
    location: &str,
    policy: &PollPolicy,
) -> Result<Option<ItemSummary>, OverlayError> {
    let mut delay = policy.initial;
    let mut location = location.to_string();
    loop {
        sleep(delay).await;
        let poll = remote.poll_operation(&location).await?;
        match poll.status {
            OperationStatus::Running => {
                if let Some(next) = poll.location {
                    location = next;
                }
                delay = match poll.retry_after_secs {
                    Some(secs) => Duration::from_secs(secs).min(policy.max),
                    None => (delay * 2).min(policy.max),
                };
            }
            OperationStatus::Succeeded => {
                debug!(location = %location, "operation completed");
                return match poll.location {
                    Some(result) => Ok(Some(remote.operation_result(&result).await?)),
                    None => Ok(None),
                };
            }
            OperationStatus::Failed => {
                return Err(poll
                    .error
                    .map(RemoteFault::into_error)
                    .unwrap_or_else(|| OverlayError::remote("operation failed", None)));
            }
        }
    }
}
