//! Remote service boundary
//!
//! Wire types and the `RemoteClient` trait the overlay talks through. The
//! remote service is the system of record; everything here is consumed by the
//! cache loads and the publish pipeline. A concrete HTTP binding lives in
//! [`http`].

pub mod http;

use crate::error::OverlayError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A top-level remote container holding typed items.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSummary {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// A named, typed, multi-part remote document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSummary {
    pub id: String,
    pub collection_id: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
}

/// How a part's payload is transported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartPayloadKind {
    /// Base64 text carried inline in the definition.
    #[serde(rename = "InlineBase64")]
    InlineBase64,
    /// Zero-payload marker standing in for an empty folder; its path always
    /// ends with `/`.
    #[serde(rename = "Folder")]
    FolderMarker,
}

/// One named sub-resource of an item, addressed by a slash-delimited path
/// relative to the item. The unit the remote API actually stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPart {
    pub path: String,
    pub payload: String,
    pub payload_kind: PartPayloadKind,
}

impl ItemPart {
    pub fn inline(path: impl Into<String>, payload: impl Into<String>) -> Self {
        ItemPart {
            path: path.into(),
            payload: payload.into(),
            payload_kind: PartPayloadKind::InlineBase64,
        }
    }

    pub fn folder_marker(path: impl Into<String>) -> Self {
        let mut path = path.into();
        if !path.ends_with('/') {
            path.push('/');
        }
        ItemPart {
            path,
            payload: String::new(),
            payload_kind: PartPayloadKind::FolderMarker,
        }
    }

    pub fn is_folder_marker(&self) -> bool {
        self.payload_kind == PartPayloadKind::FolderMarker
    }
}

/// Full flat part list of one item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemDefinition {
    pub parts: Vec<ItemPart>,
}

/// One page of a paginated list response. `continuation` is an opaque
/// pointer; listings must be followed until it comes back `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub value: Vec<T>,
    #[serde(default, rename = "continuationToken")]
    pub continuation: Option<String>,
}

/// Error payload the remote attaches to failed operations; passed through to
/// callers verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFault {
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}

impl RemoteFault {
    pub fn into_error(self) -> OverlayError {
        let detail = self.code.clone();
        OverlayError::remote(self.message, detail)
    }
}

/// Terminal and non-terminal states of a long-running operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    Running,
    Succeeded,
    Failed,
}

/// One poll observation of a long-running operation. On `Succeeded`,
/// `location` (when present) is the redirect to fetch the result from; the
/// final redirect may already point at the result itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationPoll {
    pub status: OperationStatus,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub retry_after_secs: Option<u64>,
    #[serde(default)]
    pub error: Option<RemoteFault>,
}

/// Outcome of a mutating call the remote may either complete inline or accept
/// for asynchronous processing.
#[derive(Debug, Clone)]
pub enum Submitted<T> {
    Complete(T),
    /// Accepted-but-pending; poll the location until terminal.
    Pending { location: String },
}

/// The remote API surface the overlay consumes.
///
/// All list endpoints are paginated via a continuation pointer. Mutating
/// endpoints that may run long return [`Submitted::Pending`].
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn list_collections(
        &self,
        continuation: Option<&str>,
    ) -> Result<Page<CollectionSummary>, OverlayError>;

    async fn get_collection(&self, id: &str) -> Result<CollectionSummary, OverlayError>;

    async fn list_items(
        &self,
        collection_id: &str,
        item_type: Option<&str>,
        continuation: Option<&str>,
    ) -> Result<Page<ItemSummary>, OverlayError>;

    async fn get_item(&self, collection_id: &str, item_id: &str)
        -> Result<ItemSummary, OverlayError>;

    async fn get_item_definition(
        &self,
        collection_id: &str,
        item_id: &str,
        format: Option<&str>,
    ) -> Result<ItemDefinition, OverlayError>;

    async fn update_item_definition(
        &self,
        collection_id: &str,
        item_id: &str,
        definition: &ItemDefinition,
    ) -> Result<Submitted<()>, OverlayError>;

    async fn create_item(
        &self,
        collection_id: &str,
        display_name: &str,
        item_type: &str,
        definition: Option<&ItemDefinition>,
    ) -> Result<Submitted<ItemSummary>, OverlayError>;

    async fn update_item_metadata(
        &self,
        collection_id: &str,
        item_id: &str,
        display_name: Option<&str>,
        description: Option<&str>,
    ) -> Result<(), OverlayError>;

    async fn delete_item(&self, collection_id: &str, item_id: &str) -> Result<(), OverlayError>;

    /// Observe a long-running operation previously accepted via
    /// [`Submitted::Pending`].
    async fn poll_operation(&self, location: &str) -> Result<OperationPoll, OverlayError>;

    /// Fetch the result an operation's final redirect points at.
    async fn operation_result(&self, location: &str) -> Result<ItemSummary, OverlayError>;
}

/// Follow collection-list continuations until exhausted.
pub async fn list_all_collections(
    remote: &dyn RemoteClient,
) -> Result<Vec<CollectionSummary>, OverlayError> {
    let mut out = Vec::new();
    let mut continuation: Option<String> = None;
    loop {
        let page = remote.list_collections(continuation.as_deref()).await?;
        out.extend(page.value);
        match page.continuation {
            Some(token) => continuation = Some(token),
            None => return Ok(out),
        }
    }
}

/// Follow item-list continuations until exhausted.
pub async fn list_all_items(
    remote: &dyn RemoteClient,
    collection_id: &str,
    item_type: Option<&str>,
) -> Result<Vec<ItemSummary>, OverlayError> {
    let mut out = Vec::new();
    let mut continuation: Option<String> = None;
    loop {
        let page = remote
            .list_items(collection_id, item_type, continuation.as_deref())
            .await?;
        out.extend(page.value);
        match page.continuation {
            Some(token) => continuation = Some(token),
            None => return Ok(out),
        }
    }
}
