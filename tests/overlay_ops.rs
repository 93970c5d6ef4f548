//! End-to-end tests for the filesystem overlay against an in-memory remote.

use async_trait::async_trait;
use loomfs::error::OverlayError;
use loomfs::overlay::{Overlay, WriteOptions};
use loomfs::remote::{
    CollectionSummary, ItemDefinition, ItemPart, ItemSummary, OperationPoll, OperationStatus,
    Page, RemoteClient, Submitted,
};
use loomfs::types::{EntryKind, PublishAction};
use loomfs::OverlayConfig;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Call counters, one per remote endpoint the tests care about.
#[derive(Default)]
struct Calls {
    list_collections: AtomicUsize,
    list_items: AtomicUsize,
    get_item_definition: AtomicUsize,
    update_item_definition: AtomicUsize,
    update_item_metadata: AtomicUsize,
    create_item: AtomicUsize,
    delete_item: AtomicUsize,
    poll_operation: AtomicUsize,
}

/// In-memory remote double with pagination, optional listing latency, and a
/// scriptable long-running create.
struct FakeRemote {
    collections: Vec<CollectionSummary>,
    items: Mutex<Vec<(ItemSummary, ItemDefinition)>>,
    page_size: usize,
    list_delay: Duration,
    pending_create: bool,
    polls: Mutex<Vec<OperationPoll>>,
    operation_outcome: Mutex<Option<ItemSummary>>,
    calls: Calls,
}

impl FakeRemote {
    fn new() -> Self {
        FakeRemote {
            collections: Vec::new(),
            items: Mutex::new(Vec::new()),
            page_size: 100,
            list_delay: Duration::ZERO,
            pending_create: false,
            polls: Mutex::new(Vec::new()),
            operation_outcome: Mutex::new(None),
            calls: Calls::default(),
        }
    }

    fn with_collection(mut self, name: &str) -> Self {
        self.collections.push(CollectionSummary {
            id: Uuid::new_v4().to_string(),
            display_name: name.to_string(),
            description: None,
        });
        self
    }

    fn collection_id(&self, name: &str) -> String {
        self.collections
            .iter()
            .find(|c| c.display_name == name)
            .unwrap()
            .id
            .clone()
    }

    fn add_item(
        &self,
        collection: &str,
        item_type: &str,
        name: &str,
        parts: Vec<ItemPart>,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let summary = ItemSummary {
            id: id.clone(),
            collection_id: self.collection_id(collection),
            display_name: name.to_string(),
            item_type: item_type.to_string(),
            description: None,
            modified: None,
        };
        self.items
            .lock()
            .push((summary, ItemDefinition { parts }));
        id
    }

    fn definition_of(&self, item_id: &str) -> ItemDefinition {
        self.items
            .lock()
            .iter()
            .find(|(s, _)| s.id == item_id)
            .map(|(_, d)| d.clone())
            .unwrap()
    }

    fn page<T: Clone>(&self, all: Vec<T>, continuation: Option<&str>) -> Page<T> {
        let start: usize = continuation.map(|c| c.parse().unwrap()).unwrap_or(0);
        let end = (start + self.page_size).min(all.len());
        let continuation = if end < all.len() {
            Some(end.to_string())
        } else {
            None
        };
        Page {
            value: all[start..end].to_vec(),
            continuation,
        }
    }
}

#[async_trait]
impl RemoteClient for FakeRemote {
    async fn list_collections(
        &self,
        continuation: Option<&str>,
    ) -> Result<Page<CollectionSummary>, OverlayError> {
        self.calls.list_collections.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.list_delay).await;
        Ok(self.page(self.collections.clone(), continuation))
    }

    async fn get_collection(&self, id: &str) -> Result<CollectionSummary, OverlayError> {
        self.collections
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| OverlayError::NotFound(id.to_string()))
    }

    async fn list_items(
        &self,
        collection_id: &str,
        item_type: Option<&str>,
        continuation: Option<&str>,
    ) -> Result<Page<ItemSummary>, OverlayError> {
        self.calls.list_items.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.list_delay).await;
        let all: Vec<ItemSummary> = self
            .items
            .lock()
            .iter()
            .map(|(s, _)| s.clone())
            .filter(|s| s.collection_id == collection_id)
            .filter(|s| item_type.map(|t| s.item_type == t).unwrap_or(true))
            .collect();
        Ok(self.page(all, continuation))
    }

    async fn get_item(
        &self,
        _collection_id: &str,
        item_id: &str,
    ) -> Result<ItemSummary, OverlayError> {
        self.items
            .lock()
            .iter()
            .find(|(s, _)| s.id == item_id)
            .map(|(s, _)| s.clone())
            .ok_or_else(|| OverlayError::NotFound(item_id.to_string()))
    }

    async fn get_item_definition(
        &self,
        _collection_id: &str,
        item_id: &str,
        _format: Option<&str>,
    ) -> Result<ItemDefinition, OverlayError> {
        self.calls.get_item_definition.fetch_add(1, Ordering::SeqCst);
        self.items
            .lock()
            .iter()
            .find(|(s, _)| s.id == item_id)
            .map(|(_, d)| d.clone())
            .ok_or_else(|| OverlayError::NotFound(item_id.to_string()))
    }

    async fn update_item_definition(
        &self,
        _collection_id: &str,
        item_id: &str,
        definition: &ItemDefinition,
    ) -> Result<Submitted<()>, OverlayError> {
        self.calls
            .update_item_definition
            .fetch_add(1, Ordering::SeqCst);
        let mut items = self.items.lock();
        let entry = items
            .iter_mut()
            .find(|(s, _)| s.id == item_id)
            .ok_or_else(|| OverlayError::NotFound(item_id.to_string()))?;
        entry.1 = definition.clone();
        Ok(Submitted::Complete(()))
    }

    async fn create_item(
        &self,
        collection_id: &str,
        display_name: &str,
        item_type: &str,
        definition: Option<&ItemDefinition>,
    ) -> Result<Submitted<ItemSummary>, OverlayError> {
        self.calls.create_item.fetch_add(1, Ordering::SeqCst);
        let summary = ItemSummary {
            id: Uuid::new_v4().to_string(),
            collection_id: collection_id.to_string(),
            display_name: display_name.to_string(),
            item_type: item_type.to_string(),
            description: None,
            modified: None,
        };
        self.items.lock().push((
            summary.clone(),
            definition.cloned().unwrap_or_default(),
        ));
        if self.pending_create {
            *self.operation_outcome.lock() = Some(summary);
            return Ok(Submitted::Pending {
                location: "op/start".to_string(),
            });
        }
        Ok(Submitted::Complete(summary))
    }

    async fn update_item_metadata(
        &self,
        _collection_id: &str,
        item_id: &str,
        display_name: Option<&str>,
        description: Option<&str>,
    ) -> Result<(), OverlayError> {
        self.calls
            .update_item_metadata
            .fetch_add(1, Ordering::SeqCst);
        let mut items = self.items.lock();
        let entry = items
            .iter_mut()
            .find(|(s, _)| s.id == item_id)
            .ok_or_else(|| OverlayError::NotFound(item_id.to_string()))?;
        if let Some(name) = display_name {
            entry.0.display_name = name.to_string();
        }
        if let Some(description) = description {
            entry.0.description = Some(description.to_string());
        }
        Ok(())
    }

    async fn delete_item(
        &self,
        _collection_id: &str,
        item_id: &str,
    ) -> Result<(), OverlayError> {
        self.calls.delete_item.fetch_add(1, Ordering::SeqCst);
        self.items.lock().retain(|(s, _)| s.id != item_id);
        Ok(())
    }

    async fn poll_operation(&self, _location: &str) -> Result<OperationPoll, OverlayError> {
        self.calls.poll_operation.fetch_add(1, Ordering::SeqCst);
        Ok(self.polls.lock().remove(0))
    }

    async fn operation_result(&self, _location: &str) -> Result<ItemSummary, OverlayError> {
        Ok(self.operation_outcome.lock().clone().unwrap())
    }
}

fn fast_config() -> OverlayConfig {
    OverlayConfig {
        poll_initial_ms: 1,
        poll_max_ms: 4,
        ..OverlayConfig::default()
    }
}

fn overlay_over(remote: Arc<FakeRemote>) -> Overlay {
    Overlay::new(fast_config(), remote)
}

/// List the root so collection names resolve, the way a tree view would.
async fn prime(overlay: &Overlay) {
    overlay.read_directory("loom://").await.unwrap();
}

#[tokio::test]
async fn test_root_listing_follows_continuations_and_registers_names() {
    let mut remote = FakeRemote::new()
        .with_collection("Sales")
        .with_collection("Finance");
    remote.page_size = 1;
    let remote = Arc::new(remote);
    let overlay = overlay_over(remote.clone());

    let listing = overlay.read_directory("loom://").await.unwrap();
    assert_eq!(
        listing,
        vec![
            ("Sales".to_string(), EntryKind::Directory),
            ("Finance".to_string(), EntryKind::Directory),
        ]
    );
    // Two pages followed to exhaustion before returning.
    assert_eq!(remote.calls.list_collections.load(Ordering::SeqCst), 2);
    assert!(overlay.names().resolve_collection("Sales").is_some());

    // Collection paths now resolve without another root listing.
    let stat = overlay.stat("loom://Sales").await.unwrap();
    assert_eq!(stat.kind, EntryKind::Directory);
}

#[tokio::test]
async fn test_unresolvable_name_fails_before_any_remote_call() {
    let remote = Arc::new(FakeRemote::new().with_collection("Sales"));
    let overlay = overlay_over(remote.clone());

    let err = overlay.stat("loom://Nope/notebooks").await.unwrap_err();
    assert!(matches!(err, OverlayError::NotFound(_)));
    assert_eq!(remote.calls.list_collections.load(Ordering::SeqCst), 0);
    assert_eq!(remote.calls.list_items.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_type_folder_is_invalid() {
    let remote = Arc::new(FakeRemote::new().with_collection("Sales"));
    let overlay = overlay_over(remote);
    prime(&overlay).await;

    let err = overlay
        .read_directory("loom://Sales/spreadsheets")
        .await
        .unwrap_err();
    assert!(matches!(err, OverlayError::NotFound(_)));
}

#[tokio::test]
async fn test_single_flight_children_load() {
    let mut remote = FakeRemote::new().with_collection("Sales");
    remote.list_delay = Duration::from_millis(40);
    let remote = Arc::new(remote);
    remote.add_item("Sales", "Notebook", "Forecast", vec![]);

    let overlay = Arc::new(overlay_over(remote.clone()));
    prime(&overlay).await;
    let listings_before = remote.calls.list_items.load(Ordering::SeqCst);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let overlay = overlay.clone();
        handles.push(tokio::spawn(async move {
            overlay.read_directory("loom://Sales/notebooks").await.unwrap()
        }));
    }
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    // Exactly one remote list call served all eight callers, and everyone
    // observed the same children.
    assert_eq!(
        remote.calls.list_items.load(Ordering::SeqCst) - listings_before,
        1
    );
    for result in &results {
        assert_eq!(result, &results[0]);
    }
    assert_eq!(results[0], vec![("Forecast".to_string(), EntryKind::Directory)]);
}

#[tokio::test]
async fn test_notebook_scenario_read_edit_publish() {
    let remote = Arc::new(FakeRemote::new().with_collection("Sales"));
    let item_id = remote.add_item(
        "Sales",
        "Notebook",
        "Forecast",
        vec![ItemPart::inline("notebook-content.py", "cHJpbnQoMSk=")],
    );
    let overlay = overlay_over(remote.clone());
    prime(&overlay).await;
    overlay.read_directory("loom://Sales/notebooks").await.unwrap();

    let listing = overlay
        .read_directory("loom://Sales/notebooks/Forecast")
        .await
        .unwrap();
    assert_eq!(
        listing,
        vec![("notebook-content.py".to_string(), EntryKind::File)]
    );
    let content = overlay
        .read_file("loom://Sales/notebooks/Forecast/notebook-content.py")
        .await
        .unwrap();
    assert_eq!(content, b"print(1)");

    overlay
        .write_file(
            "loom://Sales/notebooks/Forecast/notebook-content.py",
            b"print(2)",
            WriteOptions::default(),
        )
        .await
        .unwrap();
    assert!(overlay.has_unpublished("loom://Sales/notebooks/Forecast"));
    assert!(overlay.has_unpublished("loom://Sales"));

    overlay.publish("loom://Sales/notebooks/Forecast").await.unwrap();

    // Exactly one definition update carrying the single edited part.
    assert_eq!(remote.calls.update_item_definition.load(Ordering::SeqCst), 1);
    let published = remote.definition_of(&item_id);
    assert_eq!(published.parts.len(), 1);
    assert_eq!(published.parts[0].path, "notebook-content.py");
    assert_eq!(published.parts[0].payload, "cHJpbnQoMik=");
    assert!(!overlay.has_unpublished("loom://Sales/notebooks/Forecast"));
}

#[tokio::test]
async fn test_create_publish_transitions() {
    let remote = Arc::new(FakeRemote::new().with_collection("Sales"));
    let overlay = overlay_over(remote.clone());
    prime(&overlay).await;

    overlay
        .create_directory("loom://Sales/notebooks/Fresh")
        .await
        .unwrap();
    overlay
        .write_file(
            "loom://Sales/notebooks/Fresh/cell.py",
            b"print('hi')",
            WriteOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(
        overlay.tracker().action("Sales/notebooks/Fresh"),
        PublishAction::Create
    );

    overlay.publish("loom://Sales/notebooks/Fresh").await.unwrap();
    assert_eq!(remote.calls.create_item.load(Ordering::SeqCst), 1);

    // Published create transitions the node to modify; the name now resolves
    // to the returned id.
    let node = overlay.cache().get("Sales/notebooks/Fresh").unwrap();
    let item = node.item_state().unwrap();
    assert_eq!(*item.publish_action.read(), PublishAction::Modify);
    assert!(item.remote_id().is_some());

    // A subsequent edit stays a modify and publishes as an update.
    overlay
        .write_file(
            "loom://Sales/notebooks/Fresh/cell.py",
            b"print('bye')",
            WriteOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(
        overlay.tracker().action("Sales/notebooks/Fresh"),
        PublishAction::Modify
    );
    overlay.publish("loom://Sales/notebooks/Fresh").await.unwrap();
    assert_eq!(remote.calls.create_item.load(Ordering::SeqCst), 1);
    assert_eq!(remote.calls.update_item_definition.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_local_item_listed_before_publish() {
    let remote = Arc::new(FakeRemote::new().with_collection("Sales"));
    let overlay = overlay_over(remote);
    prime(&overlay).await;

    overlay
        .create_directory("loom://Sales/notebooks/Draft")
        .await
        .unwrap();
    let listing = overlay
        .read_directory("loom://Sales/notebooks")
        .await
        .unwrap();
    assert!(listing.contains(&("Draft".to_string(), EntryKind::Directory)));

    // Valid path before any listing confirms it.
    let stat = overlay.stat("loom://Sales/notebooks/Draft").await.unwrap();
    assert_eq!(stat.kind, EntryKind::Directory);
}

#[tokio::test]
async fn test_delete_of_unpublished_create_never_reaches_remote() {
    let remote = Arc::new(FakeRemote::new().with_collection("Sales"));
    let overlay = overlay_over(remote.clone());
    prime(&overlay).await;

    overlay
        .create_directory("loom://Sales/notebooks/Scratch")
        .await
        .unwrap();
    overlay.delete("loom://Sales/notebooks/Scratch").await.unwrap();

    assert!(overlay.cache().get("Sales/notebooks/Scratch").is_none());
    assert!(!overlay.has_unpublished("loom://Sales"));
    overlay.publish_all().await;
    assert_eq!(remote.calls.create_item.load(Ordering::SeqCst), 0);
    assert_eq!(remote.calls.delete_item.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_delete_of_remote_item_publishes_and_detaches() {
    let remote = Arc::new(FakeRemote::new().with_collection("Sales"));
    remote.add_item("Sales", "Notebook", "Old", vec![]);
    let overlay = overlay_over(remote.clone());
    prime(&overlay).await;
    overlay.read_directory("loom://Sales/notebooks").await.unwrap();

    overlay.delete("loom://Sales/notebooks/Old").await.unwrap();
    assert_eq!(
        overlay.tracker().action("Sales/notebooks/Old"),
        PublishAction::Delete
    );

    overlay.publish("loom://Sales/notebooks/Old").await.unwrap();
    assert_eq!(remote.calls.delete_item.load(Ordering::SeqCst), 1);
    assert!(overlay.cache().get("Sales/notebooks/Old").is_none());
    let listing = overlay
        .read_directory("loom://Sales/notebooks")
        .await
        .unwrap();
    assert!(!listing.iter().any(|(n, _)| n == "Old"));
}

#[tokio::test]
async fn test_rename_part_across_items_marks_both_dirty() {
    let remote = Arc::new(FakeRemote::new().with_collection("Sales"));
    remote.add_item(
        "Sales",
        "Notebook",
        "A",
        vec![ItemPart::inline("shared.py", "YQ==")],
    );
    remote.add_item("Sales", "Notebook", "B", vec![]);
    let overlay = overlay_over(remote);
    prime(&overlay).await;
    overlay.read_directory("loom://Sales/notebooks").await.unwrap();

    overlay
        .rename(
            "loom://Sales/notebooks/A/shared.py",
            "loom://Sales/notebooks/B/moved.py",
        )
        .await
        .unwrap();

    assert_eq!(
        overlay.tracker().action("Sales/notebooks/A"),
        PublishAction::Modify
    );
    assert_eq!(
        overlay.tracker().action("Sales/notebooks/B"),
        PublishAction::Modify
    );
    let content = overlay
        .read_file("loom://Sales/notebooks/B/moved.py")
        .await
        .unwrap();
    assert_eq!(content, b"a");
    let err = overlay
        .read_file("loom://Sales/notebooks/A/shared.py")
        .await
        .unwrap_err();
    assert!(matches!(err, OverlayError::NotFound(_)));
}

#[tokio::test]
async fn test_rename_folder_fans_out_and_rejects_collisions() {
    let remote = Arc::new(FakeRemote::new().with_collection("Sales"));
    remote.add_item(
        "Sales",
        "Notebook",
        "A",
        vec![
            ItemPart::inline("src/a.py", "YQ=="),
            ItemPart::inline("src/deep/b.py", "Yg=="),
            ItemPart::inline("lib/a.py", "eA=="),
        ],
    );
    let overlay = overlay_over(remote);
    prime(&overlay).await;
    overlay.read_directory("loom://Sales/notebooks").await.unwrap();

    // Destination already holds lib/a.py: the whole move must fail and leave
    // the source untouched.
    let err = overlay
        .rename("loom://Sales/notebooks/A/src", "loom://Sales/notebooks/A/lib")
        .await
        .unwrap_err();
    assert!(matches!(err, OverlayError::AlreadyExists(_)));
    assert_eq!(
        overlay
            .read_file("loom://Sales/notebooks/A/src/a.py")
            .await
            .unwrap(),
        b"a"
    );
    assert!(!overlay.has_unpublished("loom://Sales/notebooks/A"));

    overlay
        .rename("loom://Sales/notebooks/A/src", "loom://Sales/notebooks/A/pkg")
        .await
        .unwrap();
    assert_eq!(
        overlay
            .read_file("loom://Sales/notebooks/A/pkg/deep/b.py")
            .await
            .unwrap(),
        b"b"
    );
}

#[tokio::test]
async fn test_rename_item_same_parent_is_pure_rename() {
    let remote = Arc::new(FakeRemote::new().with_collection("Sales"));
    let item_id = remote.add_item("Sales", "Notebook", "Old", vec![]);
    let overlay = overlay_over(remote.clone());
    prime(&overlay).await;
    overlay.read_directory("loom://Sales/notebooks").await.unwrap();

    overlay
        .rename("loom://Sales/notebooks/Old", "loom://Sales/notebooks/New")
        .await
        .unwrap();

    // One modify entry, the table points the new name at the old id, and the
    // parent listing follows.
    assert_eq!(
        overlay.tracker().action("Sales/notebooks/New"),
        PublishAction::Modify
    );
    assert_eq!(
        overlay.tracker().action("Sales/notebooks/Old"),
        PublishAction::None
    );
    let collection_id = remote.collection_id("Sales");
    assert_eq!(
        overlay
            .names()
            .resolve_item(&collection_id, "notebooks", "New")
            .as_deref(),
        Some(item_id.as_str())
    );
    let listing = overlay
        .read_directory("loom://Sales/notebooks")
        .await
        .unwrap();
    assert!(listing.iter().any(|(n, _)| n == "New"));
    assert!(!listing.iter().any(|(n, _)| n == "Old"));

    // Publishing pushes the metadata rename.
    overlay.publish("loom://Sales/notebooks/New").await.unwrap();
    assert_eq!(remote.calls.update_item_metadata.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rename_item_across_collections_is_delete_then_add() {
    let remote = Arc::new(
        FakeRemote::new()
            .with_collection("Sales")
            .with_collection("Finance"),
    );
    remote.add_item(
        "Sales",
        "Notebook",
        "Forecast",
        vec![ItemPart::inline("cell.py", "YQ==")],
    );
    let overlay = overlay_over(remote);
    prime(&overlay).await;
    overlay.read_directory("loom://Sales/notebooks").await.unwrap();

    overlay
        .rename(
            "loom://Sales/notebooks/Forecast",
            "loom://Finance/notebooks/Forecast",
        )
        .await
        .unwrap();

    // Two tracker entries: the addressing scheme has no native move.
    assert_eq!(
        overlay.tracker().action("Sales/notebooks/Forecast"),
        PublishAction::Delete
    );
    assert_eq!(
        overlay.tracker().action("Finance/notebooks/Forecast"),
        PublishAction::Create
    );
    // The destination carries the full part list.
    let content = overlay
        .read_file("loom://Finance/notebooks/Forecast/cell.py")
        .await
        .unwrap();
    assert_eq!(content, b"a");
}

#[tokio::test]
async fn test_reload_discards_cache_and_refetches() {
    let remote = Arc::new(FakeRemote::new().with_collection("Sales"));
    remote.add_item("Sales", "Notebook", "Forecast", vec![]);
    let overlay = overlay_over(remote.clone());
    prime(&overlay).await;

    overlay.read_directory("loom://Sales/notebooks").await.unwrap();
    assert_eq!(remote.calls.list_items.load(Ordering::SeqCst), 1);

    // A cached second read is free.
    overlay.read_directory("loom://Sales/notebooks").await.unwrap();
    assert_eq!(remote.calls.list_items.load(Ordering::SeqCst), 1);

    overlay.reload("loom://Sales");
    overlay.read_directory("loom://Sales/notebooks").await.unwrap();
    assert_eq!(remote.calls.list_items.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_reload_drops_pending_edits() {
    let remote = Arc::new(FakeRemote::new().with_collection("Sales"));
    remote.add_item(
        "Sales",
        "Notebook",
        "Forecast",
        vec![ItemPart::inline("cell.py", "YQ==")],
    );
    let overlay = overlay_over(remote);
    prime(&overlay).await;
    overlay.read_directory("loom://Sales/notebooks").await.unwrap();

    overlay
        .write_file(
            "loom://Sales/notebooks/Forecast/cell.py",
            b"edited",
            WriteOptions::default(),
        )
        .await
        .unwrap();
    assert!(overlay.has_unpublished("loom://Sales"));

    overlay.reload("loom://Sales/notebooks/Forecast");
    assert!(!overlay.has_unpublished("loom://Sales"));
    // The next read comes from a fresh remote load, not the edited cache.
    let content = overlay
        .read_file("loom://Sales/notebooks/Forecast/cell.py")
        .await
        .unwrap();
    assert_eq!(content, b"a");
}

#[tokio::test]
async fn test_read_only_overlay_rejects_mutations() {
    let remote = Arc::new(FakeRemote::new().with_collection("Sales"));
    let config = OverlayConfig {
        read_only: true,
        ..fast_config()
    };
    let overlay = Overlay::new(config, remote);
    prime(&overlay).await;

    let err = overlay
        .write_file("loom://Sales/notebooks/A/x.py", b"x", WriteOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, OverlayError::NoPermissions(_)));
    let err = overlay
        .create_directory("loom://Sales/notebooks/A")
        .await
        .unwrap_err();
    assert!(matches!(err, OverlayError::NoPermissions(_)));
}

#[tokio::test]
async fn test_structurally_unsupported_writes() {
    let remote = Arc::new(FakeRemote::new().with_collection("Sales"));
    let overlay = overlay_over(remote);
    prime(&overlay).await;

    // Writing a file directly under a collection or type folder is not a
    // thing the tree supports.
    let err = overlay
        .write_file("loom://Sales/notebooks", b"x", WriteOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, OverlayError::Unavailable(_)));
    let err = overlay.delete("loom://Sales").await.unwrap_err();
    assert!(matches!(err, OverlayError::Unavailable(_)));
}

#[tokio::test]
async fn test_pending_create_polls_to_completion() {
    let mut remote = FakeRemote::new().with_collection("Sales");
    remote.pending_create = true;
    let remote = Arc::new(remote);
    *remote.polls.lock() = vec![
        OperationPoll {
            status: OperationStatus::Running,
            location: Some("op/next".into()),
            retry_after_secs: None,
            error: None,
        },
        OperationPoll {
            status: OperationStatus::Succeeded,
            location: Some("op/result".into()),
            retry_after_secs: None,
            error: None,
        },
    ];

    let overlay = overlay_over(remote.clone());
    prime(&overlay).await;
    overlay
        .create_directory("loom://Sales/notebooks/Slow")
        .await
        .unwrap();
    overlay
        .write_file(
            "loom://Sales/notebooks/Slow/cell.py",
            b"print(3)",
            WriteOptions::default(),
        )
        .await
        .unwrap();

    overlay.publish("loom://Sales/notebooks/Slow").await.unwrap();

    assert_eq!(remote.calls.poll_operation.load(Ordering::SeqCst), 2);
    let node = overlay.cache().get("Sales/notebooks/Slow").unwrap();
    let item = node.item_state().unwrap();
    assert!(item.remote_id().is_some());
    assert_eq!(*item.publish_action.read(), PublishAction::Modify);
}

#[tokio::test]
async fn test_failed_publish_keeps_item_dirty() {
    let remote = Arc::new(FakeRemote::new().with_collection("Sales"));
    remote.add_item(
        "Sales",
        "Notebook",
        "Forecast",
        vec![ItemPart::inline("cell.py", "YQ==")],
    );
    let overlay = overlay_over(remote.clone());
    prime(&overlay).await;
    overlay.read_directory("loom://Sales/notebooks").await.unwrap();

    overlay
        .write_file(
            "loom://Sales/notebooks/Forecast/cell.py",
            b"edited",
            WriteOptions::default(),
        )
        .await
        .unwrap();

    // Sabotage: the item vanishes remotely, so the update fails.
    remote.items.lock().clear();
    let err = overlay
        .publish("loom://Sales/notebooks/Forecast")
        .await
        .unwrap_err();
    assert!(matches!(err, OverlayError::NotFound(_)));
    // The entry stays so the caller can retry publish later.
    assert_eq!(
        overlay.tracker().action("Sales/notebooks/Forecast"),
        PublishAction::Modify
    );
}

#[tokio::test]
async fn test_singular_definition_file_uses_item_name() {
    let remote = Arc::new(FakeRemote::new().with_collection("Sales"));
    let item_id = remote.add_item(
        "Sales",
        "SemanticModel",
        "Revenue",
        vec![ItemPart::inline("definition.bim", "e30=")],
    );
    let overlay = overlay_over(remote.clone());
    prime(&overlay).await;
    overlay.read_directory("loom://Sales/models").await.unwrap();

    // Presented under the item's display name, not the canonical file name.
    let listing = overlay
        .read_directory("loom://Sales/models/Revenue")
        .await
        .unwrap();
    assert_eq!(listing, vec![("Revenue.bim".to_string(), EntryKind::File)]);

    overlay
        .write_file(
            "loom://Sales/models/Revenue/Revenue.bim",
            b"{\"tables\":[]}",
            WriteOptions::default(),
        )
        .await
        .unwrap();
    overlay.publish("loom://Sales/models/Revenue").await.unwrap();

    // The publish payload swaps back to the canonical definition file name.
    let published = remote.definition_of(&item_id);
    assert_eq!(published.parts.len(), 1);
    assert_eq!(published.parts[0].path, "definition.bim");
}

#[tokio::test]
async fn test_unsupported_definition_type_skips_update_with_notice() {
    let remote = Arc::new(FakeRemote::new().with_collection("Sales"));
    remote.add_item(
        "Sales",
        "Dashboard",
        "KPIs",
        vec![ItemPart::inline("state.json", "e30=")],
    );
    let overlay = overlay_over(remote.clone());
    prime(&overlay).await;
    overlay.read_directory("loom://Sales/dashboards").await.unwrap();

    overlay
        .write_file(
            "loom://Sales/dashboards/KPIs/state.json",
            b"{\"tiles\":1}",
            WriteOptions::default(),
        )
        .await
        .unwrap();
    overlay.publish("loom://Sales/dashboards/KPIs").await.unwrap();

    // The type cannot take definition updates; publish clears the entry
    // without calling the endpoint.
    assert_eq!(remote.calls.update_item_definition.load(Ordering::SeqCst), 0);
    assert!(!overlay.has_unpublished("loom://Sales/dashboards/KPIs"));
}

#[tokio::test]
async fn test_description_edit_publishes_metadata() {
    let remote = Arc::new(FakeRemote::new().with_collection("Sales"));
    let item_id = remote.add_item("Sales", "Notebook", "Forecast", vec![]);
    let overlay = overlay_over(remote.clone());
    prime(&overlay).await;
    overlay.read_directory("loom://Sales/notebooks").await.unwrap();

    overlay
        .set_description("loom://Sales/notebooks/Forecast", Some("quarterly forecast"))
        .await
        .unwrap();
    assert!(overlay.has_unpublished("loom://Sales/notebooks/Forecast"));

    overlay.publish("loom://Sales/notebooks/Forecast").await.unwrap();
    assert_eq!(remote.calls.update_item_metadata.load(Ordering::SeqCst), 1);
    // Parts were never loaded locally, so no definition update goes out.
    assert_eq!(remote.calls.update_item_definition.load(Ordering::SeqCst), 0);
    let stored = remote
        .items
        .lock()
        .iter()
        .find(|(s, _)| s.id == item_id)
        .map(|(s, _)| s.description.clone())
        .unwrap();
    assert_eq!(stored.as_deref(), Some("quarterly forecast"));
}

#[tokio::test]
async fn test_publish_all_reports_per_item_outcomes() {
    let remote = Arc::new(FakeRemote::new().with_collection("Sales"));
    remote.add_item(
        "Sales",
        "Notebook",
        "A",
        vec![ItemPart::inline("a.py", "YQ==")],
    );
    remote.add_item(
        "Sales",
        "Notebook",
        "B",
        vec![ItemPart::inline("b.py", "Yg==")],
    );
    let overlay = overlay_over(remote.clone());
    prime(&overlay).await;
    overlay.read_directory("loom://Sales/notebooks").await.unwrap();

    for item in ["A", "B"] {
        let path = format!("loom://Sales/notebooks/{}/{}.py", item, item.to_lowercase());
        overlay
            .write_file(&path, b"edited", WriteOptions::default())
            .await
            .unwrap();
    }

    let results = overlay.publish_all().await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|(_, outcome)| outcome.is_ok()));
    assert_eq!(remote.calls.update_item_definition.load(Ordering::SeqCst), 2);
    assert!(overlay.dirty_items().is_empty());
}
