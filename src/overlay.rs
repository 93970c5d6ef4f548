//! Filesystem overlay surface
//!
//! One `Overlay` owns the whole mutable state of the subsystem (the node
//! cache, the name tables, and the publish tracker) and exposes the
//! filesystem verbs over it. Callers address everything by path; the overlay
//! resolves names to ids, loads remote state lazily behind single-flight
//! gates, applies edits to the cached part lists, and pushes accumulated
//! changes on an explicit publish.

use crate::cache::load::Claim;
use crate::cache::node::{CacheNode, ItemNode, NodeVariant};
use crate::cache::CacheStore;
use crate::config::{ItemTypeSpec, OverlayConfig};
use crate::error::OverlayError;
use crate::names::NameTables;
use crate::parts::PartStore;
use crate::path::{self, NodeKind, ParsedPath};
use crate::publish::{await_operation, DeleteDisposition, PublishTracker};
use crate::remote::{self, ItemDefinition, ItemPart, RemoteClient, Submitted};
use crate::types::{EntryKind, FileStat, PublishAction};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Flags for `write_file`, mirroring the usual filesystem contract.
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    pub create: bool,
    pub overwrite: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            create: true,
            overwrite: true,
        }
    }
}

/// The item state of a node, or the structural error for non-item nodes.
fn item_of(node: &CacheNode) -> Result<&ItemNode, OverlayError> {
    node.item_state()
        .ok_or_else(|| OverlayError::Unavailable(format!("not an item: {}", node.key)))
}

/// Run `f` over an item's loaded part store.
fn with_parts<R>(
    item: &ItemNode,
    f: impl FnOnce(&PartStore) -> Result<R, OverlayError>,
) -> Result<R, OverlayError> {
    let parts = item.parts.read();
    match parts.as_ref() {
        Some(store) => f(store),
        None => Err(OverlayError::Unavailable(
            "item definition is not loaded".into(),
        )),
    }
}

fn with_parts_mut<R>(
    item: &ItemNode,
    f: impl FnOnce(&mut PartStore) -> Result<R, OverlayError>,
) -> Result<R, OverlayError> {
    let mut parts = item.parts.write();
    match parts.as_mut() {
        Some(store) => f(store),
        None => Err(OverlayError::Unavailable(
            "item definition is not loaded".into(),
        )),
    }
}

/// The virtual filesystem overlay.
pub struct Overlay {
    config: OverlayConfig,
    remote: Arc<dyn RemoteClient>,
    cache: CacheStore,
    names: NameTables,
    tracker: PublishTracker,
}

impl Overlay {
    pub fn new(config: OverlayConfig, remote: Arc<dyn RemoteClient>) -> Self {
        Overlay {
            config,
            remote,
            cache: CacheStore::new(),
            names: NameTables::new(),
            tracker: PublishTracker::new(),
        }
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    pub fn names(&self) -> &NameTables {
        &self.names
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn tracker(&self) -> &PublishTracker {
        &self.tracker
    }

    // ------------------------------------------------------------------
    // Filesystem surface
    // ------------------------------------------------------------------

    pub async fn stat(&self, p: &str) -> Result<FileStat, OverlayError> {
        let parsed = path::classify(p);
        let node = self.node_for(&parsed)?;
        match parsed.kind {
            NodeKind::Part => {
                let sub = parsed.part_path.as_deref().unwrap_or_default();
                self.ensure_parts(&node).await?;
                with_parts(item_of(&node)?, |parts| {
                    if parts.has_file(sub) {
                        Ok(FileStat::file(parts.file_size(sub)?))
                    } else if parts.folder_exists(sub) {
                        Ok(FileStat::directory())
                    } else {
                        Err(OverlayError::NotFound(parsed.cache_key()))
                    }
                })
            }
            _ => {
                self.ensure_stats(&node).await?;
                Ok(node.stat.read().clone().unwrap_or_else(FileStat::directory))
            }
        }
    }

    pub async fn read_directory(
        &self,
        p: &str,
    ) -> Result<Vec<(String, EntryKind)>, OverlayError> {
        let parsed = path::classify(p);
        let node = self.node_for(&parsed)?;
        match parsed.kind {
            NodeKind::Item | NodeKind::Part => {
                self.ensure_parts(&node).await?;
                with_parts(item_of(&node)?, |parts| {
                    parts.read_directory(parsed.part_path.as_deref().unwrap_or_default())
                })
            }
            _ => {
                self.ensure_children(&node).await?;
                Ok(node.children.read().clone())
            }
        }
    }

    pub async fn read_file(&self, p: &str) -> Result<Vec<u8>, OverlayError> {
        let parsed = path::classify(p);
        let sub = match (&parsed.kind, &parsed.part_path) {
            (NodeKind::Part, Some(sub)) => sub.clone(),
            _ => {
                return Err(OverlayError::Unavailable(format!(
                    "not a file: {}",
                    parsed.cache_key()
                )))
            }
        };
        let node = self.node_for(&parsed)?;
        self.ensure_parts(&node).await?;
        with_parts(item_of(&node)?, |parts| parts.get_content(&sub))
    }

    pub async fn write_file(
        &self,
        p: &str,
        data: &[u8],
        options: WriteOptions,
    ) -> Result<(), OverlayError> {
        self.check_writable(p)?;
        let parsed = path::classify(p);
        let sub = match (&parsed.kind, &parsed.part_path) {
            (NodeKind::Part, Some(sub)) => sub.clone(),
            _ => {
                return Err(OverlayError::Unavailable(format!(
                    "cannot write a file at {}",
                    parsed.cache_key()
                )))
            }
        };
        let node = self.node_for(&parsed)?;
        self.ensure_parts(&node).await?;
        let item = item_of(&node)?;
        let created = with_parts_mut(item, |parts| {
            parts.write_content(&sub, data, options.create, options.overwrite)
        })?;
        self.mark_item_edited(&node, item);
        debug!(key = %node.key, part = %sub, created, bytes = data.len(), "wrote part");
        Ok(())
    }

    pub async fn create_directory(&self, p: &str) -> Result<(), OverlayError> {
        self.check_writable(p)?;
        let parsed = path::classify(p);
        match (parsed.kind, parsed.part_path.as_deref()) {
            (NodeKind::Item, _) => self.create_local_item(&parsed),
            (NodeKind::Part, Some(sub)) => {
                let node = self.node_for(&parsed)?;
                self.ensure_parts(&node).await?;
                let item = item_of(&node)?;
                with_parts_mut(item, |parts| parts.create_folder(sub))?;
                self.mark_item_edited(&node, item);
                debug!(key = %node.key, folder = %sub, "created folder");
                Ok(())
            }
            _ => Err(OverlayError::Unavailable(format!(
                "cannot create a directory at {}",
                parsed.cache_key()
            ))),
        }
    }

    pub async fn delete(&self, p: &str) -> Result<(), OverlayError> {
        self.check_writable(p)?;
        let parsed = path::classify(p);
        match (parsed.kind, parsed.part_path.as_deref()) {
            (NodeKind::Item, _) => {
                let node = self.node_for(&parsed)?;
                let item = item_of(&node)?;
                match self.tracker.record_delete(&node.key) {
                    DeleteDisposition::LocalOnly => {
                        // Never published: drop it locally, no remote call.
                        self.cache.remove(&node.key);
                        self.detach_from_parent(&node.key);
                        info!(key = %node.key, "discarded local-only item");
                    }
                    DeleteDisposition::Recorded => {
                        *item.publish_action.write() = PublishAction::Delete;
                        debug!(key = %node.key, "marked item for delete");
                    }
                }
                Ok(())
            }
            (NodeKind::Part, Some(sub)) => {
                let node = self.node_for(&parsed)?;
                self.ensure_parts(&node).await?;
                let item = item_of(&node)?;
                let removed = with_parts_mut(item, |parts| parts.remove(sub))?;
                self.mark_item_edited(&node, item);
                debug!(key = %node.key, part = %sub, removed = removed.len(), "deleted parts");
                Ok(())
            }
            _ => Err(OverlayError::Unavailable(format!(
                "cannot delete {}",
                parsed.cache_key()
            ))),
        }
    }

    /// Update an item's description; pushed with the next metadata publish.
    pub async fn set_description(
        &self,
        p: &str,
        description: Option<&str>,
    ) -> Result<(), OverlayError> {
        self.check_writable(p)?;
        let parsed = path::classify(p);
        if parsed.kind != NodeKind::Item {
            return Err(OverlayError::Unavailable(format!(
                "not an item: {}",
                parsed.cache_key()
            )));
        }
        let node = self.node_for(&parsed)?;
        let item = item_of(&node)?;
        *item.description.write() = description.map(str::to_string);
        *item.metadata_dirty.write() = true;
        self.mark_item_edited(&node, item);
        debug!(key = %node.key, "updated item description");
        Ok(())
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<(), OverlayError> {
        self.check_writable(from)?;
        let parsed_from = path::classify(from);
        let parsed_to = path::classify(to);
        match (parsed_from.kind, parsed_to.kind) {
            (NodeKind::Part, NodeKind::Part) => self.rename_part(&parsed_from, &parsed_to).await,
            (NodeKind::Item, NodeKind::Item) => self.rename_item(&parsed_from, &parsed_to).await,
            _ => Err(OverlayError::Unavailable(
                "rename source and target address different node kinds".into(),
            )),
        }
    }

    // ------------------------------------------------------------------
    // Publish
    // ------------------------------------------------------------------

    /// Publish the item at `p`, or every dirty item underneath a
    /// root/collection/type-folder path.
    pub async fn publish(&self, p: &str) -> Result<(), OverlayError> {
        let parsed = path::classify(p);
        match parsed.kind {
            NodeKind::Item | NodeKind::Part => match parsed.item_key() {
                Some(key) => self.publish_key(&key).await,
                None => Err(OverlayError::NotFound(parsed.cache_key())),
            },
            _ => {
                let prefix = parsed.cache_key();
                let mut keys: Vec<String> = self
                    .tracker
                    .entries()
                    .into_iter()
                    .map(|(key, _)| key)
                    .filter(|key| path::key_under(key, &prefix))
                    .collect();
                keys.sort();
                for key in keys {
                    self.publish_key(&key).await?;
                }
                Ok(())
            }
        }
    }

    /// Publish every dirty item, collecting per-item outcomes.
    pub async fn publish_all(&self) -> Vec<(String, Result<(), OverlayError>)> {
        let keys: Vec<String> = self.tracker.entries().into_iter().map(|(k, _)| k).collect();
        let results = join_all(keys.iter().map(|key| self.publish_key(key))).await;
        keys.into_iter().zip(results).collect()
    }

    /// Does this path (or anything under it) have unpublished changes?
    pub fn has_unpublished(&self, p: &str) -> bool {
        self.tracker.is_dirty_under(&path::cache_key(p))
    }

    pub fn dirty_items(&self) -> Vec<(String, PublishAction)> {
        self.tracker.entries()
    }

    /// External reload signal: discard every cached node under the prefix and
    /// forget pending publish entries for it.
    pub fn reload(&self, p: &str) {
        let prefix = path::cache_key(p);
        self.cache.evict_prefix(&prefix);
        self.tracker.clear_prefix(&prefix);
        info!(prefix = %prefix, "reloaded cache prefix");
    }

    async fn publish_key(&self, key: &str) -> Result<(), OverlayError> {
        let action = self.tracker.action(key);
        if action == PublishAction::None {
            return Ok(());
        }
        let node = self
            .cache
            .get(key)
            .ok_or_else(|| OverlayError::NotFound(key.to_string()))?;
        let item = node
            .item_state()
            .ok_or_else(|| OverlayError::Unavailable(format!("not an item: {}", key)))?;

        match action {
            PublishAction::Create => self.publish_create(&node, item).await,
            PublishAction::Modify => self.publish_modify(&node, item).await,
            PublishAction::Delete => self.publish_delete(&node, item).await,
            PublishAction::None => Ok(()),
        }
    }

    async fn publish_create(&self, node: &CacheNode, item: &ItemNode) -> Result<(), OverlayError> {
        let display_name = item.display_name.read().clone();
        let parts = item
            .parts
            .read()
            .as_ref()
            .map(PartStore::publish_parts)
            .unwrap_or_default();
        let definition = if parts.is_empty() {
            None
        } else {
            Some(ItemDefinition { parts })
        };

        let submitted = self
            .remote
            .create_item(
                &item.collection_id,
                &display_name,
                &item.spec.remote_type,
                definition.as_ref(),
            )
            .await?;
        let summary = match submitted {
            Submitted::Complete(summary) => Some(summary),
            Submitted::Pending { location } => {
                await_operation(self.remote.as_ref(), &location, &self.config.poll_policy()).await?
            }
        };
        let summary = summary
            .ok_or_else(|| OverlayError::remote("create completed without an item result", None))?;

        // The item now exists remotely: register the id so name paths resolve,
        // and make future edits publish as updates rather than creates.
        self.names.insert_item(
            &item.collection_id,
            &item.spec.directory,
            &display_name,
            &summary.id,
        );
        *item.id.write() = Some(summary.id.clone());
        *item.publish_action.write() = PublishAction::Modify;
        *item.metadata_dirty.write() = false;
        self.tracker.clear(&node.key);
        info!(key = %node.key, id = %summary.id, "published new item");
        Ok(())
    }

    async fn publish_modify(&self, node: &CacheNode, item: &ItemNode) -> Result<(), OverlayError> {
        let id = item.remote_id().ok_or_else(|| {
            OverlayError::Unavailable(format!("item has never been published: {}", node.key))
        })?;

        if *item.metadata_dirty.read() {
            let display_name = item.display_name.read().clone();
            let description = item.description.read().clone();
            self.remote
                .update_item_metadata(
                    &item.collection_id,
                    &id,
                    Some(&display_name),
                    description.as_deref(),
                )
                .await?;
            *item.metadata_dirty.write() = false;
            debug!(key = %node.key, "updated item metadata");
        }

        // A part list only exists locally once the definition was loaded; a
        // metadata-only change must not overwrite the remote definition.
        let local_parts = item.parts.read().as_ref().map(PartStore::publish_parts);
        match local_parts {
            Some(_) if !item.spec.supports_definition_update => {
                info!(
                    key = %node.key,
                    item_type = %item.spec.remote_type,
                    "item type does not support definition updates; skipping definition publish"
                );
            }
            Some(parts) => {
                let definition = ItemDefinition { parts };
                let submitted = self
                    .remote
                    .update_item_definition(&item.collection_id, &id, &definition)
                    .await?;
                if let Submitted::Pending { location } = submitted {
                    await_operation(self.remote.as_ref(), &location, &self.config.poll_policy())
                        .await?;
                }
            }
            None => {}
        }

        self.tracker.clear(&node.key);
        info!(key = %node.key, "published item changes");
        Ok(())
    }

    async fn publish_delete(&self, node: &CacheNode, item: &ItemNode) -> Result<(), OverlayError> {
        if let Some(id) = item.remote_id() {
            self.remote.delete_item(&item.collection_id, &id).await?;
            self.names.remove_item(
                &item.collection_id,
                &item.spec.directory,
                &item.display_name.read(),
            );
        }
        self.cache.remove(&node.key);
        self.detach_from_parent(&node.key);
        self.tracker.clear(&node.key);
        info!(key = %node.key, "published item delete");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Rename
    // ------------------------------------------------------------------

    async fn rename_part(
        &self,
        from: &ParsedPath,
        to: &ParsedPath,
    ) -> Result<(), OverlayError> {
        let (from_sub, to_sub) = match (from.part_path.clone(), to.part_path.clone()) {
            (Some(f), Some(t)) => (f, t),
            _ => {
                return Err(OverlayError::Unavailable(
                    "rename endpoints must name parts".into(),
                ))
            }
        };

        let src = self.node_for(from)?;
        let dst = self.node_for(to)?;
        self.ensure_parts(&src).await?;
        self.ensure_parts(&dst).await?;
        let same_item = src.key == dst.key;

        if same_item && from_sub == to_sub {
            return Ok(());
        }
        if same_item && to_sub.starts_with(&format!("{}/", from_sub)) {
            return Err(OverlayError::Unavailable(
                "cannot move a folder underneath itself".into(),
            ));
        }

        let src_item = item_of(&src)?;
        let dst_item = item_of(&dst)?;

        // Stage: compute and validate the whole move plan before touching
        // either part list, so a failed validation leaves both items intact.
        let plan = with_parts(src_item, |parts| parts.move_plan(&from_sub, &to_sub))?;
        with_parts(dst_item, |dst_parts| {
            for (_, moved_to) in &plan {
                let vacated = same_item && plan.iter().any(|(f, _)| f == moved_to);
                if !vacated && dst_parts.occupied(moved_to) {
                    return Err(OverlayError::AlreadyExists(moved_to.clone()));
                }
            }
            Ok(())
        })?;

        // Commit.
        let from_paths: Vec<String> = plan.iter().map(|(f, _)| f.clone()).collect();
        let moved = with_parts_mut(src_item, |parts| Ok(parts.extract(&from_paths)))?;
        with_parts_mut(dst_item, |dst_parts| {
            for part in moved {
                if let Some((_, new_path)) = plan.iter().find(|(f, _)| *f == part.path) {
                    dst_parts.insert(ItemPart {
                        path: new_path.clone(),
                        ..part
                    })?;
                }
            }
            Ok(())
        })?;

        self.mark_item_edited(&src, src_item);
        if !same_item {
            self.mark_item_edited(&dst, dst_item);
        }
        debug!(
            from = %format!("{}/{}", src.key, from_sub),
            to = %format!("{}/{}", dst.key, to_sub),
            parts = plan.len(),
            "moved parts"
        );
        Ok(())
    }

    async fn rename_item(
        &self,
        from: &ParsedPath,
        to: &ParsedPath,
    ) -> Result<(), OverlayError> {
        let old_key = from.cache_key();
        let new_key = to.cache_key();
        if old_key == new_key {
            return Ok(());
        }

        let node = self.node_for(from)?;
        let item = item_of(&node)?;
        let old_name = item.display_name.read().clone();
        let new_name = match to.item.clone() {
            Some(name) => name,
            None => return Err(OverlayError::NotFound(new_key)),
        };

        let new_collection_id = self.resolve_collection_segment(to.collection.as_deref())?;
        let new_spec = self.spec_for(to.type_folder.as_deref())?;
        let same_parent =
            new_collection_id == item.collection_id && new_spec.directory == item.spec.directory;

        if self
            .names
            .resolve_item(&new_collection_id, &new_spec.directory, &new_name)
            .is_some()
            || self.cache.contains(&new_key)
        {
            return Err(OverlayError::AlreadyExists(new_key));
        }

        if same_parent {
            // Pure rename: same item, new display name.
            let renamed = Arc::new(node.rekeyed(new_key.clone()));
            {
                let renamed_item = item_of(&renamed)?;
                *renamed_item.display_name.write() = new_name.clone();
                *renamed_item.metadata_dirty.write() = true;
                let alias = renamed_item.alias();
                if let Some(parts) = renamed_item.parts.write().as_mut() {
                    parts.set_alias(alias);
                }
                if *renamed_item.publish_action.read() == PublishAction::None {
                    *renamed_item.publish_action.write() = PublishAction::Modify;
                }
            }
            if item.remote_id().is_some() {
                self.names
                    .rename_item(&item.collection_id, &item.spec.directory, &old_name, &new_name);
            }

            let pending = self.tracker.action(&old_key);
            let brand_new = pending == PublishAction::Create || item.is_local_only();
            self.tracker.clear(&old_key);
            self.tracker.record_edit(&new_key, brand_new);

            self.cache.remove(&old_key);
            self.cache.insert(renamed);
            self.detach_from_parent(&old_key);
            self.attach_to_parent(&new_key, &new_name);
            info!(from = %old_key, to = %new_key, "renamed item");
            Ok(())
        } else {
            if new_spec.remote_type != item.spec.remote_type {
                return Err(OverlayError::Unavailable(
                    "cannot move an item between type folders".into(),
                ));
            }
            // No native move on the remote: the destination becomes a fresh
            // create carrying the full part list, the source a pending delete.
            self.ensure_parts(&node).await?;
            let moved = Arc::new(CacheNode::local_item(
                new_key.clone(),
                new_collection_id,
                new_spec.clone(),
                new_name.clone(),
            ));
            {
                let moved_item = item_of(&moved)?;
                let parts = item.parts.read().clone();
                *moved_item.description.write() = item.description.read().clone();
                if let Some(mut parts) = parts {
                    parts.set_alias(moved_item.alias());
                    *moved_item.parts.write() = Some(parts);
                }
            }
            self.cache.insert(moved);
            self.tracker.set(&new_key, PublishAction::Create);
            self.attach_to_parent(&new_key, &new_name);

            match self.tracker.record_delete(&old_key) {
                DeleteDisposition::LocalOnly => {
                    self.cache.remove(&old_key);
                    self.detach_from_parent(&old_key);
                }
                DeleteDisposition::Recorded => {
                    *item.publish_action.write() = PublishAction::Delete;
                }
            }
            info!(from = %old_key, to = %new_key, "moved item as delete-then-add");
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // Node resolution and lazy loading
    // ------------------------------------------------------------------

    fn check_writable(&self, p: &str) -> Result<(), OverlayError> {
        if self.config.read_only {
            return Err(OverlayError::NoPermissions(format!(
                "overlay is read-only: {}",
                p
            )));
        }
        Ok(())
    }

    fn spec_for(&self, directory: Option<&str>) -> Result<ItemTypeSpec, OverlayError> {
        let directory = directory
            .ok_or_else(|| OverlayError::NotFound("missing type folder segment".into()))?;
        self.config
            .type_for_directory(directory)
            .cloned()
            .ok_or_else(|| OverlayError::NotFound(format!("unknown item type folder: {}", directory)))
    }

    fn resolve_collection_segment(&self, segment: Option<&str>) -> Result<String, OverlayError> {
        let segment =
            segment.ok_or_else(|| OverlayError::NotFound("missing collection segment".into()))?;
        if path::looks_like_id(segment) {
            return Ok(segment.to_string());
        }
        self.names
            .resolve_collection(segment)
            .ok_or_else(|| OverlayError::NotFound(format!("unknown collection: {}", segment)))
    }

    /// Look up or lazily construct the cache node a classified path maps to.
    /// Part paths are rewritten to their owning item first. Construction is
    /// pure; no remote call happens here.
    fn node_for(&self, parsed: &ParsedPath) -> Result<Arc<CacheNode>, OverlayError> {
        let key = match parsed.kind {
            NodeKind::Part => parsed
                .item_key()
                .ok_or_else(|| OverlayError::NotFound(parsed.cache_key()))?,
            _ => parsed.cache_key(),
        };
        self.cache.get_or_insert_with(&key, || {
            match parsed.kind {
                NodeKind::Root => Ok(CacheNode::root()),
                NodeKind::Collection => {
                    let id = self.resolve_collection_segment(parsed.collection.as_deref())?;
                    Ok(CacheNode::collection(key.clone(), id))
                }
                NodeKind::TypeFolder => {
                    let collection_id =
                        self.resolve_collection_segment(parsed.collection.as_deref())?;
                    let spec = self.spec_for(parsed.type_folder.as_deref())?;
                    Ok(CacheNode::type_folder(key.clone(), collection_id, spec))
                }
                NodeKind::Item | NodeKind::Part => {
                    let collection_id =
                        self.resolve_collection_segment(parsed.collection.as_deref())?;
                    let spec = self.spec_for(parsed.type_folder.as_deref())?;
                    let segment = parsed
                        .item
                        .as_deref()
                        .ok_or_else(|| OverlayError::NotFound(key.clone()))?;
                    if path::looks_like_id(segment) {
                        return Ok(CacheNode::item(
                            key.clone(),
                            collection_id,
                            spec,
                            segment.to_string(),
                            segment.to_string(),
                        ));
                    }
                    match self
                        .names
                        .resolve_item(&collection_id, &spec.directory, segment)
                    {
                        Some(id) => Ok(CacheNode::item(
                            key.clone(),
                            collection_id,
                            spec,
                            id,
                            segment.to_string(),
                        )),
                        // Freshly created items are valid before any listing
                        // confirms them.
                        None if self.tracker.action(&key) == PublishAction::Create => Ok(
                            CacheNode::local_item(key.clone(), collection_id, spec, segment.to_string()),
                        ),
                        None => Err(OverlayError::NotFound(key.clone())),
                    }
                }
            }
        })
    }

    async fn ensure_stats(&self, node: &Arc<CacheNode>) -> Result<(), OverlayError> {
        match node.stats_gate.claim(self.config.load_wait()).await {
            Claim::Ready => Ok(()),
            Claim::Load => match self.load_stats(node).await {
                Ok(()) => {
                    node.stats_gate.complete();
                    Ok(())
                }
                Err(e) => {
                    warn!(key = %node.key, error = %e, "stat load failed");
                    node.stats_gate.abort();
                    Err(e)
                }
            },
        }
    }

    async fn ensure_children(&self, node: &Arc<CacheNode>) -> Result<(), OverlayError> {
        match node.children_gate.claim(self.config.load_wait()).await {
            Claim::Ready => Ok(()),
            Claim::Load => match self.load_children(node).await {
                Ok(()) => {
                    node.children_gate.complete();
                    Ok(())
                }
                Err(e) => {
                    warn!(key = %node.key, error = %e, "children load failed");
                    node.children_gate.abort();
                    Err(e)
                }
            },
        }
    }

    /// Items load their flat part list through the children gate; everything
    /// under the item is a projection over it.
    async fn ensure_parts(&self, node: &Arc<CacheNode>) -> Result<(), OverlayError> {
        debug_assert!(node.item_state().is_some());
        self.ensure_children(node).await
    }

    async fn load_stats(&self, node: &Arc<CacheNode>) -> Result<(), OverlayError> {
        match &node.variant {
            NodeVariant::Root => {
                *node.stat.write() = Some(FileStat::directory());
            }
            NodeVariant::Collection(collection) => {
                let summary = self.remote.get_collection(&collection.id).await?;
                self.names
                    .insert_collection(&summary.display_name, &summary.id);
                *collection.summary.write() = Some(summary);
                *node.stat.write() = Some(FileStat::directory());
            }
            NodeVariant::TypeFolder(_) => {
                *node.stat.write() = Some(FileStat::directory());
            }
            NodeVariant::Item(item) | NodeVariant::TypeSingular(item) => {
                let id = item.remote_id().ok_or_else(|| {
                    OverlayError::NotFound(format!("item has no remote id: {}", node.key))
                })?;
                let summary = self.remote.get_item(&item.collection_id, &id).await?;
                *item.display_name.write() = summary.display_name.clone();
                *item.description.write() = summary.description.clone();
                *item.modified.write() = summary.modified;
                // Keep the single-file alias in line with the refreshed name.
                let alias = item.alias();
                if let Some(parts) = item.parts.write().as_mut() {
                    parts.set_alias(alias);
                }
                *node.stat.write() = Some(FileStat {
                    kind: EntryKind::Directory,
                    size: None,
                    created: None,
                    modified: summary.modified,
                });
            }
        }
        Ok(())
    }

    async fn load_children(&self, node: &Arc<CacheNode>) -> Result<(), OverlayError> {
        match &node.variant {
            NodeVariant::Root => {
                let collections = remote::list_all_collections(self.remote.as_ref()).await?;
                let mut children = Vec::with_capacity(collections.len());
                for collection in collections {
                    self.names
                        .insert_collection(&collection.display_name, &collection.id);
                    children.push((collection.display_name, EntryKind::Directory));
                }
                debug!(count = children.len(), "listed collections");
                *node.children.write() = children;
            }
            NodeVariant::Collection(_) => {
                // Type folders are a fixed registry projection, no remote call.
                *node.children.write() = self
                    .config
                    .item_types
                    .iter()
                    .map(|spec| (spec.directory.clone(), EntryKind::Directory))
                    .collect();
            }
            NodeVariant::TypeFolder(folder) => {
                let items = remote::list_all_items(
                    self.remote.as_ref(),
                    &folder.collection_id,
                    Some(&folder.spec.remote_type),
                )
                .await?;
                let mut children = Vec::with_capacity(items.len());
                for item in items {
                    self.names.insert_item(
                        &folder.collection_id,
                        &folder.spec.directory,
                        &item.display_name,
                        &item.id,
                    );
                    children.push((item.display_name, EntryKind::Directory));
                }
                // Locally created items are not in the remote listing yet.
                for (key, action) in self.tracker.entries() {
                    if action == PublishAction::Create
                        && path::parent_key(&key).as_deref() == Some(node.key.as_str())
                    {
                        let name = path::leaf_name(&key).to_string();
                        if !children.iter().any(|(n, _)| *n == name) {
                            children.push((name, EntryKind::Directory));
                        }
                    }
                }
                debug!(key = %node.key, count = children.len(), "listed items");
                *node.children.write() = children;
            }
            NodeVariant::Item(item) | NodeVariant::TypeSingular(item) => {
                let id = item.remote_id().ok_or_else(|| {
                    OverlayError::NotFound(format!("item has no remote id: {}", node.key))
                })?;
                let definition = self
                    .remote
                    .get_item_definition(
                        &item.collection_id,
                        &id,
                        item.spec.definition_format.as_deref(),
                    )
                    .await?;
                let store = PartStore::from_definition(definition, item.alias())?;
                debug!(key = %node.key, parts = store.len(), "loaded item definition");
                *item.parts.write() = Some(store);
            }
        }
        Ok(())
    }

    /// Record a local edit on an item: bump the node's action and the
    /// tracker entry together.
    fn mark_item_edited(&self, node: &CacheNode, item: &ItemNode) {
        let brand_new =
            item.is_local_only() || *item.publish_action.read() == PublishAction::Create;
        if *item.publish_action.read() == PublishAction::None {
            *item.publish_action.write() = PublishAction::Modify;
        }
        self.tracker.record_edit(&node.key, brand_new);
    }

    fn detach_from_parent(&self, key: &str) {
        let name = path::leaf_name(key).to_string();
        if let Some(parent_key) = path::parent_key(key) {
            if let Some(parent) = self.cache.get(&parent_key) {
                if parent.children_gate.is_loaded() {
                    parent.children.write().retain(|(n, _)| *n != name);
                }
            }
        }
    }

    fn attach_to_parent(&self, key: &str, name: &str) {
        if let Some(parent_key) = path::parent_key(key) {
            if let Some(parent) = self.cache.get(&parent_key) {
                if parent.children_gate.is_loaded() {
                    let mut children = parent.children.write();
                    if !children.iter().any(|(n, _)| n == name) {
                        children.push((name.to_string(), EntryKind::Directory));
                    }
                }
            }
        }
    }

    fn create_local_item(&self, parsed: &ParsedPath) -> Result<(), OverlayError> {
        let key = parsed.cache_key();
        let collection_id = self.resolve_collection_segment(parsed.collection.as_deref())?;
        let spec = self.spec_for(parsed.type_folder.as_deref())?;
        let name = parsed
            .item
            .clone()
            .ok_or_else(|| OverlayError::NotFound(key.clone()))?;

        if self.cache.contains(&key)
            || self
                .names
                .resolve_item(&collection_id, &spec.directory, &name)
                .is_some()
        {
            return Err(OverlayError::AlreadyExists(key));
        }

        let node = Arc::new(CacheNode::local_item(
            key.clone(),
            collection_id,
            spec,
            name.clone(),
        ));
        self.cache.insert(node);
        self.tracker.set(&key, PublishAction::Create);
        self.attach_to_parent(&key, &name);
        info!(key = %key, "created local item");
        Ok(())
    }
}
