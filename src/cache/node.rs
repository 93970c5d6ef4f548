//! Cache node variants
//!
//! One lazily-populated node per cache key. The kind set is fixed, so the
//! variants form a closed tagged union dispatched by pattern match. Stats and
//! children are loaded independently, each behind its own single-flight gate.

use super::load::LoadGate;
use crate::config::ItemTypeSpec;
use crate::parts::{FileAlias, PartStore};
use crate::path::NodeKind;
use crate::remote::CollectionSummary;
use crate::types::{EntryKind, FileStat, PublishAction};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// Collection (workspace) node state.
pub struct CollectionNode {
    pub id: String,
    pub summary: RwLock<Option<CollectionSummary>>,
}

/// Synthetic grouping of all items of one type inside a collection.
pub struct TypeFolderNode {
    pub collection_id: String,
    pub spec: ItemTypeSpec,
}

/// One multi-part item. `parts` holds the last remote snapshot with local
/// edits applied in place; `id` is `None` until a locally-created item has
/// been published.
pub struct ItemNode {
    pub collection_id: String,
    pub spec: ItemTypeSpec,
    pub id: RwLock<Option<String>>,
    pub display_name: RwLock<String>,
    pub description: RwLock<Option<String>>,
    pub modified: RwLock<Option<DateTime<Utc>>>,
    /// Set when name/description changed locally; drives the metadata update
    /// step of publish.
    pub metadata_dirty: RwLock<bool>,
    pub publish_action: RwLock<PublishAction>,
    pub parts: RwLock<Option<PartStore>>,
}

impl ItemNode {
    /// Alias for single-definition-file types, derived from the current
    /// display name.
    pub fn alias(&self) -> Option<FileAlias> {
        self.spec
            .definition_file
            .as_deref()
            .map(|canonical| FileAlias::for_item(canonical, &self.display_name.read()))
    }

    pub fn remote_id(&self) -> Option<String> {
        self.id.read().clone()
    }

    pub fn is_local_only(&self) -> bool {
        self.id.read().is_none()
    }
}

/// Closed set of node kinds. `TypeSingular` is an item whose type stores all
/// content as one named definition file.
pub enum NodeVariant {
    Root,
    Collection(CollectionNode),
    TypeFolder(TypeFolderNode),
    Item(ItemNode),
    TypeSingular(ItemNode),
}

/// One cache entry, identified by its normalized key. At most one node exists
/// per key; a key always maps to the same kind. The parent key is derived
/// from the path, never stored.
pub struct CacheNode {
    pub key: String,
    pub variant: NodeVariant,
    pub stats_gate: LoadGate,
    pub children_gate: LoadGate,
    pub stat: RwLock<Option<FileStat>>,
    pub children: RwLock<Vec<(String, EntryKind)>>,
}

impl CacheNode {
    pub fn root() -> Self {
        let node = CacheNode::bare(String::new(), NodeVariant::Root);
        *node.stat.write() = Some(FileStat::directory());
        node.stats_gate.complete();
        node
    }

    pub fn collection(key: String, id: String) -> Self {
        CacheNode::bare(
            key,
            NodeVariant::Collection(CollectionNode {
                id,
                summary: RwLock::new(None),
            }),
        )
    }

    pub fn type_folder(key: String, collection_id: String, spec: ItemTypeSpec) -> Self {
        CacheNode::bare(
            key,
            NodeVariant::TypeFolder(TypeFolderNode {
                collection_id,
                spec,
            }),
        )
    }

    /// An item discovered remotely; loads lazily.
    pub fn item(
        key: String,
        collection_id: String,
        spec: ItemTypeSpec,
        id: String,
        display_name: String,
    ) -> Self {
        let singular = spec.definition_file.is_some();
        let item = ItemNode {
            collection_id,
            spec,
            id: RwLock::new(Some(id)),
            display_name: RwLock::new(display_name),
            description: RwLock::new(None),
            modified: RwLock::new(None),
            metadata_dirty: RwLock::new(false),
            publish_action: RwLock::new(PublishAction::None),
            parts: RwLock::new(None),
        };
        CacheNode::bare(key, wrap_item(item, singular))
    }

    /// A brand-new local item: nothing to load, everything starts loaded and
    /// the publish action starts at `Create`.
    pub fn local_item(
        key: String,
        collection_id: String,
        spec: ItemTypeSpec,
        display_name: String,
    ) -> Self {
        let singular = spec.definition_file.is_some();
        let item = ItemNode {
            collection_id,
            spec,
            id: RwLock::new(None),
            display_name: RwLock::new(display_name),
            description: RwLock::new(None),
            modified: RwLock::new(None),
            metadata_dirty: RwLock::new(false),
            publish_action: RwLock::new(PublishAction::Create),
            parts: RwLock::new(None),
        };
        let alias = item.alias();
        *item.parts.write() = Some(PartStore::empty(alias));
        let node = CacheNode::bare(key, wrap_item(item, singular));
        *node.stat.write() = Some(FileStat::directory());
        node.stats_gate.complete();
        node.children_gate.complete();
        node
    }

    fn bare(key: String, variant: NodeVariant) -> Self {
        CacheNode {
            key,
            variant,
            stats_gate: LoadGate::new(),
            children_gate: LoadGate::new(),
            stat: RwLock::new(None),
            children: RwLock::new(Vec::new()),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match &self.variant {
            NodeVariant::Root => NodeKind::Root,
            NodeVariant::Collection(_) => NodeKind::Collection,
            NodeVariant::TypeFolder(_) => NodeKind::TypeFolder,
            NodeVariant::Item(_) | NodeVariant::TypeSingular(_) => NodeKind::Item,
        }
    }

    /// The item state, for both plain and single-definition-file items.
    pub fn item_state(&self) -> Option<&ItemNode> {
        match &self.variant {
            NodeVariant::Item(item) | NodeVariant::TypeSingular(item) => Some(item),
            _ => None,
        }
    }

    /// Clone this node's state under a new key (rename supersedes the old
    /// cache entry rather than mutating it).
    pub fn rekeyed(&self, new_key: String) -> Self {
        let variant = match &self.variant {
            NodeVariant::Root => NodeVariant::Root,
            NodeVariant::Collection(c) => NodeVariant::Collection(CollectionNode {
                id: c.id.clone(),
                summary: RwLock::new(c.summary.read().clone()),
            }),
            NodeVariant::TypeFolder(t) => NodeVariant::TypeFolder(TypeFolderNode {
                collection_id: t.collection_id.clone(),
                spec: t.spec.clone(),
            }),
            NodeVariant::Item(item) => NodeVariant::Item(clone_item(item)),
            NodeVariant::TypeSingular(item) => NodeVariant::TypeSingular(clone_item(item)),
        };
        CacheNode {
            key: new_key,
            variant,
            stats_gate: if self.stats_gate.is_loaded() {
                LoadGate::loaded()
            } else {
                LoadGate::new()
            },
            children_gate: if self.children_gate.is_loaded() {
                LoadGate::loaded()
            } else {
                LoadGate::new()
            },
            stat: RwLock::new(self.stat.read().clone()),
            children: RwLock::new(self.children.read().clone()),
        }
    }
}

fn wrap_item(item: ItemNode, singular: bool) -> NodeVariant {
    if singular {
        NodeVariant::TypeSingular(item)
    } else {
        NodeVariant::Item(item)
    }
}

fn clone_item(item: &ItemNode) -> ItemNode {
    ItemNode {
        collection_id: item.collection_id.clone(),
        spec: item.spec.clone(),
        id: RwLock::new(item.id.read().clone()),
        display_name: RwLock::new(item.display_name.read().clone()),
        description: RwLock::new(item.description.read().clone()),
        modified: RwLock::new(*item.modified.read()),
        metadata_dirty: RwLock::new(*item.metadata_dirty.read()),
        publish_action: RwLock::new(*item.publish_action.read()),
        parts: RwLock::new(item.parts.read().clone()),
    }
}
