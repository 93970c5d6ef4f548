//! Name resolution tables
//!
//! Two process-wide maps bridging the human-readable addressing space and the
//! opaque remote ids: collection name -> id, and item name -> id (the latter
//! keyed by `collectionId/typeFolder/itemName`). Names are percent-encoded in
//! the keys so separators and special characters in display names are
//! harmless.
//!
//! Entries are added whenever a node is first discovered through a listing,
//! and whenever a caller supplies a name (for example on create-publish).

use parking_lot::RwLock;
use std::collections::HashMap;

/// Bidirectional name/id seam. Every component that needs to address a remote
/// item resolves through this table instead of inventing a second mapping.
#[derive(Default)]
pub struct NameTables {
    collections: RwLock<HashMap<String, String>>,
    items: RwLock<HashMap<String, String>>,
}

fn item_table_key(collection_id: &str, type_folder: &str, name: &str) -> String {
    format!(
        "{}/{}/{}",
        collection_id,
        type_folder,
        urlencoding::encode(name)
    )
}

impl NameTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_collection(&self, name: &str, id: &str) {
        self.collections
            .write()
            .insert(urlencoding::encode(name).into_owned(), id.to_string());
    }

    pub fn resolve_collection(&self, name: &str) -> Option<String> {
        self.collections
            .read()
            .get(urlencoding::encode(name).as_ref())
            .cloned()
    }

    pub fn insert_item(&self, collection_id: &str, type_folder: &str, name: &str, id: &str) {
        self.items
            .write()
            .insert(item_table_key(collection_id, type_folder, name), id.to_string());
    }

    pub fn resolve_item(&self, collection_id: &str, type_folder: &str, name: &str) -> Option<String> {
        self.items
            .read()
            .get(&item_table_key(collection_id, type_folder, name))
            .cloned()
    }

    pub fn remove_item(&self, collection_id: &str, type_folder: &str, name: &str) {
        self.items
            .write()
            .remove(&item_table_key(collection_id, type_folder, name));
    }

    /// Point a new display name at an existing id, dropping the old entry.
    pub fn rename_item(
        &self,
        collection_id: &str,
        type_folder: &str,
        old_name: &str,
        new_name: &str,
    ) {
        let mut items = self.items.write();
        if let Some(id) = items.remove(&item_table_key(collection_id, type_folder, old_name)) {
            items.insert(item_table_key(collection_id, type_folder, new_name), id);
        }
    }
}
