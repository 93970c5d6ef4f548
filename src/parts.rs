//! Item part store
//!
//! One item is a mini flat-file-store: an ordered list of parts addressed by
//! slash-delimited sub-paths. The flat list mirrors the remote document
//! format and stays the single source of truth; folder and file listings are
//! a read-time projection over it, never materialized separately. Empty
//! folders are represented by zero-payload marker parts whose path ends with
//! `/`.

use crate::error::OverlayError;
use crate::remote::{ItemDefinition, ItemPart};
use crate::types::EntryKind;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

/// Name substitution for single-definition-file item types: the remote's
/// canonical file name is not a desirable display name, so the part is shown
/// under the item's display name (canonical extension kept) and swapped back
/// when building the publish payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAlias {
    pub canonical: String,
    pub display: String,
}

impl FileAlias {
    /// Alias the canonical definition file to `<item name>.<canonical ext>`.
    pub fn for_item(canonical: &str, item_name: &str) -> Self {
        let display = match canonical.rsplit_once('.') {
            Some((_, ext)) => format!("{}.{}", item_name, ext),
            None => item_name.to_string(),
        };
        FileAlias {
            canonical: canonical.to_string(),
            display,
        }
    }
}

/// Flat part list of one item plus the derived filesystem views over it.
/// Part paths are stored canonically; the alias only applies at the view
/// boundary.
#[derive(Debug, Clone, Default)]
pub struct PartStore {
    parts: Vec<ItemPart>,
    alias: Option<FileAlias>,
}

fn normalize(sub: &str) -> String {
    sub.trim_matches('/').to_string()
}

impl PartStore {
    pub fn empty(alias: Option<FileAlias>) -> Self {
        PartStore {
            parts: Vec::new(),
            alias,
        }
    }

    /// Build from a remote definition. Duplicate part paths are rejected.
    pub fn from_definition(
        definition: ItemDefinition,
        alias: Option<FileAlias>,
    ) -> Result<Self, OverlayError> {
        let mut store = PartStore::empty(alias);
        for part in definition.parts {
            store.insert(part)?;
        }
        Ok(store)
    }

    pub fn set_alias(&mut self, alias: Option<FileAlias>) {
        self.alias = alias;
    }

    /// Translate a caller-visible sub-path to the canonical part path.
    fn canonical(&self, sub: &str) -> String {
        let sub = normalize(sub);
        match &self.alias {
            Some(alias) if sub == alias.display => alias.canonical.clone(),
            _ => sub,
        }
    }

    /// Translate a canonical part path to the caller-visible one.
    fn displayed(&self, path: &str) -> String {
        match &self.alias {
            Some(alias) if path == alias.canonical => alias.display.clone(),
            _ => path.to_string(),
        }
    }

    fn find(&self, canonical_path: &str) -> Option<&ItemPart> {
        self.parts
            .iter()
            .find(|p| !p.is_folder_marker() && p.path == canonical_path)
    }

    fn has_folder(&self, sub: &str) -> bool {
        let marker = format!("{}/", sub);
        self.parts.iter().any(|p| p.path.starts_with(&marker))
    }

    pub fn has_file(&self, sub: &str) -> bool {
        self.find(&self.canonical(sub)).is_some()
    }

    /// The nearest ancestor of `path` that is an existing file, if any. Such
    /// a path can never gain children.
    fn file_ancestor(&self, path: &str) -> Option<String> {
        let mut ancestor = path;
        while let Some((parent, _)) = ancestor.rsplit_once('/') {
            if self.find(parent).is_some() {
                return Some(parent.to_string());
            }
            ancestor = parent;
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Canonical paths of every part, in list order.
    pub fn paths(&self) -> Vec<String> {
        self.parts.iter().map(|p| p.path.clone()).collect()
    }

    /// Append a part, enforcing the no-duplicate-path invariant.
    pub fn insert(&mut self, part: ItemPart) -> Result<(), OverlayError> {
        if self.parts.iter().any(|p| p.path == part.path) {
            return Err(OverlayError::AlreadyExists(part.path));
        }
        self.parts.push(part);
        Ok(())
    }

    /// Project the flat list into one directory level.
    ///
    /// For the empty sub-path: group parts by their first segment (folders)
    /// and surface single-segment non-marker parts as files. For a non-empty
    /// sub-path: filter parts underneath it and group by the next segment.
    pub fn read_directory(&self, sub: &str) -> Result<Vec<(String, EntryKind)>, OverlayError> {
        let sub = self.canonical(sub);
        if !sub.is_empty() && self.find(&sub).is_some() {
            return Err(OverlayError::Unavailable(format!("not a directory: {}", sub)));
        }
        let prefix = if sub.is_empty() {
            String::new()
        } else {
            format!("{}/", sub)
        };

        let mut entries: Vec<(String, EntryKind)> = Vec::new();
        let mut matched = sub.is_empty();
        for part in &self.parts {
            let shown = self.displayed(&part.path);
            let rest = match shown.strip_prefix(prefix.as_str()) {
                Some(rest) => rest,
                None => continue,
            };
            matched = true;
            let rest = rest.trim_end_matches('/');
            if rest.is_empty() {
                // The folder's own marker; contributes existence only.
                continue;
            }
            let (name, kind) = match rest.split_once('/') {
                Some((first, _)) => (first.to_string(), EntryKind::Directory),
                None if part.is_folder_marker() => (rest.to_string(), EntryKind::Directory),
                None => (rest.to_string(), EntryKind::File),
            };
            if !entries.iter().any(|(n, _)| *n == name) {
                entries.push((name, kind));
            }
        }

        if !matched {
            return Err(OverlayError::NotFound(sub));
        }
        Ok(entries)
    }

    /// Decode the payload of the exact-matching file part.
    pub fn get_content(&self, sub: &str) -> Result<Vec<u8>, OverlayError> {
        let canonical = self.canonical(sub);
        match self.find(&canonical) {
            Some(part) => BASE64
                .decode(&part.payload)
                .map_err(|e| OverlayError::Decode(format!("part {}: {}", canonical, e))),
            None if self.has_folder(&canonical) => {
                Err(OverlayError::Unavailable(format!("not a file: {}", sub)))
            }
            None => Err(OverlayError::NotFound(normalize(sub))),
        }
    }

    /// Replace or append a file part. Returns true when a new part was
    /// created rather than overwritten.
    pub fn write_content(
        &mut self,
        sub: &str,
        data: &[u8],
        create: bool,
        overwrite: bool,
    ) -> Result<bool, OverlayError> {
        let canonical = self.canonical(sub);
        if canonical.is_empty() {
            return Err(OverlayError::Unavailable("cannot write the item root".into()));
        }
        if self.has_folder(&canonical) {
            return Err(OverlayError::AlreadyExists(format!("{}/", canonical)));
        }
        if let Some(file) = self.file_ancestor(&canonical) {
            return Err(OverlayError::AlreadyExists(file));
        }
        let payload = BASE64.encode(data);
        if let Some(part) = self
            .parts
            .iter_mut()
            .find(|p| !p.is_folder_marker() && p.path == canonical)
        {
            if !overwrite {
                return Err(OverlayError::AlreadyExists(canonical));
            }
            part.payload = payload;
            return Ok(false);
        }
        if !create {
            return Err(OverlayError::NotFound(canonical));
        }
        self.parts.push(ItemPart::inline(canonical, payload));
        Ok(true)
    }

    /// Add a synthetic folder marker. Creating over an existing folder is a
    /// no-op; a file at the same path is a collision.
    pub fn create_folder(&mut self, sub: &str) -> Result<(), OverlayError> {
        let sub = normalize(sub);
        if sub.is_empty() {
            return Err(OverlayError::AlreadyExists(String::new()));
        }
        if self.find(&self.canonical(&sub)).is_some() {
            return Err(OverlayError::AlreadyExists(sub));
        }
        if let Some(file) = self.file_ancestor(&sub) {
            return Err(OverlayError::AlreadyExists(file));
        }
        if self.has_folder(&sub) {
            return Ok(());
        }
        self.parts.push(ItemPart::folder_marker(sub));
        Ok(())
    }

    /// Remove the file at `sub`, or the whole folder fan-out (marker plus
    /// every part underneath). Returns the removed parts.
    pub fn remove(&mut self, sub: &str) -> Result<Vec<ItemPart>, OverlayError> {
        let canonical = self.canonical(sub);
        if canonical.is_empty() {
            return Err(OverlayError::Unavailable("cannot delete the item root".into()));
        }
        if self.find(&canonical).is_some() {
            let mut removed = Vec::new();
            self.parts.retain(|p| {
                if !p.is_folder_marker() && p.path == canonical {
                    removed.push(p.clone());
                    false
                } else {
                    true
                }
            });
            return Ok(removed);
        }
        if self.has_folder(&canonical) {
            let marker = format!("{}/", canonical);
            let mut removed = Vec::new();
            self.parts.retain(|p| {
                if p.path == marker || p.path.starts_with(&marker) {
                    removed.push(p.clone());
                    false
                } else {
                    true
                }
            });
            return Ok(removed);
        }
        Err(OverlayError::NotFound(canonical))
    }

    /// Compute the per-part move plan for renaming `from` to `to`:
    /// `(old canonical path, new canonical path)` for every affected part.
    /// Folder moves fan out over the marker and every descendant. The store
    /// is not mutated; commit with [`extract`](Self::extract) and
    /// [`insert`](Self::insert) once the whole plan validates.
    pub fn move_plan(&self, from: &str, to: &str) -> Result<Vec<(String, String)>, OverlayError> {
        let from = self.canonical(from);
        let to = normalize(to);
        if to.is_empty() {
            return Err(OverlayError::Unavailable("empty rename target".into()));
        }
        if self.find(&from).is_some() {
            return Ok(vec![(from, to)]);
        }
        if self.has_folder(&from) {
            let old_prefix = format!("{}/", from);
            let new_prefix = format!("{}/", to);
            let plan = self
                .parts
                .iter()
                .filter(|p| p.path.starts_with(&old_prefix))
                .map(|p| {
                    (
                        p.path.clone(),
                        format!("{}{}", new_prefix, &p.path[old_prefix.len()..]),
                    )
                })
                .collect();
            return Ok(plan);
        }
        Err(OverlayError::NotFound(from))
    }

    /// Whether inserting a part at `path` would collide.
    pub fn occupied(&self, path: &str) -> bool {
        self.parts.iter().any(|p| p.path == path)
    }

    /// Remove parts by exact canonical path, returning them in list order.
    pub fn extract(&mut self, paths: &[String]) -> Vec<ItemPart> {
        let mut removed = Vec::new();
        self.parts.retain(|p| {
            if paths.iter().any(|path| *path == p.path) {
                removed.push(p.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Decoded size of the file at `sub`, for stat.
    pub fn file_size(&self, sub: &str) -> Result<u64, OverlayError> {
        Ok(self.get_content(sub)?.len() as u64)
    }

    pub fn folder_exists(&self, sub: &str) -> bool {
        self.has_folder(&self.canonical(sub))
    }

    /// The part list to publish: every non-marker part, canonical names.
    pub fn publish_parts(&self) -> Vec<ItemPart> {
        self.parts
            .iter()
            .filter(|p| !p.is_folder_marker())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(parts: Vec<ItemPart>) -> PartStore {
        PartStore::from_definition(ItemDefinition { parts }, None).unwrap()
    }

    #[test]
    fn test_notebook_scenario() {
        let store = store_with(vec![ItemPart::inline("notebook-content.py", "cHJpbnQoMSk=")]);
        assert_eq!(
            store.read_directory("").unwrap(),
            vec![("notebook-content.py".to_string(), EntryKind::File)]
        );
        assert_eq!(store.get_content("notebook-content.py").unwrap(), b"print(1)");
    }

    #[test]
    fn test_projection_groups_by_first_segment() {
        let store = store_with(vec![
            ItemPart::inline("report.json", "e30="),
            ItemPart::inline("assets/logo.svg", "PHN2Zz4="),
            ItemPart::inline("assets/icons/x.svg", "PHN2Zz4="),
            ItemPart::folder_marker("staging"),
        ]);
        assert_eq!(
            store.read_directory("").unwrap(),
            vec![
                ("report.json".to_string(), EntryKind::File),
                ("assets".to_string(), EntryKind::Directory),
                ("staging".to_string(), EntryKind::Directory),
            ]
        );
        assert_eq!(
            store.read_directory("assets").unwrap(),
            vec![
                ("logo.svg".to_string(), EntryKind::File),
                ("icons".to_string(), EntryKind::Directory),
            ]
        );
        assert_eq!(store.read_directory("staging").unwrap(), vec![]);
    }

    #[test]
    fn test_missing_directory_is_not_found() {
        let store = store_with(vec![ItemPart::inline("a.txt", "YQ==")]);
        assert!(matches!(
            store.read_directory("nope"),
            Err(OverlayError::NotFound(_))
        ));
    }

    #[test]
    fn test_part_round_trip_after_edits() {
        let mut store = store_with(vec![ItemPart::inline("a.txt", "YQ==")]);
        store.write_content("b/c.txt", b"see", true, false).unwrap();
        store.create_folder("empty").unwrap();
        store.write_content("a.txt", b"ay", true, true).unwrap();
        store.remove("b").unwrap();

        let listing = store.read_directory("").unwrap();
        assert_eq!(
            listing,
            vec![
                ("a.txt".to_string(), EntryKind::File),
                ("empty".to_string(), EntryKind::Directory),
            ]
        );
        assert_eq!(store.get_content("a.txt").unwrap(), b"ay");
        // Markers are never published.
        assert_eq!(store.publish_parts().len(), 1);
    }

    #[test]
    fn test_write_respects_create_and_overwrite_flags() {
        let mut store = store_with(vec![ItemPart::inline("a.txt", "YQ==")]);
        assert!(matches!(
            store.write_content("a.txt", b"x", true, false),
            Err(OverlayError::AlreadyExists(_))
        ));
        assert!(matches!(
            store.write_content("new.txt", b"x", false, true),
            Err(OverlayError::NotFound(_))
        ));
    }

    #[test]
    fn test_file_cannot_gain_children() {
        let mut store = store_with(vec![ItemPart::inline("a.txt", "YQ==")]);
        assert!(matches!(
            store.write_content("a.txt/child.py", b"x", true, false),
            Err(OverlayError::AlreadyExists(_))
        ));
        assert!(matches!(
            store.create_folder("a.txt/sub"),
            Err(OverlayError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_rename_within_item_preserves_content() {
        let mut store = store_with(vec![ItemPart::inline("a.txt", "YQ==")]);
        let original = store.get_content("a.txt").unwrap();

        let plan = store.move_plan("a.txt", "b.txt").unwrap();
        assert!(plan.iter().all(|(_, to)| !store.occupied(to)));
        for part in store.extract(&plan.iter().map(|(f, _)| f.clone()).collect::<Vec<_>>()) {
            let (_, to) = plan.iter().find(|(f, _)| *f == part.path).unwrap();
            store
                .insert(ItemPart {
                    path: to.clone(),
                    ..part
                })
                .unwrap();
        }

        assert_eq!(store.get_content("b.txt").unwrap(), original);
        assert!(matches!(
            store.get_content("a.txt"),
            Err(OverlayError::NotFound(_))
        ));
    }

    #[test]
    fn test_folder_move_plan_fans_out() {
        let store = store_with(vec![
            ItemPart::inline("src/a.py", "YQ=="),
            ItemPart::inline("src/deep/b.py", "Yg=="),
            ItemPart::inline("other.py", "Yw=="),
        ]);
        let mut plan = store.move_plan("src", "lib").unwrap();
        plan.sort();
        assert_eq!(
            plan,
            vec![
                ("src/a.py".to_string(), "lib/a.py".to_string()),
                ("src/deep/b.py".to_string(), "lib/deep/b.py".to_string()),
            ]
        );
    }

    #[test]
    fn test_duplicate_paths_rejected() {
        let result = PartStore::from_definition(
            ItemDefinition {
                parts: vec![
                    ItemPart::inline("a.txt", "YQ=="),
                    ItemPart::inline("a.txt", "Yg=="),
                ],
            },
            None,
        );
        assert!(matches!(result, Err(OverlayError::AlreadyExists(_))));
    }

    #[test]
    fn test_alias_substitution_round_trip() {
        let alias = FileAlias::for_item("definition.bim", "Sales Model");
        assert_eq!(alias.display, "Sales Model.bim");

        let store = PartStore::from_definition(
            ItemDefinition {
                parts: vec![ItemPart::inline("definition.bim", "e30=")],
            },
            Some(alias),
        )
        .unwrap();

        // The view shows the display name; the canonical name stays out.
        assert_eq!(
            store.read_directory("").unwrap(),
            vec![("Sales Model.bim".to_string(), EntryKind::File)]
        );
        assert_eq!(store.get_content("Sales Model.bim").unwrap(), b"{}");
        // Publish swaps back to the canonical file name.
        assert_eq!(store.publish_parts()[0].path, "definition.bim");
    }
}
