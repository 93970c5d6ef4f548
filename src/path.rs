//! Path addressing
//!
//! Classifies an addressable URI of the form
//! `scheme://collection/typeFolder/item/part/subpart...` into a typed node
//! reference. Classification is a pure function of the path's segment count;
//! it never consults name tables or cache state.

use uuid::Uuid;

/// The five node kinds a path can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Root,
    Collection,
    TypeFolder,
    Item,
    Part,
}

/// A classified path. Segments are kept verbatim (names or opaque ids);
/// resolving them against the name tables happens later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPath {
    pub kind: NodeKind,
    pub collection: Option<String>,
    pub type_folder: Option<String>,
    pub item: Option<String>,
    /// Fourth-and-beyond segments rejoined with `/`.
    pub part_path: Option<String>,
}

impl ParsedPath {
    /// Normalized cache key for this path: segments joined with `/`,
    /// redundant separators collapsed. The root key is the empty string.
    pub fn cache_key(&self) -> String {
        let mut segments: Vec<&str> = Vec::with_capacity(4);
        if let Some(c) = &self.collection {
            segments.push(c);
        }
        if let Some(t) = &self.type_folder {
            segments.push(t);
        }
        if let Some(i) = &self.item {
            segments.push(i);
        }
        if let Some(p) = &self.part_path {
            segments.push(p);
        }
        segments.join("/")
    }

    /// Cache key of the owning item (first three segments). Parts are never
    /// cached on their own; their item is the unit of loading.
    pub fn item_key(&self) -> Option<String> {
        match (&self.collection, &self.type_folder, &self.item) {
            (Some(c), Some(t), Some(i)) => Some(format!("{}/{}/{}", c, t, i)),
            _ => None,
        }
    }
}

/// Split a path into its non-empty segments, dropping the scheme prefix.
pub fn split_segments(path: &str) -> Vec<String> {
    let rest = match path.find("://") {
        Some(idx) => &path[idx + 3..],
        None => path,
    };
    rest.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Classify a path by segment count: 0 segments is the root, 1 a collection,
/// 2 a type folder, 3 an item, 4+ a part inside the item.
pub fn classify(path: &str) -> ParsedPath {
    let mut segments = split_segments(path);
    let kind = match segments.len() {
        0 => NodeKind::Root,
        1 => NodeKind::Collection,
        2 => NodeKind::TypeFolder,
        3 => NodeKind::Item,
        _ => NodeKind::Part,
    };
    let part_path = if segments.len() > 3 {
        Some(segments.split_off(3).join("/"))
    } else {
        None
    };
    let mut drain = segments.into_iter();
    ParsedPath {
        kind,
        collection: drain.next(),
        type_folder: drain.next(),
        item: drain.next(),
        part_path,
    }
}

/// Normalized cache key for a raw path string.
pub fn cache_key(path: &str) -> String {
    split_segments(path).join("/")
}

/// Parent cache key, derived rather than stored. The root has no parent.
pub fn parent_key(key: &str) -> Option<String> {
    if key.is_empty() {
        return None;
    }
    match key.rsplit_once('/') {
        Some((parent, _)) => Some(parent.to_string()),
        None => Some(String::new()),
    }
}

/// Last segment of a cache key (the entry name under its parent).
pub fn leaf_name(key: &str) -> &str {
    key.rsplit_once('/').map(|(_, leaf)| leaf).unwrap_or(key)
}

/// Whether a segment already looks like an opaque remote id
/// (fixed-length hex-with-dashes). Such segments are used verbatim and never
/// go through the name tables.
pub fn looks_like_id(segment: &str) -> bool {
    segment.len() == 36 && Uuid::try_parse(segment).is_ok()
}

/// True when `key` equals `prefix` or lives underneath it (segment-aligned).
pub fn key_under(key: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    key == prefix || key.starts_with(prefix) && key.as_bytes().get(prefix.len()) == Some(&b'/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_segment_count_rule() {
        assert_eq!(classify("loom://").kind, NodeKind::Root);
        assert_eq!(classify("loom://Sales").kind, NodeKind::Collection);
        assert_eq!(classify("loom://Sales/notebooks").kind, NodeKind::TypeFolder);
        assert_eq!(classify("loom://Sales/notebooks/Forecast").kind, NodeKind::Item);
        let part = classify("loom://Sales/notebooks/Forecast/a/b/c.py");
        assert_eq!(part.kind, NodeKind::Part);
        assert_eq!(part.part_path.as_deref(), Some("a/b/c.py"));
    }

    #[test]
    fn test_redundant_separators_collapse() {
        let a = classify("loom://Sales//notebooks///Forecast");
        let b = classify("loom://Sales/notebooks/Forecast");
        assert_eq!(a, b);
        assert_eq!(a.cache_key(), "Sales/notebooks/Forecast");
    }

    #[test]
    fn test_classification_ignores_scheme() {
        assert_eq!(cache_key("other://A/b"), cache_key("A/b"));
    }

    #[test]
    fn test_parent_key_chain() {
        assert_eq!(parent_key("Sales/notebooks/Forecast").as_deref(), Some("Sales/notebooks"));
        assert_eq!(parent_key("Sales").as_deref(), Some(""));
        assert_eq!(parent_key(""), None);
    }

    #[test]
    fn test_leaf_name() {
        assert_eq!(leaf_name("Sales/notebooks/Forecast"), "Forecast");
        assert_eq!(leaf_name("Sales"), "Sales");
    }

    #[test]
    fn test_looks_like_id() {
        assert!(looks_like_id("11111111-1111-1111-1111-111111111111"));
        assert!(!looks_like_id("Sales"));
        assert!(!looks_like_id("11111111-1111-1111-1111-11111111111"));
        // Uuid accepts braced forms; the fixed 36-char rule rejects them.
        assert!(!looks_like_id("{11111111-1111-1111-1111-111111111111}"));
    }

    #[test]
    fn test_key_under() {
        assert!(key_under("Sales/notebooks", "Sales"));
        assert!(key_under("Sales", "Sales"));
        assert!(!key_under("Salesforce", "Sales"));
        assert!(key_under("anything/at/all", ""));
    }

    proptest! {
        /// classify is pure: the same string always yields the same result,
        /// and the kind follows the segment count.
        #[test]
        fn prop_classify_idempotent(segments in proptest::collection::vec("[A-Za-z0-9 ._-]{1,12}", 0..8)) {
            let path = format!("loom://{}", segments.join("/"));
            let first = classify(&path);
            let second = classify(&path);
            prop_assert_eq!(&first, &second);
            let expected = match segments.len() {
                0 => NodeKind::Root,
                1 => NodeKind::Collection,
                2 => NodeKind::TypeFolder,
                3 => NodeKind::Item,
                _ => NodeKind::Part,
            };
            prop_assert_eq!(first.kind, expected);
        }
    }
}
