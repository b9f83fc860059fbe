// Tag normalization
// Pure functions turning raw tag strings into canonical, hierarchical descriptors

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Canonical representation of a tag path, suitable for indexing and graph keys
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NormalizedTagPath {
    /// Hash-prefixed canonical path, e.g. `#economics/industrial-organization`
    pub canonical: String,
    /// Path components from root to leaf, without hash or separators
    pub segments: Vec<String>,
    /// Canonical prefixes from root to leaf, inclusive
    pub hierarchical_paths: Vec<String>,
}

impl NormalizedTagPath {
    /// Consecutive `(parent, child)` pairs along the hierarchy chain
    #[inline]
    pub fn hierarchy_edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.hierarchical_paths
            .windows(2)
            .map(|pair| (pair[0].as_str(), pair[1].as_str()))
    }
}

/// Normalize a raw tag string.
///
/// Leading `#` characters are stripped, the remainder is split on `/` and empty
/// segments are discarded. Returns `None` when no segment survives.
#[inline]
pub fn normalize_tag_path(raw: &str) -> Option<NormalizedTagPath> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let segments: Vec<String> = trimmed
        .trim_start_matches('#')
        .split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(ToString::to_string)
        .collect();

    if segments.is_empty() {
        warn!("Tag without segments ignored: {:?}", raw);
        return None;
    }

    let hierarchical_paths: Vec<String> = (1..=segments.len())
        .map(|depth| format!("#{}", segments[..depth].join("/")))
        .collect();
    let canonical = format!("#{}", segments.join("/"));

    Some(NormalizedTagPath {
        canonical,
        segments,
        hierarchical_paths,
    })
}

/// Normalize a collection of raw tags, dropping invalid entries.
///
/// Duplicates collapse by canonical value and the result is sorted by canonical
/// string so downstream processing is deterministic.
#[inline]
pub fn normalize_tag_paths<I, S>(raw_tags: I) -> Vec<NormalizedTagPath>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut by_canonical = BTreeMap::new();
    for raw in raw_tags {
        if let Some(normalized) = normalize_tag_path(raw.as_ref()) {
            by_canonical.insert(normalized.canonical.clone(), normalized);
        }
    }
    by_canonical.into_values().collect()
}

/// Re-derive the root-to-leaf prefix chain for a canonical tag
#[inline]
pub fn expand_canonical_prefixes(tag: &str) -> Vec<String> {
    normalize_tag_path(tag)
        .map(|normalized| normalized.hierarchical_paths)
        .unwrap_or_default()
}

/// Keep the tags that match at least one included prefix at any hierarchy level.
///
/// With `index_all` set, or with no prefixes configured, every tag passes.
#[inline]
pub fn filter_tags_by_prefixes<'a>(
    tags: &'a [NormalizedTagPath],
    included_prefixes: &[String],
    index_all: bool,
) -> Vec<&'a NormalizedTagPath> {
    if index_all || included_prefixes.is_empty() {
        return tags.iter().collect();
    }

    let prefixes: HashSet<String> = included_prefixes
        .iter()
        .filter_map(|prefix| normalize_tag_path(prefix))
        .map(|normalized| normalized.canonical)
        .collect();

    tags.iter()
        .filter(|tag| {
            tag.hierarchical_paths
                .iter()
                .any(|path| prefixes.contains(path))
        })
        .collect()
}
