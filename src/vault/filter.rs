use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::debug;

use super::NoteFile;
use crate::config::{ConfigError, IndexingConfig};

/// Decides which vault files are indexed.
///
/// A file qualifies when its extension is allowed, it matches at least one
/// inclusion (or none are configured), and it matches no exclusion. A pattern
/// without glob metacharacters also matches everything below it as a folder.
#[derive(Debug, Clone)]
pub struct FileFilter {
    inclusions: Option<GlobSet>,
    exclusions: Option<GlobSet>,
    extensions: Vec<String>,
}

impl FileFilter {
    #[inline]
    pub fn from_config(config: &IndexingConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            inclusions: build_globset(&config.inclusions)?,
            exclusions: build_globset(&config.exclusions)?,
            extensions: config
                .extensions
                .iter()
                .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
                .filter(|ext| !ext.is_empty())
                .collect(),
        })
    }

    #[inline]
    pub fn matches(&self, file: &NoteFile) -> bool {
        if !self.extensions.iter().any(|ext| *ext == file.extension) {
            return false;
        }

        if self
            .inclusions
            .as_ref()
            .is_some_and(|inclusions| !inclusions.is_match(&file.path))
        {
            return false;
        }

        if self
            .exclusions
            .as_ref()
            .is_some_and(|exclusions| exclusions.is_match(&file.path))
        {
            debug!("filter: excluded {}", file.path);
            return false;
        }

        true
    }

    /// Keep only the qualifying files
    #[inline]
    pub fn apply(&self, files: Vec<NoteFile>) -> Vec<NoteFile> {
        files.into_iter().filter(|file| self.matches(file)).collect()
    }
}

/// Build a [`GlobSet`] from patterns; `None` when no pattern is configured
fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>, ConfigError> {
    let patterns: Vec<&str> = patterns
        .iter()
        .map(|p| p.trim().trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect();
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let invalid =
            |e: globset::Error| ConfigError::InvalidPattern(pattern.to_string(), e.to_string());
        builder.add(Glob::new(pattern).map_err(invalid)?);
        if !pattern.contains(['*', '?', '[', '{']) {
            builder.add(Glob::new(&format!("{}/**", pattern)).map_err(invalid)?);
        }
    }

    builder
        .build()
        .map(Some)
        .map_err(|e| ConfigError::InvalidPattern("<set>".to_string(), e.to_string()))
}
