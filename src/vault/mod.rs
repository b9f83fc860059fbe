// Vault access
// Note enumeration, reading, metadata parsing, link resolution, and file filters


pub mod filter;
pub mod markdown;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

pub use filter::FileFilter;
pub use markdown::{ParsedNote, parse_note};

/// A note file as seen by the indexer. Paths are vault-relative with `/` separators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteFile {
    pub path: String,
    pub basename: String,
    pub extension: String,
    /// Content modification time, epoch millis
    pub mtime: i64,
    /// Creation (or metadata change) time, epoch millis
    pub ctime: i64,
}

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Vault root is not a directory: {0}")]
    InvalidRoot(PathBuf),
    #[error("Note not found: {0}")]
    NotFound(String),
    #[error("Failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Vault task failed: {0}")]
    Task(String),
}

/// Source of notes to index
#[async_trait]
pub trait Vault: Send + Sync {
    /// Every candidate file in the vault, unfiltered
    async fn list_notes(&self) -> Result<Vec<NoteFile>, VaultError>;

    /// Metadata of a single note
    async fn stat(&self, path: &str) -> Result<NoteFile, VaultError>;

    /// Full text content of a note
    async fn read(&self, path: &str) -> Result<String, VaultError>;
}

/// A vault backed by a directory on the local filesystem
#[derive(Debug, Clone)]
pub struct FsVault {
    root: PathBuf,
}

impl FsVault {
    #[inline]
    pub fn new<P: Into<PathBuf>>(root: P) -> Result<Self, VaultError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(VaultError::InvalidRoot(root));
        }
        Ok(Self { root })
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn absolute(&self, path: &str) -> Result<PathBuf, VaultError> {
        let relative = Path::new(path);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(VaultError::NotFound(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

/// Skip dot-directories such as `.git` and `.obsidian`
fn keep_entry(entry: &DirEntry) -> bool {
    entry.depth() == 0
        || !entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}

fn to_unix_sep<S: AsRef<str>>(s: S) -> String {
    s.as_ref().replace('\\', "/")
}

fn epoch_millis(time: std::io::Result<SystemTime>) -> i64 {
    time.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

fn note_file(root: &Path, path: &Path, metadata: &std::fs::Metadata) -> NoteFile {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let mtime = epoch_millis(metadata.modified());
    // Platforms without birth time fall back to mtime
    let ctime = match metadata.created() {
        Ok(created) => epoch_millis(Ok(created)),
        Err(_) => mtime,
    };

    NoteFile {
        path: to_unix_sep(relative.to_string_lossy()),
        basename: path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
        extension: path
            .extension()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default(),
        mtime,
        ctime,
    }
}

fn scan(root: &Path) -> Vec<NoteFile> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(keep_entry);

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("vault scan: skipping unreadable entry: {}", err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.metadata() {
            Ok(metadata) => files.push(note_file(root, entry.path(), &metadata)),
            Err(err) => warn!(
                "vault scan: metadata failed for {}: {}",
                entry.path().display(),
                err
            ),
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

#[async_trait]
impl Vault for FsVault {
    async fn list_notes(&self) -> Result<Vec<NoteFile>, VaultError> {
        let root = self.root.clone();
        let files = tokio::task::spawn_blocking(move || scan(&root))
            .await
            .map_err(|e| VaultError::Task(e.to_string()))?;
        info!("Found {} files in vault {}", files.len(), self.root.display());
        Ok(files)
    }

    async fn stat(&self, path: &str) -> Result<NoteFile, VaultError> {
        let absolute = self.absolute(path)?;
        let metadata = tokio::fs::metadata(&absolute).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                VaultError::NotFound(path.to_string())
            } else {
                VaultError::Io {
                    path: path.to_string(),
                    source,
                }
            }
        })?;
        if !metadata.is_file() {
            return Err(VaultError::NotFound(path.to_string()));
        }
        Ok(note_file(&self.root, &absolute, &metadata))
    }

    async fn read(&self, path: &str) -> Result<String, VaultError> {
        let absolute = self.absolute(path)?;
        tokio::fs::read_to_string(&absolute)
            .await
            .map_err(|source| VaultError::Io {
                path: path.to_string(),
                source,
            })
    }
}

/// Resolves `[[wiki]]` and `![[embed]]` references to vault paths.
///
/// Resolution order: a path relative to the linking note, then an exact
/// vault-relative path, then a basename match. Among several basename matches
/// the one sharing the longest folder prefix with the source note wins.
#[derive(Debug, Clone, Default)]
pub struct LinkResolver {
    paths: HashMap<String, String>,
    by_name: HashMap<String, Vec<String>>,
}

impl LinkResolver {
    #[inline]
    pub fn new(files: &[NoteFile]) -> Self {
        let mut paths = HashMap::new();
        let mut by_name: HashMap<String, Vec<String>> = HashMap::new();

        for file in files {
            paths.insert(file.path.to_lowercase(), file.path.clone());
            let file_name = file.path.rsplit('/').next().unwrap_or(&file.path);
            by_name
                .entry(file_name.to_lowercase())
                .or_default()
                .push(file.path.clone());
            if file.extension == "md" {
                by_name
                    .entry(file.basename.to_lowercase())
                    .or_default()
                    .push(file.path.clone());
            }
        }

        Self { paths, by_name }
    }

    /// Canonical path of the link target, or `None` when it does not resolve
    #[inline]
    pub fn resolve(&self, link: &str, source_path: &str) -> Option<String> {
        let target = link.split(['#', '|']).next().unwrap_or("").trim();
        if target.is_empty() {
            return None;
        }
        let target = to_unix_sep(target);

        let source_dir = source_path.rsplit_once('/').map_or("", |(dir, _)| dir);
        let mut candidates = Vec::with_capacity(4);
        if !source_dir.is_empty() {
            candidates.push(format!("{}/{}", source_dir, target));
            candidates.push(format!("{}/{}.md", source_dir, target));
        }
        candidates.push(target.clone());
        candidates.push(format!("{}.md", target));

        for candidate in &candidates {
            if let Some(path) = self.paths.get(&normalize_relative(candidate).to_lowercase()) {
                return Some(path.clone());
            }
        }

        let lowered = target.to_lowercase();
        let name = lowered.rsplit('/').next().unwrap_or(&lowered);
        let matches = self.by_name.get(name)?;
        let suffix = format!("/{}", lowered);
        let suffix_md = format!("{}.md", suffix);
        let resolved = matches
            .iter()
            .filter(|path| {
                if !lowered.contains('/') {
                    return true;
                }
                let path = format!("/{}", path.to_lowercase());
                path.ends_with(&suffix) || path.ends_with(&suffix_md)
            })
            .max_by(|a, b| {
                shared_prefix(a, source_dir)
                    .cmp(&shared_prefix(b, source_dir))
                    .then_with(|| b.len().cmp(&a.len()))
                    .then_with(|| b.cmp(a))
            })
            .cloned();

        if resolved.is_none() {
            debug!("Unresolved link {:?} in {}", link, source_path);
        }
        resolved
    }
}

/// Collapse `.` and `..` segments of a `/`-separated relative path
fn normalize_relative(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// Number of leading folder segments shared by a path and a folder
fn shared_prefix(path: &str, folder: &str) -> usize {
    if folder.is_empty() {
        return 0;
    }
    path.split('/')
        .zip(folder.split('/'))
        .take_while(|(a, b)| a == b)
        .count()
}
