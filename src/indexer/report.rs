use std::fmt;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, info, warn};

/// User-facing messages emitted by indexing runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    UpToDate,
    NoValidContent,
    Started { total_files: usize },
    NoFilesAfterFilterChange,
    /// The dense index no longer fits its partitions
    CapacityExceeded { partitions: u32 },
    FileError { path: String },
    FatalError,
    Cancelled,
    Completed,
    CompletedWithErrors { errors: usize },
}

impl Notice {
    /// Notices that stay visible longer because the user has to act on them
    #[inline]
    pub fn is_long_lived(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::CapacityExceeded { .. } | Self::FileError { .. } | Self::FatalError
        )
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpToDate => write!(f, "Vault index is up-to-date."),
            Self::NoValidContent => write!(f, "No valid content to index."),
            Self::Started { total_files } => write!(f, "Indexing {} files...", total_files),
            Self::NoFilesAfterFilterChange => write!(f, "No files to index with current filters"),
            Self::CapacityExceeded { partitions } => write!(
                f,
                "Vault is too large for {} partition(s), \
                 please increase the number of partitions in the indexing settings!",
                partitions
            ),
            Self::FileError { path } => {
                write!(f, "Error indexing file {}. Check the logs for details.", path)
            }
            Self::FatalError => {
                write!(f, "Fatal error during indexing. Check the logs for details.")
            }
            Self::Cancelled => write!(f, "Indexing cancelled"),
            Self::Completed => write!(f, "Indexing completed successfully!"),
            Self::CompletedWithErrors { errors } => write!(
                f,
                "Indexing completed with {} errors. Check the logs for details.",
                errors
            ),
        }
    }
}

/// Progress of the batch loop, in files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub indexed: usize,
    pub total: usize,
    pub paused: bool,
}

/// Receives notices and progress updates from indexing runs
pub trait Reporter: Send + Sync {
    fn notice(&self, notice: &Notice);

    fn progress(&self, _progress: Progress) {}
}

/// Forwards everything to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn notice(&self, notice: &Notice) {
        if notice.is_long_lived() {
            error!("{}", notice);
        } else if notice.is_error() {
            warn!("{}", notice);
        } else {
            info!("{}", notice);
        }
    }

    fn progress(&self, progress: Progress) {
        debug!(
            "{}/{} files processed{}",
            progress.indexed,
            progress.total,
            if progress.paused { " (Paused)" } else { "" }
        );
    }
}

/// Terminal output: a progress bar on an attended terminal, styled notices
#[derive(Debug)]
pub struct ConsoleReporter {
    bar: ProgressBar,
}

impl Default for ConsoleReporter {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleReporter {
    #[inline]
    pub fn new() -> Self {
        let bar = if console::user_attended_stderr() {
            let bar = ProgressBar::new(0);
            if let Ok(progress_style) =
                ProgressStyle::with_template("{spinner} [{pos}/{len}] files processed {msg}")
            {
                bar.set_style(progress_style);
            }
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        } else {
            ProgressBar::hidden()
        };
        Self { bar }
    }
}

impl Reporter for ConsoleReporter {
    fn notice(&self, notice: &Notice) {
        let styled = match notice {
            Notice::CapacityExceeded { .. } => style(notice.to_string()).red().bold(),
            Notice::FileError { .. } | Notice::FatalError => style(notice.to_string()).red(),
            Notice::CompletedWithErrors { .. } | Notice::Cancelled => {
                style(notice.to_string()).yellow()
            }
            _ => style(notice.to_string()).green(),
        };
        self.bar.suspend(|| eprintln!("{}", styled));

        if matches!(
            notice,
            Notice::Completed
                | Notice::CompletedWithErrors { .. }
                | Notice::Cancelled
                | Notice::UpToDate
                | Notice::NoValidContent
                | Notice::FatalError
        ) {
            self.bar.finish_and_clear();
        }
    }

    fn progress(&self, progress: Progress) {
        self.bar.set_length(progress.total as u64);
        self.bar.set_position(progress.indexed as u64);
        self.bar
            .set_message(if progress.paused { "(Paused)" } else { "" });
    }
}

/// How a full indexing run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Nothing needed indexing
    UpToDate,
    Completed,
    CompletedWithErrors,
    Cancelled,
    /// A precondition failed before any work was done
    Aborted,
}

/// Result of a full indexing run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRunReport {
    /// Distinct files with at least one stored chunk
    pub indexed_count: usize,
    pub total_files: usize,
    pub outcome: RunOutcome,
    /// Paths of the files whose chunks or batches failed
    pub errors: Vec<String>,
}

impl IndexRunReport {
    #[inline]
    pub fn empty(outcome: RunOutcome) -> Self {
        Self {
            indexed_count: 0,
            total_files: 0,
            outcome,
            errors: Vec::new(),
        }
    }
}
