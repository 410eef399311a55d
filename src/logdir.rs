//! Log directory normalization.
//!
//! Every `logdir` a client sends is resolved lexically under the storage root.
//! The result is the registry key, so two spellings of one directory
//! (`runs/a`, `runs//a/`, `./runs/a`) always map to the same backend.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogdirError {
    #[error("logdir is empty")]
    Empty,

    #[error("logdir '{0}' escapes the storage root")]
    Traversal(String),

    #[error("logdir contains an invalid character")]
    InvalidCharacter,
}

/// A validated log directory: canonical absolute path under the storage root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogDir {
    relative: String,
    path: PathBuf,
}

impl LogDir {
    /// Normalize `raw` relative to `root`.
    ///
    /// Absolute inputs already under `root` are accepted as-is; any other
    /// leading `/` is ignored. `.` and empty segments are dropped, `..` is
    /// rejected outright rather than resolved.
    pub fn parse(root: &Path, raw: &str) -> Result<Self, LogdirError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(LogdirError::Empty);
        }
        if raw.contains('\0') || raw.contains('\\') {
            return Err(LogdirError::InvalidCharacter);
        }

        let candidate = Path::new(raw);
        let relative_part = if candidate.is_absolute() {
            candidate.strip_prefix(root).unwrap_or(candidate)
        } else {
            candidate
        };

        let mut segments: Vec<&str> = Vec::new();
        for component in relative_part.components() {
            match component {
                Component::Normal(segment) => match segment.to_str() {
                    Some(segment) => segments.push(segment),
                    None => return Err(LogdirError::InvalidCharacter),
                },
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
                Component::ParentDir => return Err(LogdirError::Traversal(raw.to_string())),
            }
        }

        if segments.is_empty() {
            return Err(LogdirError::Empty);
        }

        let relative = segments.join("/");
        let path = segments.iter().fold(root.to_path_buf(), |acc, s| acc.join(s));
        Ok(Self { relative, path })
    }

    /// Absolute path handed to the backend process.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path relative to the storage root, as clients spell it.
    pub fn relative(&self) -> &str {
        &self.relative
    }

    /// Log what the backend is about to read.
    ///
    /// A missing directory is not an error: training may not have written its
    /// first event file yet, and TensorBoard picks it up once it appears.
    pub async fn inspect(&self) {
        let mut entries = match tokio::fs::read_dir(&self.path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(logdir = %self, "Log directory does not exist yet");
                return;
            }
            Err(e) => {
                tracing::warn!(logdir = %self, error = %e, "Failed to list log directory");
                return;
            }
        };

        let mut files = 0usize;
        let mut event_files = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            files += 1;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.to_lowercase().contains("tfevents") {
                event_files.push(name);
            }
        }

        tracing::info!(
            logdir = %self,
            files,
            event_files = event_files.len(),
            "Inspected log directory"
        );
        tracing::debug!(logdir = %self, ?event_files, "Event files found");
    }
}

impl fmt::Display for LogDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}
