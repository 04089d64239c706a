use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

pub type LimitResult<T> = Result<T, LimitError>;

#[derive(Debug, Error)]
pub enum LimitError {
    #[error("failed to persist limiter state to {path}: {source}")]
    Persist {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to encode limiter state: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("limiter state {path} is leased by another process; remove the file if it is stale")]
    LockHeld { path: PathBuf },
    #[error("failed to acquire limiter lease at {path}: {source}")]
    Lease {
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Durable counters shared by every process that sends through this
/// machine. Timestamps are kept raw and pruned lazily on read, so the file
/// doubles as a send history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LimiterState {
    #[serde(default)]
    pub hourly: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub daily: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub cooldown_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_sent: u64,
}

impl LimiterState {
    /// Missing file means a fresh install; an unreadable or corrupt file is
    /// logged and replaced rather than blocking every future send.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(state) => state,
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "Limiter state is corrupt, starting fresh"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "Limiter state is unreadable, starting fresh"
                );
                Self::default()
            }
        }
    }

    /// Atomic replace: the new state is written to a sibling tempfile and
    /// renamed over the old one, so a crash mid-write never truncates it.
    pub fn save(&self, path: &Path) -> LimitResult<()> {
        let payload = serde_json::to_vec_pretty(self)?;
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(|source| LimitError::Persist {
            source,
            path: path.to_path_buf(),
        })?;
        let mut tmp = NamedTempFile::new_in(parent).map_err(|source| LimitError::Persist {
            source,
            path: path.to_path_buf(),
        })?;
        tmp.write_all(&payload).map_err(|source| LimitError::Persist {
            source,
            path: path.to_path_buf(),
        })?;
        tmp.flush().map_err(|source| LimitError::Persist {
            source,
            path: path.to_path_buf(),
        })?;
        tmp.persist(path).map_err(|err| LimitError::Persist {
            source: err.error,
            path: path.to_path_buf(),
        })?;
        debug!(path = %path.display(), "Persisted limiter state");
        Ok(())
    }
}

/// Exclusive lease on the limiter state, held for the owning limiter's
/// lifetime. Guards the check-then-record window against a second sender
/// process racing the same file.
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
}

impl StateLock {
    pub fn acquire(state_path: &Path) -> LimitResult<Self> {
        let path = lock_path(state_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| LimitError::Lease {
                    source,
                    path: path.clone(),
                })?;
            }
        }
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                let _ = write!(file, "{}", std::process::id());
                debug!(path = %path.display(), "Acquired limiter lease");
                Ok(Self { path })
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(LimitError::LockHeld { path })
            }
            Err(source) => Err(LimitError::Lease { source, path }),
        }
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %err, "Failed to release limiter lease");
        } else {
            debug!(path = %self.path.display(), "Released limiter lease");
        }
    }
}

fn lock_path(state_path: &Path) -> PathBuf {
    let mut raw = state_path.as_os_str().to_os_string();
    raw.push(".lock");
    PathBuf::from(raw)
}
