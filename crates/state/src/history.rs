//! JSON file persistence for the closed-trade history.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to access history file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("history file {path} is not a JSON array of trades: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Reads the history array. A missing file is an empty history.
pub fn load(path: &Path) -> Result<Vec<Value>, HistoryError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(HistoryError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str(&raw).map_err(|source| HistoryError::Format {
        path: path.to_path_buf(),
        source,
    })
}

pub fn save(path: &Path, history: &[Value]) -> Result<(), HistoryError> {
    let io_err = |source| HistoryError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }
    let body = serde_json::to_string_pretty(history).map_err(|source| HistoryError::Format {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, body).map_err(io_err)
}

pub(crate) fn load_or_empty(path: &Path) -> Vec<Value> {
    match load(path) {
        Ok(history) => {
            info!(path = %path.display(), trades = history.len(), "trade history loaded");
            history
        }
        Err(err) => {
            warn!(error = %err, "trade history unreadable, starting empty");
            Vec::new()
        }
    }
}

pub(crate) fn save_logged(path: &Path, history: &[Value]) {
    if let Err(err) = save(path, history) {
        warn!(error = %err, "failed to persist trade history");
    }
}
