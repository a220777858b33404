//! Item-level resume state for the fetch stages.
//!
//! Each completed item is appended to a JSON-lines log next to the output
//! table and loaded into a set at start-up, so resuming never rescans the
//! output itself.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PipelineError;

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointEntry {
    item: String,
    completed_at: String,
}

#[derive(Debug)]
pub struct CheckpointIndex {
    path: Utf8PathBuf,
    done: HashSet<String>,
    log: File,
}

impl CheckpointIndex {
    /// Loads the log at `path`. When no log exists yet, `seed` supplies items
    /// already known to be complete (from an older output file) and they are
    /// written to a fresh log.
    pub fn open<F>(path: &Utf8Path, seed: F) -> Result<Self, PipelineError>
    where
        F: FnOnce() -> Result<Vec<String>, PipelineError>,
    {
        let existed = path.as_std_path().is_file();
        let mut done = HashSet::new();
        let mut torn_tail = false;
        if existed {
            let content = fs::read_to_string(path.as_std_path())
                .map_err(|err| PipelineError::Filesystem(format!("read {path}: {err}")))?;
            torn_tail = !content.is_empty() && !content.ends_with('\n');
            for (index, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<CheckpointEntry>(line) {
                    Ok(entry) => {
                        done.insert(entry.item);
                    }
                    // A crash can leave a torn final line.
                    Err(err) => warn!(path = %path, line = index + 1, "skipping checkpoint line: {err}"),
                }
            }
        } else if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        }

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_std_path())
            .map_err(|err| PipelineError::Filesystem(format!("open {path}: {err}")))?;

        let mut index = Self {
            path: path.to_path_buf(),
            done,
            log,
        };
        if torn_tail {
            index
                .log
                .write_all(b"\n")
                .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        }

        if !existed {
            let seeded = seed()?;
            if !seeded.is_empty() {
                debug!(path = %index.path, items = seeded.len(), "seeding checkpoint from existing output");
            }
            for item in seeded {
                index.mark_done(&item)?;
            }
        }
        Ok(index)
    }

    pub fn is_done(&self, item: &str) -> bool {
        self.done.contains(item)
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }

    pub fn mark_done(&mut self, item: &str) -> Result<(), PipelineError> {
        if !self.done.insert(item.to_string()) {
            return Ok(());
        }
        let entry = CheckpointEntry {
            item: item.to_string(),
            completed_at: Utc::now().to_rfc3339(),
        };
        let mut line = serde_json::to_string(&entry)
            .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        line.push('\n');
        self.log
            .write_all(line.as_bytes())
            .and_then(|_| self.log.flush())
            .map_err(|err| PipelineError::Filesystem(format!("write {}: {err}", self.path)))
    }
}
