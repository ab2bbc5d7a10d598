//! Most-recently-used list of scanned directories

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::DEFAULT_HISTORY_LIMIT;

/// Recently scanned directories, most recent first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanHistory {
    entries: Vec<PathBuf>,
    limit: usize,
}

impl Default for ScanHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl ScanHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            limit,
        }
    }

    /// Move `dir` to the front, dropping the oldest entry past the limit
    ///
    /// Filesystem roots and drive letters are not recorded.
    pub fn record(&mut self, dir: &Path) -> bool {
        if dir.parent().is_none() || self.limit == 0 {
            return false;
        }
        self.entries.retain(|existing| existing != dir);
        self.entries.insert(0, dir.to_path_buf());
        self.entries.truncate(self.limit);
        true
    }

    pub fn remove(&mut self, dir: &Path) -> bool {
        let before = self.entries.len();
        self.entries.retain(|existing| existing != dir);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
