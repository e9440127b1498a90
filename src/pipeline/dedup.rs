//! Duplicate suppression across batches and runs.
//!
//! Overlapping captures re-read bubbles that are still on screen, and a
//! restarted run re-reads everything. Both are filtered through one index
//! of stable keys persisted next to the exported output.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::error::ExtractError;
use crate::models::Message;

pub const INDEX_FILE_NAME: &str = ".dedup_index.json";

/// Stable keys seen so far, backed by a sorted JSON array on disk.
pub struct DeduplicationIndex {
    path: PathBuf,
    keys: HashSet<String>,
    aggressive: bool,
    persist_enabled: bool,
}

impl DeduplicationIndex {
    /// Loads the index from the output directory. A missing file starts
    /// empty; a malformed one is logged and also starts empty.
    pub fn load(output_dir: &Path, aggressive: bool) -> Self {
        let path = output_dir.join(INDEX_FILE_NAME);
        let keys = match read_keys(&path) {
            Ok(keys) => keys,
            Err(err) => {
                crate::log(&format!(
                    "Dedup index unreadable, starting empty: {err:#}"
                ));
                HashSet::new()
            }
        };
        Self {
            path,
            keys,
            aggressive,
            persist_enabled: true,
        }
    }

    /// Disabling persistence keeps filtering in memory only; dry runs use
    /// this to leave the on-disk index untouched.
    pub fn set_persist(&mut self, enabled: bool) {
        self.persist_enabled = enabled;
    }

    /// Two-stage filter. Stage 1 keeps the first occurrence per stable key
    /// within the batch (aggressive mode additionally collapses on the
    /// lowercased sender+content key). Stage 2 drops keys already in the
    /// index, then records and persists the survivors.
    pub fn filter_new(&mut self, batch: &[Message]) -> Vec<Message> {
        let mut seen_stable: HashSet<String> = HashSet::new();
        let mut seen_content: HashSet<String> = HashSet::new();
        let mut fresh = Vec::new();
        for message in batch {
            let key = message.stable_key();
            if !seen_stable.insert(key.clone()) {
                continue;
            }
            if self.aggressive && !seen_content.insert(message.content_key()) {
                continue;
            }
            if self.keys.contains(&key) {
                continue;
            }
            self.keys.insert(key);
            fresh.push(message.clone());
        }
        if self.persist_enabled && !fresh.is_empty() {
            if let Err(err) = self.persist() {
                crate::log(&format!("Failed to persist dedup index: {err:#}"));
            }
        }
        fresh
    }

    /// Writes the keys as a sorted JSON array.
    pub fn persist(&self) -> Result<()> {
        let mut keys: Vec<&String> = self.keys.iter().collect();
        keys.sort();
        let body =
            serde_json::to_string_pretty(&keys).context("Failed to serialize dedup index")?;
        fs::write(&self.path, body)
            .with_context(|| format!("Failed to write dedup index {}", self.path.display()))?;
        Ok(())
    }

    /// Forgets all keys and removes the index file, so previously seen
    /// messages are emitted again.
    pub fn clear(&mut self) -> Result<()> {
        self.keys.clear();
        if self.path.exists() {
            fs::remove_file(&self.path).with_context(|| {
                format!("Failed to remove dedup index {}", self.path.display())
            })?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

fn read_keys(path: &Path) -> Result<HashSet<String>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read dedup index {}", path.display()))?;
    let keys: Vec<String> =
        serde_json::from_str(&raw).map_err(|e| ExtractError::IndexCorrupt(e.to_string()))?;
    Ok(keys.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageType;
    use chrono::{Local, TimeZone};
    use tempfile::tempdir;

    fn message(id: &str, sender: &str, content: &str, minute: u32) -> Message {
        Message {
            id: id.to_string(),
            sender: sender.to_string(),
            content: content.to_string(),
            message_type: MessageType::Text,
            timestamp: Local.with_ymd_and_hms(2024, 10, 21, 12, minute, 0).unwrap(),
            confidence_score: 0.9,
            raw_text: String::new(),
        }
    }

    #[test]
    fn test_intra_batch_keeps_first_occurrence() {
        let dir = tempdir().unwrap();
        let mut index = DeduplicationIndex::load(dir.path(), false);
        let first = message("msg-1", "小王", "好的", 0);
        let duplicate = message("msg-1", "小王", "改了", 5);
        let fresh = index.filter_new(&[first, duplicate]);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].content, "好的");
    }

    #[test]
    fn test_filter_is_idempotent_per_batch() {
        let dir = tempdir().unwrap();
        let mut index = DeduplicationIndex::load(dir.path(), false);
        let batch = vec![message("", "小王", "好的", 0), message("", "小李", "收到", 1)];
        assert_eq!(index.filter_new(&batch).len(), 2);
        assert!(index.filter_new(&batch).is_empty());
    }

    #[test]
    fn test_index_survives_reload() {
        let dir = tempdir().unwrap();
        let batch = vec![message("", "小王", "好的", 0)];
        {
            let mut index = DeduplicationIndex::load(dir.path(), false);
            assert_eq!(index.filter_new(&batch).len(), 1);
        }
        let mut reloaded = DeduplicationIndex::load(dir.path(), false);
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.filter_new(&batch).is_empty());
    }

    #[test]
    fn test_aggressive_mode_collapses_on_content() {
        let dir = tempdir().unwrap();
        // Same sender and content at different timestamps: distinct stable
        // keys, same content key.
        let batch = vec![message("", "小王", "好的", 0), message("", "小王", "好的", 9)];

        let mut plain = DeduplicationIndex::load(dir.path(), false);
        assert_eq!(plain.filter_new(&batch).len(), 2);

        let dir = tempdir().unwrap();
        let mut aggressive = DeduplicationIndex::load(dir.path(), true);
        assert_eq!(aggressive.filter_new(&batch).len(), 1);
    }

    #[test]
    fn test_corrupt_index_starts_empty() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(INDEX_FILE_NAME), "{not json]").unwrap();
        let mut index = DeduplicationIndex::load(dir.path(), false);
        assert!(index.is_empty());
        let fresh = index.filter_new(&[message("", "小王", "好的", 0)]);
        assert_eq!(fresh.len(), 1);
    }

    #[test]
    fn test_persisted_file_is_sorted_array() {
        let dir = tempdir().unwrap();
        let mut index = DeduplicationIndex::load(dir.path(), false);
        index.filter_new(&[
            message("zzz", "a", "x", 0),
            message("aaa", "b", "y", 1),
            message("mmm", "c", "z", 2),
        ]);
        let raw = fs::read_to_string(dir.path().join(INDEX_FILE_NAME)).unwrap();
        let keys: Vec<String> = serde_json::from_str(&raw).unwrap();
        assert_eq!(keys, vec!["aaa", "mmm", "zzz"]);
    }

    #[test]
    fn test_persist_disabled_filters_in_memory_only() {
        let dir = tempdir().unwrap();
        let batch = vec![message("", "小王", "好的", 0)];
        let mut index = DeduplicationIndex::load(dir.path(), false);
        index.set_persist(false);
        assert_eq!(index.filter_new(&batch).len(), 1);
        assert!(index.filter_new(&batch).is_empty());
        assert!(!dir.path().join(INDEX_FILE_NAME).exists());
    }

    #[test]
    fn test_clear_removes_file_and_keys() {
        let dir = tempdir().unwrap();
        let batch = vec![message("", "小王", "好的", 0)];
        let mut index = DeduplicationIndex::load(dir.path(), false);
        index.filter_new(&batch);
        assert!(dir.path().join(INDEX_FILE_NAME).exists());

        index.clear().unwrap();
        assert!(index.is_empty());
        assert!(!dir.path().join(INDEX_FILE_NAME).exists());
        assert_eq!(index.filter_new(&batch).len(), 1);
    }
}
