// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Versioned flat-text cache index

use crate::cache::entry::CacheEntry;
use crate::error::{LoaderError, Result};
use ahash::AHashMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tracing::warn;

/// First line of every index file
pub const INDEX_VERSION: &str = "V2";

/// Ordered collection of cache entries
#[derive(Clone, Debug, Default)]
pub struct CacheIndex {
    entries: Vec<CacheEntry>,
    by_key: AHashMap<String, usize>,
}

impl CacheIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse index text. A wrong version tag is an error; malformed entry
    /// lines are skipped.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines();
        match lines.next().map(str::trim) {
            Some(INDEX_VERSION) => {}
            Some(other) => {
                return Err(LoaderError::CacheIndex(format!(
                    "unsupported index version '{other}'"
                )))
            }
            None => return Err(LoaderError::CacheIndex("empty index".to_string())),
        }

        let mut index = Self::new();
        for (number, line) in lines.enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match CacheEntry::parse_line(line) {
                Ok(entry) => {
                    if index.get(&entry.key).is_some() {
                        warn!(key = %entry.key, "duplicate cache index row, keeping first");
                        continue;
                    }
                    index.insert(entry);
                }
                Err(e) => warn!(line = number + 2, error = %e, "skipping malformed cache index row"),
            }
        }
        Ok(index)
    }

    /// Read from disk; `Ok(None)` when the file does not exist
    pub fn read(path: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LoaderError::CacheIndex(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    pub fn to_text(&self) -> String {
        let mut text = String::with_capacity(16 + self.entries.len() * 64);
        text.push_str(INDEX_VERSION);
        text.push('\n');
        for entry in &self.entries {
            text.push_str(&entry.to_line());
            text.push('\n');
        }
        text
    }

    /// Rewrite the whole index through a temporary file and rename
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| LoaderError::CacheIndex("index path has no parent".to_string()))?;
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("index");
        let tmp = parent.join(format!(".{file_name}.tmp"));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(self.to_text().as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Insert or replace the entry for its key
    pub fn insert(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        match self.by_key.get(&entry.key) {
            Some(&slot) => Some(std::mem::replace(&mut self.entries[slot], entry)),
            None => {
                self.by_key.insert(entry.key.clone(), self.entries.len());
                self.entries.push(entry);
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let slot = self.by_key.remove(key)?;
        let removed = self.entries.swap_remove(slot);
        if let Some(moved) = self.entries.get(slot) {
            self.by_key.insert(moved.key.clone(), slot);
        }
        Some(removed)
    }

    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.by_key.get(key).map(|&slot| &self.entries[slot])
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut CacheEntry> {
        let slot = *self.by_key.get(key)?;
        self.entries.get_mut(slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.iter()
    }

    /// Keep only entries for which `keep` returns true
    pub fn retain(&mut self, mut keep: impl FnMut(&CacheEntry) -> bool) -> Vec<CacheEntry> {
        let (kept, dropped): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.entries).into_iter().partition(|e| keep(e));
        self.by_key = kept
            .iter()
            .enumerate()
            .map(|(slot, e)| (e.key.clone(), slot))
            .collect();
        self.entries = kept;
        dropped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, id: u32) -> CacheEntry {
        CacheEntry {
            key: key.to_string(),
            id,
            source_size: 10,
            source_timestamp: 20,
            width: 4,
            height: 4,
            mip_count: 1,
            flags: 0,
            byte_len: 16,
            loaded: false,
        }
    }

    #[test]
    fn test_parse_checks_version() {
        assert!(CacheIndex::parse("V1\n").is_err());
        assert!(CacheIndex::parse("").is_err());
        assert!(CacheIndex::parse("V2\n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_skips_bad_rows() {
        let text = format!("V2\n{}\ngarbage\n\n{}\n", entry("a", 1).to_line(), entry("b", 2).to_line());
        let index = CacheIndex::parse(&text).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.get("b").map(|e| e.id), Some(2));
    }

    #[test]
    fn test_remove_keeps_lookup_consistent() {
        let mut index = CacheIndex::new();
        index.insert(entry("a", 1));
        index.insert(entry("b", 2));
        index.insert(entry("c", 3));

        assert_eq!(index.remove("a").map(|e| e.id), Some(1));
        assert_eq!(index.get("c").map(|e| e.id), Some(3));
        assert_eq!(index.get("b").map(|e| e.id), Some(2));
        assert!(index.get("a").is_none());
    }

    #[test]
    fn test_retain_returns_dropped() {
        let mut index = CacheIndex::new();
        index.insert(entry("a", 1));
        index.insert(entry("b", 2));
        let dropped = index.retain(|e| e.id == 2);
        assert_eq!(dropped.len(), 1);
        assert_eq!(index.get("b").map(|e| e.id), Some(2));
        assert!(index.get("a").is_none());
    }

    #[test]
    fn test_write_atomic_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.txt");
        let mut index = CacheIndex::new();
        index.insert(entry("x", 9));
        index.write_atomic(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("V2\n"));
        let read = CacheIndex::read(&path).unwrap().unwrap();
        assert_eq!(read.get("x").map(|e| e.id), Some(9));
        assert!(CacheIndex::read(&dir.path().join("missing")).unwrap().is_none());
    }
}
