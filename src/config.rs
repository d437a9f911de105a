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

use crate::error::{LoaderError, Result};
use crate::pool::DEFAULT_BUFFERS_PER_CLASS;
use crate::time::FrameBudget;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Tunables for one load session. Every field has a default, so a partial
/// JSON document is valid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Host update frequency; control returns at least once per 1/budget_hz
    pub budget_hz: u32,
    /// Soft cap on payload bytes waiting in the prefetch buffer
    pub max_buffered_bytes: usize,
    /// The buffer may exceed the byte cap while it holds fewer tasks than this
    pub min_buffered_tasks: usize,
    pub max_concurrent_audio: usize,
    pub max_buffers_per_class: usize,
    pub cache_dir: PathBuf,
    pub settings_path: PathBuf,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            budget_hz: 30,
            max_buffered_bytes: 64 * 1024 * 1024,
            min_buffered_tasks: 2,
            max_concurrent_audio: 8,
            max_buffers_per_class: DEFAULT_BUFFERS_PER_CLASS,
            cache_dir: PathBuf::from("derived_cache"),
            settings_path: PathBuf::from("loader_settings.json"),
        }
    }
}

impl LoaderConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| LoaderError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            LoaderError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| LoaderError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.budget_hz == 0 {
            return Err(LoaderError::Config("budget_hz must be positive".to_string()));
        }
        if self.max_concurrent_audio == 0 {
            return Err(LoaderError::Config(
                "max_concurrent_audio must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn frame_budget(&self) -> FrameBudget {
        FrameBudget::from_hz(self.budget_hz)
    }

    /// Point both the cache and the settings file into one directory
    pub fn rooted_at(mut self, dir: &Path) -> Self {
        self.cache_dir = dir.join("derived_cache");
        self.settings_path = dir.join("loader_settings.json");
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = LoaderConfig::from_json_str(r#"{"budget_hz": 60}"#).unwrap();
        assert_eq!(config.budget_hz, 60);
        assert_eq!(config.max_buffered_bytes, 64 * 1024 * 1024);
        assert_eq!(config.min_buffered_tasks, 2);
    }

    #[test]
    fn test_rejects_zero_budget() {
        assert!(matches!(
            LoaderConfig::from_json_str(r#"{"budget_hz": 0}"#),
            Err(LoaderError::Config(_))
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let config = LoaderConfig {
            max_concurrent_audio: 3,
            ..LoaderConfig::default()
        };
        let text = config.to_json_string().unwrap();
        assert_eq!(LoaderConfig::from_json_str(&text).unwrap(), config);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loader.json");
        std::fs::write(&path, r#"{"max_buffers_per_class": 1}"#).unwrap();
        assert_eq!(LoaderConfig::from_json_file(&path).unwrap().max_buffers_per_class, 1);
        assert!(LoaderConfig::from_json_file(&dir.path().join("nope.json")).is_err());
    }

    #[test]
    fn test_frame_budget() {
        let budget = LoaderConfig::default().frame_budget();
        assert!(budget.quantum().as_millis() >= 33);
    }
}
