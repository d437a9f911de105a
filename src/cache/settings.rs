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
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

/// Persisted user choice about the derived asset cache
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub choice_made: bool,
    pub caching_enabled: bool,
}

impl CacheSettings {
    pub fn chosen(caching_enabled: bool) -> Self {
        Self {
            choice_made: true,
            caching_enabled,
        }
    }

    /// Load from disk; a missing file means no choice was made yet
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| LoaderError::Settings(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(LoaderError::Settings(format!("{}: {e}", path.display()))),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| LoaderError::Settings(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Asks the user whether derived assets may be cached.
///
/// Polled once per resume until it answers.
pub trait OptInPrompt {
    fn poll_choice(&mut self) -> Option<bool>;
}

/// Prompt that answers immediately, or after a number of polls
#[derive(Clone, Copy, Debug)]
pub struct FixedChoice {
    pub answer: bool,
    pub delay_polls: u32,
}

impl FixedChoice {
    pub fn new(answer: bool) -> Self {
        Self {
            answer,
            delay_polls: 0,
        }
    }

    pub fn after(answer: bool, delay_polls: u32) -> Self {
        Self {
            answer,
            delay_polls,
        }
    }
}

impl OptInPrompt for FixedChoice {
    fn poll_choice(&mut self) -> Option<bool> {
        if self.delay_polls > 0 {
            self.delay_polls -= 1;
            return None;
        }
        Some(self.answer)
    }
}
