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

//! Error types

use crate::task::AssetKind;
use std::fmt;

/// Loader error type
#[derive(Debug, Clone)]
pub enum LoaderError {
    /// IO error (file operations, etc.)
    IoError(String),

    /// Reading the source bytes of an item failed
    SourceRead { key: String, reason: String },

    /// No decoder registered for this kind
    NoDecoder(AssetKind),

    /// Decoder rejected the payload
    Decode { key: String, reason: String },

    /// Cache index could not be read or written
    CacheIndex(String),

    /// Cached backing file did not match its entry
    CacheCorrupt(String),

    /// Invalid loader configuration
    Config(String),

    /// Opt-in settings could not be read or written
    Settings(String),

    /// An asynchronous operation failed to start or complete
    Operation { key: String, reason: String },

    /// A work unit panicked while being resumed
    Panicked(String),

    /// Background reader exited with work outstanding
    ReaderTerminated { processed: usize, total: usize },

    /// Generic failure reported by a work unit
    UnitFailed(String),

    /// Root scheduler failure
    Fatal(FatalError),
}

/// Context captured when the root work unit fails.
///
/// `phase` names what the root was doing, `item` the logical key being
/// processed when the failure happened (if one was).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalError {
    pub phase: String,
    pub item: Option<String>,
    pub message: String,
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.item {
            Some(item) => write!(
                f,
                "Loading halted during '{}' while processing '{}': {}",
                self.phase, item, self.message
            ),
            None => write!(f, "Loading halted during '{}': {}", self.phase, self.message),
        }
    }
}

impl fmt::Display for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoaderError::IoError(msg) => write!(f, "IO error: {msg}"),
            LoaderError::SourceRead { key, reason } => {
                write!(f, "Failed to read source of '{key}': {reason}")
            }
            LoaderError::NoDecoder(kind) => write!(f, "No decoder registered for {kind:?}"),
            LoaderError::Decode { key, reason } => write!(f, "Failed to decode '{key}': {reason}"),
            LoaderError::CacheIndex(msg) => write!(f, "Cache index error: {msg}"),
            LoaderError::CacheCorrupt(msg) => write!(f, "Cache entry corrupt: {msg}"),
            LoaderError::Config(msg) => write!(f, "Configuration error: {msg}"),
            LoaderError::Settings(msg) => write!(f, "Settings error: {msg}"),
            LoaderError::Operation { key, reason } => {
                write!(f, "Operation for '{key}' failed: {reason}")
            }
            LoaderError::Panicked(msg) => write!(f, "Work unit panicked: {msg}"),
            LoaderError::ReaderTerminated { processed, total } => write!(
                f,
                "Reader thread exited early ({processed}/{total} tasks processed)"
            ),
            LoaderError::UnitFailed(msg) => write!(f, "Work unit failed: {msg}"),
            LoaderError::Fatal(fatal) => write!(f, "{fatal}"),
        }
    }
}

impl std::error::Error for LoaderError {}

impl From<std::io::Error> for LoaderError {
    fn from(err: std::io::Error) -> Self {
        LoaderError::IoError(err.to_string())
    }
}

impl From<FatalError> for LoaderError {
    fn from(err: FatalError) -> Self {
        LoaderError::Fatal(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, LoaderError>;
