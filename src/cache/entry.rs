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
use crate::task::SourceIdentity;
use std::str::FromStr;

const FIELD_SEPARATOR: char = '\t';
const FIELD_COUNT: usize = 9;

/// One durable derived-asset record
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    /// Random id, also the backing file name
    pub id: u32,
    pub source_size: u64,
    pub source_timestamp: u64,
    pub width: u32,
    pub height: u32,
    pub mip_count: u32,
    pub flags: u32,
    /// Length of the backing file
    pub byte_len: u64,
    /// Used during this session; never persisted
    pub(crate) loaded: bool,
}

impl CacheEntry {
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn matches(&self, identity: SourceIdentity) -> bool {
        self.source_size == identity.size && self.source_timestamp == identity.timestamp
    }

    /// Keys with separators or line breaks cannot be represented in the index
    pub fn is_storable_key(key: &str) -> bool {
        !key.is_empty() && !key.contains(&['\t', '\n', '\r'][..])
    }

    /// Serialize as one index line (without the line break)
    pub fn to_line(&self) -> String {
        [
            self.key.clone(),
            self.id.to_string(),
            self.source_size.to_string(),
            self.source_timestamp.to_string(),
            self.width.to_string(),
            self.height.to_string(),
            self.mip_count.to_string(),
            self.flags.to_string(),
            self.byte_len.to_string(),
        ]
        .join("\t")
    }

    /// Parse one index line. Parsed entries start out not loaded.
    pub fn parse_line(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
        if fields.len() != FIELD_COUNT {
            return Err(LoaderError::CacheIndex(format!(
                "expected {FIELD_COUNT} fields, found {}",
                fields.len()
            )));
        }
        if fields[0].is_empty() {
            return Err(LoaderError::CacheIndex("empty key".to_string()));
        }

        Ok(Self {
            key: fields[0].to_string(),
            id: parse_field(fields[1], "id")?,
            source_size: parse_field(fields[2], "source_size")?,
            source_timestamp: parse_field(fields[3], "source_timestamp")?,
            width: parse_field(fields[4], "width")?,
            height: parse_field(fields[5], "height")?,
            mip_count: parse_field(fields[6], "mip_count")?,
            flags: parse_field(fields[7], "flags")?,
            byte_len: parse_field(fields[8], "byte_len")?,
            loaded: false,
        })
    }
}

fn parse_field<T: FromStr>(text: &str, name: &str) -> Result<T> {
    text.trim()
        .parse()
        .map_err(|_| LoaderError::CacheIndex(format!("invalid {name}: '{text}'")))
}
