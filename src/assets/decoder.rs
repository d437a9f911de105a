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

use crate::assets::{Asset, DerivedImage};
use crate::error::{LoaderError, Result};
use std::any::Any;
use std::path::Path;

/// Context provided to decoders
pub struct DecodeContext<'a> {
    pub key: &'a str,
    pub path: &'a Path,
    pub bytes: &'a [u8],
}

impl DecodeContext<'_> {
    /// Build a decode error tagged with this item's key
    pub fn error(&self, reason: impl Into<String>) -> LoaderError {
        LoaderError::Decode {
            key: self.key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Decoder output
pub enum Decoded {
    /// Derived image, eligible for the on-disk cache
    Derived(DerivedImage),
    /// Any other resource
    Asset(Box<dyn Asset>),
}

impl Decoded {
    pub fn into_asset(self) -> Box<dyn Asset> {
        match self {
            Decoded::Derived(image) => Box::new(image),
            Decoded::Asset(asset) => asset,
        }
    }

    pub fn as_derived(&self) -> Option<&DerivedImage> {
        match self {
            Decoded::Derived(image) => Some(image),
            Decoded::Asset(_) => None,
        }
    }
}

impl std::fmt::Debug for Decoded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decoded::Derived(image) => f.debug_tuple("Derived").field(image).finish(),
            Decoded::Asset(asset) => f.debug_tuple("Asset").field(&asset.type_name()).finish(),
        }
    }
}

/// Turns raw bytes into a resource.
///
/// Must not touch pipeline state; side effects on the host's own resource
/// database are allowed.
pub trait AssetDecoder: Send + Sync {
    fn decode(&self, context: DecodeContext<'_>) -> Result<Decoded>;

    /// Whether outputs of this decoder may be written to the derived cache
    fn cacheable(&self) -> bool {
        false
    }
}

impl<F> AssetDecoder for F
where
    F: Fn(DecodeContext<'_>) -> Result<Decoded> + Send + Sync,
{
    fn decode(&self, context: DecodeContext<'_>) -> Result<Decoded> {
        self(context)
    }
}

/// Simple binary data asset
#[derive(Clone, Debug)]
pub struct BinaryAsset {
    pub data: Vec<u8>,
    pub key: String,
}

impl Asset for BinaryAsset {
    fn memory_size(&self) -> usize {
        self.data.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Keeps the bytes as-is
pub struct RawBytesDecoder;

impl AssetDecoder for RawBytesDecoder {
    fn decode(&self, context: DecodeContext<'_>) -> Result<Decoded> {
        Ok(Decoded::Asset(Box::new(BinaryAsset {
            data: context.bytes.to_vec(),
            key: context.key.to_string(),
        })))
    }
}

/// JSON data asset
#[derive(Clone, Debug)]
pub struct JsonAsset {
    pub value: serde_json::Value,
    pub key: String,
}

impl Asset for JsonAsset {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Parses JSON documents
pub struct JsonDecoder;

impl AssetDecoder for JsonDecoder {
    fn decode(&self, context: DecodeContext<'_>) -> Result<Decoded> {
        let value: serde_json::Value = serde_json::from_slice(context.bytes)
            .map_err(|e| context.error(format!("JSON parse error: {e}")))?;

        Ok(Decoded::Asset(Box::new(JsonAsset {
            value,
            key: context.key.to_string(),
        })))
    }
}

/// Text file asset
#[derive(Clone, Debug)]
pub struct TextAsset {
    pub content: String,
    pub key: String,
}

impl Asset for TextAsset {
    fn memory_size(&self) -> usize {
        self.content.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Decodes UTF-8 text
pub struct TextDecoder;

impl AssetDecoder for TextDecoder {
    fn decode(&self, context: DecodeContext<'_>) -> Result<Decoded> {
        let content = String::from_utf8(context.bytes.to_vec())
            .map_err(|e| context.error(format!("UTF-8 decode error: {e}")))?;

        Ok(Decoded::Asset(Box::new(TextAsset {
            content,
            key: context.key.to_string(),
        })))
    }
}
