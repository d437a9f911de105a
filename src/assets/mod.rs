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

// Asset Module
//
// Host-facing collaborators of the loading pipeline:
// - Decoders turning raw bytes into resources
// - The kind -> decoder registration table
// - The registry that enumerates items and receives results

pub mod decoder;
pub mod registry;
pub mod table;

pub use decoder::{
    AssetDecoder, BinaryAsset, DecodeContext, Decoded, JsonAsset, JsonDecoder, RawBytesDecoder,
    TextAsset, TextDecoder,
};
pub use registry::{AssetRegistry, MemoryRegistry, SharedRegistry};
pub use table::{DecoderCapabilities, DecoderTable, RegisteredDecoder};

use std::any::Any;

/// Trait for in-memory resources produced by decoders
pub trait Asset: Send + Sync + 'static {
    /// Get asset type name
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Get approximate memory size in bytes
    fn memory_size(&self) -> usize {
        std::mem::size_of_val(self)
    }

    /// Downcast support for hosts that know the concrete type
    fn as_any(&self) -> &dyn Any;
}

/// Bit flags describing a derived image
pub struct ImageFlags;

impl ImageFlags {
    pub const COMPRESSED: u32 = 1;
    pub const HAS_ALPHA: u32 = 1 << 1;
    pub const LINEAR: u32 = 1 << 2;
    pub const READABLE: u32 = 1 << 3;
}

/// GPU-ready image produced by recompressing a decoded source image.
///
/// This is the representation stored in the derived asset cache: the raw
/// bytes plus enough metadata to rebuild the resource without the source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DerivedImage {
    pub width: u32,
    pub height: u32,
    pub mip_count: u32,
    pub flags: u32,
    pub data: Vec<u8>,
}

impl DerivedImage {
    /// Largest mip chain possible for the dimensions
    pub fn max_mips(width: u32, height: u32) -> u32 {
        32 - width.max(height).max(1).leading_zeros()
    }

    /// Metadata is self-consistent and there is data to upload
    pub fn is_consistent(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.mip_count >= 1
            && self.mip_count <= Self::max_mips(self.width, self.height)
            && !self.data.is_empty()
    }
}

impl Asset for DerivedImage {
    fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.data.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
