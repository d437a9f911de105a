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

use crate::assets::decoder::AssetDecoder;
use crate::error::{LoaderError, Result};
use crate::task::AssetKind;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Capabilities captured once when a decoder is registered
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecoderCapabilities {
    /// Outputs may be persisted in the derived asset cache
    pub cacheable: bool,
}

/// A decoder together with its capabilities
#[derive(Clone)]
pub struct RegisteredDecoder {
    pub decoder: Arc<dyn AssetDecoder>,
    pub capabilities: DecoderCapabilities,
}

/// Explicit kind -> decoder table, built before a load session starts
#[derive(Clone, Default)]
pub struct DecoderTable {
    entries: FxHashMap<AssetKind, RegisteredDecoder>,
}

impl DecoderTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a decoder, replacing any previous one for the kind
    pub fn register<D: AssetDecoder + 'static>(&mut self, kind: AssetKind, decoder: D) {
        let capabilities = DecoderCapabilities {
            cacheable: decoder.cacheable(),
        };
        self.entries.insert(
            kind,
            RegisteredDecoder {
                decoder: Arc::new(decoder),
                capabilities,
            },
        );
    }

    /// Builder-style registration
    pub fn with<D: AssetDecoder + 'static>(mut self, kind: AssetKind, decoder: D) -> Self {
        self.register(kind, decoder);
        self
    }

    pub fn get(&self, kind: AssetKind) -> Option<&RegisteredDecoder> {
        self.entries.get(&kind)
    }

    pub fn require(&self, kind: AssetKind) -> Result<&RegisteredDecoder> {
        self.get(kind).ok_or(LoaderError::NoDecoder(kind))
    }

    pub fn contains(&self, kind: AssetKind) -> bool {
        self.entries.contains_key(&kind)
    }

    /// Kinds whose decoded output may be cached
    pub fn cacheable_kinds(&self) -> Vec<AssetKind> {
        let mut kinds: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.capabilities.cacheable)
            .map(|(kind, _)| *kind)
            .collect();
        kinds.sort();
        kinds
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
    use crate::assets::decoder::{DecodeContext, Decoded, JsonDecoder, RawBytesDecoder};

    struct CachingDecoder;

    impl AssetDecoder for CachingDecoder {
        fn decode(&self, context: DecodeContext<'_>) -> Result<Decoded> {
            RawBytesDecoder.decode(context)
        }

        fn cacheable(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_registration() {
        let table = DecoderTable::new()
            .with(AssetKind::Config, JsonDecoder)
            .with(AssetKind::Texture, CachingDecoder);

        assert_eq!(table.len(), 2);
        assert!(table.require(AssetKind::Model).is_err());
        assert_eq!(table.cacheable_kinds(), vec![AssetKind::Texture]);
        assert!(!table.require(AssetKind::Config).unwrap().capabilities.cacheable);
    }
}
