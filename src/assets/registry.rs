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

use crate::assets::Asset;
use crate::error::{LoaderError, Result};
use crate::task::{AssetItem, AssetKind};
use ahash::AHashMap;
use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;

/// Host asset registry.
///
/// Enumerated once when a session starts; receives every decoded resource.
pub trait AssetRegistry {
    /// Items to load
    fn items(&self) -> Vec<AssetItem>;

    /// Accept a decoded resource
    fn apply(&mut self, key: &str, kind: AssetKind, asset: Box<dyn Asset>);
}

/// Registry handle shared between the host and a load session
pub type SharedRegistry = Rc<RefCell<dyn AssetRegistry>>;

/// In-memory registry
#[derive(Default)]
pub struct MemoryRegistry {
    items: Vec<AssetItem>,
    loaded: AHashMap<String, (AssetKind, Box<dyn Asset>)>,
    applied: usize,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: Vec<AssetItem>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }

    pub fn push(&mut self, item: AssetItem) {
        self.items.push(item);
    }

    /// Collect every file under `root` with a known extension.
    ///
    /// Keys are paths relative to `root` using forward slashes.
    pub fn scan_dir(root: &Path) -> Result<Self> {
        let mut items = Vec::new();
        Self::scan_into(root, root, &mut items)?;
        items.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(Self::with_items(items))
    }

    fn scan_into(root: &Path, dir: &Path, items: &mut Vec<AssetItem>) -> Result<()> {
        let entries = fs::read_dir(dir).map_err(|e| {
            LoaderError::IoError(format!("Failed to read directory {}: {e}", dir.display()))
        })?;

        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                Self::scan_into(root, &path, items)?;
                continue;
            }

            let Some(kind) = path
                .extension()
                .and_then(|e| e.to_str())
                .and_then(AssetKind::from_extension)
            else {
                continue;
            };

            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            items.push(AssetItem::new(key, path.clone(), kind));
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&dyn Asset> {
        self.loaded.get(key).map(|(_, asset)| asset.as_ref())
    }

    pub fn get_as<T: Asset>(&self, key: &str) -> Option<&T> {
        self.get(key)?.as_any().downcast_ref::<T>()
    }

    pub fn kind_of(&self, key: &str) -> Option<AssetKind> {
        self.loaded.get(key).map(|(kind, _)| *kind)
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    /// Total number of apply calls, including replacements
    pub fn applied_count(&self) -> usize {
        self.applied
    }

    pub fn memory_usage(&self) -> usize {
        self.loaded.values().map(|(_, asset)| asset.memory_size()).sum()
    }
}

impl AssetRegistry for MemoryRegistry {
    fn items(&self) -> Vec<AssetItem> {
        self.items.clone()
    }

    fn apply(&mut self, key: &str, kind: AssetKind, asset: Box<dyn Asset>) {
        self.applied += 1;
        self.loaded.insert(key.to_string(), (kind, asset));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::decoder::BinaryAsset;

    #[test]
    fn test_scan_dir_classifies_and_keys() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Parts/Engine")).unwrap();
        fs::write(dir.path().join("Parts/Engine/nozzle.png"), b"png").unwrap();
        fs::write(dir.path().join("Parts/Engine/part.cfg"), b"cfg").unwrap();
        fs::write(dir.path().join("readme.exe"), b"nope").unwrap();

        let registry = MemoryRegistry::scan_dir(dir.path()).unwrap();
        let items = registry.items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].key, "Parts/Engine/nozzle.png");
        assert_eq!(items[0].kind, AssetKind::Texture);
        assert_eq!(items[1].kind, AssetKind::Config);
    }

    #[test]
    fn test_apply_and_downcast() {
        let mut registry = MemoryRegistry::new();
        registry.apply(
            "blob",
            AssetKind::Data,
            Box::new(BinaryAsset {
                data: vec![1, 2, 3],
                key: "blob".to_string(),
            }),
        );
        assert_eq!(registry.get_as::<BinaryAsset>("blob").unwrap().data, vec![1, 2, 3]);
        assert_eq!(registry.kind_of("blob"), Some(AssetKind::Data));
        assert_eq!(registry.memory_usage(), 3);
    }
}
