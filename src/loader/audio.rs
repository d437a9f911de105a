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

use crate::assets::{AssetDecoder, DecodeContext, Decoded};
use crate::error::{LoaderError, Result};
use crate::launcher::AsyncOperation;
use crate::loader::Shared;
use crate::task::AssetItem;
use crossbeam::channel::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::task::Poll;
use std::thread::JoinHandle;
use tracing::trace;

/// Reads and decodes one item on a short-lived thread.
///
/// The result travels back over a channel and is applied to the registry
/// on the foreground when polled.
pub struct ThreadedDecodeOperation {
    item: AssetItem,
    decoder: Arc<dyn AssetDecoder>,
    shared: Shared,
    receiver: Option<Receiver<Result<Decoded>>>,
    worker: Option<JoinHandle<()>>,
}

impl ThreadedDecodeOperation {
    pub(crate) fn new(item: AssetItem, decoder: Arc<dyn AssetDecoder>, shared: Shared) -> Self {
        Self {
            item,
            decoder,
            shared,
            receiver: None,
            worker: None,
        }
    }

    fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    fn apply(&mut self, decoded: Decoded) {
        let registry = self.shared.borrow().registry.clone();
        registry
            .borrow_mut()
            .apply(&self.item.key, self.item.kind, decoded.into_asset());
        self.shared.borrow_mut().seen.insert(self.item.key.clone());
    }
}

impl AsyncOperation for ThreadedDecodeOperation {
    fn key(&self) -> &str {
        &self.item.key
    }

    fn start(&mut self) -> Result<()> {
        let (sender, receiver) = channel::bounded(1);
        let key = self.item.key.clone();
        let path = self.item.source_path.clone();
        let decoder = self.decoder.clone();

        let worker = std::thread::Builder::new()
            .name("asset-decode".to_string())
            .spawn(move || {
                let result = std::fs::read(&path)
                    .map_err(|e| LoaderError::SourceRead {
                        key: key.clone(),
                        reason: e.to_string(),
                    })
                    .and_then(|bytes| {
                        decoder.decode(DecodeContext {
                            key: &key,
                            path: &path,
                            bytes: &bytes,
                        })
                    });
                let _ = sender.send(result);
            })
            .map_err(|e| LoaderError::Operation {
                key: self.item.key.clone(),
                reason: format!("failed to spawn decode thread: {e}"),
            })?;

        trace!(key = %self.item.key, "decode thread started");
        self.receiver = Some(receiver);
        self.worker = Some(worker);
        Ok(())
    }

    fn poll(&mut self) -> Poll<Result<()>> {
        let Some(receiver) = self.receiver.as_ref() else {
            return Poll::Ready(Err(LoaderError::Operation {
                key: self.item.key.clone(),
                reason: "polled before start".to_string(),
            }));
        };

        match receiver.try_recv() {
            Err(TryRecvError::Empty) => Poll::Pending,
            Err(TryRecvError::Disconnected) => {
                self.receiver = None;
                self.join();
                Poll::Ready(Err(LoaderError::Operation {
                    key: self.item.key.clone(),
                    reason: "decode thread exited without a result".to_string(),
                }))
            }
            Ok(result) => {
                self.receiver = None;
                self.join();
                let decoded = result?;
                self.apply(decoded);
                Poll::Ready(Ok(()))
            }
        }
    }
}

impl Drop for ThreadedDecodeOperation {
    fn drop(&mut self) {
        self.join();
    }
}
