// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connected stream clients.

use crate::model::Stream;
use crate::rpc::{Channel, CpuClient, MemoryClient};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-category clients bound to one stream's channel.
#[derive(Clone)]
pub struct StreamClient {
    stream: Stream,
    channel: Arc<dyn Channel>,
    memory: Arc<dyn MemoryClient>,
    cpu: Arc<dyn CpuClient>,
}

impl StreamClient {
    /// Bind every category client on `channel`.
    pub fn bind(stream: Stream, channel: Arc<dyn Channel>) -> Self {
        let memory = channel.memory_client();
        let cpu = channel.cpu_client();
        Self {
            stream,
            channel,
            memory,
            cpu,
        }
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    pub fn memory(&self) -> Arc<dyn MemoryClient> {
        Arc::clone(&self.memory)
    }

    pub fn cpu(&self) -> Arc<dyn CpuClient> {
        Arc::clone(&self.cpu)
    }
}

/// Stream id to client bundle. At most one bundle per stream.
#[derive(Default)]
pub struct StreamClientRegistry {
    clients: Mutex<HashMap<i64, StreamClient>>,
}

impl StreamClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a bundle for `stream` unless one exists.
    ///
    /// Returns the new bundle, or `None` if the stream was already connected
    /// (the channel is left untouched in that case).
    pub fn connect(&self, stream: &Stream, channel: Arc<dyn Channel>) -> Option<StreamClient> {
        let mut clients = self.clients.lock();
        if clients.contains_key(&stream.stream_id) {
            return None;
        }
        let client = StreamClient::bind(stream.clone(), channel);
        clients.insert(stream.stream_id, client.clone());
        Some(client)
    }

    /// Remove and return the bundle for `stream_id`
    pub fn disconnect(&self, stream_id: i64) -> Option<StreamClient> {
        self.clients.lock().remove(&stream_id)
    }

    /// Remove and return every bundle
    pub fn drain(&self) -> Vec<(i64, StreamClient)> {
        self.clients.lock().drain().collect()
    }

    pub fn get(&self, stream_id: i64) -> Option<StreamClient> {
        self.clients.lock().get(&stream_id).cloned()
    }

    pub fn contains(&self, stream_id: i64) -> bool {
        self.clients.lock().contains_key(&stream_id)
    }

    /// Connected stream ids, ascending
    pub fn stream_ids(&self) -> Vec<i64> {
        let mut ids: Vec<_> = self.clients.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::MockChannel;

    #[test]
    fn test_connect_binds_once() {
        let registry = StreamClientRegistry::new();
        let channel = MockChannel::new();

        let stream = Stream::new(5, 500, "app");

        let client = registry.connect(&stream, Arc::new(channel.clone())).unwrap();
        assert_eq!(client.stream(), &stream);
        assert!(registry.connect(&stream, Arc::new(channel.clone())).is_none());

        // memory + cpu clients of the first bundle only
        assert_eq!(channel.binding_count(), 2);
        assert_eq!(registry.stream_ids(), vec![5]);
    }

    #[test]
    fn test_disconnect_and_drain() {
        let registry = StreamClientRegistry::new();
        registry.connect(&Stream::new(1, 10, "a"), Arc::new(MockChannel::new()));
        registry.connect(&Stream::new(2, 20, "b"), Arc::new(MockChannel::new()));

        assert!(registry.disconnect(1).is_some());
        assert!(registry.disconnect(1).is_none());
        assert!(!registry.contains(1));

        assert_eq!(registry.drain().len(), 1);
        assert!(registry.is_empty());
    }
}
