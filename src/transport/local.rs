// Copyright 2025 coScene
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

//! In-process transport
//!
//! A tiny pub/sub bus living inside the process. Publishers call
//! [`LocalTransport::publish`] and every subscriber callback of that stream
//! runs synchronously on the publisher's thread, which makes it handy for
//! tests and for embedding the recorder next to its producers.
//!
//! # Example
//!
//! ```
//! use zenoh_bag_recorder::transport::{LocalTransport, Transport};
//! use zenoh_bag_recorder::record::{IncomingMessage, StreamDescriptor};
//! use std::sync::Arc;
//!
//! let bus = LocalTransport::new();
//! bus.advertise(StreamDescriptor::resolved("/chatter", "std_msgs/msg/String", "cdr"));
//! let sub = bus
//!     .subscribe(
//!         &StreamDescriptor::unresolved("/chatter", "cdr"),
//!         Arc::new(|msg: IncomingMessage| println!("{} bytes", msg.payload.len())),
//!     )
//!     .unwrap();
//! assert_eq!(bus.publish("/chatter", &b"hi"[..]), 1);
//! drop(sub);
//! assert_eq!(bus.publish("/chatter", &b"hi"[..]), 0);
//! ```

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::{MessageSink, Subscription, Transport};
use crate::error::Result;
use crate::record::{IncomingMessage, StreamDescriptor};

#[derive(Default)]
struct Bus {
    advertised: DashMap<String, StreamDescriptor>,
    subscribers: DashMap<String, Vec<(u64, MessageSink)>>,
    next_id: AtomicU64,
}

#[derive(Clone, Default)]
pub struct LocalTransport {
    bus: Arc<Bus>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a stream visible to discovery
    pub fn advertise(&self, stream: StreamDescriptor) {
        debug!("Advertised stream '{}'", stream.name);
        self.bus.advertised.insert(stream.name.clone(), stream);
    }

    pub fn withdraw(&self, stream: &str) {
        self.bus.advertised.remove(stream);
    }

    /// Deliver a payload to every subscriber of `stream`; returns how many got it
    pub fn publish(&self, stream: &str, payload: impl Into<Bytes>) -> usize {
        self.publish_at(stream, payload, None)
    }

    pub fn publish_at(
        &self,
        stream: &str,
        payload: impl Into<Bytes>,
        publish_time_ns: Option<u64>,
    ) -> usize {
        // snapshot the sinks so no map lock is held while callbacks run
        let sinks: Vec<MessageSink> = match self.bus.subscribers.get(stream) {
            Some(entry) => entry.iter().map(|(_, sink)| sink.clone()).collect(),
            None => return 0,
        };

        let payload = payload.into();
        for sink in &sinks {
            sink(IncomingMessage {
                stream: stream.to_string(),
                payload: payload.clone(),
                publish_time_ns,
            });
        }
        sinks.len()
    }

    pub fn subscriber_count(&self, stream: &str) -> usize {
        self.bus
            .subscribers
            .get(stream)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }
}

impl Transport for LocalTransport {
    fn name(&self) -> &str {
        "local"
    }

    fn subscribe(&self, stream: &StreamDescriptor, sink: MessageSink) -> Result<Box<dyn Subscription>> {
        let id = self.bus.next_id.fetch_add(1, Ordering::Relaxed);
        self.bus
            .subscribers
            .entry(stream.name.clone())
            .or_default()
            .push((id, sink));

        Ok(Box::new(LocalSubscription {
            bus: self.bus.clone(),
            stream: stream.name.clone(),
            id,
        }))
    }

    fn discover(&self) -> Result<Vec<StreamDescriptor>> {
        let mut streams: Vec<StreamDescriptor> = self
            .bus
            .advertised
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        streams.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(streams)
    }
}

struct LocalSubscription {
    bus: Arc<Bus>,
    stream: String,
    id: u64,
}

impl Subscription for LocalSubscription {
    fn stream(&self) -> &str {
        &self.stream
    }
}

impl Drop for LocalSubscription {
    fn drop(&mut self) {
        if let Some(mut entry) = self.bus.subscribers.get_mut(&self.stream) {
            entry.retain(|(id, _)| *id != self.id);
        }
        self.bus
            .subscribers
            .remove_if(&self.stream, |_, sinks| sinks.is_empty());
    }
}
