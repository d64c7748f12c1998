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

// Zenoh transport adapter
//
// Stream `/a/b` is the key expression `a/b`. Subscribers use callbacks, so
// messages are handed to the sink on zenoh's own threads.
//
// Zenoh has no registry of typed topics. Discovery is passive: a `**`
// subscriber, declared on the first `discover()` call and undeclared by
// `stop_discovery()`, remembers every key expression it has seen data on
// and reports the sample encoding as the message type.

use ::zenoh::pubsub::Subscriber;
use ::zenoh::sample::Sample;
use ::zenoh::{Session, Wait};
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};

use super::{MessageSink, Subscription, Transport};
use crate::error::{RecorderError, Result};
use crate::record::{IncomingMessage, StreamDescriptor};

const DISCOVERY_KEY: &str = "**";

pub struct ZenohTransport {
    session: Session,
    serialization_format: String,
    seen: Arc<DashMap<String, StreamDescriptor>>,
    sniffer: Mutex<Option<Subscriber<()>>>,
}

impl ZenohTransport {
    pub fn new(session: Session, serialization_format: impl Into<String>) -> Self {
        Self {
            session,
            serialization_format: serialization_format.into(),
            seen: Arc::new(DashMap::new()),
            sniffer: Mutex::new(None),
        }
    }

    fn ensure_sniffer(&self) -> Result<()> {
        let mut sniffer = self.sniffer.lock();
        if sniffer.is_some() {
            return Ok(());
        }

        let seen = self.seen.clone();
        let format = self.serialization_format.clone();
        let subscriber = self
            .session
            .declare_subscriber(DISCOVERY_KEY)
            .callback(move |sample: Sample| {
                let name = key_to_stream(sample.key_expr().as_str());
                if seen.contains_key(&name) {
                    return;
                }
                debug!("Discovered '{}' ({})", name, sample.encoding());
                let descriptor =
                    StreamDescriptor::resolved(name.clone(), sample.encoding().to_string(), format.clone());
                seen.insert(name, descriptor);
            })
            .wait()
            .map_err(transport_error)?;

        info!("Zenoh discovery listening on '{}'", DISCOVERY_KEY);
        *sniffer = Some(subscriber);
        Ok(())
    }
}

impl Transport for ZenohTransport {
    fn name(&self) -> &str {
        "zenoh"
    }

    fn subscribe(&self, stream: &StreamDescriptor, sink: MessageSink) -> Result<Box<dyn Subscription>> {
        let key = stream_to_key(&stream.name)?;
        let name = stream.name.clone();
        let subscriber = self
            .session
            .declare_subscriber(key.clone())
            .callback(move |sample: Sample| {
                let publish_time_ns = sample.timestamp().and_then(|ts| {
                    ts.get_time()
                        .to_system_time()
                        .duration_since(UNIX_EPOCH)
                        .ok()
                        .map(|d| d.as_nanos() as u64)
                });
                sink(IncomingMessage {
                    stream: name.clone(),
                    payload: Bytes::from(sample.payload().to_bytes().into_owned()),
                    publish_time_ns,
                });
            })
            .wait()
            .map_err(transport_error)?;

        debug!("Subscribed to '{}' as key '{}'", stream.name, key);
        Ok(Box::new(ZenohSubscription {
            stream: stream.name.clone(),
            _subscriber: subscriber,
        }))
    }

    fn discover(&self) -> Result<Vec<StreamDescriptor>> {
        self.ensure_sniffer()?;
        let mut streams: Vec<StreamDescriptor> =
            self.seen.iter().map(|entry| entry.value().clone()).collect();
        streams.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(streams)
    }

    fn stop_discovery(&self) {
        let Some(subscriber) = self.sniffer.lock().take() else {
            return;
        };
        match subscriber.undeclare().wait() {
            Ok(()) => info!("Zenoh discovery on '{}' stopped", DISCOVERY_KEY),
            Err(e) => warn!("Failed to undeclare discovery subscriber: {}", e),
        }
    }
}

struct ZenohSubscription {
    stream: String,
    // undeclared on drop
    _subscriber: Subscriber<()>,
}

impl Subscription for ZenohSubscription {
    fn stream(&self) -> &str {
        &self.stream
    }
}

fn transport_error(e: ::zenoh::Error) -> RecorderError {
    RecorderError::Transport(e.to_string())
}

/// `/a/b` -> `a/b`
pub fn stream_to_key(stream: &str) -> Result<String> {
    let key = stream.trim_start_matches('/');
    if key.is_empty() {
        return Err(RecorderError::Transport(format!(
            "stream '{}' has no key expression",
            stream
        )));
    }
    Ok(key.to_string())
}

/// `a/b` -> `/a/b`
pub fn key_to_stream(key: &str) -> String {
    format!("/{}", key.trim_start_matches('/'))
}
