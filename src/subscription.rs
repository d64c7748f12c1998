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

// Topic subscription set
//
// Owns one transport subscription per accepted stream and turns every
// received message into a Record pushed to the ingress queue. With
// discovery enabled a polling thread asks the transport for new streams
// every `polling_interval`; without it, the allow-listed names are
// subscribed up front by name only.

use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{RecorderError, Result};
use crate::names::TopicMatcher;
use crate::queue::IngressQueue;
use crate::record::{IncomingMessage, Record, StreamDescriptor};
use crate::transport::{MessageSink, Subscription, Transport};

/// Which streams to record and how to find them
#[derive(Debug, Clone)]
pub struct SubscriptionOptions {
    /// Expanded allow-list; ignored when `record_all` is set
    pub matcher: TopicMatcher,
    pub record_all: bool,
    pub discovery_enabled: bool,
    pub serialization_format: String,
    pub polling_interval: Duration,
}

impl SubscriptionOptions {
    /// Reject contradictory combinations before anything is subscribed
    pub fn validate(&self) -> Result<()> {
        if self.record_all && !self.discovery_enabled {
            return Err(RecorderError::config(
                "record_all requires topic discovery, but disable_discovery is set",
            ));
        }
        if !self.record_all && self.matcher.is_empty() {
            return Err(RecorderError::config(
                "no topics to record: set record_all or list topics",
            ));
        }
        if !self.record_all && self.matcher.has_wildcards() && !self.discovery_enabled {
            return Err(RecorderError::config(
                "wildcard topic patterns require topic discovery",
            ));
        }
        if self.discovery_enabled && self.polling_interval.is_zero() {
            return Err(RecorderError::config(
                "topic_polling_interval must be greater than zero",
            ));
        }
        Ok(())
    }

    fn accepts(&self, name: &str) -> bool {
        self.record_all || self.matcher.accepts(name)
    }

    /// Descriptors known before discovery runs
    pub fn static_streams(&self) -> Vec<StreamDescriptor> {
        if self.discovery_enabled {
            return Vec::new();
        }
        self.matcher
            .exact_names()
            .map(|name| StreamDescriptor::unresolved(name, self.serialization_format.clone()))
            .collect()
    }
}

struct Subscribed {
    descriptor: Arc<StreamDescriptor>,
    received: Arc<AtomicU64>,
    _subscription: Box<dyn Subscription>,
}

/// A name is reserved while its transport subscription is being set up
enum Slot {
    Pending,
    Live(Subscribed),
}

impl Slot {
    fn live(&self) -> Option<&Subscribed> {
        match self {
            Slot::Live(subscribed) => Some(subscribed),
            Slot::Pending => None,
        }
    }
}

struct SetInner {
    transport: Arc<dyn Transport>,
    queue: IngressQueue,
    options: SubscriptionOptions,
    streams: Mutex<BTreeMap<String, Slot>>,
    shut_down: AtomicBool,
}

impl SetInner {
    fn on_new_stream_discovered(&self, descriptor: StreamDescriptor) -> Result<bool> {
        if self.shut_down.load(Ordering::Acquire) {
            return Ok(false);
        }
        if !self.options.accepts(&descriptor.name) {
            debug!("Ignoring stream '{}': not in allow-list", descriptor.name);
            return Ok(false);
        }

        {
            let mut streams = self.streams.lock();
            if streams.contains_key(&descriptor.name) {
                return Ok(false);
            }
            streams.insert(descriptor.name.clone(), Slot::Pending);
        }

        let descriptor = Arc::new(descriptor);
        let received = Arc::new(AtomicU64::new(0));
        let sink: MessageSink = {
            let queue = self.queue.clone();
            let descriptor = descriptor.clone();
            let received = received.clone();
            Arc::new(move |message: IncomingMessage| {
                received.fetch_add(1, Ordering::Relaxed);
                queue.push(Record::new(
                    descriptor.clone(),
                    message.payload,
                    message.publish_time_ns,
                ));
            })
        };

        // the transport may block; other callers only see the reservation
        let subscription = match self.transport.subscribe(&descriptor, sink) {
            Ok(subscription) => subscription,
            Err(e) => {
                self.streams.lock().remove(&descriptor.name);
                return Err(e);
            }
        };

        let mut streams = self.streams.lock();
        let reserved = matches!(streams.get(&descriptor.name), Some(Slot::Pending));
        if !reserved || self.shut_down.load(Ordering::Acquire) {
            debug!("Set shut down while subscribing to '{}'", descriptor.name);
            streams.remove(&descriptor.name);
            return Ok(false);
        }
        info!(
            "Subscribed to '{}' [{}] via {}",
            descriptor.name,
            descriptor.type_name(),
            self.transport.name()
        );
        streams.insert(
            descriptor.name.clone(),
            Slot::Live(Subscribed {
                descriptor,
                received,
                _subscription: subscription,
            }),
        );
        Ok(true)
    }

    fn poll_discovery(&self) {
        let discovered = match self.transport.discover() {
            Ok(discovered) => discovered,
            Err(e) => {
                warn!("Topic discovery failed: {}", e);
                return;
            }
        };
        for descriptor in discovered {
            let name = descriptor.name.clone();
            if let Err(e) = self.on_new_stream_discovered(descriptor) {
                warn!("Failed to subscribe to '{}': {}", name, e);
            }
        }
    }
}

/// Live set of subscriptions feeding one ingress queue
pub struct TopicSubscriptionSet {
    inner: Arc<SetInner>,
    poller: Option<(Sender<()>, JoinHandle<()>)>,
}

impl TopicSubscriptionSet {
    /// Validate options and bind the set to a transport and queue.
    /// Nothing is subscribed until [`start`](Self::start).
    pub fn configure(
        transport: Arc<dyn Transport>,
        queue: IngressQueue,
        options: SubscriptionOptions,
    ) -> Result<Self> {
        options.validate()?;
        if options.record_all && !options.matcher.is_empty() {
            warn!("record_all is set, ignoring the topic allow-list");
        }
        Ok(Self {
            inner: Arc::new(SetInner {
                transport,
                queue,
                options,
                streams: Mutex::new(BTreeMap::new()),
                shut_down: AtomicBool::new(false),
            }),
            poller: None,
        })
    }

    pub fn start(&mut self) -> Result<()> {
        let options = &self.inner.options;
        if !options.discovery_enabled {
            for descriptor in options.static_streams() {
                self.inner.on_new_stream_discovered(descriptor)?;
            }
            info!(
                "Discovery disabled, subscribed to {} streams by name",
                self.subscription_count()
            );
            return Ok(());
        }

        self.inner.poll_discovery();

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let inner = self.inner.clone();
        let interval = options.polling_interval;
        let handle = thread::Builder::new()
            .name("topic-discovery".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => inner.poll_discovery(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        self.poller = Some((stop_tx, handle));

        info!(
            "Topic discovery polling every {:?}, {} streams subscribed so far",
            interval,
            self.subscription_count()
        );
        Ok(())
    }

    /// Subscribe to `descriptor` if the allow-list accepts it.
    /// Returns `false` when it was rejected or is already subscribed.
    pub fn on_new_stream_discovered(&self, descriptor: StreamDescriptor) -> Result<bool> {
        self.inner.on_new_stream_discovered(descriptor)
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.streams.lock().values().filter_map(Slot::live).count()
    }

    pub fn streams(&self) -> Vec<StreamDescriptor> {
        self.inner
            .streams
            .lock()
            .values()
            .filter_map(Slot::live)
            .map(|s| s.descriptor.as_ref().clone())
            .collect()
    }

    /// Messages delivered by the transport, accepted by the queue or not
    pub fn received(&self) -> u64 {
        self.inner
            .streams
            .lock()
            .values()
            .filter_map(Slot::live)
            .map(|s| s.received.load(Ordering::Relaxed))
            .sum()
    }

    /// Stop discovery and drop every subscription. Idempotent.
    pub fn shutdown(&mut self) {
        let first = !self.inner.shut_down.swap(true, Ordering::AcqRel);

        if let Some((stop_tx, handle)) = self.poller.take() {
            let _ = stop_tx.send(());
            if handle.join().is_err() {
                warn!("Topic discovery thread panicked");
            }
        }
        if first && self.inner.options.discovery_enabled {
            self.inner.transport.stop_discovery();
        }

        let mut streams = self.inner.streams.lock();
        if !streams.is_empty() {
            info!("Unsubscribing from {} streams", streams.len());
        }
        streams.clear();
    }
}

impl Drop for TopicSubscriptionSet {
    fn drop(&mut self) {
        self.shutdown();
    }
}
