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

// Pub/sub transport boundary
//
// The recorder only needs two things from a transport: a way to subscribe a
// callback to one stream, and a way to list the streams that currently
// exist. Callbacks run on transport-owned threads and must not block.

pub mod local;
pub mod zenoh;

use std::sync::Arc;

use crate::error::Result;
use crate::record::{IncomingMessage, StreamDescriptor};

pub use local::LocalTransport;
pub use self::zenoh::ZenohTransport;

/// Callback invoked for every message received on a subscribed stream
pub type MessageSink = Arc<dyn Fn(IncomingMessage) + Send + Sync>;

/// Live subscription; dropping it unsubscribes
pub trait Subscription: Send {
    fn stream(&self) -> &str;
}

pub trait Transport: Send + Sync {
    /// Human-readable transport name for logs
    fn name(&self) -> &str;

    fn subscribe(&self, stream: &StreamDescriptor, sink: MessageSink) -> Result<Box<dyn Subscription>>;

    /// Streams currently known to the transport
    fn discover(&self) -> Result<Vec<StreamDescriptor>>;

    /// Release whatever [`discover`](Self::discover) keeps running between polls
    fn stop_discovery(&self) {}
}
