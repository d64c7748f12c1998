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

/// Ingress queue behaviour under concurrent producers
///
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use zenoh_bag_recorder::queue::{IngressQueue, PopResult};
use zenoh_bag_recorder::record::{Record, StreamDescriptor, RECORD_OVERHEAD_BYTES};

fn stream(name: &str) -> Arc<StreamDescriptor> {
    Arc::new(StreamDescriptor::unresolved(name, "cdr"))
}

fn drain(queue: &IngressQueue) -> Vec<Record> {
    let mut out = Vec::new();
    loop {
        match queue.pop_blocking(Duration::from_millis(500)) {
            PopResult::Record(record) => out.push(record),
            PopResult::Timeout => continue,
            PopResult::Closed => return out,
        }
    }
}

#[test]
fn test_concurrent_producers_keep_per_stream_order() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: u32 = 2_000;

    let queue = IngressQueue::new(usize::MAX);
    let consumer = {
        let queue = queue.clone();
        thread::spawn(move || drain(&queue))
    };

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = queue.clone();
            thread::spawn(move || {
                let stream = stream(&format!("/producer{}", p));
                for i in 0..PER_PRODUCER {
                    let payload = Bytes::copy_from_slice(&i.to_le_bytes());
                    assert!(queue.push(Record::new(stream.clone(), payload, None)).is_accepted());
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    queue.close();

    let records = consumer.join().unwrap();
    assert_eq!(records.len(), PRODUCERS * PER_PRODUCER as usize);

    let mut next: HashMap<String, u32> = HashMap::new();
    for record in &records {
        let expected = next.entry(record.stream_name().to_string()).or_insert(0);
        let mut seq = [0u8; 4];
        seq.copy_from_slice(record.payload());
        assert_eq!(u32::from_le_bytes(seq), *expected, "reordered on {}", record.stream_name());
        *expected += 1;
    }
    assert!(next.values().all(|n| *n == PER_PRODUCER));

    let stats = queue.stats();
    assert_eq!(stats.pushed, stats.popped);
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.bytes_in_flight, 0);
}

#[test]
fn test_budget_drops_are_counted_exactly() {
    let stream = stream("/camera");
    let record_size = 100 + "/camera".len() + RECORD_OVERHEAD_BYTES;
    // room for exactly three records
    let queue = IngressQueue::new(record_size * 3);

    let accepted = (0..10)
        .filter(|_| {
            queue
                .push(Record::new(stream.clone(), Bytes::from(vec![0u8; 100]), None))
                .is_accepted()
        })
        .count();
    assert_eq!(accepted, 3);
    assert_eq!(queue.dropped(), 7);
    assert_eq!(queue.bytes_in_flight(), record_size * 3);

    // popping frees budget again
    assert!(matches!(queue.pop_blocking(Duration::from_millis(10)), PopResult::Record(_)));
    assert!(queue
        .push(Record::new(stream.clone(), Bytes::from(vec![0u8; 100]), None))
        .is_accepted());

    queue.close();
    assert_eq!(drain(&queue).len(), 3);
    let stats = queue.stats();
    assert_eq!(stats.pushed, 4);
    assert_eq!(stats.dropped, 7);
}

#[test]
fn test_push_after_close_is_rejected_without_counting_as_drop() {
    let queue = IngressQueue::new(1024);
    queue.close();
    assert!(!queue
        .push(Record::new(stream("/a"), Bytes::from_static(b"x"), None))
        .is_accepted());

    let stats = queue.stats();
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.rejected_after_close, 1);
    assert!(matches!(queue.pop_blocking(Duration::from_millis(10)), PopResult::Closed));
}

#[test]
fn test_producers_racing_close_lose_nothing_accepted() {
    let queue = IngressQueue::new(usize::MAX);
    let producers: Vec<_> = (0..4)
        .map(|p| {
            let queue = queue.clone();
            thread::spawn(move || {
                let stream = stream(&format!("/race{}", p));
                let mut accepted = 0u64;
                for _ in 0..5_000 {
                    if queue
                        .push(Record::new(stream.clone(), Bytes::from_static(b"r"), None))
                        .is_accepted()
                    {
                        accepted += 1;
                    }
                }
                accepted
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(1));
    queue.close();
    let accepted: u64 = producers.into_iter().map(|p| p.join().unwrap()).sum();
    let delivered = drain(&queue).len() as u64;

    assert_eq!(delivered, accepted);
    let stats = queue.stats();
    assert_eq!(stats.pushed, accepted);
    assert_eq!(stats.rejected_after_close, 20_000 - accepted);
}
