#![cfg(all(feature = "advanced-tests", loom))]
//! Concurrency tests for the split ring queue using loom.
//!
//! The producer half runs on its own thread, standing in for a receive
//! completion callback, while the consumer drains on the main thread. loom
//! explores the interleavings of the index rings between them.

use loom::{model, thread};
use peertalk::{Priority, queue::RingQueue};

#[test]
fn every_isr_push_is_consumed_once() {
    model(|| {
        let (mut producer, mut consumer) = RingQueue::new(2).expect("valid capacity").split();

        let writer = thread::spawn(move || {
            producer.push_isr(b"a", Priority::Normal).expect("space for a");
            producer.push_isr(b"b", Priority::Normal).expect("space for b");
        });

        let mut seen = Vec::new();
        while seen.len() < 2 {
            match consumer.pop_direct().expect("queue intact") {
                Some(message) => {
                    seen.push(message.payload().to_vec());
                    message.commit().expect("commit");
                }
                None => thread::yield_now(),
            }
        }
        writer.join().expect("producer thread panicked");

        assert_eq!(seen, [b"a".to_vec(), b"b".to_vec()]);
        assert!(consumer.is_empty());
    });
}

#[test]
fn full_queue_is_reported_to_the_consumer() {
    model(|| {
        let (mut producer, mut consumer) = RingQueue::new(2).expect("valid capacity").split();

        let writer = thread::spawn(move || {
            let results = [
                producer.push_isr(b"1", Priority::High),
                producer.push_isr(b"2", Priority::High),
                producer.push_isr(b"3", Priority::High),
            ];
            results.iter().filter(|r| r.is_err()).count()
        });
        let rejected = writer.join().expect("producer thread panicked");

        assert_eq!(rejected, 1);
        assert!(consumer.take_isr_events().queue_full);
        assert_eq!(consumer.len(), 2);
    });
}
