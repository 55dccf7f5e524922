#![cfg(all(feature = "advanced-tests", not(loom)))]
//! Property-based tests for mixed traffic between two sessions.
//!
//! Random sequences of message sizes and priorities are sent from one peer
//! to the other; every message must arrive exactly once with its bytes
//! intact, whichever tier carried it.

use peertalk::{Priority, SessionConfig};
use peertalk_testing::{SessionPair, pattern};
use proptest::prelude::*;

fn priority() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::Low),
        Just(Priority::Normal),
        Just(Priority::High),
        Just(Priority::Critical),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn mixed_traffic_is_delivered_intact(
        receiver_max in 256u16..=8192,
        sends in prop::collection::vec((1usize..=8192, priority()), 1..12),
    ) {
        let receiver = SessionConfig::builder()
            .max_message_size(receiver_max)
            .build()
            .expect("valid configuration");
        let mut pair = SessionPair::new(&SessionConfig::default(), &receiver).expect("pair");
        pair.negotiate().expect("negotiated");

        let mut expected = Vec::new();
        for (len, priority) in sends {
            let mut message = pattern(len);
            message[0] = u8::try_from(expected.len()).expect("few sends");
            loop {
                match pair.a.send(&message, priority) {
                    Ok(()) => break,
                    Err(err) if err.is_would_block() => {
                        pair.poll().expect("poll");
                    }
                    Err(err) => return Err(TestCaseError::fail(err.to_string())),
                }
            }
            expected.push(message);
        }
        pair.pump(256).expect("pumped");

        let mut received = pair.b_inbox.messages.clone();
        received.sort();
        expected.sort();
        prop_assert_eq!(received, expected);
    }
}
