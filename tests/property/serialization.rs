//! Property-based tests for the JSON wire codec.
//!
//! Uses proptest to verify:
//! 1. Any `Message` survives encode -> decode unchanged.
//! 2. Encoded frames always carry the four wire field names.
//! 3. Arbitrary bytes and strings never cause a panic in `decode`.

use chrono::{DateTime, TimeZone, Utc};
use msgrelay_proto::Message;
use msgrelay_proto::codec;
use proptest::prelude::*;

/// Strategy for timestamps between 1970 and 2100 with nanosecond precision.
fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..4_102_444_800, 0u32..1_000_000_000).prop_map(|(secs, nanos)| {
        Utc.timestamp_opt(secs, nanos)
            .single()
            .expect("in-range timestamp")
    })
}

/// Strategy for generating arbitrary `Message` values.
fn arb_message() -> impl Strategy<Value = Message> {
    (".{0,32}", ".{0,32}", ".{0,512}", arb_timestamp()).prop_map(
        |(sender, receiver, content, timestamp)| Message {
            sender,
            receiver,
            content,
            timestamp,
        },
    )
}

proptest! {
    /// Any message survives an encode -> decode round-trip.
    #[test]
    fn message_round_trip(msg in arb_message()) {
        let json = codec::encode(&msg).expect("encode should succeed");
        let decoded = codec::decode_str(&json).expect("decode should succeed");
        prop_assert_eq!(msg, decoded);
    }

    /// The encoded object always uses the wire field names.
    #[test]
    fn encoded_frame_has_wire_fields(msg in arb_message()) {
        let json = codec::encode(&msg).expect("encode should succeed");
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        let object = value.as_object().expect("object");
        prop_assert_eq!(object.len(), 4);
        for key in ["sender_id", "receiver_id", "content", "timestamp"] {
            prop_assert!(object.contains_key(key), "missing {}", key);
        }
    }

    /// Random bytes never cause a panic when decoded.
    #[test]
    fn random_bytes_decode_no_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode(&bytes);
    }

    /// Random text never causes a panic when decoded.
    #[test]
    fn random_text_decode_no_panic(text in ".{0,256}") {
        let _ = codec::decode_str(&text);
    }
}
