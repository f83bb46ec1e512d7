#![no_main]

//! Fuzz target for extracting event identifiers from webhook bodies.
//!
//! Whatever the body, parsing either fails cleanly or yields a non-empty
//! event id and partition key, and identifiers found in the body are never
//! displaced by hints.

use libfuzzer_sys::fuzz_target;
use tiergate_pipeline::EventEnvelope;

fuzz_target!(|data: &[u8]| {
    let from_body = EventEnvelope::parse(data, None, None).ok();
    for (event_hint, partition_hint) in [(None, None), (Some("evt_hint"), None), (None, Some(""))] {
        if let Ok(envelope) = EventEnvelope::parse(data, event_hint, partition_hint) {
            assert!(!envelope.event_id.as_str().is_empty());
            assert!(!envelope.partition_key.as_str().is_empty());
            if let Some(body) = &from_body {
                assert_eq!(envelope.event_id, body.event_id);
            }
        }
    }
});
