#![no_main]

//! Fuzz target for decoding `POST /operations` request bodies.

use libfuzzer_sys::fuzz_target;
use tiergate_core::Operation;

fuzz_target!(|data: &[u8]| {
    if let Ok(operation) = serde_json::from_slice::<Operation>(data) {
        let encoded = serde_json::to_vec(&operation).unwrap_or_default();
        let decoded: Operation = serde_json::from_slice(&encoded).unwrap_or_else(|e| {
            panic!("re-encoded operation failed to decode: {e}");
        });
        assert_eq!(decoded.kind, operation.kind);
        assert_eq!(decoded.estimated_record_count, operation.estimated_record_count);
    }
});
