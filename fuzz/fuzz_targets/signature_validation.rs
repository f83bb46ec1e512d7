#![no_main]

//! Fuzz target for webhook signature validation.
//!
//! Splits the input into a signature header and a payload and runs both
//! through header parsing and full verification. Neither may panic, and
//! arbitrary headers must never verify.

use chrono::{TimeZone, Utc};
use libfuzzer_sys::fuzz_target;
use tiergate_pipeline::{parse_signature, sign, SignatureVerifier};

const SECRET: &str = "whsec_fuzz_secret";

fuzz_target!(|data: &[u8]| {
    let split = data.iter().position(|&b| b == b'\n').unwrap_or(data.len());
    let (header, payload) = data.split_at(split);
    let header = String::from_utf8_lossy(header);

    let parsed = parse_signature(&header);

    let verifier = SignatureVerifier::new(SECRET, std::time::Duration::from_secs(300));
    let now = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap_or_else(Utc::now);

    let genuine = sign(payload, SECRET).unwrap_or_default();

    // Only a header carrying the real digest may verify.
    if verifier.verify("fuzz", payload, Some(&header), now).is_ok() {
        let expected = hex::decode(&genuine).unwrap_or_default();
        let digests = parsed.map(|p| p.digests).unwrap_or_default();
        assert!(digests.contains(&expected));
    }

    assert!(verifier.verify("fuzz", payload, Some(&genuine), now).is_ok());
});
