//! Fuzz target for the index artifact decoder.
//!
//! Arbitrary bytes must never panic: they either decode into a validated
//! artifact or are rejected as corrupt.

#![no_main]

use libfuzzer_sys::fuzz_target;
use nearline::storage;

fuzz_target!(|data: &[u8]| {
    match storage::decode(data) {
        Ok(body) => {
            assert!(body.dimension > 0);
            assert!(body.records.iter().all(|r| r.embedding.len() == body.dimension));
        }
        Err(e) => assert!(e.is_corrupt()),
    }
});
