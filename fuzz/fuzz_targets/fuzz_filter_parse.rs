//! Fuzz target for the text filter parser.
//!
//! Arbitrary input must either parse into a valid filter or fail with
//! `InvalidQuery`; a parsed filter must print to text that parses again.

#![no_main]

use libfuzzer_sys::fuzz_target;
use nearline::MetadataFilter;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    match MetadataFilter::parse(text) {
        Ok(filter) => {
            let printed = filter.to_string();
            let reparsed = MetadataFilter::parse(&printed).expect("printed filter must parse");
            assert_eq!(reparsed, filter);
        }
        Err(e) => assert!(e.is_invalid_query()),
    }
});
