#![no_main]

use dozer::parser::parse_str;
use dozer::preprocessing::{Pipeline, Preprocessor, PunchHoles};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Parsing and preprocessing must never panic, whatever strace printed
        let report = parse_str(input, "fuzz");
        let punched = PunchHoles::new().apply(&report.trace);
        let _ = Pipeline::default().apply(&punched);
    }
});
