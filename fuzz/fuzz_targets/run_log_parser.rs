#![no_main]

use libfuzzer_sys::fuzz_target;
use limitador::annotations::parse_run_log;
use limitador::metrics::MetricInfo;
use std::sync::Arc;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        let metrics = [
            Arc::new(MetricInfo::relative_time()),
            Arc::new(MetricInfo::absolute_time()),
        ];
        // Malformed blocks are reported as errors, never panics
        let _ = parse_run_log("fuzz.log", input, &metrics);
    }
});
