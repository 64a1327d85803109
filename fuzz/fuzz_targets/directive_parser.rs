#![no_main]

use libfuzzer_sys::fuzz_target;
use limitador::annotations::{find_directive, parse_args};

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Must not panic on arbitrary argument text
        let _ = parse_args(input);

        let lines: Vec<String> = input.split_inclusive('\n').map(str::to_string).collect();
        let method_line = lines.len().max(1) as u32;
        if let Some(found) = find_directive(&lines, method_line) {
            let _ = found.args;
        }
    }
});
