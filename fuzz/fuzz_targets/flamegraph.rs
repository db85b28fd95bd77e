#![no_main]

use flamepipe::flamegraph::{self, Options};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(folded) = std::str::from_utf8(data) {
        flamegraph::from_lines(&Options::default(), folded.lines(), std::io::sink()).ok();
    }
});
