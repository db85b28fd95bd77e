#![no_main]

use flamepipe::collapse::{perf::Folder, Collapse};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    Folder::default().collapse(data, std::io::sink()).ok();
});
