#![no_main]

use libfuzzer_sys::fuzz_target;
use orpheus::checksum::ReferenceSums;

fuzz_target!(|data: &[u8]| {
    let _ = ReferenceSums::parse(data);
});
