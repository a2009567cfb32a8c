#![no_main]

use libfuzzer_sys::fuzz_target;
use orpheus::sector::is_dead_sector;

fuzz_target!(|data: &[u8]| {
    let _ = is_dead_sector(data);
});
