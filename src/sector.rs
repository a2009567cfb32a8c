use std::sync::LazyLock;

pub const SECTOR_SIZE: usize = 2048;

/// Sector hashed to decide whether an image file belongs to the inserted medium.
pub const FINGERPRINT_SECTOR: u64 = 16;

pub const MAX_CLUSTER_SECTORS: usize = 32;

const DEAD_LINE: &[u8; 32] = b"[orpheus: unreadable sector]   \n";

/// Placeholder payload written in place of sectors the drive could not deliver.
pub static DEAD_SECTOR: LazyLock<[u8; SECTOR_SIZE]> = LazyLock::new(|| {
    let mut sector = [0u8; SECTOR_SIZE];
    for chunk in sector.chunks_exact_mut(DEAD_LINE.len()) {
        chunk.copy_from_slice(DEAD_LINE);
    }
    sector
});

pub fn is_dead_sector(data: &[u8]) -> bool {
    data.len() == SECTOR_SIZE && data == &DEAD_SECTOR[..]
}
