use sha2::{Digest, Sha256};
use tracing::{debug, error, warn};

use crate::checksum::{ChecksumCache, sector_crc};
use crate::image::ImageWriter;
use crate::queue::{HandoffQueue, SlotState, StorageFault};
use crate::sector::SECTOR_SIZE;

pub struct WorkerReport {
    pub crcs: Option<Vec<u32>>,
    pub digest: Option<[u8; 32]>,
}

/// Drains the handoff queue until EOF: persists slots in arrival order,
/// keeps the per-sector checksum bookkeeping and the running image digest.
/// A failed write poisons the queue and ends the worker, nothing is retried.
pub fn run_worker(
    queue: &HandoffQueue,
    mut writer: Option<&mut ImageWriter>,
    mut cache: Option<ChecksumCache>,
    mut digest: Option<Sha256>,
) -> WorkerReport {
    loop {
        let slot = queue.acquire_for_read();
        match slot.state() {
            SlotState::Eof => break,
            SlotState::Full => {
                if !persist(&mut writer, queue, slot.first_sector(), slot.payload()) {
                    slot.release();
                    cache = None;
                    digest = None;
                    break;
                }
                for (i, data) in slot.payload().chunks_exact(SECTOR_SIZE).enumerate() {
                    let sector = slot.first_sector() + i as u64;
                    match cache.as_mut() {
                        Some(ChecksumCache::Building { crcs }) => {
                            if let Some(entry) = crcs.get_mut(sector as usize) {
                                *entry = sector_crc(data);
                            }
                        }
                        Some(ChecksumCache::Comparing { reference }) => {
                            if let Some(expected) = reference.crc(sector) {
                                if sector_crc(data) != expected {
                                    queue.add_crc_errors(1);
                                    warn!(
                                        "sector {} does not match its recorded checksum",
                                        sector
                                    );
                                }
                            }
                        }
                        None => {}
                    }
                    if let Some(digest) = digest.as_mut() {
                        digest.update(data);
                    }
                }
                slot.release();
            }
            SlotState::Dead => {
                if !persist(&mut writer, queue, slot.first_sector(), slot.payload()) {
                    slot.release();
                    cache = None;
                    digest = None;
                    break;
                }
                queue.add_dead_written(slot.count() as u64);
                if matches!(cache, Some(ChecksumCache::Building { .. })) {
                    debug!("dropping the checksum cache, the image has unreadable sectors");
                    cache = None;
                }
                if let Some(digest) = digest.as_mut() {
                    digest.update(slot.payload());
                }
                slot.release();
            }
            SlotState::Empty => unreachable!("handoff queue delivered an empty slot"),
        }
    }

    let crcs = match cache {
        Some(ChecksumCache::Building { crcs }) => Some(crcs),
        _ => None,
    };
    WorkerReport {
        crcs,
        digest: digest.map(|d| d.finalize().into()),
    }
}

fn persist(
    writer: &mut Option<&mut ImageWriter>,
    queue: &HandoffQueue,
    first_sector: u64,
    data: &[u8],
) -> bool {
    let Some(writer) = writer.as_deref_mut() else {
        return true;
    };
    match writer.write_sectors(first_sector, data) {
        Ok(()) => true,
        Err(e) => {
            error!("image write failed: {}", e);
            queue.fail(StorageFault {
                sector: first_sector,
                detail: e.to_string(),
            });
            false
        }
    }
}
