use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::bitmap::SectorBitmap;
use crate::device::MediumReader;
use crate::image::ImageReader;
use crate::progress::{PositionUpdate, ProgressSink, SpeedGauge, classify_route};
use crate::queue::{HandoffQueue, SlotState, StorageFault};
use crate::sector::{DEAD_SECTOR, SECTOR_SIZE};
use crate::session::{FatalResolution, Prompt};

#[derive(Debug, Clone, Copy)]
pub struct PassConfig {
    pub first: u64,
    pub last: u64,
    pub capacity: u64,
    pub cluster: usize,
    pub sector_skip: u64,
    pub scan_only: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReadCounters {
    pub read_ok: u64,
    pub pass_errors: u64,
    pub total_errors: u64,
    pub tao_tail: u64,
    pub max_c2: u32,
}

/// Sectors to request at `pos`. Cluster-sized on aligned positions, single
/// otherwise, and single within the last two sectors of the medium so a
/// track-at-once tail is detected at sector granularity. Clamped to the range.
pub fn read_size(pos: u64, cfg: &PassConfig) -> usize {
    let cluster = cfg.cluster as u64;
    let mask = cluster - 1;
    let tail = cfg.capacity.saturating_sub(2) & !mask;
    let n = if pos & mask != 0 || pos >= tail {
        1
    } else {
        cluster
    };
    n.min(cfg.last + 1 - pos) as usize
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    RetrySingle { at: u64 },
    SkipAhead { first_dead: u64, nfill: u64 },
}

/// Decides what follows a failed read of `nsectors` at `pos` where the device
/// reported `error_sector` as the first bad one. With no skip distance a
/// failed cluster is retried at the bad sector alone and a failed single
/// sector costs exactly itself. A skip distance smaller than the request also
/// retries singly. Otherwise the skip distance is written off starting at the
/// bad sector, clamped to the range end.
pub fn failure_plan(error_sector: u64, pos: u64, nsectors: usize, cfg: &PassConfig) -> FailureAction {
    let nsectors = nsectors as u64;
    debug_assert!(error_sector >= pos && error_sector < pos + nsectors);
    if cfg.sector_skip == 0 {
        if nsectors > 1 {
            FailureAction::RetrySingle { at: error_sector }
        } else {
            FailureAction::SkipAhead {
                first_dead: error_sector,
                nfill: 1,
            }
        }
    } else if cfg.sector_skip < nsectors {
        FailureAction::RetrySingle { at: error_sector }
    } else {
        let remaining = pos + nsectors - error_sector;
        let span = cfg.last + 1 - error_sector;
        FailureAction::SkipAhead {
            first_dead: error_sector,
            nfill: remaining.max(cfg.sector_skip).min(span),
        }
    }
}

pub enum PassResult {
    Completed,
    Cancelled,
    Faulted(StorageFault),
    DeviceAborted(crate::device::DeviceError),
}

enum Presence {
    All,
    None,
    Partial,
}

/// One sweep over the configured range: sizes each request, skips sectors
/// already in the image, publishes reads to the handoff queue and turns
/// failures into single retries or dead-marked skips.
pub struct PassReader<'a, D: MediumReader> {
    pub device: &'a mut D,
    pub queue: &'a HandoffQueue,
    pub image: Option<&'a mut ImageReader>,
    pub bitmap: Option<&'a mut SectorBitmap>,
    pub gauge: &'a mut SpeedGauge,
    pub sink: &'a dyn ProgressSink,
    pub prompt: &'a dyn Prompt,
    pub cancel: &'a AtomicBool,
    pub ignore_fatal: &'a mut bool,
    pub counters: &'a mut ReadCounters,
}

impl<D: MediumReader> PassReader<'_, D> {
    pub fn run_pass(&mut self, cfg: &PassConfig, marker: u64) -> PassResult {
        let range_len = cfg.last + 1 - cfg.first;
        let mut pos = cfg.first;
        let mut force_single: Option<u64> = None;
        let mut highest_ok: Option<u64> = None;
        let mut last_crc_seen = self.queue.crc_errors();

        while pos <= cfg.last {
            if self.cancel.load(Ordering::Relaxed) {
                return PassResult::Cancelled;
            }
            if let Some(fault) = self.queue.fault() {
                return PassResult::Faulted(fault);
            }

            let retrying = force_single.take() == Some(pos);
            let mut nsectors = if retrying { 1 } else { read_size(pos, cfg) };

            if !cfg.scan_only && !retrying && pos < marker {
                match self.presence_step(pos, &mut nsectors, marker) {
                    Ok(true) => {
                        let top = pos + nsectors as u64 - 1;
                        debug!("sectors {}..{} already in the image, skipping", pos, top);
                        highest_ok = Some(highest_ok.map_or(top, |h| h.max(top)));
                        pos = top + 1;
                        self.push_progress(cfg, pos, range_len, false, true, &mut last_crc_seen);
                        continue;
                    }
                    Ok(false) => {}
                    Err(fault) => return PassResult::Faulted(fault),
                }
            }

            let mut slot = match self.queue.acquire_for_write() {
                Ok(slot) => slot,
                Err(fault) => return PassResult::Faulted(fault),
            };
            let bytes = nsectors * SECTOR_SIZE;
            match self.device.read_sectors(pos, &mut slot.payload_mut()[..bytes]) {
                Ok(()) => {
                    self.note_c2();
                    slot.publish(pos, nsectors, SlotState::Full);
                    if let Some(bitmap) = self.bitmap.as_deref_mut() {
                        for i in 0..nsectors as u64 {
                            bitmap.set(pos + i);
                        }
                    }
                    self.counters.read_ok += nsectors as u64;
                    self.gauge.record(nsectors as u64);
                    let top = pos + nsectors as u64 - 1;
                    highest_ok = Some(highest_ok.map_or(top, |h| h.max(top)));
                    pos = top + 1;
                    self.push_progress(cfg, pos, range_len, false, false, &mut last_crc_seen);
                }
                Err(err) => {
                    if !err.is_recoverable() && !*self.ignore_fatal {
                        match self.prompt.resolve_fatal(err.sector(), &err.to_string()) {
                            FatalResolution::Abort => {
                                slot.abandon();
                                return PassResult::DeviceAborted(err);
                            }
                            FatalResolution::IgnoreOnce => {}
                            FatalResolution::IgnoreAlways => *self.ignore_fatal = true,
                        }
                    }
                    let error_sector = err.sector().clamp(pos, pos + nsectors as u64 - 1);
                    let delivered = (error_sector - pos) as usize;
                    if delivered > 0 {
                        // the sectors before the failure are good, keep them
                        slot.publish(pos, delivered, SlotState::Full);
                        if let Some(bitmap) = self.bitmap.as_deref_mut() {
                            for i in 0..delivered as u64 {
                                bitmap.set(pos + i);
                            }
                        }
                        self.counters.read_ok += delivered as u64;
                        self.gauge.record(delivered as u64);
                        highest_ok =
                            Some(highest_ok.map_or(error_sector - 1, |h| h.max(error_sector - 1)));
                    } else {
                        slot.abandon();
                    }
                    match failure_plan(error_sector, pos, nsectors, cfg) {
                        FailureAction::RetrySingle { at } => {
                            debug!("read error at sector {}, retrying it alone", at);
                            force_single = Some(at);
                            pos = at;
                        }
                        FailureAction::SkipAhead { first_dead, nfill } => {
                            warn!(
                                "sector {}: {}, marking {} sectors unreadable",
                                error_sector, err, nfill
                            );
                            if let Err(fault) =
                                self.mark_dead_range(cfg, first_dead, nfill, marker, &mut highest_ok)
                            {
                                return PassResult::Faulted(fault);
                            }
                            pos = first_dead + nfill;
                            self.push_progress(cfg, pos, range_len, true, false, &mut last_crc_seen);
                        }
                    }
                }
            }
        }

        self.counters.tao_tail = match highest_ok {
            Some(h) if h >= cfg.last => 0,
            Some(h) => cfg.last - h,
            None => range_len,
        };
        PassResult::Completed
    }

    /// Returns Ok(true) when the whole request, possibly narrowed, is already
    /// present and the device need not be touched. A mix of present and
    /// missing sectors narrows the request to a single sector first.
    fn presence_step(
        &mut self,
        pos: u64,
        nsectors: &mut usize,
        marker: u64,
    ) -> Result<bool, StorageFault> {
        let span = (*nsectors as u64).min(marker - pos) as usize;
        match self.range_presence(pos, span)? {
            Presence::All => {
                *nsectors = span;
                Ok(true)
            }
            Presence::None => Ok(false),
            Presence::Partial => {
                *nsectors = 1;
                Ok(self.sector_known_present(pos)?)
            }
        }
    }

    fn range_presence(&mut self, first: u64, count: usize) -> Result<Presence, StorageFault> {
        let mut present = 0usize;
        for i in 0..count as u64 {
            if self.sector_known_present(first + i)? {
                present += 1;
            }
        }
        Ok(if present == count {
            Presence::All
        } else if present == 0 {
            Presence::None
        } else {
            Presence::Partial
        })
    }

    fn sector_known_present(&mut self, sector: u64) -> Result<bool, StorageFault> {
        if let Some(bitmap) = self.bitmap.as_deref() {
            return Ok(sector < bitmap.sectors() && bitmap.get(sector));
        }
        match self.image.as_deref_mut() {
            Some(image) => image.sector_present(sector).map_err(|e| StorageFault {
                sector,
                detail: e.to_string(),
            }),
            None => Ok(false),
        }
    }

    /// Publishes one dead slot per still-missing sector of the range and
    /// counts it. Sectors already holding data from an earlier session are
    /// left alone and not counted.
    fn mark_dead_range(
        &mut self,
        cfg: &PassConfig,
        first_dead: u64,
        nfill: u64,
        marker: u64,
        highest_ok: &mut Option<u64>,
    ) -> Result<(), StorageFault> {
        for sector in first_dead..first_dead + nfill {
            if !cfg.scan_only && sector < marker && self.sector_known_present(sector)? {
                *highest_ok = Some(highest_ok.map_or(sector, |h| h.max(sector)));
                continue;
            }
            if !cfg.scan_only {
                let mut slot = self.queue.acquire_for_write()?;
                slot.payload_mut()[..SECTOR_SIZE].copy_from_slice(&DEAD_SECTOR[..]);
                slot.publish(sector, 1, SlotState::Dead);
            }
            self.counters.pass_errors += 1;
            self.counters.total_errors += 1;
        }
        Ok(())
    }

    fn note_c2(&mut self) {
        let counts = self.device.c2_counts();
        if counts.is_empty() {
            return;
        }
        let worst = u32::from(counts.iter().copied().max().unwrap_or(0));
        if worst > 0 {
            warn!("C2 errors reported, worst sector counted {}", worst);
            if worst > self.counters.max_c2 {
                self.counters.max_c2 = worst;
            }
        }
    }

    fn push_progress(
        &mut self,
        cfg: &PassConfig,
        pos: u64,
        range_len: u64,
        unreadable: bool,
        resumed: bool,
        last_crc_seen: &mut u64,
    ) {
        let crc_errors = self.queue.crc_errors();
        let mismatch = crc_errors > *last_crc_seen;
        *last_crc_seen = crc_errors;
        let permil = ((pos - cfg.first) * 1000 / range_len) as u32;
        if let Some(speed) = self.gauge.sample(permil) {
            self.sink.position(PositionUpdate {
                permil,
                speed,
                color: classify_route(unreadable, mismatch, resumed),
                unreadable: self.counters.total_errors,
                checksum_errors: crc_errors,
            });
        }
    }
}
