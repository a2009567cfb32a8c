use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bitmap::SectorBitmap;
use crate::buffer::AlignedBuffer;
use crate::checksum::{ChecksumCache, ChecksumError, ReferenceSums, fingerprint_sector};
use crate::device::{DeviceError, MediumInfo, MediumKind, MediumReader};
use crate::image::{self, ImageError, ImageReader, ImageWriter};
use crate::progress::{ProgressSink, SpeedGauge};
use crate::queue::{HandoffQueue, QUEUE_DEPTH, StorageFault};
use crate::reader::{PassConfig, PassReader, PassResult, ReadCounters};
use crate::sector::{FINGERPRINT_SECTOR, MAX_CLUSTER_SECTORS};
use crate::worker::run_worker;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub scan_only: bool,
    pub image: Option<PathBuf>,
    pub first_sector: Option<u64>,
    pub last_sector: Option<u64>,
    pub passes: u32,
    pub sector_skip: u64,
    pub ignore_fatal: bool,
    pub allow_truncate: bool,
    pub eject: bool,
    pub spinup_secs: u64,
    pub reference: Option<PathBuf>,
    pub write_sums: Option<PathBuf>,
    pub speed_warning: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            scan_only: false,
            image: None,
            first_sector: None,
            last_sector: None,
            passes: 1,
            sector_skip: 0,
            ignore_fatal: false,
            allow_truncate: false,
            eject: false,
            spinup_secs: 0,
            reference: None,
            write_sums: None,
            speed_warning: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Scan,
    Fresh,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalResolution {
    Abort,
    IgnoreOnce,
    IgnoreAlways,
}

/// Decision points that need a human when one is available. The session
/// consults its configuration first and only falls back to the prompt.
pub trait Prompt {
    fn confirm_restart_fresh(&self, detail: &str) -> bool;
    fn resolve_fatal(&self, sector: u64, detail: &str) -> FatalResolution;
    fn confirm_truncate(&self, sectors: u64) -> bool;
}

/// Declines everything, for unattended runs. Overrides arrive through
/// `SessionConfig` flags instead.
pub struct AutoPrompt;

impl Prompt for AutoPrompt {
    fn confirm_restart_fresh(&self, _detail: &str) -> bool {
        false
    }

    fn resolve_fatal(&self, _sector: u64, _detail: &str) -> FatalResolution {
        FatalResolution::Abort
    }

    fn confirm_truncate(&self, _sectors: u64) -> bool {
        false
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error(transparent)]
    Storage(#[from] StorageFault),
    #[error(transparent)]
    Reference(#[from] ChecksumError),
    #[error("medium does not match the image on disk")]
    FingerprintMismatch,
    #[error("aborted after {sectors_read} sectors read, {unreadable} unreadable")]
    Aborted { sectors_read: u64, unreadable: u64 },
    #[error("invalid sector range {first}..{last}")]
    InvalidRange { first: u64, last: u64 },
    #[error("{0}")]
    Config(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    AllRead,
    Incomplete,
    TruncatedTao,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub mode: Mode,
    pub sectors: u64,
    pub sectors_read: u64,
    pub unreadable: u64,
    pub checksum_errors: u64,
    pub passes: u32,
    pub max_c2: u32,
    pub image_digest: Option<String>,
    pub digest_matches: Option<bool>,
    pub truncated_sectors: u64,
    pub integrity_warning: bool,
    pub elapsed_secs: f64,
    pub verdict: Verdict,
}

impl SessionSummary {
    pub fn describe(&self) -> Vec<String> {
        let mut lines = Vec::new();
        match self.verdict {
            Verdict::AllRead => {
                if self.checksum_errors == 0 {
                    lines.push("All sectors successfully read.".to_string());
                } else {
                    lines.push(format!(
                        "All sectors read, but {} do not match their recorded checksums.",
                        self.checksum_errors
                    ));
                }
            }
            Verdict::TruncatedTao => {
                if self.mode == Mode::Scan {
                    lines.push(format!(
                        "{} trailing sectors were unreadable; this is normal for a \
                         disc written in TAO mode.",
                        self.truncated_sectors
                    ));
                } else {
                    lines.push(format!(
                        "{} trailing sectors were unreadable and the image was truncated; \
                         this is normal for a disc written in TAO mode.",
                        self.truncated_sectors
                    ));
                }
            }
            Verdict::Incomplete => {
                if self.checksum_errors > 0 {
                    lines.push(format!(
                        "{} unreadable sectors, {} checksum errors.",
                        self.unreadable, self.checksum_errors
                    ));
                } else {
                    lines.push(format!("{} unreadable sectors remain.", self.unreadable));
                }
            }
        }
        if let Some(digest) = &self.image_digest {
            match self.digest_matches {
                Some(true) => {
                    lines.push("Image digest matches the reference checksums.".to_string())
                }
                Some(false) => lines.push(format!(
                    "Image digest {} does not match the reference checksums.",
                    digest
                )),
                None => lines.push(format!("Image digest: {}", digest)),
            }
        }
        if self.max_c2 > 0 {
            lines.push(format!(
                "Worst C2 error count on a single read: {}.",
                self.max_c2
            ));
        }
        if self.integrity_warning {
            lines.push(
                "Accounting mismatch between unreadable sectors and placeholders written."
                    .to_string(),
            );
        }
        lines
    }
}

/// Runs one reading or scanning session against `device`: resolves the mode
/// from what is already on disk, starts the persistence worker, sweeps the
/// configured range for up to `passes` passes and tears everything down in
/// order no matter how the sweep ended.
pub fn run<D: MediumReader>(
    device: &mut D,
    cfg: &SessionConfig,
    prompt: &dyn Prompt,
    sink: &dyn ProgressSink,
    cancel: &AtomicBool,
) -> Result<SessionSummary, SessionError> {
    let started = Instant::now();
    let info = device.info().clone();
    if info.sectors == 0 {
        return Err(SessionError::Config("medium reports zero sectors".into()));
    }
    assert!(info.cluster > 0 && info.cluster <= MAX_CLUSTER_SECTORS);

    let first = cfg.first_sector.unwrap_or(0);
    let last = cfg.last_sector.unwrap_or(info.sectors - 1);
    if first > last || last >= info.sectors {
        return Err(SessionError::InvalidRange { first, last });
    }
    let range_len = last + 1 - first;
    let explicit_range = cfg.first_sector.is_some() || cfg.last_sector.is_some();
    let full_range = first == 0 && last + 1 == info.sectors;

    let image_path = if cfg.scan_only {
        None
    } else {
        match &cfg.image {
            Some(path) => Some(path.clone()),
            None => {
                return Err(SessionError::Config(
                    "an image path is required unless scanning".into(),
                ));
            }
        }
    };

    device.spin_up()?;
    if cfg.spinup_secs > 0 {
        warm_up(device, &info, cfg.spinup_secs, cancel);
    }

    let need_fingerprint = !cfg.scan_only || cfg.reference.is_some();
    let medium_fp = if need_fingerprint {
        medium_fingerprint(device, &info, cfg.ignore_fatal)?
    } else {
        None
    };

    let mut mode = if cfg.scan_only { Mode::Scan } else { Mode::Fresh };
    let mut marker = 0u64;
    let mut image_reader: Option<ImageReader> = None;
    let mut image_writer: Option<ImageWriter> = None;

    if let Some(path) = image_path.as_deref() {
        if path.exists() {
            let mut reader = ImageReader::open(path)?;
            let existing = reader.read_marker();
            if existing > info.sectors {
                return Err(SessionError::Config(format!(
                    "image has {} sectors but the medium only {}",
                    existing, info.sectors
                )));
            }
            let image_fp = reader.image_fingerprint()?;
            let fingerprints_match = match (image_fp, medium_fp) {
                (Some(img), Some(med)) => img == med,
                // either side unknown, nothing to compare against
                _ => true,
            };
            if !fingerprints_match {
                warn!("the image on disk does not belong to this medium");
                if prompt.confirm_restart_fresh("the image on disk belongs to a different medium") {
                    drop(reader);
                    image::remove_image(path)?;
                    image_writer = Some(ImageWriter::create(path)?);
                    image_reader = Some(ImageReader::open(path)?);
                } else {
                    return Err(SessionError::FingerprintMismatch);
                }
            } else if existing == 0 {
                image_writer = Some(ImageWriter::open_existing(path)?);
                image_reader = Some(reader);
            } else {
                info!(
                    "image already has {} of {} sectors, completing it",
                    existing, info.sectors
                );
                image_writer = Some(ImageWriter::open_existing(path)?);
                image_reader = Some(reader);
                mode = Mode::Complete;
                marker = existing;
            }
        } else {
            image_writer = Some(ImageWriter::create(path)?);
            image_reader = Some(ImageReader::open(path)?);
        }
    }

    let effective_passes = if cfg.scan_only { 1 } else { cfg.passes.max(1) };
    let multi_pass = effective_passes > 1;

    // An unrestricted single-pass resume continues where the image stops.
    // Restricted ranges, extra passes and full-length images instead sweep
    // from the start and seek out whatever is still missing.
    let pass1_first = if mode == Mode::Complete
        && !explicit_range
        && !multi_pass
        && marker < info.sectors
    {
        info!("continuing at sector {}", marker);
        marker.max(first)
    } else {
        first
    };

    let mut bitmap = if multi_pass {
        let mut bm = SectorBitmap::new(info.sectors);
        if mode == Mode::Complete {
            if let Some(reader) = image_reader.as_mut() {
                let present = reader.mark_existing(&mut bm)?;
                debug!("{} sectors already present in the image", present);
            }
        }
        Some(bm)
    } else {
        None
    };

    let mut reference: Option<ReferenceSums> = None;
    if let Some(path) = cfg.reference.as_deref() {
        let sums = ReferenceSums::load(path)?;
        if sums.sectors != info.sectors {
            warn!(
                "reference checksums cover {} sectors but the medium has {}, ignoring them",
                sums.sectors, info.sectors
            );
        } else if medium_fp.is_some() && medium_fp != Some(sums.fingerprint) {
            warn!("reference checksums belong to a different medium, ignoring them");
        } else {
            reference = Some(sums);
        }
    }
    let ref_digest = reference.as_ref().map(|r| r.digest);

    let cache = if let Some(sums) = reference.take() {
        Some(ChecksumCache::comparing(sums))
    } else if mode == Mode::Fresh && full_range {
        Some(ChecksumCache::building(info.sectors))
    } else {
        None
    };
    let digest_enabled = full_range && matches!(mode, Mode::Fresh | Mode::Scan);
    let digest = digest_enabled.then(Sha256::new);

    // pad everything in front of the requested range so offsets line up
    if let Some(writer) = image_writer.as_mut() {
        if mode == Mode::Fresh && first > 0 {
            debug!("padding sectors 0..{} with placeholders", first);
            writer.fill_dead_range(0, first)?;
        }
        if mode == Mode::Complete && first > marker {
            writer.fill_dead_range(marker, first - marker)?;
        }
    }

    let queue = HandoffQueue::new(QUEUE_DEPTH, info.cluster);
    let mut gauge = SpeedGauge::new(info.rate_kib, cfg.speed_warning);
    let mut counters = ReadCounters::default();
    let mut ignore_fatal = cfg.ignore_fatal;
    let mut passes_run = 0u32;
    let mut pass_result = PassResult::Completed;

    sink.announce(&format!(
        "{} {}, {} sectors",
        match mode {
            Mode::Scan => "scanning",
            Mode::Fresh => "reading",
            Mode::Complete => "completing",
        },
        info.description,
        range_len
    ));
    gauge.begin();

    let report = thread::scope(|scope| {
        let queue_ref = &queue;
        let writer_ref = image_writer.as_mut();
        let worker = scope.spawn(move || run_worker(queue_ref, writer_ref, cache, digest));

        for pass in 0..effective_passes {
            counters.pass_errors = 0;
            let crc_before = queue.crc_errors();
            let pass_cfg = PassConfig {
                first: if pass == 0 { pass1_first } else { first },
                last,
                capacity: info.sectors,
                cluster: info.cluster,
                sector_skip: if pass == 0 { cfg.sector_skip } else { 0 },
                scan_only: cfg.scan_only,
            };
            let marker_for_pass = if pass == 0 { marker } else { last + 1 };
            if pass > 0 {
                info!(
                    "pass {} of {}, trying to complete the image",
                    pass + 1,
                    effective_passes
                );
            }
            let mut pass_reader = PassReader {
                device: &mut *device,
                queue: &queue,
                image: image_reader.as_mut(),
                bitmap: bitmap.as_mut(),
                gauge: &mut gauge,
                sink,
                prompt,
                cancel,
                ignore_fatal: &mut ignore_fatal,
                counters: &mut counters,
            };
            pass_result = pass_reader.run_pass(&pass_cfg, marker_for_pass);
            match pass_result {
                PassResult::Completed => {
                    passes_run += 1;
                    let pass_crc = queue.crc_errors() - crc_before;
                    if counters.pass_errors == 0 && pass_crc == 0 {
                        break;
                    }
                }
                _ => break,
            }
        }

        // always hand the worker its EOF, even on an abnormal exit
        queue.send_eof();
        worker.join().expect("worker thread panicked")
    });

    match pass_result {
        PassResult::Completed => {}
        PassResult::Cancelled => {
            return Err(SessionError::Aborted {
                sectors_read: counters.read_ok,
                unreadable: counters.total_errors,
            });
        }
        PassResult::Faulted(fault) => return Err(fault.into()),
        PassResult::DeviceAborted(err) => return Err(err.into()),
    }
    if let Some(fault) = queue.fault() {
        return Err(fault.into());
    }

    let mut integrity_warning = false;
    if !cfg.scan_only && queue.dead_written() != counters.total_errors {
        warn!(
            "{} unreadable sectors but {} placeholders written",
            counters.total_errors,
            queue.dead_written()
        );
        integrity_warning = true;
    }

    let mut truncated = 0u64;
    let mut verdict = if counters.pass_errors == 0 {
        Verdict::AllRead
    } else {
        Verdict::Incomplete
    };
    if verdict == Verdict::Incomplete
        && info.kind != MediumKind::Dvd
        && last == info.sectors - 1
        && counters.pass_errors == counters.tao_tail
        && (cfg.allow_truncate || prompt.confirm_truncate(counters.tao_tail))
    {
        info!(
            "{} sectors missing at the end of the disc; this is expected for \
             TAO written media",
            counters.tao_tail
        );
        if let Some(writer) = image_writer.as_mut() {
            debug!("trimming the image to {} sectors", info.sectors - counters.tao_tail);
            writer.truncate_sectors(info.sectors - counters.tao_tail)?;
        }
        truncated = counters.tao_tail;
        verdict = Verdict::TruncatedTao;
    }

    if let Some(writer) = image_writer.as_mut() {
        writer.sync()?;
    }

    let clean_single =
        passes_run == 1 && counters.total_errors == 0 && counters.read_ok == range_len;
    let digest_bytes = if clean_single { report.digest } else { None };
    let image_digest = digest_bytes.map(hex::encode);
    let digest_matches = match (digest_bytes, ref_digest) {
        (Some(d), Some(r)) => Some(d == r),
        _ => None,
    };

    if let Some(path) = cfg.write_sums.as_deref() {
        if let (Some(crcs), Some(digest), Some(fp)) = (report.crcs, digest_bytes, medium_fp) {
            ReferenceSums::new(info.sectors, fp, digest, crcs).write(path)?;
            info!("wrote reference checksums to {}", path.display());
        } else {
            warn!("reference checksums not written, the session was not a clean full read");
        }
    }

    if cfg.eject && verdict != Verdict::Incomplete {
        if let Err(e) = device.eject() {
            debug!("eject failed: {}", e);
        }
    }

    Ok(SessionSummary {
        mode,
        sectors: info.sectors,
        sectors_read: counters.read_ok,
        unreadable: counters.pass_errors - truncated,
        checksum_errors: queue.crc_errors(),
        passes: passes_run,
        max_c2: counters.max_c2,
        image_digest,
        digest_matches,
        truncated_sectors: truncated,
        integrity_warning,
        elapsed_secs: started.elapsed().as_secs_f64(),
        verdict,
    })
}

/// Keeps the drive reading for a few seconds so it reaches full speed before
/// the timed part of the session begins. Read errors just end the warm-up.
fn warm_up<D: MediumReader>(device: &mut D, info: &MediumInfo, secs: u64, cancel: &AtomicBool) {
    debug!("spinning the drive up for {} seconds", secs);
    let deadline = Instant::now() + Duration::from_secs(secs);
    let mut buf = AlignedBuffer::new(info.cluster);
    let mut pos = 0u64;
    while Instant::now() < deadline {
        if cancel.load(Ordering::Relaxed) {
            return;
        }
        if pos + info.cluster as u64 > info.sectors {
            pos = 0;
        }
        if device.read_sectors(pos, buf.as_mut_slice()).is_err() {
            return;
        }
        pos += info.cluster as u64;
    }
}

fn medium_fingerprint<D: MediumReader>(
    device: &mut D,
    info: &MediumInfo,
    ignore_fatal: bool,
) -> Result<Option<[u8; 32]>, DeviceError> {
    if FINGERPRINT_SECTOR >= info.sectors {
        return Ok(None);
    }
    let mut buf = AlignedBuffer::new(1);
    match device.read_sectors(FINGERPRINT_SECTOR, buf.as_mut_slice()) {
        Ok(()) => Ok(Some(fingerprint_sector(buf.as_slice()))),
        Err(e) if e.is_recoverable() => {
            warn!("fingerprint sector is unreadable, image matching unavailable");
            Ok(None)
        }
        Err(e) if ignore_fatal => {
            warn!("device failure reading the fingerprint sector, continuing: {}", e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
