use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::sector::SECTOR_SIZE;

pub const KB: u64 = 1024;
pub const MB: u64 = KB * 1024;
pub const GB: u64 = MB * 1024;
pub const TB: u64 = GB * 1024;

/// Single-speed transfer rates in KiB/s.
pub const CD_RATE_KIB: f64 = 150.0;
pub const DVD_RATE_KIB: f64 = 1352.5;
pub const BD_RATE_KIB: f64 = 4495.5;

const CD_MAX_SECTORS: u64 = 405_000;
const DVD_MAX_SECTORS: u64 = 4_300_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediumKind {
    Cd,
    Dvd,
    Bd,
    Unknown,
}

impl std::fmt::Display for MediumKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediumKind::Cd => write!(f, "CD"),
            MediumKind::Dvd => write!(f, "DVD"),
            MediumKind::Bd => write!(f, "BD"),
            MediumKind::Unknown => write!(f, "Unknown"),
        }
    }
}

pub fn kind_for_sectors(sectors: u64) -> MediumKind {
    if sectors == 0 {
        MediumKind::Unknown
    } else if sectors <= CD_MAX_SECTORS {
        MediumKind::Cd
    } else if sectors <= DVD_MAX_SECTORS {
        MediumKind::Dvd
    } else {
        MediumKind::Bd
    }
}

pub fn cluster_for_kind(kind: MediumKind) -> usize {
    match kind {
        MediumKind::Bd => 32,
        _ => 16,
    }
}

pub fn rate_for_kind(kind: MediumKind) -> f64 {
    match kind {
        MediumKind::Cd => CD_RATE_KIB,
        MediumKind::Dvd => DVD_RATE_KIB,
        MediumKind::Bd => BD_RATE_KIB,
        MediumKind::Unknown => DVD_RATE_KIB,
    }
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("unreadable sector {sector}: {detail}")]
    Unreadable { sector: u64, detail: String },
    #[error("device failure at sector {sector}: {detail}")]
    Fatal { sector: u64, detail: String },
}

impl DeviceError {
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DeviceError::Unreadable { .. })
    }

    #[inline]
    pub fn sector(&self) -> u64 {
        match self {
            DeviceError::Unreadable { sector, .. } | DeviceError::Fatal { sector, .. } => *sector,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediumInfo {
    pub sectors: u64,
    pub cluster: usize,
    pub kind: MediumKind,
    pub rate_kib: f64,
    pub can_c2: bool,
    pub description: String,
}

/// Source of raw sectors. Implemented for plain files and block devices here;
/// anything that can deliver 2048-byte sectors by index fits behind it.
pub trait MediumReader {
    fn info(&self) -> &MediumInfo;

    fn spin_up(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Fills `buf` with `buf.len() / SECTOR_SIZE` sectors starting at
    /// `first_sector`. On failure the sectors before the reported error
    /// sector are still valid in `buf`.
    fn read_sectors(&mut self, first_sector: u64, buf: &mut [u8]) -> Result<(), DeviceError>;

    /// Per-sector C2 error counts from the last read, when the drive reports them.
    fn c2_counts(&self) -> &[u8] {
        &[]
    }

    fn eject(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

pub struct FileMedium {
    file: File,
    info: MediumInfo,
    direct_io: bool,
}

impl FileMedium {
    pub fn open(path: &Path) -> Result<Self, DeviceError> {
        Self::open_with_options(path, true)
    }

    pub fn open_buffered(path: &Path) -> Result<Self, DeviceError> {
        Self::open_with_options(path, false)
    }

    pub fn open_with_options(path: &Path, direct: bool) -> Result<Self, DeviceError> {
        let (file, direct_io) = open_medium(path, direct).map_err(|e| DeviceError::Fatal {
            sector: 0,
            detail: format!("cannot open {}: {}", path.display(), e),
        })?;
        let bytes = medium_size(&file).map_err(|e| DeviceError::Fatal {
            sector: 0,
            detail: format!("cannot size {}: {}", path.display(), e),
        })?;
        let sectors = bytes / SECTOR_SIZE as u64;
        let kind = kind_for_sectors(sectors);
        debug!(
            "opened {} ({} sectors, {}, direct={})",
            path.display(),
            sectors,
            kind,
            direct_io
        );
        Ok(FileMedium {
            file,
            info: MediumInfo {
                sectors,
                cluster: cluster_for_kind(kind),
                kind,
                rate_kib: rate_for_kind(kind),
                can_c2: false,
                description: format!("{} medium at {}", kind, path.display()),
            },
            direct_io,
        })
    }

    #[inline]
    pub fn direct_io(&self) -> bool {
        self.direct_io
    }
}

impl MediumReader for FileMedium {
    fn info(&self) -> &MediumInfo {
        &self.info
    }

    fn read_sectors(&mut self, first_sector: u64, buf: &mut [u8]) -> Result<(), DeviceError> {
        debug_assert_eq!(buf.len() % SECTOR_SIZE, 0);
        let count = (buf.len() / SECTOR_SIZE) as u64;
        if first_sector + count > self.info.sectors {
            return Err(DeviceError::Fatal {
                sector: first_sector,
                detail: "read beyond end of medium".into(),
            });
        }
        self.file
            .seek(SeekFrom::Start(first_sector * SECTOR_SIZE as u64))
            .map_err(|e| DeviceError::Fatal {
                sector: first_sector,
                detail: e.to_string(),
            })?;
        match self.file.read_exact(buf) {
            Ok(()) => Ok(()),
            // EIO is the medium telling us this spot is bad, not the transport dying
            Err(e) if e.raw_os_error() == Some(5) => Err(DeviceError::Unreadable {
                sector: first_sector,
                detail: e.to_string(),
            }),
            Err(e) => Err(DeviceError::Fatal {
                sector: first_sector,
                detail: e.to_string(),
            }),
        }
    }

    fn eject(&mut self) -> Result<(), DeviceError> {
        debug!("eject not supported for plain files");
        Ok(())
    }
}

fn open_medium(path: &Path, direct: bool) -> std::io::Result<(File, bool)> {
    if direct {
        if let Ok(file) = open_direct(path) {
            return Ok((file, true));
        }
        debug!(
            "direct I/O unavailable for {}, falling back to buffered reads",
            path.display()
        );
    }
    Ok((File::open(path)?, false))
}

#[cfg(target_os = "linux")]
fn open_direct(path: &Path) -> std::io::Result<File> {
    use std::fs::OpenOptions;
    use std::os::unix::fs::OpenOptionsExt;

    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_DIRECT)
        .open(path)
}

#[cfg(not(target_os = "linux"))]
fn open_direct(_path: &Path) -> std::io::Result<File> {
    Err(std::io::Error::from(std::io::ErrorKind::Unsupported))
}

fn medium_size(file: &File) -> std::io::Result<u64> {
    let len = file.metadata()?.len();
    if len > 0 {
        return Ok(len);
    }
    // block devices report zero length through metadata
    #[cfg(target_os = "linux")]
    if let Some(size) = block_device_size(file) {
        return Ok(size);
    }
    Ok(0)
}

#[cfg(target_os = "linux")]
fn block_device_size(file: &File) -> Option<u64> {
    use std::os::unix::io::AsRawFd;

    const BLKGETSIZE64: libc::c_ulong = 0x80081272;

    let mut size: u64 = 0;
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), BLKGETSIZE64, &mut size) };
    if rc == 0 && size > 0 { Some(size) } else { None }
}

#[derive(Debug, Clone)]
pub struct OpticalDrive {
    pub name: String,
    pub path: PathBuf,
    pub model: String,
    pub capacity: Option<u64>,
}

#[cfg(target_os = "linux")]
pub fn discover_optical_drives() -> Vec<OpticalDrive> {
    let mut drives = Vec::new();
    let Ok(entries) = std::fs::read_dir("/sys/block") else {
        return drives;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with("sr") {
            continue;
        }
        let sys = entry.path();
        let vendor = read_sys_attr(&sys.join("device/vendor"));
        let model = read_sys_attr(&sys.join("device/model"));
        let capacity = read_sys_attr(&sys.join("size"))
            .parse::<u64>()
            .ok()
            .map(|blocks| blocks * 512)
            .filter(|&bytes| bytes > 0);
        drives.push(OpticalDrive {
            path: PathBuf::from(format!("/dev/{name}")),
            model: format!("{vendor} {model}").trim().to_string(),
            name,
            capacity,
        });
    }
    drives.sort_by(|a, b| a.name.cmp(&b.name));
    drives
}

#[cfg(not(target_os = "linux"))]
pub fn discover_optical_drives() -> Vec<OpticalDrive> {
    Vec::new()
}

#[cfg(target_os = "linux")]
fn read_sys_attr(path: &Path) -> String {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

pub fn format_drive_table(drives: &[OpticalDrive]) -> String {
    let mut out = String::new();
    out.push_str("NAME    CAPACITY    MODEL\n");
    for drive in drives {
        let capacity = match drive.capacity {
            Some(bytes) => human_bytes(bytes),
            None => "no medium".to_string(),
        };
        out.push_str(&format!(
            "{:<7} {:<11} {}\n",
            drive.name, capacity, drive.model
        ));
    }
    out
}

pub fn drive_selection_options(drives: &[OpticalDrive]) -> Vec<String> {
    drives
        .iter()
        .map(|d| match d.capacity {
            Some(bytes) => format!("{} ({}, {})", d.name, d.model, human_bytes(bytes)),
            None => format!("{} ({}, no medium)", d.name, d.model),
        })
        .collect()
}

pub fn human_bytes(bytes: u64) -> String {
    if bytes >= TB {
        format!("{:.1} TiB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.1} GiB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MiB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KiB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
