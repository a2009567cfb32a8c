use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::bitmap::SectorBitmap;
use crate::checksum;
use crate::sector::{DEAD_SECTOR, FINGERPRINT_SECTOR, SECTOR_SIZE, is_dead_sector};

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("cannot open image {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("seek to sector {sector} failed: {source}")]
    Seek { sector: u64, source: std::io::Error },
    #[error("read at sector {sector} failed: {source}")]
    Read { sector: u64, source: std::io::Error },
    #[error("write at sector {sector} failed: {source}")]
    Write { sector: u64, source: std::io::Error },
    #[error("truncate failed: {source}")]
    Truncate { source: std::io::Error },
    #[error("flush failed: {source}")]
    Flush { source: std::io::Error },
    #[error("cannot remove image {path}: {source}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Read handle on the image. A separate write handle works on the same path
/// so producer probes and consumer writes never race on one file position.
pub struct ImageReader {
    file: File,
    sectors: u64,
}

impl ImageReader {
    pub fn open(path: &Path) -> Result<Self, ImageError> {
        let file = File::open(path).map_err(|source| ImageError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let len = file
            .metadata()
            .map_err(|source| ImageError::Open {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        Ok(ImageReader {
            file,
            sectors: len / SECTOR_SIZE as u64,
        })
    }

    /// Number of sectors the image held when it was opened.
    #[inline]
    pub fn read_marker(&self) -> u64 {
        self.sectors
    }

    pub fn read_sector(
        &mut self,
        sector: u64,
        buf: &mut [u8; SECTOR_SIZE],
    ) -> Result<(), ImageError> {
        self.file
            .seek(SeekFrom::Start(sector * SECTOR_SIZE as u64))
            .map_err(|source| ImageError::Seek { sector, source })?;
        self.file
            .read_exact(buf)
            .map_err(|source| ImageError::Read { sector, source })
    }

    /// True when the sector exists and holds real data rather than the
    /// unreadable-sector placeholder.
    pub fn sector_present(&mut self, sector: u64) -> Result<bool, ImageError> {
        if sector >= self.sectors {
            return Ok(false);
        }
        let mut buf = [0u8; SECTOR_SIZE];
        self.read_sector(sector, &mut buf)?;
        Ok(!is_dead_sector(&buf))
    }

    pub fn image_fingerprint(&mut self) -> Result<Option<[u8; 32]>, ImageError> {
        if FINGERPRINT_SECTOR >= self.sectors {
            return Ok(None);
        }
        let mut buf = [0u8; SECTOR_SIZE];
        self.read_sector(FINGERPRINT_SECTOR, &mut buf)?;
        if is_dead_sector(&buf) {
            return Ok(None);
        }
        Ok(Some(checksum::fingerprint_sector(&buf)))
    }

    /// Sets a bit for every sector already holding data, returns how many.
    pub fn mark_existing(&mut self, bitmap: &mut SectorBitmap) -> Result<u64, ImageError> {
        let mut present = 0;
        let mut buf = [0u8; SECTOR_SIZE];
        let limit = self.sectors.min(bitmap.sectors());
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|source| ImageError::Seek { sector: 0, source })?;
        for sector in 0..limit {
            self.file
                .read_exact(&mut buf)
                .map_err(|source| ImageError::Read { sector, source })?;
            if !is_dead_sector(&buf) {
                bitmap.set(sector);
                present += 1;
            }
        }
        Ok(present)
    }
}

pub struct ImageWriter {
    file: File,
}

impl ImageWriter {
    pub fn create(path: &Path) -> Result<Self, ImageError> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|source| ImageError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(ImageWriter { file })
    }

    pub fn open_existing(path: &Path) -> Result<Self, ImageError> {
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|source| ImageError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(ImageWriter { file })
    }

    pub fn write_sectors(&mut self, first_sector: u64, data: &[u8]) -> Result<(), ImageError> {
        debug_assert_eq!(data.len() % SECTOR_SIZE, 0);
        self.file
            .seek(SeekFrom::Start(first_sector * SECTOR_SIZE as u64))
            .map_err(|source| ImageError::Seek {
                sector: first_sector,
                source,
            })?;
        self.file
            .write_all(data)
            .map_err(|source| ImageError::Write {
                sector: first_sector,
                source,
            })
    }

    pub fn fill_dead_range(&mut self, first_sector: u64, count: u64) -> Result<(), ImageError> {
        self.file
            .seek(SeekFrom::Start(first_sector * SECTOR_SIZE as u64))
            .map_err(|source| ImageError::Seek {
                sector: first_sector,
                source,
            })?;
        for i in 0..count {
            self.file
                .write_all(&DEAD_SECTOR[..])
                .map_err(|source| ImageError::Write {
                    sector: first_sector + i,
                    source,
                })?;
        }
        Ok(())
    }

    pub fn truncate_sectors(&mut self, sectors: u64) -> Result<(), ImageError> {
        self.file
            .set_len(sectors * SECTOR_SIZE as u64)
            .map_err(|source| ImageError::Truncate { source })
    }

    pub fn sync(&mut self) -> Result<(), ImageError> {
        self.file
            .flush()
            .map_err(|source| ImageError::Flush { source })?;
        self.file
            .sync_all()
            .map_err(|source| ImageError::Flush { source })
    }
}

pub fn remove_image(path: &Path) -> Result<(), ImageError> {
    std::fs::remove_file(path).map_err(|source| ImageError::Remove {
        path: path.to_path_buf(),
        source,
    })
}
