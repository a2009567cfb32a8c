use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Magic prefix of a reference checksum file.
pub const SUMS_MAGIC: &[u8; 8] = b"ORPHSUM1";

const HEADER_LEN: usize = 80;
const MAX_REFERENCE_SECTORS: u64 = 1 << 30;

#[derive(Debug, Error)]
pub enum ChecksumError {
    #[error("checksum file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a checksum reference file (bad magic)")]
    BadMagic,
    #[error("checksum reference file is truncated")]
    Truncated,
    #[error("implausible sector count {0} in checksum reference file")]
    SectorCount(u64),
}

#[inline]
pub fn sector_crc(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

pub fn fingerprint_sector(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Per-sector CRCs plus the medium fingerprint and whole-image digest,
/// persisted as magic, sector count, fingerprint, digest, then one
/// little-endian u32 CRC per sector.
pub struct ReferenceSums {
    pub sectors: u64,
    pub fingerprint: [u8; 32],
    pub digest: [u8; 32],
    crcs: Vec<u32>,
}

impl ReferenceSums {
    pub fn new(sectors: u64, fingerprint: [u8; 32], digest: [u8; 32], crcs: Vec<u32>) -> Self {
        debug_assert_eq!(crcs.len() as u64, sectors);
        ReferenceSums {
            sectors,
            fingerprint,
            digest,
            crcs,
        }
    }

    #[inline]
    pub fn crc(&self, sector: u64) -> Option<u32> {
        self.crcs.get(sector as usize).copied()
    }

    pub fn parse(data: &[u8]) -> Result<Self, ChecksumError> {
        if data.len() < SUMS_MAGIC.len() || &data[..SUMS_MAGIC.len()] != SUMS_MAGIC {
            return Err(ChecksumError::BadMagic);
        }
        if data.len() < HEADER_LEN {
            return Err(ChecksumError::Truncated);
        }
        let sectors = u64::from_le_bytes(data[8..16].try_into().unwrap());
        if sectors == 0 || sectors > MAX_REFERENCE_SECTORS {
            return Err(ChecksumError::SectorCount(sectors));
        }
        let mut fingerprint = [0u8; 32];
        fingerprint.copy_from_slice(&data[16..48]);
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&data[48..80]);
        let body = &data[HEADER_LEN..];
        // compare in u64, sectors * 4 can overflow usize on 32-bit targets
        if (body.len() as u64) < sectors * 4 {
            return Err(ChecksumError::Truncated);
        }
        let body_len = (sectors * 4) as usize;
        let mut crcs = Vec::with_capacity(sectors as usize);
        for chunk in body[..body_len].chunks_exact(4) {
            crcs.push(u32::from_le_bytes(chunk.try_into().unwrap()));
        }
        Ok(ReferenceSums {
            sectors,
            fingerprint,
            digest,
            crcs,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ChecksumError> {
        let data = fs::read(path)?;
        Self::parse(&data)
    }

    pub fn write(&self, path: &Path) -> Result<(), ChecksumError> {
        let file = fs::File::create(path)?;
        let mut out = BufWriter::new(file);
        out.write_all(SUMS_MAGIC)?;
        out.write_all(&self.sectors.to_le_bytes())?;
        out.write_all(&self.fingerprint)?;
        out.write_all(&self.digest)?;
        for crc in &self.crcs {
            out.write_all(&crc.to_le_bytes())?;
        }
        out.flush()?;
        Ok(())
    }
}

/// Either collecting CRCs for a fresh image or checking sectors against a
/// loaded reference. Never both for the same session.
pub enum ChecksumCache {
    Building { crcs: Vec<u32> },
    Comparing { reference: ReferenceSums },
}

impl ChecksumCache {
    pub fn building(sectors: u64) -> Self {
        ChecksumCache::Building {
            crcs: vec![0u32; sectors as usize],
        }
    }

    pub fn comparing(reference: ReferenceSums) -> Self {
        ChecksumCache::Comparing { reference }
    }
}
