use std::collections::{HashMap, HashSet};

use orpheus::device::{DeviceError, MediumInfo, MediumKind, MediumReader};
use orpheus::sector::SECTOR_SIZE;

/// Deterministic per-sector content so tests can verify what landed where.
pub fn fill_sector(sector: u64, buf: &mut [u8]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte = ((sector as usize + i) as u8) ^ 0x5a;
    }
}

pub fn expected_sector(sector: u64) -> [u8; SECTOR_SIZE] {
    let mut buf = [0u8; SECTOR_SIZE];
    fill_sector(sector, &mut buf);
    buf
}

/// In-memory medium with injectable read failures. Sectors listed in `bad`
/// return an unreadable error, sectors in `fatal` a device failure, and
/// healing sectors start succeeding after a fixed number of failed attempts.
pub struct SimMedium {
    info: MediumInfo,
    bad: HashSet<u64>,
    fatal: HashSet<u64>,
    heal_after: HashMap<u64, u32>,
    attempts: HashMap<u64, u32>,
    pub reads: u64,
    pub ejected: bool,
}

impl SimMedium {
    pub fn new(sectors: u64) -> Self {
        SimMedium {
            info: MediumInfo {
                sectors,
                cluster: 16,
                kind: MediumKind::Cd,
                rate_kib: 150.0,
                can_c2: false,
                description: "simulated medium".to_string(),
            },
            bad: HashSet::new(),
            fatal: HashSet::new(),
            heal_after: HashMap::new(),
            attempts: HashMap::new(),
            reads: 0,
            ejected: false,
        }
    }

    pub fn with_kind(mut self, kind: MediumKind) -> Self {
        self.info.kind = kind;
        self
    }

    pub fn with_bad(mut self, sector: u64) -> Self {
        self.bad.insert(sector);
        self
    }

    pub fn with_fatal(mut self, sector: u64) -> Self {
        self.fatal.insert(sector);
        self
    }

    pub fn with_heal(mut self, sector: u64, failures: u32) -> Self {
        self.bad.insert(sector);
        self.heal_after.insert(sector, failures);
        self
    }
}

impl MediumReader for SimMedium {
    fn info(&self) -> &MediumInfo {
        &self.info
    }

    fn read_sectors(&mut self, first_sector: u64, buf: &mut [u8]) -> Result<(), DeviceError> {
        self.reads += 1;
        let count = (buf.len() / SECTOR_SIZE) as u64;
        if first_sector + count > self.info.sectors {
            return Err(DeviceError::Fatal {
                sector: first_sector,
                detail: "read beyond end of medium".to_string(),
            });
        }
        for i in 0..count {
            let sector = first_sector + i;
            if self.fatal.contains(&sector) {
                return Err(DeviceError::Fatal {
                    sector,
                    detail: "simulated drive failure".to_string(),
                });
            }
            let failing = match self.heal_after.get(&sector) {
                Some(&limit) => {
                    let seen = self.attempts.entry(sector).or_insert(0);
                    *seen += 1;
                    *seen <= limit
                }
                None => self.bad.contains(&sector),
            };
            if failing {
                // sectors before this one are already filled, as a real drive
                // delivers the data it managed to read
                return Err(DeviceError::Unreadable {
                    sector,
                    detail: "simulated read error".to_string(),
                });
            }
            let start = i as usize * SECTOR_SIZE;
            fill_sector(sector, &mut buf[start..start + SECTOR_SIZE]);
        }
        Ok(())
    }

    fn eject(&mut self) -> Result<(), DeviceError> {
        self.ejected = true;
        Ok(())
    }
}
