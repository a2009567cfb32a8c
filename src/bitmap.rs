/// One bit per sector, set once the sector is confirmed present in the image.
pub struct SectorBitmap {
    words: Vec<u32>,
    sectors: u64,
}

impl SectorBitmap {
    pub fn new(sectors: u64) -> Self {
        SectorBitmap {
            words: vec![0u32; sectors.div_ceil(32) as usize],
            sectors,
        }
    }

    #[inline]
    pub fn sectors(&self) -> u64 {
        self.sectors
    }

    #[inline]
    pub fn get(&self, sector: u64) -> bool {
        debug_assert!(sector < self.sectors);
        self.words[(sector >> 5) as usize] & (1u32 << (sector & 31)) != 0
    }

    #[inline]
    pub fn set(&mut self, sector: u64) {
        debug_assert!(sector < self.sectors);
        self.words[(sector >> 5) as usize] |= 1u32 << (sector & 31);
    }

    pub fn count_set(&self) -> u64 {
        self.words.iter().map(|w| u64::from(w.count_ones())).sum()
    }
}
