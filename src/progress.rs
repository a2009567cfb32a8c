use std::time::Instant;

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteColor {
    Clean,
    Unreadable,
    ChecksumError,
    Resumed,
}

pub fn classify_route(unreadable: bool, checksum_mismatch: bool, resumed: bool) -> RouteColor {
    if unreadable {
        RouteColor::Unreadable
    } else if checksum_mismatch {
        RouteColor::ChecksumError
    } else if resumed {
        RouteColor::Resumed
    } else {
        RouteColor::Clean
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PositionUpdate {
    pub permil: u32,
    pub speed: f64,
    pub color: RouteColor,
    pub unreadable: u64,
    pub checksum_errors: u64,
}

/// Observational only. Nothing on the reading path depends on what a sink does.
pub trait ProgressSink {
    fn position(&self, update: PositionUpdate);
    fn announce(&self, message: &str);
}

pub struct NullSink;

impl ProgressSink for NullSink {
    fn position(&self, _update: PositionUpdate) {}
    fn announce(&self, _message: &str) {}
}

/// Moving read-speed estimate in multiples of the medium's single-speed rate.
pub struct SpeedGauge {
    rate_kib: f64,
    warn_drops: bool,
    last_sample: Instant,
    sectors_since: u64,
    speed: f64,
    last_permil: Option<u32>,
}

impl SpeedGauge {
    pub fn new(rate_kib: f64, warn_drops: bool) -> Self {
        SpeedGauge {
            rate_kib,
            warn_drops,
            last_sample: Instant::now(),
            sectors_since: 0,
            speed: 0.0,
            last_permil: None,
        }
    }

    pub fn begin(&mut self) {
        self.last_sample = Instant::now();
        self.sectors_since = 0;
        self.speed = 0.0;
        self.last_permil = None;
    }

    #[inline]
    pub fn record(&mut self, sectors: u64) {
        self.sectors_since += sectors;
    }

    #[inline]
    pub fn current(&self) -> f64 {
        self.speed
    }

    /// Returns the smoothed speed when the position moved to a new permil,
    /// None otherwise. Each returned sample averages the previous estimate
    /// with the rate measured since the last sample.
    pub fn sample(&mut self, permil: u32) -> Option<f64> {
        if self.last_permil == Some(permil) {
            return None;
        }
        self.last_permil = Some(permil);
        let elapsed = self.last_sample.elapsed().as_secs_f64();
        if elapsed < 0.001 {
            return Some(self.speed);
        }
        // nothing arrived since the last sample, show the stall
        if self.sectors_since == 0 {
            self.speed = 0.0;
            self.last_sample = Instant::now();
            return Some(0.0);
        }
        let kib = self.sectors_since as f64 * 2.0 / elapsed;
        let normalized = kib / self.rate_kib;
        let next = if self.speed > 0.0 {
            ((self.speed + normalized) / 2.0).min(99.9)
        } else {
            normalized.min(99.9)
        };
        if self.warn_drops && self.speed > 0.5 && next < self.speed / 2.0 {
            warn!(
                "speed dropped to {:.1}x, this part of the medium may be hard to read",
                next
            );
        }
        self.speed = next;
        self.sectors_since = 0;
        self.last_sample = Instant::now();
        Some(next)
    }
}
