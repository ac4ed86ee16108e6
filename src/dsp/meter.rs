//! Output meter: the terminal stage of every chain.
//!
//! The audio side writes per-block peak and RMS into atomics; the control
//! side reads them at its own pace.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Levels shared between the meter stage and its readers (f32 as bits).
#[derive(Debug)]
pub struct MeterLevels {
    peak: AtomicU32,
    rms: AtomicU32,
}

impl Default for MeterLevels {
    fn default() -> Self {
        MeterLevels {
            peak: AtomicU32::new(0.0_f32.to_bits()),
            rms: AtomicU32::new(0.0_f32.to_bits()),
        }
    }
}

impl MeterLevels {
    /// Absolute peak of the last block, both channels.
    pub fn peak(&self) -> f32 {
        f32::from_bits(self.peak.load(Ordering::Relaxed))
    }

    pub fn rms(&self) -> f32 {
        f32::from_bits(self.rms.load(Ordering::Relaxed))
    }

    /// Peak in dBFS, floored at -120.
    pub fn peak_db(&self) -> f32 {
        let p = self.peak();
        if p <= 1e-6 { -120.0 } else { 20.0 * p.log10() }
    }

    fn store(&self, peak: f32, rms: f32) {
        self.peak.store(peak.to_bits(), Ordering::Relaxed);
        self.rms.store(rms.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn clear(&self) {
        self.store(0.0, 0.0);
    }
}

/// Read-only tap appended after the last enabled stage.
#[derive(Debug, Clone)]
pub struct Meter {
    levels: Arc<MeterLevels>,
}

impl Meter {
    pub fn new(levels: Arc<MeterLevels>) -> Self {
        Meter { levels }
    }

    pub fn process_block(&self, left: &[f32], right: &[f32]) {
        let n = left.len().min(right.len());
        if n == 0 {
            return;
        }
        let mut peak = 0.0f32;
        let mut sum = 0.0f32;
        for (&l, &r) in left[..n].iter().zip(&right[..n]) {
            peak = peak.max(l.abs()).max(r.abs());
            sum += l * l + r * r;
        }
        self.levels.store(peak, (sum / (2 * n) as f32).sqrt());
    }
}
