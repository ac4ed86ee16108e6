//! Equalizer stages.
//!
//! - [`Eq3`]: three-band splitter with per-band gain, crossovers at
//!   `lowFreq` / `highFreq`. Parameters `[low, mid, high, lowFreq, highFreq]`.
//! - [`Eq8`]: eight peaking filters at fixed centers, unity Q, strictly in
//!   series. Parameters are the eight band gains in dB.

use super::filter::{BiquadFilter, FilterType, StereoBiquad};
use crate::params::{EQ8_FREQUENCIES, MAX_STAGE_PARAMS};

const CROSSOVER_Q: f64 = std::f64::consts::FRAC_1_SQRT_2;

#[inline]
fn db_to_gain(db: f64) -> f64 {
    10.0_f64.powf(db / 20.0)
}

// ── 3-band ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Eq3 {
    low: StereoBiquad,
    mid_hp: StereoBiquad,
    mid_lp: StereoBiquad,
    high: StereoBiquad,
    gains: [f64; 3],
}

impl Eq3 {
    pub fn new(sample_rate: f64) -> Self {
        let band = |ft, freq| StereoBiquad::new(BiquadFilter::with_params(ft, sample_rate, freq, CROSSOVER_Q, 0.0));
        Eq3 {
            low: band(FilterType::Lowpass, 200.0),
            mid_hp: band(FilterType::Highpass, 200.0),
            mid_lp: band(FilterType::Lowpass, 2000.0),
            high: band(FilterType::Highpass, 2000.0),
            gains: [1.0; 3],
        }
    }

    pub fn sync(&mut self, params: &[f64; MAX_STAGE_PARAMS]) {
        self.gains = [db_to_gain(params[0]), db_to_gain(params[1]), db_to_gain(params[2])];
        let (low_freq, high_freq) = (params[3], params[4]);
        self.low.set_frequency(low_freq);
        self.mid_hp.set_frequency(low_freq);
        self.mid_lp.set_frequency(high_freq);
        self.high.set_frequency(high_freq);
    }

    pub fn process_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        let [g_low, g_mid, g_high] = self.gains;
        for i in 0..left.len().min(right.len()) {
            let (l, r) = (left[i] as f64, right[i] as f64);
            let (low_l, low_r) = self.low.process(l, r);
            let (mid_l, mid_r) = self.mid_hp.process(l, r);
            let (mid_l, mid_r) = self.mid_lp.process(mid_l, mid_r);
            let (high_l, high_r) = self.high.process(l, r);
            left[i] = (low_l * g_low + mid_l * g_mid + high_l * g_high) as f32;
            right[i] = (low_r * g_low + mid_r * g_mid + high_r * g_high) as f32;
        }
    }

    pub fn reset(&mut self) {
        self.low.reset();
        self.mid_hp.reset();
        self.mid_lp.reset();
        self.high.reset();
    }
}

// ── 8-band ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Eq8 {
    bands: [StereoBiquad; 8],
}

impl Eq8 {
    pub fn new(sample_rate: f64) -> Self {
        Eq8 {
            bands: std::array::from_fn(|i| {
                StereoBiquad::new(BiquadFilter::with_params(
                    FilterType::Peaking,
                    sample_rate,
                    EQ8_FREQUENCIES[i],
                    1.0,
                    0.0,
                ))
            }),
        }
    }

    pub fn sync(&mut self, params: &[f64; MAX_STAGE_PARAMS]) {
        for (band, &gain_db) in self.bands.iter_mut().zip(params.iter()) {
            band.set_gain_db(gain_db);
        }
    }

    /// Per-band gains in dB, in center-frequency order.
    pub fn gains_db(&self) -> [f64; 8] {
        std::array::from_fn(|i| self.bands[i].left.gain_db())
    }

    pub fn process_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        for i in 0..left.len().min(right.len()) {
            let (mut l, mut r) = (left[i] as f64, right[i] as f64);
            for band in &mut self.bands {
                (l, r) = band.process(l, r);
            }
            left[i] = l as f32;
            right[i] = r as f32;
        }
    }

    pub fn reset(&mut self) {
        self.bands.iter_mut().for_each(StereoBiquad::reset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn sine_peak(process: &mut dyn FnMut(&mut [f32], &mut [f32]), freq: f64) -> f32 {
        let sr = 44100.0;
        let mut left: Vec<f32> = (0..8820).map(|i| (2.0 * PI * freq * i as f64 / sr).sin() as f32).collect();
        let mut right = left.clone();
        process(&mut left, &mut right);
        left[4410..].iter().fold(0.0f32, |m, s| m.max(s.abs()))
    }

    #[test]
    fn eq3_flat_passes_dc() {
        let mut eq = Eq3::new(44100.0);
        let mut left = vec![1.0f32; 4000];
        let mut right = left.clone();
        eq.process_block(&mut left, &mut right);
        assert!((left[3999] - 1.0).abs() < 0.01, "got {}", left[3999]);
    }

    #[test]
    fn eq3_low_cut_attenuates_bass() {
        let mut eq = Eq3::new(44100.0);
        let mut p = [0.0; MAX_STAGE_PARAMS];
        p[0] = -12.0;
        p[3] = 200.0;
        p[4] = 2000.0;
        eq.sync(&p);
        let peak = sine_peak(&mut |l, r| eq.process_block(l, r), 50.0);
        // -12 dB ≈ 0.25, plus a little leakage from the mid band
        assert!(peak < 0.45, "got {peak}");
    }

    #[test]
    fn eq8_flat_is_transparent() {
        let mut eq = Eq8::new(44100.0);
        let peak = sine_peak(&mut |l, r| eq.process_block(l, r), 1000.0);
        assert!((peak - 1.0).abs() < 0.02, "got {peak}");
    }

    #[test]
    fn eq8_band_boost_is_local() {
        let mut eq = Eq8::new(44100.0);
        let mut p = [0.0; MAX_STAGE_PARAMS];
        p[4] = 12.0; // 1 kHz
        eq.sync(&p);
        assert_eq!(eq.gains_db()[4], 12.0);
        let at_center = sine_peak(&mut |l, r| eq.process_block(l, r), 1000.0);
        eq.reset();
        let far_away = sine_peak(&mut |l, r| eq.process_block(l, r), 60.0);
        assert!(at_center > 3.0, "got {at_center}");
        assert!((far_away - 1.0).abs() < 0.1, "got {far_away}");
    }
}
