//! Biquad filters and the 24 dB/oct lowpass stage.

use std::f64::consts::PI;

use crate::params::MAX_STAGE_PARAMS;

/// Filter type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterType {
    Lowpass,
    Highpass,
    Peaking,
}

/// A biquad IIR filter (2nd order).
///
/// Implements the standard Direct Form II Transposed structure.
/// Coefficient formulas from the Audio EQ Cookbook (Robert Bristow-Johnson).
#[derive(Debug, Clone)]
pub struct BiquadFilter {
    pub filter_type: FilterType,
    frequency: f64,
    q: f64,
    gain_db: f64, // only used for Peaking

    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,

    z1: f64,
    z2: f64,

    sample_rate: f64,
    dirty: bool,
}

impl BiquadFilter {
    pub fn new(filter_type: FilterType, sample_rate: f64) -> Self {
        let mut f = BiquadFilter {
            filter_type,
            frequency: 1000.0,
            q: 0.707,
            gain_db: 0.0,
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            z1: 0.0,
            z2: 0.0,
            sample_rate,
            dirty: true,
        };
        f.update_coefficients();
        f
    }

    pub fn with_params(filter_type: FilterType, sample_rate: f64, frequency: f64, q: f64, gain_db: f64) -> Self {
        let mut f = Self::new(filter_type, sample_rate);
        f.frequency = frequency;
        f.q = q;
        f.gain_db = gain_db;
        f.update_coefficients();
        f
    }

    /// Recompute filter coefficients from current parameters.
    ///
    /// Frequency is kept below Nyquist and Q above zero so the filter
    /// stays stable for every value the parameter schema admits.
    pub fn update_coefficients(&mut self) {
        let nyquist_guard = self.sample_rate * 0.45;
        let freq = self.frequency.clamp(1.0, nyquist_guard);
        let q = self.q.max(0.01);

        let w0 = 2.0 * PI * freq / self.sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);

        let (b0, b1, b2, a0, a1, a2) = match self.filter_type {
            FilterType::Lowpass => {
                let b1 = 1.0 - cos_w0;
                let b0 = b1 / 2.0;
                (b0, b1, b0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
            }
            FilterType::Highpass => {
                let b0 = (1.0 + cos_w0) / 2.0;
                let b1 = -(1.0 + cos_w0);
                (b0, b1, b0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
            }
            FilterType::Peaking => {
                let a_lin = (10.0_f64).powf(self.gain_db / 40.0);
                (
                    1.0 + alpha * a_lin,
                    -2.0 * cos_w0,
                    1.0 - alpha * a_lin,
                    1.0 + alpha / a_lin,
                    -2.0 * cos_w0,
                    1.0 - alpha / a_lin,
                )
            }
        };

        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = a1 / a0;
        self.a2 = a2 / a0;
        self.dirty = false;
    }

    /// Process a single sample through the filter.
    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        if self.dirty {
            self.update_coefficients();
        }

        let output = self.b0 * input + self.z1;
        self.z1 = self.b1 * input - self.a1 * output + self.z2;
        self.z2 = self.b2 * input - self.a2 * output;
        output
    }

    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn gain_db(&self) -> f64 {
        self.gain_db
    }

    pub fn set_frequency(&mut self, freq: f64) {
        if freq != self.frequency {
            self.frequency = freq;
            self.dirty = true;
        }
    }

    pub fn set_q(&mut self, q: f64) {
        if q != self.q {
            self.q = q;
            self.dirty = true;
        }
    }

    pub fn set_gain_db(&mut self, gain_db: f64) {
        if gain_db != self.gain_db {
            self.gain_db = gain_db;
            self.dirty = true;
        }
    }
}

/// The same biquad applied independently to left and right.
#[derive(Debug, Clone)]
pub struct StereoBiquad {
    pub left: BiquadFilter,
    pub right: BiquadFilter,
}

impl StereoBiquad {
    pub fn new(filter: BiquadFilter) -> Self {
        StereoBiquad {
            left: filter.clone(),
            right: filter,
        }
    }

    #[inline]
    pub fn process(&mut self, l: f64, r: f64) -> (f64, f64) {
        (self.left.process(l), self.right.process(r))
    }

    pub fn set_frequency(&mut self, freq: f64) {
        self.left.set_frequency(freq);
        self.right.set_frequency(freq);
    }

    pub fn set_q(&mut self, q: f64) {
        self.left.set_q(q);
        self.right.set_q(q);
    }

    pub fn set_gain_db(&mut self, gain_db: f64) {
        self.left.set_gain_db(gain_db);
        self.right.set_gain_db(gain_db);
    }

    pub fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }
}

/// Lowpass stage: two cascaded biquads for a 24 dB/oct rolloff.
///
/// Parameters: `[frequency, Q]`.
#[derive(Debug, Clone)]
pub struct LowpassStage {
    first: StereoBiquad,
    second: StereoBiquad,
}

impl LowpassStage {
    pub fn new(sample_rate: f64) -> Self {
        let proto = BiquadFilter::with_params(FilterType::Lowpass, sample_rate, 14000.0, 0.7, 0.0);
        LowpassStage {
            first: StereoBiquad::new(proto.clone()),
            second: StereoBiquad::new(proto),
        }
    }

    pub fn sync(&mut self, params: &[f64; MAX_STAGE_PARAMS]) {
        let (frequency, q) = (params[0], params[1]);
        self.first.set_frequency(frequency);
        self.first.set_q(q);
        self.second.set_frequency(frequency);
        self.second.set_q(q);
    }

    pub fn process_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        for i in 0..left.len().min(right.len()) {
            let (l, r) = self.first.process(left[i] as f64, right[i] as f64);
            let (l, r) = self.second.process(l, r);
            left[i] = l as f32;
            right[i] = r as f32;
        }
    }

    pub fn reset(&mut self) {
        self.first.reset();
        self.second.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_peak(filter: &mut BiquadFilter, freq: f64, sample_rate: f64) -> f64 {
        let mut max_out = 0.0_f64;
        for i in 0..(sample_rate as usize / 10) {
            let t = i as f64 / sample_rate;
            let out = filter.process((2.0 * PI * freq * t).sin());
            if i > 1000 {
                max_out = max_out.max(out.abs());
            }
        }
        max_out
    }

    #[test]
    fn lowpass_passes_dc() {
        let mut f = BiquadFilter::with_params(FilterType::Lowpass, 44100.0, 5000.0, 0.707, 0.0);
        let mut output = 0.0;
        for _ in 0..1000 {
            output = f.process(1.0);
        }
        assert!((output - 1.0).abs() < 0.001, "Lowpass should pass DC, got {output}");
    }

    #[test]
    fn highpass_blocks_dc() {
        let mut f = BiquadFilter::with_params(FilterType::Highpass, 44100.0, 1000.0, 0.707, 0.0);
        let mut output = 0.0;
        for _ in 0..1000 {
            output = f.process(1.0);
        }
        assert!(output.abs() < 0.001, "Highpass should block DC, got {output}");
    }

    #[test]
    fn peaking_boosts_at_center() {
        let mut flat = BiquadFilter::with_params(FilterType::Peaking, 44100.0, 1000.0, 1.0, 0.0);
        let mut boosted = BiquadFilter::with_params(FilterType::Peaking, 44100.0, 1000.0, 1.0, 12.0);
        let flat_peak = sine_peak(&mut flat, 1000.0, 44100.0);
        let boosted_peak = sine_peak(&mut boosted, 1000.0, 44100.0);
        assert!((flat_peak - 1.0).abs() < 0.02, "0 dB peaking is transparent, got {flat_peak}");
        // +12 dB ≈ ×3.98
        assert!((boosted_peak - 3.98).abs() < 0.2, "got {boosted_peak}");
    }

    #[test]
    fn frequency_above_nyquist_stays_stable() {
        let mut f = BiquadFilter::with_params(FilterType::Lowpass, 22050.0, 16000.0, 12.0, 0.0);
        for i in 0..10000 {
            let input = if i % 50 == 0 { 1.0 } else { 0.0 };
            assert!(f.process(input).is_finite());
        }
    }

    #[test]
    fn lowpass_stage_attenuates_high_freq() {
        let sr = 44100.0;
        let mut stage = LowpassStage::new(sr);
        let mut params = [0.0; MAX_STAGE_PARAMS];
        params[0] = 300.0;
        params[1] = 0.7;
        stage.sync(&params);

        let n = 4410;
        let mut left: Vec<f32> = (0..n)
            .map(|i| (2.0 * PI * 8000.0 * i as f64 / sr).sin() as f32)
            .collect();
        let mut right = left.clone();
        stage.process_block(&mut left, &mut right);
        let peak = left[1000..].iter().fold(0.0_f32, |m, s| m.max(s.abs()));
        assert!(peak < 0.001, "24 dB/oct at 300 Hz should kill 8 kHz, got {peak}");
    }
}
