//! Compressor stage — feed-forward dynamics with a soft knee.
//!
//! Parameters: `[threshold, ratio, attack, release]`. The knee is fixed at
//! 6 dB, matching a browser `DynamicsCompressorNode` at its defaults.

use crate::params::MAX_STAGE_PARAMS;

const KNEE_DB: f64 = 6.0;

/// A stereo-linked dynamics compressor.
#[derive(Debug, Clone)]
pub struct Compressor {
    sample_rate: f64,

    /// Threshold in dB.
    threshold: f64,
    /// Compression ratio (4.0 = 4:1).
    ratio: f64,
    /// Attack time in seconds.
    attack: f64,
    /// Release time in seconds.
    release: f64,

    attack_coef: f64,
    release_coef: f64,
    envelope: f64, // linear, peak-following
}

impl Compressor {
    pub fn new(sample_rate: f64) -> Self {
        let mut c = Self {
            sample_rate,
            threshold: -24.0,
            ratio: 4.0,
            attack: 0.003,
            release: 0.25,
            attack_coef: 0.0,
            release_coef: 0.0,
            envelope: 0.0,
        };
        c.update_coefficients();
        c
    }

    pub fn with_params(sample_rate: f64, threshold: f64, ratio: f64, attack: f64, release: f64) -> Self {
        let mut c = Self::new(sample_rate);
        c.threshold = threshold;
        c.ratio = ratio.max(1.0);
        c.attack = attack;
        c.release = release;
        c.update_coefficients();
        c
    }

    pub fn sync(&mut self, params: &[f64; MAX_STAGE_PARAMS]) {
        self.threshold = params[0];
        self.ratio = params[1].max(1.0);
        self.attack = params[2];
        self.release = params[3];
        self.update_coefficients();
    }

    /// One-pole smoothing coefficient; a zero time constant follows instantly.
    fn time_coef(seconds: f64, sample_rate: f64) -> f64 {
        if seconds <= 0.0 {
            0.0
        } else {
            (-1.0 / (seconds * sample_rate)).exp()
        }
    }

    fn update_coefficients(&mut self) {
        self.attack_coef = Self::time_coef(self.attack, self.sample_rate);
        self.release_coef = Self::time_coef(self.release, self.sample_rate);
    }

    #[inline]
    fn linear_to_db(linear: f64) -> f64 {
        if linear <= 1e-6 { -120.0 } else { 20.0 * linear.log10() }
    }

    #[inline]
    fn db_to_linear(db: f64) -> f64 {
        10.0_f64.powf(db / 20.0)
    }

    /// Gain change in dB (≤ 0) for an input level in dB.
    #[inline]
    fn compute_gain(&self, input_db: f64) -> f64 {
        let slope = 1.0 - 1.0 / self.ratio;
        let half_knee = KNEE_DB / 2.0;
        let knee_start = self.threshold - half_knee;

        if input_db <= knee_start {
            0.0
        } else if input_db >= self.threshold + half_knee {
            (self.threshold - input_db) * slope
        } else {
            let x = input_db - knee_start;
            -slope * x * x / (2.0 * KNEE_DB)
        }
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let level = left.abs().max(right.abs()) as f64;
        let coef = if level > self.envelope { self.attack_coef } else { self.release_coef };
        self.envelope = coef * self.envelope + (1.0 - coef) * level;

        let gain = Self::db_to_linear(self.compute_gain(Self::linear_to_db(self.envelope))) as f32;
        (left * gain, right * gain)
    }

    pub fn process_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        for i in 0..left.len().min(right.len()) {
            let (l, r) = self.process(left[i], right[i]);
            left[i] = l;
            right[i] = r;
        }
    }

    pub fn reset(&mut self) {
        self.envelope = 0.0;
    }

    /// Current gain reduction in dB (positive number).
    pub fn gain_reduction(&self) -> f64 {
        -self.compute_gain(Self::linear_to_db(self.envelope))
    }
}
