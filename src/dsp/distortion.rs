//! Distortion stage — static waveshaper with a dry/wet mix.
//!
//! Parameters: `[wet, amount]`. The transfer curve is
//! `(3 + k)·x·20° / (π + k·|x|)` with `k = 100·amount`, evaluated on the
//! input clamped to [-1, 1] the way a sampled shaping curve would see it.

use std::f32::consts::PI;

use crate::params::MAX_STAGE_PARAMS;

#[derive(Debug, Clone)]
pub struct Distortion {
    k: f32,
    wet: f32,
}

impl Distortion {
    pub fn new() -> Self {
        Distortion { k: 20.0, wet: 0.15 }
    }

    pub fn with_params(wet: f64, amount: f64) -> Self {
        Distortion {
            k: (amount * 100.0) as f32,
            wet: wet as f32,
        }
    }

    pub fn sync(&mut self, params: &[f64; MAX_STAGE_PARAMS]) {
        self.wet = params[0] as f32;
        self.k = (params[1] * 100.0) as f32;
    }

    #[inline]
    fn shape(&self, x: f32) -> f32 {
        let x = x.clamp(-1.0, 1.0);
        let deg = PI / 180.0;
        (3.0 + self.k) * x * 20.0 * deg / (PI + self.k * x.abs())
    }

    #[inline]
    pub fn process(&self, sample: f32) -> f32 {
        sample * (1.0 - self.wet) + self.shape(sample) * self.wet
    }

    pub fn process_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        for s in left.iter_mut().chain(right.iter_mut()) {
            *s = self.process(*s);
        }
    }
}

impl Default for Distortion {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dry_is_passthrough() {
        let d = Distortion::with_params(0.0, 1.0);
        assert!((d.process(0.42) - 0.42).abs() < 1e-6);
    }

    #[test]
    fn zero_amount_is_linear() {
        // k = 0 reduces the curve to x/3.
        let d = Distortion::with_params(1.0, 0.0);
        assert!((d.process(0.6) - 0.2).abs() < 1e-6);
        assert!((d.process(-0.3) + 0.1).abs() < 1e-6);
    }

    #[test]
    fn heavy_amount_saturates() {
        let d = Distortion::with_params(1.0, 1.0);
        let small = d.process(0.1);
        let full = d.process(1.0);
        // Strong compression of the curve: 10x input is far less than 10x output.
        assert!(full < small * 3.0, "small={small}, full={full}");
        assert!(full <= 1.0 && full > 0.0);
        assert!((d.process(-1.0) + full).abs() < 1e-6, "curve is odd-symmetric");
    }

    #[test]
    fn input_beyond_unity_is_clamped() {
        let d = Distortion::with_params(1.0, 0.5);
        assert_eq!(d.shape(4.0), d.shape(1.0));
    }
}
