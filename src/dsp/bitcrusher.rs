//! Bit-depth reducer stage.
//!
//! Parameters: `[wet, bits]`. Samples are rounded to a grid of
//! `0.5^(bits - 1)`, so 1 bit leaves three levels {-1, 0, 1}.

use crate::params::MAX_STAGE_PARAMS;

#[derive(Debug, Clone)]
pub struct BitCrusher {
    step: f32,
    wet: f32,
}

impl BitCrusher {
    pub fn new() -> Self {
        Self::with_params(0.2, 6.0)
    }

    pub fn with_params(wet: f64, bits: f64) -> Self {
        BitCrusher {
            step: Self::step_for(bits),
            wet: wet as f32,
        }
    }

    fn step_for(bits: f64) -> f32 {
        0.5_f32.powi(bits.round().clamp(1.0, 16.0) as i32 - 1)
    }

    pub fn sync(&mut self, params: &[f64; MAX_STAGE_PARAMS]) {
        self.wet = params[0] as f32;
        self.step = Self::step_for(params[1]);
    }

    #[inline]
    pub fn process(&self, sample: f32) -> f32 {
        let crushed = self.step * (sample / self.step + 0.5).floor();
        sample * (1.0 - self.wet) + crushed * self.wet
    }

    pub fn process_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        for s in left.iter_mut().chain(right.iter_mut()) {
            *s = self.process(*s);
        }
    }
}

impl Default for BitCrusher {
    fn default() -> Self {
        Self::new()
    }
}
