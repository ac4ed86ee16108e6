//! Reverb stage — Freeverb-style algorithmic reverb.
//!
//! Parameters: `[wet, decay]`. Eight parallel damped combs feed four
//! series allpasses per channel; `decay` (seconds) sets the comb feedback.

use crate::params::MAX_STAGE_PARAMS;

/// Lowpass-damped feedback comb.
#[derive(Debug, Clone)]
struct CombFilter {
    buffer: Vec<f32>,
    index: usize,
    feedback: f32,
    damp: f32,
    store: f32,
}

impl CombFilter {
    fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            index: 0,
            feedback: 0.84,
            damp: DAMPING,
            store: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let output = self.buffer[self.index];
        self.store = output * (1.0 - self.damp) + self.store * self.damp;
        self.buffer[self.index] = input + self.store * self.feedback;
        self.index = (self.index + 1) % self.buffer.len();
        output
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.store = 0.0;
    }
}

#[derive(Debug, Clone)]
struct AllpassFilter {
    buffer: Vec<f32>,
    index: usize,
}

impl AllpassFilter {
    fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            index: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let stored = self.buffer[self.index];
        self.buffer[self.index] = input + stored * 0.5;
        self.index = (self.index + 1) % self.buffer.len();
        stored - input
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
    }
}

// Line lengths tuned at 44.1 kHz, scaled for other rates.
const COMB_TUNING: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_TUNING: [usize; 4] = [556, 441, 341, 225];
const STEREO_SPREAD: usize = 23;

const DAMPING: f32 = 0.5;
const INPUT_GAIN: f32 = 0.015;
const MIN_DECAY: f64 = 0.1;
const MAX_DECAY: f64 = 8.0;

/// Comb feedback for a decay time: 0.1 s → 0.70, 8 s → 0.98.
pub fn decay_to_feedback(decay: f64) -> f32 {
    let room = ((decay - MIN_DECAY) / (MAX_DECAY - MIN_DECAY)).clamp(0.0, 1.0);
    (0.7 + 0.28 * room) as f32
}

#[derive(Debug, Clone)]
struct Channel {
    combs: Vec<CombFilter>,
    allpasses: Vec<AllpassFilter>,
}

impl Channel {
    fn new(scale: f64, spread: usize) -> Self {
        let size = |t: usize| ((t + spread) as f64 * scale) as usize;
        Channel {
            combs: COMB_TUNING.iter().map(|&t| CombFilter::new(size(t))).collect(),
            allpasses: ALLPASS_TUNING.iter().map(|&t| AllpassFilter::new(size(t))).collect(),
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let mut out = 0.0f32;
        for comb in &mut self.combs {
            out += comb.process(input);
        }
        for allpass in &mut self.allpasses {
            out = allpass.process(out);
        }
        out
    }

    fn set_feedback(&mut self, feedback: f32) {
        for comb in &mut self.combs {
            comb.feedback = feedback;
        }
    }

    fn reset(&mut self) {
        self.combs.iter_mut().for_each(CombFilter::reset);
        self.allpasses.iter_mut().for_each(AllpassFilter::reset);
    }
}

/// Stereo algorithmic reverb.
#[derive(Debug, Clone)]
pub struct Reverb {
    left: Channel,
    right: Channel,
    wet: f32,
}

impl Reverb {
    pub fn new(sample_rate: f64) -> Self {
        let scale = sample_rate / 44100.0;
        let mut reverb = Self {
            left: Channel::new(scale, 0),
            right: Channel::new(scale, STEREO_SPREAD),
            wet: 0.25,
        };
        reverb.set_decay(2.8);
        reverb
    }

    pub fn with_params(sample_rate: f64, wet: f64, decay: f64) -> Self {
        let mut r = Self::new(sample_rate);
        r.wet = wet as f32;
        r.set_decay(decay);
        r
    }

    pub fn sync(&mut self, params: &[f64; MAX_STAGE_PARAMS]) {
        self.wet = params[0] as f32;
        self.set_decay(params[1]);
    }

    fn set_decay(&mut self, decay: f64) {
        let feedback = decay_to_feedback(decay);
        self.left.set_feedback(feedback);
        self.right.set_feedback(feedback);
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let input = (left + right) * INPUT_GAIN;
        let wet_l = self.left.process(input);
        let wet_r = self.right.process(input);
        let wet = self.wet;
        (left * (1.0 - wet) + wet_l * wet, right * (1.0 - wet) + wet_r * wet)
    }

    pub fn process_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        for i in 0..left.len().min(right.len()) {
            let (l, r) = self.process(left[i], right[i]);
            left[i] = l;
            right[i] = r;
        }
    }

    pub fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tail_energy(decay: f64, frames: usize) -> f32 {
        let mut reverb = Reverb::with_params(44100.0, 1.0, decay);
        reverb.process(1.0, 1.0);
        let mut energy = 0.0f32;
        for i in 0..frames {
            let (l, _) = reverb.process(0.0, 0.0);
            if i > frames / 2 {
                energy += l * l;
            }
        }
        energy
    }

    #[test]
    fn dry_is_passthrough() {
        let mut reverb = Reverb::with_params(44100.0, 0.0, 2.8);
        let (l, r) = reverb.process(0.5, -0.5);
        assert!((l - 0.5).abs() < 1e-6);
        assert!((r + 0.5).abs() < 1e-6);
    }

    #[test]
    fn impulse_produces_tail() {
        let mut reverb = Reverb::with_params(44100.0, 1.0, 2.8);
        reverb.process(1.0, 1.0);
        let mut found = false;
        for _ in 0..5000 {
            let (l, r) = reverb.process(0.0, 0.0);
            if l.abs() > 0.001 || r.abs() > 0.001 {
                found = true;
                break;
            }
        }
        assert!(found, "Reverb should produce output after impulse");
    }

    #[test]
    fn longer_decay_rings_longer() {
        let short = tail_energy(0.1, 44100);
        let long = tail_energy(8.0, 44100);
        assert!(long > short * 10.0, "short={short}, long={long}");
    }

    #[test]
    fn decay_mapping_covers_range() {
        assert!((decay_to_feedback(0.1) - 0.7).abs() < 1e-6);
        assert!((decay_to_feedback(8.0) - 0.98).abs() < 1e-6);
        assert!(decay_to_feedback(100.0) < 1.0);
    }
}
