//! Chorus stage — stereo LFO-modulated delay.
//!
//! Parameters: `[wet, frequency, depth]`. `depth` is normalized 0..1 and
//! scales the modulation swing up to [`MAX_SWING_SECONDS`].

use std::f64::consts::PI;

use crate::params::MAX_STAGE_PARAMS;

/// Center delay of the modulated line.
const BASE_DELAY_SECONDS: f64 = 0.015;
/// Modulation swing at `depth = 1`.
pub const MAX_SWING_SECONDS: f64 = 0.005;

#[derive(Debug, Clone)]
pub struct Chorus {
    buffer_l: Vec<f32>,
    buffer_r: Vec<f32>,
    write_pos: usize,
    sample_rate: f64,
    phase_l: f64,
    phase_r: f64,

    /// LFO rate in Hz.
    rate: f64,
    /// Modulation swing in seconds.
    swing: f64,
    wet: f32,
}

impl Chorus {
    pub fn new(sample_rate: f64) -> Self {
        // Room for the center delay plus the full swing.
        let capacity = ((BASE_DELAY_SECONDS + MAX_SWING_SECONDS) * sample_rate) as usize + 4;

        Self {
            buffer_l: vec![0.0; capacity],
            buffer_r: vec![0.0; capacity],
            write_pos: 0,
            sample_rate,
            phase_l: 0.0,
            phase_r: 0.25, // 90° apart for stereo spread
            rate: 1.5,
            swing: 0.5 * MAX_SWING_SECONDS,
            wet: 0.25,
        }
    }

    pub fn sync(&mut self, params: &[f64; MAX_STAGE_PARAMS]) {
        self.wet = params[0] as f32;
        self.rate = params[1];
        self.swing = params[2] * MAX_SWING_SECONDS;
    }

    /// Linear-interpolated read `delay_samples` behind the write head.
    #[inline]
    fn read_interpolated(buffer: &[f32], write_pos: usize, delay_samples: f64) -> f32 {
        let len = buffer.len();
        let whole = delay_samples as usize;
        let frac = (delay_samples - whole as f64) as f32;

        let pos_0 = (write_pos + len - whole) % len;
        let pos_1 = (pos_0 + len - 1) % len;
        let (s0, s1) = (buffer[pos_0], buffer[pos_1]);
        s0 + frac * (s1 - s0)
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let len = self.buffer_l.len();
        self.buffer_l[self.write_pos] = left;
        self.buffer_r[self.write_pos] = right;

        let max_delay = (len - 2) as f64;
        let lfo_l = (2.0 * PI * self.phase_l).sin();
        let lfo_r = (2.0 * PI * self.phase_r).sin();
        let delay_l = ((BASE_DELAY_SECONDS + self.swing * lfo_l) * self.sample_rate).clamp(1.0, max_delay);
        let delay_r = ((BASE_DELAY_SECONDS + self.swing * lfo_r) * self.sample_rate).clamp(1.0, max_delay);

        let wet_l = Self::read_interpolated(&self.buffer_l, self.write_pos, delay_l);
        let wet_r = Self::read_interpolated(&self.buffer_r, self.write_pos, delay_r);

        self.write_pos = (self.write_pos + 1) % len;
        let inc = self.rate / self.sample_rate;
        self.phase_l = (self.phase_l + inc) % 1.0;
        self.phase_r = (self.phase_r + inc) % 1.0;

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
        self.buffer_l.fill(0.0);
        self.buffer_r.fill(0.0);
        self.write_pos = 0;
        self.phase_l = 0.0;
        self.phase_r = 0.25;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(wet: f64, frequency: f64, depth: f64) -> [f64; MAX_STAGE_PARAMS] {
        let mut p = [0.0; MAX_STAGE_PARAMS];
        p[0] = wet;
        p[1] = frequency;
        p[2] = depth;
        p
    }

    #[test]
    fn dry_is_passthrough() {
        let mut chorus = Chorus::new(44100.0);
        chorus.sync(&params(0.0, 1.5, 0.5));
        let (l, r) = chorus.process(0.5, -0.5);
        assert!((l - 0.5).abs() < 1e-6);
        assert!((r + 0.5).abs() < 1e-6);
    }

    #[test]
    fn wet_signal_is_delayed() {
        let mut chorus = Chorus::new(44100.0);
        chorus.sync(&params(1.0, 1.5, 0.0));
        // Fully wet, no swing: nothing comes out before the center delay.
        let (first, _) = chorus.process(1.0, 1.0);
        assert!(first.abs() < 1e-6);
        let mut heard = false;
        for _ in 0..1000 {
            let (l, _) = chorus.process(0.0, 0.0);
            heard |= l.abs() > 0.25;
        }
        assert!(heard, "impulse should appear after ~15 ms");
    }

    #[test]
    fn channels_diverge_with_depth() {
        let mut chorus = Chorus::new(44100.0);
        chorus.sync(&params(1.0, 2.0, 1.0));
        let mut found_difference = false;
        for i in 0..4410 {
            let x = ((i as f32) * 0.05).sin();
            let (l, r) = chorus.process(x, x);
            if (l - r).abs() > 0.001 {
                found_difference = true;
                break;
            }
        }
        assert!(found_difference, "L/R LFOs are offset, outputs should differ");
    }

    #[test]
    fn full_depth_stays_in_buffer() {
        let mut chorus = Chorus::new(8000.0);
        chorus.sync(&params(1.0, 5.0, 1.0));
        for i in 0..20000 {
            let (l, r) = chorus.process((i % 7) as f32 * 0.1, 0.3);
            assert!(l.is_finite() && r.is_finite());
        }
    }
}
