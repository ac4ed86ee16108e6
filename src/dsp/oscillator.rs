//! Anti-aliased oscillators using PolyBLEP.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Supported waveform shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    #[default]
    Triangle,
}

/// A band-limited oscillator.
#[derive(Debug, Clone)]
pub struct Oscillator {
    pub waveform: Waveform,
    frequency: f64,
    phase: f64,
    sample_rate: f64,
}

impl Oscillator {
    pub fn new(waveform: Waveform, sample_rate: f64) -> Self {
        Oscillator {
            waveform,
            frequency: 440.0,
            phase: 0.0,
            sample_rate,
        }
    }

    pub fn set_frequency(&mut self, frequency: f64) {
        self.frequency = frequency;
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    fn phase_inc(&self) -> f64 {
        self.frequency / self.sample_rate
    }

    pub fn next_sample(&mut self) -> f64 {
        let inc = self.phase_inc();
        let sample = match self.waveform {
            Waveform::Sine => (2.0 * PI * self.phase).sin(),
            Waveform::Sawtooth => 2.0 * self.phase - 1.0 - poly_blep(self.phase, inc),
            Waveform::Square => self.square(inc),
            // Piecewise linear: -1 → +1 over the first half, back down over the second.
            Waveform::Triangle => {
                if self.phase < 0.5 {
                    4.0 * self.phase - 1.0
                } else {
                    3.0 - 4.0 * self.phase
                }
            }
        };

        self.phase += inc;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        sample
    }

    fn square(&self, inc: f64) -> f64 {
        let mut value = if self.phase < 0.5 { 1.0 } else { -1.0 };
        value += poly_blep(self.phase, inc);
        value -= poly_blep((self.phase + 0.5) % 1.0, inc);
        value
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
    }
}

/// PolyBLEP correction around a unit step. `t` is phase in [0, 1),
/// `dt` the per-sample increment.
fn poly_blep(t: f64, dt: f64) -> f64 {
    if t < dt {
        let t = t / dt;
        2.0 * t - t * t - 1.0
    } else if t > 1.0 - dt {
        let t = (t - 1.0) / dt;
        t * t + 2.0 * t + 1.0
    } else {
        0.0
    }
}

/// A4 = 440 Hz equal temperament.
pub fn midi_to_frequency(midi: u8) -> f64 {
    440.0 * 2.0_f64.powf((midi as f64 - 69.0) / 12.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_range(waveform: Waveform, bound: f64) {
        let mut osc = Oscillator::new(waveform, 44100.0);
        osc.set_frequency(440.0);
        for _ in 0..44100 {
            let s = osc.next_sample();
            assert!(s.abs() <= bound, "{waveform:?} out of range: {s}");
        }
    }

    #[test]
    fn sine_zero_at_start() {
        let mut osc = Oscillator::new(Waveform::Sine, 44100.0);
        assert!(osc.next_sample().abs() < 1e-10);
    }

    #[test]
    fn waveform_ranges() {
        assert_range(Waveform::Sine, 1.0);
        assert_range(Waveform::Triangle, 1.0);
        assert_range(Waveform::Square, 1.5);
        assert_range(Waveform::Sawtooth, 1.5);
    }

    #[test]
    fn triangle_period_matches_frequency() {
        let mut osc = Oscillator::new(Waveform::Triangle, 1000.0);
        osc.set_frequency(10.0);
        let samples: Vec<f64> = (0..200).map(|_| osc.next_sample()).collect();
        // 100 samples per cycle
        assert!((samples[0] - samples[100]).abs() < 1e-9);
        assert!((samples[50] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn midi_pitches() {
        assert!((midi_to_frequency(69) - 440.0).abs() < 1e-9);
        assert!((midi_to_frequency(60) - 261.6256).abs() < 0.001);
        assert!((midi_to_frequency(81) - 880.0).abs() < 1e-9);
    }

    #[test]
    fn waveform_names() {
        let w: Waveform = serde_json::from_str("\"sawtooth\"").unwrap();
        assert_eq!(w, Waveform::Sawtooth);
        assert_eq!(Waveform::default(), Waveform::Triangle);
    }
}
