//! ADSR envelope generator shared by synth and sampler voices.

use serde::{Deserialize, Serialize};

/// Envelope times in seconds and sustain level in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeShape {
    pub attack: f64,
    pub decay: f64,
    pub sustain: f64,
    pub release: f64,
}

impl EnvelopeShape {
    /// Melodic synth default: 10 ms / 100 ms / 0.6 / 400 ms.
    pub const SYNTH: EnvelopeShape = EnvelopeShape {
        attack: 0.01,
        decay: 0.1,
        sustain: 0.6,
        release: 0.4,
    };

    /// Sampler voices: click-free onset, full sustain, short tail.
    pub const SAMPLER: EnvelopeShape = EnvelopeShape {
        attack: 0.005,
        decay: 0.0,
        sustain: 1.0,
        release: 0.1,
    };
}

impl Default for EnvelopeShape {
    fn default() -> Self {
        EnvelopeShape::SYNTH
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Stage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// Linear ADSR.
#[derive(Debug, Clone)]
pub struct Envelope {
    shape: EnvelopeShape,
    stage: Stage,
    level: f64,
    sample_rate: f64,
    stage_samples: usize,
    stage_counter: usize,
    /// Level the current ramp started from.
    start_level: f64,
}

impl Envelope {
    pub fn new(shape: EnvelopeShape, sample_rate: f64) -> Self {
        Envelope {
            shape,
            stage: Stage::Idle,
            level: 0.0,
            sample_rate,
            stage_samples: 0,
            stage_counter: 0,
            start_level: 0.0,
        }
    }

    /// Note on. Retriggers from the current level, so a stolen voice
    /// does not jump to zero.
    pub fn gate_on(&mut self) {
        self.enter(Stage::Attack, self.shape.attack);
    }

    /// Note off. No effect when idle.
    pub fn gate_off(&mut self) {
        if matches!(self.stage, Stage::Idle | Stage::Release) {
            return;
        }
        self.enter(Stage::Release, self.shape.release);
    }

    /// Drop straight to silence.
    pub fn kill(&mut self) {
        self.stage = Stage::Idle;
        self.level = 0.0;
    }

    pub fn next_sample(&mut self) -> f64 {
        match self.stage {
            Stage::Idle => self.level = 0.0,
            Stage::Sustain => self.level = self.shape.sustain,
            Stage::Attack => {
                if self.ramp_to(1.0) {
                    self.enter(Stage::Decay, self.shape.decay);
                }
            }
            Stage::Decay => {
                if self.ramp_to(self.shape.sustain) {
                    self.stage = Stage::Sustain;
                }
            }
            Stage::Release => {
                if self.ramp_to(0.0) {
                    self.stage = Stage::Idle;
                }
            }
        }
        self.level
    }

    /// Advance the current ramp; true once `target` is reached.
    fn ramp_to(&mut self, target: f64) -> bool {
        if self.stage_counter >= self.stage_samples {
            self.level = target;
            return true;
        }
        let t = self.stage_counter as f64 / self.stage_samples as f64;
        self.level = self.start_level + (target - self.start_level) * t;
        self.stage_counter += 1;
        false
    }

    fn enter(&mut self, stage: Stage, seconds: f64) {
        self.stage = stage;
        self.stage_samples = (seconds.max(0.0) * self.sample_rate) as usize;
        self.stage_counter = 0;
        self.start_level = self.level;
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn is_releasing(&self) -> bool {
        self.stage == Stage::Release
    }

    /// Idle after release (or never started).
    pub fn is_finished(&self) -> bool {
        self.stage == Stage::Idle
    }
}
