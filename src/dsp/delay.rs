//! Delay stage — stereo feedback delay line.
//!
//! Parameters: `[wet, feedback, delayTime]`.

use crate::params::MAX_STAGE_PARAMS;

/// Longest delay the buffer is sized for (the schema's `delayTime` max).
const MAX_DELAY_SECONDS: f64 = 0.6;

/// A stereo delay with feedback and dry/wet mix.
///
/// The buffer is allocated once at construction; changing `delayTime`
/// only moves the read head.
#[derive(Debug, Clone)]
pub struct Delay {
    buffer_l: Vec<f32>,
    buffer_r: Vec<f32>,
    write_pos: usize,
    sample_rate: f64,

    delay_samples: usize,
    feedback: f32,
    wet: f32,
}

impl Delay {
    pub fn new(sample_rate: f64) -> Self {
        let capacity = (sample_rate * MAX_DELAY_SECONDS) as usize + 2;
        let mut d = Self {
            buffer_l: vec![0.0; capacity],
            buffer_r: vec![0.0; capacity],
            write_pos: 0,
            sample_rate,
            delay_samples: 1,
            feedback: 0.25,
            wet: 0.2,
        };
        d.set_delay_time(0.25);
        d
    }

    pub fn with_params(sample_rate: f64, delay_time: f64, feedback: f64, wet: f64) -> Self {
        let mut d = Self::new(sample_rate);
        d.set_delay_time(delay_time);
        d.feedback = feedback as f32;
        d.wet = wet as f32;
        d
    }

    pub fn sync(&mut self, params: &[f64; MAX_STAGE_PARAMS]) {
        self.wet = params[0] as f32;
        self.feedback = params[1] as f32;
        self.set_delay_time(params[2]);
    }

    /// At least one sample of delay; zero would read the oldest slot.
    fn set_delay_time(&mut self, seconds: f64) {
        let samples = (seconds.max(0.0) * self.sample_rate) as usize;
        self.delay_samples = samples.clamp(1, self.buffer_l.len() - 1);
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let len = self.buffer_l.len();
        let read_pos = (self.write_pos + len - self.delay_samples) % len;

        let delayed_l = self.buffer_l[read_pos];
        let delayed_r = self.buffer_r[read_pos];

        self.buffer_l[self.write_pos] = left + delayed_l * self.feedback;
        self.buffer_r[self.write_pos] = right + delayed_r * self.feedback;
        self.write_pos = (self.write_pos + 1) % len;

        let wet = self.wet;
        (left * (1.0 - wet) + delayed_l * wet, right * (1.0 - wet) + delayed_r * wet)
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
    }
}
