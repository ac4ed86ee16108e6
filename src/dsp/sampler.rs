//! Sample playback.
//!
//! A decoded sample is held once in an `Arc<SampleBuffer>` and shared by
//! every voice that reads it: pitched [`SamplerVoice`]s for grid notes and
//! the one-shot [`SamplePlayer`].

use std::sync::Arc;

use super::envelope::{Envelope, EnvelopeShape};

/// Note at which a sample plays back at its recorded pitch.
pub const SAMPLER_ROOT_NOTE: u8 = 60;

/// A mono sample held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    pub data: Vec<f32>,
    /// Native sample rate of the audio.
    pub sample_rate: u32,
}

impl SampleBuffer {
    pub fn new(data: Vec<f32>, sample_rate: u32) -> Self {
        SampleBuffer { data, sample_rate }
    }

    /// Mix interleaved frames of `channels` channels down to mono.
    pub fn from_interleaved(samples: &[f32], channels: usize, sample_rate: u32) -> Self {
        let channels = channels.max(1);
        let data = samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();
        SampleBuffer { data, sample_rate }
    }

    /// Interleaved 16-bit PCM, mixed to mono.
    pub fn from_i16(pcm: &[i16], channels: usize, sample_rate: u32) -> Self {
        let floats: Vec<f32> = pcm.iter().map(|&s| s as f32 / 32768.0).collect();
        Self::from_interleaved(&floats, channels, sample_rate)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.data.len() as f64 / self.sample_rate as f64
        }
    }

    /// Linear-interpolated read at a fractional position; 0 outside the data.
    pub fn read_interpolated(&self, position: f64) -> f32 {
        if position < 0.0 {
            return 0.0;
        }
        let idx = position as usize;
        match (self.data.get(idx), self.data.get(idx + 1)) {
            (Some(&a), Some(&b)) => {
                let frac = (position - idx as f64) as f32;
                a + (b - a) * frac
            }
            (Some(&a), None) => a,
            _ => 0.0,
        }
    }
}

/// Read increment for playing `buffer` at `playback_rate` on an engine
/// running at `engine_rate`.
fn read_step(buffer: &SampleBuffer, playback_rate: f64, engine_rate: f64) -> f64 {
    playback_rate * buffer.sample_rate as f64 / engine_rate
}

// ── Pitched voice ───────────────────────────────────────────

/// One grid note played from the shared sample.
#[derive(Debug, Clone)]
pub struct SamplerVoice {
    buffer: Arc<SampleBuffer>,
    position: f64,
    step: f64,
    envelope: Envelope,
    note: u8,
    gate_frames: usize,
    engine_rate: f64,
}

impl SamplerVoice {
    pub fn new(buffer: Arc<SampleBuffer>, engine_rate: f64) -> Self {
        SamplerVoice {
            buffer,
            position: 0.0,
            step: 1.0,
            envelope: Envelope::new(EnvelopeShape::SAMPLER, engine_rate),
            note: SAMPLER_ROOT_NOTE,
            gate_frames: 0,
            engine_rate,
        }
    }

    pub fn trigger(&mut self, note: u8, gate_frames: usize) {
        let rate = 2.0_f64.powf((note as f64 - SAMPLER_ROOT_NOTE as f64) / 12.0);
        self.note = note;
        self.step = read_step(&self.buffer, rate, self.engine_rate);
        self.position = 0.0;
        self.gate_frames = gate_frames;
        self.envelope.gate_on();
    }

    pub fn release(&mut self) {
        self.gate_frames = 0;
        self.envelope.gate_off();
    }

    pub fn kill(&mut self) {
        self.gate_frames = 0;
        self.envelope.kill();
    }

    pub fn next_sample(&mut self) -> f64 {
        if self.envelope.is_finished() {
            return 0.0;
        }
        if self.position >= self.buffer.len() as f64 {
            self.envelope.kill();
            return 0.0;
        }
        if self.gate_frames > 0 {
            self.gate_frames -= 1;
            if self.gate_frames == 0 {
                self.envelope.gate_off();
            }
        }
        let s = self.buffer.read_interpolated(self.position) as f64;
        self.position += self.step;
        s * self.envelope.next_sample()
    }

    pub fn note(&self) -> u8 {
        self.note
    }

    pub fn level(&self) -> f64 {
        self.envelope.level()
    }

    pub fn is_finished(&self) -> bool {
        self.envelope.is_finished()
    }
}

// ── Whole-sample player ─────────────────────────────────────

/// Plays the whole sample once at its native pitch.
#[derive(Debug, Clone)]
pub struct SamplePlayer {
    buffer: Arc<SampleBuffer>,
    position: f64,
    step: f64,
    playing: bool,
}

impl SamplePlayer {
    pub fn new(buffer: Arc<SampleBuffer>, engine_rate: f64) -> Self {
        let step = read_step(&buffer, 1.0, engine_rate);
        SamplePlayer {
            buffer,
            position: 0.0,
            step,
            playing: false,
        }
    }

    /// Start from the beginning, restarting if already playing.
    pub fn start(&mut self) {
        self.position = 0.0;
        self.playing = !self.buffer.is_empty();
    }

    pub fn stop(&mut self) {
        self.playing = false;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn buffer(&self) -> &Arc<SampleBuffer> {
        &self.buffer
    }

    /// Add into `left`/`right`; stops at the end of the data.
    pub fn render_add(&mut self, left: &mut [f32], right: &mut [f32], gain: f32) {
        if !self.playing {
            return;
        }
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            if self.position >= self.buffer.len() as f64 {
                self.playing = false;
                break;
            }
            let s = self.buffer.read_interpolated(self.position) * gain;
            *l += s;
            *r += s;
            self.position += self.step;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize, sample_rate: u32) -> Arc<SampleBuffer> {
        Arc::new(SampleBuffer::new((0..len).map(|i| i as f32 / len as f32).collect(), sample_rate))
    }

    #[test]
    fn interpolation() {
        let buf = SampleBuffer::new(vec![0.0, 1.0, 0.0, -1.0], 44100);
        assert!((buf.read_interpolated(0.5) - 0.5).abs() < 1e-6);
        assert!((buf.read_interpolated(1.0) - 1.0).abs() < 1e-6);
        assert!((buf.read_interpolated(2.5) + 0.5).abs() < 1e-6);
        assert_eq!(buf.read_interpolated(3.0), -1.0);
        assert_eq!(buf.read_interpolated(10.0), 0.0);
        assert_eq!(buf.read_interpolated(-1.0), 0.0);
    }

    #[test]
    fn stereo_is_mixed_to_mono() {
        let pcm: Vec<i16> = vec![16384, 0, -16384, -16384];
        let buf = SampleBuffer::from_i16(&pcm, 2, 22050);
        assert_eq!(buf.len(), 2);
        assert!((buf.data[0] - 0.25).abs() < 1e-4);
        assert!((buf.data[1] + 0.5).abs() < 1e-4);
        assert!((buf.duration_seconds() - 2.0 / 22050.0).abs() < 1e-12);
    }

    #[test]
    fn octave_up_reads_twice_as_fast() {
        let buf = ramp(1000, 44100);
        let mut root = SamplerVoice::new(Arc::clone(&buf), 44100.0);
        let mut up = SamplerVoice::new(buf, 44100.0);
        root.trigger(SAMPLER_ROOT_NOTE, 10_000);
        up.trigger(SAMPLER_ROOT_NOTE + 12, 10_000);
        let root_frames = (0..2000).take_while(|_| { root.next_sample(); !root.is_finished() }).count();
        let up_frames = (0..2000).take_while(|_| { up.next_sample(); !up.is_finished() }).count();
        assert!((root_frames as i64 - 2 * up_frames as i64).abs() <= 2, "root={root_frames}, up={up_frames}");
    }

    #[test]
    fn sample_rate_ratio_is_applied() {
        let buf = ramp(100, 22050);
        let mut player = SamplePlayer::new(buf, 44100.0);
        player.start();
        let mut left = vec![0.0f32; 300];
        let mut right = vec![0.0f32; 300];
        player.render_add(&mut left, &mut right, 1.0);
        // 100 frames at half the engine rate last 200 engine frames.
        assert!(!player.is_playing());
        assert!(left[199] > 0.9 && left[200] == 0.0);
    }

    #[test]
    fn player_restarts_from_beginning() {
        let mut player = SamplePlayer::new(ramp(1000, 44100), 44100.0);
        player.start();
        let mut l = vec![0.0f32; 500];
        let mut r = vec![0.0f32; 500];
        player.render_add(&mut l, &mut r, 1.0);
        player.start();
        let mut l2 = vec![0.0f32; 1];
        let mut r2 = vec![0.0f32; 1];
        player.render_add(&mut l2, &mut r2, 1.0);
        assert_eq!(l2[0], 0.0);
        assert!(player.is_playing());
        player.stop();
        assert!(!player.is_playing());
    }
}
