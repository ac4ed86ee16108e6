//! Synth voice — one oscillator shaped by an ADSR, gated for a fixed
//! number of frames.

use super::envelope::{Envelope, EnvelopeShape};
use super::oscillator::{Oscillator, Waveform, midi_to_frequency};

/// Per-voice output level before the bus gain.
const VOICE_GAIN: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct SynthVoice {
    oscillator: Oscillator,
    envelope: Envelope,
    note: u8,
    /// Frames left before the gate closes.
    gate_frames: usize,
}

impl SynthVoice {
    pub fn new(waveform: Waveform, shape: EnvelopeShape, sample_rate: f64) -> Self {
        SynthVoice {
            oscillator: Oscillator::new(waveform, sample_rate),
            envelope: Envelope::new(shape, sample_rate),
            note: 0,
            gate_frames: 0,
        }
    }

    /// Start `note`, releasing automatically after `gate_frames`.
    pub fn trigger(&mut self, note: u8, gate_frames: usize) {
        self.note = note;
        self.oscillator.set_frequency(midi_to_frequency(note));
        if self.envelope.is_finished() {
            self.oscillator.reset();
        }
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
        if self.gate_frames > 0 {
            self.gate_frames -= 1;
            if self.gate_frames == 0 {
                self.envelope.gate_off();
            }
        }
        self.oscillator.next_sample() * self.envelope.next_sample() * VOICE_GAIN
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

#[cfg(test)]
mod tests {
    use super::*;

    fn voice() -> SynthVoice {
        SynthVoice::new(Waveform::Triangle, EnvelopeShape::SYNTH, 44100.0)
    }

    #[test]
    fn voice_produces_sound() {
        let mut v = voice();
        v.trigger(69, 4410);
        let has_sound = (0..4410).any(|_| v.next_sample().abs() > 0.001);
        assert!(has_sound, "Voice should produce non-zero output");
    }

    #[test]
    fn gate_closes_then_voice_finishes() {
        let mut v = voice();
        v.trigger(60, 1000);
        for _ in 0..1000 {
            v.next_sample();
        }
        assert!(!v.is_finished());
        // 400 ms release
        for _ in 0..(0.41 * 44100.0) as usize {
            v.next_sample();
        }
        assert!(v.is_finished(), "Voice should be finished after release");
        assert_eq!(v.next_sample(), 0.0);
    }

    #[test]
    fn output_stays_bounded() {
        let mut v = voice();
        v.trigger(84, 44100);
        for _ in 0..44100 {
            let s = v.next_sample();
            assert!(s.abs() <= VOICE_GAIN + 1e-9, "got {s}");
        }
    }

    #[test]
    fn kill_is_immediate() {
        let mut v = voice();
        v.trigger(60, 44100);
        for _ in 0..100 {
            v.next_sample();
        }
        v.kill();
        assert!(v.is_finished());
        assert_eq!(v.next_sample(), 0.0);
    }
}
