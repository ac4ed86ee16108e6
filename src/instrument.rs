//! Instrument sources.
//!
//! Exactly one melodic source answers grid triggers at a time (the
//! [`Synth`](MelodicSource::Synth) by default, or a
//! [`Sampler`](MelodicSource::Sampler) once a sample has decoded). A
//! [`SamplePlayer`] plays the whole sample on demand, independent of the
//! grid, into the same bus. Both live in an [`InstrumentSlot`]. A swapped
//! out melodic source fades over a few milliseconds, then is silenced and
//! handed back for disposal.

use std::mem;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dsp::envelope::EnvelopeShape;
use crate::dsp::oscillator::Waveform;
use crate::dsp::sampler::{SampleBuffer, SamplePlayer, SamplerVoice};
use crate::dsp::voice::SynthVoice;
use crate::transport::NoteTrigger;

/// Synth voice settings.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthSettings {
    pub waveform: Waveform,
    pub envelope: EnvelopeShape,
}

/// Which melodic source is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Synth,
    Sampler,
}

/// What a pool needs from a voice.
pub trait Voice {
    fn trigger(&mut self, note: u8, gate_frames: usize);
    fn kill(&mut self);
    fn next_sample(&mut self) -> f64;
    fn is_finished(&self) -> bool;
    /// Current envelope level, used to pick a voice to steal.
    fn level(&self) -> f64;
}

impl Voice for SynthVoice {
    fn trigger(&mut self, note: u8, gate_frames: usize) {
        SynthVoice::trigger(self, note, gate_frames)
    }
    fn kill(&mut self) {
        SynthVoice::kill(self)
    }
    fn next_sample(&mut self) -> f64 {
        SynthVoice::next_sample(self)
    }
    fn is_finished(&self) -> bool {
        SynthVoice::is_finished(self)
    }
    fn level(&self) -> f64 {
        SynthVoice::level(self)
    }
}

impl Voice for SamplerVoice {
    fn trigger(&mut self, note: u8, gate_frames: usize) {
        SamplerVoice::trigger(self, note, gate_frames)
    }
    fn kill(&mut self) {
        SamplerVoice::kill(self)
    }
    fn next_sample(&mut self) -> f64 {
        SamplerVoice::next_sample(self)
    }
    fn is_finished(&self) -> bool {
        SamplerVoice::is_finished(self)
    }
    fn level(&self) -> f64 {
        SamplerVoice::level(self)
    }
}

/// Fixed set of preallocated voices; triggering never allocates.
#[derive(Debug, Clone)]
pub struct VoicePool<V> {
    voices: Vec<V>,
}

impl<V: Voice> VoicePool<V> {
    pub fn new(voices: Vec<V>) -> Self {
        VoicePool { voices }
    }

    pub fn capacity(&self) -> usize {
        self.voices.len()
    }

    pub fn active(&self) -> usize {
        self.voices.iter().filter(|v| !v.is_finished()).count()
    }

    /// Start a note on a free voice, or steal the quietest one.
    pub fn trigger(&mut self, note: u8, gate_frames: usize) {
        let idle = self.voices.iter().position(Voice::is_finished);
        let index = idle.or_else(|| {
            self.voices
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.level().total_cmp(&b.1.level()))
                .map(|(i, _)| i)
        });
        if let Some(i) = index {
            self.voices[i].trigger(note, gate_frames);
        }
    }

    pub fn render_add(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.render_add_ramped(left, right, 1.0, 0.0);
    }

    /// Mix in at a gain starting at `from` and falling by `step` per frame.
    pub fn render_add_ramped(&mut self, left: &mut [f32], right: &mut [f32], from: f32, step: f32) {
        for voice in self.voices.iter_mut().filter(|v| !v.is_finished()) {
            for (i, (l, r)) in left.iter_mut().zip(right.iter_mut()).enumerate() {
                let gain = (from - step * i as f32).max(0.0);
                let s = voice.next_sample() as f32 * gain;
                *l += s;
                *r += s;
            }
        }
    }

    pub fn kill_all(&mut self) {
        self.voices.iter_mut().for_each(Voice::kill);
    }
}

/// The grid-driven source.
#[derive(Debug, Clone)]
pub enum MelodicSource {
    Synth(VoicePool<SynthVoice>),
    Sampler(VoicePool<SamplerVoice>),
}

impl MelodicSource {
    pub fn synth(settings: SynthSettings, sample_rate: f64, max_voices: usize) -> Self {
        let voices = (0..max_voices.max(1))
            .map(|_| SynthVoice::new(settings.waveform, settings.envelope, sample_rate))
            .collect();
        MelodicSource::Synth(VoicePool::new(voices))
    }

    /// Pitched playback of `buffer`; every voice shares the one buffer.
    pub fn sampler(buffer: Arc<SampleBuffer>, sample_rate: f64, max_voices: usize) -> Self {
        let voices = (0..max_voices.max(1))
            .map(|_| SamplerVoice::new(Arc::clone(&buffer), sample_rate))
            .collect();
        MelodicSource::Sampler(VoicePool::new(voices))
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            MelodicSource::Synth(_) => SourceKind::Synth,
            MelodicSource::Sampler(_) => SourceKind::Sampler,
        }
    }

    pub fn trigger(&mut self, note: u8, gate_frames: usize) {
        match self {
            MelodicSource::Synth(pool) => pool.trigger(note, gate_frames),
            MelodicSource::Sampler(pool) => pool.trigger(note, gate_frames),
        }
    }

    pub fn render_add(&mut self, left: &mut [f32], right: &mut [f32]) {
        match self {
            MelodicSource::Synth(pool) => pool.render_add(left, right),
            MelodicSource::Sampler(pool) => pool.render_add(left, right),
        }
    }

    pub fn render_add_ramped(&mut self, left: &mut [f32], right: &mut [f32], from: f32, step: f32) {
        match self {
            MelodicSource::Synth(pool) => pool.render_add_ramped(left, right, from, step),
            MelodicSource::Sampler(pool) => pool.render_add_ramped(left, right, from, step),
        }
    }

    /// Silence every voice.
    pub fn release(&mut self) {
        match self {
            MelodicSource::Synth(pool) => pool.kill_all(),
            MelodicSource::Sampler(pool) => pool.kill_all(),
        }
    }

    pub fn active_voices(&self) -> usize {
        match self {
            MelodicSource::Synth(pool) => pool.active(),
            MelodicSource::Sampler(pool) => pool.active(),
        }
    }
}

/// How long a swapped-out melodic source takes to fade to silence.
pub const SWAP_FADE_SECONDS: f64 = 0.005;

/// The sources attached to the input bus.
#[derive(Debug)]
pub struct InstrumentSlot {
    melodic: Box<MelodicSource>,
    /// The previous melodic source, ramping down.
    fading: Option<Box<MelodicSource>>,
    fade_left: usize,
    fade_frames: usize,
    /// Silenced after its fade, waiting for [`take_faded`](Self::take_faded).
    faded: Option<Box<MelodicSource>>,
    player: Option<Box<SamplePlayer>>,
}

impl InstrumentSlot {
    pub fn new(melodic: Box<MelodicSource>, sample_rate: f64) -> Self {
        InstrumentSlot {
            melodic,
            fading: None,
            fade_left: 0,
            fade_frames: ((SWAP_FADE_SECONDS * sample_rate) as usize).max(1),
            faded: None,
            player: None,
        }
    }

    pub fn melodic_kind(&self) -> SourceKind {
        self.melodic.kind()
    }

    /// Attach `next`. A silent outgoing source is returned at once; one
    /// with ringing voices fades out first and comes back through
    /// [`take_faded`](Self::take_faded). A source still fading from an
    /// earlier swap is cut short.
    pub fn swap_melodic(&mut self, next: Box<MelodicSource>) -> Option<Box<MelodicSource>> {
        self.cut_fade();
        let outgoing = mem::replace(&mut self.melodic, next);
        if outgoing.active_voices() == 0 {
            return Some(outgoing);
        }
        self.fading = Some(outgoing);
        self.fade_left = self.fade_frames;
        None
    }

    fn cut_fade(&mut self) {
        if let Some(mut source) = self.fading.take() {
            source.release();
            self.faded = Some(source);
        }
    }

    /// A source that finished fading, silenced.
    pub fn take_faded(&mut self) -> Option<Box<MelodicSource>> {
        self.faded.take()
    }

    pub fn is_fading(&self) -> bool {
        self.fading.is_some()
    }

    /// Same transition for the player; `None` detaches it.
    pub fn swap_player(&mut self, next: Option<Box<SamplePlayer>>) -> Option<Box<SamplePlayer>> {
        if let Some(player) = self.player.as_mut() {
            player.stop();
        }
        mem::replace(&mut self.player, next)
    }

    pub fn trigger(&mut self, trigger: &NoteTrigger) {
        self.melodic.trigger(trigger.note, trigger.duration_frames);
    }

    /// Returns false when no player is attached.
    pub fn play_full_sample(&mut self) -> bool {
        match self.player.as_mut() {
            Some(player) => {
                player.start();
                true
            }
            None => false,
        }
    }

    pub fn stop_full_sample(&mut self) {
        if let Some(player) = self.player.as_mut() {
            player.stop();
        }
    }

    pub fn is_sample_playing(&self) -> bool {
        self.player.as_ref().is_some_and(|p| p.is_playing())
    }

    pub fn has_player(&self) -> bool {
        self.player.is_some()
    }

    pub fn active_voices(&self) -> usize {
        self.melodic.active_voices()
    }

    pub fn render_add(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.melodic.render_add(left, right);
        if let Some(fading) = self.fading.as_mut() {
            let n = left.len().min(self.fade_left);
            let step = 1.0 / self.fade_frames as f32;
            fading.render_add_ramped(&mut left[..n], &mut right[..n], self.fade_left as f32 * step, step);
            self.fade_left -= n;
            if self.fade_left == 0 {
                self.cut_fade();
            }
        }
        if let Some(player) = self.player.as_mut() {
            player.render_add(left, right, PLAYER_GAIN);
        }
    }

    /// Silence everything that is attached.
    pub fn release_all(&mut self) {
        self.melodic.release();
        self.cut_fade();
        self.stop_full_sample();
    }
}

/// Level of the whole-sample player relative to melodic voices.
const PLAYER_GAIN: f32 = 0.8;
