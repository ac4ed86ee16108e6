//! Transport / sequencer.
//!
//! A single clock ticking once per sixteenth note. The control path owns
//! the editable [`TransportState`]; the audio thread owns a [`Sequencer`]
//! that reads an immutable [`Pattern`] snapshot and reports progress through
//! [`TransportStatus`] atomics.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};

use arrayvec::ArrayVec;

use crate::grid::{Grid, ROWS, StepCount, row_midi, transpose};

pub const BPM_MIN: f64 = 60.0;
pub const BPM_MAX: f64 = 180.0;
pub const DEFAULT_BPM: f64 = 120.0;
pub const OCTAVE_MIN: i32 = 2;
pub const OCTAVE_MAX: i32 = 7;
pub const DEFAULT_OCTAVE: i32 = 5;
pub const PITCH_MIN: i32 = -12;
pub const PITCH_MAX: i32 = 12;

/// Most triggers one [`Sequencer::advance`] call will emit. A call stops
/// early rather than split a tick across two calls.
pub const TRIGGER_CAPACITY: usize = ROWS * 4;

pub fn clamp_bpm(bpm: f64) -> f64 {
    if bpm.is_finite() { bpm.clamp(BPM_MIN, BPM_MAX) } else { DEFAULT_BPM }
}

pub fn clamp_octave(octave: i32) -> i32 {
    octave.clamp(OCTAVE_MIN, OCTAVE_MAX)
}

pub fn clamp_pitch(pitch: i32) -> i32 {
    pitch.clamp(PITCH_MIN, PITCH_MAX)
}

/// Seconds per sixteenth note.
pub fn sixteenth_seconds(bpm: f64) -> f64 {
    60.0 / bpm / 4.0
}

/// Control-side transport settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportState {
    pub bpm: f64,
    pub steps: StepCount,
    pub octave: i32,
    pub pitch: i32,
    pub playing: bool,
}

impl Default for TransportState {
    fn default() -> Self {
        TransportState {
            bpm: DEFAULT_BPM,
            steps: StepCount::Sixteen,
            octave: DEFAULT_OCTAVE,
            pitch: 0,
            playing: false,
        }
    }
}

/// What the sequencer reads on each tick. Replaced wholesale on edit, so
/// a tick never sees a half-applied change.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub grid: Grid,
    pub octave: i32,
    pub pitch: i32,
}

impl Default for Pattern {
    fn default() -> Self {
        Pattern {
            grid: Grid::default(),
            octave: DEFAULT_OCTAVE,
            pitch: 0,
        }
    }
}

impl Pattern {
    /// Sounding MIDI note of `row`.
    pub fn note_for_row(&self, row: usize) -> u8 {
        transpose(row_midi(self.octave, row), self.pitch)
    }
}

/// One note to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteTrigger {
    /// Frame offset within the advanced span.
    pub offset: usize,
    pub step: usize,
    pub row: usize,
    pub note: u8,
    /// Gate length: one sixteenth at dispatch time.
    pub duration_frames: usize,
}

/// Transport progress published by the audio thread.
#[derive(Debug)]
pub struct TransportStatus {
    step: AtomicI32,
    playing: AtomicBool,
    ticks: AtomicU64,
}

impl Default for TransportStatus {
    fn default() -> Self {
        TransportStatus {
            step: AtomicI32::new(-1),
            playing: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
        }
    }
}

impl TransportStatus {
    /// Step most recently fired, `None` while stopped.
    pub fn current_step(&self) -> Option<usize> {
        let s = self.step.load(Ordering::Acquire);
        (s >= 0).then_some(s as usize)
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    /// Ticks fired since the engine was created.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    fn publish_tick(&self, step: usize) {
        self.step.store(step as i32, Ordering::Release);
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    fn publish_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Release);
        if !playing {
            self.step.store(-1, Ordering::Release);
        }
    }
}

/// Audio-thread clock.
#[derive(Debug)]
pub struct Sequencer {
    sample_rate: f64,
    bpm: f64,
    target_bpm: f64,
    /// bpm change per frame while ramping.
    ramp_delta: f64,
    ramp_frames: usize,
    ramp_seconds: f64,
    playing: bool,
    next_step: usize,
    /// Frames until the next tick; ≤ 0 means due now.
    until_tick: f64,
}

impl Sequencer {
    pub fn new(sample_rate: f64, bpm: f64, ramp_seconds: f64) -> Self {
        let bpm = clamp_bpm(bpm);
        Sequencer {
            sample_rate,
            bpm,
            target_bpm: bpm,
            ramp_delta: 0.0,
            ramp_frames: 0,
            ramp_seconds,
            playing: false,
            next_step: 0,
            until_tick: 0.0,
        }
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Glide to `bpm` over the ramp time.
    pub fn set_bpm(&mut self, bpm: f64) {
        let bpm = clamp_bpm(bpm);
        self.target_bpm = bpm;
        let frames = (self.ramp_seconds * self.sample_rate) as usize;
        if frames == 0 {
            self.bpm = bpm;
            self.ramp_frames = 0;
        } else {
            self.ramp_frames = frames;
            self.ramp_delta = (bpm - self.bpm) / frames as f64;
        }
    }

    /// Start from step 0; the first tick is due immediately. No-op while playing.
    pub fn start(&mut self, status: &TransportStatus) {
        if self.playing {
            return;
        }
        self.playing = true;
        self.next_step = 0;
        self.until_tick = 0.0;
        status.publish_playing(true);
    }

    /// Stop and clear the current step. No-op while stopped.
    pub fn stop(&mut self, status: &TransportStatus) {
        if !self.playing {
            return;
        }
        self.playing = false;
        status.publish_playing(false);
    }

    fn frames_per_tick(&self) -> f64 {
        sixteenth_seconds(self.bpm) * self.sample_rate
    }

    fn ramp(&mut self, frames: usize) {
        if self.ramp_frames == 0 {
            return;
        }
        let n = frames.min(self.ramp_frames);
        self.ramp_frames -= n;
        self.bpm = if self.ramp_frames == 0 {
            self.target_bpm
        } else {
            self.bpm + self.ramp_delta * n as f64
        };
    }

    /// Run the clock for up to `frames` frames, pushing every trigger due
    /// in that span. Returns the frames consumed, which is less than
    /// `frames` only when `out` could not hold another full tick.
    pub fn advance(
        &mut self,
        frames: usize,
        pattern: &Pattern,
        status: &TransportStatus,
        out: &mut ArrayVec<NoteTrigger, TRIGGER_CAPACITY>,
    ) -> usize {
        if !self.playing {
            self.ramp(frames);
            return frames;
        }

        let mut pos = 0;
        while pos < frames {
            if self.until_tick <= 0.0 {
                if out.remaining_capacity() < ROWS {
                    return pos;
                }
                self.tick(pos, pattern, status, out);
            }
            let run = (self.until_tick.ceil().max(1.0) as usize).min(frames - pos);
            self.until_tick -= run as f64;
            self.ramp(run);
            pos += run;
        }
        frames
    }

    fn tick(
        &mut self,
        offset: usize,
        pattern: &Pattern,
        status: &TransportStatus,
        out: &mut ArrayVec<NoteTrigger, TRIGGER_CAPACITY>,
    ) {
        let steps = pattern.grid.steps();
        let step = self.next_step % steps;
        let duration_frames = self.frames_per_tick().round() as usize;

        for row in pattern.grid.active_rows(step) {
            out.push(NoteTrigger {
                offset,
                step,
                row,
                note: pattern.note_for_row(row),
                duration_frames,
            });
        }

        status.publish_tick(step);
        self.next_step = (step + 1) % steps;
        self.until_tick += self.frames_per_tick();
    }
}
