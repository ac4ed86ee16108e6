//! Audio Engine — the real-time half.
//!
//! [`AudioEngine`] is moved into the audio callback (or driven offline by
//! the renderer). It owns the sequencer, the instrument slot, the input bus
//! and the active chain, and it only learns about edits through
//! [`EngineCommand`]s drained at the top of every block. Objects it replaces
//! go back to the control path as [`Retired`] so nothing is freed on the
//! callback. Nothing here blocks, logs, or allocates after construction.

use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use arrayvec::ArrayVec;
use crossbeam_channel::{Receiver, Sender, TrySendError};

use super::bus::{StereoBus, soft_clip};
use super::meter::MeterLevels;
use super::sampler::SamplePlayer;
use super::stage::ActiveChain;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::instrument::{InstrumentSlot, MelodicSource};
use crate::params::ParamBank;
use crate::transport::{NoteTrigger, Pattern, Sequencer, TRIGGER_CAPACITY, TransportStatus};

/// Control-path → audio-thread messages.
#[derive(Debug)]
pub enum EngineCommand {
    /// Swap in a fully built chain.
    InstallChain(Box<ActiveChain>),
    /// Drop every stage; the bus goes straight to the output.
    DetachChain,
    SetPattern(Box<Pattern>),
    SetBpm(f64),
    Start,
    Stop,
    SetMelodic(Box<MelodicSource>),
    SetPlayer(Option<Box<SamplePlayer>>),
    PlayFullSample,
    StopFullSample,
    /// Stop the clock, silence every source, detach the chain, output silence from now on.
    Shutdown,
}

/// Objects the audio thread replaced, sent back to be dropped elsewhere.
#[derive(Debug)]
pub enum Retired {
    Chain(Box<ActiveChain>),
    Pattern(Box<Pattern>),
    Melodic(Box<MelodicSource>),
    Player(Box<SamplePlayer>),
}

/// Depth of the return queue for a command queue of `command_capacity`.
/// One command retires at most three objects, and the control path empties
/// the return queue before every send, so this never fills.
pub fn retired_capacity(command_capacity: usize) -> usize {
    3 * (command_capacity + 2)
}

/// Send without blocking.
pub(crate) fn send_command(tx: &Sender<EngineCommand>, command: EngineCommand) -> Result<(), EngineError> {
    tx.try_send(command).map_err(|e| match e {
        TrySendError::Full(_) => EngineError::Device("engine command queue is full".into()),
        TrySendError::Disconnected(_) => EngineError::Device("audio engine has been dropped".into()),
    })
}

/// State the audio thread publishes for the control path.
#[derive(Debug, Default)]
pub struct EngineStatus {
    pub transport: TransportStatus,
    pub meter: Arc<MeterLevels>,
    sample_playing: AtomicBool,
    active_voices: AtomicUsize,
    shut_down: AtomicBool,
    /// Retired objects freed on the audio thread because the return queue
    /// was full.
    retire_overflow: AtomicUsize,
}

impl EngineStatus {
    pub fn is_sample_playing(&self) -> bool {
        self.sample_playing.load(Ordering::Acquire)
    }

    pub fn active_voices(&self) -> usize {
        self.active_voices.load(Ordering::Relaxed)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Overflows since the last call.
    pub fn take_retire_overflow(&self) -> usize {
        self.retire_overflow.swap(0, Ordering::Relaxed)
    }
}

/// The real-time renderer.
pub struct AudioEngine {
    commands: Receiver<EngineCommand>,
    retired: Sender<Retired>,
    bank: Arc<ParamBank>,
    status: Arc<EngineStatus>,
    chain: Option<Box<ActiveChain>>,
    pattern: Box<Pattern>,
    sequencer: Sequencer,
    instruments: InstrumentSlot,
    bus: StereoBus,
    triggers: ArrayVec<NoteTrigger, TRIGGER_CAPACITY>,
    shut_down: bool,
}

impl AudioEngine {
    pub fn new(
        config: &EngineConfig,
        bank: Arc<ParamBank>,
        status: Arc<EngineStatus>,
        commands: Receiver<EngineCommand>,
        retired: Sender<Retired>,
    ) -> Self {
        let melodic = MelodicSource::synth(config.synth, config.sample_rate, config.max_voices);
        AudioEngine {
            commands,
            retired,
            bank,
            chain: Some(Box::new(ActiveChain::empty(Arc::clone(&status.meter)))),
            status,
            pattern: Box::default(),
            sequencer: Sequencer::new(config.sample_rate, crate::transport::DEFAULT_BPM, config.bpm_ramp_seconds),
            instruments: InstrumentSlot::new(Box::new(melodic), config.sample_rate),
            bus: StereoBus::new(config.max_block_frames.max(1), config.master_gain as f32),
            triggers: ArrayVec::new(),
            shut_down: false,
        }
    }

    pub fn status(&self) -> &Arc<EngineStatus> {
        &self.status
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Fill `left` and `right` (equal length) with the next frames.
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.drain_commands();
        let frames = left.len().min(right.len());
        if self.shut_down {
            left.fill(0.0);
            right.fill(0.0);
            return;
        }

        let block = self.bus.capacity();
        let mut done = 0;
        while done < frames {
            let n = (frames - done).min(block);
            self.render_block(n);
            if let Some(old) = self.instruments.take_faded() {
                self.retire(Retired::Melodic(old));
            }
            for i in 0..n {
                left[done + i] = soft_clip(self.bus.left[i]);
                right[done + i] = soft_clip(self.bus.right[i]);
            }
            done += n;
        }

        self.status
            .sample_playing
            .store(self.instruments.is_sample_playing(), Ordering::Release);
        self.status
            .active_voices
            .store(self.instruments.active_voices(), Ordering::Relaxed);
    }

    /// Fill an interleaved device buffer of `channels` channels.
    pub fn process_interleaved(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let frames = out.len() / channels;
        let block = self.bus.capacity();
        let mut left = [0.0f32; 256];
        let mut right = [0.0f32; 256];
        let chunk = block.min(left.len());
        let mut done = 0;
        while done < frames {
            let n = (frames - done).min(chunk);
            self.process(&mut left[..n], &mut right[..n]);
            for i in 0..n {
                let frame = &mut out[(done + i) * channels..(done + i + 1) * channels];
                match frame {
                    [mono] => *mono = 0.5 * (left[i] + right[i]),
                    [l, r, rest @ ..] => {
                        *l = left[i];
                        *r = right[i];
                        rest.fill(0.0);
                    }
                    [] => {}
                }
            }
            done += n;
        }
    }

    /// Render `n ≤ bus capacity` frames into the bus and run the chain on them.
    fn render_block(&mut self, n: usize) {
        let AudioEngine {
            bank,
            status,
            chain,
            pattern,
            sequencer,
            instruments,
            bus,
            triggers,
            ..
        } = self;

        bus.clear(n);
        let mut pos = 0;
        let mut rendered = 0;
        while pos < n {
            triggers.clear();
            let consumed = sequencer.advance(n - pos, pattern, &status.transport, triggers);
            for trigger in triggers.iter() {
                let at = pos + trigger.offset;
                if at > rendered {
                    instruments.render_add(&mut bus.left[rendered..at], &mut bus.right[rendered..at]);
                    rendered = at;
                }
                instruments.trigger(trigger);
            }
            pos += consumed;
        }
        if rendered < n {
            instruments.render_add(&mut bus.left[rendered..n], &mut bus.right[rendered..n]);
        }

        bus.apply_gain(n);
        if let Some(chain) = chain.as_mut() {
            chain.process(bank, &mut bus.left[..n], &mut bus.right[..n]);
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            if self.shut_down {
                continue;
            }
            self.apply(command);
        }
    }

    fn apply(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::InstallChain(mut next) => {
                if let Some(mut old) = self.chain.take() {
                    next.carry_over(&mut old);
                    self.retire(Retired::Chain(old));
                }
                self.chain = Some(next);
            }
            EngineCommand::DetachChain => {
                if let Some(old) = self.chain.take() {
                    self.retire(Retired::Chain(old));
                }
            }
            EngineCommand::SetPattern(next) => {
                let old = mem::replace(&mut self.pattern, next);
                self.retire(Retired::Pattern(old));
            }
            EngineCommand::SetBpm(bpm) => self.sequencer.set_bpm(bpm),
            EngineCommand::Start => self.sequencer.start(&self.status.transport),
            EngineCommand::Stop => self.sequencer.stop(&self.status.transport),
            EngineCommand::SetMelodic(next) => {
                if let Some(old) = self.instruments.swap_melodic(next) {
                    self.retire(Retired::Melodic(old));
                }
                if let Some(old) = self.instruments.take_faded() {
                    self.retire(Retired::Melodic(old));
                }
            }
            EngineCommand::SetPlayer(next) => {
                if let Some(old) = self.instruments.swap_player(next) {
                    self.retire(Retired::Player(old));
                }
            }
            EngineCommand::PlayFullSample => {
                self.instruments.play_full_sample();
            }
            EngineCommand::StopFullSample => self.instruments.stop_full_sample(),
            EngineCommand::Shutdown => self.shutdown(),
        }
    }

    fn shutdown(&mut self) {
        self.sequencer.stop(&self.status.transport);
        self.instruments.release_all();
        if let Some(old) = self.instruments.take_faded() {
            self.retire(Retired::Melodic(old));
        }
        if let Some(old) = self.instruments.swap_player(None) {
            self.retire(Retired::Player(old));
        }
        if let Some(old) = self.chain.take() {
            self.retire(Retired::Chain(old));
        }
        self.status.meter.clear();
        self.status.sample_playing.store(false, Ordering::Release);
        self.status.active_voices.store(0, Ordering::Relaxed);
        self.status.shut_down.store(true, Ordering::Release);
        self.shut_down = true;
    }

    fn retire(&self, object: Retired) {
        match self.retired.try_send(object) {
            Ok(()) => {}
            // Freed here; counted for the control path to report.
            Err(TrySendError::Full(_)) => {
                self.status.retire_overflow.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}
