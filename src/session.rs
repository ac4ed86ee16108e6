//! The control path.
//!
//! A [`Session`] is the only thing user code talks to. It owns the editable
//! state (grid, transport settings, enabled set, parameters, the loaded
//! sample) and forwards every change to the [`AudioEngine`] as a message.
//! Snapshot save/load and sample decoding never touch the audio thread
//! directly.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::chain::{ChainManager, DspRenderer, Wiring};
use crate::config::EngineConfig;
use crate::decode::{SampleLoader, sniff};
use crate::dsp::engine::{AudioEngine, EngineCommand, EngineStatus, Retired, retired_capacity, send_command};
use crate::dsp::meter::MeterLevels;
use crate::dsp::sampler::{SampleBuffer, SamplePlayer};
use crate::error::EngineError;
use crate::grid::{Grid, StepCount};
use crate::instrument::{MelodicSource, SourceKind};
use crate::params::{EffectKind, ParamSpec, ParameterStore};
use crate::snapshot::{FxState, SNAPSHOT_VERSION, SampleRef, Snapshot, now_millis, snapshot_id};
use crate::store::{SnapshotHandle, SnapshotListing, SnapshotStore, validate_name};
use crate::transport::{Pattern, TransportState, clamp_bpm, clamp_octave, clamp_pitch};

/// What applying a snapshot left for the caller to do.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    /// The snapshot's sample reference, if it had one.
    pub sample: Option<SampleRef>,
    /// True when an inline sample is now decoding in the background.
    pub decoding: bool,
}

impl LoadOutcome {
    /// A reference the caller has to fetch and pass to
    /// [`Session::load_sample`].
    pub fn needs_fetch(&self) -> Option<&SampleRef> {
        match &self.sample {
            Some(r @ (SampleRef::External { .. } | SampleRef::ContentAddressed { .. })) => Some(r),
            _ => None,
        }
    }
}

/// Things that happened since the last [`Session::poll`].
#[derive(Debug)]
pub enum SessionEvent {
    /// A sample finished decoding and is now the melodic source.
    SampleLoaded { label: String },
    /// Decoding failed; the synth is the melodic source again.
    SampleFailed { label: String, error: EngineError },
}

#[derive(Debug)]
struct LoadedSample {
    label: String,
    buffer: Arc<SampleBuffer>,
    reference: Option<SampleRef>,
}

/// Control-side handle on one running engine.
pub struct Session {
    config: EngineConfig,
    commands: Sender<EngineCommand>,
    retired: Receiver<Retired>,
    status: Arc<EngineStatus>,
    chain: ChainManager<DspRenderer>,
    transport: TransportState,
    grid: Grid,
    loader: SampleLoader,
    pending_ref: Option<SampleRef>,
    sample: Option<LoadedSample>,
    closed: bool,
    #[cfg(feature = "device")]
    output: Option<crate::output::OutputStream>,
}

impl Session {
    /// Create a session and the engine it drives. The engine goes to the
    /// audio callback (see `output::start_output`) or to the offline
    /// renderer.
    pub fn new(config: EngineConfig) -> Result<(Session, AudioEngine), EngineError> {
        config.validate()?;
        let (commands, command_rx) = bounded(config.command_capacity);
        let (retired_tx, retired) = bounded(retired_capacity(config.command_capacity));
        let params = ParameterStore::new();
        let status = Arc::new(EngineStatus::default());

        let engine = AudioEngine::new(&config, params.bank(), Arc::clone(&status), command_rx, retired_tx);
        let renderer = DspRenderer::new(config.sample_rate, commands.clone(), Arc::clone(&status.meter));
        let mut chain = ChainManager::new(renderer, params);
        chain.rebuild()?;

        log::info!(target: "session", "session started at {} Hz", config.sample_rate);
        let session = Session {
            config,
            commands,
            retired,
            status,
            chain,
            transport: TransportState::default(),
            grid: Grid::default(),
            loader: SampleLoader::new(),
            pending_ref: None,
            sample: None,
            closed: false,
            #[cfg(feature = "device")]
            output: None,
        };
        Ok((session, engine))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn send(&self, command: EngineCommand) -> Result<(), EngineError> {
        if self.closed {
            return Ok(());
        }
        self.collect_retired();
        send_command(&self.commands, command)
    }

    /// Drop whatever the audio thread handed back.
    fn collect_retired(&self) {
        for object in self.retired.try_iter() {
            drop(object);
        }
        let overflow = self.status.take_retire_overflow();
        if overflow > 0 {
            log::warn!(target: "session", "{overflow} replaced engine objects were freed on the audio thread");
        }
    }

    fn push_pattern(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::SetPattern(Box::new(Pattern {
            grid: self.grid.clone(),
            octave: self.transport.octave,
            pitch: self.transport.pitch,
        })))
    }

    // ── Grid ────────────────────────────────────────────────

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Flip a cell; returns its new value.
    pub fn toggle_cell(&mut self, row: usize, step: usize) -> Result<bool, EngineError> {
        if self.closed {
            return Ok(self.grid.get(row, step));
        }
        let on = self.grid.toggle(row, step)?;
        self.push_pattern()?;
        Ok(on)
    }

    pub fn set_cell(&mut self, row: usize, step: usize, on: bool) -> Result<(), EngineError> {
        if self.closed {
            return Ok(());
        }
        self.grid.set(row, step, on)?;
        self.push_pattern()
    }

    pub fn clear_grid(&mut self) -> Result<(), EngineError> {
        if self.closed {
            return Ok(());
        }
        self.grid.clear();
        self.push_pattern()
    }

    pub fn steps(&self) -> StepCount {
        self.transport.steps
    }

    /// Resize the grid, keeping the overlapping columns.
    pub fn set_steps(&mut self, steps: StepCount) -> Result<(), EngineError> {
        if self.closed || steps == self.transport.steps {
            return Ok(());
        }
        self.transport.steps = steps;
        self.grid.resize(steps);
        self.push_pattern()
    }

    /// Switch between 16 and 32 steps.
    pub fn toggle_steps(&mut self) -> Result<StepCount, EngineError> {
        let next = self.transport.steps.toggled();
        self.set_steps(next)?;
        Ok(self.transport.steps)
    }

    // ── Transport ───────────────────────────────────────────

    pub fn transport(&self) -> &TransportState {
        &self.transport
    }

    pub fn bpm(&self) -> f64 {
        self.transport.bpm
    }

    /// Clamp to [60, 180] and glide there; returns the applied tempo.
    pub fn set_bpm(&mut self, bpm: f64) -> Result<f64, EngineError> {
        if self.closed {
            return Ok(self.transport.bpm);
        }
        let applied = clamp_bpm(bpm);
        if applied != bpm {
            log::debug!(target: "transport", "bpm {bpm} clamped to {applied}");
        }
        self.transport.bpm = applied;
        self.send(EngineCommand::SetBpm(applied))?;
        Ok(applied)
    }

    pub fn octave(&self) -> i32 {
        self.transport.octave
    }

    pub fn set_octave(&mut self, octave: i32) -> Result<i32, EngineError> {
        if self.closed {
            return Ok(self.transport.octave);
        }
        self.transport.octave = clamp_octave(octave);
        self.push_pattern()?;
        Ok(self.transport.octave)
    }

    pub fn pitch(&self) -> i32 {
        self.transport.pitch
    }

    /// Global transposition in semitones, clamped to ±12.
    pub fn set_pitch(&mut self, pitch: i32) -> Result<i32, EngineError> {
        if self.closed {
            return Ok(self.transport.pitch);
        }
        self.transport.pitch = clamp_pitch(pitch);
        self.push_pattern()?;
        Ok(self.transport.pitch)
    }

    /// Start from step 0. No-op while playing.
    pub fn play(&mut self) -> Result<(), EngineError> {
        if self.closed || self.transport.playing {
            return Ok(());
        }
        self.send(EngineCommand::Start)?;
        self.transport.playing = true;
        log::debug!(target: "transport", "play");
        Ok(())
    }

    /// Stop and clear the current step. No-op while stopped.
    pub fn stop(&mut self) -> Result<(), EngineError> {
        if self.closed || !self.transport.playing {
            return Ok(());
        }
        self.send(EngineCommand::Stop)?;
        self.transport.playing = false;
        log::debug!(target: "transport", "stop");
        Ok(())
    }

    pub fn toggle_play(&mut self) -> Result<bool, EngineError> {
        if self.transport.playing {
            self.stop()?;
        } else {
            self.play()?;
        }
        Ok(self.transport.playing)
    }

    pub fn is_playing(&self) -> bool {
        !self.closed && self.transport.playing
    }

    /// Step the audio thread fired last, for highlighting.
    pub fn current_step(&self) -> Option<usize> {
        if self.closed { None } else { self.status.transport.current_step() }
    }

    // ── Effects ─────────────────────────────────────────────

    /// Add or remove a stage; rebuilds only when membership changed or an
    /// earlier rebuild did not go through. A refused rebuild puts the flag
    /// back, so `is_enabled` always matches the running chain.
    pub fn set_enabled(&mut self, kind: EffectKind, enabled: bool) -> Result<(), EngineError> {
        if self.closed {
            return Ok(());
        }
        let was = self.chain.is_enabled(kind);
        let changed = self.chain.set_enabled(kind, enabled);
        if changed || self.chain.is_stale() {
            self.collect_retired();
            if let Err(e) = self.chain.rebuild() {
                self.chain.set_enabled(kind, was);
                log::warn!(target: "chain", "'{}' left {}: {e}", kind.tag(), if was { "on" } else { "off" });
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn is_enabled(&self, kind: EffectKind) -> bool {
        self.chain.is_enabled(kind)
    }

    /// Stages in the running chain, in signal order.
    pub fn active_chain(&self) -> &[EffectKind] {
        self.chain.active()
    }

    pub fn bypassed_stages(&self) -> &[EffectKind] {
        self.chain.bypassed()
    }

    pub fn wiring(&self) -> &Wiring {
        self.chain.wiring()
    }

    pub fn rebuild_count(&self) -> u64 {
        self.chain.rebuild_count()
    }

    /// Clamp and apply; returns the value now in effect.
    pub fn set_parameter(&mut self, kind: EffectKind, name: &str, value: f64) -> Result<f64, EngineError> {
        if self.closed {
            return self.chain.params().get(kind, name);
        }
        let applied = self.chain.set_parameter(kind, name, value)?;
        if applied != value {
            log::debug!(target: "params", "{}.{name} = {value} clamped to {applied}", kind.tag());
        }
        Ok(applied)
    }

    pub fn parameter(&self, kind: EffectKind, name: &str) -> Result<f64, EngineError> {
        self.chain.params().get(kind, name)
    }

    pub fn parameters(&self, kind: EffectKind) -> Vec<(&'static str, f64)> {
        self.chain.params().values(kind)
    }

    pub fn schema(&self, kind: EffectKind) -> &'static [ParamSpec] {
        kind.schema()
    }

    pub fn reset_parameters(&mut self, kind: EffectKind) {
        if !self.closed {
            self.chain.params().reset(kind);
        }
    }

    pub fn meter(&self) -> &MeterLevels {
        &self.status.meter
    }

    pub fn engine_status(&self) -> &Arc<EngineStatus> {
        &self.status
    }

    // ── Samples ─────────────────────────────────────────────

    /// Decode `bytes` in the background. The current source keeps playing
    /// until [`poll`](Self::poll) sees the result. `reference` is what a
    /// snapshot taken afterwards will record.
    pub fn load_sample(
        &mut self,
        label: impl Into<String>,
        bytes: Vec<u8>,
        reference: Option<SampleRef>,
    ) -> Result<u64, EngineError> {
        if self.closed {
            return Ok(0);
        }
        let generation = self.loader.load(label, bytes)?;
        self.pending_ref = reference;
        Ok(generation)
    }

    /// Like [`load_sample`](Self::load_sample), recording the file itself as
    /// the snapshot reference.
    pub fn load_sample_inline(&mut self, label: impl Into<String>, bytes: Vec<u8>) -> Result<u64, EngineError> {
        let reference = sniff(&bytes).map(|format| SampleRef::inline(&bytes, format));
        self.load_sample(label, bytes, reference)
    }

    pub fn is_sample_pending(&self) -> bool {
        self.loader.is_pending()
    }

    /// Apply finished background work. Call regularly from the UI loop.
    pub fn poll(&mut self) -> Vec<SessionEvent> {
        self.collect_retired();
        if self.closed {
            return Vec::new();
        }
        let mut events = Vec::new();
        if let Some(decoded) = self.loader.poll() {
            events.push(self.install_decoded(decoded.label, decoded.result));
        }
        events
    }

    /// Block up to `timeout` for a pending decode.
    pub fn wait_for_sample(&mut self, timeout: Duration) -> Option<SessionEvent> {
        if let Some(event) = self.poll().pop() {
            return Some(event);
        }
        if self.closed {
            return None;
        }
        let decoded = self.loader.wait(timeout)?;
        Some(self.install_decoded(decoded.label, decoded.result))
    }

    fn install_decoded(&mut self, label: String, result: Result<SampleBuffer, EngineError>) -> SessionEvent {
        let reference = self.pending_ref.take();
        let installed = result.and_then(|buffer| {
            let buffer = Arc::new(buffer);
            self.attach_sample(&buffer)?;
            Ok(buffer)
        });
        match installed {
            Ok(buffer) => {
                log::info!(
                    target: "session",
                    "sample '{label}' ready ({:.2} s at {} Hz)",
                    buffer.duration_seconds(),
                    buffer.sample_rate
                );
                self.sample = Some(LoadedSample {
                    label: label.clone(),
                    buffer,
                    reference,
                });
                SessionEvent::SampleLoaded { label }
            }
            Err(error) => {
                log::warn!(target: "session", "sample '{label}' failed: {error}");
                // A failed decode leaves nothing half-attached.
                if let Err(e) = self.detach_sample() {
                    log::warn!(target: "session", "could not restore the synth: {e}");
                }
                SessionEvent::SampleFailed { label, error }
            }
        }
    }

    fn attach_sample(&self, buffer: &Arc<SampleBuffer>) -> Result<(), EngineError> {
        let sr = self.config.sample_rate;
        let sampler = MelodicSource::sampler(Arc::clone(buffer), sr, self.config.max_voices);
        let player = SamplePlayer::new(Arc::clone(buffer), sr);
        self.send(EngineCommand::SetMelodic(Box::new(sampler)))?;
        self.send(EngineCommand::SetPlayer(Some(Box::new(player))))
    }

    fn detach_sample(&mut self) -> Result<(), EngineError> {
        self.sample = None;
        let synth = MelodicSource::synth(self.config.synth, self.config.sample_rate, self.config.max_voices);
        self.send(EngineCommand::SetMelodic(Box::new(synth)))?;
        self.send(EngineCommand::SetPlayer(None))
    }

    /// Drop the sample and go back to the synth. Cancels a pending decode.
    pub fn unload_sample(&mut self) -> Result<(), EngineError> {
        if self.closed {
            return Ok(());
        }
        self.loader.cancel();
        self.pending_ref = None;
        if self.sample.is_some() {
            log::info!(target: "session", "sample unloaded");
            self.detach_sample()?;
        }
        Ok(())
    }

    pub fn source_kind(&self) -> SourceKind {
        if self.sample.is_some() { SourceKind::Sampler } else { SourceKind::Synth }
    }

    pub fn sample_label(&self) -> Option<&str> {
        self.sample.as_ref().map(|s| s.label.as_str())
    }

    pub fn sample_duration(&self) -> Option<f64> {
        self.sample.as_ref().map(|s| s.buffer.duration_seconds())
    }

    /// Play the whole sample from the top. Returns false when none is loaded.
    pub fn play_full_sample(&mut self) -> Result<bool, EngineError> {
        if self.closed || self.sample.is_none() {
            return Ok(false);
        }
        self.send(EngineCommand::PlayFullSample)?;
        Ok(true)
    }

    pub fn stop_full_sample(&mut self) -> Result<(), EngineError> {
        self.send(EngineCommand::StopFullSample)
    }

    pub fn is_sample_playing(&self) -> bool {
        !self.closed && self.status.is_sample_playing()
    }

    // ── Snapshots ───────────────────────────────────────────

    /// Capture the full state under `name`, stamped now.
    pub fn snapshot(&self, name: &str) -> Result<Snapshot, EngineError> {
        self.snapshot_at(name, now_millis())
    }

    pub fn snapshot_at(&self, name: &str, created_at: u64) -> Result<Snapshot, EngineError> {
        let name = validate_name(name)?;
        Ok(Snapshot {
            version: SNAPSHOT_VERSION,
            id: snapshot_id(name, created_at),
            name: name.to_string(),
            created_at,
            steps: self.transport.steps,
            bpm: self.transport.bpm,
            octave: self.transport.octave,
            pitch: self.transport.pitch,
            grid: self.grid.clone(),
            fx: FxState::capture(|k| self.chain.is_enabled(k), self.chain.params()),
            sample_ref: self.sample.as_ref().and_then(|s| s.reference.clone()),
        })
    }

    /// Replace the live configuration with `snapshot`.
    ///
    /// Applied in order: step count, grid, bpm/octave/pitch, enabled set
    /// and parameters, then exactly one chain rebuild. Playback state is
    /// left alone.
    pub fn load(&mut self, snapshot: &Snapshot) -> Result<LoadOutcome, EngineError> {
        if self.closed {
            return Ok(LoadOutcome {
                sample: None,
                decoding: false,
            });
        }

        self.transport.steps = snapshot.steps;
        self.grid = Grid::from_rows(snapshot.grid.rows(), snapshot.steps);
        self.transport.bpm = clamp_bpm(snapshot.bpm);
        self.transport.octave = clamp_octave(snapshot.octave);
        self.transport.pitch = clamp_pitch(snapshot.pitch);

        let params = self.chain.params();
        for kind in EffectKind::ALL {
            for (spec, &value) in kind.schema().iter().zip(snapshot.fx.values(kind)) {
                params.set(kind, spec.name, value)?;
            }
        }
        for kind in EffectKind::ALL {
            self.chain.set_enabled(kind, snapshot.fx.is_enabled(kind));
        }

        self.push_pattern()?;
        self.send(EngineCommand::SetBpm(self.transport.bpm))?;
        self.collect_retired();
        self.chain.rebuild()?;
        log::info!(target: "session", "loaded snapshot '{}' ({})", snapshot.name, snapshot.id);

        let mut decoding = false;
        if let Some(reference) = &snapshot.sample_ref {
            if let Some(bytes) = reference.inline_bytes() {
                self.load_sample(format!("{} (inline)", snapshot.name), bytes?, Some(reference.clone()))?;
                decoding = true;
            }
        }
        Ok(LoadOutcome {
            sample: snapshot.sample_ref.clone(),
            decoding,
        })
    }

    /// Capture and persist. The name is checked before any I/O, and a
    /// failed save leaves the session untouched.
    pub async fn save_to<S: SnapshotStore>(&self, store: &S, name: &str) -> Result<SnapshotHandle, EngineError> {
        let snapshot = self.snapshot(name)?;
        match store.save(&snapshot).await {
            Ok(handle) => {
                log::info!(target: "session", "saved '{}' as {handle}", snapshot.name);
                Ok(handle)
            }
            Err(e) => {
                log::warn!(target: "session", "save of '{}' failed: {e}", snapshot.name);
                Err(match e {
                    EngineError::Storage(_) => e,
                    other => EngineError::Storage(other.to_string()),
                })
            }
        }
    }

    /// Snapshots saved under this store's scope, newest first.
    pub async fn list_from<S: SnapshotStore>(&self, store: &S) -> Result<Vec<SnapshotListing>, EngineError> {
        store.list(store.scope()).await
    }

    /// Fetch and apply.
    pub async fn load_from<S: SnapshotStore>(
        &mut self,
        store: &S,
        handle: &SnapshotHandle,
    ) -> Result<LoadOutcome, EngineError> {
        let snapshot = store.load(handle).await?;
        self.load(&snapshot)
    }

    // ── Output and teardown ─────────────────────────────────

    /// Keep a running device stream; it is closed by [`close`](Self::close).
    #[cfg(feature = "device")]
    pub fn attach_output(&mut self, stream: crate::output::OutputStream) {
        self.output = Some(stream);
    }

    /// Stop everything and release every audio resource. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        // Shutdown first so the callback goes quiet before anything else.
        if let Err(e) = send_command(&self.commands, EngineCommand::Shutdown) {
            log::debug!(target: "session", "shutdown not delivered: {e}");
        }
        #[cfg(feature = "device")]
        {
            self.output = None;
        }
        if let Err(e) = self.chain.release() {
            log::debug!(target: "session", "chain release not delivered: {e}");
        }
        self.loader.cancel();
        self.pending_ref = None;
        self.sample = None;
        self.transport.playing = false;
        self.closed = true;
        self.collect_retired();
        log::info!(target: "session", "session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
