//! Real-time stage nodes and the assembled chain the audio thread runs.

use std::mem;
use std::sync::Arc;

use super::bitcrusher::BitCrusher;
use super::chorus::Chorus;
use super::compressor::Compressor;
use super::delay::Delay;
use super::distortion::Distortion;
use super::eq::{Eq3, Eq8};
use super::filter::LowpassStage;
use super::meter::{Meter, MeterLevels};
use super::reverb::Reverb;
use crate::error::EngineError;
use crate::params::{EffectKind, MAX_STAGE_PARAMS, ParamBank};

/// Processing state of one kind.
#[derive(Debug, Clone)]
enum StageDsp {
    Lowpass(LowpassStage),
    Eq3(Eq3),
    Eq8(Box<Eq8>),
    Compressor(Compressor),
    Chorus(Chorus),
    Delay(Delay),
    Reverb(Box<Reverb>),
    Distortion(Distortion),
    BitCrusher(BitCrusher),
    /// Input passed through untouched.
    Bypass,
}

/// One stage as placed in a chain. Re-reads its parameters from the bank
/// whenever the stage's version counter moves.
#[derive(Debug, Clone)]
pub struct StageNode {
    kind: EffectKind,
    seen_version: u64,
    params: [f64; MAX_STAGE_PARAMS],
    dsp: StageDsp,
}

impl StageNode {
    /// Allocate the DSP for `kind` at `sample_rate`.
    pub fn build(kind: EffectKind, sample_rate: f64) -> Result<Self, EngineError> {
        if !sample_rate.is_finite() || sample_rate < 1000.0 {
            return Err(EngineError::StageInit {
                kind,
                reason: format!("unusable sample rate {sample_rate}"),
            });
        }
        let dsp = match kind {
            EffectKind::Lowpass => StageDsp::Lowpass(LowpassStage::new(sample_rate)),
            EffectKind::Eq3 => StageDsp::Eq3(Eq3::new(sample_rate)),
            EffectKind::Eq8 => StageDsp::Eq8(Box::new(Eq8::new(sample_rate))),
            EffectKind::Compressor => StageDsp::Compressor(Compressor::new(sample_rate)),
            EffectKind::Chorus => StageDsp::Chorus(Chorus::new(sample_rate)),
            EffectKind::Delay => StageDsp::Delay(Delay::new(sample_rate)),
            EffectKind::Reverb => StageDsp::Reverb(Box::new(Reverb::new(sample_rate))),
            EffectKind::Distortion => StageDsp::Distortion(Distortion::new()),
            EffectKind::BitCrusher => StageDsp::BitCrusher(BitCrusher::new()),
        };
        Ok(StageNode {
            kind,
            seen_version: 0,
            params: [0.0; MAX_STAGE_PARAMS],
            dsp,
        })
    }

    /// A pass-through placeholder holding `kind`'s slot in the chain.
    pub fn bypass(kind: EffectKind) -> Self {
        StageNode {
            kind,
            seen_version: 0,
            params: [0.0; MAX_STAGE_PARAMS],
            dsp: StageDsp::Bypass,
        }
    }

    pub fn kind(&self) -> EffectKind {
        self.kind
    }

    pub fn is_bypassed(&self) -> bool {
        matches!(self.dsp, StageDsp::Bypass)
    }

    fn sync(&mut self) {
        let p = &self.params;
        match &mut self.dsp {
            StageDsp::Lowpass(s) => s.sync(p),
            StageDsp::Eq3(s) => s.sync(p),
            StageDsp::Eq8(s) => s.sync(p),
            StageDsp::Compressor(s) => s.sync(p),
            StageDsp::Chorus(s) => s.sync(p),
            StageDsp::Delay(s) => s.sync(p),
            StageDsp::Reverb(s) => s.sync(p),
            StageDsp::Distortion(s) => s.sync(p),
            StageDsp::BitCrusher(s) => s.sync(p),
            StageDsp::Bypass => {}
        }
    }

    /// Process one block in place.
    pub fn process(&mut self, bank: &ParamBank, left: &mut [f32], right: &mut [f32]) {
        let slot = bank.slot(self.kind);
        if slot.version() != self.seen_version {
            self.seen_version = slot.read(&mut self.params);
            self.sync();
        }
        match &mut self.dsp {
            StageDsp::Lowpass(s) => s.process_block(left, right),
            StageDsp::Eq3(s) => s.process_block(left, right),
            StageDsp::Eq8(s) => s.process_block(left, right),
            StageDsp::Compressor(s) => s.process_block(left, right),
            StageDsp::Chorus(s) => s.process_block(left, right),
            StageDsp::Delay(s) => s.process_block(left, right),
            StageDsp::Reverb(s) => s.process_block(left, right),
            StageDsp::Distortion(s) => s.process_block(left, right),
            StageDsp::BitCrusher(s) => s.process_block(left, right),
            StageDsp::Bypass => {}
        }
    }

    /// Clear delay lines and filter state.
    pub fn reset(&mut self) {
        match &mut self.dsp {
            StageDsp::Lowpass(s) => s.reset(),
            StageDsp::Eq3(s) => s.reset(),
            StageDsp::Eq8(s) => s.reset(),
            StageDsp::Compressor(s) => s.reset(),
            StageDsp::Chorus(s) => s.reset(),
            StageDsp::Delay(s) => s.reset(),
            StageDsp::Reverb(s) => s.reset(),
            StageDsp::Distortion(_) | StageDsp::BitCrusher(_) | StageDsp::Bypass => {}
        }
    }
}

/// A fully built chain: enabled stages in canonical order, then the meter.
///
/// Built on the control path and handed to the audio thread whole, so the
/// callback only ever sees a complete chain.
#[derive(Debug, Clone)]
pub struct ActiveChain {
    stages: Vec<StageNode>,
    meter: Meter,
}

impl ActiveChain {
    pub fn new(stages: Vec<StageNode>, levels: Arc<MeterLevels>) -> Self {
        ActiveChain {
            stages,
            meter: Meter::new(levels),
        }
    }

    /// Just the meter: what plays before the first rebuild.
    pub fn empty(levels: Arc<MeterLevels>) -> Self {
        Self::new(Vec::new(), levels)
    }

    pub fn kinds(&self) -> Vec<EffectKind> {
        self.stages.iter().map(StageNode::kind).collect()
    }

    pub fn stages(&self) -> &[StageNode] {
        &self.stages
    }

    /// Take over the running nodes of every kind `previous` also runs, so
    /// stages that stay enabled keep their delay lines, tanks and filter
    /// memory. `previous` is left holding the unused fresh nodes. Swaps
    /// only; nothing is allocated or freed.
    pub fn carry_over(&mut self, previous: &mut ActiveChain) {
        for stage in self.stages.iter_mut().filter(|s| !s.is_bypassed()) {
            let running = previous
                .stages
                .iter_mut()
                .find(|old| old.kind == stage.kind && !old.is_bypassed());
            if let Some(old) = running {
                mem::swap(stage, old);
            }
        }
    }

    pub fn process(&mut self, bank: &ParamBank, left: &mut [f32], right: &mut [f32]) {
        for stage in &mut self.stages {
            stage.process(bank, left, right);
        }
        self.meter.process_block(left, right);
    }

    pub fn reset(&mut self) {
        self.stages.iter_mut().for_each(StageNode::reset);
    }
}
