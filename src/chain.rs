//! Signal chain manager.
//!
//! The chain is described rather than wired by hand: nine
//! [`StageDescriptor`]s (one per [`EffectKind`], each with an enabled flag)
//! and a pure function, [`active_chain`], that turns them into the ordered
//! list of stages to run. A [`ChainRenderer`] turns that list into sound;
//! [`DspRenderer`] builds real-time stage nodes and hands the finished chain
//! to the audio thread in one message, so the callback always sees either
//! the old chain or the new one.
//!
//! ```text
//! input bus → lowpass → eq3 → eq8 → comp → chorus → delay → reverb → distortion → bitcrush → meter → output
//! ```
//!
//! (only enabled stages take part; the meter and output are always last)

use std::mem;
use std::sync::Arc;

use crossbeam_channel::Sender;

use crate::dsp::engine::{EngineCommand, send_command};
use crate::dsp::meter::MeterLevels;
use crate::dsp::stage::{ActiveChain, StageNode};
use crate::error::EngineError;
use crate::params::{EffectKind, ParameterStore};

/// One stage kind and whether it takes part in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageDescriptor {
    pub kind: EffectKind,
    pub enabled: bool,
}

/// Every kind in canonical order with its default enabled flag.
pub fn default_descriptors() -> [StageDescriptor; 9] {
    EffectKind::ALL.map(|kind| StageDescriptor {
        kind,
        enabled: kind.default_enabled(),
    })
}

/// The enabled kinds in canonical order. Input order and duplicates are
/// irrelevant.
pub fn active_chain(descriptors: &[StageDescriptor]) -> Vec<EffectKind> {
    let mut kinds: Vec<EffectKind> = descriptors.iter().filter(|d| d.enabled).map(|d| d.kind).collect();
    kinds.sort_by_key(|k| k.index());
    kinds.dedup();
    kinds
}

// ── Wiring record ───────────────────────────────────────────

/// A node in the physical signal path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    InputBus,
    Stage(EffectKind),
    Meter,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub from: Endpoint,
    pub to: Endpoint,
}

/// Every connection currently in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Wiring {
    links: Vec<Link>,
}

impl Wiring {
    /// Series wiring: input bus, each stage, meter, output.
    pub fn for_chain(kinds: &[EffectKind]) -> Self {
        let nodes: Vec<Endpoint> = std::iter::once(Endpoint::InputBus)
            .chain(kinds.iter().map(|&k| Endpoint::Stage(k)))
            .chain([Endpoint::Meter, Endpoint::Output])
            .collect();
        let links = nodes.windows(2).map(|w| Link { from: w[0], to: w[1] }).collect();
        Wiring { links }
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Remove every connection.
    pub fn clear(&mut self) {
        self.links.clear();
    }

    /// The stages reached from the input bus, in signal order.
    pub fn stages(&self) -> Vec<EffectKind> {
        self.links
            .iter()
            .filter_map(|l| match l.to {
                Endpoint::Stage(k) => Some(k),
                _ => None,
            })
            .collect()
    }

    /// True when no endpoint feeds, or is fed by, more than one link.
    pub fn is_series(&self) -> bool {
        let mut seen_from = Vec::with_capacity(self.links.len());
        let mut seen_to = Vec::with_capacity(self.links.len());
        for link in &self.links {
            if seen_from.contains(&link.from) || seen_to.contains(&link.to) {
                return false;
            }
            seen_from.push(link.from);
            seen_to.push(link.to);
        }
        true
    }
}

// ── Renderer interface ──────────────────────────────────────

/// Turns an ordered stage list into a running signal path on some backend.
pub trait ChainRenderer {
    type Stage;

    fn build_stage(&mut self, kind: EffectKind) -> Result<Self::Stage, EngineError>;

    /// A pass-through standing in for a stage that failed to build.
    fn bypass_stage(&mut self, kind: EffectKind) -> Self::Stage;

    /// Replace whatever is running with `stages`, connected as `wiring` says.
    fn install(&mut self, stages: Vec<Self::Stage>, wiring: &Wiring) -> Result<(), EngineError>;

    /// Disconnect everything.
    fn release(&mut self) -> Result<(), EngineError>;
}

/// Builds [`StageNode`]s and ships each finished chain to the audio thread.
#[derive(Debug)]
pub struct DspRenderer {
    sample_rate: f64,
    commands: Sender<EngineCommand>,
    levels: Arc<MeterLevels>,
}

impl DspRenderer {
    pub fn new(sample_rate: f64, commands: Sender<EngineCommand>, levels: Arc<MeterLevels>) -> Self {
        DspRenderer {
            sample_rate,
            commands,
            levels,
        }
    }
}

impl ChainRenderer for DspRenderer {
    type Stage = StageNode;

    fn build_stage(&mut self, kind: EffectKind) -> Result<StageNode, EngineError> {
        StageNode::build(kind, self.sample_rate)
    }

    fn bypass_stage(&mut self, kind: EffectKind) -> StageNode {
        StageNode::bypass(kind)
    }

    fn install(&mut self, stages: Vec<StageNode>, wiring: &Wiring) -> Result<(), EngineError> {
        debug_assert_eq!(
            stages.iter().map(StageNode::kind).collect::<Vec<_>>(),
            wiring.stages(),
            "stage list and wiring disagree"
        );
        let chain = ActiveChain::new(stages, Arc::clone(&self.levels));
        send_command(&self.commands, EngineCommand::InstallChain(Box::new(chain)))
    }

    fn release(&mut self) -> Result<(), EngineError> {
        let sent = send_command(&self.commands, EngineCommand::DetachChain);
        self.levels.clear();
        sent
    }
}

// ── Manager ─────────────────────────────────────────────────

/// Owns the enabled set and the parameter store, and rebuilds the signal
/// path on request.
#[derive(Debug)]
pub struct ChainManager<R: ChainRenderer> {
    descriptors: [StageDescriptor; 9],
    params: ParameterStore,
    renderer: R,
    wiring: Wiring,
    active: Vec<EffectKind>,
    bypassed: Vec<EffectKind>,
    rebuilds: u64,
}

impl<R: ChainRenderer> ChainManager<R> {
    pub fn new(renderer: R, params: ParameterStore) -> Self {
        ChainManager {
            descriptors: default_descriptors(),
            params,
            renderer,
            wiring: Wiring::default(),
            active: Vec::new(),
            bypassed: Vec::new(),
            rebuilds: 0,
        }
    }

    /// Set `kind`'s membership. Returns whether anything changed; does not
    /// rebuild.
    pub fn set_enabled(&mut self, kind: EffectKind, enabled: bool) -> bool {
        let d = &mut self.descriptors[kind.index()];
        let changed = d.enabled != enabled;
        d.enabled = enabled;
        changed
    }

    pub fn is_enabled(&self, kind: EffectKind) -> bool {
        self.descriptors[kind.index()].enabled
    }

    /// Enabled kinds in canonical order.
    pub fn enabled_set(&self) -> Vec<EffectKind> {
        active_chain(&self.descriptors)
    }

    pub fn descriptors(&self) -> &[StageDescriptor] {
        &self.descriptors
    }

    /// Clamp and store a parameter; running stages pick it up on their next block.
    pub fn set_parameter(&self, kind: EffectKind, name: &str, value: f64) -> Result<f64, EngineError> {
        self.params.set(kind, name, value)
    }

    pub fn params(&self) -> &ParameterStore {
        &self.params
    }

    /// Tear down the current path and wire `canonical order ∩ enabled`.
    ///
    /// A stage that fails to build is replaced by a bypass. If the renderer
    /// refuses the new chain, the previous wiring record is kept.
    pub fn rebuild(&mut self) -> Result<&[EffectKind], EngineError> {
        let kinds = active_chain(&self.descriptors);
        let previous = mem::take(&mut self.wiring);

        let mut stages = Vec::with_capacity(kinds.len());
        let mut bypassed = Vec::new();
        for &kind in &kinds {
            match self.renderer.build_stage(kind) {
                Ok(stage) => stages.push(stage),
                Err(e) => {
                    log::warn!(target: "chain", "bypassing '{}': {e}", kind.tag());
                    bypassed.push(kind);
                    stages.push(self.renderer.bypass_stage(kind));
                }
            }
        }

        let wiring = Wiring::for_chain(&kinds);
        if let Err(e) = self.renderer.install(stages, &wiring) {
            self.wiring = previous;
            return Err(e);
        }

        self.wiring = wiring;
        self.active = kinds;
        self.bypassed = bypassed;
        self.rebuilds += 1;
        log::debug!(
            target: "chain",
            "rebuild #{}: [{}]",
            self.rebuilds,
            self.active.iter().map(|k| k.tag()).collect::<Vec<_>>().join(" → ")
        );
        Ok(&self.active)
    }

    /// True when the enabled flags describe a different chain than the one
    /// last installed (never built, or the last rebuild was refused).
    pub fn is_stale(&self) -> bool {
        self.rebuilds == 0 || active_chain(&self.descriptors) != self.active
    }

    /// Kinds in the most recently installed chain.
    pub fn active(&self) -> &[EffectKind] {
        &self.active
    }

    /// Kinds standing in as pass-through after the last rebuild.
    pub fn bypassed(&self) -> &[EffectKind] {
        &self.bypassed
    }

    pub fn wiring(&self) -> &Wiring {
        &self.wiring
    }

    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Disconnect everything and forget the wiring.
    pub fn release(&mut self) -> Result<(), EngineError> {
        self.wiring.clear();
        self.active.clear();
        self.bypassed.clear();
        self.renderer.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records what it was asked to install.
    #[derive(Debug, Default)]
    struct Recorder {
        installs: Vec<Vec<(EffectKind, bool)>>,
        failing: Option<EffectKind>,
        refuse_install: bool,
        released: bool,
    }

    impl ChainRenderer for Recorder {
        type Stage = (EffectKind, bool);

        fn build_stage(&mut self, kind: EffectKind) -> Result<Self::Stage, EngineError> {
            if self.failing == Some(kind) {
                return Err(EngineError::StageInit {
                    kind,
                    reason: "test failure".into(),
                });
            }
            Ok((kind, false))
        }

        fn bypass_stage(&mut self, kind: EffectKind) -> Self::Stage {
            (kind, true)
        }

        fn install(&mut self, stages: Vec<Self::Stage>, wiring: &Wiring) -> Result<(), EngineError> {
            if self.refuse_install {
                return Err(EngineError::Device("refused".into()));
            }
            assert_eq!(stages.iter().map(|s| s.0).collect::<Vec<_>>(), wiring.stages());
            self.installs.push(stages);
            Ok(())
        }

        fn release(&mut self) -> Result<(), EngineError> {
            self.released = true;
            Ok(())
        }
    }

    fn manager() -> ChainManager<Recorder> {
        ChainManager::new(Recorder::default(), ParameterStore::new())
    }

    #[test]
    fn defaults_enable_eq3_and_comp() {
        let mut chain = manager();
        assert_eq!(chain.rebuild().unwrap(), &[EffectKind::Eq3, EffectKind::Compressor]);
    }

    #[test]
    fn every_subset_follows_canonical_order() {
        let mut chain = manager();
        for mask in 0u32..512 {
            for kind in EffectKind::ALL {
                chain.set_enabled(kind, mask & (1 << kind.index()) != 0);
            }
            let expected: Vec<EffectKind> =
                EffectKind::ALL.into_iter().filter(|k| mask & (1 << k.index()) != 0).collect();
            let first = chain.rebuild().unwrap().to_vec();
            let second = chain.rebuild().unwrap().to_vec();
            assert_eq!(first, expected, "mask {mask:#011b}");
            assert_eq!(first, second, "rebuild must be idempotent");
            assert_eq!(chain.wiring().stages(), expected);
            assert!(chain.wiring().is_series(), "mask {mask:#011b} wired a node twice");
        }
        assert_eq!(chain.rebuild_count(), 1024);
    }

    #[test]
    fn enable_order_is_irrelevant() {
        let mut a = manager();
        let mut b = manager();
        for kind in [EffectKind::BitCrusher, EffectKind::Lowpass, EffectKind::Reverb] {
            a.set_enabled(kind, true);
        }
        for kind in [EffectKind::Reverb, EffectKind::BitCrusher, EffectKind::Lowpass] {
            b.set_enabled(kind, true);
        }
        assert_eq!(a.rebuild().unwrap(), b.rebuild().unwrap());
    }

    #[test]
    fn set_enabled_is_idempotent() {
        let mut chain = manager();
        assert!(chain.set_enabled(EffectKind::Delay, true));
        assert!(!chain.set_enabled(EffectKind::Delay, true));
        assert!(chain.is_enabled(EffectKind::Delay));
        assert!(!chain.set_enabled(EffectKind::Chorus, false));
    }

    #[test]
    fn wiring_ends_in_meter_and_output() {
        let wiring = Wiring::for_chain(&[EffectKind::Delay]);
        assert_eq!(
            wiring.links(),
            &[
                Link { from: Endpoint::InputBus, to: Endpoint::Stage(EffectKind::Delay) },
                Link { from: Endpoint::Stage(EffectKind::Delay), to: Endpoint::Meter },
                Link { from: Endpoint::Meter, to: Endpoint::Output },
            ]
        );
        // An empty chain still reaches the output through the meter.
        assert_eq!(Wiring::for_chain(&[]).links().len(), 2);
    }

    #[test]
    fn failing_stage_is_bypassed_not_fatal() {
        let mut chain = ChainManager::new(
            Recorder {
                failing: Some(EffectKind::Reverb),
                ..Recorder::default()
            },
            ParameterStore::new(),
        );
        chain.set_enabled(EffectKind::Reverb, true);
        chain.set_enabled(EffectKind::Delay, true);
        let kinds = chain.rebuild().unwrap().to_vec();
        assert_eq!(
            kinds,
            vec![EffectKind::Eq3, EffectKind::Compressor, EffectKind::Delay, EffectKind::Reverb]
        );
        assert_eq!(chain.bypassed(), &[EffectKind::Reverb]);
        let installed = chain.renderer().installs.last().unwrap();
        assert_eq!(installed.iter().filter(|s| s.1).count(), 1);
        assert_eq!(installed[3], (EffectKind::Reverb, true));
    }

    #[test]
    fn refused_install_keeps_previous_wiring() {
        let mut chain = manager();
        chain.rebuild().unwrap();
        let before = chain.wiring().clone();
        chain.renderer.refuse_install = true;
        chain.set_enabled(EffectKind::Lowpass, true);
        assert!(chain.rebuild().is_err());
        assert_eq!(chain.wiring(), &before);
        assert!(chain.is_stale());

        chain.renderer.refuse_install = false;
        chain.rebuild().unwrap();
        assert!(!chain.is_stale());
        assert_eq!(chain.active(), &[EffectKind::Lowpass, EffectKind::Eq3, EffectKind::Compressor]);
    }

    #[test]
    fn parameters_go_through_the_store() {
        let chain = manager();
        assert_eq!(chain.set_parameter(EffectKind::Delay, "feedback", 5.0).unwrap(), 0.9);
        let err = chain.set_parameter(EffectKind::Delay, "nope", 1.0).unwrap_err();
        assert!(matches!(err, EngineError::UnknownParameter { .. }));
        // Disabled stages keep their values.
        assert_eq!(chain.params().get(EffectKind::Delay, "feedback").unwrap(), 0.9);
    }

    #[test]
    fn release_clears_everything() {
        let mut chain = manager();
        chain.rebuild().unwrap();
        chain.release().unwrap();
        assert!(chain.wiring().is_empty());
        assert!(chain.active().is_empty());
        assert!(chain.renderer().released);
    }

    #[test]
    fn dsp_renderer_ships_a_whole_chain() {
        let (tx, rx) = crossbeam_channel::bounded(4);
        let levels = Arc::new(MeterLevels::default());
        let mut chain = ChainManager::new(DspRenderer::new(44100.0, tx, levels), ParameterStore::new());
        chain.set_enabled(EffectKind::Reverb, true);
        chain.rebuild().unwrap();
        match rx.try_recv().unwrap() {
            EngineCommand::InstallChain(active) => {
                assert_eq!(active.kinds(), vec![EffectKind::Eq3, EffectKind::Compressor, EffectKind::Reverb]);
            }
            other => panic!("unexpected command {other:?}"),
        }
        chain.release().unwrap();
        assert!(matches!(rx.try_recv().unwrap(), EngineCommand::DetachChain));
    }
}
