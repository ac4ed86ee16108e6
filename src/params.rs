//! Parameter store — the central schema of effect kinds, their parameters,
//! ranges and defaults, plus the lock-free bank the audio thread reads.
//!
//! Every write from the control path goes through [`ParameterStore::set`],
//! which validates the name against the schema and clamps the value before
//! it can reach a stage. The audio thread only ever reads.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Most parameters any stage declares (the 8-band EQ).
pub const MAX_STAGE_PARAMS: usize = 8;

/// Fixed center frequencies of the 8-band EQ, in Hz.
pub const EQ8_FREQUENCIES: [f64; 8] = [60.0, 120.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0];

// ── Effect kinds ────────────────────────────────────────────

/// One of the nine fixed effect stages. Declaration order is the
/// canonical chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EffectKind {
    #[serde(rename = "lowpass")]
    Lowpass,
    #[serde(rename = "eq3")]
    Eq3,
    #[serde(rename = "eq8")]
    Eq8,
    #[serde(rename = "comp")]
    Compressor,
    #[serde(rename = "chorus")]
    Chorus,
    #[serde(rename = "delay")]
    Delay,
    #[serde(rename = "reverb")]
    Reverb,
    #[serde(rename = "distortion")]
    Distortion,
    #[serde(rename = "bitcrush")]
    BitCrusher,
}

impl EffectKind {
    /// All kinds in canonical order: frequency shaping, dynamics,
    /// modulation/time-based, then nonlinear/lossy.
    pub const ALL: [EffectKind; 9] = [
        EffectKind::Lowpass,
        EffectKind::Eq3,
        EffectKind::Eq8,
        EffectKind::Compressor,
        EffectKind::Chorus,
        EffectKind::Delay,
        EffectKind::Reverb,
        EffectKind::Distortion,
        EffectKind::BitCrusher,
    ];

    /// Position in the canonical order.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Serialized name, as used in snapshot documents.
    pub fn tag(self) -> &'static str {
        match self {
            EffectKind::Lowpass => "lowpass",
            EffectKind::Eq3 => "eq3",
            EffectKind::Eq8 => "eq8",
            EffectKind::Compressor => "comp",
            EffectKind::Chorus => "chorus",
            EffectKind::Delay => "delay",
            EffectKind::Reverb => "reverb",
            EffectKind::Distortion => "distortion",
            EffectKind::BitCrusher => "bitcrush",
        }
    }

    pub fn from_tag(tag: &str) -> Option<EffectKind> {
        EffectKind::ALL.iter().copied().find(|k| k.tag() == tag)
    }

    /// Whether the stage is in the chain of a fresh session.
    pub fn default_enabled(self) -> bool {
        matches!(self, EffectKind::Eq3 | EffectKind::Compressor)
    }

    /// Declared parameters of this kind.
    pub fn schema(self) -> &'static [ParamSpec] {
        match self {
            EffectKind::Lowpass => LOWPASS,
            EffectKind::Eq3 => EQ3,
            EffectKind::Eq8 => EQ8,
            EffectKind::Compressor => COMPRESSOR,
            EffectKind::Chorus => CHORUS,
            EffectKind::Delay => DELAY,
            EffectKind::Reverb => REVERB,
            EffectKind::Distortion => DISTORTION,
            EffectKind::BitCrusher => BITCRUSHER,
        }
    }

    /// Index of a named parameter within [`schema`](Self::schema).
    pub fn param_index(self, name: &str) -> Option<usize> {
        self.schema().iter().position(|p| p.name == name)
    }
}

// ── Schema ──────────────────────────────────────────────────

/// Declared range and default of one stage parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub min: f64,
    pub max: f64,
    pub default: f64,
    /// Integer-valued parameters are rounded after clamping.
    pub integer: bool,
}

impl ParamSpec {
    const fn new(name: &'static str, min: f64, max: f64, default: f64) -> Self {
        ParamSpec { name, min, max, default, integer: false }
    }

    const fn integer(name: &'static str, min: f64, max: f64, default: f64) -> Self {
        ParamSpec { name, min, max, default, integer: true }
    }

    /// Clamp (and round, if integer) a finite value into range.
    pub fn clamp(&self, value: f64) -> f64 {
        let v = value.clamp(self.min, self.max);
        if self.integer { v.round() } else { v }
    }
}

const LOWPASS: &[ParamSpec] = &[
    ParamSpec::new("frequency", 200.0, 16000.0, 14000.0),
    ParamSpec::new("Q", 0.0, 12.0, 0.7),
];

const EQ3: &[ParamSpec] = &[
    ParamSpec::new("low", -12.0, 12.0, 0.0),
    ParamSpec::new("mid", -12.0, 12.0, 0.0),
    ParamSpec::new("high", -12.0, 12.0, 0.0),
    ParamSpec::new("lowFreq", 60.0, 800.0, 200.0),
    ParamSpec::new("highFreq", 1000.0, 6000.0, 2000.0),
];

const EQ8: &[ParamSpec] = &[
    ParamSpec::new("g60", -12.0, 12.0, 0.0),
    ParamSpec::new("g120", -12.0, 12.0, 0.0),
    ParamSpec::new("g250", -12.0, 12.0, 0.0),
    ParamSpec::new("g500", -12.0, 12.0, 0.0),
    ParamSpec::new("g1000", -12.0, 12.0, 0.0),
    ParamSpec::new("g2000", -12.0, 12.0, 0.0),
    ParamSpec::new("g4000", -12.0, 12.0, 0.0),
    ParamSpec::new("g8000", -12.0, 12.0, 0.0),
];

const COMPRESSOR: &[ParamSpec] = &[
    ParamSpec::new("threshold", -60.0, 0.0, -24.0),
    ParamSpec::new("ratio", 1.0, 20.0, 4.0),
    ParamSpec::new("attack", 0.0, 0.1, 0.003),
    ParamSpec::new("release", 0.0, 1.0, 0.25),
];

const CHORUS: &[ParamSpec] = &[
    ParamSpec::new("wet", 0.0, 1.0, 0.25),
    ParamSpec::new("frequency", 0.1, 5.0, 1.5),
    ParamSpec::new("depth", 0.0, 1.0, 0.5),
];

const DELAY: &[ParamSpec] = &[
    ParamSpec::new("wet", 0.0, 1.0, 0.2),
    ParamSpec::new("feedback", 0.0, 0.9, 0.25),
    ParamSpec::new("delayTime", 0.0, 0.6, 0.25),
];

const REVERB: &[ParamSpec] = &[
    ParamSpec::new("wet", 0.0, 1.0, 0.25),
    ParamSpec::new("decay", 0.1, 8.0, 2.8),
];

const DISTORTION: &[ParamSpec] = &[
    ParamSpec::new("wet", 0.0, 1.0, 0.15),
    ParamSpec::new("amount", 0.0, 1.0, 0.2),
];

const BITCRUSHER: &[ParamSpec] = &[
    ParamSpec::new("wet", 0.0, 1.0, 0.2),
    ParamSpec::integer("bits", 1.0, 16.0, 6.0),
];

// ── Lock-free bank ──────────────────────────────────────────

/// An `f64` stored as its bit pattern in an `AtomicU64`.
#[derive(Debug)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(v: f64) -> Self {
        AtomicF64(AtomicU64::new(v.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, v: f64) {
        self.0.store(v.to_bits(), Ordering::Relaxed);
    }
}

/// Current parameter values of one stage.
#[derive(Debug)]
pub struct StageSlot {
    values: [AtomicF64; MAX_STAGE_PARAMS],
    version: AtomicU64,
}

impl StageSlot {
    fn new(kind: EffectKind) -> Self {
        let schema = kind.schema();
        StageSlot {
            values: std::array::from_fn(|i| AtomicF64::new(schema.get(i).map_or(0.0, |p| p.default))),
            version: AtomicU64::new(1),
        }
    }

    /// Monotonic counter bumped on every write.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn get(&self, index: usize) -> f64 {
        self.values[index].load()
    }

    /// Copy all values into `out`, returning the version they belong to.
    pub fn read(&self, out: &mut [f64; MAX_STAGE_PARAMS]) -> u64 {
        let version = self.version();
        for (dst, src) in out.iter_mut().zip(self.values.iter()) {
            *dst = src.load();
        }
        version
    }

    fn write(&self, index: usize, value: f64) {
        self.values[index].store(value);
        self.version.fetch_add(1, Ordering::Release);
    }
}

/// Shared, lock-free parameter values for all nine stages.
#[derive(Debug)]
pub struct ParamBank {
    slots: [StageSlot; 9],
}

impl ParamBank {
    fn new() -> Self {
        ParamBank {
            slots: std::array::from_fn(|i| StageSlot::new(EffectKind::ALL[i])),
        }
    }

    pub fn slot(&self, kind: EffectKind) -> &StageSlot {
        &self.slots[kind.index()]
    }
}

// ── Store ───────────────────────────────────────────────────

/// Control-path handle to every stage's parameters, enabled or not.
///
/// Disabled stages keep their values, so toggling a stage off and on
/// restores what it had.
#[derive(Debug, Clone)]
pub struct ParameterStore {
    bank: Arc<ParamBank>,
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterStore {
    pub fn new() -> Self {
        ParameterStore {
            bank: Arc::new(ParamBank::new()),
        }
    }

    /// The bank shared with the real-time stages.
    pub fn bank(&self) -> Arc<ParamBank> {
        Arc::clone(&self.bank)
    }

    pub fn schema(&self, kind: EffectKind) -> &'static [ParamSpec] {
        kind.schema()
    }

    pub fn get(&self, kind: EffectKind, name: &str) -> Result<f64, EngineError> {
        let index = Self::lookup(kind, name)?;
        Ok(self.bank.slot(kind).get(index))
    }

    /// Validate, clamp and apply a value. Returns the value actually applied.
    pub fn set(&self, kind: EffectKind, name: &str, value: f64) -> Result<f64, EngineError> {
        let index = Self::lookup(kind, name)?;
        if !value.is_finite() {
            return Err(EngineError::OutOfRange {
                what: format!("{}.{}", kind.tag(), name),
                value,
            });
        }
        let spec = &kind.schema()[index];
        let applied = spec.clamp(value);
        if applied != value {
            log::debug!(target: "params", "{}.{name}: {value} clamped to {applied}", kind.tag());
        }
        self.bank.slot(kind).write(index, applied);
        Ok(applied)
    }

    /// `(name, value)` pairs of one stage, in schema order.
    pub fn values(&self, kind: EffectKind) -> Vec<(&'static str, f64)> {
        let slot = self.bank.slot(kind);
        kind.schema()
            .iter()
            .enumerate()
            .map(|(i, spec)| (spec.name, slot.get(i)))
            .collect()
    }

    /// Restore one stage to its declared defaults.
    pub fn reset(&self, kind: EffectKind) {
        let slot = self.bank.slot(kind);
        for (i, spec) in kind.schema().iter().enumerate() {
            slot.write(i, spec.default);
        }
    }

    pub fn reset_all(&self) {
        for kind in EffectKind::ALL {
            self.reset(kind);
        }
    }

    fn lookup(kind: EffectKind, name: &str) -> Result<usize, EngineError> {
        kind.param_index(name).ok_or_else(|| EngineError::UnknownParameter {
            kind,
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_order_matches_declaration() {
        for (i, kind) in EffectKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
        assert!(EffectKind::Lowpass < EffectKind::BitCrusher);
    }

    #[test]
    fn tags_round_trip() {
        for kind in EffectKind::ALL {
            assert_eq!(EffectKind::from_tag(kind.tag()), Some(kind));
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.tag()));
        }
        assert_eq!(EffectKind::from_tag("flanger"), None);
    }

    #[test]
    fn every_schema_fits_the_bank() {
        for kind in EffectKind::ALL {
            let schema = kind.schema();
            assert!(!schema.is_empty() && schema.len() <= MAX_STAGE_PARAMS);
            for spec in schema {
                assert!(spec.min <= spec.default && spec.default <= spec.max, "{}", spec.name);
            }
        }
    }

    #[test]
    fn fresh_store_holds_defaults() {
        let store = ParameterStore::new();
        assert_eq!(store.get(EffectKind::Lowpass, "frequency").unwrap(), 14000.0);
        assert_eq!(store.get(EffectKind::Compressor, "threshold").unwrap(), -24.0);
        assert_eq!(store.get(EffectKind::BitCrusher, "bits").unwrap(), 6.0);
    }

    #[test]
    fn set_clamps_to_declared_range() {
        let store = ParameterStore::new();
        let applied = store.set(EffectKind::Delay, "feedback", 1.5).unwrap();
        assert_eq!(applied, 0.9);
        assert_eq!(store.get(EffectKind::Delay, "feedback").unwrap(), 0.9);

        let applied = store.set(EffectKind::Eq8, "g250", -40.0).unwrap();
        assert_eq!(applied, -12.0);
    }

    #[test]
    fn integer_params_are_rounded() {
        let store = ParameterStore::new();
        assert_eq!(store.set(EffectKind::BitCrusher, "bits", 7.6).unwrap(), 8.0);
    }

    #[test]
    fn unknown_name_is_rejected() {
        let store = ParameterStore::new();
        let err = store.set(EffectKind::Reverb, "roomSize", 0.5).unwrap_err();
        assert!(matches!(
            err,
            EngineError::UnknownParameter { kind: EffectKind::Reverb, ref name } if name == "roomSize"
        ));
        // A name valid for another stage is still unknown here.
        assert!(store.get(EffectKind::Reverb, "feedback").is_err());
    }

    #[test]
    fn non_finite_is_out_of_range() {
        let store = ParameterStore::new();
        let err = store.set(EffectKind::Chorus, "wet", f64::NAN).unwrap_err();
        assert!(matches!(err, EngineError::OutOfRange { .. }));
        assert_eq!(store.get(EffectKind::Chorus, "wet").unwrap(), 0.25);
    }

    #[test]
    fn writes_bump_the_slot_version() {
        let store = ParameterStore::new();
        let bank = store.bank();
        let before = bank.slot(EffectKind::Eq3).version();
        store.set(EffectKind::Eq3, "mid", 3.0).unwrap();
        assert!(bank.slot(EffectKind::Eq3).version() > before);
        assert_eq!(bank.slot(EffectKind::Eq3).get(1), 3.0);
    }

    #[test]
    fn reset_restores_defaults() {
        let store = ParameterStore::new();
        store.set(EffectKind::Reverb, "decay", 6.0).unwrap();
        store.reset(EffectKind::Reverb);
        assert_eq!(store.get(EffectKind::Reverb, "decay").unwrap(), 2.8);
    }
}
