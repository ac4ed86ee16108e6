//! Snapshot documents.
//!
//! A [`Snapshot`] is everything needed to restore a session: transport
//! settings, the grid, every stage's enabled flag and parameters (disabled
//! stages included), and an optional reference to the loaded sample.
//!
//! Reading is lenient. Any field that is missing, `null`, of the wrong type
//! or non-finite falls back to its default, numbers are clamped into range
//! and unknown keys are ignored, so a document from an older or newer
//! writer still loads into a usable state.

use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

use crate::decode::SampleFormat;
use crate::error::EngineError;
use crate::grid::{Grid, StepCount};
use crate::params::{EQ8_FREQUENCIES, EffectKind, MAX_STAGE_PARAMS, ParameterStore};
use crate::transport::{DEFAULT_BPM, DEFAULT_OCTAVE, clamp_bpm, clamp_octave, clamp_pitch};

/// Schema version written by this crate.
pub const SNAPSHOT_VERSION: u32 = 1;

// ── Sample reference ────────────────────────────────────────

/// Where the sample that was loaded at save time can be found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SampleRef {
    /// Fetched by the caller.
    External { url: String },
    /// The file itself, base64 encoded.
    InlineFile { data: String, codec: SampleFormat },
    /// Hash-based lookup in some content store.
    ContentAddressed { hash: String, codec: SampleFormat },
}

impl SampleRef {
    pub fn inline(bytes: &[u8], codec: SampleFormat) -> Self {
        SampleRef::InlineFile {
            data: STANDARD.encode(bytes),
            codec,
        }
    }

    /// Reference `bytes` by their SHA-256.
    pub fn content_addressed(bytes: &[u8], codec: SampleFormat) -> Self {
        SampleRef::ContentAddressed {
            hash: hex(&Sha256::digest(bytes)),
            codec,
        }
    }

    /// The embedded file, for inline references.
    pub fn inline_bytes(&self) -> Option<Result<Vec<u8>, EngineError>> {
        match self {
            SampleRef::InlineFile { data, .. } => Some(
                STANDARD
                    .decode(data)
                    .map_err(|e| EngineError::Decode(format!("inline sample: {e}"))),
            ),
            _ => None,
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ── Effect state ────────────────────────────────────────────

/// Enabled flags and parameter values of all nine stages.
#[derive(Debug, Clone, PartialEq)]
pub struct FxState {
    enabled: [bool; 9],
    values: [[f64; MAX_STAGE_PARAMS]; 9],
}

impl Default for FxState {
    fn default() -> Self {
        let mut values = [[0.0; MAX_STAGE_PARAMS]; 9];
        for kind in EffectKind::ALL {
            for (i, spec) in kind.schema().iter().enumerate() {
                values[kind.index()][i] = spec.default;
            }
        }
        FxState {
            enabled: EffectKind::ALL.map(EffectKind::default_enabled),
            values,
        }
    }
}

impl FxState {
    /// Copy the live state.
    pub fn capture(enabled: impl Fn(EffectKind) -> bool, params: &ParameterStore) -> Self {
        let mut fx = FxState::default();
        for kind in EffectKind::ALL {
            fx.enabled[kind.index()] = enabled(kind);
            for (i, (_, value)) in params.values(kind).into_iter().enumerate() {
                fx.values[kind.index()][i] = value;
            }
        }
        fx
    }

    pub fn is_enabled(&self, kind: EffectKind) -> bool {
        self.enabled[kind.index()]
    }

    pub fn set_enabled(&mut self, kind: EffectKind, enabled: bool) {
        self.enabled[kind.index()] = enabled;
    }

    /// Enabled kinds in canonical order.
    pub fn enabled_set(&self) -> Vec<EffectKind> {
        EffectKind::ALL.into_iter().filter(|&k| self.is_enabled(k)).collect()
    }

    /// `kind`'s values in schema order.
    pub fn values(&self, kind: EffectKind) -> &[f64] {
        &self.values[kind.index()][..kind.schema().len()]
    }

    pub fn get(&self, kind: EffectKind, name: &str) -> Option<f64> {
        kind.param_index(name).map(|i| self.values[kind.index()][i])
    }

    /// Store a clamped value; returns what was stored.
    pub fn set(&mut self, kind: EffectKind, name: &str, value: f64) -> Result<f64, EngineError> {
        let i = kind.param_index(name).ok_or_else(|| EngineError::UnknownParameter {
            kind,
            name: name.to_string(),
        })?;
        if !value.is_finite() {
            return Err(EngineError::OutOfRange {
                what: format!("{}.{name}", kind.tag()),
                value,
            });
        }
        let applied = kind.schema()[i].clamp(value);
        self.values[kind.index()][i] = applied;
        Ok(applied)
    }

    fn to_value(&self) -> Value {
        let mut fx = Map::new();
        let enabled: Map<String, Value> = EffectKind::ALL
            .iter()
            .map(|k| (k.tag().to_string(), Value::Bool(self.is_enabled(*k))))
            .collect();
        fx.insert("enabled".into(), Value::Object(enabled));
        for kind in EffectKind::ALL {
            let entry = if kind == EffectKind::Eq8 {
                json!(self.values(kind))
            } else {
                Value::Object(
                    kind.schema()
                        .iter()
                        .zip(self.values(kind))
                        .map(|(spec, &v)| (spec.name.to_string(), json!(v)))
                        .collect(),
                )
            };
            fx.insert(kind.tag().to_string(), entry);
        }
        Value::Object(fx)
    }

    /// Read an `fx` object, filling defaults for anything unusable.
    fn from_value(value: Option<&Value>) -> Self {
        let mut fx = FxState::default();
        let Some(obj) = value.and_then(Value::as_object) else {
            return fx;
        };

        if let Some(enabled) = obj.get("enabled").and_then(Value::as_object) {
            for kind in EffectKind::ALL {
                if let Some(flag) = enabled.get(kind.tag()).and_then(Value::as_bool) {
                    fx.enabled[kind.index()] = flag;
                }
            }
        }

        for kind in EffectKind::ALL {
            let Some(entry) = obj.get(kind.tag()) else {
                continue;
            };
            for (i, spec) in kind.schema().iter().enumerate() {
                let raw = match entry {
                    // eq8 is stored as a bare array of band gains
                    Value::Array(items) => items.get(i),
                    Value::Object(fields) => fields.get(spec.name),
                    _ => None,
                };
                if let Some(v) = raw.and_then(finite) {
                    fx.values[kind.index()][i] = spec.clamp(v);
                }
            }
        }
        fx
    }
}

impl Serialize for FxState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

/// Band labels of the 8-band EQ, for display.
pub fn eq8_band_labels() -> [String; 8] {
    EQ8_FREQUENCIES.map(|f| if f >= 1000.0 { format!("{}k", f / 1000.0) } else { format!("{f}") })
}

// ── Snapshot ────────────────────────────────────────────────

/// A saved session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawSnapshot")]
pub struct Snapshot {
    pub version: u32,
    pub id: String,
    pub name: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
    #[serde(serialize_with = "serialize_steps")]
    pub steps: StepCount,
    pub bpm: f64,
    pub octave: i32,
    pub pitch: i32,
    pub grid: Grid,
    pub fx: FxState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_ref: Option<SampleRef>,
}

fn serialize_steps<S: Serializer>(steps: &StepCount, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(steps.len() as u64)
}

impl Default for Snapshot {
    fn default() -> Self {
        Snapshot {
            version: SNAPSHOT_VERSION,
            id: String::new(),
            name: String::new(),
            created_at: 0,
            steps: StepCount::Sixteen,
            bpm: DEFAULT_BPM,
            octave: DEFAULT_OCTAVE,
            pitch: 0,
            grid: Grid::default(),
            fx: FxState::default(),
            sample_ref: None,
        }
    }
}

impl Snapshot {
    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and normalize. Only malformed JSON or a non-object document
    /// is an error.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, EngineError> {
        if !value.is_object() {
            return Err(EngineError::Document("snapshot must be a JSON object".into()));
        }
        Ok(serde_json::from_value(value)?)
    }
}

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// 32 hex characters, unique within the process.
pub fn snapshot_id(name: &str, created_at: u64) -> String {
    let n = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(created_at.to_le_bytes());
    hasher.update(n.to_le_bytes());
    let mut id = hex(&hasher.finalize());
    id.truncate(32);
    id
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    #[cfg(target_arch = "wasm32")]
    {
        js_now() as u64
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen::prelude::wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = Date, js_name = now)]
    fn js_now() -> f64;
}

// ── Lenient reading ─────────────────────────────────────────

/// Every field as raw JSON; [`Snapshot`] is built from this by filling
/// defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawSnapshot {
    version: Option<Value>,
    id: Option<Value>,
    name: Option<Value>,
    created_at: Option<Value>,
    steps: Option<Value>,
    bpm: Option<Value>,
    octave: Option<Value>,
    pitch: Option<Value>,
    grid: Option<Value>,
    fx: Option<Value>,
    sample_ref: Option<Value>,
    /// Older documents carried a bare URL.
    sample_url: Option<Value>,
}

fn finite(v: &Value) -> Option<f64> {
    v.as_f64().filter(|x| x.is_finite())
}

fn whole(v: Option<&Value>, default: i32) -> i32 {
    v.and_then(finite).map_or(default, |x| x.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32)
}

fn text(v: Option<&Value>) -> Option<String> {
    v.and_then(Value::as_str).map(str::to_string)
}

/// Epoch milliseconds for an RFC 3339 timestamp such as
/// `2024-05-26T23:12:03.000Z`. No offset reads as UTC; digits past
/// milliseconds are dropped.
pub(crate) fn parse_timestamp_millis(stamp: &str) -> Option<u64> {
    let stamp = stamp.trim();
    let b = stamp.as_bytes();
    if b.len() < 19 || b[4] != b'-' || b[7] != b'-' || !matches!(b[10], b'T' | b't' | b' ') || b[13] != b':' || b[16] != b':' {
        return None;
    }
    let field = |from: usize, to: usize| stamp.get(from..to).and_then(digits);
    let (year, month, day) = (field(0, 4)?, field(5, 7)?, field(8, 10)?);
    let (hour, minute, second) = (field(11, 13)?, field(14, 16)?, field(17, 19)?);
    if !(1..=12).contains(&month) || day == 0 || day > days_in_month(year, month) {
        return None;
    }
    if hour > 23 || minute > 59 || second > 60 {
        return None;
    }

    let mut rest = stamp.get(19..)?;
    let mut millis = 0;
    if let Some(fraction) = rest.strip_prefix('.') {
        let len = fraction.bytes().take_while(u8::is_ascii_digit).count();
        if len == 0 {
            return None;
        }
        millis = fraction.bytes().take(len.min(3)).chain(std::iter::repeat(b'0')).take(3)
            .fold(0, |acc, d| acc * 10 + i64::from(d - b'0'));
        rest = &fraction[len..];
    }
    let offset_minutes = match rest.as_bytes() {
        [] | [b'Z' | b'z'] => 0,
        [sign @ (b'+' | b'-'), _, _, b':', _, _] => {
            let hours = rest.get(1..3).and_then(digits)?;
            let minutes = rest.get(4..6).and_then(digits)?;
            if hours > 23 || minutes > 59 {
                return None;
            }
            if *sign == b'-' { -(hours * 60 + minutes) } else { hours * 60 + minutes }
        }
        _ => return None,
    };

    let seconds = days_from_civil(year, month, day) * 86_400 + hour * 3600 + minute * 60 + second - offset_minutes * 60;
    u64::try_from(seconds * 1000 + millis).ok()
}

fn digits(part: &str) -> Option<i64> {
    if part.is_empty() || !part.bytes().all(|c| c.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

fn days_in_month(year: i64, month: i64) -> i64 {
    let leap = year % 4 == 0 && (year % 100 != 0 || year % 400 == 0);
    match month {
        2 if leap => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

/// Days since 1970-01-01 in the proleptic Gregorian calendar.
fn days_from_civil(year: i64, month: i64, day: i64) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let doy = (153 * ((month + 9) % 12) + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

fn grid_rows(v: Option<&Value>) -> Vec<Vec<bool>> {
    let Some(rows) = v.and_then(Value::as_array) else {
        return Vec::new();
    };
    rows.iter()
        .map(|row| {
            row.as_array()
                .map(|cells| cells.iter().map(|c| c.as_bool().unwrap_or(false)).collect())
                .unwrap_or_default()
        })
        .collect()
}

impl From<RawSnapshot> for Snapshot {
    fn from(raw: RawSnapshot) -> Self {
        let version = raw
            .version
            .as_ref()
            .and_then(finite)
            .filter(|v| *v >= 1.0)
            .map_or(SNAPSHOT_VERSION, |v| v.min(u32::MAX as f64) as u32);
        if version > SNAPSHOT_VERSION {
            log::warn!(target: "session", "snapshot version {version} is newer than {SNAPSHOT_VERSION}; loading what is understood");
        }

        let steps = match raw.steps.as_ref().and_then(finite) {
            Some(n) if n == 32.0 => StepCount::ThirtyTwo,
            _ => StepCount::Sixteen,
        };
        let bpm = clamp_bpm(raw.bpm.as_ref().and_then(finite).unwrap_or(DEFAULT_BPM));
        let octave = clamp_octave(whole(raw.octave.as_ref(), DEFAULT_OCTAVE));
        let pitch = clamp_pitch(whole(raw.pitch.as_ref(), 0));
        let grid = Grid::from_rows(&grid_rows(raw.grid.as_ref()), steps);

        let sample_ref = raw
            .sample_ref
            .and_then(|v| serde_json::from_value::<SampleRef>(v).ok())
            .or_else(|| text(raw.sample_url.as_ref()).map(|url| SampleRef::External { url }));

        let name = text(raw.name.as_ref()).unwrap_or_default();
        let created_at = match raw.created_at.as_ref() {
            Some(Value::String(stamp)) => parse_timestamp_millis(stamp).unwrap_or(0),
            other => other.and_then(finite).filter(|t| *t >= 0.0).map_or(0, |t| t as u64),
        };
        let id = text(raw.id.as_ref())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| snapshot_id(&name, created_at));

        Snapshot {
            version,
            id,
            name,
            created_at,
            steps,
            bpm,
            octave,
            pitch,
            grid,
            fx: FxState::from_value(raw.fx.as_ref()),
            sample_ref,
        }
    }
}
