pub mod chain;
pub mod config;
pub mod decode;
pub mod dsp;
pub mod error;
pub mod grid;
pub mod instrument;
#[cfg(feature = "device")]
pub mod output;
pub mod params;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod transport;

pub use crate::chain::{ChainManager, ChainRenderer, DspRenderer, Wiring};
pub use crate::config::EngineConfig;
pub use crate::dsp::engine::{AudioEngine, EngineStatus};
pub use crate::error::EngineError;
pub use crate::grid::{Grid, StepCount};
pub use crate::instrument::SourceKind;
pub use crate::params::{EffectKind, ParameterStore};
pub use crate::session::{LoadOutcome, Session, SessionEvent};
pub use crate::snapshot::{FxState, SampleRef, Snapshot};
pub use crate::store::{MemoryStore, SnapshotHandle, SnapshotListing, SnapshotStore};

use serde::Serialize as _;
use wasm_bindgen::prelude::*;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the pianoroll-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// WASM-exposed: read a stored snapshot document, filling defaults for
/// anything missing, and hand back the normalized form.
#[wasm_bindgen]
pub fn normalize_snapshot(json: &str) -> Result<JsValue, JsValue> {
    let snapshot = Snapshot::from_json(json).map_err(|e| JsValue::from_str(&format!("{e}")))?;
    let value = serde_json::to_value(&snapshot).map_err(|e| JsValue::from_str(&format!("{e}")))?;
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|e| JsValue::from_str(&format!("{e}")))
}

/// WASM-exposed: render `passes` loops of a snapshot document to a WAV byte array.
#[wasm_bindgen]
pub fn render_snapshot_wav(json: &str, sample_rate: u32, passes: u32) -> Result<Vec<u8>, JsValue> {
    let snapshot = Snapshot::from_json(json).map_err(|e| JsValue::from_str(&format!("{e}")))?;
    dsp::renderer::render_wav(&snapshot, sample_rate, passes.max(1) as usize)
        .map_err(|e| JsValue::from_str(&format!("{e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_matches_manifest() {
        assert_eq!(core_version(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn reexports_line_up() {
        let snapshot = Snapshot::default();
        assert_eq!(snapshot.steps, StepCount::Sixteen);
        assert_eq!(EffectKind::ALL.len(), 9);
    }
}
