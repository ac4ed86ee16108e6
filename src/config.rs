//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::instrument::SynthSettings;

/// Lowest sample rate the DSP stages are tuned for.
pub const MIN_SAMPLE_RATE: f64 = 8000.0;

/// Runtime configuration for a session and its real-time engine.
///
/// Every field has a default, so a partial JSON document is enough:
/// `{"sample_rate": 48000}` configures only the rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output sample rate in Hz.
    pub sample_rate: f64,
    /// Largest block the engine renders in one pass; bigger device
    /// buffers are processed in chunks of this size.
    pub max_block_frames: usize,
    /// Voice pool size for the melodic source.
    pub max_voices: usize,
    /// Duration of the tempo ramp applied on bpm changes, in seconds.
    pub bpm_ramp_seconds: f64,
    /// Gain applied on the input bus before the effect chain.
    pub master_gain: f64,
    /// Capacity of the control → audio command channel.
    pub command_capacity: usize,
    /// Oscillator and envelope of the default melodic source.
    pub synth: SynthSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            sample_rate: 44100.0,
            max_block_frames: 4096,
            max_voices: 32,
            bpm_ramp_seconds: 0.05,
            master_gain: 0.8,
            command_capacity: 256,
            synth: SynthSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Config with the given sample rate and defaults elsewhere.
    pub fn with_sample_rate(sample_rate: f64) -> Self {
        EngineConfig {
            sample_rate,
            ..Default::default()
        }
    }

    /// Parse a (possibly partial) JSON config document.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.sample_rate.is_finite() || self.sample_rate < MIN_SAMPLE_RATE {
            return Err(EngineError::Validation(format!(
                "sample_rate must be at least {MIN_SAMPLE_RATE}, got {}",
                self.sample_rate
            )));
        }
        if self.max_block_frames == 0 {
            return Err(EngineError::Validation("max_block_frames must be > 0".into()));
        }
        if self.max_voices == 0 {
            return Err(EngineError::Validation("max_voices must be > 0".into()));
        }
        if self.command_capacity == 0 {
            return Err(EngineError::Validation("command_capacity must be > 0".into()));
        }
        if !self.bpm_ramp_seconds.is_finite() || self.bpm_ramp_seconds < 0.0 {
            return Err(EngineError::Validation(
                "bpm_ramp_seconds must be >= 0".into(),
            ));
        }
        let env = &self.synth.envelope;
        let times = [env.attack, env.decay, env.release];
        if times.iter().any(|t| !t.is_finite() || *t < 0.0) || !(0.0..=1.0).contains(&env.sustain) {
            return Err(EngineError::Validation("synth envelope out of range".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_document_fills_defaults() {
        let config = EngineConfig::from_json(r#"{"sample_rate": 48000}"#).unwrap();
        assert_eq!(config.sample_rate, 48000.0);
        assert_eq!(config.max_voices, 32);
        assert!((config.bpm_ramp_seconds - 0.05).abs() < 1e-12);
    }

    #[test]
    fn rejects_zero_sample_rate() {
        let err = EngineConfig::from_json(r#"{"sample_rate": 0}"#).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn synth_settings_are_configurable() {
        let config = EngineConfig::from_json(
            r#"{"synth": {"waveform": "square", "envelope": {"attack": 0.0, "decay": 0.2, "sustain": 1.0, "release": 0.1}}}"#,
        )
        .unwrap();
        assert_eq!(config.synth.waveform, crate::dsp::oscillator::Waveform::Square);
        assert_eq!(config.synth.envelope.decay, 0.2);

        let err = EngineConfig::from_json(r#"{"synth": {"envelope": {"attack": 0.0, "decay": 0.0, "sustain": 2.0, "release": 0.0}}}"#);
        assert!(matches!(err, Err(EngineError::Validation(_))));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = EngineConfig::from_json("{sample_rate").unwrap_err();
        assert!(matches!(err, EngineError::Document(_)));
    }
}
