use crate::params::EffectKind;
use std::fmt;

#[derive(Debug)]
pub enum EngineError {
    /// A required name or identifier was missing; nothing was written.
    Validation(String),
    /// The sample bytes could not be decoded.
    Decode(String),
    /// The persistence backend was unreachable or rejected the request.
    Storage(String),
    /// A snapshot or config document was not well-formed.
    Document(String),
    UnknownParameter {
        kind: EffectKind,
        name: String,
    },
    OutOfRange {
        what: String,
        value: f64,
    },
    StageInit {
        kind: EffectKind,
        reason: String,
    },
    Device(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "Validation error: {msg}"),
            EngineError::Decode(msg) => write!(f, "Decode error: {msg}"),
            EngineError::Storage(msg) => write!(f, "Storage error: {msg}"),
            EngineError::Document(msg) => write!(f, "Document error: {msg}"),
            EngineError::UnknownParameter { kind, name } => {
                write!(f, "Unknown parameter '{name}' for stage '{}'", kind.tag())
            }
            EngineError::OutOfRange { what, value } => {
                write!(f, "Value {value} out of range for {what}")
            }
            EngineError::StageInit { kind, reason } => {
                write!(f, "Stage '{}' failed to initialize: {reason}", kind.tag())
            }
            EngineError::Device(msg) => write!(f, "Audio device error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Document(e.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_stage_tag() {
        let e = EngineError::UnknownParameter {
            kind: EffectKind::Compressor,
            name: "knee".to_string(),
        };
        assert_eq!(e.to_string(), "Unknown parameter 'knee' for stage 'comp'");
    }

    #[test]
    fn json_errors_become_document_errors() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(EngineError::from(err), EngineError::Document(_)));
    }
}
