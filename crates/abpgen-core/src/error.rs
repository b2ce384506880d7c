//! Error taxonomy shared across the core crate
//!
//! Configuration and import errors propagate to the immediate caller.
//! Device errors never leave [`crate::device::session::DeviceSession`]; the
//! session turns them into status notifications instead.

use std::path::PathBuf;
use thiserror::Error;

/// Bad or missing reference-point definition source
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("HeartBeat settings file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read HeartBeat settings file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HeartBeat settings document is malformed: {0}")]
    Malformed(String),

    #[error("Reference point missing '{attribute}' attribute in <{section}>")]
    MissingAttribute { section: String, attribute: &'static str },

    #[error("Reference point '{point}' in <{section}> has invalid {attribute} value '{value}'")]
    InvalidNumber {
        section: String,
        point: String,
        attribute: &'static str,
        value: String,
    },

    #[error("Waveform section <{0}> not found in HeartBeat settings")]
    MissingSection(String),

    #[error("HeartBeat settings file parsed as empty: {0}")]
    Empty(String),

    #[error("Section <{0}> has no reference point at time 0 (beat start)")]
    MissingBeatStart(String),

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Bad imported waveform data or bad manual edits
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Unknown reference point: {0}")]
    UnknownReferencePoint(String),

    #[error("Line {line}: invalid pressure value '{content}'")]
    InvalidLine { line: usize, content: String },

    #[error("Waveform file contains no pressure values")]
    EmptyImport,

    #[error("Sample count must be greater than zero")]
    ZeroSampleCount,

    #[error("Reference point '{0}' is the only beat-start anchor and must stay at time 0")]
    BeatStartRequired(String),

    #[error("No reference points to interpolate")]
    NoReferencePoints,

    #[error("{0} must be a finite number")]
    NonFinite(&'static str),

    #[error("Failed to read waveform file: {0}")]
    Unreadable(String),
}

/// Device discovery and hardware I/O failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("USB error: {0}")]
    Discovery(String),

    #[error("{0}")]
    Io(String),

    #[error("device not connected")]
    NotConnected,

    #[error("device vanished while starting generation")]
    Vanished,

    #[error("analog output ch0, no waveform data available")]
    NoWaveform,
}

/// Explicitly unimplemented contracts (not silent no-ops)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0} is not supported")]
pub struct UnsupportedOperation(pub &'static str);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_line_message_names_line() {
        let err = ValidationError::InvalidLine {
            line: 2,
            content: "bad".to_string(),
        };
        assert_eq!(err.to_string(), "Line 2: invalid pressure value 'bad'");
    }

    #[test]
    fn test_unsupported_message() {
        let err = UnsupportedOperation("save_settings()");
        assert_eq!(err.to_string(), "save_settings() is not supported");
    }
}
