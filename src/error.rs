//! Error types for lumi.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LumiError {
    // Audio device errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("Audio playback failed: {message}")]
    AudioPlayback { message: String },

    #[error("Microphone is busy: held by {holder}")]
    DeviceBusy { holder: String },

    // Codec errors
    #[error("Codec error: {message}")]
    Codec { message: String },

    // Wake-word engine errors
    #[error("Wake engine error {code}: {message}")]
    WakeEngine { code: i32, message: String },

    #[error("Wake engine not initialized")]
    WakeNotInitialized,

    // Transport errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for LumiError {
    fn from(e: serde_json::Error) -> Self {
        LumiError::Protocol {
            message: e.to_string(),
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, LumiError>;
