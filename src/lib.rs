//! lumi - voice assistant client
//!
//! Wake word, voice activity detection and full-duplex audio streaming to a
//! conversation server over WebSocket.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod assistant;
pub mod audio;
pub mod capture;
#[cfg(feature = "cli")]
pub mod cli;
pub mod clock;
pub mod codec;
pub mod config;
pub mod defaults;
pub mod error;
pub mod playback;
pub mod settings;
pub mod transport;
pub mod vad;
pub mod wake;

// Device seams
pub use audio::microphone::{MicOwner, Microphone};
pub use audio::recorder::AudioSource;
pub use audio::speaker::PlaybackDevice;
pub use codec::{Codec, PcmCodec};
pub use transport::Transport;
pub use wake::WakeEngine;

// Session
pub use assistant::{
    Assistant, AssistantCommand, AssistantHandle, AssistantInputs, AssistantOptions,
    AssistantParts, AssistantRunner, AssistantUpdate, Mode,
};

// Error handling
pub use error::{LumiError, Result};

// Config
pub use config::Config;
pub use settings::{Settings, SettingsStore};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(ver.starts_with(env!("CARGO_PKG_VERSION")), "got: {}", ver);
    }

    #[test]
    fn version_string_carries_hash_only_when_built_from_git() {
        let ver = version_string();
        match option_env!("GIT_HASH") {
            Some(hash) if !hash.is_empty() => assert_eq!(ver.split('+').nth(1), Some(hash)),
            _ => assert_eq!(ver, env!("CARGO_PKG_VERSION")),
        }
    }
}
