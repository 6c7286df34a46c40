//! Default configuration constants for lumi.
//!
//! Shared by the config file, the runtime settings and the components so the
//! values stay in one place.

use std::time::Duration;

/// Audio sample rate in Hz for capture, playback and the codec.
pub const SAMPLE_RATE: u32 = 16000;

/// Mono audio everywhere.
pub const CHANNELS: u16 = 1;

/// Samples per codec frame: 60 ms at 16 kHz.
///
/// This cadence is a hard contract with the server-side codec.
pub const FRAME_SAMPLES: usize = 960;

/// Samples per wake-engine read: 40 ms at 16 kHz.
pub const WAKE_FRAME_SAMPLES: usize = 640;

/// Silence duration in milliseconds before the utterance is considered over.
pub const SILENCE_THRESHOLD_MS: u64 = 2000;

/// Frame energy (mean absolute amplitude) above which a frame counts as sound.
///
/// Tuned against the mean-absolute formula in [`crate::audio::microphone::frame_energy`].
pub const VOLUME_THRESHOLD: u32 = 900;

/// Interval of the backstop VAD check while recording.
pub const VAD_CHECK_INTERVAL_MS: u64 = 500;

/// Default server address.
pub const SERVER_URL: &str = "ws://192.168.100.100:8000/xiaozhi/v1/";

/// Device name sent in the handshake.
pub const DEVICE_NAME: &str = "Lumi Assistant";

/// Default wake keyword.
pub const WAKE_KEYWORD: &str = "你好天天";

/// Minimum engine score accepted as a wake detection.
pub const WAKE_SCORE_THRESHOLD: i32 = 800;

/// Delay before the wake gate is re-armed after playback ends or a keyword change.
pub const WAKE_REARM_DELAY_MS: u64 = 500;

/// Delay between disconnecting and reconnecting after the server address changes.
pub const ADDRESS_CHANGE_DELAY_MS: u64 = 500;

/// Delay before the first automatic connection after start.
pub const AUTO_CONNECT_DELAY_MS: u64 = 3000;

/// Base reconnection delay; attempt N waits N times this.
pub const RECONNECT_BASE_DELAY_MS: u64 = 1000;

/// Upper bound for a single reconnection delay.
pub const RECONNECT_MAX_DELAY_MS: u64 = 30_000;

/// Reconnection attempts before giving up.
pub const RECONNECT_MAX_ATTEMPTS: u32 = 10;

/// Sleep of the playback loop when its queue is empty.
pub const PLAYBACK_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Sleep of the capture and wake loops between device reads.
pub const CAPTURE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Bars in the waveform history.
pub const WAVEFORM_BARS: usize = 12;

/// Emotion shown when the assistant has not expressed one.
pub const DEFAULT_EMOTION: &str = "😶";

/// Emotion shown while a wake-triggered recording runs.
pub const LISTENING_EMOTION: &str = "👂";
