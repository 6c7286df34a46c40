//! Session state owned by the orchestrator.

use crate::defaults;
use crate::playback::AudioQueue;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// Conversation mode. Wake-word listening happens in `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Idle,
    Recording,
    Playing,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Idle => write!(f, "idle"),
            Mode::Recording => write!(f, "recording"),
            Mode::Playing => write!(f, "playing"),
        }
    }
}

/// One line of the conversation history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub content: String,
    pub from_user: bool,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            from_user: true,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            from_user: false,
        }
    }
}

/// Rolling window of compressed loudness values for a level meter.
#[derive(Debug, Clone, Default)]
pub struct Waveform {
    history: VecDeque<f32>,
}

impl Waveform {
    /// Map a frame energy to 0.0..=1.0.
    ///
    /// Quiet input below 100 reads as zero, up to 3000 fills the lower half,
    /// louder input the upper half; the square root exaggerates small changes.
    pub fn normalize(energy: u32) -> f32 {
        let v = energy as f32;
        let level = if energy < 100 {
            0.0
        } else if energy < 3000 {
            v / 3000.0 * 0.5
        } else {
            0.5 + ((v - 3000.0) / 12000.0).min(0.5)
        };
        level.sqrt()
    }

    pub fn push(&mut self, energy: u32) {
        self.history.push_back(Self::normalize(energy));
        while self.history.len() > defaults::WAVEFORM_BARS {
            self.history.pop_front();
        }
    }

    /// Exactly [`defaults::WAVEFORM_BARS`] values, oldest first, zero-padded.
    pub fn bars(&self) -> Vec<f32> {
        let mut bars: Vec<f32> = self.history.iter().copied().collect();
        bars.resize(defaults::WAVEFORM_BARS, 0.0);
        bars
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

/// Everything the orchestrator knows about the current session.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub mode: Mode,
    pub connected: bool,
    /// The server is speaking (between `tts start` and `tts stop`).
    pub speaking: bool,
    pub session_id: Option<String>,
    /// Server audio received while recording, played once the turn ends.
    pub pending_server_audio: AudioQueue,
    /// Session number of the running capture.
    pub capture_session: Option<u64>,
    pub recording_time: Duration,
    pub wake_listening: bool,
    pub waveform: Waveform,
    pub messages: Vec<ChatMessage>,
    pub emotion: String,
    pub status: String,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            mode: Mode::Idle,
            connected: false,
            speaking: false,
            session_id: None,
            pending_server_audio: AudioQueue::new(),
            capture_session: None,
            recording_time: Duration::ZERO,
            wake_listening: false,
            waveform: Waveform::default(),
            messages: Vec::new(),
            emotion: defaults::DEFAULT_EMOTION.to_string(),
            status: String::new(),
        }
    }
}
