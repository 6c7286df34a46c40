//! JSON control messages exchanged with the conversation server.
//!
//! One JSON object per text frame, discriminated by its `type` field.
//! Audio travels separately as binary frames.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Reason sent with every abort.
pub const ABORT_REASON: &str = "wake_word_detected";

/// `state` of a `listen` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenState {
    Start,
    Stop,
    /// Text typed by the user instead of spoken.
    Detect,
}

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Hello {
        device_id: String,
        device_name: String,
        device_mac: String,
        token: String,
    },
    Listen {
        mode: String,
        state: ListenState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    Abort { session_id: String, reason: String },
}

impl ClientMessage {
    pub fn hello(device_id: &str, device_name: &str, device_mac: &str) -> Self {
        ClientMessage::Hello {
            device_id: device_id.to_string(),
            device_name: device_name.to_string(),
            device_mac: device_mac.to_string(),
            token: String::new(),
        }
    }

    pub fn listen(state: ListenState) -> Self {
        ClientMessage::Listen {
            mode: "manual".to_string(),
            state,
            text: None,
        }
    }

    pub fn detect(text: &str) -> Self {
        ClientMessage::Listen {
            mode: "manual".to_string(),
            state: ListenState::Detect,
            text: Some(text.to_string()),
        }
    }

    pub fn abort(session_id: &str) -> Self {
        ClientMessage::Abort {
            session_id: session_id.to_string(),
            reason: ABORT_REASON.to_string(),
        }
    }

    /// Serialize message to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize message from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// `state` of a `tts` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtsState {
    Start,
    Stop,
    SentenceStart,
    /// `sentence_end` and anything newer.
    #[serde(other)]
    Other,
}

/// Messages sent by the server. Unknown types parse as [`ServerMessage::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Hello {
        #[serde(default)]
        session_id: Option<String>,
    },
    /// Recognized user speech.
    Stt {
        #[serde(default)]
        text: String,
    },
    /// Assistant reply text.
    Llm {
        #[serde(default)]
        text: String,
    },
    Tts {
        state: TtsState,
        #[serde(default)]
        text: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// Serialize message to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize message from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

static EMOTION_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[\p{So}\p{Cn}]").ok());

/// First "other symbol" or unassigned code point in `text`, typically an emoji.
pub fn extract_emotion(text: &str) -> Option<String> {
    EMOTION_PATTERN
        .as_ref()?
        .find(text)
        .map(|m| m.as_str().to_string())
}
