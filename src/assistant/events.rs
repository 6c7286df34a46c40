//! Messages into and out of the orchestrator.

use super::state::{ChatMessage, Mode};
use crate::capture::CaptureEvent;
use crate::settings::Settings;
use crate::transport::TransportEvent;
use crate::wake::WakeEvent;
use std::time::Duration;

/// Requests from the user or a UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssistantCommand {
    /// Connect to the configured server.
    Connect,
    /// Stop any recording and close the connection.
    Disconnect,
    /// Start recording without the wake word, interrupting the server if it
    /// is speaking.
    StartRecording,
    /// End a recording early. With `rearm_wake` the wake gate starts
    /// listening again afterwards.
    StopRecording { rearm_wake: bool },
    /// Send typed text instead of speech.
    SendText(String),
    Shutdown,
}

/// Everything the orchestrator reacts to, in one serialized stream.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantEvent {
    Transport(TransportEvent),
    Wake(WakeEvent),
    Capture(CaptureEvent),
    Settings(Settings),
    Command(AssistantCommand),
}

impl From<TransportEvent> for AssistantEvent {
    fn from(event: TransportEvent) -> Self {
        AssistantEvent::Transport(event)
    }
}

impl From<WakeEvent> for AssistantEvent {
    fn from(event: WakeEvent) -> Self {
        AssistantEvent::Wake(event)
    }
}

impl From<CaptureEvent> for AssistantEvent {
    fn from(event: CaptureEvent) -> Self {
        AssistantEvent::Capture(event)
    }
}

impl From<AssistantCommand> for AssistantEvent {
    fn from(command: AssistantCommand) -> Self {
        AssistantEvent::Command(command)
    }
}

/// Observable changes, published for whatever presents them.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantUpdate {
    Mode(Mode),
    Connection(bool),
    Status(String),
    Emotion(String),
    Message(ChatMessage),
    /// The server started speaking this sentence.
    Sentence(String),
    Waveform(Vec<f32>),
    Speaking(bool),
    RecordingTime(Duration),
    WakeListening(bool),
}
