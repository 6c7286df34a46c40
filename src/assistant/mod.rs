//! The conversation session: state, events, the orchestrator and the thread
//! that drives it.

pub mod events;
pub mod orchestrator;
pub mod runner;
pub mod state;

pub use events::{AssistantCommand, AssistantEvent, AssistantUpdate};
pub use orchestrator::{Assistant, AssistantOptions, AssistantParts};
pub use runner::{AssistantHandle, AssistantInputs, AssistantRunner};
pub use state::{ChatMessage, Mode, SessionState, Waveform};
