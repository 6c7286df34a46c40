//! Wake-word detection.

pub mod engine;
pub mod gate;
pub mod keyword;

pub use engine::{EnergySpikeEngine, ScriptedWakeEngine, WakeEngine, WakeSignal};
pub use gate::{WakeEvent, WakeGate, WakeState};
pub use keyword::KeywordFile;
