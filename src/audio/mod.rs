//! Audio devices and the exclusive microphone.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod microphone;
pub mod recorder;
pub mod speaker;
