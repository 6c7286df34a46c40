//! Wake-word engine adapters.
//!
//! The gate drives an engine through [`WakeEngine`]; real keyword spotters
//! plug in behind it. [`EnergySpikeEngine`] is a model-free stand-in that
//! fires on a sudden rise in loudness.

use crate::audio::microphone::frame_energy;
use crate::defaults;
use crate::error::{LumiError, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// What an engine reports for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeSignal {
    /// Keyword spotted with the given confidence score.
    Detected { score: i32 },
    /// Something keyword-like started; a detection may follow.
    PreWake,
}

/// Keyword-spotting engine contract.
pub trait WakeEngine: Send {
    /// Load models/resources. May block for a long time.
    fn initialize(&mut self) -> Result<()>;

    /// Begin a listening session for `keyword`.
    fn begin(&mut self, keyword: &str) -> Result<()>;

    /// Feed one frame of 16 kHz mono PCM.
    fn feed(&mut self, samples: &[i16]) -> Result<Option<WakeSignal>>;

    /// End the listening session.
    fn end(&mut self);

    /// Free everything loaded by `initialize`.
    fn release(&mut self);
}

/// Energy-spike detector.
///
/// Tracks an exponential moving average of frame energy and scores frames
/// that jump well above it. Scores run 0..=1000; anything at or above the
/// threshold is a detection, anything positive below it a pre-wake hint.
pub struct EnergySpikeEngine {
    initialized: bool,
    active: bool,
    average: Option<f32>,
    spike_ratio: f32,
    noise_floor: f32,
    score_threshold: i32,
}

impl EnergySpikeEngine {
    pub fn new(score_threshold: i32) -> Self {
        Self {
            initialized: false,
            active: false,
            average: None,
            spike_ratio: 3.0,
            noise_floor: 100.0,
            score_threshold,
        }
    }

    fn score(&mut self, energy: f32) -> i32 {
        // The first frame of a session only seeds the average.
        let Some(average) = self.average else {
            self.average = Some(energy);
            return 0;
        };
        let score = if average > self.noise_floor && energy > average * self.spike_ratio {
            let ratio = energy / average;
            let normalized = ((ratio - self.spike_ratio) / self.spike_ratio).clamp(0.0, 1.0);
            (normalized * 1000.0).round() as i32
        } else {
            0
        };
        self.average = Some(average * 0.9 + energy * 0.1);
        score
    }
}

impl Default for EnergySpikeEngine {
    fn default() -> Self {
        Self::new(defaults::WAKE_SCORE_THRESHOLD)
    }
}

impl WakeEngine for EnergySpikeEngine {
    fn initialize(&mut self) -> Result<()> {
        self.initialized = true;
        Ok(())
    }

    fn begin(&mut self, keyword: &str) -> Result<()> {
        if !self.initialized {
            return Err(LumiError::WakeNotInitialized);
        }
        tracing::debug!(keyword, "energy spike engine listening");
        self.active = true;
        self.average = None;
        Ok(())
    }

    fn feed(&mut self, samples: &[i16]) -> Result<Option<WakeSignal>> {
        if !self.active || samples.is_empty() {
            return Ok(None);
        }
        let score = self.score(frame_energy(samples) as f32);
        Ok(match score {
            0 => None,
            s if s >= self.score_threshold => Some(WakeSignal::Detected { score: s }),
            _ => Some(WakeSignal::PreWake),
        })
    }

    fn end(&mut self) {
        self.active = false;
    }

    fn release(&mut self) {
        self.active = false;
        self.initialized = false;
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    pending: Mutex<VecDeque<WakeSignal>>,
    keywords: Mutex<Vec<String>>,
    inits: AtomicUsize,
    ends: AtomicUsize,
    releases: AtomicUsize,
}

/// Engine driven by the test: signals queued with [`fire`](Self::fire) are
/// returned by the next fed frames.
///
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct ScriptedWakeEngine {
    state: Arc<ScriptState>,
    fail_init: bool,
    fail_begin: bool,
}

impl ScriptedWakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_init_failure(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn with_begin_failure(mut self) -> Self {
        self.fail_begin = true;
        self
    }

    /// Queue a signal for the next frame.
    pub fn fire(&self, signal: WakeSignal) {
        if let Ok(mut pending) = self.state.pending.lock() {
            pending.push_back(signal);
        }
    }

    /// Keywords passed to `begin`, in order.
    pub fn keywords(&self) -> Vec<String> {
        self.state
            .keywords
            .lock()
            .map(|k| k.clone())
            .unwrap_or_default()
    }

    pub fn init_count(&self) -> usize {
        self.state.inits.load(Ordering::SeqCst)
    }

    pub fn end_count(&self) -> usize {
        self.state.ends.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.state.releases.load(Ordering::SeqCst)
    }
}

impl WakeEngine for ScriptedWakeEngine {
    fn initialize(&mut self) -> Result<()> {
        self.state.inits.fetch_add(1, Ordering::SeqCst);
        if self.fail_init {
            return Err(LumiError::WakeEngine {
                code: 10,
                message: "resource missing".to_string(),
            });
        }
        Ok(())
    }

    fn begin(&mut self, keyword: &str) -> Result<()> {
        if self.fail_begin {
            return Err(LumiError::WakeEngine {
                code: 11,
                message: "begin rejected".to_string(),
            });
        }
        if let Ok(mut keywords) = self.state.keywords.lock() {
            keywords.push(keyword.to_string());
        }
        Ok(())
    }

    fn feed(&mut self, _samples: &[i16]) -> Result<Option<WakeSignal>> {
        Ok(self
            .state
            .pending
            .lock()
            .ok()
            .and_then(|mut pending| pending.pop_front()))
    }

    fn end(&mut self) {
        self.state.ends.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&mut self) {
        self.state.releases.fetch_add(1, Ordering::SeqCst);
    }
}
