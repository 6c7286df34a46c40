//! Wake-word gate: owns the engine and, while listening, the microphone.

use super::engine::{WakeEngine, WakeSignal};
use super::keyword::KeywordFile;
use crate::audio::microphone::{FrameAssembler, MicLease, MicOwner, Microphone};
use crate::defaults;
use crate::error::{LumiError, Result};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

/// Error code reported when `start` is called before a successful initialize.
pub const ERROR_NOT_INITIALIZED: i32 = -1;
/// Error code reported when the microphone cannot be opened.
pub const ERROR_MICROPHONE: i32 = -2;
/// Error code reported for engine failures that carry no code of their own.
pub const ERROR_ENGINE: i32 = -3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeState {
    Uninitialized,
    Initializing,
    /// Engine loaded, not listening.
    Ready,
    Listening,
    /// Keyword spotted; raw frames are forwarded until `stop`.
    Triggered,
    /// Initialization failed.
    Error,
}

/// Everything the gate reports to its listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeEvent {
    /// Outcome of [`WakeGate::initialize`], sent exactly once per call.
    Initialized(std::result::Result<(), String>),
    Detected { keyword: String, score: i32 },
    PreWake,
    Error { code: i32, message: String },
    /// Raw 16 kHz frame captured after a detection.
    Audio(Vec<i16>),
}

type SharedEngine = Arc<Mutex<Box<dyn WakeEngine>>>;
type SharedState = Arc<Mutex<WakeState>>;

struct GateWorker {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct WakeGate {
    engine: SharedEngine,
    state: SharedState,
    microphone: Microphone,
    keyword_file: KeywordFile,
    keyword: String,
    events: Sender<WakeEvent>,
    worker: Option<GateWorker>,
    init_handle: Option<JoinHandle<()>>,
}

impl WakeGate {
    /// Events for the whole lifetime of the gate go to `events`.
    pub fn new(
        engine: Box<dyn WakeEngine>,
        microphone: Microphone,
        keyword_file: KeywordFile,
        keyword: impl Into<String>,
        events: Sender<WakeEvent>,
    ) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            state: Arc::new(Mutex::new(WakeState::Uninitialized)),
            microphone,
            keyword_file,
            keyword: keyword.into(),
            events,
            worker: None,
            init_handle: None,
        }
    }

    /// Load the engine on a background thread.
    ///
    /// Reports [`WakeEvent::Initialized`] when done. Ignored while
    /// initializing or already initialized.
    pub fn initialize(&mut self) {
        {
            let mut state = lock_state(&self.state);
            if !matches!(*state, WakeState::Uninitialized | WakeState::Error) {
                return;
            }
            *state = WakeState::Initializing;
        }
        self.join_init();

        let engine = Arc::clone(&self.engine);
        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        let spawned = thread::Builder::new()
            .name("lumi-wake-init".to_string())
            .spawn(move || {
                let result = lock_engine(&engine).initialize();
                let outcome = match result {
                    Ok(()) => {
                        *lock_state(&state) = WakeState::Ready;
                        tracing::info!("wake engine initialized");
                        Ok(())
                    }
                    Err(e) => {
                        *lock_state(&state) = WakeState::Error;
                        tracing::error!(error = %e, "wake engine initialization failed");
                        Err(e.to_string())
                    }
                };
                let _ = events.send(WakeEvent::Initialized(outcome));
            });

        match spawned {
            Ok(handle) => self.init_handle = Some(handle),
            Err(e) => {
                *lock_state(&self.state) = WakeState::Error;
                let _ = self
                    .events
                    .send(WakeEvent::Initialized(Err(format!("cannot spawn init thread: {e}"))));
            }
        }
    }

    /// Open the microphone and start listening for the keyword.
    ///
    /// Failures are returned and also reported as [`WakeEvent::Error`].
    pub fn start(&mut self) -> Result<()> {
        match self.state() {
            WakeState::Listening | WakeState::Triggered => return Ok(()),
            WakeState::Ready => {}
            _ => {
                self.report(ERROR_NOT_INITIALIZED, "wake engine not initialized");
                return Err(LumiError::WakeNotInitialized);
            }
        }

        self.sync_keyword_file();

        let lease = match self.microphone.acquire(MicOwner::WakeGate) {
            Ok(lease) => lease,
            Err(e) => {
                self.report(ERROR_MICROPHONE, &e.to_string());
                return Err(e);
            }
        };

        if let Err(e) = lock_engine(&self.engine).begin(&self.keyword) {
            drop(lease);
            self.report(error_code(&e), &e.to_string());
            return Err(e);
        }

        *lock_state(&self.state) = WakeState::Listening;
        let running = Arc::new(AtomicBool::new(true));
        let worker = GateLoop {
            lease,
            engine: Arc::clone(&self.engine),
            state: Arc::clone(&self.state),
            keyword: self.keyword.clone(),
            assembler: FrameAssembler::new(defaults::WAKE_FRAME_SAMPLES),
            events: self.events.clone(),
            running: Arc::clone(&running),
        };
        let handle = match thread::Builder::new()
            .name("lumi-wake".to_string())
            .spawn(move || worker.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                lock_engine(&self.engine).end();
                *lock_state(&self.state) = WakeState::Ready;
                return Err(e.into());
            }
        };

        tracing::info!(keyword = %self.keyword, "wake gate listening");
        self.worker = Some(GateWorker { running, handle });
        Ok(())
    }

    /// Stop listening and release the microphone. Idempotent.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.running.store(false, Ordering::SeqCst);
        if worker.handle.join().is_err() {
            tracing::error!("wake worker panicked");
        }
        lock_engine(&self.engine).end();
        *lock_state(&self.state) = WakeState::Ready;
        tracing::info!("wake gate stopped");
    }

    /// Change the keyword.
    ///
    /// Stops listening first if needed; the caller restarts the gate. Returns
    /// false, doing nothing, for a blank or unchanged keyword.
    pub fn update_keyword(&mut self, keyword: &str) -> Result<bool> {
        let keyword = keyword.trim();
        if keyword.is_empty() || keyword == self.keyword {
            return Ok(false);
        }
        self.stop();
        self.keyword_file.write(keyword)?;
        tracing::info!(old = %self.keyword, new = keyword, "wake keyword updated");
        self.keyword = keyword.to_string();
        Ok(true)
    }

    /// Final teardown: stop listening and free the engine.
    pub fn release(&mut self) {
        self.stop();
        self.join_init();
        lock_engine(&self.engine).release();
        *lock_state(&self.state) = WakeState::Uninitialized;
        tracing::debug!("wake gate released");
    }

    pub fn state(&self) -> WakeState {
        *lock_state(&self.state)
    }

    pub fn is_listening(&self) -> bool {
        self.worker.is_some()
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    fn sync_keyword_file(&self) {
        match self.keyword_file.read() {
            Ok(Some(stored)) if stored == self.keyword => return,
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "keyword file unreadable, rewriting"),
        }
        if let Err(e) = self.keyword_file.write(&self.keyword) {
            tracing::warn!(error = %e, path = %self.keyword_file.path().display(), "failed to write keyword file");
        }
    }

    fn report(&self, code: i32, message: &str) {
        tracing::warn!(code, message, "wake gate error");
        let _ = self.events.send(WakeEvent::Error {
            code,
            message: message.to_string(),
        });
    }

    fn join_init(&mut self) {
        if let Some(handle) = self.init_handle.take()
            && handle.join().is_err()
        {
            tracing::error!("wake init thread panicked");
        }
    }
}

impl Drop for WakeGate {
    fn drop(&mut self) {
        self.stop();
        self.join_init();
    }
}

fn error_code(e: &LumiError) -> i32 {
    match e {
        LumiError::WakeEngine { code, .. } => *code,
        LumiError::WakeNotInitialized => ERROR_NOT_INITIALIZED,
        _ => ERROR_ENGINE,
    }
}

fn lock_state(state: &Mutex<WakeState>) -> MutexGuard<'_, WakeState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

fn lock_engine(engine: &Mutex<Box<dyn WakeEngine>>) -> MutexGuard<'_, Box<dyn WakeEngine>> {
    engine.lock().unwrap_or_else(|e| e.into_inner())
}

struct GateLoop {
    lease: MicLease,
    engine: SharedEngine,
    state: SharedState,
    keyword: String,
    assembler: FrameAssembler,
    events: Sender<WakeEvent>,
    running: Arc<AtomicBool>,
}

impl GateLoop {
    fn run(mut self) {
        'outer: while self.running.load(Ordering::SeqCst) {
            let samples = match self.lease.read_samples() {
                Ok(samples) => samples,
                Err(e) => {
                    tracing::warn!(error = %e, "wake read failed");
                    thread::sleep(defaults::CAPTURE_POLL_INTERVAL);
                    continue;
                }
            };

            for frame in self.assembler.push(&samples) {
                if !self.running.load(Ordering::SeqCst) {
                    break 'outer;
                }
                if !self.process(frame) {
                    break 'outer;
                }
            }

            thread::sleep(defaults::CAPTURE_POLL_INTERVAL);
        }
    }

    /// Returns false once the listener is gone.
    fn process(&mut self, frame: Vec<i16>) -> bool {
        if *lock_state(&self.state) == WakeState::Triggered {
            return self.events.send(WakeEvent::Audio(frame)).is_ok();
        }

        let signal = lock_engine(&self.engine).feed(&frame);
        let event = match signal {
            Ok(None) => return true,
            Ok(Some(WakeSignal::Detected { score })) => {
                *lock_state(&self.state) = WakeState::Triggered;
                tracing::info!(keyword = %self.keyword, score, "wake word detected");
                WakeEvent::Detected {
                    keyword: self.keyword.clone(),
                    score,
                }
            }
            Ok(Some(WakeSignal::PreWake)) => WakeEvent::PreWake,
            Err(e) => {
                tracing::warn!(error = %e, "wake engine rejected frame");
                WakeEvent::Error {
                    code: error_code(&e),
                    message: e.to_string(),
                }
            }
        };
        self.events.send(event).is_ok()
    }
}
