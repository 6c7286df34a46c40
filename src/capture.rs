//! Microphone capture: reads the device in fixed frames, measures energy,
//! encodes, and reports everything as [`CaptureEvent`]s.

use crate::audio::microphone::{FrameAssembler, MicLease, MicOwner, Microphone, frame_energy};
use crate::codec::{Codec, CodecParams, Encoder};
use crate::defaults;
use crate::error::Result;
use crossbeam_channel::Sender;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Output of a capture session. Every event carries the session number
/// returned by [`MicrophoneCapture::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// Recording time at the end of the latest frame.
    Elapsed { session: u64, elapsed: Duration },
    /// Encoded frame ready for the transport.
    Frame { session: u64, data: Vec<u8> },
    /// Energy of the latest frame, sent whether or not encoding succeeded.
    Volume { session: u64, energy: u32 },
}

impl CaptureEvent {
    pub fn session(&self) -> u64 {
        match self {
            CaptureEvent::Elapsed { session, .. }
            | CaptureEvent::Frame { session, .. }
            | CaptureEvent::Volume { session, .. } => *session,
        }
    }
}

struct CaptureWorker {
    session: u64,
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Owns the capture loop while recording.
pub struct MicrophoneCapture {
    microphone: Microphone,
    codec: Arc<dyn Codec>,
    params: CodecParams,
    events: Sender<CaptureEvent>,
    next_session: u64,
    worker: Option<CaptureWorker>,
}

impl MicrophoneCapture {
    pub fn new(microphone: Microphone, codec: Arc<dyn Codec>, events: Sender<CaptureEvent>) -> Self {
        Self {
            microphone,
            codec,
            params: CodecParams::default(),
            events,
            next_session: 0,
            worker: None,
        }
    }

    /// Open the microphone and the encoder and start the capture loop.
    ///
    /// Returns the new session number. Fails if the encoder cannot be
    /// created or the device cannot be opened (including when the wake gate
    /// still holds it). Calling it while already capturing returns the
    /// running session.
    pub fn start(&mut self) -> Result<u64> {
        if let Some(worker) = &self.worker {
            return Ok(worker.session);
        }

        let encoder = self.codec.encoder(self.params)?;
        let lease = self.microphone.acquire(MicOwner::Capture)?;

        self.next_session += 1;
        let session = self.next_session;
        let running = Arc::new(AtomicBool::new(true));
        let loop_state = CaptureLoop {
            session,
            lease,
            encoder,
            assembler: FrameAssembler::new(self.params.frame_samples),
            events: self.events.clone(),
            running: Arc::clone(&running),
        };
        let handle = thread::Builder::new()
            .name("lumi-capture".to_string())
            .spawn(move || loop_state.run())?;

        tracing::info!(session, "capture started");
        self.worker = Some(CaptureWorker {
            session,
            running,
            handle,
        });
        Ok(session)
    }

    /// Stop the loop and wait for it, which releases the microphone.
    ///
    /// Safe to call when not capturing.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.running.store(false, Ordering::SeqCst);
        if worker.handle.join().is_err() {
            tracing::error!(session = worker.session, "capture thread panicked");
        }
        tracing::info!(session = worker.session, "capture stopped");
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Session number of the running capture.
    pub fn session(&self) -> Option<u64> {
        self.worker.as_ref().map(|w| w.session)
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

struct CaptureLoop {
    session: u64,
    lease: MicLease,
    encoder: Box<dyn Encoder>,
    assembler: FrameAssembler,
    events: Sender<CaptureEvent>,
    running: Arc<AtomicBool>,
}

impl CaptureLoop {
    fn run(mut self) {
        let started = Instant::now();
        let mut frames: u64 = 0;

        'outer: while self.running.load(Ordering::SeqCst) {
            let samples = match self.lease.read_samples() {
                Ok(samples) => samples,
                Err(e) => {
                    tracing::warn!(error = %e, "capture read failed");
                    thread::sleep(defaults::CAPTURE_POLL_INTERVAL);
                    continue;
                }
            };

            for frame in self.assembler.push(&samples) {
                // A read that completes after stop() belongs to no session.
                if !self.running.load(Ordering::SeqCst) {
                    break 'outer;
                }
                frames += 1;
                if !self.process(&frame, started.elapsed()) {
                    break 'outer;
                }
            }

            thread::sleep(defaults::CAPTURE_POLL_INTERVAL);
        }

        tracing::debug!(session = self.session, frames, "capture loop exited");
        // Dropping self releases the lease and stops the device.
    }

    /// Returns false once nobody listens anymore.
    fn process(&mut self, frame: &[i16], elapsed: Duration) -> bool {
        let session = self.session;
        let energy = frame_energy(frame);
        tracing::trace!(session, rms = energy, "frame captured");

        let mut delivered = self
            .events
            .send(CaptureEvent::Elapsed { session, elapsed })
            .is_ok();

        match self.encoder.encode(frame) {
            Ok(data) => {
                delivered &= self.events.send(CaptureEvent::Frame { session, data }).is_ok();
            }
            Err(e) => tracing::warn!(session, error = %e, "frame encode failed, dropping frame"),
        }

        delivered &= self
            .events
            .send(CaptureEvent::Volume { session, energy })
            .is_ok();
        delivered
    }
}
