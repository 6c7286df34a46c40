//! Speaker playback: a FIFO of compressed server audio drained by a worker
//! that decodes and writes to the output device.

use crate::audio::speaker::PlaybackDevice;
use crate::codec::{Codec, CodecParams, Decoder};
use crate::defaults;
use crate::error::{LumiError, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

/// Thread-safe FIFO of audio buffers.
///
/// Buffers come out in exactly the order they went in; `push_all` inserts a
/// batch under one lock so no concurrent push can interleave with it.
#[derive(Debug, Clone, Default)]
pub struct AudioQueue {
    inner: Arc<Mutex<VecDeque<Vec<u8>>>>,
}

impl AudioQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, buffer: Vec<u8>) {
        self.lock().push_back(buffer);
    }

    pub fn push_all(&self, buffers: impl IntoIterator<Item = Vec<u8>>) {
        self.lock().extend(buffers);
    }

    pub fn pop(&self) -> Option<Vec<u8>> {
        self.lock().pop_front()
    }

    /// Take every buffer at once, oldest first.
    pub fn drain(&self) -> Vec<Vec<u8>> {
        self.lock().drain(..).collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Vec<u8>>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct PlaybackWorker {
    running: Arc<AtomicBool>,
    handle: JoinHandle<Box<dyn PlaybackDevice>>,
}

/// Plays queued server audio while started.
pub struct SpeakerPlayback {
    codec: Arc<dyn Codec>,
    params: CodecParams,
    queue: AudioQueue,
    device: Option<Box<dyn PlaybackDevice>>,
    worker: Option<PlaybackWorker>,
}

impl SpeakerPlayback {
    pub fn new(device: Box<dyn PlaybackDevice>, codec: Arc<dyn Codec>) -> Self {
        Self {
            codec,
            params: CodecParams::default(),
            queue: AudioQueue::new(),
            device: Some(device),
            worker: None,
        }
    }

    /// Open the device and decoder and start draining the queue.
    ///
    /// No-op while already playing.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let mut device = self.device.take().ok_or_else(|| LumiError::AudioPlayback {
            message: "playback device missing".to_string(),
        })?;

        let decoder = match self.codec.decoder(self.params) {
            Ok(decoder) => decoder,
            Err(e) => {
                self.device = Some(device);
                return Err(e);
            }
        };
        if let Err(e) = device.open(self.params.sample_rate, self.params.channels) {
            self.device = Some(device);
            return Err(e);
        }

        let running = Arc::new(AtomicBool::new(true));
        let worker_running = Arc::clone(&running);
        let queue = self.queue.clone();
        let handle = thread::Builder::new()
            .name("lumi-playback".to_string())
            .spawn(move || playback_loop(device, decoder, queue, worker_running))?;

        tracing::info!("playback started");
        self.worker = Some(PlaybackWorker { running, handle });
        Ok(())
    }

    /// Append a buffer. Empty buffers are ignored.
    pub fn enqueue(&self, buffer: Vec<u8>) {
        if buffer.is_empty() {
            return;
        }
        self.queue.push(buffer);
    }

    /// Append buffers in order, atomically with respect to other producers.
    pub fn enqueue_all(&self, buffers: impl IntoIterator<Item = Vec<u8>>) {
        self.queue
            .push_all(buffers.into_iter().filter(|b| !b.is_empty()));
    }

    /// Drop everything still queued; playback keeps running.
    pub fn clear(&self) {
        self.queue.clear();
    }

    /// Stop the worker, release decoder and device, and clear the queue.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.running.store(false, Ordering::SeqCst);
            match worker.handle.join() {
                Ok(device) => self.device = Some(device),
                Err(_) => tracing::error!("playback thread panicked, output device lost"),
            }
            tracing::info!("playback stopped");
        }
        self.queue.clear();
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

impl Drop for SpeakerPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

fn playback_loop(
    mut device: Box<dyn PlaybackDevice>,
    mut decoder: Box<dyn Decoder>,
    queue: AudioQueue,
    running: Arc<AtomicBool>,
) -> Box<dyn PlaybackDevice> {
    while running.load(Ordering::SeqCst) {
        let Some(buffer) = queue.pop() else {
            thread::sleep(defaults::PLAYBACK_POLL_INTERVAL);
            continue;
        };
        match decoder.decode(&buffer) {
            Ok(pcm) => {
                if let Err(e) = device.write(&pcm) {
                    tracing::warn!(error = %e, "playback write failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, bytes = buffer.len(), "decode failed, dropping buffer"),
        }
    }
    device.close();
    device
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::speaker::MockPlaybackDevice;
    use crate::codec::PcmCodec;
    use std::time::{Duration, Instant};

    fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn wait_for_writes(device: &MockPlaybackDevice, count: usize) -> Vec<Vec<i16>> {
        let deadline = Instant::now() + Duration::from_secs(2);
        while device.writes().len() < count && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        device.writes()
    }

    #[test]
    fn queue_preserves_fifo_order() {
        let queue = AudioQueue::new();
        queue.push(vec![1]);
        queue.push_all(vec![vec![2], vec![3]]);
        queue.push(vec![4]);

        let drained: Vec<Vec<u8>> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(drained, vec![vec![1], vec![2], vec![3], vec![4]]);
    }

    #[test]
    fn drain_empties_queue_in_order() {
        let queue = AudioQueue::new();
        queue.push_all(vec![vec![7], vec![8]]);
        let other = queue.clone();

        assert_eq!(other.drain(), vec![vec![7], vec![8]]);
        assert!(queue.is_empty());
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn enqueue_before_start_plays_after_start() {
        let device = MockPlaybackDevice::new();
        let mut playback = SpeakerPlayback::new(Box::new(device.clone()), Arc::new(PcmCodec));

        playback.enqueue(pcm_bytes(&[1, 2]));
        playback.enqueue(pcm_bytes(&[3]));
        assert_eq!(playback.queued(), 2);

        playback.start().unwrap();
        let writes = wait_for_writes(&device, 2);
        playback.stop();

        assert_eq!(writes, vec![vec![1, 2], vec![3]]);
    }

    #[test]
    fn empty_buffers_are_ignored() {
        let device = MockPlaybackDevice::new();
        let playback = SpeakerPlayback::new(Box::new(device), Arc::new(PcmCodec));

        playback.enqueue(Vec::new());
        playback.enqueue_all(vec![Vec::new(), vec![0, 0]]);
        assert_eq!(playback.queued(), 1);
    }

    #[test]
    fn decode_failure_skips_only_that_buffer() {
        let device = MockPlaybackDevice::new();
        let mut playback = SpeakerPlayback::new(Box::new(device.clone()), Arc::new(PcmCodec));

        playback.enqueue(vec![1, 2, 3]); // odd length, undecodable
        playback.enqueue(pcm_bytes(&[42]));
        playback.start().unwrap();
        let writes = wait_for_writes(&device, 1);
        playback.stop();

        assert_eq!(writes, vec![vec![42]]);
    }

    #[test]
    fn write_failure_is_not_fatal() {
        let device = MockPlaybackDevice::new().with_write_failure();
        let mut playback = SpeakerPlayback::new(Box::new(device), Arc::new(PcmCodec));

        playback.enqueue(pcm_bytes(&[1]));
        playback.enqueue(pcm_bytes(&[2]));
        playback.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while playback.queued() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(playback.queued(), 0);
        assert!(playback.is_running());
        playback.stop();
    }

    #[test]
    fn clear_keeps_playback_running() {
        let device = MockPlaybackDevice::new();
        let mut playback = SpeakerPlayback::new(Box::new(device.clone()), Arc::new(PcmCodec));

        playback.start().unwrap();
        playback.clear();
        assert!(playback.is_running());

        playback.enqueue(pcm_bytes(&[9]));
        assert_eq!(wait_for_writes(&device, 1), vec![vec![9]]);
        playback.stop();
    }

    #[test]
    fn stop_closes_device_clears_queue_and_can_restart() {
        let device = MockPlaybackDevice::new();
        let mut playback = SpeakerPlayback::new(Box::new(device.clone()), Arc::new(PcmCodec));

        playback.stop();
        playback.start().unwrap();
        playback.start().unwrap();
        assert_eq!(device.open_count(), 1);

        playback.stop();
        assert!(!device.is_open());

        playback.enqueue(pcm_bytes(&[5]));
        assert_eq!(playback.queued(), 1);
        playback.stop();
        assert_eq!(playback.queued(), 0);

        playback.start().unwrap();
        assert_eq!(device.open_count(), 2);
        playback.stop();
    }

    #[test]
    fn open_failure_keeps_device_for_retry() {
        let device = MockPlaybackDevice::new().with_open_failure();
        let mut playback = SpeakerPlayback::new(Box::new(device), Arc::new(PcmCodec));

        assert!(playback.start().is_err());
        assert!(playback.start().is_err());
        assert!(!playback.is_running());
    }
}
