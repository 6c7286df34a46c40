use crate::error::{LumiError, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Trait for audio capture devices.
///
/// This trait allows swapping implementations (real audio device vs mock).
/// Reads are non-blocking: a read returns whatever the device buffered since
/// the previous read, possibly nothing.
pub trait AudioSource: Send {
    /// Open the device and begin capturing.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing and release the device.
    fn stop(&mut self) -> Result<()>;

    /// Read buffered 16-bit PCM samples.
    fn read_samples(&mut self) -> Result<Vec<i16>>;
}

#[derive(Debug, Default)]
struct MockState {
    started: AtomicBool,
    start_count: AtomicUsize,
    stop_count: AtomicUsize,
    script: Mutex<VecDeque<Vec<i16>>>,
}

/// Mock audio source for testing
///
/// Clones share state, so a test can keep a handle to a source it has handed
/// over to the microphone and still observe it.
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    state: Arc<MockState>,
    samples: Vec<i16>,
    should_fail_start: bool,
    should_fail_read: bool,
    error_message: String,
}

impl MockAudioSource {
    /// Create a new mock audio source returning silence
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState::default()),
            samples: vec![0i16; 160],
            should_fail_start: false,
            should_fail_read: false,
            error_message: "mock audio error".to_string(),
        }
    }

    /// Samples returned by every read once the script is exhausted
    pub fn with_samples(mut self, samples: Vec<i16>) -> Self {
        self.samples = samples;
        self
    }

    /// Chunks returned by the first reads, in order
    pub fn with_script(self, chunks: Vec<Vec<i16>>) -> Self {
        if let Ok(mut script) = self.state.script.lock() {
            script.extend(chunks);
        }
        self
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail on read
    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Check if the audio source is started
    pub fn is_started(&self) -> bool {
        self.state.started.load(Ordering::SeqCst)
    }

    /// Number of successful starts
    pub fn start_count(&self) -> usize {
        self.state.start_count.load(Ordering::SeqCst)
    }

    /// Number of stops
    pub fn stop_count(&self) -> usize {
        self.state.stop_count.load(Ordering::SeqCst)
    }

    fn error(&self) -> LumiError {
        LumiError::AudioCapture {
            message: self.error_message.clone(),
        }
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            return Err(self.error());
        }
        self.state.started.store(true, Ordering::SeqCst);
        self.state.start_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.state.started.swap(false, Ordering::SeqCst) {
            self.state.stop_count.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        if self.should_fail_read {
            return Err(self.error());
        }
        if !self.is_started() {
            return Ok(Vec::new());
        }
        let scripted = self
            .state
            .script
            .lock()
            .map_err(|_| self.error())?
            .pop_front();
        Ok(scripted.unwrap_or_else(|| self.samples.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_audio_source_returns_configured_samples() {
        let test_samples = vec![100i16, 200, 300, 400, 500];
        let mut source = MockAudioSource::new().with_samples(test_samples.clone());
        source.start().unwrap();

        assert_eq!(source.read_samples().unwrap(), test_samples);
        assert_eq!(source.read_samples().unwrap(), test_samples);
    }

    #[test]
    fn test_mock_audio_source_reads_nothing_before_start() {
        let mut source = MockAudioSource::new();
        assert!(source.read_samples().unwrap().is_empty());
    }

    #[test]
    fn test_mock_audio_source_script_precedes_samples() {
        let mut source = MockAudioSource::new()
            .with_samples(vec![7])
            .with_script(vec![vec![1, 2], vec![3]]);
        source.start().unwrap();

        assert_eq!(source.read_samples().unwrap(), vec![1, 2]);
        assert_eq!(source.read_samples().unwrap(), vec![3]);
        assert_eq!(source.read_samples().unwrap(), vec![7]);
    }

    #[test]
    fn test_mock_audio_source_returns_custom_read_error() {
        let mut source = MockAudioSource::new()
            .with_read_failure()
            .with_error_message("buffer overflow");

        match source.read_samples() {
            Err(LumiError::AudioCapture { message }) => {
                assert_eq!(message, "buffer overflow");
            }
            _ => panic!("Expected AudioCapture error"),
        }
    }

    #[test]
    fn test_mock_audio_source_start_failure() {
        let mut source = MockAudioSource::new().with_start_failure();

        assert!(source.start().is_err());
        assert!(!source.is_started());
        assert_eq!(source.start_count(), 0);
    }

    #[test]
    fn test_clones_share_start_state() {
        let observer = MockAudioSource::new();
        let mut source = observer.clone();

        source.start().unwrap();
        assert!(observer.is_started());
        source.stop().unwrap();
        source.stop().unwrap();

        assert!(!observer.is_started());
        assert_eq!(observer.start_count(), 1);
        assert_eq!(observer.stop_count(), 1);
    }

    #[test]
    fn test_can_be_used_as_trait_object() {
        let mut source: Box<dyn AudioSource> = Box::new(MockAudioSource::new());
        assert!(source.start().is_ok());
        assert_eq!(source.read_samples().unwrap().len(), 160);
        assert!(source.stop().is_ok());
    }
}
