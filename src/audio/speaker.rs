use crate::error::{LumiError, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Trait for audio output devices.
pub trait PlaybackDevice: Send {
    /// Open the device for 16-bit PCM at the given format.
    fn open(&mut self, sample_rate: u32, channels: u16) -> Result<()>;

    /// Write decoded PCM. May buffer internally.
    fn write(&mut self, pcm: &[i16]) -> Result<()>;

    /// Release the device. Safe to call when not open.
    fn close(&mut self);
}

#[derive(Debug, Default)]
struct MockPlaybackState {
    open: AtomicBool,
    open_count: AtomicUsize,
    writes: Mutex<Vec<Vec<i16>>>,
}

/// Mock playback device recording every write.
///
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockPlaybackDevice {
    state: Arc<MockPlaybackState>,
    should_fail_open: bool,
    should_fail_write: bool,
}

impl MockPlaybackDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the mock to fail on open
    pub fn with_open_failure(mut self) -> Self {
        self.should_fail_open = true;
        self
    }

    /// Configure the mock to fail on every write
    pub fn with_write_failure(mut self) -> Self {
        self.should_fail_write = true;
        self
    }

    pub fn is_open(&self) -> bool {
        self.state.open.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.state.open_count.load(Ordering::SeqCst)
    }

    /// Every successful write, in order.
    pub fn writes(&self) -> Vec<Vec<i16>> {
        self.state
            .writes
            .lock()
            .map(|w| w.clone())
            .unwrap_or_default()
    }
}

impl PlaybackDevice for MockPlaybackDevice {
    fn open(&mut self, _sample_rate: u32, _channels: u16) -> Result<()> {
        if self.should_fail_open {
            return Err(LumiError::AudioPlayback {
                message: "mock output unavailable".to_string(),
            });
        }
        self.state.open.store(true, Ordering::SeqCst);
        self.state.open_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn write(&mut self, pcm: &[i16]) -> Result<()> {
        if self.should_fail_write || !self.is_open() {
            return Err(LumiError::AudioPlayback {
                message: "mock write failed".to_string(),
            });
        }
        if let Ok(mut writes) = self.state.writes.lock() {
            writes.push(pcm.to_vec());
        }
        Ok(())
    }

    fn close(&mut self) {
        self.state.open.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_records_writes_while_open() {
        let observer = MockPlaybackDevice::new();
        let mut device = observer.clone();

        assert!(device.write(&[1]).is_err());
        device.open(16000, 1).unwrap();
        device.write(&[1, 2]).unwrap();
        device.write(&[3]).unwrap();
        device.close();

        assert_eq!(observer.writes(), vec![vec![1, 2], vec![3]]);
        assert!(!observer.is_open());
        assert_eq!(observer.open_count(), 1);
    }

    #[test]
    fn mock_open_failure() {
        let mut device = MockPlaybackDevice::new().with_open_failure();
        assert!(device.open(16000, 1).is_err());
        assert!(!device.is_open());
    }
}
