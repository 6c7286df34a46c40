//! Exclusive access to the capture device.
//!
//! The wake gate and microphone capture share one physical microphone. Both
//! go through [`Microphone::acquire`], which hands out at most one
//! [`MicLease`] at a time. Dropping the lease stops the device and returns it.

use crate::audio::recorder::AudioSource;
use crate::error::{LumiError, Result};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Component holding the microphone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicOwner {
    WakeGate,
    Capture,
}

impl fmt::Display for MicOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MicOwner::WakeGate => write!(f, "wake gate"),
            MicOwner::Capture => write!(f, "microphone capture"),
        }
    }
}

struct MicInner {
    source: Option<Box<dyn AudioSource>>,
    holder: Option<MicOwner>,
    wake_opens: usize,
    capture_opens: usize,
}

/// Arbiter for the single capture device.
#[derive(Clone)]
pub struct Microphone {
    inner: Arc<Mutex<MicInner>>,
}

impl Microphone {
    pub fn new(source: Box<dyn AudioSource>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MicInner {
                source: Some(source),
                holder: None,
                wake_opens: 0,
                capture_opens: 0,
            })),
        }
    }

    /// Open the device for `owner`.
    ///
    /// Fails with [`LumiError::DeviceBusy`] while another lease is alive, or
    /// with the device error if it cannot be started.
    pub fn acquire(&self, owner: MicOwner) -> Result<MicLease> {
        let mut source = {
            let mut inner = lock(&self.inner)?;
            if let Some(holder) = inner.holder {
                return Err(LumiError::DeviceBusy {
                    holder: holder.to_string(),
                });
            }
            let source = inner.source.take().ok_or_else(|| LumiError::AudioCapture {
                message: "capture device missing".to_string(),
            })?;
            inner.holder = Some(owner);
            source
        };

        // Started outside the lock; the holder mark keeps others out meanwhile.
        if let Err(e) = source.start() {
            let mut inner = lock(&self.inner)?;
            inner.source = Some(source);
            inner.holder = None;
            return Err(e);
        }

        {
            let mut inner = lock(&self.inner)?;
            match owner {
                MicOwner::WakeGate => inner.wake_opens += 1,
                MicOwner::Capture => inner.capture_opens += 1,
            }
        }
        tracing::debug!(%owner, "microphone acquired");

        Ok(MicLease {
            owner,
            source: Some(source),
            mic: Arc::clone(&self.inner),
        })
    }

    /// Current holder, if any.
    pub fn holder(&self) -> Option<MicOwner> {
        lock(&self.inner).ok().and_then(|inner| inner.holder)
    }

    /// How many times `owner` successfully opened the device.
    pub fn open_count(&self, owner: MicOwner) -> usize {
        lock(&self.inner)
            .map(|inner| match owner {
                MicOwner::WakeGate => inner.wake_opens,
                MicOwner::Capture => inner.capture_opens,
            })
            .unwrap_or(0)
    }
}

fn lock(inner: &Mutex<MicInner>) -> Result<MutexGuard<'_, MicInner>> {
    inner.lock().map_err(|e| LumiError::AudioCapture {
        message: format!("microphone lock poisoned: {}", e),
    })
}

/// Exclusive, running handle to the capture device.
pub struct MicLease {
    owner: MicOwner,
    source: Option<Box<dyn AudioSource>>,
    mic: Arc<Mutex<MicInner>>,
}

impl MicLease {
    pub fn owner(&self) -> MicOwner {
        self.owner
    }

    /// Read whatever the device buffered since the last read.
    pub fn read_samples(&mut self) -> Result<Vec<i16>> {
        match self.source.as_mut() {
            Some(source) => source.read_samples(),
            None => Ok(Vec::new()),
        }
    }
}

impl Drop for MicLease {
    fn drop(&mut self) {
        let Some(mut source) = self.source.take() else {
            return;
        };
        if let Err(e) = source.stop() {
            tracing::warn!(owner = %self.owner, error = %e, "failed to stop capture device");
        }
        let mut inner = self.mic.lock().unwrap_or_else(|e| e.into_inner());
        inner.source = Some(source);
        inner.holder = None;
        tracing::debug!(owner = %self.owner, "microphone released");
    }
}

/// Cuts an arbitrary sample stream into fixed-size frames.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_samples: usize,
    pending: Vec<i16>,
}

impl FrameAssembler {
    pub fn new(frame_samples: usize) -> Self {
        Self {
            frame_samples: frame_samples.max(1),
            pending: Vec::with_capacity(frame_samples),
        }
    }

    /// Append samples and return every frame completed by them.
    pub fn push(&mut self, samples: &[i16]) -> Vec<Vec<i16>> {
        self.pending.extend_from_slice(samples);
        let complete = self.pending.len() / self.frame_samples;
        if complete == 0 {
            return Vec::new();
        }
        let rest = self.pending.split_off(complete * self.frame_samples);
        let full = std::mem::replace(&mut self.pending, rest);
        full.chunks_exact(self.frame_samples)
            .map(<[i16]>::to_vec)
            .collect()
    }

    /// Drop any partial frame.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Frame energy: the mean absolute sample value, truncated.
///
/// Logged as "rms" but deliberately not a root-mean-square; the default
/// volume threshold is calibrated against this formula.
pub fn frame_energy(samples: &[i16]) -> u32 {
    if samples.is_empty() {
        return 0;
    }
    let sum: u64 = samples.iter().map(|&s| u64::from(s.unsigned_abs())).sum();
    (sum / samples.len() as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::recorder::MockAudioSource;

    #[test]
    fn second_owner_is_refused_while_leased() {
        let mic = Microphone::new(Box::new(MockAudioSource::new()));

        let lease = mic.acquire(MicOwner::WakeGate).unwrap();
        match mic.acquire(MicOwner::Capture) {
            Err(LumiError::DeviceBusy { holder }) => assert_eq!(holder, "wake gate"),
            _ => panic!("Expected DeviceBusy"),
        }
        assert_eq!(mic.holder(), Some(MicOwner::WakeGate));

        drop(lease);
        assert_eq!(mic.holder(), None);
        assert!(mic.acquire(MicOwner::Capture).is_ok());
    }

    #[test]
    fn dropping_lease_stops_device() {
        let source = MockAudioSource::new();
        let mic = Microphone::new(Box::new(source.clone()));

        let lease = mic.acquire(MicOwner::Capture).unwrap();
        assert!(source.is_started());
        drop(lease);

        assert!(!source.is_started());
        assert_eq!(source.stop_count(), 1);
        assert_eq!(mic.open_count(MicOwner::Capture), 1);
        assert_eq!(mic.open_count(MicOwner::WakeGate), 0);
    }

    #[test]
    fn failed_start_leaves_device_free() {
        let mic = Microphone::new(Box::new(MockAudioSource::new().with_start_failure()));

        assert!(mic.acquire(MicOwner::Capture).is_err());
        assert_eq!(mic.holder(), None);
        assert_eq!(mic.open_count(MicOwner::Capture), 0);
        // Device was returned, so the next attempt reaches it again.
        assert!(matches!(
            mic.acquire(MicOwner::WakeGate),
            Err(LumiError::AudioCapture { .. })
        ));
    }

    #[test]
    fn exclusion_holds_across_interleavings() {
        let mic = Microphone::new(Box::new(MockAudioSource::new()));
        let owners = [MicOwner::WakeGate, MicOwner::Capture];
        let mut held: Option<MicLease> = None;

        // Deterministic pseudo-random walk of acquire/release requests.
        let mut seed: u32 = 17;
        for _ in 0..500 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let owner = owners[(seed >> 16) as usize % 2];
            if (seed >> 8) % 3 == 0 {
                held = None;
            } else {
                match mic.acquire(owner) {
                    Ok(lease) => {
                        assert!(held.is_none(), "two leases alive at once");
                        held = Some(lease);
                    }
                    Err(LumiError::DeviceBusy { .. }) => assert!(held.is_some()),
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
            assert_eq!(mic.holder(), held.as_ref().map(MicLease::owner));
        }
    }

    #[test]
    fn assembler_emits_fixed_frames_and_keeps_remainder() {
        let mut assembler = FrameAssembler::new(4);

        assert!(assembler.push(&[1, 2, 3]).is_empty());
        let frames = assembler.push(&[4, 5, 6, 7, 8, 9]);
        assert_eq!(frames, vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8]]);

        assembler.clear();
        assert_eq!(assembler.push(&[10, 11, 12, 13]), vec![vec![10, 11, 12, 13]]);
    }

    #[test]
    fn energy_is_mean_absolute_value() {
        assert_eq!(frame_energy(&[]), 0);
        assert_eq!(frame_energy(&[100, -100, 300, -300]), 200);
        // Truncating integer division, not rounding.
        assert_eq!(frame_energy(&[1, 2]), 1);
        assert_eq!(frame_energy(&[i16::MIN]), 32768);
    }

    #[test]
    fn energy_differs_from_true_rms() {
        // Mean |x| of [0, 1000] is 500; RMS would be ~707.
        assert_eq!(frame_energy(&[0, 1000]), 500);
    }
}
