//! Voice Activity Detection.
//!
//! Classifies each frame by its energy against a volume threshold and tracks
//! how long the input has been quiet. The "silence detected" verdict is
//! edge-triggered: it is returned once per silence episode, and only loud
//! input re-enables it.

use crate::defaults;
use std::time::{Duration, Instant};

/// Thresholds for the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VadConfig {
    /// Frame energy above which a frame counts as sound.
    pub volume_threshold: u32,
    /// Quiet time after which the utterance is considered over.
    pub silence_threshold: Duration,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            volume_threshold: defaults::VOLUME_THRESHOLD,
            silence_threshold: Duration::from_millis(defaults::SILENCE_THRESHOLD_MS),
        }
    }
}

/// Result of one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadVerdict {
    /// Energy above threshold.
    Speech,
    /// Quiet for this long; no event.
    Silence(Duration),
    /// Quiet longer than the threshold; first time in this episode.
    SilenceDetected(Duration),
}

impl VadVerdict {
    pub fn is_silence_detected(&self) -> bool {
        matches!(self, VadVerdict::SilenceDetected(_))
    }
}

/// Stateful silence timer.
///
/// Unarmed detectors never report silence.
#[derive(Debug, Clone)]
pub struct SilenceDetector {
    config: VadConfig,
    last_sound: Option<Instant>,
    silent: bool,
}

impl SilenceDetector {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            last_sound: None,
            silent: false,
        }
    }

    /// Start a new recording session: the clock starts at `now`.
    pub fn arm(&mut self, now: Instant) {
        self.last_sound = Some(now);
        self.silent = false;
    }

    /// Stop tracking until the next [`arm`](Self::arm).
    pub fn disarm(&mut self) {
        self.last_sound = None;
        self.silent = false;
    }

    pub fn is_armed(&self) -> bool {
        self.last_sound.is_some()
    }

    /// Timestamp of the last frame above the volume threshold.
    pub fn last_sound(&self) -> Option<Instant> {
        self.last_sound
    }

    pub fn config(&self) -> VadConfig {
        self.config
    }

    /// Replace thresholds without resetting the session.
    pub fn set_config(&mut self, config: VadConfig) {
        self.config = config;
    }

    /// Feed one frame's energy.
    pub fn observe(&mut self, energy: u32, now: Instant) -> VadVerdict {
        if !self.is_armed() {
            return VadVerdict::Silence(Duration::ZERO);
        }
        if energy > self.config.volume_threshold {
            self.last_sound = Some(now);
            self.silent = false;
            return VadVerdict::Speech;
        }
        self.check(now)
    }

    /// Evaluate the silence timer without new input (periodic backstop).
    pub fn check(&mut self, now: Instant) -> VadVerdict {
        let Some(last_sound) = self.last_sound else {
            return VadVerdict::Silence(Duration::ZERO);
        };
        let quiet = now.saturating_duration_since(last_sound);
        if quiet > self.config.silence_threshold && !self.silent {
            self.silent = true;
            return VadVerdict::SilenceDetected(quiet);
        }
        VadVerdict::Silence(quiet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector(volume: u32, silence_ms: u64) -> SilenceDetector {
        SilenceDetector::new(VadConfig {
            volume_threshold: volume,
            silence_threshold: Duration::from_millis(silence_ms),
        })
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn loud_frame_is_speech() {
        let start = Instant::now();
        let mut vad = detector(900, 2000);
        vad.arm(start);

        assert_eq!(vad.observe(901, start + ms(60)), VadVerdict::Speech);
        assert_eq!(vad.last_sound(), Some(start + ms(60)));
    }

    #[test]
    fn threshold_itself_is_not_speech() {
        let start = Instant::now();
        let mut vad = detector(900, 2000);
        vad.arm(start);

        assert_eq!(vad.observe(900, start + ms(60)), VadVerdict::Silence(ms(60)));
        assert_eq!(vad.last_sound(), Some(start));
    }

    #[test]
    fn silence_must_exceed_threshold_strictly() {
        let start = Instant::now();
        let mut vad = detector(900, 2000);
        vad.arm(start);

        assert_eq!(vad.observe(0, start + ms(2000)), VadVerdict::Silence(ms(2000)));
        assert_eq!(
            vad.observe(0, start + ms(2001)),
            VadVerdict::SilenceDetected(ms(2001))
        );
    }

    #[test]
    fn silence_fires_once_per_episode() {
        let start = Instant::now();
        let mut vad = detector(900, 500);
        vad.arm(start);

        let mut fired = 0;
        for i in 1..=40 {
            if vad.observe(10, start + ms(i * 60)).is_silence_detected() {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);

        // Periodic check while still silent does not re-fire either.
        assert!(!vad.check(start + ms(5000)).is_silence_detected());
    }

    #[test]
    fn speech_rearms_the_edge() {
        let start = Instant::now();
        let mut vad = detector(900, 500);
        vad.arm(start);

        assert!(vad.observe(0, start + ms(600)).is_silence_detected());
        assert_eq!(vad.observe(2000, start + ms(700)), VadVerdict::Speech);
        assert!(!vad.observe(0, start + ms(1100)).is_silence_detected());
        assert!(vad.observe(0, start + ms(1300)).is_silence_detected());
    }

    #[test]
    fn inline_and_backstop_paths_share_the_edge() {
        let start = Instant::now();
        let mut vad = detector(900, 500);
        vad.arm(start);

        assert!(vad.check(start + ms(501)).is_silence_detected());
        assert!(!vad.observe(0, start + ms(520)).is_silence_detected());
    }

    #[test]
    fn unarmed_detector_never_fires() {
        let start = Instant::now();
        let mut vad = detector(900, 500);

        assert!(!vad.observe(0, start + ms(10_000)).is_silence_detected());
        assert!(!vad.check(start + ms(10_000)).is_silence_detected());

        vad.arm(start);
        vad.disarm();
        assert!(!vad.check(start + ms(10_000)).is_silence_detected());
    }

    #[test]
    fn rearming_starts_a_fresh_session() {
        let start = Instant::now();
        let mut vad = detector(900, 500);
        vad.arm(start);
        assert!(vad.check(start + ms(600)).is_silence_detected());

        vad.arm(start + ms(1000));
        assert!(!vad.check(start + ms(1400)).is_silence_detected());
        assert!(vad.check(start + ms(1501)).is_silence_detected());
    }
}
