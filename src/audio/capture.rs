//! Microphone and speaker devices backed by CPAL.

use crate::audio::recorder::AudioSource;
use crate::audio::speaker::PlaybackDevice;
use crate::defaults;
use crate::error::{LumiError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// CPAL probing makes ALSA/JACK print harmless noise.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Preferred device names for PipeWire/PulseAudio desktops.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Device name patterns that are never useful for a voice assistant.
const FILTERED_PATTERNS: &[&str] = &["surround", "front:", "rear:", "center:", "side:", "HDMI", "S/PDIF"];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

/// Which side of the audio stack to enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Input,
    Output,
}

/// List usable device names, marking preferred ones with "\[recommended\]".
pub fn list_devices(kind: DeviceKind) -> Result<Vec<String>> {
    let devices = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        match kind {
            DeviceKind::Input => host.input_devices().map(|d| d.collect::<Vec<_>>()),
            DeviceKind::Output => host.output_devices().map(|d| d.collect::<Vec<_>>()),
        }
    })
    .map_err(|e| LumiError::AudioCapture {
        message: format!("Failed to enumerate devices: {}", e),
    })?;

    Ok(devices
        .iter()
        .filter_map(|device| device.name().ok())
        .filter(|name| !should_filter_device(name))
        .map(|name| {
            if is_preferred_device(&name) {
                format!("{} [recommended]", name)
            } else {
                name
            }
        })
        .collect())
}

/// Find a device by exact name, or the best default for `kind`.
fn find_device(kind: DeviceKind, device_name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices: Vec<cpal::Device> = match kind {
            DeviceKind::Input => host.input_devices().map(|d| d.collect::<Vec<_>>()),
            DeviceKind::Output => host.output_devices().map(|d| d.collect::<Vec<_>>()),
        }
        .unwrap_or_default();

        if let Some(name) = device_name {
            return devices
                .into_iter()
                .find(|dev| dev.name().is_ok_and(|n| n == name))
                .ok_or_else(|| LumiError::AudioDeviceNotFound {
                    device: name.to_string(),
                });
        }

        if let Some(device) = devices
            .into_iter()
            .find(|dev| dev.name().is_ok_and(|n| is_preferred_device(&n)))
        {
            return Ok(device);
        }

        match kind {
            DeviceKind::Input => host.default_input_device(),
            DeviceKind::Output => host.default_output_device(),
        }
        .ok_or_else(|| LumiError::AudioDeviceNotFound {
            device: "default".to_string(),
        })
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only touched by the thread that owns the device
/// struct, behind `&mut self`.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Average channels to mono and linearly resample to `target_rate`.
fn to_mono_at_rate(samples: &[i16], channels: usize, source_rate: u32, target_rate: u32) -> Vec<i16> {
    let mono: Vec<i16> = if channels <= 1 {
        samples.to_vec()
    } else {
        samples
            .chunks_exact(channels)
            .map(|frame| (frame.iter().map(|&s| s as i32).sum::<i32>() / channels as i32) as i16)
            .collect()
    };
    resample(&mono, source_rate, target_rate)
}

/// Linear-interpolation resampler.
fn resample(samples: &[i16], source_rate: u32, target_rate: u32) -> Vec<i16> {
    if source_rate == target_rate || samples.is_empty() || source_rate == 0 {
        return samples.to_vec();
    }
    let ratio = source_rate as f64 / target_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos as usize;
            let frac = pos - idx as f64;
            let a = samples[idx] as f64;
            let b = samples.get(idx + 1).copied().unwrap_or(samples[idx]) as f64;
            (a + (b - a) * frac) as i16
        })
        .collect()
}

/// Microphone captured through CPAL, delivered as 16 kHz mono i16.
///
/// Tries i16/16kHz/mono, then f32/16kHz/mono, then the device's native config
/// with software conversion.
pub struct CpalAudioSource {
    device: cpal::Device,
    stream: Option<SendableStream>,
    buffer: Arc<Mutex<Vec<i16>>>,
    sample_rate: u32,
}

impl CpalAudioSource {
    /// Open the named input device, or the best default.
    pub fn new(device_name: Option<&str>) -> Result<Self> {
        let device = find_device(DeviceKind::Input, device_name)?;
        Ok(Self {
            device,
            stream: None,
            buffer: Arc::new(Mutex::new(Vec::new())),
            sample_rate: defaults::SAMPLE_RATE,
        })
    }

    fn build_stream(&self) -> Result<cpal::Stream> {
        let preferred = cpal::StreamConfig {
            channels: defaults::CHANNELS,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let err_callback = |err: cpal::StreamError| tracing::warn!(error = %err, "audio input stream error");

        let buffer = Arc::clone(&self.buffer);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend_from_slice(data);
                }
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        let buffer = Arc::clone(&self.buffer);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend(data.iter().map(|&s| f32_to_i16(s)));
                }
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        self.build_native_stream()
    }

    fn build_native_stream(&self) -> Result<cpal::Stream> {
        let native = self
            .device
            .default_input_config()
            .map_err(|e| LumiError::AudioCapture {
                message: format!("Failed to query default input config: {}", e),
            })?;
        let rate = native.sample_rate().0;
        let channels = native.channels() as usize;
        let target = self.sample_rate;
        let config: cpal::StreamConfig = native.clone().into();
        tracing::info!(channels, rate, format = ?native.sample_format(), "using native input format");

        let err_callback = |err: cpal::StreamError| tracing::warn!(error = %err, "audio input stream error");
        let buffer = Arc::clone(&self.buffer);
        let stream = match native.sample_format() {
            cpal::SampleFormat::I16 => self.device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let converted = to_mono_at_rate(data, channels, rate, target);
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(&converted);
                    }
                },
                err_callback,
                None,
            ),
            cpal::SampleFormat::F32 => self.device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let as_i16: Vec<i16> = data.iter().map(|&s| f32_to_i16(s)).collect();
                    let converted = to_mono_at_rate(&as_i16, channels, rate, target);
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(&converted);
                    }
                },
                err_callback,
                None,
            ),
            fmt => {
                return Err(LumiError::AudioCapture {
                    message: format!("Unsupported native sample format: {:?}", fmt),
                });
            }
        };
        stream.map_err(|e| LumiError::AudioCapture {
            message: format!("Failed to build input stream: {}", e),
        })
    }
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
        let stream = self.build_stream()?;
        stream.play().map_err(|e| LumiError::AudioCapture {
            message: format!("Failed to start audio stream: {}", e),
        })?;
        self.stream = Some(SendableStream(stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            stream.0.pause().map_err(|e| LumiError::AudioCapture {
                message: format!("Failed to stop audio stream: {}", e),
            })?;
        }
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        let mut buffer = self.buffer.lock().map_err(|e| LumiError::AudioCapture {
            message: format!("Failed to lock audio buffer: {}", e),
        })?;
        Ok(std::mem::take(&mut *buffer))
    }
}

/// Speaker output through CPAL.
///
/// Writes go into a shared sample queue that the output callback drains,
/// padding with silence when it runs dry.
pub struct CpalPlaybackDevice {
    device_name: Option<String>,
    stream: Option<SendableStream>,
    queue: Arc<Mutex<VecDeque<i16>>>,
}

impl CpalPlaybackDevice {
    pub fn new(device_name: Option<&str>) -> Self {
        Self {
            device_name: device_name.map(str::to_string),
            stream: None,
            queue: Arc::new(Mutex::new(VecDeque::new())),
        }
    }
}

impl PlaybackDevice for CpalPlaybackDevice {
    fn open(&mut self, sample_rate: u32, channels: u16) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let device = find_device(DeviceKind::Output, self.device_name.as_deref())?;
        let config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let queue = Arc::clone(&self.queue);
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    let mut queue = queue.lock().unwrap_or_else(|e| e.into_inner());
                    for out in data.iter_mut() {
                        *out = queue.pop_front().unwrap_or(0);
                    }
                },
                |err: cpal::StreamError| tracing::warn!(error = %err, "audio output stream error"),
                None,
            )
            .map_err(|e| LumiError::AudioPlayback {
                message: format!("Failed to build output stream: {}", e),
            })?;
        stream.play().map_err(|e| LumiError::AudioPlayback {
            message: format!("Failed to start output stream: {}", e),
        })?;
        tracing::debug!(sample_rate, channels, "audio playback opened");
        self.stream = Some(SendableStream(stream));
        Ok(())
    }

    fn write(&mut self, pcm: &[i16]) -> Result<()> {
        if self.stream.is_none() {
            return Err(LumiError::AudioPlayback {
                message: "output device not open".to_string(),
            });
        }
        let mut queue = self.queue.lock().map_err(|e| LumiError::AudioPlayback {
            message: format!("Failed to lock output queue: {}", e),
        })?;
        queue.extend(pcm.iter().copied());
        Ok(())
    }

    fn close(&mut self) {
        self.stream = None;
        if let Ok(mut queue) = self.queue.lock() {
            queue.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_filter_device() {
        assert!(should_filter_device("surround51"));
        assert!(should_filter_device("front:CARD=PCH"));
        assert!(should_filter_device("HDMI Output"));
        assert!(!should_filter_device("pipewire"));
        assert!(!should_filter_device("Built-in Audio"));
    }

    #[test]
    fn test_is_preferred_device() {
        assert!(is_preferred_device("PipeWire"));
        assert!(is_preferred_device("pulse"));
        assert!(!is_preferred_device("hw:0,0"));
    }

    #[test]
    fn test_stereo_is_averaged_to_mono() {
        let stereo = [100, 300, -200, 0];
        assert_eq!(to_mono_at_rate(&stereo, 2, 16000, 16000), vec![200, -100]);
    }

    #[test]
    fn test_resample_halves_length_when_downsampling_by_two() {
        let samples: Vec<i16> = (0..100).collect();
        let out = resample(&samples, 32000, 16000);
        assert_eq!(out.len(), 50);
        assert_eq!(out[0], 0);
        assert_eq!(out[1], 2);
    }

    #[test]
    fn test_f32_conversion_clamps() {
        assert_eq!(f32_to_i16(2.0), i16::MAX);
        assert_eq!(f32_to_i16(0.0), 0);
    }

    #[test]
    fn test_create_with_invalid_device_name() {
        match CpalAudioSource::new(Some("NonExistentDevice12345")) {
            Err(LumiError::AudioDeviceNotFound { device }) => {
                assert_eq!(device, "NonExistentDevice12345");
            }
            _ => panic!("Expected AudioDeviceNotFound error"),
        }
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_capture_start_read_stop() {
        let mut source = CpalAudioSource::new(None).expect("Failed to create audio source");
        assert!(source.start().is_ok());
        std::thread::sleep(std::time::Duration::from_millis(100));
        assert!(source.read_samples().is_ok());
        assert!(source.stop().is_ok());
    }

    #[test]
    fn test_write_before_open_fails() {
        let mut device = CpalPlaybackDevice::new(None);
        assert!(device.write(&[0; 10]).is_err());
    }
}
