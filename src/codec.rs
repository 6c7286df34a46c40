//! Audio codec adapter.
//!
//! Capture encodes fixed-size PCM frames, playback decodes whatever the server
//! sends. Sessions are created once per capture/playback run from a [`Codec`]
//! factory. A failed call affects only that frame; callers log and move on.

use crate::defaults;
use crate::error::{LumiError, Result};

/// Parameters both ends of the stream agree on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecParams {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_samples: usize,
}

impl Default for CodecParams {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            channels: defaults::CHANNELS,
            frame_samples: defaults::FRAME_SAMPLES,
        }
    }
}

/// Stateful encoder session.
pub trait Encoder: Send {
    /// Encode one frame of PCM samples.
    fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>>;
}

/// Stateful decoder session.
pub trait Decoder: Send {
    /// Decode one compressed buffer to PCM samples.
    fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>>;
}

/// Factory for encoder/decoder sessions.
pub trait Codec: Send + Sync {
    fn encoder(&self, params: CodecParams) -> Result<Box<dyn Encoder>>;
    fn decoder(&self, params: CodecParams) -> Result<Box<dyn Decoder>>;
}

/// Uncompressed 16-bit little-endian PCM.
///
/// Servers that accept raw PCM (and every test) use this; a compressing
/// codec plugs in through the same traits.
#[derive(Debug, Clone, Copy, Default)]
pub struct PcmCodec;

impl Codec for PcmCodec {
    fn encoder(&self, params: CodecParams) -> Result<Box<dyn Encoder>> {
        validate(params)?;
        Ok(Box::new(PcmEncoder {
            frame_samples: params.frame_samples * params.channels as usize,
        }))
    }

    fn decoder(&self, params: CodecParams) -> Result<Box<dyn Decoder>> {
        validate(params)?;
        Ok(Box::new(PcmDecoder))
    }
}

fn validate(params: CodecParams) -> Result<()> {
    if params.sample_rate == 0 || params.channels == 0 || params.frame_samples == 0 {
        return Err(LumiError::Codec {
            message: format!("invalid codec parameters: {:?}", params),
        });
    }
    Ok(())
}

struct PcmEncoder {
    frame_samples: usize,
}

impl Encoder for PcmEncoder {
    fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>> {
        if pcm.len() != self.frame_samples {
            return Err(LumiError::Codec {
                message: format!(
                    "frame has {} samples, expected {}",
                    pcm.len(),
                    self.frame_samples
                ),
            });
        }
        Ok(pcm.iter().flat_map(|s| s.to_le_bytes()).collect())
    }
}

struct PcmDecoder;

impl Decoder for PcmDecoder {
    fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>> {
        if data.len() % 2 != 0 {
            return Err(LumiError::Codec {
                message: format!("odd PCM buffer length {}", data.len()),
            });
        }
        Ok(data
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_match_frame_contract() {
        let params = CodecParams::default();
        assert_eq!(params.sample_rate, 16000);
        assert_eq!(params.channels, 1);
        assert_eq!(params.frame_samples, 960);
    }

    #[test]
    fn pcm_encoder_is_little_endian() {
        let params = CodecParams {
            frame_samples: 2,
            ..CodecParams::default()
        };
        let mut encoder = PcmCodec.encoder(params).unwrap();
        assert_eq!(encoder.encode(&[1, -2]).unwrap(), vec![0x01, 0x00, 0xFE, 0xFF]);
    }

    #[test]
    fn pcm_encoder_rejects_wrong_frame_size() {
        let mut encoder = PcmCodec.encoder(CodecParams::default()).unwrap();
        let err = encoder.encode(&[0; 100]).unwrap_err();
        assert!(matches!(err, LumiError::Codec { .. }));
    }

    #[test]
    fn pcm_decoder_rejects_odd_length() {
        let mut decoder = PcmCodec.decoder(CodecParams::default()).unwrap();
        assert!(decoder.decode(&[1, 2, 3]).is_err());
        assert_eq!(decoder.decode(&[0x10, 0x00]).unwrap(), vec![16]);
    }

    #[test]
    fn zero_parameters_fail_session_creation() {
        let params = CodecParams {
            sample_rate: 0,
            ..CodecParams::default()
        };
        assert!(PcmCodec.encoder(params).is_err());
        assert!(PcmCodec.decoder(params).is_err());
    }
}
