//! Encoder für die lokalen Tracks
//!
//! Audio: 20ms PCM-Frames (48kHz mono) → Opus.
//! Video: RGB-Frames → H.264 Annex-B Bytestream (openh264).

use super::devices::MediaAccessError;
use super::{FRAME_SIZE, SAMPLE_RATE};
use openh264::encoder::{
    BitRate, Encoder, EncoderConfig, FrameRate, IntraFramePeriod, RateControlMode, SpsPpsStrategy,
    UsageType,
};
use openh264::formats::{RgbSliceU8, YUVBuffer};
use openh264::OpenH264API;

/// Opus-Bitrate für Sprache
const OPUS_BITRATE: i32 = 32_000;

/// Maximale Größe eines Opus-Pakets
const MAX_OPUS_PACKET: usize = 4000;

/// Standard-Bitrate für das Kamerabild
pub const DEFAULT_VIDEO_BITRATE: u32 = 800_000;

fn encoder_err(e: impl std::fmt::Display) -> MediaAccessError {
    MediaAccessError::Encoder(e.to_string())
}

// ============================================================================
// OPUS
// ============================================================================

pub struct OpusEncoder {
    inner: opus::Encoder,
    output: Vec<u8>,
}

impl OpusEncoder {
    pub fn new() -> Result<Self, MediaAccessError> {
        let mut inner = opus::Encoder::new(SAMPLE_RATE, opus::Channels::Mono, opus::Application::Voip)
            .map_err(encoder_err)?;
        inner
            .set_bitrate(opus::Bitrate::Bits(OPUS_BITRATE))
            .map_err(encoder_err)?;

        Ok(Self {
            inner,
            output: vec![0u8; MAX_OPUS_PACKET],
        })
    }

    /// Kodiert genau einen Frame von `FRAME_SIZE` Samples
    pub fn encode(&mut self, pcm: &[f32]) -> Result<Vec<u8>, MediaAccessError> {
        if pcm.len() != FRAME_SIZE {
            return Err(MediaAccessError::Encoder(format!(
                "expected {} samples, got {}",
                FRAME_SIZE,
                pcm.len()
            )));
        }

        let len = self
            .inner
            .encode_float(pcm, &mut self.output)
            .map_err(encoder_err)?;
        Ok(self.output[..len].to_vec())
    }
}

// ============================================================================
// H.264
// ============================================================================

/// Dicht gepacktes RGB-Bild (3 Bytes pro Pixel)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RgbFrame {
    /// Einfarbiges Bild
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = (width * height) as usize;
        let data = rgb.iter().copied().cycle().take(pixels * 3).collect();
        Self {
            width,
            height,
            data,
        }
    }
}

pub struct H264Encoder {
    inner: Encoder,
}

impl H264Encoder {
    pub fn new(fps: u32, bitrate_bps: u32) -> Result<Self, MediaAccessError> {
        let fps = fps.max(1);
        let config = EncoderConfig::new()
            .usage_type(UsageType::CameraVideoRealTime)
            .max_frame_rate(FrameRate::from_hz(fps as f32))
            .bitrate(BitRate::from_bps(bitrate_bps))
            .rate_control_mode(RateControlMode::Bitrate)
            // SPS/PPS mit jedem Keyframe, damit der Empfänger jederzeit einsteigen kann
            .sps_pps_strategy(SpsPpsStrategy::ConstantId)
            .intra_frame_period(IntraFramePeriod::from_num_frames(fps * 2));

        let inner = Encoder::with_api_config(OpenH264API::from_source(), config).map_err(encoder_err)?;
        Ok(Self { inner })
    }

    pub fn encode(&mut self, frame: &RgbFrame) -> Result<Vec<u8>, MediaAccessError> {
        let (w, h) = (frame.width as usize, frame.height as usize);
        if w == 0 || h == 0 || w % 2 != 0 || h % 2 != 0 {
            return Err(MediaAccessError::Encoder(format!(
                "unsupported frame size {}x{}",
                w, h
            )));
        }
        if frame.data.len() != w * h * 3 {
            return Err(MediaAccessError::Encoder(format!(
                "frame has {} bytes, expected {}",
                frame.data.len(),
                w * h * 3
            )));
        }

        let yuv = YUVBuffer::from_rgb_source(RgbSliceU8::new(&frame.data, (w, h)));
        let bitstream = self.inner.encode(&yuv).map_err(encoder_err)?;
        Ok(bitstream.to_vec())
    }
}
