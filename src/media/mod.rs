//! Media Module - lokale Kamera- und Mikrofon-Tracks
//!
//! Dieses Modul verwaltet:
//! - Anfordern der lokalen Tracks (getUserMedia-Äquivalent)
//! - Mikrofon-Capture über cpal, Kamera-Capture über OpenCV
//! - Opus- und H.264-Encoding, Pumpen vom Capture in den Track
//! - Enable/Disable pro Track-Art (Mute, Kamera aus)

#[cfg(feature = "camera")]
mod camera;
mod codec;
mod devices;
mod microphone;
mod pump;
mod stream;

#[cfg(feature = "camera")]
pub use camera::OpenCvCamera;
pub use codec::{H264Encoder, OpusEncoder, RgbFrame, DEFAULT_VIDEO_BITRATE};
pub use devices::{AudioConstraints, MediaAccessError, MediaConstraints, MediaDevices, SystemMediaDevices};
pub use microphone::MicrophoneCapture;
pub use pump::{FrameSource, MediaPump, AUDIO_FRAME_DURATION};
pub use stream::{LocalMediaStream, LocalTrack, TrackKind};

/// Sample Rate (48kHz, Opus-Standard)
pub const SAMPLE_RATE: u32 = 48000;

/// Frame Size in Samples (20ms @ 48kHz = 960 samples)
pub const FRAME_SIZE: usize = 960;
