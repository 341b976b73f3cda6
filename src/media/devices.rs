//! Zugriff auf Kamera und Mikrofon
//!
//! `MediaDevices` ist die Naht zur Plattform. `SystemMediaDevices` nutzt cpal
//! für das Mikrofon und OpenCV für die Kamera (Feature `camera`). Beide
//! laufen über eine `MediaPump` in ihren Track, solange der Stream lebt.

use super::microphone::MicrophoneCapture;
use super::stream::{LocalMediaStream, TrackKind};
use async_trait::async_trait;
use thiserror::Error;
use tokio::runtime::Handle;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaAccessError {
    #[error("No {0} device available")]
    NoDevice(String),

    #[error("Permission to access media devices denied: {0}")]
    PermissionDenied(String),

    #[error("Media device error: {0}")]
    Device(String),

    #[error("Neither audio nor video was requested")]
    NothingRequested,

    #[error("Encoder error: {0}")]
    Encoder(String),
}

// ============================================================================
// CONSTRAINTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

/// Audio ohne Echo- und Rauschunterdrückung
impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: false,
            noise_suppression: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub video: bool,
    /// `None` = kein Audio
    pub audio: Option<AudioConstraints>,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            video: true,
            audio: Some(AudioConstraints::default()),
        }
    }
}

impl MediaConstraints {
    pub fn requested_kinds(&self) -> Vec<TrackKind> {
        let mut kinds = Vec::with_capacity(2);
        if self.audio.is_some() {
            kinds.push(TrackKind::Audio);
        }
        if self.video {
            kinds.push(TrackKind::Video);
        }
        kinds
    }
}

// ============================================================================
// MEDIA DEVICES
// ============================================================================

#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Fordert lokale Tracks gemäß `constraints` an
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<LocalMediaStream, MediaAccessError>;
}

/// Plattform-Implementierung auf Basis von cpal und OpenCV
#[derive(Debug, Default, Clone)]
pub struct SystemMediaDevices {
    camera_index: i32,
}

impl SystemMediaDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wählt eine andere Kamera als die Standardkamera (Index 0)
    pub fn with_camera(camera_index: i32) -> Self {
        Self { camera_index }
    }

    #[cfg(feature = "camera")]
    async fn start_camera(&self, stream: &LocalMediaStream, runtime: Handle) -> Result<(), MediaAccessError> {
        use super::camera::OpenCvCamera;
        use super::pump::MediaPump;

        let track = stream
            .video_tracks()
            .next()
            .cloned()
            .ok_or_else(|| MediaAccessError::Device("video track missing".to_string()))?;
        let index = self.camera_index;

        // Öffnen blockiert, der Pumpen-Thread meldet Erfolg oder Fehler
        let pump = tokio::task::spawn_blocking(move || {
            MediaPump::video(move || OpenCvCamera::open(index), track, runtime)
        })
        .await
        .map_err(|e| MediaAccessError::Device(e.to_string()))??;

        stream.attach_pump(pump);
        Ok(())
    }

    #[cfg(not(feature = "camera"))]
    async fn start_camera(&self, _stream: &LocalMediaStream, _runtime: Handle) -> Result<(), MediaAccessError> {
        Err(MediaAccessError::NoDevice(
            "camera (built without camera support)".to_string(),
        ))
    }
}

#[async_trait]
impl MediaDevices for SystemMediaDevices {
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<LocalMediaStream, MediaAccessError> {
        let kinds = constraints.requested_kinds();
        if kinds.is_empty() {
            return Err(MediaAccessError::NothingRequested);
        }

        let stream = LocalMediaStream::new(&kinds);
        let runtime = Handle::current();

        // Bei Fehlern räumt das Drop des Streams bereits gestartete Geräte ab
        if let Some(audio) = constraints.audio {
            if audio.echo_cancellation || audio.noise_suppression {
                tracing::debug!(
                    "Host audio API offers no echo cancellation/noise suppression, capturing raw"
                );
            }

            let enabled = stream
                .audio_tracks()
                .next()
                .map(|t| t.enabled_flag())
                .ok_or_else(|| MediaAccessError::Device("audio track missing".to_string()))?;

            // cpal blockiert beim Öffnen des Geräts
            let capture = tokio::task::spawn_blocking(move || MicrophoneCapture::start(enabled))
                .await
                .map_err(|e| MediaAccessError::Device(e.to_string()))??;

            stream.attach_microphone(capture, runtime.clone())?;
        }

        if constraints.video {
            self.start_camera(&stream, runtime).await?;
        }

        tracing::info!(
            "Acquired local media {} ({} track(s))",
            stream.id(),
            stream.tracks().len()
        );

        Ok(stream)
    }
}
