//! Lokale Media-Tracks und Streams
//!
//! Ein `LocalTrack` kapselt einen WebRTC Sample-Track plus Enabled-Flag.
//! Deaktivierte oder gestoppte Tracks verwerfen Samples, statt sie zu senden.
//! Audio wird als Opus, Video als H.264 (Constrained Baseline) gesendet.

use super::devices::MediaAccessError;
use super::microphone::MicrophoneCapture;
use super::pump::MediaPump;
use super::SAMPLE_RATE;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use webrtc::api::media_engine::{MIME_TYPE_H264, MIME_TYPE_OPUS};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Packetization Mode 1, Constrained Baseline 3.1 (passt zu openh264)
const H264_FMTP: &str = "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";

// ============================================================================
// TRACK KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }

    fn codec_capability(&self) -> RTCRtpCodecCapability {
        match self {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: SAMPLE_RATE,
                channels: 1,
                ..Default::default()
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_string(),
                clock_rate: 90000,
                sdp_fmtp_line: H264_FMTP.to_string(),
                ..Default::default()
            },
        }
    }
}

// ============================================================================
// LOCAL TRACK
// ============================================================================

/// Ein lokaler Audio- oder Video-Track
pub struct LocalTrack {
    id: String,
    kind: TrackKind,
    enabled: Arc<AtomicBool>,
    live: AtomicBool,
    samples_sent: AtomicU64,
    rtc: Arc<TrackLocalStaticSample>,
}

impl LocalTrack {
    pub fn new(kind: TrackKind, stream_id: &str) -> Self {
        let id = format!("{}-{}", kind.as_str(), uuid::Uuid::new_v4());
        let rtc = Arc::new(TrackLocalStaticSample::new(
            kind.codec_capability(),
            id.clone(),
            stream_id.to_string(),
        ));

        Self {
            id,
            kind,
            enabled: Arc::new(AtomicBool::new(true)),
            live: AtomicBool::new(true),
            samples_sent: AtomicU64::new(0),
            rtc,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Kehrt das Enabled-Flag um und gibt den neuen Wert zurück
    pub fn toggle_enabled(&self) -> bool {
        !self.enabled.fetch_xor(true, Ordering::SeqCst)
    }

    /// Geteiltes Flag, das auch der Capture-Thread liest
    pub(crate) fn enabled_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.enabled)
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Beendet den Track endgültig
    pub fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            tracing::debug!("Stopped local {} track {}", self.kind.as_str(), self.id);
        }
    }

    /// Track für `RTCPeerConnection::add_track`
    pub fn rtc_track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        Arc::clone(&self.rtc) as Arc<dyn TrackLocal + Send + Sync>
    }

    /// Schreibt ein kodiertes Sample. Gibt `false` zurück, wenn es verworfen wurde.
    pub async fn write_sample(&self, sample: &Sample) -> Result<bool, webrtc::Error> {
        if !self.is_live() || !self.is_enabled() {
            return Ok(false);
        }
        self.rtc.write_sample(sample).await?;
        self.samples_sent.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    /// Anzahl tatsächlich geschriebener Samples
    pub fn samples_sent(&self) -> u64 {
        self.samples_sent.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("live", &self.is_live())
            .field("samples_sent", &self.samples_sent())
            .finish()
    }
}

// ============================================================================
// LOCAL MEDIA STREAM
// ============================================================================

/// Lokaler Capture-Stream (gehört der Session, wird beim Verlassen gestoppt)
pub struct LocalMediaStream {
    id: String,
    tracks: Vec<Arc<LocalTrack>>,
    microphone: Mutex<Option<MicrophoneCapture>>,
    pumps: Mutex<Vec<MediaPump>>,
}

impl LocalMediaStream {
    /// Erstellt einen Stream mit je einem Track pro angefragter Art
    pub fn new(kinds: &[TrackKind]) -> Self {
        let id = format!("stream-{}", uuid::Uuid::new_v4());
        let tracks = kinds
            .iter()
            .map(|kind| Arc::new(LocalTrack::new(*kind, &id)))
            .collect();

        Self {
            id,
            tracks,
            microphone: Mutex::new(None),
            pumps: Mutex::new(Vec::new()),
        }
    }

    /// Hängt die laufende Mikrofonaufnahme an den Stream und startet die
    /// Pumpe, die sie als Opus in den Audio-Track schreibt
    pub(crate) fn attach_microphone(
        &self,
        capture: MicrophoneCapture,
        runtime: tokio::runtime::Handle,
    ) -> Result<(), MediaAccessError> {
        let track = self
            .audio_tracks()
            .next()
            .cloned()
            .ok_or_else(|| MediaAccessError::Device("audio track missing".to_string()))?;

        let pump = MediaPump::audio(capture.buffer(), track, runtime)?;
        *self.microphone.lock() = Some(capture);
        self.attach_pump(pump);
        Ok(())
    }

    /// Übernimmt eine laufende Pumpe; sie endet mit `stop()`
    pub(crate) fn attach_pump(&self, pump: MediaPump) {
        self.pumps.lock().push(pump);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<LocalTrack>] {
        &self.tracks
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &Arc<LocalTrack>> {
        self.tracks_of(TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &Arc<LocalTrack>> {
        self.tracks_of(TrackKind::Video)
    }

    fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &Arc<LocalTrack>> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    /// Schaltet alle Tracks einer Art um. Gibt die Anzahl betroffener Tracks zurück.
    pub fn toggle(&self, kind: TrackKind) -> usize {
        let mut toggled = 0;
        for track in self.tracks_of(kind) {
            let enabled = track.toggle_enabled();
            tracing::debug!("{} track {} enabled: {}", kind.as_str(), track.id(), enabled);
            toggled += 1;
        }
        toggled
    }

    /// `true`, wenn der Stream Tracks dieser Art hat und alle deaktiviert sind
    pub fn all_disabled(&self, kind: TrackKind) -> bool {
        let mut tracks = self.tracks_of(kind).peekable();
        tracks.peek().is_some() && tracks.all(|t| !t.is_enabled())
    }

    pub fn is_live(&self) -> bool {
        self.tracks.iter().any(|t| t.is_live())
    }

    /// Aktueller Eingangspegel (0.0 - 1.0)
    pub fn input_level(&self) -> f32 {
        self.microphone
            .lock()
            .as_ref()
            .map(|m| m.level())
            .unwrap_or(0.0)
    }

    /// Stoppt alle Tracks und die Aufnahme. Mehrfaches Aufrufen ist harmlos.
    pub fn stop(&self) {
        for pump in self.pumps.lock().drain(..) {
            pump.stop();
        }
        for track in &self.tracks {
            track.stop();
        }
        if let Some(mut capture) = self.microphone.lock().take() {
            capture.stop();
        }
    }
}

impl Drop for LocalMediaStream {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for LocalMediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMediaStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks)
            .finish()
    }
}
