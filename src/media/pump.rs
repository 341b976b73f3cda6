//! Pumpen vom Capture zum WebRTC-Track
//!
//! Pro Track läuft ein eigener Thread, der Rohdaten holt, kodiert und als
//! `Sample` in den Track schreibt. Encoder und Kamera-Handle leben nur auf
//! diesem Thread; geschrieben wird über den Handle der Tokio-Runtime.

use super::codec::{H264Encoder, OpusEncoder, RgbFrame, DEFAULT_VIDEO_BITRATE};
use super::devices::MediaAccessError;
use super::microphone::CaptureBuffer;
use super::stream::LocalTrack;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use webrtc::media::Sample;

/// Dauer eines Audio-Frames (960 Samples @ 48kHz)
pub const AUDIO_FRAME_DURATION: Duration = Duration::from_millis(20);

/// Nach so vielen Lesefehlern in Folge gilt die Kamera als verloren
const MAX_FRAME_ERRORS: u32 = 30;

// ============================================================================
// FRAME SOURCE
// ============================================================================

/// Quelle für Videobilder (Kamera oder Testbild)
pub trait FrameSource {
    fn frame_rate(&self) -> u32;

    /// Liefert das nächste Bild; darf bis zum nächsten Bild blockieren
    fn next_frame(&mut self) -> Result<RgbFrame, MediaAccessError>;
}

// ============================================================================
// MEDIA PUMP
// ============================================================================

pub struct MediaPump {
    stop: Arc<AtomicBool>,
    name: &'static str,
}

impl MediaPump {
    /// Startet die Audio-Pumpe: PCM aus dem Capture-Buffer → Opus → Track
    pub fn audio(
        buffer: CaptureBuffer,
        track: Arc<LocalTrack>,
        runtime: Handle,
    ) -> Result<Self, MediaAccessError> {
        Self::spawn("audio-pump", move |stop, ready| {
            let mut encoder = match OpusEncoder::new() {
                Ok(encoder) => encoder,
                Err(e) => {
                    let _ = ready.send(Err(e));
                    return;
                }
            };
            let _ = ready.send(Ok(()));

            let mut ticker = Ticker::new(AUDIO_FRAME_DURATION);
            while !stop.load(Ordering::SeqCst) && track.is_live() {
                while let Some(frame) = buffer.read_frame() {
                    // Stumm: Buffer leeren, nichts senden
                    if !track.is_enabled() {
                        continue;
                    }
                    match encoder.encode(&frame) {
                        Ok(packet) => write(&runtime, &track, packet, AUDIO_FRAME_DURATION),
                        Err(e) => tracing::warn!("Opus encoding failed: {}", e),
                    }
                }
                ticker.wait();
            }
        })
    }

    /// Startet die Video-Pumpe; `open` wird auf dem Pumpen-Thread ausgeführt
    ///
    /// Kann die Quelle nicht geöffnet werden, kommt der Fehler hier zurück.
    pub fn video<F, S>(open: F, track: Arc<LocalTrack>, runtime: Handle) -> Result<Self, MediaAccessError>
    where
        F: FnOnce() -> Result<S, MediaAccessError> + Send + 'static,
        S: FrameSource,
    {
        Self::spawn("video-pump", move |stop, ready| {
            let opened = open().and_then(|source| {
                let encoder = H264Encoder::new(source.frame_rate(), DEFAULT_VIDEO_BITRATE)?;
                Ok((source, encoder))
            });
            let (mut source, mut encoder) = match opened {
                Ok(pair) => pair,
                Err(e) => {
                    let _ = ready.send(Err(e));
                    return;
                }
            };
            let _ = ready.send(Ok(()));

            let frame_duration = Duration::from_secs(1) / source.frame_rate().max(1);
            let mut ticker = Ticker::new(frame_duration);
            let mut errors = 0;

            while !stop.load(Ordering::SeqCst) && track.is_live() {
                match source.next_frame() {
                    Ok(frame) => {
                        errors = 0;
                        if track.is_enabled() {
                            match encoder.encode(&frame) {
                                Ok(nal) => write(&runtime, &track, nal, frame_duration),
                                Err(e) => tracing::warn!("H.264 encoding failed: {}", e),
                            }
                        }
                    }
                    Err(e) => {
                        errors += 1;
                        tracing::warn!("Failed to read video frame: {}", e);
                        if errors >= MAX_FRAME_ERRORS {
                            tracing::error!("Video source lost, stopping video track");
                            break;
                        }
                    }
                }
                ticker.wait();
            }
        })
    }

    /// Signalisiert dem Thread das Ende. Er beendet sich nach dem laufenden Frame.
    pub fn stop(&self) {
        if !self.stop.swap(true, Ordering::SeqCst) {
            tracing::debug!("Stopping {}", self.name);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn spawn<B>(name: &'static str, body: B) -> Result<Self, MediaAccessError>
    where
        B: FnOnce(Arc<AtomicBool>, std_mpsc::Sender<Result<(), MediaAccessError>>) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = std_mpsc::channel();

        let worker_stop = Arc::clone(&stop);
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                body(worker_stop, ready_tx);
                tracing::debug!("{} finished", name);
            })
            .map_err(|e| MediaAccessError::Device(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { stop, name }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(MediaAccessError::Device(format!(
                "{} exited before it started",
                name
            ))),
        }
    }
}

impl Drop for MediaPump {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for MediaPump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaPump")
            .field("name", &self.name)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn write(runtime: &Handle, track: &LocalTrack, data: Vec<u8>, duration: Duration) {
    let sample = Sample {
        data: Bytes::from(data),
        duration,
        ..Default::default()
    };

    if let Err(e) = runtime.block_on(track.write_sample(&sample)) {
        tracing::warn!("Failed to write {} sample: {}", track.kind().as_str(), e);
    }
}

/// Fester Takt ohne Drift; holt nach Verzögerungen nicht auf
struct Ticker {
    period: Duration,
    next: Instant,
}

impl Ticker {
    fn new(period: Duration) -> Self {
        Self {
            period,
            next: Instant::now() + period,
        }
    }

    fn wait(&mut self) {
        let now = Instant::now();
        if self.next > now {
            thread::sleep(self.next - now);
            self.next += self.period;
        } else {
            self.next = now + self.period;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{TrackKind, FRAME_SIZE};
    use crate::testing::wait_until;

    /// Liefert ein festes Testbild
    struct TestPattern;

    impl FrameSource for TestPattern {
        fn frame_rate(&self) -> u32 {
            30
        }

        fn next_frame(&mut self) -> Result<RgbFrame, MediaAccessError> {
            Ok(RgbFrame::solid(64, 48, [30, 120, 200]))
        }
    }

    fn fill(buffer: &CaptureBuffer, frames: usize) {
        buffer.push(&vec![0.1f32; FRAME_SIZE * frames]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_audio_pump_sends_only_while_enabled() {
        let track = Arc::new(LocalTrack::new(TrackKind::Audio, "stream"));
        let buffer = CaptureBuffer::new(FRAME_SIZE * 10);
        fill(&buffer, 5);

        let pump = MediaPump::audio(buffer.clone(), Arc::clone(&track), Handle::current()).unwrap();
        wait_until("audio samples sent", || track.samples_sent() >= 5).await;

        track.set_enabled(false);
        tokio::time::sleep(Duration::from_millis(60)).await;
        let muted_at = track.samples_sent();

        fill(&buffer, 5);
        tokio::time::sleep(Duration::from_millis(150)).await;

        // Stumm geschaltete Frames werden verworfen, nicht aufgestaut
        assert_eq!(track.samples_sent(), muted_at);
        assert!(buffer.read_frame().is_none());

        track.set_enabled(true);
        fill(&buffer, 2);
        wait_until("audio resumes", || track.samples_sent() >= muted_at + 2).await;

        pump.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_video_pump_sends_only_while_enabled() {
        let track = Arc::new(LocalTrack::new(TrackKind::Video, "stream"));

        let pump = MediaPump::video(|| Ok(TestPattern), Arc::clone(&track), Handle::current()).unwrap();
        wait_until("video samples sent", || track.samples_sent() >= 3).await;

        track.set_enabled(false);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let off_at = track.samples_sent();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(track.samples_sent(), off_at);

        track.set_enabled(true);
        wait_until("video resumes", || track.samples_sent() > off_at).await;

        pump.stop();
        assert!(pump.is_stopped());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_video_pump_reports_open_failure() {
        let track = Arc::new(LocalTrack::new(TrackKind::Video, "stream"));

        let result = MediaPump::video(
            || Err::<TestPattern, _>(MediaAccessError::NoDevice("camera".to_string())),
            track,
            Handle::current(),
        );
        assert!(matches!(result, Err(MediaAccessError::NoDevice(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pump_ends_with_track() {
        let track = Arc::new(LocalTrack::new(TrackKind::Video, "stream"));
        let pump = MediaPump::video(|| Ok(TestPattern), Arc::clone(&track), Handle::current()).unwrap();
        wait_until("video samples sent", || track.samples_sent() >= 1).await;

        track.stop();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let stopped_at = track.samples_sent();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(track.samples_sent(), stopped_at);

        drop(pump);
    }
}
