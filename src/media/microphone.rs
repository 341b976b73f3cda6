//! Mikrofon-Capture über cpal
//!
//! Der cpal-Stream ist nicht `Send`, deshalb lebt er auf einem eigenen
//! Thread, der bis zum Stop-Signal blockiert. Aufgenommenes PCM wird auf
//! 48kHz mono gebracht und in einen Ring-Buffer geschrieben, aus dem die
//! Audio-Pumpe 20ms-Frames liest.

use super::devices::MediaAccessError;
use super::{FRAME_SIZE, SAMPLE_RATE};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, Device, SampleFormat, Stream, StreamConfig, SupportedStreamConfigRange};
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread;

/// Buffer Size für den Capture-Ring-Buffer (200ms)
const RING_BUFFER_SIZE: usize = FRAME_SIZE * 10;

// ============================================================================
// CAPTURE BUFFER
// ============================================================================

/// Ring-Buffer für aufgenommenes PCM
#[derive(Clone)]
pub(crate) struct CaptureBuffer {
    inner: Arc<Mutex<HeapRb<f32>>>,
}

impl CaptureBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HeapRb::new(capacity))),
        }
    }

    /// Schreibt Samples; bei vollem Buffer werden neue Samples verworfen
    pub(crate) fn push(&self, samples: &[f32]) {
        let mut buffer = self.inner.lock();
        for sample in samples {
            let _ = buffer.try_push(*sample);
        }
    }

    pub(crate) fn read_frame(&self) -> Option<Vec<f32>> {
        let mut buffer = self.inner.lock();
        if buffer.occupied_len() < FRAME_SIZE {
            return None;
        }
        let mut frame = Vec::with_capacity(FRAME_SIZE);
        for _ in 0..FRAME_SIZE {
            if let Some(sample) = buffer.try_pop() {
                frame.push(sample);
            }
        }
        Some(frame)
    }
}

// ============================================================================
// MICROPHONE CAPTURE
// ============================================================================

pub struct MicrophoneCapture {
    stop_tx: Option<std_mpsc::Sender<()>>,
    worker: Option<thread::JoinHandle<()>>,
    buffer: CaptureBuffer,
    level: Arc<Mutex<f32>>,
}

impl MicrophoneCapture {
    /// Öffnet das Standard-Eingabegerät und startet die Aufnahme
    ///
    /// Blockiert, bis der Stream läuft oder fehlgeschlagen ist.
    pub fn start(enabled: Arc<AtomicBool>) -> Result<Self, MediaAccessError> {
        let buffer = CaptureBuffer::new(RING_BUFFER_SIZE);
        let level = Arc::new(Mutex::new(0.0f32));

        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), MediaAccessError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let worker_buffer = buffer.clone();
        let worker_level = Arc::clone(&level);

        let worker = thread::Builder::new()
            .name("microphone-capture".to_string())
            .spawn(move || {
                let stream = match open_input_stream(worker_buffer, worker_level, enabled) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Blockiert bis stop() oder bis der Sender gedroppt wird
                let _ = stop_rx.recv();
                drop(stream);
                tracing::info!("Microphone capture stopped");
            })
            .map_err(|e| MediaAccessError::Device(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                stop_tx: Some(stop_tx),
                worker: Some(worker),
                buffer,
                level,
            }),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => Err(MediaAccessError::Device(
                "capture thread exited before the stream started".to_string(),
            )),
        }
    }

    /// Der Ring-Buffer, aus dem die Audio-Pumpe 20ms-Frames liest
    pub(crate) fn buffer(&self) -> CaptureBuffer {
        self.buffer.clone()
    }

    pub fn level(&self) -> f32 {
        *self.level.lock()
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("Microphone capture thread panicked");
            }
        }
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// STREAM SETUP
// ============================================================================

fn open_input_stream(
    buffer: CaptureBuffer,
    level: Arc<Mutex<f32>>,
    enabled: Arc<AtomicBool>,
) -> Result<Stream, MediaAccessError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| MediaAccessError::NoDevice("audio input".to_string()))?;

    let config = find_best_input_config(&device)?;
    let source_rate = config.sample_rate.0;
    let channels = config.channels as usize;

    tracing::info!(
        "Starting microphone capture: {} Hz, {} channel(s)",
        source_rate,
        channels
    );

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if !enabled.load(Ordering::Relaxed) {
                    *level.lock() = 0.0;
                    return;
                }

                *level.lock() = rms(data).min(1.0);

                let mono = downmix_to_mono(data, channels);
                buffer.push(&resample_linear(&mono, source_rate, SAMPLE_RATE));
            },
            |err| {
                tracing::error!("Microphone capture error: {}", err);
            },
            None,
        )
        .map_err(|e| match e {
            BuildStreamError::DeviceNotAvailable => {
                MediaAccessError::NoDevice("audio input".to_string())
            }
            other => classify_backend_error(other.to_string()),
        })?;

    stream
        .play()
        .map_err(|e| classify_backend_error(e.to_string()))?;

    Ok(stream)
}

/// Betriebssysteme melden verweigerte Mikrofon-Rechte nur als Backend-Text
pub(super) fn classify_backend_error(message: String) -> MediaAccessError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized")
    {
        MediaAccessError::PermissionDenied(message)
    } else {
        MediaAccessError::Device(message)
    }
}

fn find_best_input_config(device: &Device) -> Result<StreamConfig, MediaAccessError> {
    let configs = device
        .supported_input_configs()
        .map_err(|e| classify_backend_error(e.to_string()))?;

    select_best_config(configs.collect())
}

/// Bevorzugt 48kHz F32, dann irgendein F32, dann die erste Konfiguration
fn select_best_config(
    configs: Vec<SupportedStreamConfigRange>,
) -> Result<StreamConfig, MediaAccessError> {
    let target_rate = cpal::SampleRate(SAMPLE_RATE);
    let supports_target =
        |c: &SupportedStreamConfigRange| c.min_sample_rate() <= target_rate && c.max_sample_rate() >= target_rate;

    if let Some(config) = configs
        .iter()
        .find(|c| supports_target(c) && c.sample_format() == SampleFormat::F32)
    {
        return Ok(config.clone().with_sample_rate(target_rate).into());
    }

    if let Some(config) = configs.iter().find(|c| c.sample_format() == SampleFormat::F32) {
        let rate = if supports_target(config) {
            target_rate
        } else {
            config.max_sample_rate()
        };
        return Ok(config.clone().with_sample_rate(rate).into());
    }

    configs
        .first()
        .map(|c| c.clone().with_max_sample_rate().into())
        .ok_or_else(|| MediaAccessError::Device("no usable input configuration".to_string()))
}

// ============================================================================
// DSP HELPERS
// ============================================================================

fn rms(data: &[f32]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    (data.iter().map(|s| s * s).sum::<f32>() / data.len() as f32).sqrt()
}

/// Interleaved Multi-Channel → Mono (Mittelwert je Frame)
fn downmix_to_mono(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Einfaches lineares Resampling
fn resample_linear(data: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate || data.is_empty() {
        return data.to_vec();
    }

    let ratio = target_rate as f32 / source_rate as f32;
    let new_len = (data.len() as f32 * ratio) as usize;

    (0..new_len)
        .map(|i| {
            let src_idx = i as f32 / ratio;
            let idx = src_idx as usize;
            let frac = src_idx - idx as f32;
            let s1 = data.get(idx).copied().unwrap_or(0.0);
            let s2 = data.get(idx + 1).copied().unwrap_or(s1);
            s1 + (s2 - s1) * frac
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpal::{SampleRate, SupportedBufferSize};

    fn range(min: u32, max: u32, format: SampleFormat) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            2,
            SampleRate(min),
            SampleRate(max),
            SupportedBufferSize::Unknown,
            format,
        )
    }

    #[test]
    fn test_select_prefers_48k_f32() {
        let config = select_best_config(vec![
            range(8000, 44100, SampleFormat::F32),
            range(8000, 96000, SampleFormat::I16),
            range(8000, 96000, SampleFormat::F32),
        ])
        .unwrap();
        assert_eq!(config.sample_rate.0, 48000);
    }

    #[test]
    fn test_select_falls_back_to_max_rate() {
        let config = select_best_config(vec![range(8000, 44100, SampleFormat::F32)]).unwrap();
        assert_eq!(config.sample_rate.0, 44100);

        assert!(select_best_config(Vec::new()).is_err());
    }

    #[test]
    fn test_downmix_and_resample() {
        let stereo = [1.0, 0.0, 0.5, 0.5];
        assert_eq!(downmix_to_mono(&stereo, 2), vec![0.5, 0.5]);

        let upsampled = resample_linear(&[0.5; 100], 24000, 48000);
        assert_eq!(upsampled.len(), 200);
        assert!(upsampled.iter().all(|s| (*s - 0.5).abs() < 1e-6));

        let same = resample_linear(&[0.25; 10], 48000, 48000);
        assert_eq!(same.len(), 10);
    }

    #[test]
    fn test_rms() {
        assert_eq!(rms(&[]), 0.0);
        assert!((rms(&[0.5, -0.5]) - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_capture_buffer_frames() {
        let buffer = CaptureBuffer::new(FRAME_SIZE * 2);
        buffer.push(&vec![0.1; FRAME_SIZE - 1]);
        assert!(buffer.read_frame().is_none());

        buffer.push(&[0.1]);
        let frame = buffer.read_frame().unwrap();
        assert_eq!(frame.len(), FRAME_SIZE);
        assert!(buffer.read_frame().is_none());
    }

    #[test]
    fn test_permission_errors_are_classified() {
        assert!(matches!(
            classify_backend_error("Access denied by system".to_string()),
            MediaAccessError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_backend_error("device busy".to_string()),
            MediaAccessError::Device(_)
        ));
    }
}
