//! Kamera-Capture über OpenCV
//!
//! `OpenCvCamera` wird auf dem Video-Pumpen-Thread geöffnet und gelesen;
//! `VideoCapture` verlässt diesen Thread nie.

use super::codec::RgbFrame;
use super::devices::MediaAccessError;
use super::microphone::classify_backend_error;
use super::pump::FrameSource;
use opencv::core::{AlgorithmHint, Mat};
use opencv::imgproc;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture};

/// Fallback, wenn der Treiber keine Bildrate meldet
const DEFAULT_FPS: u32 = 30;

pub struct OpenCvCamera {
    capture: VideoCapture,
    index: i32,
    fps: u32,
}

impl OpenCvCamera {
    /// Öffnet die Kamera mit dem gegebenen Index (0 = Standardkamera)
    pub fn open(index: i32) -> Result<Self, MediaAccessError> {
        let capture = VideoCapture::new(index, videoio::CAP_ANY)
            .map_err(|e| classify_backend_error(e.to_string()))?;

        if !capture.is_opened().unwrap_or(false) {
            return Err(MediaAccessError::NoDevice(format!("camera {}", index)));
        }

        let fps = capture
            .get(videoio::CAP_PROP_FPS)
            .ok()
            .filter(|fps| fps.is_finite() && *fps >= 1.0)
            .map(|fps| fps.round().min(60.0) as u32)
            .unwrap_or(DEFAULT_FPS);

        tracing::info!("Opened camera {} at {} fps", index, fps);

        Ok(Self {
            capture,
            index,
            fps,
        })
    }
}

impl FrameSource for OpenCvCamera {
    fn frame_rate(&self) -> u32 {
        self.fps
    }

    fn next_frame(&mut self) -> Result<RgbFrame, MediaAccessError> {
        let mut bgr = Mat::default();
        let grabbed = self
            .capture
            .read(&mut bgr)
            .map_err(|e| MediaAccessError::Device(e.to_string()))?;
        if !grabbed || bgr.empty() {
            return Err(MediaAccessError::Device(format!(
                "camera {} returned no frame",
                self.index
            )));
        }

        let mut rgb = Mat::default();
        imgproc::cvt_color(
            &bgr,
            &mut rgb,
            imgproc::COLOR_BGR2RGB,
            0,
            AlgorithmHint::ALGO_HINT_DEFAULT,
        )
        .map_err(|e| MediaAccessError::Device(format!("cvtColor: {}", e)))?;

        let rgb = if rgb.is_continuous() {
            rgb
        } else {
            rgb.try_clone()
                .map_err(|e| MediaAccessError::Device(e.to_string()))?
        };
        let bytes = rgb
            .data_bytes()
            .map_err(|e| MediaAccessError::Device(e.to_string()))?;

        crop_to_even(rgb.cols() as u32, rgb.rows() as u32, bytes)
    }
}

impl Drop for OpenCvCamera {
    fn drop(&mut self) {
        let _ = self.capture.release();
        tracing::debug!("Released camera {}", self.index);
    }
}

/// H.264 (4:2:0) braucht gerade Kantenlängen; überzählige Zeile/Spalte fällt weg
fn crop_to_even(width: u32, height: u32, rgb: &[u8]) -> Result<RgbFrame, MediaAccessError> {
    let (w, h) = (width as usize, height as usize);
    if rgb.len() != w * h * 3 {
        return Err(MediaAccessError::Device(format!(
            "camera frame has {} bytes, expected {}",
            rgb.len(),
            w * h * 3
        )));
    }

    let (even_w, even_h) = (w & !1, h & !1);
    if even_w == 0 || even_h == 0 {
        return Err(MediaAccessError::Device(format!(
            "camera frame too small: {}x{}",
            w, h
        )));
    }

    let data = if even_w == w {
        rgb[..even_w * even_h * 3].to_vec()
    } else {
        rgb.chunks_exact(w * 3)
            .take(even_h)
            .flat_map(|row| &row[..even_w * 3])
            .copied()
            .collect()
    };

    Ok(RgbFrame {
        width: even_w as u32,
        height: even_h as u32,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_keeps_even_frames() {
        let frame = RgbFrame::solid(4, 2, [9, 8, 7]);
        let cropped = crop_to_even(4, 2, &frame.data).unwrap();
        assert_eq!(cropped, frame);
    }

    #[test]
    fn test_crop_drops_odd_edges() {
        // 3x3 Bild, Pixelwert = Zeile*3 + Spalte
        let rgb: Vec<u8> = (0u8..9).flat_map(|p| [p, p, p]).collect();
        let cropped = crop_to_even(3, 3, &rgb).unwrap();

        assert_eq!((cropped.width, cropped.height), (2, 2));
        assert_eq!(cropped.data, vec![0, 0, 0, 1, 1, 1, 3, 3, 3, 4, 4, 4]);
    }

    #[test]
    fn test_crop_rejects_short_buffer() {
        assert!(crop_to_even(4, 4, &[0; 10]).is_err());
        assert!(crop_to_even(1, 1, &[0; 3]).is_err());
    }
}
