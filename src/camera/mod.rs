//! Webcam capture
//!
//! Frames are captured with nokhwa on a background thread and published into
//! a triple buffer. The render thread only ever reads the latest frame, so a
//! slow or stalled camera never blocks a redraw.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::matte::Frame;

/// Capture parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device_index: u32,
    /// Requested resolution; the camera may pick a different one
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 1280,
            height: 720,
            fps: 30,
        }
    }
}

impl CameraConfig {
    pub fn sanitize(&mut self) {
        self.width = self.width.clamp(1, 7680);
        self.height = self.height.clamp(1, 4320);
        self.fps = self.fps.clamp(1, 240);
    }
}

/// An enumerated capture device
#[derive(Clone, Debug)]
pub struct CameraInfo {
    pub index: u32,
    pub name: String,
}

type FrameSlots = [Arc<Mutex<Option<Frame>>>; 3];

/// Background camera capture
pub struct CameraCapture {
    /// Triple buffer, slot `latest % 3` holds the newest frame
    frames: FrameSlots,
    latest_frame_idx: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    thread_handle: Option<std::thread::JoinHandle<()>>,
    frame_count: Arc<AtomicU64>,
}

impl CameraCapture {
    /// List available cameras
    pub fn list_cameras() -> Vec<CameraInfo> {
        match nokhwa::query(nokhwa::utils::ApiBackend::Auto) {
            Ok(list) => list
                .iter()
                .enumerate()
                .map(|(idx, info)| CameraInfo {
                    index: idx as u32,
                    name: info.human_name().to_string(),
                })
                .collect(),
            Err(e) => {
                tracing::warn!(error = ?e, "Failed to enumerate cameras");
                Vec::new()
            }
        }
    }

    /// Start capturing on a background thread.
    ///
    /// Opening the device happens on that thread; if it fails the capture
    /// simply never produces a frame.
    pub fn start(config: &CameraConfig) -> std::io::Result<Self> {
        let frames: FrameSlots = [
            Arc::new(Mutex::new(None)),
            Arc::new(Mutex::new(None)),
            Arc::new(Mutex::new(None)),
        ];
        let latest_frame_idx = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(true));
        let frame_count = Arc::new(AtomicU64::new(0));

        let worker = CaptureWorker {
            config: config.clone(),
            frames: frames.clone(),
            latest_frame_idx: latest_frame_idx.clone(),
            running: running.clone(),
            frame_count: frame_count.clone(),
        };

        let thread_handle = std::thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || worker.run())?;

        Ok(Self {
            frames,
            latest_frame_idx,
            running,
            thread_handle: Some(thread_handle),
            frame_count,
        })
    }

    /// Newest captured frame unless its number is `seen`. `None` before the
    /// first frame arrives. The pixels are only copied when the frame is new.
    pub fn frame_after(&self, seen: Option<u64>) -> Option<Frame> {
        let idx = self.latest_frame_idx.load(Ordering::Acquire);
        let slot = (idx % 3) as usize;
        newer_frame(&self.frames[slot], seen)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CameraCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn newer_frame(slot: &Mutex<Option<Frame>>, seen: Option<u64>) -> Option<Frame> {
    let guard = slot.lock();
    match guard.as_ref() {
        Some(frame) if Some(frame.frame_number) != seen => Some(frame.clone()),
        _ => None,
    }
}

struct CaptureWorker {
    config: CameraConfig,
    frames: FrameSlots,
    latest_frame_idx: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    frame_count: Arc<AtomicU64>,
}

impl CaptureWorker {
    fn run(self) {
        tracing::info!(device = self.config.device_index, "Starting camera capture thread");

        let Some(mut camera) = self.open() else {
            self.running.store(false, Ordering::Release);
            return;
        };

        if let Err(e) = camera.open_stream() {
            tracing::error!(error = ?e, "Failed to open camera stream");
            self.running.store(false, Ordering::Release);
            return;
        }

        tracing::info!(
            name = %camera.info().human_name(),
            width = camera.resolution().width(),
            height = camera.resolution().height(),
            "Camera opened"
        );

        let mut write_idx: u64 = 0;
        while self.running.load(Ordering::Acquire) {
            let buffer = match camera.frame() {
                Ok(buffer) => buffer,
                Err(e) => {
                    tracing::warn!(error = ?e, "Failed to capture frame");
                    std::thread::sleep(Duration::from_millis(10));
                    continue;
                }
            };

            let image = match buffer.decode_image::<RgbAFormat>() {
                Ok(image) => image,
                Err(e) => {
                    tracing::warn!(error = ?e, "Failed to decode frame");
                    continue;
                }
            };

            let mut frame = Frame::new(image.width(), image.height(), image.into_raw());
            frame.frame_number = self.frame_count.fetch_add(1, Ordering::Relaxed);

            let slot = (write_idx % 3) as usize;
            *self.frames[slot].lock() = Some(frame);
            self.latest_frame_idx.store(write_idx, Ordering::Release);
            write_idx = write_idx.wrapping_add(1);
        }

        tracing::info!("Camera capture thread stopped");
    }

    /// Requested resolution first, then the closest the camera offers, then anything
    fn open(&self) -> Option<Camera> {
        let index = CameraIndex::Index(self.config.device_index);
        let resolution = Resolution::new(self.config.width, self.config.height);
        let attempts = [
            RequestedFormatType::Closest(nokhwa::utils::CameraFormat::new(
                resolution,
                nokhwa::utils::FrameFormat::MJPEG,
                self.config.fps,
            )),
            RequestedFormatType::HighestResolution(resolution),
            RequestedFormatType::None,
        ];

        for (attempt, format) in attempts.into_iter().enumerate() {
            let requested = RequestedFormat::new::<RgbAFormat>(format);
            match Camera::new(index.clone(), requested) {
                Ok(camera) => return Some(camera),
                Err(e) => tracing::warn!(attempt, error = ?e, "Failed to open camera"),
            }
        }

        tracing::error!(device = self.config.device_index, "Failed to open camera with all format attempts");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_sanitize() {
        let mut config = CameraConfig {
            device_index: 2,
            width: 0,
            height: 100_000,
            fps: 0,
        };
        config.sanitize();
        assert_eq!(config.device_index, 2);
        assert_eq!(config.width, 1);
        assert_eq!(config.height, 4320);
        assert_eq!(config.fps, 1);
    }

    #[test]
    fn test_seen_frame_is_not_copied_again() {
        let mut frame = Frame::solid(2, 2, [1, 2, 3, 255]);
        frame.frame_number = 7;
        let slot = Mutex::new(None);
        assert!(newer_frame(&slot, None).is_none());

        *slot.lock() = Some(frame);
        assert_eq!(newer_frame(&slot, None).map(|f| f.frame_number), Some(7));
        assert_eq!(newer_frame(&slot, Some(6)).map(|f| f.frame_number), Some(7));
        assert!(newer_frame(&slot, Some(7)).is_none());
    }

    #[test]
    fn test_default_requests_720p() {
        let config = CameraConfig::default();
        assert_eq!((config.width, config.height, config.fps), (1280, 720, 30));
    }
}
