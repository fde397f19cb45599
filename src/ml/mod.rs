//! Person segmentation
//!
//! Runs a selfie segmentation ONNX model on a worker thread. Camera frames go
//! in through a small bounded channel (full means the frame is dropped), and
//! each result comes back as a frame plus a mask at the frame's own
//! resolution, so the compositor never has to match them up by time.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use ndarray::Array4;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::matte::{Frame, Mask};

/// Model file looked for inside the models directory
pub const MODEL_FILE: &str = "selfie_segmentation.onnx";

/// Segmentation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    pub enabled: bool,
    /// Explicit model path, otherwise searched for in `models/`
    pub model_path: Option<PathBuf>,
    /// Square model input size in pixels
    pub input_size: u32,
    pub threads: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_path: None,
            input_size: 256,
            threads: 2,
        }
    }
}

impl SegmenterConfig {
    pub fn sanitize(&mut self) {
        self.input_size = self.input_size.clamp(64, 1024);
        self.threads = self.threads.clamp(1, 16);
    }
}

#[derive(Debug, Error)]
pub enum SegmenterError {
    #[error("models directory not found, create a 'models' directory containing {MODEL_FILE}")]
    ModelDirNotFound,

    #[error("segmentation model not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("onnx runtime: {0}")]
    Runtime(String),

    #[error("input tensor: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("model produced no output")]
    NoOutput,

    #[error("model output holds {actual} values, expected {expected}")]
    OutputSize { expected: usize, actual: usize },

    #[error("failed to spawn inference thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// A camera frame and its person mask, same dimensions
#[derive(Clone, Debug)]
pub struct MattePair {
    pub frame: Frame,
    pub mask: Mask,
}

/// Background segmentation worker
pub struct Segmenter {
    frame_sender: Option<Sender<Frame>>,
    latest: Arc<Mutex<Option<MattePair>>>,
    /// Session loaded and running
    ready: Arc<AtomicBool>,
    /// Cleared when the worker thread returns, including on a failed model load
    alive: Arc<AtomicBool>,
    thread_handle: Option<std::thread::JoinHandle<()>>,
    last_submitted: Option<u64>,
}

impl Segmenter {
    pub fn start(config: &SegmenterConfig) -> Result<Self, SegmenterError> {
        let mut config = config.clone();
        config.sanitize();
        let latest = Arc::new(Mutex::new(None));
        let ready = Arc::new(AtomicBool::new(false));
        let alive = Arc::new(AtomicBool::new(true));
        let (frame_sender, frame_receiver) = crossbeam_channel::bounded::<Frame>(2);

        let worker = InferenceWorker {
            config,
            frames: frame_receiver,
            latest: latest.clone(),
            ready: ready.clone(),
            alive: alive.clone(),
        };

        let thread_handle = std::thread::Builder::new()
            .name("segmentation".to_string())
            .spawn(move || worker.run())?;

        Ok(Self {
            frame_sender: Some(frame_sender),
            latest,
            ready,
            alive,
            thread_handle: Some(thread_handle),
            last_submitted: None,
        })
    }

    /// Worker still running and able to take frames
    pub fn accepts_frames(&self) -> bool {
        self.frame_sender.is_some() && self.alive.load(Ordering::Acquire)
    }

    /// Number of the last frame queued, to skip copying it again
    pub fn last_submitted(&self) -> Option<u64> {
        self.last_submitted
    }

    /// Queue a frame without blocking. Frames already submitted, or arriving
    /// while the queue is full, are skipped.
    pub fn submit(&mut self, frame: Frame) -> bool {
        if self.last_submitted == Some(frame.frame_number) || !self.accepts_frames() {
            return false;
        }
        let Some(sender) = &self.frame_sender else {
            return false;
        };
        let number = frame.frame_number;
        if sender.try_send(frame).is_ok() {
            self.last_submitted = Some(number);
            true
        } else {
            false
        }
    }

    /// Take the newest finished pair, if one arrived since the last call
    pub fn poll(&self) -> Option<MattePair> {
        self.latest.lock().take()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn stop(&mut self) {
        // Dropping the sender ends the worker's receive loop
        self.frame_sender = None;
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Segmenter {
    fn drop(&mut self) {
        self.stop();
    }
}

struct InferenceWorker {
    config: SegmenterConfig,
    frames: Receiver<Frame>,
    latest: Arc<Mutex<Option<MattePair>>>,
    ready: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
}

impl InferenceWorker {
    fn run(self) {
        self.segment_frames();
        self.ready.store(false, Ordering::Release);
        self.alive.store(false, Ordering::Release);
        tracing::info!("Segmentation thread stopped");
    }

    fn segment_frames(&self) {
        tracing::info!("Segmentation thread started");

        let mut session = match init_session(&self.config) {
            Ok(session) => {
                self.ready.store(true, Ordering::Release);
                tracing::info!("ONNX Runtime initialized");
                session
            }
            Err(e) => {
                tracing::warn!(error = %e, "Segmentation disabled");
                return;
            }
        };

        let size = self.config.input_size;
        while let Ok(frame) = self.frames.recv() {
            let span = tracing::trace_span!("segment", frame = frame.frame_number);
            let _enter = span.enter();

            match segment(&mut session, &frame, size) {
                Ok(raw) => {
                    let mask = upsample_mask(&raw, size, size, frame.width, frame.height);
                    *self.latest.lock() = Some(MattePair { frame, mask });
                }
                Err(e) => tracing::warn!(error = %e, "Inference error"),
            }
        }
    }
}

fn init_session(config: &SegmenterConfig) -> Result<ort::session::Session, SegmenterError> {
    let model_path = match &config.model_path {
        Some(path) => path.clone(),
        None => find_model_dir()?.join(MODEL_FILE),
    };
    if !model_path.exists() {
        return Err(SegmenterError::ModelNotFound(model_path));
    }
    tracing::info!(path = %model_path.display(), "Loading segmentation model");

    ort::init().with_name("NeonMirror").commit().map_err(runtime)?;

    let session = ort::session::Session::builder()
        .map_err(runtime)?
        .with_intra_threads(config.threads)
        .map_err(runtime)?
        .commit_from_file(&model_path)
        .map_err(runtime)?;
    Ok(session)
}

fn runtime(e: impl std::fmt::Display) -> SegmenterError {
    SegmenterError::Runtime(e.to_string())
}

/// Look for `models/` next to the executable, up to three levels above it,
/// then in the working directory.
pub fn find_model_dir() -> Result<PathBuf, SegmenterError> {
    let mut candidates = Vec::new();
    if let Ok(exe) = std::env::current_exe() {
        candidates.extend(exe.ancestors().skip(1).take(3).map(|dir| dir.join("models")));
    }
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join("models"));
    }
    candidates
        .into_iter()
        .find(|dir| dir.is_dir())
        .ok_or(SegmenterError::ModelDirNotFound)
}

/// Run the model on one frame, returning a `size`×`size` confidence mask
fn segment(session: &mut ort::session::Session, frame: &Frame, size: u32) -> Result<Vec<f32>, SegmenterError> {
    let input = preprocess_nhwc(frame, size, size);
    let input_array = Array4::from_shape_vec((1, size as usize, size as usize, 3), input)?;
    let input_tensor = ort::value::Tensor::from_array(input_array).map_err(runtime)?;

    let outputs = session.run(ort::inputs![input_tensor]).map_err(runtime)?;
    let (_, output) = outputs.iter().next().ok_or(SegmenterError::NoOutput)?;
    let (_shape, data) = output.try_extract_tensor::<f32>().map_err(runtime)?;

    let expected = (size * size) as usize;
    if data.len() != expected {
        return Err(SegmenterError::OutputSize {
            expected,
            actual: data.len(),
        });
    }
    Ok(data.iter().map(|v| v.clamp(0.0, 1.0)).collect())
}

/// Nearest-neighbor resize to RGB floats in [0, 1], height-width-channel order
pub fn preprocess_nhwc(frame: &Frame, target_width: u32, target_height: u32) -> Vec<f32> {
    let mut output = vec![0.0f32; (target_width * target_height * 3) as usize];
    if frame.width == 0 || frame.height == 0 {
        return output;
    }

    let x_ratio = frame.width as f32 / target_width as f32;
    let y_ratio = frame.height as f32 / target_height as f32;

    for y in 0..target_height {
        for x in 0..target_width {
            let src_x = ((x as f32 * x_ratio) as u32).min(frame.width - 1);
            let src_y = ((y as f32 * y_ratio) as u32).min(frame.height - 1);
            let src_idx = ((src_y * frame.width + src_x) * 4) as usize;

            if src_idx + 2 < frame.data.len() {
                let out_idx = ((y * target_width + x) * 3) as usize;
                output[out_idx] = frame.data[src_idx] as f32 / 255.0;
                output[out_idx + 1] = frame.data[src_idx + 1] as f32 / 255.0;
                output[out_idx + 2] = frame.data[src_idx + 2] as f32 / 255.0;
            }
        }
    }

    output
}

/// Bilinear resample of a mask to frame resolution
pub fn upsample_mask(mask: &[f32], width: u32, height: u32, target_width: u32, target_height: u32) -> Mask {
    let mut out = Vec::with_capacity((target_width * target_height) as usize);
    if width == 0 || height == 0 || mask.len() < (width * height) as usize {
        return Mask::filled(target_width, target_height, 0.0);
    }

    let at = |x: u32, y: u32| mask[(y * width + x) as usize];
    let sx = width as f32 / target_width.max(1) as f32;
    let sy = height as f32 / target_height.max(1) as f32;

    for ty in 0..target_height {
        // Sample at pixel centers
        let fy = ((ty as f32 + 0.5) * sy - 0.5).clamp(0.0, (height - 1) as f32);
        let y0 = fy.floor() as u32;
        let y1 = (y0 + 1).min(height - 1);
        let wy = fy - y0 as f32;

        for tx in 0..target_width {
            let fx = ((tx as f32 + 0.5) * sx - 0.5).clamp(0.0, (width - 1) as f32);
            let x0 = fx.floor() as u32;
            let x1 = (x0 + 1).min(width - 1);
            let wx = fx - x0 as f32;

            let top = at(x0, y0) * (1.0 - wx) + at(x1, y0) * wx;
            let bottom = at(x0, y1) * (1.0 - wx) + at(x1, y1) * wx;
            out.push(top * (1.0 - wy) + bottom * wy);
        }
    }

    Mask::new(target_width, target_height, out)
}

/// Whether a model file is available at the configured or default location
pub fn model_available(config: &SegmenterConfig) -> bool {
    match &config.model_path {
        Some(path) => Path::new(path).exists(),
        None => find_model_dir().map(|dir| dir.join(MODEL_FILE).exists()).unwrap_or(false),
    }
}
