//! FrameMatte compositor
//!
//! Turns a raw camera frame and its segmentation mask into a mirrored,
//! edge-softened RGBA cutout that the user plane samples every frame.

mod blur;
mod texture;

pub use blur::GaussianBlur;
pub use texture::MatteTexture;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::surface::{decode_srgb, encode_srgb};

/// Sum of RGB below which the debug overlay paints a pixel magenta
const DEBUG_BLACK_THRESHOLD: u32 = 30;

/// Compositor parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatteConfig {
    /// Blend each new mask into the running average instead of replacing it
    pub smoothing_enabled: bool,
    /// Weight of the newest mask in the running average (0, 1]
    pub smoothing_alpha: f32,
    /// Standard deviation of the edge softening blur in pixels (0 disables)
    pub blur_radius: f32,
    /// Show the raw mirrored feed, opaque, with black pixels painted magenta
    pub debug_overlay: bool,
}

impl Default for MatteConfig {
    fn default() -> Self {
        Self {
            smoothing_enabled: true,
            smoothing_alpha: 0.35,
            blur_radius: 2.0,
            debug_overlay: false,
        }
    }
}

impl MatteConfig {
    /// Clamp values to their usable ranges
    pub fn sanitize(&mut self) {
        if !self.smoothing_alpha.is_finite() {
            self.smoothing_alpha = Self::default().smoothing_alpha;
        }
        self.smoothing_alpha = self.smoothing_alpha.clamp(0.01, 1.0);

        if !self.blur_radius.is_finite() {
            self.blur_radius = Self::default().blur_radius;
        }
        self.blur_radius = self.blur_radius.clamp(0.0, 16.0);
    }
}

/// Camera frame, RGBA8 with the alpha channel ignored
#[derive(Clone, Debug)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    /// Capture counter, used to skip frames that were already composited
    pub frame_number: u64,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
            frame_number: 0,
        }
    }

    /// Frame filled with one color
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data = rgba.repeat((width * height) as usize);
        Self::new(width, height, data)
    }
}

/// Per-pixel person confidence in [0, 1], same size as its frame
#[derive(Clone, Debug)]
pub struct Mask {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl Mask {
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Self {
        Self { width, height, data }
    }

    pub fn filled(width: u32, height: u32, value: f32) -> Self {
        Self::new(width, height, vec![value; (width * height) as usize])
    }
}

/// Why a frame/mask pair was rejected
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MatteError {
    #[error("frame has zero size ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },

    #[error("frame buffer holds {actual} bytes, expected {expected}")]
    FrameBufferSize { expected: usize, actual: usize },

    #[error("mask buffer holds {actual} values, expected {expected}")]
    MaskBufferSize { expected: usize, actual: usize },

    #[error("frame is {width}x{height}, larger than the {max} texel texture limit")]
    TooLarge { width: u32, height: u32, max: u32 },

    #[error("mask is {mask_width}x{mask_height} but frame is {frame_width}x{frame_height}")]
    DimensionMismatch {
        frame_width: u32,
        frame_height: u32,
        mask_width: u32,
        mask_height: u32,
    },
}

/// Premultiplied RGBA8 cutout of the current frame
#[derive(Clone, Debug, Default)]
pub struct CompositeImage {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl CompositeImage {
    fn allocate(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; (width * height * 4) as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * self.width + x) * 4) as usize;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }
}

/// Temporal smoothing, mirroring, edge softening and stencil compositing
/// of one camera stream.
pub struct MatteCompositor {
    config: MatteConfig,
    blur: GaussianBlur,
    /// Buffer dimensions, `None` until the first accepted pair
    size: Option<(u32, u32)>,
    /// Running average of the raw mask, camera orientation
    smoothed: Vec<f32>,
    /// Smoothed mask flipped horizontally
    mirrored: Vec<f32>,
    /// Horizontal blur pass output
    scratch: Vec<f32>,
    /// Final alpha in output orientation
    softened: Vec<f32>,
    composite: CompositeImage,
    /// sRGB byte to linear intensity
    decode_lut: [f32; 256],
    /// Set by every successful update, cleared when the texture consumes it
    dirty: bool,
    resets: u64,
    /// Largest accepted width or height
    max_dimension: u32,
}

impl MatteCompositor {
    pub fn new(mut config: MatteConfig) -> Self {
        config.sanitize();
        Self {
            blur: GaussianBlur::new(config.blur_radius),
            config,
            size: None,
            smoothed: Vec::new(),
            mirrored: Vec::new(),
            scratch: Vec::new(),
            softened: Vec::new(),
            composite: CompositeImage::default(),
            decode_lut: std::array::from_fn(|c| srgb_to_linear(c as u8)),
            dirty: false,
            resets: 0,
            max_dimension: u32::MAX,
        }
    }

    /// Reject frames wider or taller than `max`, usually the device's 2D texture limit
    pub fn set_max_dimension(&mut self, max: u32) {
        self.max_dimension = max.max(1);
    }

    pub fn config(&self) -> &MatteConfig {
        &self.config
    }

    /// Replace the configuration; the smoothed mask is kept.
    pub fn set_config(&mut self, mut config: MatteConfig) {
        config.sanitize();
        if config.blur_radius != self.config.blur_radius {
            self.blur = GaussianBlur::new(config.blur_radius);
        }
        self.config = config;
    }

    /// Composite one frame/mask pair.
    ///
    /// Malformed input is rejected without touching any buffer, so the
    /// previous composite stays current.
    pub fn update(&mut self, frame: &Frame, mask: &Mask) -> Result<&CompositeImage, MatteError> {
        self.validate(frame, mask)?;

        if self.size != Some((frame.width, frame.height)) {
            self.reset(mask);
        } else if self.config.smoothing_enabled {
            self.accumulate(mask);
        } else {
            for (s, &m) in self.smoothed.iter_mut().zip(&mask.data) {
                *s = clamp_unit(m);
            }
        }

        self.mirror_mask();
        let (width, height) = (frame.width as usize, frame.height as usize);
        self.blur
            .apply(&self.mirrored, &mut self.scratch, &mut self.softened, width, height);
        self.write_composite(frame);

        self.dirty = true;
        Ok(&self.composite)
    }

    fn validate(&self, frame: &Frame, mask: &Mask) -> Result<(), MatteError> {
        if frame.width == 0 || frame.height == 0 {
            return Err(MatteError::EmptyFrame {
                width: frame.width,
                height: frame.height,
            });
        }
        if frame.width > self.max_dimension || frame.height > self.max_dimension {
            return Err(MatteError::TooLarge {
                width: frame.width,
                height: frame.height,
                max: self.max_dimension,
            });
        }
        if frame.width != mask.width || frame.height != mask.height {
            return Err(MatteError::DimensionMismatch {
                frame_width: frame.width,
                frame_height: frame.height,
                mask_width: mask.width,
                mask_height: mask.height,
            });
        }

        let pixels = frame.width as usize * frame.height as usize;
        if frame.data.len() != pixels * 4 {
            return Err(MatteError::FrameBufferSize {
                expected: pixels * 4,
                actual: frame.data.len(),
            });
        }
        if mask.data.len() != pixels {
            return Err(MatteError::MaskBufferSize {
                expected: pixels,
                actual: mask.data.len(),
            });
        }
        Ok(())
    }

    /// Reallocate every buffer for the mask's size and seed the average from it
    fn reset(&mut self, mask: &Mask) {
        let pixels = (mask.width * mask.height) as usize;

        tracing::info!(
            from = ?self.size,
            width = mask.width,
            height = mask.height,
            "Matte buffers reallocated"
        );

        self.smoothed = mask.data.iter().map(|&m| clamp_unit(m)).collect();
        self.mirrored = vec![0.0; pixels];
        self.scratch = vec![0.0; pixels];
        self.softened = vec![0.0; pixels];
        self.composite = CompositeImage::allocate(mask.width, mask.height);
        self.size = Some((mask.width, mask.height));
        self.resets += 1;
    }

    fn accumulate(&mut self, mask: &Mask) {
        let alpha = self.config.smoothing_alpha;
        for (s, &m) in self.smoothed.iter_mut().zip(&mask.data) {
            *s += (clamp_unit(m) - *s) * alpha;
        }
    }

    fn mirror_mask(&mut self) {
        let Some((width, _)) = self.size else { return };
        let width = width as usize;
        for (src, dst) in self
            .smoothed
            .chunks_exact(width)
            .zip(self.mirrored.chunks_exact_mut(width))
        {
            for (d, s) in dst.iter_mut().zip(src.iter().rev()) {
                *d = *s;
            }
        }
    }

    fn write_composite(&mut self, frame: &Frame) {
        let width = frame.width as usize;
        let debug = self.config.debug_overlay;
        let out = &mut self.composite.data;

        for (y, row) in out.chunks_exact_mut(width * 4).enumerate() {
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let src = (y * width + (width - 1 - x)) * 4;
                let rgb = [frame.data[src], frame.data[src + 1], frame.data[src + 2]];

                if debug {
                    let sum: u32 = rgb.iter().map(|&c| c as u32).sum();
                    let color = if sum < DEBUG_BLACK_THRESHOLD { [255, 0, 255] } else { rgb };
                    px.copy_from_slice(&[color[0], color[1], color[2], 255]);
                    continue;
                }

                let alpha = clamp_unit(self.softened[y * width + x]);
                let color = if alpha >= 1.0 {
                    rgb
                } else if alpha <= 0.0 {
                    [0; 3]
                } else {
                    // The texture is sRGB, so premultiply in linear space
                    rgb.map(|c| linear_to_srgb(self.decode_lut[c as usize] * alpha))
                };
                px[..3].copy_from_slice(&color);
                px[3] = (alpha * 255.0 + 0.5) as u8;
            }
        }
    }

    /// Latest composite, `None` before the first accepted pair
    pub fn composite(&self) -> Option<&CompositeImage> {
        self.size.map(|_| &self.composite)
    }

    /// Hand out the composite once per update
    pub fn take_dirty(&mut self) -> Option<&CompositeImage> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        Some(&self.composite)
    }

    /// Running average in camera orientation
    pub fn smoothed_mask(&self) -> &[f32] {
        &self.smoothed
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.size
    }

    /// Number of buffer reallocations so far
    pub fn reset_count(&self) -> u64 {
        self.resets
    }
}

fn clamp_unit(v: f32) -> f32 {
    v.max(0.0).min(1.0)
}

fn srgb_to_linear(c: u8) -> f32 {
    decode_srgb(c as f32 / 255.0)
}

fn linear_to_srgb(v: f32) -> u8 {
    (encode_srgb(clamp_unit(v)) * 255.0 + 0.5) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compositor() -> MatteCompositor {
        MatteCompositor::new(MatteConfig::default())
    }

    #[test]
    fn test_output_matches_input_dimensions() {
        let mut matte = compositor();
        for (w, h) in [(1280, 720), (640, 480), (3, 1)] {
            let image = matte
                .update(&Frame::solid(w, h, [10, 20, 30, 255]), &Mask::filled(w, h, 1.0))
                .unwrap();
            assert_eq!((image.width(), image.height()), (w, h));
            assert_eq!(image.data().len(), (w * h * 4) as usize);
        }
    }

    #[test]
    fn test_resolution_change_reseeds_smoothed_mask() {
        let mut matte = compositor();
        matte
            .update(&Frame::solid(1280, 720, [0, 0, 0, 255]), &Mask::filled(1280, 720, 0.2))
            .unwrap();

        let data: Vec<f32> = (0..640 * 480).map(|i| (i % 7) as f32 / 6.0).collect();
        let mask = Mask::new(640, 480, data.clone());
        let image = matte.update(&Frame::solid(640, 480, [0, 0, 0, 255]), &mask).unwrap();

        assert_eq!((image.width(), image.height()), (640, 480));
        assert_eq!(matte.dimensions(), Some((640, 480)));
        assert_eq!(matte.smoothed_mask(), data.as_slice());
        assert_eq!(matte.reset_count(), 2);
    }

    #[test]
    fn test_smoothing_converges_monotonically() {
        let mut matte = compositor();
        let frame = Frame::solid(8, 8, [50, 50, 50, 255]);
        matte.update(&frame, &Mask::filled(8, 8, 0.0)).unwrap();

        let target = Mask::filled(8, 8, 1.0);
        let mut previous = 1.0f32;
        for _ in 0..20 {
            matte.update(&frame, &target).unwrap();
            let error = (1.0 - matte.smoothed_mask()[0]).abs();
            assert!(error < previous);
            previous = error;
        }
        assert!(previous < 0.01, "still {} away after 20 frames", previous);
    }

    #[test]
    fn test_smoothing_disabled_follows_raw_mask() {
        let mut matte = MatteCompositor::new(MatteConfig {
            smoothing_enabled: false,
            ..MatteConfig::default()
        });
        let frame = Frame::solid(4, 4, [0, 0, 0, 255]);
        matte.update(&frame, &Mask::filled(4, 4, 0.0)).unwrap();
        matte.update(&frame, &Mask::filled(4, 4, 0.8)).unwrap();
        assert!(matte.smoothed_mask().iter().all(|&v| v == 0.8));
    }

    #[test]
    fn test_rejected_input_keeps_previous_state() {
        let mut matte = compositor();
        matte
            .update(&Frame::solid(4, 2, [1, 2, 3, 255]), &Mask::filled(4, 2, 1.0))
            .unwrap();

        assert_eq!(
            matte.update(&Frame::solid(0, 0, [0; 4]), &Mask::filled(0, 0, 1.0)).err(),
            Some(MatteError::EmptyFrame { width: 0, height: 0 })
        );
        assert!(matches!(
            matte.update(&Frame::solid(8, 8, [0; 4]), &Mask::filled(4, 4, 1.0)),
            Err(MatteError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            matte.update(&Frame::new(4, 2, vec![0; 5]), &Mask::filled(4, 2, 1.0)),
            Err(MatteError::FrameBufferSize { expected: 32, actual: 5 })
        ));

        assert_eq!(matte.dimensions(), Some((4, 2)));
        assert_eq!(matte.reset_count(), 1);
        assert_eq!(matte.composite().map(|c| c.pixel(0, 0)), Some([1, 2, 3, 255]));
    }

    #[test]
    fn test_output_is_mirrored() {
        let mut matte = MatteCompositor::new(MatteConfig {
            blur_radius: 0.0,
            ..MatteConfig::default()
        });
        // Left pixel red and visible, right pixel blue and masked out
        let frame = Frame::new(2, 1, vec![255, 0, 0, 255, 0, 0, 255, 255]);
        let mask = Mask::new(2, 1, vec![1.0, 0.0]);
        let image = matte.update(&frame, &mask).unwrap();

        assert_eq!(image.pixel(0, 0), [0, 0, 0, 0]);
        assert_eq!(image.pixel(1, 0), [255, 0, 0, 255]);
    }

    #[test]
    fn test_stencil_clears_color_outside_matte() {
        let mut matte = MatteCompositor::new(MatteConfig {
            blur_radius: 0.0,
            ..MatteConfig::default()
        });
        let frame = Frame::solid(3, 1, [200, 100, 50, 255]);
        let mask = Mask::new(3, 1, vec![0.0, 0.5, 1.0]);
        let image = matte.update(&frame, &mask).unwrap();

        // Mirrored: output x=0 reads mask index 2
        assert_eq!(image.pixel(0, 0), [200, 100, 50, 255]);
        assert_eq!(image.pixel(1, 0)[3], 128);
        assert_eq!(image.pixel(2, 0), [0, 0, 0, 0]);
    }

    #[test]
    fn test_half_alpha_edge_premultiplied_in_linear_space() {
        let mut matte = MatteCompositor::new(MatteConfig {
            blur_radius: 0.0,
            ..MatteConfig::default()
        });
        let frame = Frame::solid(1, 1, [200, 100, 50, 255]);
        let image = matte.update(&frame, &Mask::filled(1, 1, 0.5)).unwrap();
        let px = image.pixel(0, 0);

        // What the sRGB sampler returns must equal alpha times the decoded color
        for (stored, source) in px[..3].iter().zip([200u8, 100, 50]) {
            let sampled = srgb_to_linear(*stored);
            let expected = 0.5 * srgb_to_linear(source);
            assert!(
                (sampled - expected).abs() < 0.005,
                "stored {} decodes to {}, expected {}",
                stored,
                sampled,
                expected
            );
        }
        // Brighter than naive byte scaling, which darkens the edge
        assert!(px[0] > 100);
    }

    #[test]
    fn test_srgb_conversion_round_trips_bytes() {
        for c in [0u8, 1, 10, 90, 128, 200, 255] {
            assert_eq!(linear_to_srgb(srgb_to_linear(c)), c);
        }
    }

    #[test]
    fn test_debug_overlay_marks_black_pixels() {
        let mut matte = MatteCompositor::new(MatteConfig {
            debug_overlay: true,
            ..MatteConfig::default()
        });
        let frame = Frame::new(2, 1, vec![0, 0, 0, 255, 90, 90, 90, 255]);
        let image = matte.update(&frame, &Mask::filled(2, 1, 0.0)).unwrap();

        assert_eq!(image.pixel(0, 0), [90, 90, 90, 255]);
        assert_eq!(image.pixel(1, 0), [255, 0, 255, 255]);
    }

    #[test]
    fn test_dirty_flag_consumed_once() {
        let mut matte = compositor();
        assert!(matte.take_dirty().is_none());
        matte
            .update(&Frame::solid(2, 2, [0; 4]), &Mask::filled(2, 2, 1.0))
            .unwrap();
        assert!(matte.take_dirty().is_some());
        assert!(matte.take_dirty().is_none());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut matte = compositor();
        matte.set_max_dimension(8);
        matte
            .update(&Frame::solid(8, 4, [5, 5, 5, 255]), &Mask::filled(8, 4, 1.0))
            .unwrap();
        matte.take_dirty();

        assert_eq!(
            matte.update(&Frame::solid(9, 4, [0; 4]), &Mask::filled(9, 4, 1.0)).err(),
            Some(MatteError::TooLarge { width: 9, height: 4, max: 8 })
        );
        assert_eq!(matte.dimensions(), Some((8, 4)));
        assert!(matte.take_dirty().is_none());
    }

    #[test]
    fn test_config_sanitize_clamps() {
        let mut config = MatteConfig {
            smoothing_alpha: 3.0,
            blur_radius: -1.0,
            ..MatteConfig::default()
        };
        config.sanitize();
        assert_eq!(config.smoothing_alpha, 1.0);
        assert_eq!(config.blur_radius, 0.0);
    }
}
