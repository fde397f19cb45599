//! Separable Gaussian blur for single-channel masks
//!
//! `sigma` is expressed in pixels, the same unit a canvas `blur()` filter uses.

/// Precomputed 1D Gaussian kernel applied horizontally then vertically.
#[derive(Debug, Clone)]
pub struct GaussianBlur {
    sigma: f32,
    kernel: Vec<f32>,
}

impl GaussianBlur {
    /// Build a kernel for the given standard deviation. `sigma <= 0` disables blurring.
    pub fn new(sigma: f32) -> Self {
        let sigma = if sigma.is_finite() { sigma.max(0.0) } else { 0.0 };
        if sigma == 0.0 {
            return Self {
                sigma,
                kernel: vec![1.0],
            };
        }

        let half_width = (sigma * 3.0).ceil() as i32;
        let two_sigma_sq = 2.0 * sigma * sigma;
        let mut kernel: Vec<f32> = (-half_width..=half_width)
            .map(|i| (-((i * i) as f32) / two_sigma_sq).exp())
            .collect();

        let sum: f32 = kernel.iter().sum();
        for k in &mut kernel {
            *k /= sum;
        }

        Self { sigma, kernel }
    }

    pub fn sigma(&self) -> f32 {
        self.sigma
    }

    /// Number of taps on each side of the center sample
    pub fn half_width(&self) -> usize {
        self.kernel.len() / 2
    }

    pub fn kernel(&self) -> &[f32] {
        &self.kernel
    }

    /// Blur `src` into `dst`, using `scratch` for the horizontal pass.
    ///
    /// All three slices must hold `width * height` samples. Edges clamp.
    pub fn apply(&self, src: &[f32], scratch: &mut [f32], dst: &mut [f32], width: usize, height: usize) {
        let len = width * height;
        debug_assert!(src.len() >= len && scratch.len() >= len && dst.len() >= len);

        if self.kernel.len() == 1 {
            dst[..len].copy_from_slice(&src[..len]);
            return;
        }

        let half = self.half_width() as isize;
        let max_x = width as isize - 1;
        let max_y = height as isize - 1;

        for y in 0..height {
            let row = y * width;
            for x in 0..width {
                let mut acc = 0.0;
                for (k, weight) in self.kernel.iter().enumerate() {
                    let sx = (x as isize + k as isize - half).clamp(0, max_x) as usize;
                    acc += src[row + sx] * weight;
                }
                scratch[row + x] = acc;
            }
        }

        for y in 0..height {
            for x in 0..width {
                let mut acc = 0.0;
                for (k, weight) in self.kernel.iter().enumerate() {
                    let sy = (y as isize + k as isize - half).clamp(0, max_y) as usize;
                    acc += scratch[sy * width + x] * weight;
                }
                dst[y * width + x] = acc;
            }
        }
    }
}
