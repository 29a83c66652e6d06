use std::f64::consts::PI;

use ndarray::Array1;
use ndarray::ArrayView1;

/// Gaussian kernel density estimate of an eigenvalue spectrum (or any other
/// fixed sample) with a fixed bandwidth `h`:
/// `f(x) = 1 / (n h √(2π)) Σ exp(-(x - x_i)² / (2h²))`.
#[derive(Debug)]
pub struct GaussianKDE {
  sample: Array1<f64>,
  inv_h: f64,
  scale: f64,
}

impl GaussianKDE {
  pub fn new(sample: Array1<f64>, bandwidth: f64) -> Self {
    let n = sample.len().max(1) as f64;
    Self {
      inv_h: 1.0 / bandwidth,
      scale: 1.0 / (n * bandwidth * (2.0 * PI).sqrt()),
      sample,
    }
  }

  pub fn evaluate(&self, x: f64) -> f64 {
    self
      .sample
      .fold(0.0, |acc, &xi| acc + (-0.5 * ((x - xi) * self.inv_h).powi(2)).exp())
      * self.scale
  }

  /// Density on a grid.
  pub fn evaluate_array(&self, grid: &ArrayView1<f64>) -> Array1<f64> {
    grid.mapv(|x| self.evaluate(x))
  }
}

/// Quantile `p ∈ [0, 1]` of an ascending sample with linear interpolation
/// between order statistics (numpy's default).
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
  let Some(&last) = sorted.last() else {
    return f64::NAN;
  };
  let pos = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
  let below = pos.floor() as usize;
  if below + 1 >= sorted.len() {
    return last;
  }
  sorted[below] + (pos - below as f64) * (sorted[below + 1] - sorted[below])
}
