//! Gerber co-movement statistics.
//!
//! A pair of observations is concordant when both returns exceed `h·σ` in
//! the same direction and discordant when they exceed it in opposite
//! directions; small moves are ignored.

use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView2;

use super::moments::validate_table;
use crate::error::Result;
use crate::linalg::corr2cov;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GerberVariant {
  /// Normalizes by the number of pairs where at least one series moved.
  One,
  /// Normalizes by the geometric mean of the per-series move counts.
  Two,
}

fn population_std(x: &ArrayView2<f64>) -> Array1<f64> {
  x.std_axis(ndarray::Axis(0), 0.0)
}

/// Gerber correlation matrix and the population standard deviations used to
/// set the thresholds.
pub fn gerber_correlation(
  x: &ArrayView2<f64>,
  threshold: f64,
  variant: GerberVariant,
) -> Result<(Array2<f64>, Array1<f64>)> {
  validate_table(x, 2)?;
  let (t, n) = x.dim();
  let std = population_std(x);
  let up = Array2::from_shape_fn((t, n), |(r, c)| {
    if x[[r, c]] >= threshold * std[c] {
      1.0
    } else {
      0.0
    }
  });
  let down = Array2::from_shape_fn((t, n), |(r, c)| {
    if x[[r, c]] <= -threshold * std[c] {
      1.0
    } else {
      0.0
    }
  });

  let conc = up.t().dot(&up) + down.t().dot(&down);
  let disc = up.t().dot(&down) + down.t().dot(&up);
  let h = &conc - &disc;

  let corr = match variant {
    GerberVariant::One => {
      let neither = up.mapv(|v| 1.0 - v) - &down;
      let both_still = neither.t().dot(&neither);
      Array2::from_shape_fn((n, n), |(i, j)| {
        let denom = t as f64 - both_still[[i, j]];
        if i == j {
          1.0
        } else if denom > 0.0 {
          h[[i, j]] / denom
        } else {
          0.0
        }
      })
    }
    GerberVariant::Two => {
      let scale = Array1::from_iter((0..n).map(|i| h[[i, i]].max(0.0).sqrt()));
      Array2::from_shape_fn((n, n), |(i, j)| {
        let denom = scale[i] * scale[j];
        if i == j {
          1.0
        } else if denom > 0.0 {
          h[[i, j]] / denom
        } else {
          0.0
        }
      })
    }
  };
  Ok((corr, std))
}

pub fn gerber_covariance(
  x: &ArrayView2<f64>,
  threshold: f64,
  variant: GerberVariant,
) -> Result<Array2<f64>> {
  let (corr, std) = gerber_correlation(x, threshold, variant)?;
  Ok(corr2cov(&corr.view(), &std))
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  #[test]
  fn identical_series_are_fully_concordant() {
    let x = array![[0.02, 0.02], [-0.03, -0.03], [0.01, 0.01], [-0.02, -0.02]];
    for variant in [GerberVariant::One, GerberVariant::Two] {
      let (corr, _) = gerber_correlation(&x.view(), 0.5, variant).unwrap();
      assert_abs_diff_eq!(corr[[0, 1]], 1.0, epsilon = 1e-12);
    }
  }

  #[test]
  fn mirrored_series_are_fully_discordant() {
    let x = array![[0.02, -0.02], [-0.03, 0.03], [0.01, -0.01], [-0.02, 0.02]];
    let (corr, _) = gerber_correlation(&x.view(), 0.5, GerberVariant::Two).unwrap();
    assert_abs_diff_eq!(corr[[0, 1]], -1.0, epsilon = 1e-12);
  }
}
