//! # Moments
//!
//! $$
//! \hat\mu_{\text{ewma}} = \frac{\sum_{t} d^{T-1-t} r_t}{\sum_t d^{T-1-t}}
//! $$
//!
//! Sample, exponentially weighted and semi moments of a returns table.

use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView2;
use ndarray::Axis;

use crate::error::PortfolioError;
use crate::error::Result;
use crate::linalg::symmetrize;

/// Expected-return estimator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MeanMethod {
  /// Arithmetic mean.
  Historical,
  /// Exponentially weighted mean with normalized weights (`adjust=True`).
  EwmaAdjusted { d: f64 },
  /// Recursive exponentially weighted mean (`adjust=False`).
  EwmaUnadjusted { d: f64 },
}

impl Default for MeanMethod {
  fn default() -> Self {
    MeanMethod::Historical
  }
}

pub(crate) fn validate_table(x: &ArrayView2<f64>, min_rows: usize) -> Result<()> {
  if x.ncols() == 0 {
    return Err(PortfolioError::invalid("returns table has no columns"));
  }
  if x.nrows() < min_rows {
    return Err(PortfolioError::invalid(format!(
      "returns table needs at least {min_rows} rows, got {}",
      x.nrows()
    )));
  }
  if x.iter().any(|v| !v.is_finite()) {
    return Err(PortfolioError::invalid("returns table contains non-finite values"));
  }
  Ok(())
}

fn validate_decay(d: f64) -> Result<()> {
  if d > 0.0 && d < 1.0 {
    Ok(())
  } else {
    Err(PortfolioError::invalid(format!("decay factor {d} outside (0, 1)")))
  }
}

/// Observation weights of the last exponentially weighted window.
pub(crate) fn ewma_weights(n: usize, d: f64, adjust: bool) -> Array1<f64> {
  let mut w = Array1::<f64>::zeros(n);
  for t in 0..n {
    let age = (n - 1 - t) as i32;
    w[t] = if adjust || t > 0 {
      d.powi(age)
    } else {
      d.powi(age) / (1.0 - d)
    };
  }
  if !adjust {
    w.mapv_inplace(|v| v * (1.0 - d));
  }
  w
}

/// Expected returns under the chosen method.
pub fn mean_vector(x: &ArrayView2<f64>, method: MeanMethod) -> Result<Array1<f64>> {
  validate_table(x, 1)?;
  match method {
    MeanMethod::Historical => Ok(
      x.mean_axis(Axis(0))
        .ok_or_else(|| PortfolioError::invalid("empty returns table"))?,
    ),
    MeanMethod::EwmaAdjusted { d } | MeanMethod::EwmaUnadjusted { d } => {
      validate_decay(d)?;
      let adjust = matches!(method, MeanMethod::EwmaAdjusted { .. });
      let w = ewma_weights(x.nrows(), d, adjust);
      let total = w.sum();
      Ok(x.t().dot(&w) / total)
    }
  }
}

/// Sample covariance with `ddof = 1`.
pub fn sample_covariance(x: &ArrayView2<f64>) -> Result<Array2<f64>> {
  validate_table(x, 2)?;
  let t = x.nrows() as f64;
  let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(x.ncols()));
  let centered = x - &mean.insert_axis(Axis(0));
  Ok(symmetrize(&(centered.t().dot(&centered) / (t - 1.0)).view()))
}

/// Covariance with `ddof = 0`.
pub(crate) fn empirical_covariance(x: &ArrayView2<f64>) -> Array2<f64> {
  let t = x.nrows().max(1) as f64;
  let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(x.ncols()));
  let centered = x - &mean.insert_axis(Axis(0));
  symmetrize(&(centered.t().dot(&centered) / t).view())
}

/// Downside covariance around the mean.
pub fn semi_covariance(x: &ArrayView2<f64>) -> Result<Array2<f64>> {
  validate_table(x, 2)?;
  let t = x.nrows() as f64;
  let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(x.ncols()));
  let downside = (x - &mean.insert_axis(Axis(0))).mapv(|v| v.min(0.0));
  Ok(symmetrize(&(downside.t().dot(&downside) / (t - 1.0)).view()))
}

/// Bias-corrected exponentially weighted covariance of the last window.
pub fn ewma_covariance(x: &ArrayView2<f64>, d: f64, adjust: bool) -> Result<Array2<f64>> {
  validate_table(x, 2)?;
  validate_decay(d)?;
  let w = ewma_weights(x.nrows(), d, adjust);
  let total = w.sum();
  let total_sq = w.mapv(|v| v * v).sum();
  let mean = x.t().dot(&w) / total;
  let centered = x - &mean.insert_axis(Axis(0));
  let weighted = &centered * &w.view().insert_axis(Axis(1));
  let biased = centered.t().dot(&weighted) / total;
  let correction = total * total / (total * total - total_sq);
  Ok(symmetrize(&(biased * correction).view()))
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  #[test]
  fn historical_mean_and_cov_match_numpy() {
    let x = array![[0.01, 0.02], [0.03, -0.01], [-0.02, 0.00], [0.04, 0.05]];
    let mu = mean_vector(&x.view(), MeanMethod::Historical).unwrap();
    assert_abs_diff_eq!(mu, array![0.015, 0.015], epsilon = 1e-15);

    let cov = sample_covariance(&x.view()).unwrap();
    // numpy.cov(x.T)
    assert_abs_diff_eq!(cov[[0, 0]], 0.000_7, epsilon = 1e-15);
    assert_abs_diff_eq!(cov[[0, 1]], 0.001 / 3.0, epsilon = 1e-15);
    assert_abs_diff_eq!(cov[[1, 0]], 0.001 / 3.0, epsilon = 1e-15);
    assert_abs_diff_eq!(cov[[1, 1]], 0.000_7, epsilon = 1e-15);
  }

  #[test]
  fn ewma_unadjusted_matches_recursion() {
    let x = array![[1.0], [2.0], [4.0]];
    let d = 0.5;
    let mu = mean_vector(&x.view(), MeanMethod::EwmaUnadjusted { d }).unwrap();
    let mut y = 1.0;
    for v in [2.0, 4.0] {
      y = d * y + (1.0 - d) * v;
    }
    assert_abs_diff_eq!(mu[0], y, epsilon = 1e-12);
  }

  #[test]
  fn ewma_adjusted_weights_recent_more() {
    let x = array![[1.0], [2.0], [4.0]];
    let mu = mean_vector(&x.view(), MeanMethod::EwmaAdjusted { d: 0.5 }).unwrap();
    assert_abs_diff_eq!(mu[0], (1.0 * 0.25 + 2.0 * 0.5 + 4.0) / 1.75, epsilon = 1e-12);
  }

  #[test]
  fn ewma_cov_with_unit_decay_limit_is_sample_cov() {
    let x = array![[0.01, 0.02], [0.03, -0.01], [-0.02, 0.00], [0.04, 0.05]];
    let ewma = ewma_covariance(&x.view(), 0.999_999, true).unwrap();
    let sample = sample_covariance(&x.view()).unwrap();
    assert_abs_diff_eq!(ewma, sample, epsilon = 1e-9);
  }

  #[test]
  fn semi_covariance_ignores_upside() {
    let x = array![[0.1], [-0.1], [0.1], [-0.1]];
    let semi = semi_covariance(&x.view()).unwrap();
    assert_abs_diff_eq!(semi[[0, 0]], 0.02 / 3.0, epsilon = 1e-15);
  }

  #[test]
  fn rejects_bad_decay() {
    let x = array![[0.1], [0.2]];
    assert!(mean_vector(&x.view(), MeanMethod::EwmaAdjusted { d: 1.0 }).is_err());
  }
}
