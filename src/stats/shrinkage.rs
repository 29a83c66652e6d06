//! Shrinkage of the empirical covariance towards a scaled identity.
//!
//! All three estimators return `(1 - s) S + s μ I` with `μ = tr(S) / N` and
//! `S` the maximum-likelihood (`ddof = 0`) covariance; they differ in how
//! the intensity `s` is picked.

use ndarray::Array2;
use ndarray::ArrayView2;
use ndarray::Axis;

use super::moments::empirical_covariance;
use super::moments::validate_table;
use crate::error::PortfolioError;
use crate::error::Result;

fn shrink_to_identity(s: &Array2<f64>, intensity: f64) -> Array2<f64> {
  let n = s.nrows();
  let mu = s.diag().sum() / n as f64;
  let mut out = s * (1.0 - intensity);
  for i in 0..n {
    out[[i, i]] += intensity * mu;
  }
  out
}

/// Ledoit-Wolf optimal intensity.
pub fn ledoit_wolf_shrinkage(x: &ArrayView2<f64>) -> f64 {
  let (t, n) = x.dim();
  if n == 1 {
    return 0.0;
  }
  let tf = t as f64;
  let nf = n as f64;
  let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| ndarray::Array1::zeros(n));
  let xc = x - &mean.insert_axis(Axis(0));
  let x2 = xc.mapv(|v| v * v);
  let emp_cov_trace = x2.sum_axis(Axis(0)) / tf;
  let mu = emp_cov_trace.sum() / nf;

  let beta_ = x2.t().dot(&x2).sum();
  let delta_ = xc.t().dot(&xc).mapv(|v| v * v).sum() / (tf * tf);

  let beta = 1.0 / (nf * tf) * (beta_ / tf - delta_);
  let mut delta = delta_ - 2.0 * mu * emp_cov_trace.sum() + nf * mu * mu;
  delta /= nf;
  let beta = beta.min(delta);
  if beta == 0.0 || delta == 0.0 {
    0.0
  } else {
    beta / delta
  }
}

pub fn ledoit_wolf(x: &ArrayView2<f64>) -> Result<Array2<f64>> {
  validate_table(x, 2)?;
  let s = empirical_covariance(x);
  Ok(shrink_to_identity(&s, ledoit_wolf_shrinkage(x)))
}

/// Oracle approximating shrinkage.
pub fn oas(x: &ArrayView2<f64>) -> Result<Array2<f64>> {
  validate_table(x, 2)?;
  let (t, n) = x.dim();
  let s = empirical_covariance(x);
  if n == 1 {
    return Ok(s);
  }
  let nf = n as f64;
  let alpha = s.mapv(|v| v * v).mean().unwrap_or(0.0);
  let mu = s.diag().sum() / nf;
  let mu_squared = mu * mu;
  let num = alpha + mu_squared;
  let den = (t as f64 + 1.0) * (alpha - mu_squared / nf);
  let intensity = if den == 0.0 { 1.0 } else { (num / den).min(1.0) };
  Ok(shrink_to_identity(&s, intensity))
}

/// Fixed-intensity shrinkage.
pub fn shrunk(x: &ArrayView2<f64>, alpha: f64) -> Result<Array2<f64>> {
  validate_table(x, 2)?;
  if !(0.0..=1.0).contains(&alpha) {
    return Err(PortfolioError::invalid(format!(
      "shrinkage intensity {alpha} outside [0, 1]"
    )));
  }
  Ok(shrink_to_identity(&empirical_covariance(x), alpha))
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  fn sample() -> Array2<f64> {
    array![
      [0.01, 0.02, -0.01],
      [0.03, -0.01, 0.00],
      [-0.02, 0.00, 0.02],
      [0.04, 0.05, 0.01],
      [0.00, -0.03, -0.02],
      [0.02, 0.01, 0.03]
    ]
  }

  #[test]
  fn shrinkage_preserves_trace() {
    let x = sample();
    let s = empirical_covariance(&x.view());
    for est in [
      ledoit_wolf(&x.view()).unwrap(),
      oas(&x.view()).unwrap(),
      shrunk(&x.view(), 0.1).unwrap(),
    ] {
      assert_abs_diff_eq!(est.diag().sum(), s.diag().sum(), epsilon = 1e-15);
    }
  }

  #[test]
  fn intensity_is_a_fraction() {
    let s = ledoit_wolf_shrinkage(&sample().view());
    assert!((0.0..=1.0).contains(&s));
  }

  #[test]
  fn shrunk_one_is_scaled_identity() {
    let x = sample();
    let est = shrunk(&x.view(), 1.0).unwrap();
    assert_abs_diff_eq!(est[[0, 1]], 0.0, epsilon = 1e-18);
    assert_abs_diff_eq!(est[[0, 0]], est[[2, 2]], epsilon = 1e-18);
    assert!(shrunk(&x.view(), 1.5).is_err());
  }
}
