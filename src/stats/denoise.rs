//! # Random-matrix denoising
//!
//! $$
//! f(\lambda)=\frac{q}{2\pi\sigma^2\lambda}\sqrt{(\lambda_+-\lambda)(\lambda-\lambda_-)},\qquad
//! \lambda_\pm=\sigma^2\left(1\pm\sqrt{1/q}\right)^2
//! $$
//!
//! Eigenvalues of the correlation matrix above `λ+` carry signal, the rest
//! are treated as noise and replaced according to [`DenoiseMethod`].

use ndarray::s;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use tracing::debug;
use tracing::warn;

use super::gaussian_kde::GaussianKDE;
use super::scalar_min::minimize_scalar;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::linalg::corr2cov;
use crate::linalg::cov2corr;
use crate::linalg::recompose;
use crate::linalg::sym_eigen_desc;
use crate::linalg::unit_diagonal;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DenoiseMethod {
  /// Noise eigenvalues replaced by their average (trace preserving).
  Fixed,
  /// Noise eigenvalues set to zero.
  Spectral,
  /// Noise block blended with its own diagonal by `alpha`.
  Shrink { alpha: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DenoiseConfig {
  pub bandwidth: f64,
  pub points: usize,
  /// Number of leading components removed after denoising, `None` keeps the
  /// market mode.
  pub detone_components: Option<usize>,
}

impl Default for DenoiseConfig {
  fn default() -> Self {
    Self {
      bandwidth: 0.01,
      points: 1000,
      detone_components: None,
    }
  }
}

/// Marchenko-Pastur density on `points` evenly spaced eigenvalues.
pub fn marchenko_pastur_pdf(var: f64, q: f64, points: usize) -> (Array1<f64>, Array1<f64>) {
  let e_min = var * (1.0 - (1.0 / q).sqrt()).powi(2);
  let e_max = var * (1.0 + (1.0 / q).sqrt()).powi(2);
  let grid = Array1::linspace(e_min, e_max, points);
  let pdf = grid.mapv(|l| {
    if l <= 0.0 {
      0.0
    } else {
      q / (2.0 * std::f64::consts::PI * var * l) * ((e_max - l) * (l - e_min)).max(0.0).sqrt()
    }
  });
  (grid, pdf)
}

fn fit_error(var: f64, eigenvalues: &ArrayView1<f64>, q: f64, cfg: &DenoiseConfig) -> f64 {
  let (grid, pdf) = marchenko_pastur_pdf(var, q, cfg.points);
  let kde = GaussianKDE::new(eigenvalues.to_owned(), cfg.bandwidth);
  let empirical = kde.evaluate_array(&grid.view());
  (&empirical - &pdf).mapv(|v| v * v).sum()
}

/// Upper Marchenko-Pastur edge fitted to the sample eigenvalues and the
/// fitted noise variance.
pub fn find_max_eigenvalue(eigenvalues: &ArrayView1<f64>, q: f64, cfg: &DenoiseConfig) -> (f64, f64) {
  let fitted = minimize_scalar(|v| fit_error(v, eigenvalues, q, cfg), 1e-5, 1.0 - 1e-5, 500);
  let var = match fitted {
    Some((v, _)) => v,
    None => {
      warn!("Marchenko-Pastur fit failed, assuming unit noise variance");
      1.0
    }
  };
  let e_max = var * (1.0 + (1.0 / q).sqrt()).powi(2);
  (e_max, var)
}

/// Denoised correlation matrix of `corr` estimated on `t` observations.
pub fn denoise_correlation(
  corr: &ArrayView2<f64>,
  t: usize,
  method: DenoiseMethod,
  cfg: &DenoiseConfig,
) -> Result<Array2<f64>> {
  let n = corr.nrows();
  if n == 0 || t == 0 {
    return Err(PortfolioError::invalid("denoising needs a non-empty sample"));
  }
  let q = t as f64 / n as f64;
  let (values, vectors) = sym_eigen_desc(corr);
  let (e_max, var) = find_max_eigenvalue(&values.view(), q, cfg);
  let n_facts = values.iter().filter(|&&v| v > e_max).count();
  debug!(e_max, var, n_facts, "Marchenko-Pastur fit");

  let denoised = match method {
    DenoiseMethod::Fixed => {
      let mut adjusted = values.clone();
      if n_facts < n {
        let noise_mean = values.slice(s![n_facts..]).mean().unwrap_or(0.0);
        adjusted.slice_mut(s![n_facts..]).fill(noise_mean);
      }
      unit_diagonal(&recompose(&adjusted, &vectors).view())
    }
    DenoiseMethod::Spectral => {
      let mut adjusted = values.clone();
      adjusted.slice_mut(s![n_facts..]).fill(0.0);
      unit_diagonal(&recompose(&adjusted, &vectors).view())
    }
    DenoiseMethod::Shrink { alpha } => {
      if !(0.0..=1.0).contains(&alpha) {
        return Err(PortfolioError::invalid(format!(
          "denoise shrinkage {alpha} outside [0, 1]"
        )));
      }
      let signal = recompose(
        &values.slice(s![..n_facts]).to_owned(),
        &vectors.slice(s![.., ..n_facts]).to_owned(),
      );
      let noise = recompose(
        &values.slice(s![n_facts..]).to_owned(),
        &vectors.slice(s![.., n_facts..]).to_owned(),
      );
      let mut out = signal + &noise * alpha;
      for i in 0..n {
        out[[i, i]] += (1.0 - alpha) * noise[[i, i]];
      }
      out
    }
  };

  match cfg.detone_components {
    Some(k) if k > 0 => Ok(detone(&denoised.view(), k)),
    _ => Ok(denoised),
  }
}

/// Remove the `k` leading components and rescale to unit diagonal.
pub fn detone(corr: &ArrayView2<f64>, k: usize) -> Array2<f64> {
  let (values, vectors) = sym_eigen_desc(corr);
  let k = k.min(values.len());
  let market = recompose(
    &values.slice(s![..k]).to_owned(),
    &vectors.slice(s![.., ..k]).to_owned(),
  );
  unit_diagonal(&(corr - &market).view())
}

/// Denoise a covariance matrix through its correlation matrix.
pub fn denoise_covariance(
  cov: &ArrayView2<f64>,
  t: usize,
  method: DenoiseMethod,
  cfg: &DenoiseConfig,
) -> Result<Array2<f64>> {
  let (corr, std) = cov2corr(cov);
  let fixed = denoise_correlation(&corr.view(), t, method, cfg)?;
  Ok(corr2cov(&fixed.view(), &std))
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use rand::rngs::StdRng;
  use rand::Rng;
  use rand::SeedableRng;
  use rand_distr::StandardNormal;

  use super::*;
  use crate::stats::moments::sample_covariance;

  fn noisy_factor_sample(t: usize, n: usize) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(7);
    let mut x = Array2::<f64>::zeros((t, n));
    for r in 0..t {
      let market: f64 = rng.sample(StandardNormal);
      for c in 0..n {
        let eps: f64 = rng.sample(StandardNormal);
        x[[r, c]] = 0.01 * (0.6 * market + eps);
      }
    }
    x
  }

  #[test]
  fn mp_density_integrates_to_one() {
    let (grid, pdf) = marchenko_pastur_pdf(1.0, 4.0, 20_000);
    let dx = grid[1] - grid[0];
    assert_abs_diff_eq!(pdf.sum() * dx, 1.0, epsilon = 1e-2);
  }

  #[test]
  fn denoised_correlation_keeps_unit_diagonal_and_market_factor() {
    let x = noisy_factor_sample(500, 20);
    let cov = sample_covariance(&x.view()).unwrap();
    let (corr, _) = cov2corr(&cov.view());
    let cfg = DenoiseConfig::default();
    for method in [DenoiseMethod::Fixed, DenoiseMethod::Spectral, DenoiseMethod::Shrink { alpha: 0.5 }] {
      let d = denoise_correlation(&corr.view(), 500, method, &cfg).unwrap();
      for i in 0..20 {
        assert_abs_diff_eq!(d[[i, i]], 1.0, epsilon = 1e-9);
      }
      assert!(d[[0, 1]] > 0.1);
    }
  }

  #[test]
  fn detoning_removes_common_mode() {
    let x = noisy_factor_sample(500, 10);
    let cov = sample_covariance(&x.view()).unwrap();
    let (corr, _) = cov2corr(&cov.view());
    let detoned = detone(&corr.view(), 1);
    let mean_off = |m: &Array2<f64>| {
      let total: f64 = (0..10)
        .flat_map(|i| (0..10).map(move |j| (i, j)))
        .filter(|(i, j)| i != j)
        .map(|(i, j)| m[[i, j]])
        .sum();
      total / 90.0
    };
    assert!(mean_off(&detoned) < mean_off(&corr) - 0.2);
  }
}
