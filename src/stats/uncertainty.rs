//! # Uncertainty sets
//!
//! $$
//! \mathcal U_\mu^{box}=\{\mu:\ \mu_l\le\mu\le\mu_u\},\qquad
//! \mathcal U_\mu^{ell}=\{\mu:\ (\mu-\hat\mu)^\top\Sigma_\mu^{-1}(\mu-\hat\mu)\le k_\mu^2\}
//! $$
//!
//! Box and ellipsoidal sets around the point estimates, built from block
//! bootstrap, a parametric normal simulation or a fixed relative margin.

use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use ndarray::Axis;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use statrs::distribution::ChiSquared;
use statrs::distribution::Continuous;
use statrs::distribution::ContinuousCDF;

use super::bootstrap::bootstrapping;
use super::bootstrap::summarize;
use super::bootstrap::BootstrapBounds;
use super::bootstrap::BootstrapConfig;
use super::bootstrap::BootstrapKind;
use super::moments::sample_covariance;
use super::moments::validate_table;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::linalg::repair_covariance;
use crate::linalg::sqrtm_psd;
use crate::linalg::PsdRepair;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BoxMethod {
  Bootstrap(BootstrapKind),
  /// Moments simulated from `N(μ, Σ)` samples of the same length.
  Normal,
  /// `μ ± dmu·|μ|`, `Σ ± dcov·|Σ|`.
  Delta { dmu: f64, dcov: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EllipsoidMethod {
  Bootstrap(BootstrapKind),
  Normal,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorstCaseConfig {
  pub box_set: BoxMethod,
  pub ellip_set: EllipsoidMethod,
  pub q: f64,
  pub n_sim: usize,
  pub window: usize,
  /// Number of simulated samples for the normal method, each as long as
  /// the returns table.
  pub n_samples: usize,
  pub seed: u64,
}

impl Default for WorstCaseConfig {
  fn default() -> Self {
    Self {
      box_set: BoxMethod::Bootstrap(BootstrapKind::Stationary),
      ellip_set: EllipsoidMethod::Bootstrap(BootstrapKind::Stationary),
      q: 0.05,
      n_sim: 3000,
      window: 3,
      n_samples: 1000,
      seed: 0,
    }
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct UncertaintySets {
  pub mu_l: Array1<f64>,
  pub mu_u: Array1<f64>,
  /// Half width of the mean box.
  pub d_mu: Array1<f64>,
  pub cov_l: Array2<f64>,
  pub cov_u: Array2<f64>,
  pub cov_mu: Array2<f64>,
  /// Variance of each entry of `vec(Σ)`.
  pub cov_sigma: Array1<f64>,
  pub k_mu: f64,
  pub k_sigma: f64,
}

/// Simulated moments of `cfg.n_samples` normal samples of length `t`.
fn normal_bounds(
  mu: &ArrayView1<f64>,
  cov: &ArrayView2<f64>,
  t: usize,
  cfg: &WorstCaseConfig,
) -> Result<BootstrapBounds> {
  let n = mu.len();
  let root = sqrtm_psd(cov);
  if cfg.n_samples < 2 {
    return Err(PortfolioError::invalid("normal uncertainty sets need at least 2 samples"));
  }
  let draws: Vec<Result<(Array1<f64>, Array1<f64>)>> = (0..cfg.n_samples)
    .into_par_iter()
    .map(|sim| {
      let mut rng = StdRng::seed_from_u64(cfg.seed.wrapping_add(sim as u64));
      let z = Array2::from_shape_fn((t, n), |_| rng.sample::<f64, _>(StandardNormal));
      let sample = z.dot(&root) + &mu.view().insert_axis(Axis(0));
      let m = sample
        .mean_axis(Axis(0))
        .ok_or_else(|| PortfolioError::invalid("empty simulation"))?;
      let c = sample_covariance(&sample.view())?;
      Ok((m, Array1::from_iter(c.iter().copied())))
    })
    .collect();

  let mut mus = Array2::<f64>::zeros((cfg.n_samples, n));
  let mut covs = Array2::<f64>::zeros((cfg.n_samples, n * n));
  for (s, draw) in draws.into_iter().enumerate() {
    let (m, c) = draw?;
    mus.row_mut(s).assign(&m);
    covs.row_mut(s).assign(&c);
  }
  summarize(&mus, &covs, n, cfg.q)
}

fn bootstrap_bounds(returns: &ArrayView2<f64>, kind: BootstrapKind, cfg: &WorstCaseConfig) -> Result<BootstrapBounds> {
  bootstrapping(
    returns,
    &BootstrapConfig {
      kind,
      q: cfg.q,
      n_sim: cfg.n_sim,
      window: cfg.window,
      seed: cfg.seed,
    },
  )
}

/// Quantile of `χ²(dof)` at `p`: `inverse_cdf` refined by Newton steps on
/// the CDF.
pub(crate) fn chi_squared_quantile(dof: f64, p: f64) -> Result<f64> {
  let dist = ChiSquared::new(dof).map_err(|e| PortfolioError::Numerical(e.to_string()))?;
  let mut x = dist.inverse_cdf(p);
  for _ in 0..4 {
    let density = dist.pdf(x);
    if !(density.is_finite() && density > 0.0) {
      break;
    }
    let step = (dist.cdf(x) - p) / density;
    x = (x - step).max(0.0);
    if step.abs() <= 1e-14 * x.max(1.0) {
      break;
    }
  }
  Ok(x)
}

/// Box and ellipsoidal uncertainty sets around `(mu, cov)`.
pub fn worst_case_stats(
  returns: &ArrayView2<f64>,
  mu: &ArrayView1<f64>,
  cov: &ArrayView2<f64>,
  cfg: &WorstCaseConfig,
) -> Result<UncertaintySets> {
  validate_table(returns, 2)?;
  let (t, n) = returns.dim();
  if mu.len() != n {
    return Err(PortfolioError::mismatch("mean vector", n, mu.len()));
  }
  if cov.dim() != (n, n) {
    return Err(PortfolioError::mismatch("covariance", n, cov.nrows()));
  }
  if !(cfg.q > 0.0 && cfg.q < 1.0) {
    return Err(PortfolioError::invalid(format!("q {} outside (0, 1)", cfg.q)));
  }

  let (mu_l, mu_u, cov_l, cov_u) = match cfg.box_set {
    BoxMethod::Bootstrap(kind) => {
      let b = bootstrap_bounds(returns, kind, cfg)?;
      (b.mu_l, b.mu_u, b.cov_l, b.cov_u)
    }
    BoxMethod::Normal => {
      let b = normal_bounds(mu, cov, t, cfg)?;
      (b.mu_l, b.mu_u, b.cov_l, b.cov_u)
    }
    BoxMethod::Delta { dmu, dcov } => {
      if dmu < 0.0 || dcov < 0.0 {
        return Err(PortfolioError::invalid("delta margins must be non-negative"));
      }
      let mu_l = mu.mapv(|m| m - dmu * m.abs());
      let mu_u = mu.mapv(|m| m + dmu * m.abs());
      let cov_l = cov.mapv(|c| c - dcov * c.abs());
      let cov_u = cov.mapv(|c| c + dcov * c.abs());
      (
        mu_l,
        mu_u,
        repair_covariance(cov_l, PsdRepair::Clipped),
        repair_covariance(cov_u, PsdRepair::Clipped),
      )
    }
  };

  let ellipsoid = match cfg.ellip_set {
    EllipsoidMethod::Bootstrap(kind) => bootstrap_bounds(returns, kind, cfg)?,
    EllipsoidMethod::Normal => normal_bounds(mu, cov, t, cfg)?,
  };

  let chi = |dof: f64| chi_squared_quantile(dof, 1.0 - cfg.q).map(f64::sqrt);

  Ok(UncertaintySets {
    d_mu: (&mu_u - &mu_l) / 2.0,
    mu_l,
    mu_u,
    cov_l,
    cov_u,
    cov_mu: ellipsoid.cov_mu,
    cov_sigma: ellipsoid.cov_sigma,
    k_mu: chi(n as f64)?,
    k_sigma: chi((n * n) as f64)?,
  })
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  fn sample() -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(5);
    Array2::from_shape_fn((120, 2), |(_, j)| {
      let z: f64 = rng.sample(StandardNormal);
      0.002 * (j as f64 + 1.0) + 0.01 * z
    })
  }

  #[test]
  fn delta_box_is_symmetric_and_chi_radii_match() {
    let x = sample();
    let mu = array![0.01, -0.02];
    let cov = array![[0.04, 0.01], [0.01, 0.09]];
    let cfg = WorstCaseConfig {
      box_set: BoxMethod::Delta { dmu: 0.1, dcov: 0.1 },
      ellip_set: EllipsoidMethod::Normal,
      n_sim: 50,
      n_samples: 60,
      ..Default::default()
    };
    let sets = worst_case_stats(&x.view(), &mu.view(), &cov.view(), &cfg).unwrap();
    assert_abs_diff_eq!(sets.d_mu, array![0.001, 0.002], epsilon = 1e-15);
    assert_abs_diff_eq!(sets.cov_u[[1, 1]], 0.099, epsilon = 1e-12);
    // chi2(2).ppf(0.95) = 5.991464547107979
    assert_abs_diff_eq!(sets.k_mu, 5.991_464_547_107_979_f64.sqrt(), epsilon = 1e-8);
    assert!(sets.k_sigma > sets.k_mu);
  }

  #[test]
  fn chi_squared_quantiles_are_tight() {
    // scipy.stats.chi2.ppf
    assert_abs_diff_eq!(chi_squared_quantile(2.0, 0.95).unwrap(), 5.991_464_547_107_979, epsilon = 1e-9);
    assert_abs_diff_eq!(chi_squared_quantile(4.0, 0.95).unwrap(), 9.487_729_036_781_154, epsilon = 1e-9);
    assert_abs_diff_eq!(chi_squared_quantile(10.0, 0.5).unwrap(), 9.341_817_765_591_966, epsilon = 1e-9);
  }

  #[test]
  fn bootstrap_sets_have_expected_shapes() {
    let x = sample();
    let mu = x.mean_axis(Axis(0)).unwrap();
    let cov = sample_covariance(&x.view()).unwrap();
    let cfg = WorstCaseConfig {
      n_sim: 100,
      ..Default::default()
    };
    let sets = worst_case_stats(&x.view(), &mu.view(), &cov.view(), &cfg).unwrap();
    assert_eq!(sets.cov_mu.dim(), (2, 2));
    assert_eq!(sets.cov_sigma.len(), 4);
    assert!(sets.d_mu.iter().all(|d| *d > 0.0));
  }
}
