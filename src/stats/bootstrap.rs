//! # Block bootstrap
//!
//! $$
//! \big[\hat\theta_{q/2},\ \hat\theta_{1-q/2}\big],\qquad
//! \hat\theta^{(s)}=\theta\big(R^{(s)}\big),\ s=1..n_{sim}
//! $$
//!
//! Percentile bounds on the mean vector and covariance matrix from block
//! resamples of the returns table. Replications run in parallel, each with
//! its own seed, so results only depend on `seed`.

use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView2;
use ndarray::Axis;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::debug;

use super::gaussian_kde::percentile;
use super::moments::sample_covariance;
use super::moments::validate_table;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::linalg::repair_covariance;
use crate::linalg::PsdRepair;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BootstrapKind {
  /// Geometric block lengths with mean `window`.
  #[default]
  Stationary,
  /// Fixed-length blocks wrapping around the end of the sample.
  Circular,
  /// Fixed-length blocks fully inside the sample.
  Moving,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BootstrapConfig {
  pub kind: BootstrapKind,
  /// Two-sided significance, bounds sit at `q/2` and `1 - q/2`.
  pub q: f64,
  pub n_sim: usize,
  pub window: usize,
  pub seed: u64,
}

impl Default for BootstrapConfig {
  fn default() -> Self {
    Self {
      kind: BootstrapKind::Stationary,
      q: 0.05,
      n_sim: 3000,
      window: 3,
      seed: 0,
    }
  }
}

impl BootstrapConfig {
  fn validate(&self, t: usize) -> Result<()> {
    if !(self.q > 0.0 && self.q < 1.0) {
      return Err(PortfolioError::invalid(format!("bootstrap q {} outside (0, 1)", self.q)));
    }
    if self.n_sim < 2 {
      return Err(PortfolioError::invalid("bootstrap needs at least 2 simulations"));
    }
    if self.window == 0 || self.window > t {
      return Err(PortfolioError::invalid(format!(
        "bootstrap window {} outside [1, {t}]",
        self.window
      )));
    }
    Ok(())
  }
}

/// Percentile bounds and sampling covariances of the bootstrapped moments.
#[derive(Clone, Debug, PartialEq)]
pub struct BootstrapBounds {
  pub mu_l: Array1<f64>,
  pub mu_u: Array1<f64>,
  pub cov_l: Array2<f64>,
  pub cov_u: Array2<f64>,
  /// Covariance of the simulated mean vectors.
  pub cov_mu: Array2<f64>,
  /// Variance of each entry of the simulated covariances, row-major `vec(Σ)`.
  pub cov_sigma: Array1<f64>,
}

/// Row indices of one resample of length `t`.
pub(crate) fn resample_indices(kind: BootstrapKind, t: usize, window: usize, rng: &mut StdRng) -> Vec<usize> {
  let mut idx = Vec::with_capacity(t);
  match kind {
    BootstrapKind::Moving => {
      while idx.len() < t {
        let start = rng.gen_range(0..=t - window);
        idx.extend((start..start + window).take(t - idx.len()));
      }
    }
    BootstrapKind::Circular => {
      while idx.len() < t {
        let start = rng.gen_range(0..t);
        idx.extend((0..window).map(|k| (start + k) % t).take(t - idx.len()));
      }
    }
    BootstrapKind::Stationary => {
      let p = 1.0 / window as f64;
      let mut current = rng.gen_range(0..t);
      idx.push(current);
      while idx.len() < t {
        if rng.gen::<f64>() < p {
          current = rng.gen_range(0..t);
        } else {
          current = (current + 1) % t;
        }
        idx.push(current);
      }
    }
  }
  idx
}

/// Elementwise lower/upper percentiles of a stack of samples (`n_sim × m`).
pub(crate) fn percentile_bounds(samples: &Array2<f64>, q: f64) -> (Array1<f64>, Array1<f64>) {
  let m = samples.ncols();
  let mut lower = Array1::<f64>::zeros(m);
  let mut upper = Array1::<f64>::zeros(m);
  for j in 0..m {
    let mut column = samples.column(j).to_vec();
    column.sort_by(|a, b| a.total_cmp(b));
    lower[j] = percentile(&column, q / 2.0);
    upper[j] = percentile(&column, 1.0 - q / 2.0);
  }
  (lower, upper)
}

/// Moments of a stack of simulated `(mu, vec(cov))` pairs.
pub(crate) fn summarize(mus: &Array2<f64>, covs: &Array2<f64>, n: usize, q: f64) -> Result<BootstrapBounds> {
  let (mu_l, mu_u) = percentile_bounds(mus, q);
  let (cov_l, cov_u) = percentile_bounds(covs, q);
  let cov_l = cov_l
    .into_shape_with_order((n, n))
    .map_err(|e| PortfolioError::Numerical(e.to_string()))?;
  let cov_u = cov_u
    .into_shape_with_order((n, n))
    .map_err(|e| PortfolioError::Numerical(e.to_string()))?;

  Ok(BootstrapBounds {
    mu_l,
    mu_u,
    cov_l: repair_covariance(cov_l, PsdRepair::Clipped),
    cov_u: repair_covariance(cov_u, PsdRepair::Clipped),
    cov_mu: sample_covariance(&mus.view())?,
    cov_sigma: covs.var_axis(Axis(0), 1.0),
  })
}

/// Bootstrapped percentile bounds for mean and covariance.
pub fn bootstrapping(returns: &ArrayView2<f64>, cfg: &BootstrapConfig) -> Result<BootstrapBounds> {
  validate_table(returns, 2)?;
  let (t, n) = returns.dim();
  cfg.validate(t)?;
  debug!(kind = ?cfg.kind, n_sim = cfg.n_sim, window = cfg.window, "bootstrapping moments");

  let draws: Vec<Result<(Array1<f64>, Array1<f64>)>> = (0..cfg.n_sim)
    .into_par_iter()
    .map(|sim| {
      let mut rng = StdRng::seed_from_u64(cfg.seed.wrapping_add(sim as u64));
      let idx = resample_indices(cfg.kind, t, cfg.window, &mut rng);
      let sample = returns.select(Axis(0), &idx);
      let mu = sample
        .mean_axis(Axis(0))
        .ok_or_else(|| PortfolioError::invalid("empty resample"))?;
      let cov = sample_covariance(&sample.view())?;
      Ok((mu, Array1::from_iter(cov.iter().copied())))
    })
    .collect();

  let mut mus = Array2::<f64>::zeros((cfg.n_sim, n));
  let mut covs = Array2::<f64>::zeros((cfg.n_sim, n * n));
  for (s, draw) in draws.into_iter().enumerate() {
    let (mu, cov) = draw?;
    mus.row_mut(s).assign(&mu);
    covs.row_mut(s).assign(&cov);
  }
  summarize(&mus, &covs, n, cfg.q)
}
