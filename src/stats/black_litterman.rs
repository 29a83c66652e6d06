//! # Black-Litterman
//!
//! $$
//! \hat\Pi = \left[(\tau\Sigma)^{-1}+P^\top\Omega^{-1}P\right]^{-1}
//! \left[(\tau\Sigma)^{-1}\Pi+P^\top\Omega^{-1}Q\right]
//! $$
//!
//! Posterior moments blending a prior (equilibrium or historical excess
//! returns) with analyst views `P w = Q`.

use ndarray::concatenate;
use ndarray::s;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use ndarray::Axis;

use super::factors::Loadings;
use super::factors::ResidualCovariance;
use super::moments::sample_covariance;
use super::moments::validate_table;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::linalg::inverse;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlackLittermanConfig {
  /// Risk aversion; implied from the benchmark when `None`.
  pub delta: Option<f64>,
  pub rf: f64,
  /// Equilibrium prior `δΣw` instead of historical excess returns.
  pub eq: bool,
}

impl Default for BlackLittermanConfig {
  fn default() -> Self {
    Self {
      delta: None,
      rf: 0.0,
      eq: true,
    }
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BlackLittermanEstimate {
  pub mu: Array1<f64>,
  pub cov: Array2<f64>,
  pub w: Array1<f64>,
}

/// `δ = (μ'w - rf) / w'Σw`, falling back to 1 when the benchmark has no
/// variance.
pub fn implied_risk_aversion(mu: &Array1<f64>, cov: &Array2<f64>, w: &ArrayView1<f64>, rf: f64) -> f64 {
  let var = w.dot(&cov.dot(w));
  if var > 0.0 {
    (mu.dot(w) - rf) / var
  } else {
    1.0
  }
}

fn diag_omega(p: &ArrayView2<f64>, tau_sigma: &Array2<f64>) -> Array2<f64> {
  let full = p.dot(tau_sigma).dot(&p.t());
  Array2::from_diag(&full.diag())
}

struct Posterior {
  pi: Array1<f64>,
  m: Array2<f64>,
}

fn blend(
  sigma: &Array2<f64>,
  prior: &Array1<f64>,
  p: &ArrayView2<f64>,
  q: &ArrayView1<f64>,
  tau: f64,
) -> Result<Posterior> {
  let tau_sigma = sigma * tau;
  let omega = diag_omega(p, &tau_sigma);
  let inv_tau_sigma = inverse(&tau_sigma.view(), "black-litterman prior")?;
  let inv_omega = inverse(&omega.view(), "black-litterman view uncertainty")?;
  let precision = &inv_tau_sigma + &p.t().dot(&inv_omega).dot(p);
  let m = inverse(&precision.view(), "black-litterman posterior")?;
  let pi = m.dot(&(inv_tau_sigma.dot(prior) + p.t().dot(&inv_omega).dot(q)));
  Ok(Posterior { pi, m })
}

fn check_views(p: &ArrayView2<f64>, q: &ArrayView1<f64>, n: usize) -> Result<()> {
  if p.ncols() != n {
    return Err(PortfolioError::mismatch("view matrix columns", n, p.ncols()));
  }
  if p.nrows() != q.len() {
    return Err(PortfolioError::mismatch("view returns", p.nrows(), q.len()));
  }
  if p.nrows() == 0 {
    return Err(PortfolioError::invalid("at least one view is required"));
  }
  Ok(())
}

/// Black-Litterman posterior with `τ = 1/T` and `Ω = diag(P τΣ P')`.
pub fn black_litterman(
  returns: &ArrayView2<f64>,
  w: &ArrayView1<f64>,
  p: &ArrayView2<f64>,
  q: &ArrayView1<f64>,
  cfg: &BlackLittermanConfig,
) -> Result<BlackLittermanEstimate> {
  validate_table(returns, 2)?;
  let (t, n) = returns.dim();
  if w.len() != n {
    return Err(PortfolioError::mismatch("benchmark weights", n, w.len()));
  }
  check_views(p, q, n)?;

  let sigma = sample_covariance(returns)?;
  let mu = returns
    .mean_axis(Axis(0))
    .ok_or_else(|| PortfolioError::invalid("empty returns table"))?;
  let delta = cfg
    .delta
    .unwrap_or_else(|| implied_risk_aversion(&mu, &sigma, w, cfg.rf));
  let prior = if cfg.eq {
    sigma.dot(w) * delta
  } else {
    mu.mapv(|m| m - cfg.rf)
  };

  let post = blend(&sigma, &prior, p, q, 1.0 / t as f64)?;
  let cov = &sigma + &post.m;
  let w_bl = inverse(&(&cov * delta).view(), "black-litterman weights")?.dot(&post.pi);
  Ok(BlackLittermanEstimate {
    mu: post.pi.mapv(|v| v + cfg.rf),
    cov,
    w: w_bl,
  })
}

/// Factor block passed to the augmented and Bayesian variants.
#[derive(Clone, Copy, Debug)]
pub struct FactorInputs<'a> {
  /// `T × K` factor returns.
  pub factors: ArrayView2<'a, f64>,
  pub loadings: &'a Loadings,
}

/// Black-Litterman on the stacked asset/factor space.
///
/// Views may be given on assets (`p`, `q`), on factors (`p_f`, `q_f`) or
/// both. Without factor inputs this is [`black_litterman`].
#[allow(clippy::too_many_arguments)]
pub fn augmented_black_litterman(
  returns: &ArrayView2<f64>,
  w: &ArrayView1<f64>,
  asset_views: Option<(ArrayView2<f64>, ArrayView1<f64>)>,
  factor: Option<FactorInputs<'_>>,
  factor_views: Option<(ArrayView2<f64>, ArrayView1<f64>)>,
  residual: ResidualCovariance,
  cfg: &BlackLittermanConfig,
) -> Result<BlackLittermanEstimate> {
  validate_table(returns, 2)?;
  let (t, n) = returns.dim();
  let Some(factor) = factor else {
    let (p, q) = asset_views.ok_or(PortfolioError::MissingParameter("asset views"))?;
    return black_litterman(returns, w, &p, &q, cfg);
  };
  if w.len() != n {
    return Err(PortfolioError::mismatch("benchmark weights", n, w.len()));
  }
  let b = &factor.loadings.beta;
  let k = factor.factors.ncols();
  if b.dim() != (n, k) {
    return Err(PortfolioError::mismatch("loadings rows", n, b.nrows()));
  }
  if factor.factors.nrows() != t {
    return Err(PortfolioError::mismatch("factor periods", t, factor.factors.nrows()));
  }

  let sigma_f = sample_covariance(&factor.factors)?;
  let sigma_assets = b.dot(&sigma_f).dot(&b.t()) + factor.loadings.residual_covariance(residual)?;
  let b_sf = b.dot(&sigma_f);
  let top = concatenate![Axis(1), sigma_assets, b_sf];
  let bottom = concatenate![Axis(1), b_sf.t(), sigma_f];
  let sigma_a = concatenate![Axis(0), top, bottom];

  let mu_assets = returns
    .mean_axis(Axis(0))
    .ok_or_else(|| PortfolioError::invalid("empty returns table"))?;
  let mu_f = factor
    .factors
    .mean_axis(Axis(0))
    .ok_or_else(|| PortfolioError::invalid("empty factor table"))?;
  let delta = cfg
    .delta
    .unwrap_or_else(|| implied_risk_aversion(&mu_assets, &sigma_assets, w, cfg.rf));

  let prior = if cfg.eq {
    let w_a = concatenate![Axis(0), w.to_owned(), b.t().dot(w)];
    sigma_a.dot(&w_a) * delta
  } else {
    concatenate![Axis(0), mu_assets, mu_f].mapv(|m| m - cfg.rf)
  };

  let (p_a, q_a) = match (asset_views, factor_views) {
    (Some((p, q)), Some((pf, qf))) => {
      check_views(&p, &q, n)?;
      check_views(&pf, &qf, k)?;
      let mut p_a = Array2::<f64>::zeros((p.nrows() + pf.nrows(), n + k));
      p_a.slice_mut(s![..p.nrows(), ..n]).assign(&p);
      p_a.slice_mut(s![p.nrows().., n..]).assign(&pf);
      (p_a, concatenate![Axis(0), q, qf])
    }
    (Some((p, q)), None) => {
      check_views(&p, &q, n)?;
      let mut p_a = Array2::<f64>::zeros((p.nrows(), n + k));
      p_a.slice_mut(s![.., ..n]).assign(&p);
      (p_a, q.to_owned())
    }
    (None, Some((pf, qf))) => {
      check_views(&pf, &qf, k)?;
      let mut p_a = Array2::<f64>::zeros((pf.nrows(), n + k));
      p_a.slice_mut(s![.., n..]).assign(&pf);
      (p_a, qf.to_owned())
    }
    (None, None) => return Err(PortfolioError::MissingParameter("asset or factor views")),
  };

  let post = blend(&sigma_a, &prior, &p_a.view(), &q_a.view(), 1.0 / t as f64)?;
  let cov_a = &sigma_a + &post.m;
  let cov = cov_a.slice(s![..n, ..n]).to_owned();
  let pi = post.pi.slice(s![..n]).to_owned();
  let w_bl = inverse(&(&cov * delta).view(), "black-litterman weights")?.dot(&pi);
  Ok(BlackLittermanEstimate {
    mu: pi.mapv(|v| v + cfg.rf),
    cov,
    w: w_bl,
  })
}

/// Bayesian Black-Litterman: views update the factor moments, which are
/// then mapped to assets through the loadings.
pub fn bayesian_black_litterman(
  returns: &ArrayView2<f64>,
  w: &ArrayView1<f64>,
  factor: FactorInputs<'_>,
  p_f: &ArrayView2<f64>,
  q_f: &ArrayView1<f64>,
  residual: ResidualCovariance,
  cfg: &BlackLittermanConfig,
) -> Result<BlackLittermanEstimate> {
  validate_table(returns, 2)?;
  let (t, n) = returns.dim();
  let b = &factor.loadings.beta;
  let k = factor.factors.ncols();
  if b.dim() != (n, k) {
    return Err(PortfolioError::mismatch("loadings rows", n, b.nrows()));
  }
  if w.len() != n {
    return Err(PortfolioError::mismatch("benchmark weights", n, w.len()));
  }
  check_views(p_f, q_f, k)?;

  let tau = 1.0 / t as f64;
  let sigma_f = sample_covariance(&factor.factors)?;
  let mu_f = factor
    .factors
    .mean_axis(Axis(0))
    .ok_or_else(|| PortfolioError::invalid("empty factor table"))?
    .mapv(|m| m - cfg.rf);

  let omega_f = diag_omega(p_f, &(&sigma_f * tau));
  let inv_sigma_f = inverse(&sigma_f.view(), "bayesian black-litterman factor prior")?;
  let inv_omega_f = inverse(&omega_f.view(), "bayesian black-litterman view uncertainty")?;
  let sigma_hat = inverse(
    &(&inv_sigma_f + &p_f.t().dot(&inv_omega_f).dot(p_f)).view(),
    "bayesian black-litterman factor posterior",
  )?;
  let mu_hat = sigma_hat.dot(&(inv_sigma_f.dot(&mu_f) + p_f.t().dot(&inv_omega_f).dot(q_f)));

  let cov = b.dot(&sigma_hat).dot(&b.t()) + factor.loadings.residual_covariance(residual)?;
  let excess = &factor.loadings.alpha + &b.dot(&mu_hat);
  let mu_assets = returns
    .mean_axis(Axis(0))
    .ok_or_else(|| PortfolioError::invalid("empty returns table"))?;
  let delta = cfg
    .delta
    .unwrap_or_else(|| implied_risk_aversion(&mu_assets, &cov, w, cfg.rf));
  let w_bl = inverse(&(&cov * delta).view(), "black-litterman weights")?.dot(&excess);

  Ok(BlackLittermanEstimate {
    mu: excess.mapv(|v| v + cfg.rf),
    cov,
    w: w_bl,
  })
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  fn returns() -> Array2<f64> {
    array![
      [0.010, 0.020, -0.010],
      [0.030, -0.010, 0.000],
      [-0.020, 0.000, 0.020],
      [0.040, 0.050, 0.010],
      [0.000, -0.030, -0.020],
      [0.020, 0.010, 0.030],
      [-0.010, 0.015, 0.005],
      [0.005, -0.005, 0.010]
    ]
  }

  #[test]
  fn no_information_view_returns_prior_weights() {
    let x = returns();
    let w = array![0.3, 0.3, 0.4];
    // A view that coincides with the prior leaves the equilibrium intact.
    let sigma = sample_covariance(&x.view()).unwrap();
    let cfg = BlackLittermanConfig {
      delta: Some(2.5),
      ..Default::default()
    };
    let pi = sigma.dot(&w) * 2.5;
    let p = array![[1.0, 0.0, 0.0]];
    let q = array![pi[0]];
    let est = black_litterman(&x.view(), &w.view(), &p.view(), &q.view(), &cfg).unwrap();
    assert_abs_diff_eq!(est.mu, pi, epsilon = 1e-12);
    for i in 0..3 {
      assert!(est.cov[[i, i]] > sigma[[i, i]]);
    }
    assert!(est.w.iter().all(|v| v.is_finite()));
  }

  #[test]
  fn bullish_view_raises_posterior_mean() {
    let x = returns();
    let w = array![1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0];
    let cfg = BlackLittermanConfig {
      delta: Some(2.0),
      ..Default::default()
    };
    let sigma = sample_covariance(&x.view()).unwrap();
    let pi = sigma.dot(&w) * 2.0;
    let p = array![[0.0, 1.0, 0.0]];
    let q = array![pi[1] + 0.01];
    let est = black_litterman(&x.view(), &w.view(), &p.view(), &q.view(), &cfg).unwrap();
    assert!(est.mu[1] > pi[1]);
    assert!(crate::linalg::is_psd(&est.cov.view()));
  }

  #[test]
  fn rejects_misaligned_views() {
    let x = returns();
    let w = array![0.5, 0.5, 0.0];
    let p = array![[1.0, 0.0]];
    let q = array![0.01];
    let err = black_litterman(&x.view(), &w.view(), &p.view(), &q.view(), &Default::default());
    assert!(matches!(err, Err(PortfolioError::DimensionMismatch { .. })));
  }

  #[test]
  fn augmented_without_factors_falls_back() {
    let x = returns();
    let w = array![0.3, 0.3, 0.4];
    let p = array![[1.0, -1.0, 0.0]];
    let q = array![0.002];
    let cfg = BlackLittermanConfig::default();
    let a = black_litterman(&x.view(), &w.view(), &p.view(), &q.view(), &cfg).unwrap();
    let b = augmented_black_litterman(
      &x.view(),
      &w.view(),
      Some((p.view(), q.view())),
      None,
      None,
      ResidualCovariance::Diagonal,
      &cfg,
    )
    .unwrap();
    assert_eq!(a, b);
  }
}
