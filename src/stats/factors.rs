//! # Factor models
//!
//! $$
//! R_t=\alpha+B F_t+\varepsilon_t,\qquad
//! \mu=\alpha+B\mu_F,\qquad \Sigma=B\Sigma_F B^\top+D
//! $$
//!
//! Loadings are estimated per asset by stepwise regression or by principal
//! component regression, then the factor moments are pushed through `B`.

use nalgebra::DMatrix;
use ndarray::s;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView2;
use ndarray::Axis;
use tracing::debug;

use super::moments::sample_covariance;
use super::moments::validate_table;
use super::regression::ols;
use super::regression::OlsResult;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::linalg::sym_eigen_desc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepwiseDirection {
  Forward,
  Backward,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionCriterion {
  PValue,
  Aic,
  Bic,
  RSquared,
  AdjRSquared,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PcrComponents {
  Count(usize),
  /// Smallest number of components explaining at least this share.
  Explained(f64),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LoadingsMethod {
  Stepwise {
    direction: StepwiseDirection,
    criterion: SelectionCriterion,
    /// p-value threshold, only read by [`SelectionCriterion::PValue`].
    threshold: f64,
  },
  Pcr {
    components: PcrComponents,
  },
}

/// Residual covariance added to `B Σ_F B'`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResidualCovariance {
  None,
  #[default]
  Diagonal,
  Full,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FactorConfig {
  pub method: LoadingsMethod,
  pub constant: bool,
  pub residual: ResidualCovariance,
}

impl Default for FactorConfig {
  fn default() -> Self {
    Self {
      method: LoadingsMethod::Stepwise {
        direction: StepwiseDirection::Forward,
        criterion: SelectionCriterion::PValue,
        threshold: 0.05,
      },
      constant: true,
      residual: ResidualCovariance::Diagonal,
    }
  }
}

/// Per-asset regression on the factors.
#[derive(Clone, Debug, PartialEq)]
pub struct Loadings {
  /// Intercepts, one per asset (zero without constant).
  pub alpha: Array1<f64>,
  /// `N × K` exposure matrix, zero where a factor was not selected.
  pub beta: Array2<f64>,
  /// `T × N` regression residuals.
  pub residuals: Array2<f64>,
}

impl Loadings {
  /// Residual covariance of the requested shape.
  pub fn residual_covariance(&self, kind: ResidualCovariance) -> Result<Array2<f64>> {
    let n = self.beta.nrows();
    match kind {
      ResidualCovariance::None => Ok(Array2::zeros((n, n))),
      ResidualCovariance::Full => sample_covariance(&self.residuals.view()),
      ResidualCovariance::Diagonal => {
        let full = sample_covariance(&self.residuals.view())?;
        Ok(Array2::from_diag(&full.diag()))
      }
    }
  }
}

/// Factor-implied moments and return paths.
#[derive(Clone, Debug, PartialEq)]
pub struct FactorModel {
  pub mu: Array1<f64>,
  pub cov: Array2<f64>,
  /// Factor-implied asset returns `α + F B'`.
  pub returns: Array2<f64>,
  /// Uncompounded cumulative path of `returns`.
  pub nav: Array2<f64>,
  pub loadings: Loadings,
}

fn design(x: &ArrayView2<f64>, cols: &[usize], constant: bool) -> DMatrix<f64> {
  let offset = usize::from(constant);
  DMatrix::from_fn(x.nrows(), cols.len() + offset, |i, j| {
    if constant && j == 0 {
      1.0
    } else {
      x[[i, cols[j - offset]]]
    }
  })
}

fn fit(y: &[f64], x: &ArrayView2<f64>, cols: &[usize], constant: bool) -> Result<Option<OlsResult>> {
  if cols.is_empty() && !constant {
    return Ok(None);
  }
  ols(y, &design(x, cols, constant), constant).map(Some)
}

/// Higher is better.
fn score(fit: &OlsResult, criterion: SelectionCriterion) -> f64 {
  match criterion {
    SelectionCriterion::PValue => 0.0,
    SelectionCriterion::Aic => -fit.aic,
    SelectionCriterion::Bic => -fit.bic,
    SelectionCriterion::RSquared => fit.r_squared,
    SelectionCriterion::AdjRSquared => fit.adj_r_squared,
  }
}

fn forward_select(
  y: &[f64],
  x: &ArrayView2<f64>,
  criterion: SelectionCriterion,
  threshold: f64,
  constant: bool,
) -> Result<Vec<usize>> {
  let k = x.ncols();
  let offset = usize::from(constant);
  let mut selected: Vec<usize> = Vec::new();
  let mut current = match fit(y, x, &selected, constant)? {
    Some(f) => score(&f, criterion),
    None => f64::NEG_INFINITY,
  };

  loop {
    let mut best: Option<(usize, f64)> = None;
    for c in (0..k).filter(|c| !selected.contains(c)) {
      let mut trial = selected.clone();
      trial.push(c);
      if trial.len() + offset >= y.len() {
        continue;
      }
      let Some(f) = fit(y, x, &trial, constant)? else {
        continue;
      };
      let value = match criterion {
        SelectionCriterion::PValue => -f.p_values[trial.len() - 1 + offset],
        _ => score(&f, criterion),
      };
      if best.map_or(true, |(_, b)| value > b) {
        best = Some((c, value));
      }
    }
    let Some((c, value)) = best else {
      break;
    };
    let accept = match criterion {
      SelectionCriterion::PValue => -value < threshold,
      _ => value > current,
    };
    if !accept {
      break;
    }
    selected.push(c);
    current = value;
  }

  selected.sort_unstable();
  Ok(selected)
}

fn backward_select(
  y: &[f64],
  x: &ArrayView2<f64>,
  criterion: SelectionCriterion,
  threshold: f64,
  constant: bool,
) -> Result<Vec<usize>> {
  let offset = usize::from(constant);
  let mut selected: Vec<usize> = (0..x.ncols()).collect();
  while selected.len() + offset >= y.len() {
    selected.pop();
  }

  while !selected.is_empty() {
    let Some(full) = fit(y, x, &selected, constant)? else {
      break;
    };
    match criterion {
      SelectionCriterion::PValue => {
        let (pos, worst) = full.p_values[offset..]
          .iter()
          .enumerate()
          .fold((0, f64::NEG_INFINITY), |acc, (i, &p)| if p > acc.1 { (i, p) } else { acc });
        if worst <= threshold {
          break;
        }
        selected.remove(pos);
      }
      _ => {
        let current = score(&full, criterion);
        let mut best: Option<(usize, f64)> = None;
        for pos in 0..selected.len() {
          let mut trial = selected.clone();
          trial.remove(pos);
          let value = match fit(y, x, &trial, constant)? {
            Some(f) => score(&f, criterion),
            None => f64::NEG_INFINITY,
          };
          if best.map_or(true, |(_, b)| value > b) {
            best = Some((pos, value));
          }
        }
        match best {
          Some((pos, value)) if value >= current => {
            selected.remove(pos);
          }
          _ => break,
        }
      }
    }
  }
  Ok(selected)
}

fn stepwise_loadings(
  x: &ArrayView2<f64>,
  y: &ArrayView2<f64>,
  direction: StepwiseDirection,
  criterion: SelectionCriterion,
  threshold: f64,
  constant: bool,
) -> Result<Loadings> {
  let (t, n) = y.dim();
  let k = x.ncols();
  let offset = usize::from(constant);
  let mut alpha = Array1::<f64>::zeros(n);
  let mut beta = Array2::<f64>::zeros((n, k));
  let mut residuals = Array2::<f64>::zeros((t, n));

  for a in 0..n {
    let target: Vec<f64> = y.column(a).to_vec();
    let cols = match direction {
      StepwiseDirection::Forward => forward_select(&target, x, criterion, threshold, constant)?,
      StepwiseDirection::Backward => backward_select(&target, x, criterion, threshold, constant)?,
    };
    debug!(asset = a, factors = ?cols, "stepwise selection");
    match fit(&target, x, &cols, constant)? {
      Some(f) => {
        if constant {
          alpha[a] = f.beta[0];
        }
        for (j, &c) in cols.iter().enumerate() {
          beta[[a, c]] = f.beta[j + offset];
        }
        residuals.column_mut(a).assign(&Array1::from(f.residuals));
      }
      None => residuals.column_mut(a).assign(&y.column(a)),
    }
  }

  Ok(Loadings { alpha, beta, residuals })
}

fn pcr_loadings(
  x: &ArrayView2<f64>,
  y: &ArrayView2<f64>,
  components: PcrComponents,
  constant: bool,
) -> Result<Loadings> {
  let (t, k) = x.dim();
  let n = y.ncols();
  let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(k));
  let std = x.std_axis(Axis(0), 1.0).mapv(|s| if s > 0.0 { s } else { 1.0 });
  let z = (x - &mean.view().insert_axis(Axis(0))) / &std.view().insert_axis(Axis(0));

  let corr = z.t().dot(&z) / (t as f64 - 1.0);
  let (values, vectors) = sym_eigen_desc(&corr.view());
  let total: f64 = values.iter().map(|v| v.max(0.0)).sum();
  let n_comp = match components {
    PcrComponents::Count(c) => c.clamp(1, k),
    PcrComponents::Explained(share) => {
      let mut acc = 0.0;
      let mut c = k;
      for (i, v) in values.iter().enumerate() {
        acc += v.max(0.0) / total;
        if acc >= share {
          c = i + 1;
          break;
        }
      }
      c
    }
  };
  let v_k = vectors.slice(s![.., ..n_comp]).to_owned();
  let scores = z.dot(&v_k);
  let cols: Vec<usize> = (0..n_comp).collect();

  let mut alpha = Array1::<f64>::zeros(n);
  let mut beta = Array2::<f64>::zeros((n, k));
  let mut residuals = Array2::<f64>::zeros((t, n));
  let offset = usize::from(constant);
  for a in 0..n {
    let target: Vec<f64> = y.column(a).to_vec();
    let f = fit(&target, &scores.view(), &cols, constant)?
      .ok_or_else(|| PortfolioError::invalid("principal component regression has no regressors"))?;
    let gamma = Array1::from_iter(f.beta[offset..].iter().copied());
    let b = v_k.dot(&gamma) / &std;
    let intercept = if constant { f.beta[0] } else { 0.0 };
    alpha[a] = intercept - b.dot(&mean);
    beta.row_mut(a).assign(&b);
    residuals.column_mut(a).assign(&Array1::from(f.residuals));
  }
  Ok(Loadings { alpha, beta, residuals })
}

/// Estimate the loadings of assets `y` (`T × N`) on factors `x` (`T × K`).
pub fn loadings_matrix(x: &ArrayView2<f64>, y: &ArrayView2<f64>, cfg: &FactorConfig) -> Result<Loadings> {
  validate_table(x, 3)?;
  validate_table(y, 3)?;
  if x.nrows() != y.nrows() {
    return Err(PortfolioError::mismatch("factor periods", y.nrows(), x.nrows()));
  }
  match cfg.method {
    LoadingsMethod::Stepwise {
      direction,
      criterion,
      threshold,
    } => stepwise_loadings(x, y, direction, criterion, threshold, cfg.constant),
    LoadingsMethod::Pcr { components } => pcr_loadings(x, y, components, cfg.constant),
  }
}

/// Factor-implied moments. Loadings are estimated when not supplied.
pub fn risk_factors(
  x: &ArrayView2<f64>,
  y: &ArrayView2<f64>,
  loadings: Option<&Loadings>,
  cfg: &FactorConfig,
) -> Result<FactorModel> {
  let loadings = match loadings {
    Some(l) => {
      if l.beta.dim() != (y.ncols(), x.ncols()) {
        return Err(PortfolioError::mismatch("loadings rows", y.ncols(), l.beta.nrows()));
      }
      l.clone()
    }
    None => loadings_matrix(x, y, cfg)?,
  };

  let mu_f = x
    .mean_axis(Axis(0))
    .ok_or_else(|| PortfolioError::invalid("empty factor table"))?;
  let cov_f = sample_covariance(x)?;
  let b = &loadings.beta;
  let mu = &loadings.alpha + &b.dot(&mu_f);
  let cov = b.dot(&cov_f).dot(&b.t()) + loadings.residual_covariance(cfg.residual)?;

  let returns = x.dot(&b.t()) + &loadings.alpha.view().insert_axis(Axis(0));
  let mut nav = returns.clone();
  nav.accumulate_axis_inplace(Axis(0), |&prev, cur| *cur += prev);

  Ok(FactorModel {
    mu,
    cov,
    returns,
    nav,
    loadings,
  })
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use rand::rngs::StdRng;
  use rand::Rng;
  use rand::SeedableRng;
  use rand_distr::StandardNormal;

  use super::*;

  /// Two assets driven by factor 0 only, factor 1 is noise.
  fn sample() -> (Array2<f64>, Array2<f64>) {
    let mut rng = StdRng::seed_from_u64(11);
    let t = 400;
    let mut x = Array2::<f64>::zeros((t, 2));
    let mut y = Array2::<f64>::zeros((t, 2));
    for r in 0..t {
      let f0: f64 = rng.sample(StandardNormal);
      let f1: f64 = rng.sample(StandardNormal);
      let e0: f64 = rng.sample(StandardNormal);
      let e1: f64 = rng.sample(StandardNormal);
      x[[r, 0]] = 0.01 * f0;
      x[[r, 1]] = 0.01 * f1;
      y[[r, 0]] = 0.001 + 1.5 * x[[r, 0]] + 0.002 * e0;
      y[[r, 1]] = -0.5 * x[[r, 0]] + 0.002 * e1;
    }
    (x, y)
  }

  #[test]
  fn forward_pvalue_selects_true_factor() {
    let (x, y) = sample();
    let l = loadings_matrix(&x.view(), &y.view(), &FactorConfig::default()).unwrap();
    assert_abs_diff_eq!(l.beta[[0, 0]], 1.5, epsilon = 0.05);
    assert_abs_diff_eq!(l.beta[[1, 0]], -0.5, epsilon = 0.05);
  }

  #[test]
  fn backward_bic_drops_noise_factor() {
    let (x, y) = sample();
    let cfg = FactorConfig {
      method: LoadingsMethod::Stepwise {
        direction: StepwiseDirection::Backward,
        criterion: SelectionCriterion::Bic,
        threshold: 0.05,
      },
      ..FactorConfig::default()
    };
    let l = loadings_matrix(&x.view(), &y.view(), &cfg).unwrap();
    assert_abs_diff_eq!(l.beta[[0, 0]], 1.5, epsilon = 0.05);
    assert!(l.beta[[0, 1]].abs() < 0.05);
  }

  #[test]
  fn pcr_with_all_components_matches_ols() {
    let (x, y) = sample();
    let cfg = FactorConfig {
      method: LoadingsMethod::Pcr {
        components: PcrComponents::Count(2),
      },
      ..FactorConfig::default()
    };
    let l = loadings_matrix(&x.view(), &y.view(), &cfg).unwrap();
    let full = ols(
      &y.column(0).to_vec(),
      &design(&x.view(), &[0, 1], true),
      true,
    )
    .unwrap();
    assert_abs_diff_eq!(l.beta[[0, 0]], full.beta[1], epsilon = 1e-8);
    assert_abs_diff_eq!(l.beta[[0, 1]], full.beta[2], epsilon = 1e-8);
    assert_abs_diff_eq!(l.alpha[0], full.beta[0], epsilon = 1e-8);
  }

  #[test]
  fn factor_moments_are_consistent() {
    let (x, y) = sample();
    let model = risk_factors(&x.view(), &y.view(), None, &FactorConfig::default()).unwrap();
    assert_eq!(model.cov.dim(), (2, 2));
    assert!(crate::linalg::is_psd(&model.cov.view()));
    let mean_fitted = model.returns.mean_axis(Axis(0)).unwrap();
    assert_abs_diff_eq!(mean_fitted, model.mu, epsilon = 1e-12);
    assert_abs_diff_eq!(model.nav[[model.nav.nrows() - 1, 0]], model.returns.column(0).sum(), epsilon = 1e-12);
  }
}
