//! # Worst-case mean-variance
//!
//! $$
//! \max_{\mathbf w}\ \min_{\mu\in\mathcal U_\mu}\mu^\top\mathbf w
//! -\lambda\max_{\Sigma\in\mathcal U_\Sigma}\sqrt{\mathbf w^\top\Sigma\mathbf w}
//! $$
//!
//! The inner problems have closed forms for box and ellipsoidal sets, which
//! turn the robust problem into a second-order cone program:
//!
//! * box mean: `μ'w - d_μ'|w|`
//! * ellipsoidal mean: `μ'w - k_μ ‖Σ_μ^{1/2} w‖`
//! * box covariance: `w'Σw + λ_max(D)‖w‖²`, `D = max(Σ_u - Σ, Σ - Σ_l)`
//! * ellipsoidal covariance: `w'Σw + k_σ √max(diag Σ_σ) ‖w‖²`

use std::fmt;
use std::str::FromStr;

use ndarray::Array1;
use ndarray::Zip;
use tracing::debug;

use super::conic::Affine;
use super::conic::ConicProblem;
use super::epigraph::matrix_rows;
use super::optimizers::add_constraints;
use super::optimizers::extract_weights;
use super::optimizers::outcome;
use super::optimizers::sharpe_target;
use super::request::ConstraintSet;
use super::request::OptimizationInputs;
use super::solver::SolveOutcome;
use super::solver::SolverChain;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::linalg::sqrtm_psd;
use crate::linalg::sym_eigen_desc;
use crate::stats::uncertainty::UncertaintySets;
use crate::types::check_len;
use crate::types::Objective;
use crate::types::RiskParams;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UncertaintySet {
  Box,
  #[default]
  Ellipsoidal,
  /// No uncertainty, the point estimate.
  Point,
}

impl fmt::Display for UncertaintySet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      UncertaintySet::Box => "box",
      UncertaintySet::Ellipsoidal => "ellipsoidal",
      UncertaintySet::Point => "point",
    };
    f.write_str(s)
  }
}

impl FromStr for UncertaintySet {
  type Err = PortfolioError;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_lowercase().as_str() {
      "box" => Ok(UncertaintySet::Box),
      "ellip" | "ellipsoidal" => Ok(UncertaintySet::Ellipsoidal),
      "point" | "none" => Ok(UncertaintySet::Point),
      _ => Err(PortfolioError::UnsupportedMethod(s.to_string())),
    }
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct WorstCaseRequest {
  pub obj: Objective,
  pub rf: f64,
  pub mu_set: UncertaintySet,
  pub cov_set: UncertaintySet,
  pub params: RiskParams,
  pub constraints: ConstraintSet,
}

impl Default for WorstCaseRequest {
  fn default() -> Self {
    Self {
      obj: Objective::Sharpe,
      rf: 0.0,
      mu_set: UncertaintySet::Box,
      cov_set: UncertaintySet::Box,
      params: RiskParams::default(),
      constraints: ConstraintSet::default(),
    }
  }
}

fn check_sets(sets: &UncertaintySets, n: usize) -> Result<()> {
  check_len("mean box half width", n, sets.d_mu.len())?;
  for (context, m) in [
    ("covariance lower bound", &sets.cov_l),
    ("covariance upper bound", &sets.cov_u),
    ("mean estimate covariance", &sets.cov_mu),
  ] {
    if m.dim() != (n, n) {
      return Err(PortfolioError::mismatch(context, n, m.nrows()));
    }
  }
  check_len("covariance estimate variances", n * n, sets.cov_sigma.len())
}

/// Extra penalty `c` in `‖[Gw; c w]‖` for the covariance set.
fn covariance_penalty(inputs: &OptimizationInputs, sets: &UncertaintySets, set: UncertaintySet) -> f64 {
  match set {
    UncertaintySet::Point => 0.0,
    UncertaintySet::Box => {
      let mut d = &sets.cov_u - &inputs.cov;
      Zip::from(&mut d)
        .and(&inputs.cov)
        .and(&sets.cov_l)
        .for_each(|d, &s, &l| *d = d.max(s - l));
      let (values, _) = sym_eigen_desc(&d.view());
      values.first().copied().unwrap_or(0.0).max(0.0).sqrt()
    }
    UncertaintySet::Ellipsoidal => {
      let worst = sets.cov_sigma.iter().copied().fold(0.0_f64, f64::max);
      (sets.k_sigma * worst.sqrt()).max(0.0).sqrt()
    }
  }
}

/// Robust mean-variance solve over the given uncertainty sets.
pub fn wc_optimization(
  inputs: &OptimizationInputs,
  sets: &UncertaintySets,
  req: &WorstCaseRequest,
  chain: &SolverChain,
) -> Result<SolveOutcome> {
  inputs.validate()?;
  req.params.validate()?;
  let n = inputs.n_assets();
  check_sets(sets, n)?;
  req.constraints.validate(n, inputs.returns.nrows())?;
  if let Objective::Utility { l } = req.obj {
    if !l.is_finite() || l < 0.0 {
      return Err(PortfolioError::invalid("risk aversion must be non-negative"));
    }
  }
  if n == 1 {
    return outcome(inputs.assets, Ok(Array1::from_elem(1, req.constraints.budget)));
  }

  let mut p = ConicProblem::new();
  let w = p.add_vars(n);
  let k = match req.obj {
    Objective::Sharpe => {
      let k = p.add_var();
      p.nonneg(Affine::var(k));
      Some(k)
    }
    _ => None,
  };
  let scale = k.map_or_else(|| Affine::constant(1.0), Affine::var);
  add_constraints(&mut p, &w, &scale, inputs, &req.constraints, &req.params)?;

  let mut ret = Affine::linear(&w, inputs.mu.iter().copied());
  match req.mu_set {
    UncertaintySet::Point => {}
    UncertaintySet::Box => {
      let a = p.add_vars(n);
      for i in 0..n {
        p.geq(Affine::var(a[i]), &Affine::var(w[i]));
        p.geq(Affine::var(a[i]), &Affine::term(w[i], -1.0));
      }
      ret = ret.sub(&Affine::linear(&a, sets.d_mu.iter().copied()));
    }
    UncertaintySet::Ellipsoidal => {
      let e = p.add_var();
      let root = sqrtm_psd(&sets.cov_mu.view());
      p.soc(Affine::var(e), matrix_rows(&root.view(), &w));
      ret = ret.add_term(e, -sets.k_mu);
    }
  }

  let g = p.add_var();
  let mut tail = matrix_rows(&sqrtm_psd(&inputs.cov).view(), &w);
  let c = covariance_penalty(inputs, sets, req.cov_set);
  if c > 0.0 {
    tail.extend(w.iter().map(|&i| Affine::term(i, c)));
  }
  p.soc(Affine::var(g), tail);
  let risk = Affine::var(g);

  match req.obj {
    Objective::MinRisk => p.minimize(&risk),
    Objective::Utility { l } => p.maximize(&ret.sub(&risk.scale(l))),
    Objective::Sharpe => {
      let target = sharpe_target(&inputs.mu, req.rf);
      p.geq(ret.sub(&scale.scale(req.rf)), &Affine::constant(target));
      p.minimize(&risk);
    }
    Objective::MaxRet => p.maximize(&ret),
  }
  debug!(
    mu_set = %req.mu_set,
    cov_set = %req.cov_set,
    obj = ?req.obj,
    vars = p.n_vars(),
    "formulated worst-case problem"
  );

  let c = &req.constraints;
  let result = chain
    .solve(&p)
    .and_then(|x| extract_weights(&x, &w, k, c.budget, c.short));
  outcome(inputs.assets, result)
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::Array2;
  use ndarray::Axis;

  use super::*;
  use crate::portfolio::optimizers::optimization;
  use crate::portfolio::request::OptimizationRequest;
  use crate::stats::moments::sample_covariance;
  use crate::stats::uncertainty::worst_case_stats;
  use crate::stats::uncertainty::BoxMethod;
  use crate::stats::uncertainty::EllipsoidMethod;
  use crate::stats::uncertainty::WorstCaseConfig;
  use crate::types::RiskMeasure;

  struct Fixture {
    assets: Vec<String>,
    mu: Array1<f64>,
    cov: Array2<f64>,
    returns: Array2<f64>,
  }

  impl Fixture {
    fn new() -> Self {
      let returns = Array2::from_shape_fn((100, 3), |(t, j)| {
        let tf = t as f64;
        0.002 * (j as f64 + 1.0) + 0.01 * (1.0 + 0.4 * j as f64) * (tf * (0.5 + 0.23 * j as f64)).sin()
      });
      Self {
        assets: (0..3).map(|i| format!("A{i}")).collect(),
        mu: returns.mean_axis(Axis(0)).unwrap(),
        cov: sample_covariance(&returns.view()).unwrap(),
        returns,
      }
    }

    fn inputs(&self) -> OptimizationInputs<'_> {
      OptimizationInputs {
        assets: &self.assets,
        mu: self.mu.view(),
        cov: self.cov.view(),
        returns: self.returns.view(),
      }
    }

    fn sets(&self) -> UncertaintySets {
      let cfg = WorstCaseConfig {
        box_set: BoxMethod::Delta { dmu: 0.1, dcov: 0.1 },
        ellip_set: EllipsoidMethod::Normal,
        n_samples: 200,
        seed: 7,
        ..WorstCaseConfig::default()
      };
      worst_case_stats(&self.returns.view(), &self.mu.view(), &self.cov.view(), &cfg).unwrap()
    }
  }

  #[test]
  fn point_sets_reduce_to_mean_variance() {
    let fx = Fixture::new();
    let req = WorstCaseRequest {
      obj: Objective::MinRisk,
      mu_set: UncertaintySet::Point,
      cov_set: UncertaintySet::Point,
      ..WorstCaseRequest::default()
    };
    let chain = SolverChain::default();
    let robust = wc_optimization(&fx.inputs(), &fx.sets(), &req, &chain)
      .unwrap()
      .into_weights()
      .unwrap()
      .into_values();
    let plain = optimization(
      &fx.inputs(),
      &OptimizationRequest::new(RiskMeasure::MV, Objective::MinRisk),
      &chain,
    )
    .unwrap()
    .into_weights()
    .unwrap()
    .into_values();
    for (a, b) in robust.iter().zip(plain.iter()) {
      assert_abs_diff_eq!(*a, *b, epsilon = 1e-5);
    }
  }

  #[test]
  fn every_set_combination_solves() {
    let fx = Fixture::new();
    let sets = fx.sets();
    let chain = SolverChain::default();
    let all = [UncertaintySet::Box, UncertaintySet::Ellipsoidal, UncertaintySet::Point];
    for mu_set in all {
      for cov_set in all {
        for obj in [Objective::Sharpe, Objective::Utility { l: 2.0 }] {
          let req = WorstCaseRequest {
            obj,
            mu_set,
            cov_set,
            ..WorstCaseRequest::default()
          };
          let w = wc_optimization(&fx.inputs(), &sets, &req, &chain)
            .unwrap()
            .into_weights()
            .unwrap()
            .into_values();
          assert_abs_diff_eq!(w.sum(), 1.0, epsilon = 1e-6);
          assert!(w.iter().all(|v| *v >= 0.0));
        }
      }
    }
  }
}
