//! # Relaxed risk parity
//!
//! $$
//! \begin{aligned}
//! \min_{\mathbf w,\psi,\gamma,\rho}\ &\psi-\gamma\\
//! \text{s.t.}\ &\zeta=\Sigma\mathbf w,\quad w_i\zeta_i\ge\gamma^2b_i,\\
//! &\psi^2\ge\mathbf w^\top\Sigma\mathbf w+\rho^2,\quad \rho^2\ge\lambda\,\mathbf w^\top\Theta\mathbf w
//! \end{aligned}
//! $$
//!
//! Version `A` drops `ρ` and recovers vanilla risk parity, `B` uses `λ = 1`
//! and `C` lets the caller pick `λ`.

use std::fmt;
use std::str::FromStr;

use ndarray::Array1;
use ndarray::ArrayView1;
use tracing::debug;

use super::conic::Affine;
use super::conic::ConicProblem;
use super::epigraph::matrix_rows;
use super::optimizers::outcome;
use super::request::OptimizationInputs;
use super::request::OptimizationRequest;
use super::risk_parity::risk_budgets;
use super::solver::SolveOutcome;
use super::solver::SolverChain;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::linalg::sqrtm_psd;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RrpVersion {
  #[default]
  A,
  B,
  C,
}

impl fmt::Display for RrpVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      RrpVersion::A => "A",
      RrpVersion::B => "B",
      RrpVersion::C => "C",
    };
    f.write_str(s)
  }
}

impl FromStr for RrpVersion {
  type Err = PortfolioError;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim() {
      "A" | "a" => Ok(RrpVersion::A),
      "B" | "b" => Ok(RrpVersion::B),
      "C" | "c" => Ok(RrpVersion::C),
      _ => Err(PortfolioError::UnsupportedMethod(s.to_string())),
    }
  }
}

/// Relaxed risk parity on the covariance of `inputs`.
///
/// `l` is the penalty of version `C` and ignored otherwise.
pub fn rrp_optimization(
  inputs: &OptimizationInputs,
  version: RrpVersion,
  l: f64,
  b: Option<ArrayView1<f64>>,
  req: &OptimizationRequest,
  chain: &SolverChain,
) -> Result<SolveOutcome> {
  req.validate(inputs)?;
  if !l.is_finite() || l < 0.0 {
    return Err(PortfolioError::invalid("relaxed risk parity penalty must be non-negative"));
  }
  let n = inputs.n_assets();
  let budgets = risk_budgets(b, n)?;
  let c = &req.constraints;
  if n == 1 {
    return outcome(inputs.assets, Ok(Array1::from_elem(1, c.budget)));
  }

  let mut p = ConicProblem::new();
  let w = p.add_vars(n);
  let gamma = p.add_var();
  let psi = p.add_var();
  p.eq2(Affine::sum(&w), &Affine::constant(1.0));
  for &i in &w {
    p.nonneg(Affine::var(i));
  }
  p.nonneg(Affine::var(gamma));

  let zeta = matrix_rows(&inputs.cov, &w);
  for (i, z) in zeta.iter().enumerate() {
    p.rotated_soc(Affine::var(w[i]), z.clone(), vec![Affine::term(gamma, budgets[i].sqrt())]);
  }

  let g = sqrtm_psd(&inputs.cov);
  let mut tail = matrix_rows(&g.view(), &w);
  let lambda = match version {
    RrpVersion::A => None,
    RrpVersion::B => Some(1.0),
    RrpVersion::C => Some(l),
  };
  if let Some(lambda) = lambda {
    let rho = p.add_var();
    let theta: Vec<Affine> = w
      .iter()
      .enumerate()
      .map(|(i, &wi)| Affine::term(wi, (lambda * inputs.cov[[i, i]].max(0.0)).sqrt()))
      .collect();
    p.soc(Affine::var(rho), theta);
    tail.push(Affine::var(rho));
  }
  p.soc(Affine::var(psi), tail);

  if let Some((a, bl)) = &c.linear {
    for (row, &bi) in matrix_rows(&a.view(), &w).into_iter().zip(bl.iter()) {
      p.geq(row, &Affine::constant(bi));
    }
  }
  if let Some(r) = c.lower_ret {
    p.geq(Affine::linear(&w, inputs.mu.iter().copied()), &Affine::constant(r));
  }

  p.minimize(&Affine::var(psi).add_term(gamma, -1.0));
  debug!(%version, lambda = ?lambda, vars = p.n_vars(), "formulated relaxed risk parity problem");

  let result = chain
    .solve(&p)
    .map(|x| Array1::from_iter(w.iter().map(|&i| x[i].max(0.0) * c.budget)));
  outcome(inputs.assets, result)
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::Array2;

  use super::*;
  use crate::risk::risk_contribution;
  use crate::stats::moments::sample_covariance;
  use crate::types::RiskMeasure;
  use crate::types::RiskParams;

  fn setup() -> (Vec<String>, Array1<f64>, Array2<f64>, Array2<f64>) {
    let r = Array2::from_shape_fn((150, 4), |(t, j)| {
      let tf = t as f64;
      0.0005 * (j as f64 + 1.0) + 0.005 * (j as f64 + 1.0) * (tf * (0.29 + 0.13 * j as f64)).sin()
        + 0.003 * (tf * 0.11).cos()
    });
    let mu = r.mean_axis(ndarray::Axis(0)).unwrap();
    let cov = sample_covariance(&r.view()).unwrap();
    ((0..4).map(|i| format!("A{i}")).collect(), mu, cov, r)
  }

  #[test]
  fn version_a_equalizes_contributions() {
    let (assets, mu, cov, r) = setup();
    let inputs = OptimizationInputs {
      assets: &assets,
      mu: mu.view(),
      cov: cov.view(),
      returns: r.view(),
    };
    let out = rrp_optimization(
      &inputs,
      RrpVersion::A,
      1.0,
      None,
      &OptimizationRequest::default(),
      &SolverChain::default(),
    )
    .unwrap();
    let w = out.into_weights().unwrap().into_values();
    assert_abs_diff_eq!(w.sum(), 1.0, epsilon = 1e-6);
    let rc = risk_contribution(&w.view(), &cov.view(), &r.view(), RiskMeasure::MV, &RiskParams::default()).unwrap();
    let share = &rc / rc.sum();
    for s in share.iter() {
      assert_abs_diff_eq!(*s, 0.25, epsilon = 1e-2);
    }
  }

  #[test]
  fn relaxed_versions_return_budgeted_weights() {
    let (assets, mu, cov, r) = setup();
    let inputs = OptimizationInputs {
      assets: &assets,
      mu: mu.view(),
      cov: cov.view(),
      returns: r.view(),
    };
    let chain = SolverChain::default();
    for version in [RrpVersion::B, RrpVersion::C] {
      let w = rrp_optimization(&inputs, version, 2.0, None, &OptimizationRequest::default(), &chain)
        .unwrap()
        .into_weights()
        .unwrap()
        .into_values();
      assert_abs_diff_eq!(w.sum(), 1.0, epsilon = 1e-6);
      assert!(w.iter().all(|v| *v >= 0.0));
    }
    assert_eq!("c".parse::<RrpVersion>().unwrap(), RrpVersion::C);
  }
}
