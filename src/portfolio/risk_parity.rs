//! # Risk parity
//!
//! $$
//! \min_{\mathbf w\ge0}\ \rho(\mathbf w)\quad\text{s.t.}\quad \sum_i b_i\ln w_i\ge 1
//! $$
//!
//! At the optimum each asset's risk contribution is proportional to its
//! budget `b_i`. The scale of `w` is free, so constant terms use `Σw`.

use ndarray::Array1;
use ndarray::ArrayView1;
use tracing::debug;

use super::conic::Affine;
use super::conic::ConicProblem;
use super::epigraph::matrix_rows;
use super::epigraph::risk_epigraph;
use super::epigraph::RiskData;
use super::optimizers::outcome;
use super::request::OptimizationInputs;
use super::request::OptimizationRequest;
use super::solver::InfeasibleReport;
use super::solver::SolveOutcome;
use super::solver::SolverChain;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::types::check_len;
use crate::types::RiskMeasure;

/// Risk budgets normalized to one; equal when not supplied.
pub(crate) fn risk_budgets(b: Option<ArrayView1<f64>>, n: usize) -> Result<Array1<f64>> {
  let Some(b) = b else {
    return Ok(Array1::from_elem(n, 1.0 / n as f64));
  };
  check_len("risk budgets", n, b.len())?;
  if b.iter().any(|v| !(v.is_finite() && *v > 0.0)) {
    return Err(PortfolioError::invalid("risk budgets must be positive"));
  }
  Ok(&b / b.sum())
}

/// Equal-risk-contribution portfolio under `rm`.
///
/// Only the budget, linear constraints and minimum return of the request
/// apply; weights are long only.
pub fn rp_optimization(
  inputs: &OptimizationInputs,
  rm: RiskMeasure,
  b: Option<ArrayView1<f64>>,
  req: &OptimizationRequest,
  chain: &SolverChain,
) -> Result<SolveOutcome> {
  req.validate(inputs)?;
  let n = inputs.n_assets();
  let budgets = risk_budgets(b, n)?;
  if !rm.is_optimizable() {
    return Err(PortfolioError::UnsupportedMethod(format!("{} has no convex formulation", rm.name())));
  }
  if n == 1 {
    return outcome(inputs.assets, Ok(Array1::from_elem(1, req.constraints.budget)));
  }

  let mut p = ConicProblem::new();
  let w = p.add_vars(n);
  let log_w = p.add_vars(n);
  let scale = Affine::sum(&w);
  for i in 0..n {
    p.nonneg(Affine::var(w[i]));
    p.exp_cone(Affine::var(log_w[i]), Affine::constant(1.0), Affine::var(w[i]));
  }
  p.geq(Affine::linear(&log_w, budgets.iter().copied()), &Affine::constant(1.0));

  let c = &req.constraints;
  if let Some((a, bl)) = &c.linear {
    for (row, &bi) in matrix_rows(&a.view(), &w).into_iter().zip(bl.iter()) {
      p.geq(row, &scale.scale(bi));
    }
  }
  if let Some(r) = c.lower_ret {
    p.geq(Affine::linear(&w, inputs.mu.iter().copied()), &scale.scale(r));
  }

  let data = RiskData {
    returns: inputs.returns,
    cov: inputs.cov,
    params: &req.params,
  };
  let risk = risk_epigraph(&mut p, &w, &scale, rm, &data)?;
  p.minimize(&risk);
  debug!(rm = rm.name(), vars = p.n_vars(), "formulated risk parity problem");

  let result = chain.solve(&p).and_then(|x| {
    let raw = Array1::from_iter(w.iter().map(|&i| x[i].max(0.0)));
    let total = raw.sum();
    if total <= 1e-12 {
      Err(InfeasibleReport::single("risk parity", "weights vanished"))
    } else {
      Ok(raw / total * c.budget)
    }
  });
  outcome(inputs.assets, result)
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;
  use ndarray::Array2;

  use super::*;
  use crate::risk::risk_contribution;
  use crate::stats::moments::sample_covariance;
  use crate::types::RiskParams;

  fn returns() -> Array2<f64> {
    Array2::from_shape_fn((150, 3), |(t, j)| {
      let tf = t as f64;
      0.001 + 0.006 * (j as f64 + 1.0) * (tf * (0.31 + 0.2 * j as f64)).sin() + 0.002 * (tf * 0.07).cos()
    })
  }

  #[test]
  fn mv_contributions_follow_budgets() {
    let r = returns();
    let mu = r.mean_axis(ndarray::Axis(0)).unwrap();
    let cov = sample_covariance(&r.view()).unwrap();
    let assets: Vec<String> = (0..3).map(|i| format!("A{i}")).collect();
    let inputs = OptimizationInputs {
      assets: &assets,
      mu: mu.view(),
      cov: cov.view(),
      returns: r.view(),
    };
    let budgets = array![0.5, 0.3, 0.2];
    let out = rp_optimization(
      &inputs,
      RiskMeasure::MV,
      Some(budgets.view()),
      &OptimizationRequest::default(),
      &SolverChain::default(),
    )
    .unwrap();
    let w = out.into_weights().unwrap().into_values();
    assert_abs_diff_eq!(w.sum(), 1.0, epsilon = 1e-9);

    let rc = risk_contribution(&w.view(), &cov.view(), &r.view(), RiskMeasure::MV, &RiskParams::default()).unwrap();
    let share = &rc / rc.sum();
    for (s, b) in share.iter().zip(budgets.iter()) {
      assert_abs_diff_eq!(*s, *b, epsilon = 1e-3);
    }
  }

  #[test]
  fn budgets_are_validated() {
    assert!(risk_budgets(Some(array![1.0, -1.0].view()), 2).is_err());
    assert!(risk_budgets(Some(array![1.0].view()), 2).is_err());
    assert_eq!(risk_budgets(Some(array![2.0, 2.0].view()), 2).unwrap(), array![0.5, 0.5]);
  }
}
