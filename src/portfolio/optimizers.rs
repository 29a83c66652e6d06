//! # Mean-risk optimizers
//!
//! $$
//! \max_{\mathbf w}\ \frac{\mu^\top\mathbf w-r_f}{\rho(\mathbf w)}
//! \ \Longrightarrow\
//! \min_{\tilde{\mathbf w},k}\ \rho(\tilde{\mathbf w})\ \text{s.t.}\ \mu^\top\tilde{\mathbf w}-r_fk=c,\ k\ge0
//! $$
//!
//! `c = max_i |μ_i - r_f|` keeps `k` near one for daily-scale returns.
//! A solve is formulated from the request, handed to the solver chain and
//! then either unscaled into weights or reported infeasible.

use ndarray::Array1;
use ndarray::ArrayView1;
use tracing::debug;
use tracing::warn;

use super::conic::Affine;
use super::conic::ConicProblem;
use super::epigraph::matrix_rows;
use super::epigraph::risk_epigraph;
use super::epigraph::RiskData;
use super::request::Benchmark;
use super::request::ConstraintSet;
use super::request::OptimizationInputs;
use super::request::OptimizationRequest;
use super::solver::InfeasibleReport;
use super::solver::SolveOutcome;
use super::solver::SolverChain;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::types::Objective;
use crate::types::PortfolioWeights;
use crate::types::RiskParams;

/// Weights below this magnitude count as not held.
pub const SUPPORT_TOLERANCE: f64 = 1e-6;

/// Right-hand side `c` of the Sharpe normalization `μ'w̃ - rf k = c`.
///
/// Any `c > 0` gives the same weights once `w̃` is divided by `k`.
pub(crate) fn sharpe_target(mu: &ArrayView1<f64>, rf: f64) -> f64 {
  let c = mu.iter().fold(0.0_f64, |acc, m| acc.max((m - rf).abs()));
  if c.is_finite() && c > 0.0 {
    c
  } else {
    1.0
  }
}

/// Variables of a formulated problem.
pub(crate) struct Formulation {
  pub problem: ConicProblem,
  pub w: Vec<usize>,
  /// Sharpe homogenization variable.
  pub k: Option<usize>,
}

/// Budget, long/short, linear, return, diversification, turnover,
/// tracking and risk-bound constraints on `w`.
pub(crate) fn add_constraints(
  p: &mut ConicProblem,
  w: &[usize],
  scale: &Affine,
  inputs: &OptimizationInputs,
  c: &ConstraintSet,
  params: &RiskParams,
) -> Result<()> {
  let n = w.len();
  p.eq2(Affine::sum(w), &scale.scale(c.budget));

  if c.short {
    let long = p.add_vars(n);
    let short = p.add_vars(n);
    for i in 0..n {
      p.nonneg(Affine::var(long[i]));
      p.nonneg(Affine::var(short[i]));
      p.geq(Affine::var(long[i]), &Affine::var(w[i]));
      p.geq(Affine::var(short[i]), &Affine::term(w[i], -1.0));
    }
    p.leq(Affine::sum(&long), &scale.scale(c.upper_long));
    p.leq(Affine::sum(&short), &scale.scale(c.upper_short));
  } else {
    for &wi in w {
      p.nonneg(Affine::var(wi));
    }
  }

  if let Some((a, b)) = &c.linear {
    for (row, &bi) in matrix_rows(&a.view(), w).into_iter().zip(b.iter()) {
      p.geq(row, &scale.scale(bi));
    }
  }

  if let Some(r) = c.lower_ret {
    p.geq(Affine::linear(w, inputs.mu.iter().copied()), &scale.scale(r));
  }

  if let Some(nea) = c.n_effective {
    p.soc(scale.scale(1.0 / nea.sqrt()), w.iter().map(|&i| Affine::var(i)).collect());
  }

  if let Some(to) = &c.turnover {
    let d = p.add_vars(n);
    for i in 0..n {
      let active = Affine::var(w[i]).sub(&scale.scale(to.weights[i]));
      p.geq(Affine::var(d[i]), &active);
      p.geq(Affine::var(d[i]), &active.neg());
    }
    p.leq(Affine::sum(&d), &scale.scale(to.limit));
  }

  if let Some(te) = &c.tracking {
    let bench: Array1<f64> = match &te.benchmark {
      Benchmark::Weights(bw) => inputs.returns.dot(bw),
      Benchmark::Returns(r) => r.clone(),
    };
    let t = inputs.returns.nrows();
    let active: Vec<Affine> = matrix_rows(&inputs.returns, w)
      .into_iter()
      .zip(bench.iter())
      .map(|(x, &b)| x.sub(&scale.scale(b)))
      .collect();
    p.soc(scale.scale(te.limit * ((t - 1) as f64).sqrt()), active);
  }

  let data = RiskData {
    returns: inputs.returns,
    cov: inputs.cov,
    params,
  };
  for (&rm, &ub) in &c.risk_upper {
    let risk = risk_epigraph(p, w, scale, rm, &data)?;
    p.leq(risk, &scale.scale(ub));
  }
  Ok(())
}

fn formulate(inputs: &OptimizationInputs, req: &OptimizationRequest, excluded: &[usize]) -> Result<Formulation> {
  if !req.rm.is_optimizable() {
    return Err(PortfolioError::UnsupportedMethod(format!(
      "{} has no convex formulation",
      req.rm.name()
    )));
  }
  let n = inputs.n_assets();
  let mut problem = ConicProblem::new();
  let w = problem.add_vars(n);
  let k = match req.obj {
    Objective::Sharpe => {
      let k = problem.add_var();
      problem.nonneg(Affine::var(k));
      Some(k)
    }
    _ => None,
  };
  let scale = k.map_or_else(|| Affine::constant(1.0), Affine::var);

  add_constraints(&mut problem, &w, &scale, inputs, &req.constraints, &req.params)?;
  for &i in excluded {
    problem.eq(Affine::var(w[i]));
  }

  let data = RiskData {
    returns: inputs.returns,
    cov: inputs.cov,
    params: &req.params,
  };
  let ret = Affine::linear(&w, inputs.mu.iter().copied());
  match req.obj {
    Objective::MinRisk => {
      let risk = risk_epigraph(&mut problem, &w, &scale, req.rm, &data)?;
      problem.minimize(&risk);
    }
    Objective::Utility { l } => {
      let risk = risk_epigraph(&mut problem, &w, &scale, req.rm, &data)?;
      problem.maximize(&ret.sub(&risk.scale(l)));
    }
    Objective::Sharpe => {
      let risk = risk_epigraph(&mut problem, &w, &scale, req.rm, &data)?;
      let target = sharpe_target(&inputs.mu, req.rf);
      problem.eq2(ret.sub(&scale.scale(req.rf)), &Affine::constant(target));
      problem.minimize(&risk);
    }
    Objective::MaxRet => problem.maximize(&ret),
  }
  debug!(
    rm = req.rm.name(),
    obj = ?req.obj,
    vars = problem.n_vars(),
    rows = problem.n_rows(),
    "formulated mean-risk problem"
  );
  Ok(Formulation { problem, w, k })
}

/// Weights from a primal point: unscale by `k`, then clean long-only noise.
pub(crate) fn extract_weights(
  x: &[f64],
  w: &[usize],
  k: Option<usize>,
  budget: f64,
  short: bool,
) -> std::result::Result<Array1<f64>, InfeasibleReport> {
  let mut weights = Array1::from_iter(w.iter().map(|&i| x[i]));
  if let Some(k) = k {
    if x[k] <= 1e-12 {
      return Err(InfeasibleReport::single("sharpe", "homogenization variable vanished"));
    }
    weights /= x[k];
  }
  if !short {
    let total = weights.mapv(f64::abs).sum();
    if total <= 1e-12 {
      return Err(InfeasibleReport::single("long-only", "weights vanished"));
    }
    weights = weights.mapv(|v| v.abs() / total * budget);
  }
  Ok(weights)
}

pub(crate) fn outcome(
  assets: &[String],
  result: std::result::Result<Array1<f64>, InfeasibleReport>,
) -> Result<SolveOutcome> {
  match result {
    Ok(w) => Ok(SolveOutcome::Solved(PortfolioWeights::new(assets.to_vec(), w)?)),
    Err(report) => {
      warn!("{}", report.message());
      Ok(SolveOutcome::Infeasible(report))
    }
  }
}

fn solve_once(
  inputs: &OptimizationInputs,
  req: &OptimizationRequest,
  chain: &SolverChain,
  excluded: &[usize],
) -> Result<std::result::Result<Array1<f64>, InfeasibleReport>> {
  let f = formulate(inputs, req, excluded)?;
  Ok(
    chain
      .solve(&f.problem)
      .and_then(|x| extract_weights(&x, &f.w, f.k, req.constraints.budget, req.constraints.short)),
  )
}

/// Smallest held position outside `excluded`.
fn weakest_position(w: &ArrayView1<f64>, excluded: &[usize]) -> Option<usize> {
  w.iter()
    .enumerate()
    .filter(|(i, v)| v.abs() > SUPPORT_TOLERANCE && !excluded.contains(i))
    .min_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
    .map(|(i, _)| i)
}

/// Solve one mean-risk problem.
///
/// Infeasibility is an outcome, not an error; errors are reserved for
/// malformed requests.
pub fn optimization(
  inputs: &OptimizationInputs,
  req: &OptimizationRequest,
  chain: &SolverChain,
) -> Result<SolveOutcome> {
  req.validate(inputs)?;
  let n = inputs.n_assets();
  if n == 1 {
    return outcome(inputs.assets, Ok(Array1::from_elem(1, req.constraints.budget)));
  }

  let Some(card) = req.constraints.cardinality else {
    return outcome(inputs.assets, solve_once(inputs, req, chain, &[])?);
  };

  let mut excluded: Vec<usize> = Vec::new();
  loop {
    let w = match solve_once(inputs, req, chain, &excluded)? {
      Ok(w) => w,
      Err(report) => return outcome(inputs.assets, Err(report)),
    };
    let held = w.iter().filter(|v| v.abs() > SUPPORT_TOLERANCE).count();
    if held <= card {
      return outcome(inputs.assets, Ok(w));
    }
    match weakest_position(&w.view(), &excluded) {
      Some(i) => {
        debug!(asset = %inputs.assets[i], held, card, "dropping weakest position");
        excluded.push(i);
      }
      None => {
        return outcome(
          inputs.assets,
          Err(InfeasibleReport::single("cardinality", format!("cannot reduce support to {card}"))),
        )
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;
  use ndarray::Array2;
  use tracing_test::traced_test;

  use super::*;
  use crate::linalg::inverse;
  use crate::portfolio::request::TrackingError;
  use crate::portfolio::request::Turnover;
  use crate::risk::portfolio_risk;
  use crate::stats::moments::sample_covariance;
  use crate::types::RiskMeasure;

  struct Fixture {
    assets: Vec<String>,
    mu: Array1<f64>,
    cov: Array2<f64>,
    returns: Array2<f64>,
  }

  impl Fixture {
    fn new() -> Self {
      let returns = Array2::from_shape_fn((120, 4), |(t, j)| {
        let tf = t as f64;
        0.001 * (j as f64 + 2.0)
          + 0.01 * (1.0 + 0.3 * j as f64) * (tf * (0.41 + 0.17 * j as f64)).sin()
          + 0.004 * (tf * 0.23).cos()
      });
      let mu = returns.mean_axis(ndarray::Axis(0)).unwrap();
      let cov = sample_covariance(&returns.view()).unwrap();
      Self {
        assets: (0..4).map(|i| format!("A{i}")).collect(),
        mu,
        cov,
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
  }

  fn solved(outcome: SolveOutcome) -> Array1<f64> {
    outcome.into_weights().expect("solve should succeed").into_values()
  }

  #[test]
  fn min_variance_matches_closed_form() {
    let fx = Fixture::new();
    let mut req = OptimizationRequest::new(RiskMeasure::MV, Objective::MinRisk);
    req.constraints.short = true;
    req.constraints.upper_long = 10.0;
    req.constraints.upper_short = 10.0;
    let w = solved(optimization(&fx.inputs(), &req, &SolverChain::default()).unwrap());

    let inv = inverse(&fx.cov.view(), "test").unwrap();
    let ones = Array1::<f64>::ones(4);
    let gmv = inv.dot(&ones) / ones.dot(&inv.dot(&ones));
    for (a, b) in w.iter().zip(gmv.iter()) {
      assert_abs_diff_eq!(*a, *b, epsilon = 1e-4);
    }
  }

  #[test]
  fn long_only_weights_are_valid_for_every_objective() {
    let fx = Fixture::new();
    let chain = SolverChain::default();
    for obj in [Objective::MinRisk, Objective::Utility { l: 2.0 }, Objective::Sharpe, Objective::MaxRet] {
      for rm in [RiskMeasure::MV, RiskMeasure::CVaR, RiskMeasure::MDD, RiskMeasure::EVaR] {
        let req = OptimizationRequest::new(rm, obj);
        let w = solved(optimization(&fx.inputs(), &req, &chain).unwrap());
        assert_abs_diff_eq!(w.sum(), 1.0, epsilon = 1e-6);
        assert!(w.iter().all(|v| *v >= 0.0));
      }
    }
  }

  #[test]
  fn sharpe_beats_min_risk_ratio() {
    let fx = Fixture::new();
    let chain = SolverChain::default();
    let p = RiskParams::default();
    let ratio = |w: &Array1<f64>| {
      let risk = portfolio_risk(&w.view(), &fx.cov.view(), &fx.returns.view(), RiskMeasure::CVaR, &p).unwrap();
      fx.mu.dot(w) / risk
    };
    let sharpe = solved(
      optimization(&fx.inputs(), &OptimizationRequest::new(RiskMeasure::CVaR, Objective::Sharpe), &chain).unwrap(),
    );
    let min_risk = solved(
      optimization(&fx.inputs(), &OptimizationRequest::new(RiskMeasure::CVaR, Objective::MinRisk), &chain).unwrap(),
    );
    assert!(ratio(&sharpe) >= ratio(&min_risk) - 1e-6);
  }

  #[test]
  fn sharpe_target_follows_excess_returns() {
    let mu = array![0.001, 0.004, -0.002];
    assert_abs_diff_eq!(sharpe_target(&mu.view(), 0.0), 0.004, epsilon = 1e-15);
    assert_abs_diff_eq!(sharpe_target(&mu.view(), 0.01), 0.012, epsilon = 1e-15);
    assert_eq!(sharpe_target(&array![0.0, 0.0].view(), 0.0), 1.0);
  }

  #[test]
  fn gmd_sharpe_solves_on_a_long_sample() {
    let t = 200;
    let n = 6;
    let returns = Array2::from_shape_fn((t, n), |(i, j)| {
      let x = i as f64;
      let jf = j as f64;
      0.0008 * (jf + 1.0)
        + 0.012 * (1.0 + 0.15 * jf) * (x * (0.21 + 0.11 * jf)).sin()
        + 0.006 * (x * 0.05 + jf).cos()
        + 0.004 * (x * 1.7 * (jf + 1.0)).sin()
    });
    let assets: Vec<String> = (0..n).map(|j| format!("A{j}")).collect();
    let mu = returns.mean_axis(ndarray::Axis(0)).unwrap();
    let cov = sample_covariance(&returns.view()).unwrap();
    let inputs = OptimizationInputs {
      assets: &assets,
      mu: mu.view(),
      cov: cov.view(),
      returns: returns.view(),
    };
    let chain = SolverChain::default();
    let p = RiskParams::default();
    let ratio = |w: &Array1<f64>| {
      let risk = portfolio_risk(&w.view(), &cov.view(), &returns.view(), RiskMeasure::GMD, &p);
      mu.dot(w) / risk.unwrap()
    };
    let solve = |obj| {
      let req = OptimizationRequest::new(RiskMeasure::GMD, obj);
      solved(optimization(&inputs, &req, &chain).unwrap())
    };
    let sharpe = solve(Objective::Sharpe);
    let min_risk = solve(Objective::MinRisk);
    assert_abs_diff_eq!(sharpe.sum(), 1.0, epsilon = 1e-6);
    assert!(sharpe.iter().all(|v| *v >= 0.0));
    assert!(ratio(&sharpe) >= ratio(&min_risk) - 1e-6);
  }

  #[test]
  fn short_limits_hold() {
    let fx = Fixture::new();
    let mut req = OptimizationRequest::new(RiskMeasure::MV, Objective::MaxRet);
    req.constraints.short = true;
    req.constraints.upper_long = 1.3;
    req.constraints.upper_short = 0.3;
    let w = solved(optimization(&fx.inputs(), &req, &SolverChain::default()).unwrap());
    let long: f64 = w.iter().map(|v| v.max(0.0)).sum();
    let short: f64 = w.iter().map(|v| (-v).max(0.0)).sum();
    assert_abs_diff_eq!(w.sum(), 1.0, epsilon = 1e-6);
    assert!(long <= 1.3 + 1e-6);
    assert!(short <= 0.3 + 1e-6);
  }

  #[test]
  fn single_asset_is_fully_invested() {
    let assets = vec!["ONLY".to_string()];
    let mu = array![0.01];
    let cov = array![[0.04]];
    let returns = Array2::from_shape_fn((10, 1), |(t, _)| 0.01 * (t as f64).sin());
    let inputs = OptimizationInputs {
      assets: &assets,
      mu: mu.view(),
      cov: cov.view(),
      returns: returns.view(),
    };
    for rm in RiskMeasure::OPTIMIZABLE {
      let out = optimization(&inputs, &OptimizationRequest::new(rm, Objective::Sharpe), &SolverChain::default()).unwrap();
      assert_eq!(solved(out).to_vec(), vec![1.0]);
    }
  }

  #[test]
  fn cardinality_limits_support() {
    let fx = Fixture::new();
    let mut req = OptimizationRequest::new(RiskMeasure::MV, Objective::MinRisk);
    req.constraints.cardinality = Some(2);
    let w = solved(optimization(&fx.inputs(), &req, &SolverChain::default()).unwrap());
    assert!(w.iter().filter(|v| v.abs() > SUPPORT_TOLERANCE).count() <= 2);
    assert_abs_diff_eq!(w.sum(), 1.0, epsilon = 1e-6);
  }

  #[test]
  fn constraint_family_is_respected() {
    let fx = Fixture::new();
    let mut req = OptimizationRequest::new(RiskMeasure::MAD, Objective::Sharpe);
    let c = &mut req.constraints;
    c.linear = Some((array![[1.0, 0.0, 0.0, 0.0], [0.0, -1.0, 0.0, 0.0]], array![0.1, -0.4]));
    c.n_effective = Some(2.5);
    c.turnover = Some(Turnover {
      weights: Array1::from_elem(4, 0.25),
      limit: 0.5,
    });
    c.tracking = Some(TrackingError {
      benchmark: Benchmark::Weights(Array1::from_elem(4, 0.25)),
      limit: 0.02,
    });
    let w = solved(optimization(&fx.inputs(), &req, &SolverChain::default()).unwrap());
    assert!(w[0] >= 0.1 - 1e-6);
    assert!(w[1] <= 0.4 + 1e-6);
    assert!(1.0 / w.dot(&w) >= 2.5 - 1e-4);
    assert!(w.iter().map(|v| (v - 0.25).abs()).sum::<f64>() <= 0.5 + 1e-5);
  }

  #[traced_test]
  #[test]
  fn contradictory_bounds_are_reported_not_raised() {
    let fx = Fixture::new();
    let mut req = OptimizationRequest::new(RiskMeasure::CVaR, Objective::MinRisk);
    req.constraints.linear = Some((array![[1.0, 1.0, 0.0, 0.0], [-1.0, -1.0, 0.0, 0.0]], array![0.8, -0.5]));
    let out = optimization(&fx.inputs(), &req, &SolverChain::default()).unwrap();
    let SolveOutcome::Infeasible(report) = out else {
      panic!("expected an infeasible outcome");
    };
    assert_eq!(report.failures.len(), 2);
    assert!(logs_contain("infeasible"));
  }

  #[test]
  fn relative_drawdowns_are_rejected() {
    let fx = Fixture::new();
    let req = OptimizationRequest::new(RiskMeasure::CDaRRel, Objective::MinRisk);
    assert!(optimization(&fx.inputs(), &req, &SolverChain::default()).is_err());
  }
}
