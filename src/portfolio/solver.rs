//! # Solver chain
//!
//! $$
//! x^\*=\mathcal S_1(P)\ \text{else}\ \mathcal S_2(P)\ \text{else}\ \dots
//! $$
//!
//! Backends are tried in order; every failure is kept so an infeasible solve
//! can say why each backend gave up.

use std::fmt;
use std::sync::Arc;

use clarabel::algebra::CscMatrix;
use clarabel::solver::DefaultSettingsBuilder;
use clarabel::solver::DefaultSolver;
use clarabel::solver::IPSolver;
use clarabel::solver::SolverStatus;
use clarabel::solver::SupportedConeT;
use tracing::debug;
use tracing::warn;

use super::conic::Cone;
use super::conic::ConicProblem;
use crate::types::PortfolioWeights;

/// Why a backend did not return a usable point.
#[derive(Clone, Debug, PartialEq)]
pub struct SolverFailure {
  pub solver: String,
  pub reason: String,
}

impl fmt::Display for SolverFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.solver, self.reason)
  }
}

/// Collected failures of an infeasible solve.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InfeasibleReport {
  pub failures: Vec<SolverFailure>,
}

impl InfeasibleReport {
  pub fn message(&self) -> String {
    if self.failures.is_empty() {
      return "no solver configured".to_string();
    }
    let reasons: Vec<String> = self.failures.iter().map(ToString::to_string).collect();
    format!("the problem is infeasible or unbounded ({})", reasons.join("; "))
  }

  pub(crate) fn single(solver: &str, reason: impl Into<String>) -> Self {
    Self {
      failures: vec![SolverFailure {
        solver: solver.to_string(),
        reason: reason.into(),
      }],
    }
  }
}

impl fmt::Display for InfeasibleReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.message())
  }
}

/// Terminal state of a solve.
#[derive(Clone, Debug, PartialEq)]
pub enum SolveOutcome {
  Solved(PortfolioWeights),
  Infeasible(InfeasibleReport),
}

impl SolveOutcome {
  pub fn is_solved(&self) -> bool {
    matches!(self, SolveOutcome::Solved(_))
  }

  pub fn weights(&self) -> Option<&PortfolioWeights> {
    match self {
      SolveOutcome::Solved(w) => Some(w),
      SolveOutcome::Infeasible(_) => None,
    }
  }

  pub fn into_weights(self) -> Option<PortfolioWeights> {
    match self {
      SolveOutcome::Solved(w) => Some(w),
      SolveOutcome::Infeasible(_) => None,
    }
  }
}

/// A conic backend.
pub trait ConicSolver: Send + Sync + fmt::Debug {
  fn name(&self) -> &str;

  /// Primal solution of `problem`, one entry per variable.
  fn solve(&self, problem: &ConicProblem) -> Result<Vec<f64>, SolverFailure>;
}

/// Settings of a [`ClarabelSolver`].
#[derive(Clone, Debug, PartialEq)]
pub struct ClarabelConfig {
  pub max_iter: u32,
  /// Seconds.
  pub time_limit: f64,
  pub tol_gap_abs: f64,
  pub tol_gap_rel: f64,
  pub tol_feas: f64,
  /// Also accept `AlmostSolved`.
  pub accept_almost_solved: bool,
}

impl Default for ClarabelConfig {
  fn default() -> Self {
    Self {
      max_iter: 200,
      time_limit: f64::INFINITY,
      tol_gap_abs: 1e-8,
      tol_gap_rel: 1e-8,
      tol_feas: 1e-8,
      accept_almost_solved: false,
    }
  }
}

impl ClarabelConfig {
  pub fn relaxed() -> Self {
    Self {
      max_iter: 500,
      tol_gap_abs: 1e-6,
      tol_gap_rel: 1e-6,
      tol_feas: 1e-6,
      accept_almost_solved: true,
      ..Self::default()
    }
  }
}

/// Interior-point backend on `clarabel`.
#[derive(Clone, Debug)]
pub struct ClarabelSolver {
  name: String,
  config: ClarabelConfig,
}

impl ClarabelSolver {
  pub fn new(name: impl Into<String>, config: ClarabelConfig) -> Self {
    Self {
      name: name.into(),
      config,
    }
  }

  pub fn config(&self) -> &ClarabelConfig {
    &self.config
  }

  fn failure(&self, reason: impl Into<String>) -> SolverFailure {
    SolverFailure {
      solver: self.name.clone(),
      reason: reason.into(),
    }
  }
}

/// `A` in compressed-column form for `A x + s = b`, where the rows hold `s`.
fn constraint_matrix(problem: &ConicProblem) -> (CscMatrix<f64>, Vec<f64>) {
  let m = problem.n_rows();
  let n = problem.n_vars();
  let mut columns: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
  let mut b = Vec::with_capacity(m);
  for (r, row) in problem.rows().iter().enumerate() {
    for &(j, c) in &row.terms {
      columns[j].push((r, -c));
    }
    b.push(row.constant);
  }
  let mut colptr = Vec::with_capacity(n + 1);
  let mut rowval = Vec::new();
  let mut nzval = Vec::new();
  colptr.push(0);
  for col in columns {
    for (r, v) in col {
      rowval.push(r);
      nzval.push(v);
    }
    colptr.push(rowval.len());
  }
  (CscMatrix::new(m, n, colptr, rowval, nzval), b)
}

fn clarabel_cones(cones: &[Cone]) -> Vec<SupportedConeT<f64>> {
  cones
    .iter()
    .map(|c| match *c {
      Cone::Zero(d) => SupportedConeT::ZeroConeT(d),
      Cone::Nonnegative(d) => SupportedConeT::NonnegativeConeT(d),
      Cone::SecondOrder(d) => SupportedConeT::SecondOrderConeT(d),
      Cone::Exponential => SupportedConeT::ExponentialConeT(),
    })
    .collect()
}

impl ConicSolver for ClarabelSolver {
  fn name(&self) -> &str {
    &self.name
  }

  fn solve(&self, problem: &ConicProblem) -> Result<Vec<f64>, SolverFailure> {
    let n = problem.n_vars();
    if n == 0 {
      return Err(self.failure("empty problem"));
    }
    let p = CscMatrix::new(n, n, vec![0; n + 1], Vec::new(), Vec::new());
    let q = problem.objective();
    let (a, b) = constraint_matrix(problem);
    let cones = clarabel_cones(problem.cones());

    let cfg = &self.config;
    let settings = DefaultSettingsBuilder::default()
      .max_iter(cfg.max_iter)
      .time_limit(cfg.time_limit)
      .tol_gap_abs(cfg.tol_gap_abs)
      .tol_gap_rel(cfg.tol_gap_rel)
      .tol_feas(cfg.tol_feas)
      .verbose(false)
      .build()
      .map_err(|e| self.failure(format!("failed to build settings: {e}")))?;

    let mut solver = DefaultSolver::new(&p, &q, &a, &b, &cones, settings)
      .map_err(|e| self.failure(format!("failed to create solver: {e:?}")))?;
    solver.solve();

    let status = solver.solution.status;
    let accepted = match status {
      SolverStatus::Solved => true,
      SolverStatus::AlmostSolved => cfg.accept_almost_solved,
      _ => false,
    };
    if !accepted {
      return Err(self.failure(format!("status {status:?}")));
    }
    let x = solver.solution.x.clone();
    if x.iter().any(|v| !v.is_finite()) {
      return Err(self.failure("non-finite solution"));
    }
    Ok(x)
  }
}

/// Ordered list of backends.
#[derive(Clone, Debug)]
pub struct SolverChain {
  solvers: Vec<Arc<dyn ConicSolver>>,
}

impl Default for SolverChain {
  fn default() -> Self {
    Self::new(vec![
      Arc::new(ClarabelSolver::new("clarabel", ClarabelConfig::default())),
      Arc::new(ClarabelSolver::new("clarabel-relaxed", ClarabelConfig::relaxed())),
    ])
  }
}

impl SolverChain {
  pub fn new(solvers: Vec<Arc<dyn ConicSolver>>) -> Self {
    Self { solvers }
  }

  pub fn push(&mut self, solver: Arc<dyn ConicSolver>) {
    self.solvers.push(solver);
  }

  pub fn len(&self) -> usize {
    self.solvers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.solvers.is_empty()
  }

  /// First backend result, or every failure.
  pub fn solve(&self, problem: &ConicProblem) -> Result<Vec<f64>, InfeasibleReport> {
    let mut report = InfeasibleReport::default();
    for solver in &self.solvers {
      match solver.solve(problem) {
        Ok(x) if x.len() == problem.n_vars() => {
          debug!(solver = solver.name(), vars = x.len(), rows = problem.n_rows(), "solve succeeded");
          return Ok(x);
        }
        Ok(x) => report.failures.push(SolverFailure {
          solver: solver.name().to_string(),
          reason: format!("returned {} values for {} variables", x.len(), problem.n_vars()),
        }),
        Err(failure) => {
          warn!(solver = %failure.solver, reason = %failure.reason, "solver backend failed");
          report.failures.push(failure);
        }
      }
    }
    Err(report)
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use tracing_test::traced_test;

  use super::*;
  use crate::portfolio::conic::Affine;

  #[derive(Debug)]
  struct Failing;

  impl ConicSolver for Failing {
    fn name(&self) -> &str {
      "failing"
    }

    fn solve(&self, _problem: &ConicProblem) -> Result<Vec<f64>, SolverFailure> {
      Err(SolverFailure {
        solver: "failing".into(),
        reason: "always fails".into(),
      })
    }
  }

  fn small_lp() -> ConicProblem {
    // min x + y  s.t. x + y ≥ 1, x ≥ 0.25, y ≥ 0
    let mut p = ConicProblem::new();
    let v = p.add_vars(2);
    p.geq(Affine::sum(&v), &Affine::constant(1.0));
    p.geq(Affine::var(v[0]), &Affine::constant(0.25));
    p.nonneg(Affine::var(v[1]));
    p.minimize(&Affine::sum(&v));
    p
  }

  #[test]
  fn clarabel_solves_lp() {
    let x = SolverChain::default().solve(&small_lp()).unwrap();
    assert_abs_diff_eq!(x[0] + x[1], 1.0, epsilon = 1e-6);
    assert!(x[0] >= 0.25 - 1e-6);
  }

  #[test]
  fn clarabel_solves_soc() {
    // min t  s.t. t ≥ ‖(x - 1, y - 2)‖
    let mut p = ConicProblem::new();
    let v = p.add_vars(3);
    p.soc(
      Affine::var(v[0]),
      vec![Affine::var(v[1]).add_constant(-1.0), Affine::var(v[2]).add_constant(-2.0)],
    );
    p.minimize(&Affine::var(v[0]));
    let x = SolverChain::default().solve(&p).unwrap();
    assert_abs_diff_eq!(x[1], 1.0, epsilon = 1e-5);
    assert_abs_diff_eq!(x[2], 2.0, epsilon = 1e-5);
  }

  #[test]
  fn clarabel_solves_exp_cone() {
    // max u  s.t. e^u ≤ 2
    let mut p = ConicProblem::new();
    let u = p.add_var();
    p.exp_cone(Affine::var(u), Affine::constant(1.0), Affine::constant(2.0));
    p.maximize(&Affine::var(u));
    let x = SolverChain::default().solve(&p).unwrap();
    assert_abs_diff_eq!(x[0], 2.0_f64.ln(), epsilon = 1e-5);
  }

  #[traced_test]
  #[test]
  fn chain_falls_back_and_reports() {
    let chain = SolverChain::new(vec![Arc::new(Failing), Arc::new(ClarabelSolver::new("clarabel", Default::default()))]);
    assert!(chain.solve(&small_lp()).is_ok());
    assert!(logs_contain("always fails"));

    let only_failing = SolverChain::new(vec![Arc::new(Failing)]);
    let report = only_failing.solve(&small_lp()).unwrap_err();
    assert_eq!(report.failures.len(), 1);
    assert!(report.message().contains("failing: always fails"));
  }

  #[test]
  fn infeasible_problem_collects_every_backend() {
    let mut p = ConicProblem::new();
    let x = p.add_var();
    p.geq(Affine::var(x), &Affine::constant(1.0));
    p.leq(Affine::var(x), &Affine::constant(0.0));
    p.minimize(&Affine::var(x));
    let report = SolverChain::default().solve(&p).unwrap_err();
    assert_eq!(report.failures.len(), 2);
  }
}
