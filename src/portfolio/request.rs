use std::collections::BTreeMap;

use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::ArrayView2;

use crate::error::PortfolioError;
use crate::error::Result;
use crate::types::check_len;
use crate::types::Objective;
use crate::types::RiskMeasure;
use crate::types::RiskParams;

/// Expected returns, covariance and scenarios of one universe.
#[derive(Clone, Copy, Debug)]
pub struct OptimizationInputs<'a> {
  pub assets: &'a [String],
  pub mu: ArrayView1<'a, f64>,
  pub cov: ArrayView2<'a, f64>,
  /// `T × N` scenarios fed to the non-covariance measures.
  pub returns: ArrayView2<'a, f64>,
}

impl<'a> OptimizationInputs<'a> {
  pub fn n_assets(&self) -> usize {
    self.assets.len()
  }

  pub(crate) fn validate(&self) -> Result<()> {
    let n = self.assets.len();
    if n == 0 {
      return Err(PortfolioError::invalid("empty universe"));
    }
    check_len("mean vector", n, self.mu.len())?;
    if self.cov.dim() != (n, n) {
      return Err(PortfolioError::mismatch("covariance", n, self.cov.nrows()));
    }
    check_len("returns columns", n, self.returns.ncols())?;
    if self.returns.nrows() < 2 {
      return Err(PortfolioError::invalid("scenario table needs at least 2 rows"));
    }
    let finite = self.mu.iter().chain(self.cov.iter()).chain(self.returns.iter()).all(|v| v.is_finite());
    if !finite {
      return Err(PortfolioError::invalid("inputs contain non-finite values"));
    }
    Ok(())
  }
}

/// Reference for the tracking-error constraint.
#[derive(Clone, Debug, PartialEq)]
pub enum Benchmark {
  /// Benchmark weights on the same universe.
  Weights(Array1<f64>),
  /// Benchmark return series aligned with the scenarios.
  Returns(Array1<f64>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrackingError {
  pub benchmark: Benchmark,
  /// Bound on the standard deviation of active returns.
  pub limit: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Turnover {
  /// Current holdings.
  pub weights: Array1<f64>,
  /// Bound on `Σ|w - w0|`.
  pub limit: f64,
}

/// User constraints shared by every solve.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstraintSet {
  /// `Σ w`.
  pub budget: f64,
  /// Allow negative weights.
  pub short: bool,
  /// Bound on `Σ max(w, 0)` when shorting.
  pub upper_long: f64,
  /// Bound on `Σ max(-w, 0)` when shorting.
  pub upper_short: f64,
  /// `A w ≥ B`.
  pub linear: Option<(Array2<f64>, Array1<f64>)>,
  /// `μ'w ≥ lower_ret`.
  pub lower_ret: Option<f64>,
  /// Lower bound on `1 / ‖w‖²`.
  pub n_effective: Option<f64>,
  /// Maximum number of held assets.
  pub cardinality: Option<usize>,
  pub turnover: Option<Turnover>,
  pub tracking: Option<TrackingError>,
  /// Upper bound per risk measure.
  pub risk_upper: BTreeMap<RiskMeasure, f64>,
}

impl Default for ConstraintSet {
  fn default() -> Self {
    Self {
      budget: 1.0,
      short: false,
      upper_long: 1.0,
      upper_short: 0.2,
      linear: None,
      lower_ret: None,
      n_effective: None,
      cardinality: None,
      turnover: None,
      tracking: None,
      risk_upper: BTreeMap::new(),
    }
  }
}

impl ConstraintSet {
  pub(crate) fn validate(&self, n: usize, t: usize) -> Result<()> {
    if !self.budget.is_finite() {
      return Err(PortfolioError::invalid("budget must be finite"));
    }
    if self.short && (self.upper_long < 0.0 || self.upper_short < 0.0) {
      return Err(PortfolioError::invalid("long/short limits must be non-negative"));
    }
    if let Some((a, b)) = &self.linear {
      check_len("linear constraint columns", n, a.ncols())?;
      check_len("linear constraint rows", a.nrows(), b.len())?;
    }
    if let Some(nea) = self.n_effective {
      if nea < 1.0 {
        return Err(PortfolioError::invalid("number of effective assets must be at least 1"));
      }
    }
    if self.cardinality == Some(0) {
      return Err(PortfolioError::invalid("cardinality must be positive"));
    }
    if let Some(to) = &self.turnover {
      check_len("turnover weights", n, to.weights.len())?;
    }
    if let Some(te) = &self.tracking {
      match &te.benchmark {
        Benchmark::Weights(w) => check_len("benchmark weights", n, w.len())?,
        Benchmark::Returns(r) => check_len("benchmark returns", t, r.len())?,
      }
    }
    for (rm, ub) in &self.risk_upper {
      if !rm.is_optimizable() {
        return Err(PortfolioError::UnsupportedMethod(format!(
          "{} cannot be bounded",
          rm.name()
        )));
      }
      if !ub.is_finite() || *ub < 0.0 {
        return Err(PortfolioError::invalid(format!("upper bound on {} must be non-negative", rm.name())));
      }
    }
    Ok(())
  }
}

/// Immutable description of one mean-risk solve.
#[derive(Clone, Debug, PartialEq)]
pub struct OptimizationRequest {
  pub rm: RiskMeasure,
  pub obj: Objective,
  pub rf: f64,
  pub params: RiskParams,
  pub constraints: ConstraintSet,
}

impl Default for OptimizationRequest {
  fn default() -> Self {
    Self {
      rm: RiskMeasure::MV,
      obj: Objective::Sharpe,
      rf: 0.0,
      params: RiskParams::default(),
      constraints: ConstraintSet::default(),
    }
  }
}

impl OptimizationRequest {
  pub fn new(rm: RiskMeasure, obj: Objective) -> Self {
    Self {
      rm,
      obj,
      ..Self::default()
    }
  }

  pub fn with_rf(mut self, rf: f64) -> Self {
    self.rf = rf;
    self
  }

  pub fn with_params(mut self, params: RiskParams) -> Self {
    self.params = params;
    self
  }

  pub fn with_constraints(mut self, constraints: ConstraintSet) -> Self {
    self.constraints = constraints;
    self
  }

  /// Same request with one more risk upper bound. A bound already set on
  /// `rm` is only ever tightened.
  pub fn with_risk_upper(mut self, rm: RiskMeasure, bound: f64) -> Self {
    self
      .constraints
      .risk_upper
      .entry(rm)
      .and_modify(|ub| *ub = ub.min(bound))
      .or_insert(bound);
    self
  }

  pub(crate) fn validate(&self, inputs: &OptimizationInputs) -> Result<()> {
    inputs.validate()?;
    self.params.validate()?;
    if !self.rf.is_finite() {
      return Err(PortfolioError::invalid("risk-free rate must be finite"));
    }
    if let Objective::Utility { l } = self.obj {
      if !l.is_finite() || l < 0.0 {
        return Err(PortfolioError::invalid("risk aversion must be non-negative"));
      }
    }
    self.constraints.validate(inputs.n_assets(), inputs.returns.nrows())
  }
}

#[cfg(test)]
mod tests {
  use ndarray::array;

  use super::*;

  #[test]
  fn rejects_mismatched_tables() {
    let assets = vec!["A".to_string(), "B".to_string()];
    let mu = array![0.1, 0.2];
    let cov = Array2::<f64>::eye(2);
    let returns = Array2::<f64>::zeros((5, 2));
    let inputs = OptimizationInputs {
      assets: &assets,
      mu: mu.view(),
      cov: cov.view(),
      returns: returns.view(),
    };
    let mut req = OptimizationRequest::default();
    assert!(req.validate(&inputs).is_ok());

    req.constraints.linear = Some((Array2::zeros((1, 3)), array![0.0]));
    assert!(matches!(req.validate(&inputs), Err(PortfolioError::DimensionMismatch { .. })));

    let req = OptimizationRequest::default().with_risk_upper(RiskMeasure::VaR, 0.1);
    assert!(matches!(req.validate(&inputs), Err(PortfolioError::UnsupportedMethod(_))));
  }

  #[test]
  fn risk_upper_only_tightens() {
    let req = OptimizationRequest::default()
      .with_risk_upper(RiskMeasure::CVaR, 0.02)
      .with_risk_upper(RiskMeasure::CVaR, 0.05)
      .with_risk_upper(RiskMeasure::MDD, 0.3);
    assert_eq!(req.constraints.risk_upper[&RiskMeasure::CVaR], 0.02);
    let req = req.with_risk_upper(RiskMeasure::CVaR, 0.01);
    assert_eq!(req.constraints.risk_upper[&RiskMeasure::CVaR], 0.01);
    assert_eq!(req.constraints.risk_upper[&RiskMeasure::MDD], 0.3);
  }
}
