use ndarray::Array1;
use ndarray::ArrayView1;
use ndarray::ArrayView2;

use super::dispersion::flpm;
use super::dispersion::gmd;
use super::dispersion::mad;
use super::dispersion::semi_deviation;
use super::dispersion::slpm;
use super::drawdown::avg_drawdown_abs;
use super::drawdown::avg_drawdown_rel;
use super::drawdown::cdar_abs;
use super::drawdown::cdar_rel;
use super::drawdown::dar_abs;
use super::drawdown::dar_rel;
use super::drawdown::edar_abs;
use super::drawdown::edar_rel;
use super::drawdown::max_drawdown_abs;
use super::drawdown::max_drawdown_rel;
use super::drawdown::ulcer_index_abs;
use super::drawdown::ulcer_index_rel;
use super::tail::cvar_hist;
use super::tail::cvar_range;
use super::tail::evar_hist;
use super::tail::range;
use super::tail::tail_gini;
use super::tail::tail_gini_range;
use super::tail::var_hist;
use super::tail::worst_realization;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::types::RiskMeasure;
use crate::types::RiskParams;

/// Finite-difference step of [`risk_contribution`].
pub const CONTRIBUTION_STEP: f64 = 1e-6;

/// Measure `rm` of a realized return series. `MV` is the sample standard
/// deviation here; [`portfolio_risk`] uses the covariance instead.
pub fn series_risk(x: &[f64], rm: RiskMeasure, p: &RiskParams) -> f64 {
  let alpha = p.alpha;
  match rm {
    RiskMeasure::MV => super::dispersion::std_dev(x),
    RiskMeasure::MAD => mad(x),
    RiskMeasure::MSV => semi_deviation(x),
    RiskMeasure::FLPM => flpm(x, p.target),
    RiskMeasure::SLPM => slpm(x, p.target),
    RiskMeasure::CVaR => cvar_hist(x, alpha),
    RiskMeasure::EVaR => evar_hist(x, alpha).0,
    RiskMeasure::WR => worst_realization(x),
    RiskMeasure::GMD => gmd(x),
    RiskMeasure::TG => tail_gini(x, alpha, p.a_sim),
    RiskMeasure::RG => range(x),
    RiskMeasure::CVRG => cvar_range(x, alpha, p.beta()),
    RiskMeasure::TGRG => tail_gini_range(x, alpha, p.a_sim, p.beta(), p.b_sim()),
    RiskMeasure::VaR => var_hist(x, alpha),
    RiskMeasure::MDD => max_drawdown_abs(x),
    RiskMeasure::ADD => avg_drawdown_abs(x),
    RiskMeasure::DaR => dar_abs(x, alpha),
    RiskMeasure::CDaR => cdar_abs(x, alpha),
    RiskMeasure::EDaR => edar_abs(x, alpha).0,
    RiskMeasure::UCI => ulcer_index_abs(x),
    RiskMeasure::MDDRel => max_drawdown_rel(x),
    RiskMeasure::ADDRel => avg_drawdown_rel(x),
    RiskMeasure::DaRRel => dar_rel(x, alpha),
    RiskMeasure::CDaRRel => cdar_rel(x, alpha),
    RiskMeasure::EDaRRel => edar_rel(x, alpha).0,
    RiskMeasure::UCIRel => ulcer_index_rel(x),
  }
}

fn check_inputs(w: &ArrayView1<f64>, cov: &ArrayView2<f64>, returns: &ArrayView2<f64>, p: &RiskParams) -> Result<()> {
  p.validate()?;
  let n = w.len();
  if n == 0 {
    return Err(PortfolioError::invalid("empty weight vector"));
  }
  if cov.dim() != (n, n) {
    return Err(PortfolioError::mismatch("covariance", n, cov.nrows()));
  }
  if returns.ncols() != n {
    return Err(PortfolioError::mismatch("returns columns", n, returns.ncols()));
  }
  if returns.nrows() == 0 {
    return Err(PortfolioError::invalid("empty returns table"));
  }
  if w.iter().any(|v| !v.is_finite()) {
    return Err(PortfolioError::invalid("weights contain non-finite values"));
  }
  Ok(())
}

fn risk_unchecked(
  w: &ArrayView1<f64>,
  cov: &ArrayView2<f64>,
  returns: &ArrayView2<f64>,
  rm: RiskMeasure,
  p: &RiskParams,
) -> f64 {
  if rm.uses_covariance() {
    w.dot(&cov.dot(w)).max(0.0).sqrt()
  } else {
    let x = returns.dot(w).to_vec();
    series_risk(&x, rm, p)
  }
}

/// Risk of portfolio `w` under `rm`.
pub fn portfolio_risk(
  w: &ArrayView1<f64>,
  cov: &ArrayView2<f64>,
  returns: &ArrayView2<f64>,
  rm: RiskMeasure,
  p: &RiskParams,
) -> Result<f64> {
  check_inputs(w, cov, returns, p)?;
  Ok(risk_unchecked(w, cov, returns, rm, p))
}

/// Per-asset contribution `w_i ∂ρ/∂w_i` by symmetric finite differences.
pub fn risk_contribution(
  w: &ArrayView1<f64>,
  cov: &ArrayView2<f64>,
  returns: &ArrayView2<f64>,
  rm: RiskMeasure,
  p: &RiskParams,
) -> Result<Array1<f64>> {
  check_inputs(w, cov, returns, p)?;
  let mut rc = Array1::<f64>::zeros(w.len());
  let mut bumped = w.to_owned();
  for i in 0..w.len() {
    bumped[i] = w[i] + CONTRIBUTION_STEP;
    let up = risk_unchecked(&bumped.view(), cov, returns, rm, p);
    bumped[i] = w[i] - CONTRIBUTION_STEP;
    let down = risk_unchecked(&bumped.view(), cov, returns, rm, p);
    bumped[i] = w[i];
    rc[i] = w[i] * (up - down) / (2.0 * CONTRIBUTION_STEP);
  }
  Ok(rc)
}

/// `(μ'w - r_f) / ρ(w)`; zero when the risk vanishes.
pub fn sharpe_like_ratio(
  w: &ArrayView1<f64>,
  mu: &ArrayView1<f64>,
  cov: &ArrayView2<f64>,
  returns: &ArrayView2<f64>,
  rm: RiskMeasure,
  rf: f64,
  p: &RiskParams,
) -> Result<f64> {
  if mu.len() != w.len() {
    return Err(PortfolioError::mismatch("mean vector", w.len(), mu.len()));
  }
  let risk = portfolio_risk(w, cov, returns, rm, p)?;
  let ret = mu.dot(w);
  Ok(if risk > 1e-15 { (ret - rf) / risk } else { 0.0 })
}
