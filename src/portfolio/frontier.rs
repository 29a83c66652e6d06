//! # Efficient frontier
//!
//! $$
//! \max_{\mathbf w}\ \mu^\top\mathbf w\quad\text{s.t.}\quad \rho(\mathbf w)\le \rho_j,\qquad
//! \rho_j=\rho_{\min}+\tfrac{j}{m-1}(\rho_{\max}-\rho_{\min})
//! $$

use ndarray::Array1;
use rayon::prelude::*;
use tracing::debug;
use tracing::warn;

use super::optimizers::optimization;
use super::request::OptimizationInputs;
use super::request::OptimizationRequest;
use super::solver::SolveOutcome;
use super::solver::SolverChain;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::risk::portfolio_risk;
use crate::types::Objective;
use crate::types::PortfolioWeights;

/// End points of the frontier under the request's measure.
#[derive(Clone, Debug, PartialEq)]
pub struct FrontierLimits {
  pub min_risk: PortfolioWeights,
  pub max_ret: PortfolioWeights,
  pub risk_range: (f64, f64),
}

#[derive(Clone, Debug, PartialEq)]
pub struct FrontierPoint {
  pub weights: PortfolioWeights,
  pub risk: f64,
  pub ret: f64,
}

fn evaluate(inputs: &OptimizationInputs, req: &OptimizationRequest, w: &Array1<f64>) -> Result<(f64, f64)> {
  let risk = portfolio_risk(&w.view(), &inputs.cov, &inputs.returns, req.rm, &req.params)?;
  Ok((risk, inputs.mu.dot(w)))
}

/// Minimum-risk and maximum-return portfolios, `None` when either solve is
/// infeasible.
pub fn frontier_limits(
  inputs: &OptimizationInputs,
  req: &OptimizationRequest,
  chain: &SolverChain,
) -> Result<Option<FrontierLimits>> {
  let solve = |obj: Objective| -> Result<Option<PortfolioWeights>> {
    let req = OptimizationRequest { obj, ..req.clone() };
    Ok(optimization(inputs, &req, chain)?.into_weights())
  };
  let (Some(min_risk), Some(max_ret)) = (solve(Objective::MinRisk)?, solve(Objective::MaxRet)?) else {
    return Ok(None);
  };
  let (lo, _) = evaluate(inputs, req, min_risk.values())?;
  let (hi, _) = evaluate(inputs, req, max_ret.values())?;
  Ok(Some(FrontierLimits {
    min_risk,
    max_ret,
    risk_range: (lo, hi.max(lo)),
  }))
}

/// `points` portfolios with evenly spaced risk levels, lowest risk first.
///
/// Levels whose solve fails are dropped from the result.
pub fn efficient_frontier(
  inputs: &OptimizationInputs,
  req: &OptimizationRequest,
  points: usize,
  chain: &SolverChain,
) -> Result<Vec<FrontierPoint>> {
  if points < 2 {
    return Err(PortfolioError::invalid("a frontier needs at least two points"));
  }
  let Some(limits) = frontier_limits(inputs, req, chain)? else {
    warn!(rm = req.rm.name(), "frontier end points are infeasible");
    return Ok(Vec::new());
  };
  let (lo, hi) = limits.risk_range;
  let (risk, ret) = evaluate(inputs, req, limits.min_risk.values())?;
  let first = FrontierPoint {
    weights: limits.min_risk,
    risk,
    ret,
  };

  let step = (hi - lo) / (points - 1) as f64;
  let rest = (1..points)
    .into_par_iter()
    .map(|j| -> Result<Option<FrontierPoint>> {
      let level = lo + step * j as f64;
      let req = OptimizationRequest {
        obj: Objective::MaxRet,
        ..req.clone()
      }
      .with_risk_upper(req.rm, level);
      match optimization(inputs, &req, chain)? {
        SolveOutcome::Solved(weights) => {
          let (risk, ret) = evaluate(inputs, &req, weights.values())?;
          Ok(Some(FrontierPoint { weights, risk, ret }))
        }
        SolveOutcome::Infeasible(_) => Ok(None),
      }
    })
    .collect::<Result<Vec<_>>>()?;

  let mut frontier = vec![first];
  frontier.extend(rest.into_iter().flatten());
  debug!(requested = points, kept = frontier.len(), "efficient frontier traced");
  Ok(frontier)
}
