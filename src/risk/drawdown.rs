//! # Drawdowns
//!
//! $$
//! \mathrm{DD}_t=\max_{s\le t}P_s-P_t,\qquad
//! P^{abs}_t=1+\sum_{s\le t}r_s,\quad P^{rel}_t=\prod_{s\le t}(1+r_s)
//! $$
//!
//! The path starts at 1 before the first return, so a series of `T` returns
//! yields `T + 1` drawdown observations. Relative drawdowns are expressed as
//! a fraction of the running peak.

use super::tail::cvar_hist;
use super::tail::evar_hist;
use super::tail::var_hist;

/// Non-negative drawdowns of the cumulative path, initial point included.
pub fn drawdowns(x: &[f64], compounded: bool) -> Vec<f64> {
  let mut out = Vec::with_capacity(x.len() + 1);
  let mut level = 1.0;
  let mut peak = 1.0;
  out.push(0.0);
  for &r in x {
    level = if compounded { level * (1.0 + r) } else { level + r };
    if level > peak {
      peak = level;
    }
    let dd = if compounded { (peak - level) / peak } else { peak - level };
    out.push(dd.max(0.0));
  }
  out
}

fn negated(dd: &[f64]) -> Vec<f64> {
  dd.iter().map(|d| -d).collect()
}

fn max_dd(dd: &[f64]) -> f64 {
  dd.iter().copied().fold(0.0, f64::max)
}

fn avg_dd(dd: &[f64]) -> f64 {
  if dd.len() < 2 {
    0.0
  } else {
    dd.iter().sum::<f64>() / (dd.len() - 1) as f64
  }
}

fn ulcer(dd: &[f64]) -> f64 {
  if dd.len() < 2 {
    0.0
  } else {
    (dd.iter().map(|d| d * d).sum::<f64>() / (dd.len() - 1) as f64).sqrt()
  }
}

pub fn max_drawdown_abs(x: &[f64]) -> f64 {
  max_dd(&drawdowns(x, false))
}

pub fn avg_drawdown_abs(x: &[f64]) -> f64 {
  avg_dd(&drawdowns(x, false))
}

pub fn dar_abs(x: &[f64], alpha: f64) -> f64 {
  var_hist(&negated(&drawdowns(x, false)), alpha)
}

pub fn cdar_abs(x: &[f64], alpha: f64) -> f64 {
  cvar_hist(&negated(&drawdowns(x, false)), alpha)
}

pub fn edar_abs(x: &[f64], alpha: f64) -> (f64, f64) {
  evar_hist(&negated(&drawdowns(x, false)), alpha)
}

pub fn ulcer_index_abs(x: &[f64]) -> f64 {
  ulcer(&drawdowns(x, false))
}

pub fn max_drawdown_rel(x: &[f64]) -> f64 {
  max_dd(&drawdowns(x, true))
}

pub fn avg_drawdown_rel(x: &[f64]) -> f64 {
  avg_dd(&drawdowns(x, true))
}

pub fn dar_rel(x: &[f64], alpha: f64) -> f64 {
  var_hist(&negated(&drawdowns(x, true)), alpha)
}

pub fn cdar_rel(x: &[f64], alpha: f64) -> f64 {
  cvar_hist(&negated(&drawdowns(x, true)), alpha)
}

pub fn edar_rel(x: &[f64], alpha: f64) -> (f64, f64) {
  evar_hist(&negated(&drawdowns(x, true)), alpha)
}

pub fn ulcer_index_rel(x: &[f64]) -> f64 {
  ulcer(&drawdowns(x, true))
}
