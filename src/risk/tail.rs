//! # Tail measures
//!
//! $$
//! \mathrm{VaR}_\alpha=-x_{(k)},\quad k=\lceil\alpha T\rceil-1,\qquad
//! \mathrm{EVaR}_\alpha=\inf_{z>0} z\ln\frac{\mathbb E[e^{-X/z}]}{\alpha}
//! $$

use super::owa::owa_cvrg;
use super::owa::owa_risk;
use super::owa::owa_tg;
use super::owa::owa_tgrg;
use super::owa::tail_index;
use super::sorted_ascending;
use crate::stats::scalar_min::minimize_scalar;

/// Historical value at risk.
pub fn var_hist(x: &[f64], alpha: f64) -> f64 {
  if x.is_empty() {
    return f64::NAN;
  }
  let sorted = sorted_ascending(x);
  -sorted[tail_index(x.len(), alpha)]
}

/// Historical conditional value at risk.
pub fn cvar_hist(x: &[f64], alpha: f64) -> f64 {
  if x.is_empty() {
    return f64::NAN;
  }
  let sorted = sorted_ascending(x);
  let k = tail_index(x.len(), alpha);
  let excess: f64 = sorted[..=k].iter().map(|v| v - sorted[k]).sum();
  -sorted[k] - excess / (alpha * x.len() as f64)
}

/// Worst realization: `-min(x)`.
pub fn worst_realization(x: &[f64]) -> f64 {
  -x.iter().copied().fold(f64::INFINITY, f64::min)
}

/// `max(x) - min(x)`.
pub fn range(x: &[f64]) -> f64 {
  let (lo, hi) = x
    .iter()
    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
  hi - lo
}

pub fn tail_gini(x: &[f64], alpha: f64, a_sim: usize) -> f64 {
  owa_risk(x, &owa_tg(x.len(), alpha, a_sim))
}

pub fn cvar_range(x: &[f64], alpha: f64, beta: f64) -> f64 {
  owa_risk(x, &owa_cvrg(x.len(), alpha, beta))
}

pub fn tail_gini_range(x: &[f64], alpha: f64, a_sim: usize, beta: f64, b_sim: usize) -> f64 {
  owa_risk(x, &owa_tgrg(x.len(), alpha, a_sim, beta, b_sim))
}

/// `z (ln E[exp(-X/z)] - ln α)` evaluated with a shifted log-sum-exp.
fn entropic_bound(x: &[f64], alpha: f64, z: f64) -> f64 {
  let scaled: Vec<f64> = x.iter().map(|v| -v / z).collect();
  let m = scaled.iter().copied().fold(f64::NEG_INFINITY, f64::max);
  let lse = m + (scaled.iter().map(|s| (s - m).exp()).sum::<f64>() / x.len() as f64).ln();
  z * (lse - alpha.ln())
}

/// Historical entropic value at risk and the optimal `z`.
///
/// The search runs over `ln z ∈ [-20, 10]`; the worst realization caps the
/// value, matching the `z → 0` limit.
pub fn evar_hist(x: &[f64], alpha: f64) -> (f64, f64) {
  if x.is_empty() {
    return (f64::NAN, f64::NAN);
  }
  let wr = worst_realization(x);
  match minimize_scalar(|lz| entropic_bound(x, alpha, lz.exp()), -20.0, 10.0, 500) {
    Some((lz, value)) if value < wr => (value, lz.exp()),
    _ => (wr, 0.0),
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;

  fn sample() -> Vec<f64> {
    (0..100).map(|i| ((i * 37 % 100) as f64 - 50.0) / 1000.0).collect()
  }

  #[test]
  fn var_uses_ceil_index() {
    // ascending -0.05, -0.049, ... ; ceil(0.05 * 100) - 1 = 4
    let x = sample();
    assert_abs_diff_eq!(var_hist(&x, 0.05), 0.046, epsilon = 1e-15);
    assert_abs_diff_eq!(var_hist(&x, 0.051), 0.045, epsilon = 1e-15);
  }

  #[test]
  fn cvar_is_tail_mean_on_grid() {
    let x = sample();
    // mean of the five worst: 0.050, 0.049, 0.048, 0.047, 0.046
    assert_abs_diff_eq!(cvar_hist(&x, 0.05), 0.048, epsilon = 1e-12);
  }

  #[test]
  fn ordering_var_cvar_evar_wr() {
    let x = sample();
    let var = var_hist(&x, 0.05);
    let cvar = cvar_hist(&x, 0.05);
    let (evar, z) = evar_hist(&x, 0.05);
    let wr = worst_realization(&x);
    assert!(var <= cvar + 1e-12);
    assert!(cvar <= evar + 1e-9);
    assert!(evar <= wr + 1e-12);
    assert!(z > 0.0);
  }

  #[test]
  fn ranges() {
    let x = sample();
    assert_abs_diff_eq!(range(&x), 0.099, epsilon = 1e-15);
    // symmetric grid, both tails average 0.048 / 0.0475
    assert_abs_diff_eq!(cvar_range(&x, 0.05, 0.05), 0.048 + 0.047, epsilon = 1e-12);
    assert!(tail_gini_range(&x, 0.05, 20, 0.05, 20) > tail_gini(&x, 0.05, 20));
  }
}
