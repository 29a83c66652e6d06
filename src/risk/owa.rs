//! # Ordered weighted averages
//!
//! $$
//! \rho(X)=\sum_{i=1}^{T} c_i\,x_{(i)},\qquad x_{(1)}\le\dots\le x_{(T)}
//! $$
//!
//! Weight vectors `c` paired with the ascending sample. Every generator here
//! returns a non-decreasing `c`, so the measure is the maximum over
//! permutations and admits a linear program.

use ndarray::Array1;

use super::sorted_ascending;

/// Gini mean difference: `c_i = 2(2i - 1 - T) / (T(T - 1))`.
pub fn owa_gmd(t: usize) -> Array1<f64> {
  if t < 2 {
    return Array1::zeros(t);
  }
  let tf = t as f64;
  Array1::from_iter((1..=t).map(|i| 2.0 * (2.0 * i as f64 - 1.0 - tf) / (tf * (tf - 1.0))))
}

/// CVaR at level `alpha`.
pub fn owa_cvar(t: usize, alpha: f64) -> Array1<f64> {
  let mut w = Array1::<f64>::zeros(t);
  if t == 0 {
    return w;
  }
  let k = tail_index(t, alpha);
  let tail = -1.0 / (t as f64 * alpha);
  for i in 0..k {
    w[i] = tail;
  }
  w[k] = -1.0 - tail * k as f64;
  w
}

/// Weighted combination of CVaRs at several levels.
pub fn owa_wcvar(t: usize, alphas: &[f64], weights: &[f64]) -> Array1<f64> {
  alphas
    .iter()
    .zip(weights)
    .fold(Array1::zeros(t), |acc, (&a, &w)| acc + owa_cvar(t, a) * w)
}

/// Ladder of `a_sim` levels from `1e-4` to `alpha` and their trapezoid weights.
pub(crate) fn tail_gini_ladder(alpha: f64, a_sim: usize) -> (Vec<f64>, Vec<f64>) {
  let a_sim = a_sim.max(2);
  let lo = 1e-4_f64.min(alpha);
  let step = (alpha - lo) / (a_sim - 1) as f64;
  let alphas: Vec<f64> = (0..a_sim).map(|i| lo + step * i as f64).collect();
  let top = alphas[a_sim - 1] * alphas[a_sim - 1];
  let mut weights = Vec::with_capacity(a_sim);
  weights.push(alphas[1] * alphas[0] / top);
  for i in 1..a_sim - 1 {
    weights.push((alphas[i + 1] - alphas[i - 1]) * alphas[i] / top);
  }
  weights.push((alphas[a_sim - 1] - alphas[a_sim - 2]) * alphas[a_sim - 1] / top);
  (alphas, weights)
}

/// Tail Gini at level `alpha` with `a_sim` CVaR levels.
pub fn owa_tg(t: usize, alpha: f64, a_sim: usize) -> Array1<f64> {
  let (alphas, weights) = tail_gini_ladder(alpha, a_sim);
  owa_wcvar(t, &alphas, &weights)
}

/// Range: `max - min`.
pub fn owa_rg(t: usize) -> Array1<f64> {
  let mut w = Array1::<f64>::zeros(t);
  if t >= 2 {
    w[0] = -1.0;
    w[t - 1] = 1.0;
  }
  w
}

fn reversed(w: Array1<f64>) -> Array1<f64> {
  w.iter().rev().copied().collect()
}

/// CVaR range: loss tail at `alpha` plus gain tail at `beta`.
pub fn owa_cvrg(t: usize, alpha: f64, beta: f64) -> Array1<f64> {
  owa_cvar(t, alpha) - reversed(owa_cvar(t, beta))
}

/// Tail Gini range.
pub fn owa_tgrg(t: usize, alpha: f64, a_sim: usize, beta: f64, b_sim: usize) -> Array1<f64> {
  owa_tg(t, alpha, a_sim) - reversed(owa_tg(t, beta, b_sim))
}

/// `Σ c_i x_(i)` on the ascending sample.
pub fn owa_risk(x: &[f64], weights: &Array1<f64>) -> f64 {
  sorted_ascending(x)
    .iter()
    .zip(weights.iter())
    .map(|(a, b)| a * b)
    .sum()
}

/// `ceil(alpha T) - 1`, kept inside the sample.
pub(crate) fn tail_index(t: usize, alpha: f64) -> usize {
  let k = (alpha * t as f64).ceil() as isize - 1;
  k.clamp(0, t as isize - 1) as usize
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;

  #[test]
  fn generators_are_non_decreasing() {
    let t = 40;
    for w in [
      owa_gmd(t),
      owa_cvar(t, 0.05),
      owa_tg(t, 0.05, 50),
      owa_rg(t),
      owa_cvrg(t, 0.05, 0.1),
      owa_tgrg(t, 0.05, 20, 0.05, 20),
    ] {
      assert!(w.windows(2).into_iter().all(|p| p[1] >= p[0] - 1e-12));
    }
  }

  #[test]
  fn cvar_weights_sum_to_minus_one() {
    assert_abs_diff_eq!(owa_cvar(97, 0.05).sum(), -1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(owa_tg(97, 0.05, 30).sum(), -1.0, epsilon = 1e-2);
  }

  #[test]
  fn gmd_matches_pairwise_definition() {
    let x: [f64; 5] = [0.03, -0.01, 0.02, -0.05, 0.0];
    let n = x.len() as f64;
    let mut pairs = 0.0;
    for a in x {
      for b in x {
        pairs += (a - b).abs();
      }
    }
    let gmd = pairs / (n * (n - 1.0));
    assert_abs_diff_eq!(owa_risk(&x, &owa_gmd(5)), gmd, epsilon = 1e-14);
  }

  #[test]
  fn range_is_spread() {
    let x = [0.03, -0.01, 0.02, -0.05, 0.0];
    assert_abs_diff_eq!(owa_risk(&x, &owa_rg(5)), 0.08, epsilon = 1e-15);
  }
}
