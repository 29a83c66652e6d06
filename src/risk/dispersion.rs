use super::owa::owa_gmd;
use super::owa::owa_risk;

fn mean(x: &[f64]) -> f64 {
  if x.is_empty() {
    0.0
  } else {
    x.iter().sum::<f64>() / x.len() as f64
  }
}

/// Standard deviation: σ = √(Σ(x - x̄)² / (T - 1))
pub fn std_dev(x: &[f64]) -> f64 {
  if x.len() < 2 {
    return 0.0;
  }
  let m = mean(x);
  (x.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (x.len() - 1) as f64).sqrt()
}

/// Mean absolute deviation: (1/T) Σ|x - x̄|
pub fn mad(x: &[f64]) -> f64 {
  let m = mean(x);
  mean(&x.iter().map(|v| (v - m).abs()).collect::<Vec<_>>())
}

/// Semi standard deviation: √(Σ min(x - x̄, 0)² / (T - 1))
pub fn semi_deviation(x: &[f64]) -> f64 {
  if x.len() < 2 {
    return 0.0;
  }
  let m = mean(x);
  let downside: f64 = x.iter().map(|v| (v - m).min(0.0).powi(2)).sum();
  (downside / (x.len() - 1) as f64).sqrt()
}

/// First lower partial moment: (1/T) Σ max(τ - x, 0)
pub fn flpm(x: &[f64], target: f64) -> f64 {
  mean(&x.iter().map(|v| (target - v).max(0.0)).collect::<Vec<_>>())
}

/// Second lower partial moment: √(Σ max(τ - x, 0)² / (T - 1))
pub fn slpm(x: &[f64], target: f64) -> f64 {
  if x.len() < 2 {
    return 0.0;
  }
  let s: f64 = x.iter().map(|v| (target - v).max(0.0).powi(2)).sum();
  (s / (x.len() - 1) as f64).sqrt()
}

/// Gini mean difference over all ordered pairs.
pub fn gmd(x: &[f64]) -> f64 {
  owa_risk(x, &owa_gmd(x.len()))
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;

  const X: [f64; 6] = [0.01, -0.02, 0.03, 0.0, -0.01, 0.02];

  #[test]
  fn std_matches_sample_definition() {
    // numpy.std(X, ddof=1)
    assert_abs_diff_eq!(std_dev(&X), 0.018_708_286_933_869_708, epsilon = 1e-15);
  }

  #[test]
  fn mad_and_semi_deviation() {
    let m = X.iter().sum::<f64>() / 6.0;
    let expected: f64 = X.iter().map(|v| (v - m).abs()).sum::<f64>() / 6.0;
    assert_abs_diff_eq!(mad(&X), expected, epsilon = 1e-15);
    assert!(semi_deviation(&X) < std_dev(&X));
  }

  #[test]
  fn lower_partial_moments_ignore_gains() {
    assert_abs_diff_eq!(flpm(&X, 0.0), 0.03 / 6.0, epsilon = 1e-15);
    assert_abs_diff_eq!(slpm(&X, 0.0), (0.0005_f64 / 5.0).sqrt(), epsilon = 1e-15);
    assert_eq!(flpm(&[0.1, 0.2], 0.0), 0.0);
  }

  #[test]
  fn gmd_of_constant_is_zero() {
    assert_abs_diff_eq!(gmd(&[0.01; 5]), 0.0, epsilon = 1e-15);
  }
}
