use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView2;
use tracing::warn;

use crate::linalg::corr2cov;
use crate::linalg::cov2corr;

fn soft_threshold(x: f64, lambda: f64) -> f64 {
  x.signum() * (x.abs() - lambda).max(0.0)
}

/// Sparse-precision covariance by block coordinate descent on the
/// correlation matrix, rescaled back with the original volatilities.
///
/// The diagonal is not penalized. `alpha` is the L1 penalty applied to the
/// off-diagonal entries of the precision matrix.
pub fn graphical_lasso(cov: &ArrayView2<f64>, alpha: f64, max_iter: usize, tol: f64) -> Array2<f64> {
  let (s, std) = cov2corr(cov);
  let n = s.nrows();
  if n < 2 || alpha <= 0.0 {
    return cov.to_owned();
  }

  let mut w = s.clone();
  let mut betas = Array2::<f64>::zeros((n, n));
  let mut converged = false;

  for _ in 0..max_iter {
    let previous = w.clone();
    for j in 0..n {
      let others: Vec<usize> = (0..n).filter(|&k| k != j).collect();
      let m = others.len();
      let w11 = Array2::from_shape_fn((m, m), |(a, b)| w[[others[a], others[b]]]);
      let s12 = Array1::from_iter(others.iter().map(|&k| s[[k, j]]));
      let mut beta = Array1::from_iter(others.iter().map(|&k| betas[[k, j]]));

      for _ in 0..100 {
        let mut delta = 0.0_f64;
        for a in 0..m {
          let partial: f64 = (0..m)
            .filter(|&b| b != a)
            .map(|b| w11[[a, b]] * beta[b])
            .sum();
          let next = soft_threshold(s12[a] - partial, alpha) / w11[[a, a]];
          delta = delta.max((next - beta[a]).abs());
          beta[a] = next;
        }
        if delta < tol {
          break;
        }
      }

      let w12 = w11.dot(&beta);
      for (a, &k) in others.iter().enumerate() {
        w[[k, j]] = w12[a];
        w[[j, k]] = w12[a];
        betas[[k, j]] = beta[a];
      }
    }

    let change = (&w - &previous).mapv(f64::abs).mean().unwrap_or(0.0);
    if change < tol {
      converged = true;
      break;
    }
  }

  if !converged {
    warn!(alpha, max_iter, "graphical lasso did not converge");
  }
  corr2cov(&w.view(), &std)
}
