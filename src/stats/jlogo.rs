use ndarray::Array2;
use ndarray::ArrayView2;

use crate::cluster::tmfg::tmfg;
use crate::error::Result;
use crate::linalg::cov2corr;
use crate::linalg::inverse;

fn add_local_inverse(j: &mut Array2<f64>, cov: &ArrayView2<f64>, idx: &[usize], sign: f64) -> Result<()> {
  let block = Array2::from_shape_fn((idx.len(), idx.len()), |(a, b)| cov[[idx[a], idx[b]]]);
  let inv = inverse(&block.view(), "j-logo local block")?;
  for (a, &ia) in idx.iter().enumerate() {
    for (b, &ib) in idx.iter().enumerate() {
      j[[ia, ib]] += sign * inv[[a, b]];
    }
  }
  Ok(())
}

/// Local-global sparse inverse covariance on the TMFG of `1 - D²` with
/// `D = sqrt((1 - ρ) / 2)`, returned as a covariance.
pub fn j_logo(cov: &ArrayView2<f64>) -> Result<Array2<f64>> {
  let n = cov.nrows();
  if n < 4 {
    return Ok(cov.to_owned());
  }
  let (corr, _) = cov2corr(cov);
  let similarity = corr.mapv(|rho| 1.0 - (1.0 - rho) / 2.0);
  let graph = tmfg(&similarity.view())?;

  let mut j = Array2::<f64>::zeros((n, n));
  for clique in graph.cliques() {
    add_local_inverse(&mut j, cov, clique, 1.0)?;
  }
  for sep in graph.separators() {
    add_local_inverse(&mut j, cov, sep, -1.0)?;
  }
  inverse(&j.view(), "j-logo precision")
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;

  #[test]
  fn keeps_variances_on_tree_structured_cov() {
    let n = 6;
    let cov = Array2::from_shape_fn((n, n), |(i, j)| 0.5_f64.powi((i as i32 - j as i32).abs()) * 0.04);
    let est = j_logo(&cov.view()).unwrap();
    assert!(crate::linalg::is_psd(&est.view()));
    for i in 0..n {
      assert_abs_diff_eq!(est[[i, i]], cov[[i, i]], epsilon = 1e-10);
    }
  }

  #[test]
  fn small_universe_is_untouched() {
    let cov = Array2::<f64>::eye(3) * 0.01;
    assert_eq!(j_logo(&cov.view()).unwrap(), cov);
  }
}
