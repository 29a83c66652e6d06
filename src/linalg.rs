//! # Linear algebra helpers
//!
//! $$
//! \Sigma = V\Lambda V^\top,\qquad \Sigma_{+} = V\max(\Lambda,\epsilon)V^\top
//! $$
//!
//! Bridging between `ndarray` (data) and `nalgebra` (decompositions), plus PSD
//! repair and correlation/covariance conversion.

use nalgebra::DMatrix;
use nalgebra::SymmetricEigen;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView2;
use ndarray_stats::QuantileExt;
use tracing::warn;

use crate::error::PortfolioError;
use crate::error::Result;

/// Eigenvalues at or above `-PSD_TOLERANCE` count as non-negative.
pub const PSD_TOLERANCE: f64 = 1e-8;

/// Strategy used to repair a covariance estimate that is not PSD.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum PsdRepair {
  /// Clip correlation eigenvalues at `threshold`, keep the variances.
  #[default]
  Clipped,
  /// Higham alternating projections to the nearest correlation matrix.
  Higham,
}

pub fn to_dmatrix(a: &ArrayView2<f64>) -> DMatrix<f64> {
  DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

pub fn from_dmatrix(m: &DMatrix<f64>) -> Array2<f64> {
  Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

pub fn symmetrize(a: &ArrayView2<f64>) -> Array2<f64> {
  (a + &a.t()) * 0.5
}

/// Symmetric eigen-decomposition with eigenvalues sorted in descending order.
pub fn sym_eigen_desc(a: &ArrayView2<f64>) -> (Array1<f64>, Array2<f64>) {
  let eig = SymmetricEigen::new(to_dmatrix(&symmetrize(a).view()));
  let n = a.nrows();
  let mut order: Vec<usize> = (0..n).collect();
  order.sort_by(|&i, &j| {
    eig.eigenvalues[j]
      .partial_cmp(&eig.eigenvalues[i])
      .unwrap_or(std::cmp::Ordering::Equal)
  });

  let values = Array1::from_iter(order.iter().map(|&i| eig.eigenvalues[i]));
  let vectors = Array2::from_shape_fn((n, n), |(r, c)| eig.eigenvectors[(r, order[c])]);
  (values, vectors)
}

/// Rebuild `V diag(values) V'`.
pub fn recompose(values: &Array1<f64>, vectors: &Array2<f64>) -> Array2<f64> {
  let scaled = vectors * &values.view().insert_axis(ndarray::Axis(0));
  scaled.dot(&vectors.t())
}

pub fn min_eigenvalue(a: &ArrayView2<f64>) -> f64 {
  if a.is_empty() {
    return 0.0;
  }
  let (values, _) = sym_eigen_desc(a);
  values.min().copied().unwrap_or(f64::NAN)
}

pub fn is_psd(a: &ArrayView2<f64>) -> bool {
  min_eigenvalue(a) >= -PSD_TOLERANCE
}

/// Symmetric square root of a PSD matrix (negative eigenvalues clipped).
pub fn sqrtm_psd(a: &ArrayView2<f64>) -> Array2<f64> {
  let (values, vectors) = sym_eigen_desc(a);
  recompose(&values.mapv(|v| v.max(0.0).sqrt()), &vectors)
}

/// Correlation matrix and standard deviations of a covariance matrix.
pub fn cov2corr(cov: &ArrayView2<f64>) -> (Array2<f64>, Array1<f64>) {
  let n = cov.nrows();
  let std = Array1::from_iter((0..n).map(|i| cov[[i, i]].max(0.0).sqrt()));
  let corr = Array2::from_shape_fn((n, n), |(i, j)| {
    if i == j {
      1.0
    } else {
      let denom = std[i] * std[j];
      if denom > 1e-15 {
        (cov[[i, j]] / denom).clamp(-1.0, 1.0)
      } else {
        0.0
      }
    }
  });
  (corr, std)
}

pub fn corr2cov(corr: &ArrayView2<f64>, std: &Array1<f64>) -> Array2<f64> {
  Array2::from_shape_fn(corr.dim(), |(i, j)| corr[[i, j]] * std[i] * std[j])
}

/// Rescale a symmetric matrix to unit diagonal.
pub fn unit_diagonal(a: &ArrayView2<f64>) -> Array2<f64> {
  let d = Array1::from_iter((0..a.nrows()).map(|i| a[[i, i]].abs().sqrt()));
  Array2::from_shape_fn(a.dim(), |(i, j)| {
    let denom = d[i] * d[j];
    if denom > 1e-15 {
      a[[i, j]] / denom
    } else if i == j {
      1.0
    } else {
      0.0
    }
  })
}

fn clip_correlation(corr: &ArrayView2<f64>, threshold: f64) -> Array2<f64> {
  let (values, vectors) = sym_eigen_desc(corr);
  let clipped = recompose(&values.mapv(|v| v.max(threshold)), &vectors);
  unit_diagonal(&clipped.view())
}

fn higham_correlation(corr: &ArrayView2<f64>, threshold: f64, max_iter: usize) -> Array2<f64> {
  let n = corr.nrows();
  let mut y = corr.to_owned();
  let mut delta = Array2::<f64>::zeros((n, n));
  let mut x = corr.to_owned();

  for _ in 0..max_iter {
    let r = &x - &delta;
    let (values, vectors) = sym_eigen_desc(&r.view());
    let projected = recompose(&values.mapv(|v| v.max(threshold)), &vectors);
    delta = &projected - &r;
    let mut next = projected;
    for i in 0..n {
      next[[i, i]] = 1.0;
    }
    let change = (&next - &y).mapv(f64::abs).sum();
    y = next.clone();
    x = next;
    if change < 1e-12 * n as f64 {
      break;
    }
  }

  clip_correlation(&x.view(), threshold)
}

/// Nearest PSD matrix with unit diagonal.
pub fn nearest_correlation(corr: &ArrayView2<f64>, method: PsdRepair) -> Array2<f64> {
  match method {
    PsdRepair::Clipped => clip_correlation(corr, PSD_TOLERANCE),
    PsdRepair::Higham => higham_correlation(corr, PSD_TOLERANCE, 100),
  }
}

/// Nearest PSD covariance that keeps the original variances.
pub fn nearest_psd(cov: &ArrayView2<f64>, method: PsdRepair) -> Array2<f64> {
  let (corr, std) = cov2corr(cov);
  let fixed = nearest_correlation(&corr.view(), method);
  symmetrize(&corr2cov(&fixed.view(), &std).view())
}

/// Return a PSD version of `cov`, repairing it once if needed.
///
/// A matrix that is still not PSD after repair is returned as is with a
/// warning; the optimizers will then report the problem as infeasible.
pub fn repair_covariance(cov: Array2<f64>, method: PsdRepair) -> Array2<f64> {
  let cov = symmetrize(&cov.view());
  if is_psd(&cov.view()) {
    return cov;
  }
  let repaired = nearest_psd(&cov.view(), method);
  let min_eig = min_eigenvalue(&repaired.view());
  if min_eig.is_finite() && min_eig >= -PSD_TOLERANCE {
    repaired
  } else {
    warn!(
      min_eigenvalue = min_eig,
      "covariance repair did not reach a PSD matrix, continuing with best effort"
    );
    repaired
  }
}

/// Matrix inverse, falling back to the Moore-Penrose pseudo-inverse.
pub fn inverse(a: &ArrayView2<f64>, context: &'static str) -> Result<Array2<f64>> {
  let m = to_dmatrix(a);
  if let Some(inv) = m.clone().try_inverse() {
    if inv.iter().all(|v| v.is_finite()) {
      return Ok(from_dmatrix(&inv));
    }
  }
  warn!(context, "singular matrix, using pseudo-inverse");
  m.pseudo_inverse(1e-12)
    .map(|p| from_dmatrix(&p))
    .map_err(|e| PortfolioError::Numerical(format!("{context}: {e}")))
}
