//! # Two-difference gap statistic
//!
//! $$
//! W_k=\sum_{c=1}^{k}\bar D_c,\qquad \Delta^2_k=W_{k-2}+W_k-2W_{k-1}
//! $$
//!
//! `W_k` sums the mean pairwise distance inside each cluster of the
//! `k`-cluster cut (singletons contribute nothing).

use ndarray::ArrayView2;
use tracing::debug;

use super::tree::ClusterTree;

/// Default upper bound on the number of clusters searched.
pub const DEFAULT_MAX_K: usize = 10;

fn within_dispersion(dist: &ArrayView2<f64>, clusters: &[Vec<usize>]) -> f64 {
  clusters
    .iter()
    .filter(|c| c.len() > 1)
    .map(|c| {
      let mut total = 0.0;
      let mut pairs = 0usize;
      for (a, &i) in c.iter().enumerate() {
        for &j in &c[a + 1..] {
          total += dist[[i, j]];
          pairs += 1;
        }
      }
      total / pairs as f64
    })
    .sum()
}

/// Number of clusters picked by the two-difference gap statistic.
///
/// `Δ²` is centred on `k`, so the candidates are `2..=min(max_k, sqrt(n))`
/// for which `W_{k+1}` exists; without any candidate the limit itself is
/// returned. Ties resolve to the smallest `k`.
pub fn optimal_k(dist: &ArrayView2<f64>, tree: &ClusterTree, max_k: usize) -> usize {
  let n = tree.n_leaves();
  if n <= 2 {
    return 1;
  }
  let levels = max_k.min(n).max(1);
  let w: Vec<f64> = (1..=levels).map(|k| within_dispersion(dist, &tree.clusters(k))).collect();

  let limit = max_k.min((n as f64).sqrt() as usize).max(1);
  let mut best: Option<(usize, f64)> = None;
  // w[k - 1] holds W_k
  for k in (2..=limit).take_while(|&k| k < w.len()) {
    let gap = w[k - 2] + w[k] - 2.0 * w[k - 1];
    if best.map_or(true, |(_, b)| gap > b) {
      best = Some((k, gap));
    }
  }
  let k = best.map_or(limit, |(k, _)| k).min(limit).min(n);
  debug!(k, limit, "gap statistic");
  k
}

#[cfg(test)]
mod tests {
  use ndarray::Array2;

  use super::*;
  use crate::cluster::linkage::linkage;
  use crate::cluster::linkage::LinkageMethod;

  fn three_groups() -> Array2<f64> {
    // 16 points in three tight 1-D groups at 0, 10 and 20
    let x: Vec<f64> = (0..16).map(|i| 10.0 * (i % 3) as f64 + 0.01 * i as f64).collect();
    Array2::from_shape_fn((16, 16), |(i, j)| (x[i] - x[j]).abs())
  }

  #[test]
  fn finds_separated_groups() {
    let d = three_groups();
    for method in [LinkageMethod::Single, LinkageMethod::Average, LinkageMethod::Ward] {
      let tree = linkage(&d.view(), method).unwrap();
      let k = optimal_k(&d.view(), &tree, DEFAULT_MAX_K);
      assert_eq!(k, 3, "{method}");
      assert_eq!(optimal_k(&d.view(), &tree, DEFAULT_MAX_K), k);
    }
  }

  #[test]
  fn never_exceeds_sqrt_limit() {
    let d = three_groups();
    let tree = linkage(&d.view(), LinkageMethod::Ward).unwrap();
    // sqrt(16) = 4, max_k = 2 wins
    assert_eq!(optimal_k(&d.view(), &tree, 2), 2);
    assert!(optimal_k(&d.view(), &tree, 50) <= 4);
  }

  #[test]
  fn tiny_universe_is_one_cluster() {
    let d = Array2::from_shape_fn((2, 2), |(i, j)| if i == j { 0.0 } else { 1.0 });
    let tree = linkage(&d.view(), LinkageMethod::Single).unwrap();
    assert_eq!(optimal_k(&d.view(), &tree, 10), 1);
  }

  #[test]
  fn sqrt_limit_without_curvature() {
    // n = 5 gives a limit of 2, too short for a second difference
    let d = Array2::from_shape_fn((5, 5), |(i, j)| (i as f64 - j as f64).abs());
    let tree = linkage(&d.view(), LinkageMethod::Average).unwrap();
    assert_eq!(optimal_k(&d.view(), &tree, 10), 2);
  }
}
