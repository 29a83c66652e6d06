//! # Agglomerative linkage
//!
//! $$
//! d(k, i\cup j)=\alpha_i d(k,i)+\alpha_j d(k,j)+\beta d(i,j)+\gamma|d(k,i)-d(k,j)|
//! $$
//!
//! Lance-Williams updates on a dense distance matrix. Ties pick the pair with
//! the smallest row then column index, so results are reproducible.

use std::fmt;
use std::str::FromStr;

use ndarray::Array2;
use ndarray::ArrayView2;
use tracing::debug;

use super::codependence::Codependence;
use super::dbht::dbht_linkage;
use super::tree::ClusterTree;
use super::tree::LinkageRow;
use crate::error::PortfolioError;
use crate::error::Result;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LinkageMethod {
  Single,
  Complete,
  Average,
  Weighted,
  Centroid,
  Median,
  #[default]
  Ward,
  /// Directed bubble hierarchy on the planar filtered graph.
  Dbht,
}

impl LinkageMethod {
  pub fn name(self) -> &'static str {
    match self {
      LinkageMethod::Single => "single",
      LinkageMethod::Complete => "complete",
      LinkageMethod::Average => "average",
      LinkageMethod::Weighted => "weighted",
      LinkageMethod::Centroid => "centroid",
      LinkageMethod::Median => "median",
      LinkageMethod::Ward => "ward",
      LinkageMethod::Dbht => "DBHT",
    }
  }
}

impl fmt::Display for LinkageMethod {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for LinkageMethod {
  type Err = PortfolioError;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_lowercase().as_str() {
      "single" => Ok(LinkageMethod::Single),
      "complete" => Ok(LinkageMethod::Complete),
      "average" => Ok(LinkageMethod::Average),
      "weighted" => Ok(LinkageMethod::Weighted),
      "centroid" => Ok(LinkageMethod::Centroid),
      "median" => Ok(LinkageMethod::Median),
      "ward" => Ok(LinkageMethod::Ward),
      "dbht" => Ok(LinkageMethod::Dbht),
      _ => Err(PortfolioError::UnsupportedMethod(s.to_string())),
    }
  }
}

pub(crate) fn validate_distance(dist: &ArrayView2<f64>) -> Result<()> {
  let (r, c) = dist.dim();
  if r != c {
    return Err(PortfolioError::mismatch("distance matrix", r, c));
  }
  if r == 0 {
    return Err(PortfolioError::invalid("distance matrix is empty"));
  }
  for i in 0..r {
    for j in 0..r {
      let d = dist[[i, j]];
      if !d.is_finite() || d < 0.0 {
        return Err(PortfolioError::invalid(format!("distance ({i}, {j}) = {d}")));
      }
      if (d - dist[[j, i]]).abs() > 1e-10 {
        return Err(PortfolioError::invalid("distance matrix is not symmetric"));
      }
    }
  }
  Ok(())
}

/// Distance from `k` to the union of `i` and `j`.
fn lance_williams(method: LinkageMethod, dki: f64, dkj: f64, dij: f64, ni: f64, nj: f64, nk: f64) -> f64 {
  match method {
    LinkageMethod::Single => dki.min(dkj),
    LinkageMethod::Complete | LinkageMethod::Dbht => dki.max(dkj),
    LinkageMethod::Average => (ni * dki + nj * dkj) / (ni + nj),
    LinkageMethod::Weighted => 0.5 * (dki + dkj),
    LinkageMethod::Centroid => {
      let s = ni + nj;
      ((ni * dki * dki + nj * dkj * dkj) / s - ni * nj * dij * dij / (s * s)).max(0.0).sqrt()
    }
    LinkageMethod::Median => (0.5 * dki * dki + 0.5 * dkj * dkj - 0.25 * dij * dij).max(0.0).sqrt(),
    LinkageMethod::Ward => {
      let s = ni + nj + nk;
      (((ni + nk) * dki * dki + (nj + nk) * dkj * dkj - nk * dij * dij) / s).max(0.0).sqrt()
    }
  }
}

/// Classical agglomerative clustering of a distance matrix.
pub fn linkage(dist: &ArrayView2<f64>, method: LinkageMethod) -> Result<ClusterTree> {
  validate_distance(dist)?;
  let n = dist.nrows();
  if n == 1 {
    return Ok(ClusterTree::singleton());
  }
  let method = if method == LinkageMethod::Dbht {
    LinkageMethod::Complete
  } else {
    method
  };

  let mut d = dist.to_owned();
  let mut active = vec![true; n];
  let mut node_id: Vec<usize> = (0..n).collect();
  let mut size = vec![1usize; n];
  let mut rows = Vec::with_capacity(n - 1);

  for step in 0..(n - 1) {
    let mut min_d = f64::INFINITY;
    let mut mi = 0;
    let mut mj = 0;
    for i in 0..n {
      if !active[i] {
        continue;
      }
      for j in (i + 1)..n {
        if active[j] && d[[i, j]] < min_d {
          min_d = d[[i, j]];
          mi = i;
          mj = j;
        }
      }
    }

    let (a, b) = (node_id[mi], node_id[mj]);
    rows.push(LinkageRow {
      left: a.min(b),
      right: a.max(b),
      height: min_d,
      size: size[mi] + size[mj],
    });

    let (ni, nj) = (size[mi] as f64, size[mj] as f64);
    for k in 0..n {
      if !active[k] || k == mi || k == mj {
        continue;
      }
      let v = lance_williams(method, d[[mi, k]], d[[mj, k]], min_d, ni, nj, size[k] as f64);
      d[[mi, k]] = v;
      d[[k, mi]] = v;
    }
    node_id[mi] = n + step;
    size[mi] += size[mj];
    active[mj] = false;
  }

  ClusterTree::new(n, rows)
}

/// Group of leaves already merged into node `id`.
#[derive(Clone, Debug)]
pub(crate) struct Group {
  pub id: usize,
  pub leaves: Vec<usize>,
}

/// Complete linkage over existing groups, appending merges to `rows`.
///
/// Heights are raised to at least `floor` and to the tallest child so the
/// resulting tree stays monotonic. Returns the group covering every input.
pub(crate) fn merge_groups(
  mut groups: Vec<Group>,
  dist: &Array2<f64>,
  n: usize,
  rows: &mut Vec<LinkageRow>,
  floor: &mut f64,
) -> Option<Group> {
  let complete = |a: &Group, b: &Group| {
    a.leaves
      .iter()
      .flat_map(|&i| b.leaves.iter().map(move |&j| dist[[i, j]]))
      .fold(0.0_f64, f64::max)
  };

  while groups.len() > 1 {
    let mut best = (f64::INFINITY, 0, 1);
    for i in 0..groups.len() {
      for j in (i + 1)..groups.len() {
        let d = complete(&groups[i], &groups[j]);
        if d < best.0 {
          best = (d, i, j);
        }
      }
    }
    let (h, i, j) = best;
    let right = groups.remove(j);
    let left = groups.remove(i);
    *floor = floor.max(h);
    let id = n + rows.len();
    rows.push(LinkageRow {
      left: left.id.min(right.id),
      right: left.id.max(right.id),
      height: *floor,
      size: left.leaves.len() + right.leaves.len(),
    });
    let mut leaves = left.leaves;
    leaves.extend(right.leaves);
    groups.insert(i, Group { id, leaves });
  }
  groups.pop()
}

/// Cluster tree of a codependence result under `method`.
pub fn hierarchical_clustering(codep: &Codependence, method: LinkageMethod) -> Result<ClusterTree> {
  debug!(%method, kind = %codep.kind, n = codep.n_assets(), "building cluster tree");
  match method {
    LinkageMethod::Dbht => dbht_linkage(&codep.dist.view(), &codep.similarity().view()),
    _ => linkage(&codep.dist.view(), method),
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  fn points() -> Array2<f64> {
    // 1-D points 0, 1, 5, 6, 20
    let x = [0.0, 1.0, 5.0, 6.0, 20.0_f64];
    Array2::from_shape_fn((5, 5), |(i, j)| (x[i] - x[j]).abs())
  }

  #[test]
  fn single_linkage_heights() {
    let tree = linkage(&points().view(), LinkageMethod::Single).unwrap();
    let heights: Vec<f64> = tree.rows().iter().map(|r| r.height).collect();
    assert_eq!(heights, vec![1.0, 1.0, 4.0, 14.0]);
    assert_eq!(tree.rows()[0].left, 0);
    assert_eq!(tree.rows()[0].right, 1);
    assert_eq!(tree.rows()[2].size, 4);
  }

  #[test]
  fn complete_and_average_top_merge() {
    let complete = linkage(&points().view(), LinkageMethod::Complete).unwrap();
    assert_abs_diff_eq!(complete.rows()[3].height, 20.0);
    let average = linkage(&points().view(), LinkageMethod::Average).unwrap();
    // mean of 20, 19, 15, 14
    assert_abs_diff_eq!(average.rows()[3].height, 17.0);
  }

  #[test]
  fn ward_on_pairs_matches_hand_computation() {
    let tree = linkage(&points().view(), LinkageMethod::Ward).unwrap();
    // sqrt(2 n1 n2 / (n1 + n2)) |c1 - c2| with centroids 0.5 and 5.5
    assert_abs_diff_eq!(tree.rows()[2].height, 50.0_f64.sqrt(), epsilon = 1e-12);
  }

  #[test]
  fn every_method_yields_a_valid_tree() {
    let d = points();
    for m in ["single", "complete", "average", "weighted", "centroid", "median", "ward"] {
      let tree = linkage(&d.view(), m.parse().unwrap()).unwrap();
      let mut order = tree.leaves_order();
      order.sort_unstable();
      assert_eq!(order, vec![0, 1, 2, 3, 4], "{m}");
    }
  }

  #[test]
  fn rejects_asymmetric_distance() {
    let d = array![[0.0, 1.0], [2.0, 0.0]];
    assert!(linkage(&d.view(), LinkageMethod::Single).is_err());
  }

  #[test]
  fn merge_groups_is_monotone() {
    let d = points();
    let mut rows = Vec::new();
    let mut floor = 0.0;
    let groups = (0..5).map(|i| Group { id: i, leaves: vec![i] }).collect();
    let root = merge_groups(groups, &d, 5, &mut rows, &mut floor).unwrap();
    assert_eq!(root.id, 8);
    assert_eq!(rows.len(), 4);
    assert!(rows.windows(2).all(|w| w[1].height >= w[0].height));
  }
}
