//! Binary dendrogram in the usual linkage-matrix layout.
//!
//! Leaves are `0..n`, the cluster formed at merge step `s` has id `n + s`.

use crate::error::PortfolioError;
use crate::error::Result;

/// One merge of the linkage matrix, `left < right`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinkageRow {
  pub left: usize,
  pub right: usize,
  pub height: f64,
  pub size: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClusterTree {
  n: usize,
  rows: Vec<LinkageRow>,
}

impl ClusterTree {
  /// Validate and wrap `n - 1` merge rows over `n` leaves.
  pub fn new(n: usize, rows: Vec<LinkageRow>) -> Result<Self> {
    if n == 0 {
      return Err(PortfolioError::invalid("cluster tree needs at least one leaf"));
    }
    if rows.len() != n - 1 {
      return Err(PortfolioError::mismatch("linkage rows", n - 1, rows.len()));
    }
    let mut used = vec![false; 2 * n - 1];
    for (step, row) in rows.iter().enumerate() {
      let node = n + step;
      for child in [row.left, row.right] {
        if child >= node || used[child] {
          return Err(PortfolioError::invalid(format!("linkage row {step} reuses or forward-references node {child}")));
        }
        used[child] = true;
      }
    }
    Ok(Self { n, rows })
  }

  /// Single-leaf tree.
  pub fn singleton() -> Self {
    Self { n: 1, rows: Vec::new() }
  }

  pub fn n_leaves(&self) -> usize {
    self.n
  }

  pub fn rows(&self) -> &[LinkageRow] {
    &self.rows
  }

  pub fn root(&self) -> usize {
    2 * self.n - 2
  }

  pub fn is_leaf(&self, node: usize) -> bool {
    node < self.n
  }

  pub fn children(&self, node: usize) -> Option<(usize, usize)> {
    if node < self.n {
      return None;
    }
    self.rows.get(node - self.n).map(|r| (r.left, r.right))
  }

  pub fn height(&self, node: usize) -> f64 {
    if node < self.n {
      0.0
    } else {
      self.rows.get(node - self.n).map_or(0.0, |r| r.height)
    }
  }

  /// Leaves below `node`, left subtree first.
  pub fn members(&self, node: usize) -> Vec<usize> {
    let mut out = Vec::new();
    let mut stack = vec![node];
    while let Some(cur) = stack.pop() {
      match self.children(cur) {
        Some((l, r)) => {
          stack.push(r);
          stack.push(l);
        }
        None => out.push(cur),
      }
    }
    out
  }

  /// Pre-order leaf sequence (the seriation).
  pub fn leaves_order(&self) -> Vec<usize> {
    self.members(self.root())
  }

  /// Roots of the `k` clusters left after undoing the last `k - 1` merges,
  /// in leaf order.
  pub fn cut_nodes(&self, k: usize) -> Vec<usize> {
    let k = k.clamp(1, self.n);
    let mut nodes = vec![self.root()];
    while nodes.len() < k {
      let Some((pos, _)) = nodes
        .iter()
        .enumerate()
        .filter(|(_, node)| !self.is_leaf(**node))
        .max_by_key(|(_, node)| **node)
      else {
        break;
      };
      let node = nodes[pos];
      if let Some((l, r)) = self.children(node) {
        nodes.splice(pos..=pos, [l, r]);
      }
    }
    nodes
  }

  /// Members of each of the `k` clusters, clusters in leaf order.
  pub fn clusters(&self, k: usize) -> Vec<Vec<usize>> {
    self.cut_nodes(k).into_iter().map(|node| self.members(node)).collect()
  }

  /// Flat labels per leaf, numbered by first appearance in the leaf order.
  pub fn cut(&self, k: usize) -> Vec<usize> {
    let mut labels = vec![0; self.n];
    for (label, members) in self.clusters(k).into_iter().enumerate() {
      for leaf in members {
        labels[leaf] = label;
      }
    }
    labels
  }

  /// Heights never decrease along merge order.
  pub fn is_monotonic(&self) -> bool {
    self.rows.windows(2).all(|w| w[1].height >= w[0].height)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  // ((0, 3), (1, 2)) merged at 4 and 5, root 6
  fn sample() -> ClusterTree {
    ClusterTree::new(
      4,
      vec![
        LinkageRow {
          left: 0,
          right: 3,
          height: 0.1,
          size: 2,
        },
        LinkageRow {
          left: 1,
          right: 2,
          height: 0.2,
          size: 2,
        },
        LinkageRow {
          left: 4,
          right: 5,
          height: 0.7,
          size: 4,
        },
      ],
    )
    .unwrap()
  }

  #[test]
  fn leaves_follow_left_first_preorder() {
    assert_eq!(sample().leaves_order(), vec![0, 3, 1, 2]);
  }

  #[test]
  fn cut_undoes_latest_merges() {
    let tree = sample();
    assert_eq!(tree.cut(1), vec![0, 0, 0, 0]);
    assert_eq!(tree.cut(2), vec![0, 1, 1, 0]);
    assert_eq!(tree.clusters(3), vec![vec![0, 3], vec![1], vec![2]]);
    assert_eq!(tree.cut(4), vec![0, 2, 3, 1]);
  }

  #[test]
  fn rejects_reused_child() {
    let rows = vec![
      LinkageRow {
        left: 0,
        right: 1,
        height: 0.1,
        size: 2,
      },
      LinkageRow {
        left: 0,
        right: 2,
        height: 0.2,
        size: 2,
      },
    ];
    assert!(ClusterTree::new(3, rows).is_err());
  }

  #[test]
  fn singleton_is_its_own_root() {
    let t = ClusterTree::singleton();
    assert_eq!(t.root(), 0);
    assert_eq!(t.leaves_order(), vec![0]);
    assert_eq!(t.cut(3), vec![0]);
  }
}
