//! # Directed bubble hierarchy
//!
//! $$
//! \text{bubble } b \to b' \iff \bar S\big(\sigma_{bb'},\,V_{b'}\big) > \bar S\big(\sigma_{bb'},\,V_b\big)
//! $$
//!
//! The 4-cliques of the filtered graph are bubbles, linked by their separating
//! triangles. Each link points toward the side the separator is more strongly
//! attached to. Bubbles with no outgoing link are cluster centres; vertices
//! join the reachable centre they are most similar to. Complete linkage on
//! graph shortest paths then nests bubbles inside clusters inside the root.

use std::collections::BTreeMap;

use ndarray::Array2;
use ndarray::ArrayView2;
use tracing::debug;

use super::linkage::linkage;
use super::linkage::merge_groups;
use super::linkage::validate_distance;
use super::linkage::Group;
use super::linkage::LinkageMethod;
use super::tmfg::tmfg;
use super::tmfg::PlanarGraph;
use super::tree::ClusterTree;
use crate::error::PortfolioError;
use crate::error::Result;

/// Bubble tree with directed links.
struct BubbleTree {
  /// `(child, parent, points_to_parent)` per link.
  links: Vec<(usize, usize, bool)>,
  n_bubbles: usize,
}

impl BubbleTree {
  fn out_neighbours(&self, b: usize) -> Vec<usize> {
    self
      .links
      .iter()
      .filter_map(|&(c, p, up)| match (c == b, p == b, up) {
        (true, _, true) => Some(p),
        (_, true, false) => Some(c),
        _ => None,
      })
      .collect()
  }

  fn converging(&self) -> Vec<usize> {
    (0..self.n_bubbles).filter(|&b| self.out_neighbours(b).is_empty()).collect()
  }

  /// Bubbles reachable from `start` along directed links, `start` included.
  fn reachable(&self, start: usize) -> Vec<usize> {
    let mut seen = vec![false; self.n_bubbles];
    let mut stack = vec![start];
    seen[start] = true;
    while let Some(b) = stack.pop() {
      for next in self.out_neighbours(b) {
        if !seen[next] {
          seen[next] = true;
          stack.push(next);
        }
      }
    }
    (0..self.n_bubbles).filter(|&b| seen[b]).collect()
  }
}

/// Mean similarity over graph edges between `from` and `to`.
fn attachment(g: &PlanarGraph, s: &ArrayView2<f64>, from: &[usize], to: &[usize]) -> f64 {
  let mut total = 0.0;
  let mut count = 0usize;
  for &u in from {
    for &v in to {
      if u != v && g.has_edge(u, v) {
        total += s[[u, v]];
        count += 1;
      }
    }
  }
  if count == 0 {
    0.0
  } else {
    total / count as f64
  }
}

fn side_vertices(g: &PlanarGraph, bubbles: &[usize], separator: &[usize; 3]) -> Vec<usize> {
  let mut out: Vec<usize> = bubbles
    .iter()
    .flat_map(|&b| g.cliques()[b])
    .filter(|v| !separator.contains(v))
    .collect();
  out.sort_unstable();
  out.dedup();
  out
}

fn direct_bubbles(g: &PlanarGraph, s: &ArrayView2<f64>) -> BubbleTree {
  let n_bubbles = g.cliques().len();
  let mut children = vec![Vec::new(); n_bubbles];
  for c in 1..n_bubbles {
    if let Some(p) = g.parent(c) {
      children[p].push(c);
    }
  }
  let subtree = |root: usize| {
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(b) = stack.pop() {
      out.push(b);
      stack.extend(children[b].iter().copied());
    }
    out
  };

  let mut links = Vec::with_capacity(n_bubbles.saturating_sub(1));
  for c in 1..n_bubbles {
    let (Some(p), Some(sep)) = (g.parent(c), g.separator_of(c)) else {
      continue;
    };
    let below = subtree(c);
    let above: Vec<usize> = (0..n_bubbles).filter(|b| !below.contains(b)).collect();
    let to_child = attachment(g, s, &sep, &side_vertices(g, &below, &sep));
    let to_parent = attachment(g, s, &sep, &side_vertices(g, &above, &sep));
    links.push((c, p, to_parent >= to_child));
  }
  BubbleTree { links, n_bubbles }
}

fn mean_similarity(s: &ArrayView2<f64>, v: usize, members: &[usize]) -> f64 {
  let others: Vec<usize> = members.iter().copied().filter(|&u| u != v).collect();
  if others.is_empty() {
    return f64::NEG_INFINITY;
  }
  others.iter().map(|&u| s[[v, u]]).sum::<f64>() / others.len() as f64
}

fn argmax_by(candidates: &[usize], score: impl Fn(usize) -> f64) -> Option<usize> {
  let mut best: Option<(usize, f64)> = None;
  for &c in candidates {
    let v = score(c);
    match best {
      Some((_, b)) if v <= b => {}
      _ => best = Some((c, v)),
    }
  }
  best.map(|(c, _)| c)
}

/// All-pairs shortest paths over graph edges weighted by `dist`.
fn shortest_paths(g: &PlanarGraph, dist: &ArrayView2<f64>) -> Array2<f64> {
  let n = g.n_vertices();
  let mut d = Array2::from_shape_fn((n, n), |(i, j)| {
    if i == j {
      0.0
    } else if g.has_edge(i, j) {
      dist[[i, j]]
    } else {
      f64::INFINITY
    }
  });
  for k in 0..n {
    for i in 0..n {
      let dik = d[[i, k]];
      if !dik.is_finite() {
        continue;
      }
      for j in 0..n {
        let via = dik + d[[k, j]];
        if via < d[[i, j]] {
          d[[i, j]] = via;
        }
      }
    }
  }
  d
}

/// DBHT cluster tree from a distance and a similarity matrix.
///
/// Fewer than four assets cannot carry a planar filtered graph and fall back
/// to complete linkage.
pub fn dbht_linkage(dist: &ArrayView2<f64>, sim: &ArrayView2<f64>) -> Result<ClusterTree> {
  validate_distance(dist)?;
  let n = dist.nrows();
  if sim.dim() != (n, n) {
    return Err(PortfolioError::mismatch("similarity matrix", n, sim.nrows()));
  }
  if n < 4 {
    return linkage(dist, LinkageMethod::Complete);
  }

  let g = tmfg(sim)?;
  let bubbles = direct_bubbles(&g, sim);
  let centres = bubbles.converging();

  let mut containing = vec![Vec::new(); n];
  for (b, clique) in g.cliques().iter().enumerate() {
    for &v in clique {
      containing[v].push(b);
    }
  }

  // vertex -> (centre, home bubble)
  let mut membership: BTreeMap<usize, BTreeMap<usize, Vec<usize>>> = BTreeMap::new();
  for v in 0..n {
    let mut reachable: Vec<usize> = containing[v]
      .iter()
      .flat_map(|&b| bubbles.reachable(b))
      .filter(|b| centres.contains(b))
      .collect();
    reachable.sort_unstable();
    reachable.dedup();
    if reachable.is_empty() {
      reachable = centres.clone();
    }
    let centre = argmax_by(&reachable, |c| mean_similarity(sim, v, &g.cliques()[c]))
      .ok_or_else(|| PortfolioError::Numerical("bubble hierarchy has no converging bubble".into()))?;

    let basin: Vec<usize> = containing[v]
      .iter()
      .copied()
      .filter(|&b| bubbles.reachable(b).contains(&centre))
      .collect();
    let home = argmax_by(&basin, |b| mean_similarity(sim, v, &g.cliques()[b])).unwrap_or(centre);
    membership.entry(centre).or_default().entry(home).or_default().push(v);
  }
  debug!(clusters = membership.len(), bubbles = bubbles.n_bubbles, "directed bubble hierarchy");

  let paths = shortest_paths(&g, dist);
  let mut rows = Vec::with_capacity(n - 1);
  let mut floor = 0.0;
  let mut cluster_groups = Vec::new();
  for homes in membership.into_values() {
    let mut bubble_groups = Vec::new();
    for members in homes.into_values() {
      let leaves = members.into_iter().map(|v| Group { id: v, leaves: vec![v] }).collect();
      if let Some(group) = merge_groups(leaves, &paths, n, &mut rows, &mut floor) {
        bubble_groups.push(group);
      }
    }
    if let Some(group) = merge_groups(bubble_groups, &paths, n, &mut rows, &mut floor) {
      cluster_groups.push(group);
    }
  }
  merge_groups(cluster_groups, &paths, n, &mut rows, &mut floor);

  ClusterTree::new(n, rows)
}

#[cfg(test)]
mod tests {
  use super::*;

  /// Two blocks of strongly related assets with weak cross links.
  fn blocks(n: usize) -> (Array2<f64>, Array2<f64>) {
    let rho = Array2::from_shape_fn((n, n), |(i, j)| {
      if i == j {
        1.0
      } else if (i < n / 2) == (j < n / 2) {
        0.8 - 0.01 * ((i + j) % 5) as f64
      } else {
        0.1 + 0.01 * ((i * j) % 3) as f64
      }
    });
    let dist = rho.mapv(|r| (0.5 * (1.0 - r)).max(0.0).sqrt());
    let sim = dist.mapv(|d| 2.0 - d * d);
    (dist, sim)
  }

  #[test]
  fn produces_complete_monotone_tree() {
    let (dist, sim) = blocks(10);
    let tree = dbht_linkage(&dist.view(), &sim.view()).unwrap();
    assert_eq!(tree.rows().len(), 9);
    assert!(tree.is_monotonic());
    let mut order = tree.leaves_order();
    order.sort_unstable();
    assert_eq!(order, (0..10).collect::<Vec<_>>());
  }

  #[test]
  fn root_covers_every_leaf() {
    let (dist, sim) = blocks(8);
    let tree = dbht_linkage(&dist.view(), &sim.view()).unwrap();
    let root = tree.rows().last().unwrap();
    assert_eq!(root.size, 8);
    assert!(tree.rows().iter().all(|r| r.height >= 0.0 && r.height <= root.height));
  }

  #[test]
  fn small_universe_falls_back_to_complete_linkage() {
    let (dist, sim) = blocks(3);
    let dbht = dbht_linkage(&dist.view(), &sim.view()).unwrap();
    let complete = linkage(&dist.view(), LinkageMethod::Complete).unwrap();
    assert_eq!(dbht, complete);
  }

  #[test]
  fn is_deterministic() {
    let (dist, sim) = blocks(12);
    let a = dbht_linkage(&dist.view(), &sim.view()).unwrap();
    let b = dbht_linkage(&dist.view(), &sim.view()).unwrap();
    assert_eq!(a, b);
  }
}
