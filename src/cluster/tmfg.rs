//! # Triangulated Maximally Filtered Graph
//!
//! $$
//! \max_{G\ \text{planar}} \sum_{(i,j)\in G} S_{ij}
//! $$
//!
//! Greedy construction: start from the tetrahedron of the four most
//! connected vertices and repeatedly insert the vertex/face pair with the
//! largest gain. Every insertion creates one 4-clique and one separating
//! triangle, so the cliques form a tree (the bubble tree) whose edges are
//! the separators.
//!
//! State lives in flat arrays indexed by vertex, face and clique id.

use ndarray::Array2;
use ndarray::ArrayView2;

use crate::error::PortfolioError;
use crate::error::Result;

/// Filtered planar graph with its clique tree.
#[derive(Clone, Debug)]
pub struct PlanarGraph {
  n: usize,
  adjacency: Array2<bool>,
  cliques: Vec<[usize; 4]>,
  separators: Vec<[usize; 3]>,
  /// `parents[c]` is the clique that owned the face `c` was inserted into,
  /// `separators[c - 1]` is the shared triangle. The root clique has none.
  parents: Vec<Option<usize>>,
}

impl PlanarGraph {
  pub fn n_vertices(&self) -> usize {
    self.n
  }

  pub fn adjacency(&self) -> &Array2<bool> {
    &self.adjacency
  }

  pub fn has_edge(&self, i: usize, j: usize) -> bool {
    self.adjacency[[i, j]]
  }

  pub fn neighbours(&self, i: usize) -> impl Iterator<Item = usize> + '_ {
    (0..self.n).filter(move |&j| self.adjacency[[i, j]])
  }

  pub fn n_edges(&self) -> usize {
    self.adjacency.iter().filter(|&&e| e).count() / 2
  }

  pub fn cliques(&self) -> &[[usize; 4]] {
    &self.cliques
  }

  pub fn separators(&self) -> &[[usize; 3]] {
    &self.separators
  }

  pub fn parent(&self, clique: usize) -> Option<usize> {
    self.parents[clique]
  }

  /// Separator shared by `clique` and its parent.
  pub fn separator_of(&self, clique: usize) -> Option<[usize; 3]> {
    clique.checked_sub(1).map(|k| self.separators[k])
  }
}

#[derive(Clone, Copy, Debug)]
struct Face {
  vertices: [usize; 3],
  owner: usize,
  alive: bool,
}

fn face_gain(s: &ArrayView2<f64>, v: usize, face: &Face) -> f64 {
  face.vertices.iter().map(|&u| s[[v, u]]).sum()
}

/// Build the TMFG of a symmetric similarity matrix with at least 4 rows.
pub fn tmfg(s: &ArrayView2<f64>) -> Result<PlanarGraph> {
  let n = s.nrows();
  if s.ncols() != n {
    return Err(PortfolioError::mismatch("tmfg similarity", n, s.ncols()));
  }
  if n < 4 {
    return Err(PortfolioError::invalid(format!(
      "tmfg needs at least 4 vertices, got {n}"
    )));
  }
  if s.iter().any(|v| !v.is_finite()) {
    return Err(PortfolioError::invalid("similarity contains non-finite values"));
  }

  // Seed with the four vertices of largest total above-mean similarity.
  let mean = s.mean().unwrap_or(0.0);
  let mut strength: Vec<(usize, f64)> = (0..n)
    .map(|i| {
      let total: f64 = (0..n)
        .filter(|&j| j != i && s[[i, j]] > mean)
        .map(|j| s[[i, j]])
        .sum();
      (i, total)
    })
    .collect();
  strength.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
  let mut seed = [strength[0].0, strength[1].0, strength[2].0, strength[3].0];
  seed.sort_unstable();

  let mut adjacency = Array2::from_elem((n, n), false);
  for a in 0..4 {
    for b in 0..4 {
      if a != b {
        adjacency[[seed[a], seed[b]]] = true;
      }
    }
  }

  let mut cliques = vec![seed];
  let mut separators = Vec::with_capacity(n - 4);
  let mut parents = vec![None];
  let mut faces: Vec<Face> = vec![
    Face {
      vertices: [seed[0], seed[1], seed[2]],
      owner: 0,
      alive: true,
    },
    Face {
      vertices: [seed[0], seed[1], seed[3]],
      owner: 0,
      alive: true,
    },
    Face {
      vertices: [seed[0], seed[2], seed[3]],
      owner: 0,
      alive: true,
    },
    Face {
      vertices: [seed[1], seed[2], seed[3]],
      owner: 0,
      alive: true,
    },
  ];

  let mut inserted = vec![false; n];
  for &v in &seed {
    inserted[v] = true;
  }

  // Gain table: best face and gain per outstanding vertex.
  let mut best_face = vec![usize::MAX; n];
  let mut best_gain = vec![f64::NEG_INFINITY; n];
  let rescan = |v: usize, faces: &[Face]| -> (usize, f64) {
    let mut best = (usize::MAX, f64::NEG_INFINITY);
    for (f, face) in faces.iter().enumerate() {
      if face.alive {
        let g = face_gain(s, v, face);
        if g > best.1 {
          best = (f, g);
        }
      }
    }
    best
  };
  for v in 0..n {
    if !inserted[v] {
      let (f, g) = rescan(v, &faces);
      best_face[v] = f;
      best_gain[v] = g;
    }
  }

  for _ in 4..n {
    let mut pick = usize::MAX;
    for v in 0..n {
      if !inserted[v] && (pick == usize::MAX || best_gain[v] > best_gain[pick]) {
        pick = v;
      }
    }
    let f = best_face[pick];
    let face = faces[f];
    let [a, b, c] = face.vertices;

    let clique_id = cliques.len();
    let mut clique = [a, b, c, pick];
    clique.sort_unstable();
    cliques.push(clique);
    separators.push(face.vertices);
    parents.push(Some(face.owner));
    inserted[pick] = true;
    for u in face.vertices {
      adjacency[[pick, u]] = true;
      adjacency[[u, pick]] = true;
    }

    faces[f].alive = false;
    let first_new = faces.len();
    for vertices in [[a, b, pick], [b, c, pick], [a, c, pick]] {
      faces.push(Face {
        vertices,
        owner: clique_id,
        alive: true,
      });
    }

    for v in 0..n {
      if inserted[v] {
        continue;
      }
      if best_face[v] == f {
        let (bf, bg) = rescan(v, &faces);
        best_face[v] = bf;
        best_gain[v] = bg;
      } else {
        for nf in first_new..faces.len() {
          let g = face_gain(s, v, &faces[nf]);
          if g > best_gain[v] {
            best_face[v] = nf;
            best_gain[v] = g;
          }
        }
      }
    }
  }

  Ok(PlanarGraph { n, adjacency, cliques, separators, parents })
}

#[cfg(test)]
mod tests {
  use ndarray::Array2;

  use super::*;

  fn block_similarity(n: usize) -> Array2<f64> {
    Array2::from_shape_fn((n, n), |(i, j)| {
      if i == j {
        1.0
      } else if (i < n / 2) == (j < n / 2) {
        0.8 - 0.01 * (i as f64 - j as f64).abs()
      } else {
        0.1
      }
    })
  }

  #[test]
  fn planar_edge_and_clique_counts() {
    let n = 12;
    let g = tmfg(&block_similarity(n).view()).unwrap();
    assert_eq!(g.n_edges(), 3 * n - 6);
    assert_eq!(g.cliques().len(), n - 3);
    assert_eq!(g.separators().len(), n - 4);
    for c in 1..g.cliques().len() {
      let parent = g.parent(c).unwrap();
      assert!(parent < c);
      let sep = g.separator_of(c).unwrap();
      assert!(sep.iter().all(|v| g.cliques()[c].contains(v)));
      assert!(sep.iter().all(|v| g.cliques()[parent].contains(v)));
    }
  }

  #[test]
  fn deterministic() {
    let s = block_similarity(10);
    let a = tmfg(&s.view()).unwrap();
    let b = tmfg(&s.view()).unwrap();
    assert_eq!(a.cliques(), b.cliques());
    assert_eq!(a.adjacency(), b.adjacency());
  }

  #[test]
  fn rejects_small_graphs() {
    assert!(tmfg(&Array2::<f64>::eye(3).view()).is_err());
  }
}
