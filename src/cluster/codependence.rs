//! # Codependence
//!
//! $$
//! D_{ij}=\sqrt{\tfrac12(1-\rho_{ij})},\qquad
//! D^{abs}_{ij}=\sqrt{1-|\rho_{ij}|},\qquad
//! D^{tail}_{ij}=-\ln\lambda_{ij}
//! $$
//!
//! Pairwise codependence between asset return series and the matching
//! distance used by the linkage step.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use tracing::debug;

use super::information::information_pair;
use super::information::BinsMethod;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::linalg::cov2corr;
use crate::stats::gerber::gerber_correlation;
use crate::stats::gerber::GerberVariant;
use crate::stats::moments::sample_covariance;
use crate::stats::moments::validate_table;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CodependenceKind {
  Pearson,
  Spearman,
  Kendall,
  AbsPearson,
  AbsSpearman,
  AbsKendall,
  Gerber1 { threshold: f64 },
  Gerber2 { threshold: f64 },
  DistanceCorrelation,
  MutualInformation { bins: BinsMethod },
  /// Lower tail dependence at quantile `alpha`.
  TailDependence { alpha: f64 },
}

impl Default for CodependenceKind {
  fn default() -> Self {
    CodependenceKind::Pearson
  }
}

impl CodependenceKind {
  /// Kinds whose codependence is a signed correlation in `[-1, 1]`.
  pub fn is_signed_correlation(self) -> bool {
    matches!(
      self,
      CodependenceKind::Pearson
        | CodependenceKind::Spearman
        | CodependenceKind::Kendall
        | CodependenceKind::Gerber1 { .. }
        | CodependenceKind::Gerber2 { .. }
    )
  }

  pub fn name(self) -> &'static str {
    match self {
      CodependenceKind::Pearson => "pearson",
      CodependenceKind::Spearman => "spearman",
      CodependenceKind::Kendall => "kendall",
      CodependenceKind::AbsPearson => "abs_pearson",
      CodependenceKind::AbsSpearman => "abs_spearman",
      CodependenceKind::AbsKendall => "abs_kendall",
      CodependenceKind::Gerber1 { .. } => "gerber1",
      CodependenceKind::Gerber2 { .. } => "gerber2",
      CodependenceKind::DistanceCorrelation => "distance",
      CodependenceKind::MutualInformation { .. } => "mutual_info",
      CodependenceKind::TailDependence { .. } => "tail",
    }
  }
}

impl fmt::Display for CodependenceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for CodependenceKind {
  type Err = PortfolioError;

  fn from_str(s: &str) -> Result<Self> {
    let kind = match s.trim().to_lowercase().replace('-', "_").as_str() {
      "pearson" => CodependenceKind::Pearson,
      "spearman" => CodependenceKind::Spearman,
      "kendall" => CodependenceKind::Kendall,
      "abs_pearson" => CodependenceKind::AbsPearson,
      "abs_spearman" => CodependenceKind::AbsSpearman,
      "abs_kendall" => CodependenceKind::AbsKendall,
      "gerber1" => CodependenceKind::Gerber1 { threshold: 0.5 },
      "gerber2" => CodependenceKind::Gerber2 { threshold: 0.5 },
      "distance" | "distance_correlation" => CodependenceKind::DistanceCorrelation,
      "mutual_info" | "mutual_information" => CodependenceKind::MutualInformation {
        bins: BinsMethod::default(),
      },
      "tail" | "tail_dependence" => CodependenceKind::TailDependence { alpha: 0.05 },
      _ => return Err(PortfolioError::UnsupportedMethod(s.to_string())),
    };
    Ok(kind)
  }
}

/// Codependence matrix together with the distance derived from it.
#[derive(Clone, Debug, PartialEq)]
pub struct Codependence {
  pub kind: CodependenceKind,
  pub codep: Array2<f64>,
  pub dist: Array2<f64>,
}

impl Codependence {
  pub fn n_assets(&self) -> usize {
    self.codep.nrows()
  }

  /// Similarity fed to the planar filtered graph.
  pub fn similarity(&self) -> Array2<f64> {
    if self.kind.is_signed_correlation() {
      self.dist.mapv(|d| 2.0 - d * d)
    } else {
      self.codep.clone()
    }
  }
}

fn correlation_distance(rho: f64) -> f64 {
  (0.5 * (1.0 - rho)).clamp(0.0, 1.0).sqrt()
}

fn abs_correlation_distance(rho: f64) -> f64 {
  (1.0 - rho.abs()).clamp(0.0, 1.0).sqrt()
}

fn pearson_matrix(x: &ArrayView2<f64>) -> Result<Array2<f64>> {
  let cov = sample_covariance(x)?;
  Ok(cov2corr(&cov.view()).0)
}

/// Average ranks, ties share the mean of their positions (1-based).
fn average_ranks(x: &ArrayView1<f64>) -> Vec<f64> {
  let n = x.len();
  let mut order: Vec<usize> = (0..n).collect();
  order.sort_by_key(|&i| OrderedFloat(x[i]));
  let mut ranks = vec![0.0; n];
  let mut start = 0;
  while start < n {
    let mut end = start;
    while end + 1 < n && x[order[end + 1]] == x[order[start]] {
      end += 1;
    }
    let rank = (start + end) as f64 / 2.0 + 1.0;
    for &i in &order[start..=end] {
      ranks[i] = rank;
    }
    start = end + 1;
  }
  ranks
}

fn spearman_matrix(x: &ArrayView2<f64>) -> Result<Array2<f64>> {
  let (t, n) = x.dim();
  let mut ranked = Array2::<f64>::zeros((t, n));
  for j in 0..n {
    for (r, v) in average_ranks(&x.column(j)).into_iter().enumerate() {
      ranked[[r, j]] = v;
    }
  }
  pearson_matrix(&ranked.view())
}

fn kendall_tau(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> f64 {
  kendalls::tau_b_with_comparator(&a.to_vec(), &b.to_vec(), |u: &f64, v: &f64| {
    u.partial_cmp(v).unwrap_or(Ordering::Greater)
  })
  .map(|(tau, ..)| if tau.is_finite() { tau } else { 0.0 })
  .unwrap_or(0.0)
}

/// Fill a symmetric matrix with unit diagonal from a pairwise function.
fn pairwise<F>(n: usize, f: F) -> Array2<f64>
where
  F: Fn(usize, usize) -> f64 + Sync,
{
  let pairs: Vec<(usize, usize)> = (0..n).flat_map(|i| ((i + 1)..n).map(move |j| (i, j))).collect();
  let values: Vec<f64> = pairs.par_iter().map(|&(i, j)| f(i, j)).collect();
  let mut out = Array2::<f64>::eye(n);
  for (&(i, j), v) in pairs.iter().zip(values) {
    out[[i, j]] = v;
    out[[j, i]] = v;
  }
  out
}

/// Double-centred pairwise distance matrix of one series.
fn centred_distances(x: &ArrayView1<f64>) -> Array2<f64> {
  let t = x.len();
  let a = Array2::from_shape_fn((t, t), |(i, j)| (x[i] - x[j]).abs());
  let row_means = a.mean_axis(ndarray::Axis(1)).unwrap_or_else(|| ndarray::Array1::zeros(t));
  let grand = row_means.mean().unwrap_or(0.0);
  Array2::from_shape_fn((t, t), |(i, j)| a[[i, j]] - row_means[i] - row_means[j] + grand)
}

fn distance_correlation_matrix(x: &ArrayView2<f64>) -> Array2<f64> {
  let n = x.ncols();
  let centred: Vec<Array2<f64>> = (0..n).into_par_iter().map(|j| centred_distances(&x.column(j))).collect();
  let dvar: Vec<f64> = centred.iter().map(|a| (a * a).mean().unwrap_or(0.0)).collect();
  pairwise(n, |i, j| {
    let dcov = (&centred[i] * &centred[j]).mean().unwrap_or(0.0).max(0.0);
    let denom = (dvar[i] * dvar[j]).sqrt();
    if denom > 0.0 {
      (dcov / denom).sqrt().clamp(0.0, 1.0)
    } else {
      0.0
    }
  })
}

/// Empirical lower tail dependence at quantile `alpha`.
fn lower_tail_dependence(x: &ArrayView2<f64>, alpha: f64) -> Array2<f64> {
  let (t, n) = x.dim();
  let k = ((t as f64 * alpha).ceil() as usize).clamp(1, t);
  let cutoffs: Vec<f64> = (0..n)
    .map(|j| {
      let mut col = x.column(j).to_vec();
      col.sort_by(|a, b| a.total_cmp(b));
      col[k - 1]
    })
    .collect();
  pairwise(n, |i, j| {
    let joint = (0..t)
      .filter(|&r| x[[r, i]] <= cutoffs[i] && x[[r, j]] <= cutoffs[j])
      .count();
    (joint as f64 / k as f64).min(1.0)
  })
}

/// Codependence matrix of the columns of `x` and its distance.
pub fn codependence(x: &ArrayView2<f64>, kind: CodependenceKind) -> Result<Codependence> {
  validate_table(x, 2)?;
  let (t, n) = x.dim();
  debug!(%kind, n, "computing codependence");

  let (codep, dist) = match kind {
    CodependenceKind::Pearson | CodependenceKind::AbsPearson => {
      let c = pearson_matrix(x)?;
      (c, None)
    }
    CodependenceKind::Spearman | CodependenceKind::AbsSpearman => (spearman_matrix(x)?, None),
    CodependenceKind::Kendall | CodependenceKind::AbsKendall => {
      (pairwise(n, |i, j| kendall_tau(&x.column(i), &x.column(j))), None)
    }
    CodependenceKind::Gerber1 { threshold } => (gerber_correlation(x, threshold, GerberVariant::One)?.0, None),
    CodependenceKind::Gerber2 { threshold } => (gerber_correlation(x, threshold, GerberVariant::Two)?.0, None),
    CodependenceKind::DistanceCorrelation => {
      let c = distance_correlation_matrix(x);
      let d = c.mapv(|v| (1.0 - v).max(0.0).sqrt());
      (c, Some(d))
    }
    CodependenceKind::MutualInformation { bins } => {
      let infos: Vec<((usize, usize), (f64, f64))> = (0..n)
        .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(|(i, j)| {
          let info = information_pair(&x.column(i), &x.column(j), bins);
          ((i, j), (info.normalized_mutual_info(), info.normalized_variation_info()))
        })
        .collect();
      let mut c = Array2::<f64>::eye(n);
      let mut d = Array2::<f64>::zeros((n, n));
      for ((i, j), (mi, vi)) in infos {
        c[[i, j]] = mi;
        c[[j, i]] = mi;
        d[[i, j]] = vi;
        d[[j, i]] = vi;
      }
      (c, Some(d))
    }
    CodependenceKind::TailDependence { alpha } => {
      if !(alpha > 0.0 && alpha < 1.0) {
        return Err(PortfolioError::invalid(format!("tail quantile {alpha} outside (0, 1)")));
      }
      let c = lower_tail_dependence(x, alpha);
      // no joint exceedance counts as half of one to keep the distance finite
      let floor = 0.5 / ((t as f64 * alpha).ceil().max(1.0));
      let d = c.mapv(|l| -(l.max(floor)).ln());
      (c, Some(d))
    }
  };

  let mut dist = dist.unwrap_or_else(|| match kind {
    CodependenceKind::AbsPearson | CodependenceKind::AbsSpearman | CodependenceKind::AbsKendall => {
      codep.mapv(abs_correlation_distance)
    }
    _ => codep.mapv(correlation_distance),
  });
  let codep = match kind {
    CodependenceKind::AbsPearson | CodependenceKind::AbsSpearman | CodependenceKind::AbsKendall => {
      codep.mapv(f64::abs)
    }
    _ => codep,
  };
  for i in 0..n {
    dist[[i, i]] = 0.0;
  }

  Ok(Codependence { kind, codep, dist })
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;
  use rand::rngs::StdRng;
  use rand::Rng;
  use rand::SeedableRng;
  use rand_distr::StandardNormal;

  use super::*;

  fn sample(t: usize, n: usize) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(11);
    let mut x = Array2::<f64>::zeros((t, n));
    for r in 0..t {
      let m: f64 = rng.sample(StandardNormal);
      for c in 0..n {
        let e: f64 = rng.sample(StandardNormal);
        x[[r, c]] = 0.01 * (if c < n / 2 { m } else { -m } + e);
      }
    }
    x
  }

  #[test]
  fn distances_are_symmetric_with_zero_diagonal() {
    let x = sample(120, 6);
    for kind in [
      "pearson",
      "spearman",
      "kendall",
      "abs_pearson",
      "abs_spearman",
      "abs_kendall",
      "gerber1",
      "gerber2",
      "distance",
      "mutual_info",
      "tail",
    ] {
      let kind: CodependenceKind = kind.parse().unwrap();
      let c = codependence(&x.view(), kind).unwrap();
      for i in 0..6 {
        assert_eq!(c.dist[[i, i]], 0.0, "{kind}");
        for j in 0..6 {
          assert_eq!(c.dist[[i, j]], c.dist[[j, i]], "{kind}");
          assert!(c.dist[[i, j]] >= 0.0 && c.dist[[i, j]].is_finite(), "{kind}");
        }
      }
    }
  }

  #[test]
  fn opposite_blocks_are_far_apart() {
    let x = sample(200, 4);
    let c = codependence(&x.view(), CodependenceKind::Pearson).unwrap();
    assert!(c.dist[[0, 1]] < c.dist[[0, 3]]);
    let a = codependence(&x.view(), CodependenceKind::AbsPearson).unwrap();
    // sign is ignored so the anti-correlated block becomes close
    assert!(a.dist[[0, 3]] < c.dist[[0, 3]]);
  }

  #[test]
  fn ranks_average_ties() {
    let x = array![3.0, 1.0, 3.0, 2.0];
    assert_eq!(average_ranks(&x.view()), vec![3.5, 1.0, 3.5, 2.0]);
  }

  #[test]
  fn perfect_dependence() {
    let x = Array2::from_shape_fn((50, 2), |(r, c)| (r as f64).sin() * if c == 0 { 1.0 } else { 2.0 });
    let k = codependence(&x.view(), CodependenceKind::Kendall).unwrap();
    assert_abs_diff_eq!(k.codep[[0, 1]], 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(k.dist[[0, 1]], 0.0, epsilon = 1e-7);
    let d = codependence(&x.view(), CodependenceKind::DistanceCorrelation).unwrap();
    assert_abs_diff_eq!(d.codep[[0, 1]], 1.0, epsilon = 1e-10);
  }

  #[test]
  fn tail_dependence_of_identical_series_is_one() {
    let x = sample(100, 1);
    let both = ndarray::concatenate![ndarray::Axis(1), x.view(), x.view()];
    let c = codependence(&both.view(), CodependenceKind::TailDependence { alpha: 0.1 }).unwrap();
    assert_abs_diff_eq!(c.codep[[0, 1]], 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(c.dist[[0, 1]], 0.0, epsilon = 1e-12);
  }
}
