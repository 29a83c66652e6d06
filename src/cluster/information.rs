//! Histogram estimators of entropy, mutual information and variation of
//! information between two return series.

use ndarray::Array2;
use ndarray::ArrayView1;

use crate::stats::gaussian_kde::percentile;

/// Rule for the number of histogram bins.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BinsMethod {
  /// Freedman-Diaconis width `2·IQR·T^{-1/3}`.
  Fd,
  /// Scott width `3.5·σ·T^{-1/3}`.
  Scott,
  /// Hacine-Gharbi & Ravier optimal count, correlation aware for pairs.
  #[default]
  Hgr,
  Fixed(usize),
}

fn sorted(x: &ArrayView1<f64>) -> Vec<f64> {
  let mut v = x.to_vec();
  v.sort_by(|a, b| a.total_cmp(b));
  v
}

fn bins_from_width(x: &ArrayView1<f64>, width: f64) -> usize {
  let (lo, hi) = x
    .iter()
    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
  if width > 0.0 && hi > lo {
    ((hi - lo) / width).ceil().max(1.0) as usize
  } else {
    1
  }
}

fn marginal_bins(x: &ArrayView1<f64>, method: BinsMethod) -> usize {
  let t = x.len() as f64;
  match method {
    BinsMethod::Fd => {
      let s = sorted(x);
      let iqr = percentile(&s, 0.75) - percentile(&s, 0.25);
      bins_from_width(x, 2.0 * iqr * t.powf(-1.0 / 3.0))
    }
    BinsMethod::Scott => {
      let std = x.std(1.0);
      bins_from_width(x, 3.5 * std * t.powf(-1.0 / 3.0))
    }
    BinsMethod::Hgr => {
      let z = (8.0 + 324.0 * t + 12.0 * (36.0 * t + 729.0 * t * t).sqrt()).cbrt();
      (z / 6.0 + 2.0 / (3.0 * z) + 1.0 / 3.0).round().max(1.0) as usize
    }
    BinsMethod::Fixed(b) => b.max(1),
  }
}

/// Number of bins of the joint histogram of `x` and `y`.
pub fn number_bins(x: &ArrayView1<f64>, y: Option<&ArrayView1<f64>>, method: BinsMethod) -> usize {
  let Some(y) = y else {
    return marginal_bins(x, method);
  };
  match method {
    BinsMethod::Hgr => {
      let t = x.len() as f64;
      let rho = pearson(x, y).clamp(-0.999_999, 0.999_999);
      let b = (1.0 / 2.0_f64.sqrt()) * (1.0 + (1.0 + 24.0 * t / (1.0 - rho * rho)).sqrt()).sqrt();
      b.round().max(1.0) as usize
    }
    _ => marginal_bins(x, method).max(marginal_bins(y, method)),
  }
}

fn pearson(x: &ArrayView1<f64>, y: &ArrayView1<f64>) -> f64 {
  let mx = x.mean().unwrap_or(0.0);
  let my = y.mean().unwrap_or(0.0);
  let mut sxy = 0.0;
  let mut sxx = 0.0;
  let mut syy = 0.0;
  for (a, b) in x.iter().zip(y.iter()) {
    sxy += (a - mx) * (b - my);
    sxx += (a - mx) * (a - mx);
    syy += (b - my) * (b - my);
  }
  if sxx > 0.0 && syy > 0.0 {
    sxy / (sxx * syy).sqrt()
  } else {
    0.0
  }
}

fn bin_index(v: f64, lo: f64, hi: f64, bins: usize) -> usize {
  if hi <= lo {
    return 0;
  }
  let pos = ((v - lo) / (hi - lo) * bins as f64).floor() as isize;
  pos.clamp(0, bins as isize - 1) as usize
}

/// Joint histogram with equal-width bins; the last bin is closed.
pub fn histogram2d(x: &ArrayView1<f64>, y: &ArrayView1<f64>, bins: usize) -> Array2<f64> {
  let range = |s: &ArrayView1<f64>| {
    s.iter()
      .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
  };
  let (xl, xh) = range(x);
  let (yl, yh) = range(y);
  let mut counts = Array2::<f64>::zeros((bins, bins));
  for (&a, &b) in x.iter().zip(y.iter()) {
    counts[[bin_index(a, xl, xh, bins), bin_index(b, yl, yh, bins)]] += 1.0;
  }
  counts
}

fn entropy(counts: impl Iterator<Item = f64>, total: f64) -> f64 {
  counts
    .filter(|&c| c > 0.0)
    .map(|c| {
      let p = c / total;
      -p * p.ln()
    })
    .sum()
}

/// Marginal entropies, joint entropy and mutual information (nats).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InformationPair {
  pub h_x: f64,
  pub h_y: f64,
  pub h_xy: f64,
  pub mutual_info: f64,
}

impl InformationPair {
  /// `I(X;Y) / min(H(X), H(Y))`.
  pub fn normalized_mutual_info(&self) -> f64 {
    let denom = self.h_x.min(self.h_y);
    if denom > 0.0 {
      (self.mutual_info / denom).clamp(0.0, 1.0)
    } else {
      0.0
    }
  }

  /// `(H(X) + H(Y) - 2 I(X;Y)) / H(X, Y)`.
  pub fn normalized_variation_info(&self) -> f64 {
    if self.h_xy > 0.0 {
      ((self.h_x + self.h_y - 2.0 * self.mutual_info) / self.h_xy).clamp(0.0, 1.0)
    } else {
      0.0
    }
  }
}

pub fn information_pair(x: &ArrayView1<f64>, y: &ArrayView1<f64>, method: BinsMethod) -> InformationPair {
  let bins = number_bins(x, Some(y), method);
  let joint = histogram2d(x, y, bins);
  let total = joint.sum();
  let h_x = entropy(joint.rows().into_iter().map(|r| r.sum()), total);
  let h_y = entropy(joint.columns().into_iter().map(|c| c.sum()), total);
  let h_xy = entropy(joint.iter().copied(), total);
  InformationPair {
    h_x,
    h_y,
    h_xy,
    mutual_info: (h_x + h_y - h_xy).max(0.0),
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::Array1;

  use super::*;

  #[test]
  fn hgr_marginal_bins_for_252_obs() {
    let x = Array1::linspace(0.0, 1.0, 252);
    // z = (8 + 324T + 12 sqrt(36T + 729T²))^(1/3), round(z/6 + 2/(3z) + 1/3)
    assert_eq!(number_bins(&x.view(), None, BinsMethod::Hgr), 9);
  }

  #[test]
  fn identical_series_have_zero_variation() {
    let x = Array1::from_iter((0..200).map(|i| ((i * 37) % 101) as f64 / 101.0));
    let info = information_pair(&x.view(), &x.view(), BinsMethod::Fixed(10));
    assert_abs_diff_eq!(info.normalized_mutual_info(), 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(info.normalized_variation_info(), 0.0, epsilon = 1e-12);
  }

  #[test]
  fn histogram_counts_everything() {
    let x = Array1::linspace(-1.0, 1.0, 50);
    let y = x.mapv(|v| v * v);
    let h = histogram2d(&x.view(), &y.view(), 7);
    assert_eq!(h.sum(), 50.0);
  }
}
