//! # Constraint tables
//!
//! $$
//! A\mathbf w \ge B,\qquad \mathbf w_{min}\le \mathbf w\le \mathbf w_{max}
//! $$
//!
//! Row-based constraint descriptions turned into the linear system used by
//! the convex optimizers and the per-asset bounds used by the hierarchical
//! ones.

use std::collections::BTreeMap;
use std::str::FromStr;

use impl_new_derive::ImplNew;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView2;

use crate::error::PortfolioError;
use crate::error::Result;
use crate::types::check_len;

/// Asset → class label for every named classification.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AssetClasses {
  assets: Vec<String>,
  sets: BTreeMap<String, Vec<String>>,
}

impl AssetClasses {
  pub fn new(assets: Vec<String>) -> Self {
    Self {
      assets,
      sets: BTreeMap::new(),
    }
  }

  /// Add a classification with one label per asset.
  pub fn with_set(mut self, name: impl Into<String>, labels: Vec<String>) -> Result<Self> {
    check_len("class labels", self.assets.len(), labels.len())?;
    self.sets.insert(name.into(), labels);
    Ok(self)
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  pub fn n_assets(&self) -> usize {
    self.assets.len()
  }

  pub fn asset_index(&self, asset: &str) -> Result<usize> {
    self
      .assets
      .iter()
      .position(|a| a == asset)
      .ok_or_else(|| PortfolioError::invalid(format!("unknown asset {asset}")))
  }

  fn labels(&self, set: &str) -> Result<&[String]> {
    self
      .sets
      .get(set)
      .map(Vec::as_slice)
      .ok_or_else(|| PortfolioError::invalid(format!("unknown class set {set}")))
  }

  /// Distinct labels of `set` in order of first appearance.
  pub fn classes(&self, set: &str) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    for label in self.labels(set)? {
      if !out.contains(label) {
        out.push(label.clone());
      }
    }
    Ok(out)
  }

  /// Indices of the assets labelled `class` in `set`.
  pub fn members(&self, set: &str, class: &str) -> Result<Vec<usize>> {
    let idx: Vec<usize> = self
      .labels(set)?
      .iter()
      .enumerate()
      .filter(|(_, l)| l.as_str() == class)
      .map(|(i, _)| i)
      .collect();
    if idx.is_empty() {
      return Err(PortfolioError::invalid(format!("class {class} of {set} has no assets")));
    }
    Ok(idx)
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sign {
  Geq,
  Leq,
}

impl Sign {
  fn factor(self) -> f64 {
    match self {
      Sign::Geq => 1.0,
      Sign::Leq => -1.0,
    }
  }
}

impl FromStr for Sign {
  type Err = PortfolioError;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim() {
      ">=" | "≥" => Ok(Sign::Geq),
      "<=" | "≤" => Ok(Sign::Leq),
      _ => Err(PortfolioError::UnsupportedMethod(s.to_string())),
    }
  }
}

/// An asset or a class of a named set.
#[derive(Clone, Debug, PartialEq)]
pub enum Position {
  Asset(String),
  Class { set: String, class: String },
}

/// Left-hand side of a constraint row.
#[derive(Clone, Debug, PartialEq)]
pub enum ConstraintTarget {
  Asset(String),
  Class { set: String, class: String },
  AllAssets,
  EachAssetInClass { set: String, class: String },
  AllClasses { set: String },
}

/// Right-hand side of a constraint row.
#[derive(Clone, Debug, PartialEq)]
pub enum ConstraintBound {
  Weight(f64),
  /// `factor` times the weight of another asset or class.
  Relative { to: Position, factor: f64 },
}

#[derive(Clone, Debug, PartialEq, ImplNew)]
pub struct ConstraintRow {
  pub disabled: bool,
  pub target: ConstraintTarget,
  pub sign: Sign,
  pub bound: ConstraintBound,
}

#[derive(Clone, Debug, PartialEq, ImplNew)]
pub struct FactorConstraintRow {
  pub disabled: bool,
  pub factor: String,
  pub sign: Sign,
  pub value: f64,
  /// Exposure taken relative to this factor.
  pub relative: Option<String>,
}

fn indicator(n: usize, idx: &[usize]) -> Array1<f64> {
  let mut v = Array1::zeros(n);
  for &i in idx {
    v[i] = 1.0;
  }
  v
}

fn position_vector(pos: &Position, classes: &AssetClasses) -> Result<Array1<f64>> {
  let n = classes.n_assets();
  match pos {
    Position::Asset(a) => Ok(indicator(n, &[classes.asset_index(a)?])),
    Position::Class { set, class } => Ok(indicator(n, &classes.members(set, class)?)),
  }
}

fn target_vectors(target: &ConstraintTarget, classes: &AssetClasses) -> Result<Vec<Array1<f64>>> {
  let n = classes.n_assets();
  match target {
    ConstraintTarget::Asset(a) => Ok(vec![indicator(n, &[classes.asset_index(a)?])]),
    ConstraintTarget::Class { set, class } => Ok(vec![indicator(n, &classes.members(set, class)?)]),
    ConstraintTarget::AllAssets => Ok((0..n).map(|i| indicator(n, &[i])).collect()),
    ConstraintTarget::EachAssetInClass { set, class } => {
      Ok(classes.members(set, class)?.into_iter().map(|i| indicator(n, &[i])).collect())
    }
    ConstraintTarget::AllClasses { set } => classes
      .classes(set)?
      .iter()
      .map(|c| classes.members(set, c).map(|idx| indicator(n, &idx)))
      .collect(),
  }
}

fn stack(rows: Vec<Array1<f64>>, rhs: Vec<f64>, n: usize) -> (Array2<f64>, Array1<f64>) {
  let mut a = Array2::<f64>::zeros((rows.len(), n));
  for (i, r) in rows.iter().enumerate() {
    a.row_mut(i).assign(r);
  }
  (a, Array1::from(rhs))
}

/// `(A, B)` with `A w ≥ B` for the enabled rows.
pub fn assets_constraints(rows: &[ConstraintRow], classes: &AssetClasses) -> Result<(Array2<f64>, Array1<f64>)> {
  let n = classes.n_assets();
  let mut lhs = Vec::new();
  let mut rhs = Vec::new();
  for row in rows.iter().filter(|r| !r.disabled) {
    let s = row.sign.factor();
    for v in target_vectors(&row.target, classes)? {
      match &row.bound {
        ConstraintBound::Weight(b) => {
          lhs.push(v * s);
          rhs.push(b * s);
        }
        ConstraintBound::Relative { to, factor } => {
          let reference = position_vector(to, classes)?;
          lhs.push((v - reference * *factor) * s);
          rhs.push(0.0);
        }
      }
    }
  }
  Ok(stack(lhs, rhs, n))
}

fn factor_index(factors: &[String], name: &str) -> Result<usize> {
  factors
    .iter()
    .position(|f| f == name)
    .ok_or_else(|| PortfolioError::invalid(format!("unknown factor {name}")))
}

/// `(A, B)` bounding factor exposures `B'w` through the `N × K` loadings.
pub fn factor_constraints(
  rows: &[FactorConstraintRow],
  loadings: &ArrayView2<f64>,
  factors: &[String],
) -> Result<(Array2<f64>, Array1<f64>)> {
  check_len("factor names", loadings.ncols(), factors.len())?;
  let n = loadings.nrows();
  let mut lhs = Vec::new();
  let mut rhs = Vec::new();
  for row in rows.iter().filter(|r| !r.disabled) {
    let s = row.sign.factor();
    let mut v = loadings.column(factor_index(factors, &row.factor)?).to_owned();
    if let Some(rel) = &row.relative {
      v = v - loadings.column(factor_index(factors, rel)?);
    }
    lhs.push(v * s);
    rhs.push(row.value * s);
  }
  Ok(stack(lhs, rhs, n))
}

/// Per-asset `(w_max, w_min)` for the hierarchical optimizers.
///
/// Only absolute bounds on assets are meaningful here; the tightest bound
/// wins when rows overlap.
pub fn hrp_constraints(rows: &[ConstraintRow], classes: &AssetClasses) -> Result<(Array1<f64>, Array1<f64>)> {
  let n = classes.n_assets();
  let mut w_max = Array1::<f64>::ones(n);
  let mut w_min = Array1::<f64>::zeros(n);
  for row in rows.iter().filter(|r| !r.disabled) {
    let ConstraintBound::Weight(b) = row.bound else {
      return Err(PortfolioError::invalid("relative bounds are not supported by hierarchical optimizers"));
    };
    let idx: Vec<usize> = match &row.target {
      ConstraintTarget::Asset(a) => vec![classes.asset_index(a)?],
      ConstraintTarget::AllAssets => (0..n).collect(),
      ConstraintTarget::EachAssetInClass { set, class } => classes.members(set, class)?,
      ConstraintTarget::Class { .. } | ConstraintTarget::AllClasses { .. } => {
        return Err(PortfolioError::invalid("class totals are not supported by hierarchical optimizers"))
      }
    };
    for i in idx {
      match row.sign {
        Sign::Geq => w_min[i] = w_min[i].max(b),
        Sign::Leq => w_max[i] = w_max[i].min(b),
      }
    }
  }
  if w_min.iter().zip(w_max.iter()).any(|(lo, hi)| lo > hi) {
    return Err(PortfolioError::invalid("lower bound above upper bound"));
  }
  if w_min.sum() > 1.0 + 1e-12 || w_max.sum() < 1.0 - 1e-12 {
    return Err(PortfolioError::invalid("bounds cannot sum to one"));
  }
  Ok((w_max, w_min))
}
