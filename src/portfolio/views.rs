//! # View tables
//!
//! $$
//! P\mu = Q
//! $$
//!
//! Absolute and relative return views on assets, classes or factors, as the
//! `(P, Q)` pairs consumed by the Black-Litterman estimators.

use impl_new_derive::ImplNew;
use ndarray::Array1;
use ndarray::Array2;

use super::constraints::AssetClasses;
use super::constraints::Position;
use super::constraints::Sign;
use crate::error::PortfolioError;
use crate::error::Result;

#[derive(Clone, Debug, PartialEq, ImplNew)]
pub struct ViewRow {
  pub disabled: bool,
  /// Asset or equally weighted class the view is about.
  pub target: Position,
  pub sign: Sign,
  /// Expected (excess) return of the view.
  pub value: f64,
  /// Outperformance over this asset or class.
  pub relative: Option<Position>,
}

#[derive(Clone, Debug, PartialEq, ImplNew)]
pub struct FactorViewRow {
  pub disabled: bool,
  pub factor: String,
  pub sign: Sign,
  pub value: f64,
  pub relative: Option<String>,
}

fn pick(pos: &Position, classes: &AssetClasses) -> Result<Array1<f64>> {
  let n = classes.n_assets();
  let mut v = Array1::<f64>::zeros(n);
  match pos {
    Position::Asset(a) => v[classes.asset_index(a)?] = 1.0,
    Position::Class { set, class } => {
      let idx = classes.members(set, class)?;
      let share = 1.0 / idx.len() as f64;
      for i in idx {
        v[i] = share;
      }
    }
  }
  Ok(v)
}

fn stack(rows: Vec<Array1<f64>>, q: Vec<f64>, n: usize) -> Result<(Array2<f64>, Array1<f64>)> {
  if rows.is_empty() {
    return Err(PortfolioError::invalid("no enabled views"));
  }
  let mut p = Array2::<f64>::zeros((rows.len(), n));
  for (i, r) in rows.iter().enumerate() {
    p.row_mut(i).assign(r);
  }
  Ok((p, Array1::from(q)))
}

/// `(P, Q)` for asset and class views.
pub fn assets_views(rows: &[ViewRow], classes: &AssetClasses) -> Result<(Array2<f64>, Array1<f64>)> {
  let mut p = Vec::new();
  let mut q = Vec::new();
  for row in rows.iter().filter(|r| !r.disabled) {
    let mut v = pick(&row.target, classes)?;
    if let Some(rel) = &row.relative {
      v = v - pick(rel, classes)?;
    }
    let s = if row.sign == Sign::Geq { 1.0 } else { -1.0 };
    p.push(v * s);
    q.push(row.value * s);
  }
  stack(p, q, classes.n_assets())
}

/// `(P_f, Q_f)` for factor views.
pub fn factors_views(rows: &[FactorViewRow], factors: &[String]) -> Result<(Array2<f64>, Array1<f64>)> {
  let k = factors.len();
  let index = |name: &str| {
    factors
      .iter()
      .position(|f| f == name)
      .ok_or_else(|| PortfolioError::invalid(format!("unknown factor {name}")))
  };
  let mut p = Vec::new();
  let mut q = Vec::new();
  for row in rows.iter().filter(|r| !r.disabled) {
    let mut v = Array1::<f64>::zeros(k);
    v[index(&row.factor)?] = 1.0;
    if let Some(rel) = &row.relative {
      v[index(rel)?] -= 1.0;
    }
    let s = if row.sign == Sign::Geq { 1.0 } else { -1.0 };
    p.push(v * s);
    q.push(row.value * s);
  }
  stack(p, q, k)
}
