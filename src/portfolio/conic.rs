//! # Conic problems
//!
//! $$
//! \min_x\ c^\top x\quad\text{s.t.}\quad A x + b \in \mathcal K_1\times\dots\times\mathcal K_m
//! $$
//!
//! Backend-neutral description of a linear-objective conic program. Rows are
//! affine expressions in the decision variables, grouped into cone blocks in
//! insertion order.

use std::ops::Range;

/// `Σ c_i x_i + constant`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Affine {
  pub terms: Vec<(usize, f64)>,
  pub constant: f64,
}

impl Affine {
  pub fn constant(c: f64) -> Self {
    Self {
      terms: Vec::new(),
      constant: c,
    }
  }

  pub fn var(i: usize) -> Self {
    Self::term(i, 1.0)
  }

  pub fn term(i: usize, c: f64) -> Self {
    Self {
      terms: vec![(i, c)],
      constant: 0.0,
    }
  }

  /// `Σ coeffs_j x_{vars_j}`.
  pub fn linear(vars: &[usize], coeffs: impl IntoIterator<Item = f64>) -> Self {
    Self {
      terms: vars.iter().copied().zip(coeffs).filter(|(_, c)| *c != 0.0).collect(),
      constant: 0.0,
    }
  }

  pub fn sum(vars: &[usize]) -> Self {
    Self::linear(vars, std::iter::repeat(1.0))
  }

  pub fn add(mut self, other: &Affine) -> Self {
    self.terms.extend_from_slice(&other.terms);
    self.constant += other.constant;
    self
  }

  pub fn sub(self, other: &Affine) -> Self {
    self.add(&other.scale(-1.0))
  }

  pub fn add_term(mut self, i: usize, c: f64) -> Self {
    self.terms.push((i, c));
    self
  }

  pub fn add_constant(mut self, c: f64) -> Self {
    self.constant += c;
    self
  }

  pub fn scale(&self, a: f64) -> Self {
    Self {
      terms: self.terms.iter().map(|&(i, c)| (i, c * a)).collect(),
      constant: self.constant * a,
    }
  }

  pub fn neg(&self) -> Self {
    self.scale(-1.0)
  }

  /// Merge repeated variables and drop zero coefficients.
  pub fn compact(mut self) -> Self {
    self.terms.sort_by_key(|&(i, _)| i);
    let mut merged: Vec<(usize, f64)> = Vec::with_capacity(self.terms.len());
    for (i, c) in self.terms {
      match merged.last_mut() {
        Some((j, acc)) if *j == i => *acc += c,
        _ => merged.push((i, c)),
      }
    }
    merged.retain(|&(_, c)| c != 0.0);
    self.terms = merged;
    self
  }

  pub fn eval(&self, x: &[f64]) -> f64 {
    self.constant + self.terms.iter().map(|&(i, c)| c * x[i]).sum::<f64>()
  }
}

/// Cone of a constraint block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cone {
  /// Rows equal to zero.
  Zero(usize),
  /// Rows non-negative.
  Nonnegative(usize),
  /// `s_0 ≥ ‖s_{1..}‖₂`.
  SecondOrder(usize),
  /// `y e^{x/y} ≤ z` on `(x, y, z)`.
  Exponential,
}

impl Cone {
  pub fn dim(self) -> usize {
    match self {
      Cone::Zero(d) | Cone::Nonnegative(d) | Cone::SecondOrder(d) => d,
      Cone::Exponential => 3,
    }
  }
}

#[derive(Clone, Debug, Default)]
pub struct ConicProblem {
  n_vars: usize,
  objective: Vec<(usize, f64)>,
  rows: Vec<Affine>,
  cones: Vec<Cone>,
}

impl ConicProblem {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn n_vars(&self) -> usize {
    self.n_vars
  }

  pub fn n_rows(&self) -> usize {
    self.rows.len()
  }

  pub fn rows(&self) -> &[Affine] {
    &self.rows
  }

  pub fn cones(&self) -> &[Cone] {
    &self.cones
  }

  /// Dense objective vector `c`.
  pub fn objective(&self) -> Vec<f64> {
    let mut c = vec![0.0; self.n_vars];
    for &(i, v) in &self.objective {
      c[i] += v;
    }
    c
  }

  pub fn add_var(&mut self) -> usize {
    self.n_vars += 1;
    self.n_vars - 1
  }

  pub fn add_vars(&mut self, k: usize) -> Vec<usize> {
    let r: Range<usize> = self.n_vars..self.n_vars + k;
    self.n_vars += k;
    r.collect()
  }

  pub fn minimize(&mut self, expr: &Affine) {
    self.objective = expr.terms.clone();
  }

  pub fn maximize(&mut self, expr: &Affine) {
    self.objective = expr.neg().terms;
  }

  fn push_block(&mut self, cone: Cone, rows: impl IntoIterator<Item = Affine>) {
    let start = self.rows.len();
    self.rows.extend(rows.into_iter().map(Affine::compact));
    let added = self.rows.len() - start;
    match (cone, self.cones.last_mut()) {
      (Cone::Zero(_), Some(Cone::Zero(d))) => *d += added,
      (Cone::Nonnegative(_), Some(Cone::Nonnegative(d))) => *d += added,
      (Cone::Zero(_), _) => self.cones.push(Cone::Zero(added)),
      (Cone::Nonnegative(_), _) => self.cones.push(Cone::Nonnegative(added)),
      (Cone::SecondOrder(_), _) => self.cones.push(Cone::SecondOrder(added)),
      (Cone::Exponential, _) => self.cones.push(Cone::Exponential),
    }
  }

  /// `expr = 0`.
  pub fn eq(&mut self, expr: Affine) {
    self.push_block(Cone::Zero(1), [expr]);
  }

  /// `lhs = rhs`.
  pub fn eq2(&mut self, lhs: Affine, rhs: &Affine) {
    self.eq(lhs.sub(rhs));
  }

  /// `expr ≥ 0`.
  pub fn nonneg(&mut self, expr: Affine) {
    self.push_block(Cone::Nonnegative(1), [expr]);
  }

  /// `lhs ≥ rhs`.
  pub fn geq(&mut self, lhs: Affine, rhs: &Affine) {
    self.nonneg(lhs.sub(rhs));
  }

  /// `lhs ≤ rhs`.
  pub fn leq(&mut self, lhs: Affine, rhs: &Affine) {
    self.nonneg(rhs.clone().sub(&lhs));
  }

  /// `head ≥ ‖tail‖₂`.
  pub fn soc(&mut self, head: Affine, tail: Vec<Affine>) {
    let dim = tail.len() + 1;
    self.push_block(Cone::SecondOrder(dim), std::iter::once(head).chain(tail));
  }

  /// `u v ≥ ‖z‖₂²` with `u, v ≥ 0`.
  pub fn rotated_soc(&mut self, u: Affine, v: Affine, z: Vec<Affine>) {
    let head = u.clone().add(&v);
    let mut tail = vec![u.sub(&v)];
    tail.extend(z.into_iter().map(|e| e.scale(2.0)));
    self.soc(head, tail);
  }

  /// `y exp(x / y) ≤ z`.
  pub fn exp_cone(&mut self, x: Affine, y: Affine, z: Affine) {
    self.push_block(Cone::Exponential, [x, y, z]);
  }

  /// Largest violation of any constraint at `x`.
  pub fn max_violation(&self, x: &[f64]) -> f64 {
    let mut worst = 0.0_f64;
    let mut row = 0;
    for cone in &self.cones {
      let vals: Vec<f64> = self.rows[row..row + cone.dim()].iter().map(|r| r.eval(x)).collect();
      let v = match cone {
        Cone::Zero(_) => vals.iter().fold(0.0_f64, |m, v| m.max(v.abs())),
        Cone::Nonnegative(_) => vals.iter().fold(0.0_f64, |m, v| m.max(-v)),
        Cone::SecondOrder(_) => {
          let norm = vals[1..].iter().map(|v| v * v).sum::<f64>().sqrt();
          (norm - vals[0]).max(0.0)
        }
        Cone::Exponential => {
          let (a, b, c) = (vals[0], vals[1], vals[2]);
          if b > 0.0 {
            (b * (a / b).exp() - c).max(0.0)
          } else {
            a.max(0.0) + (-c).max(0.0)
          }
        }
      };
      worst = worst.max(v);
      row += cone.dim();
    }
    worst
  }
}
