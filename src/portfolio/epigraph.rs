//! # Risk epigraphs
//!
//! $$
//! \rho(\mathbf w)\le r \iff (\mathbf w, r, \text{aux}) \in \mathcal K
//! $$
//!
//! Every optimizable measure is written as a conic epigraph over the weight
//! variables. Constants are multiplied by `scale`, so the constraints stay
//! homogeneous under the Sharpe change of variables.

use ndarray::Array2;
use ndarray::ArrayView2;
use ndarray::Axis;

use super::conic::Affine;
use super::conic::ConicProblem;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::linalg::sqrtm_psd;
use crate::risk::owa_cvrg;
use crate::risk::owa_rg;
use crate::risk::owa_tg;
use crate::risk::owa_tgrg;
use crate::types::RiskMeasure;
use crate::types::RiskParams;

/// Scenario and covariance inputs of an epigraph.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RiskData<'a, 'p> {
  pub returns: ArrayView2<'a, f64>,
  pub cov: ArrayView2<'a, f64>,
  pub params: &'p RiskParams,
}

/// `Σ_j m_ij w_j` for every row `i` of `m`.
pub(crate) fn matrix_rows(m: &ArrayView2<f64>, w: &[usize]) -> Vec<Affine> {
  m.rows().into_iter().map(|row| Affine::linear(w, row.iter().copied())).collect()
}

/// Portfolio returns as auxiliary variables tied to `Y w`.
fn series_vars(p: &mut ConicProblem, w: &[usize], returns: &ArrayView2<f64>) -> Vec<usize> {
  let x = p.add_vars(returns.nrows());
  for (xt, row) in x.iter().zip(matrix_rows(returns, w)) {
    p.eq2(Affine::var(*xt), &row);
  }
  x
}

fn centered(returns: &ArrayView2<f64>) -> Array2<f64> {
  let mean = returns.mean_axis(Axis(0)).unwrap_or_else(|| ndarray::Array1::zeros(returns.ncols()));
  returns.to_owned() - &mean
}

/// Drawdowns `U_t - C_t` for `t = 1..T` on the uncompounded path.
fn drawdown_exprs(p: &mut ConicProblem, w: &[usize], returns: &ArrayView2<f64>) -> Vec<Affine> {
  let x = series_vars(p, w, returns);
  let t = x.len();
  let c = p.add_vars(t);
  let u = p.add_vars(t);
  let mut dd = Vec::with_capacity(t);
  for i in 0..t {
    let prev_c = if i == 0 { Affine::constant(0.0) } else { Affine::var(c[i - 1]) };
    let prev_u = if i == 0 { Affine::constant(0.0) } else { Affine::var(u[i - 1]) };
    p.eq2(Affine::var(c[i]), &prev_c.add(&Affine::var(x[i])));
    p.geq(Affine::var(u[i]), &prev_u);
    p.geq(Affine::var(u[i]), &Affine::var(c[i]));
    dd.push(Affine::var(u[i]).sub(&Affine::var(c[i])));
  }
  dd
}

/// Rockafellar–Uryasev tail mean of `losses`.
fn cvar_of(p: &mut ConicProblem, losses: &[Affine], alpha: f64) -> Affine {
  let v = p.add_var();
  let z = p.add_vars(losses.len());
  for (zt, loss) in z.iter().zip(losses) {
    p.nonneg(Affine::var(*zt));
    p.geq(Affine::var(*zt), &loss.clone().sub(&Affine::var(v)));
  }
  let n = losses.len() as f64;
  Affine::var(v).add(&Affine::sum(&z).scale(1.0 / (alpha * n)))
}

/// `t + z ln(1 / (α n))` with `Σ z exp((loss_t - t) / z) ≤ z`.
fn entropic_of(p: &mut ConicProblem, losses: &[Affine], alpha: f64) -> Affine {
  let t = p.add_var();
  let z = p.add_var();
  let u = p.add_vars(losses.len());
  p.nonneg(Affine::var(z));
  p.leq(Affine::sum(&u), &Affine::var(z));
  for (ut, loss) in u.iter().zip(losses) {
    p.exp_cone(loss.clone().sub(&Affine::var(t)), Affine::var(z), Affine::var(*ut));
  }
  let n = losses.len() as f64;
  Affine::var(t).add_term(z, (1.0 / (alpha * n)).ln())
}

/// Gini mean difference `2 / (T (T - 1)) Σ_{i<j} |x_i - x_j|`, equal to the
/// OWA form with `owa_gmd` weights.
fn gmd_of(p: &mut ConicProblem, x: &[usize]) -> Affine {
  let t = x.len();
  if t < 2 {
    return Affine::constant(0.0);
  }
  let mut d = Vec::with_capacity(t * (t - 1) / 2);
  for i in 0..t {
    for j in i + 1..t {
      let dij = p.add_var();
      let diff = Affine::var(x[i]).sub(&Affine::var(x[j]));
      p.geq(Affine::var(dij), &diff);
      p.geq(Affine::var(dij), &diff.neg());
      d.push(dij);
    }
  }
  let tf = t as f64;
  Affine::sum(&d).scale(2.0 / (tf * (tf - 1.0)))
}

/// Assignment dual of `max_π Σ c_i x_π(i)`.
fn owa_of(p: &mut ConicProblem, x: &[usize], c: &[f64]) -> Affine {
  let t = x.len();
  let a = p.add_vars(t);
  let b = p.add_vars(t);
  for i in 0..t {
    for j in 0..t {
      p.nonneg(Affine::var(a[i]).add_term(b[j], 1.0).add_term(x[j], -c[i]));
    }
  }
  Affine::sum(&a).add(&Affine::sum(&b))
}

/// Add the epigraph of `rm` and return an expression bounding the risk.
pub(crate) fn risk_epigraph(
  p: &mut ConicProblem,
  w: &[usize],
  scale: &Affine,
  rm: RiskMeasure,
  data: &RiskData,
) -> Result<Affine> {
  let returns = &data.returns;
  let t = returns.nrows();
  let tf = t as f64;
  let params = data.params;
  let alpha = params.alpha;

  let risk = match rm {
    RiskMeasure::MV => {
      let g = p.add_var();
      let root = sqrtm_psd(&data.cov);
      p.soc(Affine::var(g), matrix_rows(&root.view(), w));
      Affine::var(g)
    }
    RiskMeasure::MAD => {
      let dev = matrix_rows(&centered(returns).view(), w);
      let a = p.add_vars(t);
      for (at, d) in a.iter().zip(&dev) {
        p.geq(Affine::var(*at), d);
        p.geq(Affine::var(*at), &d.neg());
      }
      Affine::sum(&a).scale(1.0 / tf)
    }
    RiskMeasure::MSV => {
      let dev = matrix_rows(&centered(returns).view(), w);
      let n = p.add_vars(t);
      for (nt, d) in n.iter().zip(&dev) {
        p.nonneg(Affine::var(*nt));
        p.geq(Affine::var(*nt), &d.neg());
      }
      let g = p.add_var();
      p.soc(Affine::term(g, (tf - 1.0).sqrt()), n.iter().map(|&i| Affine::var(i)).collect());
      Affine::var(g)
    }
    RiskMeasure::FLPM | RiskMeasure::SLPM => {
      let x = series_vars(p, w, returns);
      let target = scale.scale(params.target);
      let l = p.add_vars(t);
      for (lt, xt) in l.iter().zip(&x) {
        p.nonneg(Affine::var(*lt));
        p.geq(Affine::var(*lt), &target.clone().add_term(*xt, -1.0));
      }
      if rm == RiskMeasure::FLPM {
        Affine::sum(&l).scale(1.0 / tf)
      } else {
        let g = p.add_var();
        p.soc(Affine::term(g, (tf - 1.0).sqrt()), l.iter().map(|&i| Affine::var(i)).collect());
        Affine::var(g)
      }
    }
    RiskMeasure::CVaR => {
      let x = series_vars(p, w, returns);
      let losses: Vec<Affine> = x.iter().map(|&i| Affine::term(i, -1.0)).collect();
      cvar_of(p, &losses, alpha)
    }
    RiskMeasure::EVaR => {
      let x = series_vars(p, w, returns);
      let losses: Vec<Affine> = x.iter().map(|&i| Affine::term(i, -1.0)).collect();
      entropic_of(p, &losses, alpha)
    }
    RiskMeasure::WR => {
      let x = series_vars(p, w, returns);
      let m = p.add_var();
      for &xt in &x {
        p.nonneg(Affine::var(m).add_term(xt, 1.0));
      }
      Affine::var(m)
    }
    RiskMeasure::GMD => {
      let x = series_vars(p, w, returns);
      gmd_of(p, &x)
    }
    RiskMeasure::TG | RiskMeasure::RG | RiskMeasure::CVRG | RiskMeasure::TGRG => {
      let c = match rm {
        RiskMeasure::TG => owa_tg(t, alpha, params.a_sim),
        RiskMeasure::RG => owa_rg(t),
        RiskMeasure::CVRG => owa_cvrg(t, alpha, params.beta()),
        _ => owa_tgrg(t, alpha, params.a_sim, params.beta(), params.b_sim()),
      };
      let x = series_vars(p, w, returns);
      owa_of(p, &x, &c.to_vec())
    }
    RiskMeasure::MDD => {
      let dd = drawdown_exprs(p, w, returns);
      let m = p.add_var();
      for d in &dd {
        p.geq(Affine::var(m), d);
      }
      Affine::var(m)
    }
    RiskMeasure::ADD => {
      let dd = drawdown_exprs(p, w, returns);
      dd.iter().fold(Affine::constant(0.0), |acc, d| acc.add(d)).scale(1.0 / tf)
    }
    RiskMeasure::CDaR | RiskMeasure::EDaR => {
      let mut losses = vec![Affine::constant(0.0)];
      losses.extend(drawdown_exprs(p, w, returns));
      if rm == RiskMeasure::CDaR {
        cvar_of(p, &losses, alpha)
      } else {
        entropic_of(p, &losses, alpha)
      }
    }
    RiskMeasure::UCI => {
      let dd = drawdown_exprs(p, w, returns);
      let g = p.add_var();
      p.soc(Affine::term(g, tf.sqrt()), dd);
      Affine::var(g)
    }
    RiskMeasure::VaR
    | RiskMeasure::DaR
    | RiskMeasure::MDDRel
    | RiskMeasure::ADDRel
    | RiskMeasure::DaRRel
    | RiskMeasure::CDaRRel
    | RiskMeasure::EDaRRel
    | RiskMeasure::UCIRel => {
      return Err(PortfolioError::UnsupportedMethod(format!(
        "{} has no convex formulation",
        rm.name()
      )))
    }
  };
  Ok(risk)
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;
  use ndarray::Array1;

  use super::*;
  use crate::portfolio::solver::SolverChain;
  use crate::risk::portfolio_risk;
  use crate::stats::moments::sample_covariance;

  fn returns() -> Array2<f64> {
    Array2::from_shape_fn((40, 2), |(t, j)| {
      0.002 * (j as f64 + 1.0) + 0.01 * ((t * (2 * j + 3)) as f64 * 0.53).sin()
    })
  }

  /// Fix `w`, minimize the epigraph and compare with the closed-form value.
  fn epigraph_value(rm: RiskMeasure, w: &[f64]) -> (f64, f64) {
    let r = returns();
    let cov = sample_covariance(&r.view()).unwrap();
    let params = RiskParams {
      alpha: 0.1,
      a_sim: 5,
      ..Default::default()
    };
    let data = RiskData {
      returns: r.view(),
      cov: cov.view(),
      params: &params,
    };
    let mut p = ConicProblem::new();
    let vars = p.add_vars(w.len());
    for (v, &wi) in vars.iter().zip(w) {
      p.eq(Affine::var(*v).add_constant(-wi));
    }
    let risk = risk_epigraph(&mut p, &vars, &Affine::constant(1.0), rm, &data).unwrap();
    p.minimize(&risk);
    let x = SolverChain::default().solve(&p).unwrap();
    let wv = Array1::from(w.to_vec());
    let exact = portfolio_risk(&wv.view(), &cov.view(), &r.view(), rm, &params).unwrap();
    (risk.eval(&x), exact)
  }

  #[test]
  fn epigraphs_match_closed_forms() {
    for rm in RiskMeasure::OPTIMIZABLE {
      let (conic, exact) = epigraph_value(rm, &[0.6, 0.4]);
      assert_abs_diff_eq!(conic, exact, epsilon = 1e-4);
    }
  }

  #[test]
  fn reporting_only_measures_are_rejected() {
    let r = returns();
    let cov = array![[1.0, 0.0], [0.0, 1.0]];
    let params = RiskParams::default();
    let data = RiskData {
      returns: r.view(),
      cov: cov.view(),
      params: &params,
    };
    let mut p = ConicProblem::new();
    let w = p.add_vars(2);
    for rm in [RiskMeasure::VaR, RiskMeasure::DaR, RiskMeasure::CDaRRel] {
      assert!(risk_epigraph(&mut p, &w, &Affine::constant(1.0), rm, &data).is_err());
    }
  }
}
