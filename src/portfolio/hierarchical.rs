//! # Hierarchical allocation
//!
//! $$
//! \alpha_L=1-\frac{\rho(L)}{\rho(L)+\rho(R)},\qquad
//! \mathbf w_L\leftarrow\alpha_L\,\mathbf w_L,\quad \mathbf w_R\leftarrow(1-\alpha_L)\,\mathbf w_R
//! $$
//!
//! HRP bisects the seriated leaf order, HERC and HERC2 split the dendrogram
//! top down into `k` clusters, NCO optimizes inside and then across
//! clusters. Allocation is long only with unit budget.

use std::collections::BTreeSet;

use ndarray::Array1;
use ndarray::Array2;
use ndarray::Axis;
use tracing::debug;

use super::optimizers::optimization;
use super::optimizers::outcome;
use super::request::OptimizationInputs;
use super::request::OptimizationRequest;
use super::solver::SolveOutcome;
use super::solver::SolverChain;
use crate::cluster::codependence;
use crate::cluster::hierarchical_clustering;
use crate::cluster::optimal_k;
use crate::cluster::ClusterTree;
use crate::cluster::Codependence;
use crate::cluster::CodependenceKind;
use crate::cluster::LinkageMethod;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::risk::series_risk;
use crate::types::check_len;
use crate::types::HcModel;
use crate::types::Objective;
use crate::types::RiskMeasure;
use crate::types::RiskParams;

/// Risk used to split weight between clusters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HcRisk {
  /// Every split is even.
  Equal,
  /// `MV` stands for variance here.
  Measure(RiskMeasure),
}

impl Default for HcRisk {
  fn default() -> Self {
    HcRisk::Measure(RiskMeasure::MV)
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HierarchicalConfig {
  pub model: HcModel,
  pub codependence: CodependenceKind,
  pub linkage: LinkageMethod,
  pub risk: HcRisk,
  pub params: RiskParams,
  pub rf: f64,
  /// Upper limit for the gap statistic.
  pub max_k: usize,
  /// Fixed number of clusters, overrides the gap statistic.
  pub k: Option<usize>,
  pub w_max: Option<Array1<f64>>,
  pub w_min: Option<Array1<f64>>,
  /// Objective of both NCO stages.
  pub nco_obj: Objective,
}

impl Default for HierarchicalConfig {
  fn default() -> Self {
    Self {
      model: HcModel::Hrp,
      codependence: CodependenceKind::Pearson,
      linkage: LinkageMethod::Single,
      risk: HcRisk::default(),
      params: RiskParams::default(),
      rf: 0.0,
      max_k: 10,
      k: None,
      w_max: None,
      w_min: None,
      nco_obj: Objective::MinRisk,
    }
  }
}

/// Per-asset bounds, defaulting to `[0, 1]`.
struct Bounds {
  lo: Array1<f64>,
  hi: Array1<f64>,
}

impl Bounds {
  fn new(cfg: &HierarchicalConfig, n: usize) -> Result<Self> {
    let lo = cfg.w_min.clone().unwrap_or_else(|| Array1::zeros(n));
    let hi = cfg.w_max.clone().unwrap_or_else(|| Array1::ones(n));
    check_len("minimum weights", n, lo.len())?;
    check_len("maximum weights", n, hi.len())?;
    if lo.iter().zip(hi.iter()).any(|(l, h)| !(l.is_finite() && h.is_finite()) || *l < 0.0 || l > h) {
      return Err(PortfolioError::invalid("weight bounds must satisfy 0 <= w_min <= w_max"));
    }
    if lo.sum() > 1.0 + 1e-12 || hi.sum() < 1.0 - 1e-12 {
      return Err(PortfolioError::invalid("weight bounds cannot hold a fully invested portfolio"));
    }
    Ok(Self { lo, hi })
  }

  fn sum_lo(&self, idx: &[usize]) -> f64 {
    idx.iter().map(|&i| self.lo[i]).sum()
  }

  fn sum_hi(&self, idx: &[usize]) -> f64 {
    idx.iter().map(|&i| self.hi[i]).sum()
  }

  /// Mass of `left` after splitting `mass` between `left` and `right`,
  /// kept inside what both sides can still absorb.
  fn clamp_split(&self, proposal: f64, mass: f64, left: &[usize], right: &[usize]) -> f64 {
    let lo = self.sum_lo(left).max(mass - self.sum_hi(right));
    let hi = self.sum_hi(left).min(mass - self.sum_lo(right));
    proposal.min(hi).max(lo)
  }

  /// Clip to the bounds and move the excess onto assets with room left.
  fn clip(&self, w: &mut Array1<f64>) {
    for _ in 0..=w.len() {
      w.zip_mut_with(&self.lo, |v, l| *v = v.max(*l));
      w.zip_mut_with(&self.hi, |v, h| *v = v.min(*h));
      let gap = 1.0 - w.sum();
      if gap.abs() < 1e-12 {
        return;
      }
      let room: Vec<(usize, f64)> = (0..w.len())
        .map(|i| (i, if gap > 0.0 { self.hi[i] - w[i] } else { w[i] - self.lo[i] }))
        .filter(|(_, r)| *r > 1e-15)
        .collect();
      let total: f64 = room.iter().map(|(_, r)| r).sum();
      if total <= 0.0 {
        return;
      }
      for (i, r) in room {
        w[i] += gap * r / total;
      }
    }
  }
}

/// Asset-level data shared by the allocation rules.
struct HcData<'a, 'b> {
  inputs: &'a OptimizationInputs<'b>,
  risk: HcRisk,
  params: &'a RiskParams,
}

impl HcData<'_, '_> {
  /// Inverse-risk weights inside `idx`; equal when any risk vanishes.
  fn naive_weights(&self, idx: &[usize]) -> Array1<f64> {
    let equal = Array1::from_elem(idx.len(), 1.0 / idx.len() as f64);
    let rm = match self.risk {
      HcRisk::Equal => return equal,
      HcRisk::Measure(rm) => rm,
    };
    let risks: Array1<f64> = idx
      .iter()
      .map(|&i| match rm {
        RiskMeasure::MV => self.inputs.cov[[i, i]],
        _ => series_risk(&self.inputs.returns.column(i).to_vec(), rm, self.params),
      })
      .collect();
    if risks.iter().any(|r| !(r.is_finite() && *r > 1e-15)) {
      return equal;
    }
    let inv = risks.mapv(|r| 1.0 / r);
    let total = inv.sum();
    inv / total
  }

  /// Risk of the naive portfolio on `idx`.
  fn cluster_risk(&self, idx: &[usize]) -> f64 {
    let rm = match self.risk {
      HcRisk::Equal => return 1.0,
      HcRisk::Measure(rm) => rm,
    };
    let w = self.naive_weights(idx);
    match rm {
      RiskMeasure::MV => {
        let sub = self.inputs.cov.select(Axis(0), idx).select(Axis(1), idx);
        w.dot(&sub.dot(&w)).max(0.0)
      }
      _ => {
        let x = self.inputs.returns.select(Axis(1), idx).dot(&w);
        series_risk(&x.to_vec(), rm, self.params)
      }
    }
  }
}

fn split_alpha(risk_left: f64, risk_right: f64) -> f64 {
  let denom = risk_left + risk_right;
  if denom > 1e-30 {
    1.0 - risk_left / denom
  } else {
    0.5
  }
}

fn hrp_recursive_bisect(order: &[usize], mass: f64, data: &HcData, bounds: &Bounds, weights: &mut Array1<f64>) {
  if order.len() == 1 {
    weights[order[0]] = mass;
    return;
  }
  let mid = order.len() / 2;
  let (left, right) = order.split_at(mid);
  let alpha = match data.risk {
    HcRisk::Equal => 0.5,
    HcRisk::Measure(_) => split_alpha(data.cluster_risk(left), data.cluster_risk(right)),
  };
  let left_mass = bounds.clamp_split(alpha * mass, mass, left, right);
  hrp_recursive_bisect(left, left_mass, data, bounds, weights);
  hrp_recursive_bisect(right, mass - left_mass, data, bounds, weights);
}

fn hrp(tree: &ClusterTree, data: &HcData, bounds: &Bounds) -> Array1<f64> {
  let order = tree.leaves_order();
  let mut weights = Array1::zeros(order.len());
  hrp_recursive_bisect(&order, 1.0, data, bounds, &mut weights);
  weights
}

/// Top-down splits down to the `k` cluster roots, then intra weights.
fn herc(tree: &ClusterTree, k: usize, equal_intra: bool, data: &HcData, bounds: &Bounds) -> Array1<f64> {
  let roots: BTreeSet<usize> = tree.cut_nodes(k).into_iter().collect();
  let cluster_risk: Vec<(usize, f64)> = roots
    .iter()
    .map(|&node| (node, data.cluster_risk(&tree.members(node))))
    .collect();
  let side = |node: usize| -> (usize, f64) {
    let members: BTreeSet<usize> = tree.members(node).into_iter().collect();
    cluster_risk
      .iter()
      .filter(|(root, _)| tree.members(*root).iter().all(|leaf| members.contains(leaf)))
      .fold((0, 0.0), |(count, risk), (_, r)| (count + 1, risk + r))
  };

  let n = tree.n_leaves();
  let mut weights = Array1::<f64>::zeros(n);
  let mut stack = vec![(tree.root(), 1.0)];
  while let Some((node, mass)) = stack.pop() {
    if roots.contains(&node) {
      let members = tree.members(node);
      let intra = if equal_intra {
        Array1::from_elem(members.len(), 1.0 / members.len() as f64)
      } else {
        data.naive_weights(&members)
      };
      for (&i, v) in members.iter().zip(intra.iter()) {
        weights[i] = mass * v;
      }
      continue;
    }
    let Some((l, r)) = tree.children(node) else {
      continue;
    };
    let (count_l, risk_l) = side(l);
    let (count_r, risk_r) = side(r);
    let alpha = match data.risk {
      HcRisk::Equal => count_l as f64 / (count_l + count_r) as f64,
      HcRisk::Measure(_) => split_alpha(risk_l, risk_r),
    };
    stack.push((l, alpha * mass));
    stack.push((r, (1.0 - alpha) * mass));
  }
  bounds.clip(&mut weights);
  weights
}

/// Intra-cluster optimization, then optimization across the cluster
/// portfolios.
fn nco(
  inputs: &OptimizationInputs,
  clusters: &[Vec<usize>],
  cfg: &HierarchicalConfig,
  chain: &SolverChain,
) -> Result<SolveOutcome> {
  let rm = match cfg.risk {
    HcRisk::Measure(rm) => rm,
    HcRisk::Equal => return Err(PortfolioError::UnsupportedMethod("NCO needs a risk measure".into())),
  };
  let req = OptimizationRequest::new(rm, cfg.nco_obj)
    .with_rf(cfg.rf)
    .with_params(cfg.params);
  let n = inputs.n_assets();
  let mut intra = Array2::<f64>::zeros((n, clusters.len()));

  for (c, idx) in clusters.iter().enumerate() {
    let assets: Vec<String> = idx.iter().map(|&i| inputs.assets[i].clone()).collect();
    let mu = inputs.mu.select(Axis(0), idx);
    let cov = inputs.cov.select(Axis(0), idx).select(Axis(1), idx);
    let returns = inputs.returns.select(Axis(1), idx);
    let sub = OptimizationInputs {
      assets: &assets,
      mu: mu.view(),
      cov: cov.view(),
      returns: returns.view(),
    };
    match optimization(&sub, &req, chain)? {
      SolveOutcome::Solved(w) => {
        for (&i, v) in idx.iter().zip(w.values().iter()) {
          intra[[i, c]] = *v;
        }
      }
      infeasible => return Ok(infeasible),
    }
  }

  let names: Vec<String> = (0..clusters.len()).map(|c| format!("cluster_{c}")).collect();
  let mu = intra.t().dot(&inputs.mu);
  let cov = intra.t().dot(&inputs.cov).dot(&intra);
  let returns = inputs.returns.dot(&intra);
  let outer = OptimizationInputs {
    assets: &names,
    mu: mu.view(),
    cov: cov.view(),
    returns: returns.view(),
  };
  match optimization(&outer, &req, chain)? {
    SolveOutcome::Solved(v) => outcome(inputs.assets, Ok(intra.dot(v.values()))),
    infeasible => Ok(infeasible),
  }
}

/// Hierarchical allocation of `inputs` under `cfg`.
///
/// `clusters` reuses a precomputed codependence and tree; otherwise both are
/// built from the returns with the configured kind and linkage.
pub fn hc_optimization(
  inputs: &OptimizationInputs,
  clusters: Option<(&Codependence, &ClusterTree)>,
  cfg: &HierarchicalConfig,
  chain: &SolverChain,
) -> Result<SolveOutcome> {
  inputs.validate()?;
  cfg.params.validate()?;
  if cfg.max_k == 0 {
    return Err(PortfolioError::invalid("max_k must be positive"));
  }
  let n = inputs.n_assets();
  let bounds = Bounds::new(cfg, n)?;
  if n == 1 {
    return outcome(inputs.assets, Ok(Array1::ones(1)));
  }

  let owned;
  let (codep, tree) = match clusters {
    Some((codep, tree)) => {
      check_len("cluster tree leaves", n, tree.n_leaves())?;
      (codep, tree)
    }
    None => {
      let codep = codependence(&inputs.returns, cfg.codependence)?;
      let tree = hierarchical_clustering(&codep, cfg.linkage)?;
      owned = (codep, tree);
      (&owned.0, &owned.1)
    }
  };
  let k = match cfg.k {
    Some(k) => k.clamp(1, n),
    None => optimal_k(&codep.dist.view(), tree, cfg.max_k),
  };
  debug!(model = %cfg.model, k, "hierarchical allocation");

  let data = HcData {
    inputs,
    risk: cfg.risk,
    params: &cfg.params,
  };
  let weights = match cfg.model {
    HcModel::Hrp => hrp(tree, &data, &bounds),
    HcModel::Herc => herc(tree, k, false, &data, &bounds),
    HcModel::Herc2 => herc(tree, k, true, &data, &bounds),
    HcModel::Nco => return nco(inputs, &tree.clusters(k), cfg, chain),
  };
  outcome(inputs.assets, Ok(weights))
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;
  use crate::stats::moments::sample_covariance;

  struct Fixture {
    assets: Vec<String>,
    mu: Array1<f64>,
    cov: Array2<f64>,
    returns: Array2<f64>,
  }

  impl Fixture {
    fn new(n: usize) -> Self {
      let returns = Array2::from_shape_fn((200, n), |(t, j)| {
        let tf = t as f64;
        let block = (j % 2) as f64;
        0.0005 * (j as f64 + 1.0)
          + 0.01 * (1.0 + 0.2 * j as f64) * (tf * (0.3 + 0.5 * block)).sin()
          + 0.003 * (tf * (0.7 + 0.09 * j as f64)).cos()
      });
      Self {
        assets: (0..n).map(|i| format!("A{i}")).collect(),
        mu: returns.mean_axis(Axis(0)).unwrap(),
        cov: sample_covariance(&returns.view()).unwrap(),
        returns,
      }
    }

    fn inputs(&self) -> OptimizationInputs<'_> {
      OptimizationInputs {
        assets: &self.assets,
        mu: self.mu.view(),
        cov: self.cov.view(),
        returns: self.returns.view(),
      }
    }
  }

  fn weights(outcome: SolveOutcome) -> Array1<f64> {
    outcome.into_weights().unwrap().into_values()
  }

  #[test]
  fn every_model_is_fully_invested() {
    let fx = Fixture::new(6);
    let chain = SolverChain::default();
    for model in [HcModel::Hrp, HcModel::Herc, HcModel::Herc2, HcModel::Nco] {
      for risk in [HcRisk::Measure(RiskMeasure::MV), HcRisk::Measure(RiskMeasure::CVaR)] {
        let cfg = HierarchicalConfig {
          model,
          risk,
          k: Some(2),
          ..HierarchicalConfig::default()
        };
        let w = weights(hc_optimization(&fx.inputs(), None, &cfg, &chain).unwrap());
        assert_abs_diff_eq!(w.sum(), 1.0, epsilon = 1e-6);
        assert!(w.iter().all(|v| *v >= -1e-9), "{model} {w}");
      }
    }
  }

  #[test]
  fn hrp_respects_bounds() {
    let fx = Fixture::new(5);
    let cfg = HierarchicalConfig {
      w_max: Some(Array1::from_elem(5, 0.25)),
      w_min: Some(Array1::from_elem(5, 0.1)),
      ..HierarchicalConfig::default()
    };
    let w = weights(hc_optimization(&fx.inputs(), None, &cfg, &SolverChain::default()).unwrap());
    assert_abs_diff_eq!(w.sum(), 1.0, epsilon = 1e-9);
    assert!(w.iter().all(|v| *v <= 0.25 + 1e-9 && *v >= 0.1 - 1e-9));
  }

  #[test]
  fn herc_clip_redistributes() {
    let fx = Fixture::new(4);
    let cfg = HierarchicalConfig {
      model: HcModel::Herc,
      k: Some(2),
      w_max: Some(Array1::from_elem(4, 0.3)),
      ..HierarchicalConfig::default()
    };
    let w = weights(hc_optimization(&fx.inputs(), None, &cfg, &SolverChain::default()).unwrap());
    assert_abs_diff_eq!(w.sum(), 1.0, epsilon = 1e-9);
    assert!(w.iter().all(|v| *v <= 0.3 + 1e-9));
  }

  #[test]
  fn equal_risk_splits_evenly() {
    let fx = Fixture::new(4);
    let cfg = HierarchicalConfig {
      risk: HcRisk::Equal,
      ..HierarchicalConfig::default()
    };
    let w = weights(hc_optimization(&fx.inputs(), None, &cfg, &SolverChain::default()).unwrap());
    for v in w.iter() {
      assert_abs_diff_eq!(*v, 0.25, epsilon = 1e-12);
    }
  }

  #[test]
  fn infeasible_bounds_are_rejected() {
    let fx = Fixture::new(3);
    let cfg = HierarchicalConfig {
      w_max: Some(Array1::from_elem(3, 0.2)),
      ..HierarchicalConfig::default()
    };
    assert!(hc_optimization(&fx.inputs(), None, &cfg, &SolverChain::default()).is_err());
  }
}
