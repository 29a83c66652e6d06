//! # Session
//!
//! $$
//! \text{returns}\ \to\ (\hat\mu,\hat\Sigma)\ \to\ \{\text{BL},\ \text{FM},\ \text{BL-FM},\ \mathcal U\}\ \to\ \mathbf w
//! $$
//!
//! A returns table together with the estimates derived from it. Mutators
//! recompute one artifact and drop every artifact built on top of it;
//! readers never mutate, so a shared session needs only a `RwLock`.

use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use tracing::debug;

use super::frontier::efficient_frontier;
use super::frontier::frontier_limits;
use super::frontier::FrontierLimits;
use super::frontier::FrontierPoint;
use super::hierarchical::hc_optimization;
use super::hierarchical::HierarchicalConfig;
use super::optimizers::optimization;
use super::relaxed::rrp_optimization;
use super::relaxed::RrpVersion;
use super::request::OptimizationInputs;
use super::request::OptimizationRequest;
use super::risk_parity::rp_optimization;
use super::solver::SolveOutcome;
use super::solver::SolverChain;
use super::worst_case::wc_optimization;
use super::worst_case::WorstCaseRequest;
use crate::cluster::codependence;
use crate::cluster::hierarchical_clustering;
use crate::cluster::optimal_k;
use crate::cluster::ClusterTree;
use crate::cluster::Codependence;
use crate::cluster::CodependenceKind;
use crate::cluster::LinkageMethod;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::linalg::repair_covariance;
use crate::linalg::PsdRepair;
use crate::risk::portfolio_risk;
use crate::risk::risk_contribution;
use crate::stats::augmented_black_litterman;
use crate::stats::bayesian_black_litterman;
use crate::stats::black_litterman;
use crate::stats::black_litterman::BlackLittermanConfig;
use crate::stats::black_litterman::BlackLittermanEstimate;
use crate::stats::black_litterman::FactorInputs;
use crate::stats::covariance_matrix;
use crate::stats::factors::FactorConfig;
use crate::stats::factors::FactorModel;
use crate::stats::mean_vector;
use crate::stats::moments::sample_covariance;
use crate::stats::risk_factors;
use crate::stats::uncertainty::UncertaintySets;
use crate::stats::uncertainty::WorstCaseConfig;
use crate::stats::worst_case_stats;
use crate::stats::CovMethod;
use crate::stats::CovarianceConfig;
use crate::stats::MeanMethod;
use crate::types::check_len;
use crate::types::Model;
use crate::types::PortfolioWeights;
use crate::types::ReturnsMatrix;
use crate::types::RiskMeasure;
use crate::types::RiskParams;

#[derive(Clone, Debug)]
pub struct SessionConfig {
  pub solvers: SolverChain,
  /// Repair applied to every covariance estimate.
  pub repair: PsdRepair,
  /// Levels used by [`Session::risk_report`].
  pub params: RiskParams,
  pub covariance: CovarianceConfig,
  /// Upper limit for the gap statistic.
  pub max_k: usize,
}

impl Default for SessionConfig {
  fn default() -> Self {
    Self {
      solvers: SolverChain::default(),
      repair: PsdRepair::Clipped,
      params: RiskParams::default(),
      covariance: CovarianceConfig::default(),
      max_k: 10,
    }
  }
}

/// Views fed to the Black-Litterman factor estimators.
#[derive(Clone, Debug, PartialEq)]
pub enum FactorViews {
  /// Augmented model with asset views, factor views or both.
  Augmented {
    assets: Option<(Array2<f64>, Array1<f64>)>,
    factors: Option<(Array2<f64>, Array1<f64>)>,
  },
  /// Bayesian model with factor views.
  Bayesian { p: Array2<f64>, q: Array1<f64> },
}

#[derive(Clone, Debug)]
struct FactorState {
  names: Vec<String>,
  factors: Array2<f64>,
  model: FactorModel,
  cfg: FactorConfig,
}

#[derive(Clone, Debug)]
struct ClusterState {
  codep: Codependence,
  linkage: LinkageMethod,
  tree: ClusterTree,
  k: usize,
}

/// Realized statistics of a weight vector.
#[derive(Clone, Debug, PartialEq)]
pub struct RiskReport {
  pub rm: RiskMeasure,
  pub risk: f64,
  pub ret: f64,
  /// Per-asset risk contributions, summing to `risk`.
  pub contributions: Array1<f64>,
}

#[derive(Clone, Debug)]
pub struct Session {
  returns: ReturnsMatrix,
  config: SessionConfig,
  mu: Option<Array1<f64>>,
  cov: Option<Array2<f64>>,
  bl: Option<BlackLittermanEstimate>,
  factors: Option<FactorState>,
  bl_fm: Option<BlackLittermanEstimate>,
  wc: Option<UncertaintySets>,
  clusters: Option<ClusterState>,
}

impl Session {
  pub fn new(returns: ReturnsMatrix, config: SessionConfig) -> Self {
    Self {
      returns,
      config,
      mu: None,
      cov: None,
      bl: None,
      factors: None,
      bl_fm: None,
      wc: None,
      clusters: None,
    }
  }

  pub fn returns(&self) -> &ReturnsMatrix {
    &self.returns
  }

  pub fn config(&self) -> &SessionConfig {
    &self.config
  }

  pub fn assets(&self) -> &[String] {
    self.returns.assets()
  }

  pub fn mu(&self) -> Option<&Array1<f64>> {
    self.mu.as_ref()
  }

  pub fn cov(&self) -> Option<&Array2<f64>> {
    self.cov.as_ref()
  }

  pub fn black_litterman(&self) -> Option<&BlackLittermanEstimate> {
    self.bl.as_ref()
  }

  pub fn factor_model(&self) -> Option<&FactorModel> {
    self.factors.as_ref().map(|f| &f.model)
  }

  pub fn factor_names(&self) -> Option<&[String]> {
    self.factors.as_ref().map(|f| f.names.as_slice())
  }

  pub fn black_litterman_factors(&self) -> Option<&BlackLittermanEstimate> {
    self.bl_fm.as_ref()
  }

  pub fn uncertainty_sets(&self) -> Option<&UncertaintySets> {
    self.wc.as_ref()
  }

  /// Cached codependence, tree and gap-statistic `k`.
  pub fn clusters(&self) -> Option<(&Codependence, &ClusterTree, usize)> {
    self.clusters.as_ref().map(|c| (&c.codep, &c.tree, c.k))
  }

  /// Estimate `μ` and `Σ`; drops the Black-Litterman estimates and the
  /// uncertainty sets.
  pub fn assets_stats(&mut self, mean: MeanMethod, cov: CovMethod) -> Result<()> {
    let x = self.returns.values();
    let mu = mean_vector(&x, mean)?;
    let cfg = CovarianceConfig {
      repair: self.config.repair,
      ..self.config.covariance
    };
    let cov = covariance_matrix(&x, cov, &cfg)?;
    debug!(mean = ?mean, n = mu.len(), "asset statistics estimated, dropping dependent estimates");
    self.mu = Some(mu);
    self.cov = Some(cov);
    self.bl = None;
    self.bl_fm = None;
    self.wc = None;
    Ok(())
  }

  /// Black-Litterman posterior for views `P μ = Q` around benchmark `w`.
  pub fn blacklitterman_stats(
    &mut self,
    w: ArrayView1<f64>,
    p: ArrayView2<f64>,
    q: ArrayView1<f64>,
    cfg: &BlackLittermanConfig,
  ) -> Result<()> {
    let mut est = black_litterman(&self.returns.values(), &w, &p, &q, cfg)?;
    est.cov = repair_covariance(est.cov, self.config.repair);
    debug!(views = p.nrows(), "black-litterman estimate recomputed");
    self.bl = Some(est);
    Ok(())
  }

  /// Factor model on `factors`, aligned on dates with the returns.
  pub fn factors_stats(&mut self, factors: &ReturnsMatrix, cfg: &FactorConfig) -> Result<()> {
    if factors.dates() != self.returns.dates() {
      return Err(PortfolioError::invalid("factor and asset returns must share their dates"));
    }
    let mut model = risk_factors(&factors.values(), &self.returns.values(), None, cfg)?;
    model.cov = repair_covariance(model.cov, self.config.repair);
    debug!(factors = factors.n_assets(), "factor model estimated, dropping black-litterman factor estimate");
    self.factors = Some(FactorState {
      names: factors.assets().to_vec(),
      factors: factors.values().to_owned(),
      model,
      cfg: *cfg,
    });
    self.bl_fm = None;
    Ok(())
  }

  /// Black-Litterman on the estimated factor model.
  pub fn blfactors_stats(&mut self, w: ArrayView1<f64>, views: &FactorViews, cfg: &BlackLittermanConfig) -> Result<()> {
    let state = self
      .factors
      .as_ref()
      .ok_or(PortfolioError::NotEstimated("factor model"))?;
    let inputs = FactorInputs {
      factors: state.factors.view(),
      loadings: &state.model.loadings,
    };
    let x = self.returns.values();
    let residual = state.cfg.residual;
    let mut est = match views {
      FactorViews::Augmented { assets, factors } => {
        if assets.is_none() && factors.is_none() {
          return Err(PortfolioError::MissingParameter("asset or factor views"));
        }
        augmented_black_litterman(
          &x,
          &w,
          assets.as_ref().map(|(p, q)| (p.view(), q.view())),
          Some(inputs),
          factors.as_ref().map(|(p, q)| (p.view(), q.view())),
          residual,
          cfg,
        )?
      }
      FactorViews::Bayesian { p, q } => bayesian_black_litterman(&x, &w, inputs, &p.view(), &q.view(), residual, cfg)?,
    };
    est.cov = repair_covariance(est.cov, self.config.repair);
    debug!("black-litterman factor estimate recomputed");
    self.bl_fm = Some(est);
    Ok(())
  }

  /// Uncertainty sets around the current `μ` and `Σ`.
  pub fn wc_stats(&mut self, cfg: &WorstCaseConfig) -> Result<()> {
    let (mu, cov) = self.moments()?;
    let sets = worst_case_stats(&self.returns.values(), &mu.view(), &cov.view(), cfg)?;
    debug!(q = cfg.q, "uncertainty sets recomputed");
    self.wc = Some(sets);
    Ok(())
  }

  /// Codependence, cluster tree and gap-statistic `k` for the hierarchical
  /// optimizers.
  pub fn set_codependence(&mut self, kind: CodependenceKind, linkage: LinkageMethod) -> Result<()> {
    let codep = codependence(&self.returns.values(), kind)?;
    let tree = hierarchical_clustering(&codep, linkage)?;
    let k = optimal_k(&codep.dist.view(), &tree, self.config.max_k);
    debug!(%kind, %linkage, k, "cluster tree recomputed");
    self.clusters = Some(ClusterState {
      codep,
      linkage,
      tree,
      k,
    });
    Ok(())
  }

  fn moments(&self) -> Result<(&Array1<f64>, &Array2<f64>)> {
    match (&self.mu, &self.cov) {
      (Some(mu), Some(cov)) => Ok((mu, cov)),
      _ => Err(PortfolioError::NotEstimated("asset statistics")),
    }
  }

  /// `(μ, Σ, returns)` of `model`. With `hist` the covariance and the
  /// scenarios stay historical whatever the model.
  pub fn inputs(&self, model: Model, hist: bool) -> Result<OptimizationInputs<'_>> {
    let historical = self.returns.values();
    let (mu, cov, returns) = match model {
      Model::Classic => {
        let (mu, cov) = self.moments()?;
        (mu.view(), cov.view(), historical)
      }
      Model::BlackLitterman => {
        let bl = self.bl.as_ref().ok_or(PortfolioError::NotEstimated("black-litterman estimate"))?;
        let cov = if hist { self.moments()?.1.view() } else { bl.cov.view() };
        (bl.mu.view(), cov, historical)
      }
      Model::FactorModel => {
        let fm = &self
          .factors
          .as_ref()
          .ok_or(PortfolioError::NotEstimated("factor model"))?
          .model;
        if hist {
          (fm.mu.view(), self.moments()?.1.view(), historical)
        } else {
          (fm.mu.view(), fm.cov.view(), fm.returns.view())
        }
      }
      Model::BlackLittermanFactor => {
        let est = self
          .bl_fm
          .as_ref()
          .ok_or(PortfolioError::NotEstimated("black-litterman factor estimate"))?;
        if hist {
          (est.mu.view(), self.moments()?.1.view(), historical)
        } else {
          let returns = self.factors.as_ref().map_or(historical, |f| f.model.returns.view());
          (est.mu.view(), est.cov.view(), returns)
        }
      }
    };
    Ok(OptimizationInputs {
      assets: self.returns.assets(),
      mu,
      cov,
      returns,
    })
  }

  pub fn optimization(&self, model: Model, hist: bool, req: &OptimizationRequest) -> Result<SolveOutcome> {
    optimization(&self.inputs(model, hist)?, req, &self.config.solvers)
  }

  pub fn rp_optimization(
    &self,
    model: Model,
    hist: bool,
    rm: RiskMeasure,
    b: Option<ArrayView1<f64>>,
    req: &OptimizationRequest,
  ) -> Result<SolveOutcome> {
    rp_optimization(&self.inputs(model, hist)?, rm, b, req, &self.config.solvers)
  }

  #[allow(clippy::too_many_arguments)]
  pub fn rrp_optimization(
    &self,
    model: Model,
    hist: bool,
    version: RrpVersion,
    l: f64,
    b: Option<ArrayView1<f64>>,
    req: &OptimizationRequest,
  ) -> Result<SolveOutcome> {
    rrp_optimization(&self.inputs(model, hist)?, version, l, b, req, &self.config.solvers)
  }

  /// Robust solve over the sets from [`Session::wc_stats`].
  pub fn wc_optimization(&self, req: &WorstCaseRequest) -> Result<SolveOutcome> {
    let sets = self.wc.as_ref().ok_or(PortfolioError::NotEstimated("uncertainty sets"))?;
    wc_optimization(&self.inputs(Model::Classic, true)?, sets, req, &self.config.solvers)
  }

  pub fn frontier_limits(&self, model: Model, hist: bool, req: &OptimizationRequest) -> Result<Option<FrontierLimits>> {
    frontier_limits(&self.inputs(model, hist)?, req, &self.config.solvers)
  }

  pub fn efficient_frontier(
    &self,
    model: Model,
    hist: bool,
    req: &OptimizationRequest,
    points: usize,
  ) -> Result<Vec<FrontierPoint>> {
    efficient_frontier(&self.inputs(model, hist)?, req, points, &self.config.solvers)
  }

  /// Hierarchical allocation on the historical scenarios.
  ///
  /// Uses the estimated moments when present and sample moments otherwise;
  /// the cached tree is reused when it was built with the same codependence
  /// and linkage.
  pub fn hc_optimization(&self, cfg: &HierarchicalConfig) -> Result<SolveOutcome> {
    let x = self.returns.values();
    let sample;
    let (mu, cov) = match self.moments() {
      Ok((mu, cov)) => (mu.view(), cov.view()),
      Err(_) => {
        sample = (mean_vector(&x, MeanMethod::Historical)?, sample_covariance(&x)?);
        (sample.0.view(), sample.1.view())
      }
    };
    let inputs = OptimizationInputs {
      assets: self.returns.assets(),
      mu,
      cov,
      returns: x,
    };
    let cached = self
      .clusters
      .as_ref()
      .filter(|c| c.codep.kind == cfg.codependence && c.linkage == cfg.linkage);
    match cached {
      Some(c) => {
        let cfg = HierarchicalConfig {
          k: cfg.k.or((cfg.max_k == self.config.max_k).then_some(c.k)),
          ..cfg.clone()
        };
        hc_optimization(&inputs, Some((&c.codep, &c.tree)), &cfg, &self.config.solvers)
      }
      None => hc_optimization(&inputs, None, cfg, &self.config.solvers),
    }
  }

  /// Risk, return and per-asset risk contributions of `weights`.
  pub fn risk_report(&self, weights: &PortfolioWeights, rm: RiskMeasure, model: Model, hist: bool) -> Result<RiskReport> {
    check_len("portfolio weights", self.returns.n_assets(), weights.len())?;
    if weights.assets() != self.returns.assets() {
      return Err(PortfolioError::invalid("weights must follow the session's asset order"));
    }
    let inputs = self.inputs(model, hist)?;
    let w = weights.values().view();
    let p = &self.config.params;
    Ok(RiskReport {
      rm,
      risk: portfolio_risk(&w, &inputs.cov, &inputs.returns, rm, p)?,
      ret: inputs.mu.dot(&w),
      contributions: risk_contribution(&w, &inputs.cov, &inputs.returns, rm, p)?,
    })
  }
}
