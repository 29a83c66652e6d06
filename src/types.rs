//! # Types
//!
//! $$
//! R \in \mathbb R^{T\times N},\qquad \mathbf w \in \mathbb R^{N},\ \mathbf 1^\top\mathbf w = b
//! $$
//!
//! Returns table, weight vectors and the closed enums that replace string tags
//! for risk measures, models and objectives.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use ndarray::Axis;

use crate::error::PortfolioError;
use crate::error::Result;

/// Periodic returns, dates × assets. Immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct ReturnsMatrix {
  dates: Vec<NaiveDate>,
  assets: Vec<String>,
  values: Array2<f64>,
}

impl ReturnsMatrix {
  /// Build from explicit dates, asset names and a `T × N` value matrix.
  pub fn new(dates: Vec<NaiveDate>, assets: Vec<String>, values: Array2<f64>) -> Result<Self> {
    let (rows, cols) = values.dim();
    if dates.len() != rows {
      return Err(PortfolioError::mismatch("returns dates", rows, dates.len()));
    }
    if assets.len() != cols {
      return Err(PortfolioError::mismatch("returns assets", cols, assets.len()));
    }
    if cols == 0 {
      return Err(PortfolioError::invalid("returns table has no assets"));
    }
    if rows < 2 {
      return Err(PortfolioError::invalid(
        "returns table needs at least 2 periods",
      ));
    }
    let mut seen = HashSet::with_capacity(cols);
    for name in &assets {
      if !seen.insert(name.as_str()) {
        return Err(PortfolioError::invalid(format!("duplicate asset name {name}")));
      }
    }
    if values.iter().any(|v| !v.is_finite()) {
      return Err(PortfolioError::invalid(
        "returns table contains non-finite values",
      ));
    }

    Ok(Self {
      dates,
      assets,
      values,
    })
  }

  /// Build from `date -> asset -> return`. Every date must carry every asset.
  pub fn from_table(table: &BTreeMap<NaiveDate, BTreeMap<String, f64>>) -> Result<Self> {
    let Some(first) = table.values().next() else {
      return Err(PortfolioError::invalid("returns table is empty"));
    };
    let assets: Vec<String> = first.keys().cloned().collect();
    let mut values = Array2::<f64>::zeros((table.len(), assets.len()));

    for (t, (date, row)) in table.iter().enumerate() {
      if row.len() != assets.len() {
        return Err(PortfolioError::invalid(format!(
          "row {date} has {} assets, expected {}",
          row.len(),
          assets.len()
        )));
      }
      for (j, asset) in assets.iter().enumerate() {
        let Some(v) = row.get(asset) else {
          return Err(PortfolioError::invalid(format!(
            "row {date} is missing asset {asset}"
          )));
        };
        values[[t, j]] = *v;
      }
    }

    Self::new(table.keys().copied().collect(), assets, values)
  }

  /// Build with a synthetic daily date index starting at 2000-01-03.
  pub fn from_values(assets: Vec<String>, values: Array2<f64>) -> Result<Self> {
    let start = NaiveDate::from_ymd_opt(2000, 1, 3)
      .ok_or_else(|| PortfolioError::invalid("bad synthetic start date"))?;
    let dates = start.iter_days().take(values.nrows()).collect();
    Self::new(dates, assets, values)
  }

  pub fn dates(&self) -> &[NaiveDate] {
    &self.dates
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  pub fn values(&self) -> ArrayView2<'_, f64> {
    self.values.view()
  }

  pub fn n_periods(&self) -> usize {
    self.values.nrows()
  }

  pub fn n_assets(&self) -> usize {
    self.values.ncols()
  }

  pub fn column(&self, j: usize) -> ArrayView1<'_, f64> {
    self.values.column(j)
  }

  /// Position of an asset by name.
  pub fn index_of(&self, asset: &str) -> Option<usize> {
    self.assets.iter().position(|a| a == asset)
  }

  /// Sub-universe with the given columns, in the given order.
  pub fn select(&self, columns: &[usize]) -> Result<Self> {
    if let Some(bad) = columns.iter().find(|&&c| c >= self.n_assets()) {
      return Err(PortfolioError::invalid(format!("column {bad} out of range")));
    }
    let values = self.values.select(Axis(1), columns);
    let assets = columns.iter().map(|&c| self.assets[c].clone()).collect();
    Self::new(self.dates.clone(), assets, values)
  }

  /// Portfolio return series `R w`.
  pub fn portfolio_returns(&self, w: ArrayView1<f64>) -> Result<Array1<f64>> {
    if w.len() != self.n_assets() {
      return Err(PortfolioError::mismatch(
        "portfolio weights",
        self.n_assets(),
        w.len(),
      ));
    }
    Ok(self.values.dot(&w))
  }
}

/// Portfolio weights keyed by asset name.
#[derive(Clone, Debug, PartialEq)]
pub struct PortfolioWeights {
  assets: Vec<String>,
  values: Array1<f64>,
}

impl PortfolioWeights {
  pub fn new(assets: Vec<String>, values: Array1<f64>) -> Result<Self> {
    if assets.len() != values.len() {
      return Err(PortfolioError::mismatch(
        "weights",
        assets.len(),
        values.len(),
      ));
    }
    Ok(Self { assets, values })
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  pub fn values(&self) -> &Array1<f64> {
    &self.values
  }

  pub fn into_values(self) -> Array1<f64> {
    self.values
  }

  pub fn get(&self, asset: &str) -> Option<f64> {
    self
      .assets
      .iter()
      .position(|a| a == asset)
      .map(|i| self.values[i])
  }

  pub fn sum(&self) -> f64 {
    self.values.sum()
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
    self
      .assets
      .iter()
      .map(String::as_str)
      .zip(self.values.iter().copied())
  }

  /// Weights as an ordered map.
  pub fn to_map(&self) -> BTreeMap<String, f64> {
    self.iter().map(|(a, w)| (a.to_string(), w)).collect()
  }
}

/// Risk measures understood by the risk library and the optimizers.
///
/// `*Rel` variants work on the compounded cumulative path, the rest on the
/// uncompounded one. `VaR`, `DaR` and the compounded drawdowns are reporting
/// only; the convex programs reject them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RiskMeasure {
  /// Standard deviation.
  MV,
  /// Mean absolute deviation.
  MAD,
  /// Semi standard deviation.
  MSV,
  /// First lower partial moment.
  FLPM,
  /// Second lower partial moment.
  SLPM,
  /// Conditional value at risk.
  CVaR,
  /// Entropic value at risk.
  EVaR,
  /// Worst realization.
  WR,
  /// Gini mean difference.
  GMD,
  /// Tail Gini.
  TG,
  /// Range.
  RG,
  /// CVaR range.
  CVRG,
  /// Tail Gini range.
  TGRG,
  /// Maximum drawdown.
  MDD,
  /// Average drawdown.
  ADD,
  /// Conditional drawdown at risk.
  CDaR,
  /// Entropic drawdown at risk.
  EDaR,
  /// Ulcer index.
  UCI,
  /// Value at risk.
  VaR,
  /// Drawdown at risk.
  DaR,
  MDDRel,
  ADDRel,
  DaRRel,
  CDaRRel,
  EDaRRel,
  UCIRel,
}

impl RiskMeasure {
  /// Measures with a convex epigraph in the optimizers.
  pub const OPTIMIZABLE: [RiskMeasure; 18] = [
    RiskMeasure::MV,
    RiskMeasure::MAD,
    RiskMeasure::MSV,
    RiskMeasure::FLPM,
    RiskMeasure::SLPM,
    RiskMeasure::CVaR,
    RiskMeasure::EVaR,
    RiskMeasure::WR,
    RiskMeasure::GMD,
    RiskMeasure::TG,
    RiskMeasure::RG,
    RiskMeasure::CVRG,
    RiskMeasure::TGRG,
    RiskMeasure::MDD,
    RiskMeasure::ADD,
    RiskMeasure::CDaR,
    RiskMeasure::EDaR,
    RiskMeasure::UCI,
  ];

  pub fn is_optimizable(self) -> bool {
    Self::OPTIMIZABLE.contains(&self)
  }

  pub fn is_drawdown(self) -> bool {
    matches!(
      self,
      RiskMeasure::MDD
        | RiskMeasure::ADD
        | RiskMeasure::CDaR
        | RiskMeasure::EDaR
        | RiskMeasure::UCI
        | RiskMeasure::DaR
        | RiskMeasure::MDDRel
        | RiskMeasure::ADDRel
        | RiskMeasure::DaRRel
        | RiskMeasure::CDaRRel
        | RiskMeasure::EDaRRel
        | RiskMeasure::UCIRel
    )
  }

  /// Measures computed from the covariance rather than the scenario sample.
  pub fn uses_covariance(self) -> bool {
    matches!(self, RiskMeasure::MV)
  }

  pub fn name(self) -> &'static str {
    match self {
      RiskMeasure::MV => "MV",
      RiskMeasure::MAD => "MAD",
      RiskMeasure::MSV => "MSV",
      RiskMeasure::FLPM => "FLPM",
      RiskMeasure::SLPM => "SLPM",
      RiskMeasure::CVaR => "CVaR",
      RiskMeasure::EVaR => "EVaR",
      RiskMeasure::WR => "WR",
      RiskMeasure::GMD => "GMD",
      RiskMeasure::TG => "TG",
      RiskMeasure::RG => "RG",
      RiskMeasure::CVRG => "CVRG",
      RiskMeasure::TGRG => "TGRG",
      RiskMeasure::MDD => "MDD",
      RiskMeasure::ADD => "ADD",
      RiskMeasure::CDaR => "CDaR",
      RiskMeasure::EDaR => "EDaR",
      RiskMeasure::UCI => "UCI",
      RiskMeasure::VaR => "VaR",
      RiskMeasure::DaR => "DaR",
      RiskMeasure::MDDRel => "MDD_Rel",
      RiskMeasure::ADDRel => "ADD_Rel",
      RiskMeasure::DaRRel => "DaR_Rel",
      RiskMeasure::CDaRRel => "CDaR_Rel",
      RiskMeasure::EDaRRel => "EDaR_Rel",
      RiskMeasure::UCIRel => "UCI_Rel",
    }
  }
}

impl fmt::Display for RiskMeasure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for RiskMeasure {
  type Err = PortfolioError;

  fn from_str(s: &str) -> Result<Self> {
    let key = s.trim().to_lowercase().replace('-', "_");
    let rm = match key.as_str() {
      "mv" | "vol" | "std" => RiskMeasure::MV,
      "mad" => RiskMeasure::MAD,
      "msv" => RiskMeasure::MSV,
      "flpm" => RiskMeasure::FLPM,
      "slpm" => RiskMeasure::SLPM,
      "cvar" => RiskMeasure::CVaR,
      "evar" => RiskMeasure::EVaR,
      "wr" => RiskMeasure::WR,
      "gmd" => RiskMeasure::GMD,
      "tg" => RiskMeasure::TG,
      "rg" => RiskMeasure::RG,
      "cvrg" => RiskMeasure::CVRG,
      "tgrg" => RiskMeasure::TGRG,
      "mdd" => RiskMeasure::MDD,
      "add" => RiskMeasure::ADD,
      "cdar" => RiskMeasure::CDaR,
      "edar" => RiskMeasure::EDaR,
      "uci" => RiskMeasure::UCI,
      "var" => RiskMeasure::VaR,
      "dar" => RiskMeasure::DaR,
      "mdd_rel" => RiskMeasure::MDDRel,
      "add_rel" => RiskMeasure::ADDRel,
      "dar_rel" => RiskMeasure::DaRRel,
      "cdar_rel" => RiskMeasure::CDaRRel,
      "edar_rel" => RiskMeasure::EDaRRel,
      "uci_rel" => RiskMeasure::UCIRel,
      _ => return Err(PortfolioError::UnsupportedMethod(s.to_string())),
    };
    Ok(rm)
  }
}

/// Source of the `(mu, cov, returns)` triple fed to the optimizer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Model {
  #[default]
  Classic,
  BlackLitterman,
  FactorModel,
  BlackLittermanFactor,
}

impl FromStr for Model {
  type Err = PortfolioError;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_lowercase().as_str() {
      "classic" => Ok(Model::Classic),
      "bl" | "black-litterman" => Ok(Model::BlackLitterman),
      "fm" | "factor" => Ok(Model::FactorModel),
      "bl_fm" | "blfm" => Ok(Model::BlackLittermanFactor),
      _ => Err(PortfolioError::UnsupportedMethod(s.to_string())),
    }
  }
}

/// Objective of a mean-risk solve.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Objective {
  MinRisk,
  /// Maximize `mu'w - l * risk(w)`.
  Utility {
    l: f64,
  },
  /// Maximize the return-to-risk ratio.
  Sharpe,
  MaxRet,
}

impl Default for Objective {
  fn default() -> Self {
    Objective::Sharpe
  }
}

impl FromStr for Objective {
  type Err = PortfolioError;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_lowercase().as_str() {
      "minrisk" | "min_risk" => Ok(Objective::MinRisk),
      "utility" => Ok(Objective::Utility { l: 2.0 }),
      "sharpe" => Ok(Objective::Sharpe),
      "maxret" | "max_ret" => Ok(Objective::MaxRet),
      _ => Err(PortfolioError::UnsupportedMethod(s.to_string())),
    }
  }
}

/// Hierarchical allocation scheme.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HcModel {
  /// Recursive bisection on the leaf order.
  #[default]
  Hrp,
  /// Top-down splits of the dendrogram, naive risk parity inside clusters.
  Herc,
  /// As `Herc` with equal weights inside clusters.
  Herc2,
  /// Nested clustered optimization.
  Nco,
}

impl fmt::Display for HcModel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      HcModel::Hrp => "HRP",
      HcModel::Herc => "HERC",
      HcModel::Herc2 => "HERC2",
      HcModel::Nco => "NCO",
    };
    f.write_str(s)
  }
}

impl FromStr for HcModel {
  type Err = PortfolioError;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_lowercase().as_str() {
      "hrp" => Ok(HcModel::Hrp),
      "herc" => Ok(HcModel::Herc),
      "herc2" => Ok(HcModel::Herc2),
      "nco" => Ok(HcModel::Nco),
      _ => Err(PortfolioError::UnsupportedMethod(s.to_string())),
    }
  }
}

/// Significance levels and ladder sizes shared by the tail measures.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RiskParams {
  /// Loss-side significance level.
  pub alpha: f64,
  /// Number of CVaR levels in the Tail Gini ladder.
  pub a_sim: usize,
  /// Gain-side significance level for range measures, defaults to `alpha`.
  pub beta: Option<f64>,
  /// Gain-side ladder size, defaults to `a_sim`.
  pub b_sim: Option<usize>,
  /// Minimum acceptable return for the lower partial moments.
  pub target: f64,
}

impl Default for RiskParams {
  fn default() -> Self {
    Self {
      alpha: 0.05,
      a_sim: 100,
      beta: None,
      b_sim: None,
      target: 0.0,
    }
  }
}

impl RiskParams {
  pub fn beta(&self) -> f64 {
    self.beta.unwrap_or(self.alpha)
  }

  pub fn b_sim(&self) -> usize {
    self.b_sim.unwrap_or(self.a_sim)
  }

  pub(crate) fn validate(&self) -> Result<()> {
    for level in [self.alpha, self.beta()] {
      if !(level > 0.0 && level < 1.0) {
        return Err(PortfolioError::invalid(format!(
          "significance level {level} outside (0, 1)"
        )));
      }
    }
    if self.a_sim < 2 || self.b_sim() < 2 {
      return Err(PortfolioError::invalid("tail ladders need at least 2 levels"));
    }
    Ok(())
  }
}

/// Ensure a name-indexed vector matches the universe.
pub(crate) fn check_len(context: &'static str, expected: usize, found: usize) -> Result<()> {
  if expected != found {
    Err(PortfolioError::mismatch(context, expected, found))
  } else {
    Ok(())
  }
}
