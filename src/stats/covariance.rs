use std::str::FromStr;

use ndarray::Array2;
use ndarray::ArrayView2;

use super::denoise::denoise_covariance;
use super::denoise::DenoiseConfig;
use super::denoise::DenoiseMethod;
use super::gerber::gerber_covariance;
use super::gerber::GerberVariant;
use super::glasso::graphical_lasso;
use super::jlogo::j_logo;
use super::moments::ewma_covariance;
use super::moments::sample_covariance;
use super::moments::semi_covariance;
use super::moments::validate_table;
use super::shrinkage::ledoit_wolf;
use super::shrinkage::oas;
use super::shrinkage::shrunk;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::linalg::repair_covariance;
use crate::linalg::PsdRepair;

/// Covariance estimator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CovMethod {
  /// Sample covariance, `ddof = 1`.
  Historical,
  SemiCovariance,
  EwmaAdjusted { d: f64 },
  EwmaUnadjusted { d: f64 },
  LedoitWolf,
  Oas,
  Shrunk { alpha: f64 },
  GraphicalLasso { alpha: f64 },
  JLogo,
  DenoiseFixed,
  DenoiseSpectral,
  DenoiseShrink { alpha: f64 },
  Gerber1 { threshold: f64 },
  Gerber2 { threshold: f64 },
}

impl Default for CovMethod {
  fn default() -> Self {
    CovMethod::Historical
  }
}

impl FromStr for CovMethod {
  type Err = PortfolioError;

  fn from_str(s: &str) -> Result<Self> {
    let method = match s.trim().to_lowercase().replace('_', "-").as_str() {
      "hist" | "historical" => CovMethod::Historical,
      "semi" => CovMethod::SemiCovariance,
      "ewma1" | "ewma-adjusted" => CovMethod::EwmaAdjusted { d: 0.94 },
      "ewma2" | "ewma-unadjusted" => CovMethod::EwmaUnadjusted { d: 0.94 },
      "ledoit" | "ledoit-wolf" => CovMethod::LedoitWolf,
      "oas" => CovMethod::Oas,
      "shrunk" => CovMethod::Shrunk { alpha: 0.1 },
      "gl" | "graphical-lasso" => CovMethod::GraphicalLasso { alpha: 0.1 },
      "jlogo" | "j-logo" => CovMethod::JLogo,
      "fixed" | "denoise-fixed" => CovMethod::DenoiseFixed,
      "spectral" | "denoise-spectral" => CovMethod::DenoiseSpectral,
      "shrink" | "denoise-shrink" => CovMethod::DenoiseShrink { alpha: 0.1 },
      "gerber1" => CovMethod::Gerber1 { threshold: 0.5 },
      "gerber2" => CovMethod::Gerber2 { threshold: 0.5 },
      _ => return Err(PortfolioError::UnsupportedMethod(s.to_string())),
    };
    Ok(method)
  }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CovarianceConfig {
  pub repair: PsdRepair,
  pub denoise: DenoiseConfig,
  pub glasso_max_iter: usize,
  pub glasso_tol: f64,
}

impl Default for CovarianceConfig {
  fn default() -> Self {
    Self {
      repair: PsdRepair::Clipped,
      denoise: DenoiseConfig::default(),
      glasso_max_iter: 100,
      glasso_tol: 1e-6,
    }
  }
}

/// Covariance matrix under `method`, repaired to PSD if needed.
pub fn covariance_matrix(x: &ArrayView2<f64>, method: CovMethod, cfg: &CovarianceConfig) -> Result<Array2<f64>> {
  validate_table(x, 2)?;
  let t = x.nrows();
  let raw = match method {
    CovMethod::Historical => sample_covariance(x)?,
    CovMethod::SemiCovariance => semi_covariance(x)?,
    CovMethod::EwmaAdjusted { d } => ewma_covariance(x, d, true)?,
    CovMethod::EwmaUnadjusted { d } => ewma_covariance(x, d, false)?,
    CovMethod::LedoitWolf => ledoit_wolf(x)?,
    CovMethod::Oas => oas(x)?,
    CovMethod::Shrunk { alpha } => shrunk(x, alpha)?,
    CovMethod::GraphicalLasso { alpha } => {
      let s = sample_covariance(x)?;
      graphical_lasso(&s.view(), alpha, cfg.glasso_max_iter, cfg.glasso_tol)
    }
    CovMethod::JLogo => j_logo(&sample_covariance(x)?.view())?,
    CovMethod::DenoiseFixed => denoise_covariance(&sample_covariance(x)?.view(), t, DenoiseMethod::Fixed, &cfg.denoise)?,
    CovMethod::DenoiseSpectral => {
      denoise_covariance(&sample_covariance(x)?.view(), t, DenoiseMethod::Spectral, &cfg.denoise)?
    }
    CovMethod::DenoiseShrink { alpha } => denoise_covariance(
      &sample_covariance(x)?.view(),
      t,
      DenoiseMethod::Shrink { alpha },
      &cfg.denoise,
    )?,
    CovMethod::Gerber1 { threshold } => gerber_covariance(x, threshold, GerberVariant::One)?,
    CovMethod::Gerber2 { threshold } => gerber_covariance(x, threshold, GerberVariant::Two)?,
  };
  Ok(repair_covariance(raw, cfg.repair))
}

#[cfg(test)]
mod tests {
  use rand::rngs::StdRng;
  use rand::Rng;
  use rand::SeedableRng;
  use rand_distr::StandardNormal;

  use super::*;
  use crate::linalg::is_psd;

  fn sample(t: usize, n: usize) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(21);
    let mut x = Array2::<f64>::zeros((t, n));
    for r in 0..t {
      let m: f64 = rng.sample(StandardNormal);
      for c in 0..n {
        let e: f64 = rng.sample(StandardNormal);
        x[[r, c]] = 0.0005 + 0.01 * (0.5 * m + e);
      }
    }
    x
  }

  #[test]
  fn every_method_is_symmetric_psd_and_repeatable() {
    let x = sample(150, 8);
    let cfg = CovarianceConfig::default();
    for name in [
      "hist", "semi", "ewma1", "ewma2", "ledoit", "oas", "shrunk", "gl", "jlogo", "fixed", "spectral", "shrink",
      "gerber1", "gerber2",
    ] {
      let method: CovMethod = name.parse().unwrap();
      let a = covariance_matrix(&x.view(), method, &cfg).unwrap();
      let b = covariance_matrix(&x.view(), method, &cfg).unwrap();
      assert_eq!(a, b, "{name} is not deterministic");
      assert_eq!(a, a.t(), "{name} is not symmetric");
      assert!(is_psd(&a.view()), "{name} is not PSD");
    }
  }

  #[test]
  fn historical_is_untouched_sample_covariance() {
    let x = sample(30, 3);
    let cov = covariance_matrix(&x.view(), CovMethod::Historical, &Default::default()).unwrap();
    assert_eq!(cov, sample_covariance(&x.view()).unwrap());
  }

  #[test]
  fn unknown_name_is_unsupported() {
    assert!(matches!(
      "robust".parse::<CovMethod>(),
      Err(PortfolioError::UnsupportedMethod(_))
    ));
  }
}
