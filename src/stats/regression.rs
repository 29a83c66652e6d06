use nalgebra::DMatrix;
use nalgebra::DVector;
use statrs::distribution::ContinuousCDF;
use statrs::distribution::StudentsT;

use crate::error::PortfolioError;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct OlsResult {
  pub beta: Vec<f64>,
  pub std_err: Vec<f64>,
  pub p_values: Vec<f64>,
  pub residuals: Vec<f64>,
  pub sse: f64,
  pub sigma2: f64,
  pub r_squared: f64,
  pub adj_r_squared: f64,
  pub aic: f64,
  pub bic: f64,
  pub nobs: usize,
  pub k: usize,
}

/// Ordinary least squares of `y` on the columns of `x`.
///
/// `has_constant` only changes how `R²` is centered, the intercept column
/// itself must already be part of `x`.
pub fn ols(y: &[f64], x: &DMatrix<f64>, has_constant: bool) -> Result<OlsResult> {
  let n = y.len();
  let k = x.ncols();
  if x.nrows() != n {
    return Err(PortfolioError::mismatch("regression rows", n, x.nrows()));
  }
  if k == 0 {
    return Err(PortfolioError::invalid("regression needs at least one regressor"));
  }
  if n <= k {
    return Err(PortfolioError::invalid(format!(
      "regression needs more observations ({n}) than regressors ({k})"
    )));
  }

  let y_vec = DVector::from_row_slice(y);
  let xtx = x.transpose() * x;
  let xtx_inv = match xtx.clone().try_inverse() {
    Some(inv) => inv,
    None => xtx
      .pseudo_inverse(1e-12)
      .map_err(|e| PortfolioError::Numerical(format!("singular design matrix: {e}")))?,
  };

  let beta = &xtx_inv * x.transpose() * &y_vec;
  let fitted = x * &beta;
  let residuals_vec = &y_vec - fitted;

  let residuals: Vec<f64> = residuals_vec.iter().copied().collect();
  let sse = residuals.iter().map(|u| u * u).sum::<f64>();
  let dof = (n - k) as f64;
  let sigma2 = sse / dof;

  let std_err: Vec<f64> = (0..k)
    .map(|j| (sigma2 * xtx_inv[(j, j)]).max(0.0).sqrt())
    .collect();

  let t_dist = StudentsT::new(0.0, 1.0, dof).map_err(|e| PortfolioError::Numerical(e.to_string()))?;
  let p_values = beta
    .iter()
    .zip(std_err.iter())
    .map(|(&b, &se)| {
      if se > 0.0 {
        2.0 * (1.0 - t_dist.cdf((b / se).abs()))
      } else {
        0.0
      }
    })
    .collect();

  let mean_y = y.iter().sum::<f64>() / n as f64;
  let tss = if has_constant {
    y.iter().map(|v| (v - mean_y).powi(2)).sum::<f64>()
  } else {
    y.iter().map(|v| v * v).sum::<f64>()
  };
  let r_squared = if tss > 0.0 { 1.0 - sse / tss } else { 0.0 };
  let offset = if has_constant { 1.0 } else { 0.0 };
  let adj_r_squared = 1.0 - (n as f64 - offset) / dof * (1.0 - r_squared);

  let nf = n as f64;
  let llf = -nf / 2.0 * ((2.0 * std::f64::consts::PI).ln() + (sse / nf).ln() + 1.0);
  let aic = -2.0 * llf + 2.0 * k as f64;
  let bic = -2.0 * llf + nf.ln() * k as f64;

  Ok(OlsResult {
    beta: beta.iter().copied().collect(),
    std_err,
    p_values,
    residuals,
    sse,
    sigma2,
    r_squared,
    adj_r_squared,
    aic,
    bic,
    nobs: n,
    k,
  })
}
