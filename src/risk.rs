//! # Risk
//!
//! $$
//! \rho:\ \mathbb R^T\to\mathbb R,\qquad X=R\,\mathbf w
//! $$
//!
//! Stateless risk measures on a realized portfolio return series, the OWA
//! weight generators behind the Gini family, and the portfolio-level
//! dispatch used by reports and optimizers.
use ordered_float::OrderedFloat;

pub mod dispersion;
pub mod drawdown;
pub mod measure;
pub mod owa;
pub mod tail;

pub use dispersion::*;
pub use drawdown::*;
pub use measure::portfolio_risk;
pub use measure::risk_contribution;
pub use measure::series_risk;
pub use measure::sharpe_like_ratio;
pub use owa::*;
pub use tail::*;

pub(crate) fn sorted_ascending(x: &[f64]) -> Vec<f64> {
  let mut v: Vec<OrderedFloat<f64>> = x.iter().copied().map(OrderedFloat).collect();
  v.sort_unstable();
  v.into_iter().map(|o| o.0).collect()
}
