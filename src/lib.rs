//! # convexfolio
//!
//! $$
//! R\in\mathbb R^{T\times N}\ \longrightarrow\ (\hat\mu,\hat\Sigma,\ \text{tree})\ \longrightarrow\ \mathbf w^\*
//! $$
//!
//! Portfolio construction and risk-measure engine: moment and factor
//! estimators, codependence clustering, a library of risk measures and
//! conic optimizers over portfolio weights.
pub mod cluster;
pub mod error;
pub mod linalg;
pub mod portfolio;
pub mod risk;
pub mod stats;
pub mod types;

pub use error::PortfolioError;
pub use error::Result;
pub use types::HcModel;
pub use types::Model;
pub use types::Objective;
pub use types::PortfolioWeights;
pub use types::ReturnsMatrix;
pub use types::RiskMeasure;
pub use types::RiskParams;
