//! # Stats
//!
//! $$
//! \hat\mu=\frac1T\sum_t r_t,\qquad \hat\Sigma=\frac{1}{T-1}\sum_t (r_t-\hat\mu)(r_t-\hat\mu)^\top
//! $$
//!
//! Estimators of the inputs fed to the optimizers: moments, shrinkage and
//! denoised covariances, factor models, Black-Litterman posteriors and
//! resampled uncertainty sets.
pub mod black_litterman;
pub mod bootstrap;
pub mod covariance;
pub mod denoise;
pub mod factors;
pub mod gaussian_kde;
pub mod gerber;
pub mod glasso;
pub mod jlogo;
pub mod moments;
pub mod regression;
pub mod scalar_min;
pub mod shrinkage;
pub mod uncertainty;

pub use black_litterman::augmented_black_litterman;
pub use black_litterman::bayesian_black_litterman;
pub use black_litterman::black_litterman;
pub use bootstrap::bootstrapping;
pub use covariance::covariance_matrix;
pub use covariance::CovMethod;
pub use covariance::CovarianceConfig;
pub use factors::loadings_matrix;
pub use factors::risk_factors;
pub use moments::mean_vector;
pub use moments::MeanMethod;
pub use uncertainty::worst_case_stats;
