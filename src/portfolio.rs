//! # Portfolio
//!
//! $$
//! \min_{\mathbf w\in\mathcal W}\ \rho(\mathbf w)-\lambda\,\mu^\top\mathbf w
//! $$
//!
//! Mean-risk, risk-parity, hierarchical and worst-case optimizers over a
//! backend-neutral conic formulation, the constraint and view tables that
//! feed them, and the session that caches their inputs.
pub mod conic;
pub mod constraints;
pub(crate) mod epigraph;
pub mod frontier;
pub mod hierarchical;
pub mod optimizers;
pub mod relaxed;
pub mod request;
pub mod risk_parity;
pub mod session;
pub mod solver;
pub mod views;
pub mod worst_case;

pub use constraints::assets_constraints;
pub use constraints::factor_constraints;
pub use constraints::hrp_constraints;
pub use constraints::AssetClasses;
pub use constraints::ConstraintBound;
pub use constraints::ConstraintRow;
pub use constraints::ConstraintTarget;
pub use constraints::FactorConstraintRow;
pub use constraints::Position;
pub use constraints::Sign;
pub use frontier::efficient_frontier;
pub use frontier::frontier_limits;
pub use frontier::FrontierLimits;
pub use frontier::FrontierPoint;
pub use hierarchical::hc_optimization;
pub use hierarchical::HcRisk;
pub use hierarchical::HierarchicalConfig;
pub use optimizers::optimization;
pub use optimizers::SUPPORT_TOLERANCE;
pub use relaxed::rrp_optimization;
pub use relaxed::RrpVersion;
pub use request::Benchmark;
pub use request::ConstraintSet;
pub use request::OptimizationInputs;
pub use request::OptimizationRequest;
pub use request::TrackingError;
pub use request::Turnover;
pub use risk_parity::rp_optimization;
pub use session::FactorViews;
pub use session::RiskReport;
pub use session::Session;
pub use session::SessionConfig;
pub use solver::ClarabelConfig;
pub use solver::ClarabelSolver;
pub use solver::ConicSolver;
pub use solver::InfeasibleReport;
pub use solver::SolveOutcome;
pub use solver::SolverChain;
pub use solver::SolverFailure;
pub use views::assets_views;
pub use views::factors_views;
pub use views::FactorViewRow;
pub use views::ViewRow;
pub use worst_case::wc_optimization;
pub use worst_case::UncertaintySet;
pub use worst_case::WorstCaseRequest;
