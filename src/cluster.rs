//! # Cluster
//!
//! $$
//! D_{ij}=\sqrt{\tfrac12(1-\rho_{ij})}\ \longrightarrow\ \text{linkage}\ \longrightarrow\ \text{leaf order},\ k^\*
//! $$
//!
//! Codependence measures, agglomerative and planar-graph based hierarchical
//! clustering, and the choice of the number of clusters.
pub mod codependence;
pub mod dbht;
pub mod gap;
pub mod information;
pub mod linkage;
pub mod tmfg;
pub mod tree;

pub use codependence::codependence;
pub use codependence::Codependence;
pub use codependence::CodependenceKind;
pub use gap::optimal_k;
pub use information::BinsMethod;
pub use linkage::hierarchical_clustering;
pub use linkage::LinkageMethod;
pub use tmfg::tmfg;
pub use tmfg::PlanarGraph;
pub use tree::ClusterTree;
pub use tree::LinkageRow;
