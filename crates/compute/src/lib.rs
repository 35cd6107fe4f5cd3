pub mod clustering;
pub mod fiscal;
pub mod graph;
pub mod similarity;
pub mod stats;

pub use clustering::{cluster, ClusterParams, ClusterSet, MatchingError, VendorCluster};
pub use fiscal::FiscalCalendar;
pub use graph::RelatedPartyGraph;
pub use similarity::{similarity, token_set_ratio, MatchScore};
