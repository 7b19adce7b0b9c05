//! Custom Resource Definitions (CRDs) for tidb-operator.
//!
//! - `TidbCluster`: a Metadata, Storage and Frontend tier, each scaled independently

mod tidb_cluster;

pub use tidb_cluster::*;
