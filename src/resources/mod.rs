//! Resource generation module.
//!
//! Renders the Kubernetes objects owned by a TidbCluster.
//!
//! ## Resources Generated
//!
//! | Resource | Purpose |
//! |----------|---------|
//! | Pod | One per replica, named `{cluster}-{tier}-{index}` |
//! | Service | One headless service per replica, same name as its pod |

pub mod common;
pub mod pods;
pub mod services;

pub use common::{ClusterIdentity, ClusterKey};
pub use pods::{ComposeError, compose_pod};
pub use services::compose_service;
