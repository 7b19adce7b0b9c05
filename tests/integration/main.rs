// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Integration tests for tidb-operator
//!
//! These tests require a running Kubernetes cluster accessible via kubeconfig,
//! with the TidbCluster CRD installed. Tests are marked with #[ignore] and
//! must be run explicitly:
//!
//! ```bash
//! cargo test --test integration -- --ignored
//! ```
//!
//! ## Design Principles
//!
//! - **Parallel Test Execution**: Each test creates its own namespace and scoped
//!   operator, enabling concurrent test runs without interference
//! - **RAII Cleanup**: TestNamespace implements Drop for automatic cleanup even on panic
//! - **Watch-Based Waiting**: Uses kube-rs watches for efficient status detection

#[path = "../common/mod.rs"]
mod common;



pub use namespace::*;
pub use operator::*;
pub use wait::*;
