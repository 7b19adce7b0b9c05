//! Controller module for tidb-operator.
//!
//! Contains the reconciliation pass, the expectation gate and the watch
//! observers that feed it, error handling, status management and
//! validation logic.

pub mod backoff;
pub mod cluster_state;
pub mod context;
pub mod error;
pub mod expectations;
pub mod notifications;
pub mod reconciler;
pub mod status;
pub mod validation;
