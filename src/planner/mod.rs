//! Pure convergence logic for TidbCluster tiers.
//!
//! Separates "what needs to change" from "how it is applied". Nothing here
//! performs I/O, so every function is testable with plain values.
//!
//! ## Module Structure
//!
//! - [`observed`]: Managed pods and services parsed from the watch cache
//! - [`tasks`]: Corrective tasks handed to the object clients
//! - [`convergence`]: Per-tier planning and dependency address resolution

pub mod convergence;
pub mod observed;
pub mod tasks;

pub use convergence::{TierPlan, dependency_addresses, plan};
pub use observed::{ManagedPod, ManagedService, ObservedObjects};
pub use tasks::{Task, TaskKind};
