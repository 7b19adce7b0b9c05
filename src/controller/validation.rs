//! Validation logic for TidbCluster specs.
//!
//! A spec that fails validation is terminal for the current generation:
//! the reconciler reports it and waits for the object to change.

use std::collections::BTreeSet;

use crate::controller::error::{Error, Result};
use crate::crd::{TidbClusterSpec, TierKind, TierSpec};

/// Validate the resource spec
pub fn validate_spec(spec: &TidbClusterSpec) -> Result<()> {
    validate_tier_set(spec)?;
    for tier in &spec.tiers {
        validate_replicas(tier)?;
        validate_template(tier)?;
    }
    Ok(())
}

/// One TierSpec per kind, and a Metadata tier for anything that needs it.
fn validate_tier_set(spec: &TidbClusterSpec) -> Result<()> {
    let mut kinds = BTreeSet::new();
    for tier in &spec.tiers {
        if !kinds.insert(tier.kind) {
            return Err(Error::SpecInvalid(format!(
                "tier {} is declared more than once",
                tier.kind
            )));
        }
    }
    for kind in &kinds {
        if let Some(dependency) = kind.dependency()
            && !kinds.contains(&dependency)
        {
            return Err(Error::SpecInvalid(format!(
                "tier {kind} requires a {dependency} tier"
            )));
        }
    }
    Ok(())
}

fn validate_replicas(tier: &TierSpec) -> Result<()> {
    if tier.replicas < 0 {
        return Err(Error::SpecInvalid(format!(
            "tier {} has negative replica count {}",
            tier.kind, tier.replicas
        )));
    }
    Ok(())
}

fn validate_template(tier: &TierSpec) -> Result<()> {
    let has_container = tier
        .effective_template()
        .spec
        .is_some_and(|spec| !spec.containers.is_empty());
    if !has_container {
        return Err(Error::SpecInvalid(format!(
            "tier {} pod template has no containers",
            tier.kind
        )));
    }
    Ok(())
}

/// Tiers that are declared, in planning order.
pub fn declared_tiers(spec: &TidbClusterSpec) -> Vec<TierKind> {
    TierKind::ORDERED
        .into_iter()
        .filter(|kind| spec.tier(*kind).is_some())
        .collect()
}
