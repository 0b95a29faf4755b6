//! Delegated prefix ledger.
//!
//! Turns the committed and pending prefix sets of an IPv6 commit into the new
//! live set, the withdrawals to announce and the prefix filters to flip.

use std::collections::HashSet;

use ipnet::Ipv6Net;

use crate::types::{DelegatedPrefix, Millis, PrefixKey};

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct PrefixPlan {
    /// New committed set: pending entries still valid at commit time.
    pub live: Vec<DelegatedPrefix>,
    /// Keys reported as removed: dropped from the set or expired.
    pub withdrawn: Vec<PrefixKey>,
    pub filters_off: Vec<Ipv6Net>,
    pub filters_on: Vec<Ipv6Net>,
}

pub(crate) fn plan(
    committed: &[DelegatedPrefix],
    pending: &[DelegatedPrefix],
    now: Millis,
) -> PrefixPlan {
    let (live, expired): (Vec<_>, Vec<_>) = merge(pending).into_iter().partition(|p| p.is_live(now));
    let live_keys: HashSet<PrefixKey> = live.iter().map(DelegatedPrefix::key).collect();

    let mut withdrawn: Vec<PrefixKey> = committed
        .iter()
        .map(DelegatedPrefix::key)
        .filter(|key| !live_keys.contains(key))
        .collect();
    for key in expired.iter().map(DelegatedPrefix::key) {
        if !withdrawn.contains(&key) {
            withdrawn.push(key);
        }
    }

    let old: HashSet<Ipv6Net> = committed.iter().map(|p| p.prefix).collect();
    let new: HashSet<Ipv6Net> = live.iter().map(|p| p.prefix).collect();
    let filters_off = distinct(committed.iter().map(|p| p.prefix).filter(|p| !new.contains(p)));
    let filters_on = distinct(live.iter().map(|p| p.prefix).filter(|p| !old.contains(p)));

    PrefixPlan {
        live,
        withdrawn,
        filters_off,
        filters_on,
    }
}

/// Collapse duplicate keys: the last entry wins, in the slot of the first.
fn merge(pending: &[DelegatedPrefix]) -> Vec<DelegatedPrefix> {
    let mut merged: Vec<DelegatedPrefix> = Vec::with_capacity(pending.len());
    for entry in pending {
        match merged.iter_mut().find(|m| m.key() == entry.key()) {
            Some(slot) => *slot = entry.clone(),
            None => merged.push(entry.clone()),
        }
    }
    merged
}

fn distinct(prefixes: impl Iterator<Item = Ipv6Net>) -> Vec<Ipv6Net> {
    let mut out: Vec<Ipv6Net> = Vec::new();
    for p in prefixes {
        if !out.contains(&p) {
            out.push(p);
        }
    }
    out
}
