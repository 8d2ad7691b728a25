//! Resolver node state: the local store plus the two lookup tries built from it.
//!
//! The store and both tries are written only by the change-application task.
//! Query tasks read the tries through [`ArcSwap`] snapshots, and a trie is
//! swapped only after the store transaction backing it has committed, so a
//! query never sees a zone whose records are not yet readable.

pub mod apply;
pub mod query;

pub use apply::{ApplyError, ApplyOutcome, ChangeApplier};
pub use query::{FirewallOrder, QueryEngine, Rcode, Resolution};

use crate::store::{AuthoritativeStore, StoreError};
use crate::trie::{FirewallTrie, ZoneTrie};
use arc_swap::ArcSwap;
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
pub struct ResolverState {
    store: Arc<AuthoritativeStore>,
    zones: ArcSwap<ZoneTrie>,
    firewall: ArcSwap<FirewallTrie>,
}

impl ResolverState {
    /// Builds the tries from whatever the store already holds.
    pub fn load(store: Arc<AuthoritativeStore>) -> Result<Self, StoreError> {
        let mut zones = ZoneTrie::zones();
        for zone in store.zones() {
            zones.insert(&zone, zone.clone());
        }

        let mut firewall = FirewallTrie::rules();
        let rules = store.firewall_rules()?;
        for stored in &rules {
            for domain in stored.rule.normalized_domains() {
                firewall.insert(&domain, stored.rule.id);
            }
        }

        info!(
            zones = zones.names().len(),
            firewall_rules = rules.len(),
            "Resolver state loaded from store"
        );
        Ok(Self {
            store,
            zones: ArcSwap::from_pointee(zones),
            firewall: ArcSwap::from_pointee(firewall),
        })
    }

    /// State over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(AuthoritativeStore::in_memory()),
            zones: ArcSwap::from_pointee(ZoneTrie::zones()),
            firewall: ArcSwap::from_pointee(FirewallTrie::rules()),
        }
    }

    pub fn store(&self) -> &Arc<AuthoritativeStore> {
        &self.store
    }

    pub fn zones(&self) -> Arc<ZoneTrie> {
        self.zones.load_full()
    }

    pub fn firewall(&self) -> Arc<FirewallTrie> {
        self.firewall.load_full()
    }

    // Single writer: clone, edit and publish without compare-and-swap.
    pub(crate) fn update_zones(&self, f: impl FnOnce(&mut ZoneTrie)) {
        let mut next = ZoneTrie::clone(&self.zones.load());
        f(&mut next);
        self.zones.store(Arc::new(next));
    }

    pub(crate) fn update_firewall(&self, f: impl FnOnce(&mut FirewallTrie)) {
        let mut next = FirewallTrie::clone(&self.firewall.load());
        f(&mut next);
        self.firewall.store(Arc::new(next));
    }
}
