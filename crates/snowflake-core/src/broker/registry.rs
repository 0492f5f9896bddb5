//! Proxy registry: two priority heaps plus an id index.
//!
//! Restricted-NAT snowflakes go to their own heap because they can only
//! serve unrestricted clients; everything else (unrestricted or unknown)
//! is generally reachable and pools together. All three structures are
//! guarded by the single registry lock in
//! [`BrokerContext`](super::BrokerContext) and no method here blocks.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::oneshot;

use super::heap::SnowflakeHeap;
use super::{ClientOffer, NatType, Snowflake, HEAP_NONE};

pub(crate) struct Registry {
    unrestricted: SnowflakeHeap,
    restricted: SnowflakeHeap,
    by_id: HashMap<String, Arc<Snowflake>>,
    next_seq: u64,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            unrestricted: SnowflakeHeap::new(),
            restricted: SnowflakeHeap::new(),
            by_id: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Create and register a snowflake. Returns the slot, its offer
    /// receiver for the engine waiter, and any displaced heap-resident slot
    /// that previously held the same id (its gauge entry is the caller's to
    /// settle). A same-id slot already in flight with a matcher keeps
    /// running; it just loses its index entry to the newcomer.
    pub fn insert(
        &mut self,
        id: &str,
        proxy_type: &str,
        nat_type: NatType,
    ) -> (
        Arc<Snowflake>,
        oneshot::Receiver<ClientOffer>,
        Option<Arc<Snowflake>>,
    ) {
        let displaced = self
            .by_id
            .get(id)
            .filter(|prev| prev.heap_index() != HEAP_NONE)
            .map(Arc::clone);
        if let Some(prev) = &displaced {
            let index = prev.heap_index() as usize;
            self.heap_mut(prev.nat_type()).remove(index);
            self.by_id.remove(id);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let (snowflake, offer_rx) = Snowflake::new(id, proxy_type, nat_type, seq);
        self.heap_mut(nat_type).push(Arc::clone(&snowflake));
        self.by_id.insert(id.to_owned(), Arc::clone(&snowflake));
        (snowflake, offer_rx, displaced)
    }

    /// Pop the least-served slot compatible with `client_nat`.
    ///
    /// Restricted proxies are reserved for unrestricted clients; everyone
    /// else draws from the unrestricted heap. The popped slot's index
    /// becomes the sentinel but it stays in the id index so the answer
    /// round-trip can still find it.
    pub fn pop_best(&mut self, client_nat: NatType) -> Option<Arc<Snowflake>> {
        match client_nat {
            NatType::Unrestricted => self.restricted.pop(),
            _ => self.unrestricted.pop(),
        }
    }

    /// Unlink a heap-resident slot in place and drop its index entry.
    /// Callers check heap residency under the same lock acquisition.
    pub fn remove_slot(&mut self, snowflake: &Arc<Snowflake>) {
        let index = snowflake.heap_index();
        if index != HEAP_NONE {
            self.heap_mut(snowflake.nat_type()).remove(index as usize);
        }
        self.remove_entry_if_same(snowflake);
    }

    /// Remove the id entry only if it still points at this exact slot, so
    /// a same-id newcomer registered in the meantime is left alone.
    pub fn remove_entry_if_same(&mut self, snowflake: &Arc<Snowflake>) {
        if let Some(current) = self.by_id.get(snowflake.id()) {
            if Arc::ptr_eq(current, snowflake) {
                self.by_id.remove(snowflake.id());
            }
        }
    }

    pub fn lookup(&self, id: &str) -> Option<&Arc<Snowflake>> {
        self.by_id.get(id)
    }

    /// Size of the heap a client of the given NAT class would draw from.
    pub fn available(&self, client_nat: NatType) -> usize {
        match client_nat {
            NatType::Unrestricted => self.restricted.len(),
            _ => self.unrestricted.len(),
        }
    }

    pub fn total(&self) -> usize {
        self.by_id.len()
    }

    pub fn heap_sizes(&self) -> (usize, usize) {
        (self.unrestricted.len(), self.restricted.len())
    }

    pub fn snowflakes(&self) -> impl Iterator<Item = &Arc<Snowflake>> {
        self.by_id.values()
    }

    fn heap_mut(&mut self, nat_type: NatType) -> &mut SnowflakeHeap {
        match nat_type {
            NatType::Restricted => &mut self.restricted,
            _ => &mut self.unrestricted,
        }
    }

    #[cfg(test)]
    pub(crate) fn heaps(&self) -> (&SnowflakeHeap, &SnowflakeHeap) {
        (&self.unrestricted, &self.restricted)
    }
}
