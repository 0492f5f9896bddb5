use std::sync::Arc;

use super::heap::SnowflakeHeap;
use super::registry::Registry;
use super::{NatType, Snowflake, HEAP_NONE};

fn slot(id: &str, clients: u32, seq: u64) -> Arc<Snowflake> {
    let (mut snowflake, _offer_rx) = Snowflake::new(id, "standalone", NatType::Unrestricted, seq);
    // priority key is (clients, seq); only tests ever start above zero
    if let Some(inner) = Arc::get_mut(&mut snowflake) {
        inner.clients = clients;
    }
    snowflake
}

#[test]
fn heap_orders_by_clients_then_seq() {
    let mut heap = SnowflakeHeap::new();
    heap.push(slot("c", 2, 0));
    heap.push(slot("a", 0, 1));
    heap.push(slot("b", 0, 2));
    heap.push(slot("d", 1, 3));
    heap.assert_indices();

    let order: Vec<String> = std::iter::from_fn(|| heap.pop())
        .map(|s| s.id().to_owned())
        .collect();
    assert_eq!(order, ["a", "b", "d", "c"]);
}

#[test]
fn heap_remove_middle_keeps_indices_and_sentinel() {
    let mut heap = SnowflakeHeap::new();
    let slots: Vec<_> = (0..7).map(|i| slot(&format!("s{i}"), 0, i)).collect();
    for s in &slots {
        heap.push(Arc::clone(s));
    }
    let victim = Arc::clone(&slots[3]);
    let removed = heap
        .remove(victim.heap_index() as usize)
        .expect("victim is resident");
    assert!(Arc::ptr_eq(&removed, &victim));
    assert_eq!(victim.heap_index(), HEAP_NONE);
    assert_eq!(heap.len(), 6);
    heap.assert_indices();

    // remaining slots still drain in seq order
    let order: Vec<String> = std::iter::from_fn(|| heap.pop())
        .map(|s| s.id().to_owned())
        .collect();
    assert_eq!(order, ["s0", "s1", "s2", "s4", "s5", "s6"]);
}

#[test]
fn heap_remove_out_of_range_is_none() {
    let mut heap = SnowflakeHeap::new();
    assert!(heap.is_empty());
    assert!(heap.remove(0).is_none());
    assert!(heap.pop().is_none());
}

#[test]
fn insert_routes_by_proxy_nat() {
    let mut registry = Registry::new();
    registry.insert("u", "standalone", NatType::Unrestricted);
    registry.insert("q", "standalone", NatType::Unknown);
    registry.insert("r", "standalone", NatType::Restricted);

    // unknown proxies pool with the unrestricted heap
    let (unrestricted, restricted) = registry.heaps();
    assert_eq!(unrestricted.len(), 2);
    assert_eq!(restricted.len(), 1);
    assert_eq!(registry.total(), 3);
}

#[test]
fn pop_best_follows_compatibility_rule() {
    let mut registry = Registry::new();
    registry.insert("u", "standalone", NatType::Unrestricted);
    registry.insert("r", "standalone", NatType::Restricted);

    // unrestricted client draws from the restricted heap
    let for_unrestricted = registry
        .pop_best(NatType::Unrestricted)
        .expect("restricted proxy available");
    assert_eq!(for_unrestricted.id(), "r");

    // restricted and unknown clients draw from the unrestricted heap
    let for_restricted = registry
        .pop_best(NatType::Restricted)
        .expect("unrestricted proxy available");
    assert_eq!(for_restricted.id(), "u");
    assert!(registry.pop_best(NatType::Unknown).is_none());
}

#[test]
fn pop_sets_sentinel_and_keeps_id_entry() {
    let mut registry = Registry::new();
    registry.insert("p1", "badge", NatType::Unrestricted);
    let popped = registry.pop_best(NatType::Restricted).expect("available");
    assert_eq!(popped.heap_index(), HEAP_NONE);
    assert_eq!(registry.heap_sizes(), (0, 0));
    // still in-flight: answer routing must find it by id
    assert!(registry.lookup("p1").is_some());

    registry.remove_entry_if_same(&popped);
    assert!(registry.lookup("p1").is_none());
    assert_eq!(registry.total(), 0);
}

#[test]
fn remove_slot_unlinks_resident_slot() {
    let mut registry = Registry::new();
    let (snowflake, _rx, _) = registry.insert("p1", "webext", NatType::Restricted);
    registry.insert("p2", "webext", NatType::Restricted);

    registry.remove_slot(&snowflake);
    assert_eq!(snowflake.heap_index(), HEAP_NONE);
    assert!(registry.lookup("p1").is_none());
    assert_eq!(registry.heap_sizes(), (0, 1));
}

#[test]
fn duplicate_id_displaces_resident_slot() {
    let mut registry = Registry::new();
    let (first, _rx1, none) = registry.insert("dup", "standalone", NatType::Unrestricted);
    assert!(none.is_none());

    let (second, _rx2, displaced) = registry.insert("dup", "standalone", NatType::Unrestricted);
    let displaced = displaced.expect("resident slot with same id is displaced");
    assert!(Arc::ptr_eq(&displaced, &first));
    assert_eq!(first.heap_index(), HEAP_NONE);
    assert_eq!(registry.total(), 1);
    assert!(Arc::ptr_eq(registry.lookup("dup").expect("present"), &second));
}

#[test]
fn stale_finalize_leaves_newcomer_entry() {
    let mut registry = Registry::new();
    registry.insert("dup", "standalone", NatType::Unrestricted);
    let stale = registry.pop_best(NatType::Restricted).expect("available");

    // same id re-polls while the first slot is in flight
    let (fresh, _rx, displaced) = registry.insert("dup", "standalone", NatType::Unrestricted);
    assert!(displaced.is_none());

    // the in-flight slot's teardown must not evict the newcomer
    registry.remove_entry_if_same(&stale);
    assert!(Arc::ptr_eq(registry.lookup("dup").expect("present"), &fresh));
}

#[test]
fn available_counts_selected_heap() {
    let mut registry = Registry::new();
    registry.insert("u1", "standalone", NatType::Unrestricted);
    registry.insert("u2", "standalone", NatType::Unknown);
    registry.insert("r1", "standalone", NatType::Restricted);

    assert_eq!(registry.available(NatType::Unrestricted), 1);
    assert_eq!(registry.available(NatType::Restricted), 2);
    assert_eq!(registry.available(NatType::Unknown), 2);
}
