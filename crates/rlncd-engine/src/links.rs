//! In-memory link-quality store.
//!
//! Refreshed asynchronously from routing-layer replies; readers tolerate
//! stale or missing entries. A missing link sample reads as TQ 1 so the
//! derived loss estimate lands on the "missing estimate" fallback branch
//! of the budget formulas.

use std::collections::HashMap;
use std::sync::Mutex;

use rlncd_core::types::{HopInfo, MeshAddr};

#[derive(Default)]
struct LinkDbInner {
    /// Neighbor address -> transmit quality byte.
    links: HashMap<MeshAddr, u8>,
    /// Destination -> advertised one-hop candidates.
    one_hops: HashMap<MeshAddr, Vec<HopInfo>>,
    /// (src, dst) path -> advertised helpers.
    helpers: HashMap<(MeshAddr, MeshAddr), Vec<HopInfo>>,
}

/// Shared per-neighbor link state.
#[derive(Default)]
pub struct LinkDb {
    inner: Mutex<LinkDbInner>,
}

impl LinkDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a link-quality sample for a neighbor.
    pub fn set_link(&self, addr: MeshAddr, tq: u8) {
        tracing::trace!(%addr, tq, "link sample");
        self.inner.lock().expect("link db poisoned").links.insert(addr, tq);
    }

    /// Transmit quality toward `addr`, or 1 when no sample exists.
    pub fn tq(&self, addr: MeshAddr) -> u8 {
        let inner = self.inner.lock().expect("link db poisoned");
        match inner.links.get(&addr).copied() {
            Some(0) | None => 1,
            Some(tq) => tq,
        }
    }

    /// Replace the one-hop candidate set toward `dst`.
    pub fn replace_one_hops(&self, dst: MeshAddr, hops: Vec<HopInfo>) {
        tracing::trace!(%dst, count = hops.len(), "one-hop update");
        self.inner
            .lock()
            .expect("link db poisoned")
            .one_hops
            .insert(dst, hops);
    }

    /// The one-hop candidate with the best total quality toward `dst`.
    pub fn best_one_hop(&self, dst: MeshAddr) -> Option<HopInfo> {
        let inner = self.inner.lock().expect("link db poisoned");
        inner
            .one_hops
            .get(&dst)?
            .iter()
            .filter(|h| h.tq_total > 0)
            .max_by_key(|h| h.tq_total)
            .copied()
    }

    /// Replace the helper advertisement set for a path.
    pub fn replace_helpers(&self, src: MeshAddr, dst: MeshAddr, helpers: Vec<HopInfo>) {
        tracing::trace!(%src, %dst, count = helpers.len(), "helper update");
        self.inner
            .lock()
            .expect("link db poisoned")
            .helpers
            .insert((src, dst), helpers);
    }

    /// Advertised helpers for a path, best quality first.
    pub fn helpers(&self, src: MeshAddr, dst: MeshAddr) -> Vec<HopInfo> {
        let inner = self.inner.lock().expect("link db poisoned");
        let mut list = inner
            .helpers
            .get(&(src, dst))
            .cloned()
            .unwrap_or_default();
        list.sort_by(|a, b| b.tq_total.cmp(&a.tq_total));
        list
    }
}
