//! Role coders: encoder, decoder, recoder, helper.
//!
//! Every role embeds the same skeleton: its flow key, the shared context,
//! a group-bound counter handle, a state engine, and an activity timer.
//! Role-mutable state (the RLNC codec handle, packet counters, budget
//! accumulators) lives behind one operational mutex per coder; all public
//! operations and state handlers take it before touching that state.

pub mod decoder;
pub mod encoder;
pub mod helper;
pub mod recoder;

pub use decoder::Decoder;
pub use encoder::Encoder;
pub use helper::Helper;
pub use recoder::Recoder;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rlncd_core::constants::ONE;
use rlncd_core::types::{FlowKey, MeshAddr};
use tokio::sync::watch;

use crate::counters::{CounterStore, Counters};
use crate::links::LinkDb;
use crate::outbound::OutboundSink;
use crate::params::Params;
use crate::state::{EventId, StateEngine, StateId};
use crate::timer::ActivityTimer;

/// Dependencies handed to every coder at creation.
pub struct CoderCtx {
    pub params: Arc<Params>,
    pub counters: CounterStore,
    pub links: Arc<LinkDb>,
    pub outbound: OutboundSink,
    /// Tripped on unrecoverable corruption; the daemon observes it and
    /// shuts down.
    pub fatal: watch::Sender<bool>,
}

static NEXT_CODER_ID: AtomicU64 = AtomicU64::new(0);

/// Common per-coder skeleton.
pub(crate) struct CoderCore {
    pub id: u64,
    pub key: FlowKey,
    pub ctx: Arc<CoderCtx>,
    pub counters: Counters,
    pub engine: StateEngine,
    pub timer: ActivityTimer,
}

impl CoderCore {
    pub fn new(
        ctx: Arc<CoderCtx>,
        key: FlowKey,
        group: &'static str,
        states: StateId,
        events: EventId,
        timeout: f64,
    ) -> Self {
        let id = NEXT_CODER_ID.fetch_add(1, Ordering::Relaxed);
        let counters = ctx.counters.group(group);
        let packet_timeout = ctx.params.packet_timeout;
        Self {
            id,
            key,
            ctx,
            counters,
            engine: StateEngine::new(id, states, events),
            timer: ActivityTimer::new(timeout, packet_timeout),
        }
    }

    pub fn params(&self) -> &Params {
        &self.ctx.params
    }

    pub fn outbound(&self) -> &OutboundSink {
        &self.ctx.outbound
    }

    /// Acknowledge the generation to the previous hop.
    pub fn send_ack(&self) {
        self.ctx.outbound.send_ack(self.key);
        self.counters.inc("ack sent");
        tracing::trace!(coder = self.id, key = %self.key, "sent ack");
    }
}

/// Loss estimates derived from live link samples toward `dst`.
///
/// Returns `None` when no one-hop candidate is known. A missing TQ sample
/// reads as 1, so the derived estimate lands on the missing-estimate
/// fallback in the budget formulas; a zero second-hop quality produces
/// `e2 == ONE` outright.
pub(crate) fn link_estimates(links: &LinkDb, dst: MeshAddr) -> Option<(u8, u8, u8)> {
    let best = links.best_one_hop(dst)?;
    let one = ONE as u8;

    let e1 = one - links.tq(best.addr);
    // Scale the second hop back up to undo the routing layer's hop penalty.
    let scaled = (f64::from(best.tq_second_hop) * 4.5).min(255.0) as u8;
    let e2 = one - scaled;
    let e3 = one - links.tq(dst);
    Some((e1, e2, e3))
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use rlncd_core::types::Outbound;
    use tokio::sync::mpsc;

    /// A context wired to a capture channel, for role unit tests.
    pub fn ctx_with_params(
        params: Params,
    ) -> (Arc<CoderCtx>, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, rx) = OutboundSink::channel();
        let (fatal, _) = watch::channel(false);
        let ctx = Arc::new(CoderCtx {
            params: Arc::new(params),
            counters: CounterStore::new(),
            links: Arc::new(LinkDb::new()),
            outbound,
            fatal,
        });
        (ctx, rx)
    }

    pub fn key(block: u16) -> FlowKey {
        FlowKey::new(MeshAddr::new([0x0A; 6]), MeshAddr::new([0x0B; 6]), block)
    }
}
