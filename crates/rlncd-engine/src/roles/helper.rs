//! One-hop opportunistic helper.
//!
//! Overhears coded traffic on a neighboring flow. Once its overheard rank
//! reaches the computed threshold it recodes help packets on credit, up
//! to a budget; an ACK, a spent budget, or idleness ends the generation.
//! Only `WAIT` and `DONE` exist: every event drives `WAIT -> DONE`.

use std::sync::{Arc, Mutex, MutexGuard};

use rlncd_core::budget;
use rlncd_core::types::{FlowKey, FrameType};
use rlncd_coding::BlockRecoder;
use tokio::task::JoinHandle;

use crate::coder_map::MapCoder;
use crate::roles::{CoderCore, CoderCtx};
use crate::state::{StateId, STATE_DONE, STATE_ROLE_BASE, STATE_WAIT};

const STATE_COUNT: StateId = STATE_ROLE_BASE;

const EVENT_ACKED: u8 = 0;
const EVENT_BUDGET_SENT: u8 = 1;
const EVENT_TIMEOUT: u8 = 2;
const EVENT_COUNT: u8 = 3;

struct HelperInner {
    codec: BlockRecoder,
    hlp_pkt_count: u64,
    enc_pkt_count: u64,
    max_budget: u64,
    threshold: u64,
    credit: f64,
    budget: f64,
}

/// Per-generation helper actor.
pub struct Helper {
    core: CoderCore,
    inner: Mutex<HelperInner>,
}

impl Helper {
    pub fn new(ctx: Arc<CoderCtx>, key: FlowKey) -> Arc<Self> {
        let params = ctx.params.clone();
        let core = CoderCore::new(
            ctx,
            key,
            "helper",
            STATE_COUNT,
            EVENT_COUNT,
            params.helper_timeout,
        );

        let engine = &core.engine;
        engine.add_trans(STATE_WAIT, EVENT_TIMEOUT, STATE_DONE);
        engine.add_trans(STATE_WAIT, EVENT_ACKED, STATE_DONE);
        engine.add_trans(STATE_WAIT, EVENT_BUDGET_SENT, STATE_DONE);
        engine.add_trans(STATE_DONE, EVENT_ACKED, STATE_DONE);
        engine.add_trans(STATE_DONE, EVENT_BUDGET_SENT, STATE_DONE);

        Arc::new(Self {
            core,
            inner: Mutex::new(HelperInner {
                codec: BlockRecoder::new(params.generation_size, params.symbol_size),
                hlp_pkt_count: 0,
                enc_pkt_count: 0,
                max_budget: 0,
                threshold: 0,
                credit: 0.0,
                budget: 0.0,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HelperInner> {
        self.inner.lock().expect("helper state poisoned")
    }

    /// Overhear one coded payload.
    pub fn add_enc_packet(&self, data: &[u8]) {
        let mut inner = self.lock();
        if self.core.engine.curr_state() == STATE_DONE {
            return;
        }

        if data.len() != self.core.params().payload_size() {
            self.core.counters.inc("invalid length");
            tracing::warn!(
                coder = self.core.id,
                len = data.len(),
                expected = self.core.params().payload_size(),
                "dropping helper frame with bad length"
            );
            return;
        }

        let old_rank = inner.codec.rank();
        if let Err(err) = inner.codec.feed(data) {
            self.core.counters.inc("invalid length");
            tracing::warn!(coder = self.core.id, %err, "helper rejected payload");
            return;
        }

        self.core.timer.touch();
        inner.enc_pkt_count += 1;
        self.core.counters.inc("encoded received");

        if inner.codec.rank() == old_rank {
            return;
        }

        if inner.codec.rank() as u64 >= inner.threshold {
            self.send_credits(&mut inner);
        }

        if inner.hlp_pkt_count >= inner.max_budget {
            self.core.engine.dispatch_event(EVENT_BUDGET_SENT);
        }
    }

    /// The destination holds the generation; stop helping.
    pub fn add_ack_packet(&self) {
        self.core.engine.dispatch_event(EVENT_ACKED);
        self.core.counters.inc("acks received");
        tracing::debug!(
            coder = self.core.id,
            sent = self.lock().hlp_pkt_count,
            "acked after helping"
        );
    }

    /// Helpers leave retransmission requests to the source.
    pub fn add_req_packet(&self, rank: u16, seq: u16) {
        let _ = (rank, seq);
    }

    /// Accrue credit and emit help packets while it lasts.
    fn send_credits(&self, inner: &mut HelperInner) {
        inner.budget += inner.credit;
        if inner.budget <= 0.0 {
            return;
        }

        if inner.hlp_pkt_count == 0 {
            tracing::debug!(
                coder = self.core.id,
                budget = inner.max_budget,
                "starting to help"
            );
        }

        while inner.budget >= 1.0 && inner.hlp_pkt_count <= inner.max_budget {
            if !self.emit_help(inner) {
                break;
            }
            inner.budget -= 1.0;
        }
    }

    /// Emit one recoded help payload.
    fn emit_help(&self, inner: &mut HelperInner) -> bool {
        let mut payload = vec![0u8; self.core.params().payload_size()];
        if let Err(err) = inner.codec.recode(&mut payload) {
            tracing::warn!(coder = self.core.id, %err, "help recode failed");
            return false;
        }

        self.core
            .outbound()
            .send_frame(self.core.key, FrameType::Hlp, payload);
        inner.hlp_pkt_count += 1;
        self.core.counters.inc("helper packets");
        tracing::trace!(coder = self.core.id, "sent help packet");
        true
    }

    async fn drive(self: Arc<Self>) {
        loop {
            self.core.engine.wait().await;
            if !self.core.engine.advance() {
                break;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn hlp_pkt_count(&self) -> u64 {
        self.lock().hlp_pkt_count
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> StateId {
        self.core.engine.curr_state()
    }
}

impl MapCoder for Helper {
    fn init(self: &Arc<Self>) {
        let params = self.core.params();
        let key = self.core.key;

        // Solicit helper advertisements and both link legs for this path.
        self.core.outbound().read_relays(key.src, key.dst);
        self.core.outbound().read_link(key.src);
        self.core.outbound().read_link(key.dst);

        let (e1, e2, e3) = params.error_estimates();
        let g = params.generation_size as u64;

        let mut inner = self.lock();
        inner.max_budget = budget::helper_max_budget(g, e1, e2, e3, params.fixed_overshoot);
        inner.threshold = budget::helper_threshold(g, e1, e2, e3, params.helper_threshold);
        inner.credit = budget::helper_credit(e1, e2, e3);
        inner.budget = 0.0;

        self.core.engine.set_state(STATE_WAIT);
        tracing::debug!(
            coder = self.core.id,
            key = %key,
            e1,
            e2,
            e3,
            threshold = inner.threshold,
            credit = inner.credit,
            max_budget = inner.max_budget,
            "helper initialized"
        );
    }

    fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let me = Arc::clone(self);
        tokio::spawn(me.drive())
    }

    fn process(&self) -> bool {
        if self.core.engine.curr_state() == STATE_DONE {
            return true;
        }

        if self.core.timer.is_timed_out() {
            self.core.counters.inc("timeouts");
            tracing::debug!(
                coder = self.core.id,
                rank = self.lock().codec.rank(),
                "helper timed out"
            );
            self.core.engine.dispatch_event(EVENT_TIMEOUT);
        }

        false
    }

    fn is_valid(&self) -> bool {
        true
    }

    fn stop(&self) {
        self.core.engine.stop();
    }
}
