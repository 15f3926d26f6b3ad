//! Source-side encoder.
//!
//! Collects plain packets into a generation, tells the kernel to stop
//! feeding once full, then emits coded payloads (systematic first) until
//! its budget is spent and an ACK or timeout ends the generation.
//!
//! ```text
//!            FULL            START              BUDGET_SENT
//!  WAIT ───────────> FULL ─────────> SEND_BUDGET ─────────> WAIT_ACK
//!   │                  │                   │                    │
//!   │ TIMEOUT|ACKED    │ ACKED             │ ACKED              │ ACKED|TIMEOUT
//!   └───────> DONE <───┴───────────────────┴────────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use rlncd_core::budget;
use rlncd_core::constants::{BLOCKED_TIMEOUT_FACTOR, LEN_SIZE};
use rlncd_core::types::{FlowKey, FrameType};
use rlncd_coding::BlockEncoder;
use tokio::task::JoinHandle;

use crate::coder_map::MapCoder;
use crate::gate::EncoderGate;
use crate::roles::{link_estimates, CoderCore, CoderCtx};
use crate::state::{StateId, STATE_DONE, STATE_ROLE_BASE, STATE_WAIT};

const STATE_FULL: StateId = STATE_ROLE_BASE;
const STATE_SEND_BUDGET: StateId = STATE_ROLE_BASE + 1;
const STATE_WAIT_ACK: StateId = STATE_ROLE_BASE + 2;
const STATE_COUNT: StateId = STATE_ROLE_BASE + 3;

const EVENT_FULL: u8 = 0;
const EVENT_START: u8 = 1;
const EVENT_BUDGET_SENT: u8 = 2;
const EVENT_ACKED: u8 = 3;
const EVENT_TIMEOUT: u8 = 4;
const EVENT_COUNT: u8 = 5;

struct EncoderInner {
    codec: BlockEncoder,
    plain_pkt_count: usize,
    enc_pkt_count: u64,
    last_req_seq: u16,
    budget: f64,
    max_budget: f64,
    frame_type: FrameType,
    ests: (u8, u8, u8),
}

/// Per-generation encoder actor.
pub struct Encoder {
    core: CoderCore,
    gate: Arc<EncoderGate>,
    /// Whether this encoder currently holds an admission slot.
    holds_slot: AtomicBool,
    inner: Mutex<EncoderInner>,
}

impl Encoder {
    pub fn new(ctx: Arc<CoderCtx>, key: FlowKey, gate: Arc<EncoderGate>) -> Arc<Self> {
        let params = ctx.params.clone();
        let core = CoderCore::new(
            ctx,
            key,
            "encoder",
            STATE_COUNT,
            EVENT_COUNT,
            params.encoder_timeout,
        );

        let engine = &core.engine;
        engine.add_trans(STATE_WAIT, EVENT_FULL, STATE_FULL);
        engine.add_trans(STATE_WAIT, EVENT_TIMEOUT, STATE_DONE);
        engine.add_trans(STATE_WAIT, EVENT_ACKED, STATE_DONE);
        engine.add_trans(STATE_FULL, EVENT_START, STATE_SEND_BUDGET);
        engine.add_trans(STATE_FULL, EVENT_ACKED, STATE_DONE);
        engine.add_trans(STATE_SEND_BUDGET, EVENT_BUDGET_SENT, STATE_WAIT_ACK);
        engine.add_trans(STATE_SEND_BUDGET, EVENT_ACKED, STATE_DONE);
        engine.add_trans(STATE_WAIT_ACK, EVENT_ACKED, STATE_DONE);
        engine.add_trans(STATE_WAIT_ACK, EVENT_TIMEOUT, STATE_DONE);

        let mut codec = BlockEncoder::new(params.generation_size, params.symbol_size);
        codec.set_systematic(params.systematic);

        Arc::new(Self {
            core,
            gate,
            holds_slot: AtomicBool::new(false),
            inner: Mutex::new(EncoderInner {
                codec,
                plain_pkt_count: 0,
                enc_pkt_count: 0,
                last_req_seq: 0,
                budget: 0.0,
                max_budget: 0.0,
                frame_type: FrameType::Enc,
                ests: (0, 0, 0),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, EncoderInner> {
        self.inner.lock().expect("encoder state poisoned")
    }

    /// Add one uncoded packet to the generation.
    pub fn add_plain_packet(&self, data: &[u8]) {
        let params = self.core.params();
        if data.len() > params.max_plain_len() {
            self.core.counters.inc("oversized plain packets");
            tracing::warn!(
                coder = self.core.id,
                len = data.len(),
                max = params.max_plain_len(),
                "dropping oversized plain packet"
            );
            return;
        }

        let mut inner = self.lock();
        if self.core.engine.curr_state() != STATE_WAIT {
            return;
        }

        let mut symbol = vec![0u8; LEN_SIZE + data.len()];
        symbol[..LEN_SIZE].copy_from_slice(&(data.len() as u16).to_le_bytes());
        symbol[LEN_SIZE..].copy_from_slice(data);

        let index = inner.plain_pkt_count;
        if let Err(err) = inner.codec.set_symbol(index, &symbol) {
            tracing::warn!(coder = self.core.id, %err, "failed to store plain packet");
            return;
        }
        inner.plain_pkt_count += 1;

        self.core.timer.touch();
        self.core.counters.inc("plain packets added");
        tracing::trace!(coder = self.core.id, count = inner.plain_pkt_count, "added plain packet");

        let g = params.generation_size;
        if inner.plain_pkt_count >= g {
            self.core.counters.inc("generations");
            self.core.engine.dispatch_event(EVENT_FULL);
        } else if (inner.codec.rank() as f64) > params.encoder_threshold * g as f64
            && self.gate.count() > 0
        {
            let (e1, e2, e3) = inner.ests;
            inner.budget += budget::recoder_credit(e1, e2, e3);
            self.send_credit(&mut inner);
        }
    }

    /// The next hop holds the whole generation; finish up.
    pub fn add_ack_packet(&self) {
        let inner = self.lock();
        if self.core.engine.curr_state() == STATE_DONE {
            return;
        }

        if inner.plain_pkt_count >= self.core.params().generation_size {
            self.release_gate();
        }

        self.core.engine.dispatch_event(EVENT_ACKED);
        self.core.counters.inc("ack packets added");
        tracing::debug!(
            coder = self.core.id,
            sent = inner.enc_pkt_count,
            "generation acked"
        );
    }

    /// A decoder is short on rank; emit redundant payloads on credit.
    pub fn add_req_packet(&self, rank: u16, seq: u16) {
        let mut inner = self.lock();

        let local_rank = inner.codec.rank() as u16;
        if inner.last_req_seq == seq || rank == local_rank {
            return;
        }

        let (_, _, e3) = inner.ests;
        let missing = u64::from(local_rank.saturating_sub(rank));
        let credits =
            budget::source_budget(missing, 254, 254, e3, self.core.params().fixed_overshoot);

        inner.budget = credits;
        if inner.enc_pkt_count as f64 >= inner.max_budget {
            inner.max_budget += credits;
        }
        inner.frame_type = FrameType::Red;

        tracing::debug!(
            coder = self.core.id,
            rank,
            seq,
            credits,
            max_budget = inner.max_budget,
            "request received"
        );

        self.send_credit(&mut inner);
        self.core.timer.touch();
        inner.last_req_seq = seq;
        self.core.counters.inc("request packets added");
    }

    /// Emit one coded payload. Returns false when encoding failed.
    fn emit(&self, inner: &mut EncoderInner) -> bool {
        let mut payload = vec![0u8; self.core.params().payload_size()];
        if let Err(err) = inner.codec.encode(&mut payload) {
            tracing::warn!(coder = self.core.id, %err, "encode failed");
            return false;
        }

        self.core
            .outbound()
            .send_frame(self.core.key, inner.frame_type, payload);
        inner.enc_pkt_count += 1;
        inner.budget -= 1.0;
        self.core.counters.inc("encoded sent");
        true
    }

    /// Emit while credit remains and the budget cap allows.
    fn send_credit(&self, inner: &mut EncoderInner) {
        while inner.budget >= 1.0 && (inner.enc_pkt_count as f64) < inner.max_budget {
            if !self.emit(inner) {
                break;
            }
        }
    }

    /// `FULL` handler: stop the kernel feed, wait for an admission slot.
    async fn blocked_state(&self) {
        self.core.outbound().send_block();
        tracing::debug!(coder = self.core.id, "blocked kernel feed");

        self.gate.wait().await;
        self.holds_slot.store(true, Ordering::Release);

        self.core.engine.dispatch_event(EVENT_START);
        self.core.timer.touch();
    }

    /// `SEND_BUDGET` handler: burst coded payloads up to the budget.
    fn send_budget_state(&self) {
        let mut inner = self.lock();
        tracing::debug!(
            coder = self.core.id,
            remaining = inner.max_budget - inner.enc_pkt_count as f64,
            "sending budget"
        );

        while (inner.enc_pkt_count as f64) < inner.max_budget {
            if !self.emit(&mut inner) {
                break;
            }
        }

        self.core.timer.touch();
        self.core.engine.dispatch_event(EVENT_BUDGET_SENT);
    }

    /// Resume the kernel feed and return the admission slot if held.
    fn release_gate(&self) {
        self.core.outbound().send_unblock();
        if self.holds_slot.swap(false, Ordering::AcqRel) {
            self.gate.notify();
        }
    }

    async fn drive(self: Arc<Self>) {
        loop {
            match self.core.engine.curr_state() {
                STATE_FULL => self.blocked_state().await,
                STATE_SEND_BUDGET => self.send_budget_state(),
                _ => self.core.engine.wait().await,
            }
            if !self.core.engine.advance() {
                break;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn enc_pkt_count(&self) -> u64 {
        self.lock().enc_pkt_count
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> StateId {
        self.core.engine.curr_state()
    }
}

impl MapCoder for Encoder {
    fn init(self: &Arc<Self>) {
        let params = self.core.params();
        let links = &self.core.ctx.links;
        let outbound = self.core.outbound();

        // Solicit fresh link data for the next generation on this path.
        outbound.read_link(self.core.key.dst);
        outbound.read_one_hops(self.core.key.dst);
        if let Some(best) = links.best_one_hop(self.core.key.dst) {
            outbound.read_link(best.addr);
        }

        let ests = if params.link_estimates {
            link_estimates(links, self.core.key.dst).unwrap_or_else(|| params.error_estimates())
        } else {
            params.error_estimates()
        };

        let mut inner = self.lock();
        inner.ests = ests;
        let (e1, e2, e3) = ests;
        inner.max_budget = budget::source_budget(
            params.generation_size as u64,
            e1,
            e2,
            e3,
            params.fixed_overshoot,
        );

        self.core.engine.set_state(STATE_WAIT);
        tracing::debug!(
            coder = self.core.id,
            key = %self.core.key,
            max_budget = inner.max_budget,
            "encoder initialized"
        );
    }

    fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let me = Arc::clone(self);
        tokio::spawn(me.drive())
    }

    fn process(&self) -> bool {
        let state = self.core.engine.curr_state();

        if state == STATE_FULL {
            let window = BLOCKED_TIMEOUT_FACTOR * self.core.params().encoder_timeout;
            if self.core.timer.is_timed_out_after(window) {
                self.core.counters.inc("blocked timeouts");
                tracing::error!(coder = self.core.id, "timed out while blocked");
                self.release_gate();
                return true;
            }
            return false;
        }

        if state == STATE_DONE {
            return true;
        }

        if self.core.timer.is_timed_out() {
            let inner = self.lock();
            tracing::error!(
                coder = self.core.id,
                rank = inner.plain_pkt_count,
                state,
                "encoder timed out"
            );
            self.core.engine.dispatch_event(EVENT_TIMEOUT);
            self.core.counters.inc("timeouts");
            if inner.plain_pkt_count >= self.core.params().generation_size {
                self.release_gate();
            }
        }

        false
    }

    /// An encoder accepts plain packets until the generation fills.
    fn is_valid(&self) -> bool {
        self.lock().plain_pkt_count < self.core.params().generation_size
    }

    fn stop(&self) {
        self.core.engine.stop();
    }
}
