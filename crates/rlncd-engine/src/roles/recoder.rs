//! Multi-hop relay recoder.
//!
//! Absorbs coded payloads into a recoding buffer and re-emits fresh
//! combinations: by credit while the generation is still filling, by
//! budget once it completes, and one redundant payload per further
//! arrival while waiting for the downstream ACK.
//!
//! ```text
//!          RX                    CREDIT_SENT
//!  WAIT ─────────> SEND_CREDIT ─────────────> WAIT
//!   │                │      │ MAXED
//!   │ COMPLETE       │      └───────────> WAIT_ACK ── ACKED|TIMEOUT ──> DONE
//!   │                │ COMPLETE               ▲
//!   └──────> SEND_BUDGET ──── BUDGET_SENT ────┘
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use rlncd_core::budget;
use rlncd_core::constants::ONE;
use rlncd_core::types::{FlowKey, FrameType};
use rlncd_coding::{BlockRecoder, FeedOutcome};
use tokio::task::JoinHandle;

use crate::coder_map::MapCoder;
use crate::roles::{CoderCore, CoderCtx};
use crate::state::{StateId, STATE_DONE, STATE_ROLE_BASE, STATE_WAIT};

const STATE_SEND_CREDIT: StateId = STATE_ROLE_BASE;
const STATE_SEND_BUDGET: StateId = STATE_ROLE_BASE + 1;
const STATE_WAIT_ACK: StateId = STATE_ROLE_BASE + 2;
const STATE_COUNT: StateId = STATE_ROLE_BASE + 3;

const EVENT_TIMEOUT: u8 = 0;
const EVENT_RX: u8 = 1;
const EVENT_COMPLETE: u8 = 2;
const EVENT_ACKED: u8 = 3;
const EVENT_MAXED: u8 = 4;
const EVENT_CREDIT_SENT: u8 = 5;
const EVENT_BUDGET_SENT: u8 = 6;
const EVENT_COUNT: u8 = 7;

struct RecoderInner {
    codec: BlockRecoder,
    rec_pkt_count: u64,
    /// Whole-packet credit accumulator; fractional credit truncates.
    budget: i64,
    max_budget: u64,
    /// Estimates derived from live link samples at init.
    link_ests: (u8, u8, u8),
    /// Configured estimates, used for the credit increment.
    flag_ests: (u8, u8, u8),
}

/// Per-generation relay actor.
pub struct Recoder {
    core: CoderCore,
    inner: Mutex<RecoderInner>,
}

impl Recoder {
    pub fn new(ctx: Arc<CoderCtx>, key: FlowKey) -> Arc<Self> {
        let params = ctx.params.clone();
        let core = CoderCore::new(
            ctx,
            key,
            "recoder",
            STATE_COUNT,
            EVENT_COUNT,
            params.recoder_timeout,
        );

        let engine = &core.engine;
        engine.add_trans(STATE_WAIT, EVENT_RX, STATE_SEND_CREDIT);
        engine.add_trans(STATE_WAIT, EVENT_COMPLETE, STATE_SEND_BUDGET);
        engine.add_trans(STATE_WAIT, EVENT_TIMEOUT, STATE_DONE);
        engine.add_trans(STATE_WAIT, EVENT_ACKED, STATE_DONE);
        engine.add_trans(STATE_SEND_CREDIT, EVENT_CREDIT_SENT, STATE_WAIT);
        engine.add_trans(STATE_SEND_CREDIT, EVENT_ACKED, STATE_DONE);
        engine.add_trans(STATE_SEND_CREDIT, EVENT_MAXED, STATE_WAIT_ACK);
        engine.add_trans(STATE_SEND_CREDIT, EVENT_RX, STATE_SEND_CREDIT);
        engine.add_trans(STATE_SEND_CREDIT, EVENT_COMPLETE, STATE_SEND_BUDGET);
        engine.add_trans(STATE_SEND_BUDGET, EVENT_ACKED, STATE_DONE);
        engine.add_trans(STATE_SEND_BUDGET, EVENT_BUDGET_SENT, STATE_WAIT_ACK);
        engine.add_trans(STATE_WAIT_ACK, EVENT_ACKED, STATE_DONE);
        engine.add_trans(STATE_WAIT_ACK, EVENT_TIMEOUT, STATE_DONE);
        engine.add_trans(STATE_WAIT_ACK, EVENT_RX, STATE_WAIT_ACK);
        engine.add_trans(STATE_WAIT_ACK, EVENT_COMPLETE, STATE_WAIT_ACK);
        engine.add_trans(STATE_DONE, EVENT_ACKED, STATE_DONE);
        engine.add_trans(STATE_DONE, EVENT_RX, STATE_DONE);

        Arc::new(Self {
            core,
            inner: Mutex::new(RecoderInner {
                codec: BlockRecoder::new(params.generation_size, params.symbol_size),
                rec_pkt_count: 0,
                budget: 0,
                max_budget: 0,
                link_ests: (ONE as u8, ONE as u8, ONE as u8),
                flag_ests: (0, 0, 0),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, RecoderInner> {
        self.inner.lock().expect("recoder state poisoned")
    }

    /// Absorb one coded payload and react per the current state.
    pub fn add_enc_packet(&self, data: &[u8]) {
        let mut inner = self.lock();

        // Enough held already; push back on the sender.
        if inner.codec.is_complete() {
            self.core.send_ack();
            return;
        }
        if self.core.engine.curr_state() == STATE_DONE {
            return;
        }

        if data.len() != self.core.params().payload_size() {
            self.core.counters.inc("invalid length");
            tracing::warn!(
                coder = self.core.id,
                len = data.len(),
                expected = self.core.params().payload_size(),
                "dropping recoder frame with bad length"
            );
            return;
        }

        let old_rank = inner.codec.rank();
        let outcome = match inner.codec.feed(data) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.core.counters.inc("invalid length");
                tracing::warn!(coder = self.core.id, %err, "recoder rejected payload");
                return;
            }
        };

        if inner.codec.rank() == old_rank {
            self.core.counters.inc("non-innovative recoded packets");
        }
        self.core.timer.touch();

        // Systematic payloads are forwarded verbatim, spending budget.
        if let FeedOutcome::Innovative {
            systematic: Some(_),
        } = outcome
        {
            self.core.counters.inc("systematic packets added");
            self.forward_systematic(&mut inner, data);
            inner.budget -= 1;
        } else {
            self.core.counters.inc("encoded packets added");
        }

        if inner.codec.is_complete() {
            self.core.send_ack();
            self.core.engine.dispatch_event(EVENT_COMPLETE);
        } else {
            self.core.engine.dispatch_event(EVENT_RX);
            // Redundancy while awaiting the downstream ACK: one fresh
            // combination per arrival.
            if self.core.engine.curr_state() == STATE_WAIT_ACK {
                self.emit_recoded(&mut inner);
            }
        }

        tracing::trace!(coder = self.core.id, rank = inner.codec.rank(), "added encoded packet");
    }

    /// Downstream holds the generation; stop relaying.
    pub fn add_ack_packet(&self) {
        self.core.engine.dispatch_event(EVENT_ACKED);
        tracing::debug!(
            coder = self.core.id,
            sent = self.lock().rec_pkt_count,
            "generation acked downstream"
        );
    }

    /// Emit one fresh recoded payload. Returns false when nothing is held.
    fn emit_recoded(&self, inner: &mut RecoderInner) -> bool {
        let mut payload = vec![0u8; self.core.params().payload_size()];
        if let Err(err) = inner.codec.recode(&mut payload) {
            tracing::warn!(coder = self.core.id, %err, "recode failed");
            return false;
        }

        self.core
            .outbound()
            .send_frame(self.core.key, FrameType::Rec, payload);
        inner.rec_pkt_count += 1;
        self.core.counters.inc("forward packets written");
        true
    }

    /// Forward a systematic payload unmodified.
    fn forward_systematic(&self, inner: &mut RecoderInner, data: &[u8]) {
        self.core
            .outbound()
            .send_frame(self.core.key, FrameType::Rec, data.to_vec());
        inner.rec_pkt_count += 1;
        self.core.counters.inc("systematic packets written");
    }

    /// Credit accrues only while every link estimate is usable.
    fn update_budget(&self, inner: &mut RecoderInner) {
        let (l1, l2, l3) = inner.link_ests;
        let one = ONE as u8;
        if l1 == one || l2 == one || l3 == one {
            return;
        }
        let (e1, e2, e3) = inner.flag_ests;
        inner.budget = (inner.budget as f64 + budget::recoder_credit(e1, e2, e3)) as i64;
    }

    /// `SEND_CREDIT` handler.
    fn send_credit_state(&self) {
        let mut inner = self.lock();
        self.update_budget(&mut inner);

        if inner.budget <= 0 {
            self.core.engine.dispatch_event(EVENT_CREDIT_SENT);
            return;
        }

        while inner.budget > 0 && inner.rec_pkt_count <= inner.max_budget {
            if !self.emit_recoded(&mut inner) {
                break;
            }
            inner.budget -= 1;
        }

        if inner.rec_pkt_count >= inner.max_budget {
            self.core.engine.dispatch_event(EVENT_MAXED);
        } else {
            self.core.engine.dispatch_event(EVENT_CREDIT_SENT);
        }
    }

    /// `SEND_BUDGET` handler: emit up to the cap, aborting cleanly if a
    /// concurrent event (ACK) moves the machine elsewhere mid-burst.
    fn send_budget_state(&self) {
        loop {
            if self.core.engine.next_state() != STATE_SEND_BUDGET {
                break;
            }
            let mut inner = self.lock();
            if inner.rec_pkt_count >= inner.max_budget {
                break;
            }
            if !self.emit_recoded(&mut inner) {
                break;
            }
        }

        self.core.engine.dispatch_event(EVENT_BUDGET_SENT);
        self.core.counters.inc("forward generations written");
        let (sent, max) = {
            let inner = self.lock();
            (inner.rec_pkt_count, inner.max_budget)
        };
        tracing::debug!(coder = self.core.id, sent, max, "wrote recoded generation");
    }

    async fn drive(self: Arc<Self>) {
        loop {
            match self.core.engine.curr_state() {
                STATE_SEND_CREDIT => self.send_credit_state(),
                STATE_SEND_BUDGET => self.send_budget_state(),
                _ => self.core.engine.wait().await,
            }
            if !self.core.engine.advance() {
                break;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn rec_pkt_count(&self) -> u64 {
        self.lock().rec_pkt_count
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> StateId {
        self.core.engine.curr_state()
    }
}

impl MapCoder for Recoder {
    fn init(self: &Arc<Self>) {
        let params = self.core.params();
        let links = &self.core.ctx.links;
        let g = params.generation_size as u64;
        let one = ONE as u8;

        self.core.outbound().read_one_hops(self.core.key.dst);

        let mut inner = self.lock();
        inner.flag_ests = params.error_estimates();

        match links.best_one_hop(self.core.key.dst) {
            None => {
                tracing::debug!(coder = self.core.id, "no one-hop candidate");
                self.core.counters.inc("missing link estimates");
                inner.link_ests = (one, one, one);
                inner.max_budget = (g as f64 * params.fixed_overshoot) as u64;
            }
            Some(hop) => {
                self.core.outbound().read_link(hop.addr);
                self.core.outbound().read_link(self.core.key.dst);

                let e1 = one - links.tq(hop.addr);
                let scaled = (f64::from(hop.tq_second_hop) * 4.5).min(255.0) as u8;
                let e2 = one - scaled;
                let e3 = one - links.tq(self.core.key.dst);
                inner.link_ests = (e1, e2, e3);

                if e1 == one || e2 == one || e3 == one {
                    tracing::debug!(coder = self.core.id, "missing link estimate");
                    self.core.counters.inc("missing link estimates");
                    inner.max_budget = (g as f64 * params.fixed_overshoot) as u64;
                } else {
                    inner.max_budget = budget::recoder_budget(g, e1, e2, e3);
                }
            }
        }

        self.core.engine.set_state(STATE_WAIT);
        tracing::debug!(
            coder = self.core.id,
            key = %self.core.key,
            max_budget = inner.max_budget,
            "recoder initialized"
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
            tracing::debug!(coder = self.core.id, "recoder timed out");
            self.core.engine.dispatch_event(EVENT_TIMEOUT);
        }

        false
    }

    /// A recoder accepts coded payloads while waiting.
    fn is_valid(&self) -> bool {
        self.core.engine.curr_state() == STATE_WAIT
    }

    fn stop(&self) {
        self.core.engine.stop();
    }
}
