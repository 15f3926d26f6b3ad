//! Destination-side decoder.
//!
//! Absorbs coded payloads, hands decoded packets back to the kernel as
//! they become available, acknowledges the generation once complete, and
//! re-requests data when the stream goes quiet short of full rank.
//!
//! ```text
//!          COMPLETE              ACKED             TIMEOUT
//!  WAIT ─────────────> WRITE_DEC ──────> ACKED ─────────────> DONE
//!   │                                                           ▲
//!   └──────────────────────── TIMEOUT ──────────────────────────┘
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use rlncd_core::budget;
use rlncd_core::constants::LEN_SIZE;
use rlncd_core::types::FlowKey;
use rlncd_coding::{BlockDecoder, FeedOutcome};
use tokio::task::JoinHandle;

use crate::coder_map::MapCoder;
use crate::error::EngineError;
use crate::roles::{CoderCore, CoderCtx};
use crate::state::{StateId, STATE_DONE, STATE_ROLE_BASE, STATE_WAIT};

const STATE_WRITE_DEC: StateId = STATE_ROLE_BASE;
const STATE_ACKED: StateId = STATE_ROLE_BASE + 1;
const STATE_COUNT: StateId = STATE_ROLE_BASE + 2;

const EVENT_COMPLETE: u8 = 0;
const EVENT_ACKED: u8 = 1;
const EVENT_TIMEOUT: u8 = 2;
const EVENT_COUNT: u8 = 3;

struct DecoderInner {
    codec: BlockDecoder,
    /// One bit per symbol index: whether its DEC frame has gone out.
    decoded_sent: Vec<bool>,
    enc_pkt_count: u64,
    red_pkt_count: u64,
    req_seq: u16,
    ests: (u8, u8, u8),
}

/// Per-generation decoder actor.
pub struct Decoder {
    core: CoderCore,
    inner: Mutex<DecoderInner>,
}

impl Decoder {
    pub fn new(ctx: Arc<CoderCtx>, key: FlowKey) -> Arc<Self> {
        let params = ctx.params.clone();
        let core = CoderCore::new(
            ctx,
            key,
            "decoder",
            STATE_COUNT,
            EVENT_COUNT,
            params.decoder_timeout,
        );

        let engine = &core.engine;
        engine.add_trans(STATE_WAIT, EVENT_TIMEOUT, STATE_DONE);
        engine.add_trans(STATE_WAIT, EVENT_COMPLETE, STATE_WRITE_DEC);
        engine.add_trans(STATE_WRITE_DEC, EVENT_ACKED, STATE_ACKED);
        engine.add_trans(STATE_ACKED, EVENT_TIMEOUT, STATE_DONE);
        engine.add_trans(STATE_DONE, EVENT_COMPLETE, STATE_DONE);

        let g = params.generation_size;
        Arc::new(Self {
            core,
            inner: Mutex::new(DecoderInner {
                codec: BlockDecoder::new(g, params.symbol_size),
                decoded_sent: vec![false; g],
                enc_pkt_count: 0,
                red_pkt_count: 0,
                req_seq: 1,
                ests: (0, 0, 0),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, DecoderInner> {
        self.inner.lock().expect("decoder state poisoned")
    }

    /// Absorb one coded payload.
    pub fn add_enc_packet(&self, data: &[u8]) {
        let mut inner = self.lock();

        // A complete decoder only counts redundancy and re-acks: the
        // encoder evidently missed an earlier ACK.
        if inner.codec.is_complete() {
            self.core.counters.inc("redundant received");
            inner.red_pkt_count += 1;
            if inner.red_pkt_count % self.core.params().ack_interval == 0 {
                self.core.send_ack();
            }
            return;
        }

        if data.len() != self.core.params().payload_size() {
            self.core.counters.inc("invalid length");
            tracing::warn!(
                coder = self.core.id,
                len = data.len(),
                expected = self.core.params().payload_size(),
                "dropping coded frame with bad length"
            );
            return;
        }

        let outcome = match inner.codec.feed(data) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.core.counters.inc("invalid length");
                tracing::warn!(coder = self.core.id, %err, "decoder rejected payload");
                return;
            }
        };
        inner.enc_pkt_count += 1;

        let systematic = match outcome {
            FeedOutcome::NonInnovative => {
                self.core.counters.inc("non-innovative received");
                tracing::trace!(coder = self.core.id, "added non-innovative");
                self.core.timer.touch();
                self.core.timer.touch_packet();
                return;
            }
            FeedOutcome::Innovative { systematic } => systematic,
        };

        if inner.codec.is_complete() {
            self.core.engine.dispatch_event(EVENT_COMPLETE);
            return;
        }

        if inner.codec.is_partial_complete() {
            let rank = inner.codec.rank();
            for index in 0..rank {
                if self.send_decoded(&mut inner, index).is_err() {
                    return;
                }
            }
        }

        if let Some(index) = systematic {
            self.core.counters.inc("systematic received");
            tracing::trace!(coder = self.core.id, index, "added systematic");
            if self.send_decoded(&mut inner, index).is_err() {
                return;
            }
        } else {
            self.core.counters.inc("encoded received");
            tracing::trace!(coder = self.core.id, "added encoded");
        }

        self.core.timer.touch();
        self.core.timer.touch_packet();
    }

    /// Emit the DEC frame for symbol `index`, at most once per symbol.
    fn send_decoded(&self, inner: &mut DecoderInner, index: usize) -> Result<(), EngineError> {
        if inner.decoded_sent[index] {
            return Ok(());
        }
        let Some(symbol) = inner.codec.symbol(index) else {
            return Ok(());
        };

        let len = u16::from_le_bytes([symbol[0], symbol[1]]) as usize;
        let max = self.core.params().max_plain_len();
        if len > max {
            // Corrupt length prefix: the generation decoded to garbage.
            self.core.counters.inc("decode failures");
            tracing::error!(
                coder = self.core.id,
                index,
                len,
                max,
                "corrupt decoded symbol, requesting shutdown"
            );
            let _ = self.core.ctx.fatal.send(true);
            return Err(EngineError::CorruptSymbol { index, len, max });
        }

        let payload = symbol[LEN_SIZE..LEN_SIZE + len].to_vec();
        self.core.outbound().send_decoded(payload);
        self.core.counters.inc("decoded sent");
        inner.decoded_sent[index] = true;
        tracing::trace!(coder = self.core.id, index, "sent decoded packet");
        Ok(())
    }

    /// `WRITE_DEC` handler: ACK burst, then every unsent decoded symbol.
    fn write_decoded_state(&self) {
        let mut inner = self.lock();
        self.core.counters.inc("generations decoded");
        tracing::debug!(coder = self.core.id, "writing decoded generation");

        let (_, _, e3) = inner.ests;
        let mut ack_budget =
            budget::source_budget(1, 254, 254, e3, self.core.params().fixed_overshoot);
        while ack_budget > 0.0 {
            self.core.send_ack();
            ack_budget -= 1.0;
        }

        for index in 0..self.core.params().generation_size {
            if self.send_decoded(&mut inner, index).is_err() {
                break;
            }
        }

        self.core.engine.dispatch_event(EVENT_ACKED);
    }

    async fn drive(self: Arc<Self>) {
        loop {
            match self.core.engine.curr_state() {
                STATE_WRITE_DEC => self.write_decoded_state(),
                _ => self.core.engine.wait().await,
            }
            if !self.core.engine.advance() {
                break;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn rank(&self) -> usize {
        self.lock().codec.rank()
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> StateId {
        self.core.engine.curr_state()
    }
}

impl MapCoder for Decoder {
    fn init(self: &Arc<Self>) {
        let mut inner = self.lock();
        inner.ests = self.core.params().error_estimates();
        self.core.engine.set_state(STATE_WAIT);
        tracing::debug!(coder = self.core.id, key = %self.core.key, "decoder initialized");
    }

    fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let me = Arc::clone(self);
        tokio::spawn(me.drive())
    }

    fn process(&self) -> bool {
        let state = self.core.engine.curr_state();
        if state == STATE_DONE {
            return true;
        }

        let mut inner = self.lock();
        let complete = inner.codec.is_complete();
        let partial = inner.codec.is_partial_complete();

        if self.core.timer.is_timed_out() {
            if !complete && !partial {
                tracing::error!(
                    coder = self.core.id,
                    rank = inner.codec.rank(),
                    "decoder timed out incomplete"
                );
                self.core.counters.inc("incomplete timeouts");
            }
            self.core.engine.dispatch_event(EVENT_TIMEOUT);
            return false;
        }

        // Quiet stream short of full rank: ask the encoder for more.
        if state == STATE_WAIT && self.core.timer.packet_timed_out() {
            if partial {
                return false;
            }

            let (_, _, e3) = inner.ests;
            let mut req_budget =
                budget::source_budget(1, 254, 254, e3, self.core.params().fixed_overshoot);
            let rank = inner.codec.rank() as u16;

            tracing::debug!(
                coder = self.core.id,
                rank,
                seq = inner.req_seq,
                "requesting more data"
            );
            while req_budget >= 0.0 {
                self.core.outbound().send_req(self.core.key, rank, inner.req_seq);
                self.core.counters.inc("request sent");
                req_budget -= 1.0;
            }
            inner.req_seq += 1;
            self.core.timer.touch_packet();
        }

        false
    }

    /// A decoder accepts coded payloads while waiting for completion.
    fn is_valid(&self) -> bool {
        self.core.engine.curr_state() == STATE_WAIT
    }

    fn stop(&self) {
        self.core.engine.stop();
    }
}
