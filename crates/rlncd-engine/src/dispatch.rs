//! Inbound frame routing.
//!
//! One event per inbound frame: classify by the type byte and deliver to
//! the owning role map. ACKs and REQs carry no role marker, so they probe
//! the maps that could own the flow, in fixed order, without creating
//! coders. Unknown types are counted and dropped.

use std::sync::Arc;

use rlncd_core::types::{FrameEvent, FrameType};

use crate::coder_map::CoderMap;
use crate::counters::Counters;
use crate::gate::EncoderGate;
use crate::roles::{CoderCtx, Decoder, Encoder, Helper, Recoder};

/// Routes inbound frames to the four per-role coder maps.
pub struct Dispatcher {
    enc_map: CoderMap<Encoder>,
    dec_map: CoderMap<Decoder>,
    rec_map: CoderMap<Recoder>,
    hlp_map: CoderMap<Helper>,
    counters: Counters,
}

impl Dispatcher {
    pub fn new(ctx: Arc<CoderCtx>, gate: Arc<EncoderGate>) -> Self {
        let counters = ctx.counters.group("io");

        let enc_ctx = ctx.clone();
        let enc_map = CoderMap::new(move |key| Encoder::new(enc_ctx.clone(), key, gate.clone()));

        let dec_ctx = ctx.clone();
        let dec_map = CoderMap::new(move |key| Decoder::new(dec_ctx.clone(), key));

        let rec_ctx = ctx.clone();
        let rec_map = CoderMap::new(move |key| Recoder::new(rec_ctx.clone(), key));

        let hlp_map = CoderMap::new(move |key| Helper::new(ctx.clone(), key));

        Self {
            enc_map,
            dec_map,
            rec_map,
            hlp_map,
            counters,
        }
    }

    /// Route one inbound frame.
    pub fn handle_frame(&self, frame: FrameEvent) {
        let frame_type = match FrameType::try_from(frame.frame_type) {
            Ok(ft) => ft,
            Err(err) => {
                self.counters.inc("unknown type");
                tracing::warn!(%err, "dropping frame");
                return;
            }
        };

        match frame_type {
            FrameType::Plain => {
                self.enc_map
                    .get_latest_coder(frame.key)
                    .add_plain_packet(&frame.data);
            }
            FrameType::Enc => {
                if let Some(dec) = self.dec_map.get_coder(frame.key) {
                    dec.add_enc_packet(&frame.data);
                }
            }
            FrameType::Rec => {
                if let Some(rec) = self.rec_map.get_coder(frame.key) {
                    rec.add_enc_packet(&frame.data);
                }
            }
            FrameType::Hlp => {
                if let Some(hlp) = self.hlp_map.get_coder(frame.key) {
                    hlp.add_enc_packet(&frame.data);
                }
            }
            FrameType::Ack => {
                if let Some(enc) = self.enc_map.find_coder(frame.key) {
                    enc.add_ack_packet();
                } else if let Some(rec) = self.rec_map.find_coder(frame.key) {
                    rec.add_ack_packet();
                } else if let Some(hlp) = self.hlp_map.find_coder(frame.key) {
                    hlp.add_ack_packet();
                }
            }
            FrameType::Req => {
                if let Some(enc) = self.enc_map.find_coder(frame.key) {
                    enc.add_req_packet(frame.rank, frame.seq);
                } else if let Some(hlp) = self.hlp_map.find_coder(frame.key) {
                    hlp.add_req_packet(frame.rank, frame.seq);
                }
            }
            // RED and DEC frames only travel toward the kernel.
            FrameType::Red | FrameType::Dec => {
                self.counters.inc("unknown type");
                tracing::warn!(frame_type = frame.frame_type, "unroutable frame type");
            }
        }
    }

    /// Housekeeping sweep over every role map.
    pub fn process_coders(&self) {
        self.enc_map.process_coders();
        self.dec_map.process_coders();
        self.rec_map.process_coders();
        self.hlp_map.process_coders();
    }

    /// Stop every coder driver.
    pub fn shutdown(&self) {
        self.enc_map.shutdown();
        self.dec_map.shutdown();
        self.rec_map.shutdown();
        self.hlp_map.shutdown();
    }

    pub fn encoder_map(&self) -> &CoderMap<Encoder> {
        &self.enc_map
    }

    pub fn decoder_map(&self) -> &CoderMap<Decoder> {
        &self.dec_map
    }

    pub fn recoder_map(&self) -> &CoderMap<Recoder> {
        &self.rec_map
    }

    pub fn helper_map(&self) -> &CoderMap<Helper> {
        &self.hlp_map
    }
}
