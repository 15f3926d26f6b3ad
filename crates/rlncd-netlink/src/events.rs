//! Typed inbound events parsed from generic-netlink messages.

use rlncd_core::types::{FlowKey, FrameEvent, HopInfo, MeshAddr};

use crate::error::NetlinkError;
use crate::wire::{attr, cmd, Attrs, GenlFrame};

/// One inbound control-channel event.
#[derive(Debug)]
pub enum Event {
    /// Reply to the startup registration, fixing the interface index.
    RegisterReply { ifindex: u32 },
    /// Link-quality sample for a neighbor.
    LinkUpdate { addr: MeshAddr, tq: u8 },
    /// One-hop candidate set toward a destination.
    OneHopUpdate { dst: MeshAddr, hops: Vec<HopInfo> },
    /// Helper advertisement set for a path.
    RelayUpdate {
        src: MeshAddr,
        dst: MeshAddr,
        relays: Vec<HopInfo>,
    },
    /// A frame for the dispatcher.
    Frame(FrameEvent),
    /// A message the daemon has no use for (controller chatter, acks).
    Ignored,
}

/// Nested hop/relay entry layout: `addr(6) || tq_total(1) || tq_second_hop(1)`.
fn parse_hop_entry(raw: &[u8]) -> Option<HopInfo> {
    if raw.len() < 8 {
        return None;
    }
    Some(HopInfo {
        addr: MeshAddr::try_from(&raw[..6]).ok()?,
        tq_total: raw[6],
        tq_second_hop: raw[7],
    })
}

fn require_addr(attrs: &Attrs<'_>, attr_type: u16) -> Result<MeshAddr, NetlinkError> {
    attrs
        .get_addr(attr_type)
        .ok_or(NetlinkError::MissingAttribute(attr_type))
}

/// Interpret one message of the coding family as an [`Event`].
pub fn parse_event(frame: &GenlFrame<'_>) -> Result<Event, NetlinkError> {
    let attrs = Attrs::parse(frame.payload);

    match frame.command {
        cmd::REGISTER => {
            let ifindex = attrs
                .get_u32(attr::IFINDEX)
                .ok_or(NetlinkError::MissingAttribute(attr::IFINDEX))?;
            Ok(Event::RegisterReply { ifindex })
        }

        cmd::GET_LINK => {
            let addr = require_addr(&attrs, attr::ADDR)?;
            let tq = attrs
                .get_u8(attr::TQ)
                .ok_or(NetlinkError::MissingAttribute(attr::TQ))?;
            Ok(Event::LinkUpdate { addr, tq })
        }

        cmd::GET_ONE_HOP => {
            let dst = require_addr(&attrs, attr::ADDR)?;
            let hops = attrs
                .nested(attr::HOP_LIST)
                .into_iter()
                .filter_map(parse_hop_entry)
                .collect();
            Ok(Event::OneHopUpdate { dst, hops })
        }

        cmd::GET_RELAYS => {
            let src = require_addr(&attrs, attr::SRC)?;
            let dst = require_addr(&attrs, attr::DST)?;
            let relays = attrs
                .nested(attr::RLY_LIST)
                .into_iter()
                .filter_map(parse_hop_entry)
                .collect();
            Ok(Event::RelayUpdate { src, dst, relays })
        }

        cmd::FRAME => {
            let data = attrs
                .get(attr::FRAME)
                .ok_or(NetlinkError::MissingAttribute(attr::FRAME))?
                .to_vec();
            let frame_type = attrs
                .get_u8(attr::TYPE)
                .ok_or(NetlinkError::MissingAttribute(attr::TYPE))?;
            let src = require_addr(&attrs, attr::SRC)?;
            let dst = require_addr(&attrs, attr::DST)?;
            let block = attrs.get_u16(attr::BLOCK).unwrap_or(0);

            Ok(Event::Frame(FrameEvent {
                frame_type,
                key: FlowKey::new(src, dst, block),
                data,
                rank: attrs.get_u16(attr::RANK).unwrap_or(0),
                seq: attrs.get_u16(attr::SEQ).unwrap_or(0),
            }))
        }

        _ => Ok(Event::Ignored),
    }
}
