//! Netlink and generic-netlink wire codec.
//!
//! Layout of one message:
//!
//! ```text
//! ┌────────────────┬──────────────┬───────────────────────────────┐
//! │ nlmsghdr (16)  │ genlmsghdr(4)│ attributes (TLV, 4-aligned)   │
//! │ len,type,flags │ cmd,version  │ [len u16][type u16][payload…] │
//! │ seq,pid        │              │                               │
//! └────────────────┴──────────────┴───────────────────────────────┘
//! ```
//!
//! All header and attribute integers are host-endian, per the netlink ABI.

use rlncd_core::types::{FlowKey, FrameType, MeshAddr, Outbound};

use crate::error::NetlinkError;

pub const NLMSG_HDRLEN: usize = 16;
pub const GENL_HDRLEN: usize = 4;
pub const NLA_HDRLEN: usize = 4;

/// Standard netlink message types.
pub const NLMSG_ERROR: u16 = 2;
pub const NLMSG_DONE: u16 = 3;

pub const NLM_F_REQUEST: u16 = 0x01;

/// The generic-netlink controller family and its attributes.
pub const GENL_ID_CTRL: u16 = 0x10;
pub const CTRL_CMD_GETFAMILY: u8 = 3;
pub const CTRL_ATTR_FAMILY_ID: u16 = 1;
pub const CTRL_ATTR_FAMILY_NAME: u16 = 2;

/// The kernel module's family name.
pub const FAMILY_NAME: &str = "batman_adv";

/// Commands of the coding family.
pub mod cmd {
    pub const REGISTER: u8 = 1;
    pub const GET_RELAYS: u8 = 2;
    pub const GET_LINK: u8 = 3;
    pub const GET_ONE_HOP: u8 = 4;
    pub const FRAME: u8 = 5;
    pub const BLOCK: u8 = 6;
    pub const UNBLOCK: u8 = 7;
}

/// Attributes of the coding family (one numbered space for all commands).
pub mod attr {
    pub const IFNAME: u16 = 1;
    pub const IFINDEX: u16 = 2;
    pub const SRC: u16 = 3;
    pub const DST: u16 = 4;
    pub const ADDR: u16 = 5;
    pub const TQ: u16 = 6;
    pub const HOP_LIST: u16 = 7;
    pub const RLY_LIST: u16 = 8;
    pub const FRAME: u16 = 9;
    pub const BLOCK: u16 = 10;
    pub const INT: u16 = 11;
    pub const TYPE: u16 = 12;
    pub const RANK: u16 = 13;
    pub const SEQ: u16 = 14;
    pub const ENCS: u16 = 15;
    pub const E1: u16 = 16;
    pub const E2: u16 = 17;
    pub const E3: u16 = 18;
}

/// Nested entry type inside `HOP_LIST` and `RLY_LIST`.
pub const NESTED_INFO: u16 = 1;

fn nla_align(len: usize) -> usize {
    (len + 3) & !3
}

// ---------------------------------------------------------------------------
// Message builder
// ---------------------------------------------------------------------------

/// Builder for one generic-netlink message.
pub struct MsgBuilder {
    buf: Vec<u8>,
}

impl MsgBuilder {
    /// Start a message for `family` with the given command.
    pub fn new(family: u16, command: u8, flags: u16, seq: u32) -> Self {
        let mut buf = Vec::with_capacity(64);
        // nlmsghdr; length patched in finish().
        buf.extend_from_slice(&0u32.to_ne_bytes());
        buf.extend_from_slice(&family.to_ne_bytes());
        buf.extend_from_slice(&flags.to_ne_bytes());
        buf.extend_from_slice(&seq.to_ne_bytes());
        buf.extend_from_slice(&0u32.to_ne_bytes()); // pid: kernel fills
        // genlmsghdr
        buf.push(command);
        buf.push(1); // version
        buf.extend_from_slice(&0u16.to_ne_bytes());
        Self { buf }
    }

    pub fn put_bytes(mut self, attr_type: u16, payload: &[u8]) -> Self {
        let len = NLA_HDRLEN + payload.len();
        self.buf.extend_from_slice(&(len as u16).to_ne_bytes());
        self.buf.extend_from_slice(&attr_type.to_ne_bytes());
        self.buf.extend_from_slice(payload);
        self.buf.resize(self.buf.len() + (nla_align(len) - len), 0);
        self
    }

    pub fn put_u8(self, attr_type: u16, value: u8) -> Self {
        self.put_bytes(attr_type, &[value])
    }

    pub fn put_u16(self, attr_type: u16, value: u16) -> Self {
        self.put_bytes(attr_type, &value.to_ne_bytes())
    }

    pub fn put_u32(self, attr_type: u16, value: u32) -> Self {
        self.put_bytes(attr_type, &value.to_ne_bytes())
    }

    /// NUL-terminated string attribute.
    pub fn put_str(self, attr_type: u16, value: &str) -> Self {
        let mut payload = Vec::with_capacity(value.len() + 1);
        payload.extend_from_slice(value.as_bytes());
        payload.push(0);
        self.put_bytes(attr_type, &payload)
    }

    pub fn put_addr(self, attr_type: u16, addr: MeshAddr) -> Self {
        self.put_bytes(attr_type, addr.as_ref())
    }

    /// Patch the total length and return the wire bytes.
    pub fn finish(mut self) -> Vec<u8> {
        let len = self.buf.len() as u32;
        self.buf[..4].copy_from_slice(&len.to_ne_bytes());
        self.buf
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// One parsed generic-netlink message.
pub struct GenlFrame<'a> {
    pub msg_type: u16,
    pub command: u8,
    pub payload: &'a [u8],
}

/// Parsed attribute view with typed accessors.
pub struct Attrs<'a> {
    entries: Vec<(u16, &'a [u8])>,
}

impl<'a> Attrs<'a> {
    pub fn parse(mut payload: &'a [u8]) -> Self {
        let mut entries = Vec::new();
        while payload.len() >= NLA_HDRLEN {
            let len = u16::from_ne_bytes([payload[0], payload[1]]) as usize;
            let attr_type = u16::from_ne_bytes([payload[2], payload[3]]);
            if len < NLA_HDRLEN || len > payload.len() {
                break;
            }
            entries.push((attr_type, &payload[NLA_HDRLEN..len]));
            let advance = nla_align(len).min(payload.len());
            payload = &payload[advance..];
        }
        Self { entries }
    }

    pub fn get(&self, attr_type: u16) -> Option<&'a [u8]> {
        self.entries
            .iter()
            .find(|(t, _)| *t == attr_type)
            .map(|(_, v)| *v)
    }

    pub fn get_u8(&self, attr_type: u16) -> Option<u8> {
        self.get(attr_type).and_then(|v| v.first().copied())
    }

    pub fn get_u16(&self, attr_type: u16) -> Option<u16> {
        let v = self.get(attr_type)?;
        Some(u16::from_ne_bytes(v.get(..2)?.try_into().ok()?))
    }

    pub fn get_u32(&self, attr_type: u16) -> Option<u32> {
        let v = self.get(attr_type)?;
        Some(u32::from_ne_bytes(v.get(..4)?.try_into().ok()?))
    }

    pub fn get_addr(&self, attr_type: u16) -> Option<MeshAddr> {
        MeshAddr::try_from(self.get(attr_type)?).ok()
    }

    /// Entries of a nested list attribute, filtered to `NESTED_INFO`.
    pub fn nested(&self, attr_type: u16) -> Vec<&'a [u8]> {
        match self.get(attr_type) {
            Some(payload) => Attrs::parse(payload)
                .entries
                .into_iter()
                .filter(|(t, _)| *t == NESTED_INFO)
                .map(|(_, v)| v)
                .collect(),
            None => Vec::new(),
        }
    }
}

/// Split one netlink message off the front of a receive buffer.
///
/// Returns the parsed frame and the remainder of the buffer (netlink
/// datagrams may carry multiple messages).
pub fn parse_genl(buf: &[u8]) -> Result<(GenlFrame<'_>, &[u8]), NetlinkError> {
    if buf.len() < NLMSG_HDRLEN {
        return Err(NetlinkError::Truncated {
            need: NLMSG_HDRLEN,
            got: buf.len(),
        });
    }

    let msg_len = u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let msg_type = u16::from_ne_bytes([buf[4], buf[5]]);
    if msg_len < NLMSG_HDRLEN || msg_len > buf.len() {
        return Err(NetlinkError::Truncated {
            need: msg_len,
            got: buf.len(),
        });
    }

    let rest = &buf[nla_align(msg_len).min(buf.len())..];
    let body = &buf[NLMSG_HDRLEN..msg_len];

    if msg_type == NLMSG_ERROR {
        let code = match body {
            [a, b, c, d, ..] => i32::from_ne_bytes([*a, *b, *c, *d]),
            _ => 0,
        };
        if code != 0 {
            return Err(NetlinkError::Nack(code));
        }
        // Zero code is an ACK; report it as an empty frame.
        return Ok((
            GenlFrame {
                msg_type,
                command: 0,
                payload: &[],
            },
            rest,
        ));
    }

    if body.len() < GENL_HDRLEN {
        return Err(NetlinkError::Truncated {
            need: GENL_HDRLEN,
            got: body.len(),
        });
    }

    Ok((
        GenlFrame {
            msg_type,
            command: body[0],
            payload: &body[GENL_HDRLEN..],
        },
        rest,
    ))
}

// ---------------------------------------------------------------------------
// Outbound encoding
// ---------------------------------------------------------------------------

fn frame_msg(family: u16, seq: u32, ifindex: u32) -> MsgBuilder {
    MsgBuilder::new(family, cmd::FRAME, 0, seq).put_u32(attr::IFINDEX, ifindex)
}

fn put_key(builder: MsgBuilder, key: &FlowKey) -> MsgBuilder {
    builder
        .put_addr(attr::SRC, key.src)
        .put_addr(attr::DST, key.dst)
        .put_u16(attr::BLOCK, key.block)
}

/// Encode one outbound engine message to wire bytes.
pub fn encode_outbound(family: u16, ifindex: u32, seq: u32, msg: &Outbound) -> Vec<u8> {
    match msg {
        Outbound::Frame {
            key,
            frame_type,
            payload,
        } => put_key(frame_msg(family, seq, ifindex), key)
            .put_u8(attr::TYPE, *frame_type as u8)
            .put_bytes(attr::FRAME, payload)
            .finish(),

        Outbound::Decoded { payload } => frame_msg(family, seq, ifindex)
            .put_u8(attr::TYPE, FrameType::Dec as u8)
            .put_bytes(attr::FRAME, payload)
            .finish(),

        Outbound::Passthrough { payload } => frame_msg(family, seq, ifindex)
            .put_u8(attr::TYPE, FrameType::Plain as u8)
            .put_bytes(attr::FRAME, payload)
            .finish(),

        Outbound::Ack { key } => put_key(frame_msg(family, seq, ifindex), key)
            .put_u8(attr::TYPE, FrameType::Ack as u8)
            .put_u16(attr::INT, 0)
            .finish(),

        Outbound::Req {
            key,
            rank,
            seq: req_seq,
        } => put_key(frame_msg(family, seq, ifindex), key)
            .put_u8(attr::TYPE, FrameType::Req as u8)
            .put_u16(attr::RANK, *rank)
            .put_u16(attr::SEQ, *req_seq)
            .finish(),

        Outbound::Block => MsgBuilder::new(family, cmd::BLOCK, 0, seq)
            .put_u32(attr::IFINDEX, ifindex)
            .finish(),

        Outbound::Unblock => MsgBuilder::new(family, cmd::UNBLOCK, 0, seq)
            .put_u32(attr::IFINDEX, ifindex)
            .finish(),

        Outbound::ReadLink { addr } => MsgBuilder::new(family, cmd::GET_LINK, NLM_F_REQUEST, seq)
            .put_u32(attr::IFINDEX, ifindex)
            .put_addr(attr::ADDR, *addr)
            .finish(),

        Outbound::ReadOneHops { dst } => {
            MsgBuilder::new(family, cmd::GET_ONE_HOP, NLM_F_REQUEST, seq)
                .put_u32(attr::IFINDEX, ifindex)
                .put_addr(attr::ADDR, *dst)
                .finish()
        }

        Outbound::ReadRelays { src, dst } => {
            MsgBuilder::new(family, cmd::GET_RELAYS, NLM_F_REQUEST, seq)
                .put_u32(attr::IFINDEX, ifindex)
                .put_addr(attr::SRC, *src)
                .put_addr(attr::DST, *dst)
                .finish()
        }
    }
}

/// The registration message sent once at startup.
pub fn encode_register(
    family: u16,
    seq: u32,
    device: &str,
    encoders: u32,
    e1: u32,
    e2: u32,
    e3: u32,
) -> Vec<u8> {
    MsgBuilder::new(family, cmd::REGISTER, NLM_F_REQUEST, seq)
        .put_str(attr::IFNAME, device)
        .put_u32(attr::ENCS, encoders)
        .put_u32(attr::E1, e1)
        .put_u32(attr::E2, e2)
        .put_u32(attr::E3, e3)
        .finish()
}

/// The controller query resolving a family name to its id.
pub fn encode_family_query(seq: u32, name: &str) -> Vec<u8> {
    MsgBuilder::new(GENL_ID_CTRL, CTRL_CMD_GETFAMILY, NLM_F_REQUEST, seq)
        .put_str(CTRL_ATTR_FAMILY_NAME, name)
        .finish()
}
