//! Newtype wrappers for protocol fields and control-channel message shapes.
//!
//! `MeshAddr` and `FlowKey` are used as map keys throughout the engine, so
//! they carry total orderings. Frame bytes on the wire are classified by
//! `FrameType`; `Outbound` and `FrameEvent` are the two directions of the
//! control channel as the engine sees them.

use core::fmt;

use crate::constants::ADDR_LEN;

/// A 6-byte mesh link-layer address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[must_use]
pub struct MeshAddr([u8; ADDR_LEN]);

impl MeshAddr {
    pub const fn new(bytes: [u8; ADDR_LEN]) -> Self {
        Self(bytes)
    }

    /// The all-zero address.
    pub const fn zero() -> Self {
        Self([0u8; ADDR_LEN])
    }

    pub fn as_bytes(&self) -> &[u8; ADDR_LEN] {
        &self.0
    }
}

impl AsRef<[u8]> for MeshAddr {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for MeshAddr {
    type Error = InvalidLength;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; ADDR_LEN] = bytes.try_into().map_err(|_| InvalidLength {
            expected: ADDR_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for MeshAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}", self.0[0])?;
        for byte in &self.0[1..] {
            write!(f, ":{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for MeshAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MeshAddr({self})")
    }
}

/// Error for byte-slice conversions of the wrong length.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("invalid length: expected {expected} bytes, got {actual}")]
pub struct InvalidLength {
    pub expected: usize,
    pub actual: usize,
}

/// Identifies one generation of one flow: `(source, destination, block)`.
///
/// Two keys sharing `(src, dst)` but differing in `block` are successive
/// generations of the same stream. The ordering is lexicographic on
/// `(src, dst, block)`, which `derive` produces from field order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[must_use]
pub struct FlowKey {
    pub src: MeshAddr,
    pub dst: MeshAddr,
    pub block: u16,
}

impl FlowKey {
    pub const fn new(src: MeshAddr, dst: MeshAddr, block: u16) -> Self {
        Self { src, dst, block }
    }

    /// The `(src, dst)` pair without the block id, used for latest-block
    /// bookkeeping.
    pub fn path(&self) -> (MeshAddr, MeshAddr) {
        (self.src, self.dst)
    }

    /// The same flow key with a different block id.
    pub fn with_block(&self, block: u16) -> Self {
        Self { block, ..*self }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} ({})", self.src, self.dst, self.block)
    }
}

impl fmt::Debug for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FlowKey({self})")
    }
}

/// Frame classification byte shared with the kernel module.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum FrameType {
    /// Uncoded source packet handed up for encoding.
    Plain = 0,
    /// Coded symbol from an encoder.
    Enc = 1,
    /// Redundant coded symbol sent in response to a REQ.
    Red = 2,
    /// Decoded packet handed back to the kernel.
    Dec = 3,
    /// Recoded symbol from a multi-hop relay.
    Rec = 4,
    /// Recoded symbol from a one-hop helper.
    Hlp = 5,
    /// Retransmission request from a decoder.
    Req = 6,
    /// Generation acknowledgement.
    Ack = 7,
}

/// Error for an unrecognized frame-type byte.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("unknown frame type: {0}")]
pub struct UnknownFrameType(pub u8);

impl TryFrom<u8> for FrameType {
    type Error = UnknownFrameType;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Plain),
            1 => Ok(Self::Enc),
            2 => Ok(Self::Red),
            3 => Ok(Self::Dec),
            4 => Ok(Self::Rec),
            5 => Ok(Self::Hlp),
            6 => Ok(Self::Req),
            7 => Ok(Self::Ack),
            other => Err(UnknownFrameType(other)),
        }
    }
}

/// One-hop candidate or helper advertisement from the routing layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HopInfo {
    pub addr: MeshAddr,
    /// Estimated end-to-end transmit quality through this hop.
    pub tq_total: u8,
    /// Estimated transmit quality of the hop's second leg.
    pub tq_second_hop: u8,
}

/// An inbound frame as delivered to the dispatcher.
///
/// `frame_type` stays a raw byte here so the dispatcher can count and drop
/// unknown values instead of failing at parse time.
#[derive(Clone, Debug)]
pub struct FrameEvent {
    pub frame_type: u8,
    pub key: FlowKey,
    pub data: Vec<u8>,
    /// Decoder rank carried by REQ frames; zero otherwise.
    pub rank: u16,
    /// Request sequence number carried by REQ frames; zero otherwise.
    pub seq: u16,
}

/// Messages the engine emits toward the kernel module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// A coded, recoded, or redundant frame for a flow.
    Frame {
        key: FlowKey,
        frame_type: FrameType,
        payload: Vec<u8>,
    },
    /// A fully decoded packet handed back for delivery.
    Decoded { payload: Vec<u8> },
    /// An uncoded packet reflected unmodified (benchmark mode).
    Passthrough { payload: Vec<u8> },
    /// Generation acknowledgement for a flow.
    Ack { key: FlowKey },
    /// Retransmission request carrying the local rank and a sequence number.
    Req { key: FlowKey, rank: u16, seq: u16 },
    /// Ask the kernel to stop feeding plain packets.
    Block,
    /// Resume plain-packet delivery.
    Unblock,
    /// Solicit a link-quality sample for a neighbor.
    ReadLink { addr: MeshAddr },
    /// Solicit one-hop candidates toward a destination.
    ReadOneHops { dst: MeshAddr },
    /// Solicit helper advertisements for a path.
    ReadRelays { src: MeshAddr, dst: MeshAddr },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(seed: u8) -> MeshAddr {
        MeshAddr::new([seed; 6])
    }

    #[test]
    fn addr_display_colon_hex() {
        let a = MeshAddr::new([0x00, 0x1b, 0x2c, 0x3d, 0x4e, 0xff]);
        assert_eq!(a.to_string(), "00:1b:2c:3d:4e:ff");
    }

    #[test]
    fn addr_try_from_wrong_length() {
        assert!(MeshAddr::try_from(&[1u8, 2, 3][..]).is_err());
        assert!(MeshAddr::try_from(&[1u8; 7][..]).is_err());
        assert!(MeshAddr::try_from(&[1u8; 6][..]).is_ok());
    }

    #[test]
    fn key_ordering_src_first() {
        let a = FlowKey::new(addr(1), addr(9), 5);
        let b = FlowKey::new(addr(2), addr(0), 0);
        assert!(a < b);
    }

    #[test]
    fn key_ordering_dst_when_src_equal() {
        let a = FlowKey::new(addr(1), addr(2), 9);
        let b = FlowKey::new(addr(1), addr(3), 0);
        assert!(a < b);
    }

    #[test]
    fn key_ordering_block_last() {
        let a = FlowKey::new(addr(1), addr(2), 3);
        let b = FlowKey::new(addr(1), addr(2), 4);
        assert!(a < b);
        assert_ne!(a, b);
        assert_eq!(a, b.with_block(3));
    }

    #[test]
    fn key_display() {
        let k = FlowKey::new(addr(0xaa), addr(0xbb), 7);
        assert_eq!(k.to_string(), "aa:aa:aa:aa:aa:aa -> bb:bb:bb:bb:bb:bb (7)");
    }

    #[test]
    fn frame_type_roundtrip() {
        for byte in 0u8..=7 {
            let ft = FrameType::try_from(byte).unwrap();
            assert_eq!(ft as u8, byte);
        }
        assert!(FrameType::try_from(8).is_err());
        assert!(FrameType::try_from(255).is_err());
    }
}
