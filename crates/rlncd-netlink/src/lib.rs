//! Generic-netlink control channel to the kernel forwarding module.
//!
//! The kernel side registers a generic-netlink family; this crate resolves
//! the family id, registers the daemon against an interface, and bridges
//! the socket to typed [`Event`]s inbound and [`Outbound`] messages
//! outbound. The wire codec is pure and separately testable; the socket
//! wraps a raw `AF_NETLINK` descriptor for use with the tokio reactor.

mod error;
pub mod events;
pub mod socket;
pub mod wire;

pub use error::NetlinkError;
pub use events::Event;
pub use socket::NetlinkClient;
