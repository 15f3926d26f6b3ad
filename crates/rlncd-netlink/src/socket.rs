//! Raw generic-netlink socket and the daemon-side client.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::atomic::{AtomicU32, Ordering};

use rlncd_core::types::Outbound;
use tokio::io::unix::AsyncFd;

use crate::error::NetlinkError;
use crate::events::{parse_event, Event};
use crate::wire::{
    encode_family_query, encode_outbound, encode_register, parse_genl, Attrs,
    CTRL_ATTR_FAMILY_ID, FAMILY_NAME, GENL_ID_CTRL, NLMSG_HDRLEN,
};

/// Receive buffer size; netlink datagrams here top out near the MTU.
const RECV_BUFFER: usize = 4096;

/// Kernel socket buffer sizes.
const SOCKET_BUFFER: libc::c_int = 1 << 20;

/// Non-blocking `AF_NETLINK`/`NETLINK_GENERIC` socket registered with the
/// tokio reactor.
pub struct NetlinkSocket {
    fd: AsyncFd<OwnedFd>,
}

impl NetlinkSocket {
    pub fn open() -> Result<Self, NetlinkError> {
        // SAFETY: socket(2) with constant arguments; the descriptor is
        // checked before being wrapped in OwnedFd.
        let raw = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
                libc::NETLINK_GENERIC,
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error().into());
        }
        // SAFETY: raw is a freshly created, owned descriptor.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // SAFETY: sockaddr_nl is plain-old-data; zeroed means "let the
        // kernel assign our pid, no multicast groups".
        let mut sa: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
        sa.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        // SAFETY: the address struct outlives the call and the length
        // matches its type.
        let rc = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                std::ptr::addr_of!(sa).cast(),
                std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }

        for opt in [libc::SO_SNDBUF, libc::SO_RCVBUF] {
            let size: libc::c_int = SOCKET_BUFFER;
            // SAFETY: option value points at a live c_int of the stated size.
            let rc = unsafe {
                libc::setsockopt(
                    fd.as_raw_fd(),
                    libc::SOL_SOCKET,
                    opt,
                    std::ptr::addr_of!(size).cast(),
                    std::mem::size_of::<libc::c_int>() as libc::socklen_t,
                )
            };
            if rc < 0 {
                tracing::warn!(
                    error = %io::Error::last_os_error(),
                    "failed to grow netlink socket buffer"
                );
            }
        }

        Ok(Self {
            fd: AsyncFd::new(fd)?,
        })
    }

    /// Send one complete netlink message.
    pub async fn send(&self, buf: &[u8]) -> Result<(), NetlinkError> {
        loop {
            let mut guard = self.fd.writable().await?;
            let result = guard.try_io(|inner| {
                // SAFETY: buffer pointer and length describe a live slice.
                let rc = unsafe {
                    libc::send(
                        inner.get_ref().as_raw_fd(),
                        buf.as_ptr().cast(),
                        buf.len(),
                        0,
                    )
                };
                if rc < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(rc as usize)
                }
            });
            match result {
                Ok(io_result) => {
                    io_result?;
                    return Ok(());
                }
                Err(_would_block) => continue,
            }
        }
    }

    /// Receive one netlink datagram.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize, NetlinkError> {
        loop {
            let mut guard = self.fd.readable().await?;
            let result = guard.try_io(|inner| {
                // SAFETY: buffer pointer and length describe a live slice.
                let rc = unsafe {
                    libc::recv(
                        inner.get_ref().as_raw_fd(),
                        buf.as_mut_ptr().cast(),
                        buf.len(),
                        0,
                    )
                };
                if rc < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(rc as usize)
                }
            });
            match result {
                Ok(io_result) => return Ok(io_result?),
                Err(_would_block) => continue,
            }
        }
    }
}

/// Control-channel client bound to the kernel coding family.
pub struct NetlinkClient {
    socket: NetlinkSocket,
    family: u16,
    ifindex: AtomicU32,
    seq: AtomicU32,
}

impl NetlinkClient {
    /// Open a socket and resolve the coding family id by name.
    pub async fn connect() -> Result<Self, NetlinkError> {
        let socket = NetlinkSocket::open()?;
        let family = resolve_family(&socket, FAMILY_NAME).await?;
        tracing::info!(family, "resolved generic netlink family");

        Ok(Self {
            socket,
            family,
            ifindex: AtomicU32::new(0),
            seq: AtomicU32::new(1),
        })
    }

    pub fn family(&self) -> u16 {
        self.family
    }

    pub fn ifindex(&self) -> u32 {
        self.ifindex.load(Ordering::Acquire)
    }

    pub fn set_ifindex(&self, ifindex: u32) {
        self.ifindex.store(ifindex, Ordering::Release);
    }

    fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Register against the kernel module; the reply arrives as a
    /// [`Event::RegisterReply`] on the event stream.
    pub async fn register(
        &self,
        device: &str,
        encoders: u32,
        e1: u32,
        e2: u32,
        e3: u32,
    ) -> Result<(), NetlinkError> {
        let msg = encode_register(self.family, self.next_seq(), device, encoders, e1, e2, e3);
        self.socket.send(&msg).await?;
        tracing::info!(device, encoders, "sent registration");
        Ok(())
    }

    /// Encode and send one outbound engine message.
    pub async fn send_outbound(&self, msg: &Outbound) -> Result<(), NetlinkError> {
        let wire = encode_outbound(self.family, self.ifindex(), self.next_seq(), msg);
        self.socket.send(&wire).await
    }

    /// Receive one datagram and parse every coding-family message in it.
    ///
    /// Malformed messages inside the datagram are logged and skipped;
    /// only socket-level failures surface as errors.
    pub async fn next_events(&self) -> Result<Vec<Event>, NetlinkError> {
        let mut buf = vec![0u8; RECV_BUFFER];
        let n = self.socket.recv(&mut buf).await?;

        let mut events = Vec::new();
        let mut rest = &buf[..n];
        while rest.len() >= NLMSG_HDRLEN {
            match parse_genl(rest) {
                Ok((frame, remainder)) => {
                    rest = remainder;
                    if frame.msg_type != self.family {
                        continue;
                    }
                    match parse_event(&frame) {
                        Ok(Event::Ignored) => {}
                        Ok(event) => events.push(event),
                        Err(err) => {
                            tracing::warn!(%err, "dropping malformed message");
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(%err, "netlink parse error");
                    break;
                }
            }
        }
        Ok(events)
    }
}

/// Ask the generic-netlink controller for a family id.
async fn resolve_family(socket: &NetlinkSocket, name: &str) -> Result<u16, NetlinkError> {
    socket.send(&encode_family_query(1, name)).await?;

    let mut buf = vec![0u8; RECV_BUFFER];
    // The controller answers promptly; a handful of datagrams is ample.
    for _ in 0..8 {
        let n = socket.recv(&mut buf).await?;
        let mut rest = &buf[..n];
        while rest.len() >= NLMSG_HDRLEN {
            let (frame, remainder) = match parse_genl(rest) {
                Ok(parsed) => parsed,
                Err(NetlinkError::Nack(_)) => {
                    return Err(NetlinkError::FamilyNotFound(name.to_string()));
                }
                Err(err) => return Err(err),
            };
            rest = remainder;

            if frame.msg_type == GENL_ID_CTRL {
                if let Some(id) = Attrs::parse(frame.payload).get_u16(CTRL_ATTR_FAMILY_ID) {
                    return Ok(id);
                }
            }
        }
    }

    Err(NetlinkError::FamilyNotFound(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn socket_opens_and_binds() {
        NetlinkSocket::open().expect("generic netlink socket should open");
    }

    #[tokio::test]
    async fn unknown_family_resolution_fails() {
        let socket = NetlinkSocket::open().unwrap();
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            resolve_family(&socket, "rlncd_no_such_family"),
        )
        .await
        .expect("controller should answer promptly");
        assert!(result.is_err());
    }
}
