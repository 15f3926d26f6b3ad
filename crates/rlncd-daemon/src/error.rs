//! Daemon error types.

use rlncd_engine::EngineError;
use rlncd_netlink::NetlinkError;

/// Errors that end the daemon.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Engine(#[from] EngineError),

    #[error("netlink error: {0}")]
    Netlink(#[from] NetlinkError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
