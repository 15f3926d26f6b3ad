//! Netlink layer error types.

/// Errors from the control-channel transport and codec.
#[derive(Debug, thiserror::Error)]
pub enum NetlinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("message truncated: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },

    #[error("missing attribute {0}")]
    MissingAttribute(u16),

    #[error("attribute {attr} has invalid length {len}")]
    BadAttribute { attr: u16, len: usize },

    #[error("generic netlink family {0:?} not found")]
    FamilyNotFound(String),

    #[error("kernel reported error code {0}")]
    Nack(i32),
}
