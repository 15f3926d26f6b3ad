//! Protocol-wide constants.

/// Scale of the loss-estimate byte space: estimates live in `[0, ONE]`.
pub const ONE: u64 = 255;

/// A loss estimate at or above this value means "no usable link sample";
/// the budget formulas fall back to deterministic defaults.
pub const ESTIMATE_MISSING: u64 = ONE - 1;

/// Length of a mesh link-layer address in bytes.
pub const ADDR_LEN: usize = 6;

/// Size of the length prefix stored in front of every source symbol.
pub const LEN_SIZE: usize = 2;

/// Largest payload the kernel module will carry in one frame.
///
/// The coded payload is `generation_size` coefficient bytes plus one
/// symbol, so startup enforces `generation_size + symbol_size <= MAX_PAYLOAD`.
pub const MAX_PAYLOAD: usize = 1518;

/// Interval between housekeeping sweeps over the coder maps.
pub const HOUSEKEEPING_INTERVAL_MS: u64 = 50;

/// Multiplier applied to the encoder timeout while an encoder is blocked
/// on the admission gate.
pub const BLOCKED_TIMEOUT_FACTOR: f64 = 5.0;
