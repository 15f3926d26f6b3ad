//! Error type for the coding primitives.

/// Errors surfaced by the block encoder, decoder, and recoder.
#[derive(Debug, thiserror::Error)]
pub enum CodingError {
    #[error("payload length mismatch: expected {expected} bytes, got {actual}")]
    PayloadLength { expected: usize, actual: usize },

    #[error("symbol {index} out of range for generation size {generation_size}")]
    SymbolIndex { index: usize, generation_size: usize },

    #[error("symbol data too long: {len} > {max}")]
    SymbolTooLong { len: usize, max: usize },

    #[error("output buffer length mismatch: expected {expected} bytes, got {actual}")]
    OutputLength { expected: usize, actual: usize },

    #[error("no symbols available to encode")]
    Empty,
}
