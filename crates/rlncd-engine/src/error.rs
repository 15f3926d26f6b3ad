//! Engine error types.

/// Errors surfaced by the coding engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// A decoded symbol carried a length prefix outside the valid range.
    /// This indicates upstream corruption and is treated as fatal.
    #[error("decoded symbol {index} has corrupt length {len} (max {max})")]
    CorruptSymbol {
        index: usize,
        len: usize,
        max: usize,
    },

    #[error("coding error: {0}")]
    Coding(#[from] rlncd_coding::CodingError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        let err = EngineError::InvalidParams("generation size is zero".into());
        assert_eq!(err.to_string(), "invalid parameters: generation size is zero");

        let err = EngineError::CorruptSymbol {
            index: 3,
            len: 4000,
            max: 1452,
        };
        assert_eq!(
            err.to_string(),
            "decoded symbol 3 has corrupt length 4000 (max 1452)"
        );
    }
}
