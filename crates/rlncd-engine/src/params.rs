//! Runtime parameters shared by every component.

use rlncd_core::constants::{LEN_SIZE, MAX_PAYLOAD};

use crate::error::EngineError;

/// Immutable daemon configuration, fixed at startup.
#[derive(Debug, Clone)]
pub struct Params {
    /// Generation size `g`: symbols coded together per block.
    pub generation_size: usize,
    /// Symbol size in bytes (the kernel-facing packet size).
    pub symbol_size: usize,
    /// Seconds of per-packet idle before a decoder re-requests data.
    pub packet_timeout: f64,
    /// Seconds of idle before an encoder generation is dropped.
    pub encoder_timeout: f64,
    /// Seconds of idle before a decoder generation is dropped.
    pub decoder_timeout: f64,
    /// Seconds of idle before a recoder generation is dropped.
    pub recoder_timeout: f64,
    /// Seconds of idle before a helper generation is dropped.
    pub helper_timeout: f64,
    /// Fixed factor applied on top of computed budgets.
    pub fixed_overshoot: f64,
    /// Number of encoders allowed in the blocked state concurrently.
    pub encoders: usize,
    /// Configured source→helper loss in percent.
    pub e1: u8,
    /// Configured helper→destination loss in percent.
    pub e2: u8,
    /// Configured source→destination loss in percent.
    pub e3: u8,
    /// Redundant packets received per repeated ACK at a complete decoder.
    pub ack_interval: u64,
    /// Ratio applied to the computed helper rank threshold.
    pub helper_threshold: f64,
    /// Whether encoders emit systematic payloads first.
    pub systematic: bool,
    /// Rank ratio above which a filling encoder starts sending on credit.
    pub encoder_threshold: f64,
    /// Derive encoder loss estimates from live link quality instead of the
    /// configured percentages.
    pub link_estimates: bool,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            generation_size: 64,
            symbol_size: 1454,
            packet_timeout: 0.3,
            encoder_timeout: 1.0,
            decoder_timeout: 2.0,
            recoder_timeout: 2.0,
            helper_timeout: 1.0,
            fixed_overshoot: 1.06,
            encoders: 2,
            e1: 10,
            e2: 10,
            e3: 30,
            ack_interval: 3,
            helper_threshold: 1.0,
            systematic: true,
            encoder_threshold: 0.1,
            link_estimates: false,
        }
    }
}

impl Params {
    /// Coded payload size: `g` coefficient bytes plus one symbol.
    pub fn payload_size(&self) -> usize {
        self.generation_size + self.symbol_size
    }

    /// Largest plain packet a symbol slot can hold.
    pub fn max_plain_len(&self) -> usize {
        self.symbol_size.saturating_sub(LEN_SIZE)
    }

    /// The configured loss percentages scaled to estimate bytes.
    pub fn error_estimates(&self) -> (u8, u8, u8) {
        (
            scale_percent(self.e1),
            scale_percent(self.e2),
            scale_percent(self.e3),
        )
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.generation_size == 0 {
            return Err(EngineError::InvalidParams(
                "generation size must be at least 1".into(),
            ));
        }
        if self.symbol_size <= LEN_SIZE {
            return Err(EngineError::InvalidParams(format!(
                "packet size must exceed the {LEN_SIZE}-byte length prefix"
            )));
        }
        if self.payload_size() > MAX_PAYLOAD {
            return Err(EngineError::InvalidParams(format!(
                "payload size exceeds MTU: {} > {MAX_PAYLOAD}; try --packet_size={}",
                self.payload_size(),
                MAX_PAYLOAD - self.generation_size,
            )));
        }
        if self.encoders == 0 {
            return Err(EngineError::InvalidParams(
                "at least one concurrent encoder is required".into(),
            ));
        }
        if self.ack_interval == 0 {
            return Err(EngineError::InvalidParams(
                "ack interval must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Scale a percentage to the `[0, ONE]` estimate space.
fn scale_percent(pct: u8) -> u8 {
    (f64::from(pct) * 2.55) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Params::default().validate().unwrap();
    }

    #[test]
    fn default_payload_exactly_fits_mtu() {
        let p = Params::default();
        assert_eq!(p.payload_size(), MAX_PAYLOAD);
    }

    #[test]
    fn oversized_payload_rejected_with_hint() {
        let p = Params {
            symbol_size: 1455,
            ..Params::default()
        };
        let err = p.validate().unwrap_err();
        assert!(err.to_string().contains("--packet_size=1454"));
    }

    #[test]
    fn zero_generation_rejected() {
        let p = Params {
            generation_size: 0,
            ..Params::default()
        };
        assert!(p.validate().is_err());
    }

    #[test]
    fn tiny_symbol_rejected() {
        let p = Params {
            symbol_size: 2,
            ..Params::default()
        };
        assert!(p.validate().is_err());
    }

    #[test]
    fn percent_scaling_truncates() {
        assert_eq!(scale_percent(10), 25);
        assert_eq!(scale_percent(30), 76);
        assert_eq!(scale_percent(0), 0);
        assert_eq!(scale_percent(100), 255);
    }

    #[test]
    fn error_estimates_use_configured_percentages() {
        let p = Params {
            e1: 10,
            e2: 20,
            e3: 30,
            ..Params::default()
        };
        assert_eq!(p.error_estimates(), (25, 51, 76));
    }
}
