//! Command-line interface.

use std::path::PathBuf;

use clap::Parser;
use rlncd_engine::Params;

/// Encode and decode packets with random linear network coding.
#[derive(Parser, Debug)]
#[command(name = "rlncd", version)]
pub struct Cli {
    /// Virtual interface from batman-adv.
    #[arg(long, default_value = "bat0")]
    pub device: String,

    /// The generation size: the number of packets coded together.
    #[arg(long = "generation_size", default_value_t = 64)]
    pub generation_size: usize,

    /// The payload size without coding overhead.
    #[arg(long = "packet_size", default_value_t = 1454)]
    pub packet_size: usize,

    /// Seconds of per-packet idle before requesting more data.
    #[arg(long = "packet_timeout", default_value_t = 0.3)]
    pub packet_timeout: f64,

    /// Seconds to wait for more packets before dropping an encoder
    /// generation.
    #[arg(long = "encoder_timeout", default_value_t = 1.0)]
    pub encoder_timeout: f64,

    /// Seconds to wait for more packets before dropping a decoder
    /// generation.
    #[arg(long = "decoder_timeout", default_value_t = 2.0)]
    pub decoder_timeout: f64,

    /// Seconds to wait for more packets before dropping a recoder
    /// generation.
    #[arg(long = "recoder_timeout", default_value_t = 2.0)]
    pub recoder_timeout: f64,

    /// Seconds to wait for more packets before dropping a helper
    /// generation.
    #[arg(long = "helper_timeout", default_value_t = 1.0)]
    pub helper_timeout: f64,

    /// Fixed factor to increase encoder/recoder budgets.
    #[arg(long = "fixed_overshoot", default_value_t = 1.06)]
    pub fixed_overshoot: f64,

    /// Number of concurrent encoders.
    #[arg(long, default_value_t = 2)]
    pub encoders: usize,

    /// Error probability from source to helper, in percent.
    #[arg(long, default_value_t = 10)]
    pub e1: u8,

    /// Error probability from helper to destination, in percent.
    #[arg(long, default_value_t = 10)]
    pub e2: u8,

    /// Error probability from source to destination, in percent.
    #[arg(long, default_value_t = 30)]
    pub e3: u8,

    /// Redundant packets to receive before repeating an ACK.
    #[arg(long = "ack_interval", default_value_t = 3)]
    pub ack_interval: u64,

    /// Ratio applied to the computed helper threshold.
    #[arg(long = "helper_threshold", default_value_t = 1.0)]
    pub helper_threshold: f64,

    /// Use systematic packets when encoding.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub systematic: bool,

    /// Rank ratio above which a filling encoder sends on credit.
    #[arg(long = "encoder_threshold", default_value_t = 0.1)]
    pub encoder_threshold: f64,

    /// Derive encoder loss estimates from live link quality instead of
    /// the configured percentages.
    #[arg(long = "link_estimates", default_value_t = false)]
    pub link_estimates: bool,

    /// Reflect frames without coding, to measure raw throughput.
    #[arg(long, default_value_t = false)]
    pub benchmark: bool,

    /// Write the counter snapshot to this file as JSON on SIGQUIT and at
    /// exit.
    #[arg(long = "counters_path")]
    pub counters_path: Option<PathBuf>,
}

impl Cli {
    pub fn params(&self) -> Params {
        Params {
            generation_size: self.generation_size,
            symbol_size: self.packet_size,
            packet_timeout: self.packet_timeout,
            encoder_timeout: self.encoder_timeout,
            decoder_timeout: self.decoder_timeout,
            recoder_timeout: self.recoder_timeout,
            helper_timeout: self.helper_timeout,
            fixed_overshoot: self.fixed_overshoot,
            encoders: self.encoders,
            e1: self.e1,
            e2: self.e2,
            e3: self.e3,
            ack_interval: self.ack_interval,
            helper_threshold: self.helper_threshold,
            systematic: self.systematic,
            encoder_threshold: self.encoder_threshold,
            link_estimates: self.link_estimates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_and_validate() {
        let cli = Cli::parse_from(["rlncd"]);
        assert_eq!(cli.device, "bat0");
        assert_eq!(cli.generation_size, 64);
        assert!(cli.systematic);
        assert!(!cli.benchmark);
        cli.params().validate().unwrap();
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "rlncd",
            "--device",
            "bat1",
            "--generation_size",
            "16",
            "--packet_size",
            "200",
            "--encoders",
            "1",
            "--e3",
            "55",
            "--systematic",
            "false",
            "--link_estimates",
        ]);
        assert_eq!(cli.device, "bat1");
        assert_eq!(cli.e3, 55);
        assert!(!cli.systematic);
        assert!(cli.link_estimates);

        let params = cli.params();
        assert_eq!(params.generation_size, 16);
        assert_eq!(params.symbol_size, 200);
        assert_eq!(params.encoders, 1);
        params.validate().unwrap();
    }

    #[test]
    fn oversized_payload_fails_validation() {
        let cli = Cli::parse_from(["rlncd", "--packet_size", "1500"]);
        assert!(cli.params().validate().is_err());
    }
}
