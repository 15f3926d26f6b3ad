//! Out-of-process counter inspector.
//!
//! Reads the JSON snapshot the daemon exports via `--counters_path` and
//! prints it as `name: value` lines.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser)]
#[command(name = "rlncd-counters", about = "Print a daemon counter snapshot")]
struct Cli {
    /// Path of the exported counter snapshot.
    #[arg(default_value = "/run/rlncd/counters.json")]
    path: PathBuf,
}

fn main() {
    let cli = Cli::parse();

    let data = match std::fs::read_to_string(&cli.path) {
        Ok(data) => data,
        Err(err) => {
            eprintln!("failed to read {}: {err}", cli.path.display());
            std::process::exit(1);
        }
    };

    let counters: BTreeMap<String, u64> = match serde_json::from_str(&data) {
        Ok(counters) => counters,
        Err(err) => {
            eprintln!("failed to parse {}: {err}", cli.path.display());
            std::process::exit(1);
        }
    };

    for (name, value) in counters {
        println!("{name}: {value}");
    }
}
