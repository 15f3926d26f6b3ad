use clap::Parser;

mod cli;
mod error;
mod logging;
mod node;

use cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        logging::init_json();
    } else {
        logging::init();
    }

    if let Err(err) = node::run(cli).await {
        tracing::error!("daemon failed: {err}");
        std::process::exit(1);
    }
}
