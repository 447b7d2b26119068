use clap::Parser;

use corvid::config::Cli;
use corvid::error::EngineError;

fn main() {
    if let Err(err) = run() {
        eprintln!("fatal: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), EngineError> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_new(&cli.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(hash_mb = cli.hash, nnue = ?cli.nnue, "corvid starting");

    corvid::board::init();
    corvid::uci::run(&cli)
}
