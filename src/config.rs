use clap::Parser;

use crate::types::{DEFAULT_HASH_MB, DEFAULT_MOVE_OVERHEAD_MS};

/// Startup-time defaults. UCI `setoption` remains the only way to reconfigure after launch;
/// these flags just seed the initial `EngineConfig` before the UCI loop takes over.
#[derive(Parser, Debug)]
#[command(name = "corvid", about = "UCI chess engine")]
pub struct Cli {
    /// Initial transposition table size in MiB.
    #[arg(long, default_value_t = DEFAULT_HASH_MB)]
    pub hash: usize,

    /// Path to an NNUE weight file. Falls back to a zero-initialized network if omitted.
    #[arg(long)]
    pub nnue: Option<String>,

    /// Move overhead in milliseconds, subtracted from the hard time limit.
    #[arg(long, default_value_t = DEFAULT_MOVE_OVERHEAD_MS)]
    pub move_overhead: u64,

    /// Tracing log level for stderr diagnostics (UCI protocol output is unaffected).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
