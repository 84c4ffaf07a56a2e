use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "debate-engine", version, about = "Moderation and karma consistency engine")]
pub struct Cli {
    /// Path to the YAML config file.
    #[arg(short, long, env = "DEBATE_ENGINE_CONFIG", default_value = "config.yaml")]
    pub config: PathBuf,

    /// Log filter override, e.g. "debug" or "debate_engine=trace".
    #[arg(long)]
    pub log: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the engine daemon (the default).
    Run,
    /// Sweep expired bans once and exit.
    Sweep,
    /// Overwrite the debate number counter. Recovery tool; the next
    /// issued number is value + 1.
    SetCounter { value: i64 },
}
