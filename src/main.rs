//! Thin CLI dispatcher for the default binary target. The warehouse's real
//! entry points are the three `[[bin]]` targets (`server`, `backfill`,
//! `revalidate`); this one exists so `cargo run` without `--bin` still does
//! something useful instead of failing with "multiple binaries found".
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about = "Market data warehouse")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print where to find the real entry points.
    Info,
}

fn main() {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Info) {
        Command::Info => {
            println!("market-data-warehouse: run one of the dedicated binaries instead:");
            println!("  cargo run --bin server      # HTTP API + scheduler");
            println!("  cargo run --bin backfill     # one-shot manual backfill");
            println!("  cargo run --bin revalidate   # revalidation repair script");
        }
    }
}
