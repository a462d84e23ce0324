//! strata-cache — offline tooling for Strata pipeline binary caches.
//!
//! `strata-cache create` builds a relocatable cache file from compiled
//! pipeline ELF binaries; `strata-cache info` inspects any cache file,
//! whether it came from this tool or from the live driver.

#![warn(missing_docs)]

mod create;
mod info;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Strata pipeline binary cache tools.
#[derive(Parser, Debug)]
#[command(name = "strata-cache", version, about = "Strata pipeline binary cache tools")]
pub struct Cli {
    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build a cache file from compiled pipeline binaries.
    Create(CreateArgs),
    /// Inspect a cache file.
    Info(InfoArgs),
}

/// Arguments for the `create` subcommand.
#[derive(Parser, Debug)]
pub struct CreateArgs {
    /// PCI device id of the target GPU (decimal or 0x-prefixed hex).
    #[arg(long, value_parser = parse_u32)]
    pub device_id: u32,

    /// Pipeline cache UUID in canonical hyphenated form.
    #[arg(long)]
    pub uuid: String,

    /// Platform fingerprint as hex digits.
    #[arg(long)]
    pub fingerprint: String,

    /// Output cache file path.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Input pipeline ELF binaries.
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,
}

/// Arguments for the `info` subcommand.
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Cache file to inspect.
    pub file: PathBuf,

    /// Emit machine-readable JSON instead of text.
    #[arg(long)]
    pub json: bool,

    /// Directory of source ELF binaries; entry checksums are mapped back
    /// to the file they came from.
    #[arg(long)]
    pub elf_source_dir: Option<PathBuf>,
}

/// Parses a decimal or `0x`-prefixed hexadecimal number.
fn parse_u32(text: &str) -> Result<u32, String> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("invalid number `{text}`: {e}"))
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("strata=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("strata=warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    let result = match cli.command {
        Command::Create(ref args) => create::run(args),
        Command::Info(ref args) => info::run(args),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}
