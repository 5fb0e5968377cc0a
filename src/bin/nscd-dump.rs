//! nscd-dump
//!
//! Verify an nscd persistent database file and print its contents

use anyhow::Context;
use clap::Parser;
use nscd_dump::{write_json, Config, DatabaseFile, OutputFormat, Reporter};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "nscd-dump")]
#[command(about = "Verify and dump an nscd persistent database file")]
struct Args {
    /// Database file, e.g. /var/db/nscd/hosts
    file: PathBuf,

    /// Print sizes, service names and response sub-headers
    #[arg(short, long)]
    verbose: bool,

    /// Emit one JSON document instead of text
    #[arg(long)]
    json: bool,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use this time (seconds since the epoch) instead of the system clock
    #[arg(long)]
    now: Option<u64>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    config.dump.verbose |= args.verbose;
    if args.json {
        config.dump.format = OutputFormat::Json;
    }
    if args.now.is_some() {
        config.verify.now = args.now;
    }

    let file = DatabaseFile::open(&args.file, config.dump.max_db_size)
        .with_context(|| format!("Failed to open database file \"{}\"", args.file.display()))?;
    let db = file
        .verify(&config.verify)
        .with_context(|| format!("Database file \"{}\" is invalid", args.file.display()))?;
    info!(path = %args.file.display(), entries = db.summary().entries, "Verified database");

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match config.dump.format {
        OutputFormat::Json => {
            write_json(&mut out, &db)?;
            writeln!(out)?;
        }
        OutputFormat::Text => {
            writeln!(out, "Database file \"{}\" validated\n", args.file.display())?;
            let mut reporter = Reporter::new(&mut out, std::io::stderr(), config.dump.verbose);
            reporter.dump(&db)?;
        }
    }

    out.flush()?;
    Ok(())
}
