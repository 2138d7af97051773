use clap::Parser;
use std::path::PathBuf;

use coachd::config::DEFAULT_DATABASE_FILE;
use coachd::migrate::migrate_database;

/// Copy the directory database to a new file without overwriting anything.
#[derive(Debug, Parser)]
#[command(name = "coach-migrate", version)]
struct Args {
    /// Destination database file. Must not exist yet.
    target: PathBuf,
    /// Database file to copy.
    #[arg(long, env = "DATABASE_FILE", default_value = DEFAULT_DATABASE_FILE)]
    source: PathBuf,
}

fn main() {
    coachd::logging::init_tracing();
    // Usage errors exit 1 like every other failure; --help and --version exit 0.
    let args = match Args::try_parse() {
        Ok(a) => a,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };
    println!("Source DB: {}", args.source.display());
    println!("Target DB: {}", args.target.display());
    match migrate_database(&args.source, &args.target) {
        Ok(report) => {
            println!("Database migrated successfully. ({} bytes, sha256 {})", report.bytes, report.sha256);
        }
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}
