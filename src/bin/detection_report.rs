//! detection_report - print the detection log as a fixed-width table.

use anyhow::{Context, Result};
use clap::Parser;

use detection_relay::render_report;

#[derive(Parser, Debug)]
#[command(author, version, about = "Print the detection log")]
struct Args {
    /// Path to the detection database.
    #[arg(long, env = "RELAY_DB_PATH", default_value = "detections.db")]
    db_path: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let report = render_report(&args.db_path)
        .with_context(|| format!("failed to read detection log {}", args.db_path))?;
    print!("{}", report);
    Ok(())
}
