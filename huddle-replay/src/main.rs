//! huddle-replay entry point.
//!
//! ```text
//! huddle-replay --script room.jsonl     Replay a script, print the report
//! huddle-replay < room.jsonl            Same, script on stdin
//! huddle-replay --config <path>         Load a custom config TOML
//! huddle-replay --identity <id>         Override the configured identity
//! huddle-replay --gen-config            Write default config to stdout
//! ```

use std::io::Read;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use huddle_replay::config::ReplayConfig;
use huddle_replay::replay::{Replayer, parse_script};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "huddle-replay", about = "Replay a signaling script against a simulated room")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "huddle-replay.toml")]
    config: PathBuf,

    /// JSON-lines script. Read from stdin when omitted.
    #[arg(short, long)]
    script: Option<PathBuf>,

    /// Local identity, overriding the config file.
    #[arg(short, long)]
    identity: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&ReplayConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let config = ReplayConfig::load(&cli.config);

    // Logs go to stderr so the report on stdout stays parseable.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let identity = cli.identity.unwrap_or_else(|| config.identity.id.clone());
    info!("huddle-replay v{}", env!("CARGO_PKG_VERSION"));
    info!("identity: {identity}");

    let text = match &cli.script {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let script = parse_script(&text)?;
    info!("replaying {} lines", script.len());

    let replayer = Replayer::new(&identity, config.to_room_config())?;
    let report = replayer.run(script).await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
