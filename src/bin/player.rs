//! `player` binary: play a WebRTC stream from an SRS-style server

use clap::Parser;
use srs_player::{player, RunConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "player",
    version,
    about = "Play a WebRTC stream from an SRS-style media server"
)]
struct Args {
    /// Play page URL, or a direct play API URL (contains /rtc/)
    url: String,

    /// Stream name override (default: resolved from the page, else "livestream")
    #[arg(long)]
    stream: Option<String>,

    /// Play duration in seconds, 0 for unbounded
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Open a preview window
    #[arg(long)]
    display: bool,

    /// Record the stream to an MP4 file
    #[arg(long)]
    record: bool,

    /// Recording output path
    #[arg(long, default_value = "output.mp4")]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    info!("srs-player {}", srs_player::version());

    let config = RunConfig {
        page_url: args.url,
        stream_name: args.stream,
        timeout_secs: args.timeout,
        display: args.display,
        record: args.record,
        output_path: args.output,
        ..Default::default()
    };

    match player::run(&config).await {
        Ok(reason) => {
            let code = reason.exit_code();
            if code != 0 {
                error!("Exited with error: {}", reason);
            }
            ExitCode::from(code as u8)
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
