use clap::Parser;
use log_follower::{FollowOptions, WatcherConfig, follow};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Print a file's lines and keep printing lines appended to it, like `tail -f`.
///
/// Each line is prefixed with the offset right after it, which can be passed
/// to --resume on a later run.
#[derive(Parser, Debug)]
#[command(name = "log-follower", version, about)]
struct Cli {
    /// File to follow
    file: PathBuf,

    /// Resume from this byte offset instead of the beginning
    #[arg(long, default_value_t = 0)]
    resume: u64,

    /// How often to check the file for changes, in milliseconds
    #[arg(long, default_value_t = 10)]
    poll_interval_ms: u64,

    /// How long a change signal may wait for the reader before re-checking, in milliseconds
    #[arg(long, default_value_t = 1000)]
    refresh_interval_ms: u64,
}

impl Cli {
    fn follow_options(&self) -> FollowOptions {
        FollowOptions::default()
            .with_start_position(self.resume)
            .with_watcher_config(
                WatcherConfig::default()
                    .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
                    .with_refresh_interval(Duration::from_millis(self.refresh_interval_ms)),
            )
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut lines = match follow(&cli.file, cli.follow_options()).await {
        Ok(lines) => lines,
        Err(e) => {
            error!(file = %cli.file.display(), "Cannot follow file: {e}");
            process::exit(1);
        }
    };

    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => println!("{:>10}: {}", line.next_position(), line.to_string_lossy()),
            Err(e) => {
                error!(file = %cli.file.display(), "Error reading file: {e}");
                process::exit(1);
            }
        }
    }
}
