use chrono::Local;
use std::path::PathBuf;
use structopt::StructOpt;

use sshwatch::config::Config;
use sshwatch::detection::freshness::{self, Freshness};
use sshwatch::{FreshnessFilter, LineClassifier, TailReader};

/// sshwatch helper command line interface
#[derive(StructOpt, Debug)]
#[structopt(name = "sshwatch-cli", about = "sshwatch helper commands")]
pub enum Cli {
    /// Generate a default configuration file
    Config {
        /// Output path for the configuration file
        #[structopt(short, long, default_value = "sshwatch.toml")]
        output: PathBuf,
    },
    /// Classify the login lines of an existing log file
    Parse {
        /// Path to log file
        #[structopt(short, long)]
        file: PathBuf,
        /// Number of events to show
        #[structopt(short, long, default_value = "10")]
        lines: usize,
        /// Freshness window in seconds
        #[structopt(short, long, default_value = "60")]
        window: i64,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match Cli::from_args() {
        Cli::Config { output } => {
            let config = Config::default();
            config.to_file(&output)?;
            println!("Default configuration written to: {:?}", output);
        }
        Cli::Parse {
            file,
            lines,
            window,
        } => {
            if !file.exists() {
                eprintln!("File not found: {:?}", file);
                std::process::exit(1);
            }

            let classifier = LineClassifier::new()?;
            let filter = FreshnessFilter::with_window_seconds(window);
            let now = Local::now().naive_local();

            let mut tailer = TailReader::new(file);
            let events: Vec<_> = tailer
                .poll_new_lines()?
                .iter()
                .filter_map(|line| classifier.classify(line))
                .collect();
            let display_count = std::cmp::min(lines, events.len());

            println!("Parsed {} event(s) (showing {}):\n", events.len(), display_count);
            for event in events.iter().take(display_count) {
                let verdict = match filter.check(event, now) {
                    Ok(Freshness::Fresh) => "fresh".to_string(),
                    Ok(Freshness::Stale) => "stale".to_string(),
                    Err(e) => format!("invalid: {}", e),
                };
                let parsed = freshness::event_time(event, now)
                    .map(|t| t.to_string())
                    .unwrap_or_else(|_| "-".to_string());
                println!(
                    "  [{}] {} User: {}, IP: {}, Method: {}, Time: {} ({})",
                    verdict,
                    event.kind,
                    event.username,
                    event.source_address,
                    event.auth_method,
                    event.timestamp_text,
                    parsed
                );
            }
        }
    }

    Ok(())
}
