use std::path::PathBuf;
use std::time::Duration;
use structopt::StructOpt;
use tokio::sync::mpsc;

use sshwatch::config::Config;
use sshwatch::{
    AlertDispatcher, FileWatcher, FreshnessFilter, GeoBackend, GeoResolver, LineClassifier,
    StartPosition, TailReader, WatchLoop, WatchSignal, WeComWebhook,
};

/// Watch an auth log and forward SSH logins to a chat webhook
#[derive(StructOpt, Debug)]
#[structopt(name = "sshwatch")]
struct Args {
    /// Path to the auth log
    #[structopt(parse(from_os_str))]
    log_file: PathBuf,
    /// Webhook robot key
    webhook_token: String,
    /// Path to configuration file
    #[structopt(short, long, parse(from_os_str))]
    config: Option<PathBuf>,
    /// Skip whatever the log already holds at startup
    #[structopt(long)]
    from_end: bool,
    /// Watch the log directory recursively
    #[structopt(long)]
    recursive: bool,
}

/// Daemon entry point
fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::from_args();

    let mut config = match args.config {
        Some(ref path) if path.exists() => Config::from_file(path)?,
        Some(ref path) => {
            log::warn!("Config file {} not found, using defaults", path.display());
            Config::default()
        }
        None => Config::default(),
    };
    config.watch.file_path = args.log_file;
    config.alert.token = args.webhook_token;
    config.watch.start_at_end |= args.from_end;
    config.watch.recursive |= args.recursive;

    // One thread: notifications are queued while a batch is processed.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let shutdown_tx = tx.clone();
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal, gracefully stopping...");
        let _ = shutdown_tx.send(WatchSignal::Shutdown);
    })?;

    // The only fatal failure once running.
    let _watcher = FileWatcher::subscribe(&config.watch.file_path, config.watch.recursive, tx)?;

    let geo = GeoResolver::with_policy(
        GeoBackend::from_config(&config.geo)?,
        config.geo.cache_policy.into(),
    );
    let sink = WeComWebhook::new(
        &config.alert.webhook_url,
        &config.alert.token,
        Duration::from_secs(config.alert.timeout_secs),
    )?;

    let start = if config.watch.start_at_end {
        StartPosition::End
    } else {
        StartPosition::Beginning
    };

    let mut watch = WatchLoop::new(
        TailReader::with_start(config.watch.file_path.clone(), start),
        LineClassifier::new()?,
        FreshnessFilter::with_window_seconds(config.freshness.window_seconds),
        AlertDispatcher::new(sink, geo),
    );
    watch.run(&mut rx).await;

    Ok(())
}
