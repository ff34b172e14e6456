use clap::Parser;
use color_eyre::Result;
use ondeck_sync::{Config, Engine};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ondeck-sync")]
#[command(about = "Offline-first sync and caching engine for OnDeck")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/ondeck-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Data directory for the store, caches, and logs
  #[arg(short, long)]
  data_dir: Option<PathBuf>,

  /// Run a single drain cycle and exit
  #[arg(long)]
  drain_once: bool,

  /// Log filter directive, e.g. "ondeck_sync=debug" (default: RUST_LOG)
  #[arg(long)]
  log_filter: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override data dir if specified on command line
  let config = if let Some(data_dir) = args.data_dir {
    Config {
      data_dir: Some(data_dir),
      ..config
    }
  } else {
    config
  };

  let log_dir = config
    .data_dir
    .clone()
    .unwrap_or_else(|| PathBuf::from("."))
    .join("logs");
  let file_appender = tracing_appender::rolling::daily(log_dir, "ondeck-sync.log");
  let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
  let filter = match &args.log_filter {
    Some(directive) => EnvFilter::new(directive),
    None => EnvFilter::from_default_env(),
  };
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(non_blocking)
    .with_ansi(false)
    .init();

  // Initialize and run the engine
  let mut engine = Engine::init(config).await?;

  if args.drain_once {
    let report = engine.drain_once().await?;
    println!("drained: {} synced, {} failed", report.synced, report.failed);
    return Ok(());
  }

  engine.run().await?;

  Ok(())
}
