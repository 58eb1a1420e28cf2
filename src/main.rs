use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rolan_worker::cache::SqliteStore;
use rolan_worker::config::WorkerConfig;
use rolan_worker::fetch::HttpFetcher;
use rolan_worker::queue::{QueueKind, SqliteQueueStore};
use rolan_worker::worker::{ClientRegistry, Notification, Notifier, Worker};

#[derive(Parser, Debug)]
#[command(name = "rolan-worker")]
#[command(about = "Offline cache and sync engine for the Rolan ice cream PWA")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/rolan-worker/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show the current version, cache partitions and queue depths
  Status,
  /// Replay the queued orders and contact submissions over the network
  Sync,
  /// Garbage-collect cache partitions from prior versions
  Reclaim,
}

/// There are no live pages to claim from the command line; log what the
/// platform host would do.
struct LogClients;

impl ClientRegistry for LogClients {
  fn claim_all(&self) -> Result<()> {
    info!("claimed all open clients");
    Ok(())
  }

  fn open_window(&self, url: &url::Url) -> Result<()> {
    info!("would open window at {url}");
    Ok(())
  }
}

struct LogNotifier;

impl Notifier for LogNotifier {
  fn show(&self, notification: &Notification) -> Result<()> {
    info!(
      "notification: {}: {}",
      notification.title, notification.body
    );
    Ok(())
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let (writer, _guard) = tracing_appender::non_blocking(std::io::stderr());
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    )
    .with_writer(writer)
    .init();

  let args = Args::parse();
  let config = WorkerConfig::load(args.config.as_deref())?;

  let db_path = config.database_path()?;
  let store = Arc::new(SqliteStore::open(&db_path)?);
  let queue_store = Arc::new(SqliteQueueStore::open(&db_path)?);
  let net = Arc::new(HttpFetcher::new()?);

  let mut worker = Worker::new(
    config,
    store,
    queue_store,
    net,
    Arc::new(LogClients),
    Arc::new(LogNotifier),
  );

  match args.command {
    Command::Status => {
      println!("version: {}", worker.version());

      println!("partitions:");
      for partition in worker.partitions().partitions()? {
        let entries = worker.partitions().entry_count(&partition)?;
        println!("  {partition}: {entries} entries");
      }

      println!("queues:");
      for kind in QueueKind::ALL {
        println!(
          "  {}: {} pending",
          kind.sync_tag(),
          worker.queue().depth(kind)?
        );
      }
    }
    Command::Sync => {
      for kind in QueueKind::ALL {
        if let Some(report) = worker.handle_sync(kind.sync_tag()).await? {
          println!(
            "{}: {}/{} delivered, {} remaining",
            kind.sync_tag(),
            report.delivered,
            report.attempted,
            report.remaining
          );
        }
      }
    }
    Command::Reclaim => {
      worker.handle_activate()?;
      println!("partitions now: {:?}", worker.partitions().partitions()?);
    }
  }

  Ok(())
}
