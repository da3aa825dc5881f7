use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use cellar::cache::{CacheSource, CacheStores, SqliteStorage};
use cellar::config::Config;
use cellar::http::{Destination, HttpNetwork, RequestDescriptor};
use cellar::lifecycle::Clients;
use cellar::peripheral::{SyncOutcome, BACKGROUND_SYNC_TAG};
use cellar::worker::{Intercepted, LifecycleHooks, OfflineLayer};

#[derive(Parser, Debug)]
#[command(name = "cellar")]
#[command(about = "Offline-capable request cache for a single web origin")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./cellar.yaml, then $XDG_CONFIG_HOME/cellar/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Origin to serve, overriding the config file
  #[arg(short, long, global = true)]
  origin: Option<String>,

  /// Cache database path
  #[arg(long, global = true)]
  database: Option<PathBuf>,

  /// Increase log verbosity (-v info, -vv debug)
  #[arg(short, long, action = clap::ArgAction::Count, global = true)]
  verbose: u8,

  /// Write logs to this file instead of stderr
  #[arg(long, global = true)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the current version and activate it
  Install,
  /// Fetch a path through the layer and write the body to stdout
  Get {
    path: String,

    /// What the response will be used for
    #[arg(long, default_value = "other")]
    dest: Destination,
  },
  /// List stores with their entry counts
  Stores,
  /// Deliver a background sync event
  Sync {
    #[arg(default_value = BACKGROUND_SYNC_TAG)]
    tag: String,
  },
  /// Build the notification for a push payload and print it as JSON
  Push { payload: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging(args.verbose, args.log_file.as_deref())?;

  let mut config = Config::load(args.config.as_deref())?;
  if let Some(origin) = args.origin {
    config.origin = Some(origin);
  }
  if let Some(database) = args.database {
    config.database = Some(database);
  }

  match args.command {
    Command::Stores => list_stores(&open_stores(&config)?).await,
    Command::Install => {
      let layer = build_layer(&config)?;
      layer.on_install().await?;
      layer.on_activate().await?;
      eprintln!("Installed and activated {}", layer.config().static_store());
      Ok(())
    }
    Command::Get { path, dest } => {
      let layer = build_layer(&config)?;
      ensure_active(&layer).await?;
      get(&layer, &path, dest).await
    }
    Command::Sync { tag } => {
      let layer = build_layer(&config)?;
      match layer.on_sync(&tag).await {
        SyncOutcome::Replayed => eprintln!("Sync '{}' replayed", tag),
        SyncOutcome::Ignored => eprintln!("Sync '{}' ignored", tag),
      }
      Ok(())
    }
    Command::Push { payload } => {
      let layer = build_layer(&config)?;
      let notification = layer.on_push(payload.as_deref());
      println!("{}", serde_json::to_string_pretty(&notification)?);
      Ok(())
    }
  }
}

/// 0 = warn, 1 = info, 2+ = debug. `RUST_LOG` wins when set.
fn init_logging(verbose: u8, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
    0 => EnvFilter::new("cellar=warn"),
    1 => EnvFilter::new("cellar=info"),
    _ => EnvFilter::new("cellar=debug"),
  });

  let Some(path) = log_file else {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_target(false)
      .with_writer(std::io::stderr)
      .init();
    return Ok(None);
  };

  let file_name = path
    .file_name()
    .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
  let dir = match path.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => parent,
    _ => Path::new("."),
  };

  let appender = tracing_appender::rolling::never(dir, file_name);
  let (writer, guard) = tracing_appender::non_blocking(appender);
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_ansi(false)
    .with_writer(writer)
    .init();

  Ok(Some(guard))
}

fn open_stores(config: &Config) -> Result<CacheStores> {
  let path = match &config.database {
    Some(path) => path.clone(),
    None => SqliteStorage::default_path()?,
  };
  tracing::debug!(path = %path.display(), "Opening cache database");
  Ok(CacheStores::new(SqliteStorage::open(&path)?))
}

fn build_layer(config: &Config) -> Result<OfflineLayer> {
  let layer_config = config.layer_config()?;
  let stores = open_stores(config)?;
  let network = HttpNetwork::new(config.fetch_timeout())
    .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

  Ok(OfflineLayer::new(layer_config, stores, Arc::new(network), Clients::new()))
}

/// Resume the installed version, installing it first if nothing usable is on disk.
async fn ensure_active(layer: &OfflineLayer) -> Result<()> {
  if layer.lifecycle().restore().await? {
    return Ok(());
  }

  tracing::info!("No installed version found, installing");
  layer.on_install().await?;
  layer.on_activate().await?;
  Ok(())
}

async fn get(layer: &OfflineLayer, path: &str, dest: Destination) -> Result<()> {
  let url = layer
    .config()
    .resolve(path)
    .map_err(|e| eyre!("Invalid path '{}': {}", path, e))?;
  let request = RequestDescriptor::get(url.clone()).with_destination(dest);

  let handled = match layer.on_intercept(request).await? {
    Intercepted::Handled(handled) => handled,
    Intercepted::Bypassed => return Err(eyre!("{} is outside {}", url, layer.config().origin)),
  };

  let response = handled.response();
  let source = match handled.result.source {
    CacheSource::Network => "network",
    CacheSource::Cache => "cache",
    CacheSource::Fallback => "fallback",
  };
  eprintln!("{} {} ({})", response.status, url, source);

  let mut stdout = std::io::stdout().lock();
  stdout.write_all(&response.body)?;
  stdout.flush()?;
  drop(stdout);

  // Let a background refresh land before the process exits
  if let Some(revalidation) = handled.revalidation {
    revalidation.finished().await;
  }
  Ok(())
}

async fn list_stores(stores: &CacheStores) -> Result<()> {
  let names = stores.list().await?;
  if names.is_empty() {
    eprintln!("No stores");
    return Ok(());
  }

  println!("{:<16} {:<8} {:<10} {:>8}", "NAME", "ROLE", "VERSION", "ENTRIES");
  for name in names {
    let entries = stores.handle(&name).entry_count().await?;
    println!("{:<16} {:<8} {:<10} {:>8}", name.to_string(), name.role.as_str(), name.version, entries);
  }
  Ok(())
}
