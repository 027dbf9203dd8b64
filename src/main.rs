use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use newsgrid::config::Config;
use newsgrid::fetcher::{start_background_refresh, Fetcher};
use newsgrid::routes::{router, AppState};
use newsgrid::rss::write_rss;
use newsgrid::snapshot::Snapshot;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the feeds configuration
    #[arg(short, long, default_value = "feeds.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Serve the column view, refreshing feeds in the background (default)
    Serve {
        /// Only serve the existing snapshot, never fetch
        #[arg(long)]
        no_refresh: bool,
    },
    /// Run one fetch cycle and write the snapshot
    Fetch,
    /// Regenerate the RSS re-export from the snapshot on disk
    Rss {
        /// Output path, defaults to `rss_path` from the config
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "newsgrid=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load(&cli.config)?;
    if let Ok(path) = std::env::var("SNAPSHOT_PATH") {
        config.snapshot_path = PathBuf::from(path);
    }
    info!("Loaded {} feeds from configuration", config.feeds.len());

    let config = Arc::new(config);

    match cli.command.unwrap_or(Commands::Serve { no_refresh: false }) {
        Commands::Serve { no_refresh } => serve(config, no_refresh).await,
        Commands::Fetch => {
            let fetcher = Fetcher::new(config)?;
            if let Some(snapshot) = fetcher.refresh_all_feeds().await? {
                info!("Snapshot holds {} articles", snapshot.articles().len());
            }
            Ok(())
        }
        Commands::Rss { output } => {
            let path = output
                .or_else(|| config.rss_path.clone())
                .ok_or_else(|| anyhow::anyhow!("no RSS output path; pass --output or set rss_path"))?;
            let snapshot = Snapshot::load(&config.snapshot_path).await?;
            write_rss(&path, snapshot.articles(), &config.channel).await?;
            Ok(())
        }
    }
}

async fn serve(config: Arc<Config>, no_refresh: bool) -> anyhow::Result<()> {
    let listen = config.listen.clone();
    let refresh_interval = config.refresh_interval;

    // Create fetcher
    let fetcher = Arc::new(Fetcher::new(config)?);

    // Start background refresh task
    if !no_refresh {
        let bg_fetcher = fetcher.clone();
        tokio::spawn(async move {
            start_background_refresh(bg_fetcher, refresh_interval).await;
        });
    }

    let app = router(Arc::new(AppState { fetcher }));

    // Start server
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("binding {}", listen))?;
    info!("Server starting on http://{}", listen);

    axum::serve(listener, app).await?;

    Ok(())
}
