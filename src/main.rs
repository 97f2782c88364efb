use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

mod archive;
mod config;
mod fetch;
mod logger;
mod models;
mod normalize;
mod server;
mod sources;
mod translate;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "newswire.yaml")]
    config: String,

    /// Add a feed source with this URL and exit (see --name)
    #[arg(short, long)]
    add: Option<String>,

    /// Display name for --add (defaults to the URL)
    #[arg(long)]
    name: Option<String>,

    /// List configured sources and exit
    #[arg(short, long)]
    list: bool,

    /// Toggle a source's enabled flag by id and exit
    #[arg(long)]
    toggle: Option<String>,

    /// Delete a source by id and exit
    #[arg(long)]
    delete: Option<String>,

    /// Console log level (off|error|warn|info|debug|trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Also log to this file
    #[arg(long)]
    log_file: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logger::init(logger::LogConfig {
        console_level: logger::parse_log_level(&args.log_level),
        log_file: args.log_file.clone(),
        ..logger::LogConfig::default()
    })?;

    let config = config::Config::load(Path::new(&args.config))?;
    let store = sources::SourceStore::new(&config.sources_file);

    if let Some(url) = args.add {
        let name = args.name.unwrap_or_else(|| url.clone());
        let source = store.add(&name, &url).await?;
        println!("Added source: {} ({})", source.name, source.id);
        return Ok(());
    }

    if args.list {
        println!("Configured sources:");
        for source in store.list().await {
            let flag = if source.enabled { "enabled " } else { "disabled" };
            println!("  [{}] {} - {} ({})", flag, source.id, source.name, source.url);
        }
        return Ok(());
    }

    if let Some(id) = args.toggle {
        store.toggle(&id).await?;
        println!("Toggled source: {id}");
        return Ok(());
    }

    if let Some(id) = args.delete {
        store.delete(&id).await?;
        println!("Deleted source: {id}");
        return Ok(());
    }

    serve(config, store).await
}

async fn serve(config: config::Config, store: sources::SourceStore) -> Result<()> {
    let state = server::AppState {
        sources: Arc::new(store),
        fetcher: Arc::new(fetch::FeedFetcher::new(&config.fetch)?),
        translator: Arc::new(translate::Translator::new(
            &config.translation,
            &config.cache_dir,
        )?),
        archive: Arc::new(archive::FeedArchive::new(&config.archive, &config.cache_dir)),
        batch_size: config.translation.batch_size,
    };

    let app = server::router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    info!("Listening on {}", config.listen);
    axum::serve(listener, app).await?;

    Ok(())
}
