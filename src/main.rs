mod api;
mod categories;
mod config;
mod coordinator;
mod driver;
mod error;
mod extract;
mod model;
mod orchestrator;
mod store;
mod view;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::api::AppState;
use crate::config::Settings;
use crate::coordinator::RefreshCoordinator;
use crate::driver::http::HttpDriver;
use crate::driver::PageDriver;
use crate::extract::{Extractor, Timing};
use crate::model::Snapshot;
use crate::orchestrator::Orchestrator;
use crate::store::CacheStore;

#[derive(Parser)]
#[command(name = "trends_api", version, about = "Trending-topics scraper with a cached JSON API")]
struct Cli {
    /// Settings file (default: trends.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API with background refreshes (default)
    Serve {
        /// Listen address, e.g. 0.0.0.0:8888
        #[arg(short, long)]
        bind: Option<String>,
        /// Geography for scheduled refreshes
        #[arg(short, long)]
        geo: Option<String>,
    },
    /// Run one scrape in the foreground
    Scrape {
        /// Category id to scrape (repeatable; default: all)
        #[arg(short = 'c', long = "category")]
        categories: Vec<u32>,
        #[arg(short, long)]
        geo: Option<String>,
        /// Print results without writing the cache file
        #[arg(long)]
        no_save: bool,
    },
    /// Show the state of the persisted cache
    Status,
    /// List known categories
    Categories,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;

    let command = cli.command.unwrap_or(Commands::Serve {
        bind: None,
        geo: None,
    });
    match command {
        Commands::Serve { bind, geo } => {
            if let Some(bind) = bind {
                settings.bind = bind;
            }
            if let Some(geo) = geo {
                settings.geo = geo;
            }
            settings.validate()?;
            return serve(settings).await;
        }
        Commands::Scrape {
            categories,
            geo,
            no_save,
        } => {
            let geo = geo.unwrap_or_else(|| settings.geo.clone());
            let ids = if categories.is_empty() {
                categories::default_ids()
            } else {
                categories
            };
            let snapshot = scrape_once(settings.clone(), geo, ids).await?;
            println!(
                "{} trends across {} categories ({}) in {:.1}s",
                snapshot.metadata.total_trends,
                snapshot.metadata.categories_count,
                snapshot.geography,
                snapshot.metadata.scrape_duration_seconds
            );
            if no_save {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                CacheStore::new(&settings.cache_file, settings.stale_after()).save(snapshot);
                println!("Saved to {}", settings.cache_file.display());
            }
        }
        Commands::Status => {
            let store = CacheStore::new(&settings.cache_file, settings.stale_after());
            let snapshot = store.load();
            println!("{}", serde_json::to_string_pretty(&store.cache_info())?);
            if let Some(s) = snapshot {
                println!(
                    "{}: {} trends in {} categories",
                    s.geography, s.metadata.total_trends, s.metadata.categories_count
                );
            }
        }
        Commands::Categories => {
            for (id, name) in categories::CATEGORIES {
                println!("{:>3}  {}", id, name);
            }
        }
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }
    Ok(())
}

async fn serve(settings: Settings) -> Result<()> {
    let addr = settings.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let driver = {
        let s = settings.clone();
        tokio::task::spawn_blocking(move || HttpDriver::new(&s))
            .await
            .context("Driver setup task failed")??
    };
    let driver: Arc<dyn PageDriver> = Arc::new(driver);
    let extractor = Extractor::new(driver, settings.base_url.clone(), Timing::from(&settings));
    let orchestrator = Arc::new(Orchestrator::new(Arc::new(extractor)));
    let store = Arc::new(CacheStore::new(&settings.cache_file, settings.stale_after()));
    let coordinator = Arc::new(RefreshCoordinator::new(
        store,
        orchestrator,
        settings.geo.clone(),
    ));

    coordinator.warm_start();
    let shutdown = CancellationToken::new();
    let scheduler =
        Arc::clone(&coordinator).spawn_scheduler(settings.refresh_interval(), shutdown.clone());

    let app = api::router(AppState {
        coordinator,
        settings: Arc::new(settings),
    });
    info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Err(e) = scheduler.await {
        error!("scheduler task failed: {}", e);
    }
    info!("stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for Ctrl-C: {}", e);
    }
    info!("shutting down");
    shutdown.cancel();
}

/// One orchestration run on the blocking pool, with a progress bar.
async fn scrape_once(settings: Settings, geo: String, ids: Vec<u32>) -> Result<Snapshot> {
    tokio::task::spawn_blocking(move || -> Result<Snapshot> {
        let driver: Arc<dyn PageDriver> = Arc::new(HttpDriver::new(&settings)?);
        let extractor = Extractor::new(driver, settings.base_url.clone(), Timing::from(&settings));
        let orchestrator = Orchestrator::new(Arc::new(extractor));

        let pb = ProgressBar::new(ids.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("#>-"),
        );
        let snapshot = orchestrator.run_with(&geo, Some(&ids), |_, result| {
            pb.println(format!("{:<28} {:>3}", result.category_name, result.trend_count));
            pb.set_message(result.category_name.clone());
            pb.inc(1);
        });
        pb.finish_and_clear();
        Ok(snapshot)
    })
    .await
    .context("Scrape task failed")?
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
