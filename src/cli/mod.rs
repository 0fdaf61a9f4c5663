//! Command-line interface for offsync.
//!
//! Provides commands for searching and curating the library through the
//! offline layer, replaying queued operations, and running the lifecycle
//! steps.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;

use crate::adapters::{ChannelScheduler, IntentReceiver, ManualConnectivity, ReqwestNetwork};
use crate::config;
use crate::core::{Adapters, DrainOutcome, OfflineWorker, KNOWN_CACHES};
use crate::domain::{
    ClientMessage, HttpRequest, HttpResponse, Library, LibraryEntry, QueueName, RetryIntent,
    SearchData, SearchQuery,
};

pub mod queue;

/// offsync - Offline-resilient search and library client
#[derive(Parser, Debug)]
#[command(name = "offsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search public animations
    Search {
        /// Search query
        query: String,

        /// Number of results per page
        #[arg(long)]
        first: Option<u32>,

        /// Cursor to continue after
        #[arg(long)]
        after: Option<String>,

        /// Behave as if the device were offline
        #[arg(long, env = "OFFSYNC_OFFLINE")]
        offline: bool,
    },

    /// Save an animation to the library
    Save {
        /// Animation cursor (identity)
        #[arg(long)]
        cursor: String,

        #[arg(long)]
        lottie_url: String,

        #[arg(long)]
        json_url: String,

        /// Creator's first name
        #[arg(long)]
        author: String,

        /// Behave as if the device were offline
        #[arg(long, env = "OFFSYNC_OFFLINE")]
        offline: bool,
    },

    /// Remove an animation from the library
    Remove {
        /// Animation cursor
        cursor: String,

        /// Behave as if the device were offline
        #[arg(long, env = "OFFSYNC_OFFLINE")]
        offline: bool,
    },

    /// Replay queued operations (all queues if none given)
    Sync {
        /// Queue name (search-retry, save, remove)
        queue: Option<QueueName>,
    },

    /// Inspect or clear a queue
    Queue {
        #[command(subcommand)]
        command: queue::QueueCommands,
    },

    /// Show queue and cache sizes
    Status,

    /// Precache the app shell and configured assets
    Install,

    /// Delete caches not owned by this version
    Activate,

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Search {
                query,
                first,
                after,
                offline,
            } => search(query, first, after, offline).await,
            Commands::Save {
                cursor,
                lottie_url,
                json_url,
                author,
                offline,
            } => {
                let entry = LibraryEntry {
                    cursor,
                    lottie_url,
                    json_url,
                    created_by_first_name: author,
                };
                save(entry, offline).await
            }
            Commands::Remove { cursor, offline } => remove(&cursor, offline).await,
            Commands::Sync { queue } => sync(queue).await,
            Commands::Queue { command } => queue::execute(command).await,
            Commands::Status => show_status().await,
            Commands::Install => install().await,
            Commands::Activate => activate().await,
            Commands::Config => show_config().await,
        }
    }
}

/// Build the worker the same way a long-running host would
async fn open_worker(offline: bool) -> Result<(OfflineWorker, IntentReceiver)> {
    let cfg = config::config()?;
    let (scheduler, intents) = ChannelScheduler::new();

    let adapters = Adapters {
        network: Arc::new(ReqwestNetwork::new()?),
        connectivity: Arc::new(ManualConnectivity::new(!offline)),
        scheduler: Arc::new(scheduler),
    };

    let worker = OfflineWorker::open(cfg, adapters).await?;
    Ok((worker, intents))
}

/// Tell the user about anything queued by the last request
fn report_deferred(intents: &mut IntentReceiver) {
    for intent in intents.drain_pending() {
        eprintln!(
            "[Queued in '{}'; run `offsync sync` once back online]",
            intent
        );
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    data: SearchData,
}

async fn search(
    query: String,
    first: Option<u32>,
    after: Option<String>,
    offline: bool,
) -> Result<()> {
    let (worker, mut intents) = open_worker(offline).await?;

    let variables = SearchQuery { query, first, after };
    let request = HttpRequest::post(worker.routes().search_url().clone(), variables.to_body()?)
        .with_header("Content-Type", "application/json");

    let response = worker.handle_fetch(request).await?;
    report_deferred(&mut intents);

    if response.is_deferred_retry() {
        eprintln!("{}", response.text());
        return Ok(());
    }
    ensure_success(&response)?;

    let body: SearchResponse = response.json().context("Unexpected search response")?;
    let library = body.data.library();

    if library.is_empty() {
        println!("No results found for: {}", variables.query);
        return Ok(());
    }
    print_results(&library);

    let page = body.data.search_public_animations.page_info;
    if let (true, Some(end)) = (page.has_next_page, page.end_cursor) {
        eprintln!("\nMore results: --after {}", end);
    }
    Ok(())
}

fn print_results(library: &Library) {
    println!("{:<40} {:<16} {:<60}", "CURSOR", "AUTHOR", "JSON URL");
    println!("{}", "-".repeat(116));
    for entry in library.entries() {
        let author = match entry.created_by_first_name.as_str() {
            "" => "-",
            name => name,
        };
        println!("{:<40} {:<16} {:<60}", entry.cursor, author, entry.json_url);
    }
}

async fn save(entry: LibraryEntry, offline: bool) -> Result<()> {
    let (worker, mut intents) = open_worker(offline).await?;

    let request =
        HttpRequest::post(worker.routes().api_url().clone(), Vec::new()).with_json(&entry)?;
    let response = worker.handle_fetch(request).await?;
    report_deferred(&mut intents);
    ensure_success(&response)?;

    eprintln!("Saved {}", entry.cursor);
    Ok(())
}

async fn remove(cursor: &str, offline: bool) -> Result<()> {
    let (worker, mut intents) = open_worker(offline).await?;

    let request = HttpRequest::delete(worker.routes().remove_url(cursor)?);
    let response = worker.handle_fetch(request).await?;
    report_deferred(&mut intents);
    ensure_success(&response)?;

    eprintln!("Removed {}", cursor);
    Ok(())
}

fn ensure_success(response: &HttpResponse) -> Result<()> {
    if !response.is_success() {
        anyhow::bail!(
            "Request failed: {} {}: {}",
            response.status,
            response.status_text,
            response.text()
        );
    }
    Ok(())
}

async fn sync(queue: Option<QueueName>) -> Result<()> {
    let (worker, _intents) = open_worker(false).await?;
    let (_subscription, mut messages) = worker.notifier().subscribe_channel();

    let queues = match queue {
        Some(queue) => vec![queue],
        None => QueueName::ALL.to_vec(),
    };

    let mut halted = false;
    for queue in queues {
        let outcome = worker.handle_wake(&RetryIntent::for_queue(queue)).await?;
        match &outcome {
            DrainOutcome::Empty => println!("{:<14} empty", queue),
            DrainOutcome::Completed { replayed } => {
                println!("{:<14} replayed {}", queue, replayed)
            }
            DrainOutcome::Halted {
                replayed,
                remaining,
                error,
            } => {
                halted = true;
                println!(
                    "{:<14} halted after {} ({} remaining): {}",
                    queue, replayed, remaining, error
                );
            }
            DrainOutcome::AlreadyDraining => println!("{:<14} already draining", queue),
        }
    }

    while let Ok(message) = messages.try_recv() {
        let ClientMessage::SearchRetryResult { payload } = &message;
        match serde_json::from_value::<SearchData>(payload.clone()) {
            Ok(data) => {
                println!();
                println!("Deferred search answered:");
                print_results(&data.library());
            }
            Err(_) => println!("{}", serde_json::to_string_pretty(&message)?),
        }
    }

    if halted {
        anyhow::bail!("Some queues could not be fully replayed");
    }
    Ok(())
}

async fn show_status() -> Result<()> {
    let (worker, _intents) = open_worker(false).await?;

    println!("Queues:");
    for (queue, pending) in worker.queues().status().await? {
        println!("  {:<14} {} pending", queue, pending);
    }

    println!();
    println!("Caches:");
    for name in KNOWN_CACHES {
        println!("  {:<18} {} entries", name, worker.cache().len(name)?);
    }

    let stale: Vec<String> = worker
        .cache()
        .cache_names()?
        .into_iter()
        .filter(|name| !KNOWN_CACHES.contains(&name.as_str()))
        .collect();
    if !stale.is_empty() {
        println!();
        println!("Outdated caches (run `offsync activate`): {}", stale.join(", "));
    }

    Ok(())
}

async fn install() -> Result<()> {
    let (worker, _intents) = open_worker(false).await?;
    let count = worker.install().await?;
    eprintln!("Precached {} URL(s)", count);
    Ok(())
}

async fn activate() -> Result<()> {
    let (worker, _intents) = open_worker(false).await?;
    let removed = worker.activate()?;

    if removed.is_empty() {
        eprintln!("No outdated caches");
    } else {
        eprintln!("Deleted caches: {}", removed.join(", "));
    }
    Ok(())
}

/// Show resolved configuration
async fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("offsync configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:      {}", cfg.home.display());
    println!("  Queue log: {}", cfg.queue_log_path().display());
    println!("  Caches:    {}", cfg.cache_db_path().display());
    println!();
    println!("Endpoints:");
    println!("  Search: {}", cfg.endpoints.search_url);
    println!("  API:    {}", cfg.endpoints.api_url);
    println!();
    println!("Static assets:");
    for pattern in &cfg.assets.patterns {
        println!("  {}", pattern);
    }
    println!("  Max entries: {}", cfg.assets.max_entries);
    match cfg.assets.quota_bytes {
        Some(quota) => println!("  Quota:       {} bytes", quota),
        None => println!("  Quota:       (storage limit)"),
    }
    println!();
    println!("Precache URLs:");
    if cfg.precache_urls.is_empty() {
        println!("  (none)");
    }
    for url in &cfg.precache_urls {
        println!("  {}", url);
    }
    println!();
    println!("Sync backoff:");
    println!("  Initial delay: {}ms", cfg.sync.initial_delay_ms);
    println!("  Max delay:     {}ms", cfg.sync.max_delay_ms);
    println!("  Multiplier:    {}", cfg.sync.backoff_multiplier);
    println!("  Poll interval: {}ms", cfg.sync.poll_interval_ms);

    Ok(())
}
