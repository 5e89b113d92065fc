use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use vaultsync::cache::CachingMetadataProvider;
use vaultsync::cancellation::CancellationToken;
use vaultsync::config::Config;
use vaultsync::demo::{InMemoryRemote, PassthroughTransformer, PlainNoteParser};
use vaultsync::detector;
use vaultsync::link_registry::LinkRegistry;
use vaultsync::orchestrator::Orchestrator;
use vaultsync::scanner::VaultScanner;
use vaultsync::state_store::StateStore;
use vaultsync::types::OutcomeResult;

mod cli;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { path, remote_parent_id } => init(path, remote_parent_id)?,
        Commands::Sync { dry_run, fuzzy_repair } => sync(dry_run, fuzzy_repair).await?,
        Commands::Status => status()?,
        Commands::RepairLinks { apply } => repair_links(apply)?,
        Commands::Backlinks { path } => backlinks(&path)?,
        Commands::Stats => stats()?,
    }

    Ok(())
}

fn init(path: std::path::PathBuf, remote_parent_id: Option<String>) -> Result<()> {
    let mut config = Config::default();
    config.vault_root = path;
    config.remote_parent_id = remote_parent_id;
    config.save()?;
    println!("Wrote configuration for vault {:?}", config.vault_root);
    Ok(())
}

async fn sync(dry_run: bool, fuzzy_repair: bool) -> Result<()> {
    let config = Config::load()?;
    if config.vault_root.as_os_str().is_empty() {
        anyhow::bail!("no vault configured; run `vaultsync init --path <vault>` first");
    }

    let store = Arc::new(StateStore::open(config.state_db_path())?);
    let links = Arc::new(LinkRegistry::new(store.clone()));
    let scanner = VaultScanner::new(config.vault_root.clone(), &config.ignore_patterns)?;
    let remote = Arc::new(InMemoryRemote::new());
    let cache = CachingMetadataProvider::new(remote.clone(), Duration::from_secs(config.cache_ttl_secs));
    let token = CancellationToken::new();

    if fuzzy_repair {
        let repaired = links.repair_links(dry_run)?;
        tracing::info!(count = repaired.len(), "fuzzy link repair pass complete");
    }

    let changes = detector::detect(&scanner, &store, Some(&cache), &token).await?;
    println!("Detected {} change(s)", changes.len());

    if dry_run {
        for change in &changes {
            println!("  {:?} {:?} {}", change.change_type, change.direction, change.path);
        }
        return Ok(());
    }

    let remote_parent_id = config.remote_parent_id.clone().unwrap_or_default();
    let orchestrator = Orchestrator::new(
        config.vault_root.clone(),
        store,
        links,
        PlainNoteParser,
        PassthroughTransformer,
        remote,
        config.worker_count,
    );
    let outcomes = orchestrator.run(changes, &remote_parent_id, &token).await?;

    let mut ok = 0;
    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            OutcomeResult::Ok => ok += 1,
            OutcomeResult::Failed(reason) => {
                failed += 1;
                println!("  FAILED {} ({}): {}", outcome.path, outcome.change_type, reason);
            }
            OutcomeResult::Skipped(reason) => {
                println!("  SKIPPED {} ({}): {}", outcome.path, outcome.change_type, reason);
            }
        }
    }
    println!("{ok} applied, {failed} failed");

    Ok(())
}

fn status() -> Result<()> {
    let config = Config::load()?;
    let store = StateStore::open(config.state_db_path())?;
    let records = store.list("")?;

    println!("Vault: {:?}", config.vault_root);
    for record in records {
        println!("  {} [{}]", record.local_path, record.status.as_str());
    }
    Ok(())
}

fn repair_links(apply: bool) -> Result<()> {
    let config = Config::load()?;
    let store = Arc::new(StateStore::open(config.state_db_path())?);
    let links = LinkRegistry::new(store);

    let candidates = links.repair_links(!apply)?;
    for candidate in &candidates {
        println!(
            "  {} -> {} ({})",
            candidate.source_path,
            candidate.suggested_path,
            if apply { "applied" } else { "suggested" }
        );
    }
    if candidates.is_empty() {
        println!("no repairable links found");
    }
    Ok(())
}

fn backlinks(path: &str) -> Result<()> {
    let config = Config::load()?;
    let store = Arc::new(StateStore::open(config.state_db_path())?);
    let links = LinkRegistry::new(store);

    let backlinks = links.backlinks(path).context("looking up backlinks")?;
    for link in backlinks {
        println!("  {} -> {}", link.source_path, link.target_name);
    }
    Ok(())
}

fn stats() -> Result<()> {
    let config = Config::load()?;
    let store = Arc::new(StateStore::open(config.state_db_path())?);
    let links = LinkRegistry::new(store);

    let stats = links.stats()?;
    println!("total: {}", stats.total);
    println!("resolved: {}", stats.resolved);
    println!("unresolved: {}", stats.unresolved);
    Ok(())
}
