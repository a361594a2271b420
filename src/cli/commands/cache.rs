//! Cache command - inspect and prune the artifact cache

use crate::cache::{format_bytes, CacheEntry, CacheSizeStatus, CacheStore, EvictionPolicy};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::{Config, ConfigManager};
use crate::error::RollgateResult;
use crate::ui::{self, StepKind, UiContext};
use console::style;
use std::path::PathBuf;

/// Cache root from config, or the default under the state directory
pub(crate) fn cache_root(config: &Config) -> PathBuf {
    config
        .cache
        .root
        .clone()
        .unwrap_or_else(ConfigManager::cache_dir)
}

/// Open the filesystem cache the CLI works against
pub(crate) async fn open_store(config: &Config) -> RollgateResult<CacheStore> {
    CacheStore::open(&cache_root(config), &config.cache).await
}

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> RollgateResult<()> {
    let store = open_store(config).await?;
    let ctx = UiContext::detect();

    match args.action {
        CacheAction::List { format } => list_entries(&ctx, &store, format)?,
        CacheAction::Status => show_status(&ctx, &store, config),
        CacheAction::Gc { days, dry_run } => gc(&ctx, &store, config, days, dry_run).await,
        CacheAction::Clear { yes } => clear(&ctx.with_auto_yes(yes), &store).await?,
    }

    Ok(())
}

fn list_entries(ctx: &UiContext, store: &CacheStore, format: OutputFormat) -> RollgateResult<()> {
    let entries = store.entries();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Plain => {
            for entry in &entries {
                println!("{}", entry.key);
            }
        }
        OutputFormat::Table if entries.is_empty() => {
            ui::step(ctx, StepKind::Info, "Cache is empty");
        }
        OutputFormat::Table => print_table(&entries),
    }

    Ok(())
}

fn print_table(entries: &[CacheEntry]) {
    println!(
        "{:<14} {:<14} {:>10} {:<10} {:<17}",
        style("KEY").bold(),
        style("DIGEST").bold(),
        style("SIZE").bold(),
        style("RUN").bold(),
        style("LAST USED").bold()
    );
    println!("{}", "-".repeat(69));

    for entry in entries {
        let run = entry.produced_by.to_string();
        println!(
            "{:<14} {:<14} {:>10} {:<10} {:<17}",
            entry.key.short(),
            &entry.digest[..entry.digest.len().min(12)],
            format_bytes(entry.size),
            &run[..8],
            entry.last_access.format("%Y-%m-%d %H:%M")
        );
    }

    println!();
    println!("{} artifact(s)", entries.len());
}

fn show_status(ctx: &UiContext, store: &CacheStore, config: &Config) {
    let usage = store.usage();
    let percent = CacheSizeStatus::percentage(usage.total_bytes, usage.limit_bytes);

    ui::intro(ctx, "Artifact cache");
    ui::key_value(ctx, "root", &cache_root(config).display().to_string());
    ui::key_value(ctx, "backend", store.backend_name());
    ui::key_value(ctx, "enabled", &config.cache.enabled.to_string());
    ui::key_value(ctx, "entries", &usage.entries.to_string());
    ui::key_value(
        ctx,
        "size",
        &format!(
            "{} / {} ({:.0}%)",
            format_bytes(usage.total_bytes),
            format_bytes(usage.limit_bytes),
            percent
        ),
    );

    match usage.status() {
        CacheSizeStatus::Ok => {}
        CacheSizeStatus::Warning => ui::step_hint(
            ctx,
            StepKind::Warn,
            "Cache is nearing its size limit",
            "Run: rollgate cache gc",
        ),
        CacheSizeStatus::Exceeded => ui::step_hint(
            ctx,
            StepKind::Warn,
            "Cache exceeds its size limit",
            "Raise cache.max_total_mb or run: rollgate cache gc",
        ),
    }
}

async fn gc(
    ctx: &UiContext,
    store: &CacheStore,
    config: &Config,
    days_override: Option<u32>,
    dry_run: bool,
) {
    let mut cache_config = config.cache.clone();
    if let Some(days) = days_override {
        cache_config.gc_days = days;
    }
    let policy = EvictionPolicy::from_config(&cache_config);

    if dry_run {
        let victims = store.plan_eviction(&policy);
        if victims.is_empty() {
            ui::step(ctx, StepKind::Info, "Nothing to evict");
            return;
        }
        for entry in &victims {
            ui::remark(
                ctx,
                &format!("would evict {} ({})", entry.key.short(), format_bytes(entry.size)),
            );
        }
        let bytes: u64 = victims.iter().map(|e| e.size).sum();
        ui::step(
            ctx,
            StepKind::Info,
            &format!(
                "Dry run: {} artifact(s), {} would be freed",
                victims.len(),
                format_bytes(bytes)
            ),
        );
        return;
    }

    let report = store.evict(&policy).await;
    if report.evicted.is_empty() {
        ui::step(ctx, StepKind::Info, "Nothing to evict");
    } else {
        ui::step(
            ctx,
            StepKind::Ok,
            &format!(
                "Evicted {} artifact(s), freed {}",
                report.evicted.len(),
                format_bytes(report.freed_bytes)
            ),
        );
    }
}

async fn clear(ctx: &UiContext, store: &CacheStore) -> RollgateResult<()> {
    let usage = store.usage();
    if usage.entries == 0 {
        ui::step(ctx, StepKind::Info, "Cache is already empty");
        return Ok(());
    }

    let prompt = format!(
        "Remove {} cached artifact(s) ({})?",
        usage.entries,
        format_bytes(usage.total_bytes)
    );
    if !ui::confirm(ctx, &prompt, false).await? {
        ui::step_hint(ctx, StepKind::Info, "Cache left untouched", "Pass --yes to skip the prompt");
        return Ok(());
    }

    let report = store.clear().await;
    ui::step(
        ctx,
        StepKind::Ok,
        &format!(
            "Cleared {} artifact(s), freed {}",
            report.evicted.len(),
            format_bytes(report.freed_bytes)
        ),
    );
    Ok(())
}
