use crate::{emit_success, OutputMode};
use mediacache::config::write_config;
use mediacache::ui::{self, Icons, Spinner, StatusProgress};
use mediacache::{CacheConfig, MediaCache, StatusSink, UpgradeOutcome};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Open the cache, rendering status messages as progress bars in human mode.
/// Tables are brought up to date first unless `check_tables` is false.
fn with_cache<T>(
    config: CacheConfig,
    output_mode: OutputMode,
    check_tables: bool,
    f: impl FnOnce(&MediaCache) -> mediacache::Result<T>,
) -> anyhow::Result<T> {
    let started = Instant::now();
    let (status, progress) = if output_mode.is_human() {
        let (sink, rx) = StatusSink::channel();
        (sink, Some(StatusProgress::new(rx)))
    } else {
        (StatusSink::disabled(), None)
    };

    let opened = if check_tables {
        MediaCache::open(config, status)
    } else {
        MediaCache::open_unchecked(config, status)
    };
    let result = opened.and_then(|cache| f(&cache));

    // The cache owned the last sender, so the progress thread sees the
    // channel close once it is dropped
    if let Some(progress) = progress {
        progress.finish(started.elapsed());
    }
    Ok(result?)
}

pub fn run_init(path: &Path, database: Option<PathBuf>, force: bool, output_mode: OutputMode) -> anyhow::Result<()> {
    let mut config = CacheConfig::default();
    if let Some(database) = database {
        config.database_dir = database;
    }
    write_config(path, &config, force)?;

    if output_mode.is_human() {
        ui::success(&format!("Wrote {}", path.display()));
    } else {
        emit_success(output_mode, "init", serde_json::json!({ "path": path }))?;
    }
    Ok(())
}

pub fn run_migrate(config: CacheConfig, output_mode: OutputMode) -> anyhow::Result<()> {
    if output_mode.is_human() {
        ui::header("Checking cache tables");
        ui::info("Store", &config.store_file().display().to_string());
    }
    let outcomes = with_cache(config, output_mode, false, |cache| cache.check_tables(false))?;

    if output_mode.is_human() {
        println!("{}", ui::outcomes_table(&outcomes));
        let changed = outcomes
            .iter()
            .filter(|(_, o)| !matches!(o, UpgradeOutcome::Current { .. }))
            .count();
        ui::success(&format!("{} tables checked, {} changed", outcomes.len(), changed));
    } else {
        let data: serde_json::Map<String, serde_json::Value> = outcomes
            .iter()
            .map(|(table, outcome)| Ok((table.clone(), serde_json::to_value(outcome)?)))
            .collect::<serde_json::Result<_>>()?;
        emit_success(output_mode, "migrate", serde_json::Value::Object(data))?;
    }
    Ok(())
}

pub fn run_versions(config: CacheConfig, output_mode: OutputMode) -> anyhow::Result<()> {
    let versions = with_cache(config, output_mode, false, |cache| cache.versions())?;

    if output_mode.is_human() {
        ui::section("Table versions");
        println!("{}", ui::versions_table(&versions));
    } else {
        emit_success(output_mode, "versions", serde_json::to_value(&versions)?)?;
    }
    Ok(())
}

pub fn run_sweep(config: CacheConfig, output_mode: OutputMode) -> anyhow::Result<()> {
    if output_mode.is_human() {
        ui::header("Cleaning up cache");
        if config.shared_roots.is_empty() {
            ui::info("Shared roots", "any location");
        } else {
            for root in &config.shared_roots {
                ui::info("Shared root", &root.display().to_string());
            }
        }
    }
    let report = with_cache(config, output_mode, true, |cache| cache.sweep())?;

    if output_mode.is_human() {
        if report.total() == 0 {
            ui::success("Nothing to clean up");
        } else {
            println!("{}", ui::sweep_table(&report));
            println!(
                "{} {}",
                Icons::BROOM.style(ui::theme().done.clone()),
                format!("Removed {} rows", report.total()).style(ui::theme().done.clone())
            );
        }
    } else {
        emit_success(output_mode, "sweep", serde_json::to_value(&report)?)?;
    }
    Ok(())
}

pub fn run_stats(config: CacheConfig, output_mode: OutputMode) -> anyhow::Result<()> {
    let stats = with_cache(config, output_mode, true, |cache| cache.stats())?;

    if output_mode.is_human() {
        ui::section(&format!("{} Cache statistics", Icons::STATS));
        ui::info("Store", &stats.store);
        println!("{}", ui::stats_table(&stats));
        ui::summary_row("Total rows:", &stats.total_rows().to_string());
    } else {
        emit_success(output_mode, "stats", serde_json::to_value(&stats)?)?;
    }
    Ok(())
}

pub fn run_reset(config: CacheConfig, all: bool, output_mode: OutputMode) -> anyhow::Result<()> {
    let spinner = output_mode
        .is_human()
        .then(|| Spinner::new(if all { "Dropping every table" } else { "Resetting cache" }));

    with_cache(config, output_mode, true, |cache| {
        if all {
            cache.drop_all()?;
            cache.check_tables(true)?;
        } else {
            cache.reset_cache()?;
        }
        Ok(())
    })?;

    if let Some(spinner) = spinner {
        spinner.finish_with_message("Done");
        if all {
            ui::warn("Playback status was dropped as well");
        }
        ui::success(&format!("{} Cache reset", Icons::DATABASE));
    } else {
        emit_success(output_mode, "reset", serde_json::json!({ "all": all }))?;
    }
    Ok(())
}
