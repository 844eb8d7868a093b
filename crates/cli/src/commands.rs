// FILE: crates/cli/src/commands.rs

use anyhow::{bail, Context, Result};
use console::style;
use mirrorsync_config::{Config, ConfigManager};
use mirrorsync_core::Timestamp;
use mirrorsync_engine::{ChangeAction, PersistedStore, SnapshotFile};
use std::path::Path;

/// Write a default config file if none exists
pub fn init_config(manager: &ConfigManager) -> Result<()> {
    let created = manager
        .initialize()
        .context("Failed to write default config")?;

    if created {
        println!(
            "{} Created {}",
            style("✓").green().bold(),
            manager.config_path().display()
        );
    } else {
        println!(
            "Config already exists at {}",
            manager.config_path().display()
        );
    }
    Ok(())
}

/// Print the effective configuration (file plus environment overrides)
pub fn show_config(manager: &ConfigManager, config: &Config) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("Failed to render config")?;

    println!("\n{}", style("Configuration").bold().cyan());
    println!("{}", "=".repeat(60));
    println!("File:  {}", manager.config_path().display());
    println!("State: {}", manager.state_path(config).display());
    println!("{}", "-".repeat(60));
    print!("{}", rendered);
    Ok(())
}

/// Check the config file and list every problem
pub fn validate_config(manager: &ConfigManager) -> Result<()> {
    let problems = manager.validate().context("Failed to load config")?;

    if problems.is_empty() {
        println!(
            "{} {} is valid",
            style("✓").green().bold(),
            manager.config_path().display()
        );
        return Ok(());
    }

    println!(
        "{} {} problem(s) in {}",
        style("✗").red().bold(),
        problems.len(),
        manager.config_path().display()
    );
    for problem in &problems {
        println!("  - {}", problem);
    }
    bail!("Configuration is invalid")
}

/// Summarize the saved state snapshot
pub fn show_status(state_path: &Path) -> Result<()> {
    let file = SnapshotFile::new(state_path);
    let Some(persisted) = file
        .load()
        .with_context(|| format!("Failed to read {}", state_path.display()))?
    else {
        println!(
            "No saved state at {}. Run 'demo' to create one.",
            state_path.display()
        );
        return Ok(());
    };

    println!("\n{}", style("Sync State").bold().cyan());
    println!("{}", "=".repeat(60));
    for line in status_lines(&persisted) {
        println!("{}", line);
    }
    Ok(())
}

/// Human-readable lines describing a snapshot
pub(crate) fn status_lines(persisted: &PersistedStore) -> Vec<String> {
    let sync = &persisted.sync;
    let mut lines = vec![format!(
        "First load: {}",
        if sync.first_load_done { "done" } else { "pending" }
    )];

    if persisted.collections.is_empty() {
        lines.push("No collections".to_string());
    }
    for (collection, records) in &persisted.collections {
        let unsynced = records.iter().filter(|r| r.server_id.is_none()).count();
        let pulled = sync
            .last_pulled
            .get(collection)
            .map(format_timestamp)
            .unwrap_or_else(|| "never".to_string());
        lines.push(format!(
            "{}: {} record(s), {} unsynced, last pulled {}",
            truncate(collection.as_str(), 24),
            records.len(),
            unsynced,
            pulled
        ));
    }

    let count = |action: ChangeAction| {
        sync.pending_changes
            .iter()
            .filter(|c| c.action == action)
            .count()
    };
    lines.push(format!(
        "Pending: {} create, {} update, {} remove",
        count(ChangeAction::Create),
        count(ChangeAction::Update),
        count(ChangeAction::Remove)
    ));

    if !sync.conflicts.is_empty() {
        lines.push(format!("Conflicts: {}", sync.conflicts.len()));
        for (local_id, conflict) in sync.conflicts.entries() {
            lines.push(format!(
                "  {} in '{}': {}",
                local_id,
                conflict.collection,
                conflict.field_names().join(", ")
            ));
        }
    }
    lines
}

fn format_timestamp(ts: &Timestamp) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string()
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests;
