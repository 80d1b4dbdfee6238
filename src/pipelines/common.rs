use anyhow::{Context, Result};
use colored::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use wasmode::config::{self, ProjectConfig};
use wasmode::{ChangeOutcome, ClientOptions, FileStore, StorageKind, Store, WasmClient};

/// A loaded project: its configuration and a client bound to it.
pub struct Workspace {
    pub root: PathBuf,
    pub config: ProjectConfig,
    pub client: Arc<WasmClient>,
}

/// Loads `wasmode.toml` (optional) and builds a client that persists its
/// mode under the project root.
///
/// `storage` overrides `[serve] on_disk`.
pub fn open_workspace(root: &Path, storage: Option<StorageKind>) -> Result<Workspace> {
    let root = root
        .canonicalize()
        .with_context(|| format!("Project root not found: {}", root.display()))?;
    let config = config::load_or_default(&root)?;

    let store: Arc<dyn Store> = Arc::new(FileStore::in_project(&root));
    let storage = storage.or_else(|| {
        config.serve.on_disk.map(|on_disk| {
            if on_disk {
                StorageKind::OnDisk
            } else {
                StorageKind::InMemory
            }
        })
    });
    let options = ClientOptions {
        store: Some(store),
        storage,
        ..ClientOptions::default()
    };

    let client = Arc::new(WasmClient::new(config.client_config(&root), options));
    Ok(Workspace {
        root,
        config,
        client,
    })
}

/// Turns rejected mode changes into errors. Compile failures are returned
/// as-is since the mode did switch.
pub fn ensure_switched(outcome: ChangeOutcome) -> Result<ChangeOutcome> {
    match outcome {
        ChangeOutcome::InvalidMode(err) | ChangeOutcome::ToolchainMissing(err) => {
            Err(anyhow::Error::new(err))
        }
        other => Ok(other),
    }
}

pub fn print_outcome(outcome: &ChangeOutcome) {
    match outcome {
        ChangeOutcome::Changed { .. } => println!("{} {}", "[DONE]".green().bold(), outcome),
        ChangeOutcome::CompileFailed { .. } => {
            println!("{} {}", "[WARN]".yellow().bold(), outcome)
        }
        ChangeOutcome::InvalidMode(_) | ChangeOutcome::ToolchainMissing(_) => {
            println!("{} {}", "[ERROR]".red().bold(), outcome)
        }
    }
}

/// `"{shortcut} ({label}, {command})"` for the active mode.
pub fn describe_mode(client: &WasmClient) -> String {
    let mode = client.current_mode();
    format!(
        "{} ({}, {})",
        client.current_shortcut(),
        mode.label(),
        mode.toolchain().command()
    )
}

pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    let value = bytes as f64;
    if value >= MB {
        format!("{:.2} MB", value / MB)
    } else if value >= KB {
        format!("{:.1} KB", value / KB)
    } else {
        format!("{bytes} B")
    }
}
