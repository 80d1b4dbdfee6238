use anyhow::Result;
use colored::*;
use std::path::Path;

use wasmode::StorageKind;

use super::common::{describe_mode, ensure_switched, open_workspace, print_outcome};

/// Without a token, prints the active mode and the available shortcuts.
/// With a token, switches, persists and rebuilds the artifact on disk.
pub fn execute_mode_pipeline(root: &Path, token: Option<&str>) -> Result<()> {
    let workspace = open_workspace(root, Some(StorageKind::OnDisk))?;
    let client = &workspace.client;

    let Some(token) = token else {
        println!("{} Active mode: {}", "[WASM]".green().bold(), describe_mode(client));
        let active = client.current_shortcut();
        for (shortcut, label, toolchain) in client.shortcuts() {
            let marker = if shortcut == active { "*" } else { " " };
            println!("  {marker} {shortcut:<3} {label:<7} {}", toolchain.command());
        }
        return Ok(());
    };

    let outcome = ensure_switched(client.change(token))?;
    print_outcome(&outcome);
    Ok(())
}
