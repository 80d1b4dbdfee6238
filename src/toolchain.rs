use anyhow::{Context, Result};
use std::process::Command;
use std::sync::Arc;

use crate::mode::Toolchain;

/// Answers whether a toolchain can be executed on this host.
pub type ToolchainProbe = Arc<dyn Fn(Toolchain) -> bool + Send + Sync>;

/// Probe that runs `<command> version`.
pub fn system_probe() -> ToolchainProbe {
    Arc::new(|toolchain| version(toolchain).is_ok())
}

/// Runs `<command> version` and returns its trimmed output.
///
/// # Errors
/// - The command is not on `PATH` or cannot be spawned.
/// - The command exits with a non-zero status.
pub fn version(toolchain: Toolchain) -> Result<String> {
    let output = Command::new(toolchain.command())
        .arg("version")
        .output()
        .with_context(|| format!("{} not found in PATH", toolchain.command()))?;

    if !output.status.success() {
        anyhow::bail!(
            "`{} version` exited with {}",
            toolchain.command(),
            output.status
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Installation hint shown when a toolchain is missing.
pub fn install_hint(toolchain: Toolchain) -> &'static str {
    match toolchain {
        Toolchain::Go => "install Go from https://go.dev/dl/",
        Toolchain::TinyGo => {
            "install TinyGo from https://tinygo.org/getting-started/install/"
        }
    }
}
