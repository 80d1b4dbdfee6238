use anyhow::{Context, Result};
use colored::*;
use std::path::Path;
use std::time::Instant;

use wasmode::{ChangeOutcome, StorageKind};

use super::common::{describe_mode, ensure_switched, format_size, open_workspace};

/// Execute a one-shot build
///
/// Flow:
/// 1. Load config and open the project with on-disk storage
/// 2. Verify the main input exists
/// 3. Switch mode if requested (this compiles), otherwise compile
/// 4. Report artifact and runtime shim
pub fn execute_build_pipeline(root: &Path, mode: Option<&str>) -> Result<()> {
    let start_time = Instant::now();

    // --- 1. Open project ---
    let workspace = open_workspace(root, Some(StorageKind::OnDisk))?;
    let client = &workspace.client;

    // --- 2. Input check ---
    let main_input = client.main_input_absolute_path();
    if !main_input.exists() {
        anyhow::bail!("Main input file not found: {}", main_input.display());
    }

    println!(
        "{} Building: {}",
        "[WASM]".green().bold(),
        client.main_input_relative_path()
    );

    // --- 3. Compilation ---
    match mode {
        Some(token) => {
            let outcome = ensure_switched(client.change(token))?;
            if let ChangeOutcome::CompileFailed { error, .. } = outcome {
                return Err(anyhow::Error::new(error).context("Source compilation failed"));
            }
        }
        None => client.compile().context("Source compilation failed")?,
    }
    println!("{} Mode: {}", "[INFO]".cyan(), describe_mode(client));

    // --- 4. Report ---
    if workspace.config.serve.shim_output {
        println!(
            "{} Runtime shim: {}",
            "[INFO]".cyan(),
            client.shim_output_path().display()
        );
    }

    let duration = start_time.elapsed();
    println!(
        "{} Build completed in {:.2}s → {} ({})",
        "[DONE]".green().bold(),
        duration.as_secs_f64(),
        client.output_relative_path(),
        format_size(client.binary_size())
    );

    Ok(())
}
