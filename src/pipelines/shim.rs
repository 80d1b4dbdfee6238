use anyhow::{Context, Result};
use colored::*;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use wasmode::config;
use wasmode::{
    ClientOptions, Error, FileStore, MemoryStore, Store, WasmClient, STORE_KEY_SIZE_MODE,
};

/// Generates `wasm_exec.js` for the active mode, or for `mode` when given,
/// and prints it or writes it to `output`.
pub fn execute_shim_pipeline(root: &Path, mode: Option<&str>, output: Option<&Path>) -> Result<()> {
    let config = config::load_or_default(root)?;

    // A one-off mode is injected through a throwaway store so the persisted
    // mode stays untouched.
    let store: Arc<dyn Store> = match mode {
        Some(token) => {
            if config.modes.resolve(token).is_none() {
                return Err(Error::InvalidMode {
                    token: token.trim().to_uppercase(),
                    valid: config.modes.valid_tokens(),
                }
                .into());
            }
            let store = MemoryStore::default();
            store.set(STORE_KEY_SIZE_MODE, token.trim())?;
            Arc::new(store)
        }
        None => Arc::new(FileStore::in_project(root)),
    };

    let client = WasmClient::new(
        config.client_config(root),
        ClientOptions {
            store: Some(store),
            ..ClientOptions::default()
        },
    );

    let text = client.generate_shim(None, None)?;
    if text.is_empty() {
        anyhow::bail!("No Go WebAssembly project detected in {}", root.display());
    }

    match output {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
            }
            fs::write(path, &text)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!(
                "{} Runtime shim for mode {} → {}",
                "[DONE]".green().bold(),
                client.current_mode(),
                path.display()
            );
        }
        None => print!("{text}"),
    }

    Ok(())
}
