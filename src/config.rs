use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::ClientConfig;
use crate::mode::ModeShortcuts;

pub const CONFIG_FILE: &str = "wasmode.toml";

/// Project configuration, read from `wasmode.toml` in the project root.
///
/// Every section and field is optional.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ProjectConfig {
    pub build: BuildConfig,
    pub modes: ModeShortcuts,
    pub serve: ServeConfig,
}

/// `[build]`
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct BuildConfig {
    /// Directory holding the Go sources, relative to the root.
    pub source_dir: String,

    /// Directory the `.wasm` artifact is written to.
    pub output_dir: String,

    pub main_input_file: String,

    /// Artifact name without extension.
    pub output_name: String,

    /// Per-compile timeout in seconds, shared by all modes.
    pub timeout_secs: u64,

    /// Appended to every mode's compiler arguments.
    pub extra_args: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            source_dir: "web".to_string(),
            output_dir: "web/public".to_string(),
            main_input_file: "client.go".to_string(),
            output_name: "client".to_string(),
            timeout_secs: 60,
            extra_args: Vec::new(),
        }
    }
}

/// `[serve]`
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ServeConfig {
    pub url_prefix: String,

    /// Force the storage strategy. When unset, an existing artifact selects
    /// on-disk storage.
    pub on_disk: Option<bool>,

    pub shim_output_dir: String,

    /// Write `wasm_exec.js` after every build.
    pub shim_output: bool,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            url_prefix: String::new(),
            on_disk: None,
            shim_output_dir: "web/public".to_string(),
            shim_output: false,
        }
    }
}

impl ProjectConfig {
    /// Client settings for a project rooted at `root`.
    pub fn client_config(&self, root: &Path) -> ClientConfig {
        ClientConfig {
            root_dir: root.to_path_buf(),
            source_dir: PathBuf::from(&self.build.source_dir),
            output_dir: PathBuf::from(&self.build.output_dir),
            main_input_file: self.build.main_input_file.clone(),
            output_name: self.build.output_name.clone(),
            url_prefix: self.serve.url_prefix.clone(),
            shortcuts: self.modes.clone(),
            shim_output_dir: PathBuf::from(&self.serve.shim_output_dir),
            shim_output: self.serve.shim_output,
            timeout: Duration::from_secs(self.build.timeout_secs),
            extra_args: self.build.extra_args.clone(),
        }
    }
}

/// Loads `wasmode.toml` from `root`.
///
/// # Errors
/// - The file does not exist.
/// - The file cannot be read or is not valid TOML.
pub fn load(root: &Path) -> Result<ProjectConfig> {
    let config_path = root.join(CONFIG_FILE);

    if !config_path.exists() {
        anyhow::bail!(
            "Configuration file '{}' not found in {}",
            CONFIG_FILE,
            root.display()
        );
    }

    let content = fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read {}", config_path.display()))?;

    let config: ProjectConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", config_path.display()))?;

    Ok(config)
}

/// Like [`load`], but a missing file yields the defaults.
pub fn load_or_default(root: &Path) -> Result<ProjectConfig> {
    if root.join(CONFIG_FILE).exists() {
        load(root)
    } else {
        Ok(ProjectConfig::default())
    }
}
