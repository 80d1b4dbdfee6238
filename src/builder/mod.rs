use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::mode::{Mode, Toolchain};

pub mod go;

pub use go::GoBuilder;

/// Errors produced while running a toolchain.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("`{command}` timed out after {}s", timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    #[error("`{command}` was cancelled")]
    Cancelled { command: String },

    #[error("main input file not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Toolchain invocation capability.
///
/// One instance exists per [`Mode`]. Implementations must be usable from
/// several threads: `cancel` is called while another thread may be blocked
/// inside a compile.
pub trait Builder: Send + Sync {
    /// Compiles to [`Builder::final_output_path`].
    fn compile_program(&self) -> Result<(), BuildError>;

    /// Compiles and returns the binary without touching the final output path.
    fn compile_to_memory(&self) -> Result<Vec<u8>, BuildError>;

    /// Aborts an in-flight compile, if any.
    fn cancel(&self);

    /// Absolute path of the compiled artifact.
    fn final_output_path(&self) -> PathBuf;

    /// Size in bytes of the last successful compile, 0 before any.
    fn binary_size(&self) -> u64;

    /// Output file names a watcher should ignore.
    fn unobserved_files(&self) -> Vec<String>;
}

/// Immutable settings for one builder.
#[derive(Debug, Clone, PartialEq)]
pub struct BuilderConfig {
    pub mode: Mode,
    pub command: String,
    pub env: Vec<(String, String)>,
    pub args: Vec<String>,
    /// Working directory for the toolchain process.
    pub root_dir: PathBuf,
    /// Entry file, relative to `root_dir`.
    pub main_input: PathBuf,
    pub output_dir: PathBuf,
    pub output_name: String,
    pub extension: String,
    pub timeout: Duration,
}

impl BuilderConfig {
    pub fn output_file_name(&self) -> String {
        format!("{}{}", self.output_name, self.extension)
    }

    pub fn final_output_path(&self) -> PathBuf {
        self.output_dir.join(self.output_file_name())
    }
}

/// Shared inputs used to derive the three [`BuilderConfig`]s.
#[derive(Debug, Clone)]
pub struct BuildLayout {
    pub root_dir: PathBuf,
    pub main_input: PathBuf,
    pub output_dir: PathBuf,
    pub output_name: String,
    pub timeout: Duration,
    pub extra_args: Vec<String>,
}

/// Base compiler flags per mode.
pub fn base_args(mode: Mode) -> Vec<String> {
    let args: &[&str] = match mode {
        Mode::Large => &["-tags", "dev"],
        Mode::Medium => &["-target", "wasm", "-opt=1"],
        Mode::Small => &["-target", "wasm", "-opt=z", "-no-debug", "-panic=trap"],
    };
    args.iter().map(|a| a.to_string()).collect()
}

impl BuildLayout {
    pub fn config_for(&self, mode: Mode) -> BuilderConfig {
        let toolchain = mode.toolchain();
        let env = match toolchain {
            Toolchain::Go => vec![
                ("GOOS".to_string(), "js".to_string()),
                ("GOARCH".to_string(), "wasm".to_string()),
            ],
            Toolchain::TinyGo => Vec::new(),
        };
        let mut args = base_args(mode);
        args.extend(self.extra_args.iter().cloned());

        BuilderConfig {
            mode,
            command: toolchain.command().to_string(),
            env,
            args,
            root_dir: self.root_dir.clone(),
            main_input: self.main_input.clone(),
            output_dir: self.output_dir.clone(),
            output_name: self.output_name.clone(),
            extension: ".wasm".to_string(),
            timeout: self.timeout,
        }
    }
}

/// Constructs a builder from its configuration.
pub type BuilderFactory = Arc<dyn Fn(BuilderConfig) -> Arc<dyn Builder> + Send + Sync>;

pub fn default_factory() -> BuilderFactory {
    Arc::new(|config| Arc::new(GoBuilder::new(config)) as Arc<dyn Builder>)
}

/// The three per-mode builders.
#[derive(Clone)]
pub struct BuilderSet {
    builders: [Arc<dyn Builder>; 3],
}

impl BuilderSet {
    pub fn new(layout: &BuildLayout, factory: &BuilderFactory) -> Self {
        Self {
            builders: Mode::ALL.map(|mode| factory(layout.config_for(mode))),
        }
    }

    pub fn get(&self, mode: Mode) -> Arc<dyn Builder> {
        self.builders[mode.index()].clone()
    }

    pub fn cancel_all(&self) {
        for builder in &self.builders {
            builder.cancel();
        }
    }
}
