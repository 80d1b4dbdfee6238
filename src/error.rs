use std::path::PathBuf;

use crate::builder::BuildError;
use crate::store::StoreError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by [`crate::WasmClient`].
///
/// The variants follow the failure classes callers need to tell apart:
/// bad input, missing toolchain, compilation failure and plumbing errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid mode {token:?}, valid modes are [{}]", valid.join(", "))]
    InvalidMode { token: String, valid: Vec<String> },

    #[error("{toolchain} toolchain is not installed: {reason}")]
    ToolchainMissing { toolchain: String, reason: String },

    #[error("compilation failed: {0}")]
    Compile(#[from] BuildError),

    #[error("file event path is empty (file: {name:?})")]
    EmptyPath { name: String },

    #[error("{0} not initialized")]
    Uninitialized(&'static str),

    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
