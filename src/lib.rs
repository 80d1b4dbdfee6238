//! Go/TinyGo WebAssembly build orchestrator.
//!
//! A [`WasmClient`] compiles one Go entry point in one of three size modes
//! (Large with `go`, Medium and Small with `tinygo`), keeps the matching
//! `wasm_exec.js` runtime shim in sync and serves the artifact over HTTP.

pub mod builder;
pub mod client;
pub mod config;
pub mod detect;
pub mod error;
pub mod mode;
pub mod shim;
pub mod storage;
pub mod store;
pub mod toolchain;

pub use builder::{BuildError, Builder, BuilderConfig, BuilderFactory, GoBuilder};
pub use client::{ChangeListener, ChangeOutcome, ClientConfig, ClientOptions, ExtraArgs, WasmClient};
pub use detect::ProjectKind;
pub use error::{Error, Result};
pub use mode::{Mode, ModeShortcuts, Toolchain, STORE_KEY_SIZE_MODE};
pub use storage::StorageKind;
pub use store::{FileStore, MemoryStore, Store, StoreError};
