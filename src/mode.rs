use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::store::Store;

/// Key under which the active mode shortcut is persisted.
pub const STORE_KEY_SIZE_MODE: &str = "wasmsize_mode";

/// Compilation tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Standard Go toolchain, fast compiles, biggest binary.
    Large,
    /// TinyGo with debug information kept.
    Medium,
    /// TinyGo fully optimized for size.
    Small,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Large, Mode::Medium, Mode::Small];

    pub fn label(self) -> &'static str {
        match self {
            Mode::Large => "Large",
            Mode::Medium => "Medium",
            Mode::Small => "Small",
        }
    }

    pub fn toolchain(self) -> Toolchain {
        match self {
            Mode::Large => Toolchain::Go,
            Mode::Medium | Mode::Small => Toolchain::TinyGo,
        }
    }

    /// Medium and Small both compile with TinyGo.
    pub fn requires_enhanced_toolchain(self) -> bool {
        self.toolchain() == Toolchain::TinyGo
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Mode::Large => 0,
            Mode::Medium => 1,
            Mode::Small => 2,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Compiler family behind a [`Mode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Toolchain {
    Go,
    TinyGo,
}

impl Toolchain {
    pub fn command(self) -> &'static str {
        match self {
            Toolchain::Go => "go",
            Toolchain::TinyGo => "tinygo",
        }
    }
}

impl fmt::Display for Toolchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Toolchain::Go => f.write_str("Go"),
            Toolchain::TinyGo => f.write_str("TinyGo"),
        }
    }
}

/// User-facing tokens for the three modes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ModeShortcuts {
    pub large: String,
    pub medium: String,
    pub small: String,
}

impl Default for ModeShortcuts {
    fn default() -> Self {
        Self {
            large: "L".to_string(),
            medium: "M".to_string(),
            small: "S".to_string(),
        }
    }
}

impl ModeShortcuts {
    pub fn shortcut(&self, mode: Mode) -> &str {
        match mode {
            Mode::Large => &self.large,
            Mode::Medium => &self.medium,
            Mode::Small => &self.small,
        }
    }

    /// Matches a token against the shortcuts, ignoring surrounding
    /// whitespace and case.
    pub fn resolve(&self, token: &str) -> Option<Mode> {
        let token = token.trim().to_uppercase();
        if token.is_empty() {
            return None;
        }
        Mode::ALL
            .into_iter()
            .find(|mode| self.shortcut(*mode).trim().to_uppercase() == token)
    }

    pub fn valid_tokens(&self) -> Vec<String> {
        Mode::ALL
            .iter()
            .map(|mode| self.shortcut(*mode).to_string())
            .collect()
    }

    /// Replaces the non-empty shortcuts, keeping the others.
    pub fn update(&mut self, large: &str, medium: &str, small: &str) {
        if !large.is_empty() {
            self.large = large.to_string();
        }
        if !medium.is_empty() {
            self.medium = medium.to_string();
        }
        if !small.is_empty() {
            self.small = small.to_string();
        }
    }
}

/// Validates mode tokens and persists the chosen mode.
///
/// The active mode itself lives next to the active builder inside
/// [`crate::WasmClient`] so both are swapped together.
#[derive(Clone)]
pub struct ModeRegistry {
    shortcuts: ModeShortcuts,
    store: Option<Arc<dyn Store>>,
}

impl ModeRegistry {
    pub fn new(shortcuts: ModeShortcuts, store: Option<Arc<dyn Store>>) -> Self {
        Self { shortcuts, store }
    }

    pub fn shortcuts(&self) -> &ModeShortcuts {
        &self.shortcuts
    }

    pub fn shortcuts_mut(&mut self) -> &mut ModeShortcuts {
        &mut self.shortcuts
    }

    pub fn validate(&self, token: &str) -> Result<Mode> {
        self.shortcuts
            .resolve(token)
            .ok_or_else(|| Error::InvalidMode {
                token: token.trim().to_uppercase(),
                valid: self.shortcuts.valid_tokens(),
            })
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    pub fn persist(&self, mode: Mode) -> Result<()> {
        if let Some(store) = &self.store {
            store.set(STORE_KEY_SIZE_MODE, self.shortcuts.shortcut(mode))?;
            debug!(mode = %mode, "persisted mode");
        }
        Ok(())
    }

    /// Reads the persisted mode once. Unknown or unreadable values are
    /// ignored so a corrupted store never blocks startup.
    pub fn restore(&self) -> Option<Mode> {
        let store = self.store.as_ref()?;
        match store.get(STORE_KEY_SIZE_MODE) {
            Ok(Some(value)) if !value.is_empty() => {
                let mode = self.shortcuts.resolve(&value);
                if mode.is_none() {
                    warn!(value = %value, "ignoring unknown persisted mode");
                }
                mode
            }
            Ok(_) => None,
            Err(err) => {
                warn!(error = %err, "failed to read persisted mode");
                None
            }
        }
    }
}
