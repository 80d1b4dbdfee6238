use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::time::Duration;

use axum::extract::Request;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tracing::{debug, info, warn};

use crate::builder::{default_factory, BuildLayout, Builder, BuilderFactory, BuilderSet};
use crate::detect::{detect, DetectInput, ProjectKind};
use crate::error::{Error, Result};
use crate::mode::{Mode, ModeRegistry, ModeShortcuts, Toolchain};
use crate::shim::{self, ShimCache, ShimRequest};
use crate::storage::{self, StorageKind, StorageStrategy};
use crate::store::Store;
use crate::toolchain::{self, ToolchainProbe};

/// Called after every successful compile triggered by a mode change or a
/// file event.
pub type ChangeListener = Arc<dyn Fn() + Send + Sync>;

/// Extra compiler arguments appended to every mode's base arguments.
/// Evaluated whenever the builders are (re)built.
pub type ExtraArgs = Arc<dyn Fn() -> Vec<String> + Send + Sync>;

/// Plain settings for [`WasmClient`]. Directories other than `root_dir`
/// are relative to `root_dir`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub root_dir: PathBuf,
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
    pub main_input_file: String,
    pub output_name: String,
    /// URL folder the artifact is served under, e.g. `assets`.
    pub url_prefix: String,
    pub shortcuts: ModeShortcuts,
    pub shim_output_dir: PathBuf,
    /// Write `wasm_exec.js` to `shim_output_dir` after each build.
    pub shim_output: bool,
    pub timeout: Duration,
    pub extra_args: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            source_dir: PathBuf::from("web"),
            output_dir: PathBuf::from("web/public"),
            main_input_file: "client.go".to_string(),
            output_name: "client".to_string(),
            url_prefix: String::new(),
            shortcuts: ModeShortcuts::default(),
            shim_output_dir: PathBuf::from("web/public"),
            shim_output: false,
            timeout: Duration::from_secs(60),
            extra_args: Vec::new(),
        }
    }
}

/// Collaborators injected into [`WasmClient`].
#[derive(Default, Clone)]
pub struct ClientOptions {
    pub store: Option<Arc<dyn Store>>,
    pub on_change: Option<ChangeListener>,
    pub extra_args: Option<ExtraArgs>,
    /// Defaults to running `<toolchain> version`.
    pub toolchain_probe: Option<ToolchainProbe>,
    /// Defaults to [`crate::builder::GoBuilder`].
    pub builder_factory: Option<BuilderFactory>,
    /// Initial storage. Without it, an existing artifact selects `OnDisk`.
    pub storage: Option<StorageKind>,
}

/// Result of a [`WasmClient::change`] call.
#[derive(Debug)]
pub enum ChangeOutcome {
    /// Token matched no shortcut. Nothing changed.
    InvalidMode(Error),
    /// The mode needs TinyGo and it is not installed. Nothing changed.
    ToolchainMissing(Error),
    /// The mode was switched and persisted but the rebuild failed.
    CompileFailed { mode: Mode, error: Error },
    Changed { mode: Mode },
}

impl ChangeOutcome {
    pub fn is_changed(&self) -> bool {
        matches!(self, ChangeOutcome::Changed { .. })
    }

    /// Active mode after the call, when the call switched it.
    pub fn mode(&self) -> Option<Mode> {
        match self {
            ChangeOutcome::CompileFailed { mode, .. } | ChangeOutcome::Changed { mode } => {
                Some(*mode)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ChangeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeOutcome::InvalidMode(err) | ChangeOutcome::ToolchainMissing(err) => {
                write!(f, "{err}")
            }
            ChangeOutcome::CompileFailed { mode, error } => {
                write!(f, "switched to mode {mode}, but {error}")
            }
            ChangeOutcome::Changed { mode } => write!(f, "changed to mode {mode}"),
        }
    }
}

struct ActiveBuild {
    mode: Mode,
    builder: Arc<dyn Builder>,
}

/// Mode-switching Go/TinyGo WebAssembly build orchestrator.
///
/// Owns one builder per [`Mode`], the active mode/builder pair, the storage
/// strategy and the runtime shim caches. All methods take `&self`; wrap the
/// client in an [`Arc`] to share it with the HTTP router and a file watcher.
pub struct WasmClient {
    settings: RwLock<ClientConfig>,
    registry: RwLock<ModeRegistry>,
    builders: RwLock<BuilderSet>,
    active: Mutex<ActiveBuild>,
    strategy: RwLock<Arc<dyn StorageStrategy>>,
    shims: Mutex<ShimCache>,
    project: Mutex<ProjectKind>,
    tinygo_installed: OnceLock<bool>,
    tinygo_requested: AtomicBool,
    /// Serializes compiles and shim writes.
    compile_lock: Mutex<()>,
    on_change: Option<ChangeListener>,
    extra_args: Option<ExtraArgs>,
    probe: ToolchainProbe,
    factory: BuilderFactory,
}

impl WasmClient {
    /// Builds the three builders, restores the persisted mode, picks the
    /// storage strategy and runs project detection.
    ///
    /// Unless [`ClientOptions::storage`] says otherwise, storage is `OnDisk`
    /// when the artifact already exists and `InMemory` otherwise.
    pub fn new(config: ClientConfig, options: ClientOptions) -> Self {
        let factory = options.builder_factory.unwrap_or_else(default_factory);
        let probe = options.toolchain_probe.unwrap_or_else(toolchain::system_probe);
        let registry = ModeRegistry::new(config.shortcuts.clone(), options.store);

        let builders = BuilderSet::new(
            &build_layout(&config, options.extra_args.as_ref()),
            &factory,
        );
        let mode = registry.restore().unwrap_or(Mode::Large);
        let active = ActiveBuild {
            mode,
            builder: builders.get(mode),
        };

        let kind = options.storage.unwrap_or_else(|| {
            if artifact_path(&config).exists() {
                StorageKind::OnDisk
            } else {
                StorageKind::InMemory
            }
        });
        let strategy = storage::strategy_for(kind);
        info!(mode = %mode, strategy = strategy.name(), "wasm client ready");

        let client = Self {
            settings: RwLock::new(config),
            registry: RwLock::new(registry),
            builders: RwLock::new(builders),
            active: Mutex::new(active),
            strategy: RwLock::new(strategy),
            shims: Mutex::new(ShimCache::default()),
            project: Mutex::new(ProjectKind::Undetected),
            tinygo_installed: OnceLock::new(),
            tinygo_requested: AtomicBool::new(mode.requires_enhanced_toolchain()),
            compile_lock: Mutex::new(()),
            on_change: options.on_change,
            extra_args: options.extra_args,
            probe,
            factory,
        };
        client.detect_project();
        client
    }

    // ---- mode ----

    /// Switches to the mode named by `token` and rebuilds.
    ///
    /// Invalid tokens and a missing TinyGo leave the client untouched. A
    /// failed rebuild does not roll the mode back.
    pub fn change(&self, token: &str) -> ChangeOutcome {
        let mode = match read(&self.registry).validate(token) {
            Ok(mode) => mode,
            Err(err) => {
                warn!(token, "rejected mode change");
                return ChangeOutcome::InvalidMode(err);
            }
        };

        if mode.requires_enhanced_toolchain() && !self.tinygo_installed() {
            return ChangeOutcome::ToolchainMissing(Error::ToolchainMissing {
                toolchain: Toolchain::TinyGo.to_string(),
                reason: toolchain::install_hint(Toolchain::TinyGo).to_string(),
            });
        }

        // Stop the in-flight build so the switch does not queue behind it.
        self.active_builder().cancel();

        // Mode, builder and rebuild change together under the compile lock.
        let _guard = lock(&self.compile_lock);
        self.tinygo_requested
            .store(mode.requires_enhanced_toolchain(), Ordering::SeqCst);
        let builder = self.switch_builder(mode);

        if let Err(err) = read(&self.registry).persist(mode) {
            warn!(error = %err, "failed to persist mode");
        }

        let main_input = self.main_input_absolute_path();
        if !main_input.exists() {
            debug!(path = %main_input.display(), "main input missing, skipping rebuild");
            return ChangeOutcome::Changed { mode };
        }

        let strategy = self.strategy();
        if let Err(err) = strategy.compile(builder.as_ref()) {
            warn!(mode = %mode, error = %err, "rebuild after mode change failed");
            return ChangeOutcome::CompileFailed {
                mode,
                error: err.into(),
            };
        }
        info!(
            mode = %mode,
            strategy = strategy.name(),
            size = builder.binary_size(),
            "rebuilt after mode change"
        );

        self.after_compile();
        ChangeOutcome::Changed { mode }
    }

    pub fn current_mode(&self) -> Mode {
        lock(&self.active).mode
    }

    /// Shortcut of the active mode.
    pub fn current_shortcut(&self) -> String {
        let mode = self.current_mode();
        read(&self.registry).shortcuts().shortcut(mode).to_string()
    }

    /// `(shortcut, label, toolchain)` for every mode.
    pub fn shortcuts(&self) -> Vec<(String, &'static str, Toolchain)> {
        let registry = read(&self.registry);
        Mode::ALL
            .iter()
            .map(|mode| {
                (
                    registry.shortcuts().shortcut(*mode).to_string(),
                    mode.label(),
                    mode.toolchain(),
                )
            })
            .collect()
    }

    /// Replaces the non-empty shortcuts. The active mode is unaffected.
    pub fn set_build_shortcuts(&self, large: &str, medium: &str, small: &str) {
        let mut registry = write(&self.registry);
        registry.shortcuts_mut().update(large, medium, small);
        write(&self.settings).shortcuts = registry.shortcuts().clone();
    }

    /// Whether TinyGo is installed. Probed once, on first use.
    pub fn tinygo_installed(&self) -> bool {
        *self.tinygo_installed.get_or_init(|| {
            let installed = (self.probe)(Toolchain::TinyGo);
            info!(installed, "probed tinygo toolchain");
            installed
        })
    }

    /// True when TinyGo is both wanted and available.
    pub fn tinygo_compiler(&self) -> bool {
        self.tinygo_requested.load(Ordering::SeqCst) && self.tinygo_installed()
    }

    fn switch_builder(&self, mode: Mode) -> Arc<dyn Builder> {
        let next = read(&self.builders).get(mode);
        let mut active = lock(&self.active);
        active.builder.cancel();
        active.mode = mode;
        active.builder = Arc::clone(&next);
        debug!(mode = %mode, "switched active builder");
        next
    }

    fn active_builder(&self) -> Arc<dyn Builder> {
        Arc::clone(&lock(&self.active).builder)
    }

    // ---- compilation ----

    /// Compiles through the active strategy, then refreshes the shim and
    /// notifies the listener.
    pub fn compile(&self) -> Result<()> {
        let _guard = lock(&self.compile_lock);
        let builder = self.active_builder();
        let strategy = self.strategy();

        strategy.compile(builder.as_ref())?;
        info!(
            mode = %self.current_mode(),
            strategy = strategy.name(),
            input = %self.main_input_relative_path(),
            size = builder.binary_size(),
            "wasm compiled"
        );

        self.after_compile();
        Ok(())
    }

    /// Entry point for file watchers.
    ///
    /// Only `write`/`create` events on `.go` files trigger a rebuild.
    ///
    /// # Errors
    /// - `path` is empty.
    /// - The rebuild fails.
    pub fn on_file_event(&self, name: &str, extension: &str, path: &str, event: &str) -> Result<()> {
        if path.is_empty() {
            return Err(Error::EmptyPath {
                name: name.to_string(),
            });
        }
        debug!(extension, event, path, "file event");

        if !self.supported_extensions().contains(&extension) {
            return Ok(());
        }
        if event != "write" && event != "create" {
            return Ok(());
        }

        info!(path, "compiling wasm after change");
        self.compile()
    }

    pub fn supported_extensions(&self) -> &'static [&'static str] {
        &[".go"]
    }

    /// True for the main input file and any `*.wasm.go` module.
    pub fn should_compile(&self, file_name: &str) -> bool {
        file_name == read(&self.settings).main_input_file || file_name.ends_with(".wasm.go")
    }

    /// Output files a watcher must ignore.
    pub fn unobserved_files(&self) -> Vec<String> {
        self.active_builder().unobserved_files()
    }

    /// Size of the last build of the active builder.
    pub fn binary_size(&self) -> u64 {
        self.active_builder().binary_size()
    }

    fn after_compile(&self) {
        self.write_shim_locked();
        if let Some(listener) = &self.on_change {
            listener();
        }
    }

    // ---- storage ----

    fn strategy(&self) -> Arc<dyn StorageStrategy> {
        Arc::clone(&read(&self.strategy))
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy().name()
    }

    pub fn storage_kind(&self) -> StorageKind {
        self.strategy().kind()
    }

    /// Switches between serving from memory and from the output file, then
    /// compiles with the new strategy before returning.
    pub fn set_build_on_disk(&self, on_disk: bool) -> Result<()> {
        let wanted = if on_disk {
            StorageKind::OnDisk
        } else {
            StorageKind::InMemory
        };
        {
            let mut strategy = write(&self.strategy);
            if strategy.kind() != wanted {
                *strategy = storage::strategy_for(wanted);
                info!(strategy = strategy.name(), "switched storage");
            }
        }
        self.compile()
    }

    /// Router serving the artifact at [`WasmClient::wasm_route_path`].
    ///
    /// The route always reads the strategy that is active at request time.
    pub fn router(self: &Arc<Self>) -> Router {
        let route = self.wasm_route_path();
        let client = Arc::clone(self);
        info!(route = %route, "registered wasm route");
        Router::new().route(
            &route,
            get(move |request: Request| {
                let client = Arc::clone(&client);
                async move { client.serve_wasm(request).await }
            }),
        )
    }

    /// Merges the wasm route into an existing router.
    pub fn register_routes(self: &Arc<Self>, router: Router) -> Router {
        router.merge(self.router())
    }

    async fn serve_wasm(&self, request: Request) -> Response {
        let snapshot = self.strategy().snapshot();
        let file = self.main_output_absolute_path();
        storage::serve(snapshot, &file, request).await
    }

    // ---- runtime shim ----

    /// Generates `wasm_exec.js` for the active mode and caches it.
    ///
    /// `header` defaults to a comment stamping the mode, `footer` to a
    /// bootstrap that fetches and runs the artifact. Returns an empty string
    /// for unrecognized projects.
    pub fn generate_shim(&self, header: Option<&str>, footer: Option<&str>) -> Result<String> {
        let project = *lock(&self.project);
        match project {
            ProjectKind::Undetected => return Err(Error::Uninitialized("project detection")),
            ProjectKind::Unrecognized => return Ok(String::new()),
            ProjectKind::Standard | ProjectKind::Enhanced => {}
        }

        let mode = self.current_mode();
        let shortcut = read(&self.registry).shortcuts().shortcut(mode).to_string();
        let wasm_file = self
            .active_builder()
            .final_output_path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let text = shim::compose(&ShimRequest {
            mode,
            shortcut: &shortcut,
            wasm_file: &wasm_file,
            header,
            footer,
        });
        lock(&self.shims).store(mode, text.clone());
        Ok(text)
    }

    pub fn cached_shim(&self, mode: Mode) -> Option<String> {
        lock(&self.shims).get(mode).map(str::to_string)
    }

    pub fn clear_shim_cache(&self) {
        lock(&self.shims).clear();
    }

    /// Writes the shim when output is enabled. Failures are logged only.
    pub fn write_shim(&self) {
        let _guard = lock(&self.compile_lock);
        self.write_shim_locked();
    }

    fn write_shim_locked(&self) {
        if !read(&self.settings).shim_output {
            return;
        }
        match self.store_shim() {
            Ok(Some(path)) => debug!(path = %path.display(), "wrote wasm_exec.js"),
            Ok(None) => {}
            Err(err) => warn!(error = %err, "failed to write wasm_exec.js"),
        }
    }

    /// Writes the generated shim, `None` when there is nothing to write.
    fn store_shim(&self) -> Result<Option<PathBuf>> {
        let text = self.generate_shim(None, None)?;
        if text.is_empty() {
            return Ok(None);
        }
        let path = self.shim_output_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|source| Error::io(dir, source))?;
        }
        fs::write(&path, text).map_err(|source| Error::io(&path, source))?;
        Ok(Some(path))
    }

    pub fn set_shim_output(&self, enable: bool) {
        write(&self.settings).shim_output = enable;
    }

    /// Points the shim at a new directory, re-detects, and writes the shim
    /// there when output is enabled.
    pub fn set_shim_output_dir(&self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        let empty = dir.as_os_str().is_empty();
        write(&self.settings).shim_output_dir = dir;
        self.detect_project();
        if !empty && self.project_kind().is_wasm_project() {
            self.write_shim();
        }
    }

    // ---- detection ----

    pub fn project_kind(&self) -> ProjectKind {
        *lock(&self.project)
    }

    fn detect_project(&self) {
        let kind = {
            let settings = read(&self.settings);
            detect(&DetectInput {
                root_dir: &settings.root_dir,
                source_dir: &settings.source_dir,
                main_input_file: &settings.main_input_file,
                shim_path: Some(shim_path(&settings)),
            })
        };
        if kind == ProjectKind::Enhanced {
            self.tinygo_requested.store(true, Ordering::SeqCst);
        }
        *lock(&self.project) = kind;
    }

    // ---- reconfiguration ----

    pub fn set_app_root_dir(&self, root: impl Into<PathBuf>) {
        write(&self.settings).root_dir = root.into();
        self.reconfigure();
    }

    pub fn set_main_input_file(&self, file: impl Into<String>) {
        write(&self.settings).main_input_file = file.into();
        self.reconfigure();
    }

    pub fn set_output_name(&self, name: impl Into<String>) {
        write(&self.settings).output_name = name.into();
        self.reconfigure();
    }

    /// Rebuilds the builder set keeping the active mode, then re-detects.
    fn reconfigure(&self) {
        let layout = build_layout(&read(&self.settings), self.extra_args.as_ref());
        let builders = BuilderSet::new(&layout, &self.factory);
        {
            let mut active = lock(&self.active);
            active.builder = builders.get(active.mode);
        }
        let previous = std::mem::replace(&mut *write(&self.builders), builders);
        previous.cancel_all();
        self.detect_project();
    }

    // ---- paths ----

    /// Main input relative to the root, e.g. `web/client.go`.
    pub fn main_input_relative_path(&self) -> String {
        let settings = read(&self.settings);
        forward_slashes(&settings.source_dir.join(&settings.main_input_file))
    }

    pub fn main_input_absolute_path(&self) -> PathBuf {
        let settings = read(&self.settings);
        settings
            .root_dir
            .join(&settings.source_dir)
            .join(&settings.main_input_file)
    }

    pub fn main_output_absolute_path(&self) -> PathBuf {
        artifact_path(&read(&self.settings))
    }

    /// Artifact path relative to the root, always with `/` separators.
    pub fn output_relative_path(&self) -> String {
        let full = self.active_builder().final_output_path();
        let settings = read(&self.settings);
        match full.strip_prefix(&settings.root_dir) {
            Ok(rel) => forward_slashes(rel),
            Err(_) => forward_slashes(
                &settings
                    .output_dir
                    .join(format!("{}.wasm", settings.output_name)),
            ),
        }
    }

    /// `/{prefix}/{output_name}.wasm`, or `/{output_name}.wasm` without a prefix.
    pub fn wasm_route_path(&self) -> String {
        let settings = read(&self.settings);
        let prefix = settings.url_prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("/{}.wasm", settings.output_name)
        } else {
            format!("/{prefix}/{}.wasm", settings.output_name)
        }
    }

    pub fn shim_output_path(&self) -> PathBuf {
        shim_path(&read(&self.settings))
    }
}

impl Drop for WasmClient {
    fn drop(&mut self) {
        read(&self.builders).cancel_all();
    }
}

fn build_layout(config: &ClientConfig, extra: Option<&ExtraArgs>) -> BuildLayout {
    let mut extra_args = config.extra_args.clone();
    if let Some(extra) = extra {
        extra_args.extend(extra());
    }
    BuildLayout {
        root_dir: config.root_dir.clone(),
        main_input: config.source_dir.join(&config.main_input_file),
        output_dir: config.root_dir.join(&config.output_dir),
        output_name: config.output_name.clone(),
        timeout: config.timeout,
        extra_args,
    }
}

fn artifact_path(config: &ClientConfig) -> PathBuf {
    config
        .root_dir
        .join(&config.output_dir)
        .join(format!("{}.wasm", config.output_name))
}

fn shim_path(config: &ClientConfig) -> PathBuf {
    config
        .root_dir
        .join(&config.shim_output_dir)
        .join(shim::SHIM_FILE_NAME)
}

fn forward_slashes(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
