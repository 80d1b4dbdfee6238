use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread;
use std::time::Duration;

use wasmode::{
    BuildError, Builder, BuilderConfig, BuilderFactory, ChangeOutcome, ClientConfig,
    ClientOptions, Error, MemoryStore, Mode, ProjectKind, StorageKind, Store, WasmClient,
    STORE_KEY_SIZE_MODE,
};

/// Records every call and produces a fixed payload tagged with its mode.
struct FakeBuilder {
    config: BuilderConfig,
    log: Arc<Mutex<Vec<String>>>,
    fail: Arc<AtomicBool>,
    delay_ms: Arc<AtomicU64>,
    size: AtomicUsize,
}

impl FakeBuilder {
    fn payload(&self) -> Vec<u8> {
        format!("\0asm fake build for {}", self.config.mode).into_bytes()
    }

    fn record(&self, call: &str) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{}", call, self.config.mode));
    }

    fn result(&self) -> Result<Vec<u8>, BuildError> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(BuildError::Failed {
                command: self.config.command.clone(),
                status: "exit status: 1".to_string(),
                stderr: "syntax error".to_string(),
            });
        }
        let payload = self.payload();
        self.size.store(payload.len(), Ordering::SeqCst);
        Ok(payload)
    }
}

impl Builder for FakeBuilder {
    fn compile_program(&self) -> Result<(), BuildError> {
        self.record("disk");
        let payload = self.result()?;
        fs::write(self.config.final_output_path(), payload).map_err(|source| BuildError::Io {
            path: self.config.final_output_path(),
            source,
        })
    }

    fn compile_to_memory(&self) -> Result<Vec<u8>, BuildError> {
        self.record("memory");
        self.result()
    }

    fn cancel(&self) {
        self.record("cancel");
    }

    fn final_output_path(&self) -> PathBuf {
        self.config.final_output_path()
    }

    fn binary_size(&self) -> u64 {
        self.size.load(Ordering::SeqCst) as u64
    }

    fn unobserved_files(&self) -> Vec<String> {
        vec![self.config.output_file_name()]
    }
}

struct Harness {
    dir: tempfile::TempDir,
    log: Arc<Mutex<Vec<String>>>,
    fail: Arc<AtomicBool>,
    delay_ms: Arc<AtomicU64>,
    changes: Arc<AtomicUsize>,
    store: Arc<MemoryStore>,
}

impl Harness {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            log: Arc::default(),
            fail: Arc::default(),
            delay_ms: Arc::default(),
            changes: Arc::default(),
            store: Arc::default(),
        }
    }

    fn with_main_input(self) -> Self {
        let web = self.dir.path().join("web");
        fs::create_dir_all(&web).unwrap();
        fs::write(web.join("client.go"), "package main\n\nfunc main() {}\n").unwrap();
        self
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn factory(&self) -> BuilderFactory {
        let log = Arc::clone(&self.log);
        let fail = Arc::clone(&self.fail);
        let delay_ms = Arc::clone(&self.delay_ms);
        Arc::new(move |config| {
            Arc::new(FakeBuilder {
                config,
                log: Arc::clone(&log),
                fail: Arc::clone(&fail),
                delay_ms: Arc::clone(&delay_ms),
                size: AtomicUsize::new(0),
            }) as Arc<dyn Builder>
        })
    }

    fn options(&self, tinygo: bool) -> ClientOptions {
        let changes = Arc::clone(&self.changes);
        ClientOptions {
            store: Some(Arc::clone(&self.store) as Arc<dyn Store>),
            on_change: Some(Arc::new(move || {
                changes.fetch_add(1, Ordering::SeqCst);
            })),
            toolchain_probe: Some(Arc::new(move |_| tinygo)),
            builder_factory: Some(self.factory()),
            ..ClientOptions::default()
        }
    }

    fn config(&self) -> ClientConfig {
        ClientConfig {
            root_dir: self.root().to_path_buf(),
            ..ClientConfig::default()
        }
    }

    fn client(&self) -> WasmClient {
        WasmClient::new(self.config(), self.options(true))
    }

    fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn compiles(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with("memory") || c.starts_with("disk"))
            .count()
    }
}

#[test]
fn starts_in_large_mode_without_persisted_state() {
    let h = Harness::new().with_main_input();
    let client = h.client();
    assert_eq!(client.current_mode(), Mode::Large);
    assert_eq!(client.current_shortcut(), "L");
    assert_eq!(client.storage_kind(), StorageKind::InMemory);
    assert_eq!(client.strategy_name(), "In-Memory");
    assert_eq!(client.project_kind(), ProjectKind::Standard);
}

#[test]
fn change_accepts_lowercase_and_persists() {
    let h = Harness::new().with_main_input();
    let client = h.client();

    let outcome = client.change("m");
    assert!(outcome.is_changed(), "{outcome}");
    assert_eq!(client.current_mode(), Mode::Medium);
    assert_eq!(
        h.store.get(STORE_KEY_SIZE_MODE).unwrap().as_deref(),
        Some("M")
    );
    assert!(client.tinygo_compiler());
    assert_eq!(h.changes.load(Ordering::SeqCst), 1);
    assert!(h.calls().contains(&"memory:Medium".to_string()));
}

#[test]
fn persisted_mode_is_restored_by_a_new_client() {
    let h = Harness::new().with_main_input();
    assert!(h.client().change("S").is_changed());

    let restored = h.client();
    assert_eq!(restored.current_mode(), Mode::Small);
    assert!(restored.tinygo_compiler());
}

#[test]
fn invalid_mode_changes_nothing() {
    let h = Harness::new().with_main_input();
    let client = h.client();

    let outcome = client.change("X");
    match &outcome {
        ChangeOutcome::InvalidMode(Error::InvalidMode { token, valid }) => {
            assert_eq!(token, "X");
            assert_eq!(valid, &vec!["L", "M", "S"]);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(outcome.mode().is_none());
    assert_eq!(client.current_mode(), Mode::Large);
    assert!(h.calls().is_empty());
    assert_eq!(h.store.get(STORE_KEY_SIZE_MODE).unwrap(), None);
}

#[test]
fn missing_tinygo_blocks_tinygo_modes_only() {
    let h = Harness::new().with_main_input();
    let client = WasmClient::new(h.config(), h.options(false));

    let outcome = client.change("S");
    assert!(matches!(outcome, ChangeOutcome::ToolchainMissing(_)));
    assert!(outcome.to_string().contains("TinyGo"));
    assert_eq!(client.current_mode(), Mode::Large);
    assert!(!client.tinygo_compiler());
    assert_eq!(h.compiles(), 0);

    assert!(client.change("L").is_changed());
}

#[test]
fn failed_rebuild_keeps_the_new_mode() {
    let h = Harness::new().with_main_input();
    let client = h.client();
    h.fail.store(true, Ordering::SeqCst);

    let outcome = client.change("M");
    match &outcome {
        ChangeOutcome::CompileFailed { mode, error } => {
            assert_eq!(*mode, Mode::Medium);
            assert!(matches!(error, Error::Compile(_)));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(client.current_mode(), Mode::Medium);
    assert_eq!(
        h.store.get(STORE_KEY_SIZE_MODE).unwrap().as_deref(),
        Some("M")
    );
    assert_eq!(h.changes.load(Ordering::SeqCst), 0);
}

#[test]
fn switching_cancels_the_previous_builder() {
    let h = Harness::new().with_main_input();
    let client = h.client();
    assert!(client.change("M").is_changed());

    let calls = h.calls();
    let cancel = calls.iter().position(|c| c == "cancel:Large").unwrap();
    let build = calls.iter().position(|c| c == "memory:Medium").unwrap();
    assert!(cancel < build);
}

#[test]
fn change_without_main_input_skips_the_build() {
    let h = Harness::new();
    let client = h.client();

    assert!(client.change("M").is_changed());
    assert_eq!(client.current_mode(), Mode::Medium);
    assert_eq!(h.compiles(), 0);
    assert_eq!(h.changes.load(Ordering::SeqCst), 0);
}

#[test]
fn existing_artifact_selects_disk_storage() {
    let h = Harness::new().with_main_input();
    let public = h.root().join("web/public");
    fs::create_dir_all(&public).unwrap();
    fs::write(public.join("client.wasm"), b"\0asm").unwrap();

    let client = h.client();
    assert_eq!(client.storage_kind(), StorageKind::OnDisk);
    assert_eq!(client.strategy_name(), "External");
}

#[test]
fn explicit_storage_overrides_detection() {
    let h = Harness::new().with_main_input();
    let options = ClientOptions {
        storage: Some(StorageKind::OnDisk),
        ..h.options(true)
    };
    let client = WasmClient::new(h.config(), options);
    assert_eq!(client.storage_kind(), StorageKind::OnDisk);
}

#[test]
fn toggling_disk_storage_recompiles() {
    let h = Harness::new().with_main_input();
    let client = h.client();

    client.set_build_on_disk(true).unwrap();
    assert_eq!(client.strategy_name(), "External");
    assert!(h.calls().contains(&"disk:Large".to_string()));
    assert!(client.main_output_absolute_path().exists());
    assert!(client.binary_size() > 0);

    client.set_build_on_disk(false).unwrap();
    assert_eq!(client.strategy_name(), "In-Memory");
    assert_eq!(h.calls().last().unwrap(), "memory:Large");
}

#[test]
fn file_events_only_rebuild_on_go_writes() {
    let h = Harness::new().with_main_input();
    let client = h.client();
    let path = h.root().join("web/client.go");
    let path = path.to_str().unwrap();

    client.on_file_event("style.css", ".css", path, "write").unwrap();
    client.on_file_event("client.go", ".go", path, "remove").unwrap();
    client.on_file_event("client.go", ".go", path, "rename").unwrap();
    assert_eq!(h.compiles(), 0);

    client.on_file_event("client.go", ".go", path, "write").unwrap();
    client.on_file_event("users.wasm.go", ".go", path, "create").unwrap();
    assert_eq!(h.compiles(), 2);
    assert_eq!(h.changes.load(Ordering::SeqCst), 2);
}

#[test]
fn file_event_with_empty_path_is_rejected() {
    let h = Harness::new().with_main_input();
    let client = h.client();
    let err = client.on_file_event("client.go", ".go", "", "write").unwrap_err();
    assert!(matches!(err, Error::EmptyPath { ref name } if name == "client.go"));
    assert_eq!(h.compiles(), 0);
}

#[test]
fn failed_file_event_rebuild_is_reported() {
    let h = Harness::new().with_main_input();
    let client = h.client();
    h.fail.store(true, Ordering::SeqCst);
    let err = client
        .on_file_event("client.go", ".go", "web/client.go", "write")
        .unwrap_err();
    assert!(err.to_string().contains("syntax error"));
}

#[test]
fn watcher_ignores_the_artifact() {
    let h = Harness::new();
    let client = h.client();
    assert_eq!(client.unobserved_files(), vec!["client.wasm".to_string()]);
    assert_eq!(client.supported_extensions(), &[".go"]);
}

#[test]
fn shim_follows_the_active_toolchain() {
    let h = Harness::new().with_main_input();
    let client = h.client();

    let go = client.generate_shim(None, None).unwrap();
    assert!(go.starts_with("// wasmode: mode=L\n"));
    assert!(go.contains("scheduleTimeoutEvent"));
    assert!(go.contains("fetch(\"client.wasm\")"));
    assert_eq!(client.generate_shim(None, None).unwrap(), go);

    assert!(client.change("S").is_changed());
    let tinygo = client.generate_shim(None, None).unwrap();
    assert_ne!(tinygo, go);
    assert!(tinygo.contains("runtime.sleepTicks"));
    assert!(!tinygo.contains("scheduleTimeoutEvent"));

    assert_eq!(client.cached_shim(Mode::Large), Some(go));
    assert_eq!(client.cached_shim(Mode::Small), Some(tinygo));
    client.clear_shim_cache();
    assert_eq!(client.cached_shim(Mode::Large), None);
}

#[test]
fn custom_header_and_footer_replace_defaults() {
    let h = Harness::new().with_main_input();
    let client = h.client();

    let text = client
        .generate_shim(Some("// app shim\r\n"), Some("run();   \n"))
        .unwrap();
    assert!(text.starts_with("// app shim\n"));
    assert!(text.ends_with("run();\n"));
    assert!(!text.contains('\r'));
    assert!(!text.contains("wasmode: mode="));
}

#[test]
fn unrecognized_project_has_no_shim() {
    let h = Harness::new();
    let client = h.client();
    assert_eq!(client.project_kind(), ProjectKind::Unrecognized);
    assert_eq!(client.generate_shim(None, None).unwrap(), "");
}

#[test]
fn shim_is_written_after_builds_only_when_enabled() {
    let h = Harness::new().with_main_input();
    let client = h.client();
    let shim = client.shim_output_path();

    client.compile().unwrap();
    assert!(!shim.exists());

    client.set_shim_output(true);
    client.compile().unwrap();
    let written = fs::read_to_string(&shim).unwrap();
    assert!(written.contains("wasmode: mode=L"));

    assert!(client.change("M").is_changed());
    let written = fs::read_to_string(&shim).unwrap();
    assert!(written.contains("wasmode: mode=M"));
}

#[test]
fn tinygo_shim_on_disk_marks_project_enhanced() {
    let h = Harness::new().with_main_input();
    let writer = h.client();
    assert!(writer.change("S").is_changed());
    writer.set_shim_output(true);
    writer.write_shim();

    // Fresh store: only the shim on disk can point at TinyGo.
    let fresh = WasmClient::new(
        h.config(),
        ClientOptions {
            store: Some(Arc::new(MemoryStore::default()) as Arc<dyn Store>),
            ..h.options(true)
        },
    );
    assert_eq!(fresh.project_kind(), ProjectKind::Enhanced);
    assert_eq!(fresh.current_mode(), Mode::Large);
    assert!(fresh.tinygo_compiler());
}

#[test]
fn custom_shortcuts_drive_validation() {
    let h = Harness::new().with_main_input();
    let client = h.client();
    client.set_build_shortcuts("dev", "", "min");

    assert!(client.change("MIN").is_changed());
    assert_eq!(client.current_mode(), Mode::Small);
    assert_eq!(client.current_shortcut(), "min");
    assert!(matches!(client.change("S"), ChangeOutcome::InvalidMode(_)));
    assert!(client.change("m").is_changed());
}

#[test]
fn reconfiguring_output_keeps_the_mode() {
    let h = Harness::new().with_main_input();
    let client = h.client();
    assert!(client.change("M").is_changed());

    client.set_output_name("app");
    assert_eq!(client.current_mode(), Mode::Medium);
    assert_eq!(client.output_relative_path(), "web/public/app.wasm");
    assert_eq!(client.unobserved_files(), vec!["app.wasm".to_string()]);
}

#[test]
fn extra_args_reach_every_builder() {
    let h = Harness::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&seen);
    let inner = h.factory();
    let factory: BuilderFactory = Arc::new(move |config: BuilderConfig| {
        record.lock().unwrap().push(config.args.clone());
        inner(config)
    });

    let options = ClientOptions {
        builder_factory: Some(factory),
        extra_args: Some(Arc::new(|| vec!["-ldflags=-X main.env=test".to_string()])),
        ..h.options(true)
    };
    let _client = WasmClient::new(h.config(), options);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert!(seen
        .iter()
        .all(|args| args.last().map(String::as_str) == Some("-ldflags=-X main.env=test")));
}

#[test]
fn dropping_the_client_cancels_every_builder() {
    let h = Harness::new();
    drop(h.client());
    let calls = h.calls();
    for mode in ["Large", "Medium", "Small"] {
        assert!(calls.contains(&format!("cancel:{mode}")), "{calls:?}");
    }
}

#[test]
fn shim_write_failure_does_not_fail_the_build() {
    let h = Harness::new().with_main_input();
    let client = h.client();
    // A plain file where the shim directory should be.
    fs::write(h.root().join("blocked"), "not a directory").unwrap();
    client.set_shim_output_dir("blocked/js");
    client.set_shim_output(true);

    client.compile().unwrap();
    assert_eq!(h.changes.load(Ordering::SeqCst), 1);
    assert!(!h.root().join("blocked/js/wasm_exec.js").exists());
}

/// What the change listener saw, read back through the client.
#[derive(Debug, Clone, PartialEq)]
struct Observed {
    mode: Mode,
    tinygo: bool,
    last_build: String,
    shim_header: String,
}

#[test]
fn concurrent_changes_rebuild_with_the_mode_they_report() {
    let h = Harness::new().with_main_input();
    let observed = Arc::new(Mutex::new(Vec::<Observed>::new()));
    let handle: Arc<OnceLock<Weak<WasmClient>>> = Arc::default();

    let listener = {
        let observed = Arc::clone(&observed);
        let handle = Arc::clone(&handle);
        let log = Arc::clone(&h.log);
        Arc::new(move || {
            let Some(client) = handle.get().and_then(Weak::upgrade) else {
                return;
            };
            let last_build = log
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|call| call.starts_with("memory:"))
                .cloned()
                .unwrap_or_default();
            let shim = fs::read_to_string(client.shim_output_path()).unwrap_or_default();
            observed.lock().unwrap().push(Observed {
                mode: client.current_mode(),
                tinygo: client.tinygo_compiler(),
                last_build,
                shim_header: shim.lines().next().unwrap_or_default().to_string(),
            });
        })
    };
    let client = Arc::new(WasmClient::new(
        h.config(),
        ClientOptions {
            on_change: Some(listener),
            storage: Some(StorageKind::InMemory),
            ..h.options(true)
        },
    ));
    handle.set(Arc::downgrade(&client)).unwrap();
    client.set_shim_output(true);
    assert!(client.change("M").is_changed());

    h.delay_ms.store(150, Ordering::SeqCst);
    let file_event = {
        let client = Arc::clone(&client);
        thread::spawn(move || {
            client
                .on_file_event("client.go", ".go", "web/client.go", "write")
                .unwrap();
        })
    };
    thread::sleep(Duration::from_millis(40));
    let switches: Vec<_> = ["L", "S"]
        .into_iter()
        .map(|token| {
            let client = Arc::clone(&client);
            thread::spawn(move || client.change(token))
        })
        .collect();

    file_event.join().unwrap();
    for switch in switches {
        assert!(switch.join().unwrap().is_changed());
    }

    let observed = observed.lock().unwrap().clone();
    assert_eq!(observed.len(), 4, "{observed:?}");
    for seen in &observed {
        let shortcut = match seen.mode {
            Mode::Large => "L",
            Mode::Medium => "M",
            Mode::Small => "S",
        };
        assert_eq!(seen.last_build, format!("memory:{}", seen.mode), "{observed:?}");
        assert_eq!(seen.shim_header, format!("// wasmode: mode={shortcut}"), "{observed:?}");
        assert_eq!(seen.tinygo, seen.mode != Mode::Large, "{observed:?}");
    }

    let last = observed.last().unwrap();
    assert_eq!(client.current_mode(), last.mode);
    let shim = fs::read_to_string(client.shim_output_path()).unwrap();
    assert!(shim.starts_with(&last.shim_header));
}
