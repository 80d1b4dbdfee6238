use anyhow::{Context, Result};
use colored::*;
use notify::{recommended_watcher, Event, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use wasmode::{StorageKind, WasmClient};

use super::common::{
    describe_mode, ensure_switched, format_size, open_workspace, print_outcome,
};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Editors emit several events per save; events closer than this are
/// folded into one rebuild.
const DEBOUNCE: Duration = Duration::from_millis(50);

/// Serve the client with live rebuilds
///
/// Flow:
/// 1. Open the project and run the initial build
/// 2. Serve the wasm route
/// 3. Watch the source directory and feed file events to the client
/// 4. Treat stdin lines as mode changes until Ctrl+C
pub fn execute_dev_pipeline(
    root: &Path,
    mode: Option<&str>,
    host: &str,
    port: u16,
    on_disk: bool,
) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let result = runtime.block_on(run(root, mode, host, port, on_disk));

    // The stdin reader parks a blocking thread; do not wait for it.
    runtime.shutdown_background();
    result
}

async fn run(root: &Path, mode: Option<&str>, host: &str, port: u16, on_disk: bool) -> Result<()> {
    // --- 1. Open project and build ---
    let workspace = open_workspace(root, on_disk.then_some(StorageKind::OnDisk))?;
    let client = Arc::clone(&workspace.client);
    initial_build(&client, mode).await?;

    // --- 2. Serve ---
    let app = client.router().layer(TraceLayer::new_for_http());
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    println!(
        "{} Serving http://{}{} [{}]",
        "[WASM]".green().bold(),
        addr,
        client.wasm_route_path(),
        client.strategy_name()
    );
    let tokens: Vec<String> = client.shortcuts().into_iter().map(|(s, _, _)| s).collect();
    println!(
        "{} Type a mode ({}) and press Enter to switch. Ctrl+C to stop.",
        "[INFO]".cyan(),
        tokens.join("/")
    );

    // --- 3. Watch sources ---
    let running = Arc::new(AtomicBool::new(true));
    let watch_dir = workspace.root.join(&workspace.config.build.source_dir);
    let watcher = spawn_watcher(Arc::clone(&client), watch_dir, Arc::clone(&running));

    // --- 4. Mode changes from stdin ---
    let stdin_task = tokio::spawn(read_mode_changes(Arc::clone(&client)));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    running.store(false, Ordering::SeqCst);
    stdin_task.abort();
    let _ = watcher.await;

    println!("{} Stopped", "[DONE]".green().bold());
    Ok(())
}

async fn initial_build(client: &Arc<WasmClient>, mode: Option<&str>) -> Result<()> {
    let client = Arc::clone(client);
    let mode = mode.map(str::to_string);

    let outcome = tokio::task::spawn_blocking(move || match mode {
        Some(token) => ensure_switched(client.change(&token)).map(|o| {
            print_outcome(&o);
        }),
        None => {
            if !client.main_input_absolute_path().exists() {
                println!(
                    "{} Main input not found yet: {}",
                    "[WARN]".yellow().bold(),
                    client.main_input_relative_path()
                );
                return Ok(());
            }
            match client.compile() {
                Ok(()) => println!(
                    "{} Built {} in mode {} ({})",
                    "[DONE]".green().bold(),
                    client.main_input_relative_path(),
                    describe_mode(&client),
                    format_size(client.binary_size())
                ),
                Err(e) => println!("{} {}", "[WARN]".yellow().bold(), e),
            }
            Ok(())
        }
    })
    .await
    .context("Initial build task panicked")?;

    outcome
}

fn spawn_watcher(
    client: Arc<WasmClient>,
    dir: PathBuf,
    running: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let (watch_tx, watch_rx) = std::sync::mpsc::channel();

        let mut watcher = match recommended_watcher(watch_tx) {
            Ok(w) => w,
            Err(e) => {
                error!("Failed to create file watcher: {:?}", e);
                return;
            }
        };

        if let Err(e) = watcher.watch(&dir, RecursiveMode::Recursive) {
            error!("Failed to watch {}: {:?}", dir.display(), e);
            return;
        }

        info!("Watching sources for changes: {}", dir.display());

        while running.load(Ordering::SeqCst) {
            match watch_rx.recv_timeout(POLL_INTERVAL) {
                Ok(Ok(first)) => {
                    let mut batch = vec![first];
                    while let Ok(next) = watch_rx.recv_timeout(DEBOUNCE) {
                        match next {
                            Ok(event) => batch.push(event),
                            Err(e) => error!("File watch error: {:?}", e),
                        }
                    }
                    handle_batch(&client, &batch);
                }
                Ok(Err(e)) => error!("File watch error: {:?}", e),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    })
}

/// A file event in the shape [`WasmClient::on_file_event`] takes.
#[derive(Debug, PartialEq)]
struct FileEvent {
    name: String,
    extension: String,
    path: String,
    kind: &'static str,
}

impl FileEvent {
    fn from_notify(event: &Event, path: &Path) -> Option<Self> {
        let kind = if event.kind.is_create() {
            "create"
        } else if event.kind.is_modify() {
            "write"
        } else if event.kind.is_remove() {
            "remove"
        } else {
            return None;
        };
        let name = path.file_name()?.to_string_lossy().into_owned();
        let extension = path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        Some(Self {
            name,
            extension,
            path: path.to_string_lossy().into_owned(),
            kind,
        })
    }
}

/// Picks the last event of the batch that can trigger a rebuild and hands it
/// to the client.
fn handle_batch(client: &WasmClient, batch: &[Event]) {
    let ignored = client.unobserved_files();
    let trigger = batch
        .iter()
        .flat_map(|event| {
            event
                .paths
                .iter()
                .filter_map(move |path| FileEvent::from_notify(event, path))
        })
        .filter(|fe| !ignored.contains(&fe.name))
        .filter(|fe| client.supported_extensions().contains(&fe.extension.as_str()))
        .filter(|fe| fe.kind != "remove")
        .last();

    let Some(event) = trigger else {
        return;
    };

    match client.on_file_event(&event.name, &event.extension, &event.path, event.kind) {
        Ok(()) => println!(
            "{} Rebuilt after change to {} ({})",
            "[WASM]".green().bold(),
            event.name,
            format_size(client.binary_size())
        ),
        Err(e) => println!("{} {}", "[WARN]".yellow().bold(), e),
    }
}

async fn read_mode_changes(client: Arc<WasmClient>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let token = line.trim().to_string();
        if token.is_empty() {
            continue;
        }
        let client = Arc::clone(&client);
        match tokio::task::spawn_blocking(move || client.change(&token)).await {
            Ok(outcome) => print_outcome(&outcome),
            Err(e) => error!("Mode change task failed: {:?}", e),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received, stopping...");
}
