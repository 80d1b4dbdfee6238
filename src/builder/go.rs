use super::{BuildError, Builder, BuilderConfig};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use wait_timeout::ChildExt;

/// 单次等待子进程的时长，也是取消请求生效的最大延迟
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Go / TinyGo 构建器
///
/// 职责：在项目根目录执行 `<command> build -o <out> <args...> <main>`。
/// 注意：同一时间只允许一个编译进程，`cancel` 会终止它。
pub struct GoBuilder {
    config: BuilderConfig,
    running: Mutex<Option<Child>>,
    cancelled: AtomicBool,
    last_size: AtomicU64,
}

impl GoBuilder {
    pub fn new(config: BuilderConfig) -> Self {
        Self {
            config,
            running: Mutex::new(None),
            cancelled: AtomicBool::new(false),
            last_size: AtomicU64::new(0),
        }
    }

    fn main_input_absolute(&self) -> PathBuf {
        self.config.root_dir.join(&self.config.main_input)
    }

    /// 执行工具链，将产物写入 `output`
    ///
    /// # 副作用
    /// - 启动编译子进程，并阻塞直到其退出、超时或被取消。
    fn run(&self, output: &Path) -> Result<(), BuildError> {
        let input = self.main_input_absolute();
        if !input.exists() {
            return Err(BuildError::MissingInput(input));
        }

        let command = self.config.command.clone();
        let mut args: Vec<String> = vec!["build".into(), "-o".into()];
        args.push(output.display().to_string());
        args.extend(self.config.args.iter().cloned());
        args.push(self.config.main_input.display().to_string());

        debug!(command = %command, args = ?args, "executing toolchain");

        let mut child = Command::new(&command)
            .args(&args)
            .envs(self.config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&self.config.root_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| BuildError::Spawn {
                command: command.clone(),
                source,
            })?;

        // 独立线程读取 stderr，防止编译器输出过多堵塞管道
        let stderr_reader = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = pipe.read_to_string(&mut buf);
                buf
            })
        });

        self.cancelled.store(false, Ordering::SeqCst);
        if let Ok(mut slot) = self.running.lock() {
            *slot = Some(child);
        }

        let started = Instant::now();
        let status = loop {
            let poll = match self.running.lock() {
                Ok(mut slot) => poll_child(
                    &mut slot,
                    self.cancelled.load(Ordering::SeqCst),
                    started,
                    self.config.timeout,
                ),
                Err(_) => Poll::Gone,
            };
            match poll {
                Poll::Running => continue,
                Poll::Exited(status) => break status,
                Poll::TimedOut => {
                    return Err(BuildError::Timeout {
                        command,
                        timeout: self.config.timeout,
                    })
                }
                Poll::Failed(source) => return Err(BuildError::Io { path: input, source }),
                // 子进程已被 `cancel` 终止
                Poll::Gone => return Err(BuildError::Cancelled { command }),
            }
        };

        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if self.cancelled.load(Ordering::SeqCst) {
            return Err(BuildError::Cancelled { command });
        }
        if !status.success() {
            return Err(BuildError::Failed {
                command,
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    fn record_size(&self, size: u64) {
        self.last_size.store(size, Ordering::SeqCst);
    }
}

enum Poll {
    Running,
    Exited(ExitStatus),
    TimedOut,
    Failed(std::io::Error),
    Gone,
}

fn poll_child(
    slot: &mut Option<Child>,
    cancelled: bool,
    started: Instant,
    timeout: Duration,
) -> Poll {
    let Some(child) = slot.as_mut() else {
        return Poll::Gone;
    };
    if cancelled {
        let _ = child.kill();
        let _ = child.wait();
        *slot = None;
        return Poll::Gone;
    }
    let poll = match child.wait_timeout(WAIT_SLICE) {
        Ok(Some(status)) => Poll::Exited(status),
        Ok(None) if started.elapsed() >= timeout => {
            let _ = child.kill();
            let _ = child.wait();
            Poll::TimedOut
        }
        Ok(None) => return Poll::Running,
        Err(err) => Poll::Failed(err),
    };
    *slot = None;
    poll
}

impl Builder for GoBuilder {
    fn compile_program(&self) -> Result<(), BuildError> {
        let output = self.config.final_output_path();
        fs::create_dir_all(&self.config.output_dir).map_err(|source| BuildError::Io {
            path: self.config.output_dir.clone(),
            source,
        })?;

        self.run(&output)?;

        let size = fs::metadata(&output).map(|m| m.len()).unwrap_or(0);
        self.record_size(size);
        info!(
            command = %self.config.command,
            output = %output.display(),
            size,
            "compiled to disk"
        );
        Ok(())
    }

    fn compile_to_memory(&self) -> Result<Vec<u8>, BuildError> {
        let scratch = tempfile::tempdir().map_err(|source| BuildError::Io {
            path: std::env::temp_dir(),
            source,
        })?;
        let output = scratch.path().join(self.config.output_file_name());

        self.run(&output)?;

        let bytes = fs::read(&output).map_err(|source| BuildError::Io {
            path: output.clone(),
            source,
        })?;
        self.record_size(bytes.len() as u64);
        info!(
            command = %self.config.command,
            size = bytes.len(),
            "compiled to memory"
        );
        Ok(bytes)
    }

    /// 请求终止正在运行的编译
    ///
    /// 等待线程持有进程槽位时，由它在下一个等待周期内终止子进程。
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let child = match self.running.try_lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(mut child) = child {
            let _ = child.kill();
            let _ = child.wait();
            info!(command = %self.config.command, "cancelled in-flight compile");
        }
    }

    fn final_output_path(&self) -> PathBuf {
        self.config.final_output_path()
    }

    fn binary_size(&self) -> u64 {
        self.last_size.load(Ordering::SeqCst)
    }

    fn unobserved_files(&self) -> Vec<String> {
        vec![self.config.output_file_name()]
    }
}
