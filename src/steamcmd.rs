use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::fetch::{FetchOptions, FetchRequest};
use crate::output::{self, LineKind, LineSplitter};
use crate::platform::APP_ID;
use crate::progress::{EventSink, FetchEvent};
use crate::prompt::GuardCodePrompt;

#[cfg(target_os = "windows")]
const STEAMCMD_NAME: &str = "steamcmd.exe";

#[cfg(not(target_os = "windows"))]
const STEAMCMD_NAME: &str = "steamcmd";

// Valve's standalone archives ship `steamcmd.exe` on Windows and a `steamcmd.sh` wrapper elsewhere.
#[cfg(target_os = "windows")]
const BUNDLED_STEAMCMD_NAME: &str = "steamcmd.exe";

#[cfg(not(target_os = "windows"))]
const BUNDLED_STEAMCMD_NAME: &str = "steamcmd.sh";

/// A located SteamCMD executable.
#[derive(Debug, Clone)]
pub struct SteamCmd {
    executable: PathBuf,
}

impl SteamCmd {
    /// Resolves the executable without launching anything.
    ///
    /// Order: the configured path, `steamcmd` on PATH, then `<data root>/utils/`.
    pub fn locate(configured: Option<&Path>, data_root: &Path) -> Result<Self, FetchError> {
        if let Some(path) = configured {
            if path.is_file() {
                return Ok(Self::with_executable(path));
            }
            return Err(FetchError::ToolNotFound(format!(
                "configured steamcmd_path {} does not exist",
                path.display()
            )));
        }

        if let Ok(path) = which::which(STEAMCMD_NAME) {
            return Ok(Self::with_executable(path));
        }

        let bundled = data_root.join("utils").join(BUNDLED_STEAMCMD_NAME);
        if bundled.is_file() {
            return Ok(Self::with_executable(bundled));
        }

        Err(FetchError::ToolNotFound(format!(
            "{STEAMCMD_NAME} is not on PATH and {} does not exist; install SteamCMD or set steamcmd_path",
            bundled.display()
        )))
    }

    pub fn with_executable(path: impl Into<PathBuf>) -> Self {
        Self {
            executable: path.into(),
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// `+login <user> [<password>] +download_depot <app> <depot> <manifest> +quit`
    pub fn download_args(req: &FetchRequest) -> Vec<String> {
        let mut args = vec!["+login".to_string(), req.credentials.username.clone()];
        if let Some(password) = req.credentials.password.as_ref().filter(|p| !p.is_empty()) {
            args.push(password.clone());
        }
        args.extend(
            [
                "+download_depot",
                APP_ID,
                req.platform.depot_id(),
                req.manifest_id.as_str(),
                "+quit",
            ]
            .map(String::from),
        );
        args
    }

    /// Command line for the log, password masked.
    fn display_command(&self, args: &[String], req: &FetchRequest) -> String {
        let password = req.credentials.password.as_deref().unwrap_or_default();
        let masked: Vec<&str> = std::iter::once(self.executable.to_str().unwrap_or(STEAMCMD_NAME))
            .chain(args.iter().map(|a| {
                if !password.is_empty() && a == password {
                    "********"
                } else {
                    a.as_str()
                }
            }))
            .collect();
        shlex::try_join(masked.iter().copied()).unwrap_or_else(|_| masked.join(" "))
    }

    /// Runs one `download_depot` and returns the directory SteamCMD reported.
    ///
    /// Nothing is moved here; the caller ingests the returned directory.
    pub async fn download_depot(
        &self,
        req: &FetchRequest,
        monitor: &OutputMonitor<'_>,
    ) -> Result<PathBuf, FetchError> {
        let args = Self::download_args(req);
        log::info!("Executing: {}", self.display_command(&args, req));

        // stdout and stderr share one pipe, so lines arrive in the order the tool wrote them.
        let (output, writer) = std::io::pipe().map_err(FetchError::Spawn)?;
        let stderr_writer = writer.try_clone().map_err(FetchError::Spawn)?;

        let mut child = Command::new(&self.executable)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(writer)
            .stderr(stderr_writer)
            .kill_on_drop(true)
            .spawn()
            .map_err(FetchError::Spawn)?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| capture_error("stdin"))?;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        spawn_line_reader(output, tx)?;

        let download_path = match monitor.run(&mut rx, &mut stdin).await {
            Ok(p) => p,
            Err(e) => {
                log::warn!("stopping steamcmd: {e}");
                let _ = child.kill().await;
                let _ = child.wait().await;
                return Err(e);
            }
        };
        drop(stdin);

        let status = child.wait().await?;
        log::info!("steamcmd exited with {status}");

        if !status.success() {
            return Err(FetchError::ToolFailed {
                code: status.code(),
            });
        }

        let path = download_path.ok_or(FetchError::CompletionMissing)?;
        if !path.is_dir() {
            return Err(FetchError::CompletionPathMissing(path));
        }
        Ok(path)
    }
}

fn capture_error(stream: &str) -> FetchError {
    FetchError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        format!("failed to capture steamcmd {stream}"),
    ))
}

/// Reads the merged output on its own thread; a blocking pipe read must not
/// hold a runtime worker or keep the runtime from shutting down.
fn spawn_line_reader<R>(mut reader: R, tx: mpsc::UnboundedSender<String>) -> Result<(), FetchError>
where
    R: Read + Send + 'static,
{
    std::thread::Builder::new()
        .name("steamcmd-output".to_string())
        .spawn(move || {
            let mut splitter = LineSplitter::new();
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        for line in splitter.push(&buf[..n]) {
                            if tx.send(line).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        log::warn!("failed to read steamcmd output: {e}");
                        break;
                    }
                }
            }
            if let Some(line) = splitter.finish() {
                let _ = tx.send(line);
            }
        })?;
    Ok(())
}

/// Drains the merged output of one SteamCMD run.
///
/// Answers code prompts, captures the completion path, filters noise, and
/// enforces the stall timeout and cancellation. Lines reach the event sink in
/// the order they were received.
pub struct OutputMonitor<'a> {
    prompt: &'a dyn GuardCodePrompt,
    events: &'a EventSink,
    options: &'a FetchOptions,
    cancel: &'a CancellationToken,
}

impl<'a> OutputMonitor<'a> {
    pub fn new(
        prompt: &'a dyn GuardCodePrompt,
        events: &'a EventSink,
        options: &'a FetchOptions,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            prompt,
            events,
            options,
            cancel,
        }
    }

    /// Runs until every sender of `lines` is gone. Returns the captured completion path, if any.
    pub async fn run<W>(
        &self,
        lines: &mut mpsc::UnboundedReceiver<String>,
        stdin: &mut W,
    ) -> Result<Option<PathBuf>, FetchError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut download_path: Option<PathBuf> = None;
        let mut guard_attempts = 0u32;
        let mut last_output_at = Instant::now();
        let mut idle_ticks = tokio::time::interval(Duration::from_millis(500));

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(FetchError::Cancelled),
                msg = lines.recv() => {
                    let Some(line) = msg else { break };
                    last_output_at = Instant::now();

                    match output::classify(&line) {
                        LineKind::GuardPrompt => {
                            guard_attempts += 1;
                            if guard_attempts > self.options.max_guard_attempts {
                                return Err(FetchError::GuardCodeRejected(self.options.max_guard_attempts));
                            }
                            self.events.emit(FetchEvent::GuardCodeRequested { attempt: guard_attempts });
                            let code = self.ask_code(guard_attempts).await?;
                            // NOTE: never log the code itself.
                            self.submit(stdin, code.as_deref().unwrap_or_default()).await;
                            last_output_at = Instant::now();
                        }
                        LineKind::DownloadComplete(path) => {
                            log::info!("Download path: {}", path.display());
                            self.events.emit(FetchEvent::DownloadPath(EventSink::path_string(&path)));
                            download_path = Some(path);
                        }
                        LineKind::Progress(pct) => self.events.emit(FetchEvent::Progress(pct)),
                        LineKind::Noise => log::debug!("steamcmd (filtered): {line}"),
                        LineKind::Info => self.events.emit(FetchEvent::Output(line)),
                    }
                }
                _ = idle_ticks.tick() => {
                    if let Some(limit) = self.options.stall_timeout {
                        if last_output_at.elapsed() >= limit {
                            return Err(FetchError::Stalled(limit));
                        }
                    }
                }
            }
        }

        Ok(download_path)
    }

    async fn ask_code(&self, attempt: u32) -> Result<Option<String>, FetchError> {
        let timeout = self.options.guard_code_timeout;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(FetchError::Cancelled),
            res = tokio::time::timeout(timeout, self.prompt.request_code(attempt)) => {
                res.map_err(|_| FetchError::GuardCodeTimeout(timeout))
            }
        }
    }

    async fn submit<W>(&self, stdin: &mut W, code: &str)
    where
        W: AsyncWrite + Unpin,
    {
        if code.is_empty() {
            self.events
                .emit(FetchEvent::Output("Continuing without a Steam Guard code...".to_string()));
        } else {
            self.events
                .emit(FetchEvent::Output("Submitting Steam Guard code...".to_string()));
        }
        let res = async {
            stdin.write_all(format!("{code}\n").as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        // A closed stdin means steamcmd already gave up; its exit status reports why.
        if let Err(e) = res {
            log::warn!("failed to write to steamcmd stdin: {e}");
        }
    }
}
