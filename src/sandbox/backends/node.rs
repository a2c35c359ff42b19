use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tempfile::TempPath;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::types::NodeConfig;
use crate::error::{JudgeletError, Result};
use crate::sandbox::document::SandboxDocument;
use crate::sandbox::traits::{
    BackendCapabilities, SandboxBackend, SandboxChannel, SandboxEvent, SandboxInfo,
};

/// Node.js sandbox backend.
///
/// Every document is written to a temporary file and run by a fresh
/// `node` process. Stdout carries the document's messages, stdin its
/// control input. Loading a new document kills the previous process.
pub struct NodeBackend {
    binary: PathBuf,
    args: Vec<String>,
    permission_flags: &'static [&'static str],
    max_stderr_bytes: usize,
    current: Mutex<Option<RunningDocument>>,
}

struct RunningDocument {
    pid: Option<u32>,
    kill: Option<oneshot::Sender<()>>,
    waiter: JoinHandle<()>,
    // Deleted when dropped
    _file: TempPath,
}

impl NodeBackend {
    /// Create a new Node backend.
    pub fn new(config: &NodeConfig) -> Result<Self> {
        let binary = which::which(&config.binary).map_err(|e| JudgeletError::BackendNotAvailable {
            backend: "node".to_string(),
            reason: format!("'{}' not found: {}", config.binary.display(), e),
        })?;

        let version = runtime_version(&binary);
        let permission_flags = if config.permissions {
            let flags = version.and_then(permission_flags);
            if flags.is_none() {
                warn!(
                    version = ?version,
                    "Runtime has no permission model; documents can reach the host filesystem"
                );
            }
            flags.unwrap_or_default()
        } else {
            &[]
        };

        info!(
            binary = %binary.display(),
            version = ?version,
            permissions = !permission_flags.is_empty(),
            "Node backend initialized"
        );

        Ok(Self {
            binary,
            args: config.args.clone(),
            permission_flags,
            max_stderr_bytes: config.max_stderr_bytes,
            current: Mutex::new(None),
        })
    }

    /// Check if a `node` binary is on PATH.
    pub fn is_available() -> bool {
        which::which("node").is_ok()
    }

    fn write_document(document: &SandboxDocument) -> Result<TempPath> {
        let mut file = tempfile::Builder::new()
            .prefix("judgelet-")
            .suffix(".js")
            .tempfile()
            .map_err(|e| {
                JudgeletError::SandboxLaunch(format!("Failed to create document file: {}", e))
            })?;
        file.write_all(document.source.as_bytes())?;
        file.flush()?;
        Ok(file.into_temp_path())
    }

    async fn stop(running: RunningDocument) {
        let RunningDocument {
            pid,
            kill,
            waiter,
            _file,
        } = running;
        if let Some(kill) = kill {
            let _ = kill.send(());
        }
        if let Err(e) = waiter.await {
            warn!(pid = ?pid, error = %e, "Document waiter task failed");
        }
        debug!(pid = ?pid, "Document unloaded");
    }
}

#[async_trait]
impl SandboxBackend for NodeBackend {
    fn name(&self) -> &str {
        "node"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            control_channel: true,
            process_per_document: true,
            live_console: true,
        }
    }

    async fn load(&self, document: &SandboxDocument) -> Result<SandboxChannel> {
        let mut current = self.current.lock().await;
        if let Some(previous) = current.take() {
            Self::stop(previous).await;
        }

        let path = Self::write_document(document)?;

        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.args);
        if !self.permission_flags.is_empty() {
            cmd.args(self.permission_flags);
            cmd.arg(allow_read_flag(&path));
        }
        cmd.arg(&path);
        cmd.env_clear();
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            JudgeletError::SandboxLaunch(format!(
                "Failed to start {}: {}",
                self.binary.display(),
                e
            ))
        })?;
        let pid = child.id();

        let (stdin, stdout, stderr) = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => {
                let _ = child.kill().await;
                return Err(JudgeletError::SandboxLaunch(
                    "Runtime process pipes are unavailable".to_string(),
                ));
            }
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (control_tx, mut control_rx) = mpsc::unbounded_channel::<String>();
        let (kill_tx, kill_rx) = oneshot::channel();

        // Document messages, one per line
        let line_tx = events_tx.clone();
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line_tx.send(SandboxEvent::Line(line)).is_err() {
                    break;
                }
            }
        });

        // Keep the head of stderr for crash reports, drain the rest
        let max_stderr = self.max_stderr_bytes;
        let stderr_task = tokio::spawn(async move {
            let mut kept = Vec::new();
            let mut reader = BufReader::new(stderr);
            let mut buf = [0u8; 4096];
            while let Ok(n) = reader.read(&mut buf).await {
                if n == 0 {
                    break;
                }
                let room = max_stderr.saturating_sub(kept.len());
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
            String::from_utf8_lossy(&kept).into_owned()
        });

        // Control lines
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(line) = control_rx.recv().await {
                let written = async {
                    stdin.write_all(line.as_bytes()).await?;
                    stdin.write_all(b"\n").await?;
                    stdin.flush().await
                };
                if let Err(e) = written.await {
                    debug!(error = %e, "Control input closed");
                    break;
                }
            }
        });

        let waiter = tokio::spawn(async move {
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                _ = kill_rx => None,
            };
            let status = match exited {
                Some(status) => status.ok().and_then(|s| s.code()),
                None => {
                    let _ = child.kill().await;
                    None
                }
            };
            let _ = stdout_task.await;
            let stderr = stderr_task.await.unwrap_or_default();
            debug!(status = ?status, stderr_len = stderr.len(), "Runtime process exited");
            let _ = events_tx.send(SandboxEvent::Exited { status, stderr });
        });

        debug!(
            pid = ?pid,
            correlation_id = %document.correlation_id,
            path = %path.display(),
            "Document loaded"
        );

        *current = Some(RunningDocument {
            pid,
            kill: Some(kill_tx),
            waiter,
            _file: path,
        });

        Ok(SandboxChannel {
            events: events_rx,
            control: control_tx,
        })
    }

    async fn unload(&self) -> Result<()> {
        let running = self.current.lock().await.take();
        if let Some(running) = running {
            Self::stop(running).await;
        }
        Ok(())
    }

    fn info(&self) -> SandboxInfo {
        let pid = self
            .current
            .try_lock()
            .ok()
            .and_then(|current| current.as_ref().and_then(|r| r.pid));

        let mut metadata = HashMap::new();
        metadata.insert("binary".to_string(), self.binary.display().to_string());
        metadata.insert("args".to_string(), self.args.join(" "));
        metadata.insert("permissions".to_string(), self.permission_flags.join(" "));

        SandboxInfo {
            backend_type: "node".to_string(),
            instance_id: pid.map(|p| p.to_string()),
            running: pid.is_some(),
            metadata,
        }
    }
}

/// `(major, minor)` reported by `<binary> --version`.
fn runtime_version(binary: &Path) -> Option<(u32, u32)> {
    let output = std::process::Command::new(binary)
        .arg("--version")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .ok()?;
    parse_version(&String::from_utf8_lossy(&output.stdout))
}

fn parse_version(text: &str) -> Option<(u32, u32)> {
    let mut parts = text.trim().trim_start_matches('v').split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

const PERMISSION: &[&str] = &["--permission"];
const EXPERIMENTAL_PERMISSION: &[&str] = &[
    "--experimental-permission",
    "--disable-warning=ExperimentalWarning",
];
// Before 20.11 warnings can only be silenced as a whole
const EXPERIMENTAL_PERMISSION_ALL_WARNINGS: &[&str] = &["--experimental-permission", "--no-warnings"];

/// Flags enabling the permission model, or `None` before Node 20.
fn permission_flags((major, minor): (u32, u32)) -> Option<&'static [&'static str]> {
    match (major, minor) {
        (m, _) if m >= 24 => Some(PERMISSION),
        (23, n) if n >= 5 => Some(PERMISSION),
        (m, _) if m >= 21 => Some(EXPERIMENTAL_PERMISSION),
        (20, n) if n >= 11 => Some(EXPERIMENTAL_PERMISSION),
        (20, _) => Some(EXPERIMENTAL_PERMISSION_ALL_WARNINGS),
        _ => None,
    }
}

/// Read access for the document file alone, under both its given and its
/// resolved path.
fn allow_read_flag(path: &Path) -> String {
    let mut paths = vec![path.display().to_string()];
    if let Ok(real) = std::fs::canonicalize(path) {
        if real != path {
            paths.push(real.display().to_string());
        }
    }
    format!("--allow-fs-read={}", paths.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("v20.20.2\n"), Some((20, 20)));
        assert_eq!(parse_version("v23.5.0"), Some((23, 5)));
        assert_eq!(parse_version("not a version"), None);
    }

    #[test]
    fn test_permission_flags_follow_runtime_version() {
        assert_eq!(permission_flags((18, 19)), None);
        assert_eq!(permission_flags((20, 5)), Some(EXPERIMENTAL_PERMISSION_ALL_WARNINGS));
        assert_eq!(permission_flags((20, 11)), Some(EXPERIMENTAL_PERMISSION));
        assert_eq!(permission_flags((22, 3)), Some(EXPERIMENTAL_PERMISSION));
        assert_eq!(permission_flags((23, 4)), Some(EXPERIMENTAL_PERMISSION));
        assert_eq!(permission_flags((23, 5)), Some(PERMISSION));
        assert_eq!(permission_flags((25, 0)), Some(PERMISSION));
    }

    #[test]
    fn test_allow_read_flag_names_the_document() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let flag = allow_read_flag(file.path());
        assert!(flag.starts_with("--allow-fs-read="));
        assert!(flag.contains(&file.path().display().to_string()));
        assert!(!flag.contains('*'));
    }
}
