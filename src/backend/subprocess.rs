//! Out-of-process worker.
//!
//! Protocol: the page goes to the worker's stdin as base64 text (or the
//! caller's data URI, untouched), with `--no-data-uri` appended to the
//! arguments when data URIs are not allowed. The worker
//! prints exactly one JSON document on stdout, either a `SegmentationResult`
//! or an `ErrorReport`. The segmentation config travels in the
//! `PANELCUT_CONFIG_JSON` environment variable.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use base64::{Engine, engine::general_purpose};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::backend::{SegmentRequest, SegmentationBackend};
use crate::config::{BackendPreference, SegmentationConfig};
use crate::error::{ErrorKind, ErrorReport, Result, SegmentError};
use crate::models::SegmentationResult;

/// Executable looked up on `PATH` when no program is configured
pub const DEFAULT_WORKER: &str = "panelcut";

/// Environment variable carrying the serialized config to the worker
pub const CONFIG_ENV: &str = "PANELCUT_CONFIG_JSON";

#[derive(Deserialize)]
#[serde(untagged)]
enum WorkerReply {
    Success(SegmentationResult),
    Failure(ErrorReport),
}

#[derive(Clone)]
pub struct SubprocessBackend {
    config: Arc<SegmentationConfig>,
}

impl SubprocessBackend {
    pub fn new(config: Arc<SegmentationConfig>) -> Self {
        Self { config }
    }

    fn timeout(&self) -> Duration {
        self.config.runtime.timeout()
    }

    /// Configured program, or `panelcut` found on `PATH`
    pub fn resolve_program(&self) -> Result<PathBuf> {
        match &self.config.runtime.subprocess.program {
            Some(program) if program.components().count() > 1 || program.is_absolute() => {
                if program.is_file() {
                    Ok(program.clone())
                } else {
                    Err(SegmentError::Unavailable(format!(
                        "worker program {} does not exist",
                        program.display()
                    )))
                }
            }
            Some(program) => find_on_path(program),
            None => find_on_path(Path::new(DEFAULT_WORKER)),
        }
    }

    /// Config handed to the worker: same tuning, but always run natively
    fn worker_config_json(&self) -> Result<String> {
        let mut config = self.config.as_ref().clone();
        config.runtime.backend = BackendPreference::Native;
        serde_json::to_string(&config)
            .map_err(|e| SegmentError::Processing(format!("cannot serialize worker config: {}", e)))
    }

    async fn run_worker(&self, program: &Path, request: SegmentRequest) -> Result<SegmentationResult> {
        let mut command = Command::new(program);
        command.args(&self.config.runtime.subprocess.args);
        if !request.allow_data_uri {
            command.arg("--no-data-uri");
        }
        let mut child = command
            .env(CONFIG_ENV, self.worker_config_json()?)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    SegmentError::Unavailable(format!("cannot start worker {}: {}", program.display(), e))
                }
                _ => SegmentError::Processing(format!("cannot start worker {}: {}", program.display(), e)),
            })?;
        debug!(program = %program.display(), pid = ?child.id(), "worker started");

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SegmentError::Processing("worker stdin unavailable".to_string()))?;
        let payload = stdin_payload(request.bytes);

        // Write and read concurrently so a chatty worker can't deadlock on a full pipe
        let writer = async move {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await
        };
        let (written, output) = tokio::join!(writer, child.wait_with_output());
        let output =
            output.map_err(|e| SegmentError::Processing(format!("waiting for worker failed: {}", e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        if stdout.is_empty() {
            let write_note = written.err().map(|e| format!(" (stdin: {})", e)).unwrap_or_default();
            return Err(SegmentError::Processing(format!(
                "worker exited with {} and no output{}: {}",
                output.status,
                write_note,
                stderr.trim()
            )));
        }

        let reply: WorkerReply = serde_json::from_str(stdout).map_err(|e| {
            SegmentError::Processing(format!("worker reply is not valid JSON ({}): {}", output.status, e))
        })?;
        match reply {
            WorkerReply::Success(result) => {
                result.validate()?;
                Ok(result)
            }
            WorkerReply::Failure(report) if report.kind == ErrorKind::Timeout => {
                Err(SegmentError::Timeout(self.timeout()))
            }
            WorkerReply::Failure(report) => Err(report.into_error()),
        }
    }
}

impl SegmentationBackend for SubprocessBackend {
    fn name(&self) -> &'static str {
        "subprocess"
    }

    fn probe(&self) -> Result<()> {
        self.resolve_program().map(|_| ())
    }

    async fn segment(&self, request: SegmentRequest) -> Result<SegmentationResult> {
        let program = self.resolve_program()?;
        let budget = self.timeout();

        // Dropping the worker future on timeout drops the child, which kills it
        match tokio::time::timeout(budget, self.run_worker(&program, request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(program = %program.display(), budget_ms = budget.as_millis() as u64, "worker timed out");
                Err(SegmentError::Timeout(budget))
            }
        }
    }
}

/// Raw containers are base64 encoded; base64 text and data URIs already are text and go as-is
fn stdin_payload(bytes: Vec<u8>) -> Vec<u8> {
    if image::guess_format(&bytes).is_ok() {
        general_purpose::STANDARD.encode(&bytes).into_bytes()
    } else {
        bytes
    }
}

fn find_on_path(name: &Path) -> Result<PathBuf> {
    let with_suffix = {
        let mut file = name.as_os_str().to_owned();
        file.push(std::env::consts::EXE_SUFFIX);
        PathBuf::from(file)
    };
    let search_path = std::env::var_os("PATH").unwrap_or_default();
    std::env::split_paths(&search_path)
        .flat_map(|dir| [dir.join(name), dir.join(&with_suffix)])
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            SegmentError::Unavailable(format!(
                "worker program '{}' not found on PATH",
                name.display()
            ))
        })
}
