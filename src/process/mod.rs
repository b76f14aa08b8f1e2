//! Copilot CLI subprocess execution.
//!
//! [`ProcessManager`] runs one `copilot -p ...` per turn inside the
//! working directory, collects stdout/stderr under a time budget, scrubs
//! the text, and recovers the session id from the CLI's session-state
//! directory so the next turn can `--resume` it.
//!
//! Every running child is tracked by a cancellation token so
//! [`ProcessManager::kill_all_processes`] can stop them in bulk.

pub mod locator;
pub mod output;

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::error::{AssistantError, Result};
use crate::stream::{deliver, StreamCallback, StreamUpdate, ToolAction};
use crate::turn::{AssistantResponse, ExecuteRequest};

pub use locator::SessionLocator;
pub use output::{parse_output, ParsedOutput};

type ActiveTable = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// Raw capture of one finished CLI run.
#[derive(Debug)]
struct RawOutput {
    stdout: String,
    stderr: String,
    code: Option<i32>,
}

enum Outcome {
    Finished(std::io::Result<RawOutput>),
    TimedOut,
    Cancelled,
}

/// Removes a process from the active table when the run ends, however it ends.
struct ActiveGuard {
    table: ActiveTable,
    process_id: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if let Ok(mut table) = self.table.lock() {
            table.remove(&self.process_id);
        }
    }
}

/// Runs the Copilot CLI as a subprocess, one child per turn.
pub struct ProcessManager {
    settings: Arc<Settings>,
    locator: SessionLocator,
    active: ActiveTable,
}

impl ProcessManager {
    pub fn new(settings: Arc<Settings>) -> Self {
        let locator = SessionLocator::new(settings.session_state_root());
        Self {
            settings,
            locator,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn locator(&self) -> &SessionLocator {
        &self.locator
    }

    /// Build the CLI argument vector, binary first.
    ///
    /// `--resume` is only added when continuing with a known session id.
    pub fn build_command(
        &self,
        prompt: &str,
        session_id: Option<&str>,
        continue_session: bool,
        model: &str,
    ) -> Vec<String> {
        let mut cmd = vec![self.settings.binary().to_string()];

        if continue_session {
            if let Some(id) = session_id.filter(|id| !id.is_empty()) {
                cmd.push("--resume".into());
                cmd.push(id.to_string());
            }
        }

        cmd.push("-p".into());
        cmd.push(prompt.to_string());

        if !model.is_empty() {
            cmd.push("--model".into());
            cmd.push(model.to_string());
        }

        // Bot usage: no interactive permission prompts.
        cmd.push("--allow-all".into());
        cmd.push("-s".into());

        debug!(command = ?cmd, "built Copilot command");
        cmd
    }

    /// Run one prompt through the CLI.
    ///
    /// When `continue_session` is set without an explicit session id, the
    /// most recent CLI session for the working directory is resumed.
    pub async fn execute_command(
        &self,
        request: &ExecuteRequest,
        stream_callback: Option<StreamCallback>,
    ) -> Result<AssistantResponse> {
        let start = Instant::now();
        let dir = request.directory();

        let mut session_id = request.session_id.clone().filter(|s| !s.is_empty());
        if request.continue_session && session_id.is_none() {
            session_id = self.locator.find_session_id_for_directory(dir).await;
        }

        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.settings.copilot_model.clone());
        let cmd = self.build_command(
            &request.prompt,
            session_id.as_deref(),
            request.continue_session,
            &model,
        );

        let process_id = uuid::Uuid::new_v4().to_string();
        info!(
            process_id = %process_id,
            working_directory = %dir.display(),
            session_id = ?session_id,
            continue_session = request.continue_session,
            model = %model,
            "starting Copilot process"
        );

        let cancel = CancellationToken::new();
        let _guard = self.track(&process_id, cancel.clone());

        let raw = match self.run(&cmd, dir, &cancel).await {
            Ok(raw) => raw,
            Err(e) => {
                error!(process_id = %process_id, error = %e, "Copilot process failed");
                return Err(e);
            }
        };

        let parsed = parse_output(&raw.stdout);

        if raw.code != Some(0) && parsed.content.is_empty() {
            let error_msg = if raw.stderr.trim().is_empty() {
                match raw.code {
                    Some(code) => format!("Copilot exited with code {code}"),
                    None => "Copilot was terminated by a signal".to_string(),
                }
            } else {
                raw.stderr.trim().to_string()
            };
            error!(
                process_id = %process_id,
                return_code = ?raw.code,
                stderr = %error_msg,
                "Copilot process failed"
            );
            return Err(AssistantError::Process(format!("Copilot error: {error_msg}")));
        }

        if let Some(cb) = &stream_callback {
            for tool in &parsed.tools {
                deliver(
                    cb,
                    StreamUpdate::Tool {
                        tool_name: tool.name.clone(),
                        tool_args: tool.input.clone(),
                        action: ToolAction::Pre,
                    },
                )
                .await;
            }
            deliver(
                cb,
                StreamUpdate::Result {
                    content: parsed.content.clone(),
                    tools_used: (!parsed.tools.is_empty()).then_some(parsed.tools.len()),
                },
            )
            .await;
        }

        // The CLI doesn't print its session id; the session-state dir knows it.
        let resolved_session = self
            .locator
            .find_session_id_for_directory(dir)
            .await
            .or(session_id)
            .unwrap_or_default();

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            process_id = %process_id,
            duration_ms,
            session_id = %resolved_session,
            "Copilot process completed"
        );

        let mut response = AssistantResponse::new(parsed.content, resolved_session);
        response.duration_ms = duration_ms;
        response.tools_used = parsed.tools;
        Ok(response)
    }

    /// Cancel every tracked process.  Each run kills and reaps its own child.
    pub fn kill_all_processes(&self) {
        let drained: Vec<(String, CancellationToken)> = match self.active.lock() {
            Ok(mut table) => table.drain().collect(),
            Err(_) => {
                warn!("active process table poisoned");
                return;
            }
        };
        info!(count = drained.len(), "killing all Copilot processes");
        for (process_id, token) in drained {
            debug!(process_id = %process_id, "cancelling Copilot process");
            token.cancel();
        }
    }

    pub fn active_process_count(&self) -> usize {
        self.active.lock().map(|t| t.len()).unwrap_or(0)
    }

    fn track(&self, process_id: &str, token: CancellationToken) -> ActiveGuard {
        if let Ok(mut table) = self.active.lock() {
            table.insert(process_id.to_string(), token);
        }
        ActiveGuard {
            table: self.active.clone(),
            process_id: process_id.to_string(),
        }
    }

    async fn run(&self, cmd: &[String], cwd: &Path, cancel: &CancellationToken) -> Result<RawOutput> {
        let (program, args) = cmd
            .split_first()
            .ok_or_else(|| AssistantError::Process("empty Copilot command".into()))?;

        let mut child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(AssistantError::Spawn)?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let budget = Duration::from_secs(self.settings.timeout_seconds);

        let outcome = tokio::select! {
            r = tokio::time::timeout(budget, collect(&mut child, stdout, stderr)) => match r {
                Ok(finished) => Outcome::Finished(finished),
                Err(_) => Outcome::TimedOut,
            },
            _ = cancel.cancelled() => Outcome::Cancelled,
        };

        match outcome {
            Outcome::Finished(result) => {
                result.map_err(|e| AssistantError::Process(format!("Copilot I/O error: {e}")))
            }
            Outcome::TimedOut => {
                kill(&mut child).await;
                warn!(seconds = self.settings.timeout_seconds, "Copilot process timed out");
                Err(AssistantError::Timeout {
                    seconds: self.settings.timeout_seconds,
                })
            }
            Outcome::Cancelled => {
                kill(&mut child).await;
                Err(AssistantError::Process("Copilot process was cancelled".into()))
            }
        }
    }
}

async fn collect<O, E>(child: &mut Child, stdout: Option<O>, stderr: Option<E>) -> std::io::Result<RawOutput>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let (out, err) = tokio::join!(read_all(stdout), read_all(stderr));
    let status = child.wait().await?;
    Ok(RawOutput {
        stdout: String::from_utf8_lossy(&out?).into_owned(),
        stderr: String::from_utf8_lossy(&err?).into_owned(),
        code: status.code(),
    })
}

async fn read_all<R: AsyncRead + Unpin>(stream: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut s) = stream {
        s.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Kill and reap; failures only matter for logs.
async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill Copilot process");
    }
}
