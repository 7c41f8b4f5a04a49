//! Locates, drives, and manages the lifecycle of the external `codex` CLI
//! process.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::core::process::configure_tokio_command;
use crate::core::CoreError;

/// Candidate binary names to probe, in order, for the current platform.
#[cfg(target_os = "windows")]
fn candidate_names() -> &'static [&'static str] {
    &["codex.cmd", "codex.ps1", "codex.exe"]
}

#[cfg(not(target_os = "windows"))]
fn candidate_names() -> &'static [&'static str] {
    &["codex"]
}

/// Subcommands this adapter invokes on the CLI. A basename-only process
/// match is only trusted if its argument vector contains one of these,
/// since an unrelated binary that happens to share a basename (`codex`)
/// would otherwise be enumerated and, on a forced restart, killed.
const KNOWN_SUBCOMMANDS: &[&str] = &["login"];

fn cmd_contains_known_subcommand(process: &sysinfo::Process) -> bool {
    let args: Vec<String> = process
        .cmd()
        .iter()
        .map(|arg| arg.to_string_lossy().to_lowercase())
        .collect();
    args_contain_known_subcommand(&args)
}

fn args_contain_known_subcommand(args: &[String]) -> bool {
    args.iter()
        .any(|arg| KNOWN_SUBCOMMANDS.iter().any(|sub| arg == sub))
}

/// Locates, drives, and terminates the `codex` CLI.
pub struct CliAdapter {
    located: Mutex<Option<PathBuf>>,
}

impl Default for CliAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl CliAdapter {
    pub fn new() -> Self {
        Self {
            located: Mutex::new(None),
        }
    }

    /// Locates the CLI binary, probing candidate names via `PATH` and
    /// verifying each with `--version`. The result is cached for the
    /// session.
    pub async fn locate(&self) -> Result<PathBuf, CoreError> {
        if let Some(cached) = self.located.lock().await.clone() {
            return Ok(cached);
        }

        let mut probed = Vec::new();
        for name in candidate_names() {
            probed.push((*name).to_string());
            let Ok(path) = which::which(name) else {
                continue;
            };

            let mut cmd = tokio::process::Command::new(&path);
            cmd.arg("--version");
            configure_tokio_command(&mut cmd);

            match cmd.output().await {
                Ok(output) if output.status.success() => {
                    info!(path = %path.display(), "located codex CLI binary");
                    *self.located.lock().await = Some(path.clone());
                    return Ok(path);
                }
                _ => continue,
            }
        }

        Err(CoreError::CliNotFound { probed })
    }

    /// Spawns `codex login --web`, falling back to `codex login` if `--web`
    /// is unrecognized, and waits for exit or `timeout_duration`.
    pub async fn login(&self, binary: &Path, timeout_duration: Duration) -> Result<(), CoreError> {
        match self.run_login(binary, &["login", "--web"], timeout_duration).await {
            Ok(()) => Ok(()),
            Err(CoreError::LoginFailed(reason)) if reason.contains("unrecognized") => {
                self.run_login(binary, &["login"], timeout_duration).await
            }
            other => other,
        }
    }

    async fn run_login(
        &self,
        binary: &Path,
        args: &[&str],
        timeout_duration: Duration,
    ) -> Result<(), CoreError> {
        let mut cmd = tokio::process::Command::new(binary);
        cmd.args(args);
        configure_tokio_command(&mut cmd);

        let mut child = cmd
            .spawn()
            .map_err(|e| CoreError::LoginFailed(format!("failed to spawn login: {e}")))?;

        match timeout(timeout_duration, child.wait()).await {
            Ok(Ok(status)) if status.success() => {
                info!("codex login completed");
                Ok(())
            }
            Ok(Ok(status)) => Err(CoreError::LoginFailed(format!(
                "login exited with status {status}"
            ))),
            Ok(Err(e)) => Err(CoreError::LoginFailed(format!("login wait failed: {e}"))),
            Err(_) => {
                warn!("codex login timed out, killing process");
                let _ = child.kill().await;
                Err(CoreError::LoginFailed("login timed out".to_string()))
            }
        }
    }

    /// Returns OS PIDs whose executable matches the located binary, always
    /// excluding this process.
    pub fn enumerate_processes(&self, binary: &Path) -> Vec<u32> {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);

        let current_pid = std::process::id();
        let target_name = binary
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase());

        system
            .processes()
            .iter()
            .filter(|(pid, _)| pid.as_u32() != current_pid)
            .filter(|(_, process)| {
                let matches_path = process
                    .exe()
                    .map(|exe| exe == binary)
                    .unwrap_or(false);

                // A basename-only match (no exact path match) is ambiguous:
                // an unrelated process could share the binary's name. Only
                // accept it if the argument vector shows it really is this
                // CLI being driven through one of the subcommands we use.
                let matches_name = target_name
                    .as_deref()
                    .map(|name| process.name().to_string_lossy().to_lowercase() == name)
                    .unwrap_or(false)
                    && cmd_contains_known_subcommand(process);

                matches_path || matches_name
            })
            .map(|(pid, _)| pid.as_u32())
            .collect()
    }

    /// Sends a graceful termination signal, escalating to a forced kill
    /// after `grace` if the process has not exited.
    pub async fn terminate_processes(&self, pids: &[u32], grace: Duration) -> Result<(), CoreError> {
        if pids.is_empty() {
            return Ok(());
        }

        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);

        for pid in pids {
            if let Some(process) = system.process(Pid::from_u32(*pid)) {
                if process.kill_with(sysinfo::Signal::Term).is_none() {
                    process.kill();
                }
            }
        }

        tokio::time::sleep(grace).await;

        system.refresh_processes(ProcessesToUpdate::All, true);
        for pid in pids {
            if let Some(process) = system.process(Pid::from_u32(*pid)) {
                if !process.kill() {
                    warn!(pid, "failed to force-kill CLI process");
                }
            }
        }

        Ok(())
    }
}
