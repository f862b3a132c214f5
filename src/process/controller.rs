//! Target process lifecycle
//!
//! Spawns the debugger (or runtime) with a target script, hands its pipes
//! to the input writer and line streams, and shuts it down with a SIGTERM
//! that escalates to a kill after a grace period.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::common::config::LauncherConfig;
use crate::common::{Error, Result};

/// What to launch: `program [args...] script [script_args...]`
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub script: PathBuf,
    pub script_args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl LaunchSpec {
    /// Launch `script` directly with `program` and no extra arguments
    pub fn new(program: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            script: script.into(),
            script_args: Vec::new(),
            working_dir: None,
        }
    }

    /// Launch `script` the way the configured launcher does
    pub fn from_config(launcher: &LauncherConfig, script: impl Into<PathBuf>) -> Self {
        Self {
            program: launcher.program.clone(),
            args: launcher.args.clone(),
            script: script.into(),
            script_args: launcher.script_args.clone(),
            working_dir: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn script_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    /// Find the executable, searching PATH for bare names
    fn resolve_program(&self) -> Result<PathBuf> {
        let is_bare = self.program.components().count() == 1 && !self.program.is_absolute();
        if is_bare {
            return which::which(&self.program)
                .map_err(|e| Error::spawn(&self.program_name(), format!("not found in PATH ({e})")));
        }
        if self.program.is_file() {
            Ok(self.program.clone())
        } else {
            Err(Error::spawn(&self.program_name(), "executable does not exist"))
        }
    }
}

/// Pipes of a freshly spawned target
pub struct TargetPipes {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Owns the target process
pub struct ProcessController {
    child: Child,
    program: String,
    pid: Option<u32>,
    exit: Option<ExitStatus>,
    grace: Duration,
}

impl ProcessController {
    /// Spawn the target and take its pipes
    pub fn spawn(spec: &LaunchSpec, grace: Duration) -> Result<(Self, TargetPipes)> {
        let program = spec.resolve_program()?;
        if !spec.script.exists() {
            return Err(Error::spawn(
                &spec.program_name(),
                format!("script '{}' not found", spec.script.display()),
            ));
        }

        let mut cmd = Command::new(&program);
        cmd.args(&spec.args)
            .arg(&spec.script)
            .args(&spec.script_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::spawn(&spec.program_name(), e))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::spawn(&spec.program_name(), "failed to get target stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::spawn(&spec.program_name(), "failed to get target stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::spawn(&spec.program_name(), "failed to get target stderr"))?;

        let pid = child.id();
        tracing::info!(
            program = %program.display(),
            script = %spec.script.display(),
            pid = ?pid,
            "Spawned target"
        );

        let controller = Self {
            child,
            program: spec.program_name(),
            pid,
            exit: None,
            grace,
        };
        Ok((controller, TargetPipes { stdin, stdout, stderr }))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Exit status, once the target has been reaped
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit
    }

    /// Reap the target if it has exited, without waiting
    pub fn has_exited(&mut self) -> bool {
        self.poll_exit().is_some()
    }

    /// Wait for the target to exit
    ///
    /// Cancel safe, so it can sit in a `select!` next to other work.
    pub async fn wait_exit(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.exit {
            return Ok(status);
        }
        let status = self.child.wait().await?;
        self.record_exit(status);
        Ok(status)
    }

    /// Ask the target to stop, killing it if it ignores the request
    ///
    /// A no-op once the target has exited.
    pub async fn terminate(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.poll_exit() {
            return Ok(status);
        }

        #[cfg(unix)]
        if let Some(pid) = self.pid {
            tracing::debug!(pid, "Sending SIGTERM to target");
            // SAFETY: pid belongs to our unreaped child
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            match tokio::time::timeout(self.grace, self.child.wait()).await {
                Ok(status) => {
                    let status = status?;
                    self.record_exit(status);
                    return Ok(status);
                }
                Err(_) => {
                    tracing::warn!(
                        pid,
                        grace_ms = self.grace.as_millis() as u64,
                        "Target ignored SIGTERM, killing"
                    );
                }
            }
        }

        self.child.kill().await?;
        let status = self.child.wait().await?;
        self.record_exit(status);
        Ok(status)
    }

    fn poll_exit(&mut self) -> Option<ExitStatus> {
        if self.exit.is_none() {
            if let Ok(Some(status)) = self.child.try_wait() {
                self.record_exit(status);
            }
        }
        self.exit
    }

    fn record_exit(&mut self, status: ExitStatus) {
        if self.exit.is_none() {
            tracing::info!(pid = ?self.pid, %status, "Target exited");
            self.exit = Some(status);
        }
    }
}

impl Drop for ProcessController {
    fn drop(&mut self) {
        // Best-effort since we can't await in drop
        if self.exit.is_none() {
            let _ = self.child.start_kill();
        }
    }
}

/// True when `path` names something the launcher can find
pub fn program_exists(path: &Path) -> bool {
    LaunchSpec::new(path, "").resolve_program().is_ok()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::InputWriter;

    #[test]
    fn test_missing_program_is_spawn_error() {
        let spec = LaunchSpec::new("/definitely/not/here/lldb", "script.js");
        let err = ProcessController::spawn(&spec, Duration::from_secs(1)).err().unwrap();
        assert!(matches!(err, Error::Spawn { .. }));
    }

    #[test]
    fn test_missing_script_is_spawn_error() {
        let spec = LaunchSpec::new("sh", "/definitely/not/here/scenario.js");
        let err = ProcessController::spawn(&spec, Duration::from_secs(1)).err().unwrap();
        assert!(err.to_string().contains("not found"), "{err}");
    }

    #[test]
    fn test_bare_names_resolve_through_path() {
        assert!(program_exists(Path::new("sh")));
        assert!(!program_exists(Path::new("no-such-debugger-binary")));
    }

    #[tokio::test]
    async fn test_write_after_exit_fails() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("exit.sh");
        std::fs::write(&script, "exit 0\n").unwrap();

        let (mut controller, pipes) =
            ProcessController::spawn(&LaunchSpec::new("sh", &script), Duration::from_secs(1))
                .unwrap();
        let status = controller.wait_exit().await.unwrap();
        assert!(status.success());
        assert!(controller.has_exited());

        let writer = InputWriter::spawn(pipes.stdin);
        let err = writer.send_line("ping").await.unwrap_err();
        assert!(matches!(err, Error::Write(_)));
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("sleep.sh");
        std::fs::write(&script, "sleep 30\n").unwrap();

        let (mut controller, _output) =
            ProcessController::spawn(&LaunchSpec::new("sh", &script), Duration::from_secs(1))
                .unwrap();
        let first = controller.terminate().await.unwrap();
        assert!(!first.success());
        let second = controller.terminate().await.unwrap();
        assert_eq!(first, second);
    }
}
