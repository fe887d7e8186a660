use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::ProcessError;
use crate::output::{Accumulator, pump};

/// How long to wait for pipe readers after the process group is gone.
const READER_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// One external command to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Written to the child's stdin, which is then closed. `None` gives the
    /// child an empty stdin.
    pub stdin: Option<String>,
    pub cwd: Option<PathBuf>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Run `spec` until it exits or `deadline` passes.
///
/// The child leads its own process group. Once the child is reaped (or the
/// deadline hits) the whole group is killed, so grandchildren cannot outlive
/// the request. Output captured up to that point is returned either way.
pub async fn run_with_deadline(
    spec: &ProcessSpec,
    deadline: Instant,
    capture_limit: usize,
) -> Result<ProcessOutcome, ProcessError> {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);
    if let Some(cwd) = &spec.cwd {
        command.current_dir(cwd);
    }

    let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
        program: spec.program.clone(),
        source,
    })?;
    let pid = child.id();
    trace!(program = %spec.program, pid, "spawned");
    // Kills the group if this future is dropped before the child is reaped.
    let mut group = GroupGuard::new(pid);

    let stdout = Accumulator::new(capture_limit);
    let stderr = Accumulator::new(capture_limit);
    let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(3);
    if let Some(out) = child.stdout.take() {
        readers.push(tokio::spawn(pump(out, stdout.clone())));
    }
    if let Some(err) = child.stderr.take() {
        readers.push(tokio::spawn(pump(err, stderr.clone())));
    }
    if let (Some(mut pipe), Some(input)) = (child.stdin.take(), spec.stdin.clone()) {
        readers.push(tokio::spawn(async move {
            // A child that exits without reading its input closes the pipe.
            if let Err(e) = pipe.write_all(input.as_bytes()).await {
                trace!(error = %e, "stdin write ended early");
            }
            drop(pipe);
        }));
    }

    let (status, timed_out) = match tokio::time::timeout_at(deadline, child.wait()).await {
        Ok(status) => (
            status.map_err(|source| ProcessError::Wait {
                program: spec.program.clone(),
                source,
            })?,
            false,
        ),
        Err(_) => {
            debug!(program = %spec.program, pid, "deadline reached, killing process group");
            kill_group(pid);
            if let Err(e) = child.kill().await {
                trace!(error = %e, "child already gone");
            }
            let status = child.wait().await.map_err(|source| ProcessError::Wait {
                program: spec.program.clone(),
                source,
            })?;
            (status, true)
        }
    };
    group.release();

    for reader in readers {
        let abort = reader.abort_handle();
        if tokio::time::timeout(READER_DRAIN_GRACE, reader).await.is_err() {
            warn!(program = %spec.program, "output reader did not finish, aborting");
            abort.abort();
        }
    }

    Ok(ProcessOutcome {
        stdout: stdout.text(),
        stderr: stderr.text(),
        exit_code: status.code(),
        timed_out,
    })
}

/// Owns the child's process group until [`GroupGuard::release`].
struct GroupGuard {
    pid: Option<u32>,
    armed: bool,
}

impl GroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self { pid, armed: true }
    }

    /// Kill the group now and disarm the drop hook.
    fn release(&mut self) {
        kill_group(self.pid);
        self.armed = false;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if self.armed {
            debug!(pid = self.pid, "run abandoned, killing process group");
            kill_group(self.pid);
        }
    }
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    let Some(pid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
        return;
    };
    // SAFETY: killpg has no memory-safety preconditions. The group id is the
    // child's own pid because it was spawned with process_group(0).
    let rc = unsafe { libc::killpg(pid, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(pid, error = %err, "killpg failed");
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}
