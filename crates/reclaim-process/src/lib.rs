//! Launching short-lived helper processes with bounded capture.
//!
//! The trim helper is expected to print a handful of lines and exit within a
//! second, but a wedged or misbehaving helper must never stall the caller or
//! grow its memory: output is capped per stream and a wall-clock timeout kills
//! the whole process group.

use std::{
    fmt,
    io::{self, Read},
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Captured stdout/stderr, each cut off at the configured byte cap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    /// Either stream produced more than was kept.
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Wall-clock limit; `None` waits forever.
    pub timeout: Option<Duration>,
    /// Per-stream capture cap in bytes.
    pub max_bytes: usize,
    /// Time between the polite termination signal and the hard kill.
    pub kill_grace: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            max_bytes: 64 * 1024,
            kill_grace: Duration::from_millis(200),
        }
    }
}

impl RunOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }
}

/// Program, arguments and working directory of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
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

    pub fn current_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {arg:?}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub status: ExitStatus,
    pub output: CapturedOutput,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl CommandResult {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.status.success()
    }
}

/// Error from [`run_command_checked`].
#[derive(Debug, Error)]
pub enum RunCommandError {
    #[error("failed to run `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },
    #[error("`{command}` exited with {status}{}", stderr_suffix(.stderr))]
    Failed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
}

fn stderr_suffix(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

/// Run `spec` to completion (or timeout), capturing at most `opts.max_bytes`
/// of each output stream.
///
/// Only spawn and wait failures are errors; a non-zero exit or a timeout is
/// reported in the returned [`CommandResult`].
pub fn run_command(spec: &CommandSpec, opts: &RunOptions) -> io::Result<CommandResult> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }

    #[cfg(unix)]
    unsafe {
        use std::os::unix::process::CommandExt;

        // SAFETY: runs in the forked child before exec; `setpgid` is
        // async-signal-safe and allocates nothing.
        cmd.pre_exec(|| {
            if libc::setpgid(0, 0) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let started = Instant::now();
    let mut child = cmd.spawn()?;
    tracing::debug!(target = "reclaim.process", pid = child.id(), command = %spec, "spawned");

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("stdout pipe missing"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("stderr pipe missing"))?;
    let cap = opts.max_bytes;
    let stdout_reader = thread::spawn(move || read_capped(stdout, cap));
    let stderr_reader = thread::spawn(move || read_capped(stderr, cap));

    let (status, timed_out) = match opts.timeout {
        Some(timeout) => wait_with_deadline(&mut child, timeout, opts.kill_grace)?,
        None => (child.wait()?, false),
    };
    if timed_out {
        tracing::info!(
            target = "reclaim.process",
            command = %spec,
            timeout_ms = opts.timeout.map(|t| t.as_millis() as u64),
            "command timed out and was killed"
        );
    }

    let (stdout, stdout_truncated) = join_reader(stdout_reader)?;
    let (stderr, stderr_truncated) = join_reader(stderr_reader)?;

    Ok(CommandResult {
        status,
        output: CapturedOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            truncated: stdout_truncated || stderr_truncated,
        },
        timed_out,
        elapsed: started.elapsed(),
    })
}

/// Like [`run_command`], but a timeout or non-zero exit is an error.
pub fn run_command_checked(
    spec: &CommandSpec,
    opts: &RunOptions,
) -> Result<CommandResult, RunCommandError> {
    let result = run_command(spec, opts).map_err(|source| RunCommandError::Io {
        command: spec.to_string(),
        source,
    })?;
    if result.timed_out {
        return Err(RunCommandError::TimedOut {
            command: spec.to_string(),
            timeout: opts.timeout.unwrap_or_default(),
        });
    }
    if !result.status.success() {
        return Err(RunCommandError::Failed {
            command: spec.to_string(),
            status: result.status,
            stderr: result.output.stderr,
        });
    }
    Ok(result)
}

fn wait_with_deadline(
    child: &mut Child,
    timeout: Duration,
    grace: Duration,
) -> io::Result<(ExitStatus, bool)> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((status, false));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok((kill_tree(child, grace)?, true));
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

fn kill_tree(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        // The child leads its own group (see `pre_exec`), so a negative pid
        // reaches anything it spawned that still holds our pipes.
        let group = -(child.id() as i32);
        unsafe {
            libc::kill(group, libc::SIGTERM);
        }
        let until = Instant::now() + grace;
        while Instant::now() < until {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            thread::sleep(POLL_INTERVAL);
        }
        unsafe {
            libc::kill(group, libc::SIGKILL);
        }
        child.wait()
    }

    #[cfg(windows)]
    {
        let _ = grace;
        let pid = child.id().to_string();
        let _ = Command::new("taskkill")
            .args(["/PID", &pid, "/T", "/F"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        let _ = child.kill();
        child.wait()
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = grace;
        let _ = child.kill();
        child.wait()
    }
}

fn join_reader(
    handle: thread::JoinHandle<io::Result<(Vec<u8>, bool)>>,
) -> io::Result<(Vec<u8>, bool)> {
    handle
        .join()
        .map_err(|_| io::Error::other("output reader thread panicked"))?
}

/// Drain `reader` to EOF, keeping the first `cap` bytes.
///
/// Reading continues past the cap so the child never blocks on a full pipe.
fn read_capped(mut reader: impl Read, cap: usize) -> io::Result<(Vec<u8>, bool)> {
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 4096];
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        let room = cap.saturating_sub(kept.len());
        if n > room {
            truncated = true;
        }
        kept.extend_from_slice(&chunk[..n.min(room)]);
    }
    Ok((kept, truncated))
}

/// Resolve a binary that ships next to the running executable.
///
/// Returns `None` when the current executable cannot be located or the
/// sibling does not exist.
pub fn sibling_executable(name: &str) -> Option<PathBuf> {
    let current = std::env::current_exe().ok()?;
    sibling_of(&current, name)
}

pub fn sibling_of(executable: &Path, name: &str) -> Option<PathBuf> {
    let dir = executable.parent()?;
    let candidate = dir.join(format!("{name}{}", std::env::consts::EXE_SUFFIX));
    candidate.is_file().then_some(candidate)
}
