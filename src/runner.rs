//! Execution of external commands.
//!
//! Signature checks, crontab edits and desktop notifications all go through
//! [`CommandRunner`], so the rest of the crate never spawns processes itself
//! and tests can substitute a scripted runner.

use process_control::{ChildExt, Control};
use std::ffi::OsString;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::process::{ChildStdin, Command, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },
    #[error("IO error while running {program}: {source}")]
    Io {
        program: PathBuf,
        source: std::io::Error,
    },
    #[error("{program} did not finish within {limit:?} and was killed")]
    TimedOut { program: PathBuf, limit: Duration },
}

/// One external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Bytes fed to the child's stdin, which is closed afterwards.
    pub stdin: Option<Vec<u8>>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        CommandSpec {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Human readable rendering for logs.
    pub fn display(&self) -> String {
        let mut rendered = self.program.display().to_string();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(&arg.to_string_lossy());
        }
        rendered
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit status; `-1` when the process was terminated by a signal.
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Captured stdout followed by captured stderr.
    pub fn text(&self) -> String {
        let mut merged = self.stdout.clone();
        merged.extend_from_slice(&self.stderr);
        String::from_utf8_lossy(&merged).into_owned()
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Runs a command to completion and reports its exit status and output.
///
/// A non-zero exit status is a normal result, not an error. Errors are
/// reserved for failing to start the process or for it overrunning its
/// time limit.
pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunError>;
}

/// Runs commands as real child processes with a hard time limit.
///
/// On expiry the child is killed and reaped before returning, so no handle
/// or zombie outlives the call.
pub struct ProcessRunner {
    time_limit: Duration,
}

impl ProcessRunner {
    pub const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(30);

    pub fn new(time_limit: Duration) -> Self {
        ProcessRunner { time_limit }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        ProcessRunner::new(Self::DEFAULT_TIME_LIMIT)
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunError> {
        debug!("Running {}", spec.display());

        let io_error = |source| RunError::Io {
            program: spec.program.clone(),
            source,
        };

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RunError::Spawn {
                program: spec.program.clone(),
                source,
            })?;

        // Fed from a separate thread so the time limit also covers a child
        // that never drains its stdin.
        let feeder = match (&spec.stdin, child.stdin.take()) {
            (Some(input), Some(stdin)) => Some(feed_stdin(stdin, input.clone())),
            _ => None,
        };

        let output = child
            .controlled_with_output()
            .time_limit(self.time_limit)
            .terminate_for_timeout()
            .wait()
            .map_err(io_error)?;

        // The child is gone here, so a blocked writer has already failed.
        let fed = feeder.map(|handle| {
            handle.join().unwrap_or_else(|_| {
                Err(std::io::Error::other("stdin writer thread panicked"))
            })
        });

        let output = output.ok_or_else(|| RunError::TimedOut {
            program: spec.program.clone(),
            limit: self.time_limit,
        })?;

        // A child may exit without reading all of its input.
        if let Some(Err(e)) = fed
            && e.kind() != ErrorKind::BrokenPipe
        {
            return Err(io_error(e));
        }

        let exit_code = output
            .status
            .code()
            .and_then(|code| i32::try_from(code).ok())
            .unwrap_or(-1);

        debug!("{} exited with {}", spec.program.display(), exit_code);

        Ok(CommandOutput {
            exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// Write `input` to the child's stdin and close it.
fn feed_stdin(mut stdin: ChildStdin, input: Vec<u8>) -> JoinHandle<std::io::Result<()>> {
    std::thread::spawn(move || stdin.write_all(&input))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_and_exit_code() {
        let runner = ProcessRunner::default();
        let spec = CommandSpec::new("/bin/sh").arg("-c").arg("echo hello");

        let out = runner.run(&spec).unwrap();

        assert!(out.success());
        assert_eq!(out.text().trim(), "hello");
    }

    #[test]
    fn non_zero_exit_is_not_an_error() {
        let runner = ProcessRunner::default();
        let spec = CommandSpec::new("/bin/sh").arg("-c").arg("exit 3");

        let out = runner.run(&spec).unwrap();

        assert_eq!(out.exit_code, 3);
        assert!(!out.success());
    }

    #[test]
    fn stderr_is_captured_after_stdout() {
        let runner = ProcessRunner::default();
        let spec = CommandSpec::new("/bin/sh")
            .arg("-c")
            .arg("echo out; echo err 1>&2");

        let out = runner.run(&spec).unwrap();

        assert_eq!(out.text(), "out\nerr\n");
        assert_eq!(out.stdout_text(), "out\n");
    }

    #[test]
    fn large_stdin_and_large_stdout_do_not_deadlock() {
        let runner = ProcessRunner::new(Duration::from_secs(10));
        let spec = CommandSpec::new("/bin/sh")
            .arg("-c")
            .arg("head -c 200000 /dev/zero; cat >/dev/null")
            .stdin(vec![b'x'; 200_000]);

        let out = runner.run(&spec).unwrap();

        assert!(out.success());
        assert_eq!(out.stdout.len(), 200_000);
    }

    #[test]
    fn child_that_ignores_stdin_is_still_killed_on_time() {
        let runner = ProcessRunner::new(Duration::from_millis(300));
        let spec = CommandSpec::new("/bin/sleep")
            .arg("10")
            .stdin(vec![b'x'; 200_000]);

        let start = std::time::Instant::now();
        let result = runner.run(&spec);

        assert!(matches!(result, Err(RunError::TimedOut { .. })));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn unread_stdin_is_not_an_error() {
        let runner = ProcessRunner::default();
        let spec = CommandSpec::new("/bin/true").stdin(vec![b'x'; 200_000]);

        let out = runner.run(&spec).unwrap();

        assert!(out.success());
    }

    #[test]
    fn stdin_is_fed_and_closed() {
        let runner = ProcessRunner::default();
        let spec = CommandSpec::new("/bin/cat").stdin("line one\nline two\n");

        let out = runner.run(&spec).unwrap();

        assert_eq!(out.text(), "line one\nline two\n");
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let runner = ProcessRunner::default();
        let spec = CommandSpec::new("/nonexistent/program");

        let result = runner.run(&spec);

        assert!(matches!(result, Err(RunError::Spawn { .. })));
    }

    #[test]
    fn overrunning_command_is_killed() {
        let runner = ProcessRunner::new(Duration::from_millis(200));
        let spec = CommandSpec::new("/bin/sleep").arg("10");

        let start = std::time::Instant::now();
        let result = runner.run(&spec);

        assert!(matches!(result, Err(RunError::TimedOut { .. })));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn display_joins_program_and_args() {
        let spec = CommandSpec::new("/usr/bin/gpgv").arg("--keyring").arg("k.gpg");
        assert_eq!(spec.display(), "/usr/bin/gpgv --keyring k.gpg");
    }
}
