//! Subprocess primitive used for the compiler, pkg-config, git, and make.
//!
//! A thin builder over [`std::process::Command`] with explicit stdio
//! configuration. Captured output is drained on dedicated threads until EOF
//! on both streams before the child is reaped, so a chatty subprocess can
//! never deadlock against a full pipe.

use std::fmt::{self, Display, Formatter};
use std::io::{self, Read};
use std::process::{self, Stdio};
use std::thread::{self, JoinHandle};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors raised while spawning or waiting on a subprocess.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to read output of `{command}`")]
    Wait {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` {status}")]
    Failed { command: String, status: ExitStatus },
}

/// How a child process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Normal exit, carrying the code.
    Exited(i32),
    /// Terminated by a signal.
    Signaled { signal: i32, core_dumped: bool },
}

impl ExitStatus {
    /// True iff the child exited normally with code 0.
    #[must_use]
    pub fn success(self) -> bool {
        self == Self::Exited(0)
    }
}

impl Display for ExitStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with code {code}"),
            Self::Signaled {
                signal,
                core_dumped,
            } => {
                write!(f, "killed by signal {signal}")?;
                if *core_dumped {
                    f.write_str(" (core dumped)")?;
                }
                Ok(())
            }
        }
    }
}

impl From<process::ExitStatus> for ExitStatus {
    fn from(status: process::ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signaled {
                    signal,
                    core_dumped: status.core_dumped(),
                };
            }
        }
        Self::Exited(status.code().unwrap_or(1))
    }
}

/// Captured result of a completed subprocess.
#[derive(Debug)]
pub struct Output {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// Per-stream I/O configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdioConfig {
    /// Share the parent's stream.
    #[default]
    Inherit,
    /// Capture through a pipe.
    Piped,
    /// Discard.
    Null,
}

impl StdioConfig {
    fn to_stdio(self) -> Stdio {
        match self {
            Self::Inherit => Stdio::inherit(),
            Self::Piped => Stdio::piped(),
            Self::Null => Stdio::null(),
        }
    }
}

/// A command line under construction.
#[derive(Debug, Clone)]
pub struct Command {
    program: String,
    args: Vec<String>,
    cwd: Option<Utf8PathBuf>,
    envs: Vec<(String, String)>,
    stdout: StdioConfig,
    stderr: StdioConfig,
}

impl Command {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
            stdout: StdioConfig::default(),
            stderr: StdioConfig::default(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run the child with `dir` as its working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl AsRef<Utf8Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_owned());
        self
    }

    /// Add an environment override. The child environment is the inherited
    /// one with every overridden name dropped first and the explicit
    /// entries appended in order, so a later entry wins.
    #[must_use]
    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn stdout(mut self, config: StdioConfig) -> Self {
        self.stdout = config;
        self
    }

    #[must_use]
    pub fn stderr(mut self, config: StdioConfig) -> Self {
        self.stderr = config;
        self
    }

    fn to_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Spawn the child process.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Spawn`] when the program cannot be executed.
    pub fn spawn(&self) -> Result<Child, CommandError> {
        debug!("running command: {}", self);

        let mut cmd = process::Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        for (name, value) in &self.envs {
            cmd.env_remove(name);
            cmd.env(name, value);
        }
        cmd.stdout(self.stdout.to_stdio());
        cmd.stderr(self.stderr.to_stdio());

        let inner = cmd.spawn().map_err(|source| CommandError::Spawn {
            command: self.to_line(),
            source,
        })?;
        Ok(Child {
            inner,
            line: self.to_line(),
        })
    }

    /// Spawn with inherited stdio and wait for completion.
    ///
    /// # Errors
    ///
    /// Returns an error when the child cannot be spawned or reaped.
    pub fn run(&self) -> Result<ExitStatus, CommandError> {
        self.spawn()?.wait()
    }

    /// Like [`Command::run`], but a nonzero status is an error carrying the
    /// rendered command line.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Failed`] when the child does not exit with
    /// code 0.
    pub fn run_checked(&self) -> Result<(), CommandError> {
        let status = self.run()?;
        if status.success() {
            Ok(())
        } else {
            Err(CommandError::Failed {
                command: self.to_line(),
                status,
            })
        }
    }

    /// Spawn with both streams piped and capture everything.
    ///
    /// # Errors
    ///
    /// Returns an error when the child cannot be spawned or its output
    /// cannot be read.
    pub fn output(&self) -> Result<Output, CommandError> {
        let mut piped = self.clone();
        piped.stdout = StdioConfig::Piped;
        piped.stderr = StdioConfig::Piped;
        piped.spawn()?.wait_with_output()
    }

}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

/// A spawned child process.
#[derive(Debug)]
pub struct Child {
    inner: process::Child,
    line: String,
}

impl Child {
    /// Wait for the child to terminate.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Wait`] when reaping fails.
    pub fn wait(mut self) -> Result<ExitStatus, CommandError> {
        let status = self.inner.wait().map_err(|source| CommandError::Wait {
            command: self.line.clone(),
            source,
        })?;
        Ok(status.into())
    }

    /// Drain stdout and stderr concurrently until EOF on both, then reap
    /// the child.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Wait`] when reading or reaping fails.
    pub fn wait_with_output(mut self) -> Result<Output, CommandError> {
        fn reader_thread(stream: Option<impl Read + Send + 'static>) -> JoinHandle<io::Result<String>> {
            thread::spawn(move || {
                let mut buf = String::new();
                if let Some(mut stream) = stream {
                    stream.read_to_string(&mut buf)?;
                }
                Ok(buf)
            })
        }

        let stdout_handle = reader_thread(self.inner.stdout.take());
        let stderr_handle = reader_thread(self.inner.stderr.take());

        let status = self.inner.wait().map_err(|source| CommandError::Wait {
            command: self.line.clone(),
            source,
        })?;

        let join = |handle: JoinHandle<io::Result<String>>| -> Result<String, CommandError> {
            handle
                .join()
                .unwrap_or_else(|_| Ok(String::new()))
                .map_err(|source| CommandError::Wait {
                    command: self.line.clone(),
                    source,
                })
        };
        let stdout = join(stdout_handle)?;
        let stderr = join(stderr_handle)?;

        Ok(Output {
            status: status.into(),
            stdout,
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_and_stderr() {
        let out = Command::new("sh")
            .args(["-c", "echo out; echo err >&2"])
            .output()
            .expect("spawn sh");
        assert!(out.status.success());
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
    }

    #[test]
    fn reports_exit_code() {
        let out = Command::new("sh")
            .args(["-c", "exit 3"])
            .output()
            .expect("spawn sh");
        assert_eq!(out.status, ExitStatus::Exited(3));
        assert!(!out.status.success());
        assert_eq!(out.status.to_string(), "exited with code 3");
    }

    #[test]
    fn explicit_env_entries_override_inherited_ones() {
        let out = Command::new("sh")
            .args(["-c", "printf '%s' \"$CABIN_TEST_ENV\""])
            .env("CABIN_TEST_ENV", "first")
            .env("CABIN_TEST_ENV", "second")
            .output()
            .expect("spawn sh");
        assert_eq!(out.stdout, "second");
    }

    #[test]
    fn runs_in_working_directory() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = Utf8Path::from_path(dir.path()).expect("utf-8 temp dir");
        let out = Command::new("pwd")
            .current_dir(path)
            .output()
            .expect("spawn pwd");
        let reported = std::fs::canonicalize(out.stdout.trim()).expect("canonical pwd");
        let expected = std::fs::canonicalize(dir.path()).expect("canonical temp dir");
        assert_eq!(reported, expected);
    }

    #[test]
    fn spawn_failure_names_the_command() {
        let err = Command::new("cabin-does-not-exist")
            .arg("--flag")
            .run()
            .expect_err("must fail");
        assert!(err
            .to_string()
            .contains("failed to spawn `cabin-does-not-exist --flag`"));
    }

    #[cfg(unix)]
    #[test]
    fn reports_signal_termination() {
        let out = Command::new("sh")
            .args(["-c", "kill -TERM $$"])
            .output()
            .expect("spawn sh");
        assert_eq!(
            out.status,
            ExitStatus::Signaled {
                signal: 15,
                core_dumped: false
            }
        );
        assert_eq!(out.status.to_string(), "killed by signal 15");
    }
}
