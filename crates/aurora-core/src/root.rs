//! Persistent superuser shell
//!
//! A [`Root`] keeps one shell process alive and feeds it commands over stdin.
//! Each command is followed by a sentinel echo on both stdout and stderr, so
//! the output of one command can be told apart from the next without closing
//! the pipe. Once any I/O fails, or a command outlives the configured
//! timeout, the instance is terminated for good.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use wait_timeout::ChildExt;

const EXIT_GRACE: Duration = Duration::from_secs(1);
const STDERR_WAIT: Duration = Duration::from_millis(500);
const PROBE: &str = "aurora-root-probe";

/// A serialized privileged command channel.
pub trait Shell: Send {
    /// Run `command` and return its trimmed stdout, or `None` on I/O failure.
    fn exec(&mut self, command: &str) -> Option<String>;

    /// Stderr produced by the last command, if any.
    fn read_error(&mut self) -> Option<String>;

    fn is_acquired(&self) -> bool;

    fn is_terminated(&self) -> bool;
}

/// Hands out fresh shells, e.g. after a previous grant died.
pub trait RootProvider: Send + Sync {
    fn acquire(&self) -> Box<dyn Shell>;
}

/// Spawns the configured superuser command.
#[derive(Debug, Clone)]
pub struct SuProvider {
    command: String,
    timeout: Option<Duration>,
}

impl SuProvider {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: None,
        }
    }

    /// Bound every command of the shells handed out.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl RootProvider for SuProvider {
    fn acquire(&self) -> Box<dyn Shell> {
        Box::new(Root::acquire_with_timeout(&self.command, self.timeout))
    }
}

/// Forward the lines of `reader` from a background thread.
fn drain(name: &str, reader: impl Read + Send + 'static) -> Option<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            for line in BufReader::new(reader).lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .ok()?;
    Some(rx)
}

#[derive(Debug)]
pub struct Root {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<mpsc::Receiver<String>>,
    stderr: Option<mpsc::Receiver<String>>,
    last_error: Option<String>,
    timeout: Option<Duration>,
    token: String,
    counter: u64,
    acquired: bool,
    terminated: bool,
}

impl Root {
    /// Spawn `command` (program plus whitespace-separated arguments) and check
    /// that it answers an echo. A failed spawn or probe leaves the instance
    /// unacquired and terminated.
    pub fn acquire(command: &str) -> Self {
        Self::acquire_with_timeout(command, None)
    }

    /// Like [`Root::acquire`], failing any command (the probe included)
    /// that runs longer than `timeout`.
    pub fn acquire_with_timeout(command: &str, timeout: Option<Duration>) -> Self {
        let mut root = Self::spawn(command);
        root.timeout = timeout;
        if root.acquired {
            let probe = root.exec(&format!("echo {PROBE}"));
            if probe.as_deref() != Some(PROBE) {
                tracing::warn!(command, "Root probe failed");
                root.terminate();
            }
        }
        root
    }

    /// Spawn `command` without probing it.
    pub fn spawn(command: &str) -> Self {
        let mut root = Self {
            child: None,
            stdin: None,
            stdout: None,
            stderr: None,
            last_error: None,
            timeout: None,
            token: format!("{:016x}", rand::random::<u64>()),
            counter: 0,
            acquired: false,
            terminated: false,
        };

        let mut parts = command.split_whitespace();
        let Some(program) = parts.next() else {
            root.terminated = true;
            return root;
        };

        let spawned = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(command, error = %e, "Failed to spawn shell");
                root.terminated = true;
                return root;
            }
        };

        root.stdin = child.stdin.take();
        root.stdout = child.stdout.take().and_then(|out| drain("root-stdout", out));
        root.stderr = child.stderr.take().and_then(|err| drain("root-stderr", err));
        root.child = Some(child);
        root.acquired = root.stdin.is_some() && root.stdout.is_some();
        root.terminated = !root.acquired;
        root
    }

    fn run(&mut self, command: &str, sentinel: &str) -> io::Result<String> {
        let closed = || io::Error::new(io::ErrorKind::BrokenPipe, "shell is closed");

        let stdin = self.stdin.as_mut().ok_or_else(closed)?;
        writeln!(stdin, "{command}")?;
        writeln!(stdin, "echo {sentinel}")?;
        writeln!(stdin, "echo {sentinel} >&2")?;
        stdin.flush()?;

        let stdout = self.stdout.as_ref().ok_or_else(closed)?;
        let exited = || {
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Shell exited before the command finished",
            )
        };
        let deadline = self.timeout.map(|t| (t, Instant::now() + t));
        let mut output = String::new();
        loop {
            let line = match deadline {
                Some((timeout, at)) => {
                    match stdout.recv_timeout(at.saturating_duration_since(Instant::now())) {
                        Ok(line) => line,
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            return Err(io::Error::new(
                                io::ErrorKind::TimedOut,
                                format!("Command timed out after {timeout:?}"),
                            ));
                        }
                        Err(mpsc::RecvTimeoutError::Disconnected) => return Err(exited()),
                    }
                }
                None => stdout.recv().map_err(|_| exited())?,
            };
            // Output without a trailing newline lands on the sentinel line.
            if let Some(before) = line.strip_suffix(sentinel) {
                output.push_str(before);
                break;
            }
            output.push_str(&line);
            output.push('\n');
        }

        self.last_error = self.collect_stderr(sentinel);
        Ok(output.trim().to_string())
    }

    fn collect_stderr(&self, sentinel: &str) -> Option<String> {
        let rx = self.stderr.as_ref()?;
        let deadline = Instant::now() + STDERR_WAIT;
        let mut text = String::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Ok(line) = rx.recv_timeout(remaining) else {
                break;
            };
            if let Some(before) = line.strip_suffix(sentinel) {
                text.push_str(before);
                break;
            }
            if line.contains(&self.token) {
                // Leftover sentinel of an earlier command that timed out.
                text.clear();
                continue;
            }
            text.push_str(&line);
            text.push('\n');
        }
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }

    fn terminate(&mut self) {
        self.acquired = false;
        self.terminated = true;
        self.stdin = None;
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Shell for Root {
    fn exec(&mut self, command: &str) -> Option<String> {
        if self.terminated {
            return None;
        }
        self.counter += 1;
        let sentinel = format!("__aurora_{}_{}__", self.token, self.counter);
        match self.run(command, &sentinel) {
            Ok(output) => Some(output),
            Err(e) => {
                tracing::warn!(error = %e, "Shell I/O failed, terminating");
                self.terminate();
                self.last_error = Some(e.to_string());
                None
            }
        }
    }

    fn read_error(&mut self) -> Option<String> {
        self.last_error.take()
    }

    fn is_acquired(&self) -> bool {
        self.acquired
    }

    fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl Drop for Root {
    fn drop(&mut self) {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = writeln!(stdin, "exit");
            let _ = stdin.flush();
        }
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            match child.wait_timeout(EXIT_GRACE) {
                Ok(Some(_)) => {}
                _ => {
                    let _ = child.kill();
                    let _ = child.wait();
                }
            }
        }
    }
}
