//! Blocking subprocess execution with a deadline.
//!
//! Each call spawns exactly one process, drains both pipes on helper threads
//! and polls for exit until the timeout elapses. A timed-out process is
//! killed and reaped before the error is returned. Pipe output is only
//! awaited for what is left of the same deadline: a descendant that keeps a
//! pipe open never holds the caller past the timeout.

use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use tempfile::{Builder, TempPath};

use super::{InterpreterError, InterpreterResult};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Writes `source` to a scoped `.js` file; the file is removed when the
/// returned path is dropped.
pub(crate) fn write_script(source: &str) -> InterpreterResult<TempPath> {
    write_temp_file(source, ".js")
}

pub(crate) fn write_temp_file(contents: &str, suffix: &str) -> InterpreterResult<TempPath> {
    let mut file = Builder::new()
        .prefix("mediabridge-")
        .suffix(suffix)
        .tempfile()?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;
    Ok(file.into_temp_path())
}

/// Runs `program args...` and returns its trimmed stdout.
///
/// A non-zero exit is an error carrying stderr; stderr on a zero exit is only
/// logged as a warning.
pub(crate) fn run_command(
    program: &Path,
    args: &[String],
    timeout: Duration,
) -> InterpreterResult<String> {
    log::debug!("command line: {}", shell_quote(program, args));

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| InterpreterError::Spawn {
            program: program.to_path_buf(),
            source,
        })?;

    let started = Instant::now();
    let stdout_reader = spawn_reader(child.stdout.take());
    let stderr_reader = spawn_reader(child.stderr.take());

    let Some(status) = wait_with_deadline(&mut child, started, timeout)? else {
        return Err(InterpreterError::Timeout(timeout));
    };

    let (Some(stdout), Some(stderr)) = (
        collect(&stdout_reader, started, timeout),
        collect(&stderr_reader, started, timeout),
    ) else {
        log::debug!("output pipes still open after {timeout:?}");
        return Err(InterpreterError::Timeout(timeout));
    };

    if !status.success() {
        return Err(InterpreterError::ProcessFailure {
            code: status.code(),
            stderr: stderr.trim().to_string(),
        });
    }

    if !stderr.trim().is_empty() {
        log::warn!("JS console error msg:\n{}", stderr.trim());
    }

    Ok(stdout.trim().to_string())
}

/// The slice of process control the deadline loop needs.
trait Supervised {
    fn id(&self) -> u32;
    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>>;
    fn kill(&mut self) -> io::Result<()>;
    fn wait(&mut self) -> io::Result<ExitStatus>;
}

impl Supervised for Child {
    fn id(&self) -> u32 {
        Child::id(self)
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        Child::try_wait(self)
    }

    fn kill(&mut self) -> io::Result<()> {
        Child::kill(self)
    }

    fn wait(&mut self) -> io::Result<ExitStatus> {
        Child::wait(self)
    }
}

/// Polls until exit or deadline. The child is killed and reaped on timeout
/// and when polling itself fails.
fn wait_with_deadline(
    child: &mut impl Supervised,
    started: Instant,
    timeout: Duration,
) -> InterpreterResult<Option<ExitStatus>> {
    loop {
        let status = match child.try_wait() {
            Ok(status) => status,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err.into());
            }
        };
        if let Some(status) = status {
            return Ok(Some(status));
        }
        if started.elapsed() >= timeout {
            log::debug!("killing process {} after {:?}", child.id(), timeout);
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Drains `pipe` on a detached thread. The receiver yields the text once the
/// pipe reaches EOF, or disconnects straight away when there is no pipe.
fn spawn_reader<R>(pipe: Option<R>) -> Receiver<String>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    if let Some(mut pipe) = pipe {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = pipe.read_to_end(&mut buffer);
            let _ = tx.send(String::from_utf8_lossy(&buffer).into_owned());
        });
    }
    rx
}

/// `None` when the pipe is still open at the deadline.
fn collect(reader: &Receiver<String>, started: Instant, timeout: Duration) -> Option<String> {
    match reader.recv_timeout(timeout.saturating_sub(started.elapsed())) {
        Ok(text) => Some(text),
        Err(RecvTimeoutError::Disconnected) => Some(String::new()),
        Err(RecvTimeoutError::Timeout) => None,
    }
}

/// Queries `program --version`, returning the first dotted number printed.
pub(crate) fn probe_version(program: &Path) -> Option<String> {
    let output = match Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
    {
        Ok(output) => output,
        Err(err) => {
            log::debug!("{} is not available: {err}", program.display());
            return None;
        }
    };

    if !output.status.success() {
        return None;
    }

    let text = String::from_utf8_lossy(&output.stdout);
    extract_version(&text)
}

pub(crate) fn extract_version(text: &str) -> Option<String> {
    static VERSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)*)").unwrap());
    VERSION_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub(crate) fn version_tuple(version: &str) -> Vec<u64> {
    version
        .split('.')
        .map(|part| part.parse().unwrap_or(0))
        .collect()
}

pub(crate) fn version_at_least(version: &str, minimum: &[u64]) -> bool {
    let mut parts = version_tuple(version);
    let width = parts.len().max(minimum.len());
    parts.resize(width, 0);
    let mut minimum = minimum.to_vec();
    minimum.resize(width, 0);
    parts >= minimum
}

fn shell_quote(program: &Path, args: &[String]) -> String {
    std::iter::once(program.display().to_string())
        .chain(args.iter().cloned())
        .map(|arg| {
            if !arg.is_empty()
                && arg
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || "-_./=:@,+".contains(c))
            {
                arg
            } else {
                format!("'{}'", arg.replace('\'', r"'\''"))
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
