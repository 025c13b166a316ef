/*!
Piped child-process execution with a hard deadline and bounded output.

Used by the subprocess transports: the request body is fed to the child's stdin from a
helper thread, stdout/stderr are drained by helper threads into bounded buffers, and the
child is waited on with a deadline. On deadline the child gets SIGTERM, a short grace
period, then SIGKILL. The child is reaped on every path and all pipe handles are owned,
so they close when this function returns.
*/

use std::ffi::OsString;
use std::fmt;
use std::io::{self, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

#[cfg(unix)]
use nix::sys::signal::{kill, Signal};
#[cfg(unix)]
use nix::unistd::Pid;
use wait_timeout::ChildExt;

use crate::util::TextBuf;

const STDERR_CAP: usize = 8 * 1024;
const TERM_GRACE: Duration = Duration::from_millis(250);
const DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub enum ExecError {
    Spawn { program: String, source: io::Error },
    Wait { program: String, source: io::Error },
    Timeout { program: String, after: Duration },
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecError::Spawn { program, source } => {
                if source.kind() == io::ErrorKind::NotFound {
                    write!(f, "cannot execute '{program}': not found")
                } else {
                    write!(f, "cannot execute '{program}': {source}")
                }
            }
            ExecError::Wait { program, source } => {
                write!(f, "waiting for '{program}' failed: {source}")
            }
            ExecError::Timeout { program, after } => {
                write!(f, "'{program}' timed out after {}s", after.as_secs())
            }
        }
    }
}

impl std::error::Error for ExecError {}

#[derive(Debug)]
pub struct ExecRequest {
    program: OsString,
    args: Vec<OsString>,
    stdin: Vec<u8>,
    timeout: Duration,
    stdout_limit: usize,
}

impl ExecRequest {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: Vec::new(),
            timeout: Duration::from_secs(60),
            stdout_limit: 4 * 1024 * 1024,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = input.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn stdout_limit(mut self, limit: usize) -> Self {
        self.stdout_limit = limit;
        self
    }

    fn program_display(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }
}

#[derive(Debug)]
pub struct ExecOutput {
    pub status: ExitStatus,
    pub duration: Duration,
    pub stdout: Vec<u8>,
    pub stdout_truncated: bool,
    pub stderr: String,
}

enum Drained {
    Stdout(TextBuf),
    Stderr(TextBuf),
}

fn spawn_drain<R, F>(mut src: R, limit: usize, tx: mpsc::Sender<Drained>, wrap: F)
where
    R: Read + Send + 'static,
    F: FnOnce(TextBuf) -> Drained + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = TextBuf::with_limit(limit);
        let mut tmp = [0u8; 4096];
        loop {
            match src.read(&mut tmp) {
                Ok(0) => break,
                Ok(n) => buf.push_bytes(&tmp[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        let _ = tx.send(wrap(buf));
    });
}

/// Cooperative termination: TERM, short grace, then KILL. Always reaps.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        let pid = Pid::from_raw(child.id() as i32);
        let _ = kill(pid, Signal::SIGTERM);
        match child.wait_timeout(TERM_GRACE) {
            Ok(Some(_)) => return,
            _ => {
                let _ = kill(pid, Signal::SIGKILL);
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.kill();
    }
    let _ = child.wait();
}

/// Run `request`, feeding its stdin and collecting stdout, within the request deadline.
pub fn run_piped(request: ExecRequest) -> Result<ExecOutput, ExecError> {
    let program = request.program_display();
    let mut cmd = Command::new(&request.program);
    cmd.args(&request.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let started = Instant::now();
    let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
        program: program.clone(),
        source,
    })?;
    tracing::debug!(program = %program, pid = child.id(), "spawned child");

    // Writer thread: a child that never reads must not stall us; the deadline below still
    // fires and killing the child breaks the pipe, which ends the write.
    let writer = child.stdin.take().map(|mut stdin| {
        let input = request.stdin;
        thread::spawn(move || -> io::Result<()> {
            let res = stdin.write_all(&input).and_then(|_| stdin.flush());
            drop(stdin);
            res
        })
    });

    let (tx, rx) = mpsc::channel();
    let mut pending = 0usize;
    if let Some(out) = child.stdout.take() {
        spawn_drain(out, request.stdout_limit, tx.clone(), Drained::Stdout);
        pending += 1;
    }
    if let Some(err) = child.stderr.take() {
        spawn_drain(err, STDERR_CAP, tx.clone(), Drained::Stderr);
        pending += 1;
    }
    drop(tx);

    let status = match child.wait_timeout(request.timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            tracing::warn!(program = %program, timeout_secs = request.timeout.as_secs(), "child exceeded deadline; terminating");
            terminate(&mut child);
            return Err(ExecError::Timeout {
                program,
                after: request.timeout,
            });
        }
        Err(source) => {
            terminate(&mut child);
            return Err(ExecError::Wait { program, source });
        }
    };

    let mut stdout = TextBuf::new();
    let mut stderr = TextBuf::new();
    while pending > 0 {
        match rx.recv_timeout(DRAIN_GRACE) {
            Ok(Drained::Stdout(b)) => stdout = b,
            Ok(Drained::Stderr(b)) => stderr = b,
            Err(_) => {
                // A grandchild may still hold the pipe open; keep what we have.
                tracing::debug!(program = %program, "output drain did not finish after exit");
                break;
            }
        }
        pending -= 1;
    }

    if let Some(w) = writer {
        if w.is_finished() {
            if let Ok(Err(e)) = w.join() {
                if e.kind() != io::ErrorKind::BrokenPipe {
                    tracing::debug!(program = %program, error = %e, "writing child stdin failed");
                }
            }
        }
    }

    let stdout_truncated = stdout.truncated();
    Ok(ExecOutput {
        status,
        duration: started.elapsed(),
        stdout: stdout.take(),
        stdout_truncated,
        stderr: stderr.take_string(),
    })
}
