use std::io::{self, BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

/// Result of waiting for one line of worker output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Line(String),
    TimedOut,
    /// The worker closed its output; no more lines will arrive.
    Closed,
}

/// A running worker the backend can talk to.
///
/// Implemented by [`ExifToolProcess`] for the real tool and by in-memory
/// fakes in tests.
pub trait WorkerProcess: Send {
    /// Write `payload` to the worker's input and flush it.
    fn send(&mut self, payload: &str) -> io::Result<()>;

    /// Wait up to `timeout` for the next line on the worker's output.
    fn read_line(&mut self, timeout: Duration) -> ReadOutcome;

    /// Everything written to the error stream so far, waiting up to `grace`
    /// for stragglers. Empty when there was none.
    fn drain_stderr(&mut self, grace: Duration) -> String;

    fn is_running(&mut self) -> bool;

    /// Close the input side and wait up to `timeout` for the process to exit.
    /// Returns `false` if it is still running afterwards.
    fn close_and_wait(&mut self, timeout: Duration) -> bool;
}

/// Starts worker processes. Injected into the backend so tests can substitute fakes.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self) -> io::Result<Box<dyn WorkerProcess>>;
}

/// Launches `exiftool` (or a compatible program) in stay-open mode.
#[derive(Debug, Clone)]
pub struct ExifToolLauncher {
    program: String,
    args: Vec<String>,
}

impl ExifToolLauncher {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl WorkerLauncher for ExifToolLauncher {
    fn launch(&self) -> io::Result<Box<dyn WorkerProcess>> {
        log::debug!("Starting worker: {} {}", self.program, self.args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| io::Error::new(e.kind(), format!("cannot start {}: {e}", self.program)))?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("worker stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("worker stderr not captured"))?;

        let stdout = spawn_line_reader("worker-stdout", stdout)?;
        let stderr = spawn_line_reader("worker-stderr", stderr)?;

        log::info!("Worker started (pid {})", child.id());
        Ok(Box::new(ExifToolProcess {
            child,
            stdin,
            stdout,
            stderr,
        }))
    }
}

/// Forward each line of `source` into a channel from a background thread.
/// The channel disconnects when the stream reaches EOF.
fn spawn_line_reader<R: Read + Send + 'static>(
    name: &str,
    source: R,
) -> io::Result<Receiver<String>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            for line in BufReader::new(source).lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

/// A real child process with its output streams pumped by reader threads.
pub struct ExifToolProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Receiver<String>,
    stderr: Receiver<String>,
}

impl WorkerProcess for ExifToolProcess {
    fn send(&mut self, payload: &str) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "worker input closed"))?;
        stdin.write_all(payload.as_bytes())?;
        stdin.flush()
    }

    fn read_line(&mut self, timeout: Duration) -> ReadOutcome {
        match self.stdout.recv_timeout(timeout) {
            Ok(line) => ReadOutcome::Line(line),
            Err(RecvTimeoutError::Timeout) => ReadOutcome::TimedOut,
            Err(RecvTimeoutError::Disconnected) => ReadOutcome::Closed,
        }
    }

    fn drain_stderr(&mut self, grace: Duration) -> String {
        let deadline = Instant::now() + grace;
        let mut lines = Vec::new();
        while let Ok(line) = self
            .stderr
            .recv_timeout(deadline.saturating_duration_since(Instant::now()))
        {
            lines.push(line);
        }
        lines.join("\n")
    }

    fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn close_and_wait(&mut self, timeout: Duration) -> bool {
        drop(self.stdin.take());

        let start = Instant::now();
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    log::debug!("Worker exited with {status}");
                    return true;
                }
                Ok(None) if start.elapsed() < timeout => {
                    thread::sleep(Duration::from_millis(10));
                }
                Ok(None) => return false,
                Err(e) => {
                    log::debug!("Cannot poll worker status: {e}");
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_fails_to_launch() {
        let launcher = ExifToolLauncher::new("/nonexistent/exif-worker-binary", Vec::new());
        let err = launcher.launch().err().unwrap();
        assert!(err.to_string().contains("/nonexistent/exif-worker-binary"));
    }

    #[cfg(unix)]
    #[test]
    fn cat_echoes_lines_and_exits_on_close() {
        let launcher = ExifToolLauncher::new("cat", Vec::new());
        let mut process = launcher.launch().unwrap();
        assert!(process.is_running());

        process.send("hello\n{ready7}\n").unwrap();
        let timeout = Duration::from_secs(5);
        assert_eq!(process.read_line(timeout), ReadOutcome::Line("hello".into()));
        assert_eq!(process.read_line(timeout), ReadOutcome::Line("{ready7}".into()));
        assert_eq!(process.drain_stderr(Duration::from_millis(10)), "");

        assert!(process.close_and_wait(timeout));
        assert_eq!(process.read_line(timeout), ReadOutcome::Closed);
    }
}
