//! Persistent external worker for formats the in-process library cannot write.
//!
//! One worker process serves a whole session. It is started lazily on the
//! first commit and talks a line-based protocol on its standard streams:
//!
//! ```text
//! -overwrite_original
//! -XPTitle=Sunset
//! /photos/IMG_0001.heic
//! -execute42
//! ```
//!
//! The worker answers with a line containing `{ready42}`. Anything it writes
//! to its error stream during the exchange fails the commit.

mod process;

pub use process::{ExifToolLauncher, ExifToolProcess, ReadOutcome, WorkerLauncher, WorkerProcess};

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::exif::tags;
use crate::snapshot::TagMap;

const STOP_DIRECTIVE: &str = "-stay_open\nFalse\n";

/// Lifecycle of the worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    NotStarted,
    Starting,
    Idle,
    AwaitingResponse,
    Stopping,
    Stopped,
    /// The process could not be started; no further commits are attempted.
    Failed,
}

/// Timeouts used when talking to the worker.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub response_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub stderr_grace: Duration,
}

impl From<&WorkerConfig> for WorkerSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            response_timeout: config.response_timeout(),
            shutdown_timeout: config.shutdown_timeout(),
            stderr_grace: config.stderr_grace(),
        }
    }
}

struct Inner {
    state: WorkerState,
    process: Option<Box<dyn WorkerProcess>>,
    start_error: Option<String>,
    next_token: u64,
}

/// Writes tag edits by driving a persistent worker process.
///
/// At most one request is in flight: a commit issued while another is
/// waiting for its ready marker fails with [`WorkerError::Busy`] without
/// writing anything to the worker.
pub struct WorkerBackend {
    launcher: Box<dyn WorkerLauncher>,
    settings: WorkerSettings,
    inner: Mutex<Inner>,
}

/// What a finished exchange means for the process it ran on.
enum Exchange {
    Done(Result<(), WorkerError>),
    /// The process can no longer be trusted and must be torn down.
    Broken(WorkerError),
}

impl WorkerBackend {
    pub fn new(launcher: Box<dyn WorkerLauncher>, settings: WorkerSettings) -> Self {
        Self {
            launcher,
            settings,
            inner: Mutex::new(Inner {
                state: WorkerState::NotStarted,
                process: None,
                start_error: None,
                next_token: 1,
            }),
        }
    }

    /// Backend for the configured external tool.
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            Box::new(ExifToolLauncher::new(&config.program, config.args.clone())),
            WorkerSettings::from(config),
        )
    }

    pub fn state(&self) -> WorkerState {
        self.lock().state
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply `edits` to the file at `path` and wait for the worker to finish.
    ///
    /// On [`WorkerError::Unresponsive`] the worker is torn down and the next
    /// commit starts a fresh one. The timed-out request is never resent.
    pub fn commit(&self, path: &Path, edits: &TagMap) -> Result<(), WorkerError> {
        let path_text = path.to_string_lossy();
        reject_line_breaks("path", &path_text)?;
        for (key, value) in edits {
            reject_line_breaks(key, key)?;
            reject_line_breaks(key, value)?;
        }

        let (mut process, token) = self.acquire()?;
        let payload = build_request(&path_text, edits, token);

        let outcome = self.exchange(process.as_mut(), &payload, token);

        let mut inner = self.lock();
        if inner.state != WorkerState::AwaitingResponse {
            // Shut down while we were waiting; finish the job for it.
            log::debug!("Worker was shut down during a request, stopping it now");
            drop(inner);
            self.stop_process(process.as_mut());
            return match outcome {
                Exchange::Done(result) => result,
                Exchange::Broken(e) => Err(e),
            };
        }

        match outcome {
            Exchange::Done(result) => {
                inner.process = Some(process);
                inner.state = WorkerState::Idle;
                result
            }
            Exchange::Broken(e) => {
                log::warn!("Worker failed ({e}), restarting it on next use");
                inner.state = WorkerState::Stopping;
                drop(inner);
                if !process.close_and_wait(self.settings.shutdown_timeout) {
                    log::warn!("Unresponsive worker did not exit; leaving it to be reaped at exit");
                }
                self.lock().state = WorkerState::NotStarted;
                Err(e)
            }
        }
    }

    /// Take the process for one request, starting it if needed.
    fn acquire(&self) -> Result<(Box<dyn WorkerProcess>, u64), WorkerError> {
        let mut inner = self.lock();

        match inner.state {
            WorkerState::AwaitingResponse | WorkerState::Starting | WorkerState::Stopping => {
                return Err(WorkerError::Busy);
            }
            WorkerState::Stopped => return Err(WorkerError::Stopped),
            WorkerState::Failed => {
                let reason = inner.start_error.clone().unwrap_or_default();
                return Err(WorkerError::StartFailure(reason));
            }
            WorkerState::NotStarted => {
                inner.state = WorkerState::Starting;
                match self.start() {
                    Ok(process) => {
                        inner.process = Some(process);
                        inner.state = WorkerState::Idle;
                    }
                    Err(reason) => {
                        log::error!("Worker failed to start: {reason}");
                        inner.state = WorkerState::Failed;
                        inner.start_error = Some(reason.clone());
                        return Err(WorkerError::StartFailure(reason));
                    }
                }
            }
            WorkerState::Idle => {}
        }

        let process = inner.process.take().ok_or(WorkerError::Stopped)?;
        let token = inner.next_token;
        inner.next_token += 1;
        inner.state = WorkerState::AwaitingResponse;
        Ok((process, token))
    }

    fn start(&self) -> Result<Box<dyn WorkerProcess>, String> {
        let mut process = self.launcher.launch().map_err(|e| e.to_string())?;
        if !process.is_running() {
            return Err("worker exited immediately after start".to_string());
        }
        Ok(process)
    }

    fn exchange(&self, process: &mut dyn WorkerProcess, payload: &str, token: u64) -> Exchange {
        // Leftovers belong to an earlier exchange
        let stale = process.drain_stderr(Duration::ZERO);
        if !stale.is_empty() {
            log::debug!("Discarding stale worker error output: {stale}");
        }

        log::debug!("-> worker:\n{payload}");
        if let Err(e) = process.send(payload) {
            return Exchange::Broken(WorkerError::Io(e));
        }

        let marker = format!("{{ready{token}}}");
        let timeout = self.settings.response_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Exchange::Broken(WorkerError::Unresponsive(timeout));
            }
            match process.read_line(remaining) {
                ReadOutcome::Line(line) => {
                    log::debug!("<- worker: {line}");
                    if line.contains(&marker) {
                        break;
                    }
                }
                ReadOutcome::TimedOut => {
                    return Exchange::Broken(WorkerError::Unresponsive(timeout));
                }
                ReadOutcome::Closed => {
                    log::warn!("Worker closed its output mid-request");
                    return Exchange::Broken(WorkerError::Unresponsive(timeout));
                }
            }
        }

        let errors = process.drain_stderr(self.settings.stderr_grace);
        let errors = errors.trim();
        if errors.is_empty() {
            Exchange::Done(Ok(()))
        } else {
            Exchange::Done(Err(WorkerError::Reported {
                message: errors.to_string(),
            }))
        }
    }

    /// Send the stop directive and wait (bounded) for the process to exit.
    fn stop_process(&self, process: &mut dyn WorkerProcess) {
        if let Err(e) = process.send(STOP_DIRECTIVE) {
            log::debug!("Cannot send stop directive: {e}");
        }
        if process.close_and_wait(self.settings.shutdown_timeout) {
            log::info!("Worker stopped");
        } else {
            log::warn!("Worker did not exit in time; leaving it to be reaped at exit");
        }
    }

    /// Stop the worker. Later commits fail with [`WorkerError::Stopped`].
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        if inner.state == WorkerState::Stopped {
            return;
        }
        let process = inner.process.take();
        inner.state = WorkerState::Stopping;
        drop(inner);

        if let Some(mut process) = process {
            self.stop_process(process.as_mut());
        }
        self.lock().state = WorkerState::Stopped;
    }
}

impl Drop for WorkerBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn reject_line_breaks(key: &str, value: &str) -> Result<(), WorkerError> {
    if value.contains(['\n', '\r']) {
        return Err(WorkerError::InvalidValue {
            key: key.to_string(),
        });
    }
    Ok(())
}

/// Serialize one commit as a single write.
fn build_request(path: &str, edits: &TagMap, token: u64) -> String {
    let mut payload = String::from("-overwrite_original\n");
    for (key, value) in edits {
        payload.push_str(&format!("-{}={}\n", tags::stripped_name(key), value));
    }
    payload.push_str(path);
    payload.push('\n');
    payload.push_str(&format!("-execute{token}\n"));
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::{self, Receiver};
    use std::sync::Arc;

    /// How a fake worker behaves.
    enum Behavior {
        Answer,
        Silent,
        Complain(&'static str),
        /// Answer only once the gate is opened.
        Gated(Receiver<()>),
    }

    struct FakeProcess {
        behavior: Behavior,
        sent: Arc<Mutex<Vec<String>>>,
        output: VecDeque<String>,
        errors: String,
        running: bool,
    }

    impl WorkerProcess for FakeProcess {
        fn send(&mut self, payload: &str) -> io::Result<()> {
            if !self.running {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
            }
            self.sent.lock().unwrap().push(payload.to_string());
            if let Some(token) = payload
                .lines()
                .find_map(|l| l.strip_prefix("-execute"))
            {
                match self.behavior {
                    Behavior::Silent => {}
                    Behavior::Complain(msg) => {
                        self.output.push_back(format!("{{ready{token}}}"));
                        self.errors.push_str(msg);
                    }
                    Behavior::Answer | Behavior::Gated(_) => {
                        self.output.push_back("    1 image files updated".to_string());
                        self.output.push_back(format!("{{ready{token}}}"));
                    }
                }
            }
            Ok(())
        }

        fn read_line(&mut self, timeout: Duration) -> ReadOutcome {
            if let Behavior::Gated(gate) = &self.behavior {
                if gate.recv_timeout(timeout).is_err() {
                    return ReadOutcome::TimedOut;
                }
                self.behavior = Behavior::Answer;
            }
            match self.output.pop_front() {
                Some(line) => ReadOutcome::Line(line),
                None if self.running => ReadOutcome::TimedOut,
                None => ReadOutcome::Closed,
            }
        }

        fn drain_stderr(&mut self, _grace: Duration) -> String {
            std::mem::take(&mut self.errors)
        }

        fn is_running(&mut self) -> bool {
            self.running
        }

        fn close_and_wait(&mut self, _timeout: Duration) -> bool {
            self.running = false;
            true
        }
    }

    #[derive(Default)]
    struct FakeLauncher {
        /// Behaviors for successive launches; `Answer` once exhausted.
        behaviors: Mutex<VecDeque<Behavior>>,
        fail: bool,
        launches: AtomicUsize,
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl FakeLauncher {
        fn with(behaviors: Vec<Behavior>) -> Self {
            Self {
                behaviors: Mutex::new(behaviors.into()),
                ..Default::default()
            }
        }
    }

    impl WorkerLauncher for Arc<FakeLauncher> {
        fn launch(&self) -> io::Result<Box<dyn WorkerProcess>> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such program"));
            }
            let behavior = self
                .behaviors
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Behavior::Answer);
            Ok(Box::new(FakeProcess {
                behavior,
                sent: Arc::clone(&self.sent),
                output: VecDeque::new(),
                errors: String::new(),
                running: true,
            }))
        }
    }

    fn settings(timeout_ms: u64) -> WorkerSettings {
        WorkerSettings {
            response_timeout: Duration::from_millis(timeout_ms),
            shutdown_timeout: Duration::from_millis(50),
            stderr_grace: Duration::ZERO,
        }
    }

    fn backend(launcher: &Arc<FakeLauncher>, timeout_ms: u64) -> WorkerBackend {
        WorkerBackend::new(Box::new(Arc::clone(launcher)), settings(timeout_ms))
    }

    fn edits(pairs: &[(&str, &str)]) -> TagMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn sent(launcher: &FakeLauncher) -> Vec<String> {
        launcher.sent.lock().unwrap().clone()
    }

    // ── protocol ─────────────────────────────────────────────────────

    #[test]
    fn request_payload_layout() {
        let payload = build_request(
            "/p/a.heic",
            &edits(&[("Exif.Image.XPTitle", "Sunset"), ("Exif.Image.Artist", "Me")]),
            7,
        );
        assert_eq!(
            payload,
            "-overwrite_original\n-Artist=Me\n-XPTitle=Sunset\n/p/a.heic\n-execute7\n"
        );
    }

    #[test]
    fn commit_starts_worker_lazily_and_reuses_it() {
        let launcher = Arc::new(FakeLauncher::default());
        let backend = backend(&launcher, 1000);
        assert_eq!(backend.state(), WorkerState::NotStarted);

        let batch = edits(&[("Exif.Image.Make", "Acme"), ("Exif.Image.Model", "X1")]);
        backend.commit(Path::new("/p/a.heic"), &batch).unwrap();
        backend.commit(Path::new("/p/b.heic"), &batch).unwrap();

        assert_eq!(backend.state(), WorkerState::Idle);
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);

        let sent = sent(&launcher);
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[0],
            "-overwrite_original\n-Make=Acme\n-Model=X1\n/p/a.heic\n-execute1\n"
        );
        assert!(sent[1].ends_with("/p/b.heic\n-execute2\n"));
    }

    // ── failures ─────────────────────────────────────────────────────

    #[test]
    fn missing_ready_marker_is_unresponsive_then_restarts() {
        let launcher = Arc::new(FakeLauncher::with(vec![Behavior::Silent]));
        let backend = backend(&launcher, 50);
        let batch = edits(&[("Exif.Image.Make", "Acme"), ("Exif.Image.Model", "X1")]);

        let err = backend.commit(Path::new("/p/a.heic"), &batch).unwrap_err();
        assert!(matches!(err, WorkerError::Unresponsive(_)));
        assert_eq!(backend.state(), WorkerState::NotStarted);
        assert_eq!(sent(&launcher).len(), 1);

        backend.commit(Path::new("/p/a.heic"), &batch).unwrap();
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 2);
        assert_eq!(sent(&launcher).len(), 2);
    }

    #[test]
    fn error_output_wins_over_ready_marker() {
        let launcher = Arc::new(FakeLauncher::with(vec![Behavior::Complain(
            "Warning: Tag 'Bogus' is not defined\n",
        )]));
        let backend = backend(&launcher, 1000);

        let err = backend
            .commit(Path::new("/p/a.heic"), &edits(&[("Exif.Image.Bogus", "1")]))
            .unwrap_err();
        match err {
            WorkerError::Reported { message } => {
                assert_eq!(message, "Warning: Tag 'Bogus' is not defined");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(backend.state(), WorkerState::Idle);
    }

    #[test]
    fn start_failure_is_terminal() {
        let launcher = Arc::new(FakeLauncher {
            fail: true,
            ..Default::default()
        });
        let backend = backend(&launcher, 1000);
        let batch = edits(&[("Exif.Image.Make", "Acme")]);

        for _ in 0..3 {
            let err = backend.commit(Path::new("/p/a.heic"), &batch).unwrap_err();
            assert!(matches!(err, WorkerError::StartFailure(_)));
        }
        assert_eq!(backend.state(), WorkerState::Failed);
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn line_breaks_are_rejected_before_the_wire() {
        let launcher = Arc::new(FakeLauncher::default());
        let backend = backend(&launcher, 1000);

        let err = backend
            .commit(
                Path::new("/p/a.heic"),
                &edits(&[("Exif.Image.ImageDescription", "two\nlines")]),
            )
            .unwrap_err();
        assert!(matches!(err, WorkerError::InvalidValue { ref key } if key == "Exif.Image.ImageDescription"));

        let err = backend
            .commit(Path::new("/p/evil\r.heic"), &edits(&[("Exif.Image.Make", "A")]))
            .unwrap_err();
        assert!(matches!(err, WorkerError::InvalidValue { .. }));

        assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);
        assert!(sent(&launcher).is_empty());
    }

    // ── concurrency ──────────────────────────────────────────────────

    #[test]
    fn second_request_while_awaiting_is_busy() {
        let (open_gate, gate) = mpsc::channel();
        let launcher = Arc::new(FakeLauncher::with(vec![Behavior::Gated(gate)]));
        let backend = Arc::new(backend(&launcher, 5000));

        let first = {
            let backend = Arc::clone(&backend);
            std::thread::spawn(move || {
                backend.commit(Path::new("/p/a.heic"), &edits(&[("Exif.Image.Make", "A")]))
            })
        };

        let start = Instant::now();
        while backend.state() != WorkerState::AwaitingResponse {
            assert!(start.elapsed() < Duration::from_secs(5), "first request never started");
            std::thread::sleep(Duration::from_millis(1));
        }

        let err = backend
            .commit(Path::new("/p/b.heic"), &edits(&[("Exif.Image.Make", "B")]))
            .unwrap_err();
        assert!(matches!(err, WorkerError::Busy));
        assert_eq!(sent(&launcher).len(), 1);

        open_gate.send(()).unwrap();
        first.join().unwrap().unwrap();
        assert_eq!(backend.state(), WorkerState::Idle);
    }

    // ── shutdown ─────────────────────────────────────────────────────

    #[test]
    fn shutdown_sends_stop_directive_and_refuses_later_commits() {
        let launcher = Arc::new(FakeLauncher::default());
        let backend = backend(&launcher, 1000);
        let batch = edits(&[("Exif.Image.Make", "Acme")]);

        backend.commit(Path::new("/p/a.heic"), &batch).unwrap();
        backend.shutdown();

        assert_eq!(backend.state(), WorkerState::Stopped);
        assert_eq!(sent(&launcher).last().unwrap(), "-stay_open\nFalse\n");

        let err = backend.commit(Path::new("/p/a.heic"), &batch).unwrap_err();
        assert!(matches!(err, WorkerError::Stopped));

        // Idempotent
        backend.shutdown();
        assert_eq!(sent(&launcher).len(), 2);
    }

    #[test]
    fn shutdown_without_a_process_sends_nothing() {
        let launcher = Arc::new(FakeLauncher::default());
        backend(&launcher, 1000).shutdown();
        assert!(sent(&launcher).is_empty());
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);
    }
}
