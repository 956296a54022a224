//! Frontend dev server supervision
//!
//! A [`DevServer`] owns exactly one subprocess. It is spawned from a command
//! line, watched until it prints a `http://<host>:<port>` URL on stdout, and
//! stopped either explicitly or when the owning shutdown signal fires.
//!
//! ```text
//! NotStarted -> Starting -> Ready -> Stopping -> Stopped
//!                  |                                ^
//!                  +--------------------------------+  (exit, timeout, cancel)
//! ```
//!
//! There is no restart: a new dev server generation needs a new `DevServer`.

use crate::command;
use crate::error::FrontendError;
use parking_lot::Mutex;
use regex::Regex;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{oneshot, watch, OnceCell};
use tracing::{debug, info, warn};
use url::Url;

/// How long to wait for the other half of an early exit: the exit status
/// once stdout closed, or the rest of stdout once the process exited
const EXIT_STATUS_WAIT: Duration = Duration::from_secs(1);

/// Longer output lines are handed to the sink in chunks of this size
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// How often to check whether a process group has emptied
const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Lifecycle state of a dev server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevServerState {
    /// Before spawn. [`DevServer::spawn`] only returns a handle once the
    /// process is running, so a handle never reports this state.
    NotStarted,
    /// Process running, waiting for the URL line
    Starting,
    /// URL observed, proxying is possible
    Ready,
    /// Termination requested
    Stopping,
    /// Process has exited
    Stopped,
}

/// Where and how to launch the dev server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub working_dir: PathBuf,
    pub command: String,
}

impl LaunchSpec {
    pub fn new(working_dir: impl Into<PathBuf>, command: impl Into<String>) -> Self {
        Self {
            working_dir: working_dir.into(),
            command: command.into(),
        }
    }
}

/// Timeouts for a dev server
#[derive(Debug, Clone, Copy)]
pub struct DevServerOptions {
    /// Max time between spawn and the URL line
    pub startup_timeout: Duration,
    /// Time between SIGTERM and SIGKILL
    pub shutdown_grace_period: Duration,
}

impl Default for DevServerOptions {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(30),
            shutdown_grace_period: Duration::from_secs(5),
        }
    }
}

/// Receives every line the dev server writes to stdout
pub trait OutputSink: Send + Sync + 'static {
    fn line(&self, line: &str);
}

/// Default sink: log each line through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn line(&self, line: &str) {
        info!(target: "spagate::devserver::output", "{}", line);
    }
}

impl<F> OutputSink for F
where
    F: Fn(&str) + Send + Sync + 'static,
{
    fn line(&self, line: &str) {
        self(line)
    }
}

fn ready_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"http://(?:\[[0-9A-Fa-f:.]+\]|[0-9A-Za-z.\-]+):\d+")
            .expect("valid ready URL pattern")
    })
}

fn ansi_escape_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").expect("valid ANSI pattern"))
}

/// Find a `http://<host>:<port>` URL in a line of dev server output.
///
/// Colour escapes are removed first, so `http://localhost:\x1b[1m5173\x1b[22m/`
/// still matches.
pub fn find_ready_url(line: &str) -> Option<String> {
    let plain = ansi_escape_pattern().replace_all(line, "");
    ready_url_pattern()
        .find(&plain)
        .map(|m| m.as_str().to_string())
}

/// A supervised dev server process
pub struct DevServer {
    pid: Option<u32>,
    state: Arc<Mutex<DevServerState>>,
    exit_status: Arc<Mutex<Option<ExitStatus>>>,
    ready_url: OnceCell<Url>,
    /// Stop-once latch
    stop_requested: AtomicBool,
    cancel_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl DevServer {
    /// Spawn the dev server and wait until it reports its URL.
    ///
    /// The process is terminated when `shutdown` flips to `true`, when
    /// [`DevServer::stop`] is called, or when the returned handle is dropped.
    /// On any error the process has already been stopped.
    pub async fn spawn(
        shutdown: watch::Receiver<bool>,
        launch: LaunchSpec,
        options: DevServerOptions,
        sink: Arc<dyn OutputSink>,
    ) -> Result<(Arc<Self>, Url), FrontendError> {
        let parsed = command::parse(&launch.command)?;

        info!(
            command = %launch.command,
            working_dir = %launch.working_dir.display(),
            "Starting dev server"
        );

        let mut cmd = Command::new(&parsed.program);
        cmd.args(&parsed.args);
        cmd.current_dir(&launch.working_dir);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());
        cmd.kill_on_drop(true);

        // Own process group so that npm and the node process it starts are
        // signalled together
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            FrontendError::DevServerDidNotStart(format!(
                "failed to spawn {}: {}",
                parsed.to_command_line(),
                e
            ))
        })?;
        let pid = child.id();
        info!(pid, "Dev server process spawned");

        let stdout = child.stdout.take().ok_or_else(|| {
            FrontendError::DevServerDidNotStart("stdout was not captured".to_string())
        })?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);
        let (ready_tx, ready_rx) = oneshot::channel();

        let server = Arc::new(Self {
            pid,
            state: Arc::new(Mutex::new(DevServerState::Starting)),
            exit_status: Arc::new(Mutex::new(None)),
            ready_url: OnceCell::new(),
            stop_requested: AtomicBool::new(false),
            cancel_tx,
            done_rx,
        });

        tokio::spawn(scan_output(stdout, ready_tx, sink));
        tokio::spawn(supervise(
            child,
            Arc::clone(&server.state),
            Arc::clone(&server.exit_status),
            shutdown,
            cancel_rx,
            done_tx,
            options.shutdown_grace_period,
        ));

        match server.await_ready(ready_rx, options.startup_timeout).await {
            Ok(url) => {
                {
                    let mut state = server.state.lock();
                    if *state == DevServerState::Starting {
                        *state = DevServerState::Ready;
                    }
                }
                let _ = server.ready_url.set(url.clone());
                info!(url = %url, pid, "Dev server is ready");
                Ok((server, url))
            }
            Err(e) => {
                warn!(error = %e, "Dev server failed to start");
                server.stop().await;
                Err(e)
            }
        }
    }

    async fn await_ready(
        &self,
        mut ready_rx: oneshot::Receiver<String>,
        startup_timeout: Duration,
    ) -> Result<Url, FrontendError> {
        let mut done = self.done_rx.clone();

        let raw = tokio::select! {
            biased;
            result = &mut ready_rx => match result {
                Ok(raw) => raw,
                Err(_) => {
                    // stdout closed without a URL; the process is exiting or gone
                    let _ = tokio::time::timeout(EXIT_STATUS_WAIT, done.wait_for(|d| *d)).await;
                    return Err(self.exited_early());
                }
            },
            _ = async { let _ = done.wait_for(|d| *d).await; } => {
                // The process is gone but a URL it printed may still be in the
                // pipe, or a leftover child may keep stdout open
                match tokio::time::timeout(EXIT_STATUS_WAIT, &mut ready_rx).await {
                    Ok(Ok(raw)) => raw,
                    _ => return Err(self.exited_early()),
                }
            }
            _ = tokio::time::sleep(startup_timeout) => {
                return Err(FrontendError::DevServerTimeout(startup_timeout));
            }
        };

        Url::parse(&raw).map_err(|source| FrontendError::MalformedUrl { url: raw, source })
    }

    fn exited_early(&self) -> FrontendError {
        let reason = match *self.exit_status.lock() {
            Some(status) => format!("process exited before reporting a URL ({})", status),
            None => "output closed before reporting a URL".to_string(),
        };
        FrontendError::DevServerDidNotStart(reason)
    }

    /// Stop the process and wait until it has exited.
    ///
    /// Idempotent: only the first call sends the termination request, later
    /// calls just wait for the same exit.
    pub async fn stop(&self) {
        if !self.stop_requested.swap(true, Ordering::SeqCst) {
            debug!(pid = self.pid, "Stopping dev server");
            let _ = self.cancel_tx.send(true);
        }
        self.wait().await;
    }

    /// Wait until the process has exited
    pub async fn wait(&self) {
        let mut done = self.done_rx.clone();
        let _ = done.wait_for(|d| *d).await;
    }

    pub fn state(&self) -> DevServerState {
        *self.state.lock()
    }

    /// The URL the dev server reported, set once it is ready
    pub fn ready_url(&self) -> Option<&Url> {
        self.ready_url.get()
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        *self.exit_status.lock()
    }

}

/// Read stdout line by line: hand the first URL to `ready_tx`, every line to `sink`
async fn scan_output(
    stdout: ChildStdout,
    ready_tx: oneshot::Sender<String>,
    sink: Arc<dyn OutputSink>,
) {
    let mut ready_tx = Some(ready_tx);
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let mut limited = (&mut reader).take(MAX_LINE_LENGTH as u64);
        match limited.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(&['\r', '\n'][..]);
                if ready_tx.is_some() {
                    if let Some(url) = find_ready_url(line) {
                        debug!(url = %url, "Dev server reported its URL");
                        if let Some(tx) = ready_tx.take() {
                            let _ = tx.send(url);
                        }
                    }
                }
                sink.line(line);
            }
            Err(e) => {
                debug!(error = %e, "Failed to read dev server output");
                break;
            }
        }
    }
    debug!("Dev server output closed");
}

/// Own the child until it exits or a stop is requested
async fn supervise(
    mut child: Child,
    state: Arc<Mutex<DevServerState>>,
    exit_status: Arc<Mutex<Option<ExitStatus>>>,
    mut shutdown: watch::Receiver<bool>,
    mut cancel: watch::Receiver<bool>,
    done_tx: watch::Sender<bool>,
    grace_period: Duration,
) {
    #[cfg(unix)]
    let pid = child.id();

    let status = tokio::select! {
        result = child.wait() => match result {
            Ok(status) => {
                if status.success() {
                    info!(?status, "Dev server exited");
                } else {
                    warn!(?status, "Dev server exited");
                }
                Some(status)
            }
            Err(e) => {
                warn!(error = %e, "Error waiting for dev server");
                None
            }
        },
        _ = stop_requested(&mut cancel) => {
            *state.lock() = DevServerState::Stopping;
            terminate(&mut child, grace_period).await
        }
        _ = shutdown_requested(&mut shutdown) => {
            info!("Shutdown requested, stopping dev server");
            *state.lock() = DevServerState::Stopping;
            terminate(&mut child, grace_period).await
        }
    };

    *exit_status.lock() = status;

    // The leader is gone; helpers it started in the same group are not
    #[cfg(unix)]
    if let Some(pid) = pid {
        reap_group(pid, grace_period).await;
    }

    *state.lock() = DevServerState::Stopped;
    let _ = done_tx.send(true);
}

/// Resolves on an explicit stop, or when the owning `DevServer` is dropped
async fn stop_requested(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|stop| *stop).await;
}

/// Resolves when the shutdown flag is set; never if its sender goes away
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// SIGTERM, wait for the grace period, then SIGKILL
async fn terminate(child: &mut Child, grace_period: Duration) -> Option<ExitStatus> {
    if let Some(pid) = child.id() {
        debug!(pid, "Sending SIGTERM to dev server");

        #[cfg(unix)]
        signal_group(pid, libc::SIGTERM);

        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }
    }

    match tokio::time::timeout(grace_period, child.wait()).await {
        Ok(Ok(status)) => {
            info!(?status, "Dev server stopped");
            Some(status)
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Error waiting for dev server to exit");
            None
        }
        Err(_) => {
            warn!(
                grace_period_secs = grace_period.as_secs(),
                "Grace period exceeded, sending SIGKILL"
            );
            #[cfg(unix)]
            if let Some(pid) = child.id() {
                signal_group(pid, libc::SIGKILL);
            }
            let _ = child.kill().await;
            child.wait().await.ok()
        }
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: i32) {
    // The child leads its own process group (see `process_group(0)`)
    unsafe {
        libc::kill(-(pid as i32), signal);
    }
}

#[cfg(unix)]
fn group_alive(pid: u32) -> bool {
    unsafe { libc::kill(-(pid as i32), 0) == 0 }
}

/// SIGTERM whatever is left in the group, SIGKILL it after the grace period
#[cfg(unix)]
async fn reap_group(pid: u32, grace_period: Duration) {
    if !group_alive(pid) {
        return;
    }
    debug!(pid, "Terminating remaining dev server process group");
    signal_group(pid, libc::SIGTERM);

    let deadline = tokio::time::Instant::now() + grace_period;
    while group_alive(pid) {
        if tokio::time::Instant::now() >= deadline {
            warn!(pid, "Process group outlived the grace period, sending SIGKILL");
            signal_group(pid, libc::SIGKILL);
            return;
        }
        tokio::time::sleep(GROUP_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_ready_url() {
        assert_eq!(
            find_ready_url("  ➜  Local:   http://localhost:5173/"),
            Some("http://localhost:5173".to_string())
        );
        assert_eq!(
            find_ready_url("ready - started server on 0.0.0.0:3000, url: http://localhost:3000"),
            Some("http://localhost:3000".to_string())
        );
        assert_eq!(
            find_ready_url("App running at: - Local: http://127.0.0.1:8080/ "),
            Some("http://127.0.0.1:8080".to_string())
        );
        assert_eq!(
            find_ready_url("Listening on http://[::1]:4173"),
            Some("http://[::1]:4173".to_string())
        );
        assert_eq!(find_ready_url("compiling..."), None);
        assert_eq!(find_ready_url("see https://nextjs.org:443/docs"), None);
        assert_eq!(find_ready_url("http://localhost/ without a port"), None);
    }

    #[test]
    fn test_find_ready_url_strips_colours() {
        let line = "  \x1b[32m➜\x1b[39m  \x1b[1mLocal\x1b[22m:   \x1b[36mhttp://localhost:\x1b[1m5173\x1b[22m/\x1b[39m";
        assert_eq!(find_ready_url(line), Some("http://localhost:5173".to_string()));
    }

    #[test]
    fn test_default_options() {
        let options = DevServerOptions::default();
        assert_eq!(options.startup_timeout, Duration::from_secs(30));
        assert_eq!(options.shutdown_grace_period, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_malformed_command_starts_nothing() {
        let (_tx, rx) = watch::channel(false);
        let result = DevServer::spawn(
            rx,
            LaunchSpec::new(".", "npm run 'dev"),
            DevServerOptions::default(),
            Arc::new(TracingSink),
        )
        .await;
        assert!(matches!(result, Err(FrontendError::MalformedCommand { .. })));
    }

    #[tokio::test]
    async fn test_missing_program_did_not_start() {
        let (_tx, rx) = watch::channel(false);
        let result = DevServer::spawn(
            rx,
            LaunchSpec::new(".", "spagate-no-such-dev-server-binary --port 1"),
            DevServerOptions::default(),
            Arc::new(TracingSink),
        )
        .await;
        assert!(matches!(result, Err(FrontendError::DevServerDidNotStart(_))));
    }

    #[cfg(unix)]
    mod process {
        use super::*;

        fn collecting_sink() -> (Arc<dyn OutputSink>, Arc<Mutex<Vec<String>>>) {
            let lines = Arc::new(Mutex::new(Vec::new()));
            let captured = Arc::clone(&lines);
            let sink: Arc<dyn OutputSink> =
                Arc::new(move |line: &str| captured.lock().push(line.to_string()));
            (sink, lines)
        }

        fn quick_options() -> DevServerOptions {
            DevServerOptions {
                startup_timeout: Duration::from_secs(10),
                shutdown_grace_period: Duration::from_secs(2),
            }
        }

        async fn wait_for_lines(lines: &Mutex<Vec<String>>, count: usize) {
            for _ in 0..100 {
                if lines.lock().len() >= count {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }

        #[tokio::test]
        async fn test_first_url_wins_and_every_line_is_forwarded() {
            let (_tx, rx) = watch::channel(false);
            let (sink, lines) = collecting_sink();
            let command = r#"sh -c 'echo "VITE v5 ready"; echo "  Local: http://localhost:5173/"; echo "  Network: http://192.168.1.20:5173/"; exec sleep 30'"#;

            let (server, url) = DevServer::spawn(rx, LaunchSpec::new(".", command), quick_options(), sink)
                .await
                .unwrap();

            assert_eq!(url.as_str(), "http://localhost:5173/");
            assert_eq!(server.ready_url(), Some(&url));
            assert_eq!(server.state(), DevServerState::Ready);
            assert!(server.pid().is_some());

            wait_for_lines(&lines, 3).await;
            assert_eq!(
                *lines.lock(),
                vec![
                    "VITE v5 ready".to_string(),
                    "  Local: http://localhost:5173/".to_string(),
                    "  Network: http://192.168.1.20:5173/".to_string(),
                ]
            );
            // the second URL did not replace the first
            assert_eq!(server.ready_url().unwrap().as_str(), "http://localhost:5173/");

            server.stop().await;
            assert_eq!(server.state(), DevServerState::Stopped);
        }

        #[tokio::test]
        async fn test_exit_before_url_did_not_start() {
            let (_tx, rx) = watch::channel(false);
            let (sink, lines) = collecting_sink();
            let command = r#"sh -c 'echo "npm ERR! Missing script: dev"; exit 1'"#;

            let result = DevServer::spawn(rx, LaunchSpec::new(".", command), quick_options(), sink).await;

            match result {
                Err(FrontendError::DevServerDidNotStart(reason)) => {
                    assert!(reason.contains("before reporting a URL"), "{reason}");
                }
                Err(other) => panic!("unexpected error: {other}"),
                Ok(_) => panic!("dev server should not have started"),
            }
            assert_eq!(*lines.lock(), vec!["npm ERR! Missing script: dev".to_string()]);
        }

        fn helper_pid(lines: &Mutex<Vec<String>>) -> i32 {
            lines
                .lock()
                .iter()
                .find_map(|line| line.strip_prefix("helper ").map(|pid| pid.trim().parse().unwrap()))
                .expect("helper pid was printed")
        }

        fn is_running(pid: i32) -> bool {
            if unsafe { libc::kill(pid, 0) } != 0 {
                return false;
            }
            // an exited process nobody reaped yet shows up as a zombie
            match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
                Ok(stat) => !stat
                    .rsplit_once(')')
                    .map(|(_, rest)| rest.trim_start().starts_with('Z'))
                    .unwrap_or(false),
                Err(_) => true,
            }
        }

        async fn wait_until_gone(pid: i32) -> bool {
            for _ in 0..150 {
                if !is_running(pid) {
                    return true;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            false
        }

        #[tokio::test]
        async fn test_exit_with_helper_holding_stdout_did_not_start() {
            let (_tx, rx) = watch::channel(false);
            let (sink, lines) = collecting_sink();
            let command = r#"sh -c 'sleep 30 & echo "helper $!"; echo "npm ERR! spawn failed"; exit 1'"#;
            let started = std::time::Instant::now();

            let result = DevServer::spawn(rx, LaunchSpec::new(".", command), quick_options(), sink).await;

            match result {
                Err(FrontendError::DevServerDidNotStart(reason)) => {
                    assert!(reason.contains("exited before reporting a URL"), "{reason}");
                }
                Err(other) => panic!("unexpected error: {other}"),
                Ok(_) => panic!("dev server should not have started"),
            }
            assert!(started.elapsed() < Duration::from_secs(5), "took {:?}", started.elapsed());

            wait_for_lines(&lines, 1).await;
            assert!(wait_until_gone(helper_pid(&lines)).await, "helper process survived");
        }

        #[tokio::test]
        async fn test_leftover_helpers_stopped_after_own_exit() {
            let (_tx, rx) = watch::channel(false);
            let (sink, lines) = collecting_sink();
            let command = r#"sh -c 'sleep 30 & echo "helper $!"; echo http://127.0.0.1:4006; exit 0'"#;

            let (server, url) = DevServer::spawn(rx, LaunchSpec::new(".", command), quick_options(), sink)
                .await
                .unwrap();
            assert_eq!(url.as_str(), "http://127.0.0.1:4006/");

            tokio::time::timeout(Duration::from_secs(5), server.wait())
                .await
                .expect("dev server should finish after its leader exits");
            assert_eq!(server.state(), DevServerState::Stopped);
            assert!(wait_until_gone(helper_pid(&lines)).await, "helper process survived");

            server.stop().await;
        }

        #[tokio::test]
        async fn test_long_lines_are_chunked() {
            let (_tx, rx) = watch::channel(false);
            let (sink, lines) = collecting_sink();
            let command = r#"sh -c 'head -c 200000 /dev/zero | tr "\0" a; echo; echo http://localhost:4007; exec sleep 30'"#;

            let (server, url) = DevServer::spawn(rx, LaunchSpec::new(".", command), quick_options(), sink)
                .await
                .unwrap();
            assert_eq!(url.as_str(), "http://localhost:4007/");

            wait_for_lines(&lines, 5).await;
            {
                let lines = lines.lock();
                assert!(lines.iter().all(|line| line.len() <= MAX_LINE_LENGTH));
                let total: usize = lines.iter().filter(|l| l.starts_with('a')).map(|l| l.len()).sum();
                assert_eq!(total, 200_000);
            }
            server.stop().await;
        }

        #[tokio::test]
        async fn test_startup_timeout() {
            let (_tx, rx) = watch::channel(false);
            let options = DevServerOptions {
                startup_timeout: Duration::from_millis(200),
                shutdown_grace_period: Duration::from_secs(2),
            };

            let result = DevServer::spawn(
                rx,
                LaunchSpec::new(".", "sh -c 'echo compiling; exec sleep 30'"),
                options,
                Arc::new(TracingSink),
            )
            .await;

            assert!(matches!(result, Err(FrontendError::DevServerTimeout(d)) if d == Duration::from_millis(200)));
        }

        #[tokio::test]
        async fn test_malformed_url_is_fatal() {
            let (_tx, rx) = watch::channel(false);
            let result = DevServer::spawn(
                rx,
                LaunchSpec::new(".", "sh -c 'echo http://localhost:99999; exec sleep 30'"),
                quick_options(),
                Arc::new(TracingSink),
            )
            .await;

            match result {
                Err(FrontendError::MalformedUrl { url, .. }) => assert_eq!(url, "http://localhost:99999"),
                Err(other) => panic!("unexpected error: {other}"),
                Ok(_) => panic!("malformed URL accepted"),
            }
        }

        #[tokio::test]
        async fn test_stop_is_idempotent() {
            let (_tx, rx) = watch::channel(false);
            let (server, _) = DevServer::spawn(
                rx,
                LaunchSpec::new(".", "sh -c 'echo http://127.0.0.1:4000; exec sleep 30'"),
                quick_options(),
                Arc::new(TracingSink),
            )
            .await
            .unwrap();

            server.stop().await;
            let first = server.exit_status();
            assert_eq!(server.state(), DevServerState::Stopped);

            server.stop().await;
            assert_eq!(server.state(), DevServerState::Stopped);
            assert_eq!(server.exit_status(), first);
        }

        #[tokio::test]
        async fn test_stop_after_process_exited() {
            let (_tx, rx) = watch::channel(false);
            let (server, _) = DevServer::spawn(
                rx,
                LaunchSpec::new(".", "sh -c 'echo http://127.0.0.1:4001; exit 0'"),
                quick_options(),
                Arc::new(TracingSink),
            )
            .await
            .unwrap();

            server.wait().await;
            assert_eq!(server.state(), DevServerState::Stopped);
            assert!(server.exit_status().unwrap().success());

            server.stop().await;
            server.stop().await;
            assert_eq!(server.state(), DevServerState::Stopped);
        }

        #[tokio::test]
        async fn test_shutdown_signal_stops_process() {
            let (tx, rx) = watch::channel(false);
            let (server, _) = DevServer::spawn(
                rx,
                LaunchSpec::new(".", "sh -c 'echo http://127.0.0.1:4002; exec sleep 30'"),
                quick_options(),
                Arc::new(TracingSink),
            )
            .await
            .unwrap();
            assert_eq!(server.state(), DevServerState::Ready);

            tx.send(true).unwrap();
            tokio::time::timeout(Duration::from_secs(5), server.wait())
                .await
                .expect("dev server should stop on shutdown");
            assert_eq!(server.state(), DevServerState::Stopped);
        }

        #[tokio::test]
        async fn test_shutdown_during_startup() {
            let (tx, rx) = watch::channel(false);
            let spawn = tokio::spawn(DevServer::spawn(
                rx,
                LaunchSpec::new(".", "sh -c 'exec sleep 30'"),
                quick_options(),
                Arc::new(TracingSink),
            ));

            tokio::time::sleep(Duration::from_millis(200)).await;
            tx.send(true).unwrap();

            let result = tokio::time::timeout(Duration::from_secs(5), spawn)
                .await
                .expect("spawn should return after shutdown")
                .unwrap();
            assert!(matches!(result, Err(FrontendError::DevServerDidNotStart(_))));
        }

        #[tokio::test]
        async fn test_runs_in_working_directory() {
            let dir = tempfile::TempDir::new().unwrap();
            let expected = dir.path().canonicalize().unwrap();
            let (_tx, rx) = watch::channel(false);
            let (sink, lines) = collecting_sink();

            let (server, _) = DevServer::spawn(
                rx,
                LaunchSpec::new(dir.path(), r#"sh -c 'echo "cwd=$(pwd -P)"; echo http://localhost:4003; exec sleep 30'"#),
                quick_options(),
                sink,
            )
            .await
            .unwrap();

            wait_for_lines(&lines, 1).await;
            assert_eq!(lines.lock()[0], format!("cwd={}", expected.display()));
            server.stop().await;
        }

        #[tokio::test]
        async fn test_sigterm_ignored_falls_back_to_kill() {
            let (_tx, rx) = watch::channel(false);
            let options = DevServerOptions {
                startup_timeout: Duration::from_secs(10),
                shutdown_grace_period: Duration::from_millis(300),
            };
            let (server, _) = DevServer::spawn(
                rx,
                LaunchSpec::new(".", r#"sh -c 'trap "" TERM; echo http://localhost:4004; while true; do sleep 1; done'"#),
                options,
                Arc::new(TracingSink),
            )
            .await
            .unwrap();

            tokio::time::timeout(Duration::from_secs(5), server.stop())
                .await
                .expect("stop should escalate to SIGKILL");
            assert_eq!(server.state(), DevServerState::Stopped);
        }
    }
}
