//! TCP log aggregation server.
//!
//! Each accepted connection gets its own task reading length-prefixed
//! records. Records on `logger`/`status` names drive the [`JobTracker`];
//! everything else lands verbatim in its per-name sink.

use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{DEFAULT_PORT_SEARCH_START, LogdConfig};
use crate::error::{LogdError, Result};
use crate::event::JobEvent;
use crate::frame::LogFrameCodec;
use crate::record::{LogRecord, Target};
use crate::sink::SinkRegistry;
use crate::tracker::{Effect, JobCounters, JobTracker, starting_line, time_string};
use crate::watchdog::{CommandScheduler, JobScheduler, PingState, PingWatchdog};

/// State shared by every connection task.
#[derive(Debug)]
pub struct ServerState {
    registry: SinkRegistry,
    tracker: Mutex<JobTracker>,
    ping: Arc<Mutex<PingState>>,
    fixed_name: Option<String>,
    max_frame_len: usize,
    abort: CancellationToken,
}

impl ServerState {
    /// Creates the state over a registry and a tracker.
    pub fn new(registry: SinkRegistry, tracker: JobTracker) -> Self {
        Self {
            registry,
            tracker: Mutex::new(tracker),
            ping: Arc::new(Mutex::new(PingState::new(Instant::now()))),
            fixed_name: None,
            max_frame_len: crate::frame::DEFAULT_MAX_FRAME_LEN,
            abort: CancellationToken::new(),
        }
    }

    /// Routes every record to the sink called `name`.
    #[must_use]
    pub fn with_fixed_name(mut self, name: Option<String>) -> Self {
        self.fixed_name = name;
        self
    }

    /// Sets the frame size limit for new connections.
    #[must_use]
    pub const fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// The sink registry.
    pub fn registry(&self) -> &SinkRegistry {
        &self.registry
    }

    /// Current job counters.
    pub fn counters(&self) -> JobCounters {
        self.tracker.lock().counters()
    }

    /// Current ping state.
    pub fn ping_state(&self) -> PingState {
        *self.ping.lock()
    }

    /// Shared handle on the ping state, for the watchdog.
    pub fn ping_handle(&self) -> Arc<Mutex<PingState>> {
        Arc::clone(&self.ping)
    }

    /// Token cancelled when the server must stop.
    pub fn abort_token(&self) -> CancellationToken {
        self.abort.clone()
    }

    /// Records a sign of life from the workers.
    pub fn touch_ping(&self) {
        self.ping.lock().last_ping = Instant::now();
    }

    /// Cancels the abort token after `after`.
    pub fn schedule_abort(&self, after: Duration) {
        info!(after_ms = after.as_millis() as u64, "abort scheduled");
        let token = self.abort.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            token.cancel();
        });
    }

    /// Decodes and handles one frame payload. Failures are reported on the
    /// `logger` sink and never propagate.
    ///
    /// Returns the abort delay if the record asked for one.
    pub fn handle_payload(&self, payload: &[u8]) -> Option<Duration> {
        let record = match LogRecord::from_slice(payload) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, len = payload.len(), "undecodable record");
                self.report(&e.to_string());
                return None;
            }
        };

        match self.handle_record(&record) {
            Ok(abort) => abort,
            Err(e) => {
                warn!(name = %record.name, error = %e, "failed to handle record");
                self.report(&record.message());
                None
            }
        }
    }

    /// Handles one record.
    ///
    /// Returns the abort delay if the record asked for one.
    pub fn handle_record(&self, record: &LogRecord) -> Result<Option<Duration>> {
        let (target, status) = match &self.fixed_name {
            Some(name) => (
                Target::append(name.clone()),
                record.target().is_ok_and(|t| t.is_status()),
            ),
            None => {
                let target = record.target()?;
                let status = target.is_status();
                (target, status)
            }
        };
        let message = record.message();

        if !status {
            self.registry.write(&target, &message)?;
            return Ok(None);
        }

        self.touch_ping();
        let event = match &record.event {
            Some(event) => event.clone(),
            None => JobEvent::classify(&message)?,
        };

        let mut tracker = self.tracker.lock();
        let mut abort = None;
        for effect in tracker.apply(&event, &message, Local::now()) {
            match effect {
                Effect::Logger(line) => self.registry.write_logger(&line)?,
                Effect::Record(line) => self.registry.write(&target, &line)?,
                Effect::Abort(after) => abort = Some(after),
            }
        }
        Ok(abort)
    }

    fn report(&self, what: &str) {
        let line = format!("!!!!! Pb handling log : /{what}/");
        if let Err(e) = self.registry.write_logger(&line) {
            error!(error = %e, "cannot write to the logger sink");
        }
    }
}

/// The log server.
#[derive(Debug)]
pub struct LogServer {
    config: LogdConfig,
    state: Arc<ServerState>,
}

impl LogServer {
    /// Prepares the log directory, resolves the job total and writes the
    /// startup line.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the directories
    /// cannot be created or the job total cannot be read.
    pub fn new(config: LogdConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.log_directory)?;

        let registry = SinkRegistry::new(config.logs_dir())?
            .with_rotation(config.max_bytes, config.backup_count);
        let total = config.resolve_total()?;
        let tracker = JobTracker::new(total)
            .with_grace(config.exit_grace, config.finished_grace)
            .with_debug(config.debug);

        registry.write_logger(&starting_line(total, &time_string(Local::now())))?;
        info!(
            total,
            dir = %config.log_directory.display(),
            scheduler = %config.scheduler,
            "log server ready"
        );

        let state = ServerState::new(registry, tracker)
            .with_fixed_name(config.fixed_name.clone())
            .with_max_frame_len(config.max_frame_len);

        Ok(Self {
            config,
            state: Arc::new(state),
        })
    }

    /// The configuration.
    pub fn config(&self) -> &LogdConfig {
        &self.config
    }

    /// Shared state.
    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Token cancelled when the server must stop.
    pub fn abort_token(&self) -> CancellationToken {
        self.state.abort_token()
    }

    /// Binds the configured address, searching from port 9032 if the port
    /// is 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the host does not resolve or nothing can be bound.
    pub async fn bind(&self) -> Result<TcpListener> {
        if self.config.port == 0 {
            return bind_first_free(&self.config.host, DEFAULT_PORT_SEARCH_START).await;
        }
        let addr = resolve(&self.config.host, self.config.port).await?;
        TcpListener::bind(addr)
            .await
            .map_err(|source| LogdError::Bind { addr, source })
    }

    /// Binds and serves until aborted.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serves on `listener` with the configured scheduler until aborted.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener has no local address.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        self.serve_with(listener, CommandScheduler::new(self.config.scheduler))
            .await
    }

    /// Serves on `listener`, with `scheduler` backing the ping watchdog,
    /// until the abort token is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener has no local address.
    pub async fn serve_with<S: JobScheduler>(
        &self,
        listener: TcpListener,
        scheduler: S,
    ) -> Result<()> {
        let addr = listener.local_addr()?;
        info!(addr = %addr, "log server listening");

        let abort = self.state.abort_token();
        let watchdog = PingWatchdog::new(self.config.watchdog(), scheduler, self.state.ping_handle());
        let watchdog_task = tokio::spawn(watchdog.run(abort.clone()));

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let state = Arc::clone(&self.state);
                            tokio::spawn(handle_connection(stream, peer_addr, state));
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to accept connection");
                        }
                    }
                }
                () = abort.cancelled() => {
                    info!("abort requested");
                    break;
                }
            }
        }

        watchdog_task.abort();
        let counters = self.state.counters();
        info!(
            done = counters.done,
            failed = counters.failed,
            total = counters.total,
            "goodbye logger"
        );
        Ok(())
    }
}

async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, state: Arc<ServerState>) {
    debug!(peer = %peer_addr, "new connection");
    let abort = state.abort_token();
    let mut frames = FramedRead::new(stream, LogFrameCodec::new(state.max_frame_len));

    loop {
        let frame = tokio::select! {
            () = abort.cancelled() => break,
            frame = frames.next() => frame,
        };
        match frame {
            Some(Ok(payload)) => {
                if let Some(after) = state.handle_payload(&payload) {
                    state.schedule_abort(after);
                }
            }
            Some(Err(e)) => {
                warn!(peer = %peer_addr, error = %e, "dropping connection");
                break;
            }
            None => break,
        }
    }
    debug!(peer = %peer_addr, "connection closed");
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| {
            LogdError::Io(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("{host} does not resolve"),
            ))
        })
}

/// Binds the first free port on `host` from `start` upward.
///
/// # Errors
///
/// Returns an error if the host does not resolve or every port is taken.
pub async fn bind_first_free(host: &str, start: u16) -> Result<TcpListener> {
    let ip = resolve(host, start).await?.ip();
    for port in start..=u16::MAX {
        match TcpListener::bind(SocketAddr::new(ip, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => debug!(port, error = %e, "port unavailable"),
        }
    }
    Err(LogdError::NoFreePort(start))
}
