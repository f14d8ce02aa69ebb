//! Ping watchdog: aborts the server once workers have gone quiet and the
//! scheduler no longer knows about the job.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::process::Command;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::LogdError;

/// Delay between two checks.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Quiet period after which the scheduler is consulted.
pub const DEFAULT_PING_THRESHOLD: Duration = Duration::from_secs(125);

/// Consecutive misses that abort the server.
pub const DEFAULT_MAX_STRIKES: u32 = 3;

/// Answers whether a job still has processes somewhere.
pub trait JobScheduler: Send + Sync + 'static {
    /// Returns `true` if any process for `job` is known.
    fn job_exists(&self, job: &str) -> impl Future<Output = bool> + Send;
}

/// Supported batch schedulers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerKind {
    /// SLURM, via `squeue`.
    Slurm,
    /// PBS/Torque, via `qstat`.
    Pbs,
    /// Processes on this host, via `pgrep`.
    Local,
    /// No scheduler: never reports a process.
    #[default]
    None,
}

impl FromStr for SchedulerKind {
    type Err = LogdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "slurm" => Ok(Self::Slurm),
            "pbs" | "torque" => Ok(Self::Pbs),
            "local" => Ok(Self::Local),
            "none" | "" => Ok(Self::None),
            _ => Err(LogdError::UnknownScheduler(s.to_string())),
        }
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Slurm => "slurm",
            Self::Pbs => "pbs",
            Self::Local => "local",
            Self::None => "none",
        };
        f.write_str(name)
    }
}

/// Scheduler backed by the scheduler's command line tools.
#[derive(Debug, Clone, Copy)]
pub struct CommandScheduler {
    kind: SchedulerKind,
}

impl CommandScheduler {
    /// Creates a scheduler of the given kind.
    pub const fn new(kind: SchedulerKind) -> Self {
        Self { kind }
    }

    async fn output(program: &str, args: &[&str]) -> Option<std::process::Output> {
        match Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
        {
            Ok(output) => Some(output),
            Err(e) => {
                warn!(program, error = %e, "scheduler query failed");
                None
            }
        }
    }
}

impl JobScheduler for CommandScheduler {
    async fn job_exists(&self, job: &str) -> bool {
        match self.kind {
            SchedulerKind::Slurm => Self::output("squeue", &["-h", "-n", job])
                .await
                .is_some_and(|o| o.status.success() && !o.stdout.trim_ascii().is_empty()),
            SchedulerKind::Pbs => Self::output("qstat", &[])
                .await
                .is_some_and(|o| String::from_utf8_lossy(&o.stdout).contains(job)),
            SchedulerKind::Local => Self::output("pgrep", &["-f", job])
                .await
                .is_some_and(|o| o.status.success()),
            SchedulerKind::None => false,
        }
    }
}

/// Watchdog settings.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Delay between two checks.
    pub interval: Duration,
    /// Quiet period tolerated before asking the scheduler.
    pub threshold: Duration,
    /// Consecutive misses before aborting.
    pub max_strikes: u32,
    /// Sentinel file whose presence aborts immediately.
    pub kill_file: PathBuf,
    /// Job name passed to the scheduler.
    pub job_name: String,
}

impl WatchdogConfig {
    /// Creates a config with default timings.
    pub fn new(kill_file: impl Into<PathBuf>, job_name: impl Into<String>) -> Self {
        Self {
            interval: DEFAULT_CHECK_INTERVAL,
            threshold: DEFAULT_PING_THRESHOLD,
            max_strikes: DEFAULT_MAX_STRIKES,
            kill_file: kill_file.into(),
            job_name: job_name.into(),
        }
    }

    /// Sets the check interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the quiet threshold.
    #[must_use]
    pub const fn with_threshold(mut self, threshold: Duration) -> Self {
        self.threshold = threshold;
        self
    }
}

/// Last ping and the miss counter, shared with the server.
#[derive(Debug, Clone, Copy)]
pub struct PingState {
    /// When a worker last showed signs of life.
    pub last_ping: Instant,
    /// Consecutive checks that found no process.
    pub strikes: u32,
}

impl PingState {
    /// Fresh state pinged at `now`.
    pub const fn new(now: Instant) -> Self {
        Self {
            last_ping: now,
            strikes: 0,
        }
    }
}

/// Why the watchdog aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The kill sentinel exists.
    KillFile,
    /// The scheduler reported no process too many times in a row.
    NoProcess,
}

/// Outcome of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Keep going.
    Healthy,
    /// No process found; this many consecutive misses so far.
    Strike(u32),
    /// Stop the server.
    Abort(AbortReason),
}

/// Periodic liveness check.
#[derive(Debug)]
pub struct PingWatchdog<S> {
    config: WatchdogConfig,
    scheduler: S,
    ping: Arc<Mutex<PingState>>,
}

impl<S: JobScheduler> PingWatchdog<S> {
    /// Creates a watchdog over the shared ping state.
    pub fn new(config: WatchdogConfig, scheduler: S, ping: Arc<Mutex<PingState>>) -> Self {
        Self {
            config,
            scheduler,
            ping,
        }
    }

    /// Current strike count.
    pub fn strikes(&self) -> u32 {
        self.ping.lock().strikes
    }

    /// Runs one check as of `now`.
    pub async fn check_at(&self, now: Instant) -> Verdict {
        if self.config.kill_file.exists() {
            info!(path = %self.config.kill_file.display(), "process killed by external order");
            return Verdict::Abort(AbortReason::KillFile);
        }

        let (seen, quiet) = {
            let mut ping = self.ping.lock();
            let quiet = now.saturating_duration_since(ping.last_ping);
            if quiet < self.config.threshold {
                ping.strikes = 0;
                return Verdict::Healthy;
            }
            (ping.last_ping, quiet)
        };

        let exists = self.scheduler.job_exists(&self.config.job_name).await;
        debug!(quiet_secs = quiet.as_secs(), exists, "last ping is old, asked scheduler");

        let mut ping = self.ping.lock();
        // a worker may have pinged while the scheduler was busy answering
        let pinged_meanwhile = ping.last_ping > seen
            || now.saturating_duration_since(ping.last_ping) < self.config.threshold;
        if exists || pinged_meanwhile {
            ping.last_ping = ping.last_ping.max(now);
            ping.strikes = 0;
            return Verdict::Healthy;
        }

        ping.strikes += 1;
        warn!(strikes = ping.strikes, "no other process is running");
        if ping.strikes >= self.config.max_strikes {
            return Verdict::Abort(AbortReason::NoProcess);
        }
        ping.last_ping = now;
        Verdict::Strike(ping.strikes)
    }

    /// Checks every interval until aborting or until `abort` is cancelled.
    pub async fn run(self, abort: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = abort.cancelled() => return,
                _ = ticker.tick() => {}
            }

            if let Verdict::Abort(reason) = self.check_at(Instant::now()).await {
                warn!(?reason, "watchdog aborting the log server");
                abort.cancel();
                return;
            }
        }
    }
}
