//! Server configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{LogdError, Result};
use crate::frame::DEFAULT_MAX_FRAME_LEN;
use crate::record::is_valid_name;
use crate::sink::{DEFAULT_BACKUP_COUNT, DEFAULT_MAX_BYTES};
use crate::tracker::{DEFAULT_EXIT_GRACE, DEFAULT_FINISHED_GRACE};
use crate::watchdog::{
    DEFAULT_CHECK_INTERVAL, DEFAULT_PING_THRESHOLD, SchedulerKind, WatchdogConfig,
};

/// Default listen host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// First port tried when no port is given.
pub const DEFAULT_PORT_SEARCH_START: u16 = 9032;

/// Sub-directory of the log directory holding the sinks.
pub const LOGS_DIR: &str = "LOGS";

/// Sentinel file that stops the server.
pub const KILL_FILE: &str = "KILLED";

/// File under [`LOGS_DIR`] announcing the job total.
pub const JOBS_FILE: &str = "Jobs.log";

/// Job name handed to the scheduler when no project is set.
pub const DEFAULT_JOB_NAME: &str = "skiff";

/// Parsed `--launch_logger=<type>::<host>::<port>::<dir>::<njobs>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Scheduler queried by the watchdog.
    pub scheduler: SchedulerKind,
    /// Listen host.
    pub host: String,
    /// Listen port, 0 to search from [`DEFAULT_PORT_SEARCH_START`].
    pub port: u16,
    /// Working directory of the launch.
    pub directory: PathBuf,
    /// Jobs expected, negative to read [`JOBS_FILE`].
    pub njobs: i64,
}

impl FromStr for LaunchSpec {
    type Err = LogdError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| LogdError::InvalidLaunchSpec {
            spec: s.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = s.split("::").collect();
        let [kind, host, port, directory, njobs] = parts.as_slice() else {
            return Err(invalid("expected 5 fields separated by '::'"));
        };

        let scheduler: SchedulerKind = kind.parse()?;
        let port: u16 = port
            .trim()
            .parse()
            .map_err(|_| invalid("port is not a number"))?;
        let njobs: i64 = njobs
            .trim()
            .parse()
            .map_err(|_| invalid("job count is not a number"))?;
        if host.is_empty() {
            return Err(invalid("empty host"));
        }

        Ok(Self {
            scheduler,
            host: (*host).to_string(),
            port,
            directory: PathBuf::from(directory),
            njobs,
        })
    }
}

/// Configuration for the log server.
#[derive(Debug, Clone)]
pub struct LogdConfig {
    /// Listen host.
    pub host: String,
    /// Listen port, 0 to search from [`DEFAULT_PORT_SEARCH_START`].
    pub port: u16,
    /// Root directory; sinks live under `LOGS/`.
    pub log_directory: PathBuf,
    /// Jobs expected, negative to read [`JOBS_FILE`] at startup.
    pub total_jobs: i64,
    /// Scheduler queried by the watchdog.
    pub scheduler: SchedulerKind,
    /// Job name handed to the scheduler.
    pub job_name: String,
    /// Sink receiving every record regardless of its name.
    pub fixed_name: Option<String>,
    /// Largest accepted frame payload.
    pub max_frame_len: usize,
    /// Sink rotation size.
    pub max_bytes: u64,
    /// Rotated files kept per sink.
    pub backup_count: usize,
    /// Watchdog check interval.
    pub watchdog_interval: Duration,
    /// Quiet period before the scheduler is consulted.
    pub ping_threshold: Duration,
    /// Delay between an `Exit` order and the abort.
    pub exit_grace: Duration,
    /// Delay between the last job finishing and the abort.
    pub finished_grace: Duration,
    /// Verbose diagnostics.
    pub debug: bool,
    /// Jobs are launched one after the other.
    pub sequential: bool,
    /// Checksum id forwarded by the launcher.
    pub checksum_id: Option<String>,
    /// Timestamp forwarded by the launcher.
    pub timestamp: Option<String>,
}

impl LogdConfig {
    /// Creates a configuration rooted at `log_directory` with defaults.
    #[must_use]
    pub fn new(log_directory: impl Into<PathBuf>) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: 0,
            log_directory: log_directory.into(),
            total_jobs: -1,
            scheduler: SchedulerKind::None,
            job_name: DEFAULT_JOB_NAME.to_string(),
            fixed_name: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            max_bytes: DEFAULT_MAX_BYTES,
            backup_count: DEFAULT_BACKUP_COUNT,
            watchdog_interval: DEFAULT_CHECK_INTERVAL,
            ping_threshold: DEFAULT_PING_THRESHOLD,
            exit_grace: DEFAULT_EXIT_GRACE,
            finished_grace: DEFAULT_FINISHED_GRACE,
            debug: false,
            sequential: false,
            checksum_id: None,
            timestamp: None,
        }
    }

    /// Applies a launch spec: host, port, scheduler and job total.
    #[must_use]
    pub fn with_launch(mut self, spec: LaunchSpec) -> Self {
        self.host = spec.host;
        self.port = spec.port;
        self.scheduler = spec.scheduler;
        self.total_jobs = spec.njobs;
        self
    }

    /// Set the listen host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the listen port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the job total.
    #[must_use]
    pub const fn with_total_jobs(mut self, total: i64) -> Self {
        self.total_jobs = total;
        self
    }

    /// Set the scheduler.
    #[must_use]
    pub const fn with_scheduler(mut self, scheduler: SchedulerKind) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Set the job name handed to the scheduler.
    #[must_use]
    pub fn with_job_name(mut self, name: impl Into<String>) -> Self {
        self.job_name = name.into();
        self
    }

    /// Route every record to one sink.
    #[must_use]
    pub fn with_fixed_name(mut self, name: impl Into<String>) -> Self {
        self.fixed_name = Some(name.into());
        self
    }

    /// Set the abort delays after `Exit` and after the last job.
    #[must_use]
    pub const fn with_grace(mut self, exit: Duration, finished: Duration) -> Self {
        self.exit_grace = exit;
        self.finished_grace = finished;
        self
    }

    /// Set the sink rotation policy.
    #[must_use]
    pub const fn with_rotation(mut self, max_bytes: u64, backup_count: usize) -> Self {
        self.max_bytes = max_bytes;
        self.backup_count = backup_count;
        self
    }

    /// Set the debug flag.
    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Directory holding the sinks.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.log_directory.join(LOGS_DIR)
    }

    /// Kill sentinel path.
    #[must_use]
    pub fn kill_file(&self) -> PathBuf {
        self.log_directory.join(KILL_FILE)
    }

    /// File announcing the job total.
    #[must_use]
    pub fn jobs_file(&self) -> PathBuf {
        self.logs_dir().join(JOBS_FILE)
    }

    /// Watchdog settings derived from this configuration.
    #[must_use]
    pub fn watchdog(&self) -> WatchdogConfig {
        WatchdogConfig::new(self.kill_file(), self.job_name.clone())
            .with_interval(self.watchdog_interval)
            .with_threshold(self.ping_threshold)
    }

    /// Checks the configuration for values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.fixed_name {
            if !is_valid_name(name) {
                return Err(LogdError::InvalidName(name.clone()));
            }
        }
        if self.host.is_empty() {
            return Err(LogdError::InvalidLaunchSpec {
                spec: String::new(),
                reason: "empty host".to_string(),
            });
        }
        Ok(())
    }

    /// Job total, read from [`JOBS_FILE`] when the configured one is negative.
    pub fn resolve_total(&self) -> Result<i64> {
        if self.total_jobs >= 0 {
            return Ok(self.total_jobs);
        }
        read_job_total(&self.jobs_file())
    }
}

/// Reads the second column of the first line mentioning `Job_total`.
pub fn read_job_total(path: &Path) -> Result<i64> {
    let content = fs::read_to_string(path)
        .map_err(|e| LogdError::JobTotal(format!("{}: {e}", path.display())))?;
    let line = content
        .lines()
        .find(|line| line.contains("Job_total"))
        .ok_or_else(|| LogdError::JobTotal(format!("no Job_total line in {}", path.display())))?;
    line.split_whitespace()
        .nth(1)
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| LogdError::JobTotal(format!("unreadable Job_total line: {line}")))
}
