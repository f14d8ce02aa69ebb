//! Command line interface of the `skiff-logd` binary.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use crate::config::{DEFAULT_JOB_NAME, LaunchSpec, LogdConfig};
use crate::error::Result;

/// Job log aggregation server.
#[derive(Parser, Debug, Clone)]
#[command(name = "skiff-logd", version, about = "Aggregates job logs shipped over TCP")]
pub struct Cli {
    /// `<scheduler>::<host>::<port>::<dir>::<njobs>`; port 0 searches from 9032,
    /// a negative job count reads `LOGS/Jobs.log`.
    #[arg(long = "launch_logger", value_name = "SPEC")]
    pub launch_logger: Option<LaunchSpec>,

    /// Root directory for `LOGS/` and the `KILLED` sentinel; created if missing.
    #[arg(long = "log_directory", value_name = "DIR")]
    pub log_directory: Option<PathBuf>,

    /// Jobs run one after the other.
    #[arg(long = "launch_sequential_jobs")]
    pub launch_sequential_jobs: bool,

    /// Verbose diagnostics.
    #[arg(long)]
    pub debug: bool,

    /// Verbose diagnostics for the logger itself.
    #[arg(long)]
    pub debuglogger: bool,

    /// Checksum id forwarded by the launcher.
    #[arg(long = "checksum_id", num_args = 0..=1, default_missing_value = "")]
    pub checksum_id: Option<String>,

    /// Timestamp forwarded by the launcher.
    #[arg(long, num_args = 0..=1, default_missing_value = "")]
    pub timestamp: Option<String>,

    /// Job name the scheduler knows the workers by.
    #[arg(long)]
    pub project: Option<String>,

    /// Write every record to this one sink.
    #[arg(long = "log_name", value_name = "NAME")]
    pub log_name: Option<String>,
}

impl Cli {
    /// Whether either debug flag was given.
    pub const fn is_debug(&self) -> bool {
        self.debug || self.debuglogger
    }

    /// Builds the server configuration, creating the log directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the log directory cannot be created.
    pub fn into_config(self) -> Result<LogdConfig> {
        let debug = self.is_debug();
        let log_directory = self
            .log_directory
            .or_else(|| self.launch_logger.as_ref().map(|l| l.directory.clone()))
            .unwrap_or_else(|| PathBuf::from("."));

        if !log_directory.is_dir() {
            fs::create_dir_all(&log_directory)?;
            info!(dir = %log_directory.display(), "created log directory");
        }

        let mut config = LogdConfig::new(log_directory)
            .with_job_name(self.project.unwrap_or_else(|| DEFAULT_JOB_NAME.to_string()))
            .with_debug(debug);
        if let Some(spec) = self.launch_logger {
            config = config.with_launch(spec);
        }
        if let Some(name) = self.log_name {
            config = config.with_fixed_name(name);
        }
        config.sequential = self.launch_sequential_jobs;
        config.checksum_id = self.checksum_id;
        config.timestamp = self.timestamp;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watchdog::SchedulerKind;
    use clap::error::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_cli_full_command_line() {
        let dir = TempDir::new().expect("temp dir");
        let log_dir = dir.path().join("new/logs");
        let cli = Cli::try_parse_from([
            "skiff-logd".to_string(),
            "--launch_logger=slurm::node1::0::/work::12".to_string(),
            format!("--log_directory={}", log_dir.display()),
            "--launch_sequential_jobs".to_string(),
            "--debuglogger".to_string(),
            "--checksum_id".to_string(),
            "--timestamp=20240305".to_string(),
            "--project=mesh".to_string(),
        ])
        .expect("parse");

        assert!(cli.is_debug());
        assert_eq!(cli.checksum_id.as_deref(), Some(""));

        let config = cli.into_config().expect("config");
        assert!(log_dir.is_dir());
        assert_eq!(config.log_directory, log_dir);
        assert_eq!(config.scheduler, SchedulerKind::Slurm);
        assert_eq!(config.host, "node1");
        assert_eq!(config.port, 0);
        assert_eq!(config.total_jobs, 12);
        assert_eq!(config.job_name, "mesh");
        assert!(config.sequential);
        assert!(config.debug);
        assert_eq!(config.timestamp.as_deref(), Some("20240305"));
    }

    #[test]
    fn test_cli_log_name_sets_fixed_sink() {
        let dir = TempDir::new().expect("temp dir");
        let cli = Cli::try_parse_from([
            "skiff-logd".to_string(),
            format!("--log_directory={}", dir.path().display()),
            "--log_name=everything".to_string(),
        ])
        .expect("parse");

        let config = cli.into_config().expect("config");
        assert_eq!(config.fixed_name.as_deref(), Some("everything"));
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["skiff-logd"]).expect("parse");
        assert!(!cli.is_debug());
        assert!(cli.launch_logger.is_none());
        assert!(cli.checksum_id.is_none());
    }

    #[test]
    fn test_cli_unknown_flag_rejected() {
        let err = Cli::try_parse_from(["skiff-logd", "--verbose"]).expect_err("unknown flag");
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);
    }

    #[test]
    fn test_cli_bad_launch_spec_rejected() {
        let err = Cli::try_parse_from(["skiff-logd", "--launch_logger=slurm::host"])
            .expect_err("bad spec");
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_log_directory_from_launch_spec() {
        let dir = TempDir::new().expect("temp dir");
        let spec = format!("local::127.0.0.1::9100::{}::3", dir.path().display());
        let cli = Cli::try_parse_from(["skiff-logd".to_string(), format!("--launch_logger={spec}")])
            .expect("parse");
        let config = cli.into_config().expect("config");
        assert_eq!(config.log_directory, dir.path());
        assert_eq!(config.job_name, DEFAULT_JOB_NAME);
    }
}
