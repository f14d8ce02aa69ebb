//! # skiff-logd
//!
//! Log aggregation server for batch jobs.
//!
//! Workers ship length-prefixed JSON log records over TCP. The server
//! writes each record to a rotating per-name file under `LOGS/`, tracks job
//! progress from `status`/`logger` records and stops itself once every job
//! is done, on an `Exit` order, or when the ping watchdog gives up.
//!
//! This crate provides:
//!
//! - [`LogServer`] / [`ServerState`] : the accept loop and shared state
//! - [`LogFrameCodec`] : `[u32 BE length][payload]` framing
//! - [`LogRecord`] / [`Target`] : records and their `<mode>:-:<name>` routing
//! - [`JobEvent`] : lifecycle events, structured or classified from text
//! - [`JobTracker`] : completion counters and status lines
//! - [`SinkRegistry`] / [`RotatingFile`] : size-rotated log files
//! - [`PingWatchdog`] / [`JobScheduler`] : liveness checks against the batch scheduler
//! - [`LogShipper`] : client side
//!
//! ## Example
//!
//! ```rust,no_run
//! use skiff_logd::{LogServer, LogdConfig};
//!
//! # async fn run() -> skiff_logd::Result<()> {
//! let config = LogdConfig::new("/scratch/run").with_total_jobs(100);
//! let server = LogServer::new(config)?;
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod frame;
pub mod record;
pub mod server;
pub mod sink;
pub mod tracker;
pub mod watchdog;

pub use cli::Cli;
pub use client::LogShipper;
pub use config::{LaunchSpec, LogdConfig};
pub use error::{LogdError, Result};
pub use event::{InstallPhase, JobEvent};
pub use frame::LogFrameCodec;
pub use record::{LogRecord, OpenMode, Target};
pub use server::{LogServer, ServerState, bind_first_free};
pub use sink::{RotatingFile, SinkRegistry};
pub use tracker::{Effect, JobCounters, JobTracker};
pub use watchdog::{
    CommandScheduler, JobScheduler, PingState, PingWatchdog, SchedulerKind, Verdict,
    WatchdogConfig,
};
