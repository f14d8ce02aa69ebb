//! Job completion accounting.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Local};
use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use crate::event::{InstallPhase, JobEvent};

/// Local time format used in every status line.
pub const TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Delay between an `Exit` order and the abort.
pub const DEFAULT_EXIT_GRACE: Duration = Duration::from_secs(2);

/// Delay between the last job finishing and the abort.
pub const DEFAULT_FINISHED_GRACE: Duration = Duration::from_secs(10);

/// Formats a timestamp for status lines.
pub fn time_string(now: DateTime<Local>) -> String {
    now.format(TIME_FORMAT).to_string()
}

/// Line written to the `logger` sink at startup.
pub fn starting_line(total: i64, time: &str) -> String {
    format!("STARTING  PROCESS = {total} jobs todo {time}")
}

/// Something the server must do after an event was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Write a line to the `logger` sink.
    Logger(String),
    /// Write a line to the sink the record was addressed to.
    Record(String),
    /// Abort the server after the delay.
    Abort(Duration),
}

/// Snapshot of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobCounters {
    /// Jobs expected.
    pub total: i64,
    /// Jobs terminated.
    pub done: u64,
    /// Jobs terminated with a critical failure.
    pub failed: u64,
    /// Jobs currently processing.
    pub running: usize,
    /// Jobs currently installing.
    pub installing: usize,
    /// Jobs that finished installing.
    pub installed: usize,
}

/// Tracks which jobs are running, installing and done.
#[derive(Debug)]
pub struct JobTracker {
    total: i64,
    done: u64,
    failed: u64,
    running: IndexMap<String, DateTime<Local>>,
    to_install: IndexSet<String>,
    installed: IndexSet<String>,
    terminated: HashSet<String>,
    exit_grace: Duration,
    finished_grace: Duration,
    debug: bool,
}

impl JobTracker {
    /// Creates a tracker expecting `total` jobs.
    pub fn new(total: i64) -> Self {
        Self {
            total,
            done: 0,
            failed: 0,
            running: IndexMap::new(),
            to_install: IndexSet::new(),
            installed: IndexSet::new(),
            terminated: HashSet::new(),
            exit_grace: DEFAULT_EXIT_GRACE,
            finished_grace: DEFAULT_FINISHED_GRACE,
            debug: false,
        }
    }

    /// Sets the abort delays after `Exit` and after the last job.
    #[must_use]
    pub const fn with_grace(mut self, exit: Duration, finished: Duration) -> Self {
        self.exit_grace = exit;
        self.finished_grace = finished;
        self
    }

    /// Reports duplicate terminations on the `logger` sink.
    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Current counters.
    pub fn counters(&self) -> JobCounters {
        JobCounters {
            total: self.total,
            done: self.done,
            failed: self.failed,
            running: self.running.len(),
            installing: self.to_install.len(),
            installed: self.installed.len(),
        }
    }

    /// When `job` started processing, if it is running.
    pub fn started_at(&self, job: &str) -> Option<DateTime<Local>> {
        self.running.get(job).copied()
    }

    /// Whether every expected job has terminated.
    pub fn is_finished(&self) -> bool {
        self.total >= 0 && self.done as i64 == self.total
    }

    /// Share of jobs done, in percent. Zero when no total is known.
    pub fn percent(&self) -> f64 {
        if self.total <= 0 {
            return 0.0;
        }
        100.0 * self.done as f64 / self.total as f64
    }

    /// Progress line for the `logger` sink.
    pub fn progress_line(&self, time: &str) -> String {
        format!(
            "{} jobs done ( {} failed ) out of {}  = {:6.2} % ({} running, {} installing) {}",
            self.done,
            self.failed,
            self.total,
            self.percent(),
            self.running.len(),
            self.to_install.len(),
            time
        )
    }

    /// Final line once every job has terminated.
    pub fn goodbye_line(&self, time: &str) -> String {
        format!(
            "goodbye : all {} jobs done ( {} failed )  {}",
            self.total, self.failed, time
        )
    }

    /// Applies one event and returns what the server must do.
    ///
    /// `message` is the record text, echoed to the record's sink where the
    /// event calls for it.
    pub fn apply(&mut self, event: &JobEvent, message: &str, now: DateTime<Local>) -> Vec<Effect> {
        let time = time_string(now);
        match event {
            JobEvent::Exit => vec![
                Effect::Record(format!("received Exit order {time}")),
                Effect::Record(format!("KILLED {time}")),
                Effect::Abort(self.exit_grace),
            ],
            JobEvent::Install { job, phase } => {
                let mut effects = Vec::new();
                match phase {
                    Some(InstallPhase::Checking | InstallPhase::Ongoing) => {
                        self.to_install.insert(job.clone());
                        effects.push(Effect::Logger(self.progress_line(&time)));
                    }
                    Some(InstallPhase::Ok) => {
                        self.installed.insert(job.clone());
                        if self.to_install.shift_remove(job) {
                            effects.push(Effect::Logger(self.progress_line(&time)));
                        }
                    }
                    None => {}
                }
                effects.push(Effect::Record(message.to_string()));
                effects
            }
            JobEvent::Processing { job } => {
                self.running.insert(job.clone(), now);
                vec![Effect::Logger(self.progress_line(&time))]
            }
            JobEvent::Terminated { job, failed } => {
                if !self.terminated.insert(job.clone()) {
                    debug!(job = %job, "job terminated twice");
                    let mut effects = Vec::new();
                    if self.debug {
                        effects.push(Effect::Logger(format!(
                            "!!!!! job #{job} Terminated twice !!!!!! {time}"
                        )));
                    }
                    effects.push(Effect::Record(message.to_string()));
                    return effects;
                }

                self.running.shift_remove(job);
                if *failed {
                    self.failed += 1;
                }
                self.done += 1;

                let mut effects = vec![Effect::Logger(self.progress_line(&time))];
                if self.is_finished() {
                    effects.push(Effect::Logger(self.goodbye_line(&time)));
                    effects.push(Effect::Record(message.to_string()));
                    effects.push(Effect::Abort(self.finished_grace));
                } else {
                    effects.push(Effect::Record(message.to_string()));
                }
                effects
            }
            JobEvent::Ping { .. } => Vec::new(),
            JobEvent::Other => {
                debug!(message, "ignoring status message");
                Vec::new()
            }
        }
    }
}
