//! Job lifecycle events carried by status records.

use serde::{Deserialize, Serialize};

use crate::error::{LogdError, Result};

/// Separator between the job id and the rest of a lifecycle message.
pub const JOB_SEPARATOR: &str = " : ";

/// Stage of a job's software installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallPhase {
    /// Checking whether installation is needed.
    Checking,
    /// Installation in progress.
    Ongoing,
    /// Installation finished.
    Ok,
}

/// A job lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobEvent {
    /// Stop the whole server.
    Exit,
    /// Installation progress for a job.
    Install {
        /// Job id.
        job: String,
        /// Phase, if one was named.
        #[serde(default)]
        phase: Option<InstallPhase>,
    },
    /// A job started processing.
    Processing {
        /// Job id.
        job: String,
    },
    /// A job ended.
    Terminated {
        /// Job id.
        job: String,
        /// Whether it ended in a critical failure.
        failed: bool,
    },
    /// Liveness ping from a worker.
    Ping {
        /// Worker identifier.
        from: String,
    },
    /// Anything else.
    Other,
}

impl JobEvent {
    /// Classifies a plain-text status message.
    ///
    /// Checks happen in a fixed order, so `"Exit"` anywhere wins over every
    /// other keyword.
    pub fn classify(msg: &str) -> Result<Self> {
        if msg.contains("Exit") {
            return Ok(Self::Exit);
        }
        if msg.contains("Installation") {
            let job = job_id(msg)?;
            let phase = if msg.contains("Checking") {
                Some(InstallPhase::Checking)
            } else if msg.contains("Ongoing") {
                Some(InstallPhase::Ongoing)
            } else if msg.contains("OK") {
                Some(InstallPhase::Ok)
            } else {
                None
            };
            return Ok(Self::Install { job, phase });
        }
        if msg.contains("Processing") {
            return Ok(Self::Processing { job: job_id(msg)? });
        }
        if msg.contains("Terminated") {
            return Ok(Self::Terminated {
                job: job_id(msg)?,
                failed: msg.contains("CRITICAL"),
            });
        }
        if let Some((_, rest)) = msg.split_once("Ping from") {
            return Ok(Self::Ping {
                from: rest.trim().to_string(),
            });
        }
        Ok(Self::Other)
    }

    /// Job id the event refers to, if any.
    pub fn job(&self) -> Option<&str> {
        match self {
            Self::Install { job, .. } | Self::Processing { job } | Self::Terminated { job, .. } => {
                Some(job)
            }
            Self::Exit | Self::Ping { .. } | Self::Other => None,
        }
    }
}

fn job_id(msg: &str) -> Result<String> {
    let (job, _) = msg
        .split_once(JOB_SEPARATOR)
        .ok_or_else(|| LogdError::Malformed(msg.to_string()))?;
    let job = job.trim();
    if job.is_empty() {
        return Err(LogdError::Malformed(msg.to_string()));
    }
    Ok(job.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("Exit" => JobEvent::Exit ; "bare exit")]
    #[test_case("12 : Processing Exit" => JobEvent::Exit ; "exit wins")]
    #[test_case("3 : Installation Checking" => JobEvent::Install { job: "3".into(), phase: Some(InstallPhase::Checking) } ; "install checking")]
    #[test_case("3 : Installation Ongoing" => JobEvent::Install { job: "3".into(), phase: Some(InstallPhase::Ongoing) } ; "install ongoing")]
    #[test_case("3 : Installation OK" => JobEvent::Install { job: "3".into(), phase: Some(InstallPhase::Ok) } ; "install ok")]
    #[test_case("3 : Installation started" => JobEvent::Install { job: "3".into(), phase: None } ; "install no phase")]
    #[test_case("7 : Processing" => JobEvent::Processing { job: "7".into() } ; "processing")]
    #[test_case("7 : Terminated" => JobEvent::Terminated { job: "7".into(), failed: false } ; "terminated ok")]
    #[test_case("7 : Terminated CRITICAL" => JobEvent::Terminated { job: "7".into(), failed: true } ; "terminated critical")]
    #[test_case("Ping from 42" => JobEvent::Ping { from: "42".into() } ; "ping")]
    #[test_case("hello world" => JobEvent::Other ; "other")]
    fn test_classify(msg: &str) -> JobEvent {
        JobEvent::classify(msg).expect("classify")
    }

    #[test_case("Processing" ; "no separator")]
    #[test_case(" : Terminated" ; "empty job")]
    fn test_classify_malformed(msg: &str) {
        assert!(matches!(
            JobEvent::classify(msg),
            Err(LogdError::Malformed(_))
        ));
    }

    #[test]
    fn test_event_json_shape() {
        let event = JobEvent::Terminated {
            job: "4".into(),
            failed: true,
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["kind"], "terminated");
        assert_eq!(json["job"], "4");
        assert_eq!(json["failed"], true);

        let parsed: JobEvent =
            serde_json::from_str(r#"{"kind":"install","job":"9"}"#).expect("parse");
        assert_eq!(
            parsed,
            JobEvent::Install {
                job: "9".into(),
                phase: None
            }
        );
    }

    #[test]
    fn test_event_job() {
        assert_eq!(JobEvent::Processing { job: "1".into() }.job(), Some("1"));
        assert_eq!(JobEvent::Exit.job(), None);
    }
}
