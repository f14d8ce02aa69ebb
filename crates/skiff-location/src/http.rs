//! HTTP liveness polling.

use std::time::Duration;

use tracing::{debug, info};

use crate::error::{LocationError, Result};

/// How to poll a URL for a 200.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpPoll {
    /// Number of requests before giving up.
    pub attempts: u32,
    /// Pause between failed attempts.
    pub interval: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for HttpPoll {
    fn default() -> Self {
        Self {
            attempts: 30,
            interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(2),
        }
    }
}

impl HttpPoll {
    /// Builder: attempts.
    #[must_use]
    pub const fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Builder: pause between attempts.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Poll `url` until it answers 200.
///
/// Connection failures and request timeouts count as failed attempts. The
/// error names the URL.
pub async fn wait_http_200(url: &str, poll: &HttpPoll) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(poll.request_timeout)
        .build()
        .map_err(|e| LocationError::Http(e.to_string()))?;

    for attempt in 1..=poll.attempts {
        match client.get(url).send().await {
            Ok(response) if response.status() == reqwest::StatusCode::OK => {
                info!(url, attempt, "connected");
                return Ok(());
            }
            Ok(response) => debug!(url, attempt, status = %response.status(), "not ready"),
            Err(e) => debug!(url, attempt, error = %e, "not ready"),
        }
        if attempt < poll.attempts {
            tokio::time::sleep(poll.interval).await;
        }
    }
    Err(LocationError::HttpNotReady {
        url: url.to_string(),
    })
}

/// Build the polled URL; `path` is taken relative to the root.
#[must_use]
pub fn poll_url(scheme: &str, host: &str, port: Option<u16>, path: Option<&str>) -> String {
    let path = path.unwrap_or("").trim_start_matches('/');
    match port {
        Some(port) => format!("{scheme}://{host}:{port}/{path}"),
        None => format!("{scheme}://{host}/{path}"),
    }
}
