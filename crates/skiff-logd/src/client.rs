//! Worker-side record shipping.

use futures::SinkExt;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::FramedWrite;
use tracing::debug;

use crate::error::Result;
use crate::event::JobEvent;
use crate::frame::LogFrameCodec;
use crate::record::{LOGGER_NAME, LogRecord, NAME_SEPARATOR, OpenMode};

/// Name that status events are sent under.
pub const STATUS_NAME: &str = "status";

/// Sends framed records to a log server.
#[derive(Debug)]
pub struct LogShipper {
    frames: FramedWrite<TcpStream, LogFrameCodec>,
}

impl LogShipper {
    /// Connects to the server at `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        debug!(peer = ?stream.peer_addr().ok(), "connected to log server");
        Ok(Self {
            frames: FramedWrite::new(stream, LogFrameCodec::default()),
        })
    }

    /// Sends a record.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    pub async fn send_record(&mut self, record: &LogRecord) -> Result<()> {
        self.frames.send(record.to_bytes()?).await
    }

    /// Sends `msg` to the sink called `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    pub async fn send(&mut self, name: &str, mode: OpenMode, msg: &str) -> Result<()> {
        self.send_record(&LogRecord::new(record_name(name, mode), msg))
            .await
    }

    /// Sends a structured lifecycle event on the status sink, with `msg` as
    /// its text.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    pub async fn send_event(&mut self, event: JobEvent, msg: &str) -> Result<()> {
        let record = LogRecord::new(record_name(STATUS_NAME, OpenMode::Append), msg).with_event(event);
        self.send_record(&record).await
    }

    /// Tells the server a worker is alive.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    pub async fn ping(&mut self, from: &str) -> Result<()> {
        self.send_event(
            JobEvent::Ping {
                from: from.to_string(),
            },
            &format!("Ping from {from}"),
        )
        .await
    }

    /// Orders the server to stop.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    pub async fn exit(&mut self) -> Result<()> {
        self.send(LOGGER_NAME, OpenMode::Append, "Exit").await
    }

    /// Flushes and closes the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub async fn close(mut self) -> Result<()> {
        self.frames.close().await
    }
}

/// Builds `<mode>:-:<name>`.
pub fn record_name(name: &str, mode: OpenMode) -> String {
    let mode = match mode {
        OpenMode::Append => "a",
        OpenMode::Overwrite => "w",
    };
    format!("{mode}{NAME_SEPARATOR}{name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Target;

    #[test]
    fn test_record_name_parses_back() {
        let name = record_name("job_3", OpenMode::Overwrite);
        assert_eq!(name, "w:-:job_3");
        let target = Target::parse(&name).expect("parse");
        assert_eq!(target.mode, OpenMode::Overwrite);
        assert_eq!(target.name, "job_3");
    }
}
