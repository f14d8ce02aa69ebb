//! Containers spawned by this session, and handles onto foreign ones.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use skiff_proto::{ContainerId, ContainerStatus, NodeId};
use tokio::sync::watch;

use crate::error::{LocationError, Result};
use crate::location::Location;
use crate::tunnel::Tunnel;

/// Location-side record of a container.
#[derive(Debug)]
pub(crate) struct ContainerRecord {
    pub(crate) uuid: ContainerId,
    pub(crate) node: NodeId,
    pub(crate) ip: String,
    pub(crate) image: String,
    pub(crate) tag: Option<String>,
    status: watch::Sender<ContainerStatus>,
}

impl ContainerRecord {
    pub(crate) fn new(
        uuid: ContainerId,
        node: NodeId,
        ip: String,
        image: String,
        tag: Option<String>,
        status: ContainerStatus,
    ) -> Self {
        let (status, _) = watch::channel(status);
        Self {
            uuid,
            node,
            ip,
            image,
            tag,
            status,
        }
    }

    pub(crate) fn status(&self) -> ContainerStatus {
        *self.status.borrow()
    }

    pub(crate) fn set_status(&self, status: ContainerStatus) {
        self.status.send_replace(status);
    }
}

/// A container spawned through this location.
#[derive(Clone)]
pub struct Container {
    record: Arc<ContainerRecord>,
    location: Location,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("uuid", &self.record.uuid)
            .field("node", &self.record.node)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Container {
    pub(crate) const fn new(record: Arc<ContainerRecord>, location: Location) -> Self {
        Self { record, location }
    }

    /// Container id.
    #[must_use]
    pub fn uuid(&self) -> ContainerId {
        self.record.uuid
    }

    /// Node the container runs on.
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.record.node
    }

    /// Container ip on the node network.
    #[must_use]
    pub fn ip(&self) -> &str {
        &self.record.ip
    }

    /// Image the container runs.
    #[must_use]
    pub fn image(&self) -> &str {
        &self.record.image
    }

    /// Tag advertising the container, if any.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.record.tag.as_deref()
    }

    /// Last known status.
    #[must_use]
    pub fn status(&self) -> ContainerStatus {
        self.record.status()
    }

    /// Wait until the container is running.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.record.status.subscribe();
        let status = match tokio::time::timeout(
            timeout,
            rx.wait_for(|s| *s != ContainerStatus::Pending),
        )
        .await
        {
            Ok(Ok(status)) => *status,
            Ok(Err(_)) => ContainerStatus::Dead,
            Err(_) => {
                return Err(LocationError::ContainerNotReady {
                    container: self.uuid(),
                    timeout,
                });
            }
        };
        match status {
            ContainerStatus::Dead => Err(LocationError::ContainerDead(self.uuid())),
            _ => Ok(()),
        }
    }

    /// Open a tunnel from a local port onto `port` inside the container.
    pub async fn attach_tunnel(
        &self,
        port: u16,
        localport: Option<u16>,
        bind: Option<IpAddr>,
        timeout: Duration,
    ) -> Result<Arc<Tunnel>> {
        self.location
            .tunnel_onto(self, port, localport, bind, timeout)
            .await
    }

    /// Wait until `port` accepts TCP connections inside the container.
    pub async fn wait_tcp(&self, port: u16) -> Result<()> {
        self.location.wait_tcp(self, port).await
    }

    /// Tunnel onto `port` and poll `http://<fqdn>:<localport>/<path>` for a 200.
    ///
    /// `fqdn` must resolve to 127.0.0.1. The tunnel stays open on success.
    pub async fn wait_http_200(
        &self,
        port: u16,
        fqdn: &str,
        path: Option<&str>,
        localport: Option<u16>,
    ) -> Result<Arc<Tunnel>> {
        self.location
            .wait_http_200(self, port, fqdn, path, localport)
            .await
    }

    /// Tear down one of this container's tunnels.
    pub fn destroy_tunnel(&self, tunnel: &Tunnel) -> Result<()> {
        self.location
            .destroy_tunnel(tunnel, Some(self.uuid()), true)
    }

    /// Tunnels currently open onto this container.
    #[must_use]
    pub fn all_tunnels(&self) -> Vec<Arc<Tunnel>> {
        self.location.tunnels_for(self.uuid())
    }

    /// Destroy the container and its tunnels.
    pub fn destroy(&self) -> Result<()> {
        self.location.destroy_container(self.node(), self.uuid())
    }
}

/// A container owned by another session, found through its tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalContainer {
    /// Container id.
    pub uuid: ContainerId,
    /// Node it runs on.
    pub node: NodeId,
    /// Container ip.
    pub ip: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_status_updates() {
        let record = ContainerRecord::new(
            ContainerId::new(),
            NodeId::new(),
            "10.1.0.2".into(),
            "nginx".into(),
            None,
            ContainerStatus::Pending,
        );
        assert_eq!(record.status(), ContainerStatus::Pending);
        record.set_status(ContainerStatus::Running);
        assert_eq!(record.status(), ContainerStatus::Running);
    }
}
