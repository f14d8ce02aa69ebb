//! Compute nodes.

use skiff_proto::{Command, NodeId, NodeStats, SpawnContainerReply};
use tracing::info;

use crate::container::Container;
use crate::error::Result;
use crate::location::Location;
use crate::volume::validate_tag;

/// A node offered by the location.
#[derive(Debug, Clone)]
pub struct Node {
    uuid: NodeId,
    location: Location,
}

impl Node {
    pub(crate) const fn new(uuid: NodeId, location: Location) -> Self {
        Self { uuid, location }
    }

    /// Node id.
    #[must_use]
    pub const fn uuid(&self) -> NodeId {
        self.uuid
    }

    /// Latest statistics.
    pub fn stats(&self) -> Result<NodeStats> {
        self.location.node_stats(self.uuid)
    }

    /// Spawn a container from `image`, optionally advertised under `tag`.
    pub async fn spawn_container(&self, image: &str, tag: Option<&str>) -> Result<Container> {
        if let Some(tag) = tag {
            validate_tag(tag)?;
        }
        let reply: SpawnContainerReply = self
            .location
            .conn()
            .send_blocking_cmd(
                Command::SpawnContainer {
                    node: self.uuid,
                    image: image.to_string(),
                    tag: tag.map(String::from),
                },
                self.location.config().rpc_timeout(),
            )
            .await?;
        info!(node = %self.uuid, container = %reply.container, image, "container spawned");
        self.location
            .register_container(self.uuid, reply.container, reply.ip, image, tag)
    }

    /// Containers this session runs on the node.
    pub fn containers(&self) -> Result<Vec<Container>> {
        self.location.containers_on(self.uuid)
    }

    /// Destroy a container on this node.
    pub fn destroy_container(&self, container: &Container) -> Result<()> {
        self.location.destroy_container(self.uuid, container.uuid())
    }
}
