//! The location: one broker session and everything leased through it.
//!
//! Application code talks to a [`Location`] from any task. Pushes from the
//! broker are applied by a [`PushHandler`] running on the connection's
//! dispatcher; work that must happen on the application's own loop is
//! queued with [`Location::call_on_main`] and drained by [`Location::run`].

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use skiff_proto::{
    ClusterId, Command, ContainerId, ContainerStatus, CreateVolumeReply, DescribeImageReply,
    FindTagReply, ImageDescription, NodeId, NodeStats, Push, TunnelId, UploadRequirementsReply,
    WriteMode,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::LocationConfig;
use crate::connection::{start_heartbeat_task, Connection, HeartbeatHandle, PushHandler, Transport};
use crate::container::{Container, ContainerRecord, ExternalContainer};
use crate::endpoint::{Cluster, WebEndpoint};
use crate::error::{LocationError, Result};
use crate::http::{wait_http_200, HttpPoll};
use crate::image::{verify_layer, ImageUpload, LayerSource};
use crate::keys::KeyPair;
use crate::node::Node;
use crate::tunnel::Tunnel;
use crate::volume::{validate_tag, Volume, VolumeIndex};

/// Timeout of the broker-side TCP liveness check.
pub const WAIT_TCP_TIMEOUT: Duration = Duration::from_secs(10);

/// Status pushes kept for containers not registered yet; the oldest go first.
pub const EARLY_STATUS_LIMIT: usize = 1024;

type MainCall = Box<dyn FnOnce(&Location) + Send>;

enum MainItem {
    Call(MainCall),
    Raise(LocationError),
    Wake,
}

#[derive(Default)]
struct NodeRecord {
    stats: NodeStats,
    containers: IndexMap<ContainerId, Arc<ContainerRecord>>,
}

#[derive(Default)]
struct State {
    nodes: IndexMap<NodeId, NodeRecord>,
    volumes: VolumeIndex,
    tunnels: HashMap<TunnelId, Arc<Tunnel>>,
    endpoints: IndexMap<String, IndexMap<ClusterId, Cluster>>,
    early_status: IndexMap<ContainerId, ContainerStatus>,
}

struct Shared {
    conn: Connection,
    config: LocationConfig,
    state: Mutex<State>,
    ready: watch::Sender<bool>,
    calls_tx: mpsc::UnboundedSender<MainItem>,
    calls_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MainItem>>,
    heartbeat: Mutex<Option<HeartbeatHandle>>,
    disconnected: AtomicBool,
}

/// A connected location. Cheap to clone.
#[derive(Clone)]
pub struct Location {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Location")
            .field("location", &self.shared.config.location)
            .field("connection", &self.shared.conn)
            .finish_non_exhaustive()
    }
}

impl Location {
    /// Connect using the key pair stored for `config.location`.
    pub async fn connect(config: LocationConfig) -> Result<Self> {
        config.validate()?;
        let keys = KeyPair::load(&config.key_prefix(), &config.location)?;
        let url = config.url();
        info!(location = %config.location, url = %url, "connecting");
        let transport = tokio::time::timeout(config.connect_timeout(), Transport::websocket(&url))
            .await
            .map_err(|_| LocationError::Connection(format!("timed out connecting to {url}")))??;
        Self::with_transport(config, transport, &keys).await
    }

    /// Authenticate over `transport`, start the heartbeat and wait for the
    /// resource offer.
    pub async fn with_transport(
        config: LocationConfig,
        transport: Transport,
        keys: &KeyPair,
    ) -> Result<Self> {
        let conn =
            Connection::establish(transport, &config.location, keys, config.connect_timeout())
                .await?;
        let (calls_tx, calls_rx) = mpsc::unbounded_channel();
        let (ready, _) = watch::channel(false);
        let location = Self {
            shared: Arc::new(Shared {
                conn: conn.clone(),
                config,
                state: Mutex::new(State::default()),
                ready,
                calls_tx,
                calls_rx: tokio::sync::Mutex::new(calls_rx),
                heartbeat: Mutex::new(None),
                disconnected: AtomicBool::new(false),
            }),
        };

        conn.register_commands(Arc::new(PushRouter {
            shared: Arc::downgrade(&location.shared),
        }));
        *location.shared.heartbeat.lock() = Some(start_heartbeat_task(
            conn,
            location.shared.config.heartbeat_interval(),
        ));

        if let Err(e) = location
            .wait_until_ready(location.shared.config.ready_timeout())
            .await
        {
            location.disconnect();
            return Err(e);
        }
        info!(location = %location.shared.config.location, "location ready");
        Ok(location)
    }

    /// Wait for the broker's resource offer.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.shared.ready.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(|ready| *ready)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(LocationError::ConnectionClosed),
            Err(_) => Err(LocationError::NotReady(timeout)),
        }
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &LocationConfig {
        &self.shared.config
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.shared.conn
    }

    // ---- nodes ----

    /// The best node.
    pub fn node(&self) -> Result<Node> {
        self.ranked_nodes()
            .into_iter()
            .next()
            .ok_or(LocationError::NoNodes)
    }

    /// Every node, best first. Equal scores keep offer order.
    #[must_use]
    pub fn ranked_nodes(&self) -> Vec<Node> {
        let mut scored: Vec<(NodeId, f64)> = self
            .shared
            .state
            .lock()
            .nodes
            .iter()
            .map(|(id, node)| (*id, node.stats.score()))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored
            .into_iter()
            .map(|(id, _)| Node::new(id, self.clone()))
            .collect()
    }

    /// Handle onto a node by id.
    pub fn node_by_id(&self, node: NodeId) -> Result<Node> {
        if self.shared.state.lock().nodes.contains_key(&node) {
            Ok(Node::new(node, self.clone()))
        } else {
            Err(LocationError::NodeNotFound(node))
        }
    }

    pub(crate) fn node_stats(&self, node: NodeId) -> Result<NodeStats> {
        self.shared
            .state
            .lock()
            .nodes
            .get(&node)
            .map(|n| n.stats)
            .ok_or(LocationError::NodeNotFound(node))
    }

    // ---- volumes ----

    /// Create a volume, optionally under a globally unique tag.
    pub async fn create_volume(&self, tag: Option<&str>, mode: WriteMode) -> Result<Volume> {
        if let Some(tag) = tag {
            validate_tag(tag)?;
            if self.shared.state.lock().volumes.has_tag(tag) {
                return Err(LocationError::TagInUse(tag.to_string()));
            }
        }
        let reply: CreateVolumeReply = self
            .conn()
            .send_blocking_cmd(
                Command::CreateVolume {
                    tag: tag.map(String::from),
                    mode,
                },
                self.config().rpc_timeout(),
            )
            .await?;
        let volume = Volume {
            uuid: reply.volume,
            tag: tag.map(String::from),
            mode,
        };
        self.shared.state.lock().volumes.insert(volume.clone())?;
        info!(volume = %volume.uuid, tag = ?volume.tag, "volume created");
        Ok(volume)
    }

    /// Destroy a volume.
    pub async fn destroy_volume(&self, volume: &Volume) -> Result<()> {
        self.conn()
            .send_acked(
                Command::DestroyVolume {
                    volume: volume.uuid,
                },
                self.config().rpc_timeout(),
            )
            .await?;
        self.shared.state.lock().volumes.remove(&volume.uuid);
        info!(volume = %volume.uuid, "volume destroyed");
        Ok(())
    }

    /// Every volume.
    #[must_use]
    pub fn all_volumes(&self) -> Vec<Volume> {
        self.shared.state.lock().volumes.iter().cloned().collect()
    }

    /// The volume with this uuid or tag.
    pub fn volume(&self, key: &str) -> Result<Volume> {
        self.shared.state.lock().volumes.get(key).cloned()
    }

    /// The volume with this uuid or tag, created under `key` as its tag if
    /// there is none.
    pub async fn ensure_volume(&self, key: &str) -> Result<Volume> {
        match self.volume(key) {
            Ok(volume) => Ok(volume),
            Err(LocationError::VolumeNotFound(_)) => {
                self.create_volume(Some(key), WriteMode::default()).await
            }
            Err(e) => Err(e),
        }
    }

    // ---- endpoints ----

    /// The endpoint able to serve `fqdn`; the longest matching domain wins.
    pub fn endpoint_for(&self, fqdn: &str) -> Result<WebEndpoint> {
        let state = self.shared.state.lock();
        state
            .endpoints
            .keys()
            .filter(|domain| crate::endpoint::subdomain_of(fqdn, domain).is_ok())
            .max_by_key(|domain| domain.len())
            .map(|domain| WebEndpoint::new(domain.clone(), self.clone()))
            .ok_or_else(|| LocationError::NoEndpoint(fqdn.to_string()))
    }

    /// Every endpoint.
    #[must_use]
    pub fn all_endpoints(&self) -> Vec<WebEndpoint> {
        self.shared
            .state
            .lock()
            .endpoints
            .keys()
            .map(|domain| WebEndpoint::new(domain.clone(), self.clone()))
            .collect()
    }

    pub(crate) fn record_cluster(&self, domain: &str, cluster: Cluster) {
        if let Some(uuid) = cluster.uuid() {
            self.shared
                .state
                .lock()
                .endpoints
                .entry(domain.to_string())
                .or_default()
                .insert(uuid, cluster);
        }
    }

    pub(crate) fn forget_cluster(&self, domain: &str, cluster: ClusterId) {
        if let Some(clusters) = self.shared.state.lock().endpoints.get_mut(domain) {
            clusters.shift_remove(&cluster);
        }
    }

    pub(crate) fn clusters_of(&self, domain: &str) -> Vec<Cluster> {
        self.shared
            .state
            .lock()
            .endpoints
            .get(domain)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }

    // ---- containers ----

    /// Handle onto a container another session advertised under `tag`.
    pub async fn container_for(&self, tag: &str) -> Result<ExternalContainer> {
        let reply: FindTagReply = self
            .conn()
            .send_blocking_cmd(
                Command::FindTag {
                    tag: tag.to_string(),
                },
                self.config().rpc_timeout(),
            )
            .await?;
        Ok(ExternalContainer {
            uuid: reply.container,
            node: reply.node,
            ip: reply.ip,
        })
    }

    pub(crate) fn register_container(
        &self,
        node: NodeId,
        uuid: ContainerId,
        ip: String,
        image: &str,
        tag: Option<&str>,
    ) -> Result<Container> {
        let mut state = self.shared.state.lock();
        let status = state.early_status.shift_remove(&uuid).unwrap_or_default();
        let record = Arc::new(ContainerRecord::new(
            uuid,
            node,
            ip,
            image.to_string(),
            tag.map(String::from),
            status,
        ));
        state
            .nodes
            .get_mut(&node)
            .ok_or(LocationError::NodeNotFound(node))?
            .containers
            .insert(uuid, Arc::clone(&record));
        drop(state);
        Ok(Container::new(record, self.clone()))
    }

    pub(crate) fn containers_on(&self, node: NodeId) -> Result<Vec<Container>> {
        let records: Vec<_> = self
            .shared
            .state
            .lock()
            .nodes
            .get(&node)
            .ok_or(LocationError::NodeNotFound(node))?
            .containers
            .values()
            .cloned()
            .collect();
        Ok(records
            .into_iter()
            .map(|r| Container::new(r, self.clone()))
            .collect())
    }

    pub(crate) fn destroy_container(&self, node: NodeId, container: ContainerId) -> Result<()> {
        let record = {
            let mut state = self.shared.state.lock();
            state
                .nodes
                .get_mut(&node)
                .ok_or(LocationError::NodeNotFound(node))?
                .containers
                .shift_remove(&container)
                .ok_or(LocationError::ContainerNotFound(container))?
        };
        for tunnel in self.take_tunnels(|t| t.container() == container) {
            tunnel.destroy(true);
        }
        record.set_status(ContainerStatus::Dead);
        self.conn()
            .send_cmd(Command::DestroyContainer { node, container })?;
        info!(node = %node, container = %container, "container destroyed");
        Ok(())
    }

    // ---- images ----

    /// Make sure the broker holds every layer of `image_id`.
    ///
    /// An explicit description is cached on the broker. Without one the
    /// broker's cached description is used, falling back to `source`.
    /// Missing layers are uploaded on a background task; a failure there is
    /// also raised on the main loop.
    pub async fn ensure_image_uploaded(
        &self,
        image_id: &str,
        description: Option<ImageDescription>,
        source: Arc<dyn LayerSource>,
    ) -> Result<ImageUpload> {
        let timeout = self.config().rpc_timeout();
        let description = match description {
            Some(description) => {
                self.cache_description(image_id, description.clone()).await?;
                description
            }
            None => {
                let reply: DescribeImageReply = self
                    .conn()
                    .send_blocking_cmd(
                        Command::DescribeImage {
                            image_id: image_id.to_string(),
                        },
                        timeout,
                    )
                    .await?;
                if let Some(description) = reply.description {
                    description
                } else {
                    let description = source.description(image_id)?;
                    self.cache_description(image_id, description.clone()).await?;
                    description
                }
            }
        };

        let layers = description.layer_stack();
        let reply: UploadRequirementsReply = self
            .conn()
            .send_blocking_cmd(
                Command::UploadRequirements {
                    layers: layers.clone(),
                },
                timeout,
            )
            .await?;
        info!(image = image_id, layers = layers.len(), missing = reply.missing.len(), "ensuring layers");

        let missing = reply.missing;
        let task = {
            let location = self.clone();
            let missing = missing.clone();
            tokio::spawn(async move {
                for sha256 in missing {
                    if let Err(e) = location.upload_layer(&sha256, &source, timeout).await {
                        let reason = e.to_string();
                        error!(layer = %sha256, error = %reason, "layer upload failed");
                        location.raise_on_main(LocationError::Layer {
                            sha256: sha256.clone(),
                            reason: reason.clone(),
                        });
                        return Err(LocationError::Layer { sha256, reason });
                    }
                }
                Ok(())
            })
        };

        Ok(ImageUpload {
            layers,
            missing,
            task,
        })
    }

    async fn cache_description(&self, image_id: &str, description: ImageDescription) -> Result<()> {
        self.conn()
            .send_acked(
                Command::CacheDescription {
                    image_id: image_id.to_string(),
                    description,
                },
                self.config().rpc_timeout(),
            )
            .await
    }

    async fn upload_layer(
        &self,
        sha256: &str,
        source: &Arc<dyn LayerSource>,
        timeout: Duration,
    ) -> Result<()> {
        let data = {
            let source = Arc::clone(source);
            let sha256 = sha256.to_string();
            tokio::task::spawn_blocking(move || source.layer(&sha256))
                .await
                .map_err(|e| LocationError::Protocol(format!("layer read task failed: {e}")))??
        };
        verify_layer(sha256, &data)?;
        debug!(layer = sha256, bytes = data.len(), "uploading layer");
        self.conn()
            .send_acked(
                Command::UploadLayer {
                    sha256: sha256.to_string(),
                    data,
                },
                timeout,
            )
            .await
    }

    // ---- tunnels ----

    pub(crate) async fn tunnel_onto(
        &self,
        container: &Container,
        port: u16,
        localport: Option<u16>,
        bind: Option<IpAddr>,
        timeout: Duration,
    ) -> Result<Arc<Tunnel>> {
        container.wait_until_ready(timeout).await?;

        let tunnel = Arc::new(Tunnel::new(
            self.conn().clone(),
            container.node(),
            container.uuid(),
            port,
            localport,
            bind,
            timeout,
        ));
        self.shared
            .state
            .lock()
            .tunnels
            .insert(tunnel.uuid(), Arc::clone(&tunnel));

        if let Err(e) = tunnel.connect().await {
            self.shared.state.lock().tunnels.remove(&tunnel.uuid());
            tunnel.destroy(false);
            return Err(e);
        }
        Ok(tunnel)
    }

    pub(crate) async fn wait_tcp(&self, container: &Container, port: u16) -> Result<()> {
        info!(container = %container.uuid(), port, "waiting on tcp");
        self.conn()
            .send_acked(
                Command::WaitTcp {
                    container: container.uuid(),
                    port,
                },
                WAIT_TCP_TIMEOUT,
            )
            .await
    }

    pub(crate) async fn wait_http_200(
        &self,
        container: &Container,
        port: u16,
        fqdn: &str,
        path: Option<&str>,
        localport: Option<u16>,
    ) -> Result<Arc<Tunnel>> {
        let resolved = tokio::net::lookup_host((fqdn, 0))
            .await
            .map_err(|_| LocationError::NotLocalhost(fqdn.to_string()))?
            .map(|addr| addr.ip())
            .find(IpAddr::is_ipv4);
        if resolved != Some(IpAddr::V4(Ipv4Addr::LOCALHOST)) {
            return Err(LocationError::NotLocalhost(fqdn.to_string()));
        }
        info!(container = %container.uuid(), fqdn, "waiting on http 200");

        let tunnel = self
            .tunnel_onto(container, port, localport, None, self.config().rpc_timeout())
            .await?;
        let url = crate::http::poll_url("http", fqdn, Some(tunnel.localport()), path);
        if let Err(e) = wait_http_200(&url, &HttpPoll::default()).await {
            let _ = self.destroy_tunnel(&tunnel, None, true);
            return Err(e);
        }
        Ok(tunnel)
    }

    /// Tear down a tunnel. With `container`, refuse if the tunnel leads
    /// elsewhere.
    pub fn destroy_tunnel(
        &self,
        tunnel: &Tunnel,
        container: Option<ContainerId>,
        with_command: bool,
    ) -> Result<()> {
        if let Some(container) = container {
            if tunnel.container() != container {
                return Err(LocationError::TunnelOwnership {
                    tunnel: tunnel.uuid(),
                    container,
                });
            }
        }
        self.shared.state.lock().tunnels.remove(&tunnel.uuid());
        tunnel.destroy(with_command);
        Ok(())
    }

    /// Every open tunnel.
    #[must_use]
    pub fn all_tunnels(&self) -> Vec<Arc<Tunnel>> {
        self.shared.state.lock().tunnels.values().cloned().collect()
    }

    pub(crate) fn tunnels_for(&self, container: ContainerId) -> Vec<Arc<Tunnel>> {
        self.shared
            .state
            .lock()
            .tunnels
            .values()
            .filter(|t| t.container() == container)
            .cloned()
            .collect()
    }

    fn take_tunnels(&self, pred: impl Fn(&Tunnel) -> bool) -> Vec<Arc<Tunnel>> {
        let mut state = self.shared.state.lock();
        let ids: Vec<TunnelId> = state
            .tunnels
            .values()
            .filter(|t| pred(t))
            .map(|t| t.uuid())
            .collect();
        ids.iter()
            .filter_map(|id| state.tunnels.remove(id))
            .collect()
    }

    // ---- main loop ----

    /// Queue `f` to run on the loop driven by [`run`](Self::run).
    pub fn call_on_main(&self, f: impl FnOnce(&Self) + Send + 'static) {
        if self.shared.calls_tx.send(MainItem::Call(Box::new(f))).is_err() {
            debug!("main loop gone, call dropped");
        }
    }

    /// Make [`run`](Self::run) return `err`.
    pub fn raise_on_main(&self, err: LocationError) {
        if self.shared.calls_tx.send(MainItem::Raise(err)).is_err() {
            debug!("main loop gone, error dropped");
        }
    }

    /// Drain queued calls, one per wake-up, until `timeout` elapses, the
    /// location disconnects, an error is raised or SIGINT/SIGTERM arrives.
    /// A signal disconnects the location.
    pub async fn run(&self, timeout: Option<Duration>) -> Result<()> {
        let mut calls = self.shared.calls_rx.lock().await;
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        let signal = shutdown_signal();
        tokio::pin!(signal);

        loop {
            if self.is_disconnected() {
                return Ok(());
            }
            let expired = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                item = calls.recv() => match item {
                    Some(MainItem::Call(f)) => f(self),
                    Some(MainItem::Raise(err)) => return Err(err),
                    Some(MainItem::Wake) => {}
                    None => return Ok(()),
                },
                () = expired => return Ok(()),
                () = &mut signal => {
                    info!("signal received, disconnecting");
                    self.disconnect();
                    return Ok(());
                }
            }
        }
    }

    /// Ask [`run`](Self::run) to return.
    pub fn stop(&self) {
        self.disconnect();
    }

    /// Whether [`disconnect`](Self::disconnect) has run.
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.shared.disconnected.load(Ordering::SeqCst)
    }

    /// Unpublish every cluster, destroy every live container and tunnel,
    /// and close the connection. Safe to call more than once.
    pub fn disconnect(&self) {
        if self.shared.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(heartbeat) = self.shared.heartbeat.lock().take() {
            heartbeat.stop();
        }

        let (clusters, containers) = {
            let mut state = self.shared.state.lock();
            let clusters: Vec<ClusterId> = state
                .endpoints
                .values_mut()
                .flat_map(|c| c.drain(..).map(|(id, _)| id))
                .collect();
            let containers: Vec<Arc<ContainerRecord>> = state
                .nodes
                .values()
                .flat_map(|n| n.containers.values())
                .filter(|c| c.status() != ContainerStatus::Dead)
                .cloned()
                .collect();
            (clusters, containers)
        };

        for cluster in clusters {
            let _ = self.conn().send_cmd(Command::UnpublishWeb { cluster });
        }
        for container in containers {
            let _ = self.conn().send_cmd(Command::DestroyContainer {
                node: container.node,
                container: container.uuid,
            });
            container.set_status(ContainerStatus::Dead);
        }
        for tunnel in self.take_tunnels(|_| true) {
            tunnel.destroy(true);
        }

        self.conn().disconnect();
        let _ = self.shared.calls_tx.send(MainItem::Wake);
        info!(location = %self.shared.config.location, "disconnected");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Applies broker pushes to the location state.
struct PushRouter {
    shared: Weak<Shared>,
}

impl PushHandler for PushRouter {
    fn handle(&self, push: Push) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        match push {
            Push::ResourceOffer {
                domains,
                nodes,
                volumes,
            } => {
                let mut state = shared.state.lock();
                let mut previous = std::mem::take(&mut state.nodes);
                for offer in nodes {
                    let mut record = previous.shift_remove(&offer.node).unwrap_or_default();
                    record.stats = offer.stats;
                    state.nodes.insert(offer.node, record);
                }
                for (node, record) in previous {
                    if !record.containers.is_empty() {
                        warn!(
                            node = %node,
                            containers = record.containers.len(),
                            "node withdrawn from offer"
                        );
                    }
                }

                let known = std::mem::take(&mut state.volumes);
                for offer in volumes {
                    let mode = known
                        .iter()
                        .find(|v| v.uuid == offer.uuid)
                        .map(|v| v.mode)
                        .unwrap_or_default();
                    let volume = Volume {
                        uuid: offer.uuid,
                        tag: offer.tag,
                        mode,
                    };
                    if let Err(e) = state.volumes.insert(volume) {
                        warn!(error = %e, "ignoring offered volume");
                    }
                }

                let mut published = std::mem::take(&mut state.endpoints);
                for offer in domains {
                    let clusters = published.shift_remove(&offer.domain).unwrap_or_default();
                    state.endpoints.insert(offer.domain, clusters);
                }
                for (domain, clusters) in published {
                    if !clusters.is_empty() {
                        warn!(
                            domain = %domain,
                            clusters = clusters.len(),
                            "domain withdrawn from offer"
                        );
                    }
                }
                info!(
                    nodes = state.nodes.len(),
                    volumes = state.volumes.len(),
                    endpoints = state.endpoints.len(),
                    "resource offer"
                );
                drop(state);
                shared.ready.send_replace(true);
            }
            Push::UpdateStats { node, stats } => {
                match shared.state.lock().nodes.get_mut(&node) {
                    Some(record) => record.stats = stats,
                    None => warn!(node = %node, "stats for unknown node"),
                }
            }
            Push::NodeDestroyed { node } => {
                let Some(record) = shared.state.lock().nodes.shift_remove(&node) else {
                    warn!(node = %node, "destroy for unknown node");
                    return;
                };
                for container in record.containers.values() {
                    container.set_status(ContainerStatus::Dead);
                }
                let location = Location { shared };
                for tunnel in location.take_tunnels(|t| t.node() == node) {
                    tunnel.destroy(false);
                }
                info!(node = %node, "node destroyed");
            }
            Push::ContainerStatus {
                node,
                container,
                status,
            } => {
                let mut state = shared.state.lock();
                let record = state
                    .nodes
                    .get(&node)
                    .and_then(|n| n.containers.get(&container))
                    .cloned();
                match record {
                    Some(record) => record.set_status(status),
                    None => {
                        if state.early_status.len() >= EARLY_STATUS_LIMIT
                            && !state.early_status.contains_key(&container)
                        {
                            state.early_status.shift_remove_index(0);
                        }
                        state.early_status.insert(container, status);
                    }
                }
                drop(state);
                debug!(container = %container, ?status, "container status");
                if status == ContainerStatus::Dead {
                    let location = Location { shared };
                    for tunnel in location.take_tunnels(|t| t.container() == container) {
                        tunnel.destroy(false);
                    }
                }
            }
            Push::FromProxy {
                tunnel,
                proxy,
                data,
            } => {
                let found = shared.state.lock().tunnels.get(&tunnel).cloned();
                match found {
                    Some(t) => {
                        if let Err(e) = t.from_proxy(proxy, data) {
                            debug!(tunnel = %tunnel, error = %e, "dropping proxy data");
                        }
                    }
                    None => debug!(tunnel = %tunnel, "proxy data for unknown tunnel"),
                }
            }
            Push::CloseProxy { tunnel, proxy } => {
                let found = shared.state.lock().tunnels.get(&tunnel).cloned();
                match found {
                    Some(t) => {
                        if let Err(e) = t.close_proxy(proxy) {
                            debug!(tunnel = %tunnel, error = %e, "dropping proxy close");
                        }
                    }
                    None => debug!(tunnel = %tunnel, "proxy close for unknown tunnel"),
                }
            }
            Push::Log { error, log } => {
                if error {
                    error!(target: "skiff::broker", "{log}");
                } else {
                    info!(target: "skiff::broker", "{log}");
                }
            }
        }
    }
}
