//! TCP tunnels onto container ports.
//!
//! A tunnel listens on a local port. Every accepted connection becomes a
//! proxy: bytes read locally go to the broker as `to_proxy`, bytes pushed
//! back as `from_proxy` are written to the socket.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use skiff_proto::{Command, ContainerId, NodeId, ProxyId, TunnelId};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::error::{LocationError, Result};

const READ_BUFFER: usize = 16 * 1024;

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Pause after `failures` consecutive accept errors, doubling up to a second.
fn accept_backoff(failures: u32) -> Duration {
    ACCEPT_BACKOFF_MIN
        .saturating_mul(1 << failures.saturating_sub(1).min(7))
        .min(ACCEPT_BACKOFF_MAX)
}

enum ProxyMsg {
    Data(Vec<u8>),
    Close,
}

/// A tunnel from a local port to a port inside a container.
pub struct Tunnel {
    uuid: TunnelId,
    node: NodeId,
    container: ContainerId,
    port: u16,
    bind: IpAddr,
    requested_localport: Option<u16>,
    localport: AtomicU16,
    timeout: Duration,
    conn: Connection,
    proxies: Mutex<HashMap<ProxyId, mpsc::UnboundedSender<ProxyMsg>>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl std::fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("uuid", &self.uuid)
            .field("container", &self.container)
            .field("port", &self.port)
            .field("localport", &self.localport())
            .finish_non_exhaustive()
    }
}

impl Tunnel {
    pub(crate) fn new(
        conn: Connection,
        node: NodeId,
        container: ContainerId,
        port: u16,
        localport: Option<u16>,
        bind: Option<IpAddr>,
        timeout: Duration,
    ) -> Self {
        Self {
            uuid: TunnelId::new(),
            node,
            container,
            port,
            bind: bind.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            requested_localport: localport,
            localport: AtomicU16::new(0),
            timeout,
            conn,
            proxies: Mutex::new(HashMap::new()),
            accept_task: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Tunnel id.
    #[must_use]
    pub const fn uuid(&self) -> TunnelId {
        self.uuid
    }

    /// Container the tunnel leads to.
    #[must_use]
    pub const fn container(&self) -> ContainerId {
        self.container
    }

    /// Node of that container.
    #[must_use]
    pub const fn node(&self) -> NodeId {
        self.node
    }

    /// Port inside the container.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Local bind address.
    #[must_use]
    pub const fn bind(&self) -> IpAddr {
        self.bind
    }

    /// Local port; 0 until the tunnel is connected.
    #[must_use]
    pub fn localport(&self) -> u16 {
        self.localport.load(Ordering::SeqCst)
    }

    /// Whether the tunnel has been torn down.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Number of open proxied connections.
    #[must_use]
    pub fn proxy_count(&self) -> usize {
        self.proxies.lock().len()
    }

    /// Bind the local listener, ask the broker for the tunnel, then start
    /// accepting.
    pub(crate) async fn connect(self: &Arc<Self>) -> Result<()> {
        let listener =
            TcpListener::bind((self.bind, self.requested_localport.unwrap_or(0))).await?;
        let localport = listener.local_addr()?.port();
        self.localport.store(localport, Ordering::SeqCst);

        self.conn
            .send_acked(
                Command::CreateTunnel {
                    tunnel: self.uuid,
                    node: self.node,
                    container: self.container,
                    port: self.port,
                    timeout_secs: self.timeout.as_secs(),
                },
                self.timeout,
            )
            .await?;

        let task = tokio::spawn(accept_loop(listener, Arc::downgrade(self)));
        *self.accept_task.lock() = Some(task);
        if self.is_destroyed() {
            self.stop_accepting();
        }
        info!(
            tunnel = %self.uuid,
            container = %self.container,
            port = self.port,
            localport,
            "tunnel connected"
        );
        Ok(())
    }

    /// Deliver bytes from the container to a proxied connection.
    pub fn from_proxy(&self, proxy: ProxyId, data: Vec<u8>) -> Result<()> {
        let mut proxies = self.proxies.lock();
        let tx = proxies
            .get(&proxy)
            .ok_or(LocationError::UnknownProxy(proxy))?;
        if tx.send(ProxyMsg::Data(data)).is_err() {
            proxies.remove(&proxy);
            return Err(LocationError::UnknownProxy(proxy));
        }
        Ok(())
    }

    /// The container closed a proxied connection.
    pub fn close_proxy(&self, proxy: ProxyId) -> Result<()> {
        let tx = self
            .proxies
            .lock()
            .remove(&proxy)
            .ok_or(LocationError::UnknownProxy(proxy))?;
        let _ = tx.send(ProxyMsg::Close);
        Ok(())
    }

    /// Stop the listener and every proxy, optionally telling the broker.
    /// Calling this twice is harmless.
    pub(crate) fn destroy(&self, with_command: bool) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_accepting();
        for (_, tx) in self.proxies.lock().drain() {
            let _ = tx.send(ProxyMsg::Close);
        }
        if with_command {
            if let Err(e) = self.conn.send_cmd(Command::DestroyTunnel { tunnel: self.uuid }) {
                debug!(tunnel = %self.uuid, error = %e, "could not send destroy_tunnel");
            }
        }
        info!(tunnel = %self.uuid, "tunnel destroyed");
    }

    fn stop_accepting(&self) {
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }
    }
}

async fn accept_loop(listener: TcpListener, tunnel: Weak<Tunnel>) {
    let mut failures = 0u32;
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => {
                failures = 0;
                accepted
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                let pause = accept_backoff(failures);
                warn!(error = %e, failures, ?pause, "tunnel accept failed");
                if tunnel.upgrade().is_none_or(|t| t.is_destroyed()) {
                    break;
                }
                tokio::time::sleep(pause).await;
                continue;
            }
        };
        let Some(tunnel) = tunnel.upgrade() else {
            break;
        };
        if tunnel.is_destroyed() {
            break;
        }
        let proxy = ProxyId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        tunnel.proxies.lock().insert(proxy, tx);
        debug!(tunnel = %tunnel.uuid, proxy = %proxy, %peer, "proxy opened");
        tokio::spawn(run_proxy(stream, proxy, rx, Arc::downgrade(&tunnel)));
    }
}

async fn run_proxy(
    stream: TcpStream,
    proxy: ProxyId,
    mut rx: mpsc::UnboundedReceiver<ProxyMsg>,
    tunnel: Weak<Tunnel>,
) {
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = vec![0u8; READ_BUFFER];

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                let Some(tunnel) = tunnel.upgrade() else { break };
                match read {
                    Ok(n) if n > 0 => {
                        let sent = tunnel.conn.send_cmd(Command::ToProxy {
                            tunnel: tunnel.uuid,
                            proxy,
                            data: buf[..n].to_vec(),
                        });
                        if sent.is_err() {
                            break;
                        }
                    }
                    _ => {
                        local_closed(&tunnel, proxy);
                        break;
                    }
                }
            }
            msg = rx.recv() => match msg {
                Some(ProxyMsg::Data(data)) => {
                    if writer.write_all(&data).await.is_err() {
                        if let Some(tunnel) = tunnel.upgrade() {
                            local_closed(&tunnel, proxy);
                        }
                        break;
                    }
                }
                Some(ProxyMsg::Close) | None => break,
            },
        }
    }
    let _ = writer.shutdown().await;
    debug!(proxy = %proxy, "proxy finished");
}

fn local_closed(tunnel: &Tunnel, proxy: ProxyId) {
    if tunnel.proxies.lock().remove(&proxy).is_some() {
        let _ = tunnel.conn.send_cmd(Command::CloseProxy {
            tunnel: tunnel.uuid,
            proxy,
        });
    }
}
