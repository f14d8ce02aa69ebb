//! Location behaviour against a scripted in-memory broker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use serde_json::json;
use skiff_location::http::{wait_http_200, HttpPoll};
use skiff_location::location::EARLY_STATUS_LIMIT;
use skiff_location::{
    BrokerSide, Cluster, DirLayerSource, KeyPair, Location, LocationConfig, LocationError,
    Transport,
};
use skiff_proto::{
    BrokerFrame, ClientFrame, ClusterId, Command, ContainerId, ContainerStatus, DomainOffer,
    ImageDescription, NodeId, NodeOffer, NodeStats, ProxyId, Push, VolumeId, WriteMode,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

// ============================================================================
// Harness
// ============================================================================

fn offer(nodes: Vec<(NodeId, f64)>, domains: &[&str]) -> Push {
    Push::ResourceOffer {
        domains: domains
            .iter()
            .map(|d| DomainOffer {
                domain: (*d).to_string(),
            })
            .collect(),
        nodes: nodes
            .into_iter()
            .map(|(node, cpu)| NodeOffer {
                node,
                stats: NodeStats::new(cpu, 0.0, 0.0),
            })
            .collect(),
        volumes: Vec::new(),
    }
}

async fn accept(mut broker: BrokerSide, offer: Option<Push>) -> BrokerSide {
    let Some(ClientFrame::Hello { .. }) = broker.recv().await else {
        panic!("expected hello");
    };
    let nonce = base64::engine::general_purpose::STANDARD.encode(b"nonce");
    broker.send(BrokerFrame::Challenge { nonce });
    let Some(ClientFrame::Proof { .. }) = broker.recv().await else {
        panic!("expected proof");
    };
    broker.send(BrokerFrame::Welcome {
        session: "test-session".into(),
    });
    if let Some(offer) = offer {
        broker.send(BrokerFrame::push(offer));
    }
    broker
}

async fn connect(offer: Push) -> (Location, BrokerSide) {
    let (transport, broker) = Transport::memory();
    let script = tokio::spawn(accept(broker, Some(offer)));
    let config = LocationConfig::new("test.example.com").with_ready_timeout(5);
    let location = Location::with_transport(config, transport, &KeyPair::generate())
        .await
        .unwrap();
    (location, script.await.unwrap())
}

/// Next frame that is not a heartbeat.
async fn next_command(broker: &mut BrokerSide) -> (Option<u64>, Command) {
    loop {
        match broker.recv().await {
            Some(ClientFrame::Command {
                command: Command::Heartbeat,
                ..
            }) => {}
            Some(ClientFrame::Command { id, command }) => return (id, command),
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn answer(broker: &mut BrokerSide, result: serde_json::Value) -> Command {
    let (id, command) = next_command(broker).await;
    let id = id.unwrap_or_else(|| panic!("{} expected a reply", command.name()));
    broker.send(BrokerFrame::ok(id, result));
    command
}

fn assert_quiet(broker: &mut BrokerSide) {
    while let Ok(frame) = broker.incoming.try_recv() {
        assert_eq!(frame, ClientFrame::command(Command::Heartbeat), "unexpected frame");
    }
}

async fn running_container(
    location: &Location,
    broker: &mut BrokerSide,
) -> skiff_location::Container {
    let node = location.node().unwrap();
    let uuid = ContainerId::new();
    let node_id = node.uuid();
    let script = async {
        answer(broker, json!({ "container": uuid, "ip": "10.0.0.2" })).await;
        broker.send(BrokerFrame::push(Push::ContainerStatus {
            node: node_id,
            container: uuid,
            status: ContainerStatus::Running,
        }));
    };
    let (container, ()) = tokio::join!(node.spawn_container("nginx:latest", None), script);
    let container = container.unwrap();
    container
        .wait_until_ready(Duration::from_secs(5))
        .await
        .unwrap();
    container
}

// ============================================================================
// Nodes
// ============================================================================

#[tokio::test]
async fn test_ranked_nodes_descending_and_stable() {
    let (a, b, c, d) = (NodeId::new(), NodeId::new(), NodeId::new(), NodeId::new());
    let (location, _broker) =
        connect(offer(vec![(a, 1.0), (b, 3.0), (c, 3.0), (d, 0.0)], &[])).await;

    let ranked: Vec<NodeId> = location.ranked_nodes().iter().map(|n| n.uuid()).collect();
    assert_eq!(ranked, vec![b, c, a, d]);
    assert_eq!(location.node().unwrap().uuid(), b);
}

#[tokio::test]
async fn test_node_with_no_nodes() {
    let (location, _broker) = connect(offer(Vec::new(), &[])).await;
    assert!(matches!(location.node(), Err(LocationError::NoNodes)));
    assert!(location.ranked_nodes().is_empty());
}

#[tokio::test]
async fn test_stats_update_reorders_and_unknown_node_is_ignored() {
    let (a, b) = (NodeId::new(), NodeId::new());
    let (location, broker) = connect(offer(vec![(a, 2.0), (b, 1.0)], &[])).await;

    broker.send(BrokerFrame::push(Push::UpdateStats {
        node: b,
        stats: NodeStats::new(5.0, 0.0, 0.0),
    }));
    broker.send(BrokerFrame::push(Push::UpdateStats {
        node: NodeId::new(),
        stats: NodeStats::new(99.0, 0.0, 0.0),
    }));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(location.node().unwrap().uuid(), b);
    assert_eq!(location.ranked_nodes().len(), 2);
}

#[tokio::test]
async fn test_second_offer_replaces_nodes_and_domains() {
    let (a, b) = (NodeId::new(), NodeId::new());
    let (location, broker) = connect(offer(vec![(a, 1.0)], &["old.example.com"])).await;
    assert!(location.endpoint_for("www.old.example.com").is_ok());

    broker.send(BrokerFrame::push(offer(vec![(b, 2.0)], &["new.example.com"])));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let ranked: Vec<NodeId> = location.ranked_nodes().iter().map(|n| n.uuid()).collect();
    assert_eq!(ranked, vec![b]);
    assert!(matches!(
        location.endpoint_for("www.old.example.com"),
        Err(LocationError::NoEndpoint(_))
    ));
    assert!(location.endpoint_for("www.new.example.com").is_ok());
}

#[tokio::test]
async fn test_second_offer_keeps_containers_on_surviving_node() {
    let (location, mut broker) = connect(offer(vec![(NodeId::new(), 1.0)], &[])).await;
    let container = running_container(&location, &mut broker).await;
    let node = container.node();

    broker.send(BrokerFrame::push(offer(vec![(node, 4.0), (NodeId::new(), 1.0)], &[])));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let kept = location.node().unwrap();
    assert_eq!(kept.uuid(), node);
    assert_eq!(kept.containers().unwrap().len(), 1);
    assert_eq!(container.status(), ContainerStatus::Running);
}

#[tokio::test(start_paused = true)]
async fn test_no_resource_offer_times_out() {
    let (transport, broker) = Transport::memory();
    let script = tokio::spawn(accept(broker, None));
    let config = LocationConfig::new("test.example.com").with_ready_timeout(2);
    let err = Location::with_transport(config, transport, &KeyPair::generate())
        .await
        .unwrap_err();
    assert!(matches!(err, LocationError::NotReady(_)));
    drop(script);
}

// ============================================================================
// Volumes
// ============================================================================

#[tokio::test]
async fn test_volume_lifecycle() {
    let (location, mut broker) = connect(offer(vec![(NodeId::new(), 1.0)], &[])).await;
    let uuid = VolumeId::new();

    let (volume, command) = tokio::join!(
        location.create_volume(Some("db"), WriteMode::Sync),
        answer(&mut broker, json!({ "volume": uuid })),
    );
    let volume = volume.unwrap();
    assert_eq!(
        command,
        Command::CreateVolume {
            tag: Some("db".into()),
            mode: WriteMode::Sync
        }
    );
    assert_eq!(volume.uuid, uuid);
    assert_eq!(location.volume("db").unwrap(), volume);
    assert_eq!(location.volume(&uuid.to_string()).unwrap(), volume);

    // Duplicate tag is refused locally.
    let err = location
        .create_volume(Some("db"), WriteMode::Async)
        .await
        .unwrap_err();
    assert!(matches!(err, LocationError::TagInUse(_)));
    assert_quiet(&mut broker);

    let ensured = location.ensure_volume("db").await.unwrap();
    assert_eq!(ensured, volume);

    let (destroyed, command) = tokio::join!(
        location.destroy_volume(&volume),
        answer(&mut broker, serde_json::Value::Null),
    );
    destroyed.unwrap();
    assert_eq!(command, Command::DestroyVolume { volume: uuid });
    assert!(matches!(
        location.volume("db"),
        Err(LocationError::VolumeNotFound(_))
    ));
    assert!(location.all_volumes().is_empty());
}

#[tokio::test]
async fn test_invalid_tag_sends_nothing() {
    let (location, mut broker) = connect(offer(Vec::new(), &[])).await;
    let err = location
        .create_volume(Some("bad tag"), WriteMode::Async)
        .await
        .unwrap_err();
    assert!(matches!(err, LocationError::InvalidTag { .. }));
    assert_quiet(&mut broker);
}

// ============================================================================
// Containers and tunnels
// ============================================================================

#[tokio::test]
async fn test_tunnel_relays_and_survives_late_proxy_data() {
    let (location, mut broker) = connect(offer(vec![(NodeId::new(), 1.0)], &[])).await;
    let container = running_container(&location, &mut broker).await;

    let (tunnel, command) = tokio::join!(
        container.attach_tunnel(80, None, None, Duration::from_secs(5)),
        answer(&mut broker, serde_json::Value::Null),
    );
    let tunnel = tunnel.unwrap();
    assert!(matches!(command, Command::CreateTunnel { port: 80, .. }));
    assert_ne!(tunnel.localport(), 0);
    assert_eq!(location.all_tunnels().len(), 1);

    let mut client = TcpStream::connect(("127.0.0.1", tunnel.localport()))
        .await
        .unwrap();
    client.write_all(b"ping").await.unwrap();

    let (_, command) = next_command(&mut broker).await;
    let Command::ToProxy {
        tunnel: tunnel_id,
        proxy,
        data,
    } = command
    else {
        panic!("expected to_proxy, got {command:?}");
    };
    assert_eq!(tunnel_id, tunnel.uuid());
    assert_eq!(data, b"ping");

    broker.send(BrokerFrame::push(Push::FromProxy {
        tunnel: tunnel_id,
        proxy,
        data: b"pong".to_vec(),
    }));
    let mut buf = [0u8; 4];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"pong");

    container.destroy_tunnel(&tunnel).unwrap();
    let (_, command) = next_command(&mut broker).await;
    assert_eq!(command, Command::DestroyTunnel { tunnel: tunnel_id });

    // Data for the dead tunnel is dropped and does not bring it back.
    broker.send(BrokerFrame::push(Push::FromProxy {
        tunnel: tunnel_id,
        proxy,
        data: b"late".to_vec(),
    }));
    broker.send(BrokerFrame::push(Push::CloseProxy {
        tunnel: tunnel_id,
        proxy: ProxyId::new(),
    }));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(location.all_tunnels().is_empty());
    assert!(tunnel.is_destroyed());

    let mut rest = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(2), client.read_to_end(&mut rest)).await;
    assert!(rest.is_empty());
}

#[tokio::test]
async fn test_destroy_tunnel_through_other_container_refused() {
    let (location, mut broker) = connect(offer(vec![(NodeId::new(), 1.0)], &[])).await;
    let first = running_container(&location, &mut broker).await;
    let second = running_container(&location, &mut broker).await;

    let (tunnel, _) = tokio::join!(
        first.attach_tunnel(22, None, None, Duration::from_secs(5)),
        answer(&mut broker, serde_json::Value::Null),
    );
    let tunnel = tunnel.unwrap();

    let err = second.destroy_tunnel(&tunnel).unwrap_err();
    assert!(matches!(err, LocationError::TunnelOwnership { .. }));
    assert_eq!(first.all_tunnels().len(), 1);
}

#[tokio::test]
async fn test_dead_container_fails_wait() {
    let (location, mut broker) = connect(offer(vec![(NodeId::new(), 1.0)], &[])).await;
    let node = location.node().unwrap();
    let uuid = ContainerId::new();
    let node_id = node.uuid();

    let script = async {
        answer(&mut broker, json!({ "container": uuid, "ip": "10.0.0.3" })).await;
        broker.send(BrokerFrame::push(Push::ContainerStatus {
            node: node_id,
            container: uuid,
            status: ContainerStatus::Dead,
        }));
    };
    let (container, ()) = tokio::join!(node.spawn_container("busybox", Some("worker")), script);
    let container = container.unwrap();
    let err = container
        .wait_until_ready(Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, LocationError::ContainerDead(id) if id == uuid));
}

#[tokio::test]
async fn test_early_status_buffer_drops_oldest() {
    let (location, mut broker) = connect(offer(vec![(NodeId::new(), 1.0)], &[])).await;
    let node = location.node().unwrap();
    let node_id = node.uuid();
    let uuid = ContainerId::new();

    broker.send(BrokerFrame::push(Push::ContainerStatus {
        node: node_id,
        container: uuid,
        status: ContainerStatus::Running,
    }));
    for _ in 0..EARLY_STATUS_LIMIT {
        broker.send(BrokerFrame::push(Push::ContainerStatus {
            node: node_id,
            container: ContainerId::new(),
            status: ContainerStatus::Dead,
        }));
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (container, _) = tokio::join!(
        node.spawn_container("busybox", None),
        answer(&mut broker, json!({ "container": uuid, "ip": "10.0.0.4" })),
    );
    assert_eq!(container.unwrap().status(), ContainerStatus::Pending);
}

#[tokio::test]
async fn test_node_destroyed_kills_containers() {
    let (location, mut broker) = connect(offer(vec![(NodeId::new(), 1.0)], &[])).await;
    let container = running_container(&location, &mut broker).await;

    broker.send(BrokerFrame::push(Push::NodeDestroyed {
        node: container.node(),
    }));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(container.status(), ContainerStatus::Dead);
    assert!(location.ranked_nodes().is_empty());
    assert!(matches!(
        location.node_by_id(container.node()),
        Err(LocationError::NodeNotFound(_))
    ));
}

#[tokio::test]
async fn test_wait_tcp_sends_command() {
    let (location, mut broker) = connect(offer(vec![(NodeId::new(), 1.0)], &[])).await;
    let container = running_container(&location, &mut broker).await;
    let (result, command) = tokio::join!(
        container.wait_tcp(5432),
        answer(&mut broker, serde_json::Value::Null)
    );
    result.unwrap();
    assert_eq!(
        command,
        Command::WaitTcp {
            container: container.uuid(),
            port: 5432
        }
    );
}

#[tokio::test]
async fn test_container_for_tag() {
    let (location, mut broker) = connect(offer(Vec::new(), &[])).await;
    let (uuid, node) = (ContainerId::new(), NodeId::new());
    let (found, command) = tokio::join!(
        location.container_for("shared-db"),
        answer(
            &mut broker,
            json!({ "container": uuid, "node": node, "ip": "10.0.0.9" })
        ),
    );
    let found = found.unwrap();
    assert_eq!(command, Command::FindTag { tag: "shared-db".into() });
    assert_eq!(found.uuid, uuid);
    assert_eq!(found.node, node);
    assert_eq!(found.ip, "10.0.0.9");
}

// ============================================================================
// Endpoints
// ============================================================================

#[tokio::test]
async fn test_publish_outside_domain_sends_nothing() {
    let (location, mut broker) = connect(offer(Vec::new(), &["example.com"])).await;
    let endpoint = location.endpoint_for("www.example.com").unwrap();
    let mut cluster = Cluster::new([ContainerId::new()]);

    let err = endpoint
        .publish(&mut cluster, "www.other.org", None)
        .await
        .unwrap_err();
    assert!(matches!(err, LocationError::OutsideDomain { .. }));
    assert!(!cluster.is_published());
    assert_quiet(&mut broker);

    assert!(matches!(
        location.endpoint_for("www.other.org"),
        Err(LocationError::NoEndpoint(_))
    ));
}

#[tokio::test]
async fn test_publish_and_unpublish() {
    let (location, mut broker) = connect(offer(Vec::new(), &["example.com"])).await;
    let endpoint = location.endpoint_for("api.example.com").unwrap();
    let mut cluster = Cluster::new([ContainerId::new()]).with_rewrite("/v1");
    let uuid = ClusterId::new();

    let (published, command) = tokio::join!(
        endpoint.publish(&mut cluster, "api.example.com", None),
        answer(&mut broker, json!({ "cluster": uuid })),
    );
    assert_eq!(published.unwrap(), uuid);
    let Command::PublishWeb {
        domain,
        subdomain,
        cluster: spec,
        ssl,
    } = command
    else {
        panic!("expected publish_web");
    };
    assert_eq!(domain, "example.com");
    assert_eq!(subdomain, "api");
    assert_eq!(spec.rewrite.as_deref(), Some("/v1"));
    assert!(ssl.is_none());
    assert_eq!(endpoint.clusters().len(), 1);

    endpoint.unpublish(&mut cluster).unwrap();
    let (id, command) = next_command(&mut broker).await;
    assert!(id.is_none());
    assert_eq!(command, Command::UnpublishWeb { cluster: uuid });
    assert!(endpoint.clusters().is_empty());
    assert!(matches!(
        endpoint.unpublish(&mut cluster),
        Err(LocationError::NotPublished)
    ));
}

// ============================================================================
// HTTP polling
// ============================================================================

async fn http_server(ok_after: usize) -> (u16, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let mut buf = [0u8; 2048];
            let _ = stream.read(&mut buf).await;
            let status = if n > ok_after {
                "200 OK"
            } else {
                "500 Internal Server Error"
            };
            let response =
                format!("HTTP/1.1 {status}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });
    (port, hits)
}

#[tokio::test]
async fn test_wait_http_200_after_29_failures() {
    let (port, hits) = http_server(29).await;
    let poll = HttpPoll::default().with_interval(Duration::from_millis(5));
    let url = format!("http://127.0.0.1:{port}/");
    wait_http_200(&url, &poll).await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 30);
}

#[tokio::test]
async fn test_wait_http_200_never_ready() {
    let (port, hits) = http_server(usize::MAX).await;
    let poll = HttpPoll::default().with_interval(Duration::from_millis(5));
    let url = format!("http://127.0.0.1:{port}/health");
    let err = wait_http_200(&url, &poll).await.unwrap_err();
    assert_eq!(err.to_string(), format!("could not connect to: {url}"));
    assert_eq!(hits.load(Ordering::SeqCst), 30);
}

// ============================================================================
// Images
// ============================================================================

const HELLO_SHA: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

#[tokio::test]
async fn test_ensure_image_uploaded_sends_missing_layers() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(format!("{HELLO_SHA}.tar")), b"hello").unwrap();
    let source = Arc::new(DirLayerSource::new(dir.path()));
    let description = ImageDescription::from_layers([
        "sha256:base".to_string(),
        format!("sha256:{HELLO_SHA}"),
    ]);

    let (location, mut broker) = connect(offer(Vec::new(), &[])).await;
    let script = async {
        let cached = answer(&mut broker, serde_json::Value::Null).await;
        assert!(matches!(cached, Command::CacheDescription { .. }));
        let asked = answer(&mut broker, json!({ "missing": [HELLO_SHA] })).await;
        assert_eq!(
            asked,
            Command::UploadRequirements {
                layers: vec!["base".into(), HELLO_SHA.into()]
            }
        );
    };
    let (upload, ()) = tokio::join!(
        location.ensure_image_uploaded("nginx:latest", Some(description), source),
        script
    );
    let upload = upload.unwrap();
    assert_eq!(upload.layers, vec!["base".to_string(), HELLO_SHA.to_string()]);
    assert_eq!(upload.missing, vec![HELLO_SHA.to_string()]);

    let (done, sent) = tokio::join!(upload.wait(), answer(&mut broker, serde_json::Value::Null));
    done.unwrap();
    assert_eq!(
        sent,
        Command::UploadLayer {
            sha256: HELLO_SHA.into(),
            data: b"hello".to_vec()
        }
    );
}

#[tokio::test]
async fn test_corrupt_layer_is_raised_on_main() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(format!("{HELLO_SHA}.tar")), b"tampered").unwrap();
    let source = Arc::new(DirLayerSource::new(dir.path()));
    let description = ImageDescription::from_layers([format!("sha256:{HELLO_SHA}")]);

    let (location, mut broker) = connect(offer(Vec::new(), &[])).await;
    let script = async {
        answer(&mut broker, serde_json::Value::Null).await;
        answer(&mut broker, json!({ "missing": [HELLO_SHA] })).await;
    };
    let (upload, ()) = tokio::join!(
        location.ensure_image_uploaded("app", Some(description), source),
        script
    );
    let err = upload.unwrap().wait().await.unwrap_err();
    assert!(matches!(err, LocationError::Layer { .. }));

    let raised = location.run(Some(Duration::from_secs(2))).await.unwrap_err();
    assert!(matches!(raised, LocationError::Layer { ref sha256, .. } if sha256 == HELLO_SHA));
}

// ============================================================================
// Main loop and teardown
// ============================================================================

#[tokio::test]
async fn test_run_drains_calls_then_times_out() {
    let (location, _broker) = connect(offer(Vec::new(), &[])).await;
    let calls = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let calls = Arc::clone(&calls);
        location.call_on_main(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
    }
    location
        .run(Some(Duration::from_millis(100)))
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_raise_on_main_ends_run() {
    let (location, _broker) = connect(offer(Vec::new(), &[])).await;
    location.raise_on_main(LocationError::NoNodes);
    let err = location.run(None).await.unwrap_err();
    assert!(matches!(err, LocationError::NoNodes));
}

#[tokio::test]
async fn test_disconnect_tears_everything_down() {
    let (location, mut broker) = connect(offer(vec![(NodeId::new(), 1.0)], &["example.com"])).await;
    let container = running_container(&location, &mut broker).await;
    let (tunnel, _) = tokio::join!(
        container.attach_tunnel(80, None, None, Duration::from_secs(5)),
        answer(&mut broker, serde_json::Value::Null),
    );
    let tunnel = tunnel.unwrap();
    let endpoint = location.endpoint_for("example.com").unwrap();
    let mut cluster = Cluster::new([container.uuid()]);
    let cluster_id = ClusterId::new();
    let (published, _) = tokio::join!(
        endpoint.publish(&mut cluster, "example.com", None),
        answer(&mut broker, json!({ "cluster": cluster_id })),
    );
    published.unwrap();

    location.disconnect();
    location.disconnect();

    let mut seen = Vec::new();
    while let Some(frame) = broker.recv().await {
        if let ClientFrame::Command { command, .. } = frame {
            if command != Command::Heartbeat {
                seen.push(command);
            }
        }
    }
    assert_eq!(
        seen,
        vec![
            Command::UnpublishWeb {
                cluster: cluster_id
            },
            Command::DestroyContainer {
                node: container.node(),
                container: container.uuid()
            },
            Command::DestroyTunnel {
                tunnel: tunnel.uuid()
            },
        ]
    );
    assert_eq!(container.status(), ContainerStatus::Dead);
    assert!(tunnel.is_destroyed());
    assert!(location.is_disconnected());
    location.run(None).await.unwrap();
}
