//! End-to-end tests: NFS services behind a real socket server, driven by the
//! client.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use libcsi::backend::nfs::{DriverConfig, NfsController, NfsIdentity, NfsNode};
use libcsi::message::Frame;
use libcsi::transport::codec::{decode_frame, frame_codec};
use libcsi::transport::ListenAddr;
use libcsi::*;
use tempfile::TempDir;
use tokio::net::UnixStream;
use tokio_util::codec::Framed;

struct Harness {
    dir: TempDir,
    socket: PathBuf,
    handle: ServerHandle,
}

impl Harness {
    fn export(&self) -> PathBuf {
        self.dir.path().join("export")
    }

    async fn client(&self) -> CsiClient {
        CsiClient::connect(&format!("unix://{}", self.socket.display()))
            .await
            .unwrap()
    }
}

/// Write a tar wrapper that sleeps before doing any work.
fn slow_tar(dir: &Path, seconds: u32) -> PathBuf {
    let path = dir.join("slow-tar");
    std::fs::write(&path, format!("#!/bin/sh\nsleep {seconds}\nexec tar \"$@\"\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn services(config: DriverConfig) -> Services {
    let config = Arc::new(config);
    Services::new()
        .with_identity(Arc::new(NfsIdentity::new(Arc::clone(&config))))
        .with_controller(Arc::new(NfsController::from_config(Arc::clone(&config))))
        .with_node(Arc::new(NfsNode::new(config)))
}

async fn start_with_tar(tar_delay: Option<u32>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let export = dir.path().join("export");
    std::fs::create_dir_all(export.join("snapshot")).unwrap();

    let tar_program = match tar_delay {
        Some(seconds) => slow_tar(dir.path(), seconds),
        None => PathBuf::from("tar"),
    };
    let config = DriverConfig {
        node_id: "node-a".into(),
        nfs_server: "10.0.0.5".into(),
        local_mount_point: export,
        tar_program,
        ..Default::default()
    };

    let socket = dir.path().join("csi.sock");
    let handle = CsiServer::new(services(config))
        .with_debug(true)
        .start(&format!("unix://{}", socket.display()))
        .await
        .unwrap();

    Harness {
        dir,
        socket,
        handle,
    }
}

fn create(name: &str) -> CsiMessage {
    CsiMessage::CreateVolume(CreateVolumeRequest {
        name: name.into(),
        capacity_range: Some(CapacityRange {
            required_bytes: 1024,
            limit_bytes: 0,
        }),
        volume_capabilities: vec![VolumeCapability::default()],
        ..Default::default()
    })
}

fn snapshot_of(volume: &str) -> CsiMessage {
    CsiMessage::CreateSnapshot(CreateSnapshotRequest {
        source_volume_id: volume.into(),
        ..Default::default()
    })
}

#[tokio::test]
async fn volume_lifecycle_over_unix_socket() {
    let h = start_with_tar(None).await;
    assert_eq!(h.handle.state(), ServerState::Listening);
    let client = h.client().await;

    let reply = client.call(&create("pvc-1")).await.unwrap();
    let CsiMessage::VolumeCreated(volume) = reply else {
        panic!("unexpected reply");
    };
    assert_eq!(volume.volume_id, VolumeId::from("pvc-1"));
    assert_eq!(volume.volume_context["server"], "10.0.0.5");
    assert_eq!(volume.volume_context["share"], "/pvc-1");
    assert!(h.export().join("pvc-1").is_dir());

    let delete = CsiMessage::DeleteVolume(DeleteVolumeRequest {
        volume_id: "pvc-1".into(),
        ..Default::default()
    });
    assert!(matches!(client.call(&delete).await.unwrap(), CsiMessage::Ok));
    assert!(matches!(client.call(&delete).await.unwrap(), CsiMessage::Ok));
    assert!(!h.export().join("pvc-1").exists());

    let reply = client.call(&CsiMessage::GetPluginInfo).await.unwrap();
    assert!(matches!(reply, CsiMessage::PluginInfoResponse(ref info) if info.name == "csi-nfs"));

    h.handle.stop();
    h.handle.wait().await;
}

#[tokio::test]
async fn errors_cross_the_wire_with_their_code() {
    let h = start_with_tar(None).await;
    let client = h.client().await;

    let reply = client
        .request(&CsiMessage::ListVolumes(ListVolumesRequest::default()))
        .await
        .unwrap();
    match reply {
        CsiMessage::Error(e) => assert_eq!(e.code(), error::Code::Unimplemented),
        other => panic!("unexpected reply: {other}"),
    }

    let err = client.call(&create("")).await.unwrap_err();
    assert!(matches!(err, CsiError::InvalidArgument(_)));

    let err = client
        .call(&CsiMessage::ValidateVolumeCapabilities(
            ValidateVolumeCapabilitiesRequest {
                volume_id: "ghost".into(),
                volume_capabilities: vec![VolumeCapability::default()],
                ..Default::default()
            },
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, CsiError::NotFound(_)));

    h.handle.stop();
    h.handle.wait().await;
}

#[tokio::test]
async fn unregistered_service_group_is_unimplemented() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("identity-only.sock");
    let config = Arc::new(DriverConfig::default());
    let handle = CsiServer::new(Services::new().with_identity(Arc::new(NfsIdentity::new(config))))
        .start(&format!("unix://{}", socket.display()))
        .await
        .unwrap();

    let client = CsiClient::connect(&handle.local_addr().to_endpoint())
        .await
        .unwrap();
    assert!(matches!(
        client.call(&CsiMessage::Probe).await.unwrap(),
        CsiMessage::ProbeResult(true)
    ));
    let err = client.call(&create("pvc-1")).await.unwrap_err();
    assert!(matches!(err, CsiError::Unimplemented(_)));
    let err = client.call(&CsiMessage::NodeGetInfo).await.unwrap_err();
    assert!(matches!(err, CsiError::Unimplemented(_)));

    handle.stop();
    handle.wait().await;
}

#[tokio::test]
async fn concurrent_calls_share_one_connection() {
    let h = start_with_tar(None).await;
    let client = Arc::new(h.client().await);

    let mut tasks = Vec::new();
    for i in 0..16 {
        let c = Arc::clone(&client);
        tasks.push(tokio::spawn(async move {
            c.call(&create(&format!("pvc-{i}"))).await
        }));
        let c = Arc::clone(&client);
        tasks.push(tokio::spawn(async move { c.call(&create("shared")).await }));
    }
    for task in tasks {
        assert!(matches!(
            task.await.unwrap().unwrap(),
            CsiMessage::VolumeCreated(_)
        ));
    }
    for i in 0..16 {
        assert!(h.export().join(format!("pvc-{i}")).is_dir());
    }

    h.handle.stop();
    h.handle.wait().await;
}

#[tokio::test]
async fn graceful_stop_lets_in_flight_snapshot_finish() {
    let h = start_with_tar(Some(1)).await;
    let client = Arc::new(h.client().await);
    client.call(&create("src")).await.unwrap();

    let pending = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.call(&snapshot_of("src")).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    h.handle.stop();
    let reply = pending.await.unwrap().unwrap();
    let CsiMessage::SnapshotCreated(snapshot) = reply else {
        panic!("unexpected reply");
    };
    assert!(snapshot.ready_to_use);

    h.handle.wait().await;
    assert_eq!(h.handle.state(), ServerState::Stopped);
    assert!(!h.socket.exists());
    assert!(
        h.export()
            .join("snapshot")
            .join(format!("{}.tar.gz", snapshot.snapshot_id))
            .exists()
    );
}

#[tokio::test]
async fn draining_server_refuses_new_connections() {
    let h = start_with_tar(Some(3)).await;
    let client = Arc::new(h.client().await);
    client.call(&create("src")).await.unwrap();

    let pending = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.call(&snapshot_of("src")).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    h.handle.stop();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.handle.state(), ServerState::Draining);
    assert!(!h.socket.exists());

    let endpoint = format!("unix://{}", h.socket.display());
    let late = tokio::time::timeout(Duration::from_secs(1), async {
        let client = CsiClient::connect(&endpoint).await?;
        client.call(&CsiMessage::Probe).await
    })
    .await
    .expect("a call during drain must fail promptly");
    assert!(late.is_err());

    let reply = pending.await.unwrap().unwrap();
    assert!(matches!(reply, CsiMessage::SnapshotCreated(_)));
    h.handle.wait().await;
    assert_eq!(h.handle.state(), ServerState::Stopped);
}

#[tokio::test]
async fn force_stop_aborts_in_flight_calls() {
    let h = start_with_tar(Some(30)).await;
    let client = Arc::new(h.client().await);
    client.call(&create("src")).await.unwrap();

    let pending = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.call(&snapshot_of("src")).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    h.handle.force_stop();
    tokio::time::timeout(Duration::from_secs(5), h.handle.wait())
        .await
        .expect("forced stop must not wait for the archiver");
    assert_eq!(h.handle.state(), ServerState::Killed);

    let result = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(CsiError::TransportError(_))));
}

#[tokio::test]
async fn per_call_deadline_is_enforced() {
    let h = start_with_tar(Some(30)).await;
    let client = h.client().await;
    client.call(&create("src")).await.unwrap();

    let reply = client
        .request_with_timeout(&snapshot_of("src"), Duration::from_millis(200))
        .await
        .unwrap();
    assert!(matches!(
        reply,
        CsiMessage::Error(CsiError::DeadlineExceeded(_))
    ));

    h.handle.force_stop();
    h.handle.wait().await;
}

#[tokio::test]
async fn tcp_endpoint_reports_bound_port() {
    let dir = tempfile::tempdir().unwrap();
    let config = DriverConfig {
        local_mount_point: dir.path().to_path_buf(),
        ..Default::default()
    };
    let handle = CsiServer::new(services(config))
        .start("tcp://127.0.0.1:0")
        .await
        .unwrap();
    let ListenAddr::Tcp(addr) = handle.local_addr() else {
        panic!("expected a tcp listener");
    };
    assert_ne!(addr.port(), 0);

    let client = CsiClient::connect(&handle.local_addr().to_endpoint())
        .await
        .unwrap();
    let reply = client.call(&CsiMessage::NodeGetInfo).await.unwrap();
    assert!(matches!(reply, CsiMessage::NodeInfoResponse(_)));

    handle.stop();
    handle.wait().await;
    assert_eq!(handle.state(), ServerState::Stopped);
}

#[tokio::test]
async fn stale_socket_file_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("csi.sock");
    std::fs::write(&socket, b"leftover").unwrap();

    let handle = CsiServer::new(Services::new())
        .start(&format!("unix://{}", socket.display()))
        .await
        .unwrap();
    let client = CsiClient::connect(&handle.local_addr().to_endpoint())
        .await
        .unwrap();
    let err = client.call(&CsiMessage::Probe).await.unwrap_err();
    assert!(matches!(err, CsiError::Unimplemented(_)));

    handle.stop();
    handle.wait().await;
}

#[tokio::test]
async fn bind_failure_is_reported() {
    let err = CsiServer::new(Services::new())
        .start("unix:///nonexistent-dir/for/csi.sock")
        .await
        .err()
        .expect("bind must fail");
    assert!(matches!(err, CsiError::TransportError(_)));
}

#[tokio::test]
async fn unremovable_socket_path_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("csi.sock");
    std::fs::create_dir(&socket).unwrap();
    std::fs::write(socket.join("keep"), b"x").unwrap();

    let err = CsiServer::new(Services::new())
        .start(&format!("unix://{}", socket.display()))
        .await
        .err()
        .expect("start must fail");
    let CsiError::TransportError(msg) = err else {
        panic!("expected TransportError");
    };
    assert!(msg.starts_with("failed to remove"), "{msg}");
    assert!(socket.join("keep").exists());
}

#[tokio::test]
async fn malformed_frame_gets_reply_and_connection_survives() {
    let h = start_with_tar(None).await;
    let stream = UnixStream::connect(&h.socket).await.unwrap();
    let mut framed = Framed::new(stream, frame_codec());

    framed
        .send(bytes::Bytes::from_static(b"{definitely not json"))
        .await
        .unwrap();
    let reply = decode_frame(&framed.next().await.unwrap().unwrap()).unwrap();
    assert_eq!(reply.id, 0);
    assert!(matches!(
        reply.message,
        CsiMessage::Error(CsiError::InvalidArgument(_))
    ));

    let probe = serde_json::to_vec(&Frame::new(7, CsiMessage::Probe)).unwrap();
    framed.send(bytes::Bytes::from(probe)).await.unwrap();
    let reply = decode_frame(&framed.next().await.unwrap().unwrap()).unwrap();
    assert_eq!(reply.id, 7);
    assert!(matches!(reply.message, CsiMessage::ProbeResult(true)));

    h.handle.stop();
    h.handle.wait().await;
}
