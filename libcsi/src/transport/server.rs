//! Non-blocking CSI server.
//!
//! [`CsiServer::start`] binds the listener chosen by the endpoint scheme,
//! spawns the serve loop and returns a [`ServerHandle`] right away.  The
//! handle drives the rest of the lifecycle:
//!
//! ```text
//! Created ──start──▶ Listening ──stop──▶ Draining ──▶ Stopped
//!                        │                   │
//!                        └────force_stop─────┴──────▶ Killed
//! ```
//!
//! Each accepted connection runs in its own task, and every request frame on
//! a connection is dispatched as a separate task, so calls never wait on one
//! another at this layer.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::CsiController;
use crate::endpoint::parse_endpoint;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::message::{CsiMessage, Frame, ServiceGroup};
use crate::node::CsiNode;
use crate::transport::codec::{decode_frame, encode_frame, frame_codec};
use crate::transport::interceptor;
use crate::transport::listener::{Accepted, ListenAddr, Listener};

/// Responses queued per connection before call tasks wait on the writer.
const RESPONSE_QUEUE: usize = 64;

/// Pause after a failed `accept` so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The service groups exposed by a server.  Any of them may be absent; calls
/// for an absent group answer [`CsiError::Unimplemented`].
#[derive(Clone, Default)]
pub struct Services {
    identity: Option<Arc<dyn CsiIdentity>>,
    controller: Option<Arc<dyn CsiController>>,
    node: Option<Arc<dyn CsiNode>>,
}

impl Services {
    /// No service groups registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the Identity service.
    pub fn with_identity(mut self, identity: Arc<dyn CsiIdentity>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Register the Controller service.
    pub fn with_controller(mut self, controller: Arc<dyn CsiController>) -> Self {
        self.controller = Some(controller);
        self
    }

    /// Register the Node service.
    pub fn with_node(mut self, node: Arc<dyn CsiNode>) -> Self {
        self.node = Some(node);
        self
    }

    /// Whether no group is registered at all.
    pub fn is_empty(&self) -> bool {
        self.identity.is_none() && self.controller.is_none() && self.node.is_none()
    }

    /// Whether `group` is registered.
    pub fn serves(&self, group: ServiceGroup) -> bool {
        match group {
            ServiceGroup::Identity => self.identity.is_some(),
            ServiceGroup::Controller => self.controller.is_some(),
            ServiceGroup::Node => self.node.is_some(),
        }
    }
}

/// Lifecycle state of a started server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Accepting connections and calls.
    Listening,
    /// No longer accepting; waiting for in-flight calls.
    Draining,
    /// Drained and closed.
    Stopped,
    /// Terminated with in-flight calls aborted.
    Killed,
}

impl ServerState {
    /// Whether the serve loop has exited.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Killed)
    }
}

/// A CSI server that has not been started yet.
pub struct CsiServer {
    services: Services,
    debug: bool,
}

impl CsiServer {
    /// Create a server exposing `services`.
    pub fn new(services: Services) -> Self {
        Self {
            services,
            debug: false,
        }
    }

    /// Log every call with redacted request and response.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Bind `endpoint` and start serving in the background.
    ///
    /// Returns once the listener is bound.  An invalid endpoint, a stale
    /// socket file that cannot be removed, or a bind failure is returned as
    /// an error and nothing is spawned.
    pub async fn start(self, endpoint: &str) -> Result<ServerHandle, CsiError> {
        let endpoint = parse_endpoint(endpoint)?;
        if self.services.is_empty() {
            warn!(%endpoint, "starting CSI server with no service registered");
        }

        let listener = Listener::bind(&endpoint).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "listening for connections");

        let (state_tx, state_rx) = watch::channel(ServerState::Listening);
        let handle = ServerHandle {
            shutdown: CancellationToken::new(),
            kill: CancellationToken::new(),
            state: state_rx,
            local_addr,
        };

        let dispatcher = Arc::new(Dispatcher {
            services: self.services,
            debug: self.debug,
        });
        tokio::spawn(serve(
            listener,
            dispatcher,
            handle.shutdown.clone(),
            handle.kill.clone(),
            state_tx,
        ));

        Ok(handle)
    }
}

/// Control handle of a running server.  Cheap to clone.
#[derive(Clone)]
pub struct ServerHandle {
    shutdown: CancellationToken,
    kill: CancellationToken,
    state: watch::Receiver<ServerState>,
    local_addr: ListenAddr,
}

impl ServerHandle {
    /// Stop accepting, let in-flight calls finish, then close.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Close immediately, aborting in-flight calls.
    pub fn force_stop(&self) {
        self.kill.cancel();
    }

    /// Wait until the serve loop has exited.
    pub async fn wait(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(ServerState::is_terminal).await;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> &ListenAddr {
        &self.local_addr
    }
}

async fn serve(
    listener: Listener,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
    kill: CancellationToken,
    state: watch::Sender<ServerState>,
) {
    let tracker = TaskTracker::new();

    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = kill.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                debug!(%peer, "connection accepted");
                let conn = Connection {
                    dispatcher: Arc::clone(&dispatcher),
                    tracker: tracker.clone(),
                    shutdown: shutdown.clone(),
                    kill: kill.clone(),
                    peer,
                };
                match stream {
                    Accepted::Unix(stream) => tracker.spawn(conn.run(stream)),
                    Accepted::Tcp(stream) => tracker.spawn(conn.run(stream)),
                };
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }

    // New connections are refused from here on, even while draining.
    listener.close().await;

    if !kill.is_cancelled() {
        state.send_replace(ServerState::Draining);
        info!(in_flight = tracker.len(), "draining in-flight calls");
    }

    // Every tracked task also watches `kill`, so this returns promptly on a
    // forced stop.
    tracker.close();
    tracker.wait().await;

    let final_state = if kill.is_cancelled() {
        ServerState::Killed
    } else {
        ServerState::Stopped
    };
    state.send_replace(final_state);
    info!(state = ?final_state, "CSI server stopped");
}

/// One accepted connection.
struct Connection {
    dispatcher: Arc<Dispatcher>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    kill: CancellationToken,
    peer: String,
}

impl Connection {
    /// Read request frames until EOF or shutdown, dispatching each one as its
    /// own task.  Replies are funnelled through a single writer task.
    async fn run<S>(self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let mut frames = FramedRead::new(reader, frame_codec());
        let (tx, rx) = mpsc::channel::<Frame>(RESPONSE_QUEUE);
        let writer = tokio::spawn(write_replies(
            FramedWrite::new(writer, frame_codec()),
            rx,
            self.kill.clone(),
            self.peer.clone(),
        ));

        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.kill.cancelled() => break,
                next = frames.next() => next,
            };

            let buf = match next {
                Some(Ok(buf)) => buf,
                Some(Err(e)) => {
                    warn!(peer = %self.peer, error = %e, "failed to read frame");
                    break;
                }
                None => break,
            };

            let frame = match decode_frame(&buf) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(peer = %self.peer, error = %e, "rejecting malformed frame");
                    let _ = tx.send(Frame::new(0, CsiMessage::Error(e))).await;
                    continue;
                }
            };

            let tx = tx.clone();
            let dispatcher = Arc::clone(&self.dispatcher);
            let kill = self.kill.clone();
            self.tracker.spawn(async move {
                let id = frame.id;
                // Dropping the call future on a forced stop also kills any
                // archive subprocess it spawned.
                let reply = tokio::select! {
                    reply = dispatcher.call(frame) => reply,
                    _ = kill.cancelled() => {
                        debug!(id, "call aborted by forced stop");
                        return;
                    }
                };
                let _ = tx.send(Frame::new(id, reply)).await;
            });
        }

        drop(tx);
        if let Err(e) = writer.await {
            error!(peer = %self.peer, error = %e, "reply writer panicked");
        }
        debug!(peer = %self.peer, "connection closed");
    }
}

async fn write_replies<W>(
    mut sink: FramedWrite<W, tokio_util::codec::LengthDelimitedCodec>,
    mut rx: mpsc::Receiver<Frame>,
    kill: CancellationToken,
    peer: String,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = kill.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        let bytes = match encode_frame(&frame) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(%peer, id = frame.id, error = %e, "failed to encode reply");
                continue;
            }
        };
        if let Err(e) = sink.send(bytes).await {
            warn!(%peer, error = %e, "failed to write reply");
            break;
        }
    }
}

/// Routes requests to the registered services.
struct Dispatcher {
    services: Services,
    debug: bool,
}

impl Dispatcher {
    /// Run one call, applying the frame's deadline and the debug interceptor.
    #[instrument(skip_all, fields(id = frame.id, method = frame.message.method()))]
    async fn call(&self, frame: Frame) -> CsiMessage {
        let method = frame.message.method();
        if self.debug {
            interceptor::log_request(method, &frame.message);
        }

        let result = match frame.timeout_ms {
            Some(ms) => {
                match tokio::time::timeout(Duration::from_millis(ms), self.route(frame.message))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(CsiError::DeadlineExceeded(format!(
                        "{method} did not complete within {ms}ms"
                    ))),
                }
            }
            None => self.route(frame.message).await,
        };

        let reply = result.unwrap_or_else(CsiMessage::Error);
        if self.debug {
            interceptor::log_response(method, &reply);
        }
        reply
    }

    fn identity(&self) -> Result<&dyn CsiIdentity, CsiError> {
        self.services
            .identity
            .as_deref()
            .ok_or_else(|| unregistered(ServiceGroup::Identity))
    }

    fn controller(&self) -> Result<&dyn CsiController, CsiError> {
        self.services
            .controller
            .as_deref()
            .ok_or_else(|| unregistered(ServiceGroup::Controller))
    }

    fn node(&self) -> Result<&dyn CsiNode, CsiError> {
        self.services
            .node
            .as_deref()
            .ok_or_else(|| unregistered(ServiceGroup::Node))
    }

    /// Map a request to the matching trait method and wrap the result in
    /// the corresponding response variant.
    async fn route(&self, request: CsiMessage) -> Result<CsiMessage, CsiError> {
        match request.service_group() {
            Some(group) if !self.services.serves(group) => return Err(unregistered(group)),
            Some(_) => {}
            None => {
                warn!(msg = %request, "unexpected message variant received as request");
                return Err(CsiError::InvalidArgument(format!(
                    "unexpected message: {request}"
                )));
            }
        }

        match request {
            // --- Identity ---------------------------------------------------
            CsiMessage::GetPluginInfo => self
                .identity()?
                .get_plugin_info()
                .await
                .map(CsiMessage::PluginInfoResponse),
            CsiMessage::GetPluginCapabilities => self
                .identity()?
                .get_plugin_capabilities()
                .await
                .map(CsiMessage::PluginCapabilitiesResponse),
            CsiMessage::Probe => self.identity()?.probe().await.map(CsiMessage::ProbeResult),

            // --- Controller -------------------------------------------------
            CsiMessage::CreateVolume(req) => self
                .controller()?
                .create_volume(req)
                .await
                .map(CsiMessage::VolumeCreated),
            CsiMessage::DeleteVolume(req) => self
                .controller()?
                .delete_volume(req)
                .await
                .map(|()| CsiMessage::Ok),
            CsiMessage::ControllerPublishVolume(req) => self
                .controller()?
                .controller_publish_volume(req)
                .await
                .map(CsiMessage::PublishContext),
            CsiMessage::ControllerUnpublishVolume(req) => self
                .controller()?
                .controller_unpublish_volume(req)
                .await
                .map(|()| CsiMessage::Ok),
            CsiMessage::ValidateVolumeCapabilities(req) => self
                .controller()?
                .validate_volume_capabilities(req)
                .await
                .map(CsiMessage::CapabilitiesValidated),
            CsiMessage::ListVolumes(req) => self
                .controller()?
                .list_volumes(req)
                .await
                .map(CsiMessage::VolumeList),
            CsiMessage::GetCapacity(req) => self
                .controller()?
                .get_capacity(req)
                .await
                .map(CsiMessage::Capacity),
            CsiMessage::ControllerGetCapabilities => self
                .controller()?
                .controller_get_capabilities()
                .await
                .map(CsiMessage::ControllerCapabilitiesResponse),
            CsiMessage::CreateSnapshot(req) => self
                .controller()?
                .create_snapshot(req)
                .await
                .map(CsiMessage::SnapshotCreated),
            CsiMessage::DeleteSnapshot(req) => self
                .controller()?
                .delete_snapshot(req)
                .await
                .map(|()| CsiMessage::Ok),
            CsiMessage::ListSnapshots(req) => self
                .controller()?
                .list_snapshots(req)
                .await
                .map(CsiMessage::SnapshotList),
            CsiMessage::ControllerExpandVolume(req) => self
                .controller()?
                .controller_expand_volume(req)
                .await
                .map(CsiMessage::VolumeExpanded),
            CsiMessage::ControllerGetVolume(volume_id) => self
                .controller()?
                .controller_get_volume(&volume_id)
                .await
                .map(CsiMessage::VolumeResponse),

            // --- Node -------------------------------------------------------
            CsiMessage::NodeStageVolume(req) => self
                .node()?
                .stage_volume(req)
                .await
                .map(|()| CsiMessage::Ok),
            CsiMessage::NodeUnstageVolume {
                volume_id,
                staging_target_path,
            } => self
                .node()?
                .unstage_volume(&volume_id, &staging_target_path)
                .await
                .map(|()| CsiMessage::Ok),
            CsiMessage::NodePublishVolume(req) => self
                .node()?
                .publish_volume(req)
                .await
                .map(|()| CsiMessage::Ok),
            CsiMessage::NodeUnpublishVolume {
                volume_id,
                target_path,
            } => self
                .node()?
                .unpublish_volume(&volume_id, &target_path)
                .await
                .map(|()| CsiMessage::Ok),
            CsiMessage::NodeGetCapabilities => self
                .node()?
                .get_capabilities()
                .await
                .map(CsiMessage::NodeCapabilitiesResponse),
            CsiMessage::NodeGetInfo => self
                .node()?
                .get_info()
                .await
                .map(CsiMessage::NodeInfoResponse),

            other => Err(CsiError::InvalidArgument(format!(
                "unexpected message: {other}"
            ))),
        }
    }
}

fn unregistered(group: ServiceGroup) -> CsiError {
    CsiError::Unimplemented(format!("{group} service is not registered"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_dispatcher() -> Dispatcher {
        Dispatcher {
            services: Services::new(),
            debug: true,
        }
    }

    #[tokio::test]
    async fn absent_groups_answer_unimplemented() {
        let dispatcher = bare_dispatcher();
        for request in [
            CsiMessage::Probe,
            CsiMessage::ControllerGetCapabilities,
            CsiMessage::NodeGetInfo,
        ] {
            let reply = dispatcher.call(Frame::new(1, request)).await;
            assert!(matches!(reply, CsiMessage::Error(CsiError::Unimplemented(_))));
        }
    }

    #[test]
    fn services_report_registered_groups() {
        struct Ready;

        #[async_trait::async_trait]
        impl CsiIdentity for Ready {
            async fn get_plugin_info(&self) -> Result<crate::types::PluginInfo, CsiError> {
                Err(CsiError::Unavailable("unused".into()))
            }
            async fn probe(&self) -> Result<bool, CsiError> {
                Ok(true)
            }
            async fn get_plugin_capabilities(
                &self,
            ) -> Result<Vec<crate::types::PluginCapability>, CsiError> {
                Ok(vec![])
            }
        }

        let services = Services::new().with_identity(Arc::new(Ready));
        assert!(!services.is_empty());
        assert!(services.serves(ServiceGroup::Identity));
        assert!(!services.serves(ServiceGroup::Controller));
        assert!(!services.serves(ServiceGroup::Node));
    }

    #[tokio::test]
    async fn unregistered_group_is_named_in_the_error() {
        let reply = bare_dispatcher()
            .call(Frame::new(1, CsiMessage::NodeGetInfo))
            .await;
        let CsiMessage::Error(CsiError::Unimplemented(msg)) = reply else {
            panic!("expected Unimplemented");
        };
        assert_eq!(msg, "node service is not registered");
    }

    #[tokio::test]
    async fn response_variants_are_rejected() {
        let reply = bare_dispatcher().call(Frame::new(1, CsiMessage::Ok)).await;
        assert!(matches!(reply, CsiMessage::Error(CsiError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn invalid_endpoint_fails_start() {
        let err = CsiServer::new(Services::new())
            .start("http://localhost:1")
            .await
            .err()
            .expect("start must fail");
        assert!(matches!(err, CsiError::InvalidEndpoint(_)));
    }
}
