//! Stream client used to issue CSI requests to a running plugin.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf};
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::{debug, instrument, warn};

use crate::endpoint::{Scheme, parse_endpoint};
use crate::error::CsiError;
use crate::message::{CsiMessage, Frame};
use crate::transport::codec::{decode_frame, encode_frame, frame_codec};

type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;
type Pending = DashMap<u64, oneshot::Sender<CsiMessage>>;

/// A CSI client multiplexing concurrent requests over one connection.
///
/// Every request carries a fresh id; replies may arrive in any order and are
/// matched back to their caller by that id.
pub struct CsiClient {
    writer: Mutex<FramedWrite<BoxWriter, LengthDelimitedCodec>>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

struct Shared {
    pending: Pending,
    closed: AtomicBool,
}

impl CsiClient {
    /// Connect to the plugin listening on `endpoint` (`unix://` or `tcp://`).
    pub async fn connect(endpoint: &str) -> Result<Self, CsiError> {
        let parsed = parse_endpoint(endpoint)?;
        let client = match parsed.scheme {
            Scheme::Unix => UnixStream::connect(parsed.socket_path())
                .await
                .map(Self::from_stream),
            Scheme::Tcp => TcpStream::connect(&parsed.address)
                .await
                .map(Self::from_stream),
        }
        .map_err(|e| CsiError::TransportError(format!("failed to connect to {parsed}: {e}")))?;

        debug!(endpoint = %parsed, "CSI connection established");
        Ok(client)
    }

    fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let shared = Arc::new(Shared {
            pending: DashMap::new(),
            closed: AtomicBool::new(false),
        });
        let reader = tokio::spawn(read_replies(
            FramedRead::new(read_half, frame_codec()),
            Arc::clone(&shared),
        ));
        let writer: BoxWriter = Box::new(write_half);

        Self {
            writer: Mutex::new(FramedWrite::new(writer, frame_codec())),
            shared,
            // 0 is reserved for replies to undecodable frames.
            next_id: AtomicU64::new(1),
            reader,
        }
    }

    /// Send a request and wait for the corresponding response.
    ///
    /// Service failures come back as [`CsiMessage::Error`]; only transport
    /// failures are returned as `Err`.
    #[instrument(skip(self), fields(msg = %msg))]
    pub async fn request(&self, msg: &CsiMessage) -> Result<CsiMessage, CsiError> {
        self.send(Frame::new(self.next_id(), msg.clone())).await
    }

    /// Like [`request`](Self::request), asking the server to abandon the call
    /// with `DeadlineExceeded` once `timeout` has elapsed.
    #[instrument(skip(self), fields(msg = %msg))]
    pub async fn request_with_timeout(
        &self,
        msg: &CsiMessage,
        timeout: Duration,
    ) -> Result<CsiMessage, CsiError> {
        let mut frame = Frame::new(self.next_id(), msg.clone());
        frame.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self.send(frame).await
    }

    /// Send a request and turn an error reply into `Err`.
    pub async fn call(&self, msg: &CsiMessage) -> Result<CsiMessage, CsiError> {
        self.request(msg).await?.into_result()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn send(&self, frame: Frame) -> Result<CsiMessage, CsiError> {
        let id = frame.id;
        let bytes = encode_frame(&frame)?;

        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(id, tx);
        if self.shared.closed.load(Ordering::SeqCst) {
            self.shared.pending.remove(&id);
            return Err(CsiError::TransportError("connection closed".into()));
        }

        if let Err(e) = self.writer.lock().await.send(bytes).await {
            self.shared.pending.remove(&id);
            return Err(CsiError::transport(e));
        }

        let response = rx.await.map_err(|_| {
            CsiError::TransportError("connection closed before the reply arrived".into())
        })?;
        debug!(id, %response, "CSI response received");
        Ok(response)
    }
}

impl Drop for CsiClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_replies<R>(mut frames: FramedRead<ReadHalf<R>, LengthDelimitedCodec>, shared: Arc<Shared>)
where
    R: AsyncRead + Send,
{
    while let Some(next) = frames.next().await {
        let buf = match next {
            Ok(buf) => buf,
            Err(e) => {
                warn!(error = %e, "failed to read reply frame");
                break;
            }
        };
        let frame = match decode_frame(&buf) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "dropping undecodable reply");
                continue;
            }
        };
        match shared.pending.remove(&frame.id) {
            Some((_, waiter)) => {
                let _ = waiter.send(frame.message);
            }
            None => warn!(id = frame.id, reply = %frame.message, "reply for unknown request"),
        }
    }

    // Wake everyone still waiting; their senders are dropped here.
    shared.closed.store(true, Ordering::SeqCst);
    shared.pending.clear();
}
