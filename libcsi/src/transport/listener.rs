//! Listener selection by endpoint scheme.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tracing::{debug, warn};

use crate::endpoint::{Endpoint, Scheme};
use crate::error::CsiError;

/// Address a server is actually listening on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    /// Unix socket file.
    Unix(PathBuf),
    /// Bound TCP address (with the real port when `:0` was requested).
    Tcp(SocketAddr),
}

impl ListenAddr {
    /// Endpoint string a client can connect to.
    pub fn to_endpoint(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}

pub(crate) enum Listener {
    Unix(UnixListener, PathBuf),
    Tcp(TcpListener),
}

pub(crate) enum Accepted {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Listener {
    /// Bind the listener for `endpoint`.
    ///
    /// A stale unix socket file is removed first.  Failing to remove it for
    /// any reason other than non-existence aborts the bind.
    pub(crate) async fn bind(endpoint: &Endpoint) -> Result<Self, CsiError> {
        match endpoint.scheme {
            Scheme::Unix => {
                let path = endpoint.socket_path();
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => debug!(path = %path.display(), "removed stale socket file"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(CsiError::TransportError(format!(
                            "failed to remove {}: {e}",
                            path.display()
                        )));
                    }
                }
                let listener = UnixListener::bind(&path).map_err(|e| {
                    CsiError::TransportError(format!("failed to listen on {endpoint}: {e}"))
                })?;
                Ok(Self::Unix(listener, path))
            }
            Scheme::Tcp => {
                let listener = TcpListener::bind(&endpoint.address).await.map_err(|e| {
                    CsiError::TransportError(format!("failed to listen on {endpoint}: {e}"))
                })?;
                Ok(Self::Tcp(listener))
            }
        }
    }

    pub(crate) fn local_addr(&self) -> Result<ListenAddr, CsiError> {
        match self {
            Self::Unix(_, path) => Ok(ListenAddr::Unix(path.clone())),
            Self::Tcp(listener) => listener
                .local_addr()
                .map(ListenAddr::Tcp)
                .map_err(CsiError::transport),
        }
    }

    /// Accept one connection, returning the stream and a printable peer.
    pub(crate) async fn accept(&self) -> std::io::Result<(Accepted, String)> {
        match self {
            Self::Unix(listener, path) => {
                let (stream, _) = listener.accept().await?;
                Ok((Accepted::Unix(stream), format!("unix:{}", path.display())))
            }
            Self::Tcp(listener) => {
                let (stream, remote) = listener.accept().await?;
                Ok((Accepted::Tcp(stream), format!("tcp:{remote}")))
            }
        }
    }

    /// Stop listening and remove the unix socket file, best effort.
    pub(crate) async fn close(self) {
        if let Self::Unix(listener, path) = self {
            drop(listener);
            if let Err(e) = tokio::fs::remove_file(&path).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = %path.display(), error = %e, "failed to remove socket file");
            }
        }
    }
}
