//! Transport endpoint parsing.
//!
//! CSI plugins are addressed as `unix://<path>` or `tcp://<host:port>`.  The
//! scheme is matched case-insensitively; the address must be non-empty.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::CsiError;

/// Socket family selected by an endpoint's scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Unix domain stream socket.
    Unix,
    /// TCP socket.
    Tcp,
}

impl Scheme {
    /// Lower-case scheme name without the `://` separator.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Scheme::Unix => "unix",
            Scheme::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed transport endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Socket family.
    pub scheme: Scheme,
    /// Filesystem path (unix) or `host:port` (tcp).
    pub address: String,
}

impl Endpoint {
    /// Socket file of a unix endpoint.  A relative address is rooted at `/`,
    /// so `unix://csi/csi.sock` names `/csi/csi.sock`.
    pub fn socket_path(&self) -> PathBuf {
        Path::new("/").join(&self.address)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.address)
    }
}

impl FromStr for Endpoint {
    type Err = CsiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_endpoint(s)
    }
}

/// Split an endpoint string into scheme and address.  Performs no I/O.
pub fn parse_endpoint(endpoint: &str) -> Result<Endpoint, CsiError> {
    let invalid = || CsiError::InvalidEndpoint(endpoint.to_owned());

    let (scheme, address) = endpoint.split_once("://").ok_or_else(invalid)?;
    let scheme = if scheme.eq_ignore_ascii_case("unix") {
        Scheme::Unix
    } else if scheme.eq_ignore_ascii_case("tcp") {
        Scheme::Tcp
    } else {
        return Err(invalid());
    };
    if address.is_empty() {
        return Err(invalid());
    }

    Ok(Endpoint {
        scheme,
        address: address.to_owned(),
    })
}
