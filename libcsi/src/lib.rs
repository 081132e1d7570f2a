//! # libcsi: Container Storage Interface plugin over unix/tcp sockets
//!
//! `libcsi` implements the [Container Storage Interface][csi] verb groups as
//! async traits, carries them over a length-delimited JSON transport on a
//! unix-domain or TCP socket, and ships an NFS backend that provisions
//! volumes as directories of one shared export.  It follows the RK8s
//! conventions: Tokio async runtime, `tracing` for observability and
//! `thiserror` for structured errors.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: `Volume`, `Snapshot`, capabilities, requests. |
//! | [`error`] | [`CsiError`] enum and its status [`Code`](error::Code). |
//! | [`endpoint`] | `unix://` / `tcp://` endpoint parsing. |
//! | [`message`] | [`CsiMessage`] protocol envelope and wire [`Frame`](message::Frame). |
//! | [`identity`] | [`CsiIdentity`] trait: plugin discovery & health. |
//! | [`controller`] | [`CsiController`] trait: volume and snapshot lifecycle. |
//! | [`node`] | [`CsiNode`] trait: stage, publish, unpublish, unstage. |
//! | [`transport`] | Non-blocking server and multiplexing client. |
//! | [`backend`] | Storage backends (NFS). |
//!
//! The wire format is length-delimited JSON frames, not CSI gRPC; stock CSI
//! sidecars need a gRPC front end to talk to this server.
//!
//! [csi]: https://github.com/container-storage-interface/spec

pub mod backend;
pub mod controller;
pub mod endpoint;
pub mod error;
pub mod identity;
pub mod message;
pub mod node;
pub mod transport;
pub mod types;

// Re-export the most commonly used items at crate root for convenience.
pub use controller::CsiController;
pub use endpoint::{Endpoint, Scheme, parse_endpoint};
pub use error::CsiError;
pub use identity::CsiIdentity;
pub use message::CsiMessage;
pub use node::CsiNode;
pub use transport::{CsiClient, CsiServer, ServerHandle, ServerState, Services};
pub use types::*;
