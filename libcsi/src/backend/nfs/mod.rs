//! NFS storage backend.
//!
//! Every volume is a subdirectory of one NFS export that the controller
//! host keeps mounted locally, and every snapshot is a tar archive beside
//! them.  [`NfsIdentity`], [`NfsController`] and [`NfsNode`] share one
//! [`DriverConfig`].

pub mod archive;
pub mod config;
pub mod controller;
pub mod identity;
pub mod mount;
pub mod node;
pub mod store;

use std::path::{Component, Path};

pub use archive::TarArchiver;
pub use config::{DriverConfig, parse_capacity};
pub use controller::NfsController;
pub use identity::NfsIdentity;
pub use node::NfsNode;
pub use store::{LocalStore, StoreError, VolumeStore};

use crate::error::CsiError;

/// Accept `value` only if it names a single entry directly below a root, so
/// IDs cannot climb out of the export.
pub(crate) fn path_component<'a>(what: &str, value: &'a str) -> Result<&'a Path, CsiError> {
    let path = Path::new(value);
    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(path),
        _ => Err(CsiError::InvalidArgument(format!(
            "{what} {value:?} must be a single path component"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_components_only() {
        assert!(path_component("name", "pvc-1").is_ok());
        for bad in ["", ".", "..", "a/b", "/abs", "../x"] {
            assert!(path_component("name", bad).is_err(), "{bad:?}");
        }
    }
}
