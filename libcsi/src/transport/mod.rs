//! Socket transport for CSI messages.
//!
//! This module provides [`CsiClient`] and [`CsiServer`] that exchange
//! [`CsiMessage`](crate::message::CsiMessage) values as length-delimited JSON
//! [`Frame`](crate::message::Frame)s over a unix-domain or TCP stream.

pub mod client;
pub mod codec;
pub mod interceptor;
pub mod listener;
pub mod server;

pub use client::CsiClient;
pub use listener::ListenAddr;
pub use server::{CsiServer, ServerHandle, ServerState, Services};
