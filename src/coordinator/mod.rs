// src/coordinator/mod.rs

//! Talking to the remote coordinator.
//!
//! [`channel::RequestResponseChannel`] is the request/reply primitive,
//! [`client::CoordinatorClient`] the typed protocol on top of it, and
//! [`file_transport::FileHandshakeTransport`] the transport the binary uses.

pub mod channel;
pub mod client;
pub mod file_transport;

pub use channel::{ChannelTransport, Envelope, Reply, RequestResponseChannel};
pub use client::{Coordinator, CoordinatorClient, JobState, methods};
pub use file_transport::FileHandshakeTransport;
