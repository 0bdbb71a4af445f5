//! stratumrpc-core — session layer for the Electrum "Stratum" JSON-RPC protocol.
//!
//! # Overview
//!
//! One TCP connection carries two kinds of traffic: ordinary request/response
//! calls and server-initiated subscription pushes. This crate provides:
//!
//! - [`message`] — newline-delimited JSON codec (requests, responses, notifications)
//! - [`Session`] — id correlation, a single background read loop, `call`/`subscribe`
//! - [`SubscriptionRegistry`] — ordered per-method delivery queues
//! - [`Keepalive`] — periodic heartbeat bound to a session's lifetime
//! - [`Connector`] — the seam through which a session obtains its byte stream
//! - [`ServerInfo`] — host name plus per-protocol ports
//! - [`SessionError`] — structured error type

pub mod error;
pub mod keepalive;
pub mod message;
pub mod pending;
pub mod registry;
pub mod server;
pub mod session;
pub mod transport;

pub use error::SessionError;
pub use keepalive::{Keepalive, KeepaliveConfig, KeepaliveState};
pub use message::{Inbound, Notification, Request, Response};
pub use registry::{SubscriptionHandle, SubscriptionRegistry};
pub use server::{Protocol, SecurityOptions, ServerInfo};
pub use session::{PendingCall, Session, SessionConfig, DEFAULT_MAX_FRAME_LEN};
pub use transport::{BoxedStream, ByteStream, Connector};
