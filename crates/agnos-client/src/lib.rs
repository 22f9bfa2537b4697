//! Client side of the Agnos RPC protocol.
//!
//! A [`Client`] issues sequenced calls over one transport and correlates the
//! replies: each call installs a reply slot keyed by its sequence number, a
//! dedicated pump thread decodes incoming packets and routes them to the
//! waiting call sites, and error replies surface as typed errors at the call
//! site. Replies may arrive in any order; correlation is solely by sequence
//! number.
//!
//! Generated client stubs wrap [`Client::begin_call`] /
//! [`Client::get_reply`] with typed signatures and cache their proxies in
//! the per-connection [`ProxyCache`].

pub mod client;
pub mod error;
pub mod proxy;

pub use client::{Call, Client};
pub use error::CallError;
pub use proxy::ProxyCache;
