//! Push-feed subscription for account mutations.
//!
//! [`StreamConnection`] keeps one logical session to the feed alive: it
//! subscribes by owning program, pings when the link is idle, and reconnects
//! with capped exponential backoff. Decoded [`AccountUpdate`]s are handed to
//! the consumer over an `mpsc` channel, so nothing downstream sees transport
//! details.
//!
//! [`AccountUpdate`]: acctrail_core::update::AccountUpdate

#![allow(async_fn_in_trait)]

pub mod connection;
pub mod decode;
pub mod error;
pub mod reconnect;
pub mod transport;
pub mod wire;

pub use connection::{ConnectionOptions, ConnectionState, StreamConnection, SubscriptionSet};
pub use error::{Error, Result};
pub use reconnect::ReconnectPolicy;
pub use transport::{FeedSession, FeedTransport, TcpTransport};

#[cfg(test)]
mod tests;
