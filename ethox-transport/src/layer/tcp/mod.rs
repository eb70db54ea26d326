//! The connection state and send engine of the stream protocol.
//!
//! Every connection has a control block behind its own lock. The receive path is not part of
//! this crate. It reports what it parsed through the hooks of [`Provider`]: a completed
//! handshake, acknowledgements, received data, the peer closing its side. The provider reacts by
//! updating the control block and running the send engine.
//!
//! ## Send engine
//!
//! User data is queued as send requests. The engine carves segments out of the queue as the
//! usable window permits, following slow start and congestion avoidance (RFC 5681), Nagle's
//! algorithm, and sender side silly window avoidance (RFC 1122). A segment references the user
//! buffer in place where possible and copies otherwise. Requests are completed once the peer
//! acknowledged all their bytes and no segment still references them.
//!
//! Only one thread runs the engine of a connection at a time. A thread that finds it running
//! leaves a note and the running thread loops once more before it returns.
//!
//! [`Provider`]: struct.Provider.html
use core::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::layer::{Error, Result};
use crate::layer::network::Network;
use crate::managed::Key;
use crate::stack::{Config, Statistics};
use crate::wire::{IpAddress, TcpSeqNumber};

mod connection;
mod input;
mod lifecycle;
mod request;
mod rtt;
mod send;
mod siphash;
mod store;
mod timer;

#[cfg(test)]
mod tests;

pub use self::connection::{Connection, ConnectionInfo, State};
pub use self::rtt::RttEstimator;
pub use self::send::{Decision, Window};
pub use self::siphash::IsnGenerator;

use self::request::{Budget, RequestPool};
use self::store::Store;

/// Identifies a connection of a provider.
///
/// Keys are never reused, an operation with the key of a freed connection fails with
/// `InvalidHandle`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionKey(pub(crate) Key);

/// The addresses and ports identifying a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FourTuple {
    /// The local address.
    pub local: IpAddress,
    /// The local port.
    pub local_port: u16,
    /// The remote address.
    pub remote: IpAddress,
    /// The remote port.
    pub remote_port: u16,
}

/// What the peer announced in its SYN.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Handshake {
    /// The initial sequence number of the peer.
    pub seq: TcpSeqNumber,
    /// The receive window of the peer.
    pub window: usize,
    /// The MSS option, if any.
    pub max_seg_size: Option<u16>,
}

/// A change of a per-connection option.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionOption {
    /// Disable the batching of small segments.
    NoDelay(bool),
    /// Probe idle connections.
    KeepAlive(bool),
}

/// The stream protocol of one stack instance.
pub struct Provider {
    config: Config,
    network: Arc<dyn Network>,
    store: Mutex<Store>,
    requests: RequestPool,
    budget: Budget,
    isn: IsnGenerator,
    stats: Arc<Statistics>,
}

impl Provider {
    /// Create a provider without connections.
    pub fn new(config: Config, network: Arc<dyn Network>, stats: Arc<Statistics>) -> Self {
        Provider {
            store: Mutex::new(Store::new(config.max_connections)),
            requests: RequestPool::new(config.max_send_requests),
            budget: Budget::new(config.segment_buffer_budget),
            isn: IsnGenerator::from_entropy(),
            config,
            network,
            stats,
        }
    }

    /// Use another sequence number generator.
    pub fn with_isn(self, isn: IsnGenerator) -> Self {
        Provider { isn, ..self }
    }

    /// The number of allocated connections.
    pub fn connections(&self) -> usize {
        self.store.lock().len()
    }

    /// The number of send requests in the pool.
    pub fn send_requests(&self) -> usize {
        self.requests.len()
    }

    /// Bytes of segment buffers in flight to the network layer.
    pub fn buffer_in_use(&self) -> usize {
        self.budget.in_use()
    }

    /// Find a connection.
    pub fn get(&self, key: ConnectionKey) -> Result<Arc<Connection>> {
        self.store.lock().get(key).ok_or(Error::InvalidHandle)
    }

    /// A snapshot of a connection.
    pub fn info(&self, key: ConnectionKey) -> Result<ConnectionInfo> {
        Ok(self.get(key)?.info())
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "tcp:{}", self.0)
    }
}

impl fmt::Display for FourTuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{} -> {}:{}", self.local, self.local_port, self.remote, self.remote_port)
    }
}
