//! The boundary towards the network layer.
//!
//! The transport core does not build IP headers, resolve routes, or own interfaces. It consumes
//! those services through two traits. [`Network`] routes and emits packets, and [`Interfaces`]
//! answers questions about local addresses and interface capabilities.
//!
//! [`Network`]: trait.Network.html
//! [`Interfaces`]: trait.Interfaces.html
use core::fmt;
use core::ops::Range;
use std::sync::Arc;

use crate::wire::{IpAddress, IpProtocol};
use super::{Completion, Result};

/// The index of a network interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InterfaceId(pub u32);

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "if{}", self.0)
    }
}

/// A resolved path towards a destination.
///
/// Routes are cached on connections. The network layer may invalidate them at any time, which is
/// detected by `Network::validate_route` before the next send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    /// The address the route leads to.
    pub destination: IpAddress,
    /// The scope of the destination, zero for global addresses.
    pub scope: u32,
    /// The local address packets on this route are sent from.
    pub source: IpAddress,
    /// The outgoing interface.
    pub interface: InterfaceId,
    /// The largest IP packet the path carries.
    pub mtu: usize,
    /// Opaque version of the routing table this route was derived from.
    pub generation: u64,
}

/// A part of a packet payload.
#[derive(Clone)]
pub enum Chunk {
    /// A range of a buffer that is still referenced by its owner.
    Borrowed {
        /// The complete user buffer.
        buffer: Arc<[u8]>,
        /// The bytes of `buffer` belonging to the packet.
        range: Range<usize>,
    },
    /// Bytes copied into storage owned by the packet.
    Copied(Vec<u8>),
}

/// A transport packet handed to the network layer.
#[derive(Clone, Debug)]
pub struct OutPacket {
    /// The protocol field of the IP header.
    pub protocol: IpProtocol,
    /// The hop limit or TTL to use.
    pub hop_limit: u8,
    /// Whether multicast packets are looped back to local listeners.
    pub multicast_loopback: bool,
    /// The transport header, including its checksum.
    pub header: Vec<u8>,
    /// The payload following the header, in order.
    pub payload: Vec<Chunk>,
}

/// An interface as seen by the transport layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interface {
    /// The index of the interface.
    pub id: InterfaceId,
    /// The largest IP packet the interface carries.
    pub mtu: usize,
    /// Whether the interface can join multicast groups.
    pub multicast: bool,
}

/// Routes and emits packets.
pub trait Network: Send + Sync {
    /// Find a route for a destination.
    fn route_to_destination(&self, destination: IpAddress, scope: u32) -> Option<Route>;

    /// Check a cached route.
    ///
    /// Returns a possibly updated route or `None` if the route is gone.
    fn validate_route(&self, route: &Route) -> Option<Route>;

    /// Emit a packet.
    ///
    /// This must not block. The completion must be invoked exactly once, also when the packet is
    /// rejected immediately. It may be invoked before this method returns.
    fn send_packet(&self, route: &Route, packet: OutPacket, completion: Completion<()>);
}

/// Local address and interface information.
pub trait Interfaces: Send + Sync {
    /// Find the interface owning a local address.
    fn find_local_address_owner(&self, address: IpAddress, scope: u32) -> Option<InterfaceId>;

    /// Find an interface by its index.
    fn find_interface_by_index(&self, id: InterfaceId) -> Option<Interface>;

    /// Join or leave a multicast group on an interface.
    fn set_membership(&self, group: IpAddress, interface: InterfaceId, joined: bool) -> Result<()> {
        let _ = (group, interface, joined);
        Ok(())
    }
}

impl Chunk {
    /// The bytes of the chunk.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Chunk::Borrowed { buffer, range } => &buffer[range.clone()],
            Chunk::Copied(bytes) => bytes,
        }
    }

    /// The number of bytes in the chunk.
    pub fn len(&self) -> usize {
        match self {
            Chunk::Borrowed { range, .. } => range.len(),
            Chunk::Copied(bytes) => bytes.len(),
        }
    }

    /// Check if the chunk has no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if the chunk references a user buffer without copying.
    pub fn is_borrowed(&self) -> bool {
        match self {
            Chunk::Borrowed { .. } => true,
            Chunk::Copied(_) => false,
        }
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Chunk::Borrowed { range, .. } => write!(f, "Borrowed({:?})", range),
            Chunk::Copied(bytes) => write!(f, "Copied({})", bytes.len()),
        }
    }
}

impl OutPacket {
    /// The length of the transport packet, header included.
    pub fn len(&self) -> usize {
        self.header.len() + self.payload_len()
    }

    /// Check if there is no header and no payload.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The length of the payload.
    pub fn payload_len(&self) -> usize {
        self.payload.iter().map(Chunk::len).sum()
    }

    /// Gather header and payload into one buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.len());
        bytes.extend_from_slice(&self.header);
        for chunk in &self.payload {
            bytes.extend_from_slice(chunk.as_bytes());
        }
        bytes
    }
}
