//! Low-level packet access and construction.
//!
//! The `wire` module deals with the packet *representation*. It provides two levels of
//! functionality.
//!
//!  * First, it provides functions to extract fields from sequences of octets, and to insert
//!    fields into sequences of octets. This happens through dynamically sized wrappers around a
//!    byte slice, such as [`tcp_packet`] and [`udp_packet`].
//!  * Second, in cases where the space of valid field values is much smaller than the space of
//!    possible field values, it provides a compact, high-level representation of packet data
//!    that can be parsed from and emitted into a sequence of octets. This happens through the
//!    `Repr` family of structs, e.g. [`TcpRepr`] or [`UdpRepr`].
//!
//! Only the transport headers are handled here. The network layer below owns IP headers, so the
//! [`ip`] module only contains addresses, the protocol registry, and the checksum shared by every
//! transport protocol.
//!
//! [`tcp_packet`]: tcp/struct.tcp.html
//! [`udp_packet`]: udp/struct.udp.html
//! [`TcpRepr`]: tcp/struct.Repr.html
//! [`UdpRepr`]: udp/struct.Repr.html
//! [`ip`]: ip/index.html
mod error;
pub mod ip;
pub mod tcp;
pub mod udp;

mod field {
    pub(crate) type Field = ::core::ops::Range<usize>;
    pub(crate) type Rest  = ::core::ops::RangeFrom<usize>;
}

pub use self::error::{Error, Result};

pub use self::ip::{
    checksum,
    Address as IpAddress,
    Ipv4Address,
    Ipv6Address,
    Protocol as IpProtocol,
    Version as IpVersion};

pub use self::tcp::{
    tcp as tcp_packet,
    Flags as TcpFlags,
    Repr as TcpRepr,
    SeqNumber as TcpSeqNumber,
    TcpOption};

pub use self::udp::{
    udp as udp_packet,
    Repr as UdpRepr};

/// Determines how a checksum is handled while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checksum {
    /// Verify the checksum against a pseudo header of these addresses.
    Manual {
        /// The source address of the enclosing datagram.
        src_addr: IpAddress,
        /// The destination address of the enclosing datagram.
        dst_addr: IpAddress,
    },
    /// Do not check the checksum.
    Ignored,
}
