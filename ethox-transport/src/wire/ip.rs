//! Addresses and protocol numbers as seen by the transport layer.
//!
//! The IP headers themselves belong to the network layer, transport protocols only need the
//! addresses of a route, the protocol registry, and the pseudo header checksum.
use core::fmt;

use byteorder::{ByteOrder, NetworkEndian};

/// The address family of an [`Address`].
///
/// [`Address`]: enum.Address.html
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum Version {
    /// The wildcard belongs to every family.
    Unspecified,
    /// Internet Protocol version 4.
    Ipv4,
    /// Internet Protocol version 6.
    Ipv6,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Version::Unspecified => "any",
            Version::Ipv4 => "IPv4",
            Version::Ipv6 => "IPv6",
        };
        f.write_str(name)
    }
}

enum_with_unknown! {
    /// The protocol number carried in the IP header.
    ///
    /// Raw endpoints bind to one of these, `HopByHop` doubles as their wildcard.
    pub enum Protocol(u8) {
        /// Protocol number zero, the raw wildcard.
        HopByHop  = 0x00,
        /// ICMP for IPv4.
        Icmp      = 0x01,
        /// Group membership reports.
        Igmp      = 0x02,
        /// The stream protocol.
        Tcp       = 0x06,
        /// The datagram protocol.
        Udp       = 0x11,
        /// ICMP for IPv6.
        Icmpv6    = 0x3a,
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Protocol::HopByHop => "raw",
            Protocol::Icmp => "icmp",
            Protocol::Igmp => "igmp",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmpv6 => "icmpv6",
            Protocol::Unknown(number) => return write!(f, "proto-{}", number),
        };
        f.write_str(name)
    }
}

/// An IPv4 address in network byte order.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Ipv4Address(pub [u8; 4]);

impl Ipv4Address {
    /// `0.0.0.0`
    pub const UNSPECIFIED: Self = Ipv4Address([0; 4]);

    /// The limited broadcast `255.255.255.255`.
    pub const BROADCAST: Self = Ipv4Address([0xff; 4]);

    /// An address from its dotted quad.
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Ipv4Address([a, b, c, d])
    }

    /// The four octets.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn as_u32(self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    /// Whether this is the limited broadcast address.
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Whether the address lies in `224.0.0.0/4`.
    pub fn is_multicast(&self) -> bool {
        self.as_u32() >> 28 == 0xe
    }

    /// Whether this is `0.0.0.0`.
    pub fn is_unspecified(&self) -> bool {
        self.as_u32() == 0
    }

    /// Whether the address lies in `127.0.0.0/8`.
    pub fn is_loopback(&self) -> bool {
        self.as_u32() >> 24 == 127
    }
}

impl fmt::Display for Ipv4Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{}.{}.{}.{}", a, b, c, d)
    }
}

/// An IPv6 address in network byte order.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Ipv6Address(pub [u8; 16]);

impl Ipv6Address {
    /// `::`
    pub const UNSPECIFIED: Self = Ipv6Address([0; 16]);

    /// `::1`
    pub const LOOPBACK: Self = Ipv6Address(1u128.to_be_bytes());

    /// An address from its eight groups.
    #[allow(clippy::too_many_arguments)]
    pub fn new(a: u16, b: u16, c: u16, d: u16, e: u16, f: u16, g: u16, h: u16) -> Self {
        let mut octets = [0; 16];
        NetworkEndian::write_u16_into(&[a, b, c, d, e, f, g, h], &mut octets);
        Ipv6Address(octets)
    }

    /// The sixteen octets.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether the address lies in `ff00::/8`.
    pub fn is_multicast(&self) -> bool {
        self.0[0] == 0xff
    }

    /// Whether this is `::`.
    pub fn is_unspecified(&self) -> bool {
        *self == Self::UNSPECIFIED
    }

    /// Whether this is `::1`.
    pub fn is_loopback(&self) -> bool {
        *self == Self::LOOPBACK
    }
}

impl fmt::Display for Ipv6Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let groups = self.0.chunks_exact(2).map(NetworkEndian::read_u16);
        for (idx, group) in groups.enumerate() {
            let sep = if idx == 0 { "" } else { ":" };
            write!(f, "{}{:x}", sep, group)?;
        }
        Ok(())
    }
}

/// A local or remote address of an endpoint or a connection.
///
/// `Unspecified` is the wildcard of the endpoint table. Bind requests for `0.0.0.0` or `::` are
/// normalized to it so that a single wildcard entry exists per port.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum Address {
    /// The wildcard.
    Unspecified,
    /// An IPv4 address.
    Ipv4(Ipv4Address),
    /// An IPv6 address.
    Ipv6(Ipv6Address),
}

impl Address {
    /// Shorthand for an IPv4 address.
    pub const fn v4(a: u8, b: u8, c: u8, d: u8) -> Self {
        Address::Ipv4(Ipv4Address::new(a, b, c, d))
    }

    /// Shorthand for an IPv6 address.
    #[allow(clippy::too_many_arguments)]
    pub fn v6(a: u16, b: u16, c: u16, d: u16, e: u16, f: u16, g: u16, h: u16) -> Self {
        Address::Ipv6(Ipv6Address::new(a, b, c, d, e, f, g, h))
    }

    /// The octets in network byte order, empty for the wildcard.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Address::Unspecified => &[],
            Address::Ipv4(addr) => addr.as_bytes(),
            Address::Ipv6(addr) => addr.as_bytes(),
        }
    }

    /// The family of the address.
    pub fn version(&self) -> Version {
        match self {
            Address::Unspecified => Version::Unspecified,
            Address::Ipv4(_) => Version::Ipv4,
            Address::Ipv6(_) => Version::Ipv6,
        }
    }

    /// Whether this is a wildcard of any family.
    pub fn is_unspecified(&self) -> bool {
        match self {
            Address::Unspecified => true,
            Address::Ipv4(addr) => addr.is_unspecified(),
            Address::Ipv6(addr) => addr.is_unspecified(),
        }
    }

    /// Whether this is a multicast group of either family.
    pub fn is_multicast(&self) -> bool {
        match self {
            Address::Ipv4(addr) => addr.is_multicast(),
            Address::Ipv6(addr) => addr.is_multicast(),
            Address::Unspecified => false,
        }
    }

    /// Whether this is the IPv4 limited broadcast, IPv6 has none.
    pub fn is_broadcast(&self) -> bool {
        match self {
            Address::Ipv4(addr) => addr.is_broadcast(),
            _ => false,
        }
    }

    /// Whether this is a loopback address of either family.
    pub fn is_loopback(&self) -> bool {
        match self {
            Address::Ipv4(addr) => addr.is_loopback(),
            Address::Ipv6(addr) => addr.is_loopback(),
            Address::Unspecified => false,
        }
    }

    /// Map every wildcard form onto `Address::Unspecified`.
    pub fn normalize(self) -> Self {
        if self.is_unspecified() {
            Address::Unspecified
        } else {
            self
        }
    }
}

impl Default for Address {
    fn default() -> Self {
        Address::Unspecified
    }
}

impl From<Ipv4Address> for Address {
    fn from(addr: Ipv4Address) -> Self {
        Address::Ipv4(addr)
    }
}

impl From<Ipv6Address> for Address {
    fn from(addr: Ipv6Address) -> Self {
        Address::Ipv6(addr)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Address::Unspecified => f.write_str("*"),
            Address::Ipv4(addr) => fmt::Display::fmt(addr, f),
            Address::Ipv6(addr) => fmt::Display::fmt(addr, f),
        }
    }
}

/// The Internet checksum of RFC 1071 over a transport pseudo header.
///
/// Everything is summed through an [`Accumulator`], which also serves segments whose payload is
/// scattered over several borrowed buffers.
///
/// [`Accumulator`]: struct.Accumulator.html
pub mod checksum {
    use byteorder::{ByteOrder, NetworkEndian};

    use super::{Address, Protocol, Version};

    /// Fold all carries back into the low sixteen bits.
    fn fold(mut sum: u32) -> u16 {
        while sum > 0xffff {
            sum = (sum & 0xffff) + (sum >> 16);
        }
        sum as u16
    }

    /// The one's complement sum of some bytes, not complemented.
    ///
    /// An odd trailing byte is the high byte of a zero padded word.
    pub fn data(bytes: &[u8]) -> u16 {
        let mut sum = Accumulator::new();
        sum.push(bytes);
        sum.sum()
    }

    /// The sum over the pseudo header of a transport payload with `length` bytes.
    ///
    /// The layout follows the family of `src_addr`, routes never mix families.
    pub fn pseudo_header(src_addr: &Address, dst_addr: &Address, protocol: Protocol, length: u32) -> u16 {
        let mut sum = Accumulator::new();
        sum.push(src_addr.as_bytes());
        sum.push(dst_addr.as_bytes());
        match src_addr.version() {
            Version::Ipv6 => {
                let mut tail = [0; 8];
                NetworkEndian::write_u32(&mut tail[..4], length);
                tail[7] = protocol.into();
                sum.push(&tail);
            },
            _ => {
                let mut tail = [0; 4];
                tail[1] = protocol.into();
                NetworkEndian::write_u16(&mut tail[2..], length as u16);
                sum.push(&tail);
            },
        }
        sum.sum()
    }

    /// Complement a sum into its wire form.
    ///
    /// A zero checksum means 'not present' for the datagram protocol, so it is sent as the
    /// equivalent all ones.
    pub fn finish(sum: u16) -> u16 {
        match !sum {
            0 => !0,
            value => value,
        }
    }

    /// The wire checksum of a contiguous transport segment with a zeroed checksum field.
    pub fn pseudo_header_checksum(src_addr: &Address, dst_addr: &Address, protocol: Protocol, segment: &[u8])
        -> u16
    {
        let mut sum = Accumulator::new();
        sum.push(segment);
        sum.finish_with_pseudo_header(src_addr, dst_addr, protocol)
    }

    /// Check a received segment including its checksum field.
    pub fn verify(src_addr: &Address, dst_addr: &Address, protocol: Protocol, segment: &[u8]) -> bool {
        let mut sum = Accumulator::new();
        sum.push(segment);
        sum.add(pseudo_header(src_addr, dst_addr, protocol, segment.len() as u32));
        sum.sum() == !0
    }

    /// A running sum over a segment that is not contiguous in memory.
    ///
    /// Chunks may have odd lengths. A trailing odd byte is held back and paired with the first
    /// byte of the next chunk, so the result equals the checksum of the concatenation.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct Accumulator {
        sum: u32,
        odd: Option<u8>,
        len: usize,
    }

    impl Accumulator {
        /// An empty sum.
        pub fn new() -> Self {
            Accumulator::default()
        }

        /// Add the next chunk of the segment.
        pub fn push(&mut self, mut bytes: &[u8]) {
            self.len += bytes.len();
            if let Some(high) = self.odd {
                match bytes.split_first() {
                    Some((&low, rest)) => {
                        self.odd = None;
                        self.add(u16::from_be_bytes([high, low]));
                        bytes = rest;
                    },
                    None => return,
                }
            }

            let mut words = bytes.chunks_exact(2);
            for word in &mut words {
                self.add(NetworkEndian::read_u16(word));
            }
            self.odd = words.remainder().first().copied();
        }

        /// The number of bytes pushed so far.
        pub fn len(&self) -> usize {
            self.len
        }

        /// Whether nothing was pushed so far.
        pub fn is_empty(&self) -> bool {
            self.len == 0
        }

        /// The sum of all pushed bytes, without the final complement.
        pub fn sum(&self) -> u16 {
            let pad = self.odd.map_or(0, |high| u32::from(high) << 8);
            fold(self.sum + pad)
        }

        /// The wire checksum of the pushed bytes behind a pseudo header.
        pub fn finish_with_pseudo_header(&self, src_addr: &Address, dst_addr: &Address, protocol: Protocol)
            -> u16
        {
            let mut total = *self;
            total.add(pseudo_header(src_addr, dst_addr, protocol, self.len as u32));
            finish(total.sum())
        }

        fn add(&mut self, word: u16) {
            self.sum = u32::from(fold(self.sum + u32::from(word)));
        }
    }
}
