//! Datagram construction for datagram and raw endpoints.
//!
//! The endpoint table decides who may send. This module only turns a validated send into the
//! packet handed to the network layer. The user buffer is attached as a borrowed chunk, the UDP
//! header is written separately so that the checksum can be summed over both without copying.
use std::sync::Arc;

use crate::layer::{Error, Result};
use crate::layer::addr::{Binding, Coverage, Options};
use crate::layer::network::{Chunk, OutPacket, Route};
use crate::wire::{checksum, udp_packet, IpAddress, IpProtocol, UdpRepr};

/// The largest payload of a single datagram.
pub const MAX_PAYLOAD: usize = 0xffff - 8;

/// Check a payload length before it is accepted for sending.
pub(crate) fn check_len(raw: bool, len: usize) -> Result<()> {
    let max = if raw { 0xffff } else { MAX_PAYLOAD };
    if len > max {
        Err(Error::InvalidParameter)
    } else {
        Ok(())
    }
}

/// Adjust a route to the local binding and multicast options of an endpoint.
pub(crate) fn bind_route(binding: &Binding, options: &Options, mut route: Route) -> Result<Route> {
    if binding.address != IpAddress::Unspecified {
        if binding.address.version() != route.destination.version() {
            return Err(Error::InvalidAddress);
        }
        route.source = binding.address;
    }

    if route.destination.is_multicast() {
        if let Some(interface) = options.multicast_interface {
            route.interface = interface;
        }
    }

    Ok(route)
}

/// Build the packet of a datagram.
pub(crate) fn datagram(
    binding: &Binding,
    raw: bool,
    options: &Options,
    route: &Route,
    dst_port: u16,
    data: &Arc<[u8]>,
    default_hop_limit: u8,
) -> Result<OutPacket> {
    let payload = Chunk::Borrowed {
        buffer: data.clone(),
        range: 0..data.len(),
    };

    let mut packet = OutPacket {
        protocol: binding.protocol,
        hop_limit: options.hop_limit_or(default_hop_limit),
        multicast_loopback: options.multicast_loopback,
        header: Vec::new(),
        payload: vec![payload],
    };

    if raw {
        // A raw endpoint for all protocols has no protocol to send with.
        if binding.protocol == IpProtocol::HopByHop {
            return Err(Error::InvalidParameter);
        }
        return Ok(packet);
    }

    if dst_port == 0 {
        return Err(Error::InvalidParameter);
    }

    let repr = UdpRepr {
        src_port: binding.port,
        dst_port,
        payload_len: data.len(),
    };
    let mut header = vec![0; repr.buffer_len() - data.len()];
    repr.emit(udp_packet::new_unchecked_mut(&mut header));

    let omit = options.checksum_coverage == Coverage::None
        && route.source.version() == crate::wire::IpVersion::Ipv4;
    if !omit {
        let mut sum = checksum::Accumulator::new();
        sum.push(&header);
        sum.push(data);
        let value = sum.finish_with_pseudo_header(&route.source, &route.destination, IpProtocol::Udp);
        udp_packet::new_unchecked_mut(&mut header).set_checksum(value);
    }

    packet.header = header;
    Ok(packet)
}
