use crate::layer::{Error, Result};
use crate::layer::network::{InterfaceId, Interfaces};
use crate::wire::{IpAddress, IpProtocol};

use super::endpoint::{Binding, State};

/// Portion of a datagram covered by its checksum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Coverage {
    /// Header and payload.
    Full,
    /// No checksum, only permitted for IPv4.
    None,
}

/// A group joined on one interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Membership {
    /// The multicast group.
    pub group: IpAddress,
    /// The interface the group was joined on.
    pub interface: InterfaceId,
}

/// A change to the options of an endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointOption {
    /// Hop limit of unicast packets, `None` for the stack default.
    HopLimit(Option<u8>),
    /// Interface for outgoing multicast packets.
    MulticastInterface(Option<InterfaceId>),
    /// Loop multicast packets back to local listeners.
    MulticastLoopback(bool),
    /// Join a multicast group.
    JoinGroup(Membership),
    /// Leave a previously joined group.
    LeaveGroup(Membership),
    /// Datagram checksum coverage.
    ChecksumCoverage(Coverage),
}

/// The per-endpoint options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Options {
    /// The configured hop limit, `None` for the stack default.
    pub hop_limit: Option<u8>,
    /// The interface for outgoing multicast.
    pub multicast_interface: Option<InterfaceId>,
    /// Loop back multicast packets.
    pub multicast_loopback: bool,
    /// Checksum coverage of sent datagrams.
    pub checksum_coverage: Coverage,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            hop_limit: None,
            multicast_interface: None,
            multicast_loopback: true,
            checksum_coverage: Coverage::Full,
        }
    }
}

impl Options {
    /// The hop limit to use for a destination.
    pub fn hop_limit_or(&self, default: u8) -> u8 {
        self.hop_limit.unwrap_or(default)
    }
}

impl State {
    /// Validate and apply an option change.
    ///
    /// The caller holds the endpoint lock, which is what makes the change exclusive.
    pub(crate) fn apply(&mut self, binding: &Binding, option: EndpointOption, interfaces: &dyn Interfaces)
        -> Result<()>
    {
        match option {
            EndpointOption::HopLimit(Some(0)) => return Err(Error::InvalidParameter),
            EndpointOption::HopLimit(limit) => self.options.hop_limit = limit,
            EndpointOption::MulticastInterface(None) => self.options.multicast_interface = None,
            EndpointOption::MulticastInterface(Some(id)) => {
                multicast_capable(interfaces, id)?;
                self.options.multicast_interface = Some(id);
            },
            EndpointOption::MulticastLoopback(enabled) => self.options.multicast_loopback = enabled,
            EndpointOption::JoinGroup(membership) => {
                if !membership.group.is_multicast() {
                    return Err(Error::InvalidAddress);
                }
                multicast_capable(interfaces, membership.interface)?;
                if self.memberships.contains(&membership) {
                    return Err(Error::AddressInUse);
                }
                interfaces.set_membership(membership.group, membership.interface, true)?;
                self.memberships.push(membership);
            },
            EndpointOption::LeaveGroup(membership) => {
                let position = self.memberships.iter()
                    .position(|joined| *joined == membership)
                    .ok_or(Error::InvalidParameter)?;
                interfaces.set_membership(membership.group, membership.interface, false)?;
                self.memberships.swap_remove(position);
            },
            EndpointOption::ChecksumCoverage(coverage) => {
                if binding.protocol != IpProtocol::Udp || self.flags.raw {
                    return Err(Error::InvalidState);
                }
                if coverage == Coverage::None {
                    if let IpAddress::Ipv6(_) = binding.address {
                        return Err(Error::InvalidParameter);
                    }
                }
                self.options.checksum_coverage = coverage;
            },
        }

        Ok(())
    }
}

fn multicast_capable(interfaces: &dyn Interfaces, id: InterfaceId) -> Result<()> {
    match interfaces.find_interface_by_index(id) {
        Some(interface) if interface.multicast => Ok(()),
        _ => Err(Error::InvalidParameter),
    }
}
