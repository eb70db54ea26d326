//! Mock network and interfaces for tests.
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver};
use parking_lot::Mutex;

use crate::layer::{Completion, Result};
use crate::layer::network::{Interface, InterfaceId, Interfaces, Network, OutPacket, Route};
use crate::stack::{Config, Stack};
use crate::wire::{tcp_packet, Checksum, IpAddress, IpProtocol, TcpRepr};

pub(crate) const LOCAL_V4: IpAddress = IpAddress::v4(10, 0, 0, 1);
pub(crate) const REMOTE_V4: IpAddress = IpAddress::v4(10, 0, 0, 2);
pub(crate) const GROUP_V4: IpAddress = IpAddress::v4(224, 0, 0, 251);
pub(crate) const INTERFACE: InterfaceId = InterfaceId(1);
pub(crate) const MTU: usize = 1500;

/// A completion that forwards its result into a channel.
pub(crate) fn completion<T: Send + 'static>() -> (Completion<T>, Receiver<Result<T>>) {
    let (send, recv) = unbounded();
    let completion = Completion::new(move |result| {
        // The test may have stopped listening.
        let _ = send.send(result);
    });
    (completion, recv)
}

/// One packet handed to the mock network.
pub(crate) struct Sent {
    pub(crate) route: Route,
    pub(crate) packet: OutPacket,
}

enum Mode {
    /// Complete every packet within `send_packet`.
    Inline(Result<()>),
    /// Keep completions until the test releases them.
    Hold,
}

/// Code run from within `send_packet`.
type Hook = Box<dyn FnOnce() + Send>;

pub(crate) struct MockNetwork {
    sent: Mutex<Vec<Sent>>,
    held: Mutex<Vec<Completion<()>>>,
    hook: Mutex<Option<Hook>>,
    mode: Mutex<Mode>,
    reachable: Mutex<bool>,
    generation: Mutex<u64>,
}

impl MockNetwork {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(MockNetwork {
            sent: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
            hook: Mutex::new(None),
            mode: Mutex::new(Mode::Inline(Ok(()))),
            reachable: Mutex::new(true),
            generation: Mutex::new(0),
        })
    }

    /// Hold completions until released with `complete_held`.
    pub(crate) fn hold(&self) {
        *self.mode.lock() = Mode::Hold;
    }

    /// Complete every packet immediately with a result.
    pub(crate) fn inline(&self, result: Result<()>) {
        *self.mode.lock() = Mode::Inline(result);
    }

    pub(crate) fn set_reachable(&self, reachable: bool) {
        *self.reachable.lock() = reachable;
    }

    /// Invalidate all routes handed out so far.
    pub(crate) fn bump_generation(&self) {
        *self.generation.lock() += 1;
    }

    /// Complete all held packets with a result.
    pub(crate) fn complete_held(&self, result: Result<()>) -> usize {
        let held: Vec<_> = self.held.lock().drain(..).collect();
        let count = held.len();
        for completion in held {
            completion.complete(result);
        }
        count
    }

    /// Run `hook` inside the next `send_packet`, after the packet was recorded and before it
    /// completes.
    pub(crate) fn on_next_send(&self, hook: impl FnOnce() + Send + 'static) {
        *self.hook.lock() = Some(Box::new(hook));
    }

    /// The number of packets recorded and not yet taken.
    pub(crate) fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub(crate) fn held(&self) -> usize {
        self.held.lock().len()
    }

    pub(crate) fn take_sent(&self) -> Vec<Sent> {
        self.sent.lock().drain(..).collect()
    }

    /// Take and parse all sent stream segments.
    pub(crate) fn take_segments(&self) -> Vec<(TcpRepr, Vec<u8>)> {
        self.take_sent().into_iter()
            .filter(|sent| sent.packet.protocol == IpProtocol::Tcp)
            .map(|sent| sent.segment())
            .collect()
    }
}

impl Sent {
    /// Parse the packet as a stream segment, verifying its checksum.
    pub(crate) fn segment(&self) -> (TcpRepr, Vec<u8>) {
        let bytes = self.packet.to_vec();
        let segment = tcp_packet::new_checked(&bytes).expect("truncated segment");
        let checksum = Checksum::Manual {
            src_addr: self.route.source,
            dst_addr: self.route.destination,
        };
        let repr = TcpRepr::parse(segment, checksum).expect("invalid segment");
        (repr, segment.payload_slice().to_vec())
    }
}

impl Network for MockNetwork {
    fn route_to_destination(&self, destination: IpAddress, scope: u32) -> Option<Route> {
        if !*self.reachable.lock() {
            return None;
        }

        let source = match destination {
            IpAddress::Ipv4(_) => LOCAL_V4,
            IpAddress::Ipv6(_) => IpAddress::v6(0xfe80, 0, 0, 0, 0, 0, 0, 1),
            IpAddress::Unspecified => return None,
        };

        Some(Route {
            destination,
            scope,
            source,
            interface: INTERFACE,
            mtu: MTU,
            generation: *self.generation.lock(),
        })
    }

    fn validate_route(&self, route: &Route) -> Option<Route> {
        if route.generation == *self.generation.lock() {
            return Some(route.clone());
        }
        self.route_to_destination(route.destination, route.scope)
    }

    fn send_packet(&self, route: &Route, packet: OutPacket, completion: Completion<()>) {
        self.sent.lock().push(Sent { route: route.clone(), packet });
        let hook = self.hook.lock().take();
        if let Some(hook) = hook {
            hook();
        }

        let inline = match &*self.mode.lock() {
            Mode::Inline(result) => Some(*result),
            Mode::Hold => None,
        };

        match inline {
            Some(result) => completion.complete(result),
            None => self.held.lock().push(completion),
        }
    }
}

pub(crate) struct MockInterfaces {
    addresses: Vec<IpAddress>,
    memberships: Mutex<Vec<(IpAddress, InterfaceId)>>,
}

impl MockInterfaces {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(MockInterfaces {
            addresses: vec![LOCAL_V4, IpAddress::v6(0xfe80, 0, 0, 0, 0, 0, 0, 1)],
            memberships: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn memberships(&self) -> Vec<(IpAddress, InterfaceId)> {
        self.memberships.lock().clone()
    }
}

impl Interfaces for MockInterfaces {
    fn find_local_address_owner(&self, address: IpAddress, _: u32) -> Option<InterfaceId> {
        if self.addresses.contains(&address) {
            Some(INTERFACE)
        } else {
            None
        }
    }

    fn find_interface_by_index(&self, id: InterfaceId) -> Option<Interface> {
        match id {
            INTERFACE => Some(Interface { id, mtu: MTU, multicast: true }),
            // A point-to-point link without multicast.
            InterfaceId(2) => Some(Interface { id, mtu: MTU, multicast: false }),
            _ => None,
        }
    }

    fn set_membership(&self, group: IpAddress, interface: InterfaceId, joined: bool) -> Result<()> {
        let mut memberships = self.memberships.lock();
        if joined {
            memberships.push((group, interface));
        } else {
            memberships.retain(|&entry| entry != (group, interface));
        }
        Ok(())
    }
}

/// A stack on mock lower layers.
pub(crate) fn stack(config: Config) -> (Stack, Arc<MockNetwork>, Arc<MockInterfaces>) {
    let network = MockNetwork::new();
    let interfaces = MockInterfaces::new();
    let stack = Stack::new(config, network.clone(), interfaces.clone());
    (stack, network, interfaces)
}
