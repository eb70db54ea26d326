use core::fmt;
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::layer::{Completion, Error, Result};
use crate::layer::network::{InterfaceId, Interfaces};
use crate::layer::tcp::ConnectionKey;
use crate::wire::{IpAddress, IpProtocol};

use super::options::{EndpointOption, Membership, Options};

/// Identifies an endpoint for the lifetime of its table.
///
/// Identifiers are assigned in ascending order. Buckets keep their entries sorted by it, which is
/// what makes the `previous` cursor of a lookup repeatable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EndpointId(pub(crate) u64);

/// The bound local identity of an endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Binding {
    /// The local address, `IpAddress::Unspecified` for the wildcard.
    pub address: IpAddress,
    /// The scope of the address, zero for global addresses.
    pub scope: u32,
    /// The local port, zero for raw endpoints.
    pub port: u16,
    /// The transport protocol, or the carried protocol of a raw endpoint.
    pub protocol: IpProtocol,
}

/// A request to open an endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Open {
    /// The address to bind, possibly a wildcard.
    pub address: IpAddress,
    /// The scope of the address.
    pub scope: u32,
    /// The port to bind, zero to assign an ephemeral port.
    pub port: u16,
    /// The protocol of the endpoint.
    pub protocol: IpProtocol,
    /// Permit sharing the address and port with an existing endpoint.
    pub reuse: bool,
    /// Open a raw endpoint which sends and receives bare protocol payloads.
    pub raw: bool,
}

/// A received datagram.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Datagram {
    /// The sender address.
    pub source: IpAddress,
    /// The sender port, zero for raw datagrams.
    pub source_port: u16,
    /// The address the datagram was sent to.
    pub destination: IpAddress,
    /// The payload.
    pub data: Vec<u8>,
}

/// Invoked for an incoming connection request, returns whether it should be accepted.
pub type ConnectHandler = Arc<dyn Fn(IpAddress, u16) -> bool + Send + Sync>;
/// Invoked once a connection ended, with the error if it did not end gracefully.
pub type DisconnectHandler = Arc<dyn Fn(ConnectionKey, Option<Error>) + Send + Sync>;
/// Invoked for errors which are not attributed to a single request.
pub type ErrorHandler = Arc<dyn Fn(Error) + Send + Sync>;
/// Invoked when a connection received a number of bytes.
pub type ReceiveHandler = Arc<dyn Fn(ConnectionKey, usize) + Send + Sync>;
/// Invoked for a datagram that found no posted receive.
pub type DatagramHandler = Arc<dyn Fn(&Datagram) + Send + Sync>;

/// The event callbacks registered on an endpoint.
#[derive(Clone, Default)]
pub struct EventHandlers {
    /// Incoming connection requests.
    pub connect: Option<ConnectHandler>,
    /// Ended connections.
    pub disconnect: Option<DisconnectHandler>,
    /// Escalated errors.
    pub error: Option<ErrorHandler>,
    /// Received stream data.
    pub receive: Option<ReceiveHandler>,
    /// Received datagrams.
    pub receive_datagram: Option<DatagramHandler>,
    /// Received urgent stream data.
    pub expedited_receive: Option<ReceiveHandler>,
}

/// One bound local (address, scope, port, protocol) identity.
///
/// The endpoint is reachable from its table as long as it is valid. Once invalidated it is never
/// linked again. Operations which touch it without holding its lock for their whole duration hold
/// a use, and requests that need exclusive access while it is busy are queued on it.
pub struct Endpoint {
    id: EndpointId,
    binding: Binding,
    interface: Option<InterfaceId>,
    reuse: bool,
    pub(crate) state: Mutex<State>,
}

/// Status flags of an endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Flags {
    /// Linked into the table and usable.
    pub valid: bool,
    /// Under exclusive use by one operation.
    pub busy: bool,
    /// The last attempt to service a request ran out of resources.
    pub out_of_resource: bool,
    /// Sends and receives bare protocol payloads.
    pub raw: bool,
    /// A close was requested.
    pub closing: bool,
}

pub(crate) struct State {
    pub(crate) flags: Flags,
    pub(crate) use_count: usize,
    pub(crate) pending: VecDeque<PendingRequest>,
    pub(crate) receives: VecDeque<Completion<Datagram>>,
    pub(crate) memberships: Vec<Membership>,
    pub(crate) handlers: EventHandlers,
    pub(crate) options: Options,
}

/// A datagram send waiting for the endpoint.
pub(crate) struct DatagramSend {
    pub(crate) destination: IpAddress,
    pub(crate) port: u16,
    pub(crate) scope: u32,
    pub(crate) data: Arc<[u8]>,
    pub(crate) completion: Completion<usize>,
}

/// A request queued while the endpoint was busy.
pub(crate) enum PendingRequest {
    Send(DatagramSend),
    SetOption(EndpointOption, Completion<()>),
    Delete(Completion<()>),
}

/// The next piece of queued work of an idle endpoint.
pub(crate) enum Work {
    /// A send which now holds the endpoint busy.
    Send(DatagramSend),
    /// A request which finished without needing the network.
    Finished(Completion<()>, Result<()>),
    /// A request which can no longer be serviced.
    Cancelled(PendingRequest),
    /// The endpoint was deleted.
    Retire(Retired),
}

/// Everything left on an endpoint once it is deleted or its address disappeared.
pub(crate) struct Retired {
    pub(crate) requests: Vec<PendingRequest>,
    pub(crate) receives: Vec<Completion<Datagram>>,
    pub(crate) memberships: Vec<Membership>,
    pub(crate) delete: Option<Completion<()>>,
}

/// What a release of a use left to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Released {
    Idle,
    /// The count dropped to zero with requests queued; the releaser has to service them.
    PendingWork,
}

impl Endpoint {
    pub(crate) fn new(id: EndpointId, binding: Binding, open: &Open, interface: Option<InterfaceId>,
                      options: Options) -> Self {
        Endpoint {
            id,
            binding,
            interface,
            reuse: open.reuse,
            state: Mutex::new(State {
                flags: Flags {
                    valid: true,
                    raw: open.raw,
                    ..Flags::default()
                },
                use_count: 0,
                pending: VecDeque::new(),
                receives: VecDeque::new(),
                memberships: Vec::new(),
                handlers: EventHandlers::default(),
                options,
            }),
        }
    }

    /// The table identifier.
    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// The bound identity.
    pub fn binding(&self) -> Binding {
        self.binding
    }

    /// The interface owning the bound address, `None` for wildcards.
    pub fn interface(&self) -> Option<InterfaceId> {
        self.interface
    }

    /// Whether the endpoint permitted sharing its address on open.
    pub fn reuse(&self) -> bool {
        self.reuse
    }

    /// Check if this is a raw endpoint.
    pub fn is_raw(&self) -> bool {
        self.state.lock().flags.raw
    }

    /// Check if the endpoint is still linked and usable.
    pub fn is_valid(&self) -> bool {
        self.state.lock().flags.valid
    }

    /// A snapshot of the status flags.
    pub fn flags(&self) -> Flags {
        self.state.lock().flags
    }

    /// The current number of in-flight uses.
    pub fn use_count(&self) -> usize {
        self.state.lock().use_count
    }

    /// A snapshot of the options.
    pub fn options(&self) -> Options {
        self.state.lock().options
    }

    /// The joined multicast groups.
    pub fn memberships(&self) -> Vec<Membership> {
        self.state.lock().memberships.clone()
    }

    /// The registered handlers.
    pub fn handlers(&self) -> EventHandlers {
        self.state.lock().handlers.clone()
    }

    /// Take a use of a valid endpoint.
    pub(crate) fn acquire(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.flags.valid {
            return Err(Error::AddressDeleted);
        }
        state.use_count += 1;
        Ok(())
    }

    /// Drop a use.
    pub(crate) fn release(&self) -> Released {
        let mut state = self.state.lock();
        debug_assert!(state.use_count > 0, "unbalanced endpoint use");
        state.use_count = state.use_count.saturating_sub(1);
        state.released()
    }

    /// Leave exclusive use.
    pub(crate) fn end_exclusive(&self) -> Released {
        let mut state = self.state.lock();
        state.flags.busy = false;
        state.released()
    }

    /// Pop the next queued request, if the endpoint is idle.
    ///
    /// A send makes the endpoint busy until `end_exclusive`. Option changes are applied right
    /// away, under the endpoint lock.
    pub(crate) fn take_work(&self, interfaces: &dyn Interfaces) -> Option<Work> {
        let mut state = self.state.lock();
        if state.flags.busy || state.use_count > 0 {
            return None;
        }

        let request = state.pending.pop_front()?;
        let work = match request {
            PendingRequest::Delete(completion) => {
                net_debug!("endpoint {}: servicing deferred delete", self.id);
                Work::Retire(state.retire(Some(completion)))
            },
            request if !state.flags.valid => Work::Cancelled(request),
            PendingRequest::Send(send) => {
                state.flags.busy = true;
                Work::Send(send)
            },
            PendingRequest::SetOption(option, completion) => {
                let result = state.apply(&self.binding, option, interfaces);
                Work::Finished(completion, result)
            },
        };
        Some(work)
    }
}

impl State {
    fn released(&self) -> Released {
        if self.use_count == 0 && !self.flags.busy && !self.pending.is_empty() {
            Released::PendingWork
        } else {
            Released::Idle
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.use_count == 0 && !self.flags.busy
    }

    /// Whether a new request has to wait behind others.
    pub(crate) fn must_queue(&self) -> bool {
        self.flags.busy || !self.pending.is_empty()
    }

    /// Take everything that must be completed or released once the endpoint is gone.
    pub(crate) fn retire(&mut self, delete: Option<Completion<()>>) -> Retired {
        self.flags.valid = false;
        Retired {
            requests: self.pending.drain(..).collect(),
            receives: self.receives.drain(..).collect(),
            memberships: core::mem::replace(&mut self.memberships, Vec::new()),
            delete,
        }
    }
}

impl PendingRequest {
    /// Complete the request without servicing it.
    pub(crate) fn cancel(self, error: Error) {
        match self {
            PendingRequest::Send(send) => send.completion.complete(Err(error)),
            PendingRequest::SetOption(_, completion) => completion.complete(Err(error)),
            // Deleting a deleted endpoint succeeds.
            PendingRequest::Delete(completion) => completion.complete(Ok(())),
        }
    }
}

impl Retired {
    /// Release memberships and complete all requests, without holding any lock.
    pub(crate) fn finish(self, interfaces: &dyn Interfaces) {
        for membership in self.memberships {
            if let Err(err) = interfaces.set_membership(membership.group, membership.interface, false) {
                net_warn!("leaving {} on {} failed: {}", membership.group, membership.interface, err);
            }
        }

        for request in self.requests {
            request.cancel(Error::AddressDeleted);
        }

        for receive in self.receives {
            receive.complete(Err(Error::AddressDeleted));
        }

        if let Some(delete) = self.delete {
            delete.complete(Ok(()));
        }
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}:{}", self.protocol, self.address, self.port)?;
        if self.scope != 0 {
            write!(f, "%{}", self.scope)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("binding", &self.binding)
            .finish()
    }
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("connect", &self.connect.is_some())
            .field("disconnect", &self.disconnect.is_some())
            .field("error", &self.error.is_some())
            .field("receive", &self.receive.is_some())
            .field("receive_datagram", &self.receive_datagram.is_some())
            .field("expedited_receive", &self.expedited_receive.is_some())
            .finish()
    }
}

impl Open {
    /// Open a datagram endpoint.
    pub fn datagram(address: IpAddress, port: u16) -> Self {
        Open::transport(address, port, IpProtocol::Udp)
    }

    /// Open a stream endpoint.
    pub fn stream(address: IpAddress, port: u16) -> Self {
        Open::transport(address, port, IpProtocol::Tcp)
    }

    /// Open a raw endpoint for a protocol, `IpProtocol::HopByHop` to receive all protocols.
    pub fn raw(address: IpAddress, protocol: IpProtocol) -> Self {
        Open {
            address,
            scope: 0,
            port: 0,
            protocol,
            reuse: true,
            raw: true,
        }
    }

    /// Permit sharing the address and port.
    pub fn with_reuse(self, reuse: bool) -> Self {
        Open { reuse, ..self }
    }

    /// Bind within a scope.
    pub fn with_scope(self, scope: u32) -> Self {
        Open { scope, ..self }
    }

    fn transport(address: IpAddress, port: u16, protocol: IpProtocol) -> Self {
        Open {
            address,
            scope: 0,
            port,
            protocol,
            reuse: false,
            raw: false,
        }
    }
}
