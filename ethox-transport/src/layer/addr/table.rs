use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::layer::{Completion, Error, Outcome, Result};
use crate::layer::network::Interfaces;
use crate::stack::Config;
use crate::wire::{IpAddress, IpProtocol};

use super::endpoint::{Binding, Endpoint, EndpointId, Flags, Open, PendingRequest};
use super::options::{Membership, Options};

/// The hashed registry of all bound endpoints.
///
/// Endpoints are hashed on their (address, port) pair. Wildcard bindings hash with
/// `IpAddress::Unspecified` and raw endpoints with port zero, so every lookup needs to inspect at
/// most two buckets.
pub struct Table {
    inner: Mutex<Inner>,
    ephemeral_first: u16,
    ephemeral_len: usize,
}

/// Resumes an enumeration of the table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cursor {
    bucket: usize,
    after: Option<EndpointId>,
}

/// A snapshot of one endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointInfo {
    /// The table identifier.
    pub id: EndpointId,
    /// The bound identity.
    pub binding: Binding,
    /// The status flags.
    pub flags: Flags,
    /// The number of in-flight uses.
    pub use_count: usize,
    /// The number of queued requests.
    pub pending: usize,
    /// The number of posted receives.
    pub receives: usize,
    /// Joined multicast groups.
    pub memberships: Vec<Membership>,
    /// The options.
    pub options: Options,
}

pub(crate) struct Inner {
    buckets: Vec<Vec<Arc<Endpoint>>>,
    /// Number of non-raw endpoints per (protocol, port).
    ports: HashMap<(IpProtocol, u16), usize>,
    last_ephemeral: Option<u16>,
    next_id: u64,
    len: usize,
}

impl Table {
    /// Create an empty table.
    pub fn new(config: &Config) -> Self {
        let buckets = config.endpoint_buckets.max(1);
        Table {
            inner: Mutex::new(Inner {
                buckets: vec![Vec::new(); buckets],
                ports: HashMap::new(),
                last_ephemeral: None,
                next_id: 0,
                len: 0,
            }),
            ephemeral_first: *config.ephemeral_ports.start(),
            ephemeral_len: config.ephemeral_range_len(),
        }
    }

    /// Validate a binding and link a new endpoint.
    ///
    /// A specific address must be owned by a local interface. Port zero assigns an unused port of
    /// the ephemeral range. A specific port fails with `AddressInUse` if it overlaps an existing
    /// binding, unless reuse was requested.
    pub fn open(&self, open: Open, interfaces: &dyn Interfaces) -> Result<Arc<Endpoint>> {
        let address = open.address.normalize();

        if !open.raw {
            match open.protocol {
                IpProtocol::Tcp | IpProtocol::Udp => (),
                _ => return Err(Error::InvalidParameter),
            }
        }

        let interface = if address == IpAddress::Unspecified {
            None
        } else {
            let owner = interfaces.find_local_address_owner(address, open.scope)
                .ok_or(Error::InvalidAddress)?;
            Some(owner)
        };

        let mut inner = self.inner.lock();
        let port = if open.raw {
            0
        } else if open.port == 0 {
            self.allocate_port(&mut inner, open.protocol)?
        } else {
            if !open.reuse && inner.conflicts(address, open.scope, open.port, open.protocol) {
                net_debug!("bind {} {}:{} conflicts", open.protocol, address, open.port);
                return Err(Error::AddressInUse);
            }
            open.port
        };

        let binding = Binding {
            address,
            scope: open.scope,
            port,
            protocol: open.protocol,
        };

        let id = EndpointId(inner.next_id);
        inner.next_id += 1;
        let endpoint = Arc::new(Endpoint::new(id, binding, &open, interface, Options::default()));

        let bucket = inner.bucket(address, port);
        inner.buckets[bucket].push(endpoint.clone());
        if !open.raw {
            *inner.ports.entry((open.protocol, port)).or_insert(0) += 1;
        }
        inner.len += 1;

        net_debug!("endpoint {} bound to {}", id, binding);
        Ok(endpoint)
    }

    /// Find a valid endpoint for an incoming packet.
    ///
    /// A nonzero port searches transport endpoints, port zero raw endpoints. The exact address is
    /// preferred over a wildcard binding. Passing the previously returned endpoint as `previous`
    /// resumes the search after it, which visits every match once.
    pub fn lookup(&self, address: IpAddress, scope: u32, port: u16, protocol: IpProtocol,
                  previous: Option<&Endpoint>) -> Option<Arc<Endpoint>>
    {
        let address = address.normalize();
        let inner = self.inner.lock();

        let mut after = previous.map(Endpoint::id);
        let resume_wildcard = previous
            .map_or(false, |previous| previous.binding().address == IpAddress::Unspecified);

        if !resume_wildcard || address == IpAddress::Unspecified {
            let bucket = inner.bucket(address, port);
            if let Some(found) = inner.scan(bucket, address, scope, port, protocol, after) {
                return Some(found);
            }
            if address == IpAddress::Unspecified {
                return None;
            }
            after = None;
        }

        let wildcard = inner.bucket(IpAddress::Unspecified, port);
        inner.scan(wildcard, IpAddress::Unspecified, scope, port, protocol, after)
    }

    /// Invalidate an endpoint and either retire it or queue its deletion.
    ///
    /// Retirement happens immediately when no use is in flight. Otherwise the deletion waits
    /// behind the queued requests and the completion fires once the last use is released.
    pub fn close(&self, endpoint: &Arc<Endpoint>, completion: Completion<()>, interfaces: &dyn Interfaces)
        -> Outcome<()>
    {
        let retired = {
            let mut inner = self.inner.lock();
            let mut state = endpoint.state.lock();
            if state.flags.closing {
                drop(state);
                drop(inner);
                completion.dismiss();
                return Outcome::Ready(Err(Error::InvalidHandle));
            }

            state.flags.closing = true;
            state.flags.valid = false;
            inner.unlink(endpoint);
            drop(inner);

            if !state.is_idle() {
                net_debug!("endpoint {} busy, deferring delete", endpoint.id());
                state.pending.push_back(PendingRequest::Delete(completion));
                return Outcome::Pending;
            }

            state.retire(None)
        };

        completion.dismiss();
        retired.finish(interfaces);
        Outcome::Ready(Ok(()))
    }

    /// Invalidate all endpoints bound to an address which disappeared.
    ///
    /// Queued requests and posted receives complete with `AddressDeleted`. The endpoints stay
    /// allocated until their owners close them.
    pub fn invalidate_address(&self, address: IpAddress, interfaces: &dyn Interfaces) -> usize {
        let address = address.normalize();
        if address == IpAddress::Unspecified {
            return 0;
        }

        let mut retired = Vec::new();
        {
            let mut inner = self.inner.lock();
            let affected: Vec<_> = inner.buckets.iter()
                .flat_map(|bucket| bucket.iter())
                .filter(|endpoint| endpoint.binding().address == address)
                .cloned()
                .collect();
            for endpoint in affected {
                let mut state = endpoint.state.lock();
                if !state.flags.valid {
                    continue;
                }
                inner.unlink(&endpoint);
                retired.push(state.retire(None));
            }
        }

        net_debug!("address {} removed, {} endpoints invalidated", address, retired.len());
        let count = retired.len();
        for retired in retired {
            retired.finish(interfaces);
        }
        count
    }

    /// Snapshot up to `max` endpoints in bucket order.
    ///
    /// Returns a cursor for the next call while endpoints remain. Endpoints linked or removed
    /// between calls may or may not be visited.
    pub fn enumerate(&self, cursor: Cursor, max: usize) -> (Vec<EndpointInfo>, Option<Cursor>) {
        let inner = self.inner.lock();
        let mut entries = Vec::new();
        let mut cursor = cursor;

        while cursor.bucket < inner.buckets.len() {
            let bucket = &inner.buckets[cursor.bucket];
            let after = cursor.after;
            let remaining = bucket.iter()
                .filter(|endpoint| after.map_or(true, |after| endpoint.id() > after));
            for endpoint in remaining {
                if entries.len() == max {
                    return (entries, Some(cursor));
                }
                entries.push(EndpointInfo::new(endpoint));
                cursor.after = Some(endpoint.id());
            }
            cursor = Cursor { bucket: cursor.bucket + 1, after: None };
        }

        (entries, None)
    }

    /// The number of linked endpoints.
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    /// Check if no endpoint is linked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn allocate_port(&self, inner: &mut Inner, protocol: IpProtocol) -> Result<u16> {
        let len = self.ephemeral_len;
        let first = usize::from(self.ephemeral_first);
        let start = match inner.last_ephemeral {
            Some(last) if usize::from(last) >= first && usize::from(last) - first < len => {
                usize::from(last) - first + 1
            },
            _ => 0,
        };

        for offset in 0..len {
            let port = (first + (start + offset) % len) as u16;
            if !inner.ports.contains_key(&(protocol, port)) {
                inner.last_ephemeral = Some(port);
                return Ok(port);
            }
        }

        net_warn!("ephemeral {} ports exhausted", protocol);
        Err(Error::NoFreeAddress)
    }
}

impl Inner {
    fn bucket(&self, address: IpAddress, port: u16) -> usize {
        let mut hash = u32::from(port).wrapping_mul(0x9e37_79b9);
        for &byte in address.as_bytes() {
            hash = (hash.rotate_left(5) ^ u32::from(byte)).wrapping_mul(0x9e37_79b9);
        }
        (hash >> 7) as usize % self.buckets.len()
    }

    fn scan(&self, bucket: usize, address: IpAddress, scope: u32, port: u16, protocol: IpProtocol,
            after: Option<EndpointId>) -> Option<Arc<Endpoint>>
    {
        self.buckets[bucket].iter()
            .filter(|endpoint| after.map_or(true, |after| endpoint.id() > after))
            .find(|endpoint| matches(endpoint, address, scope, port, protocol))
            .cloned()
    }

    fn conflicts(&self, address: IpAddress, scope: u32, port: u16, protocol: IpProtocol) -> bool {
        if !self.ports.contains_key(&(protocol, port)) {
            return false;
        }

        // A wildcard overlaps every specific binding of the port.
        if address == IpAddress::Unspecified {
            return true;
        }

        let exact = self.bucket(address, port);
        let wildcard = self.bucket(IpAddress::Unspecified, port);
        self.scan(exact, address, scope, port, protocol, None).is_some()
            || self.scan(wildcard, IpAddress::Unspecified, scope, port, protocol, None).is_some()
    }

    /// Remove an endpoint from its bucket, if it is still linked.
    fn unlink(&mut self, endpoint: &Endpoint) {
        let binding = endpoint.binding();
        let bucket = self.bucket(binding.address, binding.port);
        let position = self.buckets[bucket].iter()
            .position(|linked| core::ptr::eq(Arc::as_ptr(linked), endpoint));

        let position = match position {
            Some(position) => position,
            None => {
                net_warn!("endpoint {} was not linked", endpoint.id());
                return;
            },
        };

        // Keep identifier order within the bucket.
        self.buckets[bucket].remove(position);
        self.len -= 1;

        if binding.port != 0 {
            let key = (binding.protocol, binding.port);
            if let Some(count) = self.ports.get_mut(&key) {
                *count -= 1;
                if *count == 0 {
                    self.ports.remove(&key);
                }
            }
        }
    }
}

fn matches(endpoint: &Endpoint, address: IpAddress, scope: u32, port: u16, protocol: IpProtocol) -> bool {
    let binding = endpoint.binding();
    if binding.address != address || binding.port != port {
        return false;
    }

    if binding.scope != 0 && scope != 0 && binding.scope != scope {
        return false;
    }

    let state = endpoint.state.lock();
    if !state.flags.valid {
        return false;
    }

    if state.flags.raw {
        binding.protocol == protocol || binding.protocol == IpProtocol::HopByHop
    } else {
        binding.protocol == protocol
    }
}

impl EndpointInfo {
    pub(crate) fn new(endpoint: &Endpoint) -> Self {
        let state = endpoint.state.lock();
        EndpointInfo {
            id: endpoint.id(),
            binding: endpoint.binding(),
            flags: state.flags,
            use_count: state.use_count,
            pending: state.pending.len(),
            receives: state.receives.len(),
            memberships: state.memberships.clone(),
            options: state.options,
        }
    }
}

impl Cursor {
    /// Start at the first bucket.
    pub fn start() -> Self {
        Cursor::default()
    }
}
