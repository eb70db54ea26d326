//! A stack instance and the entry points of the session dispatch boundary.
//!
//! All process-wide state, the endpoint table and the connections of the stream protocol, is
//! owned by a [`Stack`]. Independent instances share nothing, which is what the tests rely on.
//! A `Stack` is a cheap handle and may be cloned into every thread calling into it.
//!
//! ## Deferred work
//!
//! Whoever releases the last use of an endpoint with queued requests services that queue. When
//! this happens deep inside a call chain, for example from a completion invoked within the
//! network layer, the endpoint is put on a deferred list instead. The list is drained once the
//! outermost entry point of the thread returns, or on the next call to `poll_timers`.
//!
//! [`Stack`]: struct.Stack.html
use core::cell::Cell;
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::layer::{Completion, Error, Outcome, Result};
use crate::layer::addr::{
    Cursor,
    Datagram,
    DatagramSend,
    Endpoint,
    EndpointInfo,
    EndpointOption,
    EventHandlers,
    Open,
    PendingRequest,
    Released,
    Table,
    Work};
use crate::layer::network::{Interfaces, Network};
use crate::layer::tcp::{ConnectionInfo, ConnectionKey, ConnectionOption, Handshake, Provider};
use crate::layer::udp;
use crate::time::{Expiration, Instant};
use crate::wire::{IpAddress, IpProtocol, TcpSeqNumber};

pub mod config;
mod stats;


pub use self::config::Config;
pub use self::stats::{ProviderInfo, Statistics};

/// Nesting of endpoint servicing on one thread before further work is deferred.
const MAX_DEPTH: usize = 4;

thread_local! {
    static DEPTH: Cell<usize> = Cell::new(0);
}

/// One instance of the transport core.
#[derive(Clone)]
pub struct Stack {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    network: Arc<dyn Network>,
    interfaces: Arc<dyn Interfaces>,
    table: Table,
    tcp: Arc<Provider>,
    stats: Arc<Statistics>,
    deferred: Mutex<VecDeque<Arc<Endpoint>>>,
}

/// What `query_information` should report.
#[derive(Clone, Copy, Debug)]
pub enum Query<'a> {
    /// The state of one endpoint.
    Endpoint(&'a Arc<Endpoint>),
    /// The state of one connection.
    Connection(ConnectionKey),
    /// Counters of the whole instance.
    Provider,
    /// A page of the endpoint table.
    EnumerateEndpoints {
        /// Where to continue, `Cursor::start()` for the first page.
        cursor: Cursor,
        /// The page size.
        max: usize,
    },
}

/// The answer to a `Query`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Information {
    /// See `Query::Endpoint`.
    Endpoint(EndpointInfo),
    /// See `Query::Connection`.
    Connection(ConnectionInfo),
    /// See `Query::Provider`.
    Provider(ProviderInfo),
    /// See `Query::EnumerateEndpoints`.
    Endpoints {
        /// The endpoints of this page.
        entries: Vec<EndpointInfo>,
        /// The cursor of the next page, `None` after the last one.
        next: Option<Cursor>,
    },
}

/// A change requested through `set_information`.
#[derive(Clone, Copy, Debug)]
pub enum Setting<'a> {
    /// Abort a connection, sending a reset.
    AbortConnection(ConnectionKey),
    /// Change an option of a connection.
    ConnectionOption(ConnectionKey, ConnectionOption),
    /// Change an option of an endpoint.
    ///
    /// Queued behind other requests while the endpoint is busy.
    EndpointOption(&'a Arc<Endpoint>, EndpointOption),
}

impl Stack {
    /// Create an instance on top of a network layer.
    pub fn new(config: Config, network: Arc<dyn Network>, interfaces: Arc<dyn Interfaces>) -> Self {
        let stats = Arc::new(Statistics::default());
        let tcp = Provider::new(config.clone(), network.clone(), stats.clone());
        Stack {
            inner: Arc::new(Inner {
                table: Table::new(&config),
                tcp: Arc::new(tcp),
                config,
                network,
                interfaces,
                stats,
                deferred: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// The configuration of the instance.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The event counters.
    pub fn statistics(&self) -> &Statistics {
        &self.inner.stats
    }

    /// The stream protocol.
    pub fn tcp(&self) -> &Arc<Provider> {
        &self.inner.tcp
    }

    /// Bind a new endpoint.
    pub fn open_endpoint(&self, open: Open) -> Result<Arc<Endpoint>> {
        let endpoint = self.inner.table.open(open, &*self.inner.interfaces)?;
        net_debug!("endpoint {}: opened {}", endpoint.id(), endpoint.binding());
        Ok(endpoint)
    }

    /// Close an endpoint.
    ///
    /// Finishes synchronously if nothing uses the endpoint. Otherwise the completion fires once
    /// the last use is released and everything queued was cancelled.
    pub fn close_endpoint(&self, endpoint: &Arc<Endpoint>, completion: Completion<()>) -> Outcome<()> {
        self.dispatch(|| self.inner.table.close(endpoint, completion, &*self.inner.interfaces))
    }

    /// Find the endpoint receiving for a local identity.
    pub fn lookup(&self, address: IpAddress, scope: u32, port: u16, protocol: IpProtocol,
                  previous: Option<&Endpoint>) -> Option<Arc<Endpoint>>
    {
        self.inner.table.lookup(address, scope, port, protocol, previous)
    }

    /// Replace the event handlers of an endpoint.
    pub fn set_event_handlers(&self, endpoint: &Endpoint, handlers: EventHandlers) -> Result<()> {
        let mut state = endpoint.state.lock();
        if !state.flags.valid {
            return Err(Error::AddressDeleted);
        }
        state.handlers = handlers;
        Ok(())
    }

    /// Send a datagram, or a bare payload on a raw endpoint.
    ///
    /// Malformed requests fail synchronously. Everything else completes with the number of bytes
    /// sent. Sends are queued in order while the endpoint is busy with another request.
    pub fn send_datagram(&self, endpoint: &Arc<Endpoint>, destination: IpAddress, port: u16, data: Arc<[u8]>,
                         completion: Completion<usize>) -> Outcome<usize>
    {
        let raw = endpoint.is_raw();
        let check = udp::check_len(raw, data.len()).and_then(|()| {
            if destination.is_unspecified() {
                Err(Error::InvalidAddress)
            } else if !raw && port == 0 {
                Err(Error::InvalidParameter)
            } else {
                Ok(())
            }
        });
        if let Err(error) = check {
            completion.dismiss();
            return Outcome::Ready(Err(error));
        }

        let send = DatagramSend {
            destination,
            port,
            scope: endpoint.binding().scope,
            data,
            completion,
        };

        let send = {
            let mut state = endpoint.state.lock();
            if !state.flags.valid {
                drop(state);
                send.completion.dismiss();
                return Outcome::Ready(Err(Error::AddressDeleted));
            }
            if state.must_queue() || state.use_count > 0 {
                net_trace!("endpoint {}: busy, queueing send", endpoint.id());
                state.pending.push_back(PendingRequest::Send(send));
                return Outcome::Pending;
            }
            state.flags.busy = true;
            send
        };

        self.dispatch(|| self.transmit(endpoint, send));
        Outcome::Pending
    }

    /// Post a buffer for the next datagram received on an endpoint.
    pub fn post_receive(&self, endpoint: &Endpoint, completion: Completion<Datagram>) -> Outcome<Datagram> {
        let mut state = endpoint.state.lock();
        if !state.flags.valid {
            drop(state);
            completion.dismiss();
            return Outcome::Ready(Err(Error::AddressDeleted));
        }
        state.receives.push_back(completion);
        Outcome::Pending
    }

    /// Hand a datagram from the receive path to its endpoints.
    ///
    /// Multicast, broadcast and raw datagrams go to every matching endpoint, others to the best
    /// match only. Returns the number of endpoints that took the datagram.
    pub fn deliver_datagram(&self, protocol: IpProtocol, source: IpAddress, source_port: u16,
                            destination: IpAddress, port: u16, scope: u32, data: &[u8]) -> usize
    {
        let every = destination.is_multicast() || destination.is_broadcast() || port == 0;
        let datagram = Datagram {
            source,
            source_port,
            destination,
            data: data.to_vec(),
        };

        let delivered = self.dispatch(|| {
            let mut delivered = 0;
            let mut previous: Option<Arc<Endpoint>> = None;
            while let Some(endpoint) = self.lookup(destination, scope, port, protocol, previous.as_deref()) {
                if endpoint.acquire().is_ok() {
                    if self.deliver_to(&endpoint, &datagram) {
                        delivered += 1;
                    }
                    self.released(&endpoint, endpoint.release());
                }

                if !every {
                    break;
                }
                previous = Some(endpoint);
            }
            delivered
        });

        if delivered == 0 {
            net_trace!("no receiver for {} datagram to {}:{}", protocol, destination, port);
            Statistics::bump(&self.inner.stats.datagrams_dropped);
        } else {
            for _ in 0..delivered {
                Statistics::bump(&self.inner.stats.datagrams_delivered);
            }
        }
        delivered
    }

    /// Actively open a connection from a stream endpoint.
    ///
    /// The completion fires once the handshake finished or failed.
    pub fn connect(&self, endpoint: &Arc<Endpoint>, remote: IpAddress, port: u16, now: Instant,
                   completion: Completion<()>) -> Result<ConnectionKey>
    {
        if let Err(error) = endpoint.acquire() {
            completion.dismiss();
            return Err(error);
        }
        let result = self.inner.tcp.connect(endpoint, remote, port, now, completion);
        self.dispatch(|| self.released(endpoint, endpoint.release()));
        result
    }

    /// A SYN arrived for a stream endpoint.
    ///
    /// The connect handler of the endpoint decides whether to accept, without one every request is
    /// refused with `Aborted`. An accepted connection answers with SYN-ACK and its completion fires
    /// once the handshake finished or failed.
    pub fn incoming_connection(&self, endpoint: &Arc<Endpoint>, remote: IpAddress, port: u16, peer: Handshake,
                               now: Instant, completion: Completion<()>) -> Result<ConnectionKey>
    {
        let accept = match endpoint.handlers().connect {
            Some(handler) => handler(remote, port),
            None => false,
        };
        if !accept {
            completion.dismiss();
            net_debug!("endpoint {}: refused connection from {}:{}", endpoint.id(), remote, port);
            return Err(Error::Aborted);
        }

        if let Err(error) = endpoint.acquire() {
            completion.dismiss();
            return Err(error);
        }
        let result = self.inner.tcp.accept(endpoint, remote, port, peer, now, completion);
        self.dispatch(|| self.released(endpoint, endpoint.release()));
        result
    }

    /// Queue data on a connection.
    pub fn send(&self, key: ConnectionKey, data: Arc<[u8]>, urgent: bool, now: Instant,
                completion: Completion<usize>) -> Outcome<usize>
    {
        self.dispatch(|| self.inner.tcp.send(key, data, urgent, now, completion))
    }

    /// Gracefully close a connection after its queued data.
    pub fn close_connection(&self, key: ConnectionKey, now: Instant, completion: Completion<()>) -> Outcome<()> {
        self.dispatch(|| self.inner.tcp.close_connection(key, now, completion))
    }

    /// The receive path saw the handshake complete.
    pub fn established(&self, key: ConnectionKey, peer: Handshake, now: Instant) -> Result<()> {
        self.dispatch(|| self.inner.tcp.established(key, peer, now))
    }

    /// The receive path saw an acknowledgement.
    pub fn acknowledge(&self, key: ConnectionKey, ack: TcpSeqNumber, window: usize, now: Instant) -> Result<()> {
        self.dispatch(|| self.inner.tcp.acknowledge(key, ack, window, now))
    }

    /// The receive path accepted in-order data.
    pub fn data_received(&self, key: ConnectionKey, len: usize, urgent: bool, now: Instant) -> Result<()> {
        self.dispatch(|| self.inner.tcp.data_received(key, len, urgent, now))
    }

    /// The receive path saw the FIN of the peer.
    pub fn remote_closed(&self, key: ConnectionKey, now: Instant) -> Result<()> {
        self.dispatch(|| self.inner.tcp.remote_closed(key, now))
    }

    /// Report the state of an endpoint, a connection, or the whole instance.
    pub fn query_information(&self, query: Query<'_>) -> Result<Information> {
        match query {
            Query::Endpoint(endpoint) => Ok(Information::Endpoint(EndpointInfo::new(endpoint))),
            Query::Connection(key) => self.inner.tcp.info(key).map(Information::Connection),
            Query::Provider => {
                let tcp = &self.inner.tcp;
                Ok(Information::Provider(ProviderInfo {
                    connections: tcp.connections(),
                    endpoints: self.inner.table.len(),
                    send_requests: tcp.send_requests(),
                    buffer_in_use: tcp.buffer_in_use(),
                    ..self.inner.stats.snapshot()
                }))
            },
            Query::EnumerateEndpoints { cursor, max } => {
                let (entries, next) = self.inner.table.enumerate(cursor, max);
                Ok(Information::Endpoints { entries, next })
            },
        }
    }

    /// Change the state of a connection or an endpoint.
    pub fn set_information(&self, setting: Setting<'_>, now: Instant, completion: Completion<()>) -> Outcome<()> {
        match setting {
            Setting::AbortConnection(key) => {
                completion.dismiss();
                self.dispatch(|| self.inner.tcp.abort_connection(key)).into()
            },
            Setting::ConnectionOption(key, option) => {
                completion.dismiss();
                self.dispatch(|| self.inner.tcp.set_option(key, option, now)).into()
            },
            Setting::EndpointOption(endpoint, option) => self.set_endpoint_option(endpoint, option, completion),
        }
    }

    /// Run expired timers of all connections and any deferred endpoint work.
    ///
    /// Returns the earliest deadline at which this should be called again.
    pub fn poll_timers(&self, now: Instant) -> Expiration {
        let next = self.dispatch(|| self.inner.tcp.poll(now));
        self.run_deferred();
        next
    }

    /// A local address disappeared.
    ///
    /// Endpoints bound to it are invalidated and connections from it aborted. Returns the number
    /// of endpoints invalidated.
    pub fn invalidate_address(&self, address: IpAddress) -> usize {
        let count = self.inner.table.invalidate_address(address, &*self.inner.interfaces);
        self.dispatch(|| self.inner.tcp.invalidate_address(address));
        count
    }

    fn set_endpoint_option(&self, endpoint: &Arc<Endpoint>, option: EndpointOption, completion: Completion<()>)
        -> Outcome<()>
    {
        let mut state = endpoint.state.lock();
        if !state.flags.valid {
            drop(state);
            completion.dismiss();
            return Outcome::Ready(Err(Error::AddressDeleted));
        }

        if state.must_queue() {
            net_trace!("endpoint {}: busy, queueing option", endpoint.id());
            state.pending.push_back(PendingRequest::SetOption(option, completion));
            return Outcome::Pending;
        }

        let result = state.apply(&endpoint.binding(), option, &*self.inner.interfaces);
        drop(state);
        completion.dismiss();
        Outcome::Ready(result)
    }

    /// Hand a datagram to the network layer while the endpoint is held busy.
    fn transmit(&self, endpoint: &Arc<Endpoint>, send: DatagramSend) {
        let DatagramSend { destination, port, scope, data, completion } = send;
        let binding = endpoint.binding();
        let options = endpoint.options();
        let raw = endpoint.is_raw();

        let built = self.inner.network.route_to_destination(destination, scope)
            .ok_or(Error::Unreachable)
            .and_then(|route| udp::bind_route(&binding, &options, route))
            .and_then(|route| {
                let packet = udp::datagram(&binding, raw, &options, &route, port, &data,
                    self.inner.config.default_hop_limit)?;
                Ok((route, packet))
            });

        let (route, packet) = match built {
            Ok(built) => built,
            Err(error) => {
                net_debug!("endpoint {}: send to {} failed: {}", endpoint.id(), destination, error);
                completion.complete(Err(error));
                self.released(endpoint, endpoint.end_exclusive());
                return;
            },
        };

        let len = data.len();
        let stack = self.clone();
        let owner = endpoint.clone();
        let done = Completion::new(move |result: Result<()>| {
            if result.is_ok() {
                Statistics::bump(&stack.inner.stats.datagrams_sent);
            }
            completion.complete(result.map(|()| len));
            stack.dispatch(|| stack.released(&owner, owner.end_exclusive()));
        });

        net_trace!("endpoint {}: {} bytes to {}:{}", endpoint.id(), len, destination, port);
        self.inner.network.send_packet(&route, packet, done);
    }

    fn deliver_to(&self, endpoint: &Endpoint, datagram: &Datagram) -> bool {
        let (receive, handler) = {
            let mut state = endpoint.state.lock();
            match state.receives.pop_front() {
                Some(receive) => (Some(receive), None),
                None => (None, state.handlers.receive_datagram.clone()),
            }
        };

        match (receive, handler) {
            (Some(receive), _) => {
                receive.complete(Ok(datagram.clone()));
                true
            },
            (None, Some(handler)) => {
                handler(datagram);
                true
            },
            (None, None) => false,
        }
    }

    /// Service the queue of an endpoint if the release left work.
    fn released(&self, endpoint: &Arc<Endpoint>, released: Released) {
        if released == Released::PendingWork {
            self.resume(endpoint.clone());
        }
    }

    fn resume(&self, endpoint: Arc<Endpoint>) {
        let depth = DEPTH.with(Cell::get);
        if depth >= MAX_DEPTH {
            net_trace!("endpoint {}: deferring queued work", endpoint.id());
            self.inner.deferred.lock().push_back(endpoint);
            return;
        }
        self.dispatch(|| self.service(&endpoint));
    }

    /// Work off the queue of an idle endpoint.
    fn service(&self, endpoint: &Arc<Endpoint>) {
        while let Some(work) = endpoint.take_work(&*self.inner.interfaces) {
            match work {
                Work::Send(send) => {
                    // The completion of the send continues with the queue.
                    self.transmit(endpoint, send);
                    return;
                },
                Work::Finished(completion, result) => completion.complete(result),
                Work::Cancelled(request) => request.cancel(Error::AddressDeleted),
                Work::Retire(retired) => {
                    retired.finish(&*self.inner.interfaces);
                    return;
                },
            }
        }
    }

    /// Run `f` one level deeper, draining deferred work when the outermost level returns.
    fn dispatch<R>(&self, f: impl FnOnce() -> R) -> R {
        let depth = DEPTH.with(|depth| depth.replace(depth.get() + 1));
        let result = f();
        DEPTH.with(|current| current.set(depth));
        if depth == 0 {
            self.run_deferred();
        }
        result
    }

    /// Resume endpoint work that was deferred from inside a completion.
    ///
    /// Does nothing when called from within another operation of the stack, the outermost call
    /// drains the queue on its return.
    pub fn run_deferred(&self) {
        if DEPTH.with(Cell::get) > 0 {
            return;
        }

        loop {
            let next = self.inner.deferred.lock().pop_front();
            let endpoint = match next {
                Some(endpoint) => endpoint,
                None => break,
            };
            DEPTH.with(|depth| depth.set(1));
            self.service(&endpoint);
            DEPTH.with(|depth| depth.set(0));
        }
    }
}
