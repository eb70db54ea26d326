//! Opening, closing and aborting connections.
use std::sync::Arc;

use crate::layer::{Completion, Error, Outcome, Result};
use crate::layer::addr::Endpoint;
use crate::layer::udp;
use crate::stack::Statistics;
use crate::time::{Expiration, Instant};
use crate::wire::{IpAddress, IpProtocol, TcpFlags};

use super::{Connection, ConnectionKey, ConnectionOption, FourTuple, Handshake, Provider, State};
use super::connection::Ccb;
use super::send::{route_mss, Emit};

impl Provider {
    /// Allocate a closed connection towards a remote.
    fn create(&self, endpoint: &Arc<Endpoint>, remote: IpAddress, remote_port: u16, now: Instant)
        -> Result<Arc<Connection>>
    {
        if !endpoint.is_valid() {
            return Err(Error::AddressDeleted);
        }

        let binding = endpoint.binding();
        if endpoint.is_raw() || binding.protocol != IpProtocol::Tcp {
            return Err(Error::InvalidParameter);
        }

        if remote_port == 0 || remote.is_unspecified() || remote.is_multicast() || remote.is_broadcast() {
            return Err(Error::InvalidAddress);
        }

        let route = self.network.route_to_destination(remote, binding.scope)
            .ok_or(Error::Unreachable)?;
        let route = udp::bind_route(&binding, &endpoint.options(), route)?;

        let tuple = FourTuple {
            local: route.source,
            local_port: binding.port,
            remote,
            remote_port,
        };
        let iss = self.isn.get_isn(&tuple, now);
        let local_mss = route_mss(&route, self.config.max_segment_size);

        let mut ccb = Ccb::new(&self.config, iss, local_mss);
        ccb.route = Some(route);

        let scope = binding.scope;
        let endpoint = endpoint.clone();
        let conn = self.store.lock().insert(tuple, |key| Connection::new(key, tuple, scope, endpoint, ccb))?;
        net_debug!("{}: allocated for {}, mss {}", conn.key(), tuple, local_mss);
        Ok(conn)
    }

    /// Actively open a connection.
    ///
    /// The completion fires once the handshake finished or failed.
    pub(crate) fn connect(self: &Arc<Self>, endpoint: &Arc<Endpoint>, remote: IpAddress, remote_port: u16,
                          now: Instant, completion: Completion<()>) -> Result<ConnectionKey>
    {
        let conn = match self.create(endpoint, remote, remote_port, now) {
            Ok(conn) => conn,
            Err(error) => {
                completion.dismiss();
                return Err(error);
            },
        };

        let mut ccb = conn.ccb.lock();
        ccb.state = State::SynSent;
        ccb.connect = Some(completion);
        Statistics::bump(&self.stats.active_opens);

        if let Err(error) = self.send_syn(&conn, &mut ccb, now) {
            // The retransmit timer is armed and retries.
            net_debug!("{}: SYN deferred: {}", conn.key(), error);
        }

        Ok(conn.key())
    }

    /// Passively open a connection for a SYN received on a listening endpoint.
    ///
    /// Answers with SYN-ACK. The completion fires once the handshake finished or failed.
    pub(crate) fn accept(self: &Arc<Self>, endpoint: &Arc<Endpoint>, remote: IpAddress, remote_port: u16,
                         peer: Handshake, now: Instant, completion: Completion<()>) -> Result<ConnectionKey>
    {
        let conn = match self.create(endpoint, remote, remote_port, now) {
            Ok(conn) => conn,
            Err(error) => {
                completion.dismiss();
                return Err(error);
            },
        };

        let mut ccb = conn.ccb.lock();
        ccb.state = State::SynReceived;
        ccb.recv.initial = peer.seq;
        ccb.recv.next = peer.seq + 1;
        ccb.send.window = peer.window;
        ccb.send.max_window = peer.window;
        ccb.set_peer_mss(&self.config, peer.max_seg_size);
        ccb.connect = Some(completion);
        Statistics::bump(&self.stats.passive_opens);

        if let Err(error) = self.send_syn(&conn, &mut ccb, now) {
            net_debug!("{}: SYN-ACK deferred: {}", conn.key(), error);
        }

        Ok(conn.key())
    }

    /// The handshake completed.
    ///
    /// In SYN-SENT this is the SYN-ACK of the peer, which is acknowledged. In SYN-RECEIVED it is
    /// the acknowledgement of our SYN-ACK.
    pub(crate) fn established(self: &Arc<Self>, key: ConnectionKey, peer: Handshake, now: Instant) -> Result<()> {
        let conn = self.get(key)?;
        let connect = {
            let mut ccb = conn.ccb.lock();
            let state = ccb.state;
            match state {
                State::SynSent => {
                    ccb.recv.initial = peer.seq;
                    ccb.recv.next = peer.seq + 1;
                    ccb.set_peer_mss(&self.config, peer.max_seg_size);
                },
                State::SynReceived => (),
                _ => return Err(Error::InvalidState),
            }

            let active = state == State::SynSent;
            ccb.send.unacked = ccb.send.initial + 1;
            if ccb.send.next < ccb.send.unacked {
                ccb.send.next = ccb.send.unacked;
            }
            ccb.send.window = peer.window;
            ccb.send.max_window = ccb.send.max_window.max(peer.window);
            ccb.state = State::Established;
            ccb.careful = ccb.careful.saturating_sub(1);
            ccb.congestion.window = ccb.initial_window();
            ccb.congestion.ssthresh = usize::MAX;

            if let Some((_, sent)) = ccb.rtt_sample.take() {
                if ccb.retransmits == 0 {
                    ccb.rtt.sample(now - sent);
                }
            }
            ccb.retransmits = 0;
            ccb.timers.retransmit = Expiration::Never;
            net_debug!("{}: established, mss {}, window {}", key, ccb.send.mss, peer.window);

            if active {
                if let Err(error) = self.send_ack(&conn, &mut ccb, now) {
                    net_debug!("{}: ACK of SYN-ACK not sent: {}", key, error);
                }
            }
            ccb.connect.take()
        };

        if let Some(connect) = connect {
            connect.complete(Ok(()));
        }

        self.output(&conn, now, false);
        Ok(())
    }

    /// The peer sent its FIN.
    ///
    /// A repeated FIN is acknowledged again without another state change.
    pub(crate) fn remote_closed(self: &Arc<Self>, key: ConnectionKey, now: Instant) -> Result<()> {
        let conn = self.get(key)?;
        {
            let mut ccb = conn.ccb.lock();
            let state = ccb.state;
            let repeated = match state {
                State::Established | State::SynReceived => {
                    ccb.state = State::CloseWait;
                    false
                },
                State::FinWait1 => {
                    ccb.state = State::Closing;
                    false
                },
                State::FinWait2 => {
                    ccb.timers.time_wait = Expiration::When(now + self.config.time_wait);
                    ccb.timers.retransmit = Expiration::Never;
                    ccb.state = State::TimeWait;
                    false
                },
                State::TimeWait => {
                    ccb.timers.time_wait = Expiration::When(now + self.config.time_wait);
                    true
                },
                State::CloseWait | State::Closing | State::LastAck => true,
                _ => return Err(Error::InvalidState),
            };

            if repeated {
                net_debug!("{}: repeated FIN in {}", key, ccb.state);
            } else {
                ccb.recv.next += 1;
                net_debug!("{}: peer closed, now {}", key, ccb.state);
            }

            if let Err(error) = self.send_ack(&conn, &mut ccb, now) {
                net_debug!("{}: ACK of FIN not sent: {}", key, error);
            }

            if repeated {
                return Ok(());
            }
        }

        if let Some(handler) = conn.endpoint().handlers().disconnect {
            handler(key, None);
        }
        Ok(())
    }

    /// Gracefully close a connection.
    ///
    /// Queued data is still sent, followed by our FIN. The completion fires once the peer
    /// acknowledged the FIN.
    pub(crate) fn close_connection(self: &Arc<Self>, key: ConnectionKey, now: Instant, completion: Completion<()>)
        -> Outcome<()>
    {
        let conn = match self.get(key) {
            Ok(conn) => conn,
            Err(error) => {
                completion.dismiss();
                return Outcome::Ready(Err(error));
            },
        };

        {
            let mut ccb = conn.ccb.lock();
            let state = ccb.state;
            match state {
                State::SynSent => {
                    drop(ccb);
                    completion.dismiss();
                    self.abort(&conn, Error::Aborted, false);
                    return Outcome::Ready(Ok(()));
                },
                State::SynReceived | State::Established | State::CloseWait if !ccb.flags.close_requested => {
                    ccb.flags.close_requested = true;
                    ccb.careful += 1;
                    ccb.close = Some(completion);
                    net_debug!("{}: close requested in {}", key, ccb.state);
                },
                _ => {
                    completion.dismiss();
                    return Outcome::Ready(Err(Error::InvalidState));
                },
            }
        }

        self.output(&conn, now, false);
        Outcome::Pending
    }

    /// Abort a connection by key.
    pub(crate) fn abort_connection(self: &Arc<Self>, key: ConnectionKey) -> Result<()> {
        let conn = self.get(key)?;
        self.abort(&conn, Error::Aborted, true);
        Ok(())
    }

    /// Tear down a connection immediately.
    ///
    /// All queued requests and pending completions fail with `reason`. A reset is sent to a
    /// synchronized peer when `reset` is set.
    pub(crate) fn abort(self: &Arc<Self>, conn: &Arc<Connection>, reason: Error, reset: bool) {
        let (finished, connect, close) = {
            let mut ccb = conn.ccb.lock();
            if ccb.state == State::Closed {
                return;
            }

            let previous = ccb.state;
            ccb.state = State::Closed;
            ccb.timers = Default::default();
            ccb.flags.close_requested = true;
            ccb.queued = 0;
            let queue: Vec<_> = ccb.queue.drain(..).collect();
            let finished = self.requests.cancel_queue(queue, reason);
            net_debug!("{}: aborted in {}: {}", conn.key(), previous, reason);

            if reset && previous != State::SynSent && previous != State::TimeWait {
                let mut flags = TcpFlags::EMPTY;
                flags.set_rst(true);
                let emit = Emit {
                    seq: ccb.send.next,
                    flags,
                    ack: Some(ccb.recv.next),
                    max_seg_size: None,
                    urgent_at: None,
                };
                match self.send_control(conn, &mut ccb, emit) {
                    Ok(()) => Statistics::bump(&self.stats.resets_sent),
                    Err(error) => net_debug!("{}: reset not sent: {}", conn.key(), error),
                }
            }

            let connect = ccb.connect.take();
            let close = ccb.close.take();
            self.maybe_free(conn, &mut ccb);
            (finished, connect, close)
        };

        finished.into_iter().for_each(|request| request.complete());
        if let Some(connect) = connect {
            connect.complete(Err(reason));
        }
        if let Some(close) = close {
            close.complete(Err(reason));
        }

        if let Some(handler) = conn.endpoint().handlers().disconnect {
            handler(conn.key(), Some(reason));
        }
    }

    /// Change a per-connection option.
    pub(crate) fn set_option(self: &Arc<Self>, key: ConnectionKey, option: ConnectionOption, now: Instant)
        -> Result<()>
    {
        let conn = self.get(key)?;
        let flush = {
            let mut ccb = conn.ccb.lock();
            if ccb.state == State::Closed {
                return Err(Error::InvalidState);
            }
            match option {
                ConnectionOption::NoDelay(nodelay) => {
                    let enabled = nodelay && !ccb.flags.nodelay;
                    ccb.flags.nodelay = nodelay;
                    enabled
                },
                ConnectionOption::KeepAlive(keepalive) => {
                    ccb.flags.keepalive = keepalive;
                    ccb.keepalive_probes = 0;
                    if !keepalive {
                        ccb.timers.keepalive = Expiration::Never;
                    }
                    false
                },
            }
        };

        if flush {
            self.output(&conn, now, false);
        }
        Ok(())
    }

    /// Abort all connections from a local address that disappeared.
    pub(crate) fn invalidate_address(self: &Arc<Self>, address: IpAddress) -> usize {
        let affected: Vec<_> = self.store.lock().snapshot().into_iter()
            .filter(|conn| conn.tuple().local == address)
            .collect();
        for conn in &affected {
            self.abort(conn, Error::AddressDeleted, false);
        }
        affected.len()
    }

    /// Release a closed connection once nothing references it anymore.
    pub(crate) fn maybe_free(&self, conn: &Connection, ccb: &mut Ccb) {
        if ccb.state != State::Closed || ccb.refs > 0 || ccb.flags.in_send || ccb.freed {
            return;
        }

        ccb.freed = true;
        self.store.lock().remove(conn.key());
        net_debug!("{}: freed", conn.key());
    }
}
