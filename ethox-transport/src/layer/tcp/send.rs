use core::cmp;
use std::sync::Arc;

use parking_lot::MutexGuard;

use crate::layer::{Completion, Error, Outcome, Result};
use crate::layer::network::{Chunk, OutPacket, Route};
use crate::stack::Statistics;
use crate::time::{Expiration, Instant};
use crate::wire::{checksum, tcp_packet, IpProtocol, IpVersion, TcpFlags, TcpRepr, TcpSeqNumber};

use super::{Connection, ConnectionKey, Provider};
use super::connection::Ccb;
use super::request::{Finished, RequestKey, RequestPool, SendRequest};

/// The inputs of one send decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    /// The window offered by the peer.
    pub advertised: usize,
    /// The congestion window.
    pub congestion: usize,
    /// Sequence space sent and not acknowledged.
    pub in_flight: usize,
    /// Queued bytes not yet sent.
    pub unsent: usize,
    /// The effective segment size.
    pub mss: usize,
    /// The largest window the peer ever offered.
    pub max_advertised: usize,
    /// Send at least one byte, even into a closed window.
    pub forced: bool,
    /// Hold back small segments while data is unacknowledged.
    pub nagle: bool,
    /// A FIN should follow the last queued byte.
    pub fin_pending: bool,
}

/// What the engine does next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Send a segment with `amount` bytes of data.
    Transmit {
        /// Data bytes in the segment.
        amount: usize,
        /// The segment carries the FIN.
        fin: bool,
    },
    /// The peer window is closed, probe it later.
    FlowControlled,
    /// Only a small segment would fit, retry later.
    SillyWindow,
    /// Nothing to do until an acknowledgement arrives.
    Idle,
}

impl Window {
    /// The window left for new data.
    ///
    /// At least one byte when forced, which is how a closed window is probed.
    pub fn usable(&self) -> usize {
        let window = cmp::min(self.advertised, self.congestion).saturating_sub(self.in_flight);
        if window == 0 && self.forced {
            1
        } else {
            window
        }
    }

    /// The data bytes of the next segment.
    pub fn amount(&self) -> usize {
        cmp::min(cmp::min(self.usable(), self.unsent), self.mss)
    }

    /// Decide whether to send now.
    ///
    /// A segment goes out if it is full-sized, or if output is forced or a FIN is pending while
    /// the window is open. A short segment emptying the queue goes out unless Nagle holds it back.
    /// Any other short segment must fill at least half of the largest window the peer ever offered.
    pub fn decide(&self) -> Decision {
        if self.unsent == 0 && !self.fin_pending {
            return Decision::Idle;
        }

        let usable = self.usable();
        if self.unsent == 0 && usable > 0 {
            return Decision::Transmit { amount: 0, fin: true };
        }

        if usable == 0 {
            return if self.advertised.saturating_sub(self.in_flight) == 0 {
                Decision::FlowControlled
            } else {
                Decision::Idle
            };
        }

        let amount = self.amount();
        // The FIN takes one more sequence number and must fit the window, too.
        let fin = self.fin_pending && amount == self.unsent && usable > amount;
        let transmit = Decision::Transmit { amount, fin };

        if amount == self.mss || self.forced || self.fin_pending {
            return transmit;
        }

        if amount == self.unsent {
            return if !self.nagle || self.in_flight == 0 {
                transmit
            } else {
                Decision::Idle
            };
        }

        if self.max_advertised > 0 && amount >= self.max_advertised / 2 {
            return transmit;
        }

        Decision::SillyWindow
    }
}

/// A built segment with the references it holds.
pub(crate) struct Segment {
    route: Route,
    packet: OutPacket,
    keys: Vec<RequestKey>,
    borrowed: Vec<RequestKey>,
    reserved: usize,
}

/// Header fields of a segment to build.
pub(crate) struct Emit {
    pub(crate) seq: TcpSeqNumber,
    pub(crate) flags: TcpFlags,
    pub(crate) ack: Option<TcpSeqNumber>,
    pub(crate) max_seg_size: Option<u16>,
    pub(crate) urgent_at: Option<u16>,
}

impl Provider {
    /// Queue user data on a connection.
    ///
    /// Transmission is attempted right away if the queue was empty, if batching is disabled, or if
    /// a full segment is waiting. Otherwise the data goes out with the next acknowledgement.
    pub(crate) fn send(self: &Arc<Self>, key: ConnectionKey, data: Arc<[u8]>, urgent: bool, now: Instant,
                       completion: Completion<usize>) -> Outcome<usize>
    {
        let conn = match self.get(key) {
            Ok(conn) => conn,
            Err(error) => {
                completion.dismiss();
                return Outcome::Ready(Err(error));
            },
        };

        if data.is_empty() {
            completion.dismiss();
            return Outcome::Ready(Ok(0));
        }

        let transmit = {
            let mut ccb = conn.ccb.lock();
            if !ccb.state.accepts_data() || ccb.flags.close_requested {
                completion.dismiss();
                return Outcome::Ready(Err(Error::InvalidState));
            }

            let len = data.len();
            let request = SendRequest::new(data, urgent, completion);
            let request_key = match self.requests.push(request) {
                Ok(request_key) => request_key,
                Err(request) => {
                    net_debug!("{}: send request pool exhausted", key);
                    request.dismiss();
                    return Outcome::Ready(Err(Error::Exhausted));
                },
            };

            let was_empty = ccb.queue.is_empty();
            ccb.queue.push_back(request_key);
            ccb.queued += len;
            net_trace!("{}: queued {} bytes, {} unsent", key, len, ccb.unsent());

            ccb.state.can_output()
                && (was_empty || urgent || ccb.flags.nodelay || ccb.unsent() >= ccb.send.mss)
        };

        if transmit {
            self.output(&conn, now, false);
        }

        Outcome::Pending
    }

    /// Run the send engine.
    ///
    /// Only one thread runs the engine of a connection. Another thread arriving meanwhile only
    /// records that the engine must loop once more. A forced send is attempted at most once per
    /// run.
    pub(crate) fn output(self: &Arc<Self>, conn: &Arc<Connection>, now: Instant, forced: bool) {
        let mut ccb = conn.ccb.lock();
        if ccb.flags.in_send {
            ccb.flags.retry_after_receive = true;
            ccb.flags.force_pending |= forced;
            return;
        }

        ccb.flags.in_send = true;
        let mut forced = forced;
        loop {
            ccb.flags.retry_after_receive = false;
            forced |= core::mem::replace(&mut ccb.flags.force_pending, false);
            self.output_locked(conn, &mut ccb, now, forced);
            forced = false;
            if !ccb.flags.retry_after_receive {
                break;
            }
        }

        ccb.flags.in_send = false;
        self.maybe_free(conn, &mut ccb);
    }

    fn output_locked(self: &Arc<Self>, conn: &Arc<Connection>, ccb: &mut MutexGuard<'_, Ccb>, now: Instant,
                     mut forced: bool)
    {
        while ccb.state.can_output() {
            let (amount, fin) = match ccb.window(forced).decide() {
                Decision::Transmit { amount, fin } => (amount, fin),
                Decision::FlowControlled => {
                    if !ccb.flags.flow_controlled {
                        net_trace!("{}: peer window closed", conn.key());
                    }
                    ccb.flags.flow_controlled = true;
                    ccb.arm_retransmit(now);
                    break;
                },
                Decision::SillyWindow => {
                    if !ccb.timers.silly_window.is_armed() {
                        ccb.timers.silly_window = Expiration::When(now + self.config.silly_window_timeout);
                    }
                    break;
                },
                Decision::Idle => break,
            };

            let seq = ccb.send.next;
            let segment = match self.build_data(conn, ccb, amount, fin) {
                Ok(segment) => segment,
                Err(error) => {
                    if error == Error::Exhausted {
                        net_debug!("{}: segment buffers exhausted, deferring", conn.key());
                    } else {
                        net_debug!("{}: cannot send: {}", conn.key(), error);
                        ccb.soft_error.get_or_insert(error);
                    }
                    ccb.arm_retransmit(now);
                    break;
                },
            };

            ccb.flags.flow_controlled = false;
            if fin && ccb.send.fin.is_none() {
                ccb.send.fin = Some(seq + amount);
                ccb.state = match ccb.state {
                    super::State::CloseWait => super::State::LastAck,
                    _ => super::State::FinWait1,
                };
                net_debug!("{}: FIN sent, now {}", conn.key(), ccb.state);
            }

            ccb.send.next = seq + amount + usize::from(fin);
            if ccb.send.next > ccb.send.max {
                if seq < ccb.send.max {
                    Statistics::bump(&self.stats.segments_retransmitted);
                }
                ccb.send.max = ccb.send.next;
                if ccb.rtt_sample.is_none() {
                    ccb.rtt_sample = Some((seq, now));
                }
            } else {
                Statistics::bump(&self.stats.segments_retransmitted);
            }

            ccb.arm_retransmit(now);
            ccb.timers.silly_window = Expiration::Never;
            ccb.timers.delayed_ack = Expiration::Never;
            ccb.recv.unacked_segments = 0;
            forced = false;

            self.hand_off(conn, ccb, segment);
            if fin {
                break;
            }
        }
    }

    /// Build a segment with the next unsent data.
    fn build_data(&self, conn: &Connection, ccb: &mut Ccb, amount: usize, fin: bool) -> Result<Segment> {
        let route = self.route(conn, ccb)?;

        let mut flags = TcpFlags::EMPTY;
        flags.set_fin(fin);
        flags.set_psh(amount > 0 && amount == ccb.unsent());
        let mut emit = Emit {
            seq: ccb.send.next,
            flags,
            ack: Some(ccb.recv.next),
            max_seg_size: None,
            urgent_at: None,
        };

        let header_len = self.repr(conn, ccb, &emit).header_len();
        let reserved = header_len + amount;
        if !self.budget.try_reserve(reserved) {
            return Err(Error::Exhausted);
        }

        let mut keys = Vec::new();
        let mut borrowed = Vec::new();
        let mut payload = Vec::new();
        let mut skip = ccb.data_in_flight();
        let mut want = amount;
        let mut urgent_end = None;

        self.requests.with(|slots| {
            for &key in ccb.queue.iter() {
                if want == 0 {
                    break;
                }

                let request = match slots.get_mut(key) {
                    Some(request) => request,
                    None => continue,
                };

                let remaining = request.len() - request.acked;
                if skip >= remaining {
                    skip -= remaining;
                    continue;
                }

                let start = request.acked + skip;
                let take = cmp::min(request.len() - start, want);
                skip = 0;

                let chunk = if start == 0 && !request.borrowed {
                    request.borrowed = true;
                    borrowed.push(key);
                    Chunk::Borrowed { buffer: request.data.clone(), range: 0..take }
                } else {
                    Chunk::Copied(request.data[start..start + take].to_vec())
                };

                request.add_ref();
                keys.push(key);
                payload.push(chunk);
                want -= take;
                if request.urgent {
                    urgent_end = Some(amount - want);
                }
            }
        });

        debug_assert_eq!(want, 0, "queue holds fewer unsent bytes than accounted");
        emit.urgent_at = urgent_end.map(|end| end as u16);
        let packet = self.packet(conn, ccb, &route, &emit, payload);

        Ok(Segment { route, packet, keys, borrowed, reserved })
    }

    /// Send a segment without data.
    pub(crate) fn send_control(self: &Arc<Self>, conn: &Arc<Connection>, ccb: &mut MutexGuard<'_, Ccb>, emit: Emit)
        -> Result<()>
    {
        let route = self.route(conn, ccb)?;
        let reserved = self.repr(conn, ccb, &emit).header_len();
        if !self.budget.try_reserve(reserved) {
            return Err(Error::Exhausted);
        }

        let packet = self.packet(conn, ccb, &route, &emit, Vec::new());
        self.hand_off(conn, ccb, Segment {
            route,
            packet,
            keys: Vec::new(),
            borrowed: Vec::new(),
            reserved,
        });
        Ok(())
    }

    /// Send our SYN, or SYN-ACK when answering the SYN of the peer.
    pub(crate) fn send_syn(self: &Arc<Self>, conn: &Arc<Connection>, ccb: &mut MutexGuard<'_, Ccb>, now: Instant)
        -> Result<()>
    {
        let mut flags = TcpFlags::EMPTY;
        flags.set_syn(true);
        let ack = match ccb.state {
            super::State::SynReceived => Some(ccb.recv.next),
            _ => None,
        };

        let iss = ccb.send.initial;
        ccb.send.next = iss + 1;
        if ccb.send.next > ccb.send.max {
            ccb.send.max = ccb.send.next;
        }
        if ccb.retransmits == 0 && ccb.rtt_sample.is_none() {
            ccb.rtt_sample = Some((iss, now));
        }
        ccb.restart_retransmit(now);

        let mss = ccb.local_mss.min(usize::from(u16::MAX)) as u16;
        self.send_control(conn, ccb, Emit {
            seq: iss,
            flags,
            ack,
            max_seg_size: Some(mss),
            urgent_at: None,
        })
    }

    /// Acknowledge everything received so far.
    ///
    /// An ACK that could not be built is retried by the delayed ACK timer.
    pub(crate) fn send_ack(self: &Arc<Self>, conn: &Arc<Connection>, ccb: &mut MutexGuard<'_, Ccb>, now: Instant)
        -> Result<()>
    {
        let unacked = core::mem::replace(&mut ccb.recv.unacked_segments, 0);
        ccb.timers.delayed_ack = Expiration::Never;
        let emit = Emit {
            seq: ccb.send.next,
            flags: TcpFlags::EMPTY,
            ack: Some(ccb.recv.next),
            max_seg_size: None,
            urgent_at: None,
        };

        let result = self.send_control(conn, ccb, emit);
        if result.is_err() {
            ccb.recv.unacked_segments = unacked;
            ccb.timers.delayed_ack = Expiration::When(now + self.config.delayed_ack_timeout);
        }
        result
    }

    /// Hand a segment to the network layer, with the control block unlocked.
    fn hand_off(self: &Arc<Self>, conn: &Arc<Connection>, ccb: &mut MutexGuard<'_, Ccb>, segment: Segment) {
        let Segment { route, packet, keys, borrowed, reserved } = segment;
        ccb.refs += 1;
        Statistics::bump(&self.stats.segments_sent);
        net_trace!("{}: segment of {} bytes", conn.key(), packet.len());

        let provider = self.clone();
        let owner = conn.clone();
        let completion = Completion::new(move |result| {
            provider.segment_done(&owner, &keys, &borrowed, reserved, result)
        });

        MutexGuard::unlocked(ccb, || self.network.send_packet(&route, packet, completion));
    }

    /// The network layer is done with a segment.
    fn segment_done(self: &Arc<Self>, conn: &Arc<Connection>, keys: &[RequestKey], borrowed: &[RequestKey],
                    reserved: usize, result: Result<()>)
    {
        self.budget.release(reserved);
        let finished = self.requests.release_segment(keys, borrowed);

        let hard = {
            let mut ccb = conn.ccb.lock();
            ccb.refs -= 1;
            let hard = match result {
                Ok(()) => None,
                Err(error) if error.is_soft() || error == Error::Cancelled => {
                    net_debug!("{}: soft error {}", conn.key(), error);
                    ccb.soft_error.get_or_insert(error);
                    None
                },
                Err(error) => Some(error),
            };
            if hard.is_none() {
                self.maybe_free(conn, &mut ccb);
            }
            hard
        };

        finished.into_iter().for_each(Finished::complete);
        if let Some(error) = hard {
            net_warn!("{}: network layer failed a segment: {}", conn.key(), error);
            self.abort(conn, error, true);
        }
    }

    /// The cached route, revalidated, or a new one.
    fn route(&self, conn: &Connection, ccb: &mut Ccb) -> Result<Route> {
        let route = match ccb.route.take() {
            Some(cached) => self.network.validate_route(&cached),
            None => self.network.route_to_destination(conn.tuple().remote, conn.scope()),
        };

        match route {
            Some(mut route) => {
                route.source = conn.tuple().local;
                ccb.route = Some(route.clone());
                Ok(route)
            },
            None => Err(Error::Unreachable),
        }
    }

    fn repr(&self, conn: &Connection, ccb: &Ccb, emit: &Emit) -> TcpRepr {
        TcpRepr {
            src_port: conn.tuple().local_port,
            dst_port: conn.tuple().remote_port,
            seq_number: emit.seq,
            ack_number: emit.ack,
            flags: emit.flags,
            window_len: cmp::min(ccb.recv.window, usize::from(u16::MAX)) as u16,
            window_scale: None,
            max_seg_size: emit.max_seg_size,
            urgent_at: emit.urgent_at,
        }
    }

    fn packet(&self, conn: &Connection, ccb: &Ccb, route: &Route, emit: &Emit, payload: Vec<Chunk>) -> OutPacket {
        let repr = self.repr(conn, ccb, emit);
        let mut header = vec![0; repr.header_len()];
        repr.emit(tcp_packet::new_unchecked_mut(&mut header));

        let mut sum = checksum::Accumulator::new();
        sum.push(&header);
        for chunk in &payload {
            sum.push(chunk.as_bytes());
        }
        let value = sum.finish_with_pseudo_header(&route.source, &route.destination, IpProtocol::Tcp);
        tcp_packet::new_unchecked_mut(&mut header).set_checksum(value);

        OutPacket {
            protocol: IpProtocol::Tcp,
            hop_limit: conn.endpoint().options().hop_limit_or(self.config.default_hop_limit),
            multicast_loopback: false,
            header,
            payload,
        }
    }
}

/// The largest segment that fits a route.
pub(crate) fn route_mss(route: &Route, limit: usize) -> usize {
    let headers = match route.destination.version() {
        IpVersion::Ipv6 => 40 + 20,
        _ => 20 + 20,
    };
    cmp::min(limit, route.mtu.saturating_sub(headers)).max(1)
}

impl RequestPool {
    /// Fail and drop the queue references of all requests.
    pub(crate) fn cancel_queue(&self, queue: impl IntoIterator<Item=RequestKey>, error: Error) -> Vec<Finished> {
        self.with(|slots| {
            queue.into_iter()
                .filter_map(|key| RequestPool::release(slots, key, Some(error)))
                .collect()
        })
    }
}
