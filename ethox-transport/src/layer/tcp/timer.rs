//! Timer processing of all connections.
use std::sync::Arc;

use parking_lot::MutexGuard;

use crate::layer::Error;
use crate::stack::Statistics;
use crate::time::{Expiration, Instant};
use crate::wire::TcpFlags;

use super::{Connection, Provider, State};
use super::connection::{Ccb, Timers};
use super::send::Emit;

/// Work found while a control block was locked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Action {
    Output { forced: bool },
    Abort(Error),
    /// A soft error persisted, report it and then abort.
    Escalate(Error),
}

impl Timers {
    /// The next deadline of any timer.
    pub(crate) fn earliest(&self) -> Expiration {
        self.retransmit
            .earliest(self.silly_window)
            .earliest(self.delayed_ack)
            .earliest(self.keepalive)
            .earliest(self.time_wait)
            .earliest(self.soft_error)
    }
}

impl Provider {
    /// Run all expired timers.
    ///
    /// Returns the earliest deadline remaining afterwards.
    pub(crate) fn poll(self: &Arc<Self>, now: Instant) -> Expiration {
        let connections = self.store.lock().snapshot();
        connections.iter()
            .map(|conn| self.poll_connection(conn, now))
            .fold(Expiration::Never, Expiration::earliest)
    }

    fn poll_connection(self: &Arc<Self>, conn: &Arc<Connection>, now: Instant) -> Expiration {
        let action = {
            let mut ccb = conn.ccb.lock();
            if ccb.freed {
                return Expiration::Never;
            }
            self.expire(conn, &mut ccb, now)
        };

        match action {
            Some(Action::Output { forced }) => self.output(conn, now, forced),
            Some(Action::Abort(reason)) => self.abort(conn, reason, true),
            Some(Action::Escalate(reason)) => {
                net_warn!("{}: persistent error {}", conn.key(), reason);
                if let Some(handler) = conn.endpoint().handlers().error {
                    handler(reason);
                }
                self.abort(conn, reason, true);
            },
            None => (),
        }

        let ccb = conn.ccb.lock();
        if ccb.freed {
            Expiration::Never
        } else {
            ccb.timers.earliest()
        }
    }

    fn expire(self: &Arc<Self>, conn: &Arc<Connection>, ccb: &mut MutexGuard<'_, Ccb>, now: Instant)
        -> Option<Action>
    {
        let state = ccb.state;
        match state {
            State::Closed => {
                self.maybe_free(conn, ccb);
                return None;
            },
            State::TimeWait => {
                if ccb.timers.time_wait.is_expired(now) {
                    net_debug!("{}: TIME-WAIT over", conn.key());
                    ccb.state = State::Closed;
                    ccb.timers = Timers::default();
                    self.maybe_free(conn, ccb);
                } else if ccb.timers.delayed_ack.is_expired(now) {
                    if let Err(error) = self.send_ack(conn, ccb, now) {
                        net_debug!("{}: ACK of FIN not sent: {}", conn.key(), error);
                    }
                }
                return None;
            },
            _ => (),
        }

        let mut action = None;

        let soft_error = ccb.soft_error;
        match soft_error {
            Some(error) if ccb.timers.soft_error.is_expired(now) => {
                ccb.timers.soft_error = Expiration::Never;
                return Some(Action::Escalate(error));
            },
            Some(_) if !ccb.timers.soft_error.is_armed() => {
                ccb.timers.soft_error = Expiration::When(now + self.config.soft_error_timeout);
            },
            Some(_) => (),
            None => ccb.timers.soft_error = Expiration::Never,
        }

        if ccb.timers.retransmit.is_expired(now) {
            ccb.timers.retransmit = Expiration::Never;
            action = self.retransmit(conn, ccb, now);
            if let Some(Action::Abort(_)) = action {
                return action;
            }
        }

        if ccb.timers.silly_window.is_expired(now) {
            ccb.timers.silly_window = Expiration::Never;
            action = action.or(Some(Action::Output { forced: true }));
        }

        if ccb.timers.delayed_ack.is_expired(now) {
            if let Err(error) = self.send_ack(conn, ccb, now) {
                net_debug!("{}: delayed ACK not sent: {}", conn.key(), error);
            }
        }

        if let Some(abort) = self.keepalive(conn, ccb, now) {
            return Some(abort);
        }

        action
    }

    /// The retransmission timer expired.
    fn retransmit(self: &Arc<Self>, conn: &Arc<Connection>, ccb: &mut MutexGuard<'_, Ccb>, now: Instant)
        -> Option<Action>
    {
        let state = ccb.state;
        match state {
            State::SynSent | State::SynReceived => {
                ccb.retransmits += 1;
                if ccb.retransmits > self.config.max_syn_retransmits {
                    Statistics::bump(&self.stats.connections_timed_out);
                    return Some(Action::Abort(Error::TimedOut));
                }

                ccb.rtt.back_off();
                ccb.rtt_sample = None;
                Statistics::bump(&self.stats.segments_retransmitted);
                net_debug!("{}: resending SYN, attempt {}", conn.key(), ccb.retransmits);
                if let Err(error) = self.send_syn(conn, ccb, now) {
                    net_debug!("{}: SYN deferred: {}", conn.key(), error);
                }
                None
            },
            _ if !state.can_output() => None,
            _ if ccb.send.window == 0 && (ccb.in_flight() > 0 || ccb.unsent() > 0 || ccb.fin_pending()) => {
                // Probe the closed window, as often as it takes.
                ccb.rtt.back_off();
                ccb.rtt_sample = None;
                ccb.send.next = ccb.send.unacked;
                net_trace!("{}: probing closed window", conn.key());
                Some(Action::Output { forced: true })
            },
            _ if ccb.in_flight() > 0 => {
                ccb.retransmits += 1;
                if ccb.retransmits > self.config.max_data_retransmits {
                    Statistics::bump(&self.stats.connections_timed_out);
                    return Some(Action::Abort(Error::TimedOut));
                }

                let mss = ccb.send.mss;
                ccb.congestion.ssthresh = (ccb.in_flight() / 2).max(2 * mss);
                ccb.congestion.window = mss;
                ccb.rtt.back_off();
                ccb.rtt_sample = None;
                ccb.send.next = ccb.send.unacked;
                net_debug!("{}: retransmitting from {}, attempt {}", conn.key(), ccb.send.unacked, ccb.retransmits);
                Some(Action::Output { forced: false })
            },
            // A send deferred for lack of buffers or a route.
            _ if ccb.unsent() > 0 || ccb.fin_pending() => Some(Action::Output { forced: false }),
            _ => None,
        }
    }

    /// Arm the keepalive timer or probe the peer.
    fn keepalive(self: &Arc<Self>, conn: &Arc<Connection>, ccb: &mut MutexGuard<'_, Ccb>, now: Instant)
        -> Option<Action>
    {
        let idle = ccb.state.is_synchronized() && ccb.in_flight() == 0 && ccb.queue.is_empty();
        if !ccb.flags.keepalive || !idle {
            ccb.timers.keepalive = Expiration::Never;
            return None;
        }

        if !ccb.timers.keepalive.is_armed() {
            ccb.timers.keepalive = Expiration::When(now + self.config.keepalive_idle);
            return None;
        }

        if !ccb.timers.keepalive.is_expired(now) {
            return None;
        }

        if ccb.keepalive_probes >= self.config.keepalive_probes {
            Statistics::bump(&self.stats.connections_timed_out);
            return Some(Action::Abort(Error::TimedOut));
        }

        ccb.keepalive_probes += 1;
        ccb.timers.keepalive = Expiration::When(now + self.config.keepalive_interval);
        // An old sequence number forces the peer to answer with an ACK.
        let emit = Emit {
            seq: ccb.send.unacked - 1,
            flags: TcpFlags::EMPTY,
            ack: Some(ccb.recv.next),
            max_seg_size: None,
            urgent_at: None,
        };
        net_trace!("{}: keepalive probe {}", conn.key(), ccb.keepalive_probes);
        if let Err(error) = self.send_control(conn, ccb, emit) {
            net_debug!("{}: keepalive not sent: {}", conn.key(), error);
        }
        None
    }
}
