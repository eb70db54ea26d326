//! Hooks of the receive path.
//!
//! Parsing and reassembly happen outside of this crate. The receive path reports what it learned
//! from a segment and the provider updates the sending side accordingly.
use core::cmp;
use std::sync::Arc;

use crate::layer::{Error, Result};
use crate::time::{Expiration, Instant};
use crate::wire::TcpSeqNumber;

use super::{ConnectionKey, Provider, State};
use super::request::RequestPool;

impl Provider {
    /// The peer acknowledged everything before `ack` and offers `window` bytes.
    ///
    /// Retires acknowledged send requests, grows the congestion window and restarts the send
    /// engine.
    pub(crate) fn acknowledge(self: &Arc<Self>, key: ConnectionKey, ack: TcpSeqNumber, window: usize, now: Instant)
        -> Result<()>
    {
        let conn = self.get(key)?;
        let mut finished = Vec::new();
        let (close, flush) = {
            let mut ccb = conn.ccb.lock();
            if !ccb.state.is_synchronized() {
                return Err(Error::InvalidState);
            }
            if ack > ccb.send.max {
                net_debug!("{}: ack {} beyond {}", key, ack, ccb.send.max);
                return Err(Error::InvalidParameter);
            }
            if ack < ccb.send.unacked {
                // Reordered, nothing new.
                return Ok(());
            }

            ccb.send.window = window;
            ccb.send.max_window = cmp::max(ccb.send.max_window, window);

            let acked = ack - ccb.send.unacked;
            if acked == 0 {
                let reopened = ccb.flags.flow_controlled && window > 0;
                drop(ccb);
                if reopened {
                    net_trace!("{}: peer window reopened", key);
                    self.output(&conn, now, false);
                }
                return Ok(());
            }

            let fin_acked = match ccb.send.fin {
                Some(fin) => fin >= ccb.send.unacked && fin < ack,
                None => false,
            };
            let data_acked = acked - usize::from(fin_acked);

            ccb.send.unacked = ack;
            if ccb.send.next < ack {
                ccb.send.next = ack;
            }

            let mss = ccb.send.mss;
            if ccb.congestion.window < ccb.congestion.ssthresh {
                ccb.congestion.window = ccb.congestion.window.saturating_add(cmp::min(data_acked, mss));
            } else {
                let increase = cmp::max(1, mss * mss / ccb.congestion.window.max(1));
                ccb.congestion.window = ccb.congestion.window.saturating_add(increase);
            }

            if let Some((seq, sent)) = ccb.rtt_sample {
                if ack > seq {
                    if ccb.retransmits == 0 {
                        ccb.rtt.sample(now - sent);
                    }
                    ccb.rtt_sample = None;
                }
            }

            ccb.retransmits = 0;
            ccb.soft_error = None;
            ccb.keepalive_probes = 0;
            ccb.timers.soft_error = Expiration::Never;
            ccb.timers.keepalive = Expiration::Never;

            let mut remaining = data_acked;
            self.requests.with(|slots| {
                while remaining > 0 {
                    let request_key = match ccb.queue.front() {
                        Some(&request_key) => request_key,
                        None => break,
                    };

                    let request = match slots.get_mut(request_key) {
                        Some(request) => request,
                        None => {
                            ccb.queue.pop_front();
                            continue;
                        },
                    };

                    let take = cmp::min(request.len() - request.acked, remaining);
                    request.acked += take;
                    remaining -= take;
                    ccb.queued -= take;
                    if request.acked == request.len() {
                        ccb.queue.pop_front();
                        finished.extend(RequestPool::release(slots, request_key, None));
                    }
                }
            });

            if ccb.send.unacked == ccb.send.max {
                ccb.timers.retransmit = Expiration::Never;
            } else {
                ccb.restart_retransmit(now);
            }

            let mut close = None;
            if fin_acked {
                let state = ccb.state;
                ccb.state = match state {
                    State::FinWait1 => State::FinWait2,
                    State::Closing => {
                        ccb.timers.time_wait = Expiration::When(now + self.config.time_wait);
                        State::TimeWait
                    },
                    State::LastAck => State::Closed,
                    other => other,
                };
                ccb.careful = ccb.careful.saturating_sub(1);
                close = ccb.close.take();
                net_debug!("{}: FIN acknowledged, now {}", key, ccb.state);
            }

            net_trace!("{}: {} acked, window {}, cwnd {}", key, acked, window, ccb.congestion.window);
            self.maybe_free(&conn, &mut ccb);
            (close, ccb.state.can_output())
        };

        finished.into_iter().for_each(|request| request.complete());
        if let Some(close) = close {
            close.complete(Ok(()));
        }

        if flush {
            self.output(&conn, now, false);
        }
        Ok(())
    }

    /// The receive path accepted `len` in-order bytes from the peer.
    ///
    /// Every second segment is acknowledged right away, others after the delayed ACK timeout.
    /// Urgent data is acknowledged immediately.
    pub(crate) fn data_received(self: &Arc<Self>, key: ConnectionKey, len: usize, urgent: bool, now: Instant)
        -> Result<()>
    {
        let conn = self.get(key)?;
        {
            let mut ccb = conn.ccb.lock();
            if !ccb.state.receives_data() {
                return Err(Error::InvalidState);
            }
            if len == 0 {
                return Ok(());
            }

            ccb.recv.next += len;
            ccb.recv.unacked_segments += 1;
            if urgent || ccb.recv.unacked_segments >= 2 {
                if let Err(error) = self.send_ack(&conn, &mut ccb, now) {
                    net_debug!("{}: ACK not sent: {}", key, error);
                }
            } else if !ccb.timers.delayed_ack.is_armed() {
                ccb.timers.delayed_ack = Expiration::When(now + self.config.delayed_ack_timeout);
            }
        }

        let handlers = conn.endpoint().handlers();
        let handler = if urgent {
            handlers.expedited_receive
        } else {
            handlers.receive
        };
        if let Some(handler) = handler {
            handler(key, len);
        }
        Ok(())
    }
}
