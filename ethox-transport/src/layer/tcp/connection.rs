use core::fmt;
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::layer::{Completion, Error};
use crate::layer::addr::Endpoint;
use crate::layer::network::Route;
use crate::stack::Config;
use crate::time::{Duration, Expiration, Instant};
use crate::wire::TcpSeqNumber;

use super::{ConnectionKey, FourTuple};
use super::request::RequestKey;
use super::rtt::RttEstimator;
use super::send::Window;

/// The state of a connection, as in RFC 793.
///
/// There is no LISTEN state. Passive opens are driven by the endpoint, which hands an incoming
/// SYN to `accept`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    /// Not connected, or aborted.
    Closed,
    /// Our SYN was sent.
    SynSent,
    /// The SYN of the peer was answered.
    SynReceived,
    /// Both sides may send.
    Established,
    /// Our FIN was sent.
    FinWait1,
    /// Our FIN was acknowledged, the peer may still send.
    FinWait2,
    /// Both sides sent FIN, ours is not acknowledged yet.
    Closing,
    /// Both sides are done, lingering for stray segments.
    TimeWait,
    /// The peer sent FIN, we may still send.
    CloseWait,
    /// We sent FIN after the peer did.
    LastAck,
}

/// One connection of the stream protocol.
pub struct Connection {
    key: ConnectionKey,
    tuple: FourTuple,
    scope: u32,
    endpoint: Arc<Endpoint>,
    pub(crate) ccb: Mutex<Ccb>,
}

/// The connection control block.
pub(crate) struct Ccb {
    pub(crate) state: State,
    pub(crate) send: Send,
    pub(crate) recv: Receive,
    pub(crate) congestion: Congestion,
    pub(crate) timers: Timers,
    pub(crate) flags: Flags,
    /// Nonzero while handshake or teardown make every segment special.
    pub(crate) careful: u32,
    /// Requests with unacknowledged bytes, in sequence order.
    pub(crate) queue: VecDeque<RequestKey>,
    /// Unacknowledged data bytes of all queued requests.
    pub(crate) queued: usize,
    /// The segment size we advertise, derived from the route.
    pub(crate) local_mss: usize,
    pub(crate) route: Option<Route>,
    pub(crate) rtt: RttEstimator,
    /// The sequence number and send time of the segment being timed.
    pub(crate) rtt_sample: Option<(TcpSeqNumber, Instant)>,
    pub(crate) retransmits: u32,
    pub(crate) keepalive_probes: u32,
    pub(crate) soft_error: Option<Error>,
    /// Segments with the network layer.
    pub(crate) refs: usize,
    pub(crate) connect: Option<Completion<()>>,
    pub(crate) close: Option<Completion<()>>,
    pub(crate) freed: bool,
}

/// The send sequence space, RFC 793.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Send {
    /// ISS
    pub(crate) initial: TcpSeqNumber,
    /// SND.UNA
    pub(crate) unacked: TcpSeqNumber,
    /// SND.NXT
    pub(crate) next: TcpSeqNumber,
    /// The highest SND.NXT so far, rewinding for retransmission keeps this.
    pub(crate) max: TcpSeqNumber,
    /// SND.WND
    pub(crate) window: usize,
    /// The largest window the peer ever offered.
    pub(crate) max_window: usize,
    /// The effective segment size.
    pub(crate) mss: usize,
    /// The sequence number of our FIN once sent.
    pub(crate) fin: Option<TcpSeqNumber>,
}

/// The receive sequence space.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Receive {
    /// IRS
    pub(crate) initial: TcpSeqNumber,
    /// RCV.NXT
    pub(crate) next: TcpSeqNumber,
    /// RCV.WND
    pub(crate) window: usize,
    /// Segments received since our last acknowledgement.
    pub(crate) unacked_segments: u32,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct Congestion {
    pub(crate) window: usize,
    pub(crate) ssthresh: usize,
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Timers {
    pub(crate) retransmit: Expiration,
    pub(crate) silly_window: Expiration,
    pub(crate) delayed_ack: Expiration,
    pub(crate) keepalive: Expiration,
    pub(crate) time_wait: Expiration,
    pub(crate) soft_error: Expiration,
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Flags {
    /// A thread runs the send engine.
    pub(crate) in_send: bool,
    /// The running engine must loop again.
    pub(crate) retry_after_receive: bool,
    /// The next engine run may send into a closed window.
    pub(crate) force_pending: bool,
    /// The peer window stopped the engine.
    pub(crate) flow_controlled: bool,
    pub(crate) close_requested: bool,
    pub(crate) nodelay: bool,
    pub(crate) keepalive: bool,
}

/// A snapshot of a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// The connection key.
    pub key: ConnectionKey,
    /// Addresses and ports.
    pub tuple: FourTuple,
    /// The protocol state.
    pub state: State,
    /// The oldest unacknowledged sequence number.
    pub send_unacked: TcpSeqNumber,
    /// The next sequence number to send.
    pub send_next: TcpSeqNumber,
    /// The highest sequence number sent.
    pub send_max: TcpSeqNumber,
    /// The window offered by the peer.
    pub send_window: usize,
    /// The next sequence number expected from the peer.
    pub receive_next: TcpSeqNumber,
    /// The congestion window.
    pub congestion_window: usize,
    /// The slow start threshold.
    pub ssthresh: usize,
    /// The effective segment size.
    pub mss: usize,
    /// The smoothed round-trip time.
    pub srtt: Option<Duration>,
    /// The retransmission timeout.
    pub rto: Duration,
    /// Data bytes queued and not acknowledged.
    pub queued: usize,
    /// Data bytes queued and not sent.
    pub unsent: usize,
    /// Consecutive retransmissions.
    pub retransmits: u32,
    /// Segments with the network layer.
    pub segments_in_flight: usize,
    /// A network error that did not persist long enough to be reported.
    pub soft_error: Option<Error>,
    /// Batching of small segments is disabled.
    pub nodelay: bool,
    /// Keepalive probing is enabled.
    pub keepalive: bool,
}

impl State {
    /// Both initial sequence numbers are known to both sides.
    pub fn is_synchronized(self) -> bool {
        match self {
            State::Closed | State::SynSent | State::SynReceived => false,
            _ => true,
        }
    }

    /// The user may still queue data.
    pub fn accepts_data(self) -> bool {
        match self {
            State::SynSent | State::SynReceived | State::Established | State::CloseWait => true,
            _ => false,
        }
    }

    /// The engine may have data or a FIN to (re)send.
    pub(crate) fn can_output(self) -> bool {
        match self {
            State::Established | State::CloseWait | State::FinWait1 | State::Closing | State::LastAck => true,
            _ => false,
        }
    }

    /// The peer may still send data.
    pub(crate) fn receives_data(self) -> bool {
        match self {
            State::Established | State::FinWait1 | State::FinWait2 => true,
            _ => false,
        }
    }
}

impl Connection {
    pub(crate) fn new(key: ConnectionKey, tuple: FourTuple, scope: u32, endpoint: Arc<Endpoint>, ccb: Ccb)
        -> Self
    {
        Connection {
            key,
            tuple,
            scope,
            endpoint,
            ccb: Mutex::new(ccb),
        }
    }

    /// The connection key.
    pub fn key(&self) -> ConnectionKey {
        self.key
    }

    /// Addresses and ports.
    pub fn tuple(&self) -> &FourTuple {
        &self.tuple
    }

    /// The scope of the remote address.
    pub fn scope(&self) -> u32 {
        self.scope
    }

    /// The endpoint the connection was opened on.
    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    /// The current state.
    pub fn state(&self) -> State {
        self.ccb.lock().state
    }

    /// A snapshot of the control block.
    pub fn info(&self) -> ConnectionInfo {
        let ccb = self.ccb.lock();
        ConnectionInfo {
            key: self.key,
            tuple: self.tuple,
            state: ccb.state,
            send_unacked: ccb.send.unacked,
            send_next: ccb.send.next,
            send_max: ccb.send.max,
            send_window: ccb.send.window,
            receive_next: ccb.recv.next,
            congestion_window: ccb.congestion.window,
            ssthresh: ccb.congestion.ssthresh,
            mss: ccb.send.mss,
            srtt: ccb.rtt.srtt(),
            rto: ccb.rtt.rto(),
            queued: ccb.queued,
            unsent: ccb.unsent(),
            retransmits: ccb.retransmits,
            segments_in_flight: ccb.refs,
            soft_error: ccb.soft_error,
            nodelay: ccb.flags.nodelay,
            keepalive: ccb.flags.keepalive,
        }
    }
}

impl Ccb {
    pub(crate) fn new(config: &Config, iss: TcpSeqNumber, local_mss: usize) -> Self {
        Ccb {
            state: State::Closed,
            send: Send {
                initial: iss,
                unacked: iss,
                next: iss,
                max: iss,
                window: 0,
                max_window: 0,
                mss: local_mss.min(config.default_peer_mss),
                fin: None,
            },
            recv: Receive {
                initial: TcpSeqNumber::default(),
                next: TcpSeqNumber::default(),
                window: config.receive_window,
                unacked_segments: 0,
            },
            congestion: Congestion {
                window: local_mss,
                ssthresh: usize::MAX,
            },
            timers: Timers::default(),
            flags: Flags {
                nodelay: !config.nagle,
                ..Flags::default()
            },
            careful: 1,
            queue: VecDeque::new(),
            queued: 0,
            local_mss,
            route: None,
            rtt: RttEstimator::new(config),
            rtt_sample: None,
            retransmits: 0,
            keepalive_probes: 0,
            soft_error: None,
            refs: 0,
            connect: None,
            close: None,
            freed: false,
        }
    }

    /// Sequence space between SND.UNA and SND.NXT.
    pub(crate) fn in_flight(&self) -> usize {
        self.send.next - self.send.unacked
    }

    /// Data bytes between SND.UNA and SND.NXT.
    pub(crate) fn data_in_flight(&self) -> usize {
        let span = self.in_flight();
        match self.send.fin {
            Some(fin) if fin >= self.send.unacked && fin < self.send.next => span - 1,
            _ => span,
        }
    }

    /// Queued data bytes not yet sent.
    pub(crate) fn unsent(&self) -> usize {
        self.queued.saturating_sub(self.data_in_flight())
    }

    /// A FIN is requested and not covered by SND.NXT.
    pub(crate) fn fin_pending(&self) -> bool {
        self.flags.close_requested
            && self.send.fin.map_or(true, |fin| self.send.next <= fin)
    }

    pub(crate) fn window(&self, forced: bool) -> Window {
        Window {
            advertised: self.send.window,
            congestion: self.congestion.window,
            in_flight: self.in_flight(),
            unsent: self.unsent(),
            mss: self.send.mss,
            max_advertised: self.send.max_window,
            forced,
            nagle: !self.flags.nodelay,
            fin_pending: self.fin_pending(),
        }
    }

    /// Set the segment size from the MSS option of the peer.
    pub(crate) fn set_peer_mss(&mut self, config: &Config, option: Option<u16>) {
        let peer = option.map_or(config.default_peer_mss, usize::from);
        self.send.mss = self.local_mss.min(peer).max(1);
    }

    /// The congestion window when slow start begins.
    pub(crate) fn initial_window(&self) -> usize {
        2 * self.send.mss
    }

    pub(crate) fn arm_retransmit(&mut self, now: Instant) {
        if !self.timers.retransmit.is_armed() {
            self.timers.retransmit = Expiration::When(now + self.rtt.rto());
        }
    }

    pub(crate) fn restart_retransmit(&mut self, now: Instant) {
        self.timers.retransmit = Expiration::When(now + self.rtt.rto());
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Connection")
            .field("key", &self.key)
            .field("tuple", &self.tuple)
            .finish()
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            State::Closed => "CLOSED",
            State::SynSent => "SYN-SENT",
            State::SynReceived => "SYN-RECEIVED",
            State::Established => "ESTABLISHED",
            State::FinWait1 => "FIN-WAIT-1",
            State::FinWait2 => "FIN-WAIT-2",
            State::Closing => "CLOSING",
            State::TimeWait => "TIME-WAIT",
            State::CloseWait => "CLOSE-WAIT",
            State::LastAck => "LAST-ACK",
        };
        f.write_str(name)
    }
}
