use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::layer::{Error, Outcome, Result};
use crate::layer::addr::{Endpoint, EndpointOption, EventHandlers, Open};
use crate::stack::{Config, Information, Setting, Stack};
use crate::testing::{self, MockNetwork, LOCAL_V4, REMOTE_V4};
use crate::time::{Duration, Expiration, Instant};
use crate::wire::{IpAddress, TcpRepr, TcpSeqNumber};

use super::*;

const PEER_ISS: TcpSeqNumber = TcpSeqNumber(1000);

fn at(millis: i64) -> Instant {
    Instant::from_millis(millis)
}

struct Fixture {
    stack: Stack,
    network: Arc<MockNetwork>,
    endpoint: Arc<Endpoint>,
    key: ConnectionKey,
    /// The first sequence number after our SYN.
    start: TcpSeqNumber,
}

impl Fixture {
    /// An established connection to a peer offering `window` bytes.
    fn new(config: Config, window: usize) -> Self {
        let mss = config.max_segment_size.min(testing::MTU - 40) as u16;
        let (stack, network, _) = testing::stack(config);
        let endpoint = stack.open_endpoint(Open::stream(LOCAL_V4, 0)).unwrap();
        let (connected, result) = testing::completion();
        let key = stack.connect(&endpoint, REMOTE_V4, 80, at(0), connected).unwrap();

        let syn = single(network.take_segments());
        assert!(syn.0.flags.syn());
        assert_eq!(syn.0.ack_number, None);
        assert_eq!(syn.0.max_seg_size, Some(mss));
        assert_eq!(syn.0.dst_port, 80);
        assert!(result.try_recv().is_err());

        let peer = Handshake { seq: PEER_ISS, window, max_seg_size: Some(1460) };
        stack.established(key, peer, at(10)).unwrap();
        assert_eq!(result.try_recv().unwrap(), Ok(()));

        let ack = single(network.take_segments());
        assert!(!ack.0.flags.syn());
        assert_eq!(ack.0.seq_number, syn.0.seq_number + 1);
        assert_eq!(ack.0.ack_number, Some(PEER_ISS + 1));

        Fixture {
            stack,
            network,
            endpoint,
            key,
            start: syn.0.seq_number + 1,
        }
    }

    fn send(&self, len: usize, now: Instant) -> (Outcome<usize>, Receiver<Result<usize>>) {
        let (completion, result) = testing::completion();
        let data: Arc<[u8]> = (0..len).map(|i| i as u8).collect::<Vec<_>>().into();
        (self.stack.send(self.key, data, false, now, completion), result)
    }

    fn ack(&self, offset: usize, window: usize, now: Instant) {
        self.stack.acknowledge(self.key, self.start + offset, window, now).unwrap();
    }

    fn info(&self) -> ConnectionInfo {
        self.stack.tcp().info(self.key).unwrap()
    }

    fn segments(&self) -> Vec<(TcpRepr, Vec<u8>)> {
        self.network.take_segments()
    }
}

fn single<T>(mut items: Vec<T>) -> T {
    assert_eq!(items.len(), 1, "expected exactly one item");
    items.pop().unwrap()
}

#[test]
fn handshake() {
    let fixture = Fixture::new(Config::default(), 4096);
    let info = fixture.info();
    assert_eq!(info.state, State::Established);
    assert_eq!(info.mss, 1460);
    assert_eq!(info.congestion_window, 2920);
    assert_eq!(info.ssthresh, usize::MAX);
    assert_eq!(info.send_unacked, fixture.start);
    assert_eq!(info.receive_next, PEER_ISS + 1);
    // Sampled from the SYN.
    assert_eq!(info.srtt, Some(Duration::from_millis(10)));

    let provider = fixture.stack.statistics().snapshot();
    assert_eq!(provider.active_opens, 1);
}

#[test]
fn segmentation_follows_window() {
    let fixture = Fixture::new(Config::default(), 4096);
    let (outcome, result) = fixture.send(3000, at(20));
    assert!(outcome.is_pending());

    // Two full segments fill the congestion window of 2920 bytes.
    let segments = fixture.segments();
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0].0.seq_number, fixture.start);
    assert_eq!(segments[0].1.len(), 1460);
    assert_eq!(segments[1].0.seq_number, fixture.start + 1460);
    assert_eq!(segments[1].1.len(), 1460);
    assert_eq!(segments[1].1[0], (1460 % 256) as u8);
    assert!(!segments[1].0.flags.psh());

    let info = fixture.info();
    assert_eq!(info.unsent, 80);
    assert_eq!(info.send_next - info.send_unacked, 2920);

    // Slow start grows the window, but Nagle holds the short tail back.
    fixture.ack(1460, 4096, at(30));
    assert_eq!(fixture.info().congestion_window, 4380);
    assert!(fixture.segments().is_empty());

    fixture.ack(2920, 4096, at(40));
    let tail = single(fixture.segments());
    assert_eq!(tail.1.len(), 80);
    assert!(tail.0.flags.psh());
    assert!(result.try_recv().is_err());

    fixture.ack(3000, 4096, at(50));
    assert_eq!(result.try_recv().unwrap(), Ok(3000));
    assert_eq!(fixture.stack.tcp().send_requests(), 0);
}

#[test]
fn nagle_and_nodelay() {
    let fixture = Fixture::new(Config::default(), 8192);
    let (_, _first) = fixture.send(100, at(20));
    assert_eq!(fixture.segments().len(), 1);

    let (_, _second) = fixture.send(100, at(21));
    assert!(fixture.segments().is_empty());

    fixture.ack(100, 8192, at(30));
    let held = single(fixture.segments());
    assert_eq!(held.0.seq_number, fixture.start + 100);
    assert_eq!(held.1.len(), 100);

    let outcome = fixture.stack.set_information(
        Setting::ConnectionOption(fixture.key, ConnectionOption::NoDelay(true)),
        at(31),
        crate::layer::Completion::ignore());
    assert_eq!(outcome, Outcome::Ready(Ok(())));

    let (_, _third) = fixture.send(10, at(32));
    let immediate = single(fixture.segments());
    assert_eq!(immediate.1.len(), 10);
}

#[test]
fn congestion_avoidance() {
    let config = Config::default().with_max_segment_size(1000);
    let fixture = Fixture::new(config, 65535);
    let (_, _sent) = fixture.send(20_000, at(20));
    assert_eq!(fixture.segments().len(), 2);

    // Force the connection out of slow start with a timeout.
    fixture.stack.poll_timers(at(20 + 200));
    let info = fixture.info();
    assert_eq!(info.congestion_window, 1000);
    assert_eq!(info.ssthresh, 2000);
    assert_eq!(info.retransmits, 1);
    assert_eq!(fixture.segments().len(), 1);

    fixture.ack(1000, 65535, at(300));
    assert_eq!(fixture.info().congestion_window, 2000);
    // Above the threshold the window grows by about one segment per window.
    fixture.ack(2000, 65535, at(310));
    assert_eq!(fixture.info().congestion_window, 2500);
}

#[test]
fn segments_follow_hop_limit() {
    let fixture = Fixture::new(Config::default(), 4096);
    let (_, _first) = fixture.send(10, at(20));
    assert_eq!(single(fixture.network.take_sent()).packet.hop_limit, 64);
    fixture.ack(10, 4096, at(21));

    let setting = Setting::EndpointOption(&fixture.endpoint, EndpointOption::HopLimit(Some(7)));
    let outcome = fixture.stack.set_information(setting, at(21), crate::layer::Completion::ignore());
    assert_eq!(outcome, Outcome::Ready(Ok(())));

    let (_, _second) = fixture.send(10, at(22));
    assert_eq!(single(fixture.network.take_sent()).packet.hop_limit, 7);
}

#[test]
fn retransmit_goes_back() {
    let fixture = Fixture::new(Config::default(), 4096);
    let (_, result) = fixture.send(2920, at(20));
    assert_eq!(fixture.segments().len(), 2);

    // The SYN sample put the timeout at its lower bound.
    assert_eq!(fixture.info().rto, Duration::from_millis(200));
    assert_eq!(fixture.stack.poll_timers(at(219)), Expiration::When(at(220)));
    assert!(fixture.segments().is_empty());

    fixture.stack.poll_timers(at(220));
    let resent = single(fixture.segments());
    assert_eq!(resent.0.seq_number, fixture.start);
    assert_eq!(resent.1.len(), 1460);

    let info = fixture.info();
    assert_eq!(info.rto, Duration::from_millis(400));
    assert_eq!(info.send_max - info.send_next, 1460);
    assert_eq!(fixture.stack.statistics().snapshot().segments_retransmitted, 1);

    // The first segment arrives, the second is sent again.
    fixture.ack(1460, 4096, at(300));
    let second = single(fixture.segments());
    assert_eq!(second.0.seq_number, fixture.start + 1460);

    fixture.ack(2920, 4096, at(310));
    assert_eq!(result.try_recv().unwrap(), Ok(2920));
    assert_eq!(fixture.info().retransmits, 0);
}

#[test]
fn data_retransmit_limit() {
    let config = Config::default().with_retransmit_limits(2, 4);
    let fixture = Fixture::new(config, 4096);
    let (_, result) = fixture.send(100, at(20));
    fixture.segments();

    for now in &[220, 620, 1420] {
        fixture.stack.poll_timers(at(*now));
    }

    assert_eq!(result.try_recv().unwrap(), Err(Error::TimedOut));
    assert_eq!(fixture.stack.tcp().info(fixture.key).unwrap_err(), Error::InvalidHandle);
    let segments = fixture.segments();
    // Two retransmissions and a reset.
    assert_eq!(segments.len(), 3);
    assert!(segments[2].0.flags.rst());
    assert_eq!(fixture.stack.statistics().snapshot().connections_timed_out, 1);
}

#[test]
fn syn_timeout() {
    let config = Config::default().with_retransmit_limits(8, 2);
    let (stack, network, _) = testing::stack(config);
    let endpoint = stack.open_endpoint(Open::stream(LOCAL_V4, 0)).unwrap();
    let (connected, result) = testing::completion();
    let key = stack.connect(&endpoint, REMOTE_V4, 80, at(0), connected).unwrap();

    assert_eq!(stack.poll_timers(at(999)), Expiration::When(at(1000)));
    stack.poll_timers(at(1000));
    assert_eq!(stack.poll_timers(at(1001)), Expiration::When(at(3000)));
    stack.poll_timers(at(3000));
    assert!(result.try_recv().is_err());
    stack.poll_timers(at(7000));

    assert_eq!(result.try_recv().unwrap(), Err(Error::TimedOut));
    let segments = network.take_segments();
    assert_eq!(segments.len(), 3);
    assert!(segments.iter().all(|(repr, _)| repr.flags.syn() && !repr.flags.rst()));
    assert_eq!(stack.tcp().get(key).unwrap_err(), Error::InvalidHandle);
    assert_eq!(stack.tcp().connections(), 0);
}

#[test]
fn zero_window_probe() {
    let fixture = Fixture::new(Config::default(), 0);
    let (_, result) = fixture.send(10, at(20));
    assert!(fixture.segments().is_empty());

    fixture.stack.poll_timers(at(220));
    let probe = single(fixture.segments());
    assert_eq!(probe.0.seq_number, fixture.start);
    assert_eq!(probe.1.len(), 1);

    // Still closed, the probe is repeated after a longer timeout.
    fixture.ack(0, 0, at(230));
    fixture.stack.poll_timers(at(619));
    assert!(fixture.segments().is_empty());
    fixture.stack.poll_timers(at(620));
    assert_eq!(single(fixture.segments()).1.len(), 1);

    fixture.ack(1, 4096, at(700));
    let rest = single(fixture.segments());
    assert_eq!(rest.0.seq_number, fixture.start + 1);
    assert_eq!(rest.1.len(), 9);

    fixture.ack(10, 4096, at(710));
    assert_eq!(result.try_recv().unwrap(), Ok(10));
}

#[test]
fn silly_window_timer() {
    let mut config = Config::default();
    config.silly_window_timeout = Duration::from_millis(100);
    let fixture = Fixture::new(config, 4096);
    let (_, _sent) = fixture.send(5000, at(20));
    assert_eq!(fixture.segments().len(), 2);

    // The peer offers 300 bytes beyond what is in flight, far below half its largest window.
    fixture.ack(1460, 1760, at(40));
    assert!(fixture.segments().is_empty());

    fixture.stack.poll_timers(at(139));
    assert!(fixture.segments().is_empty());
    fixture.stack.poll_timers(at(140));
    let forced = single(fixture.segments());
    assert_eq!(forced.0.seq_number, fixture.start + 2920);
    assert_eq!(forced.1.len(), 300);
}

#[test]
fn send_during_hand_off() {
    let fixture = Fixture::new(Config::default(), 8192);
    let (nested_in, nested) = crossbeam_channel::unbounded();
    let (stack, network, key) = (fixture.stack.clone(), fixture.network.clone(), fixture.key);
    fixture.network.on_next_send(move || {
        let before = network.sent_count();
        let (completion, result) = testing::completion();
        let outcome = stack.send(key, vec![7u8; 1460].into(), false, at(21), completion);
        let _ = nested_in.send((outcome, network.sent_count() - before, result));
    });

    let (_, first) = fixture.send(1460, at(20));
    let (outcome, sent_inside, second) = nested.try_recv().unwrap();
    assert!(outcome.is_pending());
    // The engine already running on the connection picks up the data.
    assert_eq!(sent_inside, 0);

    let segments = fixture.segments();
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[1].0.seq_number, fixture.start + 1460);
    assert!(segments[1].1.iter().all(|&byte| byte == 7));

    fixture.ack(2920, 8192, at(30));
    assert_eq!(first.try_recv().unwrap(), Ok(1460));
    assert_eq!(second.try_recv().unwrap(), Ok(1460));
    assert!(first.try_recv().is_err());
    assert!(second.try_recv().is_err());
}

#[test]
fn ack_during_hand_off() {
    let fixture = Fixture::new(Config::default(), 1460);
    let (stack, key, start) = (fixture.stack.clone(), fixture.key, fixture.start);
    fixture.network.on_next_send(move || {
        stack.acknowledge(key, start + 1460, 1460, at(21)).unwrap();
    });

    let (_, result) = fixture.send(2920, at(20));
    // The window reopened while the first segment was handed off.
    let segments = fixture.segments();
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[1].0.seq_number, fixture.start + 1460);
    assert_eq!(segments[1].1.len(), 1460);
    assert_eq!(fixture.info().send_unacked, fixture.start + 1460);
    assert!(result.try_recv().is_err());

    fixture.ack(2920, 1460, at(30));
    assert_eq!(result.try_recv().unwrap(), Ok(2920));
    assert!(result.try_recv().is_err());
}

#[test]
fn concurrent_sends_and_acks() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    const THREADS: usize = 4;
    const REQUESTS: usize = 50;
    const LEN: usize = 100;

    let mut config = Config::default();
    config.nagle = false;
    let fixture = Fixture::new(config, 65535);
    let (results_in, results) = crossbeam_channel::unbounded();

    let senders: Vec<_> = (0..THREADS).map(|_| {
        let (stack, key, results_in) = (fixture.stack.clone(), fixture.key, results_in.clone());
        thread::spawn(move || {
            for _ in 0..REQUESTS {
                let (completion, result) = testing::completion();
                let outcome = stack.send(key, vec![0xaau8; LEN].into(), false, at(20), completion);
                assert!(outcome.is_pending());
                results_in.send(result).unwrap();
            }
        })
    }).collect();

    let done = Arc::new(AtomicBool::new(false));
    let acker = {
        let (stack, key, done) = (fixture.stack.clone(), fixture.key, done.clone());
        thread::spawn(move || {
            while !done.load(Ordering::SeqCst) {
                let info = stack.tcp().info(key).unwrap();
                if info.send_max > info.send_unacked {
                    stack.acknowledge(key, info.send_max, 65535, at(30)).unwrap();
                }
                thread::yield_now();
            }
        })
    };

    for sender in senders {
        sender.join().unwrap();
    }

    let requests: Vec<_> = results.try_iter().collect();
    assert_eq!(requests.len(), THREADS * REQUESTS);
    for result in &requests {
        assert_eq!(result.recv_timeout(Duration::from_secs(10)).unwrap(), Ok(LEN));
    }
    done.store(true, Ordering::SeqCst);
    acker.join().unwrap();

    for result in &requests {
        assert!(result.try_recv().is_err());
    }
    assert_eq!(fixture.stack.tcp().send_requests(), 0);

    // Every byte went out exactly once, in sequence.
    let mut segments = fixture.segments();
    segments.sort_by_key(|segment| segment.0.seq_number - fixture.start);
    let mut next = fixture.start;
    for (repr, payload) in &segments {
        assert_eq!(repr.seq_number, next);
        next = next + payload.len();
    }
    assert_eq!(next, fixture.start + THREADS * REQUESTS * LEN);
}

#[test]
fn graceful_close() {
    let fixture = Fixture::new(Config::default().with_time_wait(Duration::from_secs(1)), 4096);
    let (_, first) = fixture.send(100, at(20));
    let (_, second) = fixture.send(50, at(21));
    assert_eq!(fixture.segments().len(), 1);

    let (closing, closed) = testing::completion();
    let outcome = fixture.stack.close_connection(fixture.key, at(22), closing);
    assert!(outcome.is_pending());
    // The held data leaves together with the FIN.
    let fin = single(fixture.segments());
    assert!(fin.0.flags.fin());
    assert_eq!(fin.0.seq_number, fixture.start + 100);
    assert_eq!(fin.1.len(), 50);
    assert_eq!(fixture.info().state, State::FinWait1);

    // No further data once closing.
    let (late, _) = fixture.send(1, at(23));
    assert_eq!(late, Outcome::Ready(Err(Error::InvalidState)));

    fixture.ack(151, 4096, at(30));
    assert_eq!(first.try_recv().unwrap(), Ok(100));
    assert_eq!(second.try_recv().unwrap(), Ok(50));
    assert_eq!(closed.try_recv().unwrap(), Ok(()));
    assert_eq!(fixture.info().state, State::FinWait2);

    fixture.stack.remote_closed(fixture.key, at(40)).unwrap();
    assert_eq!(fixture.info().state, State::TimeWait);
    let ack = single(fixture.segments());
    assert_eq!(ack.0.ack_number, Some(PEER_ISS + 2));

    fixture.stack.poll_timers(at(1039));
    assert_eq!(fixture.stack.tcp().connections(), 1);
    fixture.stack.poll_timers(at(1040));
    assert_eq!(fixture.stack.tcp().connections(), 0);
}

#[test]
fn passive_close() {
    let fixture = Fixture::new(Config::default(), 4096);
    fixture.stack.remote_closed(fixture.key, at(20)).unwrap();
    assert_eq!(fixture.info().state, State::CloseWait);
    fixture.segments();

    // Sending is still permitted until our own close.
    let (_, sent) = fixture.send(10, at(21));
    assert_eq!(fixture.segments().len(), 1);

    let (closing, closed) = testing::completion();
    assert!(fixture.stack.close_connection(fixture.key, at(22), closing).is_pending());
    let fin = single(fixture.segments());
    assert!(fin.0.flags.fin());
    assert_eq!(fixture.info().state, State::LastAck);

    fixture.ack(11, 4096, at(30));
    assert_eq!(sent.try_recv().unwrap(), Ok(10));
    assert_eq!(closed.try_recv().unwrap(), Ok(()));
    assert_eq!(fixture.stack.tcp().connections(), 0);
}

#[test]
fn abort_waits_for_segments() {
    let fixture = Fixture::new(Config::default(), 4096);
    let (ended, disconnects) = crossbeam_channel::unbounded();
    let handlers = EventHandlers {
        disconnect: Some(Arc::new(move |key: ConnectionKey, reason: Option<Error>| {
            let _ = ended.send((key, reason));
        })),
        ..EventHandlers::default()
    };
    fixture.stack.set_event_handlers(&fixture.endpoint, handlers).unwrap();

    fixture.network.hold();
    let (_, result) = fixture.send(100, at(20));
    assert_eq!(fixture.network.held(), 1);

    let outcome = fixture.stack.set_information(
        Setting::AbortConnection(fixture.key), at(21), crate::layer::Completion::ignore());
    assert_eq!(outcome, Outcome::Ready(Ok(())));
    assert_eq!(disconnects.try_recv().unwrap(), (fixture.key, Some(Error::Aborted)));

    let segments = fixture.segments();
    assert_eq!(segments.len(), 2);
    let reset = &segments[1].0;
    assert!(reset.flags.rst());
    assert_eq!(reset.seq_number, fixture.start + 100);

    // A segment still borrows the request.
    assert!(result.try_recv().is_err());
    assert_eq!(fixture.stack.tcp().connections(), 1);
    assert_eq!(fixture.info().state, State::Closed);

    assert_eq!(fixture.network.complete_held(Ok(())), 2);
    assert_eq!(result.try_recv().unwrap(), Err(Error::Aborted));
    assert!(result.try_recv().is_err());
    assert_eq!(fixture.stack.tcp().connections(), 0);
    assert_eq!(fixture.stack.statistics().snapshot().resets_sent, 1);
}

#[test]
fn borrowed_then_copied() {
    let fixture = Fixture::new(Config::default(), 4096);
    fixture.network.hold();
    let (_, result) = fixture.send(1000, at(20));

    let first = single(fixture.network.take_sent());
    assert_eq!(first.packet.payload.len(), 1);
    assert!(first.packet.payload[0].is_borrowed());

    // The retransmission may not share the buffer with the segment still in flight.
    fixture.stack.poll_timers(at(220));
    let second = single(fixture.network.take_sent());
    assert!(!second.packet.payload[0].is_borrowed());
    assert_eq!(second.packet.payload[0].as_bytes(), first.packet.payload[0].as_bytes());

    fixture.network.complete_held(Ok(()));
    assert!(result.try_recv().is_err());
    fixture.ack(1000, 4096, at(300));
    assert_eq!(result.try_recv().unwrap(), Ok(1000));
    assert_eq!(fixture.stack.tcp().buffer_in_use(), 0);
}

#[test]
fn request_spans_segments() {
    let fixture = Fixture::new(Config::default(), 8192);
    fixture.network.hold();
    let (_, small) = fixture.send(1000, at(20));
    let (_, large) = fixture.send(1000, at(21));
    // Nagle holds the second request back.
    assert_eq!(fixture.network.held(), 1);
    assert_eq!(fixture.network.take_sent().len(), 1);

    fixture.ack(1000, 8192, at(30));
    assert!(small.try_recv().is_err());
    let sent = single(fixture.network.take_sent());
    assert_eq!(sent.packet.payload_len(), 1000);

    fixture.network.complete_held(Ok(()));
    assert_eq!(small.try_recv().unwrap(), Ok(1000));
    assert!(large.try_recv().is_err());

    fixture.ack(2000, 8192, at(40));
    assert_eq!(large.try_recv().unwrap(), Ok(1000));
}

#[test]
fn request_pool_exhaustion() {
    let fixture = Fixture::new(Config::default().with_max_send_requests(1), 4096);
    fixture.network.hold();
    let (first, _) = fixture.send(10, at(20));
    assert!(first.is_pending());

    let (second, result) = fixture.send(10, at(21));
    assert_eq!(second, Outcome::Ready(Err(Error::Exhausted)));
    assert!(result.try_recv().is_err());
}

#[test]
fn segment_budget_defers() {
    let fixture = Fixture::new(Config::default().with_segment_buffer_budget(512), 4096);
    let (outcome, result) = fixture.send(1000, at(20));
    assert!(outcome.is_pending());
    assert!(fixture.segments().is_empty());
    assert_eq!(fixture.info().unsent, 1000);
    assert!(result.try_recv().is_err());
    assert_eq!(fixture.info().soft_error, None);
}

#[test]
fn hard_network_error_aborts() {
    let fixture = Fixture::new(Config::default(), 4096);
    fixture.network.inline(Err(Error::ProtocolUnreachable));
    let (_, result) = fixture.send(10, at(20));

    assert_eq!(result.try_recv().unwrap(), Err(Error::ProtocolUnreachable));
    assert_eq!(fixture.stack.tcp().connections(), 0);
}

#[test]
fn soft_error_escalates() {
    let config = Config::default().with_soft_error_timeout(Duration::from_secs(1));
    let fixture = Fixture::new(config, 4096);
    let (errors_in, errors) = crossbeam_channel::unbounded();
    let handlers = EventHandlers {
        error: Some(Arc::new(move |error: Error| {
            let _ = errors_in.send(error);
        })),
        ..EventHandlers::default()
    };
    fixture.stack.set_event_handlers(&fixture.endpoint, handlers).unwrap();

    fixture.network.set_reachable(false);
    fixture.network.bump_generation();
    let (_, result) = fixture.send(10, at(20));
    assert!(fixture.segments().is_empty());
    assert_eq!(fixture.info().soft_error, Some(Error::Unreachable));

    // Armed on the first poll, reported once it persisted.
    fixture.stack.poll_timers(at(30));
    assert!(errors.try_recv().is_err());
    fixture.stack.poll_timers(at(1030));
    assert_eq!(errors.try_recv().unwrap(), Error::Unreachable);
    assert_eq!(result.try_recv().unwrap(), Err(Error::Unreachable));
}

#[test]
fn delayed_ack() {
    let fixture = Fixture::new(Config::default(), 4096);
    let (received_in, received) = crossbeam_channel::unbounded();
    let handlers = EventHandlers {
        receive: Some(Arc::new(move |key: ConnectionKey, len: usize| {
            let _ = received_in.send((key, len));
        })),
        ..EventHandlers::default()
    };
    fixture.stack.set_event_handlers(&fixture.endpoint, handlers).unwrap();

    fixture.stack.data_received(fixture.key, 100, false, at(20)).unwrap();
    assert_eq!(received.try_recv().unwrap(), (fixture.key, 100));
    assert!(fixture.segments().is_empty());

    fixture.stack.poll_timers(at(220));
    let ack = single(fixture.segments());
    assert_eq!(ack.0.ack_number, Some(PEER_ISS + 101));

    // Every second segment is acknowledged immediately.
    fixture.stack.data_received(fixture.key, 10, false, at(230)).unwrap();
    assert!(fixture.segments().is_empty());
    fixture.stack.data_received(fixture.key, 10, false, at(231)).unwrap();
    assert_eq!(single(fixture.segments()).0.ack_number, Some(PEER_ISS + 121));
}

#[test]
fn ack_retried_after_exhaustion() {
    let fixture = Fixture::new(Config::default().with_segment_buffer_budget(90), 4096);
    fixture.network.hold();
    let (_, sent) = fixture.send(60, at(20));
    assert_eq!(single(fixture.segments()).1.len(), 60);

    // The second segment wants an immediate ACK but the held data uses up the buffers.
    fixture.stack.data_received(fixture.key, 10, false, at(21)).unwrap();
    fixture.stack.data_received(fixture.key, 10, false, at(22)).unwrap();
    assert!(fixture.segments().is_empty());

    assert_eq!(fixture.network.complete_held(Ok(())), 1);
    fixture.ack(60, 4096, at(30));
    assert_eq!(sent.try_recv().unwrap(), Ok(60));
    assert!(fixture.stack.poll_timers(at(30)).is_armed());

    fixture.stack.poll_timers(at(222));
    let ack = single(fixture.segments());
    assert_eq!(ack.0.ack_number, Some(PEER_ISS + 21));
    assert!(ack.1.is_empty());
}

#[test]
fn repeated_fin_acknowledged() {
    let fixture = Fixture::new(Config::default(), 4096);
    let (disconnects_in, disconnects) = crossbeam_channel::unbounded();
    let handlers = EventHandlers {
        disconnect: Some(Arc::new(move |key: ConnectionKey, reason: Option<Error>| {
            let _ = disconnects_in.send((key, reason));
        })),
        ..EventHandlers::default()
    };
    fixture.stack.set_event_handlers(&fixture.endpoint, handlers).unwrap();

    fixture.stack.remote_closed(fixture.key, at(20)).unwrap();
    assert_eq!(single(fixture.segments()).0.ack_number, Some(PEER_ISS + 2));
    assert_eq!(disconnects.try_recv().unwrap(), (fixture.key, None));

    // Our ACK was lost and the peer sends its FIN again.
    fixture.stack.remote_closed(fixture.key, at(30)).unwrap();
    assert_eq!(fixture.info().state, State::CloseWait);
    assert_eq!(fixture.info().receive_next, PEER_ISS + 2);
    assert_eq!(single(fixture.segments()).0.ack_number, Some(PEER_ISS + 2));
    assert!(disconnects.try_recv().is_err());
}

#[test]
fn fin_ack_retried_after_exhaustion() {
    let fixture = Fixture::new(Config::default().with_segment_buffer_budget(90), 4096);
    fixture.network.hold();
    let (_, _sent) = fixture.send(60, at(20));
    fixture.segments();

    fixture.stack.remote_closed(fixture.key, at(21)).unwrap();
    assert!(fixture.segments().is_empty());
    assert_eq!(fixture.info().state, State::CloseWait);

    fixture.network.complete_held(Ok(()));
    fixture.ack(60, 4096, at(30));
    fixture.stack.poll_timers(at(221));
    assert_eq!(single(fixture.segments()).0.ack_number, Some(PEER_ISS + 2));
}

#[test]
fn keepalive_probes() {
    let mut config = Config::default();
    config.keepalive_idle = Duration::from_secs(10);
    config.keepalive_interval = Duration::from_secs(1);
    config.keepalive_probes = 2;
    let fixture = Fixture::new(config, 4096);

    let outcome = fixture.stack.set_information(
        Setting::ConnectionOption(fixture.key, ConnectionOption::KeepAlive(true)),
        at(20),
        crate::layer::Completion::ignore());
    assert_eq!(outcome, Outcome::Ready(Ok(())));

    assert_eq!(fixture.stack.poll_timers(at(20)), Expiration::When(at(10_020)));
    fixture.stack.poll_timers(at(10_020));
    let probe = single(fixture.segments());
    assert_eq!(probe.0.seq_number, fixture.start - 1);
    assert!(probe.1.is_empty());

    fixture.stack.poll_timers(at(11_020));
    assert_eq!(fixture.segments().len(), 1);
    fixture.stack.poll_timers(at(12_020));
    assert_eq!(fixture.stack.tcp().connections(), 0);
}

#[test]
fn passive_open() {
    let (stack, network, _) = testing::stack(Config::default());
    let listener = stack.open_endpoint(Open::stream(LOCAL_V4, 80)).unwrap();
    let peer = Handshake { seq: PEER_ISS, window: 4096, max_seg_size: Some(536) };

    let (refused, _) = testing::completion();
    let result = stack.incoming_connection(&listener, REMOTE_V4, 4000, peer, at(0), refused);
    assert_eq!(result.unwrap_err(), Error::Aborted);

    let handlers = EventHandlers {
        connect: Some(Arc::new(|_: IpAddress, port: u16| port == 4000)),
        ..EventHandlers::default()
    };
    stack.set_event_handlers(&listener, handlers).unwrap();

    let (accepted, result) = testing::completion();
    let key = stack.incoming_connection(&listener, REMOTE_V4, 4000, peer, at(0), accepted).unwrap();
    let syn_ack = single(network.take_segments());
    assert!(syn_ack.0.flags.syn());
    assert_eq!(syn_ack.0.ack_number, Some(PEER_ISS + 1));
    assert_eq!(syn_ack.0.src_port, 80);

    // The same four tuple can't be used twice.
    let (again, _) = testing::completion();
    let duplicate = stack.incoming_connection(&listener, REMOTE_V4, 4000, peer, at(1), again);
    assert_eq!(duplicate.unwrap_err(), Error::AddressInUse);

    stack.established(key, peer, at(5)).unwrap();
    assert_eq!(result.try_recv().unwrap(), Ok(()));
    assert!(network.take_segments().is_empty());

    match stack.query_information(crate::stack::Query::Connection(key)).unwrap() {
        Information::Connection(info) => {
            assert_eq!(info.state, State::Established);
            assert_eq!(info.mss, 536);
        },
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(stack.statistics().snapshot().passive_opens, 1);
}

#[test]
fn connect_validation() {
    let (stack, _, _) = testing::stack(Config::default());
    let datagram = stack.open_endpoint(Open::datagram(LOCAL_V4, 0)).unwrap();
    let stream = stack.open_endpoint(Open::stream(LOCAL_V4, 0)).unwrap();

    let (completion, _) = testing::completion();
    let wrong = stack.connect(&datagram, REMOTE_V4, 80, at(0), completion);
    assert_eq!(wrong.unwrap_err(), Error::InvalidParameter);

    let (completion, _) = testing::completion();
    let no_port = stack.connect(&stream, REMOTE_V4, 0, at(0), completion);
    assert_eq!(no_port.unwrap_err(), Error::InvalidAddress);

    let (completion, _) = testing::completion();
    let multicast = stack.connect(&stream, testing::GROUP_V4, 80, at(0), completion);
    assert_eq!(multicast.unwrap_err(), Error::InvalidAddress);

    let (completion, result) = testing::completion();
    stack.close_endpoint(&stream, crate::layer::Completion::ignore()).ready().unwrap().unwrap();
    let closed = stack.connect(&stream, REMOTE_V4, 80, at(0), completion);
    assert_eq!(closed.unwrap_err(), Error::AddressDeleted);
    // Reported synchronously, not through the completion.
    assert!(result.try_recv().is_err());
}

#[test]
fn close_while_connecting() {
    let (stack, network, _) = testing::stack(Config::default());
    let endpoint = stack.open_endpoint(Open::stream(LOCAL_V4, 0)).unwrap();
    let (connected, result) = testing::completion();
    let key = stack.connect(&endpoint, REMOTE_V4, 80, at(0), connected).unwrap();
    network.take_segments();

    let outcome = stack.close_connection(key, at(1), crate::layer::Completion::ignore());
    assert_eq!(outcome, Outcome::Ready(Ok(())));
    assert_eq!(result.try_recv().unwrap(), Err(Error::Aborted));
    assert!(network.take_segments().is_empty());
    assert_eq!(stack.tcp().connections(), 0);
}

#[test]
fn invalid_acknowledgement() {
    let fixture = Fixture::new(Config::default(), 4096);
    let (_, _sent) = fixture.send(100, at(20));
    let beyond = fixture.stack.acknowledge(fixture.key, fixture.start + 101, 4096, at(30));
    assert_eq!(beyond.unwrap_err(), Error::InvalidParameter);

    // An old acknowledgement changes nothing.
    fixture.ack(50, 4096, at(31));
    fixture.stack.acknowledge(fixture.key, fixture.start, 4096, at(32)).unwrap();
    assert_eq!(fixture.info().send_unacked, fixture.start + 50);
}

#[test]
fn address_removal_aborts() {
    let fixture = Fixture::new(Config::default(), 4096);
    let (_, result) = fixture.send(10, at(20));
    fixture.segments();

    assert_eq!(fixture.stack.invalidate_address(LOCAL_V4), 1);
    assert_eq!(result.try_recv().unwrap(), Err(Error::AddressDeleted));
    assert_eq!(fixture.stack.tcp().connections(), 0);
    // No reset from an address that is gone.
    assert!(fixture.segments().is_empty());
}
