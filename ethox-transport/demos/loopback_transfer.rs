//! Transfers a buffer over a simulated lossy link to a scripted peer.
//!
//! # Usage
//!
//! The peer acknowledges in-order data after a fixed delay and drops every `loss`-th data segment
//! it receives, which exercises slow start, retransmission and the graceful close.
//!
//!   > $ RUST_LOG=ethox_transport=debug cargo run --example loopback_transfer -- 100000 --loss 7
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use structopt::StructOpt;

use ethox_transport::{Completion, Config, Stack};
use ethox_transport::layer::addr::Open;
use ethox_transport::layer::network::{Interface, InterfaceId, Interfaces, Network, OutPacket, Route};
use ethox_transport::layer::tcp::Handshake;
use ethox_transport::time::{Duration, Expiration, Instant};
use ethox_transport::wire::{tcp_packet, Checksum, IpAddress, TcpRepr, TcpSeqNumber};

const HOST: IpAddress = IpAddress::v4(10, 0, 0, 1);
const PEER: IpAddress = IpAddress::v4(10, 0, 0, 2);
const PEER_ISS: TcpSeqNumber = TcpSeqNumber(0x1000);

#[derive(StructOpt)]
struct Options {
    /// Bytes to transfer.
    size: usize,
    /// Drop every n-th data segment, zero for a perfect link.
    #[structopt(long = "loss", default_value = "0")]
    loss: usize,
    /// The window offered by the peer.
    #[structopt(long = "window", default_value = "16384")]
    window: usize,
    /// One-way delay of the link in milliseconds.
    #[structopt(long = "delay", default_value = "5")]
    delay: i64,
}

/// Collects segments in flight on the link.
struct Link {
    wire: Mutex<VecDeque<(Route, Vec<u8>)>>,
}

struct Host;

impl Network for Link {
    fn route_to_destination(&self, destination: IpAddress, scope: u32) -> Option<Route> {
        Some(Route {
            destination,
            scope,
            source: HOST,
            interface: InterfaceId(1),
            mtu: 1500,
            generation: 0,
        })
    }

    fn validate_route(&self, route: &Route) -> Option<Route> {
        Some(route.clone())
    }

    fn send_packet(&self, route: &Route, packet: OutPacket, completion: Completion<()>) {
        self.wire.lock().push_back((route.clone(), packet.to_vec()));
        completion.complete(Ok(()));
    }
}

impl Interfaces for Host {
    fn find_local_address_owner(&self, address: IpAddress, _: u32) -> Option<InterfaceId> {
        if address == HOST {
            Some(InterfaceId(1))
        } else {
            None
        }
    }

    fn find_interface_by_index(&self, id: InterfaceId) -> Option<Interface> {
        Some(Interface { id, mtu: 1500, multicast: false })
    }
}

/// The receiving side, reduced to in-order reassembly.
struct Peer {
    expected: TcpSeqNumber,
    received: usize,
    data_segments: usize,
    dropped: usize,
    fin: bool,
}

fn main() {
    env_logger::init();
    let options = Options::from_args();

    let link = Arc::new(Link { wire: Mutex::new(VecDeque::new()) });
    let config = Config::default().with_time_wait(Duration::from_secs(1));
    let stack = Stack::new(config, link.clone(), Arc::new(Host));

    let endpoint = stack.open_endpoint(Open::stream(HOST, 0))
        .expect("Couldn't open the endpoint");
    let mut now = Instant::from_millis(0);
    let connection = stack.connect(&endpoint, PEER, 80, now, Completion::ignore())
        .expect("Couldn't start the connection");

    let mut queued = 0;
    let mut peer = Peer {
        expected: PEER_ISS,
        received: 0,
        data_segments: 0,
        dropped: 0,
        fin: false,
    };
    let mut established = false;
    let mut closing = false;
    let step = Duration::from_millis(options.delay as u64);

    while stack.tcp().connections() > 0 {
        let segments: Vec<_> = link.wire.lock().drain(..).collect();
        now += step;

        let mut ack = None;
        for (route, bytes) in segments {
            let segment = tcp_packet::new_checked(&bytes).expect("Truncated segment");
            let checksum = Checksum::Manual { src_addr: route.source, dst_addr: route.destination };
            let repr = TcpRepr::parse(segment, checksum).expect("Invalid segment");
            let len = segment.payload_slice().len();

            if repr.flags.syn() {
                if established {
                    continue;
                }
                let handshake = Handshake {
                    seq: PEER_ISS,
                    window: options.window,
                    max_seg_size: Some(1460),
                };
                stack.established(connection, handshake, now).expect("Handshake failed");
                peer.expected = repr.seq_number + 1;
                established = true;
                continue;
            }

            if len > 0 {
                peer.data_segments += 1;
                if options.loss > 0 && peer.data_segments % options.loss == 0 {
                    peer.dropped += 1;
                    continue;
                }
            }

            if repr.seq_number == peer.expected {
                peer.expected += len;
                peer.received += len;
                if repr.flags.fin() {
                    peer.expected += 1;
                    peer.fin = true;
                }
            }
            ack = Some(peer.expected);
        }

        if let Some(ack) = ack {
            if stack.acknowledge(connection, ack, options.window, now).is_err() {
                // The connection may already be gone after the last acknowledgement.
                break;
            }
        }

        if established && !closing {
            // Feed the stack in chunks so that several requests are in flight.
            let chunk = (options.size - queued).min(8192);
            if chunk > 0 {
                queued += chunk;
                let data: Arc<[u8]> = vec![0x5a_u8; chunk].into();
                let _ = stack.send(connection, data, false, now, Completion::ignore());
            } else {
                closing = true;
                let _ = stack.close_connection(connection, now, Completion::ignore());
            }
        }

        if peer.fin {
            let _ = stack.remote_closed(connection, now);
            peer.fin = false;
        }

        if let Expiration::When(deadline) = stack.poll_timers(now) {
            if deadline > now + Duration::from_secs(30) {
                break;
            }
        }
    }

    let stats = stack.statistics().snapshot();
    println!("received {} of {} bytes in {}", peer.received, options.size, now);
    println!("{} segments sent, {} retransmitted, {} dropped by the link",
        stats.segments_sent, stats.segments_retransmitted, peer.dropped);
}
