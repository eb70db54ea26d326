use core::ops::RangeInclusive;

use crate::time::Duration;

/// Tunables of a stack instance, supplied once at initialization.
///
/// The defaults follow RFC 6298 for retransmission timing, RFC 1122 for delayed acknowledgements
/// and keepalive, and RFC 6335 for the ephemeral port range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Ports assigned to endpoints opened without a port.
    pub ephemeral_ports: RangeInclusive<u16>,

    /// Number of hash buckets of the endpoint table.
    pub endpoint_buckets: usize,

    /// Hop limit of packets from endpoints that did not set one.
    pub default_hop_limit: u8,

    /// Maximum number of concurrently existing connections.
    pub max_connections: usize,

    /// Maximum number of send requests queued on all connections together.
    pub max_send_requests: usize,

    /// Bytes available for headers and copied payload of segments in flight to the network layer.
    ///
    /// Segment construction fails, and is retried from the retransmit timer, once this is used up.
    pub segment_buffer_budget: usize,

    /// The receive window advertised to peers.
    pub receive_window: usize,

    /// Upper bound on the segment size, also advertised in the MSS option.
    pub max_segment_size: usize,

    /// Segment size assumed when the peer sent no MSS option.
    pub default_peer_mss: usize,

    /// Retransmission timeout before the first round-trip sample.
    pub rto_initial: Duration,

    /// Lower bound of the retransmission timeout.
    pub rto_min: Duration,

    /// Upper bound of the retransmission timeout.
    pub rto_max: Duration,

    /// Factor applied to the retransmission timeout on every expiry.
    pub rto_backoff: u32,

    /// Retransmissions of data or FIN before the connection is aborted.
    pub max_data_retransmits: u32,

    /// Retransmissions of SYN or SYN-ACK before the connection attempt is aborted.
    pub max_syn_retransmits: u32,

    /// Delay of a segment smaller than the silly window threshold.
    pub silly_window_timeout: Duration,

    /// Maximum delay of an acknowledgement for received data.
    pub delayed_ack_timeout: Duration,

    /// Idle time before the first keepalive probe.
    pub keepalive_idle: Duration,

    /// Time between unanswered keepalive probes.
    pub keepalive_interval: Duration,

    /// Unanswered keepalive probes before the connection is aborted.
    pub keepalive_probes: u32,

    /// Time a connection lingers in TIME-WAIT, twice the maximum segment lifetime.
    pub time_wait: Duration,

    /// Time a soft network error must persist before it is reported.
    pub soft_error_timeout: Duration,

    /// Whether new connections delay small segments while data is unacknowledged.
    pub nagle: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ephemeral_ports: 49152..=65535,
            endpoint_buckets: 64,
            default_hop_limit: 64,
            max_connections: 1024,
            max_send_requests: 4096,
            segment_buffer_budget: 4 << 20,
            receive_window: 65535,
            max_segment_size: 1460,
            default_peer_mss: 536,
            rto_initial: Duration::from_secs(1),
            rto_min: Duration::from_millis(200),
            rto_max: Duration::from_secs(60),
            rto_backoff: 2,
            max_data_retransmits: 8,
            max_syn_retransmits: 4,
            silly_window_timeout: Duration::from_millis(200),
            delayed_ack_timeout: Duration::from_millis(200),
            keepalive_idle: Duration::from_secs(2 * 60 * 60),
            keepalive_interval: Duration::from_secs(75),
            keepalive_probes: 9,
            time_wait: Duration::from_secs(60),
            soft_error_timeout: Duration::from_secs(10),
            nagle: true,
        }
    }
}

impl Config {
    /// Use another ephemeral port range.
    pub fn with_ephemeral_ports(self, ephemeral_ports: RangeInclusive<u16>) -> Self {
        Config { ephemeral_ports, ..self }
    }

    /// Use another number of hash buckets.
    pub fn with_endpoint_buckets(self, endpoint_buckets: usize) -> Self {
        Config { endpoint_buckets: endpoint_buckets.max(1), ..self }
    }

    /// Limit the number of connections.
    pub fn with_max_connections(self, max_connections: usize) -> Self {
        Config { max_connections, ..self }
    }

    /// Limit the number of queued send requests.
    pub fn with_max_send_requests(self, max_send_requests: usize) -> Self {
        Config { max_send_requests, ..self }
    }

    /// Limit the buffer space of segments in flight.
    pub fn with_segment_buffer_budget(self, segment_buffer_budget: usize) -> Self {
        Config { segment_buffer_budget, ..self }
    }

    /// Use another upper bound on segment sizes.
    pub fn with_max_segment_size(self, max_segment_size: usize) -> Self {
        Config { max_segment_size, ..self }
    }

    /// Advertise another receive window.
    pub fn with_receive_window(self, receive_window: usize) -> Self {
        Config { receive_window, ..self }
    }

    /// Use other retransmission timeouts.
    pub fn with_rto(self, initial: Duration, min: Duration, max: Duration) -> Self {
        Config { rto_initial: initial, rto_min: min, rto_max: max, ..self }
    }

    /// Use other retransmission limits.
    pub fn with_retransmit_limits(self, data: u32, syn: u32) -> Self {
        Config { max_data_retransmits: data, max_syn_retransmits: syn, ..self }
    }

    /// Use another soft error escalation timeout.
    pub fn with_soft_error_timeout(self, soft_error_timeout: Duration) -> Self {
        Config { soft_error_timeout, ..self }
    }

    /// Use another TIME-WAIT duration.
    pub fn with_time_wait(self, time_wait: Duration) -> Self {
        Config { time_wait, ..self }
    }

    /// Enable or disable the batching of small segments on new connections.
    pub fn with_nagle(self, nagle: bool) -> Self {
        Config { nagle, ..self }
    }

    /// The number of ports in the ephemeral range.
    pub fn ephemeral_range_len(&self) -> usize {
        let (first, last) = (*self.ephemeral_ports.start(), *self.ephemeral_ports.end());
        if first == 0 || last < first {
            0
        } else {
            usize::from(last - first) + 1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder() {
        let config = Config::default()
            .with_ephemeral_ports(5000..=5002)
            .with_endpoint_buckets(0)
            .with_nagle(false);
        assert_eq!(config.ephemeral_range_len(), 3);
        assert_eq!(config.endpoint_buckets, 1);
        assert!(!config.nagle);
        assert_eq!(config.rto_initial, Duration::from_secs(1));
    }

    #[test]
    fn empty_port_range() {
        let config = Config::default().with_ephemeral_ports(10..=9);
        assert_eq!(config.ephemeral_range_len(), 0);
        // Port zero is never assignable.
        let config = Config::default().with_ephemeral_ports(0..=9);
        assert_eq!(config.ephemeral_range_len(), 0);
    }
}
