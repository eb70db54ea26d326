use core::sync::atomic::{AtomicU64, Ordering};

/// Event counters of a stack instance.
///
/// Counters are updated without any lock held and may be read while they change.
#[derive(Debug, Default)]
pub struct Statistics {
    pub(crate) active_opens: AtomicU64,
    pub(crate) passive_opens: AtomicU64,
    pub(crate) segments_sent: AtomicU64,
    pub(crate) segments_retransmitted: AtomicU64,
    pub(crate) resets_sent: AtomicU64,
    pub(crate) connections_timed_out: AtomicU64,
    pub(crate) datagrams_sent: AtomicU64,
    pub(crate) datagrams_delivered: AtomicU64,
    pub(crate) datagrams_dropped: AtomicU64,
}

/// Provider-wide information.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProviderInfo {
    /// Connections opened with `connect`.
    pub active_opens: u64,
    /// Connections opened with `accept`.
    pub passive_opens: u64,
    /// Stream segments handed to the network layer.
    pub segments_sent: u64,
    /// Segments which resent sequence space.
    pub segments_retransmitted: u64,
    /// Reset segments sent on abort.
    pub resets_sent: u64,
    /// Connections aborted by a retransmission or keepalive limit.
    pub connections_timed_out: u64,
    /// Datagrams handed to the network layer.
    pub datagrams_sent: u64,
    /// Datagrams delivered to an endpoint.
    pub datagrams_delivered: u64,
    /// Datagrams without a listener or receive.
    pub datagrams_dropped: u64,
    /// Currently allocated connections.
    pub connections: usize,
    /// Currently linked endpoints.
    pub endpoints: usize,
    /// Send requests in the pool.
    pub send_requests: usize,
    /// Bytes of the segment budget in use.
    pub buffer_in_use: usize,
}

impl Statistics {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all counters.
    pub fn snapshot(&self) -> ProviderInfo {
        let read = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        ProviderInfo {
            active_opens: read(&self.active_opens),
            passive_opens: read(&self.passive_opens),
            segments_sent: read(&self.segments_sent),
            segments_retransmitted: read(&self.segments_retransmitted),
            resets_sent: read(&self.resets_sent),
            connections_timed_out: read(&self.connections_timed_out),
            datagrams_sent: read(&self.datagrams_sent),
            datagrams_delivered: read(&self.datagrams_delivered),
            datagrams_dropped: read(&self.datagrams_dropped),
            ..ProviderInfo::default()
        }
    }
}
