use crate::stack::Config;
use crate::time::Duration;

/// Round-trip time estimation and retransmission timeout, RFC 6298.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RttEstimator {
    /// Smoothed round-trip time, `None` before the first sample.
    srtt: Option<Duration>,
    rttvar: Duration,
    rto: Duration,
    min: Duration,
    max: Duration,
    backoff: u32,
}

/// Clock granularity `G`.
const GRANULARITY: Duration = Duration::from_millis(1);

impl RttEstimator {
    /// An estimator before any measurement.
    pub fn new(config: &Config) -> Self {
        RttEstimator {
            srtt: None,
            rttvar: Duration::from_millis(0),
            rto: config.rto_initial.min(config.rto_max),
            min: config.rto_min,
            max: config.rto_max,
            backoff: config.rto_backoff.max(1),
        }
    }

    /// The current retransmission timeout.
    pub fn rto(&self) -> Duration {
        self.rto
    }

    /// The smoothed round-trip time, if measured.
    pub fn srtt(&self) -> Option<Duration> {
        self.srtt
    }

    /// Update the estimate with a measured round trip.
    ///
    /// Samples must not come from retransmitted segments (Karn's algorithm).
    pub fn sample(&mut self, rtt: Duration) {
        let (srtt, rttvar) = match self.srtt {
            None => (rtt, rtt / 2),
            Some(srtt) => {
                let delta = if srtt > rtt { srtt - rtt } else { rtt - srtt };
                let rttvar = (self.rttvar * 3 + delta) / 4;
                let srtt = (srtt * 7 + rtt) / 8;
                (srtt, rttvar)
            },
        };

        self.srtt = Some(srtt);
        self.rttvar = rttvar;
        let rto = srtt + GRANULARITY.max(rttvar * 4);
        self.rto = rto.max(self.min).min(self.max);
    }

    /// Back off the timer after an expiry.
    pub fn back_off(&mut self) {
        self.rto = (self.rto * self.backoff).min(self.max);
    }
}
