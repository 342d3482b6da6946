use std::collections::VecDeque;
use std::time::Duration;

use bwgov_core::{ProbeSample, Protocol, SignalConfig};

/// Bounded, insertion-ordered ring of samples for one protocol.
/// The oldest sample is dropped once `capacity` is reached.
#[derive(Debug, Clone)]
pub struct ProbeWindow {
    capacity: usize,
    max_age_us: Option<u64>,
    samples: VecDeque<ProbeSample>,
}

impl ProbeWindow {
    pub fn new(capacity: usize, max_age: Option<Duration>) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            max_age_us: max_age.map(|d| d.as_micros() as u64),
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, sample: ProbeSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Drops samples older than the configured age. No-op for count-only windows.
    pub fn evict_expired(&mut self, now_us: u64) {
        let Some(max_age) = self.max_age_us else { return };
        while let Some(front) = self.samples.front() {
            if now_us.saturating_sub(front.timestamp_us) > max_age {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Latencies of `ok` samples, in insertion order.
    pub fn ok_latencies(&self) -> Vec<f64> {
        self.samples.iter().filter_map(|s| s.round_trip_ms).collect()
    }
}

/// The two per-protocol windows. Only the signal path reads them.
#[derive(Debug, Clone)]
pub struct ProbeWindows {
    connectionless: ProbeWindow,
    connection_oriented: ProbeWindow,
}

impl ProbeWindows {
    pub fn new(capacity: usize, max_age: Option<Duration>) -> Self {
        Self {
            connectionless: ProbeWindow::new(capacity, max_age),
            connection_oriented: ProbeWindow::new(capacity, max_age),
        }
    }

    pub fn from_config(cfg: &SignalConfig) -> Self {
        Self::new(cfg.window_capacity, cfg.max_sample_age)
    }

    /// Routes a sample to its protocol's window.
    pub fn push(&mut self, sample: ProbeSample) {
        self.get_mut(sample.protocol).push(sample);
    }

    pub fn get(&self, protocol: Protocol) -> &ProbeWindow {
        match protocol {
            Protocol::Connectionless => &self.connectionless,
            Protocol::ConnectionOriented => &self.connection_oriented,
        }
    }

    pub fn get_mut(&mut self, protocol: Protocol) -> &mut ProbeWindow {
        match protocol {
            Protocol::Connectionless => &mut self.connectionless,
            Protocol::ConnectionOriented => &mut self.connection_oriented,
        }
    }

    pub fn evict_expired(&mut self, now_us: u64) {
        self.connectionless.evict_expired(now_us);
        self.connection_oriented.evict_expired(now_us);
    }
}
