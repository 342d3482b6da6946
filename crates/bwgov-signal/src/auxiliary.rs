use log::warn;

use bwgov_hal::{AuxReading, MetricsSource};

/// Readings assumed when the metrics backend cannot answer.
/// Must sit above any configured upper threshold.
pub const FALLBACK_READING: AuxReading = AuxReading { jitter_ms: 50.0, p_latency_ms: 100.0 };

/// A metrics source that never fails: errors degrade to a fixed fallback.
pub struct AuxiliarySignal {
    source: Box<dyn MetricsSource>,
    fallback: AuxReading,
    failures: u64,
}

impl AuxiliarySignal {
    pub fn new(source: Box<dyn MetricsSource>) -> Self {
        Self::with_fallback(source, FALLBACK_READING)
    }

    pub fn with_fallback(source: Box<dyn MetricsSource>, fallback: AuxReading) -> Self {
        Self { source, fallback, failures: 0 }
    }

    pub fn read(&mut self) -> AuxReading {
        match self.source.fetch() {
            Ok(r) => {
                self.failures = 0;
                AuxReading { jitter_ms: r.jitter_ms.max(0.0), p_latency_ms: r.p_latency_ms.max(0.0) }
            }
            Err(e) => {
                self.failures += 1;
                warn!("aux metrics: {} (using fallback, {} consecutive failures)", e, self.failures);
                self.fallback
            }
        }
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.failures
    }
}
