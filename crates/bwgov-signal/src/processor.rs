use log::debug;

use bwgov_core::{Protocol, Signal, SignalConfig, SignalSnapshot};
use bwgov_hal::AuxReading;

use crate::ewma::Ewma;
use crate::stats::protocol_stats;
use crate::window::ProbeWindows;

/// Turns the probe windows into one smoothed congestion indicator.
/// Owns the EWMA accumulators; everything else is recomputed per tick.
pub struct SignalProcessor {
    percentile: f64,
    health_floor: f64,
    jitter: Ewma,
    latency: Ewma,
}

impl SignalProcessor {
    pub fn new(cfg: &SignalConfig) -> Self {
        Self {
            percentile: cfg.percentile,
            health_floor: cfg.health_floor,
            jitter: Ewma::new(cfg.ewma_alpha),
            latency: Ewma::new(cfg.ewma_alpha),
        }
    }

    /// Returns `None` until both windows hold at least one sample.
    ///
    /// The snapshot is `Unreliable` when the worst window's health is below the
    /// floor or no protocol produced an `ok` sample. Unreliable snapshots do not
    /// feed the smoothers.
    pub fn process(&mut self, windows: &ProbeWindows, aux: Option<AuxReading>) -> Option<Signal> {
        let udp = protocol_stats(windows.get(Protocol::Connectionless), self.percentile)?;
        let tcp = protocol_stats(windows.get(Protocol::ConnectionOriented), self.percentile)?;

        let measured: Vec<_> = [udp, tcp].into_iter().filter(|s| s.ok > 0).collect();
        let jitter_ms = measured.iter().map(|s| s.jitter_ms).fold(0.0, f64::max);
        let probe_latency = measured.iter().map(|s| s.p_latency_ms).fold(0.0, f64::max);

        // Worst of both transports, never an average.
        let mut combined_ms = measured.iter().map(|s| s.jitter_ms).reduce(f64::max);
        let mut p_latency_ms = probe_latency;
        if let Some(a) = aux {
            combined_ms = Some(combined_ms.map_or(a.jitter_ms, |c| c.max(a.jitter_ms)));
            p_latency_ms = p_latency_ms.max(a.p_latency_ms);
        }

        let sample_health = udp.health().min(tcp.health());
        let reliable = sample_health >= self.health_floor && combined_ms.is_some();

        let (smoothed_ms, smoothed_latency_ms) = match combined_ms {
            Some(c) if reliable => (self.jitter.update(c), self.latency.update(p_latency_ms)),
            _ => (
                self.jitter.value().unwrap_or(0.0),
                self.latency.value().unwrap_or(0.0),
            ),
        };

        let snapshot = SignalSnapshot {
            jitter_ms,
            p_latency_ms,
            combined_ms,
            smoothed_ms,
            smoothed_latency_ms,
            sample_health,
            connectionless: Some(udp),
            connection_oriented: Some(tcp),
        };

        debug!(
            "signal: udp j={:.3}ms ok={}/{} | tcp j={:.3}ms ok={}/{} | combined={:?} smoothed={:.3}ms health={:.2}",
            udp.jitter_ms, udp.ok, udp.total, tcp.jitter_ms, tcp.ok, tcp.total,
            combined_ms, smoothed_ms, sample_health
        );

        Some(if reliable { Signal::Reliable(snapshot) } else { Signal::Unreliable(snapshot) })
    }
}
