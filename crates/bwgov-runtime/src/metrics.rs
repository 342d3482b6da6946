use prometheus::{
    register_gauge_vec_with_registry, register_gauge_with_registry,
    register_int_counter_vec_with_registry, register_int_gauge_vec_with_registry,
    register_int_gauge_with_registry, Gauge, GaugeVec, IntCounterVec, IntGauge, IntGaugeVec,
    Registry,
};

use bwgov_core::{Mode, Outcome, ProbeSample, Protocol};
use bwgov_enforce::EnforcementOutcome;
use bwgov_flow::ControlState;

use crate::TickReport;

const MODES: [Mode; 3] = [Mode::Stable, Mode::Congested, Mode::Recovering];

/// Gauges and counters the governor exports about itself.
pub struct GovernorMetrics {
    /// Last measured round trip per protocol.
    pub round_trip_ms: GaugeVec,
    pub samples: IntCounterVec,
    /// IQR over each protocol window at the last tick.
    pub jitter_ms: GaugeVec,
    pub p_latency_ms: GaugeVec,
    /// ok/total per protocol window.
    pub success_ratio: GaugeVec,
    pub combined_jitter_ms: Gauge,
    pub smoothed_jitter_ms: Gauge,
    pub sample_health: Gauge,
    pub signal_reliable: IntGauge,
    /// One-hot over the controller modes.
    pub mode: IntGaugeVec,
    pub bandwidth_limit_mbps: IntGauge,
    /// -1 until the first enforced change.
    pub seconds_since_change: Gauge,
    pub enforcements: IntCounterVec,
}

impl GovernorMetrics {
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        Ok(Self {
            round_trip_ms: register_gauge_vec_with_registry!(
                "bwgov_round_trip_ms",
                "Last successful round trip in milliseconds",
                &["protocol"],
                registry
            )?,
            samples: register_int_counter_vec_with_registry!(
                "bwgov_samples_total",
                "Measurements taken, by outcome",
                &["protocol", "outcome"],
                registry
            )?,
            jitter_ms: register_gauge_vec_with_registry!(
                "bwgov_jitter_ms",
                "Interquartile range of the round-trip window",
                &["protocol"],
                registry
            )?,
            p_latency_ms: register_gauge_vec_with_registry!(
                "bwgov_p_latency_ms",
                "High percentile of the round-trip window",
                &["protocol"],
                registry
            )?,
            success_ratio: register_gauge_vec_with_registry!(
                "bwgov_success_ratio",
                "Share of ok samples in the window",
                &["protocol"],
                registry
            )?,
            combined_jitter_ms: register_gauge_with_registry!(
                "bwgov_combined_jitter_ms",
                "Worst-of-both jitter fed to the controller",
                registry
            )?,
            smoothed_jitter_ms: register_gauge_with_registry!(
                "bwgov_smoothed_jitter_ms",
                "EWMA of the combined jitter",
                registry
            )?,
            sample_health: register_gauge_with_registry!(
                "bwgov_sample_health",
                "Lowest success ratio across the windows",
                registry
            )?,
            signal_reliable: register_int_gauge_with_registry!(
                "bwgov_signal_reliable",
                "1 when the last signal cleared the health floor",
                registry
            )?,
            mode: register_int_gauge_vec_with_registry!(
                "bwgov_mode",
                "Current controller mode (1 for the active one)",
                &["mode"],
                registry
            )?,
            bandwidth_limit_mbps: register_int_gauge_with_registry!(
                "bwgov_bandwidth_limit_mbps",
                "Bandwidth limit currently held by the controller",
                registry
            )?,
            seconds_since_change: register_gauge_with_registry!(
                "bwgov_seconds_since_change",
                "Time since the bandwidth limit last moved",
                registry
            )?,
            enforcements: register_int_counter_vec_with_registry!(
                "bwgov_enforcement_total",
                "Control ticks by enforcement outcome",
                &["outcome"],
                registry
            )?,
        })
    }

    pub fn observe_sample(&self, sample: &ProbeSample) {
        let protocol = sample.protocol.label();
        self.samples.with_label_values(&[protocol, outcome_label(sample.outcome)]).inc();
        if let Some(rtt) = sample.round_trip_ms {
            self.round_trip_ms.with_label_values(&[protocol]).set(rtt);
        }
    }

    /// `state` is the controller state after the tick committed (or not).
    pub fn observe_tick(&self, report: &TickReport, state: &ControlState) {
        self.bandwidth_limit_mbps.set(state.current_bandwidth_mbps as i64);
        let since = match state.last_decision_us {
            Some(at) => report.now_us.saturating_sub(at) as f64 / 1e6,
            None => -1.0,
        };
        self.seconds_since_change.set(since);
        self.enforcements.with_label_values(&[enforcement_label(report.outcome)]).inc();
        for mode in MODES {
            let active = mode == report.decision.mode;
            self.mode.with_label_values(&[mode_label(mode)]).set(active as i64);
        }

        let Some(signal) = &report.signal else { return };
        let s = signal.snapshot();
        self.signal_reliable.set(signal.is_reliable() as i64);
        self.smoothed_jitter_ms.set(s.smoothed_ms);
        self.sample_health.set(s.sample_health);
        if let Some(combined) = s.combined_ms {
            self.combined_jitter_ms.set(combined);
        }

        let per_protocol = [
            (Protocol::Connectionless, s.connectionless),
            (Protocol::ConnectionOriented, s.connection_oriented),
        ];
        for (protocol, stats) in per_protocol {
            let Some(stats) = stats else { continue };
            let label = [protocol.label()];
            self.success_ratio.with_label_values(&label).set(stats.health());
            // Jitter and percentile are meaningless without an ok sample.
            if stats.ok > 0 {
                self.jitter_ms.with_label_values(&label).set(stats.jitter_ms);
                self.p_latency_ms.with_label_values(&label).set(stats.p_latency_ms);
            }
        }
    }
}

fn outcome_label(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Ok => "ok",
        Outcome::Timeout => "timeout",
        Outcome::Error => "error",
    }
}

fn mode_label(mode: Mode) -> &'static str {
    match mode {
        Mode::Stable => "stable",
        Mode::Congested => "congested",
        Mode::Recovering => "recovering",
    }
}

fn enforcement_label(outcome: EnforcementOutcome) -> &'static str {
    match outcome {
        EnforcementOutcome::Applied => "applied",
        EnforcementOutcome::Held => "held",
        EnforcementOutcome::RateLimited => "rate_limited",
        EnforcementOutcome::Partial => "partial",
        EnforcementOutcome::Failed => "failed",
    }
}
