#![forbid(unsafe_code)]

pub mod config;

pub use config::{
    ControlConfig, DecreasePolicy, EnforceConfig, GovernorConfig, ProbeConfig, SignalConfig,
    WorkloadRef,
};

/// Transport a probe measures over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    /// Timestamped datagram reflected by the echo responder.
    Connectionless,
    /// Fresh stream handshake against the service port.
    ConnectionOriented,
}

impl Protocol {
    pub const ALL: [Protocol; 2] = [Protocol::Connectionless, Protocol::ConnectionOriented];

    pub fn label(&self) -> &'static str {
        match self {
            Protocol::Connectionless => "udp",
            Protocol::ConnectionOriented => "tcp",
        }
    }
}

impl core::fmt::Display for Protocol {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Timeout,
    Error,
}

/// One probe attempt. Failed attempts carry no latency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeSample {
    pub protocol: Protocol,
    pub timestamp_us: u64,
    pub round_trip_ms: Option<f64>,
    pub outcome: Outcome,
}

impl ProbeSample {
    pub fn ok(protocol: Protocol, timestamp_us: u64, round_trip_ms: f64) -> Self {
        Self {
            protocol,
            timestamp_us,
            // Clock skew between send and receive never yields negative latency.
            round_trip_ms: Some(round_trip_ms.max(0.0)),
            outcome: Outcome::Ok,
        }
    }

    pub fn timeout(protocol: Protocol, timestamp_us: u64) -> Self {
        Self { protocol, timestamp_us, round_trip_ms: None, outcome: Outcome::Timeout }
    }

    pub fn error(protocol: Protocol, timestamp_us: u64) -> Self {
        Self { protocol, timestamp_us, round_trip_ms: None, outcome: Outcome::Error }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome == Outcome::Ok
    }
}

/// Per-protocol statistics over one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProtocolStats {
    pub jitter_ms: f64,
    pub p_latency_ms: f64,
    pub ok: usize,
    pub total: usize,
}

impl ProtocolStats {
    pub fn health(&self) -> f64 {
        if self.total == 0 { 0.0 } else { self.ok as f64 / self.total as f64 }
    }
}

/// Derived congestion indicator for one control tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalSnapshot {
    /// Worst per-protocol IQR.
    pub jitter_ms: f64,
    /// Worst per-protocol high percentile.
    pub p_latency_ms: f64,
    /// Pairwise max of the representative values, `None` if no protocol had an ok sample.
    pub combined_ms: Option<f64>,
    pub smoothed_ms: f64,
    pub smoothed_latency_ms: f64,
    /// Lowest ok/total ratio across the windows.
    pub sample_health: f64,
    pub connectionless: Option<ProtocolStats>,
    pub connection_oriented: Option<ProtocolStats>,
}

/// A snapshot tagged with whether the controller may trust it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Signal {
    Reliable(SignalSnapshot),
    /// Health below the floor. The controller must fail safe.
    Unreliable(SignalSnapshot),
}

impl Signal {
    pub fn snapshot(&self) -> &SignalSnapshot {
        match self {
            Signal::Reliable(s) | Signal::Unreliable(s) => s,
        }
    }

    pub fn is_reliable(&self) -> bool {
        matches!(self, Signal::Reliable(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Stable,
    Congested,
    Recovering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Increase,
    Decrease,
    Hold,
}

/// What drove the controller's target computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    NoSignal,
    Unreliable,
    AboveUpper,
    BelowLower,
    DeadBand,
    LatencyCeiling,
}

/// Why a decision is or is not actuated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Open,
    Cooldown,
    BelowThreshold,
}

/// Output of one control tick. Consumed once by the enforcement adapter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandwidthDecision {
    pub previous_mbps: u64,
    pub target_mbps: u64,
    pub action: Action,
    pub mode: Mode,
    pub cause: Cause,
    pub gate: Gate,
    pub apply: bool,
}

impl BandwidthDecision {
    pub fn delta_mbps(&self) -> u64 {
        self.target_mbps.abs_diff(self.previous_mbps)
    }
}

pub type BwResult<T> = Result<T, BwError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BwError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("cannot resolve {0}")]
    Resolve(String),
}
