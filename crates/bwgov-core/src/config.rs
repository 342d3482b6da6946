use std::time::Duration;

use crate::{BwError, BwResult};

/// Where the probes aim. Hostnames are resolved per probe attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    pub udp_host: String,
    pub udp_port: u16,
    pub tcp_host: String,
    pub tcp_port: u16,
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            udp_host: "robot-control-svc.default.svc.cluster.local".to_string(),
            udp_port: 5201,
            tcp_host: "safety-scanner-svc.default.svc.cluster.local".to_string(),
            tcp_port: 5202,
            interval: Duration::from_millis(500),
            timeout: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalConfig {
    pub window_capacity: usize,
    /// Samples older than this are evicted on read. `None` keeps count-only bounds.
    pub max_sample_age: Option<Duration>,
    /// High percentile in (0, 1), e.g. 0.95.
    pub percentile: f64,
    pub ewma_alpha: f64,
    /// Below this ok/total ratio the signal is unreliable.
    pub health_floor: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            window_capacity: 60,
            max_sample_age: Some(Duration::from_secs(60)),
            percentile: 0.95,
            ewma_alpha: 0.7,
            health_floor: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecreasePolicy {
    /// Subtract a fixed number of Mbps.
    Step(u64),
    /// Keep this fraction of the current bandwidth, e.g. 0.8 for a 20% cut.
    Multiplicative(f64),
}

impl DecreasePolicy {
    pub fn apply(&self, current_mbps: u64) -> u64 {
        match *self {
            DecreasePolicy::Step(step) => current_mbps.saturating_sub(step),
            DecreasePolicy::Multiplicative(keep) => (current_mbps as f64 * keep).floor() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlConfig {
    pub interval: Duration,
    pub lower_threshold_ms: f64,
    pub upper_threshold_ms: f64,
    pub increase_step_mbps: u64,
    pub decrease: DecreasePolicy,
    pub min_bandwidth_mbps: u64,
    pub max_bandwidth_mbps: u64,
    pub initial_bandwidth_mbps: u64,
    pub min_update_threshold_mbps: u64,
    pub cooldown: Duration,
    /// Smoothed p-latency above this triggers a gentle decrease. Disabled when `None`.
    pub latency_ceiling_ms: Option<f64>,
    pub gentle_decrease_mbps: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            lower_threshold_ms: 1.0,
            upper_threshold_ms: 2.0,
            increase_step_mbps: 10,
            decrease: DecreasePolicy::Step(100),
            min_bandwidth_mbps: 10,
            max_bandwidth_mbps: 1000,
            initial_bandwidth_mbps: 100,
            min_update_threshold_mbps: 5,
            cooldown: Duration::from_secs(30),
            latency_ceiling_ms: None,
            gentle_decrease_mbps: 20,
        }
    }
}

/// A best-effort workload whose egress cap gets patched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadRef {
    pub namespace: String,
    pub name: String,
}

impl WorkloadRef {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self { namespace: namespace.to_string(), name: name.to_string() }
    }

    /// Parses `namespace/name`, or a bare `name` in `default`.
    pub fn parse(raw: &str) -> BwResult<Self> {
        let (ns, name) = match raw.split_once('/') {
            Some((ns, name)) => (ns, name),
            None => ("default", raw),
        };
        if ns.is_empty() || name.is_empty() || name.contains('/') {
            return Err(BwError::InvalidConfig(format!("bad workload reference '{}'", raw)));
        }
        Ok(Self::new(ns, name))
    }
}

impl core::fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnforceConfig {
    pub targets: Vec<WorkloadRef>,
    pub annotation_key: String,
    pub min_patch_interval: Duration,
    pub patch_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for EnforceConfig {
    fn default() -> Self {
        Self {
            targets: vec![WorkloadRef::new("default", "telemetry-upload-deployment")],
            annotation_key: "kubernetes.io/egress-bandwidth".to_string(),
            min_patch_interval: Duration::from_secs(10),
            patch_attempts: 3,
            backoff_base: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GovernorConfig {
    pub probe: ProbeConfig,
    pub signal: SignalConfig,
    pub control: ControlConfig,
    pub enforce: EnforceConfig,
}

fn reject(msg: &str) -> BwResult<()> {
    Err(BwError::InvalidConfig(msg.to_string()))
}

impl GovernorConfig {
    /// Rejects configurations that would make the loop oscillate or misbehave.
    /// Called once at startup; nothing is re-checked at tick time.
    pub fn validate(&self) -> BwResult<()> {
        let p = &self.probe;
        if p.interval.is_zero() || p.timeout.is_zero() {
            return reject("probe interval and timeout must be non-zero");
        }
        if p.timeout > p.interval {
            return reject("probe timeout must not exceed the probe interval");
        }
        if p.udp_host.is_empty() || p.tcp_host.is_empty() {
            return reject("probe hosts must be set");
        }

        let s = &self.signal;
        if s.window_capacity == 0 {
            return reject("window capacity must be at least 1");
        }
        if !(s.percentile > 0.0 && s.percentile < 1.0) {
            return reject("percentile must lie in (0, 1)");
        }
        if !(s.ewma_alpha > 0.0 && s.ewma_alpha <= 1.0) {
            return reject("ewma alpha must lie in (0, 1]");
        }
        if !(0.0..=1.0).contains(&s.health_floor) {
            return reject("health floor must lie in [0, 1]");
        }

        let c = &self.control;
        if c.interval.is_zero() {
            return reject("control interval must be non-zero");
        }
        if !(c.lower_threshold_ms >= 0.0 && c.upper_threshold_ms >= 0.0) {
            return reject("thresholds must be non-negative");
        }
        if c.lower_threshold_ms >= c.upper_threshold_ms {
            return reject("lower threshold must be below upper threshold");
        }
        if c.min_bandwidth_mbps >= c.max_bandwidth_mbps {
            return reject("min bandwidth must be below max bandwidth");
        }
        if c.initial_bandwidth_mbps < c.min_bandwidth_mbps
            || c.initial_bandwidth_mbps > c.max_bandwidth_mbps
        {
            return reject("initial bandwidth must lie within [min, max]");
        }
        if c.increase_step_mbps == 0 {
            return reject("increase step must be positive");
        }
        match c.decrease {
            DecreasePolicy::Step(d) if d <= c.increase_step_mbps => {
                return reject("decrease step must exceed the increase step")
            }
            DecreasePolicy::Multiplicative(k) if !(k > 0.0 && k < 1.0) => {
                return reject("multiplicative decrease must keep a fraction in (0, 1)")
            }
            _ => {}
        }
        if let Some(ceiling) = c.latency_ceiling_ms {
            if !(ceiling > 0.0) {
                return reject("latency ceiling must be positive");
            }
            if c.gentle_decrease_mbps == 0 {
                return reject("gentle decrease must be positive when a latency ceiling is set");
            }
        }

        let e = &self.enforce;
        if e.targets.is_empty() {
            return reject("at least one best-effort target is required");
        }
        if e.annotation_key.is_empty() || !e.annotation_key.contains('/') {
            return reject("annotation key must look like '<platform>.io/<name>'");
        }
        if e.patch_attempts == 0 {
            return reject("patch attempts must be at least 1");
        }
        Ok(())
    }
}
