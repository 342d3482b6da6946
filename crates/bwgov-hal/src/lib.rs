#![forbid(unsafe_code)]

use bwgov_core::{ProbeSample, Protocol, WorkloadRef};

/// Monotonic time source, microseconds since an arbitrary origin.
pub trait Clock: Send + Sync {
    fn now_us(&self) -> u64;
}

/// One way of measuring the path.
/// INVARIANT: `measure` returns within the probe timeout and never fails;
/// errors and timeouts become samples.
pub trait Probe: Send {
    fn protocol(&self) -> Protocol;

    fn measure(&mut self, clock: &dyn Clock) -> ProbeSample;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    /// Concurrent modification. Safe to retry.
    #[error("conflict: object was modified concurrently")]
    Conflict,
    #[error("workload not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Failed(String),
}

/// The orchestration platform's workload API.
pub trait WorkloadPatcher: Send {
    fn patch_annotation(
        &mut self,
        target: &WorkloadRef,
        key: &str,
        value: &str,
    ) -> Result<(), PatchError>;

    /// Current annotation value, `None` when unset.
    fn read_annotation(&mut self, target: &WorkloadRef, key: &str)
        -> Result<Option<String>, PatchError>;
}

/// Scalar readings from a pull-based metrics backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuxReading {
    pub jitter_ms: f64,
    pub p_latency_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("metrics source unavailable: {0}")]
    Unavailable(String),
    #[error("malformed metrics response: {0}")]
    Malformed(String),
}

pub trait MetricsSource: Send {
    fn fetch(&mut self) -> Result<AuxReading, SourceError>;
}
