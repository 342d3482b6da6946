use std::time::Duration;

use log::{error, info, warn};
use rand::Rng;

use bwgov_core::{BandwidthDecision, EnforceConfig, WorkloadRef};
use bwgov_hal::{PatchError, WorkloadPatcher};

use crate::annotation::{format_mbps, parse_mbps};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementOutcome {
    /// Every target carries the new value.
    Applied,
    /// The decision did not ask for actuation.
    Held,
    /// A patch already went out within `min_patch_interval`.
    RateLimited,
    /// Some targets carry the new value; the rest failed and were logged.
    Partial,
    /// No target could be patched. The next tick retries.
    Failed,
}

impl EnforcementOutcome {
    /// Whether any workload now carries the decided value.
    pub fn carried(&self) -> bool {
        matches!(self, EnforcementOutcome::Applied | EnforcementOutcome::Partial)
    }
}

/// Writes bandwidth decisions onto the best-effort workloads.
pub struct EnforcementAdapter {
    patcher: Box<dyn WorkloadPatcher>,
    targets: Vec<WorkloadRef>,
    key: String,
    min_interval_us: u64,
    retry: RetryPolicy,
    last_patch_us: Option<u64>,
}

impl EnforcementAdapter {
    pub fn new(cfg: &EnforceConfig, patcher: Box<dyn WorkloadPatcher>) -> Self {
        Self {
            patcher,
            targets: cfg.targets.clone(),
            key: cfg.annotation_key.clone(),
            min_interval_us: cfg.min_patch_interval.as_micros() as u64,
            retry: RetryPolicy { attempts: cfg.patch_attempts.max(1), base: cfg.backoff_base },
            last_patch_us: None,
        }
    }

    pub fn targets(&self) -> &[WorkloadRef] {
        &self.targets
    }

    /// Bandwidth currently annotated on the first target, if readable.
    pub fn read_current(&mut self) -> Option<u64> {
        let target = self.targets.first()?.clone();
        match self.patcher.read_annotation(&target, &self.key) {
            Ok(Some(v)) => {
                let parsed = parse_mbps(&v);
                if parsed.is_none() {
                    warn!("{}: unparseable {}='{}'", target, self.key, v);
                }
                parsed
            }
            Ok(None) => None,
            Err(e) => {
                warn!("{}: cannot read {}: {}", target, self.key, e);
                None
            }
        }
    }

    fn rate_limited(&self, now_us: u64) -> bool {
        self.last_patch_us
            .map_or(false, |last| now_us.saturating_sub(last) < self.min_interval_us)
    }

    pub fn apply(&mut self, decision: &BandwidthDecision, now_us: u64) -> EnforcementOutcome {
        if !decision.apply {
            return EnforcementOutcome::Held;
        }
        if self.rate_limited(now_us) {
            info!("patch to {}M suppressed: min patch interval not elapsed", decision.target_mbps);
            return EnforcementOutcome::RateLimited;
        }

        let value = format_mbps(decision.target_mbps);
        let mut failed = Vec::new();
        for target in &self.targets {
            match patch_with_retry(&mut *self.patcher, self.retry, target, &self.key, &value) {
                Ok(()) => info!(
                    "{}: {}M -> {} ({:?})",
                    target, decision.previous_mbps, value, decision.cause
                ),
                Err(e) => {
                    error!("{}: giving up on {}={}: {}", target, self.key, value, e);
                    failed.push(target.to_string());
                }
            }
        }

        if failed.len() == self.targets.len() {
            return EnforcementOutcome::Failed;
        }
        self.last_patch_us = Some(now_us);
        if failed.is_empty() {
            EnforcementOutcome::Applied
        } else {
            warn!(
                "{} of {} targets not patched: {}",
                failed.len(),
                self.targets.len(),
                failed.join(", ")
            );
            EnforcementOutcome::Partial
        }
    }
}

#[derive(Clone, Copy)]
struct RetryPolicy {
    attempts: u32,
    base: Duration,
}

impl RetryPolicy {
    /// `base * 2^attempt` plus up to 25% random jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base.saturating_mul(1u32 << attempt.min(16));
        let spread = (base.as_micros() / 4) as u64;
        let jitter = if spread == 0 { 0 } else { rand::thread_rng().gen_range(0..=spread) };
        base + Duration::from_micros(jitter)
    }
}

/// Retries on `Conflict` only; other errors fail at once.
fn patch_with_retry(
    patcher: &mut dyn WorkloadPatcher,
    policy: RetryPolicy,
    target: &WorkloadRef,
    key: &str,
    value: &str,
) -> Result<(), PatchError> {
    let mut attempt = 0;
    loop {
        match patcher.patch_annotation(target, key, value) {
            Ok(()) => return Ok(()),
            Err(PatchError::Conflict) if attempt + 1 < policy.attempts => {
                let wait = policy.backoff(attempt);
                warn!(
                    "{}: conflict on attempt {}/{}, retrying in {:?}",
                    target, attempt + 1, policy.attempts, wait
                );
                std::thread::sleep(wait);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
