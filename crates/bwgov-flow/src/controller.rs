use log::{debug, info};

use bwgov_core::{
    Action, BandwidthDecision, Cause, ControlConfig, DecreasePolicy, Gate, Mode, Signal,
};

/// Controller memory carried across ticks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlState {
    pub current_bandwidth_mbps: u64,
    pub mode: Mode,
    pub last_decision_us: Option<u64>,
    pub cooldown_until_us: Option<u64>,
}

/// Asymmetric AIMD with a dead-band, a post-decrease cooldown and an apply gate.
///
/// `tick` computes a decision; `commit` moves the state once the decision
/// has actually been enforced. Ticks must be serialized by the caller.
pub struct AdaptiveController {
    lower_ms: f64,
    upper_ms: f64,
    increase_step: u64,
    decrease: DecreasePolicy,
    min_mbps: u64,
    max_mbps: u64,
    min_update: u64,
    cooldown_us: u64,
    latency_ceiling_ms: Option<f64>,
    gentle_decrease: u64,
    state: ControlState,
}

impl AdaptiveController {
    /// Expects a config that already passed `GovernorConfig::validate`.
    pub fn new(cfg: &ControlConfig) -> Self {
        Self::with_bandwidth(cfg, cfg.initial_bandwidth_mbps)
    }

    /// Starts from an observed bandwidth, clamped into `[min, max]`.
    pub fn with_bandwidth(cfg: &ControlConfig, start_mbps: u64) -> Self {
        Self {
            lower_ms: cfg.lower_threshold_ms,
            upper_ms: cfg.upper_threshold_ms,
            increase_step: cfg.increase_step_mbps,
            decrease: cfg.decrease,
            min_mbps: cfg.min_bandwidth_mbps,
            max_mbps: cfg.max_bandwidth_mbps,
            min_update: cfg.min_update_threshold_mbps,
            cooldown_us: cfg.cooldown.as_micros() as u64,
            latency_ceiling_ms: cfg.latency_ceiling_ms,
            gentle_decrease: cfg.gentle_decrease_mbps,
            state: ControlState {
                current_bandwidth_mbps: start_mbps.clamp(cfg.min_bandwidth_mbps, cfg.max_bandwidth_mbps),
                mode: Mode::Stable,
                last_decision_us: None,
                cooldown_until_us: None,
            },
        }
    }

    pub fn state(&self) -> &ControlState {
        &self.state
    }

    pub fn current_mbps(&self) -> u64 {
        self.state.current_bandwidth_mbps
    }

    pub fn in_cooldown(&self, now_us: u64) -> bool {
        self.state.cooldown_until_us.map_or(false, |until| now_us < until)
    }

    fn clamp(&self, mbps: u64) -> u64 {
        mbps.clamp(self.min_mbps, self.max_mbps)
    }

    pub fn tick(&mut self, signal: Option<&Signal>, now_us: u64) -> BandwidthDecision {
        let current = self.state.current_bandwidth_mbps;

        let (mode, cause, raw) = match signal {
            // Starved: hold everything, including the mode.
            None => (self.state.mode, Cause::NoSignal, current),
            Some(Signal::Unreliable(_)) => {
                (Mode::Congested, Cause::Unreliable, self.decrease.apply(current))
            }
            Some(Signal::Reliable(s)) => {
                let over_ceiling = self
                    .latency_ceiling_ms
                    .map_or(false, |ceiling| s.smoothed_latency_ms > ceiling);

                if s.smoothed_ms > self.upper_ms {
                    (Mode::Congested, Cause::AboveUpper, self.decrease.apply(current))
                } else if over_ceiling {
                    (
                        Mode::Congested,
                        Cause::LatencyCeiling,
                        current.saturating_sub(self.gentle_decrease),
                    )
                } else if s.smoothed_ms < self.lower_ms {
                    (
                        Mode::Recovering,
                        Cause::BelowLower,
                        current.saturating_add(self.increase_step),
                    )
                } else {
                    (Mode::Stable, Cause::DeadBand, current)
                }
            }
        };

        let target = self.clamp(raw);
        let action = match target.cmp(&current) {
            core::cmp::Ordering::Greater => Action::Increase,
            core::cmp::Ordering::Less => Action::Decrease,
            core::cmp::Ordering::Equal => Action::Hold,
        };

        let delta = target.abs_diff(current);
        // A final step onto a bound is always worth taking.
        let onto_bound = target == self.min_mbps || target == self.max_mbps;
        let gate = if delta == 0 || (delta < self.min_update && !onto_bound) {
            Gate::BelowThreshold
        } else if self.in_cooldown(now_us) {
            Gate::Cooldown
        } else {
            Gate::Open
        };

        if mode != self.state.mode {
            info!("controller mode {:?} -> {:?} ({:?})", self.state.mode, mode, cause);
        }
        self.state.mode = mode;

        let decision = BandwidthDecision {
            previous_mbps: current,
            target_mbps: target,
            action,
            mode,
            cause,
            gate,
            apply: gate == Gate::Open,
        };
        debug!("tick @{}us: {:?}", now_us, decision);
        decision
    }

    /// Records an enforced decision. Non-applied decisions are ignored.
    pub fn commit(&mut self, decision: &BandwidthDecision, now_us: u64) {
        if !decision.apply {
            return;
        }
        self.state.current_bandwidth_mbps = self.clamp(decision.target_mbps);
        self.state.last_decision_us = Some(now_us);
        if decision.action == Action::Decrease {
            self.state.cooldown_until_us = Some(now_us.saturating_add(self.cooldown_us));
        }
    }
}
