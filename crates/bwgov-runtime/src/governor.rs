use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use bwgov_core::{BandwidthDecision, GovernorConfig, Signal};
use bwgov_enforce::{EnforcementAdapter, EnforcementOutcome};
use bwgov_flow::AdaptiveController;
use bwgov_hal::{AuxReading, Clock};
use bwgov_signal::{AuxiliarySignal, SignalProcessor};

use crate::{sleep_until, GovernorMetrics, SharedWindows};

/// Everything one control tick produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub now_us: u64,
    pub aux: Option<AuxReading>,
    pub signal: Option<Signal>,
    pub decision: BandwidthDecision,
    pub outcome: EnforcementOutcome,
}

/// The control loop: windows -> signal -> decision -> patch.
pub struct Governor {
    windows: SharedWindows,
    processor: SignalProcessor,
    controller: AdaptiveController,
    enforcer: EnforcementAdapter,
    aux: Option<AuxiliarySignal>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    metrics: Option<Arc<GovernorMetrics>>,
}

impl Governor {
    /// Seeds the controller from the annotation already on the workload when
    /// it lies within the configured bounds.
    pub fn new(
        cfg: &GovernorConfig,
        windows: SharedWindows,
        mut enforcer: EnforcementAdapter,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let c = &cfg.control;
        let start = match enforcer.read_current() {
            Some(mbps) if (c.min_bandwidth_mbps..=c.max_bandwidth_mbps).contains(&mbps) => {
                info!("Resuming from annotated bandwidth {}M", mbps);
                mbps
            }
            Some(mbps) => {
                warn!(
                    "Annotated bandwidth {}M outside [{}, {}]; starting at {}M",
                    mbps, c.min_bandwidth_mbps, c.max_bandwidth_mbps, c.initial_bandwidth_mbps
                );
                c.initial_bandwidth_mbps
            }
            None => c.initial_bandwidth_mbps,
        };

        Self {
            windows,
            processor: SignalProcessor::new(&cfg.signal),
            controller: AdaptiveController::with_bandwidth(c, start),
            enforcer,
            aux: None,
            clock,
            interval: c.interval,
            metrics: None,
        }
    }

    pub fn with_aux(mut self, aux: AuxiliarySignal) -> Self {
        self.aux = Some(aux);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<GovernorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn controller(&self) -> &AdaptiveController {
        &self.controller
    }

    pub fn tick(&mut self, now_us: u64) -> TickReport {
        let windows = {
            let mut w = self.windows.lock();
            w.evict_expired(now_us);
            w.clone()
        };

        let aux = self.aux.as_mut().map(AuxiliarySignal::read);
        let signal = self.processor.process(&windows, aux);
        let decision = self.controller.tick(signal.as_ref(), now_us);
        let outcome = self.enforcer.apply(&decision, now_us);

        // State only moves once a workload actually carries the value.
        if outcome.carried() {
            self.controller.commit(&decision, now_us);
        }

        match &signal {
            Some(s) => info!(
                "tick: smoothed={:.3}ms health={:.2}{} | {}M -> {}M {:?}/{:?} gate={:?} => {:?}",
                s.snapshot().smoothed_ms,
                s.snapshot().sample_health,
                if s.is_reliable() { "" } else { " (unreliable)" },
                decision.previous_mbps,
                decision.target_mbps,
                decision.action,
                decision.cause,
                decision.gate,
                outcome
            ),
            None => debug!("tick: windows not primed yet, holding {}M", decision.previous_mbps),
        }

        let report = TickReport { now_us, aux, signal, decision, outcome };
        if let Some(m) = &self.metrics {
            m.observe_tick(&report, self.controller.state());
        }
        report
    }

    /// Ticks on the control cadence until `running` clears.
    pub fn run(&mut self, running: &AtomicBool) {
        info!(
            "Governor active: {} targets, every {:?}, starting at {}M",
            self.enforcer.targets().len(),
            self.interval,
            self.controller.current_mbps()
        );
        while running.load(Ordering::SeqCst) {
            let started = Instant::now();
            let now = self.clock.now_us();
            self.tick(now);
            if !sleep_until(started + self.interval, running) {
                break;
            }
        }
        info!("Governor stopped at {}M", self.controller.current_mbps());
    }
}
