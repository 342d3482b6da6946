use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info};

use bwgov_hal::{Clock, Probe};

use crate::{sleep_until, GovernorMetrics, SharedWindows};

/// Drives one probe at a fixed cadence and feeds its window.
pub struct Prober {
    probe: Box<dyn Probe>,
    clock: Arc<dyn Clock>,
    windows: SharedWindows,
    interval: Duration,
    metrics: Option<Arc<GovernorMetrics>>,
}

impl Prober {
    pub fn new(
        probe: Box<dyn Probe>,
        clock: Arc<dyn Clock>,
        windows: SharedWindows,
        interval: Duration,
    ) -> Self {
        Self { probe, clock, windows, interval, metrics: None }
    }

    pub fn with_metrics(mut self, metrics: Arc<GovernorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// One measurement, recorded. The lock is not held while measuring.
    pub fn cycle(&mut self) {
        let sample = self.probe.measure(&*self.clock);
        debug!("{} probe: {:?} {:?}", sample.protocol, sample.outcome, sample.round_trip_ms);
        if let Some(m) = &self.metrics {
            m.observe_sample(&sample);
        }
        self.windows.lock().push(sample);
    }

    /// Cadence is measured from cycle start, so a slow probe does not drift the schedule.
    pub fn run(mut self, running: &AtomicBool) {
        info!("{} prober started (every {:?})", self.probe.protocol(), self.interval);
        while running.load(Ordering::SeqCst) {
            let started = Instant::now();
            self.cycle();
            if !sleep_until(started + self.interval, running) {
                break;
            }
        }
        info!("{} prober stopped", self.probe.protocol());
    }

    pub fn spawn(self, running: Arc<AtomicBool>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("probe-{}", self.probe.protocol()))
            .spawn(move || self.run(&running))
    }
}
