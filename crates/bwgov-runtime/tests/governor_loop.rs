use bwgov_core::{
    Action, Cause, EnforceConfig, GovernorConfig, ProbeSample, Protocol, WorkloadRef,
};
use bwgov_enforce::{EnforcementAdapter, EnforcementOutcome};
use bwgov_hal::{AuxReading, Clock, MetricsSource, PatchError, Probe, SourceError, WorkloadPatcher};
use bwgov_runtime::{shared_windows, Governor, Prober, SharedWindows};
use bwgov_signal::AuxiliarySignal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SEC: u64 = 1_000_000;

// --- MOCKS ---
struct MockClock {
    t: Arc<AtomicU64>,
}
impl Clock for MockClock {
    fn now_us(&self) -> u64 {
        self.t.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct PatchLog {
    values: Vec<String>,
    script: VecDeque<Result<(), PatchError>>,
    stored: Option<String>,
}

struct MockPatcher(Arc<Mutex<PatchLog>>);
impl WorkloadPatcher for MockPatcher {
    fn patch_annotation(&mut self, _: &WorkloadRef, _: &str, value: &str) -> Result<(), PatchError> {
        let mut log = self.0.lock().unwrap();
        log.values.push(value.to_string());
        log.script.pop_front().unwrap_or(Ok(()))
    }
    fn read_annotation(&mut self, _: &WorkloadRef, _: &str) -> Result<Option<String>, PatchError> {
        Ok(self.0.lock().unwrap().stored.clone())
    }
}

/// Patches everything except workloads named `gone`.
struct HalfDeadPatcher(Arc<Mutex<Vec<(String, String)>>>);
impl WorkloadPatcher for HalfDeadPatcher {
    fn patch_annotation(&mut self, target: &WorkloadRef, _: &str, value: &str) -> Result<(), PatchError> {
        if target.name == "gone" {
            return Err(PatchError::NotFound(target.to_string()));
        }
        self.0.lock().unwrap().push((target.name.clone(), value.to_string()));
        Ok(())
    }
    fn read_annotation(&mut self, _: &WorkloadRef, _: &str) -> Result<Option<String>, PatchError> {
        Ok(None)
    }
}

struct FixedProbe {
    protocol: Protocol,
    rtt: f64,
}
impl Probe for FixedProbe {
    fn protocol(&self) -> Protocol {
        self.protocol
    }
    fn measure(&mut self, clock: &dyn Clock) -> ProbeSample {
        ProbeSample::ok(self.protocol, clock.now_us(), self.rtt)
    }
}

struct DeadSource;
impl MetricsSource for DeadSource {
    fn fetch(&mut self) -> Result<AuxReading, SourceError> {
        Err(SourceError::Unavailable("connection refused".into()))
    }
}

fn config() -> GovernorConfig {
    let mut cfg = GovernorConfig::default();
    cfg.control.initial_bandwidth_mbps = 500;
    cfg.enforce = EnforceConfig {
        backoff_base: Duration::from_millis(1),
        patch_attempts: 2,
        ..EnforceConfig::default()
    };
    cfg
}

fn governor(cfg: &GovernorConfig, log: &Arc<Mutex<PatchLog>>) -> (Governor, SharedWindows) {
    let windows = shared_windows(&cfg.signal);
    let enforcer = EnforcementAdapter::new(&cfg.enforce, Box::new(MockPatcher(log.clone())));
    let clock = Arc::new(MockClock { t: Arc::new(AtomicU64::new(0)) });
    (Governor::new(cfg, windows.clone(), enforcer, clock), windows)
}

/// Fills both windows with `latencies`, one sample per 0.5 s ending at `now_us`.
fn fill(windows: &SharedWindows, latencies: &[f64], now_us: u64) {
    let mut w = windows.lock();
    let n = latencies.len() as u64;
    for (i, &ms) in latencies.iter().enumerate() {
        let ts = now_us - (n - i as u64) * SEC / 2;
        for p in Protocol::ALL {
            w.push(ProbeSample::ok(p, ts, ms));
        }
    }
}

const CALM: [f64; 8] = [1.0, 1.0, 1.1, 1.0, 1.0, 1.1, 1.0, 1.0];
const NOISY: [f64; 8] = [1.0, 8.0, 2.0, 15.0, 1.0, 12.0, 3.0, 20.0];

#[test]
fn test_holds_until_windows_primed() {
    let log = Arc::new(Mutex::new(PatchLog::default()));
    let (mut gov, _) = governor(&config(), &log);

    let r = gov.tick(10 * SEC);
    assert!(r.signal.is_none());
    assert_eq!(r.decision.cause, Cause::NoSignal);
    assert_eq!(r.outcome, EnforcementOutcome::Held);
    assert!(log.lock().unwrap().values.is_empty());
}

#[test]
fn test_congestion_patches_and_commits() {
    let log = Arc::new(Mutex::new(PatchLog::default()));
    let (mut gov, windows) = governor(&config(), &log);
    fill(&windows, &NOISY, 10 * SEC);

    let r = gov.tick(10 * SEC);
    assert!(r.signal.unwrap().is_reliable());
    assert_eq!(r.decision.action, Action::Decrease);
    assert_eq!(r.outcome, EnforcementOutcome::Applied);
    assert_eq!(log.lock().unwrap().values, vec!["400M".to_string()]);
    assert_eq!(gov.controller().current_mbps(), 400);
    assert!(gov.controller().in_cooldown(11 * SEC));
}

#[test]
fn test_recovery_increases() {
    let log = Arc::new(Mutex::new(PatchLog::default()));
    let (mut gov, windows) = governor(&config(), &log);
    fill(&windows, &CALM, 10 * SEC);

    let r = gov.tick(10 * SEC);
    assert_eq!(r.decision.cause, Cause::BelowLower);
    assert_eq!(r.outcome, EnforcementOutcome::Applied);
    assert_eq!(gov.controller().current_mbps(), 510);
}

#[test]
fn test_failed_patch_leaves_state() {
    let log = Arc::new(Mutex::new(PatchLog {
        script: vec![Err(PatchError::Failed("forbidden".into()))].into(),
        ..PatchLog::default()
    }));
    let (mut gov, windows) = governor(&config(), &log);
    fill(&windows, &NOISY, 10 * SEC);

    let r = gov.tick(10 * SEC);
    assert_eq!(r.outcome, EnforcementOutcome::Failed);
    assert_eq!(gov.controller().current_mbps(), 500);
    assert!(!gov.controller().in_cooldown(11 * SEC));

    // Next tick retries the same decision.
    let r = gov.tick(15 * SEC);
    assert_eq!(r.outcome, EnforcementOutcome::Applied);
    assert_eq!(gov.controller().current_mbps(), 400);
}

#[test]
fn test_dead_target_does_not_stall_control() {
    let mut cfg = config();
    cfg.enforce.targets = vec![WorkloadRef::new("default", "ok"), WorkloadRef::new("default", "gone")];
    let patched = Arc::new(Mutex::new(Vec::new()));
    let windows = shared_windows(&cfg.signal);
    let enforcer = EnforcementAdapter::new(&cfg.enforce, Box::new(HalfDeadPatcher(patched.clone())));
    let clock = Arc::new(MockClock { t: Arc::new(AtomicU64::new(0)) });
    let mut gov = Governor::new(&cfg, windows.clone(), enforcer, clock);

    let mut now = 10 * SEC;
    for _ in 0..4 {
        fill(&windows, &NOISY, now);
        let r = gov.tick(now);
        assert_eq!(r.outcome, EnforcementOutcome::Partial);
        now += 60 * SEC;
    }

    assert_eq!(gov.controller().current_mbps(), 100);
    let patched = patched.lock().unwrap();
    assert_eq!(patched.last(), Some(&("ok".to_string(), "100M".to_string())));
    assert_eq!(patched.len(), 4);
}

#[test]
fn test_resumes_from_annotation() {
    let log = Arc::new(Mutex::new(PatchLog {
        stored: Some("300M".to_string()),
        ..PatchLog::default()
    }));
    let (gov, _) = governor(&config(), &log);
    assert_eq!(gov.controller().current_mbps(), 300);

    log.lock().unwrap().stored = Some("5000M".to_string());
    let (gov, _) = governor(&config(), &log);
    assert_eq!(gov.controller().current_mbps(), 500);
}

#[test]
fn test_stale_samples_are_evicted() {
    let log = Arc::new(Mutex::new(PatchLog::default()));
    let (mut gov, windows) = governor(&config(), &log);
    fill(&windows, &NOISY, 10 * SEC);

    // Default max age is 60 s; every sample is long gone.
    let r = gov.tick(200 * SEC);
    assert!(r.signal.is_none());
    assert!(windows.lock().get(Protocol::Connectionless).is_empty());
}

#[test]
fn test_dead_aux_source_fails_safe() {
    let log = Arc::new(Mutex::new(PatchLog::default()));
    let (gov, windows) = governor(&config(), &log);
    let mut gov = gov.with_aux(AuxiliarySignal::new(Box::new(DeadSource)));
    fill(&windows, &CALM, 10 * SEC);

    let r = gov.tick(10 * SEC);
    assert_eq!(r.aux.unwrap().jitter_ms, 50.0);
    assert_eq!(r.decision.cause, Cause::AboveUpper);
    assert_eq!(gov.controller().current_mbps(), 400);
}

#[test]
fn test_prober_feeds_window() {
    let cfg = config();
    let windows = shared_windows(&cfg.signal);
    let t = Arc::new(AtomicU64::new(42 * SEC));
    let mut prober = Prober::new(
        Box::new(FixedProbe { protocol: Protocol::ConnectionOriented, rtt: 0.8 }),
        Arc::new(MockClock { t: t.clone() }),
        windows.clone(),
        Duration::from_millis(500),
    );

    prober.cycle();
    prober.cycle();

    let w = windows.lock();
    assert_eq!(w.get(Protocol::ConnectionOriented).len(), 2);
    assert!(w.get(Protocol::Connectionless).is_empty());
    assert_eq!(w.get(Protocol::ConnectionOriented).ok_latencies(), vec![0.8, 0.8]);
}

#[test]
fn test_prober_thread_stops_on_flag() {
    let cfg = config();
    let windows = shared_windows(&cfg.signal);
    let running = Arc::new(AtomicBool::new(true));
    let prober = Prober::new(
        Box::new(FixedProbe { protocol: Protocol::Connectionless, rtt: 1.0 }),
        Arc::new(MockClock { t: Arc::new(AtomicU64::new(0)) }),
        windows.clone(),
        Duration::from_millis(10),
    );

    let handle = prober.spawn(running.clone()).unwrap();
    std::thread::sleep(Duration::from_millis(60));
    running.store(false, Ordering::SeqCst);
    handle.join().unwrap();

    assert!(!windows.lock().get(Protocol::Connectionless).is_empty());
}

#[test]
fn test_governor_run_exits_on_flag() {
    let log = Arc::new(Mutex::new(PatchLog::default()));
    let mut cfg = config();
    cfg.control.interval = Duration::from_millis(10);
    let (mut gov, _) = governor(&cfg, &log);

    let running = AtomicBool::new(false);
    gov.run(&running);
    assert_eq!(gov.controller().current_mbps(), 500);
}
