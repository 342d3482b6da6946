use bwgov_core::{EnforceConfig, GovernorConfig, ProbeSample, Protocol, WorkloadRef};
use bwgov_enforce::EnforcementAdapter;
use bwgov_hal::{Clock, PatchError, Probe, WorkloadPatcher};
use bwgov_runtime::{shared_windows, Governor, GovernorMetrics, Prober, SharedWindows};
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SEC: u64 = 1_000_000;

// --- MOCKS ---
struct MockClock(AtomicU64);
impl Clock for MockClock {
    fn now_us(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

struct OkPatcher;
impl WorkloadPatcher for OkPatcher {
    fn patch_annotation(&mut self, _: &WorkloadRef, _: &str, _: &str) -> Result<(), PatchError> {
        Ok(())
    }
    fn read_annotation(&mut self, _: &WorkloadRef, _: &str) -> Result<Option<String>, PatchError> {
        Ok(None)
    }
}

/// Alternates ok and timed-out attempts.
struct Alternating(u32);
impl Probe for Alternating {
    fn protocol(&self) -> Protocol {
        Protocol::Connectionless
    }
    fn measure(&mut self, clock: &dyn Clock) -> ProbeSample {
        self.0 += 1;
        if self.0 % 2 == 1 {
            ProbeSample::ok(Protocol::Connectionless, clock.now_us(), 2.5)
        } else {
            ProbeSample::timeout(Protocol::Connectionless, clock.now_us())
        }
    }
}

fn governor(registry: &Registry) -> (Governor, SharedWindows, Arc<GovernorMetrics>) {
    let mut cfg = GovernorConfig::default();
    cfg.control.initial_bandwidth_mbps = 500;
    cfg.enforce = EnforceConfig { backoff_base: Duration::from_millis(1), ..EnforceConfig::default() };
    let windows = shared_windows(&cfg.signal);
    let enforcer = EnforcementAdapter::new(&cfg.enforce, Box::new(OkPatcher));
    let clock = Arc::new(MockClock(AtomicU64::new(0)));
    let metrics = Arc::new(GovernorMetrics::new(registry).unwrap());
    let gov = Governor::new(&cfg, windows.clone(), enforcer, clock).with_metrics(metrics.clone());
    (gov, windows, metrics)
}

fn exposition(registry: &Registry) -> String {
    let mut buf = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buf).unwrap();
    String::from_utf8(buf).unwrap()
}

#[test]
fn test_tick_updates_gauges() {
    let registry = Registry::new();
    let (mut gov, windows, metrics) = governor(&registry);
    {
        let mut w = windows.lock();
        for (i, ms) in [1.0, 8.0, 2.0, 15.0, 1.0, 12.0, 3.0, 20.0].into_iter().enumerate() {
            for p in Protocol::ALL {
                w.push(ProbeSample::ok(p, SEC + i as u64 * SEC / 2, ms));
            }
        }
    }

    let r = gov.tick(10 * SEC);
    let s = *r.signal.unwrap().snapshot();
    let text = exposition(&registry);

    assert!(text.contains("bwgov_bandwidth_limit_mbps 400"));
    assert!(text.contains("bwgov_seconds_since_change 0"));
    assert!(text.contains("bwgov_enforcement_total{outcome=\"applied\"} 1"));
    assert!(text.contains("bwgov_mode{mode=\"congested\"} 1"));
    assert!(text.contains("bwgov_mode{mode=\"stable\"} 0"));
    assert!(text.contains("bwgov_signal_reliable 1"));
    assert!(text.contains("bwgov_success_ratio{protocol=\"tcp\"} 1"));
    assert_eq!(metrics.smoothed_jitter_ms.get(), s.smoothed_ms);
    let udp = s.connectionless.unwrap();
    assert_eq!(metrics.jitter_ms.with_label_values(&["udp"]).get(), udp.jitter_ms);
    let tcp = s.connection_oriented.unwrap();
    assert_eq!(metrics.p_latency_ms.with_label_values(&["tcp"]).get(), tcp.p_latency_ms);
}

#[test]
fn test_unprimed_tick_reports_limit_only() {
    let registry = Registry::new();
    let (mut gov, _, _) = governor(&registry);

    gov.tick(10 * SEC);
    let text = exposition(&registry);
    assert!(text.contains("bwgov_bandwidth_limit_mbps 500"));
    assert!(text.contains("bwgov_enforcement_total{outcome=\"held\"} 1"));
    assert!(text.contains("bwgov_signal_reliable 0"));
    assert!(text.contains("bwgov_seconds_since_change -1"));
}

#[test]
fn test_cycle_counts_sample_outcomes() {
    let registry = Registry::new();
    let metrics = Arc::new(GovernorMetrics::new(&registry).unwrap());
    let cfg = GovernorConfig::default();
    let mut prober = Prober::new(
        Box::new(Alternating(0)),
        Arc::new(MockClock(AtomicU64::new(SEC))),
        shared_windows(&cfg.signal),
        Duration::from_millis(500),
    )
    .with_metrics(metrics.clone());

    for _ in 0..3 {
        prober.cycle();
    }
    let ok = metrics.samples.with_label_values(&["udp", "ok"]).get();
    let timeout = metrics.samples.with_label_values(&["udp", "timeout"]).get();
    assert_eq!((ok, timeout), (2, 1));
    assert_eq!(metrics.round_trip_ms.with_label_values(&["udp"]).get(), 2.5);
}

#[test]
fn test_duplicate_registration_is_error() {
    let registry = Registry::new();
    assert!(GovernorMetrics::new(&registry).is_ok());
    assert!(GovernorMetrics::new(&registry).is_err());
}
