use anyhow::Context;
use bwgov_core::{
    ControlConfig, DecreasePolicy, EnforceConfig, GovernorConfig, ProbeConfig, SignalConfig,
    WorkloadRef,
};
use bwgov_enforce::EnforcementAdapter;
use bwgov_hal::{Clock, Probe};
use bwgov_linux::{KubectlPatcher, PrometheusSource, SystemClock, TcpConnectProbe, UdpEchoProbe};
use bwgov_runtime::{shared_windows, Governor, GovernorMetrics, Prober};
use bwgov_signal::AuxiliarySignal;
use clap::Parser;
use log::{info, warn};
use std::net::SocketAddr;
use std::sync::{Arc, atomic::{AtomicBool, Ordering}};
use std::time::Duration;

/// Adaptive egress governor for best-effort workloads.
#[derive(Parser, Debug)]
struct Cli {
    // Probing
    #[arg(long, env = "ROBOT_CONTROL_HOST", default_value = "robot-control-svc.default.svc.cluster.local")]
    udp_host: String,
    #[arg(long, env = "ROBOT_CONTROL_UDP_PORT", default_value_t = 5201)]
    udp_port: u16,
    #[arg(long, env = "SAFETY_SCANNER_HOST", default_value = "safety-scanner-svc.default.svc.cluster.local")]
    tcp_host: String,
    #[arg(long, env = "SAFETY_SCANNER_TCP_PORT", default_value_t = 5202)]
    tcp_port: u16,
    #[arg(long, env = "PROBE_INTERVAL_MS", default_value_t = 500)]
    probe_interval_ms: u64,
    #[arg(long, env = "PROBE_TIMEOUT_MS", default_value_t = 200)]
    probe_timeout_ms: u64,

    // Signal
    #[arg(long, env = "WINDOW_SIZE", default_value_t = 60)]
    window_size: usize,
    /// 0 keeps count-only windows.
    #[arg(long, env = "MAX_SAMPLE_AGE_SEC", default_value_t = 60)]
    max_sample_age_sec: u64,
    #[arg(long, env = "LATENCY_PERCENTILE", default_value_t = 0.95)]
    percentile: f64,
    #[arg(long, env = "EWMA_ALPHA", default_value_t = 0.7)]
    ewma_alpha: f64,
    #[arg(long, env = "HEALTH_FLOOR", default_value_t = 0.5)]
    health_floor: f64,

    // Control
    #[arg(long, env = "CONTROL_INTERVAL_SEC", default_value_t = 5)]
    control_interval_sec: u64,
    #[arg(long, env = "LOWER_THRESHOLD_MS", default_value_t = 1.0)]
    lower_threshold_ms: f64,
    #[arg(long, env = "UPPER_THRESHOLD_MS", default_value_t = 2.0)]
    upper_threshold_ms: f64,
    #[arg(long, env = "STEP_UP", default_value_t = 10)]
    step_up: u64,
    #[arg(long, env = "STEP_DOWN", default_value_t = 100)]
    step_down: u64,
    /// Fraction kept on decrease (e.g. 0.8). Overrides --step-down.
    #[arg(long, env = "DECREASE_RATIO")]
    decrease_ratio: Option<f64>,
    #[arg(long, env = "MIN_BANDWIDTH_MBPS", default_value_t = 10)]
    min_bandwidth_mbps: u64,
    #[arg(long, env = "MAX_BANDWIDTH_MBPS", default_value_t = 1000)]
    max_bandwidth_mbps: u64,
    #[arg(long, env = "INITIAL_BANDWIDTH_MBPS", default_value_t = 100)]
    initial_bandwidth_mbps: u64,
    #[arg(long, env = "MIN_UPDATE_THRESHOLD_MBPS", default_value_t = 5)]
    min_update_threshold_mbps: u64,
    #[arg(long, env = "COOLDOWN_SEC", default_value_t = 30)]
    cooldown_sec: u64,
    #[arg(long, env = "TARGET_LATENCY_MS")]
    latency_ceiling_ms: Option<f64>,
    #[arg(long, env = "GENTLE_STEP_DOWN", default_value_t = 20)]
    gentle_step_down: u64,

    // Enforcement
    /// `namespace/name` of each throttled deployment.
    #[arg(long = "target", env = "THROTTLE_TARGETS", value_delimiter = ',',
          default_value = "default/telemetry-upload-deployment")]
    targets: Vec<String>,
    #[arg(long, env = "BANDWIDTH_ANNOTATION", default_value = "kubernetes.io/egress-bandwidth")]
    annotation_key: String,
    #[arg(long, env = "MIN_PATCH_INTERVAL_SEC", default_value_t = 10)]
    min_patch_interval_sec: u64,
    #[arg(long, env = "PATCH_ATTEMPTS", default_value_t = 3)]
    patch_attempts: u32,
    #[arg(long, env = "PATCH_BACKOFF_MS", default_value_t = 200)]
    patch_backoff_ms: u64,
    #[arg(long, env = "KUBECTL", default_value = "kubectl")]
    kubectl: String,
    #[arg(long, env = "KUBE_CONTEXT")]
    kube_context: Option<String>,

    // Auxiliary metrics
    #[arg(long, env = "PROMETHEUS_URL")]
    prometheus_url: Option<String>,
    #[arg(long, env = "TARGET_APP", default_value = "robot-control")]
    target_app: String,

    // Self metrics
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8001")]
    metrics_addr: SocketAddr,
    #[arg(long, env = "DISABLE_METRICS")]
    no_metrics: bool,
}

impl Cli {
    fn config(&self) -> anyhow::Result<GovernorConfig> {
        let targets = self
            .targets
            .iter()
            .map(|t| WorkloadRef::parse(t.trim()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(GovernorConfig {
            probe: ProbeConfig {
                udp_host: self.udp_host.clone(),
                udp_port: self.udp_port,
                tcp_host: self.tcp_host.clone(),
                tcp_port: self.tcp_port,
                interval: Duration::from_millis(self.probe_interval_ms),
                timeout: Duration::from_millis(self.probe_timeout_ms),
            },
            signal: SignalConfig {
                window_capacity: self.window_size,
                max_sample_age: (self.max_sample_age_sec > 0)
                    .then(|| Duration::from_secs(self.max_sample_age_sec)),
                percentile: self.percentile,
                ewma_alpha: self.ewma_alpha,
                health_floor: self.health_floor,
            },
            control: ControlConfig {
                interval: Duration::from_secs(self.control_interval_sec),
                lower_threshold_ms: self.lower_threshold_ms,
                upper_threshold_ms: self.upper_threshold_ms,
                increase_step_mbps: self.step_up,
                decrease: match self.decrease_ratio {
                    Some(keep) => DecreasePolicy::Multiplicative(keep),
                    None => DecreasePolicy::Step(self.step_down),
                },
                min_bandwidth_mbps: self.min_bandwidth_mbps,
                max_bandwidth_mbps: self.max_bandwidth_mbps,
                initial_bandwidth_mbps: self.initial_bandwidth_mbps,
                min_update_threshold_mbps: self.min_update_threshold_mbps,
                cooldown: Duration::from_secs(self.cooldown_sec),
                latency_ceiling_ms: self.latency_ceiling_ms,
                gentle_decrease_mbps: self.gentle_step_down,
            },
            enforce: EnforceConfig {
                targets,
                annotation_key: self.annotation_key.clone(),
                min_patch_interval: Duration::from_secs(self.min_patch_interval_sec),
                patch_attempts: self.patch_attempts,
                backoff_base: Duration::from_millis(self.patch_backoff_ms),
            },
        })
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    info!(">>> BWGOV GOVERNOR: v0.1.0 <<<");

    let cfg = cli.config()?;
    cfg.validate().context("refusing to start")?;
    info!("Configuration: {:#?}", cfg);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        warn!("Signal received. Stopping...");
        r.store(false, Ordering::SeqCst);
    })?;

    // The exporter serves the default registry for as long as it is alive.
    let (_exporter, metrics) = if cli.no_metrics {
        (None, None)
    } else {
        let exporter =
            prometheus_exporter::start(cli.metrics_addr).context("cannot serve metrics")?;
        info!("Metrics on http://{}/metrics", cli.metrics_addr);
        let registry = prometheus_exporter::prometheus::default_registry();
        (Some(exporter), Some(Arc::new(GovernorMetrics::new(registry)?)))
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let windows = shared_windows(&cfg.signal);

    let p = &cfg.probe;
    let probes: Vec<Box<dyn Probe>> = vec![
        Box::new(UdpEchoProbe::new(&p.udp_host, p.udp_port, p.timeout)),
        Box::new(TcpConnectProbe::new(&p.tcp_host, p.tcp_port, p.timeout)),
    ];
    let mut handles = Vec::new();
    for probe in probes {
        let mut prober = Prober::new(probe, clock.clone(), windows.clone(), p.interval);
        if let Some(m) = &metrics {
            prober = prober.with_metrics(m.clone());
        }
        handles.push(prober.spawn(running.clone()).context("cannot start prober")?);
    }

    let patcher = KubectlPatcher::new(&cli.kubectl, cli.kube_context.as_deref());
    let enforcer = EnforcementAdapter::new(&cfg.enforce, Box::new(patcher));
    let mut governor = Governor::new(&cfg, windows, enforcer, clock);

    if let Some(m) = metrics {
        governor = governor.with_metrics(m);
    }
    if let Some(url) = &cli.prometheus_url {
        info!("Auxiliary metrics from {} (app={})", url, cli.target_app);
        let source = PrometheusSource::new(url, &cli.target_app);
        governor = governor.with_aux(AuxiliarySignal::new(Box::new(source)));
    }

    governor.run(&running);

    for h in handles {
        if h.join().is_err() {
            warn!("prober thread panicked");
        }
    }
    Ok(())
}
