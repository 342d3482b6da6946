#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use bwgov_core::SignalConfig;
use bwgov_signal::ProbeWindows;

pub mod governor;
pub mod metrics;
pub mod prober;

pub use governor::{Governor, TickReport};
pub use metrics::GovernorMetrics;
pub use prober::Prober;

/// Probe threads push, the control tick snapshots.
pub type SharedWindows = Arc<Mutex<ProbeWindows>>;

pub fn shared_windows(cfg: &SignalConfig) -> SharedWindows {
    Arc::new(Mutex::new(ProbeWindows::from_config(cfg)))
}

const STOP_POLL: Duration = Duration::from_millis(50);

/// Sleeps until `deadline` in short slices. Returns `false` if `running` cleared meanwhile.
pub(crate) fn sleep_until(deadline: Instant, running: &AtomicBool) -> bool {
    loop {
        if !running.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(STOP_POLL));
    }
}
