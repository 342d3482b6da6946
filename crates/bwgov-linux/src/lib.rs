#![forbid(unsafe_code)]

use std::time::Instant;

use bwgov_hal::Clock;

pub mod echo;
pub mod kube;
pub mod probe;
pub mod prometheus;
pub mod resolve;

pub use echo::EchoResponder;
pub use kube::KubectlPatcher;
pub use probe::{TcpConnectProbe, UdpEchoProbe};
pub use prometheus::PrometheusSource;
pub use resolve::{resolve, CachedResolver};

pub struct SystemClock(Instant);

impl SystemClock {
    pub fn new() -> Self {
        Self(Instant::now())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_us(&self) -> u64 {
        self.0.elapsed().as_micros() as u64
    }
}
