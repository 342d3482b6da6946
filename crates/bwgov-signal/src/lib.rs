#![forbid(unsafe_code)]

mod auxiliary;
mod ewma;
mod processor;
mod stats;
mod window;

pub use auxiliary::{AuxiliarySignal, FALLBACK_READING};
pub use ewma::Ewma;
pub use processor::SignalProcessor;
pub use stats::{iqr, protocol_stats, quantile_sorted};
pub use window::{ProbeWindow, ProbeWindows};
