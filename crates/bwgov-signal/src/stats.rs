use bwgov_core::ProtocolStats;

use crate::window::ProbeWindow;

/// Quantile of an ascending slice with linear interpolation between
/// closest ranks: position `q * (n - 1)`.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Interquartile range `Q3 - Q1` of an ascending slice.
pub fn iqr(sorted: &[f64]) -> Option<f64> {
    let q1 = quantile_sorted(sorted, 0.25)?;
    let q3 = quantile_sorted(sorted, 0.75)?;
    Some((q3 - q1).max(0.0))
}

/// Jitter, percentile and health of one window. `None` when the window is empty.
/// A window with no `ok` samples reports zero jitter and latency with `ok == 0`.
pub fn protocol_stats(window: &ProbeWindow, percentile: f64) -> Option<ProtocolStats> {
    if window.is_empty() {
        return None;
    }
    let mut lat = window.ok_latencies();
    lat.sort_by(|a, b| a.total_cmp(b));

    Some(ProtocolStats {
        jitter_ms: iqr(&lat).unwrap_or(0.0),
        p_latency_ms: quantile_sorted(&lat, percentile).unwrap_or(0.0),
        ok: lat.len(),
        total: window.len(),
    })
}
