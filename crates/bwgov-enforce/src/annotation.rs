//! Egress-bandwidth annotation values, e.g. `"250M"`.

/// Renders Mbps the way the traffic shaper expects it.
pub fn format_mbps(mbps: u64) -> String {
    format!("{}M", mbps)
}

/// Parses `<int>[k|K|M|m|G|g]` into Mbps. A bare integer is taken as Mbps.
/// Kilobit values are truncated to whole Mbps.
pub fn parse_mbps(value: &str) -> Option<u64> {
    let v = value.trim();
    let split = v.find(|c: char| !c.is_ascii_digit()).unwrap_or(v.len());
    let (digits, suffix) = v.split_at(split);
    let n: u64 = digits.parse().ok()?;
    match suffix {
        "" | "M" | "m" => Some(n),
        "G" | "g" => n.checked_mul(1000),
        "k" | "K" => Some(n / 1000),
        _ => None,
    }
}
