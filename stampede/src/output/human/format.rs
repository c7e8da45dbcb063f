use std::time::Duration;

/// Single rounded component in one of `us`, `ms`, `s`.
pub(crate) fn format_duration(d: Duration) -> String {
    const NS_PER_US: u128 = 1_000;
    const NS_PER_MS: u128 = 1_000_000;
    const NS_PER_S: u128 = 1_000_000_000;

    fn round_div(value: u128, unit: u128) -> u128 {
        (value + (unit / 2)) / unit
    }

    let total_ns = d.as_nanos();
    if total_ns >= NS_PER_S {
        return format!("{}s", round_div(total_ns, NS_PER_S));
    }
    if total_ns >= NS_PER_MS {
        return format!("{}ms", round_div(total_ns, NS_PER_MS));
    }
    format!("{}us", round_div(total_ns, NS_PER_US))
}

/// Histogram values are recorded in milliseconds.
pub(crate) fn format_ms(v: Option<f64>) -> String {
    match v {
        Some(ms) if ms.is_finite() && ms >= 1_000.0 => format!("{:.2}s", ms / 1_000.0),
        Some(ms) if ms.is_finite() && ms >= 1.0 => format!("{ms:.2}ms"),
        Some(ms) if ms.is_finite() => format!("{:.0}us", ms * 1_000.0),
        _ => "-".to_string(),
    }
}

pub(crate) fn format_bytes(b: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;
    const GIB: u64 = 1024 * 1024 * 1024;

    if b >= GIB {
        return format!("{:.2}GiB", (b as f64) / (GIB as f64));
    }
    if b >= MIB {
        return format!("{:.2}MiB", (b as f64) / (MIB as f64));
    }
    if b >= KIB {
        return format!("{:.2}KiB", (b as f64) / (KIB as f64));
    }

    format!("{b}B")
}

pub(crate) fn format_pct(rate: Option<f64>) -> String {
    match rate {
        Some(r) if r.is_finite() => format!("{:.2}%", r * 100.0),
        _ => "-".to_string(),
    }
}

pub(crate) fn format_observed(v: Option<f64>) -> String {
    match v {
        Some(v) if v.fract() == 0.0 && v.abs() < 1e15 => format!("{v:.0}"),
        Some(v) => format!("{v:.4}"),
        None => "no data".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_use_one_unit() {
        assert_eq!(format_duration(Duration::from_micros(1_500)), "2ms");
        assert_eq!(format_duration(Duration::from_millis(2_400)), "2s");
        assert_eq!(format_duration(Duration::from_nanos(700)), "1us");
    }

    #[test]
    fn millis_scale_to_the_right_unit() {
        assert_eq!(format_ms(Some(0.25)), "250us");
        assert_eq!(format_ms(Some(12.5)), "12.50ms");
        assert_eq!(format_ms(Some(1_500.0)), "1.50s");
        assert_eq!(format_ms(None), "-");
    }

    #[test]
    fn bytes_and_rates() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(1536), "1.50KiB");
        assert_eq!(format_pct(Some(0.0125)), "1.25%");
        assert_eq!(format_pct(None), "-");
        assert_eq!(format_observed(Some(3.0)), "3");
        assert_eq!(format_observed(Some(0.125)), "0.1250");
        assert_eq!(format_observed(None), "no data");
    }
}
