// Convert provider wire values into sane internal numbers.
// Upstream data is noisy: prices arrive as decimal strings, fields go missing,
// and the odd negative or NaN shows up. Everything here is total (no panics).

/// Parse a decimal string such as "0.000123" or "1e-5".
/// Blank or unparsable input, and non-finite results, give `None`.
pub fn parse_decimal(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Clamp to `[0, inf)`. NaN and infinities become 0.
pub fn non_negative(v: f64) -> f64 {
    if v.is_finite() && v > 0.0 {
        v
    } else {
        0.0
    }
}

/// Finite value or 0, sign preserved. Used for percentage changes.
pub fn finite_or_zero(v: Option<f64>) -> f64 {
    v.filter(|x| x.is_finite()).unwrap_or(0.0)
}

/// Substitute 1 for a zero, missing or non-finite denominator.
pub fn guard_denominator(v: Option<f64>) -> f64 {
    match v {
        Some(x) if x.is_finite() && x != 0.0 => x,
        _ => 1.0,
    }
}

/// USD value of one unit of the chain's native asset, as implied by a pair's
/// `price_usd / price_native`. Both divisions are guarded.
pub fn usd_per_native(price_usd: f64, price_native: Option<f64>) -> f64 {
    let rate = price_usd / guard_denominator(price_native);
    guard_denominator(Some(rate))
}

/// Convert a USD amount into native units at `rate` (already guarded).
pub fn to_native(amount_usd: Option<f64>, rate: f64) -> f64 {
    non_negative(non_negative(amount_usd.unwrap_or(0.0)) / guard_denominator(Some(rate)))
}

/// Registry key for an asset address.
/// Base58 addresses are case sensitive and only trimmed; `0x` hex addresses
/// are lowered so checksummed and plain forms collide.
pub fn normalize_address(raw: &str) -> Option<String> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if s.len() > 2 && (s.starts_with("0x") || s.starts_with("0X")) {
        return Some(s.to_ascii_lowercase());
    }
    Some(s.to_string())
}

/// A price is usable when it is finite and strictly positive.
pub fn usable_price(v: Option<f64>) -> Option<f64> {
    v.filter(|p| p.is_finite() && *p > 0.0)
}

/// Median of the finite values in `values`, or `None` if there are none.
pub fn median(values: &mut Vec<f64>) -> Option<f64> {
    values.retain(|v| v.is_finite());
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal("1.00"), Some(1.0));
        assert_eq!(parse_decimal(" 0.01 "), Some(0.01));
        assert_eq!(parse_decimal("1e-3"), Some(0.001));
        assert_eq!(parse_decimal(""), None);
        assert_eq!(parse_decimal("abc"), None);
        assert_eq!(parse_decimal("NaN"), None);
        assert_eq!(parse_decimal("inf"), None);
    }

    #[test]
    fn test_non_negative_clamps_defects() {
        assert_eq!(non_negative(-3.0), 0.0);
        assert_eq!(non_negative(f64::NAN), 0.0);
        assert_eq!(non_negative(f64::INFINITY), 0.0);
        assert_eq!(non_negative(2.5), 2.5);
    }

    #[test]
    fn test_usd_per_native_guards_zero() {
        // priceNative missing → divide by 1
        assert_eq!(usd_per_native(2.0, None), 2.0);
        assert_eq!(usd_per_native(2.0, Some(0.0)), 2.0);
        // priceUsd zero → rate would be 0 → substitute 1
        assert_eq!(usd_per_native(0.0, Some(0.5)), 1.0);
        assert_eq!(usd_per_native(1.0, Some(0.01)), 100.0);
    }

    #[test]
    fn test_to_native() {
        assert_eq!(to_native(Some(1000.0), 100.0), 10.0);
        assert_eq!(to_native(None, 100.0), 0.0);
        assert_eq!(to_native(Some(-5.0), 100.0), 0.0);
        assert_eq!(to_native(Some(50.0), 0.0), 50.0);
    }

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address("  So1111 "), Some("So1111".to_string()));
        assert_eq!(normalize_address("0xAbC"), Some("0xabc".to_string()));
        assert_eq!(normalize_address("   "), None);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&mut vec![]), None);
        assert_eq!(median(&mut vec![3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut vec![4.0, 1.0, f64::NAN, 2.0, 3.0]), Some(2.5));
    }
}
