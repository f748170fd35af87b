use std::time::Duration;

/// Parse a Go-style duration such as `90s`, `10m`, `1h30m`, `1.5h` or `500ms`.
/// A bare `0` is accepted. Negative durations parse to zero, which the
/// session layer treats like any other non-positive timeout.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    let (negative, mut rest) = match s.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(format!("invalid duration `{input}`"));
    }

    let mut secs = 0f64;
    while !rest.is_empty() {
        let num_end = rest.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(rest.len());
        let (num, tail) = rest.split_at(num_end);
        if num.is_empty() || num == "." {
            return Err(format!("invalid duration `{input}`"));
        }
        let value: f64 = num.parse().map_err(|_| format!("invalid number `{num}` in duration `{input}`"))?;

        let unit_end = tail.find(|c: char| c.is_ascii_digit() || c == '.').unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_end);
        let scale = match unit {
            "ns" => 1e-9,
            "us" | "µs" | "μs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "" => return Err(format!("missing unit in duration `{input}`")),
            other => return Err(format!("unknown unit `{other}` in duration `{input}`")),
        };
        secs += value * scale;
        rest = tail;
    }

    if negative {
        return Ok(Duration::ZERO);
    }
    Duration::try_from_secs_f64(secs).map_err(|e| format!("duration `{input}` out of range: {e}"))
}
