//! Human-readable number and duration formatting for the status renderer
//! and the rate/read loggers.

/// Format `num` using SI (powers of 1000) or binary (powers of 1024)
/// magnitude prefixes, dividing repeatedly until the magnitude is at or
/// below `limit` (clamped to `[999, 999_999]`, matching the original).
pub fn format_num(num: i64, limit: i64, binary: bool) -> String {
    const SI_PREFIX: [&str; 8] = ["k", "M", "G", "T", "P", "E", "Z", "Y"];
    const BINARY_PREFIX: [&str; 8] = ["Ki", "Mi", "Gi", "Ti", "Pi", "Ei", "Zi", "Yi"];

    let factor: i64 = if binary { 1024 } else { 1000 };
    let prefixes = if binary { &BINARY_PREFIX } else { &SI_PREFIX };
    let limit = limit.clamp(999, 999_999);

    let mut n = num;
    let mut p = "";
    for prefix in prefixes.iter() {
        if n.abs() <= limit {
            break;
        }
        n /= factor;
        p = prefix;
    }
    if p.is_empty() {
        format!("{n}")
    } else {
        format!("{n} {p}")
    }
}

/// Format a duration in seconds as `<n> <unit>` or `<n>.<fraction> <unit>`,
/// picking the coarsest unit (`d`, `h`, `m`, `s`) that keeps the leading
/// number small, with a two-digit fractional remainder.
pub fn format_time(t: i64) -> String {
    let (mut t, fraction, unit) = if t >= 86_400 {
        (t / 86_400, (t % 86_400) / 864, 'd')
    } else if t >= 3_600 {
        (t / 3_600, (t % 3_600) / 36, 'h')
    } else if t >= 60 {
        (t / 60, (10 * (t % 60)) / 6, 'm')
    } else {
        (t, 0, 's')
    };
    if unit == 's' {
        t = t.max(0);
    }
    if fraction == 0 {
        format!("{t} {unit}")
    } else {
        format!("{t}.{fraction:02} {unit}")
    }
}

/// Format a duration as `H:MM:SS`, used by the rate/read loggers.
pub fn format_time_hms(t: i64) -> String {
    let s = t.rem_euclid(60);
    let m = (t.div_euclid(60)).rem_euclid(60);
    let h = t.div_euclid(3600);
    format!("{h:2}:{m:02}:{s:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_num_below_limit_has_no_prefix() {
        assert_eq!(format_num(42, 99999, false), "42");
    }

    #[test]
    fn format_num_applies_si_prefix() {
        assert_eq!(format_num(5_000_000, 99999, false), "5 M");
    }

    #[test]
    fn format_num_applies_binary_prefix() {
        assert_eq!(format_num(2 * 1024 * 1024, 99999, true), "2 Mi");
    }

    #[test]
    fn format_time_seconds_only() {
        assert_eq!(format_time(42), "42 s");
    }

    #[test]
    fn format_time_minutes_with_fraction() {
        assert_eq!(format_time(90), "1.50 m");
    }

    #[test]
    fn format_time_days() {
        assert_eq!(format_time(86_400 + 43_200), "1.50 d");
    }

    #[test]
    fn format_time_hms_rolls_over_hours() {
        assert_eq!(format_time_hms(3 * 3600 + 61), "3:01:01");
    }
}
