//! Small parsing and formatting helpers shared by commands

/// Parse a compact duration token like `30s`, `10m`, `2h`, `1d`, or plain
/// seconds. Segments compose, so `1h30m` works. `None` means the token is
/// not a duration at all.
pub fn parse_duration_seconds(raw: &str) -> Option<u64> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    let compact: String = value.chars().filter(|ch| !ch.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }

    let bytes = compact.as_bytes();
    let mut cursor = 0;
    let mut total_seconds = 0_u64;
    let mut saw_unit_segment = false;

    while cursor < bytes.len() {
        let number_start = cursor;
        while cursor < bytes.len() && bytes[cursor].is_ascii_digit() {
            cursor += 1;
        }

        if number_start == cursor {
            return None;
        }

        let number = compact[number_start..cursor].parse::<u64>().ok()?;
        if number == 0 {
            return None;
        }

        let saw_unit = cursor < bytes.len();
        let multiplier = if saw_unit {
            let unit = bytes[cursor] as char;
            cursor += 1;

            match unit {
                's' | 'S' => 1_u64,
                'm' | 'M' => 60_u64,
                'h' | 'H' => 60_u64 * 60,
                'd' | 'D' => 60_u64 * 60 * 24,
                'w' | 'W' => 60_u64 * 60 * 24 * 7,
                _ => return None,
            }
        } else {
            1_u64
        };

        // A bare number is only a seconds count when it is the whole token
        if !saw_unit && saw_unit_segment {
            return None;
        }

        saw_unit_segment = saw_unit_segment || saw_unit;

        let part_seconds = number.checked_mul(multiplier)?;
        total_seconds = total_seconds.checked_add(part_seconds)?;
    }

    if total_seconds == 0 { None } else { Some(total_seconds) }
}

/// Render a duration as plain English, largest units first
pub fn format_duration(duration: chrono::Duration) -> String {
    const UNITS: [(i64, &str); 4] = [
        (60 * 60 * 24, "day"),
        (60 * 60, "hour"),
        (60, "minute"),
        (1, "second"),
    ];

    let mut seconds = duration.num_seconds().max(0);
    let mut parts = Vec::new();
    for (size, name) in UNITS {
        let count = seconds / size;
        if count > 0 {
            seconds %= size;
            let plural = if count == 1 { "" } else { "s" };
            parts.push(format!("{count} {name}{plural}"));
        }
    }

    if parts.is_empty() {
        "0 seconds".to_string()
    } else {
        parts.join(" ")
    }
}

/// Neutralize markdown and mentions in moderator-supplied text before it
/// is stored or echoed anywhere
pub fn sanitize_reason(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '*' | '_' | '`' | '~' | '|' | '>' => {
                out.push('\\');
                out.push(ch);
            }
            '@' => {
                out.push('@');
                out.push('\u{200B}');
            }
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_units() {
        assert_eq!(parse_duration_seconds("30s"), Some(30));
        assert_eq!(parse_duration_seconds("10m"), Some(600));
        assert_eq!(parse_duration_seconds("2h"), Some(7200));
        assert_eq!(parse_duration_seconds("1d"), Some(86_400));
        assert_eq!(parse_duration_seconds("1w"), Some(604_800));
    }

    #[test]
    fn parses_compound_and_bare_seconds() {
        assert_eq!(parse_duration_seconds("1h30m"), Some(5400));
        assert_eq!(parse_duration_seconds(" 90 "), Some(90));
    }

    #[test]
    fn rejects_junk() {
        assert_eq!(parse_duration_seconds(""), None);
        assert_eq!(parse_duration_seconds("soon"), None);
        assert_eq!(parse_duration_seconds("0m"), None);
        assert_eq!(parse_duration_seconds("1x"), None);
        assert_eq!(parse_duration_seconds("1h30"), None);
    }

    #[test]
    fn formats_durations_in_english() {
        assert_eq!(format_duration(chrono::Duration::minutes(15)), "15 minutes");
        assert_eq!(format_duration(chrono::Duration::minutes(1)), "1 minute");
        assert_eq!(
            format_duration(chrono::Duration::seconds(3661)),
            "1 hour 1 minute 1 second"
        );
        assert_eq!(format_duration(chrono::Duration::seconds(0)), "0 seconds");
    }

    #[test]
    fn sanitizes_markdown_and_mentions() {
        let clean = sanitize_reason("**bold** @everyone");
        assert_eq!(clean, "\\*\\*bold\\*\\* @\u{200B}everyone");
    }
}
