//! Parsing of human-written durations such as `30s`, `10m` or `1h30m`.

use std::time::Duration;

/// Parse a duration string made of `<number><unit>` groups.
///
/// Supported units are `ms`, `s`, `m` and `h`. Groups may be combined
/// (`1h30m`, `2m30s`) and fractional numbers are accepted (`1.5h`). A zero
/// total is rejected.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = 0f64;
    let mut chars = trimmed.chars().peekable();

    while chars.peek().is_some() {
        let mut number = String::new();
        while let Some(c) = chars.peek() {
            if c.is_ascii_digit() || *c == '.' {
                number.push(*c);
                chars.next();
            } else {
                break;
            }
        }
        if number.is_empty() {
            return Err(format!("expected a number in '{}'", input));
        }
        let value: f64 = number
            .parse()
            .map_err(|_| format!("invalid number '{}' in '{}'", number, input))?;

        let mut unit = String::new();
        while let Some(c) = chars.peek() {
            if c.is_ascii_alphabetic() {
                unit.push(*c);
                chars.next();
            } else {
                break;
            }
        }

        let millis = match unit.as_str() {
            "ms" => value,
            "s" => value * 1_000.0,
            "m" => value * 60_000.0,
            "h" => value * 3_600_000.0,
            "" => return Err(format!("missing unit in '{}'", input)),
            other => return Err(format!("unknown unit '{}' in '{}'", other, input)),
        };
        total += millis;
    }

    if total <= 0.0 {
        return Err(format!("duration '{}' must be greater than zero", input));
    }

    Ok(Duration::from_micros((total * 1_000.0).round() as u64))
}
