use regex::Regex;
use std::time::Duration;

use crate::error::{Result, TimelineError};

lazy_static::lazy_static! {
    static ref TIME_TEXT: Regex =
        Regex::new(r"^\s*(?:(?P<minutes>\d+):)?(?P<seconds>\d+(?:\.\d+)?)\s*$")
            .expect("time text pattern is valid");
}

/// Formats a scheduled time as `mm:ss`, with a trimmed millisecond fraction when present.
pub fn format_time(time: Duration) -> String {
    let total_millis = time.as_millis();
    let minutes = total_millis / 60_000;
    let seconds = (total_millis / 1_000) % 60;
    let millis = total_millis % 1_000;

    let mut text = format!("{minutes:02}:{seconds:02}");
    if millis != 0 {
        let fraction = format!("{millis:03}");
        text.push('.');
        text.push_str(fraction.trim_end_matches('0'));
    }
    text
}

/// Parses `mm:ss[.fff]` or bare seconds. An empty value is time zero.
pub fn parse_time(text: &str) -> Result<Duration> {
    if text.trim().is_empty() {
        return Ok(Duration::ZERO);
    }

    let captures = TIME_TEXT
        .captures(text)
        .ok_or_else(|| TimelineError::InvalidTime(text.to_string()))?;

    let minutes = captures
        .name("minutes")
        .map(|value| value.as_str().parse::<u64>())
        .transpose()
        .map_err(|_| TimelineError::InvalidTime(text.to_string()))?
        .unwrap_or(0);
    let seconds = captures["seconds"]
        .parse::<f64>()
        .map_err(|_| TimelineError::InvalidTime(text.to_string()))?;

    let total_millis = minutes
        .saturating_mul(60_000)
        .saturating_add((seconds * 1_000.0).round() as u64);
    Ok(Duration::from_millis(total_millis))
}

#[cfg(test)]
mod tests {
    use super::{format_time, parse_time};
    use std::time::Duration;

    #[test]
    fn formats_minutes_seconds_and_trimmed_fraction() {
        assert_eq!(format_time(Duration::ZERO), "00:00");
        assert_eq!(format_time(Duration::from_secs(75)), "01:15");
        assert_eq!(format_time(Duration::from_millis(90_500)), "01:30.5");
        assert_eq!(format_time(Duration::from_millis(5_025)), "00:05.025");
        assert_eq!(format_time(Duration::from_secs(3_600)), "60:00");
    }

    #[test]
    fn parses_both_notations() {
        assert_eq!(parse_time("01:15").unwrap(), Duration::from_secs(75));
        assert_eq!(parse_time("01:30.5").unwrap(), Duration::from_millis(90_500));
        assert_eq!(parse_time("75").unwrap(), Duration::from_secs(75));
        assert_eq!(parse_time(" 7.25 ").unwrap(), Duration::from_millis(7_250));
        assert_eq!(parse_time("").unwrap(), Duration::ZERO);
    }

    #[test]
    fn rejects_negative_and_garbage() {
        assert!(parse_time("-5").is_err());
        assert!(parse_time("1:2:3").is_err());
        assert!(parse_time("soon").is_err());
    }

    #[test]
    fn formatted_text_parses_back() {
        for millis in [0_u64, 1, 999, 59_999, 60_000, 61_250, 3_599_100] {
            let time = Duration::from_millis(millis);
            assert_eq!(parse_time(&format_time(time)).unwrap(), time);
        }
    }
}
