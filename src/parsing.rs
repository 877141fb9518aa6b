//! Parsing utilities for schedule grammars.
//!
//! Defensive parsing of the small textual grammars the CLI accepts:
//! humantime durations (`500ms`, `10s`, `5m`), rate specs (`10/1s`), and
//! retry patterns (`0,10m,30m`). All functions return `Result<T, String>`
//! so they can double as clap value parsers; the config layer attaches the
//! offending option name when it converts the message into a config error.

use std::fmt;
use std::time::Duration;

/// Parse a humantime-style duration (`500ms`, `10s`, `5m`, `1h`).
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime::parse_duration(s.trim()).map_err(|e| format!("bad duration '{}': {}", s.trim(), e))
}

/// A request budget: at most `limit` requests per sliding `window`.
///
/// Parsed from the `<integer>/<duration>` grammar. Formatting is canonical,
/// so `format!("{}", spec)` round-trips for canonical inputs:
///
/// ```
/// use repeater::parsing::RateSpec;
///
/// let spec: RateSpec = "10/1s".parse().unwrap();
/// assert_eq!(spec.limit, 10);
/// assert_eq!(spec.to_string(), "10/1s");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSpec {
    /// Maximum admitted requests per window.
    pub limit: u32,
    /// Sliding window length.
    pub window: Duration,
}

impl std::str::FromStr for RateSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        let s = s.trim();
        let (limit, window) = s
            .split_once('/')
            .ok_or_else(|| format!("bad rate spec '{}': expected <count>/<window>", s))?;
        let limit: u32 = limit
            .trim()
            .parse()
            .map_err(|_| format!("bad rate spec '{}': count must be a non-negative integer", s))?;
        let window = parse_duration(window)?;
        if window.is_zero() {
            return Err(format!("bad rate spec '{}': window must be positive", s));
        }
        Ok(RateSpec { limit, window })
    }
}

impl fmt::Display for RateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.limit, humantime::format_duration(self.window))
    }
}

/// Parse a retry pattern: comma-separated offsets, or the literal `0`.
///
/// Each offset is a duration from a scheduled start. Offsets are sorted and
/// deduplicated; the result is never empty.
pub fn parse_retry_pattern(s: &str) -> Result<Vec<Duration>, String> {
    let mut offsets = Vec::new();
    for part in s.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err(format!("bad retry pattern '{}': empty offset", s));
        }
        if part == "0" {
            offsets.push(Duration::ZERO);
        } else {
            offsets.push(parse_duration(part)?);
        }
    }
    offsets.sort();
    offsets.dedup();
    Ok(offsets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("ten seconds-ish").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_rate_spec_parse() {
        let spec: RateSpec = "10/1s".parse().unwrap();
        assert_eq!(spec.limit, 10);
        assert_eq!(spec.window, Duration::from_secs(1));

        let spec: RateSpec = "100/1m".parse().unwrap();
        assert_eq!(spec.limit, 100);
        assert_eq!(spec.window, Duration::from_secs(60));
    }

    #[test]
    fn test_rate_spec_round_trip() {
        for canonical in ["10/1s", "100/1m", "5/500ms", "1/1h"] {
            let spec: RateSpec = canonical.parse().unwrap();
            assert_eq!(spec.to_string(), canonical);
        }
    }

    #[test]
    fn test_rate_spec_zero_limit_parses() {
        // A zero budget is valid grammar; the limiter admits nothing.
        let spec: RateSpec = "0/1m".parse().unwrap();
        assert_eq!(spec.limit, 0);
    }

    #[test]
    fn test_rate_spec_rejects_bad_shapes() {
        assert!("10".parse::<RateSpec>().is_err());
        assert!("ten/1s".parse::<RateSpec>().is_err());
        assert!("10/0s".parse::<RateSpec>().is_err());
        assert!("-1/1s".parse::<RateSpec>().is_err());
    }

    #[test]
    fn test_retry_pattern_literal_zero() {
        assert_eq!(parse_retry_pattern("0").unwrap(), vec![Duration::ZERO]);
    }

    #[test]
    fn test_retry_pattern_offsets() {
        let pattern = parse_retry_pattern("0,10m,30m").unwrap();
        assert_eq!(
            pattern,
            vec![
                Duration::ZERO,
                Duration::from_secs(600),
                Duration::from_secs(1800)
            ]
        );
    }

    #[test]
    fn test_retry_pattern_sorts_and_dedupes() {
        let pattern = parse_retry_pattern("30m,0,10m,10m").unwrap();
        assert_eq!(
            pattern,
            vec![
                Duration::ZERO,
                Duration::from_secs(600),
                Duration::from_secs(1800)
            ]
        );
    }

    #[test]
    fn test_retry_pattern_rejects_trailing_comma() {
        assert!(parse_retry_pattern("0,10m,").is_err());
    }
}
