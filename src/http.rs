//! Timing extraction from HTTP responses captured in command output.
//!
//! Commands that probe HTTP services (curl with `-i`, health checkers) often
//! print the full response. When the server advertises retry timing -- a
//! `Retry-After` header or a JSON `retry_after` field -- that timing beats
//! any locally computed schedule. This module does the extraction; the
//! HTTP-aware scheduler wrapper applies it.
//!
//! Priority: header beats JSON. Within JSON, top-level fields beat
//! `error.retry_after`, which beats `rate_limit.reset_in`, which beats
//! `backoff.delay`.

use std::time::Duration;

use regex::Regex;
use serde_json::Value;

/// Where a [`TimingInfo`] was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingSource {
    /// `Retry-After` response header (or a configured custom header).
    RetryAfterHeader,
    /// Top-level or `error.retry_after` JSON field.
    JsonRetryAfter,
    /// `rate_limit.reset_in` JSON field.
    JsonRateLimit,
    /// `backoff.delay` JSON field.
    JsonBackoff,
}

impl TimingSource {
    /// Stable name for logs and the timing report.
    pub fn as_str(&self) -> &'static str {
        match self {
            TimingSource::RetryAfterHeader => "retry-after-header",
            TimingSource::JsonRetryAfter => "json-retry-after",
            TimingSource::JsonRateLimit => "json-rate-limit",
            TimingSource::JsonBackoff => "json-backoff",
        }
    }
}

/// Server-advertised retry timing extracted from a response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingInfo {
    /// Delay until the next attempt.
    pub delay: Duration,
    /// Where the delay came from.
    pub source: TimingSource,
    /// Extraction confidence in `[0, 1]`: header 1.0, flat JSON field 0.9,
    /// nested field 0.8.
    pub confidence: f64,
}

/// Configuration for the response parser and the HTTP-aware wrapper.
#[derive(Debug, Clone)]
pub struct HttpAwareConfig {
    /// Lower clamp for extracted delays (also applied when a header says 0).
    pub min_delay: Duration,
    /// Upper clamp for extracted delays.
    pub max_delay: Duration,
    /// Look for timing in JSON bodies.
    pub parse_json: bool,
    /// Look for timing in response headers.
    pub parse_headers: bool,
    /// Extract timing from 4xx statuses other than 429/403.
    pub trust_client_errors: bool,
    /// Extra top-level JSON field names checked before the built-in ones.
    pub json_fields: Vec<String>,
    /// Extra header names checked before `Retry-After`.
    pub header_names: Vec<String>,
}

impl Default for HttpAwareConfig {
    fn default() -> Self {
        HttpAwareConfig {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3600),
            parse_json: true,
            parse_headers: true,
            trust_client_errors: false,
            json_fields: Vec::new(),
            header_names: Vec::new(),
        }
    }
}

/// Whether command output looks like a captured HTTP response.
pub fn looks_like_http(output: &str) -> bool {
    output.trim_start().starts_with("HTTP/")
}

/// Extract retry timing from a captured HTTP response, if any.
///
/// Returns `None` for non-HTTP output, uninteresting statuses, and
/// responses without usable timing. All parse failures degrade to `None`;
/// nothing here is fatal to the run.
pub fn extract_timing(output: &str, config: &HttpAwareConfig) -> Option<TimingInfo> {
    let output = output.trim_start();
    let status = extract_status(output)?;
    if !status_wants_timing(status, config.trust_client_errors) {
        return None;
    }

    let (head, body) = split_response(output);

    if config.parse_headers {
        if let Some(delay) = header_timing(head, config) {
            return Some(TimingInfo {
                delay,
                source: TimingSource::RetryAfterHeader,
                confidence: 1.0,
            });
        }
    }

    if config.parse_json {
        if let Some(info) = body_timing(body?, config) {
            return Some(info);
        }
    }

    None
}

/// Status code from the first `HTTP/<d>.<d> <code>` line.
fn extract_status(output: &str) -> Option<u16> {
    // Compiled per call; responses are parsed at most once per attempt.
    let re = Regex::new(r"HTTP/\d\.\d\s+(\d{3})").ok()?;
    let first_line = output.lines().next()?;
    let caps = re.captures(first_line)?;
    caps.get(1)?.as_str().parse().ok()
}

/// Which statuses carry timing worth honoring: 5xx, 429, 403, and other
/// 4xx only when client errors are trusted. 2xx never.
fn status_wants_timing(status: u16, trust_client_errors: bool) -> bool {
    match status {
        500..=599 => true,
        429 | 403 => true,
        400..=499 => trust_client_errors,
        _ => false,
    }
}

/// Split a raw response into header section and body (after `\r\n\r\n`).
fn split_response(output: &str) -> (&str, Option<&str>) {
    match output.split_once("\r\n\r\n") {
        Some((head, body)) => (head, Some(body)),
        None => (output, None),
    }
}

/// Search the header section for a delta-seconds retry header.
///
/// Case-insensitive. Negative values are ignored; zero is clamped up to the
/// configured minimum delay.
fn header_timing(head: &str, config: &HttpAwareConfig) -> Option<Duration> {
    let mut names: Vec<String> = config
        .header_names
        .iter()
        .map(|n| n.to_ascii_lowercase())
        .collect();
    names.push("retry-after".to_string());

    for line in head.lines().skip(1) {
        let (name, value) = match line.split_once(':') {
            Some(pair) => pair,
            None => continue,
        };
        if !names.contains(&name.trim().to_ascii_lowercase()) {
            continue;
        }
        // Delta-seconds only; the HTTP-date form is not supported.
        let secs: i64 = match value.trim().parse() {
            Ok(v) => v,
            Err(_) => continue,
        };
        if secs < 0 {
            continue;
        }
        if secs == 0 {
            return Some(config.min_delay);
        }
        return Some(Duration::from_secs(secs as u64));
    }
    None
}

/// Search a JSON body for timing fields, in priority order.
fn body_timing(body: &str, config: &HttpAwareConfig) -> Option<TimingInfo> {
    let body = body.trim();
    if !(body.starts_with('{') && body.ends_with('}')) {
        return None;
    }
    let value: Value = serde_json::from_str(body).ok()?;

    for field in &config.json_fields {
        if let Some(delay) = numeric_delay(value.get(field.as_str())) {
            return Some(timing(delay, TimingSource::JsonRetryAfter, 0.9));
        }
    }
    for field in ["retry_after", "retryAfter"] {
        if let Some(delay) = numeric_delay(value.get(field)) {
            return Some(timing(delay, TimingSource::JsonRetryAfter, 0.9));
        }
    }
    if let Some(delay) = numeric_delay(value.pointer("/error/retry_after")) {
        return Some(timing(delay, TimingSource::JsonRetryAfter, 0.8));
    }
    if let Some(delay) = numeric_delay(value.pointer("/rate_limit/reset_in")) {
        return Some(timing(delay, TimingSource::JsonRateLimit, 0.8));
    }
    if let Some(delay) = numeric_delay(value.pointer("/backoff/delay")) {
        return Some(timing(delay, TimingSource::JsonBackoff, 0.8));
    }
    None
}

fn timing(delay: Duration, source: TimingSource, confidence: f64) -> TimingInfo {
    TimingInfo {
        delay,
        source,
        confidence,
    }
}

/// Interpret a JSON value as a positive delay in seconds.
///
/// Accepts integers, floats, and numeric strings. Fractional seconds round
/// up. Non-positive values yield no timing.
fn numeric_delay(value: Option<&Value>) -> Option<Duration> {
    let secs = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !secs.is_finite() || secs <= 0.0 {
        return None;
    }
    Some(Duration::from_secs(secs.ceil() as u64))
}
