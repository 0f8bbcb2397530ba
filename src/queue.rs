//! Parsing of the spooler's "not completed" listing into [`QueueEntry`] records.
//!
//! Parsing is best-effort: a line that cannot be fully decomposed still
//! yields an entry, with the missing fields left empty. Timestamps look like
//! `Thu 04 Sep 2025 08:59:52 AM +07`; an hour-only offset is widened to
//! `+07:00`, and a timestamp without a usable offset is read as UTC+7.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;

use crate::error::{AgentError, Result};
use crate::spooler::ListingOutput;

const NO_JOBS_MARKER: &str = "no jobs";
const FALLBACK_OFFSET_SECS: i32 = 7 * 3600;

const OFFSET_FORMATS: [&str; 2] = ["%d %b %Y %I:%M:%S %p %:z", "%d %b %Y %H:%M:%S %:z"];
const NAIVE_FORMATS: [&str; 2] = ["%d %b %Y %I:%M:%S %p", "%d %b %Y %H:%M:%S"];

/// One pending job from a queue listing. Produced fresh on every poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueEntry {
    /// Queue-qualified job name, e.g. `PDF-12`
    pub job_name: String,
    pub user: Option<String>,
    pub size_bytes: Option<u64>,
    /// Timestamp text exactly as listed
    pub submitted_at_raw: Option<String>,
    /// Minutes since submission, rounded to 2 decimals; `None` if unparseable
    pub age_minutes: Option<f64>,
    pub raw_line: String,
}

/// Parse a listing captured at `now`.
///
/// # Errors
///
/// Returns [`AgentError::SpoolerQuery`] when the command failed for any
/// reason other than reporting an empty queue.
pub fn parse_listing(output: &ListingOutput, now: DateTime<Utc>) -> Result<Vec<QueueEntry>> {
    let no_jobs = reports_no_jobs(&output.stdout) || reports_no_jobs(&output.stderr);

    if output.exit_code != 0 && !no_jobs {
        let message = [output.stderr.trim(), output.stdout.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
            .unwrap_or("lpstat failed");
        return Err(AgentError::SpoolerQuery(message.to_string()));
    }

    if no_jobs || output.stdout.trim().is_empty() {
        return Ok(Vec::new());
    }

    Ok(output
        .stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| parse_line(line, now))
        .collect())
}

fn reports_no_jobs(text: &str) -> bool {
    text.to_ascii_lowercase().contains(NO_JOBS_MARKER)
}

/// Decompose a single non-blank listing line.
pub fn parse_line(line: &str, now: DateTime<Utc>) -> QueueEntry {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let job_name = tokens.first().copied().unwrap_or_default().to_string();
    let user = tokens.get(1).map(|s| s.to_string());

    let mut size_bytes = None;
    let mut submitted_at_raw = None;
    if let Some(pos) = tokens
        .iter()
        .skip(2)
        .position(|t| t.bytes().all(|b| b.is_ascii_digit()))
    {
        let idx = pos + 2;
        size_bytes = tokens[idx].parse().ok();
        let rest = tokens[idx + 1..].join(" ");
        if !rest.is_empty() {
            submitted_at_raw = Some(rest);
        }
    }

    let age_minutes = submitted_at_raw
        .as_deref()
        .and_then(parse_submitted_at)
        .map(|submitted| age_minutes(submitted, now));

    QueueEntry {
        job_name,
        user,
        size_bytes,
        submitted_at_raw,
        age_minutes,
        raw_line: line.to_string(),
    }
}

/// Parse a listing timestamp. Returns `None` when no format matches.
pub fn parse_submitted_at(text: &str) -> Option<DateTime<FixedOffset>> {
    let mut tokens: Vec<&str> = text.split_whitespace().collect();
    // Weekday names are informational; dropping them avoids rejecting a
    // timestamp whose weekday disagrees with its date.
    if tokens
        .first()
        .is_some_and(|t| t.chars().all(|c| c.is_ascii_alphabetic()))
    {
        tokens.remove(0);
    }
    if tokens.is_empty() {
        return None;
    }

    let normalized = normalize_offset(&tokens.join(" "));
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&normalized, fmt) {
            return Some(dt);
        }
    }

    if tokens.last().is_some_and(|t| is_zone_token(t)) {
        tokens.pop();
    }
    let bare = tokens.join(" ");
    let fallback = FixedOffset::east_opt(FALLBACK_OFFSET_SECS)?;
    NAIVE_FORMATS.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(&bare, fmt)
            .ok()
            .and_then(|naive| fallback.from_local_datetime(&naive).single())
    })
}

fn is_zone_token(token: &str) -> bool {
    token.starts_with('+')
        || token.starts_with('-')
        || (token.chars().all(|c| c.is_ascii_alphabetic())
            && !token.eq_ignore_ascii_case("am")
            && !token.eq_ignore_ascii_case("pm"))
}

/// Rewrite a trailing `±HH` or `±HHMM` offset as `±HH:MM`.
pub fn normalize_offset(ts: &str) -> String {
    let ts = ts.trim();
    let b = ts.as_bytes();
    let n = b.len();
    let sign = |i: usize| b[i] == b'+' || b[i] == b'-';
    let digits = |range: std::ops::Range<usize>| b[range].iter().all(u8::is_ascii_digit);

    if n >= 6 && sign(n - 6) && digits(n - 5..n - 3) && b[n - 3] == b':' && digits(n - 2..n) {
        return ts.to_string();
    }
    if n >= 5 && sign(n - 5) && digits(n - 4..n) {
        return format!("{}:{}", &ts[..n - 2], &ts[n - 2..]);
    }
    if n >= 3 && sign(n - 3) && digits(n - 2..n) {
        return format!("{}:00", ts);
    }
    ts.to_string()
}

/// Minutes between `submitted` and `now`, rounded to 2 decimals.
pub fn age_minutes(submitted: DateTime<FixedOffset>, now: DateTime<Utc>) -> f64 {
    let minutes = (now - submitted.with_timezone(&Utc)).num_milliseconds() as f64 / 60_000.0;
    (minutes * 100.0).round() / 100.0
}

/// Largest known age in the snapshot; 0 when no entry has one.
pub fn max_age(entries: &[QueueEntry]) -> f64 {
    entries
        .iter()
        .filter_map(|e| e.age_minutes)
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn normalize_widens_hour_offset() {
        assert_eq!(
            normalize_offset("04 Sep 2025 08:59:52 AM +07"),
            "04 Sep 2025 08:59:52 AM +07:00"
        );
        assert_eq!(normalize_offset("x -05"), "x -05:00");
    }

    #[test]
    fn normalize_keeps_full_offsets() {
        assert_eq!(normalize_offset("x +07:00"), "x +07:00");
        assert_eq!(normalize_offset("x +0530"), "x +05:30");
        assert_eq!(normalize_offset("08:59:52"), "08:59:52");
    }

    #[test]
    fn hour_offset_parses_same_instant_as_full_offset() {
        let short = parse_submitted_at("Thu 04 Sep 2025 08:59:52 AM +07").unwrap();
        let full = parse_submitted_at("Thu 04 Sep 2025 08:59:52 AM +07:00").unwrap();
        assert_eq!(short, full);
        assert_eq!(short.with_timezone(&Utc), at("2025-09-04T01:59:52Z"));
    }

    #[test]
    fn parses_24_hour_clock() {
        let dt = parse_submitted_at("Thu 04 Sep 2025 20:15:00 +0000").unwrap();
        assert_eq!(dt.with_timezone(&Utc), at("2025-09-04T20:15:00Z"));
    }

    #[test]
    fn pm_clock_is_converted() {
        let dt = parse_submitted_at("Thu 04 Sep 2025 01:00:00 PM +00").unwrap();
        assert_eq!(dt.with_timezone(&Utc), at("2025-09-04T13:00:00Z"));
    }

    #[test]
    fn missing_offset_falls_back_to_utc_plus_7() {
        let dt = parse_submitted_at("Thu 04 Sep 2025 08:59:52 AM").unwrap();
        assert_eq!(dt.offset().local_minus_utc(), 7 * 3600);
        assert_eq!(dt.with_timezone(&Utc), at("2025-09-04T01:59:52Z"));
    }

    #[test]
    fn zone_abbreviation_falls_back_to_utc_plus_7() {
        let dt = parse_submitted_at("Thu 04 Sep 2025 08:59:52 AM ICT").unwrap();
        assert_eq!(dt.with_timezone(&Utc), at("2025-09-04T01:59:52Z"));
    }

    #[test]
    fn garbage_timestamp_is_unparsed() {
        assert!(parse_submitted_at("yesterday-ish").is_none());
        assert!(parse_submitted_at("").is_none());
    }

    #[test]
    fn age_is_rounded_to_two_decimals() {
        let submitted = DateTime::parse_from_rfc3339("2025-09-04T01:00:00+00:00").unwrap();
        let now = at("2025-09-04T01:10:20Z");
        assert_eq!(age_minutes(submitted, now), 10.33);
    }

    #[test]
    fn age_is_monotonic_in_now() {
        let submitted = DateTime::parse_from_rfc3339("2025-09-04T01:00:00+00:00").unwrap();
        let mut previous = f64::MIN;
        for secs in (0..7200).step_by(37) {
            let now = at("2025-09-04T01:00:00Z") + chrono::Duration::seconds(secs);
            let age = age_minutes(submitted, now);
            assert!(age >= previous, "age went backwards at {}s", secs);
            previous = age;
        }
    }

    #[test]
    fn line_is_decomposed() {
        let now = at("2025-09-04T02:29:52Z");
        let entry = parse_line("PDF-12  pi  1024   Thu 04 Sep 2025 08:59:52 AM +07", now);
        assert_eq!(entry.job_name, "PDF-12");
        assert_eq!(entry.user.as_deref(), Some("pi"));
        assert_eq!(entry.size_bytes, Some(1024));
        assert_eq!(
            entry.submitted_at_raw.as_deref(),
            Some("Thu 04 Sep 2025 08:59:52 AM +07")
        );
        assert_eq!(entry.age_minutes, Some(30.0));
    }

    #[test]
    fn undecomposable_line_is_kept() {
        let now = at("2025-09-04T02:00:00Z");
        let entry = parse_line("PDF-13 pi", now);
        assert_eq!(entry.job_name, "PDF-13");
        assert_eq!(entry.size_bytes, None);
        assert_eq!(entry.submitted_at_raw, None);
        assert_eq!(entry.age_minutes, None);
        assert_eq!(entry.raw_line, "PDF-13 pi");
    }

    #[test]
    fn max_age_ignores_unparsed() {
        let now = at("2025-09-04T02:00:00Z");
        let entries = vec![parse_line("PDF-1 pi", now)];
        assert_eq!(max_age(&entries), 0.0);
    }
}
