//! Conditional request evaluation (RFC 7232) and `Range` header parsing.

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};

/// Outcome of evaluating the conditional headers against a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    Proceed,
    /// 304 for GET/HEAD.
    NotModified,
    /// 412 for everything else.
    Failed,
}

/// Evaluate `If-Match` / `If-Unmodified-Since` / `If-None-Match` /
/// `If-Modified-Since` in RFC 7232 precedence order. `is_read` is true for
/// GET/HEAD, where an `If-None-Match` hit yields 304 instead of 412.
pub fn evaluate_preconditions(
    etag: &str,
    last_modified: DateTime<Utc>,
    headers: &HeaderMap,
    is_read: bool,
) -> Precondition {
    let if_match = header_str(headers, "if-match");
    let if_none_match = header_str(headers, "if-none-match");

    // (1) If-Match
    if let Some(values) = if_match {
        if !etag_list_matches(values, etag) {
            return Precondition::Failed;
        }
    } else if let Some(date) = header_date(headers, "if-unmodified-since") {
        // (2) If-Unmodified-Since, only without If-Match
        if truncate_secs(last_modified) > truncate_secs(date) {
            return Precondition::Failed;
        }
    }

    // (3) If-None-Match
    if let Some(values) = if_none_match {
        if etag_list_matches(values, etag) {
            return if is_read {
                Precondition::NotModified
            } else {
                Precondition::Failed
            };
        }
    } else if is_read {
        // (4) If-Modified-Since, only without If-None-Match
        if let Some(date) = header_date(headers, "if-modified-since") {
            if truncate_secs(last_modified) <= truncate_secs(date) {
                return Precondition::NotModified;
            }
        }
    }

    Precondition::Proceed
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn header_date(headers: &HeaderMap, name: &str) -> Option<DateTime<Utc>> {
    header_str(headers, name)
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Dates compare at second resolution.
fn truncate_secs(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

/// True when any entry in the comma-separated list matches the target ETag.
/// Entries are compared with surrounding quotes stripped; `*` always matches
/// (the target is known to exist by the time this runs).
fn etag_list_matches(list: &str, etag: &str) -> bool {
    let target = etag.trim_matches('"');
    list.split(',').any(|candidate| {
        let candidate = candidate.trim().trim_matches('"');
        candidate == "*" || candidate == target
    })
}

/// Why a `Range` header could not be honoured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeError {
    /// Start beyond the object, zero-length suffix, inverted bounds,
    /// multi-range, or unparseable spec.
    Unsatisfiable,
}

/// Parse a `Range` header against an object of `size` bytes, returning the
/// inclusive `(start, end)` span to serve.
///
/// Accepted forms: `bytes=S-E`, `bytes=S-`, `bytes=-N`. `E` past the end is
/// clamped; a suffix of `N >= size` yields the whole object. Multi-range is
/// rejected.
pub fn parse_range(value: &str, size: u64) -> Result<(u64, u64), RangeError> {
    let spec = value
        .trim()
        .strip_prefix("bytes=")
        .ok_or(RangeError::Unsatisfiable)?;

    if spec.contains(',') {
        return Err(RangeError::Unsatisfiable);
    }
    if size == 0 {
        return Err(RangeError::Unsatisfiable);
    }

    let (start_s, end_s) = spec.split_once('-').ok_or(RangeError::Unsatisfiable)?;
    let start_s = start_s.trim();
    let end_s = end_s.trim();

    if start_s.is_empty() {
        // Suffix form: bytes=-N, the last N bytes.
        let n: u64 = end_s.parse().map_err(|_| RangeError::Unsatisfiable)?;
        if n == 0 {
            return Err(RangeError::Unsatisfiable);
        }
        let start = size.saturating_sub(n);
        return Ok((start, size - 1));
    }

    let start: u64 = start_s.parse().map_err(|_| RangeError::Unsatisfiable)?;
    if start >= size {
        return Err(RangeError::Unsatisfiable);
    }

    let end = if end_s.is_empty() {
        size - 1
    } else {
        let end: u64 = end_s.parse().map_err(|_| RangeError::Unsatisfiable)?;
        if start > end {
            return Err(RangeError::Unsatisfiable);
        }
        end.min(size - 1)
    };

    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::TimeZone;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    fn lm() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap()
    }

    const ETAG: &str = "\"abc123\"";

    #[test]
    fn test_no_conditionals_proceed() {
        let h = headers(&[]);
        assert_eq!(
            evaluate_preconditions(ETAG, lm(), &h, true),
            Precondition::Proceed
        );
    }

    #[test]
    fn test_if_match() {
        let h = headers(&[("if-match", "\"abc123\"")]);
        assert_eq!(
            evaluate_preconditions(ETAG, lm(), &h, true),
            Precondition::Proceed
        );

        let h = headers(&[("if-match", "\"other\"")]);
        assert_eq!(
            evaluate_preconditions(ETAG, lm(), &h, true),
            Precondition::Failed
        );

        let h = headers(&[("if-match", "*")]);
        assert_eq!(
            evaluate_preconditions(ETAG, lm(), &h, true),
            Precondition::Proceed
        );
    }

    #[test]
    fn test_if_match_list_and_quotes() {
        let h = headers(&[("if-match", "\"x\", abc123 , \"y\"")]);
        assert_eq!(
            evaluate_preconditions(ETAG, lm(), &h, true),
            Precondition::Proceed
        );
    }

    #[test]
    fn test_if_none_match_read_vs_write() {
        let h = headers(&[("if-none-match", ETAG)]);
        assert_eq!(
            evaluate_preconditions(ETAG, lm(), &h, true),
            Precondition::NotModified
        );
        assert_eq!(
            evaluate_preconditions(ETAG, lm(), &h, false),
            Precondition::Failed
        );

        let h = headers(&[("if-none-match", "\"different\"")]);
        assert_eq!(
            evaluate_preconditions(ETAG, lm(), &h, true),
            Precondition::Proceed
        );
    }

    #[test]
    fn test_if_unmodified_since() {
        // Modified exactly at the header date: not failed.
        let h = headers(&[("if-unmodified-since", "Sun, 15 Mar 2026 12:00:00 GMT")]);
        assert_eq!(
            evaluate_preconditions(ETAG, lm(), &h, false),
            Precondition::Proceed
        );

        // Modified after the header date: failed.
        let h = headers(&[("if-unmodified-since", "Sun, 15 Mar 2026 11:59:59 GMT")]);
        assert_eq!(
            evaluate_preconditions(ETAG, lm(), &h, false),
            Precondition::Failed
        );
    }

    #[test]
    fn test_if_match_shadows_if_unmodified_since() {
        // If-Match passes, so the (stale) If-Unmodified-Since is ignored.
        let h = headers(&[
            ("if-match", ETAG),
            ("if-unmodified-since", "Sun, 15 Mar 2026 11:00:00 GMT"),
        ]);
        assert_eq!(
            evaluate_preconditions(ETAG, lm(), &h, false),
            Precondition::Proceed
        );
    }

    #[test]
    fn test_if_modified_since() {
        let h = headers(&[("if-modified-since", "Sun, 15 Mar 2026 12:00:00 GMT")]);
        assert_eq!(
            evaluate_preconditions(ETAG, lm(), &h, true),
            Precondition::NotModified
        );

        let h = headers(&[("if-modified-since", "Sun, 15 Mar 2026 11:00:00 GMT")]);
        assert_eq!(
            evaluate_preconditions(ETAG, lm(), &h, true),
            Precondition::Proceed
        );
    }

    #[test]
    fn test_if_none_match_shadows_if_modified_since() {
        let h = headers(&[
            ("if-none-match", "\"different\""),
            ("if-modified-since", "Sun, 15 Mar 2026 12:00:00 GMT"),
        ]);
        assert_eq!(
            evaluate_preconditions(ETAG, lm(), &h, true),
            Precondition::Proceed
        );
    }

    // === Range parsing ===

    #[test]
    fn test_range_basic() {
        assert_eq!(parse_range("bytes=0-4", 26), Ok((0, 4)));
        assert_eq!(parse_range("bytes=5-", 26), Ok((5, 25)));
        assert_eq!(parse_range("bytes=-5", 26), Ok((21, 25)));
    }

    #[test]
    fn test_range_clamping() {
        assert_eq!(parse_range("bytes=20-99", 26), Ok((20, 25)));
        // Suffix longer than the object yields the whole object.
        assert_eq!(parse_range("bytes=-100", 26), Ok((0, 25)));
    }

    #[test]
    fn test_range_unsatisfiable() {
        assert_eq!(parse_range("bytes=26-", 26), Err(RangeError::Unsatisfiable));
        assert_eq!(parse_range("bytes=99-100", 26), Err(RangeError::Unsatisfiable));
        assert_eq!(parse_range("bytes=-0", 26), Err(RangeError::Unsatisfiable));
        // Inverted bounds.
        assert_eq!(parse_range("bytes=10-5", 26), Err(RangeError::Unsatisfiable));
        // Multi-range is rejected.
        assert_eq!(parse_range("bytes=0-1,3-4", 26), Err(RangeError::Unsatisfiable));
        // Garbage.
        assert_eq!(parse_range("lines=0-4", 26), Err(RangeError::Unsatisfiable));
        assert_eq!(parse_range("bytes=a-b", 26), Err(RangeError::Unsatisfiable));
    }

    #[test]
    fn test_range_empty_object() {
        assert_eq!(parse_range("bytes=0-", 0), Err(RangeError::Unsatisfiable));
        assert_eq!(parse_range("bytes=-1", 0), Err(RangeError::Unsatisfiable));
    }

    #[test]
    fn test_range_single_byte() {
        assert_eq!(parse_range("bytes=0-0", 1), Ok((0, 0)));
        assert_eq!(parse_range("bytes=-1", 1), Ok((0, 0)));
    }
}
