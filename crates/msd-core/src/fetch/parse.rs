//! Pure parsing of HTTP response header lines.

use super::{FetchError, ProbeInfo};
use crate::segmenter::ByteRange;

/// Parsed `Content-Range: bytes first-last/total` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub first: u64,
    pub last: u64,
    /// `None` when the total is `*` (unknown).
    pub total: Option<u64>,
}

/// Status code from a status line such as `HTTP/1.1 206 Partial Content`.
pub fn parse_http_status(line: &str) -> Option<u32> {
    let mut parts = line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

/// Parse a `Content-Range` value. Only the `bytes` unit is accepted and
/// `first <= last < total` must hold.
pub fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (span, total) = rest.split_once('/')?;
    let (first, last) = span.trim().split_once('-')?;
    let first: u64 = first.trim().parse().ok()?;
    let last: u64 = last.trim().parse().ok()?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse::<u64>().ok()?),
    };
    if first > last || total.is_some_and(|t| last >= t) {
        return None;
    }
    Some(ContentRange { first, last, total })
}

/// Header lines of the final response only. Redirects produce several header
/// blocks; each begins with a status line.
pub(crate) fn final_response(lines: &[String]) -> &[String] {
    let start = lines
        .iter()
        .rposition(|l| parse_http_status(l).is_some())
        .unwrap_or(0);
    &lines[start..]
}

fn header<'a>(lines: &'a [String], name: &str) -> Option<&'a str> {
    lines.iter().find_map(|line| {
        let (n, v) = line.split_once(':')?;
        n.trim().eq_ignore_ascii_case(name).then(|| v.trim())
    })
}

/// Parse the final response's header lines into `ProbeInfo`.
pub fn parse_probe_headers(lines: &[String]) -> ProbeInfo {
    let lines = final_response(lines);
    ProbeInfo {
        content_length: header(lines, "content-length").and_then(|v| v.parse().ok()),
        accept_ranges: header(lines, "accept-ranges").is_some_and(|v| v.eq_ignore_ascii_case("bytes")),
        content_disposition: header(lines, "content-disposition").map(str::to_string),
    }
}

/// Validate the final response headers of a ranged GET for `range`.
///
/// `206` must carry a `Content-Range` covering exactly `range`. A plain `200`
/// is the whole entity and is only usable when the range starts at zero.
pub(crate) fn check_range_response(lines: &[String], range: ByteRange) -> Result<(), FetchError> {
    let lines = final_response(lines);
    let status = lines
        .first()
        .and_then(|l| parse_http_status(l))
        .ok_or(FetchError::NoResponse)?;
    match status {
        206 => {
            let raw = header(lines, "content-range");
            match raw.and_then(parse_content_range) {
                Some(cr) if cr.first == range.min && cr.last == range.max => Ok(()),
                _ => Err(FetchError::ContentRangeMismatch {
                    requested: range,
                    received: raw.unwrap_or("<missing>").to_string(),
                }),
            }
        }
        200 if range.min == 0 => Ok(()),
        200 => Err(FetchError::ContentRangeMismatch {
            requested: range,
            received: "<full entity>".to_string(),
        }),
        other => Err(FetchError::Http(other)),
    }
}
