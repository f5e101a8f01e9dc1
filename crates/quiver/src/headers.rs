//! HTTP header utilities: date parsing and formatting, charset extraction,
//! and case-insensitive header merging.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;

/// RFC 1123 layout used when emitting HTTP dates.
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Charset HTTP falls back to when `Content-Type` does not name one.
pub const DEFAULT_CONTENT_CHARSET: &str = "ISO-8859-1";

/// Parse an HTTP date (RFC 1123, RFC 850, or asctime) into epoch
/// milliseconds. Unparseable input yields 0, the "absent" sentinel used
/// throughout the cache metadata.
pub fn parse_date_as_epoch(value: &str) -> i64 {
    if let Ok(parsed) = DateTime::parse_from_rfc2822(value) {
        return parsed.timestamp_millis();
    }
    // RFC 850, e.g. "Sunday, 06-Nov-94 08:49:37 GMT"
    if let Ok(parsed) = NaiveDateTime::parse_from_str(value, "%A, %d-%b-%y %H:%M:%S GMT") {
        return Utc.from_utc_datetime(&parsed).timestamp_millis();
    }
    // asctime, e.g. "Sun Nov  6 08:49:37 1994"
    if let Ok(parsed) = NaiveDateTime::parse_from_str(value, "%a %b %e %H:%M:%S %Y") {
        return Utc.from_utc_datetime(&parsed).timestamp_millis();
    }
    0
}

/// Format epoch milliseconds as an RFC 1123 HTTP date.
pub fn format_http_date(epoch_ms: i64) -> String {
    match Utc.timestamp_millis_opt(epoch_ms).single() {
        Some(stamp) => stamp.format(HTTP_DATE_FORMAT).to_string(),
        None => String::new(),
    }
}

/// First value of `name` as a string, if present and valid UTF-8.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Charset named by the `Content-Type` header, or the HTTP default
/// (ISO-8859-1) when none is present.
pub fn parse_charset(headers: &HeaderMap) -> String {
    parse_charset_or(headers, DEFAULT_CONTENT_CHARSET)
}

/// Charset named by the `Content-Type` header, or `default`.
pub fn parse_charset_or(headers: &HeaderMap, default: &str) -> String {
    if let Some(content_type) = header_str(headers, "content-type") {
        for param in content_type.split(';').skip(1) {
            let mut pair = param.trim().splitn(2, '=');
            if let (Some(name), Some(value)) = (pair.next(), pair.next()) {
                if name.eq_ignore_ascii_case("charset") {
                    return value.trim().trim_matches('"').to_string();
                }
            }
        }
    }
    default.to_string()
}

/// Merge `fresh` into a copy of `base`; values from `fresh` win on key
/// collision, and keys only in `base` are retained.
pub fn merge_headers(base: &HeaderMap, fresh: &HeaderMap) -> HeaderMap {
    let mut merged = base.clone();
    for name in fresh.keys() {
        merged.remove(name);
    }
    for (name, value) in fresh.iter() {
        merged.append(name.clone(), value.clone());
    }
    merged
}
