use std::time::SystemTime;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// asctime(3) layout shared by the client's outgoing header and the server's
/// parser: `Sun Oct  3 08:00:00 2021`.
const ASCTIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Parse layout for an incoming `If-Modified-Since` value. Numeric fields
/// tolerate the space padding asctime produces.
const IF_MODIFIED_SINCE_FORMAT: &str = "%a %b %d %T %Y";

const SECS_PER_DAY: i64 = 86400;
const SECS_PER_HOUR: i64 = 3600;
const SECS_PER_MINUTE: i64 = 60;

/// asctime formatted date in UTC, without a trailing newline or zone suffix.
pub struct AscDate(pub DateTime<Utc>);

impl std::fmt::Display for AscDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format(ASCTIME_FORMAT))
    }
}

/// A relative "days:hours:minutes ago" offset given to the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConditionalOffset {
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
}

impl ConditionalOffset {
    /// Parse `D:H:M`. Fields are read like strtol(3): leading digits count,
    /// anything else (including a missing field) reads as 0.
    pub fn parse(s: &str) -> Self {
        let mut fields = s.split(':').filter(|field| !field.is_empty());
        let mut next = || fields.next().map(leading_integer).unwrap_or(0);
        Self {
            days: next(),
            hours: next(),
            minutes: next(),
        }
    }

    fn as_secs(&self) -> i64 {
        self.days
            .saturating_mul(SECS_PER_DAY)
            .saturating_add(self.hours.saturating_mul(SECS_PER_HOUR))
            .saturating_add(self.minutes.saturating_mul(SECS_PER_MINUTE))
    }

    /// The absolute instant this offset names, counted back from `now`.
    ///
    /// Offsets too large to represent fall back to the epoch.
    pub fn instant_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let secs = now.timestamp().saturating_sub(self.as_secs());
        Utc.timestamp_opt(secs, 0)
            .single()
            .unwrap_or_else(|| DateTime::<Utc>::from(SystemTime::UNIX_EPOCH))
    }

    /// Header value for this offset, without the ` GMT` suffix the request
    /// emitter appends.
    pub fn encode(&self, now: DateTime<Utc>) -> String {
        AscDate(self.instant_before(now)).to_string()
    }
}

/// Parse the value of an `If-Modified-Since` header as a UTC instant.
///
/// A trailing `GMT` is accepted and ignored. Returns None when the value does
/// not follow the asctime layout.
pub fn parse_if_modified_since(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    let value = value.strip_suffix("GMT").unwrap_or(value).trim_end();
    NaiveDateTime::parse_from_str(value, IF_MODIFIED_SINCE_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Leading base-10 integer of `s`, or 0 if there is none.
fn leading_integer(s: &str) -> i64 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let value = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |acc, digit| {
            acc.saturating_mul(10).saturating_add(i64::from(digit - b'0'))
        });
    if negative {
        -value
    } else {
        value
    }
}
