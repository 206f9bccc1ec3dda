use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use bookdrip_core::{CoreError, DeliveryTime, Frequency};

/// Parse an IANA timezone name, rejecting unknown names.
///
/// This is the single validation choke point — nothing in the engine falls
/// back to UTC for a timezone it cannot parse.
pub fn parse_timezone(name: &str) -> bookdrip_core::Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| CoreError::InvalidTimezone(name.to_string()))
}

/// Compute the next delivery instant in UTC.
///
/// Builds today's candidate at HH:MM on the user's local wall clock and,
/// while the candidate is at or before local now, advances it by the
/// frequency step (daily +24h, twice-daily +12h, weekly +7d). A candidate
/// exactly equal to now counts as already passed. The result is always
/// strictly in the future and deterministic for fixed inputs.
pub fn next_delivery(
    time: DeliveryTime,
    frequency: Frequency,
    tz: Tz,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let now_local = now.with_timezone(&tz).naive_local();
    let mut candidate = now_local.date().and_time(time.to_naive());
    let step = frequency.step();
    while candidate <= now_local {
        candidate += step;
    }
    resolve_local(tz, candidate).with_timezone(&Utc)
}

/// Map a local wall-clock time onto the timezone's timeline.
///
/// On a DST fall-back overlap the earlier instant wins; a wall time erased
/// by spring-forward is pushed later an hour at a time until it exists.
fn resolve_local(tz: Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    let mut probe = naive;
    for _ in 0..24 {
        match tz.from_local_datetime(&probe) {
            LocalResult::Single(dt) => return dt,
            LocalResult::Ambiguous(earliest, _) => return earliest,
            LocalResult::None => probe += Duration::hours(1),
        }
    }
    tz.from_utc_datetime(&naive)
}
