//! Cutoff window calculation for batch scheduling.
//!
//! Slots are wall-clock minutes since midnight in the campus operating
//! timezone; the calculator maps "now" to the next applicable cutoff as an
//! absolute UTC instant. Pure and deterministic given `now`.

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;

/// Computes the next applicable cutoff for a shop.
///
/// Picks the smallest active slot strictly after the current local
/// wall-clock minute; when every slot has already passed today, the earliest
/// slot applies to tomorrow instead. Returns `None` for an empty slot list,
/// which callers must treat as "batching disabled", not as an error.
pub fn compute_next_cutoff(
    now: DateTime<Utc>,
    tz: Tz,
    slot_minutes: &[i32],
) -> Option<DateTime<Utc>> {
    if slot_minutes.is_empty() {
        return None;
    }

    let local = now.with_timezone(&tz);
    let minutes_now = (local.hour() * 60 + local.minute()) as i32;
    let today = local.date_naive();

    let (day, minutes) = match slot_minutes
        .iter()
        .copied()
        .filter(|m| *m > minutes_now)
        .min()
    {
        Some(next_today) => (today, next_today),
        None => {
            let earliest = slot_minutes.iter().copied().min()?;
            (today.succ_opt()?, earliest)
        }
    };

    Some(local_minutes_to_utc(day, minutes, tz))
}

/// Composes a calendar day and minute-of-day in `tz` back into a UTC instant.
/// A nonexistent or ambiguous local time (DST edges) resolves to the latest
/// valid interpretation, falling back to reading the naive time as UTC.
fn local_minutes_to_utc(date: NaiveDate, minutes: i32, tz: Tz) -> DateTime<Utc> {
    let minutes = minutes.clamp(0, 1439) as u32;
    let naive = match date.and_hms_opt(minutes / 60, minutes % 60, 0) {
        Some(naive) => naive,
        None => date.and_time(chrono::NaiveTime::MIN),
    };

    naive
        .and_local_timezone(tz)
        .latest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| naive.and_utc())
}
