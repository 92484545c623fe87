//! Splits a sweep range into bounded time slots.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::{Result, SweepError};

/// A window of partition key space scanned by one job.
///
/// Every slot but the last excludes its end so adjacent slots never select
/// the same partition key. The last slot includes `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub closed: bool,
}

impl TimeSlot {
    pub fn span(&self) -> TimeDelta {
        self.end - self.start
    }

    /// Render the slot with the given chrono format, e.g. `[a .. b)`.
    pub fn label(&self, format: &str) -> String {
        format!(
            "[{} .. {}{}",
            self.start.format(format),
            self.end.format(format),
            if self.closed { ']' } else { ')' }
        )
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label("%Y-%m-%d %H:%M:%S"))
    }
}

/// Most slots a single range may be split into.
pub const MAX_SLOTS: usize = 10_000;

/// Plan the slots covering `[start, end]`.
///
/// Slots are contiguous, none is wider than `span`, and the final slot runs
/// from the last boundary to `end`. Ranges needing more than [`MAX_SLOTS`]
/// slots are refused.
pub fn plan_slots(start: DateTime<Utc>, end: DateTime<Utc>, span: Duration) -> Result<Vec<TimeSlot>> {
    if end <= start {
        return Err(SweepError::InvalidRange { start, end });
    }
    let step = TimeDelta::from_std(span)
        .ok()
        .filter(|step| *step > TimeDelta::zero())
        .ok_or(SweepError::InvalidSlotSpan(span))?;

    let mut slots = Vec::new();
    let mut boundary = start;
    while end - boundary > step {
        // One more open slot plus the closing one would exceed the cap
        if slots.len() + 1 >= MAX_SLOTS {
            return Err(SweepError::TooManySlots {
                start,
                end,
                span,
                max: MAX_SLOTS,
            });
        }
        let next = boundary + step;
        slots.push(TimeSlot {
            start: boundary,
            end: next,
            closed: false,
        });
        boundary = next;
    }
    slots.push(TimeSlot {
        start: boundary,
        end,
        closed: true,
    });

    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const DAY: u64 = 86_400;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 1, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_ten_days_in_three_day_slots() {
        let slots = plan_slots(day(8), day(18), Duration::from_secs(3 * DAY)).unwrap();

        let bounds: Vec<_> = slots.iter().map(|s| (s.start, s.end)).collect();
        assert_eq!(
            bounds,
            vec![
                (day(8), day(11)),
                (day(11), day(14)),
                (day(14), day(17)),
                (day(17), day(18)),
            ]
        );
        assert!(slots[..3].iter().all(|s| !s.closed));
        assert!(slots[3].closed);
    }

    #[test]
    fn test_slots_are_contiguous_and_bounded() {
        let span = Duration::from_secs(7 * 3600);
        let slots = plan_slots(day(1), day(9), span).unwrap();

        assert_eq!(slots.first().unwrap().start, day(1));
        assert_eq!(slots.last().unwrap().end, day(9));
        for pair in slots.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert!(slots.iter().all(|s| s.span() <= TimeDelta::from_std(span).unwrap()));
    }

    #[test]
    fn test_short_range_is_one_slot() {
        let slots = plan_slots(day(8), day(10), Duration::from_secs(3 * DAY)).unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!((slots[0].start, slots[0].end), (day(8), day(10)));
        assert!(slots[0].closed);

        // A range of exactly one span is still a single slot
        let slots = plan_slots(day(8), day(11), Duration::from_secs(3 * DAY)).unwrap();
        assert_eq!(slots.len(), 1);
    }

    #[test]
    fn test_exact_multiple_leaves_no_empty_slot() {
        let slots = plan_slots(day(8), day(17), Duration::from_secs(3 * DAY)).unwrap();
        assert_eq!(slots.len(), 3);
        assert_eq!(slots[2].start, day(14));
        assert_eq!(slots[2].end, day(17));
    }

    #[test]
    fn test_slot_count_is_capped() {
        let span = Duration::from_secs(60);
        let at_cap = day(1) + TimeDelta::minutes(MAX_SLOTS as i64);
        assert_eq!(plan_slots(day(1), at_cap, span).unwrap().len(), MAX_SLOTS);

        let over = at_cap + TimeDelta::seconds(1);
        let err = plan_slots(day(1), over, span).unwrap_err();
        assert!(matches!(err, SweepError::TooManySlots { max: MAX_SLOTS, .. }));

        // One-second slots over two years
        let far = Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap();
        assert!(plan_slots(day(1), far, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_invalid_range() {
        let err = plan_slots(day(18), day(8), Duration::from_secs(DAY)).unwrap_err();
        assert!(matches!(err, SweepError::InvalidRange { .. }));

        let err = plan_slots(day(8), day(8), Duration::from_secs(DAY)).unwrap_err();
        assert!(matches!(err, SweepError::InvalidRange { .. }));
    }

    #[test]
    fn test_zero_span() {
        let err = plan_slots(day(8), day(18), Duration::ZERO).unwrap_err();
        assert!(matches!(err, SweepError::InvalidSlotSpan(_)));
    }

    #[test]
    fn test_label() {
        let slot = TimeSlot {
            start: day(8),
            end: day(11),
            closed: false,
        };
        assert_eq!(slot.label("%Y-%m-%d"), "[2016-01-08 .. 2016-01-11)");
        assert_eq!(slot.to_string(), "[2016-01-08 00:00:00 .. 2016-01-11 00:00:00)");
    }
}
