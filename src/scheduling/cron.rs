// Cron expression parsing and next-fire computation
//
// Standard five-field syntax (minute, hour, day-of-month, month,
// day-of-week) with *, lists, ranges and steps; a leading seconds field is
// accepted. Expressions are validated at schedule-creation time and again
// defensively whenever the daemon arms a timer; a corrupt persisted
// expression is logged and skipped there, never propagated.

use chrono::{DateTime, Utc};
use croner::Cron;

use crate::scheduling::error::{Result, SchedulerError};

/// Parse a cron expression, mapping any parse failure to
/// [`SchedulerError::InvalidExpression`]
pub fn parse_cron(expr: &str) -> Result<Cron> {
    Cron::new(expr)
        .with_seconds_optional()
        .parse()
        .map_err(|e| SchedulerError::InvalidExpression {
            expr: expr.to_string(),
            reason: e.to_string(),
        })
}

/// Earliest instant strictly after `after` that matches `expr`
pub fn next_fire_after(expr: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let cron = parse_cron(expr)?;
    next_occurrence(&cron, after, expr)
}

/// Next fire for an already-parsed expression (`expr` only for diagnostics)
pub fn next_occurrence(cron: &Cron, after: DateTime<Utc>, expr: &str) -> Result<DateTime<Utc>> {
    cron.find_next_occurrence(&after, false)
        .map_err(|e| SchedulerError::InvalidExpression {
            expr: expr.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn next_fire_is_strictly_later_and_advances() {
        let start = Utc.with_ymd_and_hms(2026, 2, 7, 9, 0, 0).unwrap();
        for expr in ["* * * * *", "0 9 * * 1-5", "*/15 * * * *", "30 6 1,15 * *"] {
            let first = next_fire_after(expr, start).unwrap();
            assert!(first > start, "{expr}: {first} not after {start}");

            // Re-invoking with the result always advances further
            let second = next_fire_after(expr, first).unwrap();
            assert!(second > first, "{expr}: {second} not after {first}");
        }
    }

    #[test]
    fn exact_match_at_reference_is_excluded() {
        // 09:00 matches `0 9 * * *`; the next fire must be tomorrow's
        let at_nine = Utc.with_ymd_and_hms(2026, 2, 7, 9, 0, 0).unwrap();
        let next = next_fire_after("0 9 * * *", at_nine).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 8, 9, 0, 0).unwrap());
    }

    #[test]
    fn step_values_fire_on_the_step() {
        let start = Utc.with_ymd_and_hms(2026, 2, 7, 9, 1, 0).unwrap();
        let next = next_fire_after("*/15 * * * *", start).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 7, 9, 15, 0).unwrap());
    }

    #[test]
    fn weekday_ranges_skip_the_weekend() {
        // 2026-02-07 is a Saturday
        let saturday = Utc.with_ymd_and_hms(2026, 2, 7, 12, 0, 0).unwrap();
        let next = next_fire_after("0 9 * * 1-5", saturday).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 9, 9, 0, 0).unwrap());
    }

    #[test]
    fn six_field_expressions_are_accepted() {
        let start = Utc.with_ymd_and_hms(2026, 2, 7, 9, 0, 0).unwrap();
        let next = next_fire_after("30 * * * * *", start).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 7, 9, 0, 30).unwrap());
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        for expr in ["not a cron", "99 * * * *", "* * *", ""] {
            match parse_cron(expr) {
                Err(SchedulerError::InvalidExpression { .. }) => {}
                other => panic!("{expr:?} should be invalid, got {other:?}"),
            }
        }
    }
}
