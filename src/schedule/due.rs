use chrono::{Datelike, NaiveDateTime};

use super::calendar::{most_recent_on_or_before, most_recent_trading_cutoff};
use super::registry::ScheduleRule;

/// Decide whether a category with the given last-updated timestamp needs a refresh.
///
/// Pure: the caller reads `last_updated` from the store and records the new
/// timestamp itself once a refresh succeeds.
///
/// A weekly rule treats any update made on the configured weekday as fresh,
/// whatever the time of day. A refresh completed early on that day therefore
/// blocks further attempts until the following week.
pub fn is_due(last_updated: Option<NaiveDateTime>, rule: &ScheduleRule, now: NaiveDateTime) -> bool {
    let Some(last_updated) = last_updated else {
        return true;
    };

    match *rule {
        ScheduleRule::Weekly {
            weekday,
            time_of_day,
        } => {
            if last_updated.weekday() == weekday {
                return false;
            }
            let cutoff = most_recent_on_or_before(weekday, now.date()).and_time(time_of_day);
            last_updated < cutoff
        }
        ScheduleRule::TradingDays { time_of_day } => {
            last_updated < most_recent_trading_cutoff(time_of_day, now)
        }
        ScheduleRule::Interval { interval } => {
            let elapsed = now.signed_duration_since(last_updated);
            match elapsed.to_std() {
                Ok(elapsed) => elapsed >= interval,
                // Timestamp from the future: not due yet.
                Err(_) => false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{NaiveTime, Weekday};

    use super::*;
    use crate::schedule::calendar::{market_close, market_open};

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn weekly_monday() -> ScheduleRule {
        ScheduleRule::Weekly {
            weekday: Weekday::Mon,
            time_of_day: market_open(),
        }
    }

    #[test]
    fn never_updated_is_always_due() {
        let now = at("2024-03-06 12:00:00");
        let rules = [
            weekly_monday(),
            ScheduleRule::TradingDays {
                time_of_day: market_close(),
            },
            ScheduleRule::Interval {
                interval: Duration::from_secs(25),
            },
        ];
        for rule in rules {
            assert!(is_due(None, &rule, now), "{rule}");
        }
    }

    #[test]
    fn same_weekday_update_is_never_due_again_that_week() {
        // Updated Monday 09:00, before the 09:29 cutoff; still treated as fresh.
        let last = at("2024-03-04 09:00:00");
        assert!(!is_due(Some(last), &weekly_monday(), at("2024-03-04 15:00:00")));
        assert!(!is_due(Some(last), &weekly_monday(), at("2024-03-08 15:00:00")));
        // A Monday timestamp stays fresh even after the next Monday cutoff.
        assert!(!is_due(Some(last), &weekly_monday(), at("2024-03-12 10:00:00")));
    }

    #[test]
    fn weekly_rule_compares_against_latest_cutoff() {
        let rule = weekly_monday();
        // Last updated Friday; the following Monday's cutoff has passed by Wednesday.
        assert!(is_due(
            Some(at("2024-03-01 17:00:00")),
            &rule,
            at("2024-03-06 12:00:00")
        ));
        // Last updated Tuesday after Monday's cutoff: fresh until next Monday.
        assert!(!is_due(
            Some(at("2024-03-05 08:00:00")),
            &rule,
            at("2024-03-08 12:00:00")
        ));
    }

    #[test]
    fn weekly_cutoff_for_today_applies_before_its_time() {
        // On the target weekday the cutoff is today's time, even when still ahead.
        let rule = ScheduleRule::Weekly {
            weekday: Weekday::Wed,
            time_of_day: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        };
        assert!(is_due(
            Some(at("2024-03-05 19:00:00")),
            &rule,
            at("2024-03-06 09:00:00")
        ));
    }

    #[test]
    fn trading_day_rule_tracks_last_session_close() {
        let rule = ScheduleRule::TradingDays {
            time_of_day: market_close(),
        };
        // Friday after close, next check on Saturday: fresh.
        assert!(!is_due(
            Some(at("2024-03-08 16:30:00")),
            &rule,
            at("2024-03-09 10:00:00")
        ));
        // Thursday after close, checked Friday evening: stale.
        assert!(is_due(
            Some(at("2024-03-07 16:30:00")),
            &rule,
            at("2024-03-08 17:00:00")
        ));
        // Same check before Friday's close: still fresh.
        assert!(!is_due(
            Some(at("2024-03-07 16:30:00")),
            &rule,
            at("2024-03-08 11:00:00")
        ));
    }

    #[test]
    fn interval_rule_is_inclusive_at_the_boundary() {
        let rule = ScheduleRule::Interval {
            interval: Duration::from_secs(25),
        };
        let now = at("2024-03-06 12:00:00");
        let secs = |n: i64| now - chrono::Duration::seconds(n);
        assert!(!is_due(Some(secs(24)), &rule, now));
        assert!(is_due(Some(secs(25)), &rule, now));
        assert!(is_due(Some(secs(26)), &rule, now));
        assert!(!is_due(Some(now + chrono::Duration::seconds(5)), &rule, now));
    }
}
