use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};

/// One minute ahead of the official open; the quote source's clock may lead ours.
pub fn market_open() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 29, 0).unwrap_or_default()
}

/// Five minutes past the official close to absorb end-of-day publication lag.
pub fn market_close() -> NaiveTime {
    NaiveTime::from_hms_opt(16, 5, 0).unwrap_or_default()
}

/// End-of-day bars are not published until well into the evening.
pub fn market_close_historical() -> NaiveTime {
    NaiveTime::from_hms_opt(20, 15, 0).unwrap_or_default()
}

pub fn is_trading_day(weekday: Weekday) -> bool {
    weekday.num_days_from_monday() < 5
}

/// True while `now` sits strictly inside the padded trading session of a weekday.
pub fn is_market_open(now: NaiveDateTime) -> bool {
    if !is_trading_day(now.weekday()) {
        return false;
    }
    let time = now.time();
    market_open() < time && time < market_close()
}

pub fn days_in_month(month: u32, year: i32) -> u32 {
    match month {
        2 => {
            if NaiveDate::from_ymd_opt(year, 2, 29).is_some() {
                29
            } else {
                28
            }
        }
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

/// Latest date on or before `from` that falls on `target`.
pub fn most_recent_on_or_before(target: Weekday, from: NaiveDate) -> NaiveDate {
    if from.weekday() == target {
        return from;
    }
    walk_back(target, from).0
}

/// Step backwards from the day before `from` until `target` is reached.
/// Returns the date together with the number of steps taken.
fn walk_back(target: Weekday, from: NaiveDate) -> (NaiveDate, u32) {
    let mut year = from.year();
    let mut month = from.month();
    let mut day = from.day();
    let mut steps = 0;

    loop {
        steps += 1;
        if day > 1 {
            day -= 1;
        } else {
            if month > 1 {
                month -= 1;
            } else {
                month = 12;
                year -= 1;
            }
            day = days_in_month(month, year);
        }

        // The walk only ever lands on day-of-month values that exist.
        let date = NaiveDate::from_ymd_opt(year, month, day)
            .unwrap_or_else(|| unreachable!("walked onto {year}-{month}-{day}"));
        if date.weekday() == target {
            return (date, steps);
        }
    }
}

/// Most recent trading-day moment at `time` that is not later than `now`.
pub fn most_recent_trading_cutoff(time: NaiveTime, now: NaiveDateTime) -> NaiveDateTime {
    let today = now.date();
    if is_trading_day(today.weekday()) && now.time() >= time {
        return today.and_time(time);
    }

    let mut date = today;
    loop {
        date = match date.pred_opt() {
            Some(prev) => prev,
            None => return NaiveDate::MIN.and_time(time),
        };
        if is_trading_day(date.weekday()) {
            return date.and_time(time);
        }
    }
}
