//! Lenient date/time parsing matching the remote system's date fields.
//!
//! The remote accepts out-of-range month and day components and rolls them
//! over: month 00 is December of the previous year and day 00 is the last day
//! of the previous month, so `0000-00-01` lands in year -1.
//!
//! Accepted forms, with `-` or `/` as the date separator:
//! `YYYY-MM-DD`, optionally followed by ` HH:MM`, ` HH:MM:SS` or
//! ` HH:MM:SS.fraction` (`T` may replace the space), optionally followed by
//! `Z` or a `±HH:MM` / `±HHMM` offset. `@<seconds>` is a Unix timestamp.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};

/// Parse `input` into a local date-time in `zone`.
pub(crate) fn parse_lenient(input: &str, zone: FixedOffset) -> Option<NaiveDateTime> {
    if let Some(seconds) = input.strip_prefix('@') {
        let seconds: i64 = seconds.parse().ok()?;
        let utc = DateTime::from_timestamp(seconds, 0)?;
        return Some(utc.with_timezone(&zone).naive_local());
    }

    let mut cursor = Scanner::new(input);
    let year = cursor.digits(4, 4)?;
    let separator = cursor.one_of(&['-', '/'])?;
    let month = cursor.digits(1, 2)?;
    cursor.expect(separator)?;
    let day = cursor.digits(1, 2)?;
    if month > 12 || day > 31 {
        return None;
    }
    let date = rolled_date(year, month, day)?;

    if cursor.is_done() {
        return date.and_hms_opt(0, 0, 0);
    }

    cursor.one_of(&[' ', 'T', 't'])?;
    let hour = cursor.digits(1, 2)?;
    cursor.expect(':')?;
    let minute = cursor.digits(2, 2)?;
    let second = if cursor.peek() == Some(':') {
        cursor.expect(':')?;
        cursor.digits(2, 2)?
    } else {
        0
    };
    if cursor.peek() == Some('.') {
        cursor.expect('.')?;
        cursor.digits(1, 9)?;
    }
    let time = NaiveTime::from_hms_opt(hour, minute, second)?;
    let local = date.and_time(time);

    let offset = match cursor.peek() {
        None => return Some(local),
        Some('Z') | Some('z') => {
            cursor.advance();
            FixedOffset::east_opt(0)?
        }
        Some(sign @ ('+' | '-')) => {
            cursor.advance();
            let hours = cursor.digits(2, 2)?;
            if cursor.peek() == Some(':') {
                cursor.advance();
            }
            let minutes = cursor.digits(2, 2)?;
            let seconds = (hours * 3600 + minutes * 60) as i32;
            if sign == '+' {
                FixedOffset::east_opt(seconds)?
            } else {
                FixedOffset::west_opt(seconds)?
            }
        }
        Some(_) => return None,
    };
    if !cursor.is_done() {
        return None;
    }
    let stamped = offset.from_local_datetime(&local).single()?;
    Some(stamped.with_timezone(&zone).naive_local())
}

/// Build a date, rolling over month 0 and day 0 (or day past month end).
fn rolled_date(year: u32, month: u32, day: u32) -> Option<NaiveDate> {
    let months = i64::from(year) * 12 + i64::from(month) - 1;
    let year = i32::try_from(months.div_euclid(12)).ok()?;
    let month = u32::try_from(months.rem_euclid(12) + 1).ok()?;
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    first.checked_add_signed(Duration::days(i64::from(day) - 1))
}

struct Scanner<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn advance(&mut self) {
        self.chars.next();
    }

    fn is_done(&mut self) -> bool {
        self.chars.peek().is_none()
    }

    fn expect(&mut self, wanted: char) -> Option<()> {
        (self.chars.next()? == wanted).then_some(())
    }

    fn one_of(&mut self, options: &[char]) -> Option<char> {
        let c = self.chars.next()?;
        options.contains(&c).then_some(c)
    }

    fn digits(&mut self, min: usize, max: usize) -> Option<u32> {
        let mut value = 0u32;
        let mut read = 0;
        while read < max {
            match self.peek().and_then(|c| c.to_digit(10)) {
                Some(digit) => {
                    value = value * 10 + digit;
                    read += 1;
                    self.advance();
                }
                None => break,
            }
        }
        (read >= min).then_some(value)
    }
}
