use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, NaiveTime, Timelike};
use lazy_static::lazy_static;
use regex::Regex;

/// Format tokens understood by the match/format functions: `yyyy`, `yy`,
/// `MM`, `M`, `dd`, `d` for dates and `hh`, `h`, `mm`, `m` for times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    YearLong,
    YearShort,
    Month2,
    Month1,
    Day2,
    Day1,
    Hour2,
    Hour1,
    Minute2,
    Minute1,
    Literal(char),
}

fn tokenize(format: &str) -> Vec<Token> {
    let chars: Vec<char> = format.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let run = chars[i..].iter().take_while(|c| **c == chars[i]).count();
        let (token, used) = match (chars[i], run) {
            ('y', n) if n >= 4 => (Token::YearLong, 4),
            ('y', n) if n >= 2 => (Token::YearShort, 2),
            ('M', n) if n >= 2 => (Token::Month2, 2),
            ('M', _) => (Token::Month1, 1),
            ('d', n) if n >= 2 => (Token::Day2, 2),
            ('d', _) => (Token::Day1, 1),
            ('h', n) if n >= 2 => (Token::Hour2, 2),
            ('h', _) => (Token::Hour1, 1),
            ('m', n) if n >= 2 => (Token::Minute2, 2),
            ('m', _) => (Token::Minute1, 1),
            (c, _) => (Token::Literal(c), 1),
        };
        tokens.push(token);
        i += used;
    }
    tokens
}

#[derive(Debug, Default, Clone, Copy)]
struct MatchedParts {
    year: Option<i32>,
    month: Option<u32>,
    day: Option<u32>,
    hour: Option<u32>,
    minute: Option<u32>,
}

fn match_format(s: &str, format: &str) -> Option<MatchedParts> {
    let tokens = tokenize(format);
    let mut pattern = String::new();
    let mut fields = Vec::new();
    for token in &tokens {
        let group = match token {
            Token::YearLong => r"(\d{4})",
            Token::YearShort | Token::Month2 | Token::Day2 | Token::Hour2 | Token::Minute2 => {
                r"(\d{2})"
            }
            Token::Month1 | Token::Day1 | Token::Hour1 | Token::Minute1 => r"(\d{1,2})",
            Token::Literal(c) => {
                pattern.push_str(&regex::escape(&c.to_string()));
                continue;
            }
        };
        pattern.push_str(group);
        fields.push(*token);
    }
    let rx = Regex::new(&pattern).ok()?;
    let caps = rx.captures(s)?;
    let mut parts = MatchedParts::default();
    for (index, field) in fields.iter().enumerate() {
        let value: i64 = caps.get(index + 1)?.as_str().parse().ok()?;
        match field {
            Token::YearLong => parts.year = Some(value as i32),
            Token::YearShort => parts.year = Some(1900 + value as i32),
            Token::Month2 | Token::Month1 => parts.month = Some(value as u32),
            Token::Day2 | Token::Day1 => parts.day = Some(value as u32),
            Token::Hour2 | Token::Hour1 => parts.hour = Some(value as u32),
            Token::Minute2 | Token::Minute1 => parts.minute = Some(value as u32),
            Token::Literal(_) => {}
        }
    }
    Some(parts)
}

/// Parses a time out of `s` using the given format, eg. "hh:mm".
/// Falls back to a generic `h:mm` search when the format does not match.
pub fn match_time(s: &str, format: &str) -> Option<NaiveTime> {
    lazy_static! {
        static ref GENERIC_TIME: Regex = Regex::new(r"(\d{1,2}):(\d{2})").unwrap();
    }
    if let Some(parts) = match_format(s, format) {
        if let (Some(hour), Some(minute)) = (parts.hour, parts.minute) {
            return NaiveTime::from_hms_opt(hour, minute, 0);
        }
    }
    let caps = GENERIC_TIME.captures(s)?;
    NaiveTime::from_hms_opt(caps[1].parse().ok()?, caps[2].parse().ok()?, 0)
}

/// Parses a date out of `s` using the given format, eg. "yyyy-MM-dd".
/// Years before 1970 are moved one century forward.
pub fn match_date(s: &str, format: &str) -> Option<NaiveDate> {
    lazy_static! {
        static ref GENERIC_DATE: Regex = Regex::new(r"(\d{2,4})-(\d{2})-(\d{2})").unwrap();
    }
    let from_parts = |year: i32, month: u32, day: u32| {
        let year = if year < 1970 { year + 100 } else { year };
        NaiveDate::from_ymd_opt(year, month, day)
    };
    if let Some(parts) = match_format(s, format) {
        if let (Some(year), Some(month), Some(day)) = (parts.year, parts.month, parts.day) {
            return from_parts(year, month, day);
        }
    }
    let caps = GENERIC_DATE.captures(s)?;
    let mut year: i32 = caps[1].parse().ok()?;
    if caps[1].len() == 2 {
        year += 1900;
    }
    from_parts(year, caps[2].parse().ok()?, caps[3].parse().ok()?)
}

fn render(tokens: &[Token], parts: MatchedParts) -> String {
    let mut out = String::new();
    for token in tokens {
        match token {
            Token::YearLong => out.push_str(&format!("{:04}", parts.year.unwrap_or(0))),
            Token::YearShort => out.push_str(&format!("{:02}", parts.year.unwrap_or(0) % 100)),
            Token::Month2 => out.push_str(&format!("{:02}", parts.month.unwrap_or(0))),
            Token::Month1 => out.push_str(&parts.month.unwrap_or(0).to_string()),
            Token::Day2 => out.push_str(&format!("{:02}", parts.day.unwrap_or(0))),
            Token::Day1 => out.push_str(&parts.day.unwrap_or(0).to_string()),
            Token::Hour2 => out.push_str(&format!("{:02}", parts.hour.unwrap_or(0))),
            Token::Hour1 => out.push_str(&parts.hour.unwrap_or(0).to_string()),
            Token::Minute2 => out.push_str(&format!("{:02}", parts.minute.unwrap_or(0))),
            Token::Minute1 => out.push_str(&parts.minute.unwrap_or(0).to_string()),
            Token::Literal(c) => out.push(*c),
        }
    }
    out
}

pub fn format_time(hour: u32, minute: u32, format: &str) -> String {
    render(
        &tokenize(format),
        MatchedParts {
            hour: Some(hour),
            minute: Some(minute),
            ..Default::default()
        },
    )
}

pub fn format_date(year: i32, month: u32, day: u32, format: &str) -> String {
    render(
        &tokenize(format),
        MatchedParts {
            year: Some(year),
            month: Some(month),
            day: Some(day),
            ..Default::default()
        },
    )
}

pub fn format_date_time(datetime: &DateTime<Local>, format: &str) -> String {
    render(
        &tokenize(format),
        MatchedParts {
            year: Some(datetime.year()),
            month: Some(datetime.month()),
            day: Some(datetime.day()),
            hour: Some(datetime.hour()),
            minute: Some(datetime.minute()),
        },
    )
}

/// Minutes from `time1` to `time2`, both given in `format`, or -1 when
/// either string cannot be parsed.
pub fn duration(time1: &str, time2: &str, format: &str) -> i64 {
    match (match_time(time1, format), match_time(time2, format)) {
        (Some(t1), Some(t2)) => (t2 - t1).num_minutes(),
        _ => -1,
    }
}

/// Adds minutes to a time string, wrapping at midnight. Empty on parse errors.
pub fn add_mins_to_time(time: &str, minutes: i64, format: &str) -> String {
    let Some(parsed) = match_time(time, format) else {
        return String::new();
    };
    let added = parsed.overflowing_add_signed(Duration::minutes(minutes)).0;
    format_time(added.hour(), added.minute(), format)
}

/// Adds days to a date string. Empty on parse errors.
pub fn add_days_to_date(date: &str, days: i64, format: &str) -> String {
    let Some(parsed) = match_date(date, format) else {
        return String::new();
    };
    let added = parsed + Duration::days(days);
    format_date(added.year(), added.month(), added.day(), format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_time_with_format_and_fallback() {
        assert_eq!(
            match_time("08:15", "hh:mm"),
            NaiveTime::from_hms_opt(8, 15, 0)
        );
        assert_eq!(
            match_time("dep at 7:05 h", "hh:mm"),
            NaiveTime::from_hms_opt(7, 5, 0)
        );
        assert_eq!(match_time("no time", "hh:mm"), None);
    }

    #[test]
    fn matches_date_and_shifts_old_years() {
        assert_eq!(
            match_date("2024-05-01", "yyyy-MM-dd"),
            NaiveDate::from_ymd_opt(2024, 5, 1)
        );
        // Two digit year: 04 reads as 1904, which is shifted one century.
        assert_eq!(
            match_date("01.05.04", "dd.MM.yy"),
            NaiveDate::from_ymd_opt(2004, 5, 1)
        );
    }

    #[test]
    fn formats_round_trip() {
        assert_eq!(format_time(8, 5, "hh:mm"), "08:05");
        assert_eq!(format_date(2024, 5, 1, "dd.MM.yyyy"), "01.05.2024");
        assert_eq!(add_mins_to_time("23:55", 10, "hh:mm"), "00:05");
        assert_eq!(add_days_to_date("2024-12-31", 1, "yyyy-MM-dd"), "2025-01-01");
    }

    #[test]
    fn duration_in_minutes() {
        assert_eq!(duration("08:00", "08:45", "hh:mm"), 45);
        assert_eq!(duration("bad", "08:45", "hh:mm"), -1);
    }
}
