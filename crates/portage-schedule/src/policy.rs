use crate::error::{Result, ScheduleError};
use crate::types::SchedulePolicy;
use chrono::{NaiveTime, Weekday};

const DAY_NAMES: [(&str, Weekday); 7] = [
    ("sunday", Weekday::Sun),
    ("monday", Weekday::Mon),
    ("tuesday", Weekday::Tue),
    ("wednesday", Weekday::Wed),
    ("thursday", Weekday::Thu),
    ("friday", Weekday::Fri),
    ("saturday", Weekday::Sat),
];

/// Parse a 12-hour clock time such as `11:15PM` or `1:05am`
pub fn parse_time(value: &str) -> Option<NaiveTime> {
    let upper = value.trim().to_ascii_uppercase();
    let (clock, pm) = if let Some(clock) = upper.strip_suffix("PM") {
        (clock, true)
    } else if let Some(clock) = upper.strip_suffix("AM") {
        (clock, false)
    } else {
        return None;
    };

    let (hour, minute) = clock.trim().split_once(':')?;
    if hour.is_empty() || hour.len() > 2 || minute.len() != 2 {
        return None;
    }
    let hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.parse().ok()?;
    if !(1..=12).contains(&hour) || minute > 59 {
        return None;
    }

    let hour = match (hour, pm) {
        (12, false) => 0,
        (12, true) => 12,
        (h, true) => h + 12,
        (h, false) => h,
    };
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Parse a day name, accepting prefixes of three letters or more
pub fn parse_weekday(value: &str) -> Option<Weekday> {
    let lower = value.trim().to_ascii_lowercase();
    if lower.len() < 3 {
        return None;
    }
    DAY_NAMES
        .iter()
        .find(|(name, _)| name.starts_with(&lower))
        .map(|(_, day)| *day)
}

/// Check every configured sub-policy of a SchedulePolicy
pub fn validate_policy(policy: &SchedulePolicy) -> Result<()> {
    let name = policy.name();
    let item = &policy.policy;

    if let Some(interval) = &item.interval {
        if interval.interval_minutes < 1 {
            return Err(ScheduleError::invalid_policy(
                name,
                format!("invalid interval {} minutes", interval.interval_minutes),
                "Set intervalMinutes to 1 or more",
            ));
        }
    }
    if let Some(daily) = &item.daily {
        check_time(name, "daily", &daily.time)?;
    }
    if let Some(weekly) = &item.weekly {
        if parse_weekday(&weekly.day).is_none() {
            return Err(ScheduleError::invalid_policy(
                name,
                format!("invalid day {:?} in weekly policy", weekly.day),
                "Use a day name such as Sunday, or at least its first three letters",
            ));
        }
        check_time(name, "weekly", &weekly.time)?;
    }
    if let Some(monthly) = &item.monthly {
        if !(1..=31).contains(&monthly.date) {
            return Err(ScheduleError::invalid_policy(
                name,
                format!("invalid date {} in monthly policy", monthly.date),
                "Use a day of month between 1 and 31",
            ));
        }
        check_time(name, "monthly", &monthly.time)?;
    }
    Ok(())
}

pub(crate) fn check_time(name: &str, section: &str, value: &str) -> Result<NaiveTime> {
    parse_time(value).ok_or_else(|| {
        ScheduleError::invalid_policy(
            name,
            format!("invalid time {:?} in {} policy", value, section),
            "Use a 12-hour time such as 11:15PM",
        )
    })
}
