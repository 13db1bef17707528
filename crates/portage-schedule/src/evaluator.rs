//! Decides whether a recurring migration is due
//!
//! Daily, weekly and monthly schedules are evaluated on wall-clock time in the
//! timezone of the timestamps passed in: the next scheduled instant strictly
//! after the last trigger is computed, and the schedule is due once the current
//! time reaches it. Interval schedules compare elapsed minutes.

use crate::error::{Result, ScheduleError};
use crate::policy::{check_time, parse_weekday};
use crate::store::SchedulePolicyStore;
use crate::types::{
    IntervalPolicy, SchedulePolicy, SchedulePolicyItem, SchedulePolicyType,
    DEFAULT_MIGRATION_INTERVAL_MINUTES, DEFAULT_MIGRATION_POLICY,
};
use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Weekday};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Whether `policy` has a trigger due at `now`, given the previous trigger
///
/// A missing previous trigger is always due.
pub fn is_due<Tz: TimeZone>(
    policy: &SchedulePolicy,
    policy_type: SchedulePolicyType,
    last_trigger: Option<&DateTime<Tz>>,
    now: &DateTime<Tz>,
) -> Result<bool> {
    let Some(last) = last_trigger else {
        return Ok(true);
    };

    if policy_type == SchedulePolicyType::Interval {
        let minutes = policy.interval()?.interval_minutes;
        let elapsed = now.naive_utc() - last.naive_utc();
        return Ok(elapsed >= Duration::minutes(minutes));
    }

    let next = next_trigger(policy, policy_type, &last.naive_local())?;
    let due = now.naive_local() >= next;
    debug!(
        "{} schedule of {}: last {}, next {}, due {}",
        policy_type,
        policy.name(),
        last.naive_local(),
        next,
        due
    );
    Ok(due)
}

/// First scheduled wall-clock instant strictly after `last`
pub fn next_trigger(
    policy: &SchedulePolicy,
    policy_type: SchedulePolicyType,
    last: &NaiveDateTime,
) -> Result<NaiveDateTime> {
    let name = policy.name();
    match policy_type {
        SchedulePolicyType::Interval => {
            Ok(*last + Duration::minutes(policy.interval()?.interval_minutes))
        }
        SchedulePolicyType::Daily => {
            let at = check_time(name, "daily", &policy.daily()?.time)?;
            Ok(next_daily(last, at))
        }
        SchedulePolicyType::Weekly => {
            let weekly = policy.weekly()?;
            let day = parse_weekday(&weekly.day).ok_or_else(|| {
                ScheduleError::invalid_policy(
                    name,
                    format!("invalid day {:?} in weekly policy", weekly.day),
                    "Use a day name such as Sunday, or at least its first three letters",
                )
            })?;
            let at = check_time(name, "weekly", &weekly.time)?;
            Ok(next_weekly(last, day, at))
        }
        SchedulePolicyType::Monthly => {
            let monthly = policy.monthly()?;
            let at = check_time(name, "monthly", &monthly.time)?;
            next_monthly(last, monthly.date, at).ok_or_else(|| {
                ScheduleError::invalid_policy(
                    name,
                    format!("invalid date {} in monthly policy", monthly.date),
                    "Use a day of month between 1 and 31",
                )
            })
        }
    }
}

fn next_daily(last: &NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let candidate = last.date().and_time(at);
    if candidate > *last {
        candidate
    } else {
        candidate + Duration::days(1)
    }
}

fn next_weekly(last: &NaiveDateTime, day: Weekday, at: NaiveTime) -> NaiveDateTime {
    let mut candidate = last.date().and_time(at);
    let offset = (7 + day.num_days_from_monday() - candidate.weekday().num_days_from_monday()) % 7;
    candidate += Duration::days(i64::from(offset));
    if candidate <= *last {
        candidate += Duration::days(7);
    }
    candidate
}

fn next_monthly(last: &NaiveDateTime, date: u32, at: NaiveTime) -> Option<NaiveDateTime> {
    if date == 0 {
        return None;
    }
    let (mut year, mut month) = (last.year(), last.month());
    // The second candidate always lands in the month after `last`
    for _ in 0..2 {
        let day = date.min(days_in_month(year, month));
        let candidate = NaiveDate::from_ymd_opt(year, month, day)?.and_time(at);
        if candidate > *last {
            return Some(candidate);
        }
        (year, month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    }
    None
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    first_of_next
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

/// Schedule queries against a policy store
pub struct ScheduleEvaluator {
    store: Arc<dyn SchedulePolicyStore>,
}

impl ScheduleEvaluator {
    pub fn new(store: Arc<dyn SchedulePolicyStore>) -> Self {
        Self { store }
    }

    async fn policy(&self, name: &str) -> Result<SchedulePolicy> {
        self.store
            .get_policy(name)
            .await?
            .ok_or_else(|| ScheduleError::policy_not_found(name))
    }

    /// Whether the named policy is due now, in local time
    pub async fn trigger_required(
        &self,
        policy_name: &str,
        policy_type: SchedulePolicyType,
        last_trigger: Option<DateTime<Local>>,
    ) -> Result<bool> {
        self.trigger_required_at(policy_name, policy_type, last_trigger, Local::now())
            .await
    }

    /// Whether the named policy is due at `now`
    pub async fn trigger_required_at<Tz: TimeZone>(
        &self,
        policy_name: &str,
        policy_type: SchedulePolicyType,
        last_trigger: Option<DateTime<Tz>>,
        now: DateTime<Tz>,
    ) -> Result<bool> {
        let policy = self.policy(policy_name).await?;
        is_due(&policy, policy_type, last_trigger.as_ref(), &now)
    }

    pub async fn retain(&self, policy_name: &str, policy_type: SchedulePolicyType) -> Result<u32> {
        self.policy(policy_name).await?.retain(policy_type)
    }

    pub async fn options(
        &self,
        policy_name: &str,
        policy_type: SchedulePolicyType,
    ) -> Result<BTreeMap<String, String>> {
        self.policy(policy_name).await?.options(policy_type)
    }

    /// Create the default migration policy, or reset it to its default interval
    pub async fn ensure_default_policies(&self) -> Result<()> {
        let interval = IntervalPolicy {
            interval_minutes: DEFAULT_MIGRATION_INTERVAL_MINUTES,
            ..Default::default()
        };
        match self.store.get_policy(DEFAULT_MIGRATION_POLICY).await? {
            Some(mut existing) => {
                existing.policy.interval = Some(interval);
                self.store.update_policy(&existing).await?;
                debug!("Reset schedule policy {}", DEFAULT_MIGRATION_POLICY);
            }
            None => {
                let policy = SchedulePolicy::new(
                    DEFAULT_MIGRATION_POLICY,
                    SchedulePolicyItem {
                        interval: Some(interval),
                        ..Default::default()
                    },
                );
                self.store.create_policy(&policy).await?;
                info!("Created schedule policy {}", DEFAULT_MIGRATION_POLICY);
            }
        }
        Ok(())
    }
}
