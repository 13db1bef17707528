use crate::error::{Result, ScheduleError};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use portage_core::resources::{Resource, GROUP_VERSION};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_INTERVAL_RETAIN: u32 = 10;
pub const DEFAULT_DAILY_RETAIN: u32 = 30;
pub const DEFAULT_WEEKLY_RETAIN: u32 = 7;
pub const DEFAULT_MONTHLY_RETAIN: u32 = 12;

/// Name of the policy created by [`crate::ScheduleEvaluator::ensure_default_policies`]
pub const DEFAULT_MIGRATION_POLICY: &str = "default-migration-policy";
pub const DEFAULT_MIGRATION_INTERVAL_MINUTES: i64 = 30;

/// Named recurrence rule referenced by MigrationSchedules
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulePolicy {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub policy: SchedulePolicyItem,
}

impl Resource for SchedulePolicy {
    const API_VERSION: &'static str = GROUP_VERSION;
    const KIND: &'static str = "SchedulePolicy";
    const NAMESPACED: bool = false;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl SchedulePolicy {
    pub fn new(name: &str, policy: SchedulePolicyItem) -> Self {
        Self {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            policy,
        }
    }

    /// Retain count for one schedule type, falling back to its default when unset
    pub fn retain(&self, policy_type: SchedulePolicyType) -> Result<u32> {
        let (retain, default) = match policy_type {
            SchedulePolicyType::Interval => (self.interval()?.retain, DEFAULT_INTERVAL_RETAIN),
            SchedulePolicyType::Daily => (self.daily()?.retain, DEFAULT_DAILY_RETAIN),
            SchedulePolicyType::Weekly => (self.weekly()?.retain, DEFAULT_WEEKLY_RETAIN),
            SchedulePolicyType::Monthly => (self.monthly()?.retain, DEFAULT_MONTHLY_RETAIN),
        };
        Ok(if retain == 0 { default } else { retain })
    }

    /// Free-form options of one schedule type
    pub fn options(&self, policy_type: SchedulePolicyType) -> Result<BTreeMap<String, String>> {
        Ok(match policy_type {
            SchedulePolicyType::Interval => self.interval()?.options.clone(),
            SchedulePolicyType::Daily => self.daily()?.options.clone(),
            SchedulePolicyType::Weekly => self.weekly()?.options.clone(),
            SchedulePolicyType::Monthly => self.monthly()?.options.clone(),
        })
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub(crate) fn interval(&self) -> Result<&IntervalPolicy> {
        self.policy
            .interval
            .as_ref()
            .ok_or_else(|| self.missing(SchedulePolicyType::Interval))
    }

    pub(crate) fn daily(&self) -> Result<&DailyPolicy> {
        self.policy
            .daily
            .as_ref()
            .ok_or_else(|| self.missing(SchedulePolicyType::Daily))
    }

    pub(crate) fn weekly(&self) -> Result<&WeeklyPolicy> {
        self.policy
            .weekly
            .as_ref()
            .ok_or_else(|| self.missing(SchedulePolicyType::Weekly))
    }

    pub(crate) fn monthly(&self) -> Result<&MonthlyPolicy> {
        self.policy
            .monthly
            .as_ref()
            .ok_or_else(|| self.missing(SchedulePolicyType::Monthly))
    }

    fn missing(&self, policy_type: SchedulePolicyType) -> ScheduleError {
        ScheduleError::policy_type_not_set(self.name(), policy_type.to_string())
    }
}

/// The sub-policies of a SchedulePolicy; any subset may be set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulePolicyItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<IntervalPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily: Option<DailyPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekly: Option<WeeklyPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly: Option<MonthlyPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalPolicy {
    #[serde(default)]
    pub interval_minutes: i64,
    #[serde(default)]
    pub retain: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

/// Runs once a day at `time`, e.g. `11:15PM`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyPolicy {
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub retain: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyPolicy {
    /// Day name or a prefix of at least three letters
    #[serde(default)]
    pub day: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub retain: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyPolicy {
    /// Day of month; clamps to the last day in shorter months
    #[serde(default)]
    pub date: u32,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub retain: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchedulePolicyType {
    Interval,
    Daily,
    Weekly,
    Monthly,
}

impl SchedulePolicyType {
    pub const ALL: [SchedulePolicyType; 4] = [
        SchedulePolicyType::Interval,
        SchedulePolicyType::Daily,
        SchedulePolicyType::Weekly,
        SchedulePolicyType::Monthly,
    ];
}

impl fmt::Display for SchedulePolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulePolicyType::Interval => write!(f, "Interval"),
            SchedulePolicyType::Daily => write!(f, "Daily"),
            SchedulePolicyType::Weekly => write!(f, "Weekly"),
            SchedulePolicyType::Monthly => write!(f, "Monthly"),
        }
    }
}

impl FromStr for SchedulePolicyType {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "interval" => Ok(Self::Interval),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            _ => Err(ScheduleError::unknown_policy_type(s)),
        }
    }
}
