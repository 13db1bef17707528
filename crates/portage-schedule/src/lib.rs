//! Portage Schedule - recurrence policies for scheduled migrations
//!
//! This crate provides:
//! - SchedulePolicy resource types (interval, daily, weekly, monthly)
//! - Policy validation and 12-hour time / weekday parsing
//! - The trigger evaluator consulted by migration schedules
//! - Policy stores backed by memory or a cluster

pub mod error;
pub mod evaluator;
pub mod policy;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use error::{Result, ScheduleError};
pub use evaluator::{is_due, next_trigger, ScheduleEvaluator};
pub use policy::validate_policy;
pub use store::{ClusterPolicyStore, InMemoryPolicyStore, SchedulePolicyStore};
pub use types::{
    DailyPolicy, IntervalPolicy, MonthlyPolicy, SchedulePolicy, SchedulePolicyItem,
    SchedulePolicyType, WeeklyPolicy,
};
