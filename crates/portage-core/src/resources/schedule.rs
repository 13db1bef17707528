use super::migration::MigrationSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// Recurring migration; created Migrations carry its name in an annotation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSchedule {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: MigrationScheduleSpec,
    #[serde(default)]
    pub status: MigrationScheduleStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationScheduleSpec {
    #[serde(default)]
    pub template: MigrationSpec,
    #[serde(default)]
    pub schedule_policy_name: String,
    #[serde(default)]
    pub suspend: bool,
    /// Suspend this schedule once the migrated applications are activated remotely
    #[serde(default)]
    pub auto_suspend: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationScheduleStatus {
    #[serde(default)]
    pub application_activated: bool,
}
