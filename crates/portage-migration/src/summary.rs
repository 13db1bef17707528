use chrono::{DateTime, Duration, Utc};
use portage_core::resources::{Migration, MigrationStatusType, MigrationSummary};

const UNKNOWN: &str = "NA";

/// Derive the status summary from the live volume and resource lists
pub fn compute_summary(migration: &Migration) -> MigrationSummary {
    let status = &migration.status;
    let mut summary = MigrationSummary {
        total_number_of_resources: status.resources.len() as u64,
        number_of_migrated_resources: status
            .resources
            .iter()
            .filter(|r| r.status == MigrationStatusType::Successful)
            .count() as u64,
        ..Default::default()
    };

    if migration.spec.include_volumes() {
        let volumes = status.volumes.as_deref().unwrap_or_default();
        let migrated = volumes
            .iter()
            .filter(|v| v.status == MigrationStatusType::Successful);
        summary.total_number_of_volumes = volumes.len() as u64;
        summary.number_of_migrated_volumes = migrated.clone().count() as u64;
        summary.total_bytes_migrated = migrated.map(|v| v.bytes_total).sum();
    }

    summary.elapsed_time_for_volume_migration =
        elapsed(status.start_timestamp, status.volume_migration_finish_timestamp);
    summary.elapsed_time_for_resource_migration = elapsed(
        status.volume_migration_finish_timestamp.or(status.start_timestamp),
        status.resource_migration_finish_timestamp,
    );
    summary
}

fn elapsed(start: Option<DateTime<Utc>>, finish: Option<DateTime<Utc>>) -> String {
    match (start, finish) {
        (Some(start), Some(finish)) => format_duration(finish - start),
        _ => UNKNOWN.to_string(),
    }
}

/// `1h2m3s`, with leading zero units left out
fn format_duration(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
