use crate::traits::EventRecorder;
use parking_lot::Mutex;
use portage_core::annotations::TRANSFORMED_RESOURCE_NAME;
use portage_core::resources::{Migration, MigrationResourceInfo, MigrationStatusType};
use portage_core::{DynamicObject, EventType, MigrationEvent};
use std::sync::Arc;

/// Per-resource outcomes of a migration run
///
/// Seeded with the inventory persisted right after collection and updated
/// in place as apply outcomes come in. Shared between the apply workers.
pub struct ResourceLedger {
    entries: Mutex<Vec<MigrationResourceInfo>>,
    recorder: Arc<dyn EventRecorder>,
    namespace: String,
    name: String,
    transform: Option<String>,
}

impl ResourceLedger {
    pub fn new(migration: &Migration, recorder: Arc<dyn EventRecorder>) -> Self {
        let transform = match migration.spec.transform_specs.as_slice() {
            [single] => Some(single.clone()),
            _ => None,
        };
        Self {
            entries: Mutex::new(migration.status.resources.clone()),
            recorder,
            namespace: migration.metadata.namespace.clone().unwrap_or_default(),
            name: migration.metadata.name.clone().unwrap_or_default(),
            transform,
        }
    }

    /// Record the outcome for an object and emit an event for it
    ///
    /// Objects missing from the inventory are ignored.
    pub fn record(&self, object: &DynamicObject, status: MigrationStatusType, reason: impl Into<String>) {
        let reason = reason.into();
        let mut entries = self.entries.lock();
        let Some(entry) = entries.iter_mut().find(|e| e.matches(object)) else {
            return;
        };

        if object.annotation(TRANSFORMED_RESOURCE_NAME).is_some() {
            if let Some(transform) = &self.transform {
                entry.transformed_by = Some(transform.clone());
            }
        }
        entry.status = status;
        entry.reason = reason.clone();

        let event_type = if status == MigrationStatusType::Failed {
            EventType::Warning
        } else {
            EventType::Normal
        };
        let message = format!(
            "{} {}/{}: {}",
            object.gvk(),
            entry.namespace,
            entry.name,
            reason
        );
        drop(entries);
        self.recorder.record(MigrationEvent::new(
            self.namespace.clone(),
            self.name.clone(),
            event_type,
            status.as_str(),
            message,
        ));
    }

    pub fn entries(&self) -> Vec<MigrationResourceInfo> {
        self.entries.lock().clone()
    }

    /// True when every recorded resource finished Successful
    pub fn all_successful(&self) -> bool {
        self.entries
            .lock()
            .iter()
            .all(|e| e.status == MigrationStatusType::Successful)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::RecordingEventRecorder;
    use portage_core::resources::MigrationSpec;
    use portage_core::GroupVersionKind;
    use std::collections::BTreeMap;

    fn setup(transforms: Vec<String>) -> (ResourceLedger, Arc<RecordingEventRecorder>, DynamicObject) {
        let object = DynamicObject::new(&GroupVersionKind::new("apps", "v1", "Deployment"), Some("app1"), "web");
        let spec = MigrationSpec {
            transform_specs: transforms,
            ..Default::default()
        };
        let mut migration = Migration::new("app1", "m1", spec);
        migration.status.resources =
            vec![MigrationResourceInfo::for_object(&object, MigrationStatusType::InProgress)];
        let recorder = Arc::new(RecordingEventRecorder::new());
        (ResourceLedger::new(&migration, recorder.clone()), recorder, object)
    }

    #[test]
    fn test_failed_outcome_emits_warning() {
        let (ledger, recorder, object) = setup(Vec::new());
        ledger.record(&object, MigrationStatusType::Failed, "admission denied");

        let entries = ledger.entries();
        assert_eq!(entries[0].status, MigrationStatusType::Failed);
        assert_eq!(entries[0].reason, "admission denied");
        assert!(!ledger.all_successful());

        let warnings = recorder.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].reason, "Failed");
        assert_eq!(warnings[0].message, "apps/v1/Deployment app1/web: admission denied");
    }

    #[test]
    fn test_transformed_objects_are_attributed() {
        let (ledger, _, mut object) = setup(vec!["rename-sc".to_string()]);
        let mut annotations = BTreeMap::new();
        annotations.insert(TRANSFORMED_RESOURCE_NAME.to_string(), "web".to_string());
        object.set_annotations(annotations);

        ledger.record(&object, MigrationStatusType::Successful, "Resource migrated successfully");
        assert_eq!(ledger.entries()[0].transformed_by.as_deref(), Some("rename-sc"));
        assert!(ledger.all_successful());
    }

    #[test]
    fn test_unknown_objects_are_ignored() {
        let (ledger, recorder, _) = setup(Vec::new());
        let other = DynamicObject::new(&GroupVersionKind::new("", "v1", "Service"), Some("app1"), "web");
        ledger.record(&other, MigrationStatusType::Successful, "");
        assert!(recorder.events().is_empty());
    }
}
