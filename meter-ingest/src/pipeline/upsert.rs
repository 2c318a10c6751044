use std::collections::HashMap;

use meter_client::{
    db::{StoreError, UnitOfWork},
    domain::{FileRef, MeterDefaults, MeterRef, ReadingDefaults, ReadingKey},
};
use tracing::{debug, warn};

use crate::{
    context::ImportStats,
    sources::{Effect, MeterDraft, ReadingDraft},
};

/// Applies parser effects to an open unit of work as create-or-fetch calls.
///
/// Meters are looked up by serial number and readings by natural key, so
/// running the same effects twice leaves the store unchanged. Store failures
/// are returned as-is; they abort the file.
pub struct EntityUpserter<'a> {
    unit: &'a mut dyn UnitOfWork,
    file: FileRef,
    meters: HashMap<String, MeterRef>,
}

impl<'a> EntityUpserter<'a> {
    pub fn new(unit: &'a mut dyn UnitOfWork, file: FileRef) -> Self {
        Self {
            unit,
            file,
            meters: HashMap::new(),
        }
    }

    pub async fn apply_all(&mut self, effects: Vec<Effect>, stats: &mut ImportStats) -> Result<(), StoreError> {
        for effect in effects {
            self.apply(effect, stats).await?;
        }
        Ok(())
    }

    pub async fn apply(&mut self, effect: Effect, stats: &mut ImportStats) -> Result<(), StoreError> {
        match effect {
            Effect::Meter(draft) => self.upsert_meter(draft, stats).await,
            Effect::Reading(draft) => self.upsert_reading(draft, stats).await,
        }
    }

    async fn upsert_meter(&mut self, draft: MeterDraft, stats: &mut ImportStats) -> Result<(), StoreError> {
        let defaults = MeterDefaults {
            point_id: draft.point_id,
            energy_type: draft.energy_type,
            created_at: draft.created_at,
            imported_file: self.file,
        };
        let upserted = self.unit.upsert_meter(&draft.serial, &defaults).await?;
        if upserted.created {
            stats.meters_created += 1;
            debug!(serial = %draft.serial, "meter created");
        } else {
            stats.meters_existing += 1;
        }
        self.meters.insert(draft.serial, upserted.id);
        Ok(())
    }

    async fn upsert_reading(&mut self, draft: ReadingDraft, stats: &mut ImportStats) -> Result<(), StoreError> {
        let Some(&meter) = self.meters.get(&draft.serial) else {
            warn!(serial = %draft.serial, "reading for a meter not seen in this file, skipping");
            stats.records_skipped += 1;
            return Ok(());
        };
        let key = ReadingKey::new(meter, draft.register_id, draft.taken_at, draft.value);
        let defaults = ReadingDefaults {
            reading_type: draft.reading_type,
            measurement_method: draft.measurement_method,
            imported_file: self.file,
        };
        let upserted = self.unit.upsert_reading(&key, &defaults).await?;
        if upserted.created {
            stats.readings_created += 1;
        } else {
            stats.duplicates_skipped += 1;
            debug!(serial = %draft.serial, register = %key.register_id, "duplicate reading skipped");
        }
        Ok(())
    }

    /// Hands the unit back for the final file update.
    pub fn unit(&mut self) -> &mut dyn UnitOfWork {
        &mut *self.unit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meter_client::{
        db::{InMemoryStore, Store},
        domain::{EnergyType, FileFormat, FileStatus, NewFile, ReadingType},
    };
    use rust_decimal::Decimal;
    use time::macros::datetime;

    fn meter(serial: &str) -> Effect {
        Effect::Meter(MeterDraft {
            serial: serial.to_string(),
            point_id: "1200023305967".to_string(),
            energy_type: EnergyType::Electricity,
            created_at: datetime!(2024-01-01 00:00:00 UTC),
        })
    }

    fn reading(serial: &str, value: Decimal) -> Effect {
        Effect::Reading(ReadingDraft {
            serial: serial.to_string(),
            register_id: "00".to_string(),
            taken_at: datetime!(2024-01-15 00:00:00 UTC),
            value,
            reading_type: ReadingType::Actual,
            measurement_method: "T".to_string(),
        })
    }

    #[tokio::test]
    async fn repeated_effects_are_counted_as_existing_and_duplicates() {
        let store = InMemoryStore::new();
        let mut unit = store.begin().await.unwrap();
        let file = unit
            .create_file(&NewFile {
                filename: "a.csv".into(),
                format: FileFormat::Delimited,
                fingerprint: "a".repeat(64),
                status: FileStatus::Processing,
            })
            .await
            .unwrap();

        let mut stats = ImportStats::default();
        let mut upserter = EntityUpserter::new(unit.as_mut(), file);
        let effects = vec![
            meter("S1"),
            reading("S1", Decimal::new(563110, 1)),
            meter("S1"),
            reading("S1", Decimal::new(56311000, 3)),
        ];
        upserter.apply_all(effects, &mut stats).await.unwrap();
        drop(upserter);
        unit.commit().await.unwrap();

        assert_eq!(stats.meters_created, 1);
        assert_eq!(stats.meters_existing, 1);
        assert_eq!(stats.readings_created, 1);
        assert_eq!(stats.duplicates_skipped, 1);
        assert_eq!(stats.record_count(), 2);
        assert_eq!(store.readings().await.len(), 1);
    }

    #[tokio::test]
    async fn reading_without_meter_is_skipped() {
        let store = InMemoryStore::new();
        let mut unit = store.begin().await.unwrap();
        let mut stats = ImportStats::default();
        let mut upserter = EntityUpserter::new(unit.as_mut(), FileRef(1));
        upserter.apply(reading("S1", Decimal::ONE), &mut stats).await.unwrap();
        assert_eq!(stats.records_skipped, 1);
        assert_eq!(stats.readings_created, 0);
    }
}
