use meter_client::domain::HeaderFields;
use time::OffsetDateTime;

/// Counters gathered while importing one file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ImportStats {
    pub meters_created: u64,
    pub meters_existing: u64,
    pub readings_created: u64,
    /// Readings whose natural key was already stored.
    pub duplicates_skipped: u64,
    /// Lines or items dropped as malformed.
    pub records_skipped: u64,
}

impl ImportStats {
    /// Rows this import added to the store.
    pub fn record_count(&self) -> i64 {
        (self.meters_created + self.readings_created) as i64
    }
}

/// Running state of one file import, threaded through every dispatch call.
///
/// Grammar records refer back to the metering point, meter and register named
/// by earlier lines; those live here, never in shared state.
#[derive(Debug, Clone)]
pub struct ImportContext {
    /// Captured once per import; stands in for any timestamp that cannot be parsed.
    pub now: OffsetDateTime,
    pub header: HeaderFields,
    pub current_point: Option<String>,
    pub current_meter: Option<String>,
    pub current_register: Option<String>,
    pub stats: ImportStats,
}

impl ImportContext {
    pub fn new(now: OffsetDateTime) -> Self {
        Self {
            now,
            header: HeaderFields::default(),
            current_point: None,
            current_meter: None,
            current_register: None,
            stats: ImportStats::default(),
        }
    }

    /// Creation time for newly sighted meters: the file header's timestamp if
    /// the header carried a valid one, otherwise the import time.
    pub fn meter_created_at(&self) -> OffsetDateTime {
        self.header.created_at.unwrap_or(self.now)
    }
}
