use meter_client::domain::{EnergyType, ReadingType};
use time::OffsetDateTime;

use crate::{
    context::ImportContext,
    dates::parse_loose_date,
    sources::{parse_value, Effect, MeterDraft, RawRecord, ReadingDraft, RecordError},
};

/// Field name and raw value pairs of one generic item, in source order.
pub type FieldMap = Vec<(String, String)>;

pub const POINT_ALIASES: &[&str] = &["mpan", "mpan_core", "point", "point_id", "meter_point", "metering_point"];
pub const SERIAL_ALIASES: &[&str] = &["serial", "serial_number", "meter_serial", "msn"];
pub const VALUE_ALIASES: &[&str] = &["reading", "value", "reading_value", "read"];
pub const DATE_ALIASES: &[&str] = &["date", "reading_date", "read_date", "timestamp", "ts"];
pub const ENERGY_TYPE_ALIASES: &[&str] = &["meter_type", "energy_type", "type"];

const GENERIC_REGISTER: &str = "00";
const GENERIC_READING_TYPE: &str = "R";
const GENERIC_METHOD: &str = "T";

/// A generic item after alias lookup, before any value is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalReading {
    pub point_id: String,
    pub serial: String,
    pub value: String,
    pub date: Option<String>,
    pub energy_type: Option<String>,
}

/// First non-empty value under any of `aliases`, compared case-insensitively.
/// Earlier aliases win over later ones; within one alias the first matching
/// field wins.
pub fn lookup<'a>(fields: &'a [(String, String)], aliases: &[&str]) -> Option<&'a str> {
    aliases.iter().find_map(|alias| {
        fields
            .iter()
            .filter(|(name, _)| name.trim().eq_ignore_ascii_case(alias))
            .map(|(_, value)| value.trim())
            .find(|value| !value.is_empty())
    })
}

/// `None` when point id, serial or value is missing.
pub fn canonicalize(fields: &[(String, String)]) -> Option<CanonicalReading> {
    Some(CanonicalReading {
        point_id: lookup(fields, POINT_ALIASES)?.to_string(),
        serial: lookup(fields, SERIAL_ALIASES)?.to_string(),
        value: lookup(fields, VALUE_ALIASES)?.to_string(),
        date: lookup(fields, DATE_ALIASES).map(str::to_string),
        energy_type: lookup(fields, ENERGY_TYPE_ALIASES).map(str::to_string),
    })
}

/// Meter plus reading for one canonical item. An unparseable value rejects
/// the whole item so no meter is created for it either.
pub fn to_effects(reading: CanonicalReading, now: OffsetDateTime, created_at: OffsetDateTime) -> Result<Vec<Effect>, RecordError> {
    let value = parse_value(&reading.value)?;
    let taken_at = match reading.date.as_deref() {
        Some(raw) => parse_loose_date(raw).unwrap_or_else(|| {
            tracing::warn!(date = raw, "unrecognised date, using import time");
            now
        }),
        None => now,
    };
    let energy_type = match reading.energy_type.as_deref() {
        Some(raw) => EnergyType::from_code(raw).unwrap_or_else(|| {
            tracing::debug!(energy_type = raw, "unknown energy type, assuming electricity");
            EnergyType::default()
        }),
        None => EnergyType::default(),
    };

    Ok(vec![
        Effect::Meter(MeterDraft {
            serial: reading.serial.clone(),
            point_id: reading.point_id,
            energy_type,
            created_at,
        }),
        Effect::Reading(ReadingDraft {
            serial: reading.serial,
            register_id: GENERIC_REGISTER.to_string(),
            taken_at,
            value,
            reading_type: ReadingType::from_code(GENERIC_READING_TYPE),
            measurement_method: GENERIC_METHOD.to_string(),
        }),
    ])
}

/// Shared `dispatch` of the generic extractors.
pub fn dispatch_item(record: &RawRecord, ctx: &mut ImportContext) -> Result<Vec<Effect>, RecordError> {
    let fields = match record {
        RawRecord::Item { fields, .. } => fields,
        RawRecord::Malformed { reason, .. } => return Err(RecordError::Unusable(reason.clone())),
        RawRecord::Line { .. } => {
            return Err(RecordError::Unusable("text line passed to an item extractor".to_string()))
        }
    };
    match canonicalize(fields) {
        Some(reading) => to_effects(reading, ctx.now, ctx.meter_created_at()),
        None => {
            tracing::debug!(position = record.position(), "item lacks point id, serial or value; dropped");
            Ok(Vec::new())
        }
    }
}
