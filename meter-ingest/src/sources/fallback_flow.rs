use meter_client::domain::{EnergyType, HeaderFields, ReadingType};
use tracing::{debug, warn};

use super::{expect_line, parse_value, split_lines, Effect, FlowFields, MeterDraft, RawRecord, ReadingDraft, RecordError, RecordParser};
use crate::{
    context::ImportContext,
    dates::{parse_compact, parse_flow_datetime},
};

/// Every fallback meter reads into this register.
const FALLBACK_REGISTER: &str = "00";
const DEFAULT_METHOD: &str = "T";

/// The looser flow variant, opened by a `ZHV` header.
///
/// ```text
/// ZHV|Seq|Version|RecordType|Sender|..|Receiver|CreationDateTime
/// 026|MPAN|Class
/// 028|MeterSerial
/// 030|ReadingType|ReadingDateTime|Value|..|..|Method
/// ZPT|RecordCount
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackFlowParser;

impl FallbackFlowParser {
    fn header(&self, f: &FlowFields<'_>, ctx: &mut ImportContext) -> Result<Vec<Effect>, RecordError> {
        f.require(8)?;
        let stamp = f.get(7);
        let created_at = if stamp.chars().all(|c| c.is_ascii_digit()) {
            parse_compact(stamp)
        } else {
            None
        };
        if created_at.is_none() {
            warn!(stamp, "unparseable header timestamp, leaving it unset");
        }
        ctx.header = HeaderFields {
            sequence_number: f.non_empty(1),
            version: f.non_empty(2),
            sender: f.non_empty(4),
            receiver: f.non_empty(6),
            created_at,
        };
        Ok(Vec::new())
    }

    fn metering_point(&self, f: &FlowFields<'_>, ctx: &mut ImportContext) -> Result<Vec<Effect>, RecordError> {
        f.require(3)?;
        let point = f.non_empty(1).ok_or(RecordError::MissingField("metering point id"))?;
        ctx.current_point = Some(point);
        Ok(Vec::new())
    }

    fn meter(&self, f: &FlowFields<'_>, ctx: &mut ImportContext) -> Result<Vec<Effect>, RecordError> {
        f.require(2)?;
        let serial = f.non_empty(1).ok_or(RecordError::MissingField("meter serial"))?;
        let point_id = ctx.current_point.clone().ok_or(RecordError::MissingContext {
            record: "028",
            missing: "metering point",
        })?;
        ctx.current_meter = Some(serial.clone());
        ctx.current_register = Some(FALLBACK_REGISTER.to_string());
        Ok(vec![Effect::Meter(MeterDraft {
            serial,
            point_id,
            energy_type: EnergyType::Electricity,
            created_at: ctx.meter_created_at(),
        })])
    }

    fn reading(&self, f: &FlowFields<'_>, ctx: &mut ImportContext) -> Result<Vec<Effect>, RecordError> {
        f.require(5)?;
        let (date, raw_value) = (f.get(2), f.get(3));
        if date.is_empty() || raw_value.is_empty() {
            return Err(RecordError::MissingField("reading value or date"));
        }
        let value = parse_value(raw_value)?;
        let serial = ctx.current_meter.clone().ok_or(RecordError::MissingContext {
            record: "030",
            missing: "meter",
        })?;
        let taken_at = parse_flow_datetime(date, "").unwrap_or_else(|| {
            warn!(date, "unparseable reading timestamp, using import time");
            ctx.now
        });

        Ok(vec![Effect::Reading(ReadingDraft {
            serial,
            register_id: ctx
                .current_register
                .clone()
                .unwrap_or_else(|| FALLBACK_REGISTER.to_string()),
            taken_at,
            value,
            reading_type: ReadingType::from_code(f.get(1)),
            measurement_method: f.non_empty(6).unwrap_or_else(|| DEFAULT_METHOD.to_string()),
        })])
    }
}

impl RecordParser for FallbackFlowParser {
    fn split(&self, content: &str) -> Vec<RawRecord> {
        split_lines(content)
    }

    fn dispatch(&self, record: &RawRecord, ctx: &mut ImportContext) -> Result<Vec<Effect>, RecordError> {
        let (_, line) = expect_line(record)?;
        let fields = FlowFields::parse(line);
        match fields.record_type() {
            "ZHV" => self.header(&fields, ctx),
            "026" => self.metering_point(&fields, ctx),
            "028" => self.meter(&fields, ctx),
            "030" => self.reading(&fields, ctx),
            "ZPT" => {
                fields.require(2)?;
                debug!(declared_records = fields.get(1), "trailer reached");
                Ok(Vec::new())
            }
            other => Err(RecordError::UnknownRecordType(other.to_string())),
        }
    }
}
