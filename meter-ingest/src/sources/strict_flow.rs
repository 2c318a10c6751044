use meter_client::domain::{EnergyType, HeaderFields, ReadingType};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::{expect_line, parse_value, split_lines, Effect, FlowFields, MeterDraft, RawRecord, ReadingDraft, RecordError, RecordParser};
use crate::{context::ImportContext, dates::parse_flow_datetime};

const POINT_ID_LEN: usize = 13;
const DEFAULT_REGISTER: &str = "00";
const DEFAULT_METHOD: &str = "T";

/// The standard flow grammar, opened by a `ZHD` header.
///
/// ```text
/// ZHD|FlowRef|Version|FromRole|ToRole|CreationDate|CreationTime|AppRef
/// 026|MPANCore|MeasurementClass
/// 028|RegisterID|TPR|MQ|MeterSerial|ReadingType|PrevDate|PrevTime|CurrDate|CurrTime|CurrValue|MDReset
/// 029|Seq|Date|Time|Value|Reason|Method|Received
/// ZTR|RecordCount|Checksum
/// ```
#[derive(Debug, Clone)]
pub struct StrictFlowParser {
    previous_reading_placeholder: bool,
}

impl StrictFlowParser {
    /// With `previous_reading_placeholder`, a detail record whose previous
    /// read falls on another day also yields a zero-valued estimated reading
    /// at the previous timestamp.
    pub fn new(previous_reading_placeholder: bool) -> Self {
        Self {
            previous_reading_placeholder,
        }
    }

    fn header(&self, f: &FlowFields<'_>, ctx: &mut ImportContext) -> Result<Vec<Effect>, RecordError> {
        f.require(8)?;
        let created_at = parse_flow_datetime(f.get(5), f.get(6));
        if created_at.is_none() {
            warn!(date = f.get(5), time = f.get(6), "unparseable header timestamp, leaving it unset");
        }
        ctx.header = HeaderFields {
            sequence_number: f.non_empty(1),
            version: f.non_empty(2),
            sender: f.non_empty(3),
            receiver: f.non_empty(4),
            created_at,
        };
        Ok(Vec::new())
    }

    fn metering_point(&self, f: &FlowFields<'_>, ctx: &mut ImportContext) -> Result<Vec<Effect>, RecordError> {
        f.require(3)?;
        let point = f.get(1);
        if point.chars().count() != POINT_ID_LEN {
            return Err(RecordError::InvalidPointId(point.to_string()));
        }
        ctx.current_point = Some(point.to_string());
        Ok(Vec::new())
    }

    fn meter_detail(&self, f: &FlowFields<'_>, ctx: &mut ImportContext) -> Result<Vec<Effect>, RecordError> {
        f.require(12)?;
        let serial = f.non_empty(4).ok_or(RecordError::MissingField("meter serial"))?;
        let current_value = f.get(10);
        if current_value.is_empty() {
            return Err(RecordError::MissingField("current reading value"));
        }
        let point_id = ctx.current_point.clone().ok_or(RecordError::MissingContext {
            record: "028",
            missing: "metering point",
        })?;
        let register_id = f.non_empty(1).unwrap_or_else(|| DEFAULT_REGISTER.to_string());

        let mut effects = vec![Effect::Meter(MeterDraft {
            serial: serial.clone(),
            point_id,
            energy_type: EnergyType::Electricity,
            created_at: ctx.meter_created_at(),
        })];
        ctx.current_meter = Some(serial.clone());
        ctx.current_register = Some(register_id.clone());

        // A bad value loses the reading, not the meter.
        match parse_value(current_value) {
            Ok(value) => {
                let taken_at = parse_flow_datetime(f.get(8), f.get(9)).unwrap_or_else(|| {
                    warn!(date = f.get(8), time = f.get(9), "unparseable reading timestamp, using import time");
                    ctx.now
                });
                effects.push(Effect::Reading(ReadingDraft {
                    serial: serial.clone(),
                    register_id: register_id.clone(),
                    taken_at,
                    value,
                    reading_type: ReadingType::from_code(f.non_empty(5).as_deref().unwrap_or("A")),
                    measurement_method: DEFAULT_METHOD.to_string(),
                }));
            }
            Err(err) => warn!(serial = %serial, error = %err, "meter recorded without its current reading"),
        }

        let (prev_date, prev_time) = (f.get(6), f.get(7));
        if self.previous_reading_placeholder && !prev_date.is_empty() && !prev_time.is_empty() && prev_date != f.get(8) {
            match parse_flow_datetime(prev_date, prev_time) {
                Some(taken_at) => effects.push(Effect::Reading(ReadingDraft {
                    serial,
                    register_id,
                    taken_at,
                    value: Decimal::ZERO,
                    reading_type: ReadingType::Estimated,
                    measurement_method: DEFAULT_METHOD.to_string(),
                })),
                None => warn!(date = prev_date, time = prev_time, "unparseable previous reading timestamp"),
            }
        }

        Ok(effects)
    }

    fn register_reading(&self, f: &FlowFields<'_>, ctx: &mut ImportContext) -> Result<Vec<Effect>, RecordError> {
        f.require(8)?;
        let (date, time, raw_value) = (f.get(2), f.get(3), f.get(4));
        if date.is_empty() {
            return Err(RecordError::MissingField("reading date"));
        }
        if raw_value.is_empty() {
            return Err(RecordError::MissingField("reading value"));
        }
        let value = parse_value(raw_value)?;
        let serial = ctx.current_meter.clone().ok_or(RecordError::MissingContext {
            record: "029",
            missing: "meter",
        })?;
        let register_id = ctx
            .current_register
            .clone()
            .unwrap_or_else(|| DEFAULT_REGISTER.to_string());
        let taken_at = parse_flow_datetime(date, time).unwrap_or_else(|| {
            warn!(date, time, "unparseable reading timestamp, using import time");
            ctx.now
        });

        Ok(vec![Effect::Reading(ReadingDraft {
            serial,
            register_id,
            taken_at,
            value,
            reading_type: ReadingType::from_code(f.non_empty(6).as_deref().unwrap_or("A")),
            measurement_method: DEFAULT_METHOD.to_string(),
        })])
    }
}

impl RecordParser for StrictFlowParser {
    fn split(&self, content: &str) -> Vec<RawRecord> {
        split_lines(content)
    }

    fn dispatch(&self, record: &RawRecord, ctx: &mut ImportContext) -> Result<Vec<Effect>, RecordError> {
        let (_, line) = expect_line(record)?;
        let fields = FlowFields::parse(line);
        match fields.record_type() {
            "ZHD" => self.header(&fields, ctx),
            "026" => self.metering_point(&fields, ctx),
            "028" => self.meter_detail(&fields, ctx),
            "029" => self.register_reading(&fields, ctx),
            "ZTR" => {
                fields.require(3)?;
                debug!(declared_records = fields.get(1), "trailer reached");
                Ok(Vec::new())
            }
            other => Err(RecordError::UnknownRecordType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn run(parser: &StrictFlowParser, lines: &[&str], ctx: &mut ImportContext) -> Vec<Result<Vec<Effect>, RecordError>> {
        parser
            .split(&lines.join("\n"))
            .iter()
            .map(|record| parser.dispatch(record, ctx))
            .collect()
    }

    fn ctx() -> ImportContext {
        ImportContext::new(datetime!(2024-06-01 12:00:00 UTC))
    }

    #[test]
    fn well_formed_file_yields_one_meter_and_one_reading() {
        let parser = StrictFlowParser::new(true);
        let mut ctx = ctx();
        let results = run(
            &parser,
            &[
                "ZHD|0000475656|D0010002|D|UDMS|20160302|153151|OPER|",
                "026|1200023305967|V|",
                "028|01|TPR|kWh|F75A00802|A|20160222|000000|20160222|000000|56311.0|N|",
                "ZTR|5|12345|",
            ],
            &mut ctx,
        );

        assert!(results.iter().all(Result::is_ok));
        let effects: Vec<Effect> = results.into_iter().flat_map(Result::unwrap).collect();
        assert_eq!(effects.len(), 2);
        assert!(matches!(&effects[0], Effect::Meter(m)
            if m.serial == "F75A00802"
                && m.point_id == "1200023305967"
                && m.created_at == datetime!(2016-03-02 15:31:51 UTC)));
        match &effects[1] {
            Effect::Reading(r) => {
                assert_eq!(r.value, Decimal::new(563110, 1));
                assert_eq!(r.register_id, "01");
                assert_eq!(r.reading_type, ReadingType::Actual);
                assert_eq!(r.taken_at, datetime!(2016-02-22 00:00:00 UTC));
            }
            other => panic!("expected reading, got {other:?}"),
        }
        assert_eq!(ctx.header.sender.as_deref(), Some("D"));
        assert_eq!(ctx.header.receiver.as_deref(), Some("UDMS"));
    }

    #[test]
    fn shifted_detail_line_keeps_meter_and_skips_short_records() {
        let parser = StrictFlowParser::new(true);
        let mut ctx = ctx();
        let results = run(
            &parser,
            &[
                "ZHD|0000475656|D0010002|D|UDMS|X|MRCY|20160302153151||||OPER|",
                "026|1200023305967|V|",
                "028|F75A00802|S|kWh|A|20160222000000|20160222000000|20160222000000|20160222000000|56311.0|N|",
                "029|S|20160222000000|56311.0|N|T|",
                "ZTR|5|",
            ],
            &mut ctx,
        );

        // The value slot holds "N", so only the meter survives.
        let detail = results[2].as_ref().unwrap();
        assert_eq!(detail.len(), 1);
        assert!(matches!(&detail[0], Effect::Meter(m) if m.serial == "A"));
        assert!(matches!(results[3], Err(RecordError::TooFewFields { min: 8, .. })));
        // The trailing separator makes "ZTR|5|" three fields wide.
        assert!(results[4].is_ok());
        assert_eq!(ctx.header.created_at, None);
    }

    #[test]
    fn header_timestamp_feeds_meter_creation_time() {
        let parser = StrictFlowParser::new(false);
        let mut ctx = ctx();
        run(
            &parser,
            &[
                "ZHD|0001|D0010002|X|UDMS|20240115|093000|APP|",
                "026|1200023305967|V|",
            ],
            &mut ctx,
        );
        assert_eq!(ctx.header.created_at, Some(datetime!(2024-01-15 09:30:00 UTC)));
        assert_eq!(ctx.meter_created_at(), datetime!(2024-01-15 09:30:00 UTC));
        assert_eq!(ctx.current_point.as_deref(), Some("1200023305967"));
    }

    #[test]
    fn addendum_attaches_to_current_meter_and_register() {
        let parser = StrictFlowParser::new(false);
        let mut ctx = ctx();
        let results = run(
            &parser,
            &[
                "026|1200023305967|V|",
                "028|01|TPR|kWh|SER1|A|||20240101|000000|100.5|N|",
                "029|1|20240102|000000|101.25|R|E|Y|",
            ],
            &mut ctx,
        );
        let addendum = results[2].as_ref().unwrap();
        assert_eq!(addendum.len(), 1);
        match &addendum[0] {
            Effect::Reading(r) => {
                assert_eq!(r.serial, "SER1");
                assert_eq!(r.register_id, "01");
                assert_eq!(r.reading_type, ReadingType::Estimated);
                assert_eq!(r.taken_at, datetime!(2024-01-02 00:00:00 UTC));
            }
            other => panic!("expected reading, got {other:?}"),
        }
    }

    #[test]
    fn placeholder_only_when_previous_read_is_on_another_day() {
        let line = "028|01|TPR|kWh|SER1|A|20231201|000000|20240101|000000|100.5|N|";

        let mut ctx_on = ctx();
        ctx_on.current_point = Some("1200023305967".into());
        let effects = StrictFlowParser::new(true).meter_detail(&FlowFields::parse(line), &mut ctx_on).unwrap();
        assert_eq!(effects.len(), 3);
        assert!(matches!(&effects[2], Effect::Reading(r)
            if r.value == Decimal::ZERO
                && r.reading_type == ReadingType::Estimated
                && r.taken_at == datetime!(2023-12-01 00:00:00 UTC)));

        let mut ctx_off = ctx();
        ctx_off.current_point = Some("1200023305967".into());
        let effects = StrictFlowParser::new(false).meter_detail(&FlowFields::parse(line), &mut ctx_off).unwrap();
        assert_eq!(effects.len(), 2);
    }

    #[test]
    fn invalid_point_id_leaves_context_untouched() {
        let parser = StrictFlowParser::new(true);
        let mut ctx = ctx();
        let results = run(&parser, &["026|12345|V|"], &mut ctx);
        assert_eq!(results[0], Err(RecordError::InvalidPointId("12345".into())));
        assert_eq!(ctx.current_point, None);
    }

    #[test]
    fn detail_without_point_or_serial_is_skipped() {
        let parser = StrictFlowParser::new(true);
        let mut ctx = ctx();
        let results = run(
            &parser,
            &[
                "028|01|TPR|kWh|SER1|A|||20240101|000000|100.5|N|",
                "026|1200023305967|V|",
                "028|01|TPR|kWh||A|||20240101|000000|100.5|N|",
            ],
            &mut ctx,
        );
        assert!(matches!(results[0], Err(RecordError::MissingContext { .. })));
        assert_eq!(results[2], Err(RecordError::MissingField("meter serial")));
    }

    #[test]
    fn bad_value_keeps_meter_and_bad_date_falls_back_to_now() {
        let parser = StrictFlowParser::new(false);
        let mut ctx = ctx();
        ctx.current_point = Some("1200023305967".into());
        let effects = parser
            .meter_detail(&FlowFields::parse("028|01|TPR|kWh|SER1|A|||20240101|000000|n/a|N|"), &mut ctx)
            .unwrap();
        assert_eq!(effects.len(), 1);

        let effects = parser
            .meter_detail(&FlowFields::parse("028|01|TPR|kWh|SER1|A|||garbage||7|N|"), &mut ctx)
            .unwrap();
        assert!(matches!(&effects[1], Effect::Reading(r) if r.taken_at == ctx.now));
    }

    #[test]
    fn unknown_record_type_is_reported() {
        let parser = StrictFlowParser::new(true);
        let mut ctx = ctx();
        let results = run(&parser, &["999|x|y|"], &mut ctx);
        assert_eq!(results[0], Err(RecordError::UnknownRecordType("999".into())));
    }
}
