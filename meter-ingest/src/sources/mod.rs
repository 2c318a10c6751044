//! Record parsers, one per input format.
//!
//! Every parser does two things: [`RecordParser::split`] cuts decoded content
//! into records (lines or items) and [`RecordParser::dispatch`] turns one
//! record into [`Effect`]s while updating the per-file [`ImportContext`].
//! Parsers never touch the store; the pipeline applies the effects.

pub mod delimited;
pub mod document;
pub mod fallback_flow;
pub mod free_text;
pub mod markup;
pub mod object_notation;
pub mod strict_flow;

pub use delimited::DelimitedParser;
pub use fallback_flow::FallbackFlowParser;
pub use free_text::FreeTextParser;
pub use markup::MarkupParser;
pub use object_notation::ObjectNotationParser;
pub use strict_flow::StrictFlowParser;

use std::str::FromStr;

use meter_client::domain::{normalize_value, EnergyType, FileFormat, ReadingType};
use rust_decimal::Decimal;
use time::OffsetDateTime;

use crate::{context::ImportContext, pipeline::ImportOptions, transform::FieldMap};

/// Reading values at or above this do not fit the stored NUMERIC(12,3).
const MAX_READING_VALUE: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

/// A meter to create-or-fetch by serial number.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterDraft {
    pub serial: String,
    pub point_id: String,
    pub energy_type: EnergyType,
    pub created_at: OffsetDateTime,
}

/// A reading to create-or-fetch by natural key. The meter is named by serial
/// and must have been produced by an earlier effect of the same file.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingDraft {
    pub serial: String,
    pub register_id: String,
    pub taken_at: OffsetDateTime,
    pub value: Decimal,
    pub reading_type: ReadingType,
    pub measurement_method: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Meter(MeterDraft),
    Reading(ReadingDraft),
}

/// One unit of dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord {
    Line { number: usize, text: String },
    Item { index: usize, fields: FieldMap },
    /// Something the splitter could not turn into a record at all.
    Malformed { position: usize, reason: String },
}

impl RawRecord {
    /// Line number or item index, 1-based.
    pub fn position(&self) -> usize {
        match self {
            Self::Line { number, .. } => *number,
            Self::Item { index, .. } => *index,
            Self::Malformed { position, .. } => *position,
        }
    }
}

/// A line or item that could not be used. Logged and skipped; never fatal.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("{record} record has {found} fields, needs at least {min}")]
    TooFewFields { record: String, found: usize, min: usize },
    #[error("unknown record type '{0}'")]
    UnknownRecordType(String),
    #[error("invalid metering point id '{0}'")]
    InvalidPointId(String),
    #[error("{record} record without a current {missing}")]
    MissingContext { record: &'static str, missing: &'static str },
    #[error("invalid reading value '{0}'")]
    InvalidValue(String),
    #[error("missing {0}")]
    MissingField(&'static str),
    #[error("{0}")]
    Unusable(String),
}

pub trait RecordParser: Send + Sync {
    fn split(&self, content: &str) -> Vec<RawRecord>;

    fn dispatch(&self, record: &RawRecord, ctx: &mut ImportContext) -> Result<Vec<Effect>, RecordError>;
}

/// Picks the parser for a format. Document text is resolved to a concrete
/// format before this is called, and unsupported content has no parser.
pub fn parser_for(format: FileFormat, options: &ImportOptions) -> Option<Box<dyn RecordParser>> {
    let parser: Box<dyn RecordParser> = match format {
        FileFormat::StrictFlow => Box::new(StrictFlowParser::new(options.previous_reading_placeholder)),
        FileFormat::FallbackFlow => Box::new(FallbackFlowParser),
        FileFormat::Delimited => Box::new(DelimitedParser::new(options.sniff_sample_lines)),
        FileFormat::ObjectNotation => Box::new(ObjectNotationParser),
        FileFormat::Markup => Box::new(MarkupParser),
        FileFormat::FreeText => Box::new(FreeTextParser),
        FileFormat::DocumentText | FileFormat::Unsupported => return None,
    };
    Some(parser)
}

/// Non-empty, trimmed lines with their 1-based line numbers.
pub(crate) fn split_lines(content: &str) -> Vec<RawRecord> {
    content
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty())
        .map(|(number, text)| RawRecord::Line {
            number,
            text: text.to_string(),
        })
        .collect()
}

pub(crate) fn parse_value(raw: &str) -> Result<Decimal, RecordError> {
    let trimmed = raw.trim();
    let value = Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| RecordError::InvalidValue(trimmed.to_string()))?;
    // Checked at stored precision; rounding can carry a value over the limit.
    let value = normalize_value(value);
    if value.abs() >= MAX_READING_VALUE {
        return Err(RecordError::InvalidValue(trimmed.to_string()));
    }
    Ok(value)
}

/// Positional view of a `|`-delimited flow record. Missing trailing fields
/// read as empty.
pub(crate) struct FlowFields<'a> {
    fields: Vec<&'a str>,
}

impl<'a> FlowFields<'a> {
    pub(crate) fn parse(line: &'a str) -> Self {
        Self {
            fields: line.split('|').map(str::trim).collect(),
        }
    }

    pub(crate) fn record_type(&self) -> &'a str {
        self.get(0)
    }

    pub(crate) fn get(&self, idx: usize) -> &'a str {
        self.fields.get(idx).copied().unwrap_or("")
    }

    pub(crate) fn non_empty(&self, idx: usize) -> Option<String> {
        Some(self.get(idx)).filter(|s| !s.is_empty()).map(str::to_string)
    }

    /// Records below their minimum width are skipped whole.
    pub(crate) fn require(&self, min: usize) -> Result<(), RecordError> {
        if self.fields.len() < min {
            return Err(RecordError::TooFewFields {
                record: self.record_type().to_string(),
                found: self.fields.len(),
                min,
            });
        }
        Ok(())
    }
}

pub(crate) fn expect_line(record: &RawRecord) -> Result<(usize, &str), RecordError> {
    match record {
        RawRecord::Line { number, text } => Ok((*number, text.as_str())),
        RawRecord::Item { .. } => Err(RecordError::Unusable("structured item passed to a line grammar".to_string())),
        RawRecord::Malformed { reason, .. } => Err(RecordError::Unusable(reason.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_fields_pad_missing_trailing_fields() {
        let f = FlowFields::parse("026|1200023305967");
        assert_eq!(f.record_type(), "026");
        assert_eq!(f.get(1), "1200023305967");
        assert_eq!(f.get(5), "");
        assert!(f.require(3).is_err());
    }

    #[test]
    fn split_lines_drops_blanks_and_keeps_numbers() {
        let records = split_lines("ZHV|1\n\n  026|2  \n");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].position(), 3);
        assert!(matches!(&records[1], RawRecord::Line { text, .. } if text == "026|2"));
    }

    #[test]
    fn parse_value_rejects_garbage_and_overflow() {
        assert_eq!(parse_value(" 56311.0 ").unwrap(), Decimal::new(563110, 1));
        assert_eq!(parse_value("1e3").unwrap(), Decimal::new(1000, 0));
        assert!(matches!(parse_value("abc"), Err(RecordError::InvalidValue(_))));
        assert!(parse_value("1000000000").is_err());
        assert!(parse_value("999999999.9996").is_err());
        assert_eq!(parse_value("999999999.9994").unwrap(), Decimal::new(999_999_999_999, 3));
    }
}
