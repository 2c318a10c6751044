use super::{expect_line, split_lines, Effect, RawRecord, RecordError, RecordParser};
use crate::{
    context::ImportContext,
    transform::{canonicalize, to_effects, FieldMap},
};

const MIN_FIELDS: usize = 3;
/// Positional meaning of the fields of a free-text line.
const POSITIONAL_FIELDS: [&str; 4] = ["point", "serial", "value", "date"];

/// Unstructured lines of `point serial value [date]`. The separator is chosen
/// per line: pipe, tab, comma, then any whitespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct FreeTextParser;

/// Fields of the first separator yielding at least three, or `None`.
pub fn split_free_line(line: &str) -> Option<Vec<&str>> {
    [split_on(line, '|'), split_on(line, '\t'), split_on(line, ',')]
        .into_iter()
        .chain(std::iter::once(line.split_whitespace().collect()))
        .find(|fields| fields.len() >= MIN_FIELDS)
}

fn split_on(line: &str, separator: char) -> Vec<&str> {
    line.split(separator).map(str::trim).collect()
}

impl RecordParser for FreeTextParser {
    fn split(&self, content: &str) -> Vec<RawRecord> {
        split_lines(content)
    }

    fn dispatch(&self, record: &RawRecord, ctx: &mut ImportContext) -> Result<Vec<Effect>, RecordError> {
        let (_, line) = expect_line(record)?;
        let parts = split_free_line(line).ok_or_else(|| RecordError::TooFewFields {
            record: "text".to_string(),
            found: line.split_whitespace().count(),
            min: MIN_FIELDS,
        })?;
        let fields: FieldMap = POSITIONAL_FIELDS
            .iter()
            .zip(parts)
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();

        match canonicalize(&fields) {
            Some(reading) => to_effects(reading, ctx.now, ctx.meter_created_at()),
            None => Ok(Vec::new()),
        }
    }
}
