use serde_json::{Map, Value};

use super::{Effect, RawRecord, RecordError, RecordParser};
use crate::{
    context::ImportContext,
    transform::{dispatch_item, FieldMap},
};

/// JSON documents. Items are the elements of a top-level array, of a
/// top-level `readings` or `meters` array, or the top-level object itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectNotationParser;

fn candidate_items(document: Value) -> Vec<Value> {
    match document {
        Value::Array(items) => items,
        Value::Object(mut object) => {
            for key in ["readings", "meters"] {
                if let Some(Value::Array(items)) = object.remove(key) {
                    return items;
                }
            }
            vec![Value::Object(object)]
        }
        scalar => vec![scalar],
    }
}

/// Scalar members only; nested arrays and objects are not looked into.
fn object_fields(object: &Map<String, Value>) -> FieldMap {
    object
        .iter()
        .filter_map(|(key, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null | Value::Array(_) | Value::Object(_) => return None,
            };
            Some((key.clone(), text))
        })
        .collect()
}

impl RecordParser for ObjectNotationParser {
    fn split(&self, content: &str) -> Vec<RawRecord> {
        let document: Value = match serde_json::from_str(content.trim_start_matches('\u{feff}')) {
            Ok(document) => document,
            Err(e) => {
                return vec![RawRecord::Malformed {
                    position: e.line(),
                    reason: format!("invalid JSON document: {e}"),
                }]
            }
        };

        candidate_items(document)
            .into_iter()
            .enumerate()
            .map(|(idx, item)| match item {
                Value::Object(object) => RawRecord::Item {
                    index: idx + 1,
                    fields: object_fields(&object),
                },
                other => RawRecord::Malformed {
                    position: idx + 1,
                    reason: format!("item is not an object: {other}"),
                },
            })
            .collect()
    }

    fn dispatch(&self, record: &RawRecord, ctx: &mut ImportContext) -> Result<Vec<Effect>, RecordError> {
        dispatch_item(record, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn nested_readings_array_is_unwrapped() {
        let records = ObjectNotationParser.split(
            r#"{"source": "x", "readings": [
                {"mpan": "1200023305967", "serial": "S1", "reading": 56311.0, "date": "2024-01-15"},
                {"mpan": "1200023305967", "serial": "S1", "reading": null}
            ]}"#,
        );
        assert_eq!(records.len(), 2);
        assert!(matches!(&records[0], RawRecord::Item { fields, .. }
            if fields.iter().any(|(k, v)| k == "reading" && v == "56311.0")));
        assert!(matches!(&records[1], RawRecord::Item { fields, .. } if !fields.iter().any(|(k, _)| k == "reading")));
    }

    #[test]
    fn top_level_array_and_single_object() {
        assert_eq!(ObjectNotationParser.split(r#"[{"a": 1}, {"b": 2}, 3]"#).len(), 3);
        assert_eq!(ObjectNotationParser.split(r#"{"mpan": "1", "serial": "S", "value": "2"}"#).len(), 1);
        assert!(matches!(
            ObjectNotationParser.split(r#"[{"a": 1}, 3]"#)[1],
            RawRecord::Malformed { position: 2, .. }
        ));
    }

    #[test]
    fn broken_document_is_one_malformed_record() {
        let parser = ObjectNotationParser;
        let mut ctx = ImportContext::new(datetime!(2024-06-01 12:00:00 UTC));
        let records = parser.split("{\"readings\": [");
        assert_eq!(records.len(), 1);
        assert!(matches!(parser.dispatch(&records[0], &mut ctx), Err(RecordError::Unusable(_))));
    }

    #[test]
    fn meters_array_items_become_effects() {
        let parser = ObjectNotationParser;
        let mut ctx = ImportContext::new(datetime!(2024-06-01 12:00:00 UTC));
        let records = parser.split(r#"{"meters": [{"MPAN": "1200023305967", "msn": "S9", "value": 3, "energy_type": "G"}]}"#);
        let effects = parser.dispatch(&records[0], &mut ctx).unwrap();
        assert_eq!(effects.len(), 2);
    }
}
