use roxmltree::{Document, Node, ParsingOptions};

use super::{Effect, RawRecord, RecordError, RecordParser};
use crate::{
    context::ImportContext,
    transform::{dispatch_item, FieldMap},
};

const ITEM_ELEMENT: &str = "reading";

/// XML documents. Every `reading` element, at any depth, is one item whose
/// fields are its attributes followed by its direct child elements' text.
/// Element names are matched case-insensitively.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkupParser;

fn is_item(node: &Node<'_, '_>) -> bool {
    node.is_element() && node.tag_name().name().eq_ignore_ascii_case(ITEM_ELEMENT)
}

fn element_fields(element: Node<'_, '_>) -> FieldMap {
    let mut fields: FieldMap = element
        .attributes()
        .map(|attr| (attr.name().to_string(), attr.value().to_string()))
        .collect();

    // Nested items are reported on their own.
    for child in element.children().filter(|n| n.is_element() && !is_item(n)) {
        let text: String = child
            .descendants()
            .filter(|n| n.is_text())
            .filter_map(|n| n.text())
            .collect();
        fields.push((child.tag_name().name().to_string(), text.trim().to_string()));
    }
    fields
}

impl RecordParser for MarkupParser {
    fn split(&self, content: &str) -> Vec<RawRecord> {
        let options = ParsingOptions {
            allow_dtd: true,
            ..ParsingOptions::default()
        };
        let document = match Document::parse_with_options(content, options) {
            Ok(document) => document,
            Err(e) => {
                return vec![RawRecord::Malformed {
                    position: e.pos().row as usize,
                    reason: format!("invalid XML document: {e}"),
                }]
            }
        };

        document
            .descendants()
            .filter(is_item)
            .enumerate()
            .map(|(idx, element)| RawRecord::Item {
                index: idx + 1,
                fields: element_fields(element),
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
    use crate::transform::canonicalize;
    use time::macros::datetime;

    const DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<readings>
  <Reading mpan="1200023305967" serial="S1">
    <value>56311.0</value>
    <date>2024-01-15</date>
  </Reading>
  <reading>
    <mpan>1200023305968</mpan>
    <serial>S2</serial>
    <value> 12 </value>
  </reading>
  <reading mpan="1200023305969"/>
</readings>"#;

    #[test]
    fn attributes_and_child_elements_become_fields() {
        let records = MarkupParser.split(DOC);
        assert_eq!(records.len(), 3);

        let RawRecord::Item { fields, .. } = &records[0] else {
            panic!("expected item");
        };
        let reading = canonicalize(fields).unwrap();
        assert_eq!(reading.point_id, "1200023305967");
        assert_eq!(reading.value, "56311.0");
        assert_eq!(reading.date.as_deref(), Some("2024-01-15"));

        let RawRecord::Item { fields, .. } = &records[1] else {
            panic!("expected item");
        };
        let reading = canonicalize(fields).unwrap();
        assert_eq!(reading.serial, "S2");
        assert_eq!(reading.value, "12");
    }

    #[test]
    fn incomplete_elements_are_dropped() {
        let parser = MarkupParser;
        let mut ctx = ImportContext::new(datetime!(2024-06-01 12:00:00 UTC));
        let records = parser.split(DOC);
        assert_eq!(parser.dispatch(&records[2], &mut ctx), Ok(Vec::new()));
        assert_eq!(parser.dispatch(&records[0], &mut ctx).unwrap().len(), 2);
    }

    #[test]
    fn self_closed_child_does_not_swallow_its_siblings() {
        let records = MarkupParser.split(
            "<readings><reading><date/><mpan>1200023305967</mpan><serial>S1</serial><value>5</value></reading></readings>",
        );
        assert_eq!(records.len(), 1);
        let RawRecord::Item { fields, .. } = &records[0] else {
            panic!("expected item");
        };
        assert_eq!(fields[0], ("date".to_string(), String::new()));
        let reading = canonicalize(fields).unwrap();
        assert_eq!(reading.point_id, "1200023305967");
        assert_eq!(reading.serial, "S1");
        assert_eq!(reading.value, "5");
    }

    #[test]
    fn broken_document_is_one_malformed_record() {
        let records = MarkupParser.split("<readings>\n<reading mpan=\"1\">\n</readings>");
        assert!(matches!(records.as_slice(), [RawRecord::Malformed { .. }]));
    }

    #[test]
    fn document_without_items_yields_nothing() {
        assert!(MarkupParser.split("<meters><meter id=\"1\"/></meters>").is_empty());
    }
}
