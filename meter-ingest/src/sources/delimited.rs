use super::{Effect, RawRecord, RecordError, RecordParser};
use crate::{context::ImportContext, transform::dispatch_item};

const CANDIDATE_DELIMITERS: [u8; 3] = [b',', b'\t', b';'];

/// Delimited text with a header row. Column names go through the alias
/// lookup, so any order and any subset of extra columns is accepted.
#[derive(Debug, Clone)]
pub struct DelimitedParser {
    sample_lines: usize,
}

impl DelimitedParser {
    pub fn new(sample_lines: usize) -> Self {
        Self {
            sample_lines: sample_lines.max(1),
        }
    }
}

/// First candidate that splits every sampled line into the same number (more
/// than one) of columns. Comma when nothing is consistent.
pub fn sniff_delimiter(content: &str, sample_lines: usize) -> u8 {
    let sample: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(sample_lines)
        .collect();

    CANDIDATE_DELIMITERS
        .into_iter()
        .find(|&delimiter| {
            let mut widths = sample.iter().map(|line| line.split(char::from(delimiter)).count());
            match widths.next() {
                Some(first) if first > 1 => widths.all(|w| w == first),
                _ => false,
            }
        })
        .unwrap_or(b',')
}

impl RecordParser for DelimitedParser {
    fn split(&self, content: &str) -> Vec<RawRecord> {
        let content = content.trim_start_matches('\u{feff}');
        let delimiter = sniff_delimiter(content, self.sample_lines);
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let headers = match reader.headers() {
            Ok(headers) => headers.clone(),
            Err(e) => {
                return vec![RawRecord::Malformed {
                    position: 1,
                    reason: format!("failed to read header row: {e}"),
                }]
            }
        };

        reader
            .records()
            .enumerate()
            .map(|(idx, result)| match result {
                Ok(row) => RawRecord::Item {
                    index: idx + 1,
                    fields: headers
                        .iter()
                        .zip(row.iter())
                        .map(|(name, value)| (name.to_string(), value.to_string()))
                        .collect(),
                },
                Err(e) => RawRecord::Malformed {
                    position: idx + 1,
                    reason: format!("failed to read row: {e}"),
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
    fn sniffs_consistent_delimiter() {
        assert_eq!(sniff_delimiter("a,b,c\n1,2,3\n", 10), b',');
        assert_eq!(sniff_delimiter("a\tb\tc\n1\t2\t3\n", 10), b'\t');
        assert_eq!(sniff_delimiter("a;b;c\n1;2,5;3\n", 10), b';');
        assert_eq!(sniff_delimiter("single\ncolumn\n", 10), b',');
    }

    #[test]
    fn rows_become_items_keyed_by_header() {
        let parser = DelimitedParser::new(10);
        let records = parser.split("point,serial,reading,date\n1200023305967,S1,10.5,2024-01-15\n1200023305968,S2,11,2024-01-16\n");
        assert_eq!(records.len(), 2);
        assert!(matches!(&records[1], RawRecord::Item { index: 2, fields }
            if fields[1] == ("serial".to_string(), "S2".to_string())));
    }

    #[test]
    fn semicolon_file_dispatches_to_effects() {
        let parser = DelimitedParser::new(10);
        let mut ctx = ImportContext::new(datetime!(2024-06-01 12:00:00 UTC));
        let records = parser.split("MPAN;Serial;Value\n1200023305967;S1;7\n");
        let effects = parser.dispatch(&records[0], &mut ctx).unwrap();
        assert_eq!(effects.len(), 2);
    }

    #[test]
    fn short_rows_are_dropped_not_fatal() {
        let parser = DelimitedParser::new(10);
        let mut ctx = ImportContext::new(datetime!(2024-06-01 12:00:00 UTC));
        let records = parser.split("mpan,serial,reading\n1200023305967,S1\n");
        assert_eq!(parser.dispatch(&records[0], &mut ctx), Ok(Vec::new()));
    }
}
