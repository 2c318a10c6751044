//! File format classification from the file name and the first line.

use std::path::Path;

use meter_client::domain::FileFormat;

/// Header token of the standard flow grammar.
pub const STRICT_HEADER: &str = "ZHD|";
/// Header token of the non-standard flow variant.
pub const FALLBACK_HEADER: &str = "ZHV|";

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Classifies a file.
///
/// A known extension decides directly (flow files still pick strict or
/// fallback from their header). Otherwise the first non-empty line is sniffed.
/// Content that matches no rule is free text, except when the file carries an
/// extension we do not recognise, in which case it is unsupported.
pub fn detect_format(filename: &str, content: &[u8]) -> FileFormat {
    let first_line = first_non_empty_line(content);
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("uff") | Some("d0010") => flow_format(first_line.as_deref().unwrap_or("")),
        Some("csv") => FileFormat::Delimited,
        Some("json") => FileFormat::ObjectNotation,
        Some("xml") => FileFormat::Markup,
        Some("txt") => FileFormat::FreeText,
        Some("pdf") | Some("xlsx") | Some("xls") | Some("docx") | Some("doc") => FileFormat::DocumentText,
        Some(other) => match first_line.as_deref().and_then(sniff_line) {
            Some(format) => format,
            None => {
                tracing::debug!(extension = other, "unrecognised extension and no content match");
                FileFormat::Unsupported
            }
        },
        None => first_line
            .as_deref()
            .and_then(sniff_line)
            .unwrap_or(FileFormat::FreeText),
    }
}

/// Grammar variant announced by a header line, if any.
pub fn grammar_header(line: &str) -> Option<FileFormat> {
    let line = line.trim_start();
    if line.starts_with(STRICT_HEADER) {
        Some(FileFormat::StrictFlow)
    } else if line.starts_with(FALLBACK_HEADER) {
        Some(FileFormat::FallbackFlow)
    } else {
        None
    }
}

/// Strict only when the header says so; any other flow file is parsed with the
/// fallback grammar.
fn flow_format(first_line: &str) -> FileFormat {
    match grammar_header(first_line) {
        Some(FileFormat::StrictFlow) => FileFormat::StrictFlow,
        _ => FileFormat::FallbackFlow,
    }
}

fn sniff_line(line: &str) -> Option<FileFormat> {
    if let Some(format) = grammar_header(line) {
        return Some(format);
    }
    let opens_object = line.starts_with('{') || line.starts_with('[');
    if line.contains(',') && !opens_object {
        Some(FileFormat::Delimited)
    } else if opens_object {
        Some(FileFormat::ObjectNotation)
    } else if line.starts_with('<') {
        Some(FileFormat::Markup)
    } else {
        None
    }
}

fn first_non_empty_line(content: &[u8]) -> Option<String> {
    let content = content.strip_prefix(UTF8_BOM).unwrap_or(content);
    content
        .split(|b| *b == b'\n')
        .map(|line| String::from_utf8_lossy(line).trim().to_string())
        .find(|line| !line.is_empty())
}
