//! Best-effort text extraction from binary document formats.
//!
//! Documents are not rendered. The raw bytes are decoded a few ways and a
//! decoding is kept only if it visibly contains flow records.

use meter_client::domain::{EnergyType, FileFormat, ReadingType};
use rust_decimal::Decimal;

use super::{Effect, MeterDraft, ReadingDraft};
use crate::{context::ImportContext, detect::grammar_header};

/// Tokens whose presence marks a decoding as useful.
const FLOW_MARKERS: [&str; 3] = ["ZHD|", "ZHV|", "026|"];

pub const NO_CONTENT_POINT: &str = "NO_CONTENT_MPAN";
pub const NO_CONTENT_SERIAL: &str = "NO_CONTENT_SERIAL";

fn has_flow_marker(text: &str) -> bool {
    FLOW_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Strict UTF-8, then Windows-1252 (which honours a byte-order mark, so
/// UTF-16 documents with one decode here), then a raw scan that keeps
/// printable ASCII and drops everything else including NUL padding.
pub fn extract_text(bytes: &[u8]) -> Option<String> {
    if let Ok(text) = std::str::from_utf8(bytes) {
        if has_flow_marker(text) {
            return Some(text.to_string());
        }
    }

    let (decoded, encoding, had_errors) = encoding_rs::WINDOWS_1252.decode(bytes);
    if has_flow_marker(&decoded) {
        tracing::debug!(encoding = encoding.name(), had_errors, "document text decoded");
        return Some(decoded.into_owned());
    }

    let scanned = scan_printable(bytes);
    if has_flow_marker(&scanned) {
        tracing::debug!("document text recovered by byte scan");
        return Some(scanned);
    }

    None
}

fn scan_printable(bytes: &[u8]) -> String {
    bytes
        .iter()
        .filter(|&&b| matches!(b, b'\n' | b'\t' | 0x20..=0x7e))
        .map(|&b| char::from(b))
        .collect()
}

/// Grammar announced by the first header line in extracted text; free text
/// when there is none.
pub fn text_format(text: &str) -> FileFormat {
    text.lines()
        .find_map(|line| grammar_header(line.trim()))
        .unwrap_or(FileFormat::FreeText)
}

/// Placeholder meter and zero reading for a document nothing could be read
/// from. Only produced when explicitly enabled.
pub fn no_content_sentinel(ctx: &ImportContext) -> Vec<Effect> {
    vec![
        Effect::Meter(MeterDraft {
            serial: NO_CONTENT_SERIAL.to_string(),
            point_id: NO_CONTENT_POINT.to_string(),
            energy_type: EnergyType::Electricity,
            created_at: ctx.meter_created_at(),
        }),
        Effect::Reading(ReadingDraft {
            serial: NO_CONTENT_SERIAL.to_string(),
            register_id: "00".to_string(),
            taken_at: ctx.now,
            value: Decimal::ZERO,
            reading_type: ReadingType::from_code("R"),
            measurement_method: "T".to_string(),
        }),
    ]
}
