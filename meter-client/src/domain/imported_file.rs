use std::fmt;

use time::OffsetDateTime;

/// Store-assigned identifier of an `ImportedFile` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FileRef(pub i64);

/// Lifecycle of one import attempt. `Imported` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum FileStatus {
    Processing,
    Imported,
    Error,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "PROCESSING",
            Self::Imported => "IMPORTED",
            Self::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PROCESSING" => Some(Self::Processing),
            "IMPORTED" => Some(Self::Imported),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Processing)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format classification of an incoming file. Fixed once parsing starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum FileFormat {
    /// Standard D0010 flow (`ZHD` header).
    StrictFlow,
    /// Non-conformant flow variant seen in the wild (`ZHV` header).
    FallbackFlow,
    Delimited,
    ObjectNotation,
    Markup,
    FreeText,
    /// Text recovered from a document container (PDF / Office).
    DocumentText,
    Unsupported,
}

impl FileFormat {
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::StrictFlow => "D0010",
            Self::FallbackFlow => "UFF",
            Self::Delimited => "CSV",
            Self::ObjectNotation => "JSON",
            Self::Markup => "XML",
            Self::FreeText => "TXT",
            Self::DocumentText => "DOC",
            Self::Unsupported => "UNSUPPORTED",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        let format = match tag {
            "D0010" => Self::StrictFlow,
            "UFF" => Self::FallbackFlow,
            "CSV" => Self::Delimited,
            "JSON" => Self::ObjectNotation,
            "XML" => Self::Markup,
            "TXT" => Self::FreeText,
            "DOC" => Self::DocumentText,
            "UNSUPPORTED" => Self::Unsupported,
            _ => return None,
        };
        Some(format)
    }

    pub fn is_flow_grammar(&self) -> bool {
        matches!(self, Self::StrictFlow | Self::FallbackFlow)
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// Metadata carried by a flow file header record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct HeaderFields {
    pub sequence_number: Option<String>,
    pub version: Option<String>,
    pub sender: Option<String>,
    pub receiver: Option<String>,
    pub created_at: Option<OffsetDateTime>,
}

impl HeaderFields {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ImportedFile {
    pub id: FileRef,
    pub filename: String,
    pub format: FileFormat,
    /// Hex content digest; unique across all rows.
    pub fingerprint: String,
    pub status: FileStatus,
    pub record_count: i64,
    pub header: HeaderFields,
    pub imported_at: OffsetDateTime,
}

/// Input for creating an `ImportedFile` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFile {
    pub filename: String,
    pub format: FileFormat,
    pub fingerprint: String,
    pub status: FileStatus,
}

/// Status transition plus the statistics gathered while parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpdate {
    pub status: FileStatus,
    pub record_count: i64,
    pub header: Option<HeaderFields>,
}
