use time::OffsetDateTime;

use super::FileRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MeterRef(pub i64);

/// Kind of energy a meter measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum EnergyType {
    #[default]
    Electricity,
    Gas,
    Water,
    Heat,
}

impl EnergyType {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Electricity => "E",
            Self::Gas => "G",
            Self::Water => "W",
            Self::Heat => "H",
        }
    }

    /// Accepts the single-letter code or the spelled-out name, any case.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "E" | "ELECTRICITY" => Some(Self::Electricity),
            "G" | "GAS" => Some(Self::Gas),
            "W" | "WATER" => Some(Self::Water),
            "H" | "HEAT" => Some(Self::Heat),
            _ => None,
        }
    }
}

/// A physical metering device. The serial number is globally unique.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Meter {
    pub id: MeterRef,
    pub serial_number: String,
    pub point_id: String,
    pub energy_type: EnergyType,
    pub created_at: OffsetDateTime,
    /// First file that mentioned this serial.
    pub imported_file: FileRef,
}

/// Values used only when the serial has never been seen before.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterDefaults {
    pub point_id: String,
    pub energy_type: EnergyType,
    pub created_at: OffsetDateTime,
    pub imported_file: FileRef,
}
