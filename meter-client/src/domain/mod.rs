pub mod imported_file;
pub mod meter;
pub mod reading;

pub use imported_file::{FileFormat, FileRef, FileStatus, FileUpdate, HeaderFields, ImportedFile, NewFile};
pub use meter::{EnergyType, Meter, MeterDefaults, MeterRef};
pub use reading::{normalize_value, Reading, ReadingDefaults, ReadingKey, ReadingRef, ReadingType};
