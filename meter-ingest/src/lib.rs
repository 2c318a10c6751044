pub mod config;
pub mod context;
pub mod dates;
pub mod detect;
pub mod error;
pub mod fingerprint;
pub mod observability;
pub mod pipeline;
pub mod sources;
pub mod transform;

pub use error::ImportError;
pub use pipeline::{run_batch, BatchOptions, ImportOptions, ImportReport, Importer};
