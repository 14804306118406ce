pub mod error;
pub mod worker;

pub use error::{IngestError, Result};
pub use worker::{IngestionWorker, Outcome, WorkerConfig};
