pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod generator;
pub mod llm;
pub mod pipeline;
pub mod schema;
pub mod semantic;
pub mod time;
pub mod validation;

pub use error::{ErrorKind, PipelineError, Result, NO_DATA_FOUND};
pub use pipeline::{Answer, GenerateSqlResponse, NlQueryService};
