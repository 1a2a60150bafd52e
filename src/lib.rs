pub mod config;
pub mod error;
pub mod fetch;
pub mod paths;
pub mod pipeline;
pub mod process;
pub mod retry;

pub use config::Config;
pub use error::{PipelineError, Stage, StageError, TransferError};
pub use pipeline::{Pipeline, RunPaths, RunReport, Saved};
pub use process::{filter::FilterSpec, Dataset, Record, Schema};
