pub mod aggregate;
pub mod config;
pub mod data;
pub mod error;
pub mod filter;
pub mod geo_join;
pub mod pipeline;
pub mod render;
pub mod selection;
pub mod server;
pub mod types;

pub use error::{Diagnostic, PipelineError};
pub use pipeline::{Pipeline, PipelineConfig, RunOutput};
pub use selection::SelectionState;
pub use types::{FilterCriteria, Gender};
