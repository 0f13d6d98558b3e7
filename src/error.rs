use thiserror::Error;

/// Errors that abort a pipeline run or reject its configuration.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid age range: minimum {age_min} is greater than maximum {age_max}")]
    InvalidFilterRange { age_min: i32, age_max: i32 },
    #[error("unknown indicator \"{0}\"")]
    UnknownIndicator(String),
    #[error("indicator \"{0}\" is configured more than once")]
    DuplicateIndicator(String),
    #[error("country \"{0}\" appears more than once in the registry")]
    DuplicateCountry(String),
    #[error("countries \"{0}\" and \"{1}\" share boundary id {2}")]
    DuplicateCountryId(String, String, u32),
}

/// Per-row problem recorded during a run. Never aborts the run.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize)]
pub enum Diagnostic {
    #[error("country \"{country}\" has no registry id; {respondents} respondents dropped from the map")]
    UnmappedCountry { country: String, respondents: usize },
}
