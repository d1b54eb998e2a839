use thiserror::Error;

use super::config::ConfigError;
use crate::core::models::error::ValidationError;
use crate::core::models::sdata::SDataError;
use crate::core::spectra::structure_factor::StructureFactorError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("Invalid input data: {source}")]
    Validation {
        #[from]
        source: ValidationError,
    },

    #[error("Spectrum data error: {source}")]
    SData {
        #[from]
        source: SDataError,
    },

    #[error("Computation failed during {stage}: {message}")]
    Computation { stage: &'static str, message: String },

    #[error("Internal logic error: {0}")]
    Internal(String),
}

impl From<StructureFactorError> for EngineError {
    fn from(e: StructureFactorError) -> Self {
        EngineError::Computation {
            stage: "structure factor",
            message: e.to_string(),
        }
    }
}
