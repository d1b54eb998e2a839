use thiserror::Error;

/// Errors raised while constructing the data model from malformed or inconsistent input.
///
/// Validation errors are never recovered from: the offending object is simply not
/// created.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Unknown chemical element symbol '{symbol}' for atom {atom}")]
    UnknownElement { atom: usize, symbol: String },

    #[error("Invalid mass {mass} for atom {atom}: mass must be finite and positive")]
    InvalidMass { atom: usize, mass: f64 },

    #[error("Invalid coordinate for atom {atom}: all components must be finite")]
    InvalidCoordinate { atom: usize },

    #[error("Invalid weight {weight} for k-point {kpoint}: weight must be finite and non-negative")]
    InvalidWeight { kpoint: usize, weight: f64 },

    #[error("Invalid value in '{field}': {message}")]
    InvalidValue { field: &'static str, message: String },

    #[error("Inconsistent atom count in {context}: expected {expected}, found {found}")]
    AtomCountMismatch {
        context: String,
        expected: usize,
        found: usize,
    },

    #[error("Inconsistent mode count in {context}: expected {expected}, found {found}")]
    ModeCountMismatch {
        context: String,
        expected: usize,
        found: usize,
    },

    #[error("Length mismatch between '{left}' ({left_len}) and '{right}' ({right_len})")]
    LengthMismatch {
        left: &'static str,
        left_len: usize,
        right: &'static str,
        right_len: usize,
    },

    #[error("Quantum order {order} is outside the supported range [1, {max_order}]")]
    UnsupportedOrder { order: usize, max_order: usize },

    #[error("Unsupported document format '{format}' (version {version})")]
    UnsupportedFormat { format: String, version: u32 },

    #[error("Malformed document: {0}")]
    Malformed(String),
}
