use thiserror::Error;

/// Errors returned when a loaded configuration violates a constraint.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A field holds a value outside of its accepted range.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
    /// Two paths that must be distinct point to the same location.
    #[error("`{first}` and `{second}` must not overlap or contain one another")]
    OverlappingPaths { first: String, second: String },
}
