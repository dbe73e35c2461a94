//! Error types shared by the grid, filter and simulation modules.

/// Result type alias
pub type Result<T> = std::result::Result<T, LocalizationError>;

/// Errors raised by the localization core.
///
/// Out-of-bounds grid queries and blocked moves are *not* errors; they resolve
/// to "occupied" and "position unchanged" respectively.
#[derive(Debug, thiserror::Error)]
pub enum LocalizationError {
    /// Grid description does not match its declared shape.
    #[error("Grid format error: {0}")]
    Format(String),

    /// The initializer was asked to place particles on a grid without free cells.
    #[error("Cannot place {requested} particles: the grid has no free cells")]
    InsufficientFreeSpace {
        /// Number of particles requested
        requested: usize,
    },

    /// Weight totals collapsed to zero or became non-finite.
    #[error("Degenerate particle set: {0}")]
    DegenerateFilter(String),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV read/write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON/YAML/TOML (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for LocalizationError {
    fn from(e: serde_json::Error) -> Self {
        LocalizationError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for LocalizationError {
    fn from(e: serde_yaml::Error) -> Self {
        LocalizationError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for LocalizationError {
    fn from(e: toml::de::Error) -> Self {
        LocalizationError::Serialization(e.to_string())
    }
}

impl From<toml::ser::Error> for LocalizationError {
    fn from(e: toml::ser::Error) -> Self {
        LocalizationError::Serialization(e.to_string())
    }
}
