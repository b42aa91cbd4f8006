use thiserror::Error;

use crate::otg::OtgState;

/// Glue-layer error type
#[derive(Error, Debug)]
pub enum OtgError {
    /// Address mapping or resource registration failed; no usable controller is left behind
    #[error("Initialization failed: {0}")]
    Init(String),

    /// Unsupported channel count, bad schedule size, invalid poll interval...
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Port mode change rejected: session active in state {0}")]
    SessionActive(OtgState),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Controller is detached")]
    Inactive,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("System call failed: {0}")]
    Nix(#[from] nix::Error),
}

impl OtgError {
    /// Whether this error belongs to the configuration class (reported at setup time only)
    pub fn is_config(&self) -> bool {
        matches!(self, OtgError::Config(_))
    }
}

/// Result type alias for the glue core
pub type Result<T> = std::result::Result<T, OtgError>;
