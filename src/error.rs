//! Crate-level error type.

use crate::backend::BackendError;
use crate::config::ConfigError;
use crate::encode::EncodeError;
use crate::format::FormatError;
use crate::harness::FailureReason;
use thiserror::Error;

/// Everything a control-path operation can fail with.
///
/// Render and capture callbacks never return these. They degrade to silence
/// and raise status flags instead. Wrapping variants name the stage only;
/// the detail is in the source chain.
#[derive(Debug, Error)]
pub enum Error {
    /// Rejected before any stream was opened.
    #[error("invalid configuration")]
    Configuration(#[from] ConfigError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("format negotiation failed")]
    FormatNegotiation(#[from] FormatError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    /// The run completed but the signal did not meet expectations.
    #[error("verification failed: {0}")]
    VerificationFailure(FailureReason),
    #[error("WAV artifact")]
    Artifact(#[from] hound::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
