//! Error Types
//!
//! The main error type [`MixerError`] covers all failure modes of the
//! mixer core. All public APIs return [`Result<T>`], an alias for
//! `std::result::Result<T, MixerError>`.
//!
//! The real-time contract keeps errors rare by design: invalid frames are
//! silently dropped during `visit`, and unsupported features degrade to
//! identity on the CPU path. Errors therefore only surface where a frame
//! cannot be produced at all.

use thiserror::Error;

/// The main error type for the mixer core.
#[derive(Error, Debug)]
pub enum MixerError {
    /// A caller-supplied value is out of contract: bad pixel format,
    /// empty planes, plane smaller than 16 bytes, non-positive dimensions.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The mixer was driven through an illegal sequence, e.g. `render`
    /// with unbalanced `push`/`pop` or `begin_layer`/`end_layer`.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A pool allocation failed or an in-flight fence wait timed out.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The GPU context is unrecoverable.
    #[error("Device lost: {0}")]
    DeviceLost(String),

    /// A frame could not be produced (software scaler construction
    /// failure, or persistent device loss after re-initialization).
    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

/// Alias for `Result<T, MixerError>`.
pub type Result<T> = std::result::Result<T, MixerError>;
