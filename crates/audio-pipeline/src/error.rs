//! Error types for the decode pipeline.
//!
//! Two variants are control-flow signals rather than failures:
//! [`PipelineError::WouldBlock`] means "no data available yet, call again
//! later, nothing was lost", and [`PipelineError::EndOfStream`] is the
//! expected terminal condition that moves the pipeline into its flush phase.

use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors surfaced by the pipeline to the embedding host.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No data available yet; retry later. No pipeline state was lost.
    #[error("would block: no data available yet")]
    WouldBlock,

    /// The source (or a drain phase) is exhausted.
    #[error("end of stream")]
    EndOfStream,

    /// The input could not be opened, probed, or matched to a decoder.
    #[error("open error: {0}")]
    Open(String),

    /// A filter-chain description failed to parse or negotiate.
    ///
    /// The host should fall back to disabling the filter stage; no prior
    /// pipeline state is disturbed by this error.
    #[error("filter build error: {0}")]
    FilterBuild(String),

    /// The resampler could not be configured for the observed input format.
    /// Fatal: the pipeline cannot proceed without a working resampler.
    #[error("resampler init error: {0}")]
    ResampleInit(String),

    /// A mid-stream demux/decode failure. Fatal to this pipeline instance;
    /// the host must recreate the pipeline to continue.
    #[error("decode error: {0}")]
    Decode(String),

    /// An operation was invoked in a state that does not permit it
    /// (for example, `flush_frame` after the drain already finished).
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
}

impl PipelineError {
    /// Whether the caller should simply retry the same call later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::WouldBlock)
    }

    /// Whether this error leaves the pipeline unusable (`Ended`).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::Decode(_) | PipelineError::ResampleInit(_)
        )
    }
}
