//! Embeddable streaming audio decode pipeline.
//!
//! Decodes an encoded source into fixed-format PCM chunks (f32, stereo,
//! 48 kHz), optionally routing decoded frames through a reconfigurable
//! effects graph before resampling. The host drives the pipeline one call
//! at a time and receives chunks via callback; see [`pipeline::Pipeline`].

pub mod config;
pub mod error;
pub mod filter;
pub mod frame;
pub mod pipeline;
pub mod pts;
pub mod resample;
pub mod session;

pub use config::{CANONICAL_CHANNELS, CANONICAL_SAMPLE_RATE, PipelineConfig};
pub use error::PipelineError;
pub use frame::{AudioFrame, FrameSpec};
pub use pipeline::{Pipeline, PipelineState};
