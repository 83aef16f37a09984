/// Canonical output sample rate in Hz. Every emitted chunk is at this rate.
pub const CANONICAL_SAMPLE_RATE: u32 = 48_000;

/// Canonical output channel count. Emitted chunks are interleaved stereo.
pub const CANONICAL_CHANNELS: usize = 2;

/// Tuning parameters shared by the decode/filter/resample stages.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Resampler input chunk size in frames.
    ///
    /// Larger values reduce per-call overhead at the cost of latency before
    /// the first chunk is emitted.
    pub chunk_frames: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { chunk_frames: 1024 }
    }
}
