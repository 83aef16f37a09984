//! Transient audio frame carried between pipeline stages.
//!
//! Samples are always interleaved `f32`:
//! `frame0[ch0], frame0[ch1], ..., frame1[ch0], frame1[ch1], ...`
//! Frames are moved stage to stage and never outlive the pipeline call that
//! produced them.

/// Format key for a frame: sample rate and channel count.
///
/// The sample representation is fixed (interleaved `f32`), so this pair is
/// what the resample stage keys its lazy initialization on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSpec {
    /// Sample rate in Hz.
    pub rate: u32,
    /// Number of interleaved channels.
    pub channels: usize,
}

/// One decoded (or filtered) block of interleaved `f32` samples.
#[derive(Clone, Debug)]
pub struct AudioFrame {
    /// Format of `samples`.
    pub spec: FrameSpec,
    /// Interleaved samples; length is a multiple of `spec.channels`.
    pub samples: Vec<f32>,
}

impl AudioFrame {
    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        if self.spec.channels == 0 {
            return 0;
        }
        self.samples.len() / self.spec.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_counts_per_channel() {
        let frame = AudioFrame {
            spec: FrameSpec { rate: 44_100, channels: 2 },
            samples: vec![0.0; 10],
        };
        assert_eq!(frame.frames(), 5);
    }

    #[test]
    fn frames_zero_channels_is_zero() {
        let frame = AudioFrame {
            spec: FrameSpec { rate: 44_100, channels: 0 },
            samples: vec![],
        };
        assert_eq!(frame.frames(), 0);
    }
}
