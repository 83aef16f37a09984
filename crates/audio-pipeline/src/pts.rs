//! Presentation-timestamp bookkeeping.
//!
//! Two monotonically-accumulated sample counters: `in_pts` counts raw
//! decoded input frames (pre-filter, pre-resample), `pts` counts emitted
//! output frames at the canonical rate. Both are reset by a seek; `pts`
//! restarts from zero because post-resample counts are not comparable
//! across a seek.

/// Accumulated decoded/emitted sample positions.
#[derive(Clone, Copy, Debug, Default)]
pub struct PtsTracker {
    in_pts: u64,
    pts: u64,
}

impl PtsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `frames` decoded input frames.
    pub fn add_input(&mut self, frames: u64) {
        self.in_pts = self.in_pts.saturating_add(frames);
    }

    /// Record `frames` emitted output frames.
    pub fn add_output(&mut self, frames: u64) {
        self.pts = self.pts.saturating_add(frames);
    }

    /// Reset both counters for a seek to `target_out_frame` expressed at
    /// `output_rate`. `in_pts` is rescaled to the input rate; `pts` restarts
    /// at zero.
    pub fn seek(&mut self, target_out_frame: u64, input_rate: u32, output_rate: u32) {
        self.in_pts = if output_rate == 0 {
            0
        } else {
            (target_out_frame as u128 * input_rate as u128 / output_rate as u128) as u64
        };
        self.pts = 0;
    }

    /// Elapsed input position in milliseconds at `input_rate`.
    pub fn input_ms(&self, input_rate: u32) -> u64 {
        if input_rate == 0 {
            return 0;
        }
        self.in_pts.saturating_mul(1000) / input_rate as u64
    }

    /// Raw decoded input frame count.
    pub fn input_frames(&self) -> u64 {
        self.in_pts
    }

    /// Emitted output frame count since open or last seek.
    pub fn output_frames(&self) -> u64 {
        self.pts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_input_and_output() {
        let mut pts = PtsTracker::new();
        pts.add_input(1024);
        pts.add_input(512);
        pts.add_output(960);
        assert_eq!(pts.input_frames(), 1536);
        assert_eq!(pts.output_frames(), 960);
    }

    #[test]
    fn input_ms_scales_by_rate() {
        let mut pts = PtsTracker::new();
        pts.add_input(44_100);
        assert_eq!(pts.input_ms(44_100), 1000);
        assert_eq!(pts.input_ms(0), 0);
    }

    #[test]
    fn seek_rescales_input_and_zeroes_output() {
        let mut pts = PtsTracker::new();
        pts.add_input(100_000);
        pts.add_output(90_000);

        // 1 second at the 48 kHz output rate maps to 1 second of input.
        pts.seek(48_000, 44_100, 48_000);
        assert_eq!(pts.input_frames(), 44_100);
        assert_eq!(pts.output_frames(), 0);
        assert_eq!(pts.input_ms(44_100), 1000);
    }

    #[test]
    fn seek_with_zero_output_rate_resets() {
        let mut pts = PtsTracker::new();
        pts.add_input(5);
        pts.seek(100, 44_100, 0);
        assert_eq!(pts.input_frames(), 0);
    }
}
