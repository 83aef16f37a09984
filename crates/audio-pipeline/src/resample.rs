//! Resample stage: converts upstream frames to the canonical output format
//! (interleaved `f32`, stereo, 48 kHz).
//!
//! Uses Rubato's streaming sinc resampler through `audioadapter-buffers`
//! interleaved adapters. The stage initializes lazily on the first frame of
//! a given input format, re-initializes whenever the observed format
//! changes or [`ResampleStage::invalidate`] is called (the filter stage
//! toggled), and is drained explicitly at end of stream.
//!
//! Channel layout conversion happens here too: input is remixed to stereo
//! before resampling (mono duplicated, wider layouts averaged down).

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    calculate_cutoff, Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

use crate::config::{CANONICAL_CHANNELS, CANONICAL_SAMPLE_RATE};
use crate::error::{PipelineError, Result};
use crate::frame::{AudioFrame, FrameSpec};

/// Lazily-initialized converter from one upstream format to the canonical
/// output format.
pub struct ResampleStage {
    chunk_frames: usize,
    inner: Option<Inner>,
    generation: u64,
}

struct Inner {
    resampler: Box<dyn Resampler<f32>>,
    spec: FrameSpec,
    /// Remixed-to-stereo input awaiting a full chunk.
    pending: Vec<f32>,
    /// Rubato output scratch.
    out_buf: Vec<f32>,
    /// Samples collected for the current convert/drain call.
    emit_buf: Vec<f32>,
    /// Zeroed input used by the flush path.
    zero_buf: Vec<f32>,
    /// Input frames fed to the stage since this initialization.
    fed_frames: u64,
    /// Output frames handed to the caller since this initialization.
    produced_frames: u64,
}

enum BlockInput {
    /// One full chunk from the front of `pending`.
    Steady,
    /// The final partial chunk of `n` frames from `pending`.
    Tail(usize),
    /// Zero-length input; pushes out internal sinc delay.
    Flush,
}

impl ResampleStage {
    pub fn new(chunk_frames: usize) -> Self {
        Self {
            chunk_frames: chunk_frames.max(1),
            inner: None,
            generation: 0,
        }
    }

    /// Number of times the stage has (re)initialized. Bumps on every lazy
    /// init, so "toggle then convert" is observable by hosts and tests.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.is_some()
    }

    /// Close the current converter. The next [`Self::convert`] call
    /// re-initializes for whatever format it observes.
    ///
    /// Any internal delay still buffered is discarded with the converter.
    pub fn invalidate(&mut self) {
        if self.inner.take().is_some() {
            tracing::debug!("resampler invalidated");
        }
    }

    /// Convert one upstream frame, returning the produced canonical-format
    /// samples. The returned slice may be empty while the stage buffers
    /// toward a full input chunk; that is not an error.
    pub fn convert(&mut self, frame: &AudioFrame) -> Result<&[f32]> {
        let chunk_frames = self.chunk_frames;
        let inner = self.ensure_initialized(frame.spec)?;

        inner.emit_buf.clear();
        remix_to_stereo(&frame.samples, frame.spec.channels, &mut inner.pending);
        inner.fed_frames += frame.frames() as u64;

        let chunk_samples = chunk_frames * CANONICAL_CHANNELS;
        while inner.pending.len() >= chunk_samples {
            Self::process_block(inner, chunk_frames, BlockInput::Steady)?;
            inner.pending.drain(..chunk_samples);
        }

        Ok(&inner.emit_buf)
    }

    /// Flush internally-held samples with no further input.
    ///
    /// Each call yields one block; returns [`PipelineError::EndOfStream`]
    /// once the produced total reaches the rate-ratio-exact output length,
    /// at which point the caller must stop draining.
    pub fn drain(&mut self) -> Result<&[f32]> {
        let chunk_frames = self.chunk_frames;
        let Some(inner) = self.inner.as_mut() else {
            return Err(PipelineError::EndOfStream);
        };

        let expected = expected_output_frames(inner.fed_frames, inner.spec.rate);
        if inner.produced_frames >= expected {
            return Err(PipelineError::EndOfStream);
        }

        inner.emit_buf.clear();

        if !inner.pending.is_empty() {
            let tail_frames = inner.pending.len() / CANONICAL_CHANNELS;
            Self::process_block(inner, chunk_frames, BlockInput::Tail(tail_frames))?;
            inner.pending.clear();
        }

        let mut rounds = 0;
        while inner.emit_buf.is_empty() && inner.produced_frames < expected {
            Self::process_block(inner, chunk_frames, BlockInput::Flush)?;
            rounds += 1;
            if rounds > 1024 {
                return Err(PipelineError::Decode("resampler drain stalled".into()));
            }
        }

        // Trim past the exact expected total so summed output lengths match
        // the input length scaled by the rate ratio.
        if inner.produced_frames > expected {
            let excess = (inner.produced_frames - expected) as usize;
            let keep = inner.emit_buf.len() - excess * CANONICAL_CHANNELS;
            inner.emit_buf.truncate(keep);
            inner.produced_frames = expected;
        }

        Ok(&inner.emit_buf)
    }

    fn ensure_initialized(&mut self, spec: FrameSpec) -> Result<&mut Inner> {
        let reinit = self.inner.as_ref().is_none_or(|inner| inner.spec != spec);
        if reinit {
            let inner = self.build_inner(spec)?;
            self.generation += 1;
            tracing::info!(
                rate_hz = spec.rate,
                channels = spec.channels,
                generation = self.generation,
                "initialized resampler"
            );
            return Ok(self.inner.insert(inner));
        }
        if let Some(inner) = self.inner.as_mut() {
            return Ok(inner);
        }
        unreachable!("resampler initialized above");
    }

    fn build_inner(&self, spec: FrameSpec) -> Result<Inner> {
        if spec.rate == 0 || spec.channels == 0 {
            return Err(PipelineError::ResampleInit(format!(
                "unusable input format: {} Hz, {} channels",
                spec.rate, spec.channels
            )));
        }

        let f_ratio = CANONICAL_SAMPLE_RATE as f64 / spec.rate as f64;

        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };

        let resampler: Box<dyn Resampler<f32>> = match Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            self.chunk_frames,
            CANONICAL_CHANNELS,
            FixedAsync::Input,
        ) {
            Ok(r) => Box::new(r),
            Err(e) => {
                return Err(PipelineError::ResampleInit(format!(
                    "sinc resampler for {} Hz -> {} Hz: {e}",
                    spec.rate, CANONICAL_SAMPLE_RATE
                )));
            }
        };

        let max_out_samples = resampler.output_frames_max() * CANONICAL_CHANNELS;

        Ok(Inner {
            resampler,
            spec,
            pending: Vec::new(),
            out_buf: vec![0.0; max_out_samples],
            emit_buf: Vec::new(),
            zero_buf: vec![0.0; self.chunk_frames * CANONICAL_CHANNELS],
            fed_frames: 0,
            produced_frames: 0,
        })
    }

    fn process_block(inner: &mut Inner, chunk_frames: usize, input: BlockInput) -> Result<()> {
        let channels = CANONICAL_CHANNELS;
        let Inner {
            resampler,
            pending,
            out_buf,
            emit_buf,
            zero_buf,
            produced_frames,
            ..
        } = inner;

        let (slice, frames, partial_len): (&[f32], usize, Option<usize>) = match input {
            BlockInput::Steady => (&pending[..chunk_frames * channels], chunk_frames, None),
            BlockInput::Tail(n) => (&pending[..n * channels], n, Some(n)),
            BlockInput::Flush => (zero_buf.as_slice(), chunk_frames, Some(0)),
        };

        let input_adapter = InterleavedSlice::new(slice, channels, frames)
            .map_err(|e| PipelineError::Decode(format!("resample input adapter: {e}")))?;

        let out_capacity_frames = out_buf.len() / channels;
        let mut output_adapter =
            InterleavedSlice::new_mut(out_buf.as_mut_slice(), channels, out_capacity_frames)
                .map_err(|e| PipelineError::Decode(format!("resample output adapter: {e}")))?;

        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            partial_len,
        };

        let (_nbr_in, nbr_out) = resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            .map_err(|e| PipelineError::Decode(format!("resampler process: {e}")))?;

        emit_buf.extend_from_slice(&out_buf[..nbr_out * channels]);
        *produced_frames += nbr_out as u64;
        Ok(())
    }
}

/// Exact output length for `fed` input frames at `input_rate`, in frames.
fn expected_output_frames(fed: u64, input_rate: u32) -> u64 {
    if input_rate == 0 {
        return 0;
    }
    let rate = input_rate as u128;
    ((fed as u128 * CANONICAL_SAMPLE_RATE as u128 + rate - 1) / rate) as u64
}

/// Remix interleaved samples of `channels` channels into stereo, appending
/// to `out`. Mono is duplicated; layouts wider than stereo are averaged
/// down (even-indexed channels to the left, odd-indexed to the right).
fn remix_to_stereo(samples: &[f32], channels: usize, out: &mut Vec<f32>) {
    match channels {
        0 => {}
        1 => {
            out.reserve(samples.len() * 2);
            for &s in samples {
                out.push(s);
                out.push(s);
            }
        }
        2 => out.extend_from_slice(samples),
        n => {
            let frames = samples.len() / n;
            out.reserve(frames * 2);
            for frame in samples.chunks_exact(n) {
                let mut left = 0.0f32;
                let mut right = 0.0f32;
                let mut left_n = 0u32;
                let mut right_n = 0u32;
                for (i, &s) in frame.iter().enumerate() {
                    if i % 2 == 0 {
                        left += s;
                        left_n += 1;
                    } else {
                        right += s;
                        right_n += 1;
                    }
                }
                out.push(left / left_n.max(1) as f32);
                out.push(right / right_n.max(1) as f32);
            }
        }
    }
}
