//! Filter stage: a compiled chain of named audio effects.
//!
//! A graph is built from an ffmpeg-style textual description, for example
//! `"volume=0.5,asetnsamples=n=1024"`: filters separated by commas, each
//! filter `name` or `name=args` with `key=value` args separated by colons
//! (a bare value is accepted for the filter's primary key).
//!
//! Supported filters:
//! - `anull`: pass-through
//! - `volume=<gain>`: constant linear gain
//! - `aphaseinv`: polarity inversion
//! - `asetnsamples=n=<frames>`: re-chunk output into fixed-size blocks,
//!   buffering the remainder internally
//!
//! Frames are pushed in one at a time and pulled out zero or more at a
//! time; effects with internal buffering (`asetnsamples`) hold samples
//! across calls until [`FilterGraph::drain`] flushes them at end of stream.

use std::collections::VecDeque;

use crate::error::{PipelineError, Result};
use crate::frame::{AudioFrame, FrameSpec};

trait Effect {
    /// Process one frame, appending zero or more output frames.
    fn process(&mut self, frame: AudioFrame, out: &mut Vec<AudioFrame>);

    /// Flush internally buffered samples with no further input.
    fn flush(&mut self, out: &mut Vec<AudioFrame>) {
        let _ = out;
    }
}

/// Constant linear gain.
struct Volume {
    gain: f32,
}

impl Effect for Volume {
    fn process(&mut self, mut frame: AudioFrame, out: &mut Vec<AudioFrame>) {
        for sample in &mut frame.samples {
            *sample *= self.gain;
        }
        out.push(frame);
    }
}

/// Polarity inversion.
struct PhaseInvert;

impl Effect for PhaseInvert {
    fn process(&mut self, mut frame: AudioFrame, out: &mut Vec<AudioFrame>) {
        for sample in &mut frame.samples {
            *sample = -*sample;
        }
        out.push(frame);
    }
}

/// Re-chunk the stream into blocks of exactly `frames` frames.
///
/// The tail that does not fill a whole block stays buffered until the next
/// push or a flush, which is the graph-internal latency the pipeline's
/// drain phase exists for.
struct SetNSamples {
    frames: usize,
    spec: Option<FrameSpec>,
    buf: Vec<f32>,
}

impl SetNSamples {
    fn emit_full_blocks(&mut self, out: &mut Vec<AudioFrame>) {
        let Some(spec) = self.spec else { return };
        let block = self.frames * spec.channels;
        while self.buf.len() >= block {
            let samples = self.buf.drain(..block).collect();
            out.push(AudioFrame { spec, samples });
        }
    }
}

impl Effect for SetNSamples {
    fn process(&mut self, frame: AudioFrame, out: &mut Vec<AudioFrame>) {
        if self.spec != Some(frame.spec) {
            // Format changed upstream: release what was buffered under the
            // old format before adopting the new one.
            self.flush(out);
            self.spec = Some(frame.spec);
        }
        self.buf.extend_from_slice(&frame.samples);
        self.emit_full_blocks(out);
    }

    fn flush(&mut self, out: &mut Vec<AudioFrame>) {
        self.emit_full_blocks(out);
        let Some(spec) = self.spec else { return };
        if !self.buf.is_empty() {
            let samples = std::mem::take(&mut self.buf);
            out.push(AudioFrame { spec, samples });
        }
    }
}

/// A compiled effects chain plus its pending-output queue.
///
/// Built against the session's current decode format; the queue survives
/// enable/disable toggles so no buffered frames are lost.
pub struct FilterGraph {
    effects: Vec<Box<dyn Effect>>,
    ready: VecDeque<AudioFrame>,
    spec: FrameSpec,
}

impl FilterGraph {
    /// Parse `description` into a chain negotiated for `spec`.
    pub fn parse(description: &str, spec: FrameSpec) -> Result<Self> {
        if description.trim().is_empty() {
            return Err(PipelineError::FilterBuild(
                "empty filter description".into(),
            ));
        }

        let mut effects: Vec<Box<dyn Effect>> = Vec::new();
        for entry in description.split(',') {
            let entry = entry.trim();
            let (name, args) = match entry.split_once('=') {
                Some((name, args)) => (name.trim(), Some(args.trim())),
                None => (entry, None),
            };

            match name {
                "anull" => {
                    reject_args(name, args)?;
                }
                "volume" => {
                    let gain = parse_primary_arg(name, args, "volume")?;
                    let gain: f32 = gain.parse().map_err(|_| {
                        PipelineError::FilterBuild(format!("volume: bad gain '{gain}'"))
                    })?;
                    if !gain.is_finite() {
                        return Err(PipelineError::FilterBuild(
                            "volume: gain must be finite".into(),
                        ));
                    }
                    effects.push(Box::new(Volume { gain }));
                }
                "aphaseinv" => {
                    reject_args(name, args)?;
                    effects.push(Box::new(PhaseInvert));
                }
                "asetnsamples" => {
                    let n = parse_primary_arg(name, args, "n")?;
                    let frames: usize = n.parse().map_err(|_| {
                        PipelineError::FilterBuild(format!("asetnsamples: bad count '{n}'"))
                    })?;
                    if frames == 0 {
                        return Err(PipelineError::FilterBuild(
                            "asetnsamples: count must be positive".into(),
                        ));
                    }
                    effects.push(Box::new(SetNSamples {
                        frames,
                        spec: None,
                        buf: Vec::new(),
                    }));
                }
                other => {
                    return Err(PipelineError::FilterBuild(format!(
                        "unknown filter '{other}'"
                    )));
                }
            }
        }

        tracing::debug!(
            description,
            rate_hz = spec.rate,
            channels = spec.channels,
            "built filter graph"
        );

        Ok(Self {
            effects,
            ready: VecDeque::new(),
            spec,
        })
    }

    /// Format this graph was negotiated against.
    pub fn spec(&self) -> FrameSpec {
        self.spec
    }

    /// Feed one decoded frame through the chain.
    pub fn push(&mut self, frame: AudioFrame) {
        let produced = self.run_chain_from(0, frame);
        self.ready.extend(produced);
    }

    /// Pull the next processed frame, if any.
    ///
    /// `None` means "no output right now"; more input (or a drain) may
    /// still produce frames.
    pub fn pull(&mut self) -> Option<AudioFrame> {
        self.ready.pop_front()
    }

    /// Flush effect-internal backlog into the output queue.
    ///
    /// Called once at end of stream, before the resampler drain phase.
    pub fn drain(&mut self) {
        for i in 0..self.effects.len() {
            let mut flushed = Vec::new();
            self.effects[i].flush(&mut flushed);
            for frame in flushed {
                let produced = self.run_chain_from(i + 1, frame);
                self.ready.extend(produced);
            }
        }
    }

    fn run_chain_from(&mut self, start: usize, frame: AudioFrame) -> Vec<AudioFrame> {
        let mut frames = vec![frame];
        for effect in &mut self.effects[start..] {
            let mut next = Vec::new();
            for f in frames {
                effect.process(f, &mut next);
            }
            frames = next;
        }
        frames
    }
}

fn reject_args(name: &str, args: Option<&str>) -> Result<()> {
    match args {
        Some(args) if !args.is_empty() => Err(PipelineError::FilterBuild(format!(
            "{name} takes no arguments"
        ))),
        _ => Ok(()),
    }
}

/// Extract the value of `key` from `args`, accepting a bare positional
/// value for the filter's primary key.
fn parse_primary_arg<'a>(name: &str, args: Option<&'a str>, key: &str) -> Result<&'a str> {
    let args = args.filter(|a| !a.is_empty()).ok_or_else(|| {
        PipelineError::FilterBuild(format!("{name} requires an argument"))
    })?;

    let mut value = None;
    for pair in args.split(':') {
        match pair.split_once('=') {
            Some((k, v)) if k.trim() == key => value = Some(v.trim()),
            Some((k, _)) => {
                return Err(PipelineError::FilterBuild(format!(
                    "{name}: unknown option '{}'",
                    k.trim()
                )));
            }
            // Bare value: positional form of the primary key.
            None if value.is_none() => value = Some(pair.trim()),
            None => {
                return Err(PipelineError::FilterBuild(format!(
                    "{name}: unexpected argument '{}'",
                    pair.trim()
                )));
            }
        }
    }

    value.ok_or_else(|| PipelineError::FilterBuild(format!("{name}: missing '{key}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: FrameSpec = FrameSpec {
        rate: 44_100,
        channels: 2,
    };

    fn frame(samples: Vec<f32>) -> AudioFrame {
        AudioFrame {
            spec: SPEC,
            samples,
        }
    }

    #[test]
    fn unknown_filter_is_rejected() {
        let err = FilterGraph::parse("reverb", SPEC).err().unwrap();
        assert!(matches!(err, PipelineError::FilterBuild(_)));
    }

    #[test]
    fn empty_description_is_rejected() {
        assert!(FilterGraph::parse("  ", SPEC).is_err());
    }

    #[test]
    fn volume_requires_numeric_gain() {
        assert!(FilterGraph::parse("volume", SPEC).is_err());
        assert!(FilterGraph::parse("volume=loud", SPEC).is_err());
        assert!(FilterGraph::parse("volume=NaN", SPEC).is_err());
    }

    #[test]
    fn volume_scales_samples() {
        let mut graph = FilterGraph::parse("volume=0.5", SPEC).unwrap();
        graph.push(frame(vec![1.0, -1.0, 0.5, 0.25]));
        let out = graph.pull().unwrap();
        assert_eq!(out.samples, vec![0.5, -0.5, 0.25, 0.125]);
        assert!(graph.pull().is_none());
    }

    #[test]
    fn volume_accepts_key_value_form() {
        let mut graph = FilterGraph::parse("volume=volume=2.0", SPEC).unwrap();
        graph.push(frame(vec![0.25, 0.25]));
        assert_eq!(graph.pull().unwrap().samples, vec![0.5, 0.5]);
    }

    #[test]
    fn anull_passes_through() {
        let mut graph = FilterGraph::parse("anull", SPEC).unwrap();
        graph.push(frame(vec![0.1, 0.2]));
        assert_eq!(graph.pull().unwrap().samples, vec![0.1, 0.2]);
    }

    #[test]
    fn phase_invert_negates() {
        let mut graph = FilterGraph::parse("aphaseinv", SPEC).unwrap();
        graph.push(frame(vec![0.5, -0.25]));
        assert_eq!(graph.pull().unwrap().samples, vec![-0.5, 0.25]);
    }

    #[test]
    fn asetnsamples_rechunks_and_buffers_tail() {
        let mut graph = FilterGraph::parse("asetnsamples=n=2", SPEC).unwrap();
        // 3 stereo frames in: one 2-frame block out, 1 frame held back.
        graph.push(frame(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));
        let out = graph.pull().unwrap();
        assert_eq!(out.samples, vec![1.0, 2.0, 3.0, 4.0]);
        assert!(graph.pull().is_none());

        graph.drain();
        let tail = graph.pull().unwrap();
        assert_eq!(tail.samples, vec![5.0, 6.0]);
    }

    #[test]
    fn asetnsamples_positional_count() {
        assert!(FilterGraph::parse("asetnsamples=4", SPEC).is_ok());
        assert!(FilterGraph::parse("asetnsamples=0", SPEC).is_err());
        assert!(FilterGraph::parse("asetnsamples=n=4:p=1", SPEC).is_err());
    }

    #[test]
    fn chained_filters_compose_in_order() {
        let mut graph =
            FilterGraph::parse("volume=2.0,asetnsamples=n=1,aphaseinv", SPEC).unwrap();
        graph.push(frame(vec![0.5, 0.5, 0.25, 0.25]));
        assert_eq!(graph.pull().unwrap().samples, vec![-1.0, -1.0]);
        assert_eq!(graph.pull().unwrap().samples, vec![-0.5, -0.5]);
        assert!(graph.pull().is_none());
    }

    #[test]
    fn drain_cascades_through_downstream_effects() {
        let mut graph = FilterGraph::parse("asetnsamples=n=4,volume=2.0", SPEC).unwrap();
        graph.push(frame(vec![0.5, 0.5]));
        assert!(graph.pull().is_none());

        graph.drain();
        // The buffered tail still passes through the downstream gain.
        assert_eq!(graph.pull().unwrap().samples, vec![1.0, 1.0]);
    }

    #[test]
    fn buffered_output_survives_between_pulls() {
        let mut graph = FilterGraph::parse("asetnsamples=n=1", SPEC).unwrap();
        graph.push(frame(vec![1.0, 1.0, 2.0, 2.0]));
        assert_eq!(graph.pull().unwrap().samples, vec![1.0, 1.0]);
        // Second block still queued after an interleaving of other work.
        assert_eq!(graph.pull().unwrap().samples, vec![2.0, 2.0]);
    }
}
