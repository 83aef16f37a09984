//! Pipeline controller: drives read -> decode -> (filter) -> resample ->
//! emit, owning all retry/error decisions and the PTS bookkeeping.
//!
//! The controller is single-threaded and non-reentrant; all suspension is
//! cooperative via [`PipelineError::WouldBlock`] returns, and the host is
//! responsible for scheduling retries. One call into the controller must
//! complete before the next begins.
//!
//! State machine: `Idle` -> `Ready` (input opened) -> `Reading` ->
//! `Flushing` (source exhausted) -> `Ended`. Filter enable/disable is a
//! sub-transition that does not change the outer state. A fatal error in
//! any state moves straight to `Ended`; the instance must then be replaced.

use std::path::Path;
use std::time::Duration;

use symphonia::core::io::MediaSource;
use symphonia::core::probe::Hint;

use crate::config::{CANONICAL_CHANNELS, CANONICAL_SAMPLE_RATE, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::filter::FilterGraph;
use crate::frame::AudioFrame;
use crate::pts::PtsTracker;
use crate::resample::ResampleStage;
use crate::session::FormatSession;

/// Outer lifecycle state of a [`Pipeline`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    /// No open input.
    Idle,
    /// Input open, nothing read yet.
    Ready,
    /// Actively pulling packets.
    Reading,
    /// Source exhausted, draining the filter/resampler backlog.
    Flushing,
    /// Drained or failed; the instance must be replaced to continue.
    Ended,
}

/// The streaming decode pipeline.
///
/// Emitted chunks are interleaved `f32`, stereo, 48 kHz. The chunk slice
/// passed to the sink callback is only valid for the duration of the
/// callback.
pub struct Pipeline {
    // Field order fixes teardown: resampler, then filter graph, then the
    // session owning the decoder and input.
    resampler: ResampleStage,
    graph: Option<FilterGraph>,
    session: Option<FormatSession>,
    filter_enabled: bool,
    pts: PtsTracker,
    state: PipelineState,
    /// Start time of the most recent selected packet, for the PTS
    /// cross-check in [`Self::frame_pts`].
    last_packet_ms: Option<u64>,
    filter_drained: bool,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            resampler: ResampleStage::new(config.chunk_frames),
            graph: None,
            session: None,
            filter_enabled: false,
            pts: PtsTracker::new(),
            state: PipelineState::Idle,
            last_packet_ms: None,
            filter_drained: false,
            config,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn filter_enabled(&self) -> bool {
        self.filter_enabled
    }

    /// Resampler (re)initialization count. Diagnostic: bumps whenever the
    /// next conversion had to configure a fresh resampler.
    pub fn resampler_generation(&self) -> u64 {
        self.resampler.generation()
    }

    /// Best-effort total duration of the open input.
    pub fn duration(&self) -> Option<Duration> {
        self.session
            .as_ref()
            .and_then(|s| s.duration_ms())
            .map(Duration::from_millis)
    }

    /// Open a local file, replacing any previously open input.
    ///
    /// On failure the previous session (if any) is left untouched.
    pub fn open_input(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let session = FormatSession::open(path.as_ref())?;
        self.install_session(session);
        Ok(())
    }

    /// Open a host-supplied media source (seekable or not), replacing any
    /// previously open input.
    pub fn open_media_source(&mut self, source: Box<dyn MediaSource>, hint: Hint) -> Result<()> {
        let session = FormatSession::open_source(source, hint)?;
        self.install_session(session);
        Ok(())
    }

    fn install_session(&mut self, session: FormatSession) {
        self.session = Some(session);
        self.graph = None;
        self.filter_enabled = false;
        self.resampler = ResampleStage::new(self.config.chunk_frames);
        self.pts = PtsTracker::new();
        self.last_packet_ms = None;
        self.filter_drained = false;
        self.state = PipelineState::Ready;
    }

    /// Build a filter graph from a textual chain description, negotiated
    /// against the open input's decode format.
    ///
    /// On success the new graph replaces any previous one (the enabled flag
    /// is unchanged). On failure nothing is mutated; the host should leave
    /// the filter stage disabled and keep reading unfiltered.
    pub fn init_filters(&mut self, description: &str) -> Result<()> {
        let session = self
            .session
            .as_ref()
            .ok_or(PipelineError::InvalidState("no open input"))?;

        let graph = FilterGraph::parse(description, session.decode_spec())?;
        self.graph = Some(graph);
        if self.filter_enabled {
            // The stream the resampler observes is about to change.
            self.resampler.invalidate();
        }
        Ok(())
    }

    /// Toggle whether decoded frames are routed through the filter graph.
    ///
    /// Allowed at any point in the read loop; never rebuilds the graph and
    /// never discards frames already buffered inside it. A change
    /// invalidates the resampler so the next conversion re-initializes for
    /// the format it then observes.
    pub fn set_filter_enabled(&mut self, enabled: bool) -> Result<()> {
        if enabled && self.graph.is_none() {
            return Err(PipelineError::InvalidState("filter graph not built"));
        }
        if enabled != self.filter_enabled {
            self.filter_enabled = enabled;
            self.resampler.invalidate();
            tracing::debug!(enabled, "filter stage toggled");
        }
        Ok(())
    }

    /// Pull one packet from the source and run it through the pipeline,
    /// invoking `sink` zero or more times with emitted chunks.
    ///
    /// Returns `Err(WouldBlock)` when the source has no data yet (retry
    /// later, nothing lost), `Err(EndOfStream)` once the source is
    /// exhausted (switch to [`Self::flush_frame`]), and a fatal error if
    /// the pipeline broke mid-stream (the instance is then `Ended`).
    pub fn read_frame<F>(&mut self, mut sink: F) -> Result<()>
    where
        F: FnMut(&[f32]),
    {
        match self.state {
            PipelineState::Ready | PipelineState::Reading => {}
            PipelineState::Flushing => return Err(PipelineError::EndOfStream),
            PipelineState::Idle => return Err(PipelineError::InvalidState("no open input")),
            PipelineState::Ended => return Err(PipelineError::InvalidState("pipeline ended")),
        }
        self.state = PipelineState::Reading;

        let session = self
            .session
            .as_mut()
            .ok_or(PipelineError::InvalidState("no open input"))?;

        let packet = match session.next_packet() {
            Ok(p) => p,
            Err(PipelineError::WouldBlock) => return Err(PipelineError::WouldBlock),
            Err(PipelineError::EndOfStream) => {
                tracing::debug!("source exhausted, entering flush phase");
                self.state = PipelineState::Flushing;
                return Err(PipelineError::EndOfStream);
            }
            Err(e) => {
                self.state = PipelineState::Ended;
                return Err(e);
            }
        };

        if !session.is_selected(&packet) {
            return Ok(());
        }

        let packet_ms = session.packet_time_ms(&packet);

        let frame = match session.decode(&packet) {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(()),
            Err(e) => {
                self.state = PipelineState::Ended;
                return Err(e);
            }
        };

        self.last_packet_ms = packet_ms;
        self.pts.add_input(frame.frames() as u64);

        let result = if self.filter_enabled {
            self.route_filtered(frame, &mut sink)
        } else {
            Self::emit(&mut self.resampler, &mut self.pts, &frame, &mut sink)
        };

        if let Err(e) = result {
            if e.is_fatal() {
                self.state = PipelineState::Ended;
            }
            return Err(e);
        }
        Ok(())
    }

    /// Drain one block of buffered output after the source is exhausted.
    ///
    /// The first call flushes filter-graph-internal backlog through the
    /// resampler; every call then drains one resampler block. Returns
    /// `Err(EndOfStream)` when nothing remains; further calls are a host
    /// contract violation and fail with `InvalidState`.
    pub fn flush_frame<F>(&mut self, mut sink: F) -> Result<()>
    where
        F: FnMut(&[f32]),
    {
        if self.state != PipelineState::Flushing {
            return Err(PipelineError::InvalidState(
                "flush requires an exhausted source",
            ));
        }

        if !self.filter_drained {
            self.filter_drained = true;
            if self.filter_enabled {
                if let Some(graph) = self.graph.as_mut() {
                    graph.drain();
                }
                if let Err(e) = self.pump_graph(&mut sink) {
                    if e.is_fatal() {
                        self.state = PipelineState::Ended;
                    }
                    return Err(e);
                }
            }
        }

        match self.resampler.drain() {
            Ok(chunk) => {
                if !chunk.is_empty() {
                    self.pts
                        .add_output((chunk.len() / CANONICAL_CHANNELS) as u64);
                    sink(chunk);
                }
                Ok(())
            }
            Err(PipelineError::EndOfStream) => {
                tracing::debug!(
                    emitted_frames = self.pts.output_frames(),
                    "pipeline drained"
                );
                self.state = PipelineState::Ended;
                Err(PipelineError::EndOfStream)
            }
            Err(e) => {
                self.state = PipelineState::Ended;
                Err(e)
            }
        }
    }

    /// Reposition the source to `target_sample`, expressed in output
    /// samples at the canonical 48 kHz rate.
    ///
    /// Resets the PTS counters (`in_pts` to the target rescaled to the
    /// input rate, `pts` to zero) and discards decoder state. The
    /// resampler's internal delay is retained: a few stale pre-seek samples
    /// may bleed into post-seek output.
    pub fn seek(&mut self, target_sample: u64) -> Result<()> {
        match self.state {
            PipelineState::Ready | PipelineState::Reading | PipelineState::Flushing => {}
            PipelineState::Idle => return Err(PipelineError::InvalidState("no open input")),
            PipelineState::Ended => return Err(PipelineError::InvalidState("pipeline ended")),
        }

        let session = self
            .session
            .as_mut()
            .ok_or(PipelineError::InvalidState("no open input"))?;

        let seconds = target_sample as f64 / CANONICAL_SAMPLE_RATE as f64;
        if let Err(e) = session.seek_to_time(seconds) {
            if e.is_fatal() {
                self.state = PipelineState::Ended;
            }
            return Err(e);
        }

        let input_rate = session.sample_rate();
        self.pts
            .seek(target_sample, input_rate, CANONICAL_SAMPLE_RATE);
        self.last_packet_ms = None;
        self.filter_drained = false;
        self.state = PipelineState::Reading;

        tracing::debug!(target_sample, seconds, "seeked pipeline");
        Ok(())
    }

    /// Elapsed time of the most recently decoded position.
    ///
    /// Computed from the accumulated decoded sample count at the input
    /// rate. When the most recent packet carried a container timestamp the
    /// two derivations are cross-checked (they are expected to agree).
    pub fn frame_pts(&self) -> Duration {
        let Some(session) = self.session.as_ref() else {
            return Duration::ZERO;
        };

        let derived_ms = self.pts.input_ms(session.sample_rate());
        if let Some(packet_ms) = self.last_packet_ms {
            debug_assert!(
                derived_ms.abs_diff(packet_ms) <= 1000,
                "sample-derived pts {derived_ms}ms disagrees with container pts {packet_ms}ms"
            );
        }
        Duration::from_millis(derived_ms)
    }

    fn route_filtered<F>(&mut self, frame: AudioFrame, sink: &mut F) -> Result<()>
    where
        F: FnMut(&[f32]),
    {
        if let Some(graph) = self.graph.as_mut() {
            graph.push(frame);
        }
        self.pump_graph(sink)
    }

    /// Pull every ready frame out of the graph and through the resampler.
    fn pump_graph<F>(&mut self, sink: &mut F) -> Result<()>
    where
        F: FnMut(&[f32]),
    {
        loop {
            let next = match self.graph.as_mut() {
                Some(graph) => graph.pull(),
                None => None,
            };
            let Some(filtered) = next else { break };
            Self::emit(&mut self.resampler, &mut self.pts, &filtered, sink)?;
        }
        Ok(())
    }

    fn emit<F>(
        resampler: &mut ResampleStage,
        pts: &mut PtsTracker,
        frame: &AudioFrame,
        sink: &mut F,
    ) -> Result<()>
    where
        F: FnMut(&[f32]),
    {
        let chunk = resampler.convert(frame)?;
        if !chunk.is_empty() {
            pts.add_output((chunk.len() / CANONICAL_CHANNELS) as u64);
            sink(chunk);
        }
        Ok(())
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}
