//! Format session: one open input, its selected audio track, and the
//! matching decoder.
//!
//! Uses Symphonia to:
//! - probe the input container/codec
//! - pull encoded packets from the selected audio track
//! - decode packets into interleaved `f32` frames
//!
//! Packet availability maps onto the pipeline's error vocabulary:
//! an I/O `WouldBlock` from a non-blocking source surfaces as
//! [`PipelineError::WouldBlock`], exhaustion as
//! [`PipelineError::EndOfStream`], and anything else is fatal.

use std::fs::File;
use std::io;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use crate::error::{PipelineError, Result};
use crate::frame::{AudioFrame, FrameSpec};

/// An open input source with its selected audio track and decoder.
///
/// Single-owner: replacing a session discards the previous one wholesale.
pub struct FormatSession {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
    sample_rate: u32,
    channels: usize,
    duration_ms: Option<u64>,
    codec_name: Option<&'static str>,
}

impl FormatSession {
    /// Open a local file, probing the container and selecting the best
    /// audio track.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| PipelineError::Open(format!("open {}: {e}", path.display())))?;

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        Self::open_source(Box::new(file), hint)
    }

    /// Open an arbitrary [`MediaSource`] (seekable or not).
    ///
    /// Non-blocking sources are supported: reads that would block surface
    /// later as [`PipelineError::WouldBlock`] from [`Self::next_packet`].
    /// A non-seekable source opens fine but seek requests will fail; that
    /// limitation is logged here rather than treated as an open error.
    pub fn open_source(source: Box<dyn MediaSource>, hint: Hint) -> Result<Self> {
        if !source.is_seekable() {
            tracing::info!("source is not seekable; seek and reconnect are unavailable");
        }

        let mss = MediaSourceStream::new(source, Default::default());
        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| PipelineError::Open(format!("probe failed: {e}")))?;

        let format = probed.format;

        let track = select_audio_track(format.as_ref())
            .ok_or_else(|| PipelineError::Open("no decodable audio track".into()))?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| PipelineError::Open("unknown sample rate".into()))?;
        let channels = codec_params
            .channels
            .ok_or_else(|| PipelineError::Open("unknown channel layout".into()))?
            .count();

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| PipelineError::Open(format!("decoder init failed: {e}")))?;

        let duration_ms = duration_ms_from_codec_params(&codec_params);
        let codec_name = codec_name_from_params(&codec_params);

        tracing::info!(
            track_id,
            rate_hz = sample_rate,
            channels,
            codec = codec_name.unwrap_or("?"),
            "opened input"
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            time_base: codec_params.time_base,
            sample_rate,
            channels,
            duration_ms,
            codec_name,
        })
    }

    /// Format the decoder produces, per the track's codec parameters.
    pub fn decode_spec(&self) -> FrameSpec {
        FrameSpec {
            rate: self.sample_rate,
            channels: self.channels,
        }
    }

    /// Sample rate of the selected track in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Best-effort total duration in milliseconds.
    pub fn duration_ms(&self) -> Option<u64> {
        self.duration_ms
    }

    /// Best-effort codec label (for example, "FLAC").
    pub fn codec_name(&self) -> Option<&'static str> {
        self.codec_name
    }

    /// Pull the next packet from the demuxer.
    pub fn next_packet(&mut self) -> Result<Packet> {
        self.format.next_packet().map_err(map_packet_error)
    }

    /// Whether `packet` belongs to the selected audio track.
    pub fn is_selected(&self, packet: &Packet) -> bool {
        packet.track_id() == self.track_id
    }

    /// Decode one packet into an interleaved `f32` frame.
    ///
    /// Returns `Ok(None)` when the decoder produced no output for this
    /// packet (it needs more input). Decode failures are fatal.
    pub fn decode(&mut self, packet: &Packet) -> Result<Option<AudioFrame>> {
        let decoded = match self.decoder.decode(packet) {
            Ok(d) => d,
            Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::WouldBlock => {
                return Ok(None);
            }
            Err(e) => return Err(PipelineError::Decode(format!("decode failed: {e}"))),
        };

        if decoded.frames() == 0 {
            return Ok(None);
        }

        let signal_spec = *decoded.spec();
        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, signal_spec);
        sample_buf.copy_interleaved_ref(decoded);

        Ok(Some(AudioFrame {
            spec: FrameSpec {
                rate: signal_spec.rate,
                channels: signal_spec.channels.count(),
            },
            samples: sample_buf.samples().to_vec(),
        }))
    }

    /// Reposition the source to `seconds` and discard decoder state.
    ///
    /// The decoder is reset, not drained: frames buffered inside it belong
    /// to the pre-seek position.
    pub fn seek_to_time(&mut self, seconds: f64) -> Result<()> {
        let time = Time::new(seconds.trunc() as u64, seconds.fract());
        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| PipelineError::Decode(format!("seek failed: {e}")))?;
        self.decoder.reset();

        tracing::debug!(
            required_ts = seeked.required_ts,
            actual_ts = seeked.actual_ts,
            "seeked"
        );
        Ok(())
    }

    /// Start time of `packet` in milliseconds, via the track time base.
    pub fn packet_time_ms(&self, packet: &Packet) -> Option<u64> {
        let tb = self.time_base?;
        let time = tb.calc_time(packet.ts());
        Some(time.seconds.saturating_mul(1000) + (time.frac * 1000.0) as u64)
    }
}

/// Pick the default track when it is decodable, else the first track with a
/// known codec, rate, and channel layout.
fn select_audio_track(
    format: &dyn FormatReader,
) -> Option<&symphonia::core::formats::Track> {
    let decodable = |t: &&symphonia::core::formats::Track| {
        t.codec_params.codec != CODEC_TYPE_NULL
            && t.codec_params.sample_rate.is_some()
            && t.codec_params.channels.is_some()
    };

    format
        .default_track()
        .filter(decodable)
        .or_else(|| format.tracks().iter().find(decodable))
}

/// Map a demuxer-side error onto the pipeline's error vocabulary.
fn map_packet_error(err: SymphoniaError) -> PipelineError {
    match err {
        SymphoniaError::IoError(e) if e.kind() == io::ErrorKind::WouldBlock => {
            PipelineError::WouldBlock
        }
        SymphoniaError::IoError(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            PipelineError::EndOfStream
        }
        SymphoniaError::ResetRequired => {
            PipelineError::Decode("stream reset required".into())
        }
        e => PipelineError::Decode(format!("demux failed: {e}")),
    }
}

/// Best-effort duration in milliseconds from codec metadata.
fn duration_ms_from_codec_params(codec_params: &CodecParameters) -> Option<u64> {
    let frames = codec_params.n_frames?;
    let rate = codec_params.sample_rate? as u64;
    if rate == 0 {
        return None;
    }
    Some(frames.saturating_mul(1000) / rate)
}

/// Best-effort codec label for logs and host status displays.
fn codec_name_from_params(params: &CodecParameters) -> Option<&'static str> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia::core::codecs::*;

    #[test]
    fn map_packet_error_would_block() {
        let err = map_packet_error(SymphoniaError::IoError(io::Error::from(
            io::ErrorKind::WouldBlock,
        )));
        assert!(matches!(err, PipelineError::WouldBlock));
    }

    #[test]
    fn map_packet_error_eof() {
        let err = map_packet_error(SymphoniaError::IoError(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "end of stream",
        )));
        assert!(matches!(err, PipelineError::EndOfStream));
    }

    #[test]
    fn map_packet_error_other_io_is_fatal() {
        let err = map_packet_error(SymphoniaError::IoError(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "reset by peer",
        )));
        assert!(err.is_fatal());
    }

    #[test]
    fn map_packet_error_reset_required_is_fatal() {
        let err = map_packet_error(SymphoniaError::ResetRequired);
        assert!(err.is_fatal());
    }

    #[test]
    fn duration_ms_from_codec_params_handles_zero_rate() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(0);
        params.n_frames = Some(100);
        assert!(duration_ms_from_codec_params(&params).is_none());
    }

    #[test]
    fn duration_ms_from_codec_params_computes() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(48_000);
        params.n_frames = Some(96_000);
        assert_eq!(duration_ms_from_codec_params(&params), Some(2000));
    }

    #[test]
    fn codec_name_from_params_maps_known_codecs() {
        let mut params = CodecParameters::new();
        params.codec = CODEC_TYPE_FLAC;
        assert_eq!(codec_name_from_params(&params), Some("FLAC"));
        params.codec = CODEC_TYPE_PCM_S16LE;
        assert_eq!(codec_name_from_params(&params), Some("PCM_S16"));
    }

    #[test]
    fn codec_name_from_params_unknown_returns_none() {
        let params = CodecParameters::new();
        assert!(codec_name_from_params(&params).is_none());
    }

    #[test]
    fn open_missing_file_is_open_error() {
        let err = FormatSession::open(Path::new("/nonexistent/audio.flac"))
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::Open(_)));
    }
}
