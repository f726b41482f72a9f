//! Shared Symphonia packet pump.
//!
//! The FLAC, Vorbis and MPEG decoders all drive Symphonia the same way:
//! probe the container, pull packets from the format reader, decode each
//! into an interleaved f32 block, and append to the caller's PCM buffer.
//! Per-codec behavior (priming, decryption, seek unit mapping) stays in the
//! codec modules; this is only the common engine.

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder as CodecDecoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, trace};

use crate::codec::source::ProviderSource;
use crate::error::{DecoderError, DecoderResult};
use crate::pcm::PcmBuffer;

/// Stream parameters discovered at probe time.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StreamInfo {
    pub track_id: u32,
    pub codec: symphonia::core::codecs::CodecType,
    pub sample_rate: u32,
    pub channels: usize,
    pub n_frames: Option<u64>,
}

/// Result of one packet step.
pub(crate) enum Step {
    /// Frames were appended to the PCM buffer.
    Produced(usize),
    /// A recoverable hiccup was skipped.
    Skipped,
    /// The reader ran out of bytes.
    Eof,
}

/// Probe a provider-backed source and return the format reader plus the
/// parameters of its first audio track.
pub(crate) fn open_reader(
    source: ProviderSource,
    hint: Hint,
) -> DecoderResult<(Box<dyn FormatReader>, StreamInfo)> {
    let mss = MediaSourceStream::new(Box::new(source), Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(DecoderError::header)?;
    let reader = probed.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| DecoderError::header("no decodable track"))?;
    let params = &track.codec_params;
    let info = StreamInfo {
        track_id: track.id,
        codec: params.codec,
        sample_rate: params.sample_rate.unwrap_or(0),
        channels: params.channels.map(|c| c.count()).unwrap_or(0),
        n_frames: params.n_frames,
    };
    debug!(
        codec = ?info.codec,
        sample_rate = info.sample_rate,
        channels = info.channels,
        frames = ?info.n_frames,
        "probed stream"
    );
    Ok((reader, info))
}

/// Pull the next packet belonging to `track_id` from a format reader.
///
/// `Err(Step::Skipped)` signals a reset-required condition the caller must
/// forward to its codec state; `Err(Step::Eof)` ends the stream.
pub(crate) fn next_track_packet(
    reader: &mut dyn FormatReader,
    track_id: u32,
) -> Result<Option<Packet>, Step> {
    loop {
        match reader.next_packet() {
            Ok(packet) => {
                if packet.track_id() != track_id {
                    continue;
                }
                return Ok(Some(packet));
            }
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(Step::Eof);
            }
            Err(SymphoniaError::ResetRequired) => return Err(Step::Skipped),
            Err(e) => {
                trace!(error = %e, "next_packet failed");
                return Err(Step::Eof);
            }
        }
    }
}

/// The packet pump: reader + codec decoder + conversion scratch.
pub(crate) struct Engine {
    pub reader: Box<dyn FormatReader>,
    pub decoder: Box<dyn CodecDecoder>,
    pub info: StreamInfo,
    sample_buf: Option<SampleBuffer<f32>>,
    /// Frames to discard before appending output (post-seek clip, priming).
    pub skip_frames: u64,
}

impl Engine {
    /// Probe `source` and construct the codec decoder for its audio track.
    pub fn open(source: ProviderSource, hint: Hint) -> DecoderResult<Self> {
        let (reader, info) = open_reader(source, hint)?;
        Self::from_reader(reader, info)
    }

    pub fn from_reader(
        reader: Box<dyn FormatReader>,
        info: StreamInfo,
    ) -> DecoderResult<Self> {
        let track = reader
            .tracks()
            .iter()
            .find(|t| t.id == info.track_id)
            .ok_or_else(|| DecoderError::header("track vanished after probe"))?;
        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(DecoderError::could_not_decode)?;
        Ok(Self {
            reader,
            decoder,
            info,
            sample_buf: None,
            skip_frames: 0,
        })
    }

    /// Pull the next packet for our track.
    pub fn next_packet(&mut self) -> Result<Option<Packet>, Step> {
        match next_track_packet(self.reader.as_mut(), self.info.track_id) {
            Err(Step::Skipped) => {
                self.decoder.reset();
                Err(Step::Skipped)
            }
            other => other,
        }
    }

    /// Decode one packet and append its frames to `pcm`.
    pub fn decode_packet(&mut self, packet: &Packet, pcm: &mut PcmBuffer) -> Step {
        let decoded = match self.decoder.decode(packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                // Recoverable per-packet hiccup; skip it.
                trace!(error = e, "skipping undecodable packet");
                return Step::Skipped;
            }
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Step::Eof;
            }
            Err(SymphoniaError::ResetRequired) => {
                self.decoder.reset();
                return Step::Skipped;
            }
            Err(e) => {
                trace!(error = %e, "fatal decode error");
                return Step::Eof;
            }
        };

        let frames = decoded.frames();
        if frames == 0 {
            return Step::Skipped;
        }
        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        let needed = (frames * channels) as u64;
        let recreate = match &self.sample_buf {
            Some(buf) => (buf.capacity() as u64) < needed,
            None => true,
        };
        if recreate {
            self.sample_buf = Some(SampleBuffer::<f32>::new(
                decoded.capacity() as u64,
                spec,
            ));
        }
        let sample_buf = self.sample_buf.as_mut().expect("sample buffer exists");
        sample_buf.copy_interleaved_ref(decoded);
        let samples = sample_buf.samples();

        let skip_samples = (self.skip_frames as usize * channels).min(samples.len());
        self.skip_frames -= (skip_samples / channels) as u64;
        pcm.push(&samples[skip_samples..]);
        Step::Produced((samples.len() - skip_samples) / channels)
    }

    /// One full step: pull a packet and decode it.
    pub fn step(&mut self, pcm: &mut PcmBuffer) -> Step {
        match self.next_packet() {
            Ok(Some(packet)) => self.decode_packet(&packet, pcm),
            Ok(None) => Step::Eof,
            Err(step) => step,
        }
    }

    /// Sample-accurate seek to `frame` (tracks whose timestamps are frame
    /// indices, i.e. time base `1/sample_rate`). Sets `skip_frames` to clip
    /// the pre-roll the reader could not skip itself.
    pub fn seek_to_frame(&mut self, frame: u64) -> DecoderResult<()> {
        let seeked = self
            .reader
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts: frame,
                    track_id: self.info.track_id,
                },
            )
            .map_err(DecoderError::could_not_decode)?;
        self.decoder.reset();
        self.skip_frames = seeked.required_ts.saturating_sub(seeked.actual_ts);
        Ok(())
    }
}
