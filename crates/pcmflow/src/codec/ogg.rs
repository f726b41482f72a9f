//! Ogg decoder: Vorbis first, Opus second.
//!
//! The container is probed once; the mapped codec decides the path. Vorbis
//! decodes through the shared Symphonia engine (planar output is
//! interleaved on copy). Opus packets are pulled from the Ogg reader and
//! decoded with libopus, which always produces 48 kHz output; the OpusHead
//! pre-skip is discarded from the stream head. Streams that map to neither
//! codec fail with a could-not-decode error.

use std::sync::Arc;

use parking_lot::Mutex;
use symphonia::core::codecs::{CODEC_TYPE_OPUS, CODEC_TYPE_VORBIS};
use symphonia::core::formats::{FormatReader, SeekMode, SeekTo};
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use pcmflow_source::DataProvider;

use crate::codec::engine::{next_track_packet, open_reader, Engine, Step, StreamInfo};
use crate::codec::source::ProviderSource;
use crate::decoder::{
    fail_load, run_worker, DecodeCallback, Decoder, ErrorCallback, LoadCallback, UNKNOWN_FRAMES,
};
use crate::error::{DecoderError, DecoderResult};
use crate::pcm::PcmBuffer;

/// Opus output rate is fixed by the codec.
const OPUS_SAMPLE_RATE: f64 = 48_000.0;
/// Largest Opus frame: 120 ms at 48 kHz.
const OPUS_MAX_FRAME: usize = 5760;

pub struct OggDecoder {
    provider: Arc<dyn DataProvider>,
    state: Mutex<OggState>,
}

#[derive(Default)]
struct OggState {
    inner: Option<OggInner>,
    channels: usize,
    sample_rate: f64,
    frames: i64,
    frame_index: i64,
    pcm: PcmBuffer,
    ended: bool,
}

enum OggInner {
    Vorbis(Engine),
    Opus(OpusStream),
}

/// Opus packet pump over the Ogg format reader.
struct OpusStream {
    reader: Box<dyn FormatReader>,
    decoder: SendOpus,
    info: StreamInfo,
    pre_skip: u64,
    skip_frames: u64,
}

/// libopus decoder state is safe to move between threads; the binding does
/// not declare it.
struct SendOpus(opus::Decoder);
unsafe impl Send for SendOpus {}

impl OggDecoder {
    pub fn new(provider: Arc<dyn DataProvider>) -> Self {
        Self {
            provider,
            state: Mutex::new(OggState::default()),
        }
    }

    fn open(&self) -> DecoderResult<()> {
        let mut hint = Hint::new();
        hint.with_extension("ogg");
        let source = ProviderSource::new(self.provider.clone());
        let (reader, info) = open_reader(source, hint)?;

        let mut state = self.state.lock();
        state.frame_index = 0;
        if info.codec == CODEC_TYPE_VORBIS {
            let engine = Engine::from_reader(reader, info)?;
            state.channels = info.channels;
            state.sample_rate = f64::from(info.sample_rate);
            state.frames = info.n_frames.map(|n| n as i64).unwrap_or(UNKNOWN_FRAMES);
            state.inner = Some(OggInner::Vorbis(engine));
            debug!("ogg stream mapped to vorbis");
            return Ok(());
        }
        if info.codec == CODEC_TYPE_OPUS {
            let channels = info.channels.max(1);
            let opus_channels = if channels == 1 {
                opus::Channels::Mono
            } else {
                opus::Channels::Stereo
            };
            let decoder = opus::Decoder::new(OPUS_SAMPLE_RATE as u32, opus_channels)
                .map_err(DecoderError::could_not_decode)?;
            let pre_skip = opus_pre_skip(reader.as_ref(), info.track_id);
            state.channels = channels.min(2);
            state.sample_rate = OPUS_SAMPLE_RATE;
            state.frames = info
                .n_frames
                .map(|n| n as i64)
                .unwrap_or(UNKNOWN_FRAMES);
            state.inner = Some(OggInner::Opus(OpusStream {
                reader,
                decoder: SendOpus(decoder),
                info,
                pre_skip,
                skip_frames: pre_skip,
            }));
            debug!(pre_skip, "ogg stream mapped to opus");
            return Ok(());
        }
        Err(DecoderError::could_not_decode(format!(
            "unsupported ogg codec {:?}",
            info.codec
        )))
    }
}

/// Pre-skip from the OpusHead identification header, when available.
fn opus_pre_skip(reader: &dyn FormatReader, track_id: u32) -> u64 {
    let Some(track) = reader.tracks().iter().find(|t| t.id == track_id) else {
        return 0;
    };
    if let Some(delay) = track.codec_params.delay {
        return u64::from(delay);
    }
    track
        .codec_params
        .extra_data
        .as_deref()
        .filter(|head| head.len() >= 12 && head.starts_with(b"OpusHead"))
        .map(|head| u64::from(u16::from_le_bytes([head[10], head[11]])))
        .unwrap_or(0)
}

impl OpusStream {
    /// Decode one packet into `pcm`, honoring the remaining skip count.
    fn step(&mut self, pcm: &mut PcmBuffer, channels: usize) -> Step {
        let packet = match next_track_packet(self.reader.as_mut(), self.info.track_id) {
            Ok(Some(packet)) => packet,
            Ok(None) => return Step::Eof,
            Err(step) => return step,
        };
        let mut out = vec![0f32; OPUS_MAX_FRAME * channels];
        let frames = match self.decoder.0.decode_float(&packet.data, &mut out, false) {
            Ok(frames) => frames,
            Err(e) => {
                warn!(error = %e, "opus packet rejected");
                return Step::Skipped;
            }
        };
        let skip = (self.skip_frames as usize).min(frames);
        self.skip_frames -= skip as u64;
        pcm.push(&out[skip * channels..frames * channels]);
        Step::Produced(frames - skip)
    }

    fn seek(&mut self, frame_index: u64) -> DecoderResult<()> {
        let target = frame_index + self.pre_skip;
        let seeked = self
            .reader
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts: target,
                    track_id: self.info.track_id,
                },
            )
            .map_err(DecoderError::could_not_decode)?;
        // The reader lands on a packet boundary; clip the difference.
        self.skip_frames = seeked.required_ts.saturating_sub(seeked.actual_ts);
        let _ = self.decoder.0.reset_state();
        Ok(())
    }
}

impl Decoder for OggDecoder {
    fn load(self: Arc<Self>, on_error: ErrorCallback, on_done: LoadCallback) {
        let strong_this = self;
        run_worker(false, move || match strong_this.open() {
            Ok(()) => on_done(true),
            Err(e) => fail_load(&on_error, on_done, strong_this.name(), e.code()),
        });
    }

    fn sample_rate(&self) -> f64 {
        self.state.lock().sample_rate
    }

    fn channels(&self) -> usize {
        self.state.lock().channels
    }

    fn frames(&self) -> i64 {
        self.state.lock().frames
    }

    fn current_frame_index(&self) -> i64 {
        self.state.lock().frame_index
    }

    fn seek(&self, frame_index: i64) {
        let mut state = self.state.lock();
        let target = frame_index.max(0) as u64;
        let sought = match state.inner.as_mut() {
            Some(OggInner::Vorbis(engine)) => engine.seek_to_frame(target).is_ok(),
            Some(OggInner::Opus(stream)) => stream.seek(target).is_ok(),
            None => false,
        };
        if sought {
            state.ended = false;
        }
        state.pcm.clear();
        state.frame_index = frame_index;
    }

    fn decode(self: Arc<Self>, frames: i64, cb: DecodeCallback, synchronous: bool) {
        let strong_this = self;
        run_worker(synchronous, move || {
            let mut state = strong_this.state.lock();
            let frame_index = state.frame_index;
            let channels = state.channels.max(1);
            let wanted_samples = frames.max(0) as usize * channels;

            while state.pcm.len() < wanted_samples && !state.ended {
                let OggState {
                    inner, pcm, ended, ..
                } = &mut *state;
                let step = match inner.as_mut() {
                    Some(OggInner::Vorbis(engine)) => engine.step(pcm),
                    Some(OggInner::Opus(stream)) => stream.step(pcm, channels),
                    None => Step::Eof,
                };
                match step {
                    Step::Produced(_) | Step::Skipped => {}
                    Step::Eof => *ended = true,
                }
            }

            let mut out = Vec::with_capacity(wanted_samples);
            state.pcm.drain_into(&mut out, wanted_samples);
            let read_frames = (out.len() / channels) as i64;
            state.frame_index = frame_index + read_frames;
            drop(state);

            cb(frame_index, read_frames, &out);
        });
    }

    fn eof(&self) -> bool {
        let state = self.state.lock();
        state.ended && state.pcm.is_empty()
    }

    fn path(&self) -> String {
        self.provider.path()
    }

    fn name(&self) -> &'static str {
        match self.state.lock().inner {
            Some(OggInner::Vorbis(_)) => "com.nativeformat.decoder.vorbis",
            Some(OggInner::Opus(_)) => "com.nativeformat.decoder.opus",
            None => "com.nativeformat.decoder.ogg",
        }
    }

    fn flush(&self) {
        let mut state = self.state.lock();
        match state.inner.as_mut() {
            Some(OggInner::Vorbis(engine)) => engine.decoder.reset(),
            Some(OggInner::Opus(stream)) => {
                let _ = stream.decoder.0.reset_state();
            }
            None => {}
        }
        state.pcm.clear();
    }
}
