//! General MPEG-family decoder (MP3, AAC/ADTS, MP4).
//!
//! The catch-all decoder behind the codec-specific ones: probes whatever
//! the provider holds and pumps packets through the shared engine. Three
//! behaviors distinguish it:
//!
//! - **Priming trim.** AAC streams carry 1024 junk frames, MP3 streams 275;
//!   they are subtracted from the reported total and discarded from the
//!   first decode run. When the bytes come from the in-memory transmux
//!   provider the trim is suppressed, because the transmuxer performs it.
//! - **CENC decryption.** With a decryptor configured, the byte-pull path
//!   scans for SIDX/TENC/MOOF/SENC boxes; packets whose entry index has an
//!   IV are decrypted before they reach the codec.
//! - **Streaming sources.** Over the unseekable memory FIFO, an
//!   end-of-stream is provisional: new segment bytes clear it.

use std::sync::Arc;

use parking_lot::Mutex;
use symphonia::core::codecs::{CODEC_TYPE_AAC, CODEC_TYPE_MP3};
use symphonia::core::probe::Hint;
use tracing::{debug, trace};

use pcmflow_dash::{CencScanner, Decryptor, DECRYPTER_SUCCESS};
use pcmflow_source::{DataProvider, Whence, DATA_PROVIDER_MEMORY_NAME};

use crate::codec::engine::{Engine, Step};
use crate::codec::source::ProviderSource;
use crate::decoder::{
    fail_load, run_worker, DecodeCallback, Decoder, ErrorCallback, LoadCallback, UNKNOWN_FRAMES,
};
use crate::mime;
use crate::pcm::PcmBuffer;

/// Leading encoder-inserted frames that are not part of the audio.
const AAC_PRIMING_FRAMES: i64 = 1024;
const MP3_PRIMING_FRAMES: i64 = 275;

/// Packets sampled when the container cannot supply a frame count.
const FRAME_SURVEY_PACKETS: usize = 50;

pub struct MpegDecoder {
    provider: Arc<dyn DataProvider>,
    decryptor: Option<Arc<dyn Decryptor>>,
    scanner: Arc<Mutex<CencScanner>>,
    mime: String,
    state: Mutex<MpegState>,
}

#[derive(Default)]
struct MpegState {
    engine: Option<Engine>,
    channels: usize,
    sample_rate: f64,
    frames: i64,
    frame_index: i64,
    start_junk_frames: i64,
    frames_per_entry: u64,
    pcm: PcmBuffer,
    ended: bool,
}

impl MpegDecoder {
    pub fn new(
        provider: Arc<dyn DataProvider>,
        decryptor: Option<Arc<dyn Decryptor>>,
        mime: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            decryptor,
            scanner: Arc::new(Mutex::new(CencScanner::new())),
            mime: mime.into(),
            state: Mutex::new(MpegState::default()),
        }
    }

    fn hint(&self) -> Hint {
        let mut hint = Hint::new();
        match self.mime.as_str() {
            mime::MIME_TYPE_MP3 => {
                hint.with_extension("mp3");
            }
            m if mime::MPEG2TS_MIME_TYPES.contains(&m) => {
                hint.with_extension("aac");
            }
            mime::MIME_TYPE_DASH_MP4 => {
                hint.with_extension("mp4");
            }
            _ => {}
        }
        hint
    }

    fn open(&self) -> Result<(), crate::error::DecoderError> {
        let source = if self.decryptor.is_some() {
            ProviderSource::with_scanner(self.provider.clone(), self.scanner.clone())
        } else {
            ProviderSource::new(self.provider.clone())
        };
        let engine = Engine::open(source, self.hint())?;

        let from_transmuxer = self.provider.name() == DATA_PROVIDER_MEMORY_NAME;
        let start_junk_frames = if from_transmuxer {
            0
        } else if engine.info.codec == CODEC_TYPE_AAC {
            AAC_PRIMING_FRAMES
        } else if engine.info.codec == CODEC_TYPE_MP3 {
            MP3_PRIMING_FRAMES
        } else {
            0
        };

        let mut state = self.state.lock();
        state.channels = engine.info.channels;
        state.sample_rate = f64::from(engine.info.sample_rate);
        state.frames = engine
            .info
            .n_frames
            .map(|n| n as i64)
            .unwrap_or(UNKNOWN_FRAMES);
        state.start_junk_frames = start_junk_frames;
        state.engine = Some(engine);
        if state.frames != UNKNOWN_FRAMES {
            state.frames -= start_junk_frames;
        }
        drop(state);

        if self.frames() == UNKNOWN_FRAMES && self.provider.size() > 0 {
            self.survey_frames();
        }

        // The priming frames sit ahead of frame 0.
        let mut state = self.state.lock();
        if let Some(engine) = state.engine.as_mut() {
            engine.skip_frames = start_junk_frames.max(0) as u64;
        }
        Ok(())
    }

    /// Estimate the total frame count from the first packets' average size
    /// when the container does not carry one. Leaves the reader rewound.
    fn survey_frames(&self) {
        let mut state = self.state.lock();
        let MpegState {
            engine,
            frames,
            start_junk_frames,
            ..
        } = &mut *state;
        let Some(engine) = engine.as_mut() else {
            return;
        };
        let mut packet_bytes = 0u64;
        let mut packet_frames = 0u64;
        let mut packets = 0u64;
        for _ in 0..FRAME_SURVEY_PACKETS {
            match engine.next_packet() {
                Ok(Some(packet)) => {
                    packet_bytes += packet.data.len() as u64;
                    packet_frames += packet.dur();
                    packets += 1;
                }
                _ => break,
            }
        }
        if packets > 0 && packet_bytes > 0 && packet_frames > 0 {
            let total_bytes = self.provider.size().max(0) as u64;
            let estimated =
                (total_bytes as f64 / (packet_bytes as f64 / packets as f64)).floor() as u64;
            *frames =
                (estimated as i64 * (packet_frames / packets) as i64) - *start_junk_frames;
            debug!(estimated_frames = *frames, surveyed = packets, "frame survey");
        }
        if engine.seek_to_frame(0).is_err() {
            // Unseekable source; fall back to a raw rewind.
            self.provider.seek(0, Whence::Set);
        }
    }

    /// Decrypt `packet` data in place when an IV is known for its entry.
    fn maybe_decrypt(&self, state: &MpegState, packet: &mut symphonia::core::formats::Packet) {
        let Some(decryptor) = self.decryptor.as_ref() else {
            return;
        };
        let frames_per_entry = state.frames_per_entry.max(1);
        let entry_index = packet.ts() / frames_per_entry;
        let scanner = self.scanner.lock();
        let Some(iv) = scanner.iv_for_entry(entry_index) else {
            return;
        };
        let Some(key_id) = scanner.key_id().copied() else {
            return;
        };
        drop(scanner);

        let mut clear = vec![0u8; packet.data.len()];
        let status = decryptor.decrypt(
            &packet.data,
            &mut clear,
            &key_id,
            &pcmflow_dash::expand_iv(iv),
        );
        if status == DECRYPTER_SUCCESS {
            packet.data = clear.into_boxed_slice();
        } else {
            // Leave the ciphertext; the codec will surface the damage.
            trace!(entry_index, status, "packet decrypt failed");
        }
    }
}

impl Decoder for MpegDecoder {
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
        let junk = state.start_junk_frames;
        if let Some(engine) = state.engine.as_mut() {
            // Frame f of the trimmed stream sits at timestamp f + priming.
            if engine
                .seek_to_frame((frame_index + junk).max(0) as u64)
                .is_ok()
            {
                state.ended = false;
            }
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

            // New bytes in a streaming source clear a provisional EOF.
            if state.ended && !strong_this.provider.eof() {
                state.ended = false;
            }

            while state.pcm.len() < wanted_samples && !state.ended {
                let packet = {
                    let Some(engine) = state.engine.as_mut() else { break };
                    match engine.next_packet() {
                        Ok(Some(packet)) => Some(packet),
                        Ok(None) => None,
                        Err(Step::Eof) => None,
                        Err(_) => continue,
                    }
                };
                let Some(mut packet) = packet else {
                    if strong_this.provider.eof() {
                        state.ended = true;
                    }
                    break;
                };
                if state.frames_per_entry == 0 && packet.dur() > 0 {
                    state.frames_per_entry = packet.dur();
                }
                strong_this.maybe_decrypt(&state, &mut packet);
                let MpegState {
                    engine, pcm, ended, ..
                } = &mut *state;
                let Some(engine) = engine.as_mut() else { break };
                match engine.decode_packet(&packet, pcm) {
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
        "com.nativeformat.decoder.avcodec"
    }

    fn flush(&self) {
        let mut state = self.state.lock();
        if let Some(engine) = state.engine.as_mut() {
            engine.decoder.reset();
        }
        state.pcm.clear();
        state.ended = false;
    }
}
