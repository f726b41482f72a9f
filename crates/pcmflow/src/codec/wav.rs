//! WAV decoder.
//!
//! Parses the RIFF framing by hand: the 12-byte master header, then a chunk
//! walk until both `fmt ` and `data` are seen (unknown chunks and `JUNK` are
//! skipped via their size field). Decoding dispatches on the audio format
//! code and sample width; seeking is a byte-offset computation into the
//! `data` chunk.

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;
use tracing::{debug, warn};

use pcmflow_source::{DataProvider, Whence};

use crate::decoder::{fail_load, run_worker, DecodeCallback, Decoder, ErrorCallback, LoadCallback};
use crate::error::{DecoderError, DecoderResult};

const FORMAT_PCM: u16 = 1;
const FORMAT_IEEE_FLOAT: u16 = 3;

pub struct WavDecoder {
    provider: Arc<dyn DataProvider>,
    state: Mutex<WavState>,
}

#[derive(Default)]
struct WavState {
    channels: usize,
    sample_rate: f64,
    frames: i64,
    frame_index: i64,
    data_offset: i64,
    audio_format: u16,
    bit_depth: u16,
}

impl WavState {
    fn sample_size(&self) -> usize {
        usize::from(self.bit_depth / 8)
    }

    fn frame_size(&self) -> usize {
        self.sample_size() * self.channels
    }
}

impl WavDecoder {
    pub fn new(provider: Arc<dyn DataProvider>) -> Self {
        Self {
            provider,
            state: Mutex::new(WavState::default()),
        }
    }

    fn parse_header(&self) -> DecoderResult<()> {
        let mut master = [0u8; 12];
        if self.provider.read(&mut master, 1, 12) < 12 {
            return Err(DecoderError::NotEnoughDataForHeader);
        }
        if &master[0..4] != b"RIFF" {
            return Err(DecoderError::NotRiff);
        }
        if &master[8..12] != b"WAVE" {
            return Err(DecoderError::NotWav);
        }

        let mut state = self.state.lock();
        let mut fmt_found = false;
        let mut data_found = false;
        let mut data_bytes = 0usize;
        while !fmt_found || !data_found {
            if self.provider.eof() {
                return Err(DecoderError::ChunkError);
            }
            let mut header = [0u8; 8];
            if self.provider.read(&mut header, 1, 8) < 8 {
                return Err(DecoderError::ChunkError);
            }
            let chunk_type: [u8; 4] = header[0..4].try_into().expect("4 bytes");
            let chunk_size = LittleEndian::read_u32(&header[4..8]) as usize;

            match &chunk_type {
                b"fmt " => {
                    let mut fmt = [0u8; 16];
                    if chunk_size < 16 || self.provider.read(&mut fmt, 1, 16) < 16 {
                        return Err(DecoderError::ChunkError);
                    }
                    state.audio_format = LittleEndian::read_u16(&fmt[0..2]);
                    state.channels = usize::from(LittleEndian::read_u16(&fmt[2..4]));
                    state.sample_rate = f64::from(LittleEndian::read_u32(&fmt[4..8]));
                    state.bit_depth = LittleEndian::read_u16(&fmt[14..16]);
                    if chunk_size > 16 {
                        self.provider.seek((chunk_size - 16) as i64, Whence::Cur);
                    }
                    fmt_found = true;
                }
                b"data" => {
                    state.data_offset = self.provider.tell();
                    data_bytes = chunk_size;
                    data_found = true;
                    if !fmt_found {
                        self.provider.seek(chunk_size as i64, Whence::Cur);
                    }
                }
                other => {
                    debug!(
                        chunk = %String::from_utf8_lossy(other),
                        bytes = chunk_size,
                        "skipping chunk"
                    );
                    self.provider.seek(chunk_size as i64, Whence::Cur);
                }
            }
        }
        if state.frame_size() == 0 {
            return Err(DecoderError::ChunkError);
        }
        state.frames = (data_bytes / state.frame_size()) as i64;
        debug!(
            channels = state.channels,
            sample_rate = state.sample_rate,
            frames = state.frames,
            format = state.audio_format,
            bit_depth = state.bit_depth,
            "wav header parsed"
        );
        Ok(())
    }

    /// Read `frames` frames from the current position and convert to f32.
    fn read_frames(&self, state: &WavState, frames: i64) -> Vec<f32> {
        let channels = state.channels;
        let sample_size = state.sample_size();
        let wanted_samples = frames as usize * channels;
        let mut raw = vec![0u8; wanted_samples * sample_size];
        let bytes_read = self
            .provider
            .read(&mut raw, sample_size * channels, frames as usize);
        let samples_read = bytes_read / sample_size;
        let mut out = Vec::with_capacity(samples_read);

        match (state.audio_format, sample_size) {
            (FORMAT_IEEE_FLOAT, 4) => {
                for chunk in raw[..bytes_read].chunks_exact(4) {
                    out.push(LittleEndian::read_f32(chunk));
                }
            }
            (FORMAT_PCM, 1) => {
                // Unsigned 8-bit: remove the DC offset before scaling.
                let dc = f32::from(u8::MAX / 2);
                let max = f32::from(u8::MAX);
                for &b in &raw[..bytes_read] {
                    out.push((f32::from(b) - dc) / max);
                }
            }
            (FORMAT_PCM, 2) => {
                for chunk in raw[..bytes_read].chunks_exact(2) {
                    out.push(f32::from(LittleEndian::read_i16(chunk)) / f32::from(i16::MAX));
                }
            }
            (FORMAT_PCM, 4) => {
                for chunk in raw[..bytes_read].chunks_exact(4) {
                    out.push(LittleEndian::read_i32(chunk) as f32 / i32::MAX as f32);
                }
            }
            (format, size) => {
                warn!(format, size, "unsupported wav sample layout");
            }
        }
        out
    }
}

impl Decoder for WavDecoder {
    fn load(self: Arc<Self>, on_error: ErrorCallback, on_done: LoadCallback) {
        let strong_this = self;
        run_worker(false, move || match strong_this.parse_header() {
            Ok(()) => {
                strong_this.seek(0);
                on_done(true);
            }
            Err(e) => {
                fail_load(&on_error, on_done, strong_this.name(), e.code());
            }
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
        let byte_offset = state.data_offset + frame_index * state.frame_size() as i64;
        self.provider.seek(byte_offset, Whence::Set);
        state.frame_index = frame_index;
    }

    fn decode(self: Arc<Self>, frames: i64, cb: DecodeCallback, synchronous: bool) {
        let strong_this = self;
        run_worker(synchronous, move || {
            let mut state = strong_this.state.lock();
            let frame_index = state.frame_index;
            if frames <= 0
                || state.channels == 0
                || state.sample_size() == 0
                || frame_index >= state.frames
            {
                drop(state);
                cb(frame_index, 0, &[]);
                return;
            }
            let wanted = frames.min(state.frames - frame_index);
            let samples = strong_this.read_frames(&state, wanted);
            let frames_read = (samples.len() / state.channels) as i64;
            state.frame_index = frame_index + frames_read;
            drop(state);

            cb(frame_index, frames_read, &samples);
        });
    }

    fn eof(&self) -> bool {
        let state = self.state.lock();
        state.frame_index >= state.frames || self.provider.eof()
    }

    fn path(&self) -> String {
        self.provider.path()
    }

    fn name(&self) -> &'static str {
        "com.nativeformat.decoder.wav"
    }

    fn flush(&self) {}
}
