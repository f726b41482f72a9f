//! Speex decoder.
//!
//! Drives libspeex over an Ogg packet pump: the first packet is the Speex
//! header (rate, mode, channel count, frames per packet), the second is the
//! comment packet, and every packet after that holds `frames_per_packet`
//! compressed frames. There is no native seeking; `seek` rewinds the
//! provider and steps the decoder forward to the target. The total frame
//! count is unknown.

use std::ffi::c_void;
use std::mem::MaybeUninit;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use ogg::PacketReader;
use parking_lot::Mutex;
use tracing::{debug, warn};

use speex_sys::{
    speex_bits_destroy, speex_bits_init, speex_bits_read_from, speex_bits_reset, speex_decode,
    speex_decoder_ctl, speex_decoder_destroy, speex_decoder_init, speex_lib_get_mode, SpeexBits,
    SPEEX_GET_FRAME_SIZE, SPEEX_RESET_STATE, SPEEX_SET_ENH,
};

use pcmflow_source::{DataProvider, Whence};

use crate::codec::source::ProviderSource;
use crate::decoder::{
    fail_load, run_worker, DecodeCallback, Decoder, ErrorCallback, LoadCallback, UNKNOWN_FRAMES,
};
use crate::error::{DecoderError, DecoderResult};
use crate::pcm::PcmBuffer;

/// Full-scale of the float samples libspeex emits.
const SPEEX_SCALE: f32 = 32768.0;

/// Byte offsets inside the 80-byte Speex header packet.
const HEADER_RATE_OFFSET: usize = 36;
const HEADER_MODE_OFFSET: usize = 40;
const HEADER_CHANNELS_OFFSET: usize = 48;
const HEADER_FRAMES_PER_PACKET_OFFSET: usize = 64;

pub struct SpeexDecoder {
    provider: Arc<dyn DataProvider>,
    state: Mutex<SpeexState>,
}

struct SpeexState {
    handle: Option<SpeexHandle>,
    reader: Option<PacketReader<ProviderSource>>,
    channels: usize,
    sample_rate: f64,
    mode: i32,
    frames_per_packet: u32,
    frame_size: usize,
    frame_index: i64,
    pcm: PcmBuffer,
    ended: bool,
}

/// Owned libspeex state. The raw pointers are used from behind the decoder
/// mutex only.
struct SpeexHandle {
    st: *mut c_void,
    bits: SpeexBits,
}

unsafe impl Send for SpeexHandle {}

impl Drop for SpeexHandle {
    fn drop(&mut self) {
        unsafe {
            speex_decoder_destroy(self.st);
            speex_bits_destroy(&mut self.bits);
        }
    }
}

impl SpeexHandle {
    fn new(mode: i32) -> DecoderResult<Self> {
        unsafe {
            let mode_ptr = speex_lib_get_mode(mode);
            if mode_ptr.is_null() {
                return Err(DecoderError::could_not_decode("unknown speex mode"));
            }
            let st = speex_decoder_init(mode_ptr);
            if st.is_null() {
                return Err(DecoderError::could_not_decode("speex_decoder_init failed"));
            }
            let mut enh: i32 = 1;
            speex_decoder_ctl(st, SPEEX_SET_ENH as i32, &mut enh as *mut i32 as *mut c_void);
            let mut bits = MaybeUninit::<SpeexBits>::uninit();
            speex_bits_init(bits.as_mut_ptr());
            Ok(Self {
                st,
                bits: bits.assume_init(),
            })
        }
    }

    fn frame_size(&self) -> usize {
        let mut frame_size: i32 = 0;
        unsafe {
            speex_decoder_ctl(
                self.st,
                SPEEX_GET_FRAME_SIZE as i32,
                &mut frame_size as *mut i32 as *mut c_void,
            );
        }
        frame_size.max(0) as usize
    }

    fn reset(&mut self) {
        unsafe {
            speex_decoder_ctl(self.st, SPEEX_RESET_STATE as i32, std::ptr::null_mut());
            speex_bits_reset(&mut self.bits);
        }
    }

    /// Decode every frame in one Ogg packet into `out` (mono samples in
    /// [-1, 1]).
    fn decode_packet(&mut self, packet: &[u8], frames_per_packet: u32, out: &mut Vec<f32>) {
        let frame_size = self.frame_size();
        if frame_size == 0 {
            return;
        }
        unsafe {
            speex_bits_read_from(
                &mut self.bits,
                packet.as_ptr() as *const i8,
                packet.len() as i32,
            );
        }
        let mut scratch = vec![0f32; frame_size];
        for _ in 0..frames_per_packet.max(1) {
            let status = unsafe { speex_decode(self.st, &mut self.bits, scratch.as_mut_ptr()) };
            if status != 0 {
                break;
            }
            out.extend(scratch.iter().map(|s| s / SPEEX_SCALE));
        }
    }
}

impl SpeexDecoder {
    pub fn new(provider: Arc<dyn DataProvider>) -> Self {
        Self {
            provider,
            state: Mutex::new(SpeexState {
                handle: None,
                reader: None,
                channels: 1,
                sample_rate: 0.0,
                mode: 0,
                frames_per_packet: 1,
                frame_size: 0,
                frame_index: 0,
                pcm: PcmBuffer::new(),
                ended: false,
            }),
        }
    }

    fn open(&self) -> DecoderResult<()> {
        let mut reader = PacketReader::new(ProviderSource::new(self.provider.clone()));
        let header = reader
            .read_packet()
            .map_err(DecoderError::header)?
            .ok_or(DecoderError::NotEnoughDataForHeader)?;
        let data = &header.data;
        if data.len() < 80 || !data.starts_with(b"Speex   ") {
            return Err(DecoderError::header("missing Speex header packet"));
        }
        let rate = LittleEndian::read_i32(&data[HEADER_RATE_OFFSET..]);
        let mode = LittleEndian::read_i32(&data[HEADER_MODE_OFFSET..]);
        let channels = LittleEndian::read_i32(&data[HEADER_CHANNELS_OFFSET..]);
        let frames_per_packet =
            LittleEndian::read_i32(&data[HEADER_FRAMES_PER_PACKET_OFFSET..]).max(1);

        // The comment packet follows the header; skip it.
        let _ = reader.read_packet().map_err(DecoderError::header)?;

        let handle = SpeexHandle::new(mode)?;
        let frame_size = handle.frame_size();
        debug!(rate, mode, channels, frames_per_packet, frame_size, "speex header parsed");

        let mut state = self.state.lock();
        state.sample_rate = f64::from(rate);
        state.mode = mode;
        state.channels = channels.clamp(1, 2) as usize;
        state.frames_per_packet = frames_per_packet as u32;
        state.frame_size = frame_size;
        state.handle = Some(handle);
        state.reader = Some(reader);
        state.ended = false;
        Ok(())
    }

    /// Decode one packet worth of frames into the PCM buffer. Returns false
    /// at end of stream.
    fn step(state: &mut SpeexState) -> bool {
        let Some(reader) = state.reader.as_mut() else {
            return false;
        };
        let Some(handle) = state.handle.as_mut() else {
            return false;
        };
        let packet = match reader.read_packet() {
            Ok(Some(packet)) => packet,
            Ok(None) => return false,
            Err(e) => {
                warn!(error = %e, "ogg packet read failed");
                return false;
            }
        };
        let mut mono = Vec::new();
        handle.decode_packet(&packet.data, state.frames_per_packet, &mut mono);
        if state.channels == 1 {
            state.pcm.push(&mono);
        } else {
            let mut interleaved = Vec::with_capacity(mono.len() * state.channels);
            for sample in mono {
                for _ in 0..state.channels {
                    interleaved.push(sample);
                }
            }
            state.pcm.push(&interleaved);
        }
        true
    }

    /// Rewind to the first audio packet, resetting codec state.
    fn rewind(&self, state: &mut SpeexState) {
        self.provider.seek(0, Whence::Set);
        let mut reader = PacketReader::new(ProviderSource::new(self.provider.clone()));
        // Header + comment packets precede the audio.
        let _ = reader.read_packet();
        let _ = reader.read_packet();
        state.reader = Some(reader);
        if let Some(handle) = state.handle.as_mut() {
            handle.reset();
        }
        state.pcm.clear();
        state.ended = false;
    }
}

impl Decoder for SpeexDecoder {
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
        UNKNOWN_FRAMES
    }

    fn current_frame_index(&self) -> i64 {
        self.state.lock().frame_index
    }

    fn seek(&self, frame_index: i64) {
        let mut state = self.state.lock();
        self.rewind(&mut state);
        // No native seek: step forward, discarding decoded frames, until
        // the cumulative count reaches the target.
        let channels = state.channels.max(1);
        let mut reached = 0i64;
        while reached < frame_index {
            if !Self::step(&mut state) {
                break;
            }
            let have = state.pcm.frames(channels) as i64;
            let discard = have.min(frame_index - reached);
            state.pcm.discard(discard as usize * channels);
            reached += discard;
            if have > discard {
                break;
            }
        }
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
                if !Self::step(&mut state) {
                    state.ended = true;
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
        "com.nativeformat.decoder.speex"
    }

    fn flush(&self) {
        let mut state = self.state.lock();
        if let Some(handle) = state.handle.as_mut() {
            handle.reset();
        }
        state.pcm.clear();
    }
}
