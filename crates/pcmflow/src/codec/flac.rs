//! FLAC decoder.
//!
//! Drives the FLAC reader through [`Engine`]: metadata is read on a worker
//! at `load`, packets are pumped on demand, and seeks are sample-accurate
//! (FLAC timestamps are frame indices).

use std::sync::Arc;

use parking_lot::Mutex;
use symphonia::core::probe::Hint;

use pcmflow_source::DataProvider;

use crate::codec::engine::{Engine, Step};
use crate::codec::source::ProviderSource;
use crate::decoder::{
    fail_load, run_worker, DecodeCallback, Decoder, ErrorCallback, LoadCallback, UNKNOWN_FRAMES,
};
use crate::pcm::PcmBuffer;

pub struct FlacDecoder {
    provider: Arc<dyn DataProvider>,
    state: Mutex<FlacState>,
}

#[derive(Default)]
struct FlacState {
    engine: Option<Engine>,
    channels: usize,
    sample_rate: f64,
    frames: i64,
    frame_index: i64,
    pcm: PcmBuffer,
    ended: bool,
}

impl FlacDecoder {
    pub fn new(provider: Arc<dyn DataProvider>) -> Self {
        Self {
            provider,
            state: Mutex::new(FlacState::default()),
        }
    }
}

impl Decoder for FlacDecoder {
    fn load(self: Arc<Self>, on_error: ErrorCallback, on_done: LoadCallback) {
        let strong_this = self;
        run_worker(false, move || {
            let mut hint = Hint::new();
            hint.with_extension("flac");
            let source = ProviderSource::new(strong_this.provider.clone());
            match Engine::open(source, hint) {
                Ok(engine) => {
                    let mut state = strong_this.state.lock();
                    state.channels = engine.info.channels;
                    state.sample_rate = f64::from(engine.info.sample_rate);
                    state.frames = engine
                        .info
                        .n_frames
                        .map(|n| n as i64)
                        .unwrap_or(UNKNOWN_FRAMES);
                    state.engine = Some(engine);
                    drop(state);
                    on_done(true);
                }
                Err(e) => fail_load(&on_error, on_done, strong_this.name(), e.code()),
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
        if let Some(engine) = state.engine.as_mut() {
            if engine.seek_to_frame(frame_index.max(0) as u64).is_ok() {
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

            while state.pcm.len() < wanted_samples && !state.ended {
                let FlacState {
                    engine, pcm, ended, ..
                } = &mut *state;
                let Some(engine) = engine.as_mut() else { break };
                match engine.step(pcm) {
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
        "com.nativeformat.decoder.flac"
    }

    fn flush(&self) {
        let mut state = self.state.lock();
        if let Some(engine) = state.engine.as_mut() {
            engine.decoder.reset();
        }
        state.pcm.clear();
    }
}
