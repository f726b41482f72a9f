//! DASH transmux decoder.
//!
//! Wraps an inner MPEG decoder behind a segment-driven pull: each decode
//! determines the segment whose cumulative time covers the next required
//! frame, repackages it through the transmux primitive into an owned
//! in-memory provider, and drives the inner decoder to exhaustion for that
//! segment's duration. The inner decoder is built through the wrapped
//! factory stack via a synthetic path claimed by a temporarily registered
//! provider creator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use pcmflow_dash::{DashResult, Decryptor, SegmentIndex, TransmuxSession};
use pcmflow_source::{
    DataProvider, DataProviderFactory, MemoryDataProvider, Whence,
};

use crate::decoder::{
    fail_load, run_worker, DecodeCallback, Decoder, ErrorCallback, LoadCallback,
};
use crate::factory::DecoderFactory;
use crate::manifest::Manifest;
use crate::mime;

/// Default index read: 500 KiB, doubled for streams whose SIDX overflows it.
const DEFAULT_INDEX_RANGE: usize = 500 * 1024;

/// Transmuxed AAC carries this many priming frames.
const TRANSMUX_PRIMING_FRAMES: i64 = 1024;

static NEXT_TRANSMUX_ID: AtomicU64 = AtomicU64::new(0);

pub struct TransmuxDecoder {
    id: u64,
    provider: Arc<dyn DataProvider>,
    provider_factory: Arc<DataProviderFactory>,
    wrapped_factory: Arc<dyn DecoderFactory>,
    manifest: Option<Arc<Manifest>>,
    memory: Arc<MemoryDataProvider>,
    session: Mutex<TransmuxSession>,
    index: Mutex<SegmentIndex>,
    inner: Mutex<Option<Arc<dyn Decoder>>>,
    state: Mutex<TransmuxState>,
    start_junk_frames: i64,
}

#[derive(Default)]
struct TransmuxState {
    samples: Vec<f32>,
    frame_index: i64,
}

impl TransmuxDecoder {
    pub fn new(
        provider: Arc<dyn DataProvider>,
        provider_factory: Arc<DataProviderFactory>,
        wrapped_factory: Arc<dyn DecoderFactory>,
        manifest: Option<Arc<Manifest>>,
        decryptor: Option<Arc<dyn Decryptor>>,
        path: &str,
    ) -> Self {
        let mut session = TransmuxSession::new();
        if let Some(decryptor) = decryptor {
            session.set_decryptor(decryptor);
        }
        Self {
            id: NEXT_TRANSMUX_ID.fetch_add(1, Ordering::SeqCst),
            provider,
            provider_factory,
            wrapped_factory,
            manifest,
            memory: Arc::new(MemoryDataProvider::new(path)),
            session: Mutex::new(session),
            index: Mutex::new(SegmentIndex::default()),
            inner: Mutex::new(None),
            state: Mutex::new(TransmuxState::default()),
            start_junk_frames: TRANSMUX_PRIMING_FRAMES,
        }
    }

    /// Synthetic path the temporarily registered creator claims.
    fn fake_path(&self) -> String {
        format!("transmux:{}", self.id)
    }

    fn inner_decoder(&self) -> Option<Arc<dyn Decoder>> {
        self.inner.lock().clone()
    }

    /// Read one indexed segment from the source and repackage it into the
    /// memory provider.
    fn write_segment(&self, segment_index: usize) -> DashResult<()> {
        let (start, end) = {
            let index = self.index.lock();
            index.byte_range(segment_index).ok_or_else(|| {
                pcmflow_dash::DashError::malformed(segment_index, "segment out of range")
            })?
        };
        self.provider.seek(start as i64, Whence::Set);
        let mut data = vec![0u8; (end - start) as usize];
        let n = self.provider.read(&mut data, 1, data.len());
        let adts = self.session.lock().transmux_segment(segment_index, &data[..n])?;
        self.memory.write(&adts);
        Ok(())
    }

    /// Drive the inner decoder to exhaustion for one segment's duration,
    /// appending its output to our sample accumulator.
    fn exhaust_inner(&self, segment_index: usize, state: &mut TransmuxState) {
        let Some(inner) = self.inner_decoder() else {
            return;
        };
        let seconds = self.index.lock().segment_seconds(segment_index);
        let frames = (seconds * inner.sample_rate()) as i64;
        let collected: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = collected.clone();
        inner.decode(
            frames,
            Box::new(move |_, _, samples| {
                sink.lock().extend_from_slice(samples);
            }),
            true,
        );
        state.samples.append(&mut collected.lock());
    }

    /// Sum of the indexed durations, minus the priming frames.
    fn total_frames(&self) -> i64 {
        let seconds = self.index.lock().total_seconds();
        (seconds * self.sample_rate()) as i64 - self.start_junk_frames
    }

    /// Cumulative frame index where segment `i` starts (junk-adjusted) and
    /// ends.
    fn segment_window(&self, i: usize) -> (i64, i64) {
        let index = self.index.lock();
        let rate = self.sample_rate();
        let mut start = 0i64;
        for j in 0..i {
            start += (index.segment_seconds(j) * rate) as i64;
        }
        let mut end = start + (index.segment_seconds(i) * rate) as i64;
        start -= if i > 0 { self.start_junk_frames } else { 0 };
        end -= self.start_junk_frames;
        (start, end)
    }
}

impl Decoder for TransmuxDecoder {
    fn load(self: Arc<Self>, on_error: ErrorCallback, on_done: LoadCallback) {
        let strong_this = self;
        run_worker(false, move || {
            let range = strong_this
                .manifest
                .as_ref()
                .and_then(|m| m.index_range())
                .map(|(_, end)| end)
                .unwrap_or(DEFAULT_INDEX_RANGE);
            // The indicated range is not always enough; read twice as much.
            let mut head = vec![0u8; range * 2];
            strong_this.provider.seek(0, Whence::Set);
            let n = strong_this.provider.read(&mut head, 1, head.len());
            head.truncate(n);

            let index = match strong_this.session.lock().parse_index(&head) {
                Ok(index) => index,
                Err(e) => {
                    fail_load(&on_error, on_done, strong_this.name(), e.code());
                    return;
                }
            };
            debug!(segments = index.len(), "transmux index ready");
            *strong_this.index.lock() = index;

            if let Err(e) = strong_this.write_segment(0) {
                fail_load(&on_error, on_done, strong_this.name(), e.code());
                return;
            }

            // Route the synthetic path at the owned memory provider while
            // the inner decoder is built. A weak handle breaks the
            // factory → creator → decoder cycle.
            let weak_this = Arc::downgrade(&strong_this);
            let fake_path = strong_this.fake_path();
            let creator = strong_this.provider_factory.add_creator(Box::new(move |path| {
                let decoder = weak_this.upgrade()?;
                (path == fake_path).then(|| decoder.memory.clone() as Arc<dyn DataProvider>)
            }));

            let load_this = strong_this.clone();
            strong_this.wrapped_factory.clone().create_decoder(
                &load_this.fake_path(),
                mime::MIME_TYPE_AUDIO_MP2TS,
                Box::new(move |decoder| {
                    load_this.provider_factory.remove_creator(creator);
                    let Some(decoder) = decoder else {
                        on_done(false);
                        return;
                    };
                    *load_this.inner.lock() = Some(decoder.clone());
                    // Start clean: position zero, nothing buffered.
                    let mut state = load_this.state.lock();
                    state.samples.clear();
                    state.frame_index = 0;
                    drop(state);
                    load_this.memory.flush();
                    decoder.flush();
                    on_done(true);
                }),
                on_error,
                44_100.0,
                2,
            );
        });
    }

    fn sample_rate(&self) -> f64 {
        self.inner_decoder()
            .map(|d| d.sample_rate())
            .unwrap_or(44_100.0)
    }

    fn channels(&self) -> usize {
        self.inner_decoder().map(|d| d.channels()).unwrap_or(2)
    }

    fn frames(&self) -> i64 {
        self.total_frames()
    }

    fn current_frame_index(&self) -> i64 {
        self.state.lock().frame_index
    }

    fn seek(&self, frame_index: i64) {
        let mut state = self.state.lock();
        let channels = self.channels().max(1);
        let safe_frame_index = frame_index.min(self.total_frames() - 1).max(0);
        let previous = state.frame_index;
        state.frame_index = safe_frame_index;

        if previous < safe_frame_index {
            // Forward in time: maybe the buffer already covers it.
            let sample_diff = (safe_frame_index - previous) as usize * channels;
            if sample_diff < state.samples.len() {
                state.samples.drain(..sample_diff);
                return;
            }
        } else if previous == safe_frame_index {
            return;
        }
        state.samples.clear();
    }

    fn decode(self: Arc<Self>, frames: i64, cb: DecodeCallback, synchronous: bool) {
        let strong_this = self;
        run_worker(synchronous, move || {
            let channels = strong_this.channels().max(1);
            let mut state = strong_this.state.lock();
            let frame_index = state.frame_index;
            let total = strong_this.total_frames();
            let possible = frames.min(total - frame_index).max(0);
            let mut current = frame_index + (state.samples.len() / channels) as i64;

            while possible > (state.samples.len() / channels) as i64 {
                // Segment whose playout window covers the next frame.
                let segment_count = strong_this.index.lock().len();
                if segment_count == 0 {
                    break;
                }
                let mut segment = segment_count - 1;
                let mut window_start = 0i64;
                for i in 0..segment_count {
                    let (start, end) = strong_this.segment_window(i);
                    if current < end {
                        segment = i;
                        window_start = start;
                        break;
                    }
                }

                let buffered_before = state.samples.len() / channels;
                if let Err(e) = strong_this.write_segment(segment) {
                    warn!(segment, error = %e, "segment transmux failed");
                    break;
                }
                strong_this.exhaust_inner(segment, &mut state);

                // Remove leading priming frames.
                if current < strong_this.start_junk_frames {
                    let junk = (strong_this.start_junk_frames - current)
                        .min((state.samples.len() / channels) as i64);
                    state.samples.drain(..junk as usize * channels);
                }

                // Clip to the segment boundary when landing mid-segment.
                if buffered_before == 0 && current > window_start {
                    let skip =
                        ((current - window_start) as usize * channels).min(state.samples.len());
                    state.samples.drain(..skip);
                }

                let now = frame_index + (state.samples.len() / channels) as i64;
                if now == current {
                    // No forward progress; avoid spinning.
                    break;
                }
                current = now;
            }

            let output_frames = possible.min((state.samples.len() / channels) as i64);
            state.frame_index = frame_index + output_frames;
            let sample_count = output_frames as usize * channels;
            let out: Vec<f32> = state.samples.drain(..sample_count).collect();
            drop(state);

            cb(frame_index, output_frames, &out);
        });
    }

    fn eof(&self) -> bool {
        self.total_frames() <= self.current_frame_index()
    }

    fn path(&self) -> String {
        self.provider.path()
    }

    fn name(&self) -> &'static str {
        "com.nativeformat.decoder.dash2hlstransmuxer"
    }

    fn flush(&self) {
        self.state.lock().samples.clear();
        self.memory.flush();
        if let Some(inner) = self.inner_decoder() {
            inner.flush();
        }
    }
}
