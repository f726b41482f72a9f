//! The pull-decoder contract.
//!
//! Every decoder in the stack implements [`Decoder`]: a pull-based producer
//! of interleaved f32 frames with callback-reported completion. Asynchronous
//! operations (`load`, `decode` with `synchronous == false`) run on a
//! detached worker thread; one per-decoder mutex inside each implementation
//! serializes all codec access, so `decode`, `seek` and `flush` never
//! interleave.

use std::sync::Arc;

pub use pcmflow_source::{ErrorCallback, LoadCallback};

/// Reported by [`Decoder::frames`] when the total frame count is unknown.
pub const UNKNOWN_FRAMES: i64 = -1;

/// Callback receiving one decoded block: `(frame_index, frame_count,
/// samples)`. `samples` holds `frame_count * channels` interleaved floats
/// and `frame_index` is the stream position of the block's first frame.
pub type DecodeCallback = Box<dyn FnOnce(i64, i64, &[f32]) + Send>;

/// A pull-based audio decoder producing interleaved f32 PCM.
///
/// After a successful `load`, `sample_rate` and `channels` are fixed for the
/// decoder's lifetime. `current_frame_index` is the index of the next frame
/// `decode` will produce; successive `decode` calls return contiguous frame
/// ranges unless interrupted by `seek` or `flush`.
pub trait Decoder: Send + Sync {
    /// Asynchronously prepare the decoder. `on_done(true)` exactly once on
    /// success; failures fire `on_error(domain, code)` then `on_done(false)`
    /// and leave the decoder in a permanent failed state.
    fn load(self: Arc<Self>, on_error: ErrorCallback, on_done: LoadCallback);

    /// Output sample rate.
    fn sample_rate(&self) -> f64;

    /// Output channel count.
    fn channels(&self) -> usize;

    /// Total frames, or [`UNKNOWN_FRAMES`].
    fn frames(&self) -> i64;

    /// Index of the next frame `decode` will produce.
    fn current_frame_index(&self) -> i64;

    /// Position the decoder at `frame_index`. Clears buffered PCM.
    fn seek(&self, frame_index: i64);

    /// Decode up to `frames` frames and deliver them through `cb`.
    ///
    /// Runs on the caller's thread when `synchronous` is true, otherwise on
    /// a detached worker. A short block (`frame_count < frames`) means the
    /// decoder stalled on end-of-stream or a fatal error; `eof` becomes
    /// observable on the next call.
    fn decode(self: Arc<Self>, frames: i64, cb: DecodeCallback, synchronous: bool);

    /// Whether the decoder has no more frames to produce.
    fn eof(&self) -> bool;

    /// The resource identifier being decoded.
    fn path(&self) -> String;

    /// Decoder kind tag (also its error domain).
    fn name(&self) -> &'static str;

    /// Reset codec-internal state and drop buffered PCM. Does not change
    /// `current_frame_index`.
    fn flush(&self);
}

/// Run `f` on the caller's thread or a detached worker.
pub(crate) fn run_worker(synchronous: bool, f: impl FnOnce() + Send + 'static) {
    if synchronous {
        f();
    } else {
        std::thread::spawn(f);
    }
}

/// Report a failed load through the paired callbacks.
pub(crate) fn fail_load(
    on_error: &ErrorCallback,
    on_done: LoadCallback,
    domain: &str,
    code: i32,
) {
    on_error(domain, code);
    on_done(false);
}
