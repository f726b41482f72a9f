//! Normalization decoder: channel remix + resample around a wrapped decoder.
//!
//! Presents a fixed `(sample_rate, channels)` target over any wrapped
//! decoder. Channel conversion folds surplus channels down (with gain
//! restoration) or fills missing ones with the source average. Rate
//! conversion goes through a sinc resampler fed in fixed chunks, with the
//! filter's group delay trimmed from the head and an end-of-stream
//! correction that pins the total output to `input * factor` so frame
//! counts stay exact.

use std::sync::Arc;

use parking_lot::Mutex;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::{debug, warn};

use crate::decoder::{
    run_worker, DecodeCallback, Decoder, ErrorCallback, LoadCallback, UNKNOWN_FRAMES,
};
use crate::pcm::PcmBuffer;

/// Fixed input chunk fed to the resampler.
const RESAMPLER_CHUNK: usize = 1024;

/// Over-request margin: the resampler may underproduce per call.
const REQUEST_MARGIN: f64 = 1.01;

pub struct NormalizationDecoder {
    wrapped: Arc<dyn Decoder>,
    sample_rate: f64,
    channels: usize,
    state: Mutex<NormState>,
}

#[derive(Default)]
struct NormState {
    factor: f64,
    resampler: Option<SincFixedIn<f32>>,
    /// Per-channel input staged for the next resampler chunk.
    staged: Vec<Vec<f32>>,
    /// Filter group delay still to trim from resampler output.
    skip_output: usize,
    /// Mixed input frames fed toward the resampler since the last reset.
    input_frames: u64,
    /// Frames pushed to `pcm` since the last reset.
    output_frames: u64,
    /// End-of-stream drain already performed.
    drained: bool,
    pcm: PcmBuffer,
    frame_index: i64,
}

impl NormalizationDecoder {
    pub fn new(wrapped: Arc<dyn Decoder>, sample_rate: f64, channels: usize) -> Self {
        Self {
            wrapped,
            sample_rate,
            channels,
            state: Mutex::new(NormState::default()),
        }
    }

    fn make_resampler(&self, factor: f64) -> Option<SincFixedIn<f32>> {
        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        match SincFixedIn::<f32>::new(factor, 2.0, params, RESAMPLER_CHUNK, self.channels) {
            Ok(resampler) => Some(resampler),
            Err(e) => {
                warn!(factor, error = %e, "failed to build resampler");
                None
            }
        }
    }

    /// Fold the wrapped decoder's channel layout into the target layout.
    fn remix(&self, samples: &[f32], input_frames: usize, wrapped_channels: usize) -> Vec<f32> {
        let tc = self.channels;
        let wc = wrapped_channels.max(1);
        let mut mixed = vec![0f32; input_frames * tc];

        if wc > tc {
            // Fold every channel into `channel % target`; an odd residual
            // channel is mixed into every target channel.
            let even_wc = wc - (wc % tc);
            for frame in 0..input_frames {
                for j in 0..even_wc {
                    mixed[frame * tc + (j % tc)] += samples[frame * wc + j];
                }
                if even_wc != wc {
                    let residual = samples[frame * wc + (wc - 1)];
                    for j in 0..tc {
                        mixed[frame * tc + j] += residual;
                    }
                }
            }
            let volume_factor = wc as f32 / tc as f32;
            for sample in &mut mixed {
                *sample /= volume_factor;
            }
        } else if wc < tc {
            // Copy matching channels; fill the extras with the average of
            // all wrapped channels.
            for frame in 0..input_frames {
                let average = samples[frame * wc..(frame + 1) * wc].iter().sum::<f32>()
                    / wc as f32;
                for j in 0..tc {
                    mixed[frame * tc + j] = if j < wc {
                        samples[frame * wc + j]
                    } else {
                        average
                    };
                }
            }
        } else {
            mixed.copy_from_slice(&samples[..input_frames * tc]);
        }
        mixed
    }

    /// Stage mixed frames and run every complete resampler chunk.
    fn feed_resampler(&self, state: &mut NormState, mixed: &[f32]) {
        let tc = self.channels;
        let input_frames = mixed.len() / tc;
        state.input_frames += input_frames as u64;

        if state.resampler.is_none() {
            state.output_frames += input_frames as u64;
            state.pcm.push(mixed);
            return;
        }

        if state.staged.len() != tc {
            state.staged = vec![Vec::new(); tc];
        }
        for frame in 0..input_frames {
            for (j, channel) in state.staged.iter_mut().enumerate() {
                channel.push(mixed[frame * tc + j]);
            }
        }

        while state.staged[0].len() >= RESAMPLER_CHUNK {
            let chunk: Vec<Vec<f32>> = state
                .staged
                .iter_mut()
                .map(|channel| channel.drain(..RESAMPLER_CHUNK).collect())
                .collect();
            let result = state
                .resampler
                .as_mut()
                .expect("resampler exists")
                .process(&chunk, None);
            match result {
                Ok(output) => Self::push_resampled(state, &output, self.channels),
                Err(e) => {
                    warn!(error = %e, "resampler chunk failed");
                    break;
                }
            }
        }
    }

    /// Trim the remaining group delay, interleave, and account.
    fn push_resampled(state: &mut NormState, output: &[Vec<f32>], channels: usize) {
        let produced = output.first().map(|c| c.len()).unwrap_or(0);
        let skip = state.skip_output.min(produced);
        state.skip_output -= skip;
        if produced == skip {
            return;
        }
        let mut interleaved = Vec::with_capacity((produced - skip) * channels);
        for frame in skip..produced {
            for channel in output.iter().take(channels) {
                interleaved.push(channel[frame]);
            }
        }
        state.output_frames += (produced - skip) as u64;
        state.pcm.push(&interleaved);
    }

    /// End of stream: push the staged remainder through, drain the filter
    /// tail, and pin the total output to `input * factor`.
    fn drain_resampler(&self, state: &mut NormState) {
        if state.drained {
            return;
        }
        state.drained = true;
        let channels = self.channels;
        let factor = state.factor;

        if state.resampler.is_some() {
            if !state.staged.is_empty() && !state.staged[0].is_empty() {
                let remainder: Vec<Vec<f32>> = state
                    .staged
                    .iter_mut()
                    .map(|channel| channel.drain(..).collect())
                    .collect();
                let result = state
                    .resampler
                    .as_mut()
                    .expect("resampler exists")
                    .process_partial(Some(&remainder), None);
                if let Ok(output) = result {
                    Self::push_resampled(state, &output, channels);
                }
            }
            let result = state
                .resampler
                .as_mut()
                .expect("resampler exists")
                .process_partial::<Vec<f32>>(None, None);
            if let Ok(output) = result {
                Self::push_resampled(state, &output, channels);
            }
        }

        if state.resampler.is_none() {
            return;
        }
        // Exact-count correction: the filter tail over- or under-shoots by
        // a handful of frames.
        let target = (state.input_frames as f64 * factor).round() as i64;
        let produced = state.output_frames as i64;
        let diff = target - produced;
        if diff > 0 {
            state.pcm.push(&vec![0f32; diff as usize * channels]);
            state.output_frames += diff as u64;
        } else if diff < 0 {
            let drop = ((-diff) as usize * channels).min(state.pcm.len());
            let keep = state.pcm.len() - drop;
            let kept: Vec<f32> = state.pcm.as_slice()[..keep].to_vec();
            state.pcm.clear();
            state.pcm.push(&kept);
            state.output_frames -= (drop / channels) as u64;
        }
        debug!(target, produced, "resampler drained");
    }

    /// Flush the resampler by pushing empty input, then re-arm its delay.
    fn reset_resampler(&self, state: &mut NormState) {
        let channels = self.channels;
        if let Some(resampler) = state.resampler.as_mut() {
            let _ = resampler.process_partial::<Vec<f32>>(None, None);
            resampler.reset();
            state.skip_output = resampler.output_delay();
        }
        state.staged = vec![Vec::new(); channels];
        state.input_frames = 0;
        state.output_frames = 0;
        state.drained = false;
    }
}

impl Decoder for NormalizationDecoder {
    fn load(self: Arc<Self>, _on_error: ErrorCallback, on_done: LoadCallback) {
        let mut state = self.state.lock();
        let wrapped_rate = self.wrapped.sample_rate();
        state.factor = if wrapped_rate > 0.0 {
            self.sample_rate / wrapped_rate
        } else {
            1.0
        };
        if (state.factor - 1.0).abs() > f64::EPSILON {
            state.resampler = self.make_resampler(state.factor);
            if let Some(resampler) = state.resampler.as_ref() {
                state.skip_output = resampler.output_delay();
            }
        }
        state.staged = vec![Vec::new(); self.channels];
        drop(state);
        on_done(true);
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn frames(&self) -> i64 {
        let wrapped_frames = self.wrapped.frames();
        if wrapped_frames == UNKNOWN_FRAMES {
            return UNKNOWN_FRAMES;
        }
        let factor = self.state.lock().factor.max(f64::MIN_POSITIVE);
        (wrapped_frames as f64 * factor) as i64
    }

    fn current_frame_index(&self) -> i64 {
        self.state.lock().frame_index
    }

    fn seek(&self, frame_index: i64) {
        let mut state = self.state.lock();
        state.frame_index = frame_index;
        let factor = state.factor.max(f64::MIN_POSITIVE);
        self.wrapped.seek((frame_index as f64 / factor) as i64);
        self.reset_resampler(&mut state);
        state.pcm.clear();
    }

    fn decode(self: Arc<Self>, frames: i64, cb: DecodeCallback, synchronous: bool) {
        let requested_samples = frames.max(0) as usize * self.channels;
        {
            // Enough buffered output: return synchronously.
            let mut state = self.state.lock();
            if state.pcm.len() >= requested_samples {
                let frame_index = state.frame_index;
                let mut out = Vec::with_capacity(requested_samples);
                state.pcm.drain_into(&mut out, requested_samples);
                state.frame_index = frame_index + frames;
                drop(state);
                cb(frame_index, frames, &out);
                return;
            }
        }

        let strong_this = self;
        run_worker(synchronous, move || {
            let (factor, frame_index) = {
                let state = strong_this.state.lock();
                (state.factor.max(f64::MIN_POSITIVE), state.frame_index)
            };
            let wrapped_channels = strong_this.wrapped.channels().max(1);

            // Pull from the wrapped decoder until the request is covered or
            // the source stalls. Each pull carries a small margin because
            // the resampler underproduces per call.
            loop {
                let buffered = strong_this.state.lock().pcm.len();
                if buffered >= requested_samples {
                    break;
                }
                let deficit = frames - (buffered / strong_this.channels) as i64;
                let request = ((deficit as f64 / factor) * REQUEST_MARGIN).ceil() as i64;

                let collected: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
                let sink = collected.clone();
                strong_this.wrapped.clone().decode(
                    request.max(1),
                    Box::new(move |_, _, samples| {
                        sink.lock().extend_from_slice(samples);
                    }),
                    true,
                );
                let samples = std::mem::take(&mut *collected.lock());
                let input_frames = samples.len() / wrapped_channels;

                let mut state = strong_this.state.lock();
                if input_frames > 0 {
                    let mixed = strong_this.remix(&samples, input_frames, wrapped_channels);
                    strong_this.feed_resampler(&mut state, &mixed);
                }
                if strong_this.wrapped.eof() {
                    strong_this.drain_resampler(&mut state);
                    break;
                }
                if input_frames == 0 {
                    // Stalled without end-of-stream; report what we have.
                    break;
                }
            }

            let mut state = strong_this.state.lock();
            let mut out = Vec::with_capacity(requested_samples);
            state.pcm.drain_into(&mut out, requested_samples);
            let mut sent_frames = (out.len() / strong_this.channels) as i64;
            if sent_frames == 1 && frames > 1 {
                // A lone frame at a steady-state boundary is noise; drop it.
                out.clear();
                state.pcm.clear();
                sent_frames = 0;
            }
            state.frame_index = frame_index + sent_frames;
            drop(state);

            cb(frame_index, sent_frames, &out);
        });
    }

    fn eof(&self) -> bool {
        let state = self.state.lock();
        self.wrapped.eof() && state.pcm.is_empty()
    }

    fn path(&self) -> String {
        self.wrapped.path()
    }

    fn name(&self) -> &'static str {
        "com.nativeformat.decoder.normalisation"
    }

    fn flush(&self) {
        let mut state = self.state.lock();
        state.pcm.clear();
        self.wrapped.flush();
        self.reset_resampler(&mut state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Silent fixed-spec decoder for exercising the remix math.
    struct StubDecoder {
        rate: f64,
        channels: usize,
    }

    impl Decoder for StubDecoder {
        fn load(self: Arc<Self>, _on_error: ErrorCallback, on_done: LoadCallback) {
            on_done(true);
        }
        fn sample_rate(&self) -> f64 {
            self.rate
        }
        fn channels(&self) -> usize {
            self.channels
        }
        fn frames(&self) -> i64 {
            0
        }
        fn current_frame_index(&self) -> i64 {
            0
        }
        fn seek(&self, _frame_index: i64) {}
        fn decode(self: Arc<Self>, _frames: i64, cb: DecodeCallback, _synchronous: bool) {
            cb(0, 0, &[]);
        }
        fn eof(&self) -> bool {
            true
        }
        fn path(&self) -> String {
            String::new()
        }
        fn name(&self) -> &'static str {
            "stub"
        }
        fn flush(&self) {}
    }

    fn normalizer(wrapped_channels: usize) -> NormalizationDecoder {
        let wrapped = Arc::new(StubDecoder {
            rate: 44_100.0,
            channels: wrapped_channels,
        });
        NormalizationDecoder::new(wrapped, 44_100.0, 2)
    }

    #[test]
    fn stereo_to_stereo_is_a_straight_copy() {
        let n = normalizer(2);
        let input = [0.1, -0.2, 0.3, -0.4];
        assert_eq!(n.remix(&input, 2, 2), input.to_vec());
    }

    #[test]
    fn mono_upmix_copies_into_both_channels() {
        let n = normalizer(1);
        let mixed = n.remix(&[0.5, -0.25], 2, 1);
        assert_eq!(mixed, vec![0.5, 0.5, -0.25, -0.25]);
    }

    #[test]
    fn six_channel_downmix_folds_and_restores_headroom() {
        let n = normalizer(6);
        // One frame, all channels at the same level: each target folds
        // three sources, then gain division restores the original level.
        let input = [0.3; 6];
        let mixed = n.remix(&input, 1, 6);
        assert_eq!(mixed.len(), 2);
        assert!((mixed[0] - 0.3).abs() < 1e-6);
        assert!((mixed[1] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn odd_channel_counts_mix_the_residual_everywhere() {
        let n = normalizer(3);
        // Channels 0 and 1 fold pairwise; channel 2 lands in both targets.
        let input = [0.2, 0.4, 0.1];
        let mixed = n.remix(&input, 1, 3);
        let volume = 3.0 / 2.0;
        assert!((mixed[0] - (0.2 + 0.1) / volume).abs() < 1e-6);
        assert!((mixed[1] - (0.4 + 0.1) / volume).abs() < 1e-6);
    }
}
