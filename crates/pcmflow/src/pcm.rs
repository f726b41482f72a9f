//! Decoder-local PCM accumulator.
//!
//! Variable-size codec frames rarely align with the caller's chunking; every
//! decoder buffers its surplus here. Appended after each codec step, drained
//! front-to-back into the output block, cleared on `seek` and `flush`.

/// FIFO of interleaved f32 samples.
#[derive(Debug, Default)]
pub struct PcmBuffer {
    samples: Vec<f32>,
}

impl PcmBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffered samples (not frames).
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Buffered frames for the given channel count.
    pub fn frames(&self, channels: usize) -> usize {
        if channels == 0 {
            0
        } else {
            self.samples.len() / channels
        }
    }

    pub fn push(&mut self, samples: &[f32]) {
        self.samples.extend_from_slice(samples);
    }

    /// Move up to `max` samples from the head into `out`, returning the
    /// count moved.
    pub fn drain_into(&mut self, out: &mut Vec<f32>, max: usize) -> usize {
        let n = max.min(self.samples.len());
        out.extend(self.samples.drain(..n));
        n
    }

    /// Drop `count` samples from the head.
    pub fn discard(&mut self, count: usize) {
        let n = count.min(self.samples.len());
        self.samples.drain(..n);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.samples
    }
}
