//! Memory-backed one-shot decoding.
//!
//! [`decoder_for_data`] wraps a byte buffer in a Memory provider, routes a
//! synthetic path at it through the factory stack, and returns a push/pull
//! surface: append compressed bytes with `write`, pull decoded interleaved
//! floats with `read`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use pcmflow_source::{DataProvider, MemoryDataProvider};

use crate::decoder::{Decoder, ErrorCallback};
use crate::factory::Factory;

static NEXT_DATA_ID: AtomicU64 = AtomicU64::new(0);

/// One-shot decoder over an in-memory byte buffer.
pub struct DataDecoder {
    memory: Arc<MemoryDataProvider>,
    decoder: Arc<dyn Decoder>,
    mime: String,
}

impl DataDecoder {
    /// Append compressed bytes. Returns the byte count accepted.
    pub fn write(&self, data: &[u8]) -> usize {
        self.memory.write(data);
        data.len()
    }

    /// Decode into `samples`, returning the number of f32 values written.
    pub fn read(&self, samples: &mut [f32]) -> usize {
        let channels = self.channels().max(1);
        let frames = (samples.len() / channels) as i64;
        let collected: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = collected.clone();
        self.decoder.clone().decode(
            frames,
            Box::new(move |_, _, block| {
                sink.lock().extend_from_slice(block);
            }),
            true,
        );
        let block = collected.lock();
        let n = block.len().min(samples.len());
        samples[..n].copy_from_slice(&block[..n]);
        n
    }

    /// Total decodable samples when the stream length is known, else 0.
    pub fn samples(&self) -> usize {
        let frames = self.decoder.frames();
        if frames < 0 {
            0
        } else {
            frames as usize * self.channels()
        }
    }

    pub fn mime_type(&self) -> &str {
        &self.mime
    }

    pub fn channels(&self) -> usize {
        self.decoder.channels()
    }

    pub fn sample_rate(&self) -> f64 {
        self.decoder.sample_rate()
    }

    pub fn flush(&self) {
        self.memory.flush();
        self.decoder.flush();
    }
}

/// Build a [`DataDecoder`] over `data` with the given MIME type.
///
/// The decoder stack is created synchronously from the caller's point of
/// view: this call blocks until the factory finished loading (or failed).
pub fn decoder_for_data(
    data: &[u8],
    mime: &str,
    on_error: ErrorCallback,
    sample_rate: f64,
    channels: usize,
) -> Option<Arc<DataDecoder>> {
    let id = NEXT_DATA_ID.fetch_add(1, Ordering::SeqCst);
    let path = format!("data:{id}");
    let memory = Arc::new(MemoryDataProvider::new(path.clone()));
    memory.write(data);

    let factory = Factory::new();
    let claimed = memory.clone();
    let claimed_path = path.clone();
    let creator = factory.providers().add_creator(Box::new(move |p| {
        (p == claimed_path).then(|| claimed.clone() as Arc<dyn DataProvider>)
    }));

    let (tx, rx) = mpsc::channel();
    factory.create_decoder(
        &path,
        mime,
        Box::new(move |decoder| {
            let _ = tx.send(decoder);
        }),
        on_error,
        sample_rate,
        channels,
    );
    let decoder = match rx.recv() {
        Ok(Some(decoder)) => decoder,
        _ => {
            warn!(%mime, "in-memory decoder creation failed");
            factory.providers().remove_creator(creator);
            return None;
        }
    };
    factory.providers().remove_creator(creator);

    Some(Arc::new(DataDecoder {
        memory,
        decoder,
        mime: mime.to_string(),
    }))
}
