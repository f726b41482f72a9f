//! Uniform interleaved f32 PCM over heterogeneous compressed audio.
//!
//! The crate turns an opaque resource identifier (file path, HTTP(S) URL,
//! or a synthetic URI such as `midi:<path>:soundfont:<path>`) into a
//! pull-based [`Decoder`] producing interleaved f32 frames at a requested
//! target sample rate and channel count.
//!
//! Three subsystems compose:
//! - the layered [`Factory`] stack dispatching on MIME type or path
//!   extension and wrapping the selected codec decoder in normalization;
//! - per-codec decoder state machines under [`codec`];
//! - the [`NormalizationDecoder`] performing channel remix and rational
//!   resampling.
//!
//! ```no_run
//! use std::sync::Arc;
//! use pcmflow::{Factory, STANDARD_CHANNELS, STANDARD_SAMPLE_RATE};
//!
//! let factory = Factory::new();
//! factory.create_decoder(
//!     "/music/track.flac",
//!     "",
//!     Box::new(|decoder| {
//!         if let Some(decoder) = decoder {
//!             decoder.decode(4096, Box::new(|index, count, samples| {
//!                 // `samples` holds `count` stereo frames starting at `index`.
//!                 let _ = (index, count, samples.len());
//!             }), true);
//!         }
//!     }),
//!     Arc::new(|domain, code| eprintln!("{domain} failed: {code}")),
//!     STANDARD_SAMPLE_RATE,
//!     STANDARD_CHANNELS,
//! );
//! ```

pub mod codec;
mod data;
mod decoder;
mod error;
mod factory;
mod manifest;
mod mime;
mod normalize;
mod pcm;
mod transmux;

pub use crate::data::{decoder_for_data, DataDecoder};
pub use crate::decoder::{
    DecodeCallback, Decoder, ErrorCallback, LoadCallback, UNKNOWN_FRAMES,
};
pub use crate::error::{codes, DecoderError, DecoderResult};
pub use crate::factory::{
    CommonFactory, CreateDecoderCallback, DecoderFactory, Factory, LgplFactory,
    NormalizationFactory, ServiceFactory, TransmuxerFactory, STANDARD_CHANNELS,
    STANDARD_SAMPLE_RATE,
};
pub use crate::manifest::{Manifest, ManifestFactory};
pub use crate::mime::*;
pub use crate::normalize::NormalizationDecoder;
pub use crate::pcm::PcmBuffer;
pub use crate::transmux::TransmuxDecoder;

pub use pcmflow_source::UNKNOWN_SIZE;

/// Library version string.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
