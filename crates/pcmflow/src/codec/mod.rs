//! Per-codec decoder state machines.

pub(crate) mod engine;
pub(crate) mod source;

pub mod flac;
pub mod midi;
pub mod mpeg;
pub mod ogg;
pub mod speex;
pub mod wav;

pub use flac::FlacDecoder;
pub use midi::MidiDecoder;
pub use mpeg::MpegDecoder;
pub use ogg::OggDecoder;
pub use speex::SpeexDecoder;
pub use wav::WavDecoder;
