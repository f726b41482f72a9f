//! Crate error type and callback error codes.
//!
//! Failures surface through paired callbacks, never panics: the first
//! unrecoverable error fires `on_error(domain, code)` followed by
//! `on_done(false)`. [`DecoderError`] is the internal currency;
//! [`codes`] lists the subsystem-local integers it maps to.

/// Result type used by this crate.
pub type DecoderResult<T> = Result<T, DecoderError>;

/// Subsystem-local error codes passed to error callbacks.
pub mod codes {
    pub const NOT_ENOUGH_DATA_FOR_HEADER: i32 = 1;
    pub const COULD_NOT_DECODE_HEADER: i32 = 2;
    pub const NOT_RIFF: i32 = 3;
    pub const NOT_WAV: i32 = 4;
    pub const CHUNK_ERROR: i32 = 5;
    pub const COULD_NOT_DECODE: i32 = 6;
    pub const LOAD_MIDI_FAILURE: i32 = 7;
    pub const LOAD_SOUNDFONT_FAILURE: i32 = 8;
}

/// Unified error type for the decoder layer.
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    /// Partial input while reading a container header.
    #[error("not enough data for header")]
    NotEnoughDataForHeader,

    /// Container or codec header unrecognized or corrupt.
    #[error("could not decode header: {0}")]
    CouldNotDecodeHeader(String),

    /// The stream is not RIFF-framed.
    #[error("input is not a RIFF stream")]
    NotRiff,

    /// RIFF stream without a WAVE form.
    #[error("input is not a WAV stream")]
    NotWav,

    /// A RIFF chunk failed to parse.
    #[error("chunk error")]
    ChunkError,

    /// Codec rejected the stream outright.
    #[error("could not decode: {0}")]
    CouldNotDecode(String),

    /// The MIDI file could not be loaded.
    #[error("failed to load MIDI file: {0}")]
    LoadMidiFailure(String),

    /// The soundfont could not be loaded.
    #[error("failed to load soundfont: {0}")]
    LoadSoundFontFailure(String),

    /// An upstream status preserved untranslated.
    #[error("upstream failure in {domain}: {code}")]
    Upstream { domain: &'static str, code: i32 },

    /// DASH primitive failure.
    #[error(transparent)]
    Dash(#[from] pcmflow_dash::DashError),
}

impl DecoderError {
    pub fn could_not_decode<E: std::fmt::Display>(e: E) -> Self {
        DecoderError::CouldNotDecode(e.to_string())
    }

    pub fn header<E: std::fmt::Display>(e: E) -> Self {
        DecoderError::CouldNotDecodeHeader(e.to_string())
    }

    /// Error code reported through the error callback. Upstream codes pass
    /// through untranslated.
    pub fn code(&self) -> i32 {
        match self {
            DecoderError::NotEnoughDataForHeader => codes::NOT_ENOUGH_DATA_FOR_HEADER,
            DecoderError::CouldNotDecodeHeader(_) => codes::COULD_NOT_DECODE_HEADER,
            DecoderError::NotRiff => codes::NOT_RIFF,
            DecoderError::NotWav => codes::NOT_WAV,
            DecoderError::ChunkError => codes::CHUNK_ERROR,
            DecoderError::CouldNotDecode(_) => codes::COULD_NOT_DECODE,
            DecoderError::LoadMidiFailure(_) => codes::LOAD_MIDI_FAILURE,
            DecoderError::LoadSoundFontFailure(_) => codes::LOAD_SOUNDFONT_FAILURE,
            DecoderError::Upstream { code, .. } => *code,
            DecoderError::Dash(e) => e.code(),
        }
    }
}
