//! Crate error type.

/// Result type used by this crate.
pub type DashResult<T> = Result<T, DashError>;

/// Error codes reported through the decoder error callback for the
/// transmuxer domain.
pub mod codes {
    pub const NOT_ENOUGH_DATA: i32 = 1;
    pub const NO_SIDX: i32 = 2;
    pub const NO_AUDIO_CONFIG: i32 = 3;
    pub const MALFORMED_SEGMENT: i32 = 4;
    pub const COULD_NOT_DECRYPT: i32 = 5;
}

/// Unified error type for the `pcmflow-dash` crate.
#[derive(Debug, thiserror::Error)]
pub enum DashError {
    /// The byte window ended before a complete structure was parsed.
    #[error("not enough data parsing {context}: need {needed} bytes at offset {offset}")]
    NotEnoughData {
        context: &'static str,
        needed: usize,
        offset: usize,
    },

    /// No SIDX box was found in the index range.
    #[error("no sidx box found in index range ({0} bytes)")]
    NoSidx(usize),

    /// The init segment carried no usable audio sample description.
    #[error("no AAC audio configuration found in init segment")]
    NoAudioConfig,

    /// A segment's MOOF/TRUN/MDAT structure did not line up.
    #[error("malformed segment {segment}: {message}")]
    MalformedSegment { segment: usize, message: String },

    /// The configured decryptor rejected a sample.
    #[error("sample decryption failed with status {0}")]
    DecryptFailed(i32),
}

impl DashError {
    pub fn not_enough_data(context: &'static str, needed: usize, offset: usize) -> Self {
        DashError::NotEnoughData {
            context,
            needed,
            offset,
        }
    }

    pub fn malformed(segment: usize, message: impl Into<String>) -> Self {
        DashError::MalformedSegment {
            segment,
            message: message.into(),
        }
    }

    /// Error domain reported through the error callback.
    pub fn domain(&self) -> &'static str {
        "com.nativeformat.decoder.dash2hlstransmuxer"
    }

    /// Error code reported through the error callback.
    pub fn code(&self) -> i32 {
        match self {
            DashError::NotEnoughData { .. } => codes::NOT_ENOUGH_DATA,
            DashError::NoSidx(_) => codes::NO_SIDX,
            DashError::NoAudioConfig => codes::NO_AUDIO_CONFIG,
            DashError::MalformedSegment { .. } => codes::MALFORMED_SEGMENT,
            DashError::DecryptFailed(_) => codes::COULD_NOT_DECRYPT,
        }
    }
}
