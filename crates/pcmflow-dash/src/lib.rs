//! DASH MP4 primitives for the `pcmflow` decoder stack.
//!
//! Three concerns live here, all operating on ISO-BMFF bytes pulled through a
//! `pcmflow_source::DataProvider`:
//! - [`SegmentIndex`]: the parsed SIDX segment table (durations, sizes,
//!   prefix-sum byte ranges);
//! - [`CencScanner`]: the inline SIDX/TENC/MOOF/TRUN/SENC scanner that
//!   extracts per-sample encryption IVs during the read path without moving
//!   the provider's cursor;
//! - [`TransmuxSession`]: the fMP4 → ADTS repackager that converts one DASH
//!   segment at a time into a byte stream a plain AAC decoder consumes,
//!   decrypting samples on the way when a [`Decryptor`] is configured.

mod cenc;
mod error;
mod index;
mod scanner;
mod transmux;

pub use crate::cenc::{
    expand_iv, CencDecryptor, Decryptor, DecryptorFactory, DECRYPTER_SUCCESS, KEY_ID_LEN,
};
pub use crate::error::{DashError, DashResult};
pub use crate::index::{SegmentEntry, SegmentIndex};
pub use crate::scanner::CencScanner;
pub use crate::transmux::{AudioSpecificConfig, TransmuxSession, DASH_FILE_INDICATOR, DASH_FILE_INDICATOR_OFFSET};
