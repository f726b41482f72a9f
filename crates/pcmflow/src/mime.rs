//! MIME constants and path-extension inference.

use regex::Regex;

pub const MIME_TYPE_MP2TS: &str = "mp2ts";
pub const MIME_TYPE_VIDEO_MP2TS: &str = "video/mp2ts";
pub const MIME_TYPE_AUDIO_MP2TS: &str = "audio/mp2ts";
pub const MPEG2TS_MIME_TYPES: &[&str] = &[
    MIME_TYPE_MP2TS,
    MIME_TYPE_VIDEO_MP2TS,
    MIME_TYPE_AUDIO_MP2TS,
];

pub const MIME_TYPE_OGG: &str = "ogg";
pub const MIME_TYPE_AUDIO_OGG: &str = "audio/ogg";
pub const MIME_TYPE_APPLICATION_OGG: &str = "application/ogg";
pub const OGG_MIME_TYPES: &[&str] = &[MIME_TYPE_OGG, MIME_TYPE_AUDIO_OGG, MIME_TYPE_APPLICATION_OGG];

pub const MIME_TYPE_WAV: &str = "audio/wav";
pub const WAV_MIME_TYPES: &[&str] = &["audio/wav", "audio/x-wav", "audio/wave", "audio/x-pn-wave"];

pub const MIME_TYPE_FLAC: &str = "flac";
pub const MIME_TYPE_AUDIO_FLAC: &str = "audio/flac";
pub const FLAC_MIME_TYPES: &[&str] = &[MIME_TYPE_FLAC, MIME_TYPE_AUDIO_FLAC];

pub const MIME_TYPE_DASH_MP4: &str = "dash/mp4";
pub const DASH_MP4_MIME_TYPES: &[&str] = &[MIME_TYPE_DASH_MP4];

pub const MIME_TYPE_MP3: &str = "audio/mpeg";
pub const MP3_MIME_TYPES: &[&str] = &[MIME_TYPE_MP3];

pub const MIME_TYPE_MIDI: &str = "midi";
pub const MIDI_MIME_TYPES: &[&str] = &[MIME_TYPE_MIDI];

pub const MIME_TYPE_SPEEX: &str = "audio/x-speex";
pub const MIME_TYPE_AUDIO_SPEEX: &str = "audio/speex";
pub const SPEEX_MIME_TYPES: &[&str] = &[MIME_TYPE_SPEEX, MIME_TYPE_AUDIO_SPEEX];

/// One extension → MIME inference rule.
pub(crate) struct ExtensionRule {
    pub mime: &'static str,
    pub pattern: Regex,
}

/// Build an ordered `(mime, path regex)` table from `(mime, pattern)` pairs.
pub(crate) fn extension_rules(pairs: &[(&'static str, &str)]) -> Vec<ExtensionRule> {
    pairs
        .iter()
        .map(|(mime, pattern)| ExtensionRule {
            mime,
            pattern: Regex::new(pattern).expect("extension pattern must compile"),
        })
        .collect()
}

/// Resolve the effective MIME: the caller's value when non-empty, else the
/// first rule whose pattern matches the whole path.
pub(crate) fn effective_mime<'a>(
    path: &str,
    mime: &'a str,
    rules: &[ExtensionRule],
) -> Option<&'a str> {
    if !mime.is_empty() {
        return Some(mime);
    }
    rules
        .iter()
        .find(|rule| rule.pattern.is_match(path))
        .map(|rule| rule.mime)
}
