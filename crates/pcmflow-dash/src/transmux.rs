//! fMP4 → ADTS repackaging.
//!
//! A [`TransmuxSession`] converts one DASH segment at a time into an ADTS
//! byte stream that a plain AAC decoder consumes. `parse_index` digests the
//! file head (init segment + SIDX) once per session; `transmux_segment`
//! walks a segment's MOOF/TRUN/MDAT, optionally decrypts each sample with
//! the configured [`Decryptor`], and prefixes every sample with a 7-byte
//! ADTS header.

use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::cenc::{expand_iv, Decryptor, DECRYPTER_SUCCESS, KEY_ID_LEN};
use crate::error::{DashError, DashResult};
use crate::index::{SegmentEntry, SegmentIndex};

/// DASH brand probe: these bytes at [`DASH_FILE_INDICATOR_OFFSET`] identify
/// a file the transmuxer should claim.
pub const DASH_FILE_INDICATOR: &[u8; 9] = b"ftypdash\0";
pub const DASH_FILE_INDICATOR_OFFSET: i64 = 4;

/// The two bytes of AudioSpecificConfig that matter for ADTS framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    /// Audio object type (2 = AAC-LC).
    pub object_type: u8,
    /// Sampling frequency index per the shared table.
    pub frequency_index: u8,
    /// Channel configuration.
    pub channel_config: u8,
}

const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

impl AudioSpecificConfig {
    /// Decode the leading two bytes of an AudioSpecificConfig.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 2 {
            return None;
        }
        Some(Self {
            object_type: bytes[0] >> 3,
            frequency_index: ((bytes[0] & 0x07) << 1) | (bytes[1] >> 7),
            channel_config: (bytes[1] >> 3) & 0x0F,
        })
    }

    pub fn sample_rate(&self) -> Option<u32> {
        SAMPLE_RATES.get(self.frequency_index as usize).copied()
    }

    /// 7-byte ADTS header for a frame of `payload_len` bytes.
    fn adts_header(&self, payload_len: usize) -> [u8; 7] {
        let frame_len = payload_len + 7;
        let profile = self.object_type.saturating_sub(1) & 0x03;
        [
            0xFF,
            0xF1,
            (profile << 6)
                | ((self.frequency_index & 0x0F) << 2)
                | ((self.channel_config >> 2) & 0x01),
            ((self.channel_config & 0x03) << 6) | (((frame_len >> 11) & 0x03) as u8),
            ((frame_len >> 3) & 0xFF) as u8,
            (((frame_len & 0x07) << 5) as u8) | 0x1F,
            0xFC,
        ]
    }
}

/// One transmux session: parsed audio configuration, optional decryptor,
/// and the default key id from the init segment's TENC box.
pub struct TransmuxSession {
    asc: Option<AudioSpecificConfig>,
    key_id: [u8; KEY_ID_LEN],
    decryptor: Option<Arc<dyn Decryptor>>,
}

impl TransmuxSession {
    pub fn new() -> Self {
        Self {
            asc: None,
            key_id: [0; KEY_ID_LEN],
            decryptor: None,
        }
    }

    /// Bind a per-sample decryptor, as discovered key material dictates.
    pub fn set_decryptor(&mut self, decryptor: Arc<dyn Decryptor>) {
        self.decryptor = Some(decryptor);
    }

    /// The audio configuration parsed from the init segment.
    pub fn audio_config(&self) -> Option<AudioSpecificConfig> {
        self.asc
    }

    /// Digest the head of the file: init segment (audio config, TENC key
    /// id) and the SIDX segment table.
    pub fn parse_index(&mut self, data: &[u8]) -> DashResult<SegmentIndex> {
        self.asc = find_audio_config(data);
        if let Some(tenc_at) = find_tag(data, b"tenc") {
            let key_at = tenc_at + 4 + 8;
            if data.len() >= key_at + KEY_ID_LEN {
                self.key_id
                    .copy_from_slice(&data[key_at..key_at + KEY_ID_LEN]);
            }
        }

        let sidx_at = find_tag(data, b"sidx").ok_or(DashError::NoSidx(data.len()))?;
        let index = parse_sidx_at(data, sidx_at)?;
        if self.asc.is_none() {
            return Err(DashError::NoAudioConfig);
        }
        debug!(
            segments = index.len(),
            timescale = index.timescale,
            "dash index parsed"
        );
        Ok(index)
    }

    /// Repackage one segment (`data` holds its referenced bytes) into ADTS.
    pub fn transmux_segment(&self, segment_index: usize, data: &[u8]) -> DashResult<Bytes> {
        let asc = self.asc.ok_or(DashError::NoAudioConfig)?;

        let moof = find_box(data, b"moof")
            .ok_or_else(|| DashError::malformed(segment_index, "missing moof"))?;
        let traf = find_box(moof, b"traf").unwrap_or(moof);
        let sizes = parse_trun_sizes(traf)
            .ok_or_else(|| DashError::malformed(segment_index, "missing trun sample sizes"))?;
        let ivs = parse_senc_ivs(traf);

        let mdat = find_box(data, b"mdat")
            .ok_or_else(|| DashError::malformed(segment_index, "missing mdat"))?;

        let mut out = BytesMut::with_capacity(mdat.len() + sizes.len() * 7);
        let mut cursor = 0usize;
        for (k, size) in sizes.iter().enumerate() {
            let size = *size as usize;
            if cursor + size > mdat.len() {
                return Err(DashError::malformed(segment_index, "mdat shorter than trun"));
            }
            let sample = &mdat[cursor..cursor + size];
            cursor += size;

            out.put_slice(&asc.adts_header(size));
            match (&self.decryptor, ivs.get(k)) {
                (Some(decryptor), Some(iv)) => {
                    let mut clear = vec![0u8; size];
                    let status =
                        decryptor.decrypt(sample, &mut clear, &self.key_id, &expand_iv(*iv));
                    if status != DECRYPTER_SUCCESS {
                        // Leave the ciphertext unchanged; the codec will
                        // surface the damage downstream.
                        trace!(segment = segment_index, sample = k, status, "decrypt failed");
                        out.put_slice(sample);
                    } else {
                        out.put_slice(&clear);
                    }
                }
                _ => out.put_slice(sample),
            }
        }
        Ok(out.freeze())
    }
}

impl Default for TransmuxSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a SIDX box whose tag starts at `at`, using the 12-byte
/// `{skipped, duration, size}` reference layout.
fn parse_sidx_at(data: &[u8], at: usize) -> DashResult<SegmentIndex> {
    let count_at = at + 4 + 22;
    if data.len() < count_at + 2 {
        return Err(DashError::not_enough_data("sidx", count_at + 2, data.len()));
    }
    let timescale = BigEndian::read_u32(&data[at + 4 + 8..]);
    let count = BigEndian::read_u16(&data[count_at..]) as usize;
    let entries_at = count_at + 2;
    let end = entries_at + count * 12;
    if data.len() < end {
        return Err(DashError::not_enough_data("sidx entries", end, data.len()));
    }
    let mut entries = Vec::with_capacity(count);
    for j in 0..count {
        let e = &data[entries_at + j * 12..entries_at + (j + 1) * 12];
        entries.push(SegmentEntry {
            duration: BigEndian::read_u32(&e[4..8]),
            size: BigEndian::read_u32(&e[8..12]),
        });
    }
    Ok(SegmentIndex {
        timescale,
        base_offset: end as u64,
        entries,
    })
}

/// Naive four-byte tag search (tag position, not box start).
fn find_tag(data: &[u8], tag: &[u8; 4]) -> Option<usize> {
    data.windows(4).position(|w| w == tag)
}

/// Walk properly sized top-level boxes in `data` and return the body of the
/// first box named `tag`.
fn find_box<'a>(data: &'a [u8], tag: &[u8; 4]) -> Option<&'a [u8]> {
    let mut pos = 0usize;
    while pos + 8 <= data.len() {
        let size = BigEndian::read_u32(&data[pos..]) as usize;
        let name = &data[pos + 4..pos + 8];
        let (body_start, body_end) = if size == 0 {
            (pos + 8, data.len())
        } else if size < 8 || pos + size > data.len() {
            return None;
        } else {
            (pos + 8, pos + size)
        };
        if name == tag {
            return Some(&data[body_start..body_end]);
        }
        if size == 0 {
            return None;
        }
        pos += size;
    }
    None
}

/// Recursively look for a box body under nested containers.
fn find_box_path<'a>(data: &'a [u8], path: &[&[u8; 4]]) -> Option<&'a [u8]> {
    let mut current = data;
    for tag in path {
        current = find_box(current, tag)?;
    }
    Some(current)
}

/// Per-sample sizes from the TRUN (honoring tfhd default sample size).
fn parse_trun_sizes(traf: &[u8]) -> Option<Vec<u32>> {
    let trun = find_box(traf, b"trun")?;
    if trun.len() < 8 {
        return None;
    }
    let flags = BigEndian::read_u32(&trun[0..]) & 0x00FF_FFFF;
    let sample_count = BigEndian::read_u32(&trun[4..]) as usize;
    let mut pos = 8usize;
    if flags & 0x000001 != 0 {
        pos += 4; // data offset
    }
    if flags & 0x000004 != 0 {
        pos += 4; // first sample flags
    }
    let duration_present = flags & 0x000100 != 0;
    let size_present = flags & 0x000200 != 0;
    let flags_present = flags & 0x000400 != 0;
    let cto_present = flags & 0x000800 != 0;

    if !size_present {
        let tfhd = find_box(traf, b"tfhd")?;
        let tfhd_flags = BigEndian::read_u32(&tfhd[0..]) & 0x00FF_FFFF;
        let mut tpos = 8usize; // fullbox + track id
        if tfhd_flags & 0x000001 != 0 {
            tpos += 8;
        }
        if tfhd_flags & 0x000002 != 0 {
            tpos += 4;
        }
        if tfhd_flags & 0x000008 != 0 {
            tpos += 4;
        }
        if tfhd_flags & 0x000010 == 0 || tfhd.len() < tpos + 4 {
            return None;
        }
        let default_size = BigEndian::read_u32(&tfhd[tpos..]);
        return Some(vec![default_size; sample_count]);
    }

    let mut sizes = Vec::with_capacity(sample_count);
    for _ in 0..sample_count {
        if duration_present {
            pos += 4;
        }
        if trun.len() < pos + 4 {
            return None;
        }
        sizes.push(BigEndian::read_u32(&trun[pos..]));
        pos += 4;
        if flags_present {
            pos += 4;
        }
        if cto_present {
            pos += 4;
        }
    }
    Some(sizes)
}

/// SENC IVs (8-byte, no subsample records).
fn parse_senc_ivs(traf: &[u8]) -> Vec<u64> {
    let Some(senc) = find_box(traf, b"senc") else {
        return Vec::new();
    };
    if senc.len() < 8 {
        return Vec::new();
    }
    let count = BigEndian::read_u32(&senc[4..]) as usize;
    let mut ivs = Vec::with_capacity(count);
    for k in 0..count {
        let at = 8 + k * 8;
        if senc.len() < at + 8 {
            break;
        }
        ivs.push(BigEndian::read_u64(&senc[at..]));
    }
    ivs
}

/// Locate the AudioSpecificConfig inside the init segment's `esds`.
fn find_audio_config(data: &[u8]) -> Option<AudioSpecificConfig> {
    let stsd = find_box_path(
        data,
        &[b"moov", b"trak", b"mdia", b"minf", b"stbl", b"stsd"],
    )?;
    // Fullbox header + entry count precede the sample entries.
    let entries = stsd.get(8..)?;
    let mp4a = find_box(entries, b"mp4a")?;
    // AudioSampleEntry: 6 reserved + 2 data-reference + 8 + 2 channels +
    // 2 sample size + 4 + 4 sample rate, then child boxes.
    let children = mp4a.get(28..)?;
    let esds = find_box(children, b"esds")?;
    let asc = walk_esds(esds.get(4..)?)?;
    AudioSpecificConfig::parse(asc)
}

/// Walk the ES descriptor chain down to DecoderSpecificInfo (tag 0x05).
fn walk_esds(mut d: &[u8]) -> Option<&[u8]> {
    // ES_Descr
    let (tag, len, body) = read_descriptor(d)?;
    if tag != 0x03 {
        return None;
    }
    d = &body[..len.min(body.len())];
    // ES_ID + stream priority flags byte
    d = d.get(3..)?;
    // DecoderConfigDescriptor
    let (tag, len, body) = read_descriptor(d)?;
    if tag != 0x04 {
        return None;
    }
    d = &body[..len.min(body.len())];
    // object type + stream type + buffer size + bitrates
    d = d.get(13..)?;
    // DecoderSpecificInfo
    let (tag, len, body) = read_descriptor(d)?;
    if tag != 0x05 {
        return None;
    }
    body.get(..len.min(body.len()))
}

/// Read one `(tag, length, body)` descriptor with 7-bit length coding.
fn read_descriptor(d: &[u8]) -> Option<(u8, usize, &[u8])> {
    let tag = *d.first()?;
    let mut len = 0usize;
    let mut pos = 1usize;
    for _ in 0..4 {
        let b = *d.get(pos)?;
        pos += 1;
        len = (len << 7) | usize::from(b & 0x7F);
        if b & 0x80 == 0 {
            break;
        }
    }
    Some((tag, len, d.get(pos..)?))
}
