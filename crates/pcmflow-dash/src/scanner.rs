//! Inline SIDX/TENC/MOOF/TRUN/SENC scanner.
//!
//! Runs inside a decoder's byte-pull path while decryption is active: every
//! buffer handed to the codec is also searched for the MP4 boxes the codec
//! layer hides. The scanner may pull additional bytes from the provider to
//! complete a partially observed structure, but it never leaves the
//! provider's read cursor moved: the position is snapshotted before any
//! extra pull and restored afterwards.
//!
//! All multi-byte integers are big-endian per ISO BMFF and converted to host
//! order on read.

use std::collections::HashMap;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use tracing::{debug, trace};

use pcmflow_source::{DataProvider, Whence};

use crate::cenc::KEY_ID_LEN;
use crate::index::{SegmentEntry, SegmentIndex};

const SIDX: &[u8; 4] = b"sidx";
const TENC: &[u8; 4] = b"tenc";
const MOOF: &[u8; 4] = b"moof";
const TRUN: &[u8; 4] = b"trun";
const SENC: &[u8; 4] = b"senc";

/// Byte distance from the `sidx` tag to the 16-bit reference count.
const SIDX_COUNT_OFFSET: usize = 22;
/// Byte distance from the `tenc` tag to the default key id.
const TENC_KEY_ID_OFFSET: usize = 8;
/// Byte distance from the `trun` tag to the 16-bit sample count.
const TRUN_COUNT_OFFSET: usize = 6;
/// Size of one parsed SIDX reference.
const SIDX_ENTRY_LEN: usize = 12;

/// Streaming box scanner collecting the segment table, the default key id,
/// and the per-sample IVs needed for CENC decryption.
pub struct CencScanner {
    found_sidx: bool,
    index: SegmentIndex,
    key_id: Option<[u8; KEY_ID_LEN]>,
    ivs: HashMap<u64, u64>,
    packets_per_moof: u64,
}

impl Default for CencScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl CencScanner {
    pub fn new() -> Self {
        Self {
            found_sidx: false,
            index: SegmentIndex::default(),
            key_id: None,
            ivs: HashMap::new(),
            packets_per_moof: 0,
        }
    }

    /// Whether a SIDX has been seen yet.
    pub fn found_sidx(&self) -> bool {
        self.found_sidx
    }

    /// The segment table recovered from the SIDX, if any.
    pub fn index(&self) -> &SegmentIndex {
        &self.index
    }

    /// Default key id from the TENC box.
    pub fn key_id(&self) -> Option<&[u8; KEY_ID_LEN]> {
        self.key_id.as_ref()
    }

    /// IV for the given packet entry index, if one was extracted.
    pub fn iv_for_entry(&self, entry_index: u64) -> Option<u64> {
        self.ivs.get(&entry_index).copied()
    }

    /// Override the packets-per-MOOF stride used to key IVs.
    ///
    /// When unset, the stride is taken from the first TRUN sample count.
    pub fn set_packets_per_moof(&mut self, packets: u64) {
        if packets > 0 {
            self.packets_per_moof = packets;
        }
    }

    /// Scan `just_read`, the bytes a codec pull has produced, whose final
    /// byte sits at provider position `tell` (i.e. the read started at
    /// `tell - just_read.len()`).
    ///
    /// Extra bytes needed to complete a structure are pulled from
    /// `provider`; its position is restored before returning.
    pub fn scan_after_read(&mut self, provider: &Arc<dyn DataProvider>, just_read: &[u8]) {
        if just_read.len() < 4 {
            return;
        }
        let tell = provider.tell();
        let read_start = (tell - just_read.len() as i64).max(0);
        let mut window = Window {
            data: just_read.to_vec(),
            provider,
        };

        if !self.found_sidx {
            self.scan_headers(&mut window, read_start as u64);
        }
        if self.found_sidx {
            self.scan_moofs(&mut window, read_start as u64);
        }

        if provider.tell() != tell {
            provider.seek(tell, Whence::Set);
        }
    }

    /// First pass: locate `sidx` (segment table) and `tenc` (key id).
    fn scan_headers(&mut self, window: &mut Window<'_>, read_start: u64) {
        let mut i = 0usize;
        while i + 4 <= window.len() {
            if window.matches(i, SIDX) {
                if self.parse_sidx(window, i, read_start) {
                    self.found_sidx = true;
                }
            } else if window.matches(i, TENC) {
                self.parse_tenc(window, i);
            }
            i += 1;
        }
    }

    fn parse_sidx(&mut self, window: &mut Window<'_>, at: usize, read_start: u64) -> bool {
        let count_at = at + SIDX.len() + SIDX_COUNT_OFFSET;
        if !window.ensure(count_at + 2) {
            return false;
        }
        let count = BigEndian::read_u16(&window.data[count_at..]) as usize;
        // Timescale sits right after the version/flags and reference id.
        let timescale_at = at + SIDX.len() + 8;
        let timescale = BigEndian::read_u32(&window.data[timescale_at..]);

        let entries_at = count_at + 2;
        if !window.ensure(entries_at + count * SIDX_ENTRY_LEN) {
            return false;
        }
        let mut entries = Vec::with_capacity(count);
        for j in 0..count {
            let entry_at = entries_at + j * SIDX_ENTRY_LEN;
            let entry = &window.data[entry_at..entry_at + SIDX_ENTRY_LEN];
            // {u32 skipped, u32 subsegment_duration, u32 referenced_size}
            entries.push(SegmentEntry {
                duration: BigEndian::read_u32(&entry[4..8]),
                size: BigEndian::read_u32(&entry[8..12]),
            });
        }
        let base_offset = read_start + (entries_at + count * SIDX_ENTRY_LEN) as u64;
        debug!(
            segments = entries.len(),
            timescale, base_offset, "sidx parsed"
        );
        self.index = SegmentIndex {
            timescale,
            base_offset,
            entries,
        };
        true
    }

    fn parse_tenc(&mut self, window: &mut Window<'_>, at: usize) {
        let key_at = at + TENC.len() + TENC_KEY_ID_OFFSET;
        if !window.ensure(key_at + KEY_ID_LEN) {
            return;
        }
        let mut key_id = [0u8; KEY_ID_LEN];
        key_id.copy_from_slice(&window.data[key_at..key_at + KEY_ID_LEN]);
        debug!("tenc default key id recorded");
        self.key_id = Some(key_id);
    }

    /// Second pass: walk MOOF boxes and harvest SENC IVs keyed by
    /// `moof_index * packets_per_moof + sample`.
    fn scan_moofs(&mut self, window: &mut Window<'_>, read_start: u64) {
        let mut i = 0usize;
        while i + 4 <= window.len() {
            if !window.matches(i, MOOF) {
                i += 1;
                continue;
            }
            let Some(moof_index) = self.index.segment_at_offset(read_start + i as u64) else {
                i += 1;
                continue;
            };
            let moof_size = self.index.entries[moof_index].size as usize;
            if !window.ensure(i + moof_size) {
                return;
            }

            let mut trun_count = 0u64;
            let mut j = 0usize;
            while j + 4 <= moof_size {
                let at = i + j;
                if window.matches(at, TRUN) {
                    let count_at = at + TRUN.len() + TRUN_COUNT_OFFSET;
                    if window.ensure(count_at + 2) {
                        trun_count = u64::from(BigEndian::read_u16(&window.data[count_at..]));
                    }
                } else if window.matches(at, SENC) {
                    self.parse_senc(window, at, moof_index as u64, trun_count);
                }
                j += 1;
            }
            i += 1;
        }
    }

    fn parse_senc(&mut self, window: &mut Window<'_>, at: usize, moof_index: u64, trun_count: u64) {
        let count_at = at + SENC.len() + 4;
        if !window.ensure(count_at + 4) {
            return;
        }
        let iv_count = BigEndian::read_u32(&window.data[count_at..]) as usize;
        let ivs_at = count_at + 4;
        if !window.ensure(ivs_at + iv_count * 8) {
            return;
        }
        if self.packets_per_moof == 0 {
            self.packets_per_moof = if trun_count > 0 {
                trun_count
            } else {
                iv_count as u64
            };
        }
        let base = moof_index * self.packets_per_moof;
        for k in 0..iv_count {
            let iv = BigEndian::read_u64(&window.data[ivs_at + k * 8..]);
            self.ivs.insert(base + k as u64, iv);
        }
        trace!(moof = moof_index, ivs = iv_count, "senc IVs recorded");
    }
}

/// A bounded view over the just-read bytes that can grow by pulling more
/// data from the provider.
struct Window<'a> {
    data: Vec<u8>,
    provider: &'a Arc<dyn DataProvider>,
}

impl Window<'_> {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn matches(&self, at: usize, tag: &[u8; 4]) -> bool {
        self.data.len() >= at + 4 && &self.data[at..at + 4] == tag
    }

    /// Make sure at least `total` bytes are available, reading the shortfall
    /// from the provider. Returns false when the stream ends early.
    fn ensure(&mut self, total: usize) -> bool {
        if self.data.len() >= total {
            return true;
        }
        let missing = total - self.data.len();
        let old_len = self.data.len();
        self.data.resize(total, 0);
        let got = self.provider.read(&mut self.data[old_len..], 1, missing);
        self.data.truncate(old_len + got);
        self.data.len() >= total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcmflow_source::{ErrorCallback, FileDataProvider};
    use std::io::Write;

    fn be16(v: u16) -> [u8; 2] {
        v.to_be_bytes()
    }
    fn be32(v: u32) -> [u8; 4] {
        v.to_be_bytes()
    }
    fn be64(v: u64) -> [u8; 8] {
        v.to_be_bytes()
    }

    /// Build a minimal stream: sidx with `sizes`, then a tenc, then MOOFs of
    /// exactly the referenced sizes each holding a trun + senc.
    fn build_stream(sizes: &[u32], ivs_per_moof: usize) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(SIDX);
        out.extend_from_slice(&[0u8; 8]); // version/flags + reference id
        out.extend_from_slice(&be32(44100)); // timescale
        out.extend_from_slice(&[0u8; 10]); // EPT + first offset + reserved
        out.extend_from_slice(&be16(sizes.len() as u16));
        for (i, size) in sizes.iter().enumerate() {
            out.extend_from_slice(&be32(0));
            out.extend_from_slice(&be32(44100 * (i as u32 + 1)));
            out.extend_from_slice(&be32(*size));
        }

        for (m, size) in sizes.iter().enumerate() {
            let mut moof = Vec::new();
            moof.extend_from_slice(MOOF);
            moof.extend_from_slice(&[0u8; 4]);
            moof.extend_from_slice(TRUN);
            moof.extend_from_slice(&[0u8; 6]);
            moof.extend_from_slice(&be16(ivs_per_moof as u16));
            moof.extend_from_slice(SENC);
            moof.extend_from_slice(&[0u8; 4]);
            moof.extend_from_slice(&be32(ivs_per_moof as u32));
            for k in 0..ivs_per_moof {
                moof.extend_from_slice(&be64((m * ivs_per_moof + k + 1) as u64));
            }
            assert!(moof.len() <= *size as usize, "fixture moof too large");
            moof.resize(*size as usize, 0);
            out.extend_from_slice(&moof);
        }
        out
    }

    fn noop_error() -> ErrorCallback {
        Arc::new(|_, _| {})
    }

    fn provider_with(data: &[u8]) -> Arc<dyn DataProvider> {
        let path = std::env::temp_dir().join(format!(
            "pcmflow-scanner-test-{}-{}",
            std::process::id(),
            data.len()
        ));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        let p: Arc<dyn DataProvider> =
            Arc::new(FileDataProvider::new(path.to_string_lossy().into_owned()));
        p.clone().load(noop_error(), Box::new(|_| {}));
        p
    }

    #[test]
    fn sidx_prefix_sums_match_moof_offsets() {
        let sizes = [64u32, 72, 80];
        let stream = build_stream(&sizes, 2);
        let provider = provider_with(&stream);

        // Simulate the codec pulling the whole stream in one read.
        let mut buf = vec![0u8; stream.len()];
        let buf_len = buf.len();
        let n = provider.read(&mut buf, 1, buf_len);
        buf.truncate(n);

        let mut scanner = CencScanner::new();
        scanner.scan_after_read(&provider, &buf);

        assert!(scanner.found_sidx());
        let index = scanner.index();
        assert_eq!(index.len(), 3);
        assert_eq!(index.timescale, 44100);

        // The base offset points at the first MOOF, and prefix sums land on
        // each subsequent MOOF tag.
        for (i, _) in sizes.iter().enumerate() {
            let (start, _) = index.byte_range(i).unwrap();
            assert_eq!(&stream[start as usize..start as usize + 4], MOOF);
        }
    }

    #[test]
    fn senc_ivs_are_keyed_by_entry_index() {
        let sizes = [64u32, 72];
        let stream = build_stream(&sizes, 2);
        let provider = provider_with(&stream);

        let mut buf = vec![0u8; stream.len()];
        let buf_len = buf.len();
        let n = provider.read(&mut buf, 1, buf_len);
        buf.truncate(n);

        let mut scanner = CencScanner::new();
        scanner.scan_after_read(&provider, &buf);

        // Fixture IVs count up from 1 in entry order.
        assert_eq!(scanner.iv_for_entry(0), Some(1));
        assert_eq!(scanner.iv_for_entry(1), Some(2));
        assert_eq!(scanner.iv_for_entry(2), Some(3));
        assert_eq!(scanner.iv_for_entry(3), Some(4));
        assert_eq!(scanner.iv_for_entry(4), None);
    }

    #[test]
    fn tenc_key_id_is_recorded() {
        let mut stream = Vec::new();
        stream.extend_from_slice(TENC);
        stream.extend_from_slice(&[0u8; TENC_KEY_ID_OFFSET]);
        stream.extend_from_slice(&[0xAB; KEY_ID_LEN]);
        let provider = provider_with(&stream);

        let mut buf = vec![0u8; stream.len()];
        let buf_len = buf.len();
        let n = provider.read(&mut buf, 1, buf_len);
        buf.truncate(n);

        let mut scanner = CencScanner::new();
        scanner.scan_after_read(&provider, &buf);
        assert_eq!(scanner.key_id(), Some(&[0xAB; KEY_ID_LEN]));
    }
}
