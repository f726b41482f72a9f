//! DASH detection, index math, and transmux routing.
//!
//! Fixtures are synthesized fMP4 skeletons: real box framing and sample
//! tables around placeholder AAC payloads. That is enough to exercise
//! detection, index parsing, segment repackaging, and the transmuxer's
//! frame arithmetic; payload decode itself needs real encoder output.

use pcmflow::Factory;
use pcmflow_dash::{SegmentIndex, TransmuxSession};
use pcmflow_tests::{blocking_create_decoder_with_errors, temp_media_file};

// 0x12 0x10: AAC-LC, 44100 Hz, stereo.
const ASC: [u8; 2] = [0x12, 0x10];

fn boxed(tag: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 8);
    out.extend_from_slice(&((body.len() + 8) as u32).to_be_bytes());
    out.extend_from_slice(tag);
    out.extend_from_slice(body);
    out
}

fn esds_box(asc: &[u8]) -> Vec<u8> {
    let mut dsi = vec![0x05, asc.len() as u8];
    dsi.extend_from_slice(asc);
    let mut dcd = vec![0x04, (13 + dsi.len()) as u8];
    dcd.extend_from_slice(&[0x40, 0x15, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    dcd.extend_from_slice(&dsi);
    let mut es = vec![0x03, (3 + dcd.len()) as u8, 0, 0, 0];
    es.extend_from_slice(&dcd);
    let mut body = vec![0, 0, 0, 0];
    body.extend_from_slice(&es);
    boxed(b"esds", &body)
}

/// `ftyp` with the `dash` major brand plus a minimal moov carrying the AAC
/// sample description.
fn dash_init_segment() -> Vec<u8> {
    let esds = esds_box(&ASC);
    let mut mp4a_body = vec![0u8; 28];
    mp4a_body[17] = 2;
    mp4a_body.extend_from_slice(&esds);
    let mp4a = boxed(b"mp4a", &mp4a_body);
    let mut stsd_body = vec![0, 0, 0, 0, 0, 0, 0, 1];
    stsd_body.extend_from_slice(&mp4a);
    let moov = boxed(
        b"moov",
        &boxed(
            b"trak",
            &boxed(
                b"mdia",
                &boxed(b"minf", &boxed(b"stbl", &boxed(b"stsd", &stsd_body))),
            ),
        ),
    );

    let mut out = boxed(b"ftyp", b"dash\0\0\0\0iso6");
    out.extend_from_slice(&moov);
    out
}

fn sidx_box(entries: &[(u32, u32)], timescale: u32) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&[0u8; 8]); // version/flags + reference id
    body.extend_from_slice(&timescale.to_be_bytes());
    body.extend_from_slice(&[0u8; 10]);
    body.extend_from_slice(&(entries.len() as u16).to_be_bytes());
    for (duration, size) in entries {
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&duration.to_be_bytes());
        body.extend_from_slice(&size.to_be_bytes());
    }
    let mut out = Vec::new();
    out.extend_from_slice(&((body.len() + 8) as u32).to_be_bytes());
    out.extend_from_slice(b"sidx");
    out.extend_from_slice(&body);
    out
}

/// One media segment: moof/traf/trun sample table plus the mdat payload.
fn media_segment(samples: &[&[u8]]) -> Vec<u8> {
    let mut trun_body = Vec::new();
    trun_body.extend_from_slice(&0x0000_0200u32.to_be_bytes());
    trun_body.extend_from_slice(&(samples.len() as u32).to_be_bytes());
    for s in samples {
        trun_body.extend_from_slice(&(s.len() as u32).to_be_bytes());
    }
    let traf = boxed(b"traf", &boxed(b"trun", &trun_body));
    let moof = boxed(b"moof", &traf);

    let mut mdat_body = Vec::new();
    for s in samples {
        mdat_body.extend_from_slice(s);
    }
    let mut out = moof;
    out.extend_from_slice(&boxed(b"mdat", &mdat_body));
    out
}

/// Complete single-quality DASH file: init + sidx + media segments.
fn dash_file(segment_durations: &[u32], timescale: u32) -> Vec<u8> {
    let payload: [&[u8]; 2] = [&[0xAA; 64], &[0xBB; 48]];
    let segment = media_segment(&payload);

    let mut head = dash_init_segment();
    let entries: Vec<(u32, u32)> = segment_durations
        .iter()
        .map(|d| (*d, segment.len() as u32))
        .collect();
    head.extend_from_slice(&sidx_box(&entries, timescale));
    for _ in segment_durations {
        head.extend_from_slice(&segment);
    }
    head
}

#[test]
fn dash_brand_sits_at_byte_offset_four() {
    let file = dash_file(&[44100], 44100);
    assert_eq!(&file[4..13], b"ftypdash\0");
}

#[test]
fn transmux_session_round_trips_the_segment_table() {
    let file = dash_file(&[88200, 44100, 44100], 44100);
    let mut session = TransmuxSession::new();
    let index: SegmentIndex = session.parse_index(&file).unwrap();

    assert_eq!(index.len(), 3);
    assert_eq!(index.timescale, 44100);
    assert!((index.total_seconds() - 4.0).abs() < 1e-9);

    // Prefix sums land exactly on each moof box.
    for i in 0..3 {
        let (start, end) = index.byte_range(i).unwrap();
        assert_eq!(&file[start as usize + 4..start as usize + 8], b"moof");
        let segment = &file[start as usize..end as usize];
        let adts = session.transmux_segment(i, segment).unwrap();
        // Two samples, each gaining a 7-byte ADTS header.
        assert_eq!(adts.len(), 64 + 48 + 14);
        assert_eq!(adts[0], 0xFF);
    }
}

#[test]
fn dash_files_route_to_the_transmuxer() {
    let file = dash_file(&[88200, 44100], 44100);
    let path = temp_media_file("dash-route", &file);
    // The .mp4 suffix drives the extension inference.
    let mp4_path = path.with_extension("mp4");
    std::fs::rename(&path, &mp4_path).unwrap();

    let factory = Factory::new();
    let (decoder, _errors) = blocking_create_decoder_with_errors(
        &factory,
        mp4_path.to_str().unwrap(),
        "",
    );
    let decoder = decoder.expect("transmux decoder");
    assert_eq!(decoder.name(), "com.nativeformat.decoder.dash2hlstransmuxer");

    // Total frames: sum of segment durations over the timescale, at the
    // output rate, minus the 1024 priming frames.
    let seconds = (88200 + 44100) as f64 / 44100.0;
    let expected = (seconds * decoder.sample_rate()) as i64 - 1024;
    assert_eq!(decoder.frames(), expected);

    std::fs::remove_file(mp4_path).ok();
}

#[test]
fn plain_mp4_falls_through_to_the_general_decoder() {
    // Valid framing, wrong brand: the transmuxer must defer.
    let mut file = boxed(b"ftyp", b"isom\0\0\0\0iso6");
    file.extend_from_slice(&boxed(b"mdat", &[0u8; 256]));
    let path = temp_media_file("plain-mp4", &file);
    let mp4_path = path.with_extension("mp4");
    std::fs::rename(&path, &mp4_path).unwrap();

    let factory = Factory::new();
    let (decoder, errors) = blocking_create_decoder_with_errors(
        &factory,
        mp4_path.to_str().unwrap(),
        "",
    );
    // No decodable audio inside; the fallback decoder reports the failure.
    assert!(decoder.is_none());
    assert!(
        errors
            .iter()
            .any(|(domain, _)| domain == "com.nativeformat.decoder.avcodec"),
        "errors: {errors:?}"
    );

    std::fs::remove_file(mp4_path).ok();
}
