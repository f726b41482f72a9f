//! End-to-end decode tests over generated WAV fixtures.
//!
//! These go all the way from a path through the factory stack to decoded
//! PCM, validating the universal decoder properties: frame conservation,
//! seek idempotence, flush behavior, and the WAV round trip.

use pcmflow::Factory;
use pcmflow_tests::{
    blocking_create_decoder, blocking_decode, sine_wav, sine_wav_f32, temp_media_file,
};

const TOLERANCE_16_BIT: f32 = 2.0 / 32768.0;

fn reference_sine(frame: i64, frequency: f64, sample_rate: f64) -> f32 {
    let t = frame as f64 / sample_rate;
    (t * frequency * 2.0 * std::f64::consts::PI).sin() as f32
}

#[test]
fn wav_round_trip_delivers_every_frame() {
    let wav = sine_wav(440.0, 1.0, 44100, 2);
    let path = temp_media_file("roundtrip.wav", &wav);
    let factory = Factory::new();
    let decoder = blocking_create_decoder(
        &factory,
        path.to_str().unwrap(),
        "",
        44100.0,
        2,
    )
    .expect("wav decoder");

    assert_eq!(decoder.sample_rate(), 44100.0);
    assert_eq!(decoder.channels(), 2);
    assert_eq!(decoder.frames(), 44100);

    let (frame_index, samples) = blocking_decode(&decoder, 44100);
    assert_eq!(frame_index, 0);
    assert_eq!(samples.len(), 44100 * 2);

    // A full-scale sine must peak near 1.0.
    let peak = samples.iter().fold(0f32, |m, s| m.max(s.abs()));
    assert!(peak >= 0.99 && peak <= 1.0, "peak {peak}");

    // Correlate against the reference tone.
    let mut dot = 0f64;
    let mut energy_a = 0f64;
    let mut energy_b = 0f64;
    for frame in 0..44100i64 {
        let a = f64::from(samples[frame as usize * 2]);
        let b = f64::from(reference_sine(frame, 440.0, 44100.0));
        dot += a * b;
        energy_a += a * a;
        energy_b += b * b;
    }
    let correlation = dot / (energy_a.sqrt() * energy_b.sqrt());
    assert!(correlation >= 0.999, "correlation {correlation}");

    std::fs::remove_file(path).ok();
}

#[test]
fn frame_conservation_across_chunked_decodes() {
    let wav = sine_wav(330.0, 0.7, 22050, 1);
    let path = temp_media_file("conservation.wav", &wav);
    let factory = Factory::new();
    // Match the source spec so no normalization interferes with counting.
    let decoder =
        blocking_create_decoder(&factory, path.to_str().unwrap(), "", 22050.0, 1)
            .expect("wav decoder");

    let total = decoder.frames();
    assert!(total > 0);

    let mut collected = 0i64;
    loop {
        let (frame_index, samples) = blocking_decode(&decoder, 1000);
        assert_eq!(frame_index, collected);
        let got = (samples.len() / decoder.channels()) as i64;
        collected += got;
        if got < 1000 {
            break;
        }
    }
    assert_eq!(collected, total);
    assert!(decoder.eof());

    std::fs::remove_file(path).ok();
}

#[test]
fn seek_is_idempotent_and_frame_accurate() {
    let wav = sine_wav_f32(440.0, 1.0, 44100, 2);
    let path = temp_media_file("seek.wav", &wav);
    let factory = Factory::new();
    let decoder =
        blocking_create_decoder(&factory, path.to_str().unwrap(), "", 44100.0, 2)
            .expect("wav decoder");

    decoder.seek(22050);
    assert_eq!(decoder.current_frame_index(), 22050);
    let (first_index, first) = blocking_decode(&decoder, 1000);
    assert_eq!(first_index, 22050);
    assert_eq!(first.len(), 1000 * 2);

    // Same seek again must reproduce the same block.
    decoder.seek(22050);
    let (second_index, second) = blocking_decode(&decoder, 1000);
    assert_eq!(second_index, 22050);
    assert_eq!(first, second);

    // Decoded content matches the source at the seek target exactly
    // (float fixture, no quantization).
    for frame in 0..1000i64 {
        let expected = reference_sine(22050 + frame, 440.0, 44100.0);
        let got = first[frame as usize * 2];
        assert!(
            (got - expected).abs() <= f32::EPSILON * 8.0,
            "frame {frame}: {got} vs {expected}"
        );
    }

    std::fs::remove_file(path).ok();
}

#[test]
fn decode_after_flush_stays_contiguous() {
    let wav = sine_wav(220.0, 0.5, 44100, 2);
    let path = temp_media_file("flush.wav", &wav);
    let factory = Factory::new();
    let decoder =
        blocking_create_decoder(&factory, path.to_str().unwrap(), "", 44100.0, 2)
            .expect("wav decoder");

    let (_, first) = blocking_decode(&decoder, 4096);
    assert_eq!(first.len(), 4096 * 2);
    let position = decoder.current_frame_index();

    decoder.flush();
    assert_eq!(decoder.current_frame_index(), position);

    let (frame_index, block) = blocking_decode(&decoder, 1024);
    assert_eq!(frame_index, position);
    for frame in 0..1024i64 {
        let expected = reference_sine(position + frame, 220.0, 44100.0);
        let got = block[frame as usize * 2];
        assert!((got - expected).abs() <= TOLERANCE_16_BIT);
    }

    std::fs::remove_file(path).ok();
}

#[test]
fn decoder_for_data_decodes_wav_bytes() {
    let wav = sine_wav(440.0, 0.25, 44100, 2);
    let decoder = pcmflow::decoder_for_data(
        &wav,
        "audio/wav",
        std::sync::Arc::new(|domain, code| panic!("{domain} failed: {code}")),
        44100.0,
        2,
    )
    .expect("memory decoder");

    assert_eq!(decoder.sample_rate(), 44100.0);
    assert_eq!(decoder.channels(), 2);
    assert_eq!(decoder.samples(), (44100 / 4) * 2);

    let mut samples = vec![0f32; 2048];
    let n = decoder.read(&mut samples);
    assert_eq!(n, 2048);
    let peak = samples.iter().fold(0f32, |m, s| m.max(s.abs()));
    assert!(peak > 0.1, "silence from memory decoder");
}
