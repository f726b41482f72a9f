//! Normalization (remix + resample) behavior over generated fixtures.

use pcmflow::Factory;
use pcmflow_tests::{blocking_create_decoder, blocking_decode, sine_wav, temp_media_file};

#[test]
fn mono_48k_normalizes_to_stereo_44k1() {
    let wav = sine_wav(440.0, 1.0, 48000, 1);
    let path = temp_media_file("norm-mono48k.wav", &wav);
    let factory = Factory::new();
    let decoder =
        blocking_create_decoder(&factory, path.to_str().unwrap(), "", 44100.0, 2)
            .expect("normalized decoder");

    assert_eq!(decoder.sample_rate(), 44100.0);
    assert_eq!(decoder.channels(), 2);

    // Frame-count law: wrapped frames scaled by the resample factor.
    let expected = (48000f64 * (44100.0 / 48000.0)) as i64;
    assert!((decoder.frames() - expected).abs() <= 1, "frames {}", decoder.frames());

    let (frame_index, samples) = blocking_decode(&decoder, 44100);
    assert_eq!(frame_index, 0);
    let frames = (samples.len() / 2) as i64;
    assert!(
        (frames - 44100).abs() <= 2,
        "expected 44100 +/- 2 frames, got {frames}"
    );

    // Mono upmix copies channel 0: left and right must match.
    for frame in 0..frames as usize {
        let left = samples[frame * 2];
        let right = samples[frame * 2 + 1];
        assert!(
            (left - right).abs() <= 1e-5,
            "frame {frame}: {left} vs {right}"
        );
    }

    // The tone must survive resampling at comparable level.
    let peak = samples.iter().fold(0f32, |m, s| m.max(s.abs()));
    assert!(peak > 0.9, "peak {peak}");

    std::fs::remove_file(path).ok();
}

#[test]
fn matching_spec_skips_the_normalization_wrapper() {
    let wav = sine_wav(440.0, 0.2, 44100, 2);
    let path = temp_media_file("norm-skip.wav", &wav);
    let factory = Factory::new();
    let decoder =
        blocking_create_decoder(&factory, path.to_str().unwrap(), "", 44100.0, 2)
            .expect("decoder");
    // The WAV decoder surfaces directly; no normalization layer in between.
    assert_eq!(decoder.name(), "com.nativeformat.decoder.wav");

    std::fs::remove_file(path).ok();
}

#[test]
fn stereo_source_passes_through_the_remix_unchanged() {
    // 22050 Hz stereo into a 44100 Hz stereo target: channels equal, only
    // the rate changes.
    let wav = sine_wav(300.0, 0.5, 22050, 2);
    let path = temp_media_file("norm-rate-only.wav", &wav);
    let factory = Factory::new();
    let decoder =
        blocking_create_decoder(&factory, path.to_str().unwrap(), "", 44100.0, 2)
            .expect("normalized decoder");
    assert_eq!(decoder.name(), "com.nativeformat.decoder.normalisation");

    let expected = (0.5 * 22050.0 * 2.0) as i64;
    assert!((decoder.frames() - expected).abs() <= 1);

    let (_, samples) = blocking_decode(&decoder, expected);
    let frames = (samples.len() / 2) as i64;
    assert!(
        (frames - expected).abs() <= 2,
        "expected {expected} +/- 2 frames, got {frames}"
    );

    std::fs::remove_file(path).ok();
}

#[test]
fn seek_through_normalization_scales_to_the_wrapped_rate() {
    let wav = sine_wav(440.0, 1.0, 22050, 2);
    let path = temp_media_file("norm-seek.wav", &wav);
    let factory = Factory::new();
    let decoder =
        blocking_create_decoder(&factory, path.to_str().unwrap(), "", 44100.0, 2)
            .expect("normalized decoder");

    decoder.seek(10000);
    assert_eq!(decoder.current_frame_index(), 10000);
    let (frame_index, samples) = blocking_decode(&decoder, 2000);
    assert_eq!(frame_index, 10000);
    assert!(!samples.is_empty());

    std::fs::remove_file(path).ok();
}
