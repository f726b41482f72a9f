//! Reference decoder driver.
//!
//! `pcmflow <input> <output.wav> [offset_seconds] [duration_seconds]`
//!
//! Decodes any supported source to a single-chunk IEEE-float WAV file. The
//! exit code is 0 on success, or the decoder error code on failure.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::process::ExitCode;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{mpsc, Arc};

use tracing::metadata::LevelFilter;
use tracing_subscriber::EnvFilter;

use pcmflow::{Decoder, Factory, STANDARD_CHANNELS, STANDARD_SAMPLE_RATE};

/// Frames requested per decode call.
const DECODE_CHUNK_FRAMES: i64 = 8192;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_file(false)
        .with_line_number(false)
        .init();

    println!("pcmflow command line interface {}", pcmflow::version());

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 || args.len() > 5 {
        eprintln!("usage: pcmflow <input> <output.wav> [offset_seconds] [duration_seconds]");
        return ExitCode::from(1);
    }
    let input = &args[1];
    let output = &args[2];
    let offset_seconds: f64 = args.get(3).and_then(|a| a.parse().ok()).unwrap_or(0.0);
    let duration_seconds: f64 = args.get(4).and_then(|a| a.parse().ok()).unwrap_or(-1.0);

    println!("input file: {input}");
    println!("output file: {output}");

    let factory = Factory::new();
    let last_error = Arc::new(AtomicI32::new(0));
    let error_sink = last_error.clone();
    let (tx, rx) = mpsc::channel();
    factory.create_decoder(
        input,
        "",
        Box::new(move |decoder| {
            let _ = tx.send(decoder);
        }),
        Arc::new(move |domain, code| {
            eprintln!("error from {domain}: {code}");
            error_sink.store(code, Ordering::SeqCst);
        }),
        STANDARD_SAMPLE_RATE,
        STANDARD_CHANNELS,
    );

    let Ok(Some(decoder)) = rx.recv() else {
        let code = last_error.load(Ordering::SeqCst);
        return ExitCode::from(if code == 0 { 1 } else { (code & 0xFF) as u8 });
    };

    match render(decoder, output, offset_seconds, duration_seconds) {
        Ok(frames) => {
            println!("wrote {frames} frames");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("failed to write {output}: {e}");
            ExitCode::from(1)
        }
    }
}

fn render(
    decoder: Arc<dyn Decoder>,
    output: &str,
    offset_seconds: f64,
    duration_seconds: f64,
) -> std::io::Result<i64> {
    let sample_rate = decoder.sample_rate();
    let channels = decoder.channels();

    let start_frame = (offset_seconds * sample_rate) as i64;
    if start_frame > 0 {
        decoder.seek(start_frame);
    }
    let frame_limit = if duration_seconds >= 0.0 {
        Some((duration_seconds * sample_rate) as i64)
    } else {
        None
    };

    let mut file = BufWriter::new(File::create(output)?);
    write_wav_header(&mut file, sample_rate as u32, channels as u16, 0)?;

    let mut written_frames = 0i64;
    loop {
        let remaining = frame_limit
            .map(|limit| limit - written_frames)
            .unwrap_or(DECODE_CHUNK_FRAMES);
        let request = remaining.min(DECODE_CHUNK_FRAMES);
        if request <= 0 {
            break;
        }

        let (tx, rx) = mpsc::channel();
        decoder.clone().decode(
            request,
            Box::new(move |_, count, samples| {
                let _ = tx.send((count, samples.to_vec()));
            }),
            true,
        );
        let Ok((count, samples)) = rx.recv() else {
            break;
        };
        for sample in &samples {
            file.write_all(&sample.to_le_bytes())?;
        }
        written_frames += count;
        if count < request {
            break;
        }
    }

    // Rewrite the header with the final payload size.
    let data_bytes = (written_frames * channels as i64 * 4) as u32;
    let mut file = file.into_inner().map_err(|e| e.into_error())?;
    file.seek(SeekFrom::Start(0))?;
    write_wav_header(&mut file, sample_rate as u32, channels as u16, data_bytes)?;
    Ok(written_frames)
}

/// 44-byte WAV header: IEEE float, 32-bit.
fn write_wav_header<W: Write>(
    out: &mut W,
    sample_rate: u32,
    channels: u16,
    data_bytes: u32,
) -> std::io::Result<()> {
    const HEADER_BYTES: u32 = 44;
    out.write_all(b"RIFF")?;
    out.write_all(&(HEADER_BYTES - 8 + data_bytes).to_le_bytes())?;
    out.write_all(b"WAVE")?;
    out.write_all(b"fmt ")?;
    out.write_all(&16u32.to_le_bytes())?;
    out.write_all(&3u16.to_le_bytes())?; // IEEE float
    out.write_all(&channels.to_le_bytes())?;
    out.write_all(&sample_rate.to_le_bytes())?;
    out.write_all(&(sample_rate * u32::from(channels) * 4).to_le_bytes())?;
    out.write_all(&(channels * 4).to_le_bytes())?;
    out.write_all(&32u16.to_le_bytes())?;
    out.write_all(b"data")?;
    out.write_all(&data_bytes.to_le_bytes())?;
    Ok(())
}
