//! Shared fixtures for the pcmflow integration tests.
//!
//! - [`FixtureServer`]: an axum HTTP server over in-memory files with HEAD
//!   and Range support, recording every request for assertions.
//! - [`sine_wav`] / [`sine_wav_f32`]: WAV generators for known-signal tests.
//! - [`blocking_create_decoder`] and friends: callback-to-channel bridges so
//!   tests can drive the asynchronous decoder API synchronously.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{mpsc, Arc};

use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;

use pcmflow::{Decoder, Factory};

/// One observed HTTP request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub range: Option<String>,
}

#[derive(Clone)]
struct ServerState {
    files: Arc<HashMap<String, Vec<u8>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

/// In-memory HTTP fixture with HEAD and Range semantics.
pub struct FixtureServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl FixtureServer {
    /// Start a server for the given `path → bytes` map. Paths are absolute
    /// ("/audio.wav").
    pub fn start(files: HashMap<String, Vec<u8>>) -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind fixture server");
        listener.set_nonblocking(true).expect("nonblocking listener");
        let addr = listener.local_addr().expect("fixture server addr");

        let requests: Arc<Mutex<Vec<RecordedRequest>>> = Arc::new(Mutex::new(Vec::new()));
        let state = ServerState {
            files: Arc::new(files),
            requests: requests.clone(),
        };

        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("fixture runtime");
            runtime.block_on(async move {
                let router = axum::Router::new()
                    .fallback(axum::routing::get(serve_file))
                    .with_state(state);
                let listener =
                    tokio::net::TcpListener::from_std(listener).expect("tokio listener");
                axum::serve(listener, router).await.expect("serve fixture");
            });
        });

        Self { addr, requests }
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}

async fn serve_file(
    State(state): State<ServerState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    state.requests.lock().push(RecordedRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        range: range.clone(),
    });

    let Some(body) = state.files.get(uri.path()) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match range.as_deref().and_then(parse_range) {
        Some((start, end)) if start < body.len() => {
            let end = end.min(body.len() - 1);
            let slice = body[start..=end].to_vec();
            (
                StatusCode::PARTIAL_CONTENT,
                [(header::CONTENT_LENGTH, slice.len().to_string())],
                slice,
            )
                .into_response()
        }
        _ => (
            StatusCode::OK,
            [(header::CONTENT_LENGTH, body.len().to_string())],
            body.clone(),
        )
            .into_response(),
    }
}

/// Parse `bytes=a-b` into an inclusive byte range.
fn parse_range(value: &str) -> Option<(usize, usize)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

/// Generate a 16-bit PCM WAV holding a sine tone.
pub fn sine_wav(frequency: f64, seconds: f64, sample_rate: u32, channels: u16) -> Vec<u8> {
    let frames = (seconds * f64::from(sample_rate)) as usize;
    let mut data = Vec::with_capacity(frames * usize::from(channels) * 2);
    for frame in 0..frames {
        let t = frame as f64 / f64::from(sample_rate);
        let sample = (t * frequency * 2.0 * std::f64::consts::PI).sin();
        let value = (sample * f64::from(i16::MAX)) as i16;
        for _ in 0..channels {
            data.extend_from_slice(&value.to_le_bytes());
        }
    }
    wav_bytes(1, 16, sample_rate, channels, &data)
}

/// Generate an IEEE-float WAV holding a sine tone.
pub fn sine_wav_f32(frequency: f64, seconds: f64, sample_rate: u32, channels: u16) -> Vec<u8> {
    let frames = (seconds * f64::from(sample_rate)) as usize;
    let mut data = Vec::with_capacity(frames * usize::from(channels) * 4);
    for frame in 0..frames {
        let t = frame as f64 / f64::from(sample_rate);
        let sample = (t * frequency * 2.0 * std::f64::consts::PI).sin() as f32;
        for _ in 0..channels {
            data.extend_from_slice(&sample.to_le_bytes());
        }
    }
    wav_bytes(3, 32, sample_rate, channels, &data)
}

fn wav_bytes(format: u16, bit_depth: u16, sample_rate: u32, channels: u16, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(44 + data.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data.len() as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&format.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    let byte_rate = sample_rate * u32::from(channels) * u32::from(bit_depth / 8);
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&(channels * (bit_depth / 8)).to_le_bytes());
    out.extend_from_slice(&bit_depth.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    out
}

/// Write fixture bytes to a temp file and return its path. `name` keeps its
/// extension so the factory's path inference sees it.
pub fn temp_media_file(name: &str, bytes: &[u8]) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!(
        "pcmflow-fixture-{}-{}",
        std::process::id(),
        name
    ));
    std::fs::write(&path, bytes).expect("write fixture file");
    path
}

/// Create a decoder through the factory, blocking until it is ready.
pub fn blocking_create_decoder(
    factory: &Factory,
    path: &str,
    mime: &str,
    sample_rate: f64,
    channels: usize,
) -> Option<Arc<dyn Decoder>> {
    let (tx, rx) = mpsc::channel();
    factory.create_decoder(
        path,
        mime,
        Box::new(move |decoder| {
            let _ = tx.send(decoder);
        }),
        Arc::new(|domain, code| {
            tracing::warn!(domain, code, "decoder creation error");
        }),
        sample_rate,
        channels,
    );
    rx.recv().ok().flatten()
}

/// Create a decoder and capture the error callback's reports.
pub fn blocking_create_decoder_with_errors(
    factory: &Factory,
    path: &str,
    mime: &str,
) -> (Option<Arc<dyn Decoder>>, Vec<(String, i32)>) {
    let errors: Arc<Mutex<Vec<(String, i32)>>> = Arc::new(Mutex::new(Vec::new()));
    let errors_sink = errors.clone();
    let (tx, rx) = mpsc::channel();
    factory.create_decoder(
        path,
        mime,
        Box::new(move |decoder| {
            let _ = tx.send(decoder);
        }),
        Arc::new(move |domain, code| {
            errors_sink.lock().push((domain.to_string(), code));
        }),
        pcmflow::STANDARD_SAMPLE_RATE,
        pcmflow::STANDARD_CHANNELS,
    );
    let decoder = rx.recv().ok().flatten();
    let reported = errors.lock().clone();
    (decoder, reported)
}

/// Decode one block synchronously, returning `(frame_index, samples)`.
pub fn blocking_decode(decoder: &Arc<dyn Decoder>, frames: i64) -> (i64, Vec<f32>) {
    let (tx, rx) = mpsc::channel();
    decoder.clone().decode(
        frames,
        Box::new(move |frame_index, _, samples| {
            let _ = tx.send((frame_index, samples.to_vec()));
        }),
        true,
    );
    rx.recv().expect("decode callback")
}
