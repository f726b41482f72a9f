//! HTTP data provider backed by HEAD + Range requests.
//!
//! `load` issues a HEAD request on a worker thread to learn the content
//! length; each `read` performs a synchronous Range GET for exactly the
//! requested window. A single provider mutex guards the logical offset, so
//! concurrent reads serialize.

use std::sync::Arc;

use parking_lot::Mutex;
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_LENGTH, RANGE};
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::error::SourceError;
use crate::provider::{resolve_offset, DataProvider, ErrorCallback, LoadCallback, Whence};

/// Data provider over an HTTP(S) resource.
pub struct HttpDataProvider {
    path: String,
    client: Client,
    state: Mutex<HttpState>,
}

#[derive(Default)]
struct HttpState {
    content_length: i64,
    offset: i64,
}

impl HttpDataProvider {
    pub fn new(path: impl Into<String>, client: Client) -> Self {
        Self {
            path: path.into(),
            client,
            state: Mutex::new(HttpState::default()),
        }
    }

    /// Convenience constructor with a default client.
    pub fn new_default(path: impl Into<String>) -> Self {
        Self::new(path, Client::new())
    }

    fn head(&self) -> Result<i64, SourceError> {
        let response = self
            .client
            .head(&self.path)
            .send()
            .map_err(|e| SourceError::http_transport(&self.path, e))?;
        if response.status() != StatusCode::OK {
            return Err(SourceError::http_status(
                response.status().as_u16(),
                &self.path,
            ));
        }
        let content_length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        Ok(content_length)
    }
}

impl DataProvider for HttpDataProvider {
    fn load(self: Arc<Self>, on_error: ErrorCallback, on_done: LoadCallback) {
        std::thread::spawn(move || match self.head() {
            Ok(content_length) => {
                debug!(
                    url = %self.path,
                    content_length, "HTTP provider ready"
                );
                self.state.lock().content_length = content_length;
                on_done(true);
            }
            Err(e) => {
                warn!(url = %self.path, error = %e, "HTTP HEAD failed");
                on_error(e.domain(), e.code());
                on_done(false);
            }
        });
    }

    fn read(&self, buf: &mut [u8], size: usize, count: usize) -> usize {
        let mut state = self.state.lock();
        if state.offset >= state.content_length {
            return 0;
        }
        let offset = state.offset;
        let last = offset + (size * count) as i64 - 1;
        let range = format!("bytes={}-{}", offset, last);
        let response = match self
            .client
            .get(&self.path)
            .header(RANGE, range.clone())
            .send()
        {
            Ok(r) => r,
            Err(e) => {
                warn!(url = %self.path, error = %e, "range request failed");
                return 0;
            }
        };
        if !response.status().is_success() {
            warn!(url = %self.path, status = %response.status(), %range, "range request rejected");
            return 0;
        }
        let body = match response.bytes() {
            Ok(b) => b,
            Err(e) => {
                warn!(url = %self.path, error = %e, "range body read failed");
                return 0;
            }
        };
        let n = body.len().min(buf.len());
        buf[..n].copy_from_slice(&body[..n]);
        state.offset = offset + n as i64;
        n
    }

    fn seek(&self, offset: i64, whence: Whence) -> i32 {
        let mut state = self.state.lock();
        let Some(target) = resolve_offset(offset, whence, state.offset, state.content_length)
        else {
            return -1;
        };
        state.offset = target;
        0
    }

    fn tell(&self) -> i64 {
        self.state.lock().offset
    }

    fn eof(&self) -> bool {
        let state = self.state.lock();
        state.offset >= state.content_length
    }

    fn size(&self) -> i64 {
        self.state.lock().content_length
    }

    fn path(&self) -> String {
        self.path.clone()
    }

    fn name(&self) -> &'static str {
        "com.nativeformat.decoder.http"
    }
}
