//! File-backed data provider.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::error::{codes, SourceError};
use crate::provider::{resolve_offset, DataProvider, ErrorCallback, LoadCallback, Whence};

/// Data provider over a local file opened read-only.
///
/// `load` opens the path and records the total size by seeking to the end;
/// `read` and `seek` translate directly to the underlying handle.
pub struct FileDataProvider {
    path: String,
    state: Mutex<FileState>,
}

struct FileState {
    handle: Option<File>,
    size: i64,
    eof: bool,
}

impl FileDataProvider {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(FileState {
                handle: None,
                size: 0,
                eof: false,
            }),
        }
    }
}

impl DataProvider for FileDataProvider {
    fn load(self: Arc<Self>, on_error: ErrorCallback, on_done: LoadCallback) {
        let mut state = self.state.lock();
        match open_sized(&self.path) {
            Ok((handle, size)) => {
                state.handle = Some(handle);
                state.size = size;
                drop(state);
                on_done(true);
            }
            Err(e) => {
                warn!("failed to open {}: {}", self.path, e);
                drop(state);
                on_error(self.name(), codes::COULD_NOT_READ_FILE);
                on_done(false);
            }
        }
    }

    fn read(&self, buf: &mut [u8], size: usize, count: usize) -> usize {
        let mut state = self.state.lock();
        let Some(handle) = state.handle.as_mut() else {
            return 0;
        };
        let wanted = (size * count).min(buf.len());
        let mut total = 0usize;
        while total < wanted {
            match handle.read(&mut buf[total..wanted]) {
                Ok(0) => {
                    state.eof = true;
                    break;
                }
                Ok(n) => total += n,
                Err(e) => {
                    warn!("read failed on {}: {}", self.path, e);
                    break;
                }
            }
        }
        // Whole elements only: a partial trailing element is not reported.
        (total / size.max(1)) * size
    }

    fn seek(&self, offset: i64, whence: Whence) -> i32 {
        let mut state = self.state.lock();
        let size = state.size;
        let Some(handle) = state.handle.as_mut() else {
            return -1;
        };
        let position = handle.stream_position().map(|p| p as i64).unwrap_or(0);
        let Some(target) = resolve_offset(offset, whence, position, size) else {
            return -1;
        };
        match handle.seek(SeekFrom::Start(target as u64)) {
            Ok(_) => {
                state.eof = false;
                0
            }
            Err(_) => -1,
        }
    }

    fn tell(&self) -> i64 {
        let mut state = self.state.lock();
        state
            .handle
            .as_mut()
            .and_then(|h| h.stream_position().ok())
            .map(|p| p as i64)
            .unwrap_or(0)
    }

    fn eof(&self) -> bool {
        self.state.lock().eof
    }

    fn size(&self) -> i64 {
        self.state.lock().size
    }

    fn path(&self) -> String {
        self.path.clone()
    }

    fn name(&self) -> &'static str {
        "com.nativeformat.decoder.file"
    }
}

fn open_sized(path: &str) -> Result<(File, i64), SourceError> {
    let mut handle = File::open(path).map_err(|e| SourceError::file(path, e))?;
    let size = handle
        .seek(SeekFrom::End(0))
        .map_err(|e| SourceError::file(path, e))? as i64;
    handle
        .seek(SeekFrom::Start(0))
        .map_err(|e| SourceError::file(path, e))?;
    Ok((handle, size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn temp_file(contents: &[u8]) -> (std::path::PathBuf, String) {
        let dir = std::env::temp_dir();
        let path = dir.join(format!(
            "pcmflow-source-test-{}-{:x}",
            std::process::id(),
            contents.len()
        ));
        let mut f = File::create(&path).unwrap();
        f.write_all(contents).unwrap();
        let s = path.to_string_lossy().into_owned();
        (path, s)
    }

    fn loaded(provider: Arc<FileDataProvider>) -> Arc<FileDataProvider> {
        let ok = Arc::new(AtomicBool::new(false));
        let ok2 = ok.clone();
        provider.clone().load(
            Arc::new(|_, _| {}),
            Box::new(move |success| ok2.store(success, Ordering::SeqCst)),
        );
        assert!(ok.load(Ordering::SeqCst));
        provider
    }

    #[test]
    fn read_seek_tell_roundtrip() {
        let (path, s) = temp_file(b"hello pcmflow");
        let provider = loaded(Arc::new(FileDataProvider::new(&s)));

        assert_eq!(provider.size(), 13);
        let mut buf = [0u8; 5];
        assert_eq!(provider.read(&mut buf, 1, 5), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(provider.tell(), 5);

        assert_eq!(provider.seek(6, Whence::Set), 0);
        let mut buf = [0u8; 7];
        assert_eq!(provider.read(&mut buf, 1, 7), 7);
        assert_eq!(&buf, b"pcmflow");
        assert!(provider.seek(1, Whence::Cur) < 0);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn load_failure_reports_error() {
        let provider = Arc::new(FileDataProvider::new("/nonexistent/pcmflow"));
        let errored = Arc::new(AtomicBool::new(false));
        let errored2 = errored.clone();
        let done = Arc::new(AtomicBool::new(true));
        let done2 = done.clone();
        provider.load(
            Arc::new(move |domain, code| {
                assert_eq!(domain, "com.nativeformat.decoder.file");
                assert_eq!(code, codes::COULD_NOT_READ_FILE);
                errored2.store(true, Ordering::SeqCst);
            }),
            Box::new(move |success| done2.store(success, Ordering::SeqCst)),
        );
        assert!(errored.load(Ordering::SeqCst));
        assert!(!done.load(Ordering::SeqCst));
    }
}
