//! In-memory FIFO data provider.
//!
//! Used as the sink/source pair for transmuxed bytes: a producer appends
//! with [`MemoryDataProvider::write`], a consumer drains from the head with
//! `read`. Seeking is rejected; `eof` means "buffer currently empty".

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use crate::provider::{DataProvider, ErrorCallback, LoadCallback, Whence, UNKNOWN_SIZE};

/// Sentinel provider name. Decoders suppress priming-trim when their bytes
/// come from this provider, because the transmuxer already trimmed them.
pub const DATA_PROVIDER_MEMORY_NAME: &str = "com.nativeformat.dataprovider.memory";

/// Growable byte FIFO behind the [`DataProvider`] contract.
pub struct MemoryDataProvider {
    path: String,
    data: Mutex<BytesMut>,
}

impl MemoryDataProvider {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            data: Mutex::new(BytesMut::new()),
        }
    }

    /// Append bytes at the tail.
    pub fn write(&self, bytes: &[u8]) {
        self.data.lock().extend_from_slice(bytes);
    }

    /// Drop all buffered bytes.
    pub fn flush(&self) {
        self.data.lock().clear();
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    /// Drain the entire buffer.
    pub fn take(&self) -> Bytes {
        let mut data = self.data.lock();
        let len = data.len();
        data.split_to(len).freeze()
    }
}

impl DataProvider for MemoryDataProvider {
    fn load(self: Arc<Self>, _on_error: ErrorCallback, on_done: LoadCallback) {
        on_done(true);
    }

    fn read(&self, buf: &mut [u8], size: usize, count: usize) -> usize {
        let mut data = self.data.lock();
        let wanted = (size * count).min(buf.len());
        // Whole elements only, drained from the head.
        let available = data.len() - (data.len() % size.max(1));
        let n = wanted.min(available);
        buf[..n].copy_from_slice(&data[..n]);
        let _ = data.split_to(n);
        n
    }

    fn seek(&self, _offset: i64, _whence: Whence) -> i32 {
        -1
    }

    fn tell(&self) -> i64 {
        0
    }

    fn eof(&self) -> bool {
        self.data.lock().is_empty()
    }

    fn size(&self) -> i64 {
        UNKNOWN_SIZE
    }

    fn path(&self) -> String {
        self.path.clone()
    }

    fn name(&self) -> &'static str {
        DATA_PROVIDER_MEMORY_NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_is_preserved() {
        let provider = MemoryDataProvider::new("memory-test");
        provider.write(b"abc");
        provider.write(b"defg");

        let mut buf = [0u8; 3];
        assert_eq!(provider.read(&mut buf, 1, 3), 3);
        assert_eq!(&buf, b"abc");

        let mut buf = [0u8; 4];
        assert_eq!(provider.read(&mut buf, 1, 4), 4);
        assert_eq!(&buf, b"defg");

        let mut buf = [0u8; 1];
        assert_eq!(provider.read(&mut buf, 1, 1), 0);
        assert!(provider.eof());
    }

    #[test]
    fn seek_is_rejected_and_size_unknown() {
        let provider = MemoryDataProvider::new("memory-test");
        assert_eq!(provider.seek(0, Whence::Set), -1);
        assert_eq!(provider.size(), UNKNOWN_SIZE);
        assert_eq!(provider.name(), DATA_PROVIDER_MEMORY_NAME);
    }

    #[test]
    fn flush_clears_pending_bytes() {
        let provider = MemoryDataProvider::new("memory-test");
        provider.write(b"leftover");
        provider.flush();
        assert!(provider.eof());
        assert_eq!(provider.len(), 0);
    }
}
