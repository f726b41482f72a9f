//! Adapters bridging a `DataProvider` to the codec libraries' I/O traits.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use parking_lot::Mutex;
use symphonia::core::io::MediaSource;

use pcmflow_dash::CencScanner;
use pcmflow_source::{DataProvider, Whence, UNKNOWN_SIZE};

/// `Read + Seek` view over a shared [`DataProvider`].
///
/// When a [`CencScanner`] is attached, every read is also handed to the
/// scanner so encryption metadata is harvested inline without moving the
/// provider's cursor (the scanner restores the position itself).
pub struct ProviderSource {
    provider: Arc<dyn DataProvider>,
    scanner: Option<Arc<Mutex<CencScanner>>>,
}

impl ProviderSource {
    pub fn new(provider: Arc<dyn DataProvider>) -> Self {
        Self {
            provider,
            scanner: None,
        }
    }

    pub fn with_scanner(provider: Arc<dyn DataProvider>, scanner: Arc<Mutex<CencScanner>>) -> Self {
        Self {
            provider,
            scanner: Some(scanner),
        }
    }
}

impl Read for ProviderSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.provider.read(buf, 1, buf.len());
        if n > 0 {
            if let Some(scanner) = &self.scanner {
                scanner.lock().scan_after_read(&self.provider, &buf[..n]);
            }
        }
        Ok(n)
    }
}

impl Seek for ProviderSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let status = match pos {
            SeekFrom::Start(offset) => self.provider.seek(offset as i64, Whence::Set),
            SeekFrom::Current(offset) => {
                if offset == 0 {
                    return Ok(self.provider.tell() as u64);
                }
                self.provider.seek(offset, Whence::Cur)
            }
            SeekFrom::End(offset) => self.provider.seek(offset, Whence::End),
        };
        if status != 0 {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "provider rejected seek",
            ));
        }
        Ok(self.provider.tell() as u64)
    }
}

impl MediaSource for ProviderSource {
    fn is_seekable(&self) -> bool {
        self.provider.size() != UNKNOWN_SIZE
    }

    fn byte_len(&self) -> Option<u64> {
        match self.provider.size() {
            UNKNOWN_SIZE => None,
            len => Some(len as u64),
        }
    }
}
