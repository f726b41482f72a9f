//! CENC sample decryption (AES-128-CTR).
//!
//! The decoder consumes the [`Decryptor`] contract only: a synchronous
//! per-sample `decrypt` plus an asynchronous `load` that stands in for a
//! license-acquisition round trip. [`CencDecryptor`] is the local key-table
//! implementation; a DRM-backed variant would live behind the same trait.

use std::collections::HashMap;
use std::sync::Arc;

use aes::cipher::{KeyIvInit, StreamCipher};
use aes::Aes128;
use parking_lot::Mutex;
use tracing::warn;

use pcmflow_source::{ErrorCallback, LoadCallback};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// Key identifiers are always 16 bytes.
pub const KEY_ID_LEN: usize = 16;

/// Status value returned by a successful [`Decryptor::decrypt`].
pub const DECRYPTER_SUCCESS: i32 = 0;

const DECRYPTER_STATUS_NO_KEY: i32 = 1;

/// Per-sample decryption contract consumed by the decoders.
///
/// `key_id` is the 16-byte identifier discovered in the TENC box; `iv` is
/// the per-sample SENC IV zero-padded to 16 bytes. On failure the output is
/// unspecified and the returned status is non-zero; callers leave the
/// ciphertext unchanged in that case.
pub trait Decryptor: Send + Sync {
    fn decrypt(
        &self,
        input: &[u8],
        output: &mut [u8],
        key_id: &[u8; KEY_ID_LEN],
        iv: &[u8; 16],
    ) -> i32;

    /// Asynchronously acquire whatever the decryptor needs before the first
    /// `decrypt` call.
    fn load(self: Arc<Self>, on_error: ErrorCallback, on_done: LoadCallback);
}

/// Key-table decryptor performing AES-128-CTR.
pub struct CencDecryptor {
    keys: Mutex<HashMap<[u8; KEY_ID_LEN], [u8; 16]>>,
}

impl CencDecryptor {
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Register a content key for a key id.
    pub fn add_key(&self, key_id: [u8; KEY_ID_LEN], key: [u8; 16]) {
        self.keys.lock().insert(key_id, key);
    }
}

impl Default for CencDecryptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Decryptor for CencDecryptor {
    fn decrypt(
        &self,
        input: &[u8],
        output: &mut [u8],
        key_id: &[u8; KEY_ID_LEN],
        iv: &[u8; 16],
    ) -> i32 {
        let keys = self.keys.lock();
        let Some(key) = keys.get(key_id) else {
            warn!("no content key for key id");
            return DECRYPTER_STATUS_NO_KEY;
        };
        let n = input.len().min(output.len());
        output[..n].copy_from_slice(&input[..n]);
        let mut cipher = Aes128Ctr::new(key.into(), iv.into());
        cipher.apply_keystream(&mut output[..n]);
        DECRYPTER_SUCCESS
    }

    fn load(self: Arc<Self>, _on_error: ErrorCallback, on_done: LoadCallback) {
        // Local key tables have nothing to acquire.
        on_done(true);
    }
}

/// Asynchronous decryptor factory.
///
/// Returns `None` for paths with no registered key material, which routes
/// the content through the clear (non-decrypting) decoder path.
pub struct DecryptorFactory {
    decryptor: Mutex<Option<Arc<CencDecryptor>>>,
}

impl DecryptorFactory {
    pub fn new() -> Self {
        Self {
            decryptor: Mutex::new(None),
        }
    }

    /// Install a decryptor handed to every subsequent create call.
    pub fn set_decryptor(&self, decryptor: Arc<CencDecryptor>) {
        *self.decryptor.lock() = Some(decryptor);
    }

    /// Obtain a decryptor for `path`, loading it before delivery.
    pub fn create_decryptor(
        &self,
        _path: &str,
        on_create: Box<dyn FnOnce(Option<Arc<dyn Decryptor>>) + Send>,
        on_error: ErrorCallback,
    ) {
        let Some(decryptor) = self.decryptor.lock().clone() else {
            on_create(None);
            return;
        };
        let delivered: Arc<dyn Decryptor> = decryptor.clone();
        decryptor.load(
            on_error,
            Box::new(move |success| on_create(success.then_some(delivered))),
        );
    }
}

impl Default for DecryptorFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// Expand an 8-byte SENC IV to the 16-byte AES-CTR input.
pub fn expand_iv(iv: u64) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..8].copy_from_slice(&iv.to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrypt_roundtrips_with_known_vectors() {
        let key_id = [7u8; KEY_ID_LEN];
        let key = [3u8; 16];
        let decryptor = CencDecryptor::new();
        decryptor.add_key(key_id, key);

        let iv = expand_iv(0x0011_2233_4455_6677);
        let plain = b"sixteen byte blk plus tail bytes";
        let mut cipher_text = vec![0u8; plain.len()];
        assert_eq!(
            decryptor.decrypt(plain, &mut cipher_text, &key_id, &iv),
            DECRYPTER_SUCCESS
        );
        assert_ne!(&cipher_text[..], &plain[..]);

        // CTR is its own inverse under the same key/iv.
        let mut recovered = vec![0u8; plain.len()];
        assert_eq!(
            decryptor.decrypt(&cipher_text, &mut recovered, &key_id, &iv),
            DECRYPTER_SUCCESS
        );
        assert_eq!(&recovered[..], &plain[..]);
    }

    #[test]
    fn missing_key_reports_failure() {
        let decryptor = CencDecryptor::new();
        let mut out = [0u8; 4];
        let status = decryptor.decrypt(&[1, 2, 3, 4], &mut out, &[0u8; KEY_ID_LEN], &[0u8; 16]);
        assert_ne!(status, DECRYPTER_SUCCESS);
    }

    #[test]
    fn factory_returns_none_without_keys() {
        let factory = DecryptorFactory::new();
        let (tx, rx) = std::sync::mpsc::channel();
        factory.create_decryptor(
            "anything.mp4",
            Box::new(move |d| tx.send(d.is_none()).unwrap()),
            Arc::new(|_, _| {}),
        );
        assert!(rx.recv().unwrap());
    }
}
