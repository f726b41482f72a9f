//! Path → provider dispatch.
//!
//! Resolution order:
//! 1. user-registered creators, in registration order;
//! 2. `http://` / `https://` → [`HttpDataProvider`], with SoundCloud page
//!    URLs first resolved to their stream URL through the public resolve
//!    endpoint;
//! 3. everything else → [`FileDataProvider`].
//!
//! The selected provider's `load` runs before the creation callback fires,
//! so a non-`None` result is always ready to read.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use reqwest::blocking::Client;
use tracing::{debug, warn};

use crate::error::SourceError;
use crate::file::FileDataProvider;
use crate::http::HttpDataProvider;
use crate::provider::{DataProvider, ErrorCallback};

/// A user-registered creator: returns `Some(provider)` when it claims the
/// path, `None` to let resolution continue.
pub type ProviderCreator = Box<dyn Fn(&str) -> Option<Arc<dyn DataProvider>> + Send + Sync>;

/// Completion callback for [`DataProviderFactory::create_data_provider`].
pub type CreateProviderCallback = Box<dyn FnOnce(Option<Arc<dyn DataProvider>>) + Send>;

const SOUNDCLOUD_RESOLVE_URL: &str = "https://api.soundcloud.com/resolve?url=";

/// Whether the path points at SoundCloud (either the site or its API).
pub fn is_soundcloud_path(path: &str) -> bool {
    path.contains("soundcloud.com")
}

/// Factory resolving resource identifiers to loaded data providers.
pub struct DataProviderFactory {
    client: Client,
    creators: Mutex<Vec<(u64, ProviderCreator)>>,
    next_creator: AtomicU64,
}

impl Default for DataProviderFactory {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

impl DataProviderFactory {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            creators: Mutex::new(Vec::new()),
            next_creator: AtomicU64::new(0),
        }
    }

    /// Error domain for factory-level failures.
    pub fn domain() -> &'static str {
        "com.nativeformat.dataprovider.factory"
    }

    /// Register a creator; returns a handle for [`Self::remove_creator`].
    pub fn add_creator(&self, creator: ProviderCreator) -> u64 {
        let handle = self.next_creator.fetch_add(1, Ordering::SeqCst);
        self.creators.lock().push((handle, creator));
        handle
    }

    pub fn remove_creator(&self, handle: u64) {
        self.creators.lock().retain(|(h, _)| *h != handle);
    }

    /// Resolve `path` to a provider, load it, and hand it to `on_create`.
    ///
    /// On failure `on_error` fires once and `on_create` receives `None`.
    pub fn create_data_provider(
        self: &Arc<Self>,
        path: &str,
        on_create: CreateProviderCallback,
        on_error: ErrorCallback,
    ) {
        {
            let creators = self.creators.lock();
            for (_, creator) in creators.iter() {
                if let Some(provider) = creator(path) {
                    drop(creators);
                    load_and_deliver(provider, on_create, on_error);
                    return;
                }
            }
        }

        if path.starts_with("http://") || path.starts_with("https://") {
            if is_soundcloud_path(path) && !path.contains("/stream") {
                self.resolve_soundcloud(path.to_string(), on_create, on_error);
                return;
            }
            let provider: Arc<dyn DataProvider> =
                Arc::new(HttpDataProvider::new(path, self.client.clone()));
            load_and_deliver(provider, on_create, on_error);
            return;
        }

        let provider: Arc<dyn DataProvider> = Arc::new(FileDataProvider::new(path));
        load_and_deliver(provider, on_create, on_error);
    }

    /// SoundCloud page URLs carry no stream; GET the resolve endpoint,
    /// parse the JSON `stream_url` field, and recurse on it.
    fn resolve_soundcloud(
        self: &Arc<Self>,
        path: String,
        on_create: CreateProviderCallback,
        on_error: ErrorCallback,
    ) {
        let weak_this = Arc::downgrade(self);
        let client = self.client.clone();
        std::thread::spawn(move || {
            let Some(strong_this) = weak_this.upgrade() else {
                return;
            };
            let resolve_url = format!("{}{}", SOUNDCLOUD_RESOLVE_URL, path);
            match fetch_stream_url(&client, &resolve_url) {
                Ok(stream_url) => {
                    debug!(%path, %stream_url, "resolved SoundCloud stream URL");
                    strong_this.create_data_provider(&stream_url, on_create, on_error);
                }
                Err(e) => {
                    warn!(%path, error = %e, "SoundCloud resolve failed");
                    on_create(None);
                    on_error(DataProviderFactory::domain(), e.code());
                }
            }
        });
    }
}

fn fetch_stream_url(client: &Client, resolve_url: &str) -> Result<String, SourceError> {
    let response = client
        .get(resolve_url)
        .send()
        .map_err(|e| SourceError::http_transport(resolve_url, e))?;
    let status = response.status();
    if !status.is_success() {
        return Err(SourceError::http_status(status.as_u16(), resolve_url));
    }
    let body: serde_json::Value = response
        .json()
        .map_err(|e| SourceError::resolve(resolve_url, e))?;
    body.get("stream_url")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .ok_or_else(|| SourceError::resolve(resolve_url, "missing stream_url field"))
}

fn load_and_deliver(
    provider: Arc<dyn DataProvider>,
    on_create: CreateProviderCallback,
    on_error: ErrorCallback,
) {
    let delivered = provider.clone();
    provider.load(
        on_error,
        Box::new(move |success| {
            on_create(if success { Some(delivered) } else { None });
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDataProvider;
    use std::sync::mpsc;

    #[test]
    fn creators_run_in_registration_order() {
        let factory = Arc::new(DataProviderFactory::default());
        let first = factory.add_creator(Box::new(|path| {
            (path == "synthetic:a").then(|| {
                Arc::new(MemoryDataProvider::new("synthetic:a")) as Arc<dyn DataProvider>
            })
        }));
        factory.add_creator(Box::new(|path| {
            path.starts_with("synthetic:").then(|| {
                Arc::new(MemoryDataProvider::new("synthetic:fallback")) as Arc<dyn DataProvider>
            })
        }));

        let (tx, rx) = mpsc::channel();
        factory.create_data_provider(
            "synthetic:a",
            Box::new(move |provider| {
                tx.send(provider.map(|p| p.path())).unwrap();
            }),
            Arc::new(|_, _| {}),
        );
        assert_eq!(rx.recv().unwrap().as_deref(), Some("synthetic:a"));

        factory.remove_creator(first);
        let (tx, rx) = mpsc::channel();
        factory.create_data_provider(
            "synthetic:a",
            Box::new(move |provider| {
                tx.send(provider.map(|p| p.path())).unwrap();
            }),
            Arc::new(|_, _| {}),
        );
        assert_eq!(rx.recv().unwrap().as_deref(), Some("synthetic:fallback"));
    }

    #[test]
    fn unknown_paths_fall_back_to_file_provider() {
        let factory = Arc::new(DataProviderFactory::default());
        let (tx, rx) = mpsc::channel();
        factory.create_data_provider(
            "/definitely/not/a/real/file",
            Box::new(move |provider| {
                tx.send(provider.is_none()).unwrap();
            }),
            Arc::new(|domain, _| {
                assert_eq!(domain, "com.nativeformat.decoder.file");
            }),
        );
        assert!(rx.recv().unwrap());
    }
}
