//! Byte sources for the `pcmflow` decoder stack.
//!
//! This crate defines the [`DataProvider`] contract (a random-access,
//! read-only byte stream with C-style `read`/`seek`/`tell` semantics) and its
//! three implementations:
//! - [`FileDataProvider`]: local files,
//! - [`HttpDataProvider`]: remote resources via HEAD + Range requests,
//! - [`MemoryDataProvider`]: a growable append-and-drain FIFO used as the
//!   sink/source for transmuxed bytes.
//!
//! [`DataProviderFactory`] resolves a path or URL to a provider and supports
//! user-registered creators for synthetic paths.

mod error;
mod factory;
mod file;
mod http;
mod memory;
mod provider;

pub use crate::error::{SourceError, SourceResult};
pub use crate::factory::{
    is_soundcloud_path, CreateProviderCallback, DataProviderFactory, ProviderCreator,
};
pub use crate::file::FileDataProvider;
pub use crate::http::HttpDataProvider;
pub use crate::memory::{MemoryDataProvider, DATA_PROVIDER_MEMORY_NAME};
pub use crate::provider::{
    DataProvider, ErrorCallback, LoadCallback, Whence, UNKNOWN_SIZE,
};
