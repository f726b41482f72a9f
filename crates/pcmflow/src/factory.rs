//! Layered decoder factories.
//!
//! The public factory is the composition Common → LGPL → Transmuxer →
//! Normalization → Service, applied outermost-last. Each layer resolves an
//! effective MIME (caller-supplied, else inferred from its own extension
//! table), builds the decoder it owns when the MIME matches, and otherwise
//! delegates inward. The LGPL layer adds a universal fallback: anything the
//! inner layers declined is handed to the general MPEG decoder, with a
//! decryptor attached when one can be built for the path.

use std::sync::Arc;

use tracing::debug;

use pcmflow_dash::{DecryptorFactory, DASH_FILE_INDICATOR, DASH_FILE_INDICATOR_OFFSET};
use pcmflow_source::{DataProvider, DataProviderFactory, ErrorCallback, Whence};

use crate::codec::{FlacDecoder, MidiDecoder, MpegDecoder, OggDecoder, SpeexDecoder, WavDecoder};
use crate::decoder::Decoder;
use crate::manifest::ManifestFactory;
use crate::mime::{self, effective_mime, extension_rules, ExtensionRule};
use crate::normalize::NormalizationDecoder;
use crate::transmux::TransmuxDecoder;

/// Default normalization target.
pub const STANDARD_SAMPLE_RATE: f64 = 44_100.0;
pub const STANDARD_CHANNELS: usize = 2;

/// Completion callback for decoder creation. `None` means no layer claimed
/// the request or the claimed decoder failed to load.
pub type CreateDecoderCallback = Box<dyn FnOnce(Option<Arc<dyn Decoder>>) + Send>;

/// One layer of the decoder factory stack.
pub trait DecoderFactory: Send + Sync {
    fn create_decoder(
        self: Arc<Self>,
        path: &str,
        mime: &str,
        on_create: CreateDecoderCallback,
        on_error: ErrorCallback,
        sample_rate: f64,
        channels: usize,
    );
}

/// Load a freshly constructed decoder and deliver it on success.
fn load_and_deliver(
    decoder: Arc<dyn Decoder>,
    on_create: CreateDecoderCallback,
    on_error: ErrorCallback,
) {
    let delivered = decoder.clone();
    decoder.load(
        on_error,
        Box::new(move |success| on_create(success.then_some(delivered))),
    );
}

// ---------------------------------------------------------------------------
// Common layer: FLAC / Ogg / WAV / MIDI / Speex.
// ---------------------------------------------------------------------------

pub struct CommonFactory {
    providers: Arc<DataProviderFactory>,
    extensions: Vec<ExtensionRule>,
}

impl CommonFactory {
    pub fn new(providers: Arc<DataProviderFactory>) -> Self {
        Self {
            providers,
            extensions: extension_rules(&[
                (mime::MIME_TYPE_OGG, r"^.*\.ogg$|^.*\.opus$"),
                (mime::MIME_TYPE_WAV, r"^.*\.wav$"),
                (mime::MIME_TYPE_FLAC, r"^.*\.flac$"),
                (mime::MIME_TYPE_MIDI, r"^midi:.*$"),
                (mime::MIME_TYPE_SPEEX, r"^.*\.spx$"),
            ]),
        }
    }

    fn with_provider(
        &self,
        path: &str,
        on_error: ErrorCallback,
        build: impl FnOnce(Arc<dyn DataProvider>) -> Arc<dyn Decoder> + Send + 'static,
        on_create: CreateDecoderCallback,
    ) {
        let error = on_error.clone();
        self.providers.create_data_provider(
            path,
            Box::new(move |provider| {
                let Some(provider) = provider else {
                    on_create(None);
                    return;
                };
                load_and_deliver(build(provider), on_create, error);
            }),
            on_error,
        );
    }
}

impl DecoderFactory for CommonFactory {
    fn create_decoder(
        self: Arc<Self>,
        path: &str,
        mime: &str,
        on_create: CreateDecoderCallback,
        on_error: ErrorCallback,
        _sample_rate: f64,
        _channels: usize,
    ) {
        let Some(effective) = effective_mime(path, mime, &self.extensions) else {
            on_create(None);
            return;
        };
        if mime::OGG_MIME_TYPES.contains(&effective) {
            self.with_provider(
                path,
                on_error,
                |p| Arc::new(OggDecoder::new(p)),
                on_create,
            );
        } else if mime::WAV_MIME_TYPES.contains(&effective) {
            self.with_provider(
                path,
                on_error,
                |p| Arc::new(WavDecoder::new(p)),
                on_create,
            );
        } else if mime::FLAC_MIME_TYPES.contains(&effective) {
            self.with_provider(
                path,
                on_error,
                |p| Arc::new(FlacDecoder::new(p)),
                on_create,
            );
        } else if mime::MIDI_MIME_TYPES.contains(&effective) {
            match MidiDecoder::new(path) {
                Some(decoder) => load_and_deliver(Arc::new(decoder), on_create, on_error),
                None => on_create(None),
            }
        } else if mime::SPEEX_MIME_TYPES.contains(&effective) {
            self.with_provider(
                path,
                on_error,
                |p| Arc::new(SpeexDecoder::new(p)),
                on_create,
            );
        } else {
            on_create(None);
        }
    }
}

// ---------------------------------------------------------------------------
// LGPL layer: general codec fallback, optionally decrypting.
// ---------------------------------------------------------------------------

pub struct LgplFactory {
    inner: Arc<dyn DecoderFactory>,
    providers: Arc<DataProviderFactory>,
    decryptors: Arc<DecryptorFactory>,
}

impl LgplFactory {
    pub fn new(
        inner: Arc<dyn DecoderFactory>,
        providers: Arc<DataProviderFactory>,
        decryptors: Arc<DecryptorFactory>,
    ) -> Self {
        Self {
            inner,
            providers,
            decryptors,
        }
    }
}

impl DecoderFactory for LgplFactory {
    fn create_decoder(
        self: Arc<Self>,
        path: &str,
        mime: &str,
        on_create: CreateDecoderCallback,
        on_error: ErrorCallback,
        sample_rate: f64,
        channels: usize,
    ) {
        let strong_this = self.clone();
        let path_owned = path.to_string();
        let mime_owned = mime.to_string();
        let error = on_error.clone();
        self.inner.clone().create_decoder(
            path,
            mime,
            Box::new(move |decoder| {
                if let Some(decoder) = decoder {
                    on_create(Some(decoder));
                    return;
                }
                // Nothing inner claimed it: universal fallback.
                let providers = strong_this.providers.clone();
                let creation_error = error.clone();
                let decrypt_path = path_owned.clone();
                strong_this.decryptors.create_decryptor(
                    &decrypt_path,
                    Box::new(move |decryptor| {
                        let mime_for_decoder = mime_owned.clone();
                        let error_for_load = creation_error.clone();
                        providers.create_data_provider(
                            &path_owned,
                            Box::new(move |provider| {
                                let Some(provider) = provider else {
                                    on_create(None);
                                    return;
                                };
                                let decoder: Arc<dyn Decoder> = Arc::new(MpegDecoder::new(
                                    provider,
                                    decryptor,
                                    mime_for_decoder,
                                ));
                                load_and_deliver(decoder, on_create, error_for_load);
                            }),
                            creation_error,
                        );
                    }),
                    error,
                );
            }),
            on_error,
            sample_rate,
            channels,
        );
    }
}

// ---------------------------------------------------------------------------
// Transmuxer layer: DASH MP4 detection and wrap.
// ---------------------------------------------------------------------------

pub struct TransmuxerFactory {
    inner: Arc<dyn DecoderFactory>,
    providers: Arc<DataProviderFactory>,
    manifests: Arc<ManifestFactory>,
    decryptors: Arc<DecryptorFactory>,
    extensions: Vec<ExtensionRule>,
}

impl TransmuxerFactory {
    pub fn new(
        inner: Arc<dyn DecoderFactory>,
        providers: Arc<DataProviderFactory>,
        manifests: Arc<ManifestFactory>,
        decryptors: Arc<DecryptorFactory>,
    ) -> Self {
        Self {
            inner,
            providers,
            manifests,
            decryptors,
            extensions: extension_rules(&[(mime::MIME_TYPE_DASH_MP4, r"^.*\.mp4$")]),
        }
    }
}

/// Probe the provider for the DASH brand at byte offset 4, restoring the
/// read position.
fn is_dash_stream(provider: &Arc<dyn DataProvider>) -> bool {
    provider.seek(DASH_FILE_INDICATOR_OFFSET, Whence::Set);
    let mut indicator = [0u8; DASH_FILE_INDICATOR.len()];
    let n = provider.read(&mut indicator, 1, indicator.len());
    provider.seek(0, Whence::Set);
    n == indicator.len() && &indicator == DASH_FILE_INDICATOR
}

impl DecoderFactory for TransmuxerFactory {
    fn create_decoder(
        self: Arc<Self>,
        path: &str,
        mime: &str,
        on_create: CreateDecoderCallback,
        on_error: ErrorCallback,
        sample_rate: f64,
        channels: usize,
    ) {
        let effective = effective_mime(path, mime, &self.extensions).unwrap_or("");
        if !mime::DASH_MP4_MIME_TYPES.contains(&effective) {
            self.inner.clone().create_decoder(
                path,
                mime,
                on_create,
                on_error,
                sample_rate,
                channels,
            );
            return;
        }

        let strong_this = self.clone();
        let path_owned = path.to_string();
        let mime_owned = mime.to_string();
        let error = on_error.clone();
        self.providers.clone().create_data_provider(
            path,
            Box::new(move |provider| {
                let Some(provider) = provider else {
                    on_create(None);
                    return;
                };
                if !is_dash_stream(&provider) {
                    // Plain MP4: let the inner chain (LGPL fallback) have it.
                    strong_this.inner.clone().create_decoder(
                        &path_owned,
                        &mime_owned,
                        on_create,
                        error,
                        sample_rate,
                        channels,
                    );
                    return;
                }
                debug!(path = %path_owned, "dash stream detected");
                let manifest = strong_this.manifests.create_manifest(&path_owned);
                let creation_error = error.clone();
                let transmux_this = strong_this.clone();
                let decrypt_path = path_owned.clone();
                strong_this.decryptors.create_decryptor(
                    &decrypt_path,
                    Box::new(move |decryptor| {
                        let decoder: Arc<dyn Decoder> = Arc::new(TransmuxDecoder::new(
                            provider,
                            transmux_this.providers.clone(),
                            transmux_this.inner.clone(),
                            manifest,
                            decryptor,
                            &path_owned,
                        ));
                        load_and_deliver(decoder, on_create, creation_error);
                    }),
                    error,
                );
            }),
            on_error,
        );
    }
}

// ---------------------------------------------------------------------------
// Normalization layer.
// ---------------------------------------------------------------------------

pub struct NormalizationFactory {
    inner: Arc<dyn DecoderFactory>,
}

impl NormalizationFactory {
    pub fn new(inner: Arc<dyn DecoderFactory>) -> Self {
        Self { inner }
    }
}

impl DecoderFactory for NormalizationFactory {
    fn create_decoder(
        self: Arc<Self>,
        path: &str,
        mime: &str,
        on_create: CreateDecoderCallback,
        on_error: ErrorCallback,
        sample_rate: f64,
        channels: usize,
    ) {
        let error = on_error.clone();
        self.inner.clone().create_decoder(
            path,
            mime,
            Box::new(move |decoder| {
                let Some(decoder) = decoder else {
                    on_create(None);
                    return;
                };
                // Nothing to do for an already conforming decoder.
                if decoder.sample_rate() == sample_rate && decoder.channels() == channels {
                    on_create(Some(decoder));
                    return;
                }
                let normalized: Arc<dyn Decoder> =
                    Arc::new(NormalizationDecoder::new(decoder, sample_rate, channels));
                load_and_deliver(normalized, on_create, error);
            }),
            on_error,
            sample_rate,
            channels,
        );
    }
}

// ---------------------------------------------------------------------------
// Service layer: service-specific MIME overrides.
// ---------------------------------------------------------------------------

pub struct ServiceFactory {
    inner: Arc<dyn DecoderFactory>,
}

impl ServiceFactory {
    pub fn new(inner: Arc<dyn DecoderFactory>) -> Self {
        Self { inner }
    }
}

impl DecoderFactory for ServiceFactory {
    fn create_decoder(
        self: Arc<Self>,
        path: &str,
        mime: &str,
        on_create: CreateDecoderCallback,
        on_error: ErrorCallback,
        sample_rate: f64,
        channels: usize,
    ) {
        let mime = if pcmflow_source::is_soundcloud_path(path) {
            mime::MIME_TYPE_MP3
        } else {
            mime
        };
        self.inner.clone().create_decoder(
            path,
            mime,
            on_create,
            on_error,
            sample_rate,
            channels,
        );
    }
}

// ---------------------------------------------------------------------------
// Assembled factory.
// ---------------------------------------------------------------------------

/// The fully composed factory stack plus its shared collaborators.
pub struct Factory {
    chain: Arc<dyn DecoderFactory>,
    providers: Arc<DataProviderFactory>,
    manifests: Arc<ManifestFactory>,
    decryptors: Arc<DecryptorFactory>,
}

impl Factory {
    /// Compose the full chain with fresh collaborators.
    pub fn new() -> Self {
        Self::with_collaborators(
            Arc::new(DataProviderFactory::default()),
            Arc::new(ManifestFactory::new()),
            Arc::new(DecryptorFactory::new()),
        )
    }

    pub fn with_collaborators(
        providers: Arc<DataProviderFactory>,
        manifests: Arc<ManifestFactory>,
        decryptors: Arc<DecryptorFactory>,
    ) -> Self {
        let common: Arc<dyn DecoderFactory> = Arc::new(CommonFactory::new(providers.clone()));
        let lgpl: Arc<dyn DecoderFactory> = Arc::new(LgplFactory::new(
            common,
            providers.clone(),
            decryptors.clone(),
        ));
        let transmuxer: Arc<dyn DecoderFactory> = Arc::new(TransmuxerFactory::new(
            lgpl,
            providers.clone(),
            manifests.clone(),
            decryptors.clone(),
        ));
        let normalization: Arc<dyn DecoderFactory> =
            Arc::new(NormalizationFactory::new(transmuxer));
        let chain: Arc<dyn DecoderFactory> = Arc::new(ServiceFactory::new(normalization));
        Self {
            chain,
            providers,
            manifests,
            decryptors,
        }
    }

    pub fn providers(&self) -> &Arc<DataProviderFactory> {
        &self.providers
    }

    pub fn manifests(&self) -> &Arc<ManifestFactory> {
        &self.manifests
    }

    pub fn decryptors(&self) -> &Arc<DecryptorFactory> {
        &self.decryptors
    }

    /// Create a decoder for `path`, normalized to `(sample_rate, channels)`.
    pub fn create_decoder(
        &self,
        path: &str,
        mime_hint: &str,
        on_create: CreateDecoderCallback,
        on_error: ErrorCallback,
        sample_rate: f64,
        channels: usize,
    ) {
        self.chain.clone().create_decoder(
            path,
            mime_hint,
            on_create,
            on_error,
            sample_rate,
            channels,
        );
    }
}

impl Default for Factory {
    fn default() -> Self {
        Self::new()
    }
}
