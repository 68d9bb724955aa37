//! The [DecodedCache] remembers decoded samples so that playing the same sound twice doesn't decode it twice.
//!
//! Decoded payloads belong to an external subsystem (typically an audio driver), so the cache bounds how many of them
//! it keeps alive rather than how many bytes they use.  Once more than [DecodedCacheConfig::capacity] samples are live,
//! loading a new one asks the [Decoder] to release the least recently used sample.  The driver may refuse (the sample
//! is still playing), in which case the next least recently used sample is tried, and so on.  If every sample refuses,
//! the cache grows past its bound rather than failing the load.
//!
//! Samples are found either by asset name, or by the [SampleHandle] returned when they were first loaded.  Both kinds
//! of lookup count as a use.
use std::collections::HashMap;
use std::io::Error as IoError;
use std::sync::{Arc, Mutex};

use ahash::RandomState;
use log::{debug, warn};

use crate::*;

/// Soft bound on live samples used when a config doesn't say otherwise.
pub const DEFAULT_CACHE_CAPACITY: usize = 16;

/// A stable handle to a decoded sample.
///
/// Handles increase monotonically and are never reused by the cache which issued them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SampleHandle(pub(crate) u64);

impl SampleHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, derive_builder::Builder)]
pub struct DecodedCacheConfig {
    /// Number of live samples past which loading a new sample tries to evict an old one.
    #[builder(default = "DEFAULT_CACHE_CAPACITY")]
    pub capacity: usize,
}

impl Default for DecodedCacheConfig {
    fn default() -> Self {
        DecodedCacheConfig {
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError<DecoderError: std::error::Error + 'static> {
    #[error("unable to read asset {name}")]
    Resolve { name: String, source: IoError },
    #[error("unable to decode asset {name}")]
    Decode { name: String, source: DecoderError },
}

struct CachedSample<P> {
    payload: P,
    duration_ms: f32,
}

struct CacheState<P> {
    samples: RecencyList<CachedSample<P>>,
    next_handle: u64,
}

pub struct DecodedCache<ResolverImpl: AssetResolver, DecoderImpl: Decoder> {
    config: DecodedCacheConfig,
    state: Mutex<CacheState<DecoderImpl::Payload>>,
    /// Mutexes that stop multiple threads trying to decode the same asset.
    decoding_guards: Mutex<HashMap<String, Arc<Mutex<()>>, RandomState>>,
    resolver: ResolverImpl,
    decoder: DecoderImpl,
}

impl<ResolverImpl: AssetResolver, DecoderImpl: Decoder> DecodedCache<ResolverImpl, DecoderImpl> {
    pub fn new(
        resolver: ResolverImpl,
        decoder: DecoderImpl,
        config: DecodedCacheConfig,
    ) -> DecodedCache<ResolverImpl, DecoderImpl> {
        DecodedCache {
            resolver,
            decoder,
            state: Mutex::new(CacheState {
                samples: RecencyList::new(),
                next_handle: 0,
            }),
            decoding_guards: Default::default(),
            config,
        }
    }

    pub fn config(&self) -> &DecodedCacheConfig {
        &self.config
    }

    /// Get the handle for an asset, reading it through the resolver and decoding it if it isn't cached.
    pub fn load(&self, name: &str) -> Result<SampleHandle, CacheError<DecoderImpl::Error>> {
        self.find_or_decode(normalize_name(name), None)
    }

    /// Like [DecodedCache::load], but with bytes the caller already has, usually from a [PendingLoad].
    ///
    /// If the asset is already cached the bytes are ignored.
    pub fn load_from_bytes(
        &self,
        name: &str,
        bytes: &[u8],
    ) -> Result<SampleHandle, CacheError<DecoderImpl::Error>> {
        self.find_or_decode(normalize_name(name), Some(bytes))
    }

    /// Look an asset up by identity, marking it used.
    fn search_for_item(&self, key: &str) -> Option<SampleHandle> {
        self.state
            .lock()
            .unwrap()
            .samples
            .get_by_key(key)
            .map(|(handle, _)| handle)
    }

    /// Find or decode an item.  The cache state is only locked briefly, so lookups from other threads never wait on a
    /// read or a decode.
    fn find_or_decode(
        &self,
        key: String,
        bytes: Option<&[u8]>,
    ) -> Result<SampleHandle, CacheError<DecoderImpl::Error>> {
        if let Some(x) = self.search_for_item(&key) {
            return Ok(x);
        }

        // Stop any other threads from trying to decode this item, and make them wait on this thread to finish.
        let mutex = {
            let mut guard_inner = self.decoding_guards.lock().unwrap();
            let tmp = guard_inner
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())));
            (*tmp).clone()
        };
        let result = {
            let _guard: std::sync::MutexGuard<()> = mutex.lock().unwrap();
            self.find_or_decode_postchecked(&key, bytes)
        };

        // Nobody else holds this guard once the map and this thread are its only owners.
        let mut guards = self.decoding_guards.lock().unwrap();
        if Arc::strong_count(&mutex) == 2 {
            guards.remove(&key);
        }
        result
    }

    /// Read and decode an item, holding the guard which stops other threads decoding it in parallel.
    fn find_or_decode_postchecked(
        &self,
        key: &str,
        bytes: Option<&[u8]>,
    ) -> Result<SampleHandle, CacheError<DecoderImpl::Error>> {
        // Another thread may have finished while we waited on the guard.
        if let Some(x) = self.search_for_item(key) {
            return Ok(x);
        }

        let read;
        let bytes = match bytes {
            Some(x) => x,
            None => {
                read = self
                    .resolver
                    .load_buffer(key)
                    .map_err(|source| CacheError::Resolve {
                        name: key.to_string(),
                        source,
                    })?;
                &read[..]
            }
        };

        let decoded = match self.decoder.decode(bytes, &extension_hint(key)) {
            Ok(x) => x,
            Err(source) => {
                warn!("Unable to decode {}: {}", key, source);
                return Err(CacheError::Decode {
                    name: key.to_string(),
                    source,
                });
            }
        };

        let mut state = self.state.lock().unwrap();
        if state.samples.len() >= self.config.capacity {
            self.evict_one(&mut state);
        }

        let handle = SampleHandle(state.next_handle);
        state.next_handle += 1;
        debug!(
            "Decoded {} as {:?}: {}ms, {} bytes",
            key,
            handle,
            decoded.duration_ms,
            bytes.len()
        );
        state.samples.insert(
            Arc::from(key),
            handle,
            CachedSample {
                payload: decoded.payload,
                duration_ms: decoded.duration_ms,
            },
        );
        Ok(handle)
    }

    /// Evict the least recently used sample which the decoder agrees to release.
    fn evict_one(&self, state: &mut CacheState<DecoderImpl::Payload>) {
        let decoder = &self.decoder;
        let evicted = state
            .samples
            .evict_where(|sample| match decoder.release(&sample.payload) {
                Ok(()) => true,
                Err(e) => {
                    debug!("Not evicting a busy sample: {}", e);
                    false
                }
            });

        match evicted {
            Some((key, handle, _)) => debug!("Evicted {} ({:?})", key, handle),
            None => warn!(
                "No sample could be released; growing past the capacity of {} to {}",
                self.config.capacity,
                state.samples.len() + 1
            ),
        }
    }

    /// The playing time of a loaded sample, or `None` if the handle is unknown or was evicted.
    pub fn duration_ms(&self, handle: SampleHandle) -> Option<f32> {
        self.state
            .lock()
            .unwrap()
            .samples
            .get_by_handle(handle)
            .map(|x| x.duration_ms)
    }

    /// The decoder's payload for a loaded sample, or `None` if the handle is unknown or was evicted.
    pub fn payload(&self, handle: SampleHandle) -> Option<DecoderImpl::Payload> {
        self.state
            .lock()
            .unwrap()
            .samples
            .get_by_handle(handle)
            .map(|x| x.payload.clone())
    }

    /// Is this asset cached?  Doesn't count as a use.
    pub fn contains(&self, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .samples
            .contains_key(&normalize_name(name))
    }

    /// Number of live samples.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
