//! Background asset loading, and a bounded cache for the decoded audio which comes out the other end.
//!
//! Games ask for a lot of assets at awkward moments: a room change wants its background, its sprites and its music
//! all at once, and reading them on the game thread stalls the frame.  At the same time, decoded audio is many times
//! bigger than the compressed file it came from, and keeping every sound ever played around just grows forever.  This
//! crate provides a solution to both halves of that via two types and some traits:
//!
//! [LoadQueue] owns a single worker thread which reads assets through an [AssetResolver] in priority order.
//! [LoadQueue::submit] returns a [PendingLoad] straight away; the caller only blocks if and when it asks for the
//! bytes, with [LoadQueue::resolve_as_buffer] or [LoadQueue::resolve_as_stream].
//!
//! [DecodedCache] maps asset names to decoded samples produced by a [Decoder], handing out stable [SampleHandle]s and
//! remembering each sample's duration.  It evicts the least recently used sample which the decoder agrees to release
//! once it holds more than its configured number of samples, so something still playing is never pulled out from
//! under the audio driver.
//!
//! To use this crate, implement [AssetResolver] (or use [FilesystemResolver]) and [Decoder], then construct a
//! [LoadQueue] with a [LoadQueueConfig] and a [DecodedCache] with a [DecodedCacheConfig].  Asset names are lower-cased
//! everywhere before use.
mod decoded_cache;
mod filesystem_resolver;
mod load_queue;
mod pcm;
mod recency_list;
mod traits;

pub use decoded_cache::*;
pub use filesystem_resolver::*;
pub use load_queue::*;
pub use pcm::*;
pub use recency_list::*;
pub use traits::*;

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("not a pcm file")]
    struct NotPcm;

    /// Decodes `.pcm` files holding 16-bit stereo at 8khz.
    #[derive(Default)]
    struct PcmDecoder {
        next_payload: AtomicU32,
    }

    impl Decoder for PcmDecoder {
        type Payload = u32;
        type Error = NotPcm;

        fn decode(&self, bytes: &[u8], extension: &str) -> Result<Decoded<u32>, NotPcm> {
            if extension != "pcm" {
                return Err(NotPcm);
            }
            Ok(Decoded {
                payload: self.next_payload.fetch_add(1, Ordering::SeqCst),
                duration_ms: PcmFormat::new(2, 16, 8000).duration_ms(bytes.len()),
            })
        }

        fn release(&self, _payload: &u32) -> Result<(), NotPcm> {
            Ok(())
        }
    }

    // The usual flow: read in the background, then hand the bytes to the cache to decode.
    #[test]
    fn test_queue_feeds_cache() {
        let tmp_dir = tempfile::tempdir().unwrap();
        std::fs::write(tmp_dir.path().join("step.pcm"), vec![0u8; 32_000]).unwrap();
        std::fs::write(tmp_dir.path().join("door.pcm"), vec![0u8; 16_000]).unwrap();
        let resolver = Arc::new(FilesystemResolver::new(tmp_dir.path()));

        let queue = LoadQueue::new(resolver.clone(), Default::default());
        let cache = DecodedCache::new(resolver, PcmDecoder::default(), Default::default());
        queue.start().unwrap();

        let step = queue.submit("Step.PCM", 1);
        let door = queue.submit("door.pcm", 0);

        let bytes = queue.resolve_as_buffer(step);
        let step_handle = cache.load_from_bytes("step.pcm", &bytes).unwrap();
        assert_eq!(cache.duration_ms(step_handle), Some(1000.0));

        let bytes = queue.resolve_as_buffer(door);
        let door_handle = cache.load_from_bytes("door.pcm", &bytes).unwrap();
        assert_eq!(cache.duration_ms(door_handle), Some(500.0));

        // Already decoded, so going through the resolver is a hit.
        assert_eq!(cache.load("STEP.pcm").unwrap(), step_handle);
        assert_eq!(cache.len(), 2);
        queue.stop();
    }
}
