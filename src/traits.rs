//! The seams between this crate and the rest of the engine.
//!
//! An [AssetResolver] turns asset names into [AssetReader]s over their bytes.  A [Decoder] turns those bytes into a
//! playable payload owned by some other subsystem (usually an audio driver), and knows how to ask that subsystem to
//! release it again.
use std::io::{Error, Read};
use std::path::Path;
use std::sync::Arc;

/// Largest up-front allocation [AssetResolver::load_buffer] makes from a reader's reported size.
pub const MAX_SIZE_HINT: u64 = 16 * 1024 * 1024;

/// Find an asset by name and "open" it.
///
/// Names handed to a resolver by this crate have already been through [normalize_name].
pub trait AssetResolver: Send + Sync + 'static {
    type Reader: AssetReader;

    /// Open an asset.
    fn open(&self, name: &str) -> Result<Self::Reader, Error>;

    /// Does this asset exist?
    fn exists(&self, name: &str) -> bool {
        self.open(name).is_ok()
    }

    /// Read an entire asset into memory.
    ///
    /// The reader's size is only a hint: at most [MAX_SIZE_HINT] bytes are reserved up front.
    fn load_buffer(&self, name: &str) -> Result<Vec<u8>, Error> {
        let mut reader = self.open(name)?;
        let size = reader.get_size()?.min(MAX_SIZE_HINT);
        let mut dest = Vec::with_capacity(size as usize);
        reader.read_to_end(&mut dest)?;
        Ok(dest)
    }
}

impl<T: AssetResolver> AssetResolver for Arc<T> {
    type Reader = T::Reader;

    fn open(&self, name: &str) -> Result<Self::Reader, Error> {
        (**self).open(name)
    }

    fn exists(&self, name: &str) -> bool {
        (**self).exists(name)
    }

    fn load_buffer(&self, name: &str) -> Result<Vec<u8>, Error> {
        (**self).load_buffer(name)
    }
}

/// A reader returned from a resolver.
///
/// Readers should handle closing in their drop implementations.
pub trait AssetReader: Read + Send + 'static {
    /// Return the size of this asset once read.
    fn get_size(&self) -> Result<u64, Error>;
}

impl AssetReader for std::io::Cursor<Vec<u8>> {
    fn get_size(&self) -> Result<u64, Error> {
        Ok(self.get_ref().len() as u64)
    }
}

/// The result of a successful decode.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<P> {
    /// Opaque id of the decoded resource, owned by whatever produced it.
    pub payload: P,
    /// How long the resource plays for.
    pub duration_ms: f32,
}

/// A `Decoder` knows how to get from raw bytes to a payload held by an external subsystem, and how to give that
/// payload back.
///
/// The cache never owns payloads outright: it only holds the id and the right to ask for release.
pub trait Decoder: Send + Sync + 'static {
    type Payload: Clone + Send + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Decode `bytes`.  `extension` is the lower-cased file extension of the asset, or empty.
    fn decode(&self, bytes: &[u8], extension: &str) -> Result<Decoded<Self::Payload>, Self::Error>;

    /// Ask for a payload to be released.
    ///
    /// Returning an error means the payload is busy (for example, still queued on a playing source) and must be kept.
    fn release(&self, payload: &Self::Payload) -> Result<(), Self::Error>;
}

/// Lower-case an asset name, which is the form used for every resolver lookup and as the cache identity.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
}

/// The format hint passed to a [Decoder]: the lower-cased extension of `name`, or `""`.
pub fn extension_hint(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|x| x.to_str())
        .map(|x| x.to_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_and_hints() {
        assert_eq!(normalize_name("Music/Theme.OGG"), "music/theme.ogg");
        assert_eq!(extension_hint("Music/Theme.OGG"), "ogg");
        assert_eq!(extension_hint("sound.wav"), "wav");
        assert_eq!(extension_hint("room1"), "");
        assert_eq!(extension_hint("dir.d/noext"), "");
    }

    #[test]
    fn test_default_load_buffer() {
        struct OneAsset;

        impl AssetResolver for OneAsset {
            type Reader = std::io::Cursor<Vec<u8>>;

            fn open(&self, name: &str) -> Result<Self::Reader, Error> {
                if name == "a.bin" {
                    Ok(std::io::Cursor::new(vec![1, 2, 3]))
                } else {
                    Err(Error::new(std::io::ErrorKind::NotFound, "no such asset"))
                }
            }
        }

        let resolver = Arc::new(OneAsset);
        assert!(resolver.exists("a.bin"));
        assert!(!resolver.exists("b.bin"));
        assert_eq!(resolver.load_buffer("a.bin").unwrap(), vec![1, 2, 3]);
        assert_eq!(
            resolver.load_buffer("b.bin").unwrap_err().kind(),
            std::io::ErrorKind::NotFound
        );
    }

    /// Claims to be enormous but only holds a few bytes.
    struct LyingReader(std::io::Cursor<Vec<u8>>);

    impl Read for LyingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.0.read(buf)
        }
    }

    impl AssetReader for LyingReader {
        fn get_size(&self) -> Result<u64, Error> {
            Ok(u64::MAX)
        }
    }

    #[test]
    fn test_size_is_only_a_hint() {
        struct Liar;

        impl AssetResolver for Liar {
            type Reader = LyingReader;

            fn open(&self, _name: &str) -> Result<Self::Reader, Error> {
                Ok(LyingReader(std::io::Cursor::new(vec![4, 5, 6, 7])))
            }
        }

        assert_eq!(Liar.load_buffer("huge.ogg").unwrap(), vec![4, 5, 6, 7]);
    }
}
