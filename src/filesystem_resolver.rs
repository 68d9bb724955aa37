use std::fs::File;
use std::io::*;
use std::path::{Path, PathBuf};

use crate::*;

/// Serves assets straight out of a directory tree, one file per asset.
///
/// Asset names are `/`-separated paths relative to the root, for example `audio/theme.ogg`.  Names are resolved
/// lexically against the root, so `..` segments never touch the filesystem, and a name which would resolve to
/// somewhere above the root is refused with [ErrorKind::Other] rather than opened.
#[derive(Debug)]
pub struct FilesystemResolver {
    root_path: PathBuf,
}

impl FilesystemResolver {
    pub fn new(root_path: &Path) -> FilesystemResolver {
        FilesystemResolver {
            root_path: root_path.to_path_buf(),
        }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Where `name` lives on disk.  Fails for names resolving outside the root.
    pub fn asset_path(&self, name: &str) -> Result<PathBuf> {
        let candidate = relative_path::RelativePath::new(name).to_logical_path(&self.root_path);
        if candidate.starts_with(&self.root_path) {
            Ok(candidate)
        } else {
            Err(Error::new(
                ErrorKind::Other,
                format!("asset {} resolves outside {}", name, self.root_path.display()),
            ))
        }
    }
}

impl AssetResolver for FilesystemResolver {
    type Reader = File;

    fn open(&self, name: &str) -> Result<File> {
        File::open(self.asset_path(name)?)
    }

    fn exists(&self, name: &str) -> bool {
        self.asset_path(name)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }
}

impl AssetReader for File {
    fn get_size(&self) -> Result<u64> {
        let meta = self.metadata()?;
        Ok(meta.len())
    }
}
