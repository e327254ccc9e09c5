//! Content-addressed storage for uploaded receipt images.

use sha2::{Digest, Sha256};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::types::ImageRef;

pub fn sha256_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Streams the file through the hasher in fixed-size chunks.
pub fn sha256_file(path: &Path) -> io::Result<[u8; 32]> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

pub fn to_hex(hash: &[u8; 32]) -> String {
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

/// Images live at `<dir>/<first two hex chars>/<hex>.<ext>`, so the same
/// upload always lands on the same path.
#[derive(Debug, Clone)]
pub struct AttachmentStore {
    dir: PathBuf,
}

impl AttachmentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        AttachmentStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, hash_hex: &str, ext: &str) -> PathBuf {
        let prefix = hash_hex.get(..2).unwrap_or(hash_hex);
        self.dir.join(prefix).join(format!("{hash_hex}.{}", normalize_ext(ext)))
    }

    /// Stores `data` unless an identical upload is already present.
    pub async fn put(&self, data: &[u8], ext: &str) -> io::Result<ImageRef> {
        let hash_hex = to_hex(&sha256_bytes(data));
        let path = self.path_for(&hash_hex, ext);
        if tokio::fs::try_exists(&path).await? {
            debug!("attachment {hash_hex} already stored");
        } else {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, data).await?;
            debug!("stored attachment {}", path.display());
        }
        Ok(ImageRef { hash_hex, path })
    }

    /// Whether the stored file still hashes to its recorded digest.
    pub fn verify(&self, image: &ImageRef) -> io::Result<bool> {
        Ok(to_hex(&sha256_file(&image.path)?) == image.hash_hex)
    }
}

fn normalize_ext(ext: &str) -> String {
    let ext = ext.trim_start_matches('.').to_lowercase();
    if ext.is_empty() {
        "bin".to_string()
    } else {
        ext
    }
}
