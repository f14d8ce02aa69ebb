//! Content-addressed image layers.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use skiff_proto::ImageDescription;
use tokio::task::JoinHandle;

use crate::error::{LocationError, Result};

/// Where layer bytes and image descriptions come from.
pub trait LayerSource: Send + Sync {
    /// Description of an image.
    fn description(&self, image_id: &str) -> Result<ImageDescription>;

    /// Bytes of one layer tarball.
    fn layer(&self, sha256: &str) -> Result<Vec<u8>>;
}

/// A directory holding `<sha256>.tar` layers and `<image>.json` descriptions.
///
/// `:` and `/` in image ids are stored as `_`.
#[derive(Debug, Clone)]
pub struct DirLayerSource {
    root: PathBuf,
}

impl DirLayerSource {
    /// Source rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl LayerSource for DirLayerSource {
    fn description(&self, image_id: &str) -> Result<ImageDescription> {
        let name = image_id.replace([':', '/'], "_");
        let content = std::fs::read_to_string(self.root.join(format!("{name}.json")))?;
        Ok(serde_json::from_str(&content)?)
    }

    fn layer(&self, sha256: &str) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.root.join(format!("{sha256}.tar")))?)
    }
}

/// Check that `data` hashes to `sha256`.
pub fn verify_layer(sha256: &str, data: &[u8]) -> Result<()> {
    let actual = hex::encode(Sha256::digest(data));
    if actual.eq_ignore_ascii_case(sha256) {
        Ok(())
    } else {
        Err(LocationError::Layer {
            sha256: sha256.to_string(),
            reason: format!("content hashes to {actual}"),
        })
    }
}

/// Result of [`Location::ensure_image_uploaded`](crate::Location::ensure_image_uploaded).
#[derive(Debug)]
pub struct ImageUpload {
    /// Full layer stack of the image, bottom first.
    pub layers: Vec<String>,
    /// Layers the broker was missing.
    pub missing: Vec<String>,
    pub(crate) task: JoinHandle<Result<()>>,
}

impl ImageUpload {
    /// Wait for the background upload to finish.
    pub async fn wait(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| LocationError::Protocol(format!("layer upload task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_verify_layer() {
        assert!(verify_layer(HELLO_SHA, b"hello").is_ok());
        let err = verify_layer(HELLO_SHA, b"goodbye").unwrap_err();
        assert!(err.to_string().starts_with(&format!("layer {HELLO_SHA}")));
    }

    #[test]
    fn test_dir_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(format!("{HELLO_SHA}.tar")), b"hello").unwrap();
        let description = ImageDescription::from_layers([format!("sha256:{HELLO_SHA}")]);
        std::fs::write(
            dir.path().join("nginx_latest.json"),
            serde_json::to_string(&description).unwrap(),
        )
        .unwrap();

        let source = DirLayerSource::new(dir.path());
        assert_eq!(source.description("nginx:latest").unwrap(), description);
        assert_eq!(source.layer(HELLO_SHA).unwrap(), b"hello");
        assert!(source.layer("missing").is_err());
    }
}
