//! Filesystem-backed artifact store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;

use super::ArtifactStore;

/// Recordings stored as files under a media root. Relative references
/// resolve against the root; absolute ones are used as given.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, audio_ref: &str) -> PathBuf {
        let path = Path::new(audio_ref);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn delete(&self, audio_ref: &str) -> Result<()> {
        let path = self.resolve(audio_ref);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "artifact deleted");
                Ok(())
            }
            // Already gone is the state we wanted
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
