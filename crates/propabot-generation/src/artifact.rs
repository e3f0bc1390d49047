use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// A downloaded poster staged on disk until it has been uploaded.
///
/// Each artifact gets a unique random file name, so concurrent pipeline runs
/// never clobber each other. The file is removed by [`PosterArtifact::release`]
/// or, on any early-return path, when the value is dropped.
#[derive(Debug)]
pub struct PosterArtifact {
    file: NamedTempFile,
    extension: &'static str,
}

impl PosterArtifact {
    /// Write `bytes` into a new temp file under `dir` on the blocking pool.
    pub async fn write(dir: &Path, bytes: Vec<u8>) -> std::io::Result<Self> {
        let dir = dir.to_path_buf();
        let extension = sniff_extension(&bytes);
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<NamedTempFile> {
            std::fs::create_dir_all(&dir)?;
            let mut file = tempfile::Builder::new()
                .prefix("propaganda_poster_")
                .suffix(&format!(".{extension}"))
                .tempfile_in(&dir)?;
            file.write_all(&bytes)?;
            file.flush()?;
            Ok(file)
        })
        .await
        .map_err(std::io::Error::other)??;

        debug!(path = %file.path().display(), "poster artifact staged");
        Ok(Self { file, extension })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// File name used for the upload, e.g. `propaganda_poster.png`.
    pub fn file_name(&self) -> String {
        format!("propaganda_poster.{}", self.extension)
    }

    /// Delete the staged file. Failures are logged, never returned.
    pub async fn release(self) {
        let path: PathBuf = self.file.path().to_path_buf();
        let file = self.file;
        match tokio::task::spawn_blocking(move || file.close()).await {
            Ok(Ok(())) => debug!(path = %path.display(), "poster artifact removed"),
            Ok(Err(e)) => warn!(path = %path.display(), error = %e, "failed to delete temporary poster"),
            Err(e) => warn!(path = %path.display(), error = %e, "poster cleanup task failed"),
        }
    }
}

/// Pick a file extension from the image magic bytes.
fn sniff_extension(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"\x89PNG") {
        "png"
    } else if bytes.starts_with(&[0xFF, 0xD8]) {
        "jpg"
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "webp"
    } else {
        "png"
    }
}
