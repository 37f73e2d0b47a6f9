use std::io;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, TempPath};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Upload being streamed into a scratch file. Dropping it deletes the file.
pub struct UploadWriter {
    file: File,
    path: TempPath,
    written: u64,
}

impl UploadWriter {
    /// Create `upload-*<extension>` under `root`.
    pub fn create(root: &Path, extension: &str) -> io::Result<Self> {
        let (file, path) = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(extension)
            .tempfile_in(root)?
            .into_parts();
        Ok(Self {
            file: File::from_std(file),
            path,
            written: 0,
        })
    }

    pub async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    pub async fn finish(mut self) -> io::Result<ScratchVideo> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(ScratchVideo {
            path: self.path,
            size_bytes: self.written,
        })
    }
}

/// Fully written upload awaiting processing.
pub struct ScratchVideo {
    path: TempPath,
    size_bytes: u64,
}

impl ScratchVideo {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

/// Every scratch resource a job owns: the uploaded video and the directory of
/// sampled frames. Both are removed by [`JobScratch::close`], or on drop if the
/// job never gets that far.
pub struct JobScratch {
    video: ScratchVideo,
    frames: TempDir,
}

impl JobScratch {
    pub fn new(root: &Path, video: ScratchVideo) -> io::Result<Self> {
        let frames = tempfile::Builder::new().prefix("frames-").tempdir_in(root)?;
        Ok(Self { video, frames })
    }

    pub fn video_path(&self) -> &Path {
        self.video.path()
    }

    pub fn video_size(&self) -> u64 {
        self.video.size_bytes()
    }

    pub fn frames_dir(&self) -> &Path {
        self.frames.path()
    }

    /// Paths that `close` will delete, for logging and tests.
    pub fn paths(&self) -> (PathBuf, PathBuf) {
        (self.video_path().to_path_buf(), self.frames_dir().to_path_buf())
    }

    /// Delete both resources now, logging anything that could not be removed.
    pub fn close(self, job_id: Uuid) {
        let (video, frames) = self.paths();
        if let Err(e) = self.video.path.close() {
            tracing::warn!(prediction_id = %job_id, path = %video.display(), error = %e, "Failed to remove scratch video");
        }
        if let Err(e) = self.frames.close() {
            tracing::warn!(prediction_id = %job_id, path = %frames.display(), error = %e, "Failed to remove scratch frames");
        }
        tracing::debug!(prediction_id = %job_id, "Scratch resources released");
    }
}
