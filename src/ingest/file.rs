//! Local video file frame source.
//!
//! Playback loops: at end of file the source rewinds and the read that hit
//! the end reports a transient miss.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::synthetic::SyntheticScene;
use super::FrameSource;
use crate::frame::Frame;

const SYNTHETIC_WIDTH: u32 = 640;
const SYNTHETIC_HEIGHT: u32 = 480;

/// Local file frame source.
pub struct FileSource {
    path: PathBuf,
    backend: Option<FileBackend>,
    frames_read: u64,
}

enum FileBackend {
    Synthetic(SyntheticScene),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !is_local_file_path(&path.to_string_lossy()) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes)"
            ));
        }
        Ok(Self {
            path: path.to_path_buf(),
            backend: None,
            frames_read: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    fn is_synthetic(&self) -> bool {
        self.path.to_string_lossy().starts_with("stub://")
    }
}

impl FrameSource for FileSource {
    fn open(&mut self) -> Result<()> {
        self.close();
        if self.is_synthetic() {
            self.backend = Some(FileBackend::Synthetic(SyntheticScene::new(
                SYNTHETIC_WIDTH,
                SYNTHETIC_HEIGHT,
            )));
            log::info!("FileSource: opened {} (synthetic)", self.path.display());
            return Ok(());
        }
        if !self.path.is_file() {
            return Err(anyhow!("video file {} does not exist", self.path.display()));
        }
        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            self.backend = Some(FileBackend::Ffmpeg(FfmpegFileSource::open(&self.path)?));
            log::info!("FileSource: opened {} (ffmpeg)", self.path.display());
            Ok(())
        }
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        {
            Err(anyhow!(
                "file ingestion requires the ingest-file-ffmpeg feature"
            ))
        }
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        let frame = match self.backend.as_mut() {
            None => return Err(anyhow!("file source is not open")),
            Some(FileBackend::Synthetic(scene)) => Some(scene.next_frame()),
            #[cfg(feature = "ingest-file-ffmpeg")]
            Some(FileBackend::Ffmpeg(source)) => source.read()?,
        };
        if frame.is_some() {
            self.frames_read += 1;
        }
        Ok(frame)
    }

    fn close(&mut self) {
        if self.backend.take().is_some() {
            log::debug!("FileSource: closed {}", self.path.display());
        }
    }

    fn is_open(&self) -> bool {
        self.backend.is_some()
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}
