//! Artifact loading from disk.
//!
//! Reads the image, flow directory or video named on the command line into
//! an in-memory [`Artifact`]. Nothing downstream touches the filesystem.

use crate::models::{Artifact, FlowStep, MediaData};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("webp", "image/webp"),
];

const VIDEO_EXTENSIONS: &[(&str, &str)] = &[
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
    ("mov", "video/quicktime"),
];

/// Loading problems for an artifact on disk.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("unsupported file type for {kind}: {}", .path.display())]
    UnsupportedType { kind: &'static str, path: PathBuf },
    #[error("{} is {size} bytes, above the inline limit of {limit}", .path.display())]
    TooLarge { path: PathBuf, size: u64, limit: u64 },
    #[error("{} is empty", .0.display())]
    Empty(PathBuf),
    #[error("flow directory {} contains no images", .0.display())]
    EmptyFlow(PathBuf),
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Loads artifacts, refusing files larger than the inline limit.
#[derive(Debug, Clone)]
pub struct ArtifactLoader {
    max_inline_bytes: u64,
}

impl ArtifactLoader {
    pub fn new(max_inline_bytes: u64) -> Self {
        Self { max_inline_bytes }
    }

    pub fn load_image(&self, path: &Path) -> Result<Artifact, ArtifactError> {
        let media = self.read_media(path, "image", IMAGE_EXTENSIONS)?;
        info!(path = %path.display(), bytes = media.bytes.len(), "loaded image");
        Ok(Artifact::Image(media))
    }

    pub fn load_video(&self, path: &Path) -> Result<Artifact, ArtifactError> {
        let media = self.read_media(path, "video", VIDEO_EXTENSIONS)?;
        info!(path = %path.display(), bytes = media.bytes.len(), "loaded video");
        Ok(Artifact::Video(media))
    }

    /// Load every image directly inside `dir`, in file-name order.
    ///
    /// A `.txt` file with the same stem as an image becomes that step's
    /// description; otherwise the description is the file stem.
    pub fn load_flow(&self, dir: &Path) -> Result<Artifact, ArtifactError> {
        if !dir.is_dir() {
            return Err(ArtifactError::NotFound(dir.to_path_buf()));
        }

        let mut steps = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            if mime_for(path, IMAGE_EXTENSIONS).is_none() {
                debug!(path = %path.display(), "skipping non-image file in flow");
                continue;
            }

            let image = self.read_media(path, "image", IMAGE_EXTENSIONS)?;
            let description = step_description(path)?;
            steps.push(FlowStep { image, description });
        }

        if steps.is_empty() {
            return Err(ArtifactError::EmptyFlow(dir.to_path_buf()));
        }

        info!(path = %dir.display(), steps = steps.len(), "loaded flow");
        Ok(Artifact::Flow(steps))
    }

    fn read_media(
        &self,
        path: &Path,
        kind: &'static str,
        table: &[(&str, &'static str)],
    ) -> Result<MediaData, ArtifactError> {
        let metadata = fs::metadata(path).map_err(|_| ArtifactError::NotFound(path.to_path_buf()))?;
        let mime_type = mime_for(path, table).ok_or_else(|| ArtifactError::UnsupportedType {
            kind,
            path: path.to_path_buf(),
        })?;

        if metadata.len() > self.max_inline_bytes {
            return Err(ArtifactError::TooLarge {
                path: path.to_path_buf(),
                size: metadata.len(),
                limit: self.max_inline_bytes,
            });
        }

        let bytes = fs::read(path).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if bytes.is_empty() {
            return Err(ArtifactError::Empty(path.to_path_buf()));
        }

        Ok(MediaData::new(mime_type, bytes))
    }
}

fn mime_for(path: &Path, table: &[(&str, &'static str)]) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    table
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| *mime)
}

fn step_description(image: &Path) -> Result<String, ArtifactError> {
    let sidecar = image.with_extension("txt");
    if sidecar.is_file() {
        let text = fs::read_to_string(&sidecar).map_err(|source| ArtifactError::Io {
            path: sidecar.clone(),
            source,
        })?;
        return Ok(text.trim().to_string());
    }

    Ok(image
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default())
}
