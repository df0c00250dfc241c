//! Capture and export of rendered report surfaces.
//!
//! A [`Rasterizer`] turns one [`RenderedSurface`] into an encoded image.
//! [`export_single`] rasterizes one surface; [`export_batch`] rasterizes a
//! set of surfaces one at a time into a zip archive, skipping any that fail.

use async_trait::async_trait;
use image::{imageops, ImageFormat, Rgba, RgbaImage};
use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::models::MediaData;

pub const DEFAULT_PADDING: u32 = 40;
pub const DEFAULT_BACKGROUND: &str = "#f8fafc";

/// Largest padded canvas a rasterizer will allocate.
const MAX_CANVAS_BYTES: u64 = 512 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("nothing to export")]
    EmptyInput,
    #[error("failed to decode surface '{name}': {reason}")]
    Decode { name: String, reason: String },
    #[error("failed to rasterize surface '{name}': {reason}")]
    Render { name: String, reason: String },
    #[error("invalid background colour '{0}'")]
    Background(String),
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A laid-out report surface ready for rasterization, addressed by name.
#[derive(Debug, Clone)]
pub struct RenderedSurface {
    pub name: String,
    pub pixels: RgbaImage,
}

impl RenderedSurface {
    pub fn new(name: impl Into<String>, pixels: RgbaImage) -> Self {
        Self {
            name: name.into(),
            pixels,
        }
    }

    /// Decode an encoded image into a surface.
    pub fn from_media(name: impl Into<String>, media: &MediaData) -> Result<Self, ExportError> {
        let name = name.into();
        let pixels = image::load_from_memory(&media.bytes)
            .map_err(|e| ExportError::Decode {
                name: name.clone(),
                reason: e.to_string(),
            })?
            .to_rgba8();
        Ok(Self { name, pixels })
    }
}

/// Turns a surface into an encoded image blob.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn rasterize(&self, surface: &RenderedSurface) -> Result<Vec<u8>, ExportError>;
}

/// Pads the surface onto a solid background and encodes it as PNG.
#[derive(Debug, Clone)]
pub struct PngRasterizer {
    padding: u32,
    background: Rgba<u8>,
}

impl Default for PngRasterizer {
    fn default() -> Self {
        Self {
            padding: DEFAULT_PADDING,
            background: Rgba([0xf8, 0xfa, 0xfc, 0xff]),
        }
    }
}

impl PngRasterizer {
    pub fn new(padding: u32, background: &str) -> Result<Self, ExportError> {
        Ok(Self {
            padding,
            background: parse_hex_color(background)?,
        })
    }
}

#[async_trait]
impl Rasterizer for PngRasterizer {
    async fn rasterize(&self, surface: &RenderedSurface) -> Result<Vec<u8>, ExportError> {
        let name = surface.name.clone();
        let pixels = surface.pixels.clone();
        let padding = self.padding;
        let background = self.background;

        tokio::task::spawn_blocking(move || render_png(&pixels, padding, background))
            .await
            .map_err(|e| ExportError::Render {
                name: name.clone(),
                reason: e.to_string(),
            })?
            .map_err(|reason| ExportError::Render { name, reason })
    }
}

fn render_png(pixels: &RgbaImage, padding: u32, background: Rgba<u8>) -> Result<Vec<u8>, String> {
    let (width, height) = pixels.dimensions();
    if width == 0 || height == 0 {
        return Err("surface has no pixels".to_string());
    }

    let padded = |side: u32| padding.checked_mul(2).and_then(|p| side.checked_add(p));
    let (Some(canvas_width), Some(canvas_height)) = (padded(width), padded(height)) else {
        return Err(format!("padding {} is too large", padding));
    };
    let canvas_bytes = u64::from(canvas_width)
        .saturating_mul(u64::from(canvas_height))
        .saturating_mul(4);
    if canvas_bytes > MAX_CANVAS_BYTES {
        return Err(format!(
            "padded canvas {}x{} exceeds {} bytes",
            canvas_width, canvas_height, MAX_CANVAS_BYTES
        ));
    }

    let mut canvas = RgbaImage::from_pixel(canvas_width, canvas_height, background);
    imageops::overlay(&mut canvas, pixels, i64::from(padding), i64::from(padding));

    let mut out = Cursor::new(Vec::new());
    canvas
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| e.to_string())?;
    Ok(out.into_inner())
}

/// Parse `#rrggbb` or `#rrggbbaa`.
pub fn parse_hex_color(value: &str) -> Result<Rgba<u8>, ExportError> {
    let invalid = || ExportError::Background(value.to_string());
    let hex = value.trim().trim_start_matches('#');
    if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
        return Err(invalid());
    }

    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
    let alpha = if hex.len() == 8 { channel(6)? } else { 0xff };
    Ok(Rgba([channel(0)?, channel(2)?, channel(4)?, alpha]))
}

/// Rasterize a single surface.
pub async fn export_single(
    rasterizer: &dyn Rasterizer,
    surface: &RenderedSurface,
) -> Result<Vec<u8>, ExportError> {
    let bytes = rasterizer.rasterize(surface).await?;
    debug!(surface = %surface.name, bytes = bytes.len(), "surface exported");
    Ok(bytes)
}

/// A finished batch export.
#[derive(Debug, Clone)]
pub struct ArchiveExport {
    /// The zip archive.
    pub bytes: Vec<u8>,
    /// Entry names, in surface order.
    pub entries: Vec<String>,
    /// Names of surfaces that failed to rasterize.
    pub skipped: Vec<String>,
}

/// Rasterize every surface in order, one at a time, into a zip archive.
///
/// Entries are named `<prefix>_<surface name>.png`. A surface that fails to
/// rasterize is logged and left out. An empty input is
/// [`ExportError::EmptyInput`].
pub async fn export_batch(
    rasterizer: &dyn Rasterizer,
    surfaces: &[RenderedSurface],
    prefix: &str,
) -> Result<ArchiveExport, ExportError> {
    if surfaces.is_empty() {
        return Err(ExportError::EmptyInput);
    }

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);

    let mut used = HashSet::new();
    let mut entries = Vec::new();
    let mut skipped = Vec::new();

    for surface in surfaces {
        match rasterizer.rasterize(surface).await {
            Ok(bytes) => {
                let name = unique_entry_name(prefix, &surface.name, &mut used);
                zip.start_file(name.as_str(), options)?;
                zip.write_all(&bytes)?;
                debug!(entry = %name, bytes = bytes.len(), "archive entry written");
                entries.push(name);
            }
            Err(e) => {
                warn!(surface = %surface.name, error = %e, "skipping surface");
                skipped.push(surface.name.clone());
            }
        }
    }

    let bytes = zip.finish()?.into_inner();
    info!(
        entries = entries.len(),
        skipped = skipped.len(),
        bytes = bytes.len(),
        "batch export finished"
    );

    Ok(ArchiveExport {
        bytes,
        entries,
        skipped,
    })
}

/// Rasterize every surface in order, one at a time, into its own PNG under
/// `dir`.
///
/// Returns one slot per surface: the written path, or `None` when that
/// surface failed to rasterize. Surfaces whose names sanitize to the same
/// file name get a numeric suffix.
pub async fn export_to_dir(
    rasterizer: &dyn Rasterizer,
    surfaces: &[RenderedSurface],
    dir: &Path,
) -> Result<Vec<Option<PathBuf>>, ExportError> {
    std::fs::create_dir_all(dir)?;

    let mut used = HashSet::new();
    let mut written = Vec::with_capacity(surfaces.len());
    for surface in surfaces {
        match export_single(rasterizer, surface).await {
            Ok(bytes) => {
                let path = dir.join(unique_file_name(&sanitize_name(&surface.name), &mut used));
                std::fs::write(&path, bytes)?;
                info!(path = %path.display(), "surface written");
                written.push(Some(path));
            }
            Err(e) => {
                warn!(surface = %surface.name, error = %e, "skipping surface");
                written.push(None);
            }
        }
    }
    Ok(written)
}

/// File-system safe form of a surface name.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() {
        "surface".to_string()
    } else {
        cleaned.to_string()
    }
}

fn unique_entry_name(prefix: &str, name: &str, used: &mut HashSet<String>) -> String {
    unique_file_name(&format!("{}_{}", prefix, sanitize_name(name)), used)
}

/// `<base>.png`, or `<base>_<n>.png` once `base` is taken.
fn unique_file_name(base: &str, used: &mut HashSet<String>) -> String {
    let mut candidate = format!("{}.png", base);
    let mut n = 2;
    while used.contains(&candidate) {
        candidate = format!("{}_{}.png", base, n);
        n += 1;
    }
    used.insert(candidate.clone());
    candidate
}
