//! Two-page PDF assembly.
//!
//! Each source is decoded (format sniffed from content, not the extension),
//! normalised to 8-bit RGB and placed on its own page sized to the image at
//! a fixed DPI. The finished document is written to a hidden temp file in
//! the destination folder and renamed into place, so readers and the
//! retention sweep never observe a half-written PDF.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{Duration, SystemTime};

use image::{DynamicImage, RgbImage};
use printpdf::{
    Image, ImageTransform, Mm, PdfDocument, PdfDocumentReference, PdfLayerIndex, PdfPageIndex,
};

use super::PipelineError;

/// Extension of emitted documents.
pub const DOCUMENT_EXTENSION: &str = "pdf";

const DEFAULT_DPI: f32 = 300.0;
const MM_PER_INCH: f32 = 25.4;
const LAYER_NAME: &str = "Capture";
const TEMP_PREFIX: &str = ".eyepdf-";
const TEMP_SUFFIX: &str = ".part";

/// Temp files younger than this may belong to a write in progress.
pub const ORPHAN_TEMP_MIN_AGE: Duration = Duration::from_secs(10 * 60);

/// Builds one output document from the two sources of a pair.
pub trait DocumentAssembler: Send + Sync {
    /// Write a document at `dest` with one page per entry of `pages`, in
    /// the given order. An existing file at `dest` is replaced.
    fn assemble(&self, title: &str, pages: [&Path; 2], dest: &Path) -> Result<(), PipelineError>;
}

#[derive(Debug, Clone)]
pub struct PdfAssembler {
    dpi: f32,
}

impl Default for PdfAssembler {
    fn default() -> Self {
        Self { dpi: DEFAULT_DPI }
    }
}

impl PdfAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    fn page_size(&self, img: &RgbImage) -> (Mm, Mm) {
        let to_mm = |px: u32| Mm(px as f32 * MM_PER_INCH / self.dpi);
        (to_mm(img.width()), to_mm(img.height()))
    }

    fn place(
        &self,
        doc: &PdfDocumentReference,
        page: PdfPageIndex,
        layer: PdfLayerIndex,
        img: RgbImage,
    ) {
        let layer = doc.get_page(page).get_layer(layer);
        Image::from_dynamic_image(&DynamicImage::ImageRgb8(img)).add_to_layer(
            layer,
            ImageTransform {
                dpi: Some(self.dpi),
                ..Default::default()
            },
        );
    }

    /// Render decoded pages into PDF bytes.
    pub fn render(&self, title: &str, pages: Vec<RgbImage>) -> Result<Vec<u8>, PipelineError> {
        let mut pages = pages.into_iter();
        let first = pages
            .next()
            .ok_or_else(|| PipelineError::Pdf("no pages to render".into()))?;

        let (width, height) = self.page_size(&first);
        let (doc, page, layer) = PdfDocument::new(title, width, height, LAYER_NAME);
        self.place(&doc, page, layer, first);

        for img in pages {
            let (width, height) = self.page_size(&img);
            let (page, layer) = doc.add_page(width, height, LAYER_NAME);
            self.place(&doc, page, layer, img);
        }

        let mut buf = BufWriter::new(Vec::new());
        doc.save(&mut buf)
            .map_err(|e| PipelineError::Pdf(format!("save error: {e}")))?;
        buf.into_inner()
            .map_err(|e| PipelineError::Pdf(format!("buffer error: {e}")))
    }
}

impl DocumentAssembler for PdfAssembler {
    fn assemble(&self, title: &str, pages: [&Path; 2], dest: &Path) -> Result<(), PipelineError> {
        let decoded = pages
            .iter()
            .map(|p| decode_rgb(p))
            .collect::<Result<Vec<_>, _>>()?;

        let bytes = self.render(title, decoded)?;
        write_atomically(dest, &bytes)?;

        tracing::debug!(dest = %dest.display(), size = bytes.len(), "Document written");
        Ok(())
    }
}

/// Decode an image file and convert it to 8-bit RGB.
pub fn decode_rgb(path: &Path) -> Result<RgbImage, PipelineError> {
    let decode_err = |message: String| PipelineError::Decode {
        path: path.to_path_buf(),
        message,
    };

    let img = image::io::Reader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| decode_err(e.to_string()))?;
    Ok(img.to_rgb8())
}

/// Write `bytes` to a temp file beside `dest`, then rename it over `dest`.
fn write_atomically(dest: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}

/// Remove temp files left in `dir` by an interrupted write. Only files
/// older than `min_age` are touched. Returns the number removed.
pub fn cleanup_orphaned_temp_files(dir: &Path, min_age: Duration) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    let now = SystemTime::now();

    let mut count = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(TEMP_PREFIX) || !name.ends_with(TEMP_SUFFIX) {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        let stale = meta
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .is_some_and(|age| age >= min_age);
        if !meta.is_file() || !stale {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => count += 1,
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "Could not remove orphaned temp file");
            }
        }
    }

    if count > 0 {
        tracing::info!(dir = %dir.display(), files_cleaned = count, "Cleaned orphaned temp files");
    }
    count
}
