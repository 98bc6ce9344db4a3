//! Page source collaborator: direct text, layout geometry, and page images.
//!
//! The pipeline never talks to a PDF library directly — it talks to the
//! [`PageSource`] trait, which exposes exactly the per-page capabilities the
//! core needs: a cheap probe for classification, the embedded text layer,
//! positioned text spans for table detection, and a rasterised image for the
//! OCR engine. Tests substitute an in-memory implementation; production uses
//! [`PdfiumSource`].
//!
//! ## Why reopen the document per call?
//!
//! pdfium wraps a C++ library with thread-local state; holding an open
//! document across await points would poison `Send` bounds through the whole
//! pipeline. Reopening from the in-memory byte buffer per operation keeps
//! the adapter `Send + Sync` for free, and the open cost is small against
//! rasterisation and OCR. Callers run these methods under
//! `tokio::task::spawn_blocking` — they are CPU-bound and blocking.

use crate::error::Ocr2MdError;
use crate::output::DocumentMetadata;
use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::debug;

/// Cheap per-page measurements the classifier decides from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageProbe {
    /// Non-whitespace characters in the embedded text layer.
    pub char_count: usize,
    /// Page area in square inches (width × height at 72 pt/inch).
    pub area_sq_in: f32,
    /// Number of image objects placed on the page.
    pub image_count: usize,
}

impl PageProbe {
    /// Extractable-text density in characters per square inch.
    pub fn density(&self) -> f32 {
        if self.area_sq_in <= 0.0 {
            0.0
        } else {
            self.char_count as f32 / self.area_sq_in
        }
    }
}

/// A positioned run of text on a page.
///
/// Coordinates are top-down: `y` is the distance from the top edge of the
/// page in points, so sorting by `y` gives reading order. Spans come from
/// the PDF's text objects on direct/hybrid pages and from OCR word boxes on
/// scanned pages — table detection treats both identically.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    pub text: String,
    /// Left edge, points from the left of the page.
    pub x: f32,
    /// Top edge, points from the top of the page.
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Narrow contract over the PDF library: everything the pipeline may ask of
/// a document, per page, read-only.
pub trait PageSource: Send + Sync {
    /// Number of pages in the document.
    fn page_count(&self) -> Result<usize, Ocr2MdError>;

    /// Measurements for the classifier. Must not rasterise.
    fn probe(&self, index: usize) -> Result<PageProbe, Ocr2MdError>;

    /// The embedded text layer, in the library's reading order.
    fn direct_text(&self, index: usize) -> Result<String, Ocr2MdError>;

    /// Positioned text spans for layout analysis. Empty when the page has no
    /// text layer.
    fn text_spans(&self, index: usize) -> Result<Vec<TextSpan>, Ocr2MdError>;

    /// Rasterise the page at the given DPI for the OCR engine.
    fn render_image(&self, index: usize, dpi: u32) -> Result<DynamicImage, Ocr2MdError>;

    /// Document-level metadata.
    fn metadata(&self) -> Result<DocumentMetadata, Ocr2MdError>;
}

// ── pdfium adapter ───────────────────────────────────────────────────────

/// [`PageSource`] backed by pdfium over an in-memory PDF.
///
/// Construction opens the document once to validate it (corrupt files and
/// wrong passwords fail fast, before any pipeline work); later calls reopen
/// from the owned byte buffer.
pub struct PdfiumSource {
    bytes: Vec<u8>,
    password: Option<String>,
    page_count: usize,
}

impl PdfiumSource {
    /// Validate and wrap a PDF held in memory.
    pub fn new(bytes: Vec<u8>, password: Option<String>) -> Result<Self, Ocr2MdError> {
        let page_count = {
            let pdfium = Pdfium::default();
            let document = open_document(&pdfium, &bytes, password.as_deref())?;
            document.pages().len() as usize
        };
        if page_count == 0 {
            return Err(Ocr2MdError::NoPages);
        }
        debug!("Opened PDF: {} pages, {} bytes", page_count, bytes.len());
        Ok(Self {
            bytes,
            password,
            page_count,
        })
    }

    /// Run `f` against a freshly opened copy of the document.
    fn with_document<T>(
        &self,
        f: impl FnOnce(&PdfDocument<'_>) -> Result<T, Ocr2MdError>,
    ) -> Result<T, Ocr2MdError> {
        let pdfium = Pdfium::default();
        let document = open_document(&pdfium, &self.bytes, self.password.as_deref())?;
        f(&document)
    }

    fn with_page<T>(
        &self,
        index: usize,
        f: impl FnOnce(&PdfPage<'_>, f32, f32) -> Result<T, Ocr2MdError>,
    ) -> Result<T, Ocr2MdError> {
        if index >= self.page_count {
            return Err(Ocr2MdError::Internal(format!(
                "page index {index} out of range (document has {} pages)",
                self.page_count
            )));
        }
        self.with_document(|document| {
            let page = document
                .pages()
                .get(index as u16)
                .map_err(|e| Ocr2MdError::CorruptPdf {
                    detail: format!("page {}: {e:?}", index + 1),
                })?;
            let width = page.width().value;
            let height = page.height().value;
            f(&page, width, height)
        })
    }
}

impl PageSource for PdfiumSource {
    fn page_count(&self) -> Result<usize, Ocr2MdError> {
        Ok(self.page_count)
    }

    fn probe(&self, index: usize) -> Result<PageProbe, Ocr2MdError> {
        self.with_page(index, |page, width, height| {
            let char_count = page
                .text()
                .map(|t| t.all().chars().filter(|c| !c.is_whitespace()).count())
                .unwrap_or(0);
            let image_count = page
                .objects()
                .iter()
                .filter(|o| o.object_type() == PdfPageObjectType::Image)
                .count();
            Ok(PageProbe {
                char_count,
                area_sq_in: (width / 72.0) * (height / 72.0),
                image_count,
            })
        })
    }

    fn direct_text(&self, index: usize) -> Result<String, Ocr2MdError> {
        self.with_page(index, |page, _, _| {
            let text = page
                .text()
                .map(|t| t.all())
                .map_err(|e| Ocr2MdError::CorruptPdf {
                    detail: format!("text layer of page {}: {e:?}", index + 1),
                })?;
            Ok(text)
        })
    }

    fn text_spans(&self, index: usize) -> Result<Vec<TextSpan>, Ocr2MdError> {
        self.with_page(index, |page, _, height| {
            let mut spans = Vec::new();
            for object in page.objects().iter() {
                if let Some(text_object) = object.as_text_object() {
                    let text = text_object.text();
                    if text.trim().is_empty() {
                        continue;
                    }
                    if let Ok(bounds) = object.bounds() {
                        let left = bounds.left().value;
                        let top = bounds.top().value;
                        let right = bounds.right().value;
                        let bottom = bounds.bottom().value;
                        spans.push(TextSpan {
                            text,
                            x: left,
                            // PDF space grows upward; flip to top-down.
                            y: height - top,
                            width: (right - left).abs(),
                            height: (top - bottom).abs(),
                        });
                    }
                }
            }
            spans.sort_by(|a, b| {
                a.y.partial_cmp(&b.y)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal))
            });
            Ok(spans)
        })
    }

    fn render_image(&self, index: usize, dpi: u32) -> Result<DynamicImage, Ocr2MdError> {
        self.with_page(index, |page, width, height| {
            let target_width = (width / 72.0 * dpi as f32).round().max(1.0) as i32;
            let target_height = (height / 72.0 * dpi as f32).round().max(1.0) as i32;
            let render_config = PdfRenderConfig::new()
                .set_target_width(target_width)
                .set_maximum_height(target_height);

            let bitmap =
                page.render_with_config(&render_config)
                    .map_err(|e| Ocr2MdError::CorruptPdf {
                        detail: format!("rasterising page {}: {e:?}", index + 1),
                    })?;
            let image = bitmap.as_image();
            debug!(
                "Rendered page {} at {} dpi → {}x{} px",
                index + 1,
                dpi,
                image.width(),
                image.height()
            );
            Ok(image)
        })
    }

    fn metadata(&self) -> Result<DocumentMetadata, Ocr2MdError> {
        self.with_document(|document| {
            let metadata = document.metadata();
            let get = |tag: PdfDocumentMetadataTagType| -> Option<String> {
                metadata.get(tag).and_then(|t| {
                    let v = t.value().to_string();
                    if v.is_empty() {
                        None
                    } else {
                        Some(v)
                    }
                })
            };
            Ok(DocumentMetadata {
                title: get(PdfDocumentMetadataTagType::Title),
                author: get(PdfDocumentMetadataTagType::Author),
                subject: get(PdfDocumentMetadataTagType::Subject),
                creator: get(PdfDocumentMetadataTagType::Creator),
                producer: get(PdfDocumentMetadataTagType::Producer),
                creation_date: get(PdfDocumentMetadataTagType::CreationDate),
                modification_date: get(PdfDocumentMetadataTagType::ModificationDate),
                page_count: self.page_count,
            })
        })
    }
}

/// Open a PDF from bytes, mapping pdfium's password/corruption errors onto
/// the library's error taxonomy.
fn open_document<'a>(
    pdfium: &'a Pdfium,
    bytes: &'a [u8],
    password: Option<&str>,
) -> Result<PdfDocument<'a>, Ocr2MdError> {
    pdfium
        .load_pdf_from_byte_slice(bytes, password)
        .map_err(|e| {
            let err_str = format!("{e:?}");
            if err_str.contains("Password") || err_str.contains("password") {
                if password.is_some() {
                    Ocr2MdError::WrongPassword
                } else {
                    Ocr2MdError::PasswordRequired
                }
            } else {
                Ocr2MdError::CorruptPdf { detail: err_str }
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_density_zero_for_zero_area() {
        let probe = PageProbe {
            char_count: 100,
            area_sq_in: 0.0,
            image_count: 0,
        };
        assert_eq!(probe.density(), 0.0);
    }

    #[test]
    fn probe_density_scales_with_area() {
        let probe = PageProbe {
            char_count: 935,
            area_sq_in: 93.5, // US letter
            image_count: 0,
        };
        assert!((probe.density() - 10.0).abs() < 1e-4);
    }
}
