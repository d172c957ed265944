//! PDF rasterisation: decode document bytes and render pages via pdfium.
//!
//! The rest of the crate only sees the [`Rasterizer`] trait: page count, page
//! size and "render page N at scale S". Tests substitute an in-memory
//! implementation; production uses [`PdfiumRasterizer`].
//!
//! ## Why reopen per render?
//!
//! A pdfium `PdfDocument` borrows both the library handle and the byte
//! buffer, which makes it awkward to keep alive across `spawn_blocking`
//! calls. Reopening from the retained buffer is cheap next to rasterising a
//! large drawing sheet, and keeps the rasterizer `Send + Sync`.

use crate::error::ChatError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

/// Intrinsic page size in PDF points (1/72 inch).
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    /// Raster dimensions of this page at `scale`.
    pub fn raster_dimensions(&self, scale: f32) -> (u32, u32) {
        (
            (self.width * scale).round().max(1.0) as u32,
            (self.height * scale).round().max(1.0) as u32,
        )
    }
}

/// Decode/render capability over one opened document.
///
/// Pages are 1-based throughout. `render` is blocking and CPU-bound.
pub trait Rasterizer: Send + Sync {
    fn page_count(&self) -> usize;

    fn page_size(&self, page: usize) -> Option<PageSize>;

    fn render(&self, page: usize, scale: f32) -> Result<DynamicImage, ChatError>;
}

static PDFIUM: OnceLock<Result<Pdfium, String>> = OnceLock::new();

/// Bind pdfium once per process.
///
/// `PDFIUM_LIB_PATH` (a directory) wins; otherwise the system library search
/// path is used.
fn pdfium() -> Result<&'static Pdfium, ChatError> {
    PDFIUM
        .get_or_init(|| {
            let bindings = match std::env::var("PDFIUM_LIB_PATH") {
                Ok(dir) if !dir.is_empty() => Pdfium::bind_to_library(
                    Pdfium::pdfium_platform_library_name_at_path(&dir),
                ),
                _ => Pdfium::bind_to_system_library(),
            };
            bindings
                .map(Pdfium::new)
                .map_err(|e| format!("{e:?}"))
        })
        .as_ref()
        .map_err(|e| ChatError::PdfiumBindingFailed(e.clone()))
}

/// [`Rasterizer`] backed by pdfium-render.
pub struct PdfiumRasterizer {
    bytes: Arc<Vec<u8>>,
    page_sizes: Vec<PageSize>,
}

impl PdfiumRasterizer {
    /// Decode `bytes` and record every page's intrinsic size.
    ///
    /// Blocking; call from `spawn_blocking` in async contexts.
    pub fn open(bytes: Vec<u8>) -> Result<Self, ChatError> {
        let pdfium = pdfium()?;
        let page_sizes = {
            let document = pdfium
                .load_pdf_from_byte_slice(&bytes, None)
                .map_err(|e| ChatError::Decode {
                    detail: format!("{e:?}"),
                })?;
            document
                .pages()
                .iter()
                .map(|p| PageSize {
                    width: p.width().value,
                    height: p.height().value,
                })
                .collect::<Vec<_>>()
        };
        if page_sizes.is_empty() {
            return Err(ChatError::Decode {
                detail: "document has no pages".into(),
            });
        }
        info!("PDF loaded: {} pages", page_sizes.len());
        Ok(Self {
            bytes: Arc::new(bytes),
            page_sizes,
        })
    }
}

impl Rasterizer for PdfiumRasterizer {
    fn page_count(&self) -> usize {
        self.page_sizes.len()
    }

    fn page_size(&self, page: usize) -> Option<PageSize> {
        page.checked_sub(1).and_then(|i| self.page_sizes.get(i)).copied()
    }

    fn render(&self, page: usize, scale: f32) -> Result<DynamicImage, ChatError> {
        let total = self.page_count();
        if page == 0 || page > total {
            return Err(ChatError::PageOutOfRange { page, total });
        }
        let failed = |e: PdfiumError| ChatError::RasterisationFailed {
            page,
            detail: format!("{e:?}"),
        };

        let document = pdfium()?
            .load_pdf_from_byte_slice(&self.bytes, None)
            .map_err(|e| ChatError::Decode {
                detail: format!("{e:?}"),
            })?;
        let pdf_page = document.pages().get((page - 1) as u16).map_err(failed)?;

        let render_config = PdfRenderConfig::new().scale_page_by_factor(scale);
        let image = pdf_page
            .render_with_config(&render_config)
            .map_err(failed)?
            .as_image();

        debug!(
            "Rendered page {} @ {:.2} → {}x{} px",
            page,
            scale,
            image.width(),
            image.height()
        );
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raster_dimensions_scale_with_points() {
        // US Letter at 1.5x
        let letter = PageSize {
            width: 612.0,
            height: 792.0,
        };
        assert_eq!(letter.raster_dimensions(1.5), (918, 1188));
        assert_eq!(letter.raster_dimensions(0.0001), (1, 1));
    }

    #[test]
    fn open_rejects_garbage_when_pdfium_is_available() {
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run pdfium tests");
            return;
        }
        let err = PdfiumRasterizer::open(b"%PDF-1.7 not really".to_vec())
            .err()
            .expect("garbage must not decode");
        assert!(matches!(err, ChatError::Decode { .. }));
    }
}
