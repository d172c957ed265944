//! Viewport renderer: current page, zoom, and render coalescing.
//!
//! ## Coalescing
//!
//! Rendering a drawing sheet takes long enough that a user paging or zooming
//! quickly issues requests faster than pdfium can serve them. [`RenderQueue`]
//! keeps at most one render in flight and at most one pending; a new request
//! while busy overwrites the pending slot, so only the latest page/zoom the
//! user asked for gets rendered next.
//!
//! ```text
//! request(1) ─▶ dispatch 1
//! request(2) ─▶ pending = 2
//! request(3) ─▶ pending = 3        (2 dropped)
//! complete   ─▶ dispatch 3
//! complete   ─▶ idle
//! ```
//!
//! ## Stale renders
//!
//! A finished render is only kept as the current raster when it matches the
//! current `(page, scale)`. This keeps [`ViewState::raster_size`] equal to the
//! dimensions of the raster the user is actually looking at.

pub mod input;
pub mod raster;

use crate::capture::{self, Artifact, DisplaySize, DragGesture};
use crate::config::SessionConfig;
use crate::error::ChatError;
use image::DynamicImage;
use raster::{PdfiumRasterizer, Rasterizer};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Download timeout for URL inputs, in seconds.
const DOWNLOAD_TIMEOUT_SECS: u64 = 120;

/// One render job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RenderRequest {
    /// 1-based page number.
    pub page: usize,
    pub scale: f32,
}

/// Two-deep render pipeline: one in flight, at most one pending.
#[derive(Debug, Default, Clone)]
pub struct RenderQueue {
    in_flight: Option<RenderRequest>,
    pending: Option<RenderRequest>,
}

impl RenderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for a render. Returns the request to dispatch now, or `None` if it
    /// was parked in the pending slot.
    pub fn request(&mut self, req: RenderRequest) -> Option<RenderRequest> {
        if self.in_flight.is_some() {
            if let Some(dropped) = self.pending.replace(req) {
                debug!("Dropping superseded render of page {}", dropped.page);
            }
            None
        } else {
            self.in_flight = Some(req);
            Some(req)
        }
    }

    /// Mark the in-flight render finished. Returns the pending request, now
    /// in flight, if there was one.
    pub fn complete(&mut self) -> Option<RenderRequest> {
        self.in_flight = self.pending.take();
        self.in_flight
    }

    pub fn in_flight(&self) -> Option<RenderRequest> {
        self.in_flight
    }

    pub fn pending(&self) -> Option<RenderRequest> {
        self.pending
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none()
    }
}

/// What the viewport currently shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewState {
    /// 1-based, within `1..=page_count`.
    pub page: usize,
    pub scale: f32,
    pub page_count: usize,
    /// Dimensions of the last completed render at `(page, scale)`.
    pub raster_size: Option<(u32, u32)>,
}

/// Owns the open document, the view state and the current raster.
pub struct Viewer {
    rasterizer: Arc<dyn Rasterizer>,
    state: ViewState,
    queue: RenderQueue,
    raster: Option<DynamicImage>,
    min_scale: f32,
    max_scale: f32,
    zoom_step: f32,
}

impl Viewer {
    /// Wrap an already-opened rasterizer, positioned on page 1.
    pub fn new(rasterizer: Arc<dyn Rasterizer>, config: &SessionConfig) -> Self {
        let page_count = rasterizer.page_count();
        Self {
            rasterizer,
            state: ViewState {
                page: 1,
                scale: config.clamp_scale(config.initial_scale),
                page_count,
                raster_size: None,
            },
            queue: RenderQueue::new(),
            raster: None,
            min_scale: config.min_scale,
            max_scale: config.max_scale,
            zoom_step: config.zoom_step,
        }
    }

    /// Open a local path or URL with pdfium.
    ///
    /// Fails with [`ChatError::Decode`] on malformed documents; nothing else
    /// about the caller's session is affected.
    pub async fn open(input: &str, config: &SessionConfig) -> Result<Self, ChatError> {
        let bytes = input::load_document_bytes(input, DOWNLOAD_TIMEOUT_SECS).await?;
        Self::open_bytes(bytes, config).await
    }

    /// Open document bytes with pdfium.
    pub async fn open_bytes(bytes: Vec<u8>, config: &SessionConfig) -> Result<Self, ChatError> {
        input::check_pdf_magic(&bytes)?;
        let rasterizer = tokio::task::spawn_blocking(move || PdfiumRasterizer::open(bytes))
            .await
            .map_err(|e| ChatError::Internal(format!("Open task panicked: {e}")))??;
        Ok(Self::new(Arc::new(rasterizer), config))
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn queue(&self) -> &RenderQueue {
        &self.queue
    }

    /// The raster matching the current view, once rendered.
    pub fn raster(&self) -> Option<&DynamicImage> {
        self.raster.as_ref()
    }

    pub fn page_size(&self, page: usize) -> Option<raster::PageSize> {
        self.rasterizer.page_size(page)
    }

    // ── Navigation ───────────────────────────────────────────────────────

    /// Move to `page`. Fails with [`ChatError::PageOutOfRange`] outside the
    /// document, leaving the view untouched.
    pub fn go_to_page(&mut self, page: usize) -> Result<Option<RenderRequest>, ChatError> {
        if page == 0 || page > self.state.page_count {
            return Err(ChatError::PageOutOfRange {
                page,
                total: self.state.page_count,
            });
        }
        if page == self.state.page && self.raster.is_some() {
            return Ok(None);
        }
        self.state.page = page;
        self.invalidate_raster();
        Ok(self.request_current())
    }

    /// Next page; a no-op on the last page.
    #[must_use = "pass the request to Viewer::drain"]
    pub fn next_page(&mut self) -> Option<RenderRequest> {
        self.go_to_page(self.state.page + 1).ok().flatten()
    }

    /// Previous page; a no-op on the first page.
    #[must_use = "pass the request to Viewer::drain"]
    pub fn prev_page(&mut self) -> Option<RenderRequest> {
        self.go_to_page(self.state.page.saturating_sub(1))
            .ok()
            .flatten()
    }

    /// Set the zoom scale, clamped to the configured bounds.
    #[must_use = "pass the request to Viewer::drain"]
    pub fn set_scale(&mut self, scale: f32) -> Option<RenderRequest> {
        let clamped = if scale.is_finite() {
            scale.clamp(self.min_scale, self.max_scale)
        } else {
            self.state.scale
        };
        if (clamped - self.state.scale).abs() <= f32::EPSILON && self.raster.is_some() {
            return None;
        }
        self.state.scale = clamped;
        self.invalidate_raster();
        self.request_current()
    }

    #[must_use = "pass the request to Viewer::drain"]
    pub fn zoom_in(&mut self) -> Option<RenderRequest> {
        self.set_scale(self.state.scale * self.zoom_step)
    }

    #[must_use = "pass the request to Viewer::drain"]
    pub fn zoom_out(&mut self) -> Option<RenderRequest> {
        self.set_scale(self.state.scale / self.zoom_step)
    }

    /// Request a render of the current view (e.g. right after opening).
    #[must_use = "pass the request to Viewer::drain"]
    pub fn request_current(&mut self) -> Option<RenderRequest> {
        self.queue.request(RenderRequest {
            page: self.state.page,
            scale: self.state.scale,
        })
    }

    fn invalidate_raster(&mut self) {
        self.raster = None;
        self.state.raster_size = None;
    }

    // ── Render completion ────────────────────────────────────────────────

    /// Record a finished render and return the next request to dispatch.
    pub fn complete_render(
        &mut self,
        req: RenderRequest,
        image: DynamicImage,
    ) -> Option<RenderRequest> {
        if req.page == self.state.page && req.scale == self.state.scale {
            self.state.raster_size = Some((image.width(), image.height()));
            self.raster = Some(image);
        } else {
            debug!(
                "Discarding stale render of page {} @ {:.2}",
                req.page, req.scale
            );
        }
        self.queue.complete()
    }

    /// Record a failed render and return the next request to dispatch.
    pub fn fail_render(&mut self, req: RenderRequest, err: &ChatError) -> Option<RenderRequest> {
        warn!("Render of page {} failed: {}", req.page, err);
        self.queue.complete()
    }

    /// Rasterise `req` on the blocking pool.
    pub async fn render(&self, req: RenderRequest) -> Result<DynamicImage, ChatError> {
        let rasterizer = Arc::clone(&self.rasterizer);
        tokio::task::spawn_blocking(move || rasterizer.render(req.page, req.scale))
            .await
            .map_err(|e| ChatError::Internal(format!("Render task panicked: {e}")))?
    }

    /// Drive `first` and whatever becomes pending behind it to completion.
    ///
    /// Returns the outcome of the last render performed.
    pub async fn drain(&mut self, first: Option<RenderRequest>) -> Result<(), ChatError> {
        let mut next = first;
        let mut outcome = Ok(());
        while let Some(req) = next {
            next = match self.render(req).await {
                Ok(image) => {
                    outcome = Ok(());
                    self.complete_render(req, image)
                }
                Err(e) => {
                    let n = self.fail_render(req, &e);
                    outcome = Err(e);
                    n
                }
            };
        }
        outcome
    }

    /// Make sure the current view has a raster.
    ///
    /// A request that was handed out but never drained is still marked in
    /// flight; it is driven here before the current view is requested.
    pub async fn ensure_rendered(&mut self) -> Result<&DynamicImage, ChatError> {
        if self.raster.is_none() {
            if let Some(orphan) = self.queue.in_flight() {
                debug!("Driving undrained render of page {}", orphan.page);
                self.drain(Some(orphan)).await?;
            }
        }
        if self.raster.is_none() {
            let first = self.request_current();
            self.drain(first).await?;
        }
        self.raster.as_ref().ok_or(ChatError::NothingRendered)
    }

    // ── Capture ──────────────────────────────────────────────────────────

    /// Turn a finished drag over the displayed page into an artifact.
    pub fn capture(
        &self,
        gesture: DragGesture,
        display: DisplaySize,
    ) -> Result<Artifact, ChatError> {
        let raster = self.raster.as_ref().ok_or(ChatError::NothingRendered)?;
        let rect = gesture.finish(display, raster.width(), raster.height())?;
        capture::capture(rect, raster)
    }
}

#[cfg(test)]
mod tests {
    use super::raster::PageSize;
    use super::*;
    use crate::capture::Point;
    use image::{Rgba, RgbaImage};
    use std::sync::Mutex;

    /// In-memory rasterizer that records every render it performs.
    struct FakeRasterizer {
        pages: Vec<PageSize>,
        rendered: Mutex<Vec<usize>>,
    }

    impl FakeRasterizer {
        fn new(pages: usize) -> Arc<Self> {
            Arc::new(Self {
                pages: vec![
                    PageSize {
                        width: 100.0,
                        height: 50.0
                    };
                    pages
                ],
                rendered: Mutex::new(Vec::new()),
            })
        }
    }

    impl Rasterizer for FakeRasterizer {
        fn page_count(&self) -> usize {
            self.pages.len()
        }

        fn page_size(&self, page: usize) -> Option<PageSize> {
            page.checked_sub(1).and_then(|i| self.pages.get(i)).copied()
        }

        fn render(&self, page: usize, scale: f32) -> Result<DynamicImage, ChatError> {
            let size = self.page_size(page).ok_or(ChatError::PageOutOfRange {
                page,
                total: self.pages.len(),
            })?;
            self.rendered.lock().unwrap().push(page);
            let (w, h) = size.raster_dimensions(scale);
            Ok(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
                w,
                h,
                Rgba([255, 255, 255, 255]),
            )))
        }
    }

    fn config() -> SessionConfig {
        SessionConfig::builder().initial_scale(1.0).build().unwrap()
    }

    #[test]
    fn latest_pending_request_wins() {
        let mut q = RenderQueue::new();
        let r = |page| RenderRequest { page, scale: 1.0 };

        assert_eq!(q.request(r(1)), Some(r(1)));
        assert_eq!(q.request(r(2)), None);
        assert_eq!(q.request(r(3)), None);
        assert_eq!(q.pending(), Some(r(3)));

        let mut completed = vec![q.in_flight().unwrap().page];
        while let Some(next) = q.complete() {
            completed.push(next.page);
        }
        assert_eq!(completed, vec![1, 3]);
        assert!(q.is_idle());
    }

    #[tokio::test]
    async fn rapid_navigation_renders_first_and_latest_only() {
        let fake = FakeRasterizer::new(5);
        let mut viewer = Viewer::new(fake.clone(), &config());

        let first = viewer.request_current();
        assert!(first.is_some());
        assert_eq!(viewer.go_to_page(2).unwrap(), None);
        assert_eq!(viewer.go_to_page(3).unwrap(), None);

        viewer.drain(first).await.unwrap();
        assert_eq!(*fake.rendered.lock().unwrap(), vec![1, 3]);
        assert_eq!(viewer.state().page, 3);
        assert_eq!(viewer.state().raster_size, Some((100, 50)));
    }

    #[tokio::test]
    async fn raster_size_tracks_scale() {
        let fake = FakeRasterizer::new(1);
        let mut viewer = Viewer::new(fake, &config());
        viewer.ensure_rendered().await.unwrap();
        assert_eq!(viewer.state().raster_size, Some((100, 50)));

        let req = viewer.set_scale(2.0);
        assert_eq!(viewer.state().raster_size, None);
        viewer.drain(req).await.unwrap();
        assert_eq!(viewer.state().raster_size, Some((200, 100)));
    }

    #[tokio::test]
    async fn undrained_navigation_still_renders() {
        let fake = FakeRasterizer::new(3);
        let mut viewer = Viewer::new(fake.clone(), &config());

        let _ = viewer.next_page();
        assert!(!viewer.queue().is_idle());

        let raster = viewer.ensure_rendered().await.unwrap();
        assert_eq!((raster.width(), raster.height()), (100, 50));
        assert_eq!(viewer.state().page, 2);
        assert!(viewer.queue().is_idle());

        let _ = viewer.next_page();
        let _ = viewer.zoom_in();
        viewer.ensure_rendered().await.unwrap();
        assert_eq!(viewer.state().page, 3);
        assert!(viewer.queue().is_idle());
        assert_eq!(fake.rendered.lock().unwrap()[0], 2);
    }

    #[test]
    fn out_of_range_navigation_is_a_noop() {
        let fake = FakeRasterizer::new(2);
        let mut viewer = Viewer::new(fake, &config());
        assert!(matches!(
            viewer.go_to_page(3),
            Err(ChatError::PageOutOfRange { page: 3, total: 2 })
        ));
        assert!(viewer.go_to_page(0).is_err());
        assert_eq!(viewer.prev_page(), None);
        assert_eq!(viewer.state().page, 1);
    }

    #[test]
    fn zoom_is_bounded() {
        let fake = FakeRasterizer::new(1);
        let mut viewer = Viewer::new(fake, &config());
        for _ in 0..50 {
            let _ = viewer.zoom_out();
            viewer.queue.complete();
        }
        assert_eq!(viewer.state().scale, 0.25);
        let _ = viewer.set_scale(f32::INFINITY);
        assert_eq!(viewer.state().scale, 0.25);
    }

    #[tokio::test]
    async fn capture_requires_a_raster() {
        let fake = FakeRasterizer::new(1);
        let mut viewer = Viewer::new(fake, &config());
        let display = DisplaySize {
            width: 50.0,
            height: 25.0,
        };
        let mut drag = DragGesture::start(Point::new(0.0, 0.0));
        drag.update(Point::new(10.0, 10.0));
        assert!(matches!(
            viewer.capture(drag, display),
            Err(ChatError::NothingRendered)
        ));

        viewer.ensure_rendered().await.unwrap();
        let artifact = viewer.capture(drag, display).unwrap();
        // display is half the raster size
        assert_eq!((artifact.width, artifact.height), (20, 20));
    }
}
