//! Observation pipeline: scan, capture, filter and annotate in one pass.
//!
//! The filtered set returned here is the one both the renderer and the
//! resolver see for the current step.
use crate::errors::{MarksmanError, MarksmanResult};
use crate::executor::actuator::Actuator;
use crate::perception::annotator;
use crate::perception::overlay_filter::OverlayFilter;
use crate::perception::types::{ElementRecord, FilteredElementSet, Viewport};

#[derive(Debug, Clone)]
pub struct Observation {
    /// Screenshot with Set-of-Mark overlays, PNG encoded.
    pub annotated_png: Vec<u8>,
    pub elements: FilteredElementSet,
    pub viewport: Viewport,
    /// Scanner element count before filtering.
    pub raw_count: usize,
}

/// Run one observation:
///
/// 1. Scan interactive elements (a failed scan yields an empty set).
/// 2. Capture the viewport screenshot.
/// 3. Filter against the screenshot's bounds and draw the labels.
pub async fn observe(
    actuator: &mut dyn Actuator,
    filter: &OverlayFilter,
) -> MarksmanResult<Observation> {
    let raw = match actuator.scan_interactive_elements().await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(error = %e, "element scan failed, continuing without labels");
            Vec::new()
        }
    };
    let raw_count = raw.len();
    let shot = actuator.capture_screenshot().await?;

    // Decoding and re-encoding a full screenshot is CPU bound.
    let filter = filter.clone();
    let (annotated_png, elements, viewport) = tokio::task::spawn_blocking(move || {
        let canvas = annotator::load_screenshot(&shot)?;
        let viewport = annotator::viewport_of(&canvas);
        let normalized: Vec<ElementRecord> =
            raw.into_iter().map(ElementRecord::normalized).collect();
        let elements = filter.apply(normalized, &viewport);
        let png = annotator::annotate_image(canvas, &elements)?;
        Ok::<_, MarksmanError>((png, elements, viewport))
    })
    .await
    .map_err(|e| MarksmanError::Render(format!("join: {e}")))??;

    tracing::debug!(
        raw = raw_count,
        labelled = elements.len(),
        width = viewport.width,
        height = viewport.height,
        "observation ready"
    );

    Ok(Observation {
        annotated_png,
        elements,
        viewport,
        raw_count,
    })
}
