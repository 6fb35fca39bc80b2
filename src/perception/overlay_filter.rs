//! Set-of-Mark candidate selection.
//!
//! Turns the raw scanner output into the canonical, index-stable set of
//! elements that receive a numbered label. Smaller boxes are considered
//! first so that, among near-identical parent/child boxes, the most specific
//! one keeps the label.
use crate::config::OverlayConfig;
use crate::perception::types::{ElementRecord, FilteredElementSet, Viewport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    Offscreen,
    TooSmall,
    Overlap,
    Container,
}

#[derive(Debug, Clone)]
pub struct OverlayFilter {
    config: OverlayConfig,
}

impl OverlayFilter {
    pub fn new(config: OverlayConfig) -> Self {
        Self { config }
    }

    pub fn apply(&self, raw: Vec<ElementRecord>, viewport: &Viewport) -> FilteredElementSet {
        let raw_count = raw.len();
        let mut offscreen = 0usize;
        let mut too_small = 0usize;

        let mut candidates: Vec<ElementRecord> = raw
            .into_iter()
            .filter(|el| match self.visibility(el, viewport) {
                Ok(()) => true,
                Err(Rejection::Offscreen) => {
                    offscreen += 1;
                    false
                }
                Err(_) => {
                    too_small += 1;
                    false
                }
            })
            .collect();

        // Stable: equal areas keep scanner order.
        candidates.sort_by(|a, b| a.area().total_cmp(&b.area()));

        let mut accepted: Vec<ElementRecord> = Vec::with_capacity(candidates.len());
        let mut overlaps = 0usize;
        let mut containers = 0usize;
        for candidate in candidates {
            match self.admit(&candidate, &accepted) {
                Ok(()) => accepted.push(candidate),
                Err(Rejection::Overlap) => overlaps += 1,
                Err(_) => containers += 1,
            }
        }

        let elements: Vec<ElementRecord> = accepted
            .into_iter()
            .enumerate()
            .map(|(index, el)| ElementRecord { index, ..el })
            .collect();

        tracing::debug!(
            raw = raw_count,
            kept = elements.len(),
            offscreen,
            too_small,
            overlaps,
            containers,
            "overlay filter applied"
        );
        FilteredElementSet::from_indexed(elements)
    }

    fn visibility(&self, el: &ElementRecord, viewport: &Viewport) -> Result<(), Rejection> {
        let b = &el.bounding_box;
        if b.x < 0.0
            || b.y < 0.0
            || b.x >= viewport.width as f64
            || b.y >= viewport.height as f64
        {
            return Err(Rejection::Offscreen);
        }
        if b.width <= self.config.min_size || b.height <= self.config.min_size {
            return Err(Rejection::TooSmall);
        }
        Ok(())
    }

    fn admit(&self, candidate: &ElementRecord, accepted: &[ElementRecord]) -> Result<(), Rejection> {
        if candidate.is_input_like() {
            return Ok(());
        }
        let b = &candidate.bounding_box;
        let overlapping = accepted.iter().any(|kept| {
            b.iou(&kept.bounding_box) > self.config.iou_threshold
                || b.containment_in(&kept.bounding_box) > self.config.containment_threshold
        });
        if overlapping {
            return Err(Rejection::Overlap);
        }
        if candidate.area() > self.config.max_area {
            return Err(Rejection::Container);
        }
        Ok(())
    }
}

impl Default for OverlayFilter {
    fn default() -> Self {
        Self::new(OverlayConfig::default())
    }
}
