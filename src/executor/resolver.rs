//! Map an oracle element reference onto a concrete element of the current step.
//!
//! Vision models misread small or overlapping labels. The resolver treats the
//! proposed index as a hint and cross-checks it against the expected text and
//! the target's size. Resolution never fails: the weakest outcome is a blind
//! pass-through to the focused element.
use crate::agent_engine::proposal::TargetParams;
use crate::config::ResolverConfig;
use crate::perception::types::{ElementRecord, FilteredElementSet, Point};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Click,
    Type,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Correction {
    /// The indexed element's text did not match; a matching element was used.
    TextMismatch { from: usize, to: usize },
    /// The indexed element looked like a bare icon; a larger match was used.
    IconUpgrade { from: usize, to: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedElement {
    pub index: usize,
    pub requested_index: usize,
    /// Center of the resolved box, in viewport coordinates.
    pub point: Point,
    pub area: f64,
    pub corrections: Vec<Correction>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Element(ResolvedElement),
    /// No usable index; the actuator locates the target itself.
    Locator {
        selector: Option<String>,
        text: Option<String>,
    },
    /// Blind input at the current focus.
    PassThrough,
}

#[derive(Debug, Clone, Default)]
pub struct ActionResolver {
    config: ResolverConfig,
}

impl ActionResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn resolve(
        &self,
        kind: TargetKind,
        params: &TargetParams,
        elements: &FilteredElementSet,
    ) -> Resolution {
        let selector = non_empty(params.selector.as_deref());
        // For `type` the text is what gets typed, not a description of the target.
        let expected = match kind {
            TargetKind::Click => non_empty(params.text.as_deref()),
            TargetKind::Type => None,
        };

        let Some(requested) = params.element_index else {
            if kind == TargetKind::Type {
                return Resolution::PassThrough;
            }
            return locator_or_blind(selector, expected);
        };

        let Some(requested) = usize::try_from(requested)
            .ok()
            .filter(|&i| i < elements.len())
        else {
            tracing::warn!(
                index = requested,
                labelled = elements.len(),
                "element index out of range, falling back to locator"
            );
            return locator_or_blind(selector, expected);
        };

        let mut chosen = requested;
        let mut corrections = Vec::new();

        if let Some(exp) = expected {
            if let Some(to) = self.text_correction(chosen, exp, elements) {
                corrections.push(Correction::TextMismatch { from: chosen, to });
                chosen = to;
            }
            if let Some(to) = self.icon_correction(chosen, exp, elements) {
                corrections.push(Correction::IconUpgrade { from: chosen, to });
                chosen = to;
            }
        }

        let Some(el) = elements.get(chosen) else {
            return Resolution::PassThrough;
        };
        Resolution::Element(ResolvedElement {
            index: chosen,
            requested_index: requested,
            point: el.bounding_box.center(),
            area: el.area(),
            corrections,
        })
    }

    fn text_correction(&self, index: usize, expected: &str, elements: &FilteredElementSet) -> Option<usize> {
        let current = elements.get(index)?;
        if text_matches(&current.text, expected) {
            return None;
        }
        let best = smallest(elements.iter().filter(|e| text_matches(&e.text, expected)));
        match best {
            Some(found) => {
                tracing::warn!(
                    requested = index,
                    requested_text = %current.text,
                    resolved = found.index,
                    resolved_text = %found.text,
                    expected = %expected,
                    "label text mismatch, redirected to matching element"
                );
                Some(found.index)
            }
            None => {
                tracing::warn!(
                    requested = index,
                    requested_text = %current.text,
                    expected = %expected,
                    "label text mismatch with no matching element, keeping index"
                );
                None
            }
        }
    }

    fn icon_correction(&self, index: usize, expected: &str, elements: &FilteredElementSet) -> Option<usize> {
        let current = elements.get(index)?;
        if current.area() >= self.config.min_target_area
            || expected.chars().count() <= self.config.min_text_len
        {
            return None;
        }
        let alt = smallest(elements.iter().filter(|e| {
            e.index != index
                && e.area() > self.config.min_target_area
                && text_matches(&e.searchable_text(), expected)
        }))?;
        tracing::warn!(
            requested = index,
            area = current.area(),
            resolved = alt.index,
            resolved_area = alt.area(),
            "target looks like an icon, using larger matching element"
        );
        Some(alt.index)
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn locator_or_blind(selector: Option<&str>, text: Option<&str>) -> Resolution {
    if selector.is_none() && text.is_none() {
        return Resolution::PassThrough;
    }
    Resolution::Locator {
        selector: selector.map(str::to_string),
        text: text.map(str::to_string),
    }
}

/// Case-insensitive substring match in either direction. Empty text never matches.
fn text_matches(element_text: &str, expected: &str) -> bool {
    let a = element_text.trim().to_lowercase();
    let b = expected.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(&b) || b.contains(&a)
}

/// Smallest area wins; ties keep the earliest element.
fn smallest<'a>(candidates: impl Iterator<Item = &'a ElementRecord>) -> Option<&'a ElementRecord> {
    candidates.min_by(|a, b| a.area().total_cmp(&b.area()))
}
