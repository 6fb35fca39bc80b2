use serde::{Deserialize, Serialize};

/// Maximum number of characters kept in an element's text.
pub const MAX_TEXT_CHARS: usize = 50;

/// Axis-aligned box in screenshot pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Bounds of the captured viewport, in the same space as element geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// One interactive element as reported by the page scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementRecord {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub tag_name: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aria_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(alias = "rect")]
    pub bounding_box: BoundingBox,
}

impl ElementRecord {
    /// Enforce the scanner text contract: whitespace collapsed, at most
    /// [`MAX_TEXT_CHARS`] characters, lower-cased tag, empty strings dropped.
    pub fn normalized(mut self) -> Self {
        let collapsed = self.text.split_whitespace().collect::<Vec<_>>().join(" ");
        self.text = collapsed.chars().take(MAX_TEXT_CHARS).collect();
        self.tag_name = self.tag_name.to_lowercase();
        for field in [
            &mut self.id,
            &mut self.placeholder,
            &mut self.input_type,
            &mut self.aria_label,
            &mut self.role,
        ] {
            if field.as_deref().is_some_and(|v| v.trim().is_empty()) {
                *field = None;
            }
        }
        self
    }

    pub fn area(&self) -> f64 {
        self.bounding_box.area()
    }

    /// Text-entry controls are always labelled, whatever their geometry.
    pub fn is_input_like(&self) -> bool {
        matches!(self.tag_name.as_str(), "input" | "textarea")
            || matches!(self.role.as_deref(), Some("textbox") | Some("searchbox"))
    }

    /// Visible text plus aria-label, lower-cased, for fuzzy lookups.
    pub fn searchable_text(&self) -> String {
        let mut combined = self.text.to_lowercase();
        if let Some(aria) = self.aria_label.as_deref() {
            if !combined.is_empty() {
                combined.push(' ');
            }
            combined.push_str(&aria.to_lowercase());
        }
        combined
    }
}

/// The labelled elements of one step, re-indexed `0..N-1`.
///
/// Only the overlay filter builds one. The same set must feed both the
/// renderer and the resolver of the step that produced it: the index of an
/// element is the number drawn on the screenshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilteredElementSet {
    elements: Vec<ElementRecord>,
}

impl FilteredElementSet {
    /// Callers must hand over records already re-indexed `0..N-1`.
    pub(crate) fn from_indexed(elements: Vec<ElementRecord>) -> Self {
        debug_assert!(elements.iter().enumerate().all(|(i, e)| e.index == i));
        Self { elements }
    }

    pub fn get(&self, index: usize) -> Option<&ElementRecord> {
        self.elements.get(index)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ElementRecord> {
        self.elements.iter()
    }

    pub fn as_slice(&self) -> &[ElementRecord] {
        &self.elements
    }
}

impl<'a> IntoIterator for &'a FilteredElementSet {
    type Item = &'a ElementRecord;
    type IntoIter = std::slice::Iter<'a, ElementRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}
