use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::MarksmanResult;
use crate::perception::types::{ElementRecord, Point};

/// What a click lands on, in fallback-chain order.
#[derive(Debug, Clone, PartialEq)]
pub enum ClickTarget {
    /// Viewport coordinates of a resolved element's center.
    Point(Point),
    /// CSS selector supplied by the oracle.
    Selector(String),
    /// First element whose visible text contains this string.
    Text(String),
    /// Whatever currently holds keyboard focus.
    Focused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    #[default]
    Down,
}

/// The browser session driven by the orchestrator.
///
/// Implementations own the session exclusively for the duration of a run.
/// Geometry returned by `scan_interactive_elements` must share the coordinate
/// space of `capture_screenshot`.
#[async_trait]
pub trait Actuator: Send {
    /// Launch the session. Idempotent.
    async fn start(&mut self) -> MarksmanResult<()>;

    /// Release the session. Must be safe to call on a session that never started.
    async fn stop(&mut self) -> MarksmanResult<()>;

    async fn navigate(&mut self, url: &str) -> MarksmanResult<()>;

    /// Viewport screenshot, PNG encoded.
    async fn capture_screenshot(&mut self) -> MarksmanResult<Vec<u8>>;

    async fn scan_interactive_elements(&mut self) -> MarksmanResult<Vec<ElementRecord>>;

    async fn current_url(&mut self) -> MarksmanResult<String>;

    async fn click(&mut self, target: &ClickTarget) -> MarksmanResult<()>;

    /// Type into `selector` when given, else into the focused element.
    async fn type_text(&mut self, text: &str, selector: Option<&str>) -> MarksmanResult<()>;

    async fn press_key(&mut self, key: &str) -> MarksmanResult<()>;

    async fn scroll(&mut self, direction: ScrollDirection, amount: u32) -> MarksmanResult<()>;

    /// Draw a short-lived marker at `point` for the audit trail.
    async fn show_transient_cursor(&mut self, point: Point) -> MarksmanResult<()>;
}
