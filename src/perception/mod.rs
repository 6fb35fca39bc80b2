pub mod annotator;
pub mod geometry;
pub mod overlay_filter;
pub mod pipeline;
pub mod types;
