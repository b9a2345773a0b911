//! Rendering adapter: a consumer-side interface over the visual frame the
//! simulation publishes each tick.
//!
//! # Invariants
//! - Renderers only ever see an immutable `VisualFrame`; they cannot reach
//!   the component store.
//! - Draw order is the frame's order (layer, then depth, then id).

mod renderer;

pub use renderer::{DebugTextRenderer, RenderView, Renderer};

pub fn crate_info() -> &'static str {
    "emberfall-render v0.1.0"
}
