use emberfall_ecs::{VisualEntity, VisualFrame};
use glam::Vec2;
use std::fmt::Write;

/// Camera over the ground plane.
#[derive(Debug, Clone, Copy)]
pub struct RenderView {
    /// World position at the centre of the screen.
    pub center: Vec2,
    /// Half the visible width and height, in world units.
    pub half_extent: Vec2,
    /// Screen units per world unit.
    pub zoom: f32,
}

impl Default for RenderView {
    fn default() -> Self {
        Self {
            center: Vec2::ZERO,
            half_extent: Vec2::new(16.0, 9.0),
            zoom: 32.0,
        }
    }
}

impl RenderView {
    pub fn centered_on(center: Vec2) -> Self {
        Self {
            center,
            ..Self::default()
        }
    }

    pub fn contains(&self, position: Vec2) -> bool {
        let d = (position - self.center).abs();
        d.x <= self.half_extent.x && d.y <= self.half_extent.y
    }

    /// 2.5D projection: world y grows away from the viewer, screen y grows
    /// downwards.
    pub fn to_screen(&self, position: Vec2) -> Vec2 {
        let d = position - self.center;
        Vec2::new(d.x, -d.y) * self.zoom
    }
}

/// Renderer-agnostic interface. A renderer turns one published frame and a
/// view into its output and never feeds anything back into the simulation.
pub trait Renderer {
    type Output;

    fn render(&self, frame: &VisualFrame, view: &RenderView) -> Self::Output;
}

/// Human-readable dump of the visible part of a frame, in draw order.
#[derive(Debug, Default)]
pub struct DebugTextRenderer;

impl DebugTextRenderer {
    pub fn new() -> Self {
        Self
    }

    fn line(out: &mut String, e: &VisualEntity, view: &RenderView) {
        let s = view.to_screen(e.position);
        let _ = writeln!(
            out,
            "  [{}] arch={} pos=({:.2}, {:.2}) screen=({:.0}, {:.0}) {:?}/{:?}",
            e.entity, e.archetype.0, e.position.x, e.position.y, s.x, s.y, e.layer, e.animation
        );
    }
}

impl Renderer for DebugTextRenderer {
    type Output = String;

    fn render(&self, frame: &VisualFrame, view: &RenderView) -> String {
        let visible: Vec<&VisualEntity> = frame.entities.iter().filter(|e| view.contains(e.position)).collect();
        tracing::trace!(
            tick = frame.tick,
            visible = visible.len(),
            culled = frame.len() - visible.len(),
            "debug render"
        );
        let mut out = String::new();
        let _ = writeln!(out, "=== Frame (tick={}) ===", frame.tick);
        let _ = writeln!(out, "Visible: {} of {}", visible.len(), frame.len());
        let _ = writeln!(
            out,
            "View: center=({:.1}, {:.1}) extent=({:.1}, {:.1}) zoom={:.0}",
            view.center.x, view.center.y, view.half_extent.x, view.half_extent.y, view.zoom
        );
        for e in visible {
            Self::line(&mut out, e, view);
        }
        out
    }
}
