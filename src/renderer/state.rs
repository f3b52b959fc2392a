//! Logical drawing state shared by every backend.

use crate::color::Color;
use crate::geometry::Rect;
use crate::renderer::BlendMode;
use crate::transform::Transform;

/// An active scissor rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scissor {
    /// Rectangle as requested, in user space.
    pub rect: Rect,
    /// Rectangle in surface pixels, offset by the transform's translation.
    pub device: Rect,
}

impl Scissor {
    /// Device rectangle clamped to the surface, as `[x, y, width, height]`.
    pub fn pixels(&self, width: u32, height: u32) -> [u32; 4] {
        let x0 = self.device.x.floor().clamp(0.0, width as f32) as u32;
        let y0 = self.device.y.floor().clamp(0.0, height as f32) as u32;
        let x1 = self.device.right().ceil().clamp(0.0, width as f32) as u32;
        let y1 = self.device.bottom().ceil().clamp(0.0, height as f32) as u32;
        [x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0)]
    }
}

/// Outcome of a `clip_rect` request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClipChange {
    /// Same rectangle as the active one; nothing to do.
    Unchanged,
    Set(Scissor),
    /// The rectangle covered the whole surface; scissoring is off.
    Cleared,
}

#[derive(Debug, Clone, PartialEq)]
struct Snapshot {
    transform: Transform,
    color: Color,
    scissor: Option<Scissor>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderState {
    pub transform: Transform,
    /// Fill and stroke color; its alpha is the global alpha.
    pub color: Color,
    pub tint: Color,
    pub blend_mode: BlendMode,
    pub line_width: f32,
    pub scissor: Option<Scissor>,
    width: u32,
    height: u32,
    stack: Vec<Snapshot>,
}

impl RenderState {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            transform: Transform::IDENTITY,
            color: Color::BLACK,
            tint: Color::WHITE,
            blend_mode: BlendMode::Normal,
            line_width: 1.0,
            scissor: None,
            width,
            height,
            stack: Vec::new(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn canvas(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width as f32, self.height as f32)
    }

    /// Number of pending `save()` calls.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn save(&mut self) {
        self.stack.push(Snapshot {
            transform: self.transform,
            color: self.color,
            scissor: self.scissor,
        });
    }

    /// Pop the last snapshot, or fall back to the defaults when the stack is
    /// empty. Returns true when the scissor changed.
    pub fn restore(&mut self) -> bool {
        let previous = self.scissor;
        match self.stack.pop() {
            Some(snapshot) => {
                self.transform = snapshot.transform;
                self.color = snapshot.color;
                self.scissor = snapshot.scissor;
            }
            None => {
                self.transform = Transform::IDENTITY;
                self.color = Color::BLACK;
                self.scissor = None;
            }
        }
        previous != self.scissor
    }

    /// Back to the defaults, dropping every saved snapshot.
    pub fn reset(&mut self) {
        let (width, height) = (self.width, self.height);
        *self = Self::new(width, height);
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.scissor = None;
    }

    pub fn set_clip(&mut self, x: f32, y: f32, width: f32, height: f32) -> ClipChange {
        let rect = Rect::new(x, y, width, height);
        let device = rect.translate(self.transform.tx, self.transform.ty);
        if device == self.canvas() {
            return match self.scissor.take() {
                Some(_) => ClipChange::Cleared,
                None => ClipChange::Unchanged,
            };
        }
        if self.scissor.is_some_and(|s| s.device == device) {
            return ClipChange::Unchanged;
        }
        let scissor = Scissor { rect, device };
        self.scissor = Some(scissor);
        ClipChange::Set(scissor)
    }
}
