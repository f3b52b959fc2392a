//! Geometry payloads understood by [`Renderer::fill`](crate::Renderer::fill)
//! and [`Renderer::stroke`](crate::Renderer::stroke).

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn left(&self) -> f32 {
        self.x
    }

    pub fn top(&self) -> f32 {
        self.y
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    pub fn overlaps(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    pub fn translate(&self, dx: f32, dy: f32) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }
}

/// A closed polygon whose points are relative to `pos`.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub pos: Vec2,
    pub points: Vec<Vec2>,
}

impl Polygon {
    pub fn new(pos: Vec2, points: Vec<Vec2>) -> Self {
        Self { pos, points }
    }

    /// Points in absolute coordinates.
    pub fn world_points(&self) -> impl Iterator<Item = Vec2> + '_ {
        self.points
            .iter()
            .map(move |p| Vec2::new(p.x + self.pos.x, p.y + self.pos.y))
    }

    /// Triangle list indices covering the polygon.
    pub fn indices(&self) -> Vec<usize> {
        triangulate(&self.points)
    }
}

/// An open polyline whose points are relative to `pos`.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub pos: Vec2,
    pub points: Vec<Vec2>,
}

impl Line {
    pub fn new(pos: Vec2, points: Vec<Vec2>) -> Self {
        Self { pos, points }
    }

    pub fn segment(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            pos: Vec2::ZERO,
            points: vec![Vec2::new(x0, y0), Vec2::new(x1, y1)],
        }
    }

    pub fn world_points(&self) -> impl Iterator<Item = Vec2> + '_ {
        self.points
            .iter()
            .map(move |p| Vec2::new(p.x + self.pos.x, p.y + self.pos.y))
    }
}

/// An axis-aligned ellipse given by its center and radii.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipse {
    pub center: Vec2,
    pub radius_x: f32,
    pub radius_y: f32,
}

impl Ellipse {
    pub fn new(x: f32, y: f32, radius_x: f32, radius_y: f32) -> Self {
        Self {
            center: Vec2::new(x, y),
            radius_x,
            radius_y,
        }
    }

    pub fn circle(x: f32, y: f32, radius: f32) -> Self {
        Self::new(x, y, radius, radius)
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(
            self.center.x - self.radius_x,
            self.center.y - self.radius_y,
            self.radius_x * 2.0,
            self.radius_y * 2.0,
        )
    }
}

/// Every shape kind a renderer can fill, stroke or mask with.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Rect(Rect),
    Polygon(Polygon),
    Line(Line),
    Ellipse(Ellipse),
}

impl From<Rect> for Shape {
    fn from(rect: Rect) -> Self {
        Shape::Rect(rect)
    }
}

impl From<Polygon> for Shape {
    fn from(polygon: Polygon) -> Self {
        Shape::Polygon(polygon)
    }
}

impl From<Line> for Shape {
    fn from(line: Line) -> Self {
        Shape::Line(line)
    }
}

impl From<Ellipse> for Shape {
    fn from(ellipse: Ellipse) -> Self {
        Shape::Ellipse(ellipse)
    }
}

fn signed_area(points: &[Vec2]) -> f32 {
    let n = points.len();
    (0..n)
        .map(|i| {
            let p = points[i];
            let q = points[(i + 1) % n];
            p.x * q.y - q.x * p.y
        })
        .sum::<f32>()
        * 0.5
}

fn cross(o: Vec2, a: Vec2, b: Vec2) -> f32 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

fn inside_triangle(p: Vec2, a: Vec2, b: Vec2, c: Vec2) -> bool {
    let d1 = cross(a, b, p);
    let d2 = cross(b, c, p);
    let d3 = cross(c, a, p);
    d1 >= 0.0 && d2 >= 0.0 && d3 >= 0.0
}

/// Ear-clipping triangulation of a simple polygon.
///
/// Returns indices into `points`, three per triangle. Degenerate input
/// (self-intersecting or collinear) falls back to a triangle fan over the
/// remaining vertices.
pub fn triangulate(points: &[Vec2]) -> Vec<usize> {
    let n = points.len();
    if n < 3 {
        return Vec::new();
    }

    // work on a counter-clockwise ordering so ears have a positive cross product
    let mut remaining: Vec<usize> = if signed_area(points) >= 0.0 {
        (0..n).collect()
    } else {
        (0..n).rev().collect()
    };
    let mut indices = Vec::with_capacity((n - 2) * 3);

    while remaining.len() > 3 {
        let len = remaining.len();
        let ear = (0..len).find(|&i| {
            let prev = points[remaining[(i + len - 1) % len]];
            let cur = points[remaining[i]];
            let next = points[remaining[(i + 1) % len]];
            if cross(prev, cur, next) <= 0.0 {
                return false;
            }
            !remaining.iter().any(|&other| {
                let p = points[other];
                p != prev && p != cur && p != next && inside_triangle(p, prev, cur, next)
            })
        });

        match ear {
            Some(i) => {
                indices.push(remaining[(i + len - 1) % len]);
                indices.push(remaining[i]);
                indices.push(remaining[(i + 1) % len]);
                remaining.remove(i);
            }
            None => break,
        }
    }

    for i in 1..remaining.len().saturating_sub(1) {
        indices.push(remaining[0]);
        indices.push(remaining[i]);
        indices.push(remaining[i + 1]);
    }

    indices
}
