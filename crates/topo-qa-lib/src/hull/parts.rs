//! Hull boundary parts and the shapes moved against them
//!
//! A cut answers one question: while a shape slides along a directed line (`p0 + t * (p1 - p0)`,
//! `t` unbounded), for which `t` does it touch a fixed boundary part? The answer is reported
//! as the smallest and largest such `t`. The extreme contacts of two curves moving against
//! each other are always one of:
//!
//! - an end point of the moving shape hitting the fixed part,
//! - an end point of the fixed part hitting the moving shape,
//! - a tangency between a curved piece and the other curve.
//!
//! so the cut enumerates exactly these events instead of building buffer polygons.

use crate::geometry::{cross, direction_angle, dot, norm, unit};
use geo::Coord;
use smallvec::SmallVec;
use std::f64::consts::PI;

/// Distance and angle epsilon used by the contact solvers
const EPS: f64 = 1e-9;

const TWO_PI: f64 = 2.0 * PI;

type Contacts = SmallVec<[f64; 8]>;

/// Directed line along which a hull shape is moved
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lin2D {
    pub p0: Coord<f64>,
    pub p1: Coord<f64>,
}

impl Lin2D {
    pub fn new(p0: Coord<f64>, p1: Coord<f64>) -> Self {
        Self { p0, p1 }
    }

    #[inline]
    pub fn dir(&self) -> Coord<f64> {
        self.p1 - self.p0
    }

    #[inline]
    pub fn at(&self, t: f64) -> Coord<f64> {
        self.p0 + self.dir() * t
    }
}

/// Straight piece of a hull boundary
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineHullPart {
    pub p0: Coord<f64>,
    pub p1: Coord<f64>,
}

/// Circular piece of a hull boundary, swept counter-clockwise from `start_direction`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircleHullPart {
    pub center: Coord<f64>,
    pub radius: f64,
    pub start_direction: f64,
    /// Sweep angle; `2 * PI` is a full circle
    pub angle: f64,
}

impl CircleHullPart {
    /// Full circle
    pub fn new(center: Coord<f64>, radius: f64) -> Self {
        Self {
            center,
            radius,
            start_direction: 0.0,
            angle: TWO_PI,
        }
    }

    pub fn with_span(mut self, start_direction: f64, angle: f64) -> Self {
        self.start_direction = start_direction;
        self.angle = angle;
        self
    }
}

/// Fixed boundary part of a hull
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HullPart {
    Line(LineHullPart),
    Circle(CircleHullPart),
}

impl From<LineHullPart> for HullPart {
    fn from(part: LineHullPart) -> Self {
        HullPart::Line(part)
    }
}

impl From<CircleHullPart> for HullPart {
    fn from(part: CircleHullPart) -> Self {
        HullPart::Circle(part)
    }
}

/// Shape moved along a [`Lin2D`], in coordinates relative to the moving point
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HullShape {
    /// The moving point itself
    Point,
    /// A segment at a fixed offset to the moving point
    Segment { start: Coord<f64>, end: Coord<f64> },
    /// An arc centered on the moving point
    Arc {
        radius: f64,
        start_direction: f64,
        angle: f64,
    },
}

impl HullShape {
    fn end_points(&self) -> SmallVec<[Coord<f64>; 2]> {
        match *self {
            HullShape::Point => smallvec::smallvec![Coord { x: 0.0, y: 0.0 }],
            HullShape::Segment { start, end } => smallvec::smallvec![start, end],
            HullShape::Arc {
                radius,
                start_direction,
                angle,
            } => arc_end_points(Coord { x: 0.0, y: 0.0 }, radius, start_direction, angle),
        }
    }

    /// Parameters `t` where `origin + t * d` lies on this shape (shape at rest)
    fn ray_hits(&self, origin: Coord<f64>, d: Coord<f64>, out: &mut Contacts) {
        let zero = Coord { x: 0.0, y: 0.0 };
        match *self {
            HullShape::Point => ray_point(origin, d, zero, out),
            HullShape::Segment { start, end } => ray_segment(origin, d, start, end, out),
            HullShape::Arc {
                radius,
                start_direction,
                angle,
            } => ray_arc(origin, d, zero, radius, start_direction, angle, out),
        }
    }
}

/// A shape moving along a directed line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HullLine {
    pub lin: Lin2D,
    pub shape: HullShape,
}

impl HullLine {
    /// A point moving along `lin`
    pub fn simple(lin: Lin2D) -> Self {
        Self {
            lin,
            shape: HullShape::Point,
        }
    }

    /// A segment, given relative to the moving point, moving along `lin`
    pub fn segment(lin: Lin2D, end_part: Lin2D) -> Self {
        Self {
            lin,
            shape: HullShape::Segment {
                start: end_part.p0,
                end: end_part.p1,
            },
        }
    }

    /// An arc centered on the moving point
    pub fn arc(lin: Lin2D, radius: f64, start_direction: f64, angle: f64) -> Self {
        Self {
            lin,
            shape: HullShape::Arc {
                radius,
                start_direction,
                angle,
            },
        }
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl HullPart {
    /// Widen `[t_min, t_max]` by the parameters where `x` touches this part
    ///
    /// Returns `false` (leaving the range untouched) if there is no contact at all.
    pub fn cut(&self, x: &HullLine, t_min: &mut f64, t_max: &mut f64) -> bool {
        let mut contacts = Contacts::new();
        self.collect_contacts(x, &mut contacts);
        if contacts.is_empty() {
            return false;
        }
        for t in contacts {
            *t_min = t_min.min(t);
            *t_max = t_max.max(t);
        }
        true
    }

    fn end_points(&self) -> SmallVec<[Coord<f64>; 2]> {
        match *self {
            HullPart::Line(line) => smallvec::smallvec![line.p0, line.p1],
            HullPart::Circle(circle) => arc_end_points(
                circle.center,
                circle.radius,
                circle.start_direction,
                circle.angle,
            ),
        }
    }

    fn ray_hits(&self, origin: Coord<f64>, d: Coord<f64>, out: &mut Contacts) {
        match *self {
            HullPart::Line(line) => ray_segment(origin, d, line.p0, line.p1, out),
            HullPart::Circle(circle) => ray_arc(
                origin,
                d,
                circle.center,
                circle.radius,
                circle.start_direction,
                circle.angle,
                out,
            ),
        }
    }

    fn collect_contacts(&self, x: &HullLine, out: &mut Contacts) {
        let d = x.lin.dir();
        if norm(d) <= EPS {
            return;
        }
        let origin = x.lin.p0;

        for e in x.shape.end_points() {
            self.ray_hits(origin + e, d, out);
        }
        for f in self.end_points() {
            x.shape.ray_hits(f - origin, -d, out);
        }

        match (*self, x.shape) {
            (
                HullPart::Line(line),
                HullShape::Arc {
                    radius,
                    start_direction,
                    angle,
                },
            ) => line_arc_tangents(line, x.lin, radius, start_direction, angle, out),
            (HullPart::Circle(circle), HullShape::Segment { start, end }) => {
                circle_segment_tangents(circle, x.lin, start, end, out)
            }
            (
                HullPart::Circle(circle),
                HullShape::Arc {
                    radius,
                    start_direction,
                    angle,
                },
            ) => circle_arc_tangents(circle, x.lin, radius, start_direction, angle, out),
            _ => {}
        }
    }
}

/// Check if a direction lies within a counter-clockwise angular span
pub fn span_contains(start_direction: f64, angle: f64, direction: f64) -> bool {
    if angle >= TWO_PI - EPS {
        return true;
    }
    let rel = (direction - start_direction).rem_euclid(TWO_PI);
    rel <= angle + EPS || rel >= TWO_PI - EPS
}

fn arc_end_points(
    center: Coord<f64>,
    radius: f64,
    start_direction: f64,
    angle: f64,
) -> SmallVec<[Coord<f64>; 2]> {
    if angle >= TWO_PI - EPS {
        return SmallVec::new();
    }
    smallvec::smallvec![
        center + unit(start_direction) * radius,
        center + unit(start_direction + angle) * radius,
    ]
}

/// Ray through a single point
fn ray_point(origin: Coord<f64>, d: Coord<f64>, p: Coord<f64>, out: &mut Contacts) {
    let w = p - origin;
    if cross(w, d).abs() / norm(d) <= EPS {
        out.push(dot(w, d) / dot(d, d));
    }
}

/// Ray against a segment; collinear overlaps report both segment ends
fn ray_segment(
    origin: Coord<f64>,
    d: Coord<f64>,
    a: Coord<f64>,
    b: Coord<f64>,
    out: &mut Contacts,
) {
    let e = b - a;
    let len_e = norm(e);
    if len_e <= EPS {
        ray_point(origin, d, a, out);
        return;
    }

    let w = a - origin;
    let denom = cross(d, e);
    if denom.abs() > EPS * norm(d) * len_e {
        let t = cross(w, e) / denom;
        let s = cross(w, d) / denom;
        if (-EPS..=1.0 + EPS).contains(&s) {
            out.push(t);
        }
    } else if cross(w, d).abs() / norm(d) <= EPS {
        let dd = dot(d, d);
        out.push(dot(a - origin, d) / dd);
        out.push(dot(b - origin, d) / dd);
    }
}

/// Ray against an arc
fn ray_arc(
    origin: Coord<f64>,
    d: Coord<f64>,
    center: Coord<f64>,
    radius: f64,
    start_direction: f64,
    angle: f64,
    out: &mut Contacts,
) {
    let f = origin - center;
    for t in solve_center_distance(f, d, radius) {
        let p = f + d * t;
        if span_contains(start_direction, angle, p.y.atan2(p.x)) {
            out.push(t);
        }
    }
}

/// Parameters `t` where `|f + t * d| == r`
fn solve_center_distance(f: Coord<f64>, d: Coord<f64>, r: f64) -> SmallVec<[f64; 2]> {
    let len_d = norm(d);
    let h = cross(f, d).abs() / len_d;
    if h > r + EPS {
        return SmallVec::new();
    }
    let dd = len_d * len_d;
    let along = -dot(f, d) / dd;
    let half = (r * r - h * h).max(0.0).sqrt() / len_d;
    if half * len_d <= EPS {
        smallvec::smallvec![along]
    } else {
        smallvec::smallvec![along - half, along + half]
    }
}

/// Moving arc tangent to a fixed straight part
fn line_arc_tangents(
    line: LineHullPart,
    lin: Lin2D,
    radius: f64,
    start_direction: f64,
    angle: f64,
    out: &mut Contacts,
) {
    let e = line.p1 - line.p0;
    let len_e = norm(e);
    if len_e <= EPS || radius <= EPS {
        return;
    }
    let n = Coord {
        x: -e.y / len_e,
        y: e.x / len_e,
    };
    let d = lin.dir();
    let nd = dot(n, d);
    if nd.abs() <= EPS * norm(d) {
        return;
    }
    for side in [1.0, -1.0] {
        let t = (side * radius - dot(n, lin.p0 - line.p0)) / nd;
        let center = lin.at(t);
        let q = center - n * (side * radius);
        let s = dot(q - line.p0, e) / (len_e * len_e);
        if (-EPS..=1.0 + EPS).contains(&s)
            && span_contains(start_direction, angle, direction_angle(center, q))
        {
            out.push(t);
        }
    }
}

/// Moving segment tangent to a fixed arc
fn circle_segment_tangents(
    circle: CircleHullPart,
    lin: Lin2D,
    start: Coord<f64>,
    end: Coord<f64>,
    out: &mut Contacts,
) {
    let e = end - start;
    let len_e = norm(e);
    if len_e <= EPS || circle.radius <= EPS {
        return;
    }
    let m = Coord {
        x: -e.y / len_e,
        y: e.x / len_e,
    };
    let d = lin.dir();
    let md = dot(m, d);
    if md.abs() <= EPS * norm(d) {
        return;
    }
    let base = dot(m, circle.center - lin.p0 - start);
    for side in [1.0, -1.0] {
        let t = (base - side * circle.radius) / md;
        let q = circle.center - m * (side * circle.radius);
        let moved_start = lin.at(t) + start;
        let s = dot(q - moved_start, e) / (len_e * len_e);
        if (-EPS..=1.0 + EPS).contains(&s)
            && span_contains(
                circle.start_direction,
                circle.angle,
                direction_angle(circle.center, q),
            )
        {
            out.push(t);
        }
    }
}

/// Moving arc tangent to a fixed arc (outer and inner tangency)
fn circle_arc_tangents(
    circle: CircleHullPart,
    lin: Lin2D,
    radius: f64,
    start_direction: f64,
    angle: f64,
    out: &mut Contacts,
) {
    let d = lin.dir();
    let f = lin.p0 - circle.center;
    let outer = circle.radius + radius;
    let inner = (circle.radius - radius).abs();

    for (distance, is_outer) in [(outer, true), (inner, false)] {
        if distance <= EPS {
            continue;
        }
        for t in solve_center_distance(f, d, distance) {
            let center = lin.at(t);
            let u = (center - circle.center) / distance;
            let q = if is_outer || circle.radius >= radius {
                circle.center + u * circle.radius
            } else {
                circle.center - u * circle.radius
            };
            if span_contains(
                circle.start_direction,
                circle.angle,
                direction_angle(circle.center, q),
            ) && span_contains(start_direction, angle, direction_angle(center, q))
            {
                out.push(t);
            }
        }
    }
}
