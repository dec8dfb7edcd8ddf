//! Tolerance model and planar geometry helpers
//!
//! All predicates in the checks are expressed relative to a [`Tolerance`] instead of exact
//! coordinate equality. The helpers below work on `geo` coordinates and are kept free of any
//! check specific semantics.

use crate::{Result, TopoError};
use geo::{Coord, LineString, MultiLineString, MultiPolygon, Polygon, Rect};
use std::f64::consts::PI;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default XY tolerance in dataset units
pub const DEFAULT_XY_TOLERANCE: f64 = 0.001;

/// Ratio between the XY tolerance and the XY resolution
const RESOLUTION_FACTOR: f64 = 0.1;

/// Spatial tolerance of a dataset
///
/// Two coordinates closer than `xy_tolerance` are considered coincident. The resolution is the
/// smallest distinguishable coordinate difference and is used as "insignificantly different".
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Tolerance {
    /// Minimum distinguishable distance between two coordinates
    pub xy_tolerance: f64,
    /// Coordinate resolution (default: a tenth of the tolerance)
    pub resolution: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            xy_tolerance: DEFAULT_XY_TOLERANCE,
            resolution: DEFAULT_XY_TOLERANCE * RESOLUTION_FACTOR,
        }
    }
}

impl Tolerance {
    /// Create a tolerance, failing for non-positive or non-finite values
    pub fn new(xy_tolerance: f64) -> Result<Self> {
        if !xy_tolerance.is_finite() || xy_tolerance <= 0.0 {
            return Err(TopoError::config(format!(
                "xy tolerance must be > 0, got {xy_tolerance}"
            )));
        }
        Ok(Self {
            xy_tolerance,
            resolution: xy_tolerance * RESOLUTION_FACTOR,
        })
    }

    /// Tolerance that governs a combination of two geometries
    ///
    /// An explicitly requested output tolerance always wins. Without one, the coarser of the
    /// two input tolerances is adopted.
    pub fn governing(a: Tolerance, b: Tolerance, explicit: Option<Tolerance>) -> Tolerance {
        match explicit {
            Some(tolerance) => tolerance,
            None if a.xy_tolerance >= b.xy_tolerance => a,
            None => b,
        }
    }

    /// Check if two coordinates are coincident within this tolerance
    #[inline]
    pub fn is_coincident(&self, a: Coord<f64>, b: Coord<f64>) -> bool {
        distance(a, b) <= self.xy_tolerance
    }

    /// Check if a value is insignificantly different from zero
    #[inline]
    pub fn is_zero(&self, value: f64) -> bool {
        value.abs() <= self.resolution
    }
}

/// Check if `value` is within `tolerance`
///
/// A zero tolerance accepts values that are insignificantly different from zero.
pub fn is_within_tolerance(value: f64, tolerance: f64, xy: &Tolerance) -> bool {
    if value <= tolerance {
        return true;
    }
    tolerance == 0.0 && xy.is_zero(value)
}

#[inline(always)]
pub fn dot(a: Coord<f64>, b: Coord<f64>) -> f64 {
    a.x * b.x + a.y * b.y
}

/// Z component of the cross product
#[inline(always)]
pub fn cross(a: Coord<f64>, b: Coord<f64>) -> f64 {
    a.x * b.y - a.y * b.x
}

#[inline(always)]
pub fn norm(v: Coord<f64>) -> f64 {
    v.x.hypot(v.y)
}

#[inline(always)]
pub fn distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

/// Unit vector for a direction angle
#[inline(always)]
pub fn unit(angle: f64) -> Coord<f64> {
    Coord {
        x: angle.cos(),
        y: angle.sin(),
    }
}

/// Direction angle of the vector from `a` to `b`
#[inline(always)]
pub fn direction_angle(a: Coord<f64>, b: Coord<f64>) -> f64 {
    (b.y - a.y).atan2(b.x - a.x)
}

/// Normalize an angle into `[-PI, PI]`
pub fn normalize_angle(angle: f64) -> f64 {
    let mut a = angle % (2.0 * PI);
    if a > PI {
        a -= 2.0 * PI;
    } else if a < -PI {
        a += 2.0 * PI;
    }
    a
}

/// Point at parameter `t` on the segment `a`-`b` (t is not clamped)
#[inline(always)]
pub fn point_at(a: Coord<f64>, b: Coord<f64>, t: f64) -> Coord<f64> {
    Coord {
        x: a.x + t * (b.x - a.x),
        y: a.y + t * (b.y - a.y),
    }
}

/// Parameter of the orthogonal projection of `p` onto the line through `a` and `b`
pub fn project(p: Coord<f64>, a: Coord<f64>, b: Coord<f64>) -> f64 {
    let d = b - a;
    let len2 = dot(d, d);
    if len2 == 0.0 {
        return 0.0;
    }
    dot(p - a, d) / len2
}

/// Distance from `p` to the segment `a`-`b` and the clamped parameter of the nearest point
pub fn point_segment_distance(p: Coord<f64>, a: Coord<f64>, b: Coord<f64>) -> (f64, f64) {
    let t = project(p, a, b).clamp(0.0, 1.0);
    (distance(p, point_at(a, b, t)), t)
}

/// Iterate over the segments of a line string
pub fn segments(line: &LineString<f64>) -> impl Iterator<Item = (Coord<f64>, Coord<f64>)> + '_ {
    line.0.windows(2).map(|w| (w[0], w[1]))
}

/// Planar length of a line string
pub fn line_length(line: &LineString<f64>) -> f64 {
    segments(line).map(|(a, b)| distance(a, b)).sum()
}

/// Planar length of all parts of a multi line string
pub fn multi_line_length(lines: &MultiLineString<f64>) -> f64 {
    lines.0.iter().map(line_length).sum()
}

/// Location of the point on a polyline nearest to a query point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestPoint {
    pub distance: f64,
    pub part_index: usize,
    pub segment_index: usize,
    /// Parameter along the segment, in `[0, 1]`
    pub t: f64,
    pub point: Coord<f64>,
}

/// Find the point on `lines` nearest to `p`
pub fn nearest_point(p: Coord<f64>, lines: &MultiLineString<f64>) -> Option<NearestPoint> {
    let mut best: Option<NearestPoint> = None;
    for (part_index, line) in lines.0.iter().enumerate() {
        for (segment_index, (a, b)) in segments(line).enumerate() {
            let (d, t) = point_segment_distance(p, a, b);
            if best.is_none_or(|current| d < current.distance) {
                best = Some(NearestPoint {
                    distance: d,
                    part_index,
                    segment_index,
                    t,
                    point: point_at(a, b, t),
                });
            }
        }
    }
    best
}

/// Distance from a point to the nearest vertex of `lines`
pub fn nearest_vertex_distance(p: Coord<f64>, lines: &MultiLineString<f64>) -> Option<f64> {
    lines
        .0
        .iter()
        .flat_map(|line| line.0.iter())
        .map(|&c| distance(p, c))
        .min_by(|a, b| a.total_cmp(b))
}

/// Boundary rings of a polygon set as a multi line string
pub fn polygon_boundary(polygons: &MultiPolygon<f64>) -> MultiLineString<f64> {
    let mut lines = Vec::new();
    for polygon in &polygons.0 {
        lines.push(polygon.exterior().clone());
        lines.extend(polygon.interiors().iter().cloned());
    }
    MultiLineString::new(lines)
}

/// Perimeter of a polygon set, including holes
pub fn perimeter(polygons: &MultiPolygon<f64>) -> f64 {
    multi_line_length(&polygon_boundary(polygons))
}

/// Grow a rectangle by `d` on every side
pub fn expand_rect(rect: Rect<f64>, d: f64) -> Rect<f64> {
    Rect::new(
        Coord {
            x: rect.min().x - d,
            y: rect.min().y - d,
        },
        Coord {
            x: rect.max().x + d,
            y: rect.max().y + d,
        },
    )
}

/// Smallest rectangle containing both rectangles
pub fn rect_union(a: Rect<f64>, b: Rect<f64>) -> Rect<f64> {
    Rect::new(
        Coord {
            x: a.min().x.min(b.min().x),
            y: a.min().y.min(b.min().y),
        },
        Coord {
            x: a.max().x.max(b.max().x),
            y: a.max().y.max(b.max().y),
        },
    )
}

/// Intersection of two rectangles, if they intersect (touching counts)
pub fn rect_intersection(a: Rect<f64>, b: Rect<f64>) -> Option<Rect<f64>> {
    if !rects_intersect(a, b) {
        return None;
    }
    Some(Rect::new(
        Coord {
            x: a.min().x.max(b.min().x),
            y: a.min().y.max(b.min().y),
        },
        Coord {
            x: a.max().x.min(b.max().x),
            y: a.max().y.min(b.max().y),
        },
    ))
}

/// Check if two rectangles intersect (not disjoint)
#[inline]
pub fn rects_intersect(a: Rect<f64>, b: Rect<f64>) -> bool {
    !(a.max().x < b.min().x
        || a.min().x > b.max().x
        || a.max().y < b.min().y
        || a.min().y > b.max().y)
}

/// Check if `inner` lies within `outer` (boundaries may touch)
#[inline]
pub fn rect_contains(outer: Rect<f64>, inner: Rect<f64>) -> bool {
    inner.min().x >= outer.min().x
        && inner.min().y >= outer.min().y
        && inner.max().x <= outer.max().x
        && inner.max().y <= outer.max().y
}

#[inline]
pub fn rect_contains_point(rect: Rect<f64>, p: Coord<f64>) -> bool {
    p.x >= rect.min().x && p.x <= rect.max().x && p.y >= rect.min().y && p.y <= rect.max().y
}

/// Rectangle as a polygon
pub fn rect_polygon(rect: Rect<f64>) -> Polygon<f64> {
    rect.to_polygon()
}

/// Check if a line segment intersects a rectangle
pub fn segment_intersects_rect(p1: Coord<f64>, p2: Coord<f64>, rect: Rect<f64>) -> bool {
    let min = rect.min();
    let max = rect.max();

    // Use Cohen-Sutherland-style outcode to check intersection
    let outcode = |p: Coord<f64>| -> u8 {
        let mut code = 0u8;
        if p.x < min.x {
            code |= 1;
        } // left
        if p.x > max.x {
            code |= 2;
        } // right
        if p.y < min.y {
            code |= 4;
        } // bottom
        if p.y > max.y {
            code |= 8;
        } // top
        code
    };

    let code1 = outcode(p1);
    let code2 = outcode(p2);

    if code1 == 0 || code2 == 0 {
        return true;
    }

    // Both points in same outside region
    if code1 & code2 != 0 {
        return false;
    }

    let edges = [
        (Coord { x: min.x, y: min.y }, Coord { x: min.x, y: max.y }), // left
        (Coord { x: max.x, y: min.y }, Coord { x: max.x, y: max.y }), // right
        (Coord { x: min.x, y: min.y }, Coord { x: max.x, y: min.y }), // bottom
        (Coord { x: min.x, y: max.y }, Coord { x: max.x, y: max.y }), // top
    ];

    edges
        .into_iter()
        .any(|(e1, e2)| segments_intersect(p1, p2, e1, e2))
}

/// Check if any segment of the line intersects the rectangle
pub fn lines_intersect_rect(lines: &MultiLineString<f64>, rect: Rect<f64>) -> bool {
    lines.0.iter().any(|line| {
        if line.0.len() == 1 {
            return rect_contains_point(rect, line.0[0]);
        }
        segments(line).any(|(a, b)| segment_intersects_rect(a, b, rect))
    })
}

/// Check if two line segments intersect
pub fn segments_intersect(
    p1: Coord<f64>,
    p2: Coord<f64>,
    p3: Coord<f64>,
    p4: Coord<f64>,
) -> bool {
    let d1 = orientation(p3, p4, p1);
    let d2 = orientation(p3, p4, p2);
    let d3 = orientation(p1, p2, p3);
    let d4 = orientation(p1, p2, p4);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    (d1 == 0.0 && on_segment(p3, p4, p1))
        || (d2 == 0.0 && on_segment(p3, p4, p2))
        || (d3 == 0.0 && on_segment(p1, p2, p3))
        || (d4 == 0.0 && on_segment(p1, p2, p4))
}

/// Cross product orientation of `p3` relative to `p1`-`p2`
fn orientation(p1: Coord<f64>, p2: Coord<f64>, p3: Coord<f64>) -> f64 {
    (p3.x - p1.x) * (p2.y - p1.y) - (p2.x - p1.x) * (p3.y - p1.y)
}

/// Check if point p is on segment (p1, p2)
fn on_segment(p1: Coord<f64>, p2: Coord<f64>, p: Coord<f64>) -> bool {
    p.x >= p1.x.min(p2.x) && p.x <= p1.x.max(p2.x) && p.y >= p1.y.min(p2.y) && p.y <= p1.y.max(p2.y)
}

/// Proper intersection point of two segments, if they cross in a single point
pub fn segment_intersection(
    a0: Coord<f64>,
    a1: Coord<f64>,
    b0: Coord<f64>,
    b1: Coord<f64>,
) -> Option<(f64, f64)> {
    let da = a1 - a0;
    let db = b1 - b0;
    let denom = cross(da, db);
    if denom.abs() <= f64::EPSILON * norm(da) * norm(db) {
        return None;
    }
    let w = b0 - a0;
    let ta = cross(w, db) / denom;
    let tb = cross(w, da) / denom;
    let eps = 1e-12;
    if (-eps..=1.0 + eps).contains(&ta) && (-eps..=1.0 + eps).contains(&tb) {
        Some((ta.clamp(0.0, 1.0), tb.clamp(0.0, 1.0)))
    } else {
        None
    }
}

/// Check if two polylines cross or touch anywhere
pub fn lines_intersect(a: &MultiLineString<f64>, b: &MultiLineString<f64>) -> bool {
    a.0.iter().any(|la| {
        segments(la).any(|(a0, a1)| {
            b.0.iter()
                .any(|lb| segments(lb).any(|(b0, b1)| segments_intersect(a0, a1, b0, b1)))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{LineString, polygon};

    fn c(x: f64, y: f64) -> Coord<f64> {
        Coord { x, y }
    }

    #[test]
    fn test_tolerance_rejects_non_positive() {
        assert!(Tolerance::new(0.0).is_err());
        assert!(Tolerance::new(-1.0).is_err());
        assert!(Tolerance::new(f64::NAN).is_err());
        let tolerance = Tolerance::new(0.01).unwrap();
        assert!((tolerance.resolution - 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_governing_tolerance() {
        let fine = Tolerance::new(0.001).unwrap();
        let coarse = Tolerance::new(0.01).unwrap();
        let explicit = Tolerance::new(0.05).unwrap();

        assert_eq!(Tolerance::governing(fine, coarse, None), coarse);
        assert_eq!(Tolerance::governing(coarse, fine, None), coarse);
        assert_eq!(Tolerance::governing(fine, coarse, Some(explicit)), explicit);
    }

    #[test]
    fn test_is_within_tolerance() {
        let xy = Tolerance::new(0.01).unwrap();
        assert!(is_within_tolerance(0.5, 0.5, &xy));
        assert!(!is_within_tolerance(0.6, 0.5, &xy));
        assert!(is_within_tolerance(0.0005, 0.0, &xy));
        assert!(!is_within_tolerance(0.005, 0.0, &xy));
    }

    #[test]
    fn test_normalize_angle() {
        assert!((normalize_angle(3.0 * PI / 2.0) + PI / 2.0).abs() < 1e-12);
        assert!((normalize_angle(-3.0 * PI / 2.0) - PI / 2.0).abs() < 1e-12);
        assert!((normalize_angle(0.25) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_point_segment_distance() {
        let (d, t) = point_segment_distance(c(5.0, 3.0), c(0.0, 0.0), c(10.0, 0.0));
        assert!((d - 3.0).abs() < 1e-12);
        assert!((t - 0.5).abs() < 1e-12);

        let (d, t) = point_segment_distance(c(-4.0, 3.0), c(0.0, 0.0), c(10.0, 0.0));
        assert!((d - 5.0).abs() < 1e-12);
        assert_eq!(t, 0.0);
    }

    #[test]
    fn test_nearest_point() {
        let lines = MultiLineString::new(vec![
            LineString::from(vec![(0.0, 0.0), (10.0, 0.0)]),
            LineString::from(vec![(0.0, 5.0), (10.0, 5.0), (10.0, 10.0)]),
        ]);
        let nearest = nearest_point(c(11.0, 7.0), &lines).unwrap();
        assert_eq!(nearest.part_index, 1);
        assert_eq!(nearest.segment_index, 1);
        assert!((nearest.distance - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_line_length_and_perimeter() {
        let line = LineString::from(vec![(0.0, 0.0), (3.0, 4.0), (3.0, 10.0)]);
        assert!((line_length(&line) - 11.0).abs() < 1e-12);

        let square =
            polygon![(x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 2.0), (x: 0.0, y: 2.0)];
        assert!((perimeter(&MultiPolygon::new(vec![square])) - 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_segment_intersects_rect() {
        let rect = Rect::new(c(0.0, 0.0), c(10.0, 10.0));

        // Line fully inside
        assert!(segment_intersects_rect(c(2.0, 2.0), c(8.0, 8.0), rect));
        // Line crossing through
        assert!(segment_intersects_rect(c(-5.0, 5.0), c(15.0, 5.0), rect));
        // Line fully outside
        assert!(!segment_intersects_rect(c(20.0, 20.0), c(30.0, 30.0), rect));
        // Diagonal passing by a corner
        assert!(!segment_intersects_rect(c(-5.0, 8.0), c(8.0, 21.0), rect));
    }

    #[test]
    fn test_segment_intersection() {
        let (ta, tb) =
            segment_intersection(c(0.0, 0.0), c(10.0, 0.0), c(5.0, -5.0), c(5.0, 5.0)).unwrap();
        assert!((ta - 0.5).abs() < 1e-12);
        assert!((tb - 0.5).abs() < 1e-12);

        assert!(
            segment_intersection(c(0.0, 0.0), c(10.0, 0.0), c(0.0, 1.0), c(10.0, 1.0)).is_none()
        );
        assert!(
            segment_intersection(c(0.0, 0.0), c(1.0, 0.0), c(5.0, -5.0), c(5.0, 5.0)).is_none()
        );
    }

    #[test]
    fn test_rect_helpers() {
        let a = Rect::new(c(0.0, 0.0), c(5.0, 5.0));
        let b = Rect::new(c(5.0, 5.0), c(8.0, 8.0));
        assert!(rects_intersect(a, b));
        assert_eq!(rect_intersection(a, b), Some(Rect::new(c(5.0, 5.0), c(5.0, 5.0))));
        assert!(rect_contains(rect_union(a, b), a));
        assert!(rect_contains(expand_rect(a, 1.0), Rect::new(c(-1.0, -1.0), c(6.0, 6.0))));
    }
}
