//! Segment hulls ("auras") and their parametric cut
//!
//! A [`SegmentHull`] widens a straight segment by a left and a right distance and closes it with
//! a cap at each end. [`SegmentHull::cut_curve_hull`] finds the parameter range of one segment
//! whose hull reaches into the hull of another segment, without ever building buffer polygons.

mod parts;

pub use parts::{CircleHullPart, HullLine, HullPart, HullShape, Lin2D, LineHullPart, span_contains};

use crate::geometry::{distance, normalize_angle, norm};
use crate::{Result, TopoError};
use geo::Coord;
use smallvec::SmallVec;
use std::f64::consts::PI;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// End cap of a hull
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CapStyle {
    /// Half circle around the end point
    #[default]
    Round,
    /// Flat end, perpendicular to the segment at the end point
    Butt,
}

/// A straight segment widened to the left and to the right
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentHull {
    p0: Coord<f64>,
    p1: Coord<f64>,
    width_left: f64,
    width_right: f64,
    start_cap: CapStyle,
    end_cap: CapStyle,
}

/// Parameter ranges of a segment pair whose hulls intersect
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HullCut {
    /// Range on the first segment, within `[0, 1]`
    pub self_range: (f64, f64),
    /// Range on the second segment, within `[0, 1]`
    pub other_range: (f64, f64),
}

/// Local frame of a segment: unit direction, left normal and direction angle
struct Frame {
    d: Coord<f64>,
    n: Coord<f64>,
    phi: f64,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl SegmentHull {
    /// Create a hull, failing for zero-length segments or invalid widths
    ///
    /// # Arguments
    /// * `p0`, `p1` - Segment start and end
    /// * `width_left`, `width_right` - Offsets to the left/right of the direction `p0 -> p1`
    /// * `start_cap`, `end_cap` - Cap style at `p0` and `p1`
    pub fn new(
        p0: Coord<f64>,
        p1: Coord<f64>,
        width_left: f64,
        width_right: f64,
        start_cap: CapStyle,
        end_cap: CapStyle,
    ) -> Result<Self> {
        if !(p0.x.is_finite() && p0.y.is_finite() && p1.x.is_finite() && p1.y.is_finite()) {
            return Err(TopoError::InvalidGeometry(
                "hull segment has non-finite coordinates".to_string(),
            ));
        }
        if distance(p0, p1) == 0.0 {
            return Err(TopoError::InvalidGeometry(format!(
                "hull segment has zero length at ({}, {})",
                p0.x, p0.y
            )));
        }
        if !(width_left >= 0.0 && width_right >= 0.0)
            || !width_left.is_finite()
            || !width_right.is_finite()
        {
            return Err(TopoError::InvalidGeometry(format!(
                "hull widths must be finite and >= 0 (left {width_left}, right {width_right})"
            )));
        }
        Ok(Self {
            p0,
            p1,
            width_left,
            width_right,
            start_cap,
            end_cap,
        })
    }

    /// Hull with the same width on both sides and the same cap at both ends
    pub fn symmetric(p0: Coord<f64>, p1: Coord<f64>, width: f64, cap: CapStyle) -> Result<Self> {
        Self::new(p0, p1, width, width, cap, cap)
    }

    pub fn p0(&self) -> Coord<f64> {
        self.p0
    }

    pub fn p1(&self) -> Coord<f64> {
        self.p1
    }

    pub fn length(&self) -> f64 {
        distance(self.p0, self.p1)
    }

    pub fn is_symmetric(&self) -> bool {
        self.width_left == self.width_right
    }

    /// Largest of the two widths
    pub fn max_width(&self) -> f64 {
        self.width_left.max(self.width_right)
    }

    fn frame(&self) -> Frame {
        let v = self.p1 - self.p0;
        let len = norm(v);
        let d = v / len;
        Frame {
            d,
            n: Coord { x: -d.y, y: d.x },
            phi: v.y.atan2(v.x),
        }
    }

    /// Boundary of the hull widened by `offset`, as fixed parts
    pub fn boundary(&self, offset: f64) -> Vec<HullPart> {
        let Frame { d, n, phi } = self.frame();
        let wl = self.width_left + offset;
        let wr = self.width_right + offset;
        let (p0, p1) = (self.p0, self.p1);

        let mut parts: Vec<HullPart> = vec![
            LineHullPart {
                p0: p0 + n * wl,
                p1: p1 + n * wl,
            }
            .into(),
            LineHullPart {
                p0: p0 - n * wr,
                p1: p1 - n * wr,
            }
            .into(),
        ];

        // end cap at p1: forward direction is phi
        match self.end_cap {
            CapStyle::Butt => parts.push(
                LineHullPart {
                    p0: p1 - n * wr,
                    p1: p1 + n * wl,
                }
                .into(),
            ),
            CapStyle::Round if wl == wr => {
                push_arc(&mut parts, p1, wl, phi - PI / 2.0, PI);
            }
            CapStyle::Round => {
                push_arc(&mut parts, p1, wl, phi, PI / 2.0);
                push_arc(&mut parts, p1, wr, phi - PI / 2.0, PI / 2.0);
                parts.push(
                    LineHullPart {
                        p0: p1 + d * wl,
                        p1: p1 + d * wr,
                    }
                    .into(),
                );
            }
        }

        // start cap at p0: backward direction is phi + PI
        match self.start_cap {
            CapStyle::Butt => parts.push(
                LineHullPart {
                    p0: p0 - n * wr,
                    p1: p0 + n * wl,
                }
                .into(),
            ),
            CapStyle::Round if wl == wr => {
                push_arc(&mut parts, p0, wl, phi + PI / 2.0, PI);
            }
            CapStyle::Round => {
                push_arc(&mut parts, p0, wl, phi + PI / 2.0, PI / 2.0);
                push_arc(&mut parts, p0, wr, phi + PI, PI / 2.0);
                parts.push(
                    LineHullPart {
                        p0: p0 - d * wl,
                        p1: p0 - d * wr,
                    }
                    .into(),
                );
            }
        }

        parts
    }

    /// Cross section of the hull moved along the segment, for a uniform cap style
    fn moving_shapes(&self, cap: CapStyle) -> SmallVec<[HullShape; 4]> {
        let Frame { d, n, phi } = self.frame();
        let (wl, wr) = (self.width_left, self.width_right);
        if wl == 0.0 && wr == 0.0 {
            return smallvec::smallvec![HullShape::Point];
        }
        match cap {
            CapStyle::Butt => smallvec::smallvec![HullShape::Segment {
                start: -(n * wr),
                end: n * wl,
            }],
            CapStyle::Round if wl == wr => smallvec::smallvec![HullShape::Arc {
                radius: wl,
                start_direction: 0.0,
                angle: 2.0 * PI,
            }],
            CapStyle::Round => {
                let mut shapes: SmallVec<[HullShape; 4]> = SmallVec::new();
                if wl > 0.0 {
                    shapes.push(HullShape::Arc {
                        radius: wl,
                        start_direction: phi,
                        angle: PI,
                    });
                }
                if wr > 0.0 {
                    shapes.push(HullShape::Arc {
                        radius: wr,
                        start_direction: phi + PI,
                        angle: PI,
                    });
                }
                shapes.push(HullShape::Segment {
                    start: d * wr,
                    end: d * wl,
                });
                shapes.push(HullShape::Segment {
                    start: -(d * wr),
                    end: -(d * wl),
                });
                shapes
            }
        }
    }

    /// Unclamped parameter range where the moving cross section touches `fixed`
    fn cut_with(&self, fixed: &[HullPart], cap: CapStyle) -> Option<(f64, f64)> {
        let lin = Lin2D::new(self.p0, self.p1);
        let mut t_min = f64::INFINITY;
        let mut t_max = f64::NEG_INFINITY;
        let mut found = false;
        for shape in self.moving_shapes(cap) {
            let x = HullLine { lin, shape };
            for part in fixed {
                found |= part.cut(&x, &mut t_min, &mut t_max);
            }
        }
        found.then_some((t_min, t_max))
    }

    /// Range on this segment whose hull intersects the hull of `other`
    ///
    /// `tolerance` widens the other hull on both sides. Returns `None` if the hulls are
    /// disjoint within the segment's own extent.
    pub fn cut_curve_hull(&self, other: &SegmentHull, tolerance: f64) -> Option<(f64, f64)> {
        let fixed = other.boundary(tolerance);
        match (self.start_cap, self.end_cap) {
            (CapStyle::Round, CapStyle::Round) => {
                clamp_unit(self.cut_with(&fixed, CapStyle::Round)?)
            }
            (CapStyle::Butt, CapStyle::Butt) => clamp_unit(self.cut_with(&fixed, CapStyle::Butt)?),
            (start_cap, end_cap) => {
                let mut lo = f64::INFINITY;
                let mut hi = f64::NEG_INFINITY;
                if let Some((a, b)) = self
                    .cut_with(&fixed, CapStyle::Butt)
                    .and_then(clamp_unit)
                {
                    lo = a;
                    hi = b;
                }
                if let Some((a, b)) = self.cut_with(&fixed, CapStyle::Round) {
                    if start_cap == CapStyle::Round && a <= 0.0 && b >= 0.0 {
                        lo = lo.min(0.0);
                        hi = hi.max(0.0);
                    }
                    if end_cap == CapStyle::Round && a <= 1.0 && b >= 1.0 {
                        lo = lo.min(1.0);
                        hi = hi.max(1.0);
                    }
                }
                (lo <= hi).then_some((lo, hi))
            }
        }
    }

    /// Cut both segments of a pair against each other
    pub fn cut_pair(&self, other: &SegmentHull, tolerance: f64) -> Option<HullCut> {
        let self_range = self.cut_curve_hull(other, tolerance)?;
        let other_range = other.cut_curve_hull(self, tolerance)?;
        Some(HullCut {
            self_range,
            other_range,
        })
    }
}

fn push_arc(parts: &mut Vec<HullPart>, center: Coord<f64>, radius: f64, start: f64, angle: f64) {
    if radius > 0.0 {
        parts.push(
            CircleHullPart::new(center, radius)
                .with_span(start, angle)
                .into(),
        );
    }
}

fn clamp_unit((a, b): (f64, f64)) -> Option<(f64, f64)> {
    let lo = a.max(0.0);
    let hi = b.min(1.0);
    (lo <= hi).then_some((lo, hi))
}

/// Check if a butt line end is inconsistent with the adjacent segment
///
/// A line symbol of `line_width` ending with a flat cap at a vertex between the directions
/// `dir0` (incoming) and `dir1` (outgoing segment of `segment_length`) is inconsistent when the
/// turn is so sharp or the segment so short that the flat end would stick out of the symbol of
/// the neighbouring segment.
pub fn has_inconsistent_line_end(
    line_width: f64,
    dir0: f64,
    dir1: f64,
    segment_length: f64,
) -> bool {
    let between = normalize_angle(dir1 + PI - dir0);
    let a = between.abs() - PI / 2.0;
    let ratio = a.cos().abs();

    if a < 0.0 || a > PI {
        // acute angle between the segments
        ratio * segment_length < line_width
    } else {
        ratio * line_width > segment_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(x: f64, y: f64) -> Coord<f64> {
        Coord { x, y }
    }

    #[test]
    fn test_invalid_hulls_are_rejected() {
        assert!(SegmentHull::symmetric(c(1.0, 1.0), c(1.0, 1.0), 1.0, CapStyle::Round).is_err());
        assert!(SegmentHull::symmetric(c(0.0, 0.0), c(1.0, 1.0), -1.0, CapStyle::Round).is_err());
        assert!(
            SegmentHull::symmetric(c(0.0, 0.0), c(f64::NAN, 1.0), 1.0, CapStyle::Round).is_err()
        );
        assert!(SegmentHull::symmetric(c(0.0, 0.0), c(1.0, 1.0), 0.0, CapStyle::Round).is_ok());
    }

    #[test]
    fn test_parallel_round_hulls() {
        let a = SegmentHull::symmetric(c(0.0, 0.0), c(10.0, 0.0), 1.0, CapStyle::Round).unwrap();
        let b = SegmentHull::symmetric(c(4.0, 1.5), c(6.0, 1.5), 1.0, CapStyle::Round).unwrap();

        // disks of radius 1 around a(t) reach b's hull (radius 1) when |a(t) - b| <= 2
        let (t0, t1) = a.cut_curve_hull(&b, 0.0).unwrap();
        let reach = (4.0_f64 - 2.25).sqrt();
        assert!((t0 - (4.0 - reach) / 10.0).abs() < 1e-9);
        assert!((t1 - (6.0 + reach) / 10.0).abs() < 1e-9);

        let far = SegmentHull::symmetric(c(4.0, 2.5), c(6.0, 2.5), 0.4, CapStyle::Round).unwrap();
        assert!(a.cut_curve_hull(&far, 0.0).is_none());
        assert!(a.cut_curve_hull(&far, 1.2).is_some());
    }

    #[test]
    fn test_crossing_segment_pair() {
        // segment pair from a crossing configuration
        let a =
            SegmentHull::new(c(0.0, 0.0), c(10.0, 0.0), 2.01, 2.0, CapStyle::Round, CapStyle::Round)
                .unwrap();
        let b = SegmentHull::symmetric(c(4.0, -7.0), c(8.0, 7.0), 1.0, CapStyle::Round).unwrap();
        let cut = a.cut_pair(&b, 0.0).unwrap();
        let (a0, a1) = cut.self_range;
        let (b0, b1) = cut.other_range;
        assert!(a0 > 0.0 && a0 < 0.5 && a1 > 0.5 && a1 < 1.0);
        assert!(b0 > 0.0 && b0 < 0.5 && b1 > 0.5 && b1 < 1.0);

        // the crossing point (6, 0) lies in both ranges
        assert!(a0 <= 0.6 && 0.6 <= a1);
        assert!(b0 <= 0.5 && 0.5 <= b1);

        let symmetric =
            SegmentHull::symmetric(c(0.0, 0.0), c(10.0, 0.0), 2.0, CapStyle::Round).unwrap();
        let (s0, s1) = symmetric.cut_curve_hull(&b, 0.0).unwrap();
        assert!(s0 >= a0 - 1e-3 && s1 <= a1 + 1e-3);
    }

    #[test]
    fn test_butt_end_stops_at_end_point() {
        // b lies beyond the end of a, within reach of a round cap only
        let b = SegmentHull::symmetric(c(11.0, -5.0), c(11.0, 5.0), 0.5, CapStyle::Round).unwrap();
        let round =
            SegmentHull::symmetric(c(0.0, 0.0), c(10.0, 0.0), 1.0, CapStyle::Round).unwrap();
        let butt = SegmentHull::symmetric(c(0.0, 0.0), c(10.0, 0.0), 1.0, CapStyle::Butt).unwrap();
        let mixed =
            SegmentHull::new(c(0.0, 0.0), c(10.0, 0.0), 1.0, 1.0, CapStyle::Butt, CapStyle::Round)
                .unwrap();

        let (t0, t1) = round.cut_curve_hull(&b, 0.0).unwrap();
        assert!((t0 - 0.95).abs() < 1e-9);
        assert_eq!(t1, 1.0);
        assert!(butt.cut_curve_hull(&b, 0.0).is_none());
        assert_eq!(mixed.cut_curve_hull(&b, 0.0), Some((1.0, 1.0)));
    }

    #[test]
    fn test_asymmetric_widths() {
        // a runs to the right (east); left side is north
        let a =
            SegmentHull::new(c(0.0, 0.0), c(10.0, 0.0), 0.1, 2.0, CapStyle::Round, CapStyle::Round)
                .unwrap();
        let north = SegmentHull::symmetric(c(3.0, 1.0), c(7.0, 1.0), 0.0, CapStyle::Round).unwrap();
        let south =
            SegmentHull::symmetric(c(3.0, -1.0), c(7.0, -1.0), 0.0, CapStyle::Round).unwrap();

        assert!(a.cut_curve_hull(&north, 0.0).is_none());
        let (t0, t1) = a.cut_curve_hull(&south, 0.0).unwrap();
        assert!(t0 < 0.3 && t1 > 0.7);
    }

    #[test]
    fn test_has_inconsistent_line_end() {
        assert!(has_inconsistent_line_end(27.0, 2.891, -2.670, 17.7));
        assert!(has_inconsistent_line_end(100.0, 0.0, 90f64.to_radians(), 90.0));
        assert!(has_inconsistent_line_end(100.0, 0.0, 91f64.to_radians(), 100.0));
        assert!(has_inconsistent_line_end(100.0, 270f64.to_radians(), 1f64.to_radians(), 100.0));
        assert!(has_inconsistent_line_end(10.0, 0.0, 91f64.to_radians(), 10.0));

        assert!(!has_inconsistent_line_end(100.0, 0.0, 45f64.to_radians(), 100.0));
        assert!(!has_inconsistent_line_end(100.0, 0.0, 90f64.to_radians(), 100.0));
        assert!(!has_inconsistent_line_end(100.0, 0.0, 91f64.to_radians(), 110.0));
        assert!(!has_inconsistent_line_end(100.0, PI, 1.1 * PI, 100.0));
        assert!(!has_inconsistent_line_end(100.0, 0.0, 0.0, 1.0));
        assert!(!has_inconsistent_line_end(10.0, 0.0, 90f64.to_radians(), 10.0));
    }
}
