//! Coverage accounting along polylines
//!
//! [`SegmentParts`] records which parameter ranges of which segments are covered by some
//! neighbouring geometry. [`Subcurve`]s are the contiguous runs derived from it, either the
//! covered ones or the missing ones.

use crate::geometry::{cross, distance, nearest_point, point_at, segments};
use crate::hull::{CapStyle, SegmentHull};
use geo::{BoundingRect, Coord, LineInterpolatePoint, LineString, MultiLineString, Rect};
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Position of a segment within a multi part polyline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentKey {
    pub part: usize,
    pub segment: usize,
}

impl SegmentKey {
    pub fn new(part: usize, segment: usize) -> Self {
        Self { part, segment }
    }
}

/// Covered sub-interval `[t_min, t_max]` of one segment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentPart {
    pub key: SegmentKey,
    pub t_min: f64,
    pub t_max: f64,
}

impl SegmentPart {
    /// Create a part, ordering and clamping the parameters into `[0, 1]`
    pub fn new(key: SegmentKey, t0: f64, t1: f64) -> Self {
        let (lo, hi) = if t0 <= t1 { (t0, t1) } else { (t1, t0) };
        Self {
            key,
            t_min: lo.clamp(0.0, 1.0),
            t_max: hi.clamp(0.0, 1.0),
        }
    }
}

type Ranges = SmallVec<[(f64, f64); 2]>;

/// Sorted, merged coverage ranges per segment
///
/// Segments can be registered without any coverage; only registered segments take part in
/// [`get_missing_subcurves`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentParts {
    ranges: BTreeMap<SegmentKey, Ranges>,
}

impl SegmentParts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a segment without adding coverage
    pub fn register(&mut self, key: SegmentKey) {
        self.ranges.entry(key).or_default();
    }

    /// Add a covered range, merging it with overlapping or touching ranges
    pub fn add(&mut self, part: SegmentPart) {
        let ranges = self.ranges.entry(part.key).or_default();
        let mut lo = part.t_min;
        let mut hi = part.t_max;
        let mut merged = Ranges::new();
        for &(a, b) in ranges.iter() {
            if b < lo || a > hi {
                merged.push((a, b));
            } else {
                lo = lo.min(a);
                hi = hi.max(b);
            }
        }
        merged.push((lo, hi));
        merged.sort_by(|x, y| x.0.total_cmp(&y.0));
        *ranges = merged;
    }

    pub fn add_range(&mut self, key: SegmentKey, t0: f64, t1: f64) {
        self.add(SegmentPart::new(key, t0, t1));
    }

    /// Add all ranges of another coverage
    pub fn extend(&mut self, other: &SegmentParts) {
        for (key, ranges) in &other.ranges {
            if ranges.is_empty() {
                self.register(*key);
            }
            for &(a, b) in ranges {
                self.add_range(*key, a, b);
            }
        }
    }

    pub fn ranges(&self, key: SegmentKey) -> &[(f64, f64)] {
        self.ranges.get(&key).map(|r| r.as_slice()).unwrap_or(&[])
    }

    pub fn keys(&self) -> impl Iterator<Item = SegmentKey> + '_ {
        self.ranges.keys().copied()
    }

    pub fn contains_key(&self, key: SegmentKey) -> bool {
        self.ranges.contains_key(&key)
    }

    /// True if no range has been added
    pub fn is_empty(&self) -> bool {
        self.ranges.values().all(|r| r.is_empty())
    }

    /// Total covered length along `line`
    pub fn covered_length(&self, line: &MultiLineString<f64>) -> f64 {
        self.ranges
            .iter()
            .filter_map(|(key, ranges)| {
                let len = segment_length(line, *key)?;
                Some(ranges.iter().map(|(a, b)| (b - a) * len).sum::<f64>())
            })
            .sum()
    }

    /// Coverage remaining after removing the ranges of `other`
    ///
    /// Registered segments stay registered even when nothing of them remains.
    pub fn subtract(&self, other: &SegmentParts) -> SegmentParts {
        let mut result = SegmentParts::new();
        for (key, ranges) in &self.ranges {
            result.register(*key);
            let removed = other.ranges(*key);
            for &(a, b) in ranges {
                let mut lo = a;
                for &(ra, rb) in removed {
                    if rb <= lo || ra >= b {
                        continue;
                    }
                    if ra > lo {
                        result.add_range(*key, lo, ra);
                    }
                    lo = lo.max(rb);
                }
                if lo < b {
                    result.add_range(*key, lo, b);
                }
            }
        }
        result
    }

    /// Coverage made up of the given runs
    pub fn from_subcurves(subcurves: &[Subcurve]) -> Self {
        let mut parts = SegmentParts::new();
        for run in subcurves {
            for segment in run.start_segment..=run.end_segment {
                let t0 = if segment == run.start_segment { run.start_t } else { 0.0 };
                let t1 = if segment == run.end_segment { run.end_t } else { 1.0 };
                parts.add_range(SegmentKey::new(run.part, segment), t0, t1);
            }
        }
        parts
    }

    /// Register every segment of `line`
    pub fn register_all(&mut self, line: &MultiLineString<f64>) {
        for (part, ls) in line.0.iter().enumerate() {
            for segment in 0..ls.0.len().saturating_sub(1) {
                self.register(SegmentKey::new(part, segment));
            }
        }
    }
}

/// Contiguous run along one part of a polyline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Subcurve {
    pub part: usize,
    pub start_segment: usize,
    pub start_t: f64,
    pub end_segment: usize,
    pub end_t: f64,
}

impl Subcurve {
    /// Geometry of the run along `line`
    pub fn geometry(&self, line: &MultiLineString<f64>) -> LineString<f64> {
        let Some(ls) = line.0.get(self.part) else {
            return LineString::new(Vec::new());
        };
        let mut coords: Vec<Coord<f64>> = Vec::new();
        let mut push = |c: Coord<f64>| {
            if coords.last() != Some(&c) {
                coords.push(c);
            }
        };
        let at = |segment: usize, t: f64| point_at(ls.0[segment], ls.0[segment + 1], t);

        push(at(self.start_segment, self.start_t));
        for vertex in self.start_segment + 1..=self.end_segment {
            push(ls.0[vertex]);
        }
        push(at(self.end_segment, self.end_t));
        LineString::new(coords)
    }

    pub fn length(&self, line: &MultiLineString<f64>) -> f64 {
        crate::geometry::line_length(&self.geometry(line))
    }

    pub fn start_point(&self, line: &MultiLineString<f64>) -> Option<Coord<f64>> {
        let ls = line.0.get(self.part)?;
        Some(point_at(
            ls.0[self.start_segment],
            ls.0[self.start_segment + 1],
            self.start_t,
        ))
    }

    pub fn end_point(&self, line: &MultiLineString<f64>) -> Option<Coord<f64>> {
        let ls = line.0.get(self.part)?;
        Some(point_at(
            ls.0[self.end_segment],
            ls.0[self.end_segment + 1],
            self.end_t,
        ))
    }

    pub fn bounding_rect(&self, line: &MultiLineString<f64>) -> Option<Rect<f64>> {
        self.geometry(line).bounding_rect()
    }

    fn joins(&self, key: SegmentKey, t: f64) -> bool {
        self.part == key.part
            && self.end_segment + 1 == key.segment
            && self.end_t >= 1.0
            && t <= 0.0
    }
}

fn segment_length(line: &MultiLineString<f64>, key: SegmentKey) -> Option<f64> {
    let ls = line.0.get(key.part)?;
    let a = *ls.0.get(key.segment)?;
    let b = *ls.0.get(key.segment + 1)?;
    Some(distance(a, b))
}

/// Collect runs from per-segment intervals, joining runs across adjacent segments
fn collect_runs(intervals: impl Iterator<Item = (SegmentKey, f64, f64)>) -> Vec<Subcurve> {
    let mut result: Vec<Subcurve> = Vec::new();
    for (key, t0, t1) in intervals {
        if let Some(last) = result.last_mut()
            && last.joins(key, t0)
        {
            last.end_segment = key.segment;
            last.end_t = t1;
            continue;
        }
        result.push(Subcurve {
            part: key.part,
            start_segment: key.segment,
            start_t: t0,
            end_segment: key.segment,
            end_t: t1,
        });
    }
    result
}

/// Runs of `line` not covered by `covered`, considering only registered segments
pub fn get_missing_subcurves(line: &MultiLineString<f64>, covered: &SegmentParts) -> Vec<Subcurve> {
    let intervals = covered
        .ranges
        .iter()
        .filter(|(key, _)| segment_length(line, **key).is_some())
        .flat_map(|(key, ranges)| {
            let mut missing: SmallVec<[(SegmentKey, f64, f64); 3]> = SmallVec::new();
            let mut t = 0.0;
            for &(a, b) in ranges {
                if a > t {
                    missing.push((*key, t, a));
                }
                t = t.max(b);
            }
            if t < 1.0 {
                missing.push((*key, t, 1.0));
            }
            missing
        });
    collect_runs(intervals)
}

/// Runs of `line` covered by `covered`
pub fn get_covered_subcurves(line: &MultiLineString<f64>, covered: &SegmentParts) -> Vec<Subcurve> {
    let intervals = covered
        .ranges
        .iter()
        .filter(|(key, _)| segment_length(line, **key).is_some())
        .flat_map(|(key, ranges)| ranges.iter().map(move |&(a, b)| (*key, a, b)));
    collect_runs(intervals)
}

/// Coverage of `line` by everything within `tolerance` of `other`
///
/// Every segment of `line` is registered, so missing subcurves can be derived afterwards.
pub fn near_parts(
    line: &MultiLineString<f64>,
    other: &MultiLineString<f64>,
    tolerance: f64,
) -> SegmentParts {
    let mut parts = SegmentParts::new();
    parts.register_all(line);
    add_near_parts(&mut parts, line, other, tolerance);
    parts
}

/// Add the coverage of `line` by `other` (within `tolerance`) to `parts`
pub fn add_near_parts(
    parts: &mut SegmentParts,
    line: &MultiLineString<f64>,
    other: &MultiLineString<f64>,
    tolerance: f64,
) {
    let other_segments: Vec<(Coord<f64>, Coord<f64>, Rect<f64>)> = other
        .0
        .iter()
        .flat_map(segments)
        .filter(|(a, b)| a != b)
        .map(|(a, b)| {
            let rect = crate::geometry::expand_rect(Rect::new(a, b), tolerance);
            (a, b, rect)
        })
        .collect();

    for (part, ls) in line.0.iter().enumerate() {
        for (segment, (a, b)) in segments(ls).enumerate() {
            if a == b {
                continue;
            }
            let Ok(hull) = SegmentHull::symmetric(a, b, 0.0, CapStyle::Round) else {
                continue;
            };
            let own = Rect::new(a, b);
            for &(oa, ob, rect) in &other_segments {
                if !crate::geometry::rects_intersect(own, rect) {
                    continue;
                }
                let Ok(other_hull) = SegmentHull::symmetric(oa, ob, tolerance, CapStyle::Round)
                else {
                    continue;
                };
                if let Some((t0, t1)) = hull.cut_curve_hull(&other_hull, 0.0) {
                    parts.add_range(SegmentKey::new(part, segment), t0, t1);
                }
            }
        }
    }
}

/// Distance from `p` to the nearest segment of `lines`, negative to the right of it
fn signed_offset(p: Coord<f64>, lines: &MultiLineString<f64>) -> Option<f64> {
    let nearest = nearest_point(p, lines)?;
    let ls = lines.0.get(nearest.part_index)?;
    let a = *ls.0.get(nearest.segment_index)?;
    let b = *ls.0.get(nearest.segment_index + 1)?;
    if cross(b - a, p - a) < 0.0 {
        Some(-nearest.distance)
    } else {
        Some(nearest.distance)
    }
}

/// True if `run` drifts across the tolerance band of `other` instead of following it
///
/// Along a crossing or a line ending on `other` at an angle the offset to `other` changes
/// linearly over the whole run, so between the quartiles of the run it changes by half the band
/// width (crossing) or more. A run along `other` keeps its offset away from its ends.
fn is_transversal(
    run: &Subcurve,
    line: &MultiLineString<f64>,
    other: &MultiLineString<f64>,
    tolerance: f64,
) -> bool {
    let geometry = run.geometry(line);
    let offset = |fraction: f64| {
        geometry
            .line_interpolate_point(fraction)
            .and_then(|p| signed_offset(p.0, other))
    };
    match (offset(0.25), offset(0.75)) {
        (Some(first), Some(last)) => (last - first).abs() >= 0.25 * tolerance,
        _ => false,
    }
}

/// Parts of `line` running along `other` within `tolerance`
///
/// Runs not longer than twice the tolerance, and runs crossing or ending on `other` at an
/// angle, are touches or crossings, not linear intersections, and are dropped.
pub fn linear_intersection(
    line: &MultiLineString<f64>,
    other: &MultiLineString<f64>,
    tolerance: f64,
) -> Vec<Subcurve> {
    let parts = near_parts(line, other, tolerance);
    get_covered_subcurves(line, &parts)
        .into_iter()
        .filter(|s| s.length(line) > 2.0 * tolerance)
        .filter(|s| !is_transversal(s, line, other, tolerance))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_segment() -> MultiLineString<f64> {
        MultiLineString::new(vec![LineString::from(vec![(0.0, 0.0), (10.0, 0.0)])])
    }

    fn lengths(line: &MultiLineString<f64>, subcurves: &[Subcurve]) -> Vec<f64> {
        subcurves.iter().map(|s| s.length(line)).collect()
    }

    #[test]
    fn test_missing_subcurves_single_range() {
        let line = single_segment();
        let mut covered = SegmentParts::new();
        covered.add_range(SegmentKey::new(0, 0), 0.5, 0.8);

        let missing = get_missing_subcurves(&line, &covered);
        assert_eq!(missing.len(), 2);
        let l = lengths(&line, &missing);
        assert!((l[0] - 5.0).abs() < 1e-5);
        assert!((l[1] - 2.0).abs() < 1e-5);
        assert!((l.iter().sum::<f64>() - (10.0 - covered.covered_length(&line))).abs() < 1e-5);
    }

    #[test]
    fn test_missing_subcurves_disjoint_ranges() {
        let line = single_segment();
        let mut covered = SegmentParts::new();
        covered.add_range(SegmentKey::new(0, 0), 0.5, 0.8);
        covered.add_range(SegmentKey::new(0, 0), 0.2, 0.4);
        assert_eq!(get_missing_subcurves(&line, &covered).len(), 3);
    }

    #[test]
    fn test_missing_subcurves_touching_ranges() {
        let line = single_segment();
        let mut covered = SegmentParts::new();
        covered.add_range(SegmentKey::new(0, 0), 0.5, 0.8);
        covered.add_range(SegmentKey::new(0, 0), 0.2, 0.5);
        assert_eq!(covered.ranges(SegmentKey::new(0, 0)), &[(0.2, 0.8)]);
        assert_eq!(get_missing_subcurves(&line, &covered).len(), 2);
    }

    #[test]
    fn test_missing_subcurves_overlapping_ranges() {
        let line = single_segment();
        let mut covered = SegmentParts::new();
        covered.add_range(SegmentKey::new(0, 0), 0.5, 0.8);
        covered.add_range(SegmentKey::new(0, 0), 0.2, 0.9);

        let missing = get_missing_subcurves(&line, &covered);
        let l = lengths(&line, &missing);
        assert_eq!(l.len(), 2);
        assert!((l[0] - 2.0).abs() < 1e-5);
        assert!((l[1] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_missing_subcurves_join_adjacent_segments() {
        let line = MultiLineString::new(vec![LineString::from(vec![
            (0.0, 0.0),
            (10.0, 0.0),
            (10.0, 10.0),
            (20.0, 10.0),
        ])]);
        let mut covered = SegmentParts::new();
        covered.add_range(SegmentKey::new(0, 0), 0.0, 0.2);
        covered.register(SegmentKey::new(0, 1));

        let missing = get_missing_subcurves(&line, &covered);
        assert_eq!(missing.len(), 1);
        assert!((missing[0].length(&line) - 18.0).abs() < 1e-5);

        let mut separate = SegmentParts::new();
        separate.register(SegmentKey::new(0, 0));
        separate.register(SegmentKey::new(0, 2));
        assert_eq!(get_missing_subcurves(&line, &separate).len(), 2);
    }

    #[test]
    fn test_subtract() {
        let key = SegmentKey::new(0, 0);
        let mut near = SegmentParts::new();
        near.add_range(key, 0.1, 0.9);
        near.register(SegmentKey::new(0, 1));
        let mut coincident = SegmentParts::new();
        coincident.add_range(key, 0.4, 0.6);

        let rest = near.subtract(&coincident);
        assert_eq!(rest.ranges(key), &[(0.1, 0.4), (0.6, 0.9)]);
        assert!(rest.contains_key(SegmentKey::new(0, 1)));

        coincident.add_range(key, 0.0, 1.0);
        assert!(near.subtract(&coincident).is_empty());
    }

    #[test]
    fn test_subcurve_geometry() {
        let line = MultiLineString::new(vec![LineString::from(vec![
            (0.0, 0.0),
            (10.0, 0.0),
            (10.0, 10.0),
        ])]);
        let subcurve = Subcurve {
            part: 0,
            start_segment: 0,
            start_t: 0.5,
            end_segment: 1,
            end_t: 0.5,
        };
        let geometry = subcurve.geometry(&line);
        assert_eq!(
            geometry,
            LineString::from(vec![(5.0, 0.0), (10.0, 0.0), (10.0, 5.0)])
        );
    }

    #[test]
    fn test_linear_intersection() {
        let line = MultiLineString::new(vec![LineString::from(vec![
            (4.0, 2.0),
            (4.0, 0.0),
            (7.0, 0.0),
            (7.0, 2.0),
        ])]);
        let border = MultiLineString::new(vec![LineString::from(vec![(0.0, 0.0), (10.0, 0.0)])]);

        let common = linear_intersection(&line, &border, 0.01);
        assert_eq!(common.len(), 1);
        assert!((common[0].length(&line) - 3.0).abs() < 0.05);

        // a perpendicular line only touches the border
        let touching = MultiLineString::new(vec![LineString::from(vec![(5.0, 5.0), (5.0, 0.0)])]);
        assert!(linear_intersection(&touching, &border, 0.01).is_empty());
    }

    #[test]
    fn test_linear_intersection_ignores_crossings() {
        let border = MultiLineString::new(vec![LineString::from(vec![(0.0, 5.0), (10.0, 5.0)])]);
        for degrees in [10.0_f64, 30.0, 45.0, 60.0, 89.0] {
            let (sin, cos) = degrees.to_radians().sin_cos();
            let crossing = MultiLineString::new(vec![LineString::from(vec![
                (5.0 - 4.0 * cos, 5.0 - 4.0 * sin),
                (5.0 + 4.0 * cos, 5.0 + 4.0 * sin),
            ])]);
            assert!(
                linear_intersection(&crossing, &border, 0.01).is_empty(),
                "crossing at {degrees} degrees"
            );

            // ending on the border at the same angle
            let ending = MultiLineString::new(vec![LineString::from(vec![
                (5.0 - 4.0 * cos, 5.0 - 4.0 * sin),
                (5.0, 5.0),
            ])]);
            assert!(
                linear_intersection(&ending, &border, 0.01).is_empty(),
                "line ending at {degrees} degrees"
            );
        }

        // running along the border, slightly offset, is still a linear intersection
        let along = MultiLineString::new(vec![LineString::from(vec![(2.0, 5.005), (8.0, 5.005)])]);
        let common = linear_intersection(&along, &border, 0.01);
        assert_eq!(common.len(), 1);
        assert!((common[0].length(&along) - 6.0).abs() < 1e-6);

        // starting on the border and leaving it after a shared stretch
        let leaving = MultiLineString::new(vec![LineString::from(vec![
            (4.0, 5.0),
            (7.0, 5.0),
            (7.0, 7.0),
        ])]);
        let common = linear_intersection(&leaving, &border, 0.01);
        assert_eq!(common.len(), 1);
        assert!((common[0].length(&leaving) - 3.0).abs() < 0.05);
    }
}
