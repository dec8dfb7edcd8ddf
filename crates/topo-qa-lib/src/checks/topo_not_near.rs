//! Lines that come closer to each other than their symbols allow
//!
//! Every line gets a near width on each side (constant, or from a per row expression). Two lines
//! whose widened hulls intersect form a nearly coincident section. Sections at connections and
//! crossings are tolerated up to a minimum length; sections of disjoint lines, loops of the same
//! line and lines lying entirely within the near distance of another line are reported.
//!
//! Lines are not analysed feature by feature but as topo chains: features joined at a node
//! where exactly two line ends meet are merged into one chain, so that the vertices between them
//! do not produce caps.

use super::{
    code, distinct_tables, format_length, max_xy_tolerance, require_geometry_types, row_lines,
};
use crate::container::{ContainerCheck, TileContext};
use crate::coverage::{
    SegmentKey, SegmentParts, Subcurve, get_covered_subcurves, linear_intersection,
};
use crate::expression::{Expression, Predicate, RowContext};
use crate::feature::{Dataset, Feature, Geometry, GeometryType, TableId, TableRow};
use crate::geometry::{
    direction_angle, distance, expand_rect, line_length, point_at, point_segment_distance,
    rects_intersect, segment_intersection, segments,
};
use crate::hull::{CapStyle, SegmentHull, has_inconsistent_line_end};
use crate::issue::ErrorCollector;
use crate::{Result, TopoError};
use geo::{BoundingRect, Coord, LineString, MultiLineString, Rect};
use std::collections::HashSet;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const PREFIX: &str = "NearCoincidence";

/// Which coincident points make two lines connected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConnectionMode {
    /// An end point of one line on an end point of the other
    EndpointOnEndpoint,
    /// An end point of one line on a vertex of the other
    #[default]
    EndpointOnVertex,
    /// Any vertex of one line on a vertex of the other
    VertexOnVertex,
}

/// Options of [`TopoNotNear`]
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct TopoNotNearOptions {
    /// Factor applied to the near distance of a pair to get the minimum length of a reported
    /// crossing section. Negative values use the disjoint minimum length.
    /// Default: -1
    pub crossing_min_length_factor: f64,
    /// Sections are not reported if this condition holds for the involved rows (`G1.`, `G2.`)
    /// Default: None
    pub not_reported_condition: Option<String>,
    /// Row pairs for which this condition holds are not compared (`G1.`, `G2.`)
    /// Default: None
    pub ignore_neighbor_condition: Option<String>,
    /// Distance within which end points and vertices are connected; 0 uses the xy tolerance.
    /// Default: 0
    pub junction_coincidence_tolerance: f64,
    /// Default: EndpointOnVertex
    pub connection_mode: ConnectionMode,
    /// Cap at line ends not connected to other lines.
    /// Default: Round
    pub unconnected_line_cap_style: CapStyle,
    /// Cap at line ends meeting other lines in a junction.
    /// Default: Round
    pub end_cap_style: CapStyle,
    /// Do not report sections where a line comes near itself.
    /// Default: false
    pub ignore_loops_within_near_distance: bool,
    /// Do not check butt ends at junctions for symbols sticking out of the neighbour line.
    /// Default: false
    pub ignore_inconsistent_line_symbol_ends: bool,
    /// Do not report sections where lines are coincident.
    /// Default: false
    pub allow_coincident_sections: bool,
    /// Near width on the right side of the lines, one expression or one per table. Lines are
    /// symmetric when empty.
    /// Default: empty
    pub right_side_nears: Vec<String>,
    /// Condition over the two lines at a node where exactly two line ends meet (`L1.`, `L2.`);
    /// the node ends a chain when it holds.
    /// Default: None
    pub junction_is_end_expression: Option<String>,
}

impl Default for TopoNotNearOptions {
    fn default() -> Self {
        Self {
            crossing_min_length_factor: -1.0,
            not_reported_condition: None,
            ignore_neighbor_condition: None,
            junction_coincidence_tolerance: 0.0,
            connection_mode: ConnectionMode::EndpointOnVertex,
            unconnected_line_cap_style: CapStyle::Round,
            end_cap_style: CapStyle::Round,
            ignore_loops_within_near_distance: false,
            ignore_inconsistent_line_symbol_ends: false,
            allow_coincident_sections: false,
            right_side_nears: Vec::new(),
            junction_is_end_expression: None,
        }
    }
}

#[derive(Debug, Clone)]
enum NearWidth {
    Constant(f64),
    Expressions(Vec<Expression>),
}

#[derive(Debug, Clone, Copy)]
enum MinLength {
    Constant(f64),
    /// Factors applied to the near distance of a pair
    Factors { connected: f64, disjoint: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct EdgeKey {
    table: TableId,
    oid: i64,
    part: usize,
}

/// One part of a feature, oriented within its chain
#[derive(Debug, Clone)]
struct ChainEdge {
    row: TableRow,
    part: usize,
    reversed: bool,
}

impl ChainEdge {
    fn key(&self) -> EdgeKey {
        EdgeKey {
            table: self.row.table,
            oid: self.row.oid(),
            part: self.part,
        }
    }

    /// Coordinates in chain direction
    fn coords(&self) -> Option<Vec<Coord<f64>>> {
        let lines = row_lines(&self.row)?;
        let mut coords = lines.0.get(self.part)?.0.clone();
        if coords.len() < 2 {
            return None;
        }
        if self.reversed {
            coords.reverse();
        }
        Some(coords)
    }
}

#[derive(Debug, Clone)]
struct EdgeEnd {
    row: TableRow,
    part: usize,
    at_start: bool,
}

impl EdgeEnd {
    fn key(&self) -> EdgeKey {
        EdgeKey {
            table: self.row.table,
            oid: self.row.oid(),
            part: self.part,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChainEnd {
    /// No other line ends here
    Dangling,
    /// Three or more line ends, or a node declared as chain end
    Junction,
    /// The chain returns to its start
    Closed,
}

#[derive(Debug, Clone)]
struct Chain {
    edges: Vec<ChainEdge>,
    /// Single part polyline through all edges
    line: MultiLineString<f64>,
    /// Edge index of every segment
    segment_edges: Vec<usize>,
    /// Left and right near widths per edge, in chain direction
    widths: Vec<(f64, f64)>,
    start: ChainEnd,
    end: ChainEnd,
    owner: EdgeKey,
}

impl Chain {
    /// True if the owner row of the chain is passed to the check, i.e. lies in `all_box`
    fn is_dispatched(&self, all_box: Rect<f64>) -> bool {
        self.edges.iter().any(|e| {
            e.key() == self.owner
                && e.row
                    .feature
                    .envelope()
                    .is_some_and(|r| rects_intersect(r, all_box))
        })
    }

    fn coords(&self) -> &[Coord<f64>] {
        &self.line.0[0].0
    }

    fn segment_count(&self) -> usize {
        self.segment_edges.len()
    }

    fn segment(&self, i: usize) -> (Coord<f64>, Coord<f64>) {
        let c = self.coords();
        (c[i], c[i + 1])
    }

    fn segment_widths(&self, i: usize) -> (f64, f64) {
        self.widths[self.segment_edges[i]]
    }

    fn max_width(&self) -> f64 {
        self.widths
            .iter()
            .map(|(l, r)| l.max(*r))
            .fold(0.0, f64::max)
    }

    fn is_closed(&self) -> bool {
        self.start == ChainEnd::Closed
    }

    fn length(&self) -> f64 {
        line_length(&self.line.0[0])
    }

    /// End points, unless the chain is closed
    fn end_points(&self) -> Vec<Coord<f64>> {
        let c = self.coords();
        if self.is_closed() {
            Vec::new()
        } else {
            vec![c[0], c[c.len() - 1]]
        }
    }

    /// Distance along the chain to the start of every segment, plus the total length
    fn cumulated_lengths(&self) -> Vec<f64> {
        let mut cum = vec![0.0];
        let mut total = 0.0;
        for (a, b) in segments(&self.line.0[0]) {
            total += distance(a, b);
            cum.push(total);
        }
        cum
    }

    fn bounding_rect(&self) -> Option<Rect<f64>> {
        self.line.bounding_rect()
    }

    /// Edges of the segments covered by a subcurve
    fn edges_of(&self, s: &Subcurve) -> Vec<usize> {
        let mut edges: Vec<usize> = (s.start_segment..=s.end_segment)
            .filter_map(|i| self.segment_edges.get(i).copied())
            .collect();
        edges.dedup();
        edges
    }
}

/// Range of a segment near a segment of the other chain
#[derive(Debug, Clone, Copy)]
struct Contact {
    segment: usize,
    t0: f64,
    t1: f64,
    other_edge: usize,
}

impl Contact {
    fn overlaps(&self, s: &Subcurve) -> bool {
        if self.segment < s.start_segment || self.segment > s.end_segment {
            return false;
        }
        !(self.segment == s.start_segment && self.t1 < s.start_t
            || self.segment == s.end_segment && self.t0 > s.end_t)
    }
}

#[derive(Debug, Clone, Default)]
struct SideNear {
    near: SegmentParts,
    contacts: Vec<Contact>,
}

impl SideNear {
    fn add(&mut self, segment: usize, (t0, t1): (f64, f64), other_edge: usize) {
        self.near.add_range(SegmentKey::new(0, segment), t0, t1);
        self.contacts.push(Contact {
            segment,
            t0,
            t1,
            other_edge,
        });
    }

    fn other_edges(&self, s: &Subcurve) -> Vec<usize> {
        let mut edges: Vec<usize> = self
            .contacts
            .iter()
            .filter(|c| c.overlaps(s))
            .map(|c| c.other_edge)
            .collect();
        edges.sort_unstable();
        edges.dedup();
        edges
    }
}

/// Geometric relation of the two chains of a pair
#[derive(Debug, Default)]
struct PairRelation {
    p: SideNear,
    q: SideNear,
    connections: Vec<Coord<f64>>,
    crossings: Vec<Coord<f64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectionKind {
    Disjoint,
    Crossing,
    Connected,
    Loop,
}

/// Reports nearly coincident sections of lines
///
/// Without a reference table, all line pairs of the table are compared. With a reference
/// table, lines of the table are compared with the reference lines only, and only sections on
/// the lines of the table are reported.
pub struct TopoNotNear {
    name: String,
    table: TableId,
    reference: Option<TableId>,
    tables: Vec<TableId>,
    near: NearWidth,
    right_side_nears: Vec<Expression>,
    /// Largest half width any line can have
    max_half_width: f64,
    min_length: MinLength,
    xy_tolerance: f64,
    junction_tolerance: f64,
    not_reported: Option<Predicate>,
    ignore_neighbor: Option<Predicate>,
    junction_is_end: Option<Predicate>,
    options: TopoNotNearOptions,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl TopoNotNear {
    /// Lines closer than `near` to each other
    ///
    /// # Arguments
    /// * `dataset` - Dataset the tables belong to
    /// * `table` - Line table
    /// * `reference` - Optional reference line table
    /// * `near` - Minimum distance between two lines; each line gets half of it on each side
    /// * `min_length` - Sections at connections or between disjoint lines up to this length
    ///   are tolerated
    /// * `options` - Further options
    pub fn new(
        dataset: &Dataset,
        table: TableId,
        reference: Option<TableId>,
        near: f64,
        min_length: f64,
        options: TopoNotNearOptions,
    ) -> Result<Self> {
        if !(near > 0.0) || !near.is_finite() {
            return Err(TopoError::config(format!("near must be > 0, got {near}")));
        }
        if !(min_length >= 0.0) {
            return Err(TopoError::config(format!(
                "minimum length must be >= 0, got {min_length}"
            )));
        }
        Self::build(
            dataset,
            table,
            reference,
            NearWidth::Constant(near / 2.0),
            near / 2.0,
            MinLength::Constant(min_length),
            options,
        )
    }

    /// Lines whose near widths come from per row expressions
    ///
    /// # Arguments
    /// * `max_near` - Upper bound of the near width of a line side
    /// * `near_expressions` - One expression, or one per table, giving a line's near width
    /// * `connected_min_length_factor` - Minimum length of sections at connections, relative
    ///   to the near distance of the pair
    /// * `disjoint_min_length_factor` - Minimum length of sections between disjoint lines,
    ///   relative to the near distance of the pair
    #[allow(clippy::too_many_arguments)]
    pub fn with_near_expressions(
        dataset: &Dataset,
        table: TableId,
        reference: Option<TableId>,
        max_near: f64,
        near_expressions: &[String],
        connected_min_length_factor: f64,
        disjoint_min_length_factor: f64,
        options: TopoNotNearOptions,
    ) -> Result<Self> {
        if !(max_near > 0.0) || !max_near.is_finite() {
            return Err(TopoError::config(format!(
                "maximum near must be > 0, got {max_near}"
            )));
        }
        let table_count = if reference.is_some_and(|r| r != table) { 2 } else { 1 };
        let expressions =
            parse_width_expressions(near_expressions, table_count, "near expressions")?;
        if expressions.is_empty() {
            return Err(TopoError::config("at least one near expression is required"));
        }
        Self::build(
            dataset,
            table,
            reference,
            NearWidth::Expressions(expressions),
            max_near,
            MinLength::Factors {
                connected: connected_min_length_factor,
                disjoint: disjoint_min_length_factor,
            },
            options,
        )
    }

    fn build(
        dataset: &Dataset,
        table: TableId,
        reference: Option<TableId>,
        near: NearWidth,
        max_half_width: f64,
        min_length: MinLength,
        options: TopoNotNearOptions,
    ) -> Result<Self> {
        let reference = reference.filter(|&r| r != table);
        let tables = distinct_tables([table].into_iter().chain(reference));
        require_geometry_types(dataset, &tables, &[GeometryType::Polyline], "line")?;

        let right_side_nears =
            parse_width_expressions(&options.right_side_nears, tables.len(), "right side nears")?;
        let xy_tolerance = max_xy_tolerance(dataset, &tables)?;
        let junction_tolerance = if options.junction_coincidence_tolerance > 0.0 {
            options.junction_coincidence_tolerance
        } else {
            xy_tolerance
        };

        let not_reported =
            Predicate::parse_optional(options.not_reported_condition.as_deref(), &["G1", "G2"])?;
        let ignore_neighbor =
            Predicate::parse_optional(options.ignore_neighbor_condition.as_deref(), &["G1", "G2"])?;
        let junction_is_end = Predicate::parse_optional(
            options.junction_is_end_expression.as_deref(),
            &["L1", "L2"],
        )?;

        let name = format!("TopoNotNear({})", dataset.table(table)?.name());
        tracing::debug!(check = %name, max_half_width, xy_tolerance, "Check configured");

        Ok(Self {
            name,
            table,
            reference,
            tables,
            near,
            right_side_nears,
            max_half_width,
            min_length,
            xy_tolerance,
            junction_tolerance,
            not_reported,
            ignore_neighbor,
            junction_is_end,
            options,
        })
    }

    fn table_index(&self, table: TableId) -> usize {
        usize::from(Some(table) == self.reference)
    }

    /// Left and right near widths of a row
    fn row_widths(&self, row: &TableRow) -> (f64, f64) {
        let index = self.table_index(row.table);
        let ctx = RowContext::single(&row.feature);
        let eval = |expressions: &[Expression]| {
            let expression = expressions.get(index).or(expressions.first())?;
            let value = expression.evaluate_f64(&ctx)?;
            Some(value.clamp(0.0, self.max_half_width))
        };
        let left = match &self.near {
            NearWidth::Constant(width) => *width,
            NearWidth::Expressions(expressions) => eval(expressions).unwrap_or(0.0),
        };
        let right = if self.right_side_nears.is_empty() {
            left
        } else {
            eval(&self.right_side_nears).unwrap_or(left)
        };
        (left, right)
    }

    fn connected_min_length(&self, pair_distance: f64) -> f64 {
        match self.min_length {
            MinLength::Constant(length) => length,
            MinLength::Factors { connected, .. } => connected * pair_distance,
        }
    }

    fn disjoint_min_length(&self, pair_distance: f64) -> f64 {
        match self.min_length {
            MinLength::Constant(length) => length,
            MinLength::Factors { disjoint, .. } => disjoint * pair_distance,
        }
    }

    fn holds(condition: Option<&Predicate>, a: &Feature, b: &Feature) -> bool {
        condition.is_some_and(|c| {
            c.evaluate(&RowContext::pair("G1", a, "G2", b))
                || c.evaluate(&RowContext::pair("G1", b, "G2", a))
        })
    }

    fn is_junction_end(&self, a: &Feature, b: &Feature) -> bool {
        self.junction_is_end.as_ref().is_some_and(|c| {
            c.evaluate(&RowContext::pair("L1", a, "L2", b))
                || c.evaluate(&RowContext::pair("L1", b, "L2", a))
        })
    }

    /// Line ends of `table` at `node`
    fn ends_at(&self, ctx: &TileContext<'_>, table: TableId, node: Coord<f64>) -> Vec<EdgeEnd> {
        let area = expand_rect(Rect::new(node, node), self.junction_tolerance);
        let mut ends = Vec::new();
        for row in ctx.search(table, area) {
            let Some(lines) = row_lines(&row) else {
                continue;
            };
            for (part, line) in lines.0.iter().enumerate() {
                let (Some(&first), Some(&last)) = (line.0.first(), line.0.last()) else {
                    continue;
                };
                if line.0.len() < 2 {
                    continue;
                }
                if distance(first, node) <= self.junction_tolerance {
                    ends.push(EdgeEnd {
                        row: row.clone(),
                        part,
                        at_start: true,
                    });
                }
                if distance(last, node) <= self.junction_tolerance {
                    ends.push(EdgeEnd {
                        row: row.clone(),
                        part,
                        at_start: false,
                    });
                }
            }
        }
        ends
    }

    /// Extend `edges` beyond the end of its last edge through nodes of degree two
    fn walk(&self, ctx: &TileContext<'_>, edges: &mut Vec<ChainEdge>) -> ChainEnd {
        loop {
            let Some(current) = edges.last() else {
                return ChainEnd::Dangling;
            };
            let Some(node) = current.coords().and_then(|c| c.last().copied()) else {
                return ChainEnd::Dangling;
            };
            let (current_key, current_at_start) = (current.key(), current.reversed);
            let ends = self.ends_at(ctx, current.row.table, node);
            let others: Vec<&EdgeEnd> = ends
                .iter()
                .filter(|e| !(e.key() == current_key && e.at_start == current_at_start))
                .collect();

            let other = match others.as_slice() {
                [] => return ChainEnd::Dangling,
                [other] => *other,
                _ => return ChainEnd::Junction,
            };
            if other.key() == edges[0].key() {
                return ChainEnd::Closed;
            }
            if edges.iter().any(|e| e.key() == other.key())
                || self.is_junction_end(&current.row.feature, &other.row.feature)
            {
                return ChainEnd::Junction;
            }
            edges.push(ChainEdge {
                row: other.row.clone(),
                part: other.part,
                reversed: !other.at_start,
            });
        }
    }

    /// Chain containing a part of a row
    fn build_chain(&self, ctx: &TileContext<'_>, row: &TableRow, part: usize) -> Option<Chain> {
        let start = ChainEdge {
            row: row.clone(),
            part,
            reversed: false,
        };
        start.coords()?;

        let mut forward = vec![start.clone()];
        let end = self.walk(ctx, &mut forward);
        let (edges, start_end) = if end == ChainEnd::Closed {
            (forward, ChainEnd::Closed)
        } else {
            let mut backward = vec![ChainEdge {
                reversed: true,
                ..start
            }];
            let start_end = self.walk(ctx, &mut backward);
            let mut edges: Vec<ChainEdge> = backward
                .into_iter()
                .skip(1)
                .rev()
                .map(|e| ChainEdge {
                    reversed: !e.reversed,
                    ..e
                })
                .collect();
            edges.extend(forward);
            (edges, start_end)
        };

        let mut coords: Vec<Coord<f64>> = Vec::new();
        let mut segment_edges = Vec::new();
        let mut widths = Vec::with_capacity(edges.len());
        for (i, edge) in edges.iter().enumerate() {
            let edge_coords = edge.coords()?;
            if coords.is_empty() {
                coords.push(edge_coords[0]);
            }
            for &c in &edge_coords[1..] {
                coords.push(c);
                segment_edges.push(i);
            }
            let (left, right) = self.row_widths(&edge.row);
            widths.push(if edge.reversed { (right, left) } else { (left, right) });
        }

        let all_box = ctx.all_box();
        let owner = edges
            .iter()
            .filter(|e| {
                e.row
                    .feature
                    .envelope()
                    .is_some_and(|r| rects_intersect(r, all_box))
            })
            .map(ChainEdge::key)
            .min()
            .or_else(|| edges.iter().map(ChainEdge::key).min())?;

        Some(Chain {
            edges,
            line: MultiLineString::new(vec![LineString::from(coords)]),
            segment_edges,
            widths,
            start: start_end,
            end,
            owner,
        })
    }

    fn cap(&self, end: ChainEnd) -> CapStyle {
        match end {
            ChainEnd::Dangling => self.options.unconnected_line_cap_style,
            ChainEnd::Junction => self.options.end_cap_style,
            ChainEnd::Closed => CapStyle::Round,
        }
    }

    /// Hull of every segment; `None` for zero length segments
    fn hulls(&self, chain: &Chain) -> Vec<Option<SegmentHull>> {
        let n = chain.segment_count();
        (0..n)
            .map(|i| {
                let (a, b) = chain.segment(i);
                let (left, right) = chain.segment_widths(i);
                let start_cap = if i == 0 { self.cap(chain.start) } else { CapStyle::Round };
                let end_cap = if i + 1 == n { self.cap(chain.end) } else { CapStyle::Round };
                SegmentHull::new(a, b, left, right, start_cap, end_cap).ok()
            })
            .collect()
    }

    fn segment_boxes(chain: &Chain) -> Vec<Rect<f64>> {
        (0..chain.segment_count())
            .map(|i| {
                let (a, b) = chain.segment(i);
                let (left, right) = chain.segment_widths(i);
                expand_rect(Rect::new(a, b), left.max(right))
            })
            .collect()
    }

    /// Near ranges, connections and crossings of two different chains
    fn relate(&self, p: &Chain, q: &Chain) -> PairRelation {
        let mut relation = PairRelation {
            connections: self.connection_points(p, q),
            ..Default::default()
        };
        relation.p.near.register_all(&p.line);
        relation.q.near.register_all(&q.line);

        let (p_hulls, q_hulls) = (self.hulls(p), self.hulls(q));
        let (p_boxes, q_boxes) = (Self::segment_boxes(p), Self::segment_boxes(q));
        for (i, p_hull) in p_hulls.iter().enumerate() {
            let Some(p_hull) = p_hull else {
                continue;
            };
            let p_edge = p.segment_edges[i];
            for (j, q_hull) in q_hulls.iter().enumerate() {
                let Some(q_hull) = q_hull else {
                    continue;
                };
                if !rects_intersect(p_boxes[i], q_boxes[j]) {
                    continue;
                }
                let q_edge = q.segment_edges[j];
                if Self::holds(
                    self.ignore_neighbor.as_ref(),
                    &p.edges[p_edge].row.feature,
                    &q.edges[q_edge].row.feature,
                ) {
                    continue;
                }
                let Some(cut) = p_hull.cut_pair(q_hull, 0.0) else {
                    continue;
                };
                tracing::trace!(p = i, q = j, ?cut, "Near segment pair");
                relation.p.add(i, cut.self_range, q_edge);
                relation.q.add(j, cut.other_range, p_edge);

                let ((a0, a1), (b0, b1)) = (p.segment(i), q.segment(j));
                if let Some((ta, _)) = segment_intersection(a0, a1, b0, b1) {
                    let x = point_at(a0, a1, ta);
                    if !relation
                        .connections
                        .iter()
                        .any(|&c| distance(c, x) <= self.junction_tolerance)
                    {
                        relation.crossings.push(x);
                    }
                }
            }
        }
        relation
    }

    /// Near ranges of a chain with itself, ignoring neighbouring segments
    fn relate_loop(&self, p: &Chain) -> SideNear {
        let mut side = SideNear::default();
        side.near.register_all(&p.line);
        let hulls = self.hulls(p);
        let boxes = Self::segment_boxes(p);
        let cum = p.cumulated_lengths();
        let total = cum[cum.len() - 1];

        for i in 0..hulls.len() {
            let Some(a) = &hulls[i] else {
                continue;
            };
            for j in (i + 2)..hulls.len() {
                let Some(b) = &hulls[j] else {
                    continue;
                };
                if !rects_intersect(boxes[i], boxes[j]) {
                    continue;
                }
                let pair_distance = a.max_width() + b.max_width();
                let mut gap = cum[j] - cum[i + 1];
                if p.is_closed() {
                    gap = gap.min(total - cum[j + 1] + cum[i]);
                }
                if gap < pair_distance {
                    continue;
                }
                if let Some(cut) = a.cut_pair(b, 0.0) {
                    side.add(i, cut.self_range, p.segment_edges[j]);
                    side.add(j, cut.other_range, p.segment_edges[i]);
                }
            }
        }
        side
    }

    fn connection_points(&self, p: &Chain, q: &Chain) -> Vec<Coord<f64>> {
        let tolerance = self.junction_tolerance;
        let near_any = |c: Coord<f64>, others: &[Coord<f64>]| {
            others.iter().any(|&o| distance(c, o) <= tolerance)
        };
        let (p_ends, q_ends) = (p.end_points(), q.end_points());
        let mut points: Vec<Coord<f64>> = match self.options.connection_mode {
            ConnectionMode::EndpointOnEndpoint => p_ends
                .iter()
                .copied()
                .filter(|&c| near_any(c, &q_ends))
                .collect(),
            ConnectionMode::EndpointOnVertex => p_ends
                .iter()
                .copied()
                .filter(|&c| near_any(c, q.coords()))
                .chain(q_ends.iter().copied().filter(|&c| near_any(c, p.coords())))
                .collect(),
            ConnectionMode::VertexOnVertex => p
                .coords()
                .iter()
                .copied()
                .filter(|&c| near_any(c, q.coords()))
                .collect(),
        };
        points.dedup();
        points
    }

    /// Coincident runs of `line` along `other`, as coverage
    fn coincident_parts(
        &self,
        line: &MultiLineString<f64>,
        other: &MultiLineString<f64>,
    ) -> (SegmentParts, Vec<Subcurve>) {
        let runs = linear_intersection(line, other, self.xy_tolerance);
        let parts = SegmentParts::from_subcurves(&runs);
        (parts, runs)
    }

    /// Compare a chain with its neighbour chains and itself
    fn check_chain(
        &self,
        ctx: &TileContext<'_>,
        p: &Chain,
        errors: &mut ErrorCollector,
    ) -> Result<()> {
        let Some(rect) = p.bounding_rect() else {
            return Ok(());
        };
        let area = expand_rect(rect, p.max_width() + self.max_half_width + self.xy_tolerance);
        let neighbor_table = self.reference.unwrap_or(self.table);
        let directed = self.reference.is_some();

        let mut seen: HashSet<EdgeKey> = p.edges.iter().map(ChainEdge::key).collect();
        for row in ctx.search(neighbor_table, area) {
            let part_count = row_lines(&row).map(|l| l.0.len()).unwrap_or(0);
            for part in 0..part_count {
                let key = EdgeKey {
                    table: row.table,
                    oid: row.oid(),
                    part,
                };
                if seen.contains(&key) {
                    continue;
                }
                let Some(q) = self.build_chain(ctx, &row, part) else {
                    continue;
                };
                seen.extend(q.edges.iter().map(ChainEdge::key));
                // q checks the pair itself unless no row of q lies in the verified area
                if !directed && q.owner < p.owner && q.is_dispatched(ctx.all_box()) {
                    continue;
                }
                self.check_pair(p, &q, !directed, errors);
            }
        }

        if !directed && !self.options.ignore_loops_within_near_distance {
            let side = self.relate_loop(p);
            let min_length = self.connected_min_length(2.0 * p.max_width());
            self.report_sections(
                p,
                p,
                &side,
                &SegmentParts::new(),
                &PairRelation::default(),
                SectionKind::Loop,
                min_length,
                errors,
            );
        }
        self.check_line_ends(ctx, p, errors);
        Ok(())
    }

    fn check_pair(&self, p: &Chain, q: &Chain, report_both: bool, errors: &mut ErrorCollector) {
        let mut relation = self.relate(p, q);
        if relation.p.near.is_empty() {
            return;
        }
        let pair_distance = p.max_width() + q.max_width();

        let (p_coincident, runs) = self.coincident_parts(&p.line, &q.line);
        let (q_coincident, _) = self.coincident_parts(&q.line, &p.line);
        for run in &runs {
            relation.connections.extend(run.start_point(&p.line));
            relation.connections.extend(run.end_point(&p.line));
        }

        if !self.options.allow_coincident_sections {
            for run in &runs {
                let geometry = run.geometry(&p.line);
                let mut rows: Vec<&TableRow> =
                    p.edges_of(run).into_iter().map(|e| &p.edges[e].row).collect();
                rows.extend(relation.p.other_edges(run).into_iter().map(|e| &q.edges[e].row));
                errors.report(
                    format!(
                        "Coincident section (length {})",
                        format_length(line_length(&geometry))
                    ),
                    &rows,
                    Some(Geometry::Polyline(MultiLineString::new(vec![geometry]))),
                    code(PREFIX, "CoincidentSection"),
                    None,
                );
            }
        }

        self.report_sections(
            p,
            q,
            &relation.p,
            &p_coincident,
            &relation,
            SectionKind::Disjoint,
            pair_distance,
            errors,
        );
        if report_both {
            self.report_sections(
                q,
                p,
                &relation.q,
                &q_coincident,
                &relation,
                SectionKind::Disjoint,
                pair_distance,
                errors,
            );
        }
    }

    /// Report the near sections of `own` with respect to `other`
    ///
    /// `kind` is [`SectionKind::Loop`] for a chain compared with itself, in which case
    /// `pair_distance` is the minimum length; otherwise sections are classified by the
    /// connections and crossings of `relation`.
    #[allow(clippy::too_many_arguments)]
    fn report_sections(
        &self,
        own: &Chain,
        other: &Chain,
        side: &SideNear,
        coincident: &SegmentParts,
        relation: &PairRelation,
        kind: SectionKind,
        pair_distance: f64,
        errors: &mut ErrorCollector,
    ) {
        let line = &own.line;
        let rest = side.near.subtract(coincident);
        let chain_length = own.length();
        let mut reported: Vec<(Subcurve, f64)> = Vec::new();

        for section in get_covered_subcurves(line, &rest) {
            let geometry = section.geometry(line);
            let length = line_length(&geometry);
            if length <= self.xy_tolerance {
                continue;
            }
            let own_edges = own.edges_of(&section);
            let other_edges = side.other_edges(&section);
            let suppressed = own_edges.iter().any(|&a| {
                other_edges.iter().any(|&b| {
                    Self::holds(
                        self.not_reported.as_ref(),
                        &own.edges[a].row.feature,
                        &other.edges[b].row.feature,
                    )
                })
            });
            if suppressed {
                continue;
            }

            let touches = |points: &[Coord<f64>]| {
                points.iter().any(|&c| {
                    segments(&geometry)
                        .any(|(a, b)| point_segment_distance(c, a, b).0 <= self.junction_tolerance)
                })
            };
            let (kind, min_length) = match kind {
                SectionKind::Loop => (SectionKind::Loop, pair_distance),
                _ if touches(&relation.connections) => {
                    (SectionKind::Connected, self.connected_min_length(pair_distance))
                }
                _ if touches(&relation.crossings) => {
                    let factor = self.options.crossing_min_length_factor;
                    let min = if factor < 0.0 {
                        self.disjoint_min_length(pair_distance)
                    } else {
                        factor * pair_distance
                    };
                    (SectionKind::Crossing, min)
                }
                _ => (SectionKind::Disjoint, self.disjoint_min_length(pair_distance)),
            };
            let within_near = length >= chain_length - self.xy_tolerance;
            if !within_near && length <= min_length {
                continue;
            }

            let (local, description) = section_issue(kind, within_near, length, min_length);
            let mut rows: Vec<&TableRow> = own_edges.iter().map(|&e| &own.edges[e].row).collect();
            rows.extend(other_edges.iter().map(|&e| &other.edges[e].row));
            errors.report(
                description,
                &rows,
                Some(Geometry::Polyline(MultiLineString::new(vec![geometry]))),
                code(PREFIX, local),
                None,
            );
            reported.push((section, min_length));
        }

        self.report_short_subparts(own, &reported, errors);
    }

    /// Parts between reported sections, or between a section and a line end, that are too
    /// short to stand on their own
    fn report_short_subparts(
        &self,
        own: &Chain,
        reported: &[(Subcurve, f64)],
        errors: &mut ErrorCollector,
    ) {
        if reported.is_empty() {
            return;
        }
        let line = &own.line;
        let last_segment = own.segment_count().saturating_sub(1);
        let mut sections: Vec<&(Subcurve, f64)> = reported.iter().collect();
        sections.sort_by(|a, b| {
            (a.0.start_segment, a.0.start_t)
                .partial_cmp(&(b.0.start_segment, b.0.start_t))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut gaps: Vec<(Subcurve, f64)> = Vec::new();
        let gap = |from: (usize, f64), to: (usize, f64)| Subcurve {
            part: 0,
            start_segment: from.0,
            start_t: from.1,
            end_segment: to.0,
            end_t: to.1,
        };
        if !own.is_closed() {
            let first = &sections[0];
            gaps.push((gap((0, 0.0), (first.0.start_segment, first.0.start_t)), first.1));
        }
        for pair in sections.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            gaps.push((
                gap((a.0.end_segment, a.0.end_t), (b.0.start_segment, b.0.start_t)),
                a.1.min(b.1),
            ));
        }
        if !own.is_closed() {
            let last = &sections[sections.len() - 1];
            gaps.push((gap((last.0.end_segment, last.0.end_t), (last_segment, 1.0)), last.1));
        }

        for (subpart, min_length) in gaps {
            if (subpart.end_segment, subpart.end_t) <= (subpart.start_segment, subpart.start_t) {
                continue;
            }
            let length = subpart.length(line);
            if length <= self.xy_tolerance || length >= min_length {
                continue;
            }
            let rows: Vec<&TableRow> =
                own.edges_of(&subpart).into_iter().map(|e| &own.edges[e].row).collect();
            errors.report(
                format!(
                    "Short subpart ({} < {})",
                    format_length(length),
                    format_length(min_length)
                ),
                &rows,
                Some(Geometry::Polyline(MultiLineString::new(vec![subpart.geometry(line)]))),
                code(PREFIX, "ShortSubpart"),
                None,
            );
        }
    }

    /// Butt ends at junctions whose symbol sticks out of a neighbour line
    fn check_line_ends(&self, ctx: &TileContext<'_>, chain: &Chain, errors: &mut ErrorCollector) {
        if self.options.ignore_inconsistent_line_symbol_ends
            || self.options.end_cap_style != CapStyle::Butt
        {
            return;
        }
        let coords = chain.coords();
        let n = coords.len();
        let ends = [
            (chain.start, coords[0], coords[1], 0usize),
            (chain.end, coords[n - 1], coords[n - 2], chain.edges.len() - 1),
        ];
        for (end, node, previous, edge_index) in ends {
            if end != ChainEnd::Junction {
                continue;
            }
            let edge = &chain.edges[edge_index];
            let (left, right) = chain.widths[edge_index];
            let dir0 = direction_angle(previous, node);
            for other in self.ends_at(ctx, edge.row.table, node) {
                if other.key() == edge.key() {
                    continue;
                }
                let Some(lines) = row_lines(&other.row) else {
                    continue;
                };
                let Some(line) = lines.0.get(other.part) else {
                    continue;
                };
                let c = &line.0;
                let (from, to) = if other.at_start {
                    (c[0], c[1])
                } else {
                    (c[c.len() - 1], c[c.len() - 2])
                };
                let segment_length = distance(from, to);
                if segment_length == 0.0 {
                    continue;
                }
                let dir1 = direction_angle(from, to);
                if has_inconsistent_line_end(left + right, dir0, dir1, segment_length) {
                    errors.report(
                        "Inconsistent line symbol end",
                        &[&edge.row, &other.row],
                        Some(Geometry::point(node.x, node.y)),
                        code(PREFIX, "InconsistentLineSymbolEnd"),
                        None,
                    );
                }
            }
        }
    }
}

fn parse_width_expressions(
    texts: &[String],
    table_count: usize,
    what: &str,
) -> Result<Vec<Expression>> {
    if texts.len() > 1 && texts.len() != table_count {
        return Err(TopoError::config(format!(
            "{} {what} given for {table_count} tables; expected one or one per table",
            texts.len()
        )));
    }
    texts.iter().map(|t| Expression::parse(t, &[])).collect()
}

fn section_issue(
    kind: SectionKind,
    within_near: bool,
    length: f64,
    min_length: f64,
) -> (&'static str, String) {
    let (l, m) = (format_length(length), format_length(min_length));
    match (kind, within_near) {
        (SectionKind::Loop, true) => (
            "NearlyCoincidentSection.Connected.Loop.WithinNear",
            "Line lies entirely within the near distance of itself".to_string(),
        ),
        (SectionKind::Loop, false) => (
            "NearlyCoincidentSection.Connected.Loop",
            format!("Nearly coincident section within a loop of the line ({l} > {m})"),
        ),
        (SectionKind::Connected, true) => (
            "NearlyCoincidentSection.WithinNear.Connected",
            "Connected line lies entirely within the near distance of another line".to_string(),
        ),
        (_, true) => (
            "NearlyCoincidentSection.WithinNear",
            "Line lies entirely within the near distance of another line".to_string(),
        ),
        (SectionKind::Connected, false) => (
            "NearlyCoincidentSection.Connected",
            format!("Nearly coincident section of connected lines ({l} > {m})"),
        ),
        (SectionKind::Crossing, false) => (
            "NearlyCoincidentSection.Crossing",
            format!("Nearly coincident section of crossing lines ({l} > {m})"),
        ),
        (SectionKind::Disjoint, false) => (
            "NearlyCoincidentSection.Disjoint",
            format!("Nearly coincident section of disjoint lines ({l} > {m})"),
        ),
    }
}

impl ContainerCheck for TopoNotNear {
    fn name(&self) -> &str {
        &self.name
    }

    fn tables(&self) -> &[TableId] {
        &self.tables
    }

    fn search_distance(&self) -> f64 {
        2.0 * self.max_half_width + self.xy_tolerance
    }

    fn execute_row(
        &mut self,
        row: &TableRow,
        ctx: &TileContext<'_>,
        errors: &mut ErrorCollector,
    ) -> Result<()> {
        if row.table != self.table {
            return Ok(());
        }
        let Some(lines) = row_lines(row) else {
            return Ok(());
        };
        for part in 0..lines.0.len() {
            let Some(chain) = self.build_chain(ctx, row, part) else {
                continue;
            };
            let key = EdgeKey {
                table: row.table,
                oid: row.oid(),
                part,
            };
            if chain.owner != key {
                continue;
            }
            tracing::trace!(
                oid = row.oid(),
                part,
                edges = chain.edges.len(),
                "Checking topo chain"
            );
            self.check_chain(ctx, &chain, errors)?;
        }
        Ok(())
    }
}
