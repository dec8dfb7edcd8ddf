//! Connectivity of line groups
//!
//! Lines sharing the values of the group-by fields form a group. Within a group, line parts are
//! joined at end points coinciding within the tolerance. The resulting graph is checked for
//! cycles and branches as soon as all tiles it may reach into are processed, and groups that
//! consist of more than one connected part are reported after the last tile.

use super::{
    NodeIndex, code, distinct_tables, format_length, is_processed, max_xy_tolerance,
    require_geometry_types,
};
use crate::container::{ContainerCheck, FeatureState, TileContext, TileInfo, TileState};
use crate::feature::{Dataset, Feature, Geometry, GeometryType, TableId, TableRow, Value};
use crate::geometry::{distance, expand_rect, rect_union};
use crate::issue::ErrorCollector;
use crate::{Result, TopoError};
use geo::{BoundingRect, Coord, LineString, MultiLineString, Rect};
use std::collections::{BTreeMap, HashSet};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const PREFIX: &str = "ConnectedLineGroups";

/// Shapes a connected line group may take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ShapeAllowed {
    /// Only simple, open lines
    #[default]
    None,
    Cycles,
    Branches,
    CyclesAndBranches,
    /// Open ends on lines forming a cycle
    InsideBranches,
    All,
}

impl ShapeAllowed {
    const CYCLES: u8 = 1;
    const BRANCHES: u8 = 2;
    const INSIDE_BRANCHES: u8 = 4;

    fn bits(self) -> u8 {
        match self {
            ShapeAllowed::None => 0,
            ShapeAllowed::Cycles => Self::CYCLES,
            ShapeAllowed::Branches => Self::BRANCHES,
            ShapeAllowed::CyclesAndBranches => Self::CYCLES | Self::BRANCHES,
            ShapeAllowed::InsideBranches => Self::INSIDE_BRANCHES,
            ShapeAllowed::All => Self::CYCLES | Self::BRANCHES | Self::INSIDE_BRANCHES,
        }
    }

    pub fn allows_cycles(self) -> bool {
        self.bits() & Self::CYCLES != 0
    }

    pub fn allows_branches(self) -> bool {
        self.bits() & Self::BRANCHES != 0
    }

    pub fn allows_inside_branches(self) -> bool {
        self.bits() & Self::INSIDE_BRANCHES != 0
    }
}

/// How groups made of several parts are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ErrorReporting {
    /// One issue per additional part, with the end points of the first part and of that part
    #[default]
    ReferToFirstPart,
    /// The shortest gaps connecting all parts
    ShortestGaps,
    /// The shortest gaps joining the parts end to end, avoiding new branches where possible
    CombineParts,
}

/// Options of [`GroupConnected`]
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct GroupConnectedOptions {
    /// Splits text values of the group-by fields into several groups, e.g. `A;B` with `;`.
    /// Default: None
    pub value_separator: Option<String>,
    /// Default: [`ErrorReporting::ReferToFirstPart`]
    pub error_reporting: ErrorReporting,
    /// Gaps up to this length are reported with their end points instead of a connection line.
    /// Default: 0
    pub minimum_error_connection_line_length: f64,
    /// One issue per gap instead of one per group.
    /// Default: false
    pub report_individual_gaps: bool,
    /// Gaps longer than this are not reported; values <= 0 report all gaps.
    /// Default: -1
    pub ignore_gaps_longer_than: f64,
    /// Before reporting a group of several parts, add the group's rows found in the source
    /// tables around its parts (e.g. rows the observer skipped).
    /// Default: false
    pub recheck_multiple_part_issues: bool,
    /// Read the rows of the verified groups that lie outside the verified extent. Otherwise the
    /// parts reaching outside are assumed to be connected there.
    /// Default: false
    pub complete_groups_outside_test_area: bool,
}

impl Default for GroupConnectedOptions {
    fn default() -> Self {
        Self {
            value_separator: None,
            error_reporting: ErrorReporting::ReferToFirstPart,
            minimum_error_connection_line_length: 0.0,
            report_individual_gaps: false,
            ignore_gaps_longer_than: -1.0,
            recheck_multiple_part_issues: false,
            complete_groups_outside_test_area: false,
        }
    }
}

/// One part of a polyline row
#[derive(Debug, Clone)]
struct LinePart {
    row: TableRow,
    line: LineString<f64>,
}

impl LinePart {
    fn from(&self) -> Coord<f64> {
        self.line.0[0]
    }

    fn to(&self) -> Coord<f64> {
        self.line.0[self.line.0.len() - 1]
    }
}

/// Open end of a component
#[derive(Debug, Clone, Copy)]
struct End {
    point: Coord<f64>,
    /// Index of the line part ending there
    part: usize,
}

/// Connected set of line parts of a group
#[derive(Debug, Clone)]
struct Component {
    /// Indices into the group's parts, ascending
    parts: Vec<usize>,
    nodes: Vec<Coord<f64>>,
    ends: Vec<End>,
    /// Parts on cycles
    cycle_parts: Vec<usize>,
}

impl Component {
    fn has_cycle(&self) -> bool {
        !self.cycle_parts.is_empty()
    }

    /// Points standing for the component when measuring gaps to other components
    fn gap_points(&self) -> Vec<End> {
        if self.ends.is_empty() {
            self.nodes
                .first()
                .map(|&point| End {
                    point,
                    part: self.parts[0],
                })
                .into_iter()
                .collect()
        } else {
            self.ends.clone()
        }
    }
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

fn union(parent: &mut [usize], a: usize, b: usize) -> bool {
    let (ra, rb) = (find(parent, a), find(parent, b));
    if ra == rb {
        return false;
    }
    parent[ra.max(rb)] = ra.min(rb);
    true
}

/// Connected components of a set of line parts
fn components(parts: &[LinePart], tolerance: f64) -> Vec<Component> {
    let mut index = NodeIndex::new(tolerance);
    let edges: Vec<(usize, usize)> = parts
        .iter()
        .map(|p| (index.node(p.from()), index.node(p.to())))
        .collect();
    let node_count = index.len();

    let mut parent: Vec<usize> = (0..node_count).collect();
    for &(a, b) in &edges {
        union(&mut parent, a, b);
    }

    let mut by_root: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, &(a, _)) in edges.iter().enumerate() {
        by_root.entry(find(&mut parent, a)).or_default().push(i);
    }

    let mut result: Vec<Component> = by_root
        .into_values()
        .map(|part_indices| {
            let mut degree: BTreeMap<usize, usize> = BTreeMap::new();
            for &i in &part_indices {
                let (a, b) = edges[i];
                *degree.entry(a).or_default() += 1;
                *degree.entry(b).or_default() += 1;
            }
            let ends = part_indices
                .iter()
                .flat_map(|&i| [(edges[i].0, i), (edges[i].1, i)])
                .filter(|(node, _)| degree.get(node) == Some(&1))
                .map(|(node, part)| End {
                    point: index.point(node),
                    part,
                })
                .collect();
            let cycle_parts = cycle_parts(&part_indices, &edges, degree.clone());
            Component {
                nodes: degree.keys().map(|&n| index.point(n)).collect(),
                parts: part_indices,
                ends,
                cycle_parts,
            }
        })
        .collect();
    result.sort_by_key(|c| c.parts[0]);
    result
}

/// Parts remaining after repeatedly removing parts with an open end
fn cycle_parts(
    part_indices: &[usize],
    edges: &[(usize, usize)],
    mut degree: BTreeMap<usize, usize>,
) -> Vec<usize> {
    let mut remaining: HashSet<usize> = part_indices.iter().copied().collect();
    loop {
        let open: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|&i| {
                let (a, b) = edges[i];
                a != b && (degree[&a] == 1 || degree[&b] == 1)
            })
            .collect();
        if open.is_empty() {
            break;
        }
        for i in open {
            if remaining.remove(&i) {
                let (a, b) = edges[i];
                degree.entry(a).and_modify(|d| *d -= 1);
                degree.entry(b).and_modify(|d| *d -= 1);
            }
        }
    }
    let mut result: Vec<usize> = remaining.into_iter().collect();
    result.sort_unstable();
    result
}

/// Connection between two components
#[derive(Debug, Clone, Copy)]
struct EndsGap {
    components: (usize, usize),
    from: End,
    to: End,
    distance: f64,
}

/// Line parts of one group collected over the run
#[derive(Debug, Default)]
struct Group {
    parts: Vec<LinePart>,
    rows: HashSet<(TableId, i64)>,
    /// First part index of the components already checked for their shape
    checked: HashSet<usize>,
    /// Some component is not yet complete
    open: bool,
}

impl Group {
    fn add(&mut self, row: &TableRow) {
        if !self.rows.insert(row.key()) {
            return;
        }
        let Some(lines) = row.feature.geometry.as_lines() else {
            return;
        };
        for line in &lines.0 {
            if line.0.len() >= 2 {
                self.parts.push(LinePart {
                    row: row.clone(),
                    line: line.clone(),
                });
            }
        }
        self.open = true;
    }

    fn rows_of(&self, parts: &[usize]) -> Vec<&TableRow> {
        let mut rows: Vec<&TableRow> = parts.iter().map(|&i| &self.parts[i].row).collect();
        rows.sort_by_key(|r| r.key());
        rows.dedup_by_key(|r| r.key());
        rows
    }

    fn envelope(&self) -> Option<Rect<f64>> {
        self.parts
            .iter()
            .filter_map(|p| p.line.bounding_rect())
            .reduce(rect_union)
    }
}

/// Lines with equal group-by values form one connected line of an allowed shape
pub struct GroupConnected {
    name: String,
    tables: Vec<TableId>,
    group_by: Vec<String>,
    allowed_shape: ShapeAllowed,
    options: GroupConnectedOptions,
    tolerance: f64,
    groups: BTreeMap<Vec<String>, Group>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl GroupConnected {
    /// Create the check
    ///
    /// # Arguments
    /// * `dataset` - Dataset the tables belong to
    /// * `tables` - Polyline tables
    /// * `group_by` - Fields whose values define the groups
    /// * `allowed_shape` - Cycles and branches a group may contain
    /// * `options` - Reporting options
    pub fn new(
        dataset: &Dataset,
        tables: &[TableId],
        group_by: &[&str],
        allowed_shape: ShapeAllowed,
        options: GroupConnectedOptions,
    ) -> Result<Self> {
        if tables.is_empty() {
            return Err(TopoError::config("at least one line table is required"));
        }
        if group_by.is_empty() || group_by.iter().any(|f| f.trim().is_empty()) {
            return Err(TopoError::config("group-by fields must not be empty"));
        }
        if options
            .value_separator
            .as_deref()
            .is_some_and(str::is_empty)
        {
            return Err(TopoError::config("value separator must not be empty"));
        }
        require_geometry_types(dataset, tables, &[GeometryType::Polyline], "line")?;

        let tables = distinct_tables(tables.iter().copied());
        let tolerance = max_xy_tolerance(dataset, &tables)?;
        let group_by: Vec<String> = group_by.iter().map(|f| f.trim().to_uppercase()).collect();
        let names = tables
            .iter()
            .map(|&t| dataset.table(t).map(|t| t.name().to_string()))
            .collect::<Result<Vec<_>>>()?;
        let name = format!("GroupConnected({})", names.join(","));
        tracing::debug!(
            check = %name,
            group_by = %group_by.join(","),
            allowed_shape = ?allowed_shape,
            reporting = ?options.error_reporting,
            "Check configured"
        );

        Ok(Self {
            name,
            tables,
            group_by,
            allowed_shape,
            options,
            tolerance,
            groups: BTreeMap::new(),
        })
    }

    /// Groups a feature belongs to; none if a group-by value is null
    fn group_keys(&self, feature: &Feature) -> Vec<Vec<String>> {
        let mut keys: Vec<Vec<String>> = vec![Vec::new()];
        for field in &self.group_by {
            let separator = &self.options.value_separator;
            let values: Vec<String> = match (feature.attribute(field), separator) {
                (Value::Null, _) => return Vec::new(),
                (Value::Text(text), Some(separator)) => text
                    .split(separator.as_str())
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .collect(),
                (value, _) => vec![value.to_string()],
            };
            keys = keys
                .into_iter()
                .flat_map(|key| {
                    values.iter().map(move |v| {
                        let mut key = key.clone();
                        key.push(v.clone());
                        key
                    })
                })
                .collect();
        }
        keys.sort();
        keys.dedup();
        keys
    }

    fn group_info(&self, key: &[String]) -> String {
        self.group_by
            .iter()
            .zip(key)
            .map(|(field, value)| format!("{field}={value}"))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// True if no further row can touch the component
    fn is_complete(
        &self,
        group: &Group,
        component: &Component,
        tile: &TileInfo,
        ctx: &TileContext<'_>,
    ) -> bool {
        if tile.state == TileState::Final {
            return true;
        }
        let Some(tile_box) = tile.current_box else {
            return false;
        };
        component.nodes.iter().all(|&p| is_processed(p, self.tolerance, tile_box, tile.all_box))
            && component.parts.iter().all(|&i| {
                let row = &group.parts[i].row;
                ctx.feature_state(row.table, row.oid()) == FeatureState::Verified
            })
    }

    fn check_shape(&self, group: &Group, component: &Component, errors: &mut ErrorCollector) {
        if component.has_cycle() && !self.allowed_shape.allows_cycles() {
            let lines = MultiLineString::new(
                component
                    .cycle_parts
                    .iter()
                    .map(|&i| group.parts[i].line.clone())
                    .collect(),
            );
            errors.report(
                "Cycle found",
                &group.rows_of(&component.cycle_parts),
                Some(Geometry::Polyline(lines)),
                code(PREFIX, "InvalidLineGroup.Cycle"),
                None,
            );
        }

        if component.has_cycle() && !self.allowed_shape.allows_inside_branches() {
            self.check_ends(group, component, 0, "InvalidLineGroup.InsideBranch", errors);
        }
        if !self.allowed_shape.allows_branches() {
            self.check_ends(group, component, 2, "InvalidLineGroup.Branch", errors);
        }
    }

    fn check_ends(
        &self,
        group: &Group,
        component: &Component,
        max_ends: usize,
        local_code: &str,
        errors: &mut ErrorCollector,
    ) {
        if component.ends.len() <= max_ends {
            return;
        }
        let points: Vec<Coord<f64>> = component.ends.iter().map(|e| e.point).collect();
        errors.report(
            format!(
                "Found {} ends, expected <= {max_ends}",
                component.ends.len()
            ),
            &group.rows_of(&component.parts),
            Some(Geometry::points(&points)),
            code(PREFIX, local_code),
            None,
        );
    }

    /// Check the shape of the components that can no longer grow
    fn check_completed(
        &mut self,
        tile: &TileInfo,
        ctx: &TileContext<'_>,
        errors: &mut ErrorCollector,
    ) {
        let mut groups = std::mem::take(&mut self.groups);
        for group in groups.values_mut().filter(|g| g.open) {
            let mut open = false;
            for component in components(&group.parts, self.tolerance) {
                if group.checked.contains(&component.parts[0]) {
                    continue;
                }
                if !self.is_complete(group, &component, tile, ctx) {
                    open = true;
                    continue;
                }
                self.check_shape(group, &component, errors);
                group.checked.insert(component.parts[0]);
            }
            group.open = open;
        }
        self.groups = groups;
    }

    /// Add rows of the groups read directly from the tables
    fn complete_groups(
        &mut self,
        ctx: &TileContext<'_>,
        area: Option<Rect<f64>>,
        only: &HashSet<Vec<String>>,
    ) {
        for &table in &self.tables {
            let rows: Vec<TableRow> = match area {
                Some(area) => ctx.search(table, area),
                None => match ctx.dataset().table(table) {
                    Ok(t) => t
                        .features()
                        .iter()
                        .map(|feature| TableRow {
                            table,
                            feature: feature.clone(),
                        })
                        .collect(),
                    Err(_) => continue,
                },
            };
            for row in rows {
                for key in self.group_keys(&row.feature) {
                    if !only.contains(&key) {
                        continue;
                    }
                    if let Some(group) = self.groups.get_mut(&key) {
                        group.add(&row);
                    }
                }
            }
        }
    }

    fn report_multiple_parts(
        &self,
        ctx: &TileContext<'_>,
        key: &[String],
        group: &Group,
        errors: &mut ErrorCollector,
    ) {
        let mut parts = components(&group.parts, self.tolerance);
        if parts.len() < 2 {
            return;
        }

        if !self.options.complete_groups_outside_test_area && ctx.test_run_extent().is_some() {
            // parts reaching outside the verified extent may be connected there
            let (outside, mut inside): (Vec<Component>, Vec<Component>) =
                parts.into_iter().partition(|c| {
                    c.parts.iter().any(|&i| {
                        group.parts[i]
                            .line
                            .bounding_rect()
                            .is_some_and(|r| ctx.is_outside_test_run(r))
                    })
                });
            if let Some(merged) = outside.into_iter().reduce(|mut a, b| {
                a.parts.extend(b.parts);
                a.nodes.extend(b.nodes);
                a.ends.extend(b.ends);
                a.parts.sort_unstable();
                a
            }) {
                inside.push(merged);
            }
            inside.sort_by_key(|c| c.parts[0]);
            parts = inside;
        }
        if parts.len() < 2 {
            return;
        }

        let info = self.group_info(key);
        match self.options.error_reporting {
            ErrorReporting::ReferToFirstPart => {
                self.report_refer_to_first_part(group, &parts, &info, errors)
            }
            ErrorReporting::ShortestGaps | ErrorReporting::CombineParts => {
                let gaps = self.report_gaps(&parts);
                if gaps.is_empty() {
                    return;
                }
                if self.options.report_individual_gaps {
                    self.report_individual_gaps(group, &gaps, parts.len(), &info, errors);
                } else {
                    self.report_combined_gaps(group, &gaps, parts.len(), &info, errors);
                }
            }
        }
    }

    fn report_refer_to_first_part(
        &self,
        group: &Group,
        parts: &[Component],
        info: &str,
        errors: &mut ErrorCollector,
    ) {
        let first = &parts[0];
        let first_ends = first.gap_points();
        for other in &parts[1..] {
            let other_ends = other.gap_points();
            let points: Vec<Coord<f64>> = first_ends
                .iter()
                .chain(&other_ends)
                .map(|e| e.point)
                .collect();
            let end_parts: Vec<usize> =
                first_ends.iter().chain(&other_ends).map(|e| e.part).collect();
            errors.report(
                format!(
                    "At least 2 groups with attributes {info} exist (error geometry: end points of \
                     one group and of another group)"
                ),
                &group.rows_of(&end_parts),
                Some(Geometry::points(&points)),
                code(PREFIX, "InvalidLineGroup.MultipleParts"),
                None,
            );
        }
    }

    /// Gaps to report: the shortest set of gaps connecting all parts, without those to ignore
    fn report_gaps(&self, parts: &[Component]) -> Vec<EndsGap> {
        let points: Vec<Vec<End>> = parts.iter().map(Component::gap_points).collect();
        let mut candidates = Vec::new();
        for i in 0..parts.len() {
            for j in i + 1..parts.len() {
                for &from in &points[i] {
                    for &to in &points[j] {
                        candidates.push(EndsGap {
                            components: (i, j),
                            from,
                            to,
                            distance: distance(from.point, to.point),
                        });
                    }
                }
            }
        }
        candidates.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.components.cmp(&b.components))
        });

        let mut parent: Vec<usize> = (0..parts.len()).collect();
        let mut selected: Vec<EndsGap> = Vec::new();
        if self.options.error_reporting == ErrorReporting::CombineParts {
            // join end to end first, so that no end gets two connections
            let mut used: HashSet<(usize, u64, u64)> = HashSet::new();
            let end_key = |c: usize, e: &End| (c, e.point.x.to_bits(), e.point.y.to_bits());
            for gap in &candidates {
                let (a, b) = gap.components;
                if used.contains(&end_key(a, &gap.from)) || used.contains(&end_key(b, &gap.to)) {
                    continue;
                }
                if union(&mut parent, a, b) {
                    used.insert(end_key(a, &gap.from));
                    used.insert(end_key(b, &gap.to));
                    selected.push(*gap);
                }
            }
        }
        for gap in &candidates {
            let (a, b) = gap.components;
            if union(&mut parent, a, b) {
                selected.push(*gap);
            }
        }

        if self.options.ignore_gaps_longer_than > 0.0 {
            selected.retain(|g| g.distance <= self.options.ignore_gaps_longer_than);
        }
        selected
    }

    fn is_long(&self, gap: &EndsGap) -> bool {
        gap.distance > self.options.minimum_error_connection_line_length
    }

    fn gap_rows<'a>(&self, group: &'a Group, gaps: &[&EndsGap]) -> Vec<&'a TableRow> {
        let parts: Vec<usize> = gaps.iter().flat_map(|g| [g.from.part, g.to.part]).collect();
        group.rows_of(&parts)
    }

    fn report_individual_gaps(
        &self,
        group: &Group,
        gaps: &[EndsGap],
        part_count: usize,
        info: &str,
        errors: &mut ErrorCollector,
    ) {
        for gap in gaps {
            let geometry = if self.is_long(gap) {
                Geometry::Polyline(MultiLineString::new(vec![LineString::new(vec![
                    gap.from.point,
                    gap.to.point,
                ])]))
            } else {
                Geometry::points(&[gap.from.point, gap.to.point])
            };
            errors.report(
                format!(
                    "Gap between two line groups (of {part_count}) for {info} (gap distance: {})",
                    format_length(gap.distance)
                ),
                &self.gap_rows(group, &[gap]),
                Some(geometry),
                code(PREFIX, "InvalidLineGroup.MultipleParts"),
                None,
            );
        }
    }

    fn report_combined_gaps(
        &self,
        group: &Group,
        gaps: &[EndsGap],
        part_count: usize,
        info: &str,
        errors: &mut ErrorCollector,
    ) {
        let (long, short): (Vec<&EndsGap>, Vec<&EndsGap>) =
            gaps.iter().partition(|g| self.is_long(g));
        let total = gaps.len();
        let base = format!("{part_count} line groups for {info} exist");
        let plural = |n: usize| if n == 1 { "gap" } else { "gaps" };
        let minimum = format_length(self.options.minimum_error_connection_line_length);

        if !long.is_empty() {
            let description = if short.is_empty() {
                base.clone()
            } else {
                format!(
                    "{base} ({} of {total} gaps reported - end points of {} {} shorter than \
                     {minimum} reported separately)",
                    long.len(),
                    short.len(),
                    plural(short.len())
                )
            };
            let lines = long
                .iter()
                .map(|g| LineString::new(vec![g.from.point, g.to.point]))
                .collect();
            errors.report(
                description,
                &self.gap_rows(group, &long),
                Some(Geometry::Polyline(MultiLineString::new(lines))),
                code(PREFIX, "InvalidLineGroup.MultipleParts"),
                None,
            );
        }

        if !short.is_empty() {
            let description = if long.is_empty() {
                base
            } else {
                format!(
                    "{base} ({} of {total} gaps reported - connection lines for {} {} longer \
                     than {minimum} reported separately)",
                    short.len(),
                    long.len(),
                    plural(long.len())
                )
            };
            let points: Vec<Coord<f64>> = short
                .iter()
                .flat_map(|g| [g.from.point, g.to.point])
                .collect();
            errors.report(
                description,
                &self.gap_rows(group, &short),
                Some(Geometry::points(&points)),
                code(PREFIX, "InvalidLineGroup.MultipleParts"),
                None,
            );
        }
    }
}

impl ContainerCheck for GroupConnected {
    fn name(&self) -> &str {
        &self.name
    }

    fn tables(&self) -> &[TableId] {
        &self.tables
    }

    fn search_distance(&self) -> f64 {
        self.tolerance
    }

    fn execute_row(
        &mut self,
        row: &TableRow,
        _ctx: &TileContext<'_>,
        _errors: &mut ErrorCollector,
    ) -> Result<()> {
        for key in self.group_keys(&row.feature) {
            self.groups.entry(key).or_default().add(row);
        }
        Ok(())
    }

    fn complete_tile(
        &mut self,
        tile: &TileInfo,
        ctx: &TileContext<'_>,
        errors: &mut ErrorCollector,
    ) -> Result<()> {
        if tile.state == TileState::Initial {
            self.groups.clear();
            return Ok(());
        }
        if tile.state != TileState::Final {
            self.check_completed(tile, ctx, errors);
            return Ok(());
        }

        let keys: HashSet<Vec<String>> = self.groups.keys().cloned().collect();
        if self.options.complete_groups_outside_test_area {
            self.complete_groups(ctx, None, &keys);
        }
        if self.options.recheck_multiple_part_issues {
            let multipart: Vec<(Vec<String>, Rect<f64>)> = self
                .groups
                .iter()
                .filter(|(_, g)| components(&g.parts, self.tolerance).len() > 1)
                .filter_map(|(k, g)| Some((k.clone(), expand_rect(g.envelope()?, self.tolerance))))
                .collect();
            for (key, area) in multipart {
                let only = HashSet::from([key]);
                self.complete_groups(ctx, Some(area), &only);
            }
        }

        self.check_completed(tile, ctx, errors);
        for (key, group) in &self.groups {
            self.report_multiple_parts(ctx, key, group, errors);
        }
        tracing::debug!(groups = self.groups.len(), "Line groups verified");
        self.groups.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerConfig, ContainerObserver, NoopObserver, TestContainer};
    use crate::feature::FeatureTable;
    use crate::geometry::Tolerance;
    use crate::issue::QaError;
    use geo::Coord;

    fn route(oid: i64, value: &str, coords: &[(f64, f64)]) -> Feature {
        Feature::new(oid, Geometry::line(coords)).with_attribute("ROUTE", value)
    }

    fn routes_dataset(features: Vec<Feature>) -> (Dataset, TableId) {
        let mut table = FeatureTable::new("routes", GeometryType::Polyline, Tolerance::default());
        for f in features {
            table.add(f).unwrap();
        }
        let mut dataset = Dataset::new();
        let id = dataset.add_table(table);
        (dataset, id)
    }

    fn run_with(
        dataset: &Dataset,
        config: ContainerConfig,
        check: GroupConnected,
        observer: &mut dyn ContainerObserver,
    ) -> Vec<QaError> {
        let mut container = TestContainer::new(dataset.clone(), config);
        container.add_check(Box::new(check)).unwrap();
        container.execute(observer).unwrap()
    }

    fn run(
        dataset: &Dataset,
        table: TableId,
        tile_size: f64,
        shape: ShapeAllowed,
        options: GroupConnectedOptions,
    ) -> Vec<QaError> {
        let check = GroupConnected::new(dataset, &[table], &["route"], shape, options).unwrap();
        let config = ContainerConfig {
            tile_size,
            ..Default::default()
        };
        run_with(dataset, config, check, &mut NoopObserver)
    }

    fn codes(errors: &[QaError]) -> Vec<&str> {
        errors
            .iter()
            .filter_map(|e| e.issue_code.as_ref().map(|c| c.local()))
            .collect()
    }

    #[test]
    fn test_connected_group() {
        let (dataset, table) = routes_dataset(vec![
            route(1, "A", &[(0.0, 0.0), (4.0, 0.0)]),
            route(2, "A", &[(8.0, 3.0), (4.0, 0.0)]),
            route(3, "A", &[(8.0, 3.0), (12.0, 3.0)]),
            route(4, "B", &[(0.0, 5.0), (4.0, 5.0)]),
        ]);
        for tile_size in [1000.0, 3.0, 1.0] {
            let errors = run(&dataset, table, tile_size, ShapeAllowed::None, Default::default());
            assert!(errors.is_empty(), "tile size {tile_size}: {errors:?}");
        }
    }

    #[test]
    fn test_multiple_parts_refer_to_first_part() {
        let (dataset, table) = routes_dataset(vec![
            route(1, "A", &[(0.0, 0.0), (4.0, 0.0)]),
            route(2, "A", &[(6.0, 0.0), (10.0, 0.0)]),
            route(3, "B", &[(4.0, 0.0), (6.0, 0.0)]),
        ]);
        for tile_size in [1000.0, 3.0] {
            let errors = run(&dataset, table, tile_size, ShapeAllowed::None, Default::default());
            assert_eq!(codes(&errors), vec!["InvalidLineGroup.MultipleParts"]);
            assert_eq!(
                errors[0].description,
                "At least 2 groups with attributes ROUTE=A exist (error geometry: end points of \
                 one group and of another group)"
            );
            assert_eq!(errors[0].involved_rows.len(), 2);
            let Some(Geometry::MultiPoint(points)) = &errors[0].geometry else {
                panic!("expected points");
            };
            assert_eq!(points.0.len(), 4);
        }
    }

    #[test]
    fn test_cycle() {
        let square = || {
            vec![
                route(1, "A", &[(0.0, 0.0), (4.0, 0.0)]),
                route(2, "A", &[(4.0, 0.0), (4.0, 4.0)]),
                route(3, "A", &[(4.0, 4.0), (0.0, 4.0)]),
                route(4, "A", &[(0.0, 4.0), (0.0, 0.0)]),
            ]
        };
        let (dataset, table) = routes_dataset(square());
        for tile_size in [1000.0, 3.0] {
            let errors = run(&dataset, table, tile_size, ShapeAllowed::None, Default::default());
            assert_eq!(codes(&errors), vec!["InvalidLineGroup.Cycle"]);
            assert_eq!(errors[0].description, "Cycle found");
            assert_eq!(errors[0].involved_rows.len(), 4);
            let errors = run(&dataset, table, tile_size, ShapeAllowed::Cycles, Default::default());
            assert!(errors.is_empty());
        }

        // single closed line
        let (dataset, table) = routes_dataset(vec![route(
            1,
            "A",
            &[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 0.0)],
        )]);
        let errors = run(&dataset, table, 1000.0, ShapeAllowed::Branches, Default::default());
        assert_eq!(codes(&errors), vec!["InvalidLineGroup.Cycle"]);
    }

    #[test]
    fn test_branch() {
        let (dataset, table) = routes_dataset(vec![
            route(1, "A", &[(0.0, 0.0), (4.0, 0.0)]),
            route(2, "A", &[(4.0, 0.0), (8.0, 0.0)]),
            route(3, "A", &[(4.0, 0.0), (4.0, 4.0)]),
        ]);
        for tile_size in [1000.0, 3.0] {
            let errors = run(&dataset, table, tile_size, ShapeAllowed::Cycles, Default::default());
            assert_eq!(codes(&errors), vec!["InvalidLineGroup.Branch"]);
            assert_eq!(errors[0].description, "Found 3 ends, expected <= 2");
            let errors =
                run(&dataset, table, tile_size, ShapeAllowed::Branches, Default::default());
            assert!(errors.is_empty());
        }
    }

    #[test]
    fn test_inside_branch() {
        let (dataset, table) = routes_dataset(vec![
            route(1, "A", &[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0)]),
            route(2, "A", &[(4.0, 4.0), (0.0, 4.0), (0.0, 0.0)]),
            route(3, "A", &[(4.0, 4.0), (8.0, 8.0)]),
        ]);
        let errors =
            run(&dataset, table, 1000.0, ShapeAllowed::CyclesAndBranches, Default::default());
        assert_eq!(codes(&errors), vec!["InvalidLineGroup.InsideBranch"]);
        assert_eq!(errors[0].description, "Found 1 ends, expected <= 0");

        let errors = run(&dataset, table, 3.0, ShapeAllowed::All, Default::default());
        assert!(errors.is_empty());

        let errors = run(&dataset, table, 3.0, ShapeAllowed::None, Default::default());
        assert_eq!(
            codes(&errors),
            vec!["InvalidLineGroup.Cycle", "InvalidLineGroup.InsideBranch"]
        );
    }

    /// Three parts with gaps of 1 and 2
    fn three_parts() -> (Dataset, TableId) {
        routes_dataset(vec![
            route(1, "A", &[(0.0, 0.0), (4.0, 0.0)]),
            route(2, "A", &[(5.0, 0.0), (8.0, 0.0)]),
            route(3, "A", &[(10.0, 0.0), (14.0, 0.0)]),
        ])
    }

    #[test]
    fn test_shortest_gaps() {
        let (dataset, table) = three_parts();
        let options = GroupConnectedOptions {
            error_reporting: ErrorReporting::ShortestGaps,
            ..Default::default()
        };
        for tile_size in [1000.0, 3.0] {
            let errors = run(&dataset, table, tile_size, ShapeAllowed::None, options.clone());
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].description, "3 line groups for ROUTE=A exist");
            let Some(Geometry::Polyline(lines)) = &errors[0].geometry else {
                panic!("expected lines");
            };
            assert!((crate::geometry::multi_line_length(lines) - 3.0).abs() < 1e-9);
            assert_eq!(errors[0].involved_rows.len(), 3);
        }

        let split = GroupConnectedOptions {
            minimum_error_connection_line_length: 1.5,
            ..options.clone()
        };
        let errors = run(&dataset, table, 1000.0, ShapeAllowed::None, split);
        assert_eq!(errors.len(), 2);
        assert_eq!(
            errors[0].description,
            "3 line groups for ROUTE=A exist (1 of 2 gaps reported - end points of 1 gap \
             shorter than 1.50 reported separately)"
        );
        assert!(matches!(errors[1].geometry, Some(Geometry::MultiPoint(_))));

        let individual = GroupConnectedOptions {
            report_individual_gaps: true,
            ..options.clone()
        };
        let errors = run(&dataset, table, 1000.0, ShapeAllowed::None, individual);
        let descriptions: Vec<&str> = errors.iter().map(|e| e.description.as_str()).collect();
        assert_eq!(
            descriptions,
            vec![
                "Gap between two line groups (of 3) for ROUTE=A (gap distance: 1.00)",
                "Gap between two line groups (of 3) for ROUTE=A (gap distance: 2.00)",
            ]
        );

        let ignore_long = GroupConnectedOptions {
            report_individual_gaps: true,
            ignore_gaps_longer_than: 1.5,
            ..options
        };
        assert_eq!(run(&dataset, table, 1000.0, ShapeAllowed::None, ignore_long).len(), 1);
    }

    #[test]
    fn test_combine_parts_avoids_branches() {
        // both short parts are closest to the same end of the long part
        let (dataset, table) = routes_dataset(vec![
            route(1, "A", &[(0.0, 0.0), (10.0, 0.0)]),
            route(2, "A", &[(-1.0, 1.0), (-1.0, 3.0)]),
            route(3, "A", &[(-1.0, -1.0), (-1.0, -3.0)]),
        ]);
        let with = |error_reporting| {
            let options = GroupConnectedOptions {
                error_reporting,
                report_individual_gaps: true,
                ..Default::default()
            };
            run(&dataset, table, 1000.0, ShapeAllowed::None, options)
        };

        let shortest = with(ErrorReporting::ShortestGaps);
        assert_eq!(shortest.len(), 2);
        assert!(shortest.iter().all(|e| e.description.ends_with("(gap distance: 1.41)")));

        let combined = with(ErrorReporting::CombineParts);
        assert_eq!(combined.len(), 2);
        assert!(combined[0].description.ends_with("(gap distance: 1.41)"));
        assert!(combined[1].description.ends_with("(gap distance: 4.00)"));
    }

    #[test]
    fn test_value_separator() {
        let (dataset, table) = routes_dataset(vec![
            route(1, "A", &[(0.0, 0.0), (1.0, 0.0)]),
            route(2, "A;B", &[(1.0, 0.0), (2.0, 0.0)]),
            route(3, "A", &[(2.0, 0.0), (3.0, 0.0)]),
            route(4, "B", &[(2.0, 0.0), (2.0, 1.0)]),
        ]);
        let errors = run(&dataset, table, 1000.0, ShapeAllowed::None, Default::default());
        assert_eq!(codes(&errors), vec!["InvalidLineGroup.MultipleParts"]);

        let options = GroupConnectedOptions {
            value_separator: Some(";".to_string()),
            ..Default::default()
        };
        assert!(run(&dataset, table, 1000.0, ShapeAllowed::None, options).is_empty());
    }

    #[test]
    fn test_groups_outside_test_area() {
        let crossing = vec![
            route(1, "A", &[(5.0, 0.0), (15.0, 0.0)]),
            route(2, "A", &[(5.0, 2.0), (15.0, 2.0)]),
        ];
        let mut joined = crossing.clone();
        joined.push(route(3, "A", &[(15.0, 0.0), (15.0, 2.0)]));
        let extent = Rect::new(Coord { x: 0.0, y: -1.0 }, Coord { x: 10.0, y: 3.0 });

        let errors_for = |features: Vec<Feature>, complete: bool| {
            let (dataset, table) = routes_dataset(features);
            let options = GroupConnectedOptions {
                complete_groups_outside_test_area: complete,
                ..Default::default()
            };
            let check =
                GroupConnected::new(&dataset, &[table], &["ROUTE"], ShapeAllowed::None, options)
                    .unwrap();
            let config = ContainerConfig {
                tile_size: 4.0,
                extent: Some(extent),
                ..Default::default()
            };
            run_with(&dataset, config, check, &mut NoopObserver)
        };

        assert!(errors_for(crossing.clone(), false).is_empty());
        assert_eq!(codes(&errors_for(crossing, true)), vec!["InvalidLineGroup.MultipleParts"]);
        assert!(errors_for(joined, true).is_empty());
    }

    #[test]
    fn test_recheck_multiple_part_issues() {
        struct Skip(i64);
        impl ContainerObserver for Skip {
            fn should_process(&mut self, _check: &str, row: &TableRow) -> bool {
                row.oid() != self.0
            }
        }

        let (dataset, table) = routes_dataset(vec![
            route(1, "A", &[(0.0, 0.0), (4.0, 0.0)]),
            route(2, "A", &[(4.0, 0.0), (6.0, 0.0)]),
            route(3, "A", &[(6.0, 0.0), (10.0, 0.0)]),
        ]);
        for recheck in [false, true] {
            let options = GroupConnectedOptions {
                recheck_multiple_part_issues: recheck,
                ..Default::default()
            };
            let check =
                GroupConnected::new(&dataset, &[table], &["ROUTE"], ShapeAllowed::None, options)
                    .unwrap();
            let config = ContainerConfig {
                tile_size: 3.0,
                ..Default::default()
            };
            let errors = run_with(&dataset, config, check, &mut Skip(2));
            assert_eq!(errors.len(), usize::from(!recheck), "recheck {recheck}");
        }
    }

    #[test]
    fn test_shape_allowed() {
        assert!(!ShapeAllowed::None.allows_cycles());
        assert!(ShapeAllowed::CyclesAndBranches.allows_branches());
        assert!(!ShapeAllowed::CyclesAndBranches.allows_inside_branches());
        assert!(ShapeAllowed::All.allows_inside_branches());
    }

    #[test]
    fn test_invalid_configuration() {
        let (mut dataset, table) = three_parts();
        let areas = dataset.add_table(FeatureTable::new(
            "areas",
            GeometryType::Polygon,
            Tolerance::default(),
        ));
        let options = GroupConnectedOptions::default;
        assert!(
            GroupConnected::new(&dataset, &[], &["ROUTE"], ShapeAllowed::None, options()).is_err()
        );
        assert!(
            GroupConnected::new(&dataset, &[table], &[], ShapeAllowed::None, options()).is_err()
        );
        let areas_only =
            GroupConnected::new(&dataset, &[areas], &["ROUTE"], ShapeAllowed::None, options());
        assert!(areas_only.is_err());
        let empty_separator = GroupConnectedOptions {
            value_separator: Some(String::new()),
            ..Default::default()
        };
        assert!(matches!(
            GroupConnected::new(
                &dataset,
                &[table],
                &["ROUTE"],
                ShapeAllowed::None,
                empty_separator,
            ),
            Err(TopoError::InvalidConfiguration { .. })
        ));
    }
}
