//! Check implementations
//!
//! Every check implements [`ContainerCheck`](crate::ContainerCheck), validates its configuration
//! when it is constructed and reports issues whose codes carry the check's prefix, e.g.
//! `Gaps.SliverRatioTooLarge`.
//!
//! | Check | Prefix |
//! |-------|--------|
//! | [`TopoNotNear`] | `NearCoincidence` |
//! | [`EdgeMatchBorderingLines`] | `BorderingLines` |
//! | [`EdgeMatchCrossingLines`] | `CrossingLines` |
//! | [`FullCoincidence`] | `FullCoincidence` |
//! | [`NoGaps`] | `Gaps` |
//! | [`GroupConnected`] | `ConnectedLineGroups` |
//! | [`PseudoNodes`] | `PseudoNodes` |
//! | [`CoveredByOther`] | `CoveredByOther` |

mod covered_by_other;
mod edge_match;
mod full_coincidence;
mod group_connected;
mod no_gaps;
mod pseudo_nodes;
mod topo_not_near;

pub use covered_by_other::{CoveredByOther, CoveredByOtherOptions};
pub use edge_match::{
    BorderingLinesOptions, CrossingLinesOptions, EdgeMatchBorderingLines, EdgeMatchCrossingLines,
    EdgeMatchTables,
};
pub use full_coincidence::{FullCoincidence, FullCoincidenceOptions};
pub use group_connected::{ErrorReporting, GroupConnected, GroupConnectedOptions, ShapeAllowed};
pub use no_gaps::{NoGaps, NoGapsOptions};
pub use pseudo_nodes::{PseudoNodes, PseudoNodesOptions};
pub use topo_not_near::{ConnectionMode, TopoNotNear, TopoNotNearOptions};

use crate::expression::Predicate;
use crate::feature::{Dataset, GeometryType, TableId, TableRow};
use crate::issue::IssueCode;
use crate::{Result, TopoError};
use crate::geometry::distance;
use geo::{BooleanOps, Coord, MultiLineString, MultiPolygon, Rect};
use std::collections::HashMap;

pub(crate) fn code(prefix: &str, local: &str) -> Option<IssueCode> {
    Some(IssueCode::new(prefix, local))
}

/// Length or distance as shown in issue descriptions
pub(crate) fn format_length(value: f64) -> String {
    format!("{value:.2}")
}

/// Linear geometry of a row; polygons contribute their boundary
pub(crate) fn row_lines(row: &TableRow) -> Option<MultiLineString<f64>> {
    row.feature
        .geometry
        .linear()
        .filter(|lines| lines.0.iter().any(|l| l.0.len() >= 2))
}

/// True once every tile that may hold rows reaching `point` (within `tolerance`) is done
///
/// Tiles are processed row by row from the bottom, left to right within a row. `tile` is the
/// tile completed last.
pub(crate) fn is_processed(
    point: Coord<f64>,
    tolerance: f64,
    tile: Rect<f64>,
    all_box: Rect<f64>,
) -> bool {
    let corner = Coord {
        x: (point.x + tolerance).min(all_box.max().x),
        y: (point.y + tolerance).min(all_box.max().y),
    };
    if corner.y < tile.min().y {
        return true;
    }
    let top_row = tile.max().y >= all_box.max().y;
    let last_column = tile.max().x >= all_box.max().x;
    (corner.y < tile.max().y || top_row) && (corner.x < tile.max().x || last_column)
}

/// Clusters points coinciding within a tolerance into numbered nodes
#[derive(Debug, Clone)]
pub(crate) struct NodeIndex {
    cell: f64,
    tolerance: f64,
    cells: HashMap<(i64, i64), Vec<usize>>,
    nodes: Vec<Coord<f64>>,
}

impl NodeIndex {
    pub fn new(tolerance: f64) -> Self {
        Self {
            cell: tolerance.max(f64::EPSILON),
            tolerance,
            cells: HashMap::new(),
            nodes: Vec::new(),
        }
    }

    fn cell_of(&self, p: Coord<f64>) -> (i64, i64) {
        ((p.x / self.cell).floor() as i64, (p.y / self.cell).floor() as i64)
    }

    /// Node of `p`; the first point of a node is its location
    pub fn node(&mut self, p: Coord<f64>) -> usize {
        let (cx, cy) = self.cell_of(p);
        for dx in -1..=1 {
            for dy in -1..=1 {
                let Some(candidates) = self.cells.get(&(cx + dx, cy + dy)) else {
                    continue;
                };
                if let Some(&n) = candidates
                    .iter()
                    .find(|&&n| distance(self.nodes[n], p) <= self.tolerance)
                {
                    return n;
                }
            }
        }
        let n = self.nodes.len();
        self.nodes.push(p);
        self.cells.entry((cx, cy)).or_default().push(n);
        n
    }

    pub fn point(&self, node: usize) -> Coord<f64> {
        self.nodes[node]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

/// Union of polygons
pub(crate) fn union_all(
    polygons: impl IntoIterator<Item = MultiPolygon<f64>>,
) -> MultiPolygon<f64> {
    polygons
        .into_iter()
        .fold(MultiPolygon::new(Vec::new()), |acc, p| {
            if acc.0.is_empty() {
                p
            } else {
                acc.union(&p)
            }
        })
}

/// Tables without duplicates, in first occurrence order
pub(crate) fn distinct_tables(tables: impl IntoIterator<Item = TableId>) -> Vec<TableId> {
    let mut result: Vec<TableId> = Vec::new();
    for table in tables {
        if !result.contains(&table) {
            result.push(table);
        }
    }
    result
}

/// Fail unless every table exists and has one of the `allowed` geometry types
pub(crate) fn require_geometry_types(
    dataset: &Dataset,
    tables: &[TableId],
    allowed: &[GeometryType],
    role: &str,
) -> Result<()> {
    for &table in tables {
        let t = dataset.table(table)?;
        if !allowed.contains(&t.geometry_type()) {
            return Err(TopoError::config(format!(
                "{role} table '{}' has geometry type {:?}, expected one of {allowed:?}",
                t.name(),
                t.geometry_type()
            )));
        }
    }
    Ok(())
}

/// Largest xy tolerance among `tables`
pub(crate) fn max_xy_tolerance(dataset: &Dataset, tables: &[TableId]) -> Result<f64> {
    let mut tolerance = 0.0_f64;
    for &table in tables {
        tolerance = tolerance.max(dataset.table(table)?.tolerance().xy_tolerance);
    }
    Ok(tolerance)
}

/// Conditions given either once for all tables or once per table
#[derive(Debug, Clone, Default)]
pub(crate) struct PerTableConditions {
    conditions: Vec<Option<Predicate>>,
}

impl PerTableConditions {
    /// Parse the conditions, failing if there are more than one and not exactly `table_count`
    pub fn parse(
        conditions: &[String],
        table_count: usize,
        aliases: &[&str],
        what: &str,
    ) -> Result<Self> {
        if conditions.len() > 1 && conditions.len() != table_count {
            return Err(TopoError::config(format!(
                "{} {what} given for {table_count} tables; expected none, one, or one per table",
                conditions.len()
            )));
        }
        let conditions = conditions
            .iter()
            .map(|c| Predicate::parse_optional(Some(c), aliases))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { conditions })
    }

    /// Condition of the table at `index` among the check's tables
    pub fn get(&self, index: usize) -> Option<&Predicate> {
        match self.conditions.len() {
            0 => None,
            1 => self.conditions[0].as_ref(),
            _ => self.conditions.get(index)?.as_ref(),
        }
    }
}
