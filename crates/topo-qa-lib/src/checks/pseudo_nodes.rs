//! Pseudo nodes: two lines of the same table meeting end to end with equal attributes

use super::{
    NodeIndex, code, distinct_tables, is_processed, max_xy_tolerance, require_geometry_types,
};
use crate::container::{ContainerCheck, TileContext, TileInfo, TileState};
use crate::feature::{Dataset, Geometry, GeometryType, TableId, TableRow};
use crate::geometry::{distance, expand_rect, nearest_point};
use crate::issue::ErrorCollector;
use crate::{Result, TopoError};
use geo::{Coord, Rect};
use std::collections::{HashMap, HashSet};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const PREFIX: &str = "PseudoNodes";

/// Options of [`PseudoNodes`]
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct PseudoNodesOptions {
    /// Comma separated fields not compared, one list per line table. Empty compares all fields.
    /// Default: empty
    pub ignore_fields: Vec<String>,
    /// Tables whose features make a pseudo node valid: points at the node, lines through it
    /// and polygons whose boundary touches it.
    /// Default: empty
    pub valid_pseudo_node_tables: Vec<TableId>,
    /// The two ends of a closed line do not form a pseudo node.
    /// Default: false
    pub ignore_loop_endpoints: bool,
}

/// Line ends meeting at one node
#[derive(Debug, Default)]
struct NodeEnds {
    rows: Vec<TableRow>,
    done: bool,
}

/// Reports nodes connecting exactly two lines of one table whose compared attributes are equal
pub struct PseudoNodes {
    name: String,
    tables: Vec<TableId>,
    /// Upper case field names per line table
    ignore_fields: HashMap<TableId, HashSet<String>>,
    valid: Vec<TableId>,
    ignore_loop_endpoints: bool,
    tolerance: f64,
    index: NodeIndex,
    nodes: Vec<NodeEnds>,
    pending: Vec<usize>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl PseudoNodes {
    /// Create the check
    ///
    /// # Arguments
    /// * `dataset` - Dataset the tables belong to
    /// * `line_tables` - Tables of the network lines
    /// * `options` - Ignored fields and valid pseudo node tables
    pub fn new(
        dataset: &Dataset,
        line_tables: &[TableId],
        options: PseudoNodesOptions,
    ) -> Result<Self> {
        if line_tables.is_empty() {
            return Err(TopoError::config("at least one line table is required"));
        }
        if !options.ignore_fields.is_empty() && options.ignore_fields.len() != line_tables.len() {
            return Err(TopoError::config(format!(
                "number of line tables ({}) != number of ignore field lists ({})",
                line_tables.len(),
                options.ignore_fields.len()
            )));
        }
        require_geometry_types(dataset, line_tables, &[GeometryType::Polyline], "line")?;
        for &table in &options.valid_pseudo_node_tables {
            dataset.table(table)?;
        }

        let mut ignore_fields: HashMap<TableId, HashSet<String>> = HashMap::new();
        for (&table, list) in line_tables.iter().zip(&options.ignore_fields) {
            ignore_fields.entry(table).or_default().extend(
                list.split(',')
                    .map(|f| f.trim().to_uppercase())
                    .filter(|f| !f.is_empty()),
            );
        }
        let tables = distinct_tables(line_tables.iter().copied());
        let tolerance = max_xy_tolerance(dataset, &tables)?;
        let names = tables
            .iter()
            .map(|&t| dataset.table(t).map(|t| t.name().to_string()))
            .collect::<Result<Vec<_>>>()?;
        let name = format!("PseudoNodes({})", names.join(","));
        tracing::debug!(
            check = %name,
            valid_tables = options.valid_pseudo_node_tables.len(),
            ignore_loop_endpoints = options.ignore_loop_endpoints,
            "Check configured"
        );

        Ok(Self {
            name,
            ignore_fields,
            tables,
            valid: options.valid_pseudo_node_tables,
            ignore_loop_endpoints: options.ignore_loop_endpoints,
            tolerance,
            index: NodeIndex::new(tolerance),
            nodes: Vec::new(),
            pending: Vec::new(),
        })
    }

    fn add_end(&mut self, point: Coord<f64>, row: &TableRow) {
        let node = self.index.node(point);
        if node == self.nodes.len() {
            self.nodes.push(NodeEnds::default());
            self.pending.push(node);
        }
        let ends = &mut self.nodes[node];
        if ends.done {
            tracing::warn!(oid = row.oid(), "Line end at an already verified node");
            return;
        }
        ends.rows.push(row.clone());
    }

    /// The two lines of a pseudo node
    fn pseudo_node_lines<'a>(
        &self,
        rows: &'a [TableRow],
    ) -> Option<(&'a TableRow, &'a TableRow)> {
        let [line1, line2] = rows else {
            return None;
        };
        if line1.table != line2.table {
            return None;
        }
        if self.ignore_loop_endpoints && line1.key() == line2.key() {
            return None;
        }
        let ignored = self.ignore_fields.get(&line1.table);
        let compared = line1
            .feature
            .fields()
            .chain(line2.feature.fields())
            .map(|(field, _)| field)
            .filter(|field| ignored.is_none_or(|ignored| !ignored.contains(*field)));
        for field in compared {
            if !line1.feature.attribute(field).same_as(line2.feature.attribute(field)) {
                return None;
            }
        }
        Some((line1, line2))
    }

    /// True if a feature of a valid pseudo node table is at `point`
    fn is_valid(&self, point: Coord<f64>, ctx: &TileContext<'_>) -> bool {
        let area = expand_rect(Rect::new(point, point), self.tolerance);
        self.valid.iter().any(|&table| {
            ctx.search(table, area).iter().any(|row| match &row.feature.geometry {
                Geometry::Point(_) | Geometry::MultiPoint(_) => row
                    .feature
                    .geometry
                    .point_coords()
                    .iter()
                    .any(|&p| distance(p, point) <= self.tolerance),
                geometry => geometry
                    .linear()
                    .and_then(|lines| nearest_point(point, &lines))
                    .is_some_and(|nearest| nearest.distance <= self.tolerance),
            })
        })
    }

    fn check_node(&self, node: usize, ctx: &TileContext<'_>, errors: &mut ErrorCollector) {
        let Some((line1, line2)) = self.pseudo_node_lines(&self.nodes[node].rows) else {
            return;
        };
        let point = self.index.point(node);
        if self.is_valid(point, ctx) {
            tracing::trace!(x = point.x, y = point.y, "Valid pseudo node");
            return;
        }
        errors.report(
            "Pseudo Node",
            &[line1, line2],
            Some(Geometry::point(point.x, point.y)),
            code(PREFIX, "PseudoNode"),
            None,
        );
    }

    fn reset(&mut self) {
        self.index = NodeIndex::new(self.tolerance);
        self.nodes.clear();
        self.pending.clear();
    }
}

impl ContainerCheck for PseudoNodes {
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
        let Some(lines) = row.feature.geometry.as_lines() else {
            return Ok(());
        };
        for line in &lines.0 {
            if let (Some(&from), Some(&to)) = (line.0.first(), line.0.last())
                && line.0.len() >= 2
            {
                self.add_end(from, row);
                self.add_end(to, row);
            }
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
            self.reset();
            return Ok(());
        }
        let last = tile.state == TileState::Final;
        let (ready, pending): (Vec<usize>, Vec<usize>) =
            std::mem::take(&mut self.pending).into_iter().partition(|&node| {
                last || tile.current_box.is_some_and(|tile_box| {
                    is_processed(self.index.point(node), self.tolerance, tile_box, tile.all_box)
                })
            });
        for &node in &ready {
            self.check_node(node, ctx, errors);
            self.nodes[node].done = true;
        }
        self.pending = pending;
        if self.pending.is_empty() {
            self.reset();
        }
        Ok(())
    }
}
