//! Lines ending on the border must continue on the other side

use super::{EdgeMatchRules, EdgeMatchTables, RuleTexts, Side};
use crate::checks::{code, format_length, row_lines};
use crate::container::{ContainerCheck, TileContext};
use crate::feature::{Dataset, Geometry, TableId, TableRow};
use crate::geometry::{distance, expand_rect, is_within_tolerance, nearest_point, point_at};
use crate::issue::ErrorCollector;
use crate::{Result, TopoError};
use geo::{Coord, LineString, MultiLineString, MultiPoint, Point, Rect};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const PREFIX: &str = "CrossingLines";

/// Options of [`EdgeMatchCrossingLines`]
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct CrossingLinesOptions {
    /// Condition a class 1 line and its border must fulfil (`LINE.`, `BORDER.`)
    /// Default: None
    pub line_class1_border_match_condition: Option<String>,
    /// Condition a class 2 line and its border must fulfil (`LINE.`, `BORDER.`)
    /// Default: None
    pub line_class2_border_match_condition: Option<String>,
    /// Condition for a class 1 and a class 2 line to be connected at all (`LINE1.`, `LINE2.`)
    /// Default: None
    pub crossing_line_match_condition: Option<String>,
    /// Condition connected lines must fulfil (`LINE1.`, `LINE2.`)
    /// Default: None
    pub crossing_line_attribute_constraint: Option<String>,
    /// Fields that must be equal for connected lines, as `FIELD[:Label], ...`
    /// Default: None
    pub crossing_line_equal_attributes: Option<String>,
    /// The attribute constraint is also fulfilled with the two lines swapped.
    /// Default: false
    pub is_crossing_line_attribute_constraint_symmetric: bool,
    /// Connections to a candidate shorter than this are reported as points instead of lines.
    /// Default: 0
    pub minimum_error_connection_line_length: f64,
    /// Candidates whose border end point is farther away than this are reported as
    /// `EndPointOutsideTolerance`; 0 for no limit.
    /// Default: 0
    pub maximum_end_point_connection_distance: f64,
    /// Distance up to which two end points on the border are connected; negative values use
    /// the xy tolerance.
    /// Default: 0
    pub coincidence_tolerance: f64,
    /// Do not report line ends without any candidate within the search distance.
    /// Default: false
    pub allow_no_feature_within_search_distance: bool,
    /// Do not report line ends without any candidate if another line of the same class is
    /// connected there.
    /// Default: true
    pub allow_no_feature_within_search_distance_if_connected_on_same_side: bool,
    /// Do not report candidates whose borders are not coincident.
    /// Default: false
    pub allow_disjoint_candidate_feature_if_borders_are_not_coincident: bool,
    /// Do not report candidates that fulfil all attribute rules.
    /// Default: false
    pub allow_disjoint_candidate_feature_if_attribute_constraints_are_fulfilled: bool,
    /// A line end on the interior of a matching line of the other class, lying on that
    /// line's border, counts as connected.
    /// Default: false
    pub allow_end_points_connecting_to_interior_of_valid_neighbor_line: bool,
    /// Ends whose last segment runs along the border are not checked.
    /// Default: true
    pub ignore_end_points_of_bordering_lines: bool,
    /// Neighbour lines whose border ends are all outside the search distance are no
    /// candidates.
    /// Default: true
    pub ignore_neighbor_lines_with_border_connection_outside_search_distance: bool,
    /// Skip the attribute rules where three or more lines meet.
    /// Default: false
    pub ignore_attribute_constraints_if_three_or_more_connected: bool,
    /// Report each broken attribute rule as an issue of its own.
    /// Default: false
    pub report_individual_attribute_constraint_violations: bool,
}

impl Default for CrossingLinesOptions {
    fn default() -> Self {
        Self {
            line_class1_border_match_condition: None,
            line_class2_border_match_condition: None,
            crossing_line_match_condition: None,
            crossing_line_attribute_constraint: None,
            crossing_line_equal_attributes: None,
            is_crossing_line_attribute_constraint_symmetric: false,
            minimum_error_connection_line_length: 0.0,
            maximum_end_point_connection_distance: 0.0,
            coincidence_tolerance: 0.0,
            allow_no_feature_within_search_distance: false,
            allow_no_feature_within_search_distance_if_connected_on_same_side: true,
            allow_disjoint_candidate_feature_if_borders_are_not_coincident: false,
            allow_disjoint_candidate_feature_if_attribute_constraints_are_fulfilled: false,
            allow_end_points_connecting_to_interior_of_valid_neighbor_line: false,
            ignore_end_points_of_bordering_lines: true,
            ignore_neighbor_lines_with_border_connection_outside_search_distance: true,
            ignore_attribute_constraints_if_three_or_more_connected: false,
            report_individual_attribute_constraint_violations: false,
        }
    }
}

/// A line end on a matching border of its class
#[derive(Debug, Clone)]
struct BorderConnection {
    point: Coord<f64>,
    borders: Vec<MultiLineString<f64>>,
}

/// A line of the other class near a line end, not connected to it
struct Candidate {
    row: TableRow,
    connection: BorderConnection,
    distance: f64,
}

/// Lines of two data sets crossing their common border
///
/// Every line end on the border of its class must meet the end of a matching line of the
/// other class, and connected lines must fulfil the attribute rules.
pub struct EdgeMatchCrossingLines {
    name: String,
    rules: EdgeMatchRules,
    search_distance: f64,
    coincidence_tolerance: f64,
    options: CrossingLinesOptions,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl EdgeMatchCrossingLines {
    /// Create the check
    ///
    /// # Arguments
    /// * `dataset` - Dataset the tables belong to
    /// * `tables` - Line and border tables of both classes
    /// * `search_distance` - Distance within which lines of the other class are candidates
    /// * `options` - Conditions and flags
    pub fn new(
        dataset: &Dataset,
        tables: EdgeMatchTables,
        search_distance: f64,
        options: CrossingLinesOptions,
    ) -> Result<Self> {
        if !(search_distance >= 0.0) || !search_distance.is_finite() {
            return Err(TopoError::config(format!(
                "search distance must be >= 0, got {search_distance}"
            )));
        }
        if !(options.minimum_error_connection_line_length >= 0.0) {
            return Err(TopoError::config(
                "minimum error connection line length must be >= 0",
            ));
        }
        let rules = EdgeMatchRules::new(
            dataset,
            tables,
            RuleTexts {
                border_match: [
                    options.line_class1_border_match_condition.as_deref(),
                    options.line_class2_border_match_condition.as_deref(),
                ],
                line_match: options.crossing_line_match_condition.as_deref(),
                attribute_constraint: options.crossing_line_attribute_constraint.as_deref(),
                constraint_symmetric: options.is_crossing_line_attribute_constraint_symmetric,
                equal_attributes: options.crossing_line_equal_attributes.as_deref(),
                report_individually: options.report_individual_attribute_constraint_violations,
            },
        )?;
        let coincidence_tolerance = if options.coincidence_tolerance < 0.0 {
            rules.xy_tolerance()
        } else {
            options.coincidence_tolerance
        };
        let name = format!(
            "EdgeMatchCrossingLines({},{})",
            dataset.table(tables.line1)?.name(),
            dataset.table(tables.line2)?.name()
        );
        tracing::debug!(check = %name, search_distance, coincidence_tolerance, "Check configured");
        Ok(Self {
            name,
            rules,
            search_distance,
            coincidence_tolerance,
            options,
        })
    }

    fn near(&self, p: Coord<f64>, lines: &MultiLineString<f64>) -> bool {
        nearest_point(p, lines).is_some_and(|n| n.distance <= self.rules.xy_tolerance())
    }

    fn on_any(&self, p: Coord<f64>, borders: &[MultiLineString<f64>]) -> bool {
        borders.iter().any(|b| self.near(p, b))
    }

    /// Ends of `lines` (the geometry of `row`, class `side`) on a matching border
    fn border_connections(
        &self,
        ctx: &TileContext<'_>,
        side: Side,
        row: &TableRow,
        lines: &MultiLineString<f64>,
    ) -> Vec<BorderConnection> {
        let mut connections = Vec::new();
        for line in &lines.0 {
            let coords = &line.0;
            let n = coords.len();
            if n < 2 {
                continue;
            }
            for (end, next) in [(coords[0], coords[1]), (coords[n - 1], coords[n - 2])] {
                let borders: Vec<MultiLineString<f64>> = self
                    .rules
                    .matching_borders(ctx, side, &row.feature, Rect::new(end, end))
                    .into_iter()
                    .map(|(_, b)| b)
                    .filter(|b| self.near(end, b))
                    .collect();
                if borders.is_empty() {
                    continue;
                }
                if self.options.ignore_end_points_of_bordering_lines
                    && self.on_any(point_at(end, next, 0.5), &borders)
                    && self.on_any(next, &borders)
                {
                    continue;
                }
                connections.push(BorderConnection {
                    point: end,
                    borders,
                });
            }
        }
        connections
    }

    fn check_connection(
        &self,
        ctx: &TileContext<'_>,
        side: Side,
        row: &TableRow,
        connection: &BorderConnection,
        errors: &mut ErrorCollector,
    ) {
        let xy = self.rules.xy_tolerance();
        let e = connection.point;
        let point_box = Rect::new(e, e);

        let same_side: Vec<TableRow> = ctx
            .search(self.rules.line_table(side), expand_rect(point_box, xy))
            .into_iter()
            .filter(|r| r.key() != row.key())
            .filter(|r| row_lines(r).is_some_and(|l| self.near(e, &l)))
            .filter(|r| !self.rules.lines_match(side, &row.feature, &r.feature))
            .collect();

        let other = side.other();
        let reach = self.search_distance.max(self.coincidence_tolerance);
        let mut connected: Vec<TableRow> = Vec::new();
        let mut interior: Vec<TableRow> = Vec::new();
        let mut candidates: Vec<Candidate> = Vec::new();

        for neighbor in ctx.search(self.rules.line_table(other), expand_rect(point_box, reach + xy))
        {
            if !self.rules.lines_match(side, &row.feature, &neighbor.feature) {
                continue;
            }
            let Some(neighbor_lines) = row_lines(&neighbor) else {
                continue;
            };
            let Some(nearest) = nearest_point(e, &neighbor_lines) else {
                continue;
            };
            if nearest.distance > reach {
                continue;
            }

            let mut is_connected = false;
            let mut closest: Option<(BorderConnection, f64)> = None;
            for c in self.border_connections(ctx, other, &neighbor, &neighbor_lines) {
                let d = distance(e, c.point);
                if is_within_tolerance(d, self.coincidence_tolerance, &self.rules.tolerance) {
                    is_connected = true;
                    break;
                }
                if d > self.search_distance
                    && self
                        .options
                        .ignore_neighbor_lines_with_border_connection_outside_search_distance
                {
                    continue;
                }
                if closest.as_ref().is_none_or(|(_, best)| d < *best) {
                    closest = Some((c, d));
                }
            }

            if is_connected {
                connected.push(neighbor);
            } else if self
                .options
                .allow_end_points_connecting_to_interior_of_valid_neighbor_line
                && nearest.distance <= xy
                && self.on_neighbor_border(ctx, other, &neighbor, e)
            {
                interior.push(neighbor);
            } else if let Some((connection, distance)) = closest {
                candidates.push(Candidate {
                    row: neighbor,
                    connection,
                    distance,
                });
            }
        }

        if !connected.is_empty() || !interior.is_empty() {
            let count = 1 + same_side.len() + connected.len() + interior.len();
            if count >= 3
                && self
                    .options
                    .ignore_attribute_constraints_if_three_or_more_connected
            {
                return;
            }
            // pairs connected at both ends are reported from the class 1 line only
            let pairs = interior
                .iter()
                .chain(connected.iter().filter(|_| side == Side::One));
            for neighbor in pairs {
                for violation in self.rules.violations(side, &row.feature, &neighbor.feature) {
                    errors.report(
                        violation.description,
                        &[row, neighbor],
                        Some(Geometry::Point(Point(e))),
                        code(PREFIX, "Match.ConstraintsNotFulfilled"),
                        Some(&violation.affected_component),
                    );
                }
            }
            return;
        }

        if candidates.is_empty() {
            if self.options.allow_no_feature_within_search_distance {
                return;
            }
            let (local, description) = if same_side.is_empty() {
                ("NoMatch.NoCandidate", "No crossing line within search distance")
            } else if self
                .options
                .allow_no_feature_within_search_distance_if_connected_on_same_side
            {
                return;
            } else {
                (
                    "NoMatch.NoCandidate.ConnectedOnSameSide",
                    "No crossing line within search distance, connected to a line on the same side",
                )
            };
            errors.report(
                description,
                &[row],
                Some(Geometry::Point(Point(e))),
                code(PREFIX, local),
                None,
            );
            return;
        }

        for candidate in candidates {
            self.report_candidate(side, row, connection, &candidate, errors);
        }
    }

    /// Check if `p` lies on a border of class `side` matching the line `neighbor`
    fn on_neighbor_border(
        &self,
        ctx: &TileContext<'_>,
        side: Side,
        neighbor: &TableRow,
        p: Coord<f64>,
    ) -> bool {
        self.rules
            .matching_borders(ctx, side, &neighbor.feature, Rect::new(p, p))
            .iter()
            .any(|(_, b)| self.near(p, b))
    }

    fn report_candidate(
        &self,
        side: Side,
        row: &TableRow,
        own: &BorderConnection,
        candidate: &Candidate,
        errors: &mut ErrorCollector,
    ) {
        let borders_coincident = self.on_any(own.point, &candidate.connection.borders)
            && self.on_any(candidate.connection.point, &own.borders);
        if !borders_coincident
            && self
                .options
                .allow_disjoint_candidate_feature_if_borders_are_not_coincident
        {
            return;
        }
        let violations = self.rules.violations(side, &row.feature, &candidate.row.feature);
        if violations.is_empty()
            && self
                .options
                .allow_disjoint_candidate_feature_if_attribute_constraints_are_fulfilled
        {
            return;
        }

        let maximum = self.options.maximum_end_point_connection_distance;
        let within = maximum <= 0.0 || candidate.distance <= maximum;
        let mut qualifier = String::new();
        if !within {
            qualifier.push_str("EndPointOutsideTolerance+");
        }
        if !borders_coincident {
            qualifier.push_str("BordersNotCoincident+");
        }

        let mut description = format!(
            "No connected crossing line, candidate within search distance (end point distance {})",
            format_length(candidate.distance)
        );
        if !within {
            description.push_str(", end point outside tolerance");
        }
        if !borders_coincident {
            description.push_str(", borders not coincident");
        }

        // class 1 end first, so that both lines of the pair report the same geometry
        let (from, to) = match side {
            Side::One => (own.point, candidate.connection.point),
            Side::Two => (candidate.connection.point, own.point),
        };
        let geometry = if distance(from, to) < self.options.minimum_error_connection_line_length {
            Geometry::MultiPoint(MultiPoint::from(vec![Point(from), Point(to)]))
        } else {
            Geometry::Polyline(MultiLineString::new(vec![LineString::new(vec![from, to])]))
        };
        let rows = [row, &candidate.row];

        if violations.is_empty() {
            errors.report(
                description,
                &rows,
                Some(geometry),
                code(
                    PREFIX,
                    &format!("NoMatch.CandidateExists.{qualifier}ConstraintsFulfilled"),
                ),
                None,
            );
            return;
        }
        for violation in violations {
            errors.report(
                format!("{description}. {}", violation.description),
                &rows,
                Some(geometry.clone()),
                code(
                    PREFIX,
                    &format!("NoMatch.CandidateExists.{qualifier}ConstraintsNotFulfilled"),
                ),
                Some(&violation.affected_component),
            );
        }
    }
}

impl ContainerCheck for EdgeMatchCrossingLines {
    fn name(&self) -> &str {
        &self.name
    }

    fn tables(&self) -> &[TableId] {
        &self.rules.all_tables
    }

    fn search_distance(&self) -> f64 {
        self.search_distance.max(self.coincidence_tolerance) + self.rules.xy_tolerance()
    }

    fn execute_row(
        &mut self,
        row: &TableRow,
        ctx: &TileContext<'_>,
        errors: &mut ErrorCollector,
    ) -> Result<()> {
        let Some(side) = self.rules.side_of(row.table) else {
            return Ok(());
        };
        let Some(lines) = row_lines(row) else {
            return Ok(());
        };
        let connections = self.border_connections(ctx, side, row, &lines);
        tracing::trace!(
            oid = row.oid(),
            ?side,
            connections = connections.len(),
            "Checking crossing line"
        );
        for connection in &connections {
            self.check_connection(ctx, side, row, connection, errors);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerConfig, NoopObserver, TestContainer};
    use crate::feature::{Feature, FeatureTable, GeometryType};
    use crate::geometry::Tolerance;
    use crate::issue::QaError;

    fn line(oid: i64, state: &str, coords: &[(f64, f64)]) -> Feature {
        Feature::new(oid, Geometry::line(coords)).with_attribute("STATE", state)
    }

    fn table(name: &str, features: Vec<Feature>) -> FeatureTable {
        let mut table = FeatureTable::new(name, GeometryType::Polyline, Tolerance::default());
        for f in features {
            table.add(f).unwrap();
        }
        table
    }

    fn dataset_with_border2(
        border2_y: f64,
        lines1: Vec<Feature>,
        lines2: Vec<Feature>,
    ) -> (Dataset, EdgeMatchTables) {
        let mut dataset = Dataset::new();
        let line1 = dataset.add_table(table("line1", lines1));
        let border1 = dataset.add_table(table(
            "border1",
            vec![line(1, "A", &[(0.0, 0.0), (10.0, 0.0)])],
        ));
        let line2 = dataset.add_table(table("line2", lines2));
        let border2 = dataset.add_table(table(
            "border2",
            vec![line(1, "B", &[(10.0, border2_y), (0.0, border2_y)])],
        ));
        (dataset, EdgeMatchTables::new(line1, border1, line2, border2))
    }

    fn dataset(lines1: Vec<Feature>, lines2: Vec<Feature>) -> (Dataset, EdgeMatchTables) {
        dataset_with_border2(0.0, lines1, lines2)
    }

    fn options() -> CrossingLinesOptions {
        CrossingLinesOptions {
            line_class1_border_match_condition: Some("LINE.STATE = BORDER.STATE".into()),
            line_class2_border_match_condition: Some("LINE.STATE = BORDER.STATE".into()),
            crossing_line_match_condition: Some("LINE1.STATE <> LINE2.STATE".into()),
            ..Default::default()
        }
    }

    fn swapped(tables: EdgeMatchTables) -> EdgeMatchTables {
        EdgeMatchTables::new(tables.line2, tables.border2, tables.line1, tables.border1)
    }

    fn run(
        dataset: &Dataset,
        tables: EdgeMatchTables,
        options: &CrossingLinesOptions,
    ) -> Vec<QaError> {
        let mut result: Option<Vec<QaError>> = None;
        for tile_size in [1000.0, 5.0] {
            let check = EdgeMatchCrossingLines::new(dataset, tables, 0.5, options.clone()).unwrap();
            let mut container = TestContainer::new(
                dataset.clone(),
                ContainerConfig {
                    tile_size,
                    ..Default::default()
                },
            );
            container.add_check(Box::new(check)).unwrap();
            let errors = container.execute(&mut NoopObserver).unwrap();
            if let Some(previous) = &result {
                assert_eq!(codes(previous), codes(&errors), "tile size {tile_size}");
            }
            result = Some(errors);
        }
        result.unwrap_or_default()
    }

    fn codes(errors: &[QaError]) -> Vec<&str> {
        let mut codes: Vec<&str> = errors
            .iter()
            .filter_map(|e| e.issue_code.as_ref().map(|c| c.local()))
            .collect();
        codes.sort_unstable();
        codes
    }

    #[test]
    fn test_connected_lines() {
        let (dataset, tables) = dataset(
            vec![line(1, "A", &[(5.0, 0.0), (5.0, 5.0)])],
            vec![line(1, "B", &[(5.0, 0.0), (5.0, -5.0)])],
        );
        assert!(run(&dataset, tables, &options()).is_empty());
    }

    #[test]
    fn test_attribute_constraint() {
        let (dataset, tables) = dataset(
            vec![
                line(1, "A", &[(5.0, 0.0), (5.0, 5.0)])
                    .with_attribute("FLD_DOUBLE", 3.0)
                    .with_attribute("FLD_TEXT", "X"),
            ],
            vec![
                line(1, "B", &[(5.0, 0.0), (5.0, -5.0)])
                    .with_attribute("FLD_DOUBLE", 1.0)
                    .with_attribute("FLD_TEXT", "Y"),
            ],
        );
        let options = CrossingLinesOptions {
            crossing_line_attribute_constraint: Some(
                "(LINE1.FLD_DOUBLE = 2 * LINE2.FLD_DOUBLE) \
                 OR (LINE2.FLD_DOUBLE = 2 * LINE1.FLD_DOUBLE)"
                    .into(),
            ),
            crossing_line_equal_attributes: Some("FLD_TEXT".into()),
            ..options()
        };
        let errors = run(&dataset, tables, &options);
        assert_eq!(codes(&errors), ["Match.ConstraintsNotFulfilled"]);
        assert_eq!(errors[0].affected_component.as_deref(), Some("FLD_DOUBLE FLD_TEXT"));
        assert_eq!(errors[0].involved_rows.len(), 2);

        let individual = CrossingLinesOptions {
            report_individual_attribute_constraint_violations: true,
            ..options
        };
        assert_eq!(run(&dataset, tables, &individual).len(), 2);
    }

    #[test]
    fn test_no_candidate() {
        let (dataset, tables) = dataset(vec![line(1, "A", &[(5.0, 0.0), (5.0, 5.0)])], vec![]);
        let errors = run(&dataset, tables, &options());
        assert_eq!(codes(&errors), ["NoMatch.NoCandidate"]);
        assert!(matches!(errors[0].geometry, Some(Geometry::Point(_))));

        let allowed = CrossingLinesOptions {
            allow_no_feature_within_search_distance: true,
            ..options()
        };
        assert!(run(&dataset, tables, &allowed).is_empty());
    }

    #[test]
    fn test_connected_on_same_side() {
        let (dataset, tables) = dataset(
            vec![
                line(1, "A", &[(5.0, 0.0), (5.0, 5.0)]),
                line(2, "A", &[(5.0, 0.0), (7.0, 5.0)]),
            ],
            vec![],
        );
        assert!(run(&dataset, tables, &options()).is_empty());

        let strict = CrossingLinesOptions {
            allow_no_feature_within_search_distance_if_connected_on_same_side: false,
            ..options()
        };
        assert_eq!(
            codes(&run(&dataset, tables, &strict)),
            [
                "NoMatch.NoCandidate.ConnectedOnSameSide",
                "NoMatch.NoCandidate.ConnectedOnSameSide"
            ]
        );
    }

    #[test]
    fn test_border_match_condition_not_fulfilled() {
        let (dataset, tables) = dataset(
            vec![line(1, "X", &[(5.0, 0.0), (5.0, 5.0)])],
            vec![line(1, "Y", &[(4.0, 0.0), (4.0, -5.0)])],
        );
        assert!(run(&dataset, tables, &options()).is_empty());
    }

    #[test]
    fn test_non_connected_candidate() {
        let (dataset, tables) = dataset(
            vec![line(1, "A", &[(5.0, 0.0), (5.0, 5.0)])],
            vec![line(1, "B", &[(4.9, 0.0), (5.0, -5.0)])],
        );
        for tables in [tables, swapped(tables)] {
            let errors = run(&dataset, tables, &options());
            assert_eq!(codes(&errors), ["NoMatch.CandidateExists.ConstraintsFulfilled"]);
            assert_eq!(errors[0].involved_rows.len(), 2);
            assert!(matches!(errors[0].geometry, Some(Geometry::Polyline(_))));
        }

        let tolerant = CrossingLinesOptions {
            coincidence_tolerance: 0.11,
            ..options()
        };
        assert!(run(&dataset, tables, &tolerant).is_empty());

        let as_points = CrossingLinesOptions {
            minimum_error_connection_line_length: 0.2,
            ..options()
        };
        let errors = run(&dataset, tables, &as_points);
        assert!(matches!(errors[0].geometry, Some(Geometry::MultiPoint(_))));

        let limited = CrossingLinesOptions {
            maximum_end_point_connection_distance: 0.05,
            ..options()
        };
        assert_eq!(
            codes(&run(&dataset, tables, &limited)),
            ["NoMatch.CandidateExists.EndPointOutsideTolerance+ConstraintsFulfilled"]
        );

        let allow_fulfilled = CrossingLinesOptions {
            allow_disjoint_candidate_feature_if_attribute_constraints_are_fulfilled: true,
            ..options()
        };
        assert!(run(&dataset, tables, &allow_fulfilled).is_empty());
    }

    #[test]
    fn test_borders_not_coincident() {
        let (dataset, tables) = dataset_with_border2(
            -0.3,
            vec![line(1, "A", &[(5.0, 0.0), (5.0, 5.0)])],
            vec![line(1, "B", &[(5.0, -0.3), (5.0, -5.0)])],
        );
        let errors = run(&dataset, tables, &options());
        assert_eq!(
            codes(&errors),
            ["NoMatch.CandidateExists.BordersNotCoincident+ConstraintsFulfilled"]
        );

        let allowed = CrossingLinesOptions {
            allow_disjoint_candidate_feature_if_borders_are_not_coincident: true,
            ..options()
        };
        assert!(run(&dataset, tables, &allowed).is_empty());
    }

    #[test]
    fn test_small_border_gap_within_coincidence_tolerance() {
        let (dataset, tables) = dataset_with_border2(
            -0.1,
            vec![line(1, "A", &[(5.0, 0.0), (5.0, 5.0)])],
            vec![line(1, "B", &[(5.0, -0.1), (5.0, -5.0)])],
        );
        let options = CrossingLinesOptions {
            coincidence_tolerance: 0.11,
            ..options()
        };
        assert!(run(&dataset, tables, &options).is_empty());
    }

    #[test]
    fn test_neighbor_not_ending_on_border() {
        let (dataset, tables) = dataset(
            vec![line(1, "A", &[(5.0, 0.0), (5.0, 5.0)])],
            vec![line(1, "B", &[(5.0, 0.1), (5.0, -5.0)])],
        );
        assert_eq!(codes(&run(&dataset, tables, &options())), ["NoMatch.NoCandidate"]);
    }

    #[test]
    fn test_lateral_offset_beyond_search_distance() {
        let (dataset, tables) = dataset(
            vec![line(1, "A", &[(5.0, 0.0), (5.0, 5.0)])],
            vec![line(1, "B", &[(4.4, 0.0), (4.4, -5.0)])],
        );
        assert_eq!(
            codes(&run(&dataset, tables, &options())),
            ["NoMatch.NoCandidate", "NoMatch.NoCandidate"]
        );
    }

    #[test]
    fn test_three_or_more_connected() {
        let (dataset, tables) = dataset(
            vec![
                line(1, "A", &[(5.0, 0.0), (5.0, 5.0)]).with_attribute("FLD_TEXT", "R"),
                line(2, "A", &[(5.0, 0.0), (7.0, 5.0)]).with_attribute("FLD_TEXT", "R"),
            ],
            vec![line(1, "B", &[(5.0, 0.0), (5.0, -5.0)]).with_attribute("FLD_TEXT", "S")],
        );
        let options = CrossingLinesOptions {
            crossing_line_equal_attributes: Some("FLD_TEXT".into()),
            ..options()
        };
        assert_eq!(
            codes(&run(&dataset, tables, &options)),
            ["Match.ConstraintsNotFulfilled", "Match.ConstraintsNotFulfilled"]
        );

        let ignore = CrossingLinesOptions {
            ignore_attribute_constraints_if_three_or_more_connected: true,
            ..options
        };
        assert!(run(&dataset, tables, &ignore).is_empty());
    }

    fn interior_options(allow: bool) -> CrossingLinesOptions {
        CrossingLinesOptions {
            crossing_line_equal_attributes: Some("FLD_TEXT".into()),
            allow_end_points_connecting_to_interior_of_valid_neighbor_line: allow,
            ignore_end_points_of_bordering_lines: false,
            ignore_neighbor_lines_with_border_connection_outside_search_distance: false,
            ..options()
        }
    }

    fn interior_dataset(start_x: f64, text2: &str) -> (Dataset, EdgeMatchTables) {
        dataset(
            vec![
                line(1, "A", &[(start_x, 0.0), (5.0, 0.0), (5.0, 5.0)])
                    .with_attribute("FLD_TEXT", "value1"),
            ],
            vec![line(1, "B", &[(5.0, 0.0), (5.0, -5.0)]).with_attribute("FLD_TEXT", text2)],
        )
    }

    #[test]
    fn test_end_point_on_interior_not_allowed() {
        let (dataset, tables) = interior_dataset(1.0, "value1");
        assert_eq!(
            codes(&run(&dataset, tables, &interior_options(false))),
            ["NoMatch.CandidateExists.ConstraintsFulfilled", "NoMatch.NoCandidate"]
        );
    }

    #[test]
    fn test_end_point_on_interior_allowed() {
        let (dataset, tables) = interior_dataset(1.0, "value1");
        assert_eq!(
            codes(&run(&dataset, tables, &interior_options(true))),
            ["NoMatch.NoCandidate"]
        );

        let (dataset, tables) = interior_dataset(1.0, "value2");
        let errors = run(&dataset, tables, &interior_options(true));
        assert_eq!(codes(&errors), ["Match.ConstraintsNotFulfilled", "NoMatch.NoCandidate"]);

        let (dataset, tables) = interior_dataset(4.8, "value1");
        assert_eq!(
            codes(&run(&dataset, tables, &interior_options(true))),
            ["NoMatch.CandidateExists.ConstraintsFulfilled"]
        );
    }

    #[test]
    fn test_bordering_end_points_are_ignored() {
        let (dataset, tables) = interior_dataset(1.0, "value1");
        let options = CrossingLinesOptions {
            crossing_line_equal_attributes: Some("FLD_TEXT".into()),
            ..options()
        };
        // the end of line 1 along the border is skipped, line 2 finds no connected end
        assert_eq!(codes(&run(&dataset, tables, &options)), ["NoMatch.NoCandidate"]);
    }

    #[test]
    fn test_invalid_configuration() {
        let (dataset, tables) = dataset(vec![], vec![]);
        assert!(EdgeMatchCrossingLines::new(&dataset, tables, f64::NAN, options()).is_err());
        let same = EdgeMatchTables {
            line2: tables.line1,
            ..tables
        };
        assert!(EdgeMatchCrossingLines::new(&dataset, same, 0.5, options()).is_err());
    }
}
