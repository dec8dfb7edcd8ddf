//! Lines running along the border must have a counterpart running along the other border

use super::{ConstraintViolation, EdgeMatchRules, EdgeMatchTables, RuleTexts, Side, end_points};
use crate::checks::{code, format_length, row_lines};
use crate::container::{ContainerCheck, TileContext};
use crate::coverage::{
    SegmentParts, Subcurve, get_covered_subcurves, get_missing_subcurves, linear_intersection,
    near_parts,
};
use crate::feature::{Dataset, Geometry, TableId, TableRow};
use crate::geometry::{distance, expand_rect, nearest_point};
use crate::issue::ErrorCollector;
use crate::{Result, TopoError};
use geo::{BoundingRect, Coord, MultiLineString};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const PREFIX: &str = "BorderingLines";

/// Options of [`EdgeMatchBorderingLines`]
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct BorderingLinesOptions {
    /// Condition a class 1 line and its border must fulfil (`LINE.`, `BORDER.`)
    /// Default: None
    pub line_class1_border_match_condition: Option<String>,
    /// Condition a class 2 line and its border must fulfil (`LINE.`, `BORDER.`)
    /// Default: None
    pub line_class2_border_match_condition: Option<String>,
    /// Condition for a class 1 and a class 2 line to be compared at all (`LINE1.`, `LINE2.`)
    /// Default: None
    pub bordering_line_match_condition: Option<String>,
    /// Condition matching lines must fulfil (`LINE1.`, `LINE2.`)
    /// Default: None
    pub bordering_line_attribute_constraint: Option<String>,
    /// Fields that must be equal for matching lines, as `FIELD[:Label], ...`
    /// Default: None
    pub bordering_line_equal_attributes: Option<String>,
    /// The attribute constraint is also fulfilled with the two lines swapped.
    /// Default: false
    pub is_bordering_line_attribute_constraint_symmetric: bool,
    /// Do not report candidates within the search distance whose borders are not coincident.
    /// Default: false
    pub allow_disjoint_candidate_feature_if_borders_are_not_coincident: bool,
    /// Do not report lines without any candidate within the search distance.
    /// Default: false
    pub allow_no_feature_within_search_distance: bool,
    /// Do not report candidates within the search distance that fulfil all attribute rules.
    /// Default: false
    pub allow_disjoint_candidate_feature_if_attribute_constraints_are_fulfilled: bool,
    /// Do not report line ends on a matching section that are not coincident with an end of
    /// the other line.
    /// Default: false
    pub allow_non_coincident_end_points_on_border: bool,
    /// Report each broken attribute rule as an issue of its own.
    /// Default: false
    pub report_individual_attribute_constraint_violations: bool,
}

/// Lines of two data sets running along their common border
///
/// Wherever a line of one class runs along its border, a line of the other class must run
/// along the other border at the same place. Matching pairs are checked for their attribute
/// rules. Pair issues are reported once, from the class 1 line.
pub struct EdgeMatchBorderingLines {
    name: String,
    rules: EdgeMatchRules,
    search_distance: f64,
    options: BorderingLinesOptions,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl EdgeMatchBorderingLines {
    /// Create the check
    ///
    /// # Arguments
    /// * `dataset` - Dataset the tables belong to
    /// * `tables` - Line and border tables of both classes
    /// * `search_distance` - Distance within which non coincident candidates are searched
    /// * `options` - Conditions and flags
    pub fn new(
        dataset: &Dataset,
        tables: EdgeMatchTables,
        search_distance: f64,
        options: BorderingLinesOptions,
    ) -> Result<Self> {
        if !(search_distance >= 0.0) || !search_distance.is_finite() {
            return Err(TopoError::config(format!(
                "search distance must be >= 0, got {search_distance}"
            )));
        }
        let rules = EdgeMatchRules::new(
            dataset,
            tables,
            RuleTexts {
                border_match: [
                    options.line_class1_border_match_condition.as_deref(),
                    options.line_class2_border_match_condition.as_deref(),
                ],
                line_match: options.bordering_line_match_condition.as_deref(),
                attribute_constraint: options.bordering_line_attribute_constraint.as_deref(),
                constraint_symmetric: options.is_bordering_line_attribute_constraint_symmetric,
                equal_attributes: options.bordering_line_equal_attributes.as_deref(),
                report_individually: options.report_individual_attribute_constraint_violations,
            },
        )?;
        let name = format!(
            "EdgeMatchBorderingLines({},{})",
            dataset.table(tables.line1)?.name(),
            dataset.table(tables.line2)?.name()
        );
        tracing::debug!(check = %name, search_distance, "Check configured");
        Ok(Self {
            name,
            rules,
            search_distance,
            options,
        })
    }

    fn check_line(
        &self,
        ctx: &TileContext<'_>,
        side: Side,
        row: &TableRow,
        lines: &MultiLineString<f64>,
        errors: &mut ErrorCollector,
    ) {
        let xy = self.rules.xy_tolerance();
        let along = self.rules.along_border(ctx, side, row, lines);
        let Some(along_box) = along.bounding_rect() else {
            return;
        };

        let mut matched = SegmentParts::new();
        matched.register_all(&along);
        let mut candidates: Vec<(TableRow, SegmentParts)> = Vec::new();

        let other = side.other();
        let search_box = expand_rect(along_box, self.search_distance + xy);
        for neighbor in ctx.search(self.rules.line_table(other), search_box) {
            if !self.rules.lines_match(side, &row.feature, &neighbor.feature) {
                continue;
            }
            let Some(neighbor_lines) = row_lines(&neighbor) else {
                continue;
            };
            let neighbor_along = self.rules.along_border(ctx, other, &neighbor, &neighbor_lines);
            if neighbor_along.0.is_empty() {
                continue;
            }

            let common = linear_intersection(&along, &neighbor_along, xy);
            if common.is_empty() {
                if self.search_distance > 0.0 {
                    let near = near_parts(&along, &neighbor_along, self.search_distance);
                    if !near.is_empty() {
                        candidates.push((neighbor, near));
                    }
                }
                continue;
            }

            matched.extend(&SegmentParts::from_subcurves(&common));
            let common_lines = geometry_of(&along, &common);
            if side == Side::One {
                for violation in self.rules.violations(side, &row.feature, &neighbor.feature) {
                    errors.report(
                        violation.description,
                        &[row, &neighbor],
                        Some(Geometry::Polyline(common_lines.clone())),
                        code(PREFIX, "Match.ConstraintsNotFulfilled"),
                        Some(&violation.affected_component),
                    );
                }
            }
            if !self.options.allow_non_coincident_end_points_on_border {
                self.check_end_points(
                    row,
                    lines,
                    &neighbor,
                    &neighbor_along,
                    &common_lines,
                    errors,
                );
            }
        }

        for (neighbor, near) in candidates {
            let gap: Vec<Subcurve> = get_covered_subcurves(&along, &near.subtract(&matched))
                .into_iter()
                .filter(|s| s.length(&along) > xy)
                .collect();
            if gap.is_empty() {
                continue;
            }
            matched.extend(&SegmentParts::from_subcurves(&gap));
            if side == Side::One {
                self.report_candidate(ctx, row, &neighbor, geometry_of(&along, &gap), errors);
            }
        }

        if self.options.allow_no_feature_within_search_distance {
            return;
        }
        for run in get_missing_subcurves(&along, &matched) {
            if run.length(&along) <= 2.0 * xy {
                continue;
            }
            let geometry = run.geometry(&along);
            let partly_outside = geometry
                .bounding_rect()
                .is_some_and(|r| ctx.is_outside_test_run(expand_rect(r, self.search_distance)));
            let (local, description) = if partly_outside {
                (
                    "NoMatch.NoCandidate.PartlyOutsideVerifiedExtent",
                    "No bordering line within search distance (partly outside verified extent)",
                )
            } else {
                ("NoMatch.NoCandidate", "No bordering line within search distance")
            };
            errors.report(
                format!("{description}, length {}", format_length(run.length(&along))),
                &[row],
                Some(Geometry::Polyline(MultiLineString::new(vec![geometry]))),
                code(PREFIX, local),
                None,
            );
        }
    }

    /// Report a line of the other class near, but not coincident with, the border part `gap`
    fn report_candidate(
        &self,
        ctx: &TileContext<'_>,
        row: &TableRow,
        neighbor: &TableRow,
        gap: MultiLineString<f64>,
        errors: &mut ErrorCollector,
    ) {
        let borders_coincident = self.on_border(ctx, Side::Two, neighbor, &gap);
        if !borders_coincident
            && self
                .options
                .allow_disjoint_candidate_feature_if_borders_are_not_coincident
        {
            return;
        }
        let violations = self.rules.violations(Side::One, &row.feature, &neighbor.feature);
        if violations.is_empty()
            && self
                .options
                .allow_disjoint_candidate_feature_if_attribute_constraints_are_fulfilled
        {
            return;
        }

        let borders = if borders_coincident { "" } else { "BordersNotCoincident+" };
        let mut description =
            "No coincident bordering line, candidate within search distance".to_string();
        if !borders_coincident {
            description.push_str(" (borders not coincident)");
        }

        if violations.is_empty() {
            errors.report(
                description,
                &[row, neighbor],
                Some(Geometry::Polyline(gap)),
                code(PREFIX, &format!("NoMatch.CandidateExists.{borders}ConstraintsFulfilled")),
                None,
            );
            return;
        }
        for ConstraintViolation {
            description: violation,
            affected_component,
        } in violations
        {
            errors.report(
                format!("{description}. {violation}"),
                &[row, neighbor],
                Some(Geometry::Polyline(gap.clone())),
                code(
                    PREFIX,
                    &format!("NoMatch.CandidateExists.{borders}ConstraintsNotFulfilled"),
                ),
                Some(&affected_component),
            );
        }
    }

    /// Check if the run lies on a border of class `side` matching the line `neighbor`
    fn on_border(
        &self,
        ctx: &TileContext<'_>,
        side: Side,
        neighbor: &TableRow,
        run: &MultiLineString<f64>,
    ) -> bool {
        let Some(area) = run.bounding_rect() else {
            return false;
        };
        let xy = self.rules.xy_tolerance();
        let borders: Vec<MultiLineString<f64>> = self
            .rules
            .matching_borders(ctx, side, &neighbor.feature, area)
            .into_iter()
            .map(|(_, lines)| lines)
            .collect();
        let on_border = |p: Coord<f64>| {
            borders
                .iter()
                .filter_map(|b| nearest_point(p, b))
                .any(|n| n.distance <= xy)
        };
        run.0
            .iter()
            .flat_map(|l| l.0.iter().copied())
            .all(on_border)
    }

    /// Report ends of `lines` on a common section that are not an end of the neighbour's
    /// section along the border
    fn check_end_points(
        &self,
        row: &TableRow,
        lines: &MultiLineString<f64>,
        neighbor: &TableRow,
        neighbor_along: &MultiLineString<f64>,
        common: &MultiLineString<f64>,
        errors: &mut ErrorCollector,
    ) {
        let xy = self.rules.xy_tolerance();
        let neighbor_ends = end_points(neighbor_along);
        for end in end_points(lines) {
            let on_common = nearest_point(end, common).is_some_and(|n| n.distance <= xy);
            if !on_common || neighbor_ends.iter().any(|&e| distance(e, end) <= xy) {
                continue;
            }
            errors.report(
                "End point on border is not coincident with an end point of the bordering line",
                &[row, neighbor],
                Some(Geometry::Point(geo::Point(end))),
                code(PREFIX, "EndPointNotCoincident"),
                None,
            );
        }
    }
}

fn geometry_of(line: &MultiLineString<f64>, runs: &[Subcurve]) -> MultiLineString<f64> {
    MultiLineString::new(runs.iter().map(|s| s.geometry(line)).collect())
}

impl ContainerCheck for EdgeMatchBorderingLines {
    fn name(&self) -> &str {
        &self.name
    }

    fn tables(&self) -> &[TableId] {
        &self.rules.all_tables
    }

    fn search_distance(&self) -> f64 {
        self.search_distance + self.rules.xy_tolerance()
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
        tracing::trace!(oid = row.oid(), ?side, "Checking bordering line");
        self.check_line(ctx, side, row, &lines, errors);
        Ok(())
    }
}
