//! Features that must be covered by features of other tables
//!
//! Points are covered by points, lines or polygons within the tolerance of the covering table,
//! lines by lines or polygons, polygons by polygons. Whatever remains uncovered is reported,
//! either as a whole (no covering feature at all) or part by part.

use super::{
    PerTableConditions, code, distinct_tables, max_xy_tolerance, require_geometry_types, union_all,
};
use crate::container::{ContainerCheck, TileContext};
use crate::coverage::{SegmentParts, add_near_parts, get_missing_subcurves};
use crate::expression::RowContext;
use crate::feature::{Dataset, Geometry, GeometryType, TableId, TableRow};
use crate::geometry::{distance, expand_rect, nearest_point, rect_polygon};
use crate::issue::{ErrorCollector, IssueCode};
use crate::{Result, TopoError};
use geo::{
    Area, BooleanOps, Buffer, Coord, Intersects, MultiLineString, MultiPoint, MultiPolygon, Point,
    Rect,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const PREFIX: &str = "CoveredByOther";

const INCOMPLETE_NOTE: &str =
    "; Note: the feature extends beyond the verified extent, reported errors may be incomplete";

/// Options of [`CoveredByOther`]
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct CoveredByOtherOptions {
    /// Distance within which a covering feature covers, one value per covering table. Empty
    /// uses the xy tolerance.
    /// Default: empty
    pub covering_class_tolerances: Vec<f64>,
    /// Condition a covering feature (`G1.`) must fulfill towards the covered feature (`G2.`).
    /// None, one for all, or one per covered and covering table pair (covered table major).
    /// Default: empty
    pub is_covering_conditions: Vec<String>,
    /// Uncovered share, in percent of the area, length or point count, tolerated without an
    /// issue. Must be in `[0, 100)`.
    /// Default: 0
    pub allowed_uncovered_percentage: f64,
    /// Only features intersecting a polygon of these tables are checked, and only their parts
    /// inside those polygons are reported.
    /// Default: empty
    pub area_of_interest_tables: Vec<TableId>,
}

/// Part of a covered feature not (yet) found to be covered
#[derive(Debug, Clone)]
enum Uncovered {
    Points(Vec<Coord<f64>>),
    Lines(MultiLineString<f64>),
    Polygons(MultiPolygon<f64>),
}

impl Uncovered {
    fn of(geometry: &Geometry) -> Self {
        match geometry {
            Geometry::Point(_) | Geometry::MultiPoint(_) => {
                Uncovered::Points(geometry.point_coords())
            }
            Geometry::Polyline(lines) => Uncovered::Lines(lines.clone()),
            Geometry::Polygon(polygons) => Uncovered::Polygons(polygons.clone()),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Uncovered::Points(points) => points.is_empty(),
            Uncovered::Lines(lines) => lines.0.is_empty(),
            Uncovered::Polygons(polygons) => polygons.0.is_empty(),
        }
    }

    /// Point count, length or area
    fn measure(&self) -> f64 {
        match self {
            Uncovered::Points(points) => points.len() as f64,
            Uncovered::Lines(lines) => crate::geometry::multi_line_length(lines),
            Uncovered::Polygons(polygons) => polygons.unsigned_area(),
        }
    }

    /// Keep what lies inside `areas`
    fn clip(self, areas: &MultiPolygon<f64>) -> Self {
        match self {
            Uncovered::Points(points) => Uncovered::Points(
                points
                    .into_iter()
                    .filter(|&p| areas.intersects(&Point::from(p)))
                    .collect(),
            ),
            Uncovered::Lines(lines) => Uncovered::Lines(areas.clip(&lines, false)),
            Uncovered::Polygons(polygons) => Uncovered::Polygons(polygons.intersection(areas)),
        }
    }

    fn into_geometry(self) -> Geometry {
        match self {
            Uncovered::Points(points) if points.len() == 1 => {
                Geometry::point(points[0].x, points[0].y)
            }
            Uncovered::Points(points) => Geometry::points(&points),
            Uncovered::Lines(lines) => Geometry::Polyline(lines),
            Uncovered::Polygons(polygons) => Geometry::Polygon(polygons),
        }
    }

    /// One geometry per point, line part or polygon
    fn into_parts(self) -> Vec<Geometry> {
        match self {
            Uncovered::Points(points) => {
                points.into_iter().map(|p| Geometry::point(p.x, p.y)).collect()
            }
            Uncovered::Lines(lines) => lines
                .0
                .into_iter()
                .map(|l| Geometry::Polyline(MultiLineString::new(vec![l])))
                .collect(),
            Uncovered::Polygons(polygons) => polygons
                .0
                .into_iter()
                .map(|p| Geometry::Polygon(MultiPolygon::new(vec![p])))
                .collect(),
        }
    }
}

fn intersects(a: &Geometry, b: &Geometry) -> bool {
    match b {
        Geometry::Point(p) => intersects_with(a, p),
        Geometry::MultiPoint(mp) => intersects_with(a, mp),
        Geometry::Polyline(lines) => intersects_with(a, lines),
        Geometry::Polygon(polygons) => intersects_with(a, polygons),
    }
}

fn intersects_with<G>(a: &Geometry, other: &G) -> bool
where
    Point<f64>: Intersects<G>,
    MultiPoint<f64>: Intersects<G>,
    MultiLineString<f64>: Intersects<G>,
    MultiPolygon<f64>: Intersects<G>,
{
    match a {
        Geometry::Point(p) => p.intersects(other),
        Geometry::MultiPoint(mp) => mp.intersects(other),
        Geometry::Polyline(lines) => lines.intersects(other),
        Geometry::Polygon(polygons) => polygons.intersects(other),
    }
}

/// True if `covering` covers the point `p` within `tolerance`
fn covers_point(covering: &Geometry, p: Coord<f64>, tolerance: f64) -> bool {
    match covering {
        Geometry::Point(_) | Geometry::MultiPoint(_) => covering
            .point_coords()
            .iter()
            .any(|&c| distance(c, p) <= tolerance),
        Geometry::Polyline(lines) => {
            nearest_point(p, lines).is_some_and(|nearest| nearest.distance <= tolerance)
        }
        Geometry::Polygon(polygons) => {
            polygons.intersects(&Point::from(p))
                || covering
                    .linear()
                    .and_then(|boundary| nearest_point(p, &boundary))
                    .is_some_and(|nearest| nearest.distance <= tolerance)
        }
    }
}

/// Covering features found for one covered feature
struct Covering {
    intersecting: usize,
    /// Per covering table: effective tolerance and geometries
    geometries: Vec<(f64, Vec<Geometry>)>,
}

/// Every feature of the covered tables is covered by features of the covering tables
pub struct CoveredByOther {
    name: String,
    covering: Vec<TableId>,
    covered: Vec<TableId>,
    aoi: Vec<TableId>,
    tolerances: Vec<f64>,
    conditions: PerTableConditions,
    allowed_uncovered_percentage: f64,
    xy_tolerance: f64,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl CoveredByOther {
    /// Create the check
    ///
    /// # Arguments
    /// * `dataset` - Dataset the tables belong to
    /// * `covering` - Tables whose features cover
    /// * `covered` - Tables whose features must be covered
    /// * `options` - Tolerances, conditions and areas of interest
    pub fn new(
        dataset: &Dataset,
        covering: &[TableId],
        covered: &[TableId],
        options: CoveredByOtherOptions,
    ) -> Result<Self> {
        if covering.is_empty() || covered.is_empty() {
            return Err(TopoError::config(
                "at least one covering and one covered table are required",
            ));
        }
        let tolerances = &options.covering_class_tolerances;
        if !tolerances.is_empty() && tolerances.len() != covering.len() {
            return Err(TopoError::config(format!(
                "{} covering class tolerances given for {} covering tables",
                tolerances.len(),
                covering.len()
            )));
        }
        if let Some(t) = tolerances.iter().find(|t| !(**t >= 0.0) || !t.is_finite()) {
            return Err(TopoError::config(format!(
                "covering class tolerance must be >= 0, got {t}"
            )));
        }
        let percentage = options.allowed_uncovered_percentage;
        if !(0.0..100.0).contains(&percentage) {
            return Err(TopoError::config(format!(
                "allowed uncovered percentage must be >= 0 and < 100, got {percentage}"
            )));
        }
        let all_types = [
            GeometryType::Point,
            GeometryType::Multipoint,
            GeometryType::Polyline,
            GeometryType::Polygon,
        ];
        require_geometry_types(dataset, covering, &all_types, "covering")?;
        require_geometry_types(dataset, covered, &all_types, "covered")?;
        require_geometry_types(
            dataset,
            &options.area_of_interest_tables,
            &[GeometryType::Polygon],
            "area of interest",
        )?;

        let conditions = PerTableConditions::parse(
            &options.is_covering_conditions,
            covering.len() * covered.len(),
            &["G1", "G2"],
            "is covering conditions",
        )?;
        let all = distinct_tables(covering.iter().chain(covered).copied());
        let xy_tolerance = max_xy_tolerance(dataset, &all)?;
        let names = covered
            .iter()
            .map(|&t| dataset.table(t).map(|t| t.name().to_string()))
            .collect::<Result<Vec<_>>>()?;
        let name = format!("CoveredByOther({})", names.join(","));
        tracing::debug!(
            check = %name,
            covering = covering.len(),
            aoi = options.area_of_interest_tables.len(),
            allowed_uncovered_percentage = percentage,
            "Check configured"
        );

        Ok(Self {
            name,
            covering: covering.to_vec(),
            covered: distinct_tables(covered.iter().copied()),
            aoi: options.area_of_interest_tables,
            tolerances: options.covering_class_tolerances,
            conditions,
            allowed_uncovered_percentage: percentage,
            xy_tolerance,
        })
    }

    fn tolerance(&self, covering_index: usize) -> f64 {
        self.tolerances
            .get(covering_index)
            .copied()
            .unwrap_or(0.0)
            .max(self.xy_tolerance)
    }

    fn condition_index(&self, covered_index: usize, covering_index: usize) -> usize {
        covered_index * self.covering.len() + covering_index
    }

    fn has_conditions(&self, covered_index: usize) -> bool {
        (0..self.covering.len())
            .any(|j| self.conditions.get(self.condition_index(covered_index, j)).is_some())
    }

    /// Fields of the covered feature referenced by its covering conditions
    fn affected_component(&self, covered_index: usize) -> Option<String> {
        let mut fields: Vec<String> = (0..self.covering.len())
            .filter_map(|j| self.conditions.get(self.condition_index(covered_index, j)))
            .flat_map(|c| c.involved_fields())
            .filter(|(alias, _)| alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case("G2")))
            .map(|(_, field)| field)
            .collect();
        fields.sort();
        fields.dedup();
        (!fields.is_empty()).then(|| fields.join(", "))
    }

    /// Polygons of the areas of interest near `envelope`
    fn areas_of_interest(&self, ctx: &TileContext<'_>, envelope: Rect<f64>) -> MultiPolygon<f64> {
        union_all(self.aoi.iter().flat_map(|&table| {
            ctx.search(table, envelope)
                .into_iter()
                .filter_map(|row| row.feature.geometry.as_polygons().cloned())
        }))
    }

    fn find_covering(
        &self,
        ctx: &TileContext<'_>,
        row: &TableRow,
        envelope: Rect<f64>,
    ) -> Covering {
        let covered_index = self.covered.iter().position(|&t| t == row.table).unwrap_or(0);
        let mut result = Covering {
            intersecting: 0,
            geometries: Vec::with_capacity(self.covering.len()),
        };
        for (j, &table) in self.covering.iter().enumerate() {
            let tolerance = self.tolerance(j);
            let explicit = self.tolerances.get(j).is_some_and(|&t| t > 0.0);
            let condition = self.conditions.get(self.condition_index(covered_index, j));
            let mut geometries = Vec::new();
            for neighbor in ctx.search(table, expand_rect(envelope, tolerance)) {
                if neighbor.key() == row.key() {
                    continue;
                }
                if condition.is_some_and(|c| {
                    !c.evaluate(&RowContext::pair("G1", &neighbor.feature, "G2", &row.feature))
                }) {
                    continue;
                }
                if explicit || intersects(&row.feature.geometry, &neighbor.feature.geometry) {
                    result.intersecting += 1;
                }
                geometries.push(neighbor.feature.geometry.clone());
            }
            result.geometries.push((tolerance, geometries));
        }
        result
    }

    /// What `covering` leaves uncovered of `geometry`
    fn remainder(&self, geometry: &Geometry, covering: &Covering) -> Uncovered {
        match Uncovered::of(geometry) {
            Uncovered::Points(points) => Uncovered::Points(
                points
                    .into_iter()
                    .filter(|&p| {
                        !covering.geometries.iter().any(|(tolerance, geometries)| {
                            geometries.iter().any(|g| covers_point(g, p, *tolerance))
                        })
                    })
                    .collect(),
            ),
            Uncovered::Lines(lines) => {
                let mut covered = SegmentParts::new();
                covered.register_all(&lines);
                let mut polygons = Vec::new();
                for (tolerance, geometries) in &covering.geometries {
                    for g in geometries {
                        if let Geometry::Polygon(p) = g {
                            polygons.push(p.clone());
                        }
                        if let Some(other) = g.linear() {
                            add_near_parts(&mut covered, &lines, &other, *tolerance);
                        }
                    }
                }
                let missing = MultiLineString::new(
                    get_missing_subcurves(&lines, &covered)
                        .iter()
                        .map(|s| s.geometry(&lines))
                        .collect(),
                );
                let outside = if polygons.is_empty() {
                    missing
                } else {
                    union_all(polygons).clip(&missing, true)
                };
                Uncovered::Lines(MultiLineString::new(
                    outside
                        .0
                        .into_iter()
                        .filter(|l| crate::geometry::line_length(l) > self.xy_tolerance)
                        .collect(),
                ))
            }
            Uncovered::Polygons(polygons) => {
                // a covering table covers up to its own tolerance beyond its boundary
                let xy_tolerance = self.xy_tolerance;
                let covering_polygons: Vec<MultiPolygon<f64>> = covering
                    .geometries
                    .iter()
                    .flat_map(|&(tolerance, ref geometries)| {
                        geometries.iter().filter_map(|g| g.as_polygons()).map(move |p| {
                            if tolerance > xy_tolerance {
                                p.buffer(tolerance)
                            } else {
                                p.clone()
                            }
                        })
                    })
                    .collect();
                if covering_polygons.is_empty() {
                    return Uncovered::Polygons(polygons);
                }
                Uncovered::Polygons(polygons.difference(&union_all(covering_polygons)))
            }
        }
    }

    fn issue_code(&self, local: &str, with_condition: bool) -> Option<IssueCode> {
        if with_condition {
            code(PREFIX, &format!("{local}.WithFulfilledConstraint"))
        } else {
            code(PREFIX, local)
        }
    }
}

impl ContainerCheck for CoveredByOther {
    fn name(&self) -> &str {
        &self.name
    }

    fn tables(&self) -> &[TableId] {
        &self.covered
    }

    fn search_distance(&self) -> f64 {
        (0..self.covering.len())
            .map(|j| self.tolerance(j))
            .fold(self.xy_tolerance, f64::max)
    }

    fn execute_row(
        &mut self,
        row: &TableRow,
        ctx: &TileContext<'_>,
        errors: &mut ErrorCollector,
    ) -> Result<()> {
        let Some(covered_index) = self.covered.iter().position(|&t| t == row.table) else {
            return Ok(());
        };
        let geometry = &row.feature.geometry;
        let Some(envelope) = geometry.bounding_rect() else {
            return Ok(());
        };

        let areas = if self.aoi.is_empty() {
            None
        } else {
            let areas = self.areas_of_interest(ctx, envelope);
            if !intersects(geometry, &Geometry::Polygon(areas.clone())) {
                tracing::trace!(oid = row.oid(), "Outside the areas of interest");
                return Ok(());
            }
            Some(areas)
        };

        let covering = self.find_covering(ctx, row, envelope);
        let total = Uncovered::of(geometry).measure();
        let mut uncovered = self.remainder(geometry, &covering);
        if uncovered.is_empty() {
            return Ok(());
        }

        let complete = !ctx.is_outside_test_run(envelope);
        if let Some(extent) = ctx.test_run_extent()
            && !complete
        {
            uncovered = uncovered.clip(&MultiPolygon::new(vec![rect_polygon(extent)]));
        }
        if let Some(areas) = &areas {
            uncovered = uncovered.clip(areas);
        }
        if uncovered.is_empty() {
            return Ok(());
        }

        let with_condition = self.has_conditions(covered_index);
        let affected = self.affected_component(covered_index);
        let note = if complete { "" } else { INCOMPLETE_NOTE };

        if covering.intersecting == 0 {
            let (description, local) = if with_condition {
                (
                    "The feature is not covered by any feature \
                     that fulfills the attribute constraint",
                    "NotCoveredByAnyFeature",
                )
            } else {
                ("The feature is not covered by any feature", "NotCoveredByAnyFeature")
            };
            let local = if complete {
                local.to_string()
            } else {
                format!("{local}.PartlyOutsideVerifiedExtent")
            };
            errors.report(
                format!("{description}{note}"),
                &[row],
                Some(uncovered.into_geometry()),
                self.issue_code(&local, with_condition),
                affected.as_deref(),
            );
            return Ok(());
        }

        let constraint = if with_condition {
            " for which the attribute constraint is fulfilled"
        } else {
            ""
        };
        let (description, issue_code) = if self.allowed_uncovered_percentage > 0.0 {
            let uncovered_percentage = if total > 0.0 {
                100.0 * uncovered.measure() / total
            } else {
                100.0
            };
            if uncovered_percentage <= self.allowed_uncovered_percentage {
                return Ok(());
            }
            (
                format!(
                    "The feature is not sufficiently covered by other features{constraint} \
                     (covered: {:.2}%){note}",
                    100.0 - uncovered_percentage
                ),
                self.issue_code("NotSufficientlyCovered", with_condition),
            )
        } else {
            (
                format!("The feature is not fully covered by other features{constraint}{note}"),
                self.issue_code("NotFullyCovered", with_condition),
            )
        };
        for part in uncovered.into_parts() {
            errors.report(
                description.clone(),
                &[row],
                Some(part),
                issue_code.clone(),
                affected.as_deref(),
            );
        }
        Ok(())
    }
}
