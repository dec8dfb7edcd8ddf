//! Lines that must be fully covered by reference lines

use super::{
    PerTableConditions, code, distinct_tables, format_length, max_xy_tolerance,
    require_geometry_types, row_lines,
};
use crate::container::{ContainerCheck, TileContext};
use crate::coverage::{SegmentParts, add_near_parts, get_missing_subcurves};
use crate::expression::RowContext;
use crate::feature::{Dataset, Geometry, GeometryType, TableId, TableRow};
use crate::geometry::{expand_rect, rect_contains, rect_polygon};
use crate::issue::ErrorCollector;
use crate::{Result, TopoError};
use geo::{BooleanOps, BoundingRect, MultiLineString};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const PREFIX: &str = "FullCoincidence";

/// Options of [`FullCoincidence`]
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct FullCoincidenceOptions {
    /// Reference rows for which the condition holds do not cover the checked row (`G1.`
    /// checked row, `G2.` reference row). One condition for all reference tables or one per
    /// reference table.
    /// Default: empty
    pub ignore_neighbor_conditions: Vec<String>,
}

/// Every part of a line (or polygon boundary) lies within `near` of a reference feature
pub struct FullCoincidence {
    name: String,
    table: TableId,
    references: Vec<TableId>,
    tables: Vec<TableId>,
    near: f64,
    xy_tolerance: f64,
    ignore_neighbor: PerTableConditions,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl FullCoincidence {
    /// Create the check
    ///
    /// # Arguments
    /// * `dataset` - Dataset the tables belong to
    /// * `table` - Checked line or polygon table
    /// * `references` - Line or polygon tables that must cover the checked rows
    /// * `near` - Distance within which a reference covers a checked row
    /// * `options` - Further options
    pub fn new(
        dataset: &Dataset,
        table: TableId,
        references: &[TableId],
        near: f64,
        options: FullCoincidenceOptions,
    ) -> Result<Self> {
        if !(near > 0.0) || !near.is_finite() {
            return Err(TopoError::config(format!("near must be > 0, got {near}")));
        }
        if references.is_empty() {
            return Err(TopoError::config("at least one reference table is required"));
        }
        let linear = [GeometryType::Polyline, GeometryType::Polygon];
        require_geometry_types(dataset, &[table], &linear, "checked")?;
        require_geometry_types(dataset, references, &linear, "reference")?;

        let ignore_neighbor = PerTableConditions::parse(
            &options.ignore_neighbor_conditions,
            references.len(),
            &["G1", "G2"],
            "ignore neighbor conditions",
        )?;
        let tables = distinct_tables(std::iter::once(table).chain(references.iter().copied()));
        let xy_tolerance = max_xy_tolerance(dataset, &tables)?;
        let name = format!("FullCoincidence({})", dataset.table(table)?.name());
        tracing::debug!(check = %name, near, references = references.len(), "Check configured");

        Ok(Self {
            name,
            table,
            references: references.to_vec(),
            tables,
            near,
            xy_tolerance,
            ignore_neighbor,
        })
    }

    /// Coverage of `lines` by all reference rows within `near`
    fn covered(
        &self,
        ctx: &TileContext<'_>,
        row: &TableRow,
        lines: &MultiLineString<f64>,
    ) -> SegmentParts {
        let mut covered = SegmentParts::new();
        covered.register_all(lines);
        let Some(envelope) = lines.bounding_rect() else {
            return covered;
        };
        let search_box = expand_rect(envelope, self.near);

        for (index, &reference) in self.references.iter().enumerate() {
            let ignore = self.ignore_neighbor.get(index);
            for neighbor in ctx.search(reference, search_box) {
                if neighbor.key() == row.key() {
                    continue;
                }
                if ignore.is_some_and(|c| {
                    c.evaluate(&RowContext::pair("G1", &row.feature, "G2", &neighbor.feature))
                }) {
                    continue;
                }
                let Some(neighbor_lines) = row_lines(&neighbor) else {
                    continue;
                };
                add_near_parts(&mut covered, lines, &neighbor_lines, self.near);
            }
        }
        covered
    }
}

impl ContainerCheck for FullCoincidence {
    fn name(&self) -> &str {
        &self.name
    }

    fn tables(&self) -> &[TableId] {
        &self.tables
    }

    fn search_distance(&self) -> f64 {
        self.near
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
        let covered = self.covered(ctx, row, &lines);
        let all_box = ctx.all_box();

        for missing in get_missing_subcurves(&lines, &covered) {
            let length = missing.length(&lines);
            if length <= self.xy_tolerance {
                continue;
            }
            let part = MultiLineString::new(vec![missing.geometry(&lines)]);
            let Some(bounds) = part.bounding_rect() else {
                continue;
            };
            let geometry = if rect_contains(all_box, bounds) {
                part
            } else {
                rect_polygon(all_box).clip(&part, false)
            };
            if geometry.0.is_empty() {
                continue;
            }
            errors.report(
                format!(
                    "Part not within {} of a reference feature, length {}",
                    format_length(self.near),
                    format_length(length)
                ),
                &[row],
                Some(Geometry::Polyline(geometry)),
                code(PREFIX, "PartNotNearReference"),
                None,
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerConfig, NoopObserver, TestContainer};
    use crate::feature::{Feature, FeatureTable};
    use crate::geometry::Tolerance;
    use crate::issue::QaError;
    use geo::{Coord, Rect};

    fn table(name: &str, features: Vec<Feature>) -> FeatureTable {
        let mut table = FeatureTable::new(name, GeometryType::Polyline, Tolerance::default());
        for f in features {
            table.add(f).unwrap();
        }
        table
    }

    fn line(oid: i64, coords: &[(f64, f64)]) -> Feature {
        Feature::new(oid, Geometry::line(coords))
    }

    fn run(
        dataset: &Dataset,
        tile_size: f64,
        extent: Option<Rect<f64>>,
        check: FullCoincidence,
    ) -> Vec<QaError> {
        let mut container = TestContainer::new(
            dataset.clone(),
            ContainerConfig {
                tile_size,
                extent,
                ..Default::default()
            },
        );
        container.add_check(Box::new(check)).unwrap();
        container.execute(&mut NoopObserver).unwrap()
    }

    fn square_with_partial_reference() -> (Dataset, TableId, TableId) {
        let mut dataset = Dataset::new();
        let checked = dataset.add_table(table(
            "checked",
            vec![line(
                1,
                &[(100.0, 100.0), (100.0, 200.0), (200.0, 200.0), (200.0, 100.0), (100.0, 100.0)],
            )],
        ));
        let reference = dataset.add_table(table(
            "reference",
            vec![
                line(1, &[(100.0, 100.0), (101.0, 201.0)]),
                line(2, &[(101.0, 201.0), (199.0, 200.0)]),
                line(3, &[(201.0, 99.0), (99.0, 101.0)]),
            ],
        ));
        (dataset, checked, reference)
    }

    #[test]
    fn test_part_not_near_reference() {
        let (dataset, checked, reference) = square_with_partial_reference();
        for tile_size in [10000.0, 30.0] {
            let check = FullCoincidence::new(
                &dataset,
                checked,
                &[reference],
                2.0,
                FullCoincidenceOptions::default(),
            )
            .unwrap();
            let errors = run(&dataset, tile_size, None, check);
            assert_eq!(errors.len(), 1, "tile size {tile_size}");
            assert_eq!(
                errors[0].issue_code.as_ref().map(|c| c.as_str()),
                Some("FullCoincidence.PartNotNearReference")
            );
            let Some(Geometry::Polyline(part)) = &errors[0].geometry else {
                panic!("expected a polyline");
            };
            let length = crate::geometry::multi_line_length(part);
            assert!(length > 96.0 && length < 98.0, "length {length}");
        }
    }

    #[test]
    fn test_fully_covered() {
        let mut dataset = Dataset::new();
        let checked =
            dataset.add_table(table("checked", vec![line(1, &[(0.0, 0.0), (10.0, 0.0)])]));
        let reference = dataset.add_table(table(
            "reference",
            vec![
                line(1, &[(0.0, 0.5), (4.0, 0.5)]),
                line(2, &[(4.0, -0.5), (10.0, -0.5)]),
            ],
        ));
        let options = FullCoincidenceOptions::default();
        let check = FullCoincidence::new(&dataset, checked, &[reference], 1.0, options).unwrap();
        assert!(run(&dataset, 3.0, None, check).is_empty());
    }

    #[test]
    fn test_nearly_coincident_across_tiles() {
        for (checked_x, reference_x) in [(201.0, 199.0), (199.0, 201.0), (197.0, 199.0)] {
            let mut dataset = Dataset::new();
            let checked = dataset.add_table(table(
                "checked",
                vec![line(1, &[(checked_x, 150.0), (checked_x, 50.0)])],
            ));
            let reference = dataset.add_table(table(
                "reference",
                vec![line(1, &[(reference_x, 150.0), (reference_x, 50.0)])],
            ));
            let check = FullCoincidence::new(
                &dataset,
                checked,
                &[reference],
                3.0,
                FullCoincidenceOptions::default(),
            )
            .unwrap();
            let extent = Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 500.0, y: 500.0 });
            assert!(run(&dataset, 200.0, Some(extent), check).is_empty());
        }
    }

    #[test]
    fn test_ignore_neighbor_conditions() {
        let mut dataset = Dataset::new();
        let coords = [(100.0, 100.0), (200.0, 200.0)];
        let checked = dataset.add_table(table(
            "checked",
            vec![line(1, &coords).with_attribute("LANDID", 1_i64)],
        ));
        let reference1 = dataset.add_table(table(
            "reference1",
            vec![line(1, &coords).with_attribute("LANDID", 1_i64)],
        ));
        let reference2 = dataset.add_table(table(
            "reference2",
            vec![line(1, &coords).with_attribute("OTHERID", 1_i64)],
        ));
        let references = [reference1, reference2];

        let options = FullCoincidenceOptions::default();
        let check = FullCoincidence::new(&dataset, checked, &references, 1.0, options).unwrap();
        assert!(run(&dataset, 10000.0, None, check).is_empty());

        let too_many = FullCoincidenceOptions {
            ignore_neighbor_conditions: vec!["too".into(), "many".into(), "conditions".into()],
        };
        assert!(matches!(
            FullCoincidence::new(&dataset, checked, &references, 1.0, too_many),
            Err(TopoError::InvalidConfiguration { .. })
        ));

        let options = FullCoincidenceOptions {
            ignore_neighbor_conditions: vec![
                "G1.LandID = G2.LandID".into(),
                "G1.LandID = G2.OtherID".into(),
            ],
        };
        let check = FullCoincidence::new(&dataset, checked, &references, 1.0, options).unwrap();
        assert_eq!(run(&dataset, 10000.0, None, check).len(), 1);
    }

    #[test]
    fn test_error_clipped_to_verified_extent() {
        let mut dataset = Dataset::new();
        let checked =
            dataset.add_table(table("checked", vec![line(1, &[(0.0, 0.0), (10.0, 0.0)])]));
        let reference = dataset.add_table(table("reference", vec![]));
        let options = FullCoincidenceOptions::default();
        let check = FullCoincidence::new(&dataset, checked, &[reference], 1.0, options).unwrap();
        let extent = Rect::new(Coord { x: 0.0, y: -1.0 }, Coord { x: 4.0, y: 1.0 });
        let errors = run(&dataset, 1000.0, Some(extent), check);
        assert_eq!(errors.len(), 1);
        let Some(Geometry::Polyline(part)) = &errors[0].geometry else {
            panic!("expected a polyline");
        };
        assert!((crate::geometry::multi_line_length(part) - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_configuration() {
        let (dataset, checked, reference) = square_with_partial_reference();
        let options = FullCoincidenceOptions::default;
        assert!(FullCoincidence::new(&dataset, checked, &[reference], 0.0, options()).is_err());
        assert!(FullCoincidence::new(&dataset, checked, &[], 1.0, options()).is_err());
    }
}
