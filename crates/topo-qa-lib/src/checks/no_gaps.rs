//! Gaps between the polygons of one or more polygon tables
//!
//! Each tile (optionally split into vertical subtiles) is clipped to a box reaching slightly
//! into the tiles processed before, the polygons found in it are unioned and subtracted from
//! the clip box. The remaining parts are gap pieces. Pieces that reach into tiles still to come
//! are kept until those tiles are done and merged with the pieces found there, so that every
//! gap is reported once, with its complete geometry.

use super::{code, distinct_tables, is_processed, require_geometry_types, union_all};
use crate::container::{ContainerCheck, TileContext, TileInfo, TileState};
use crate::feature::{Dataset, Geometry, GeometryType, TableId, TableRow};
use crate::geometry::{perimeter, rect_polygon, rects_intersect};
use crate::issue::{ErrorCollector, IssueCode};
use crate::{Result, TopoError};
use geo::{Area, BooleanOps, BoundingRect, Coord, Intersects, MultiPolygon, Polygon, Rect};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const PREFIX: &str = "Gaps";

/// Clip boxes reach this many tolerances into the tiles to the left and below
const OFFSET_FACTOR: f64 = 3.0;

/// Options of [`NoGaps`]
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct NoGapsOptions {
    /// Only gaps whose ratio perimeter² / area exceeds this limit are reported; 0 reports gaps
    /// of any shape.
    /// Default: 0
    pub sliver_limit: f64,
    /// Only gaps with an area up to this value are reported; 0 reports gaps of any size.
    /// Default: 0
    pub max_area: f64,
    /// Width of the vertical subtiles a tile is split into; 0 uses the whole tile. Ignored when
    /// `tile_subdivision_count` is set.
    /// Default: 0
    pub subtile_width: f64,
    /// Number of vertical cuts splitting each tile into subtiles of equal width.
    /// Default: 0
    pub tile_subdivision_count: usize,
    /// Report gaps narrower than the xy tolerance, down to the coordinate resolution.
    /// Default: false
    pub find_gaps_below_tolerance: bool,
    /// Polygon tables restricting the search to their areas.
    /// Default: empty
    pub area_of_interest_tables: Vec<TableId>,
}

/// Gap pieces waiting for the tiles they reach into
#[derive(Debug, Default)]
struct KnownGaps {
    pending: Vec<MultiPolygon<f64>>,
}

impl KnownGaps {
    /// Merge a piece with every pending gap it intersects
    fn add(&mut self, piece: Polygon<f64>) {
        let mut merged = MultiPolygon::new(vec![piece]);
        let Some(mut bounds) = merged.bounding_rect() else {
            return;
        };
        let mut i = 0;
        while i < self.pending.len() {
            let candidate = &self.pending[i];
            let touches = candidate
                .bounding_rect()
                .is_some_and(|b| rects_intersect(b, bounds))
                && candidate.intersects(&merged);
            if touches {
                let other = self.pending.swap_remove(i);
                merged = merged.union(&other);
                if let Some(b) = merged.bounding_rect() {
                    bounds = b;
                }
            } else {
                i += 1;
            }
        }
        self.pending.push(merged);
    }

    /// Remove and return the gaps that cannot grow any further
    fn take_completed(
        &mut self,
        tile: Rect<f64>,
        all_box: Rect<f64>,
        tolerance: f64,
    ) -> Vec<MultiPolygon<f64>> {
        let (completed, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|gap| is_completed(gap, tile, all_box, tolerance));
        self.pending = pending;
        completed
    }
}

/// True once every tile a gap may reach into has been processed; the last of them is the one
/// holding the upper right corner of its envelope
fn is_completed(
    gap: &MultiPolygon<f64>,
    tile: Rect<f64>,
    all_box: Rect<f64>,
    tolerance: f64,
) -> bool {
    gap.bounding_rect()
        .is_none_or(|bounds| is_processed(bounds.max(), tolerance, tile, all_box))
}

/// Vertical subtiles of a given width; a remainder narrower than `minimum` joins the last one
fn subtiles_by_width(tile: Rect<f64>, width: f64, minimum: f64) -> Vec<Rect<f64>> {
    let (min, max) = (tile.min(), tile.max());
    if width + minimum > tile.width() {
        return vec![tile];
    }
    let mut result = Vec::new();
    let mut x0 = min.x;
    loop {
        let remainder = max.x - (x0 + width);
        let (x1, last) = if remainder >= minimum {
            (x0 + width, false)
        } else {
            (max.x, true)
        };
        result.push(Rect::new(Coord { x: x0, y: min.y }, Coord { x: x1, y: max.y }));
        if last {
            return result;
        }
        x0 = x1;
    }
}

/// `count + 1` vertical subtiles of equal width, unless they would be narrower than `minimum`
fn subtiles_by_count(tile: Rect<f64>, count: usize, minimum: f64) -> Vec<Rect<f64>> {
    if count == 0 {
        return vec![tile];
    }
    let (min, max) = (tile.min(), tile.max());
    let n = count + 1;
    let width = tile.width() / n as f64;
    if width < minimum {
        return vec![tile];
    }
    (0..n)
        .map(|i| {
            let x0 = min.x + i as f64 * width;
            let x1 = if i + 1 == n { max.x } else { x0 + width };
            Rect::new(Coord { x: x0, y: min.y }, Coord { x: x1, y: max.y })
        })
        .collect()
}

/// True if a gap piece lies in the part of the clip box left of or below the tile
fn is_in_offset_area(piece: &Polygon<f64>, tile: Rect<f64>) -> bool {
    let Some(bounds) = piece.bounding_rect() else {
        return true;
    };
    if bounds.min().x >= tile.min().x && bounds.min().y >= tile.min().y {
        return false;
    }
    if bounds.max().x <= tile.min().x || bounds.max().y <= tile.min().y {
        return true;
    }
    rect_polygon(tile).intersection(piece).unsigned_area() <= 0.0
}

/// Gaps within polygon mosaics
pub struct NoGaps {
    name: String,
    polygon_tables: Vec<TableId>,
    aoi_tables: Vec<TableId>,
    tables: Vec<TableId>,
    options: NoGapsOptions,
    xy_tolerance: f64,
    /// Distance used for clip offsets and gap completion
    tolerance: f64,
    minimum_subtile_width: f64,
    known_gaps: KnownGaps,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl NoGaps {
    /// Create the check
    ///
    /// # Arguments
    /// * `dataset` - Dataset the tables belong to
    /// * `polygon_tables` - Polygon tables that together must not leave gaps
    /// * `options` - Limits, subtiling and areas of interest
    pub fn new(
        dataset: &Dataset,
        polygon_tables: &[TableId],
        options: NoGapsOptions,
    ) -> Result<Self> {
        if polygon_tables.is_empty() {
            return Err(TopoError::config("at least one polygon table is required"));
        }
        for (value, what) in [
            (options.sliver_limit, "sliver limit"),
            (options.max_area, "maximum area"),
            (options.subtile_width, "subtile width"),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(TopoError::config(format!("{what} must be >= 0, got {value}")));
            }
        }
        require_geometry_types(dataset, polygon_tables, &[GeometryType::Polygon], "polygon")?;
        require_geometry_types(
            dataset,
            &options.area_of_interest_tables,
            &[GeometryType::Polygon],
            "area of interest",
        )?;

        let mut xy_tolerance = 0.0_f64;
        let mut resolution = 0.0_f64;
        for &table in polygon_tables {
            let tolerance = dataset.table(table)?.tolerance();
            xy_tolerance = xy_tolerance.max(tolerance.xy_tolerance);
            resolution = resolution.max(tolerance.resolution);
        }
        let (tolerance, minimum_subtile_width) = if options.find_gaps_below_tolerance {
            (resolution * 2.0, resolution * 10000.0)
        } else {
            (xy_tolerance, xy_tolerance * 100.0)
        };
        if options.subtile_width > 0.0
            && options.tile_subdivision_count == 0
            && options.subtile_width <= minimum_subtile_width
        {
            return Err(TopoError::config(format!(
                "subtile width must be > {minimum_subtile_width}, got {}",
                options.subtile_width
            )));
        }

        let polygon_tables = distinct_tables(polygon_tables.iter().copied());
        let aoi_tables = distinct_tables(options.area_of_interest_tables.iter().copied());
        let tables = distinct_tables(polygon_tables.iter().chain(&aoi_tables).copied());
        let names = polygon_tables
            .iter()
            .map(|&t| dataset.table(t).map(|t| t.name().to_string()))
            .collect::<Result<Vec<_>>>()?;
        let name = format!("NoGaps({})", names.join(","));
        tracing::debug!(
            check = %name,
            sliver_limit = options.sliver_limit,
            max_area = options.max_area,
            areas_of_interest = aoi_tables.len(),
            "Check configured"
        );

        Ok(Self {
            name,
            polygon_tables,
            aoi_tables,
            tables,
            options,
            xy_tolerance,
            tolerance,
            minimum_subtile_width,
            known_gaps: KnownGaps::default(),
        })
    }

    fn subtiles(&self, tile: Rect<f64>) -> Vec<Rect<f64>> {
        if self.options.subtile_width > 0.0 && self.options.tile_subdivision_count == 0 {
            subtiles_by_width(tile, self.options.subtile_width, self.minimum_subtile_width)
        } else {
            subtiles_by_count(tile, self.options.tile_subdivision_count, self.minimum_subtile_width)
        }
    }

    /// Clip box of a (sub)tile, grown into the area processed before but not beyond the extent
    fn clip_box(&self, tile: Rect<f64>, all_box: Rect<f64>) -> Rect<f64> {
        let offset = self.tolerance * OFFSET_FACTOR;
        Rect::new(
            Coord {
                x: all_box.min().x.max(tile.min().x - offset),
                y: all_box.min().y.max(tile.min().y - offset),
            },
            tile.max(),
        )
    }

    fn polygons_in(
        &self,
        ctx: &TileContext<'_>,
        tables: &[TableId],
        area: Rect<f64>,
    ) -> Vec<MultiPolygon<f64>> {
        tables
            .iter()
            .flat_map(|&table| ctx.search(table, area))
            .filter_map(|row| row.feature.geometry.as_polygons().cloned())
            .collect()
    }

    /// Gap pieces within a subtile, without those left over from earlier subtiles
    fn gap_pieces(&self, ctx: &TileContext<'_>, subtile: Rect<f64>) -> Vec<Polygon<f64>> {
        let clip = self.clip_box(subtile, ctx.all_box());
        let clip_polygon = MultiPolygon::new(vec![rect_polygon(clip)]);

        let covered = union_all(self.polygons_in(ctx, &self.polygon_tables, clip));
        let mut gaps = if covered.0.is_empty() {
            clip_polygon.clone()
        } else {
            clip_polygon.difference(&covered)
        };

        if !self.aoi_tables.is_empty() && !gaps.0.is_empty() {
            let areas = union_all(self.polygons_in(ctx, &self.aoi_tables, clip));
            gaps = if areas.0.is_empty() {
                MultiPolygon::new(Vec::new())
            } else {
                gaps.intersection(&clip_polygon.intersection(&areas))
            };
        }

        gaps.0
            .into_iter()
            .filter(|piece| !is_in_offset_area(piece, subtile))
            .collect()
    }

    fn issue_code(&self) -> Option<IssueCode> {
        let local = match (self.options.sliver_limit > 0.0, self.options.max_area > 0.0) {
            (true, true) => "Gap.AreaTooSmallAndSliverRatioTooLarge",
            (true, false) => "Gap.SliverRatioTooLarge",
            (false, true) => "Gap.AreaTooSmall",
            (false, false) => "Gap",
        };
        code(PREFIX, local)
    }

    fn report_gap(&self, gap: MultiPolygon<f64>, errors: &mut ErrorCollector) {
        let area = gap.unsigned_area();
        if area < f64::EPSILON {
            return;
        }
        if self.options.max_area > 0.0 && area > self.options.max_area {
            return;
        }
        let length = perimeter(&gap);
        if !self.options.find_gaps_below_tolerance && 2.0 * area / length < self.xy_tolerance {
            tracing::trace!(area, perimeter = length, "Gap narrower than the tolerance");
            return;
        }

        let mut description = if self.options.max_area > 0.0 {
            format!(
                "Gap found (area {} <= {}",
                format_area(area),
                format_area(self.options.max_area)
            )
        } else {
            format!("Gap found (area {}", format_area(area))
        };
        if self.options.sliver_limit > 0.0 {
            let ratio = length * length / area;
            if ratio <= self.options.sliver_limit {
                return;
            }
            description.push_str(&format!(
                ", sliver ratio {} > {}, perimeter {}",
                format_area(ratio),
                format_area(self.options.sliver_limit),
                super::format_length(length)
            ));
        }
        description.push(')');

        errors.report(description, &[], Some(Geometry::Polygon(gap)), self.issue_code(), None);
    }
}

fn format_area(value: f64) -> String {
    format!("{value:.2}")
}

impl ContainerCheck for NoGaps {
    fn name(&self) -> &str {
        &self.name
    }

    fn tables(&self) -> &[TableId] {
        &self.tables
    }

    fn search_distance(&self) -> f64 {
        self.tolerance * OFFSET_FACTOR
    }

    fn execute_row(
        &mut self,
        _row: &TableRow,
        _ctx: &TileContext<'_>,
        _errors: &mut ErrorCollector,
    ) -> Result<()> {
        // polygons are read per tile in complete_tile
        Ok(())
    }

    fn complete_tile(
        &mut self,
        tile: &TileInfo,
        ctx: &TileContext<'_>,
        errors: &mut ErrorCollector,
    ) -> Result<()> {
        let Some(tile_box) = tile.current_box else {
            self.known_gaps = KnownGaps::default();
            return Ok(());
        };

        for subtile in self.subtiles(tile_box) {
            for piece in self.gap_pieces(ctx, subtile) {
                self.known_gaps.add(piece);
            }
        }

        let completed = self
            .known_gaps
            .take_completed(tile_box, tile.all_box, self.tolerance);
        tracing::trace!(
            completed = completed.len(),
            pending = self.known_gaps.pending.len(),
            "Gaps merged"
        );
        for gap in completed {
            self.report_gap(gap, errors);
        }

        if tile.state == TileState::Final {
            for gap in std::mem::take(&mut self.known_gaps.pending) {
                self.report_gap(gap, errors);
            }
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
    use geo::LineString;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<(f64, f64)> {
        vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1), (x0, y0)]
    }

    fn polygon_table(name: &str, polygons: Vec<Geometry>) -> FeatureTable {
        let mut table = FeatureTable::new(name, GeometryType::Polygon, Tolerance::default());
        for (i, geometry) in polygons.into_iter().enumerate() {
            table.add(Feature::new(i as i64 + 1, geometry)).unwrap();
        }
        table
    }

    /// Two rectangles leaving a 0.45 wide gap between x=10 and x=10.45
    fn sliver_dataset() -> (Dataset, TableId) {
        let mut dataset = Dataset::new();
        let table = dataset.add_table(polygon_table(
            "parcels",
            vec![
                Geometry::polygon(&rect(0.0, 0.0, 10.0, 4.0)),
                Geometry::polygon(&rect(10.45, 0.0, 14.0, 4.0)),
            ],
        ));
        (dataset, table)
    }

    fn run(dataset: &Dataset, tile_size: f64, check: NoGaps) -> Vec<QaError> {
        let mut container = TestContainer::new(
            dataset.clone(),
            ContainerConfig {
                tile_size,
                ..Default::default()
            },
        );
        container.add_check(Box::new(check)).unwrap();
        container.execute(&mut NoopObserver).unwrap()
    }

    fn gap_area(error: &QaError) -> f64 {
        match &error.geometry {
            Some(Geometry::Polygon(gap)) => gap.unsigned_area(),
            other => panic!("expected a polygon, got {other:?}"),
        }
    }

    fn codes(errors: &[QaError]) -> Vec<&str> {
        errors
            .iter()
            .filter_map(|e| e.issue_code.as_ref().map(|c| c.as_str()))
            .collect()
    }

    #[test]
    fn test_gap_reported_once_for_any_tile_size() {
        let (dataset, table) = sliver_dataset();
        for tile_size in [1000.0, 7.0, 3.0, 0.3] {
            let check = NoGaps::new(&dataset, &[table], NoGapsOptions::default()).unwrap();
            let errors = run(&dataset, tile_size, check);
            assert_eq!(errors.len(), 1, "tile size {tile_size}");
            assert_eq!(codes(&errors), vec!["Gaps.Gap"]);
            assert!((gap_area(&errors[0]) - 1.8).abs() < 1e-6, "tile size {tile_size}");
            assert!(errors[0].involved_rows.is_empty());
            assert_eq!(errors[0].description, "Gap found (area 1.80)");
        }
    }

    #[test]
    fn test_no_gaps() {
        let mut dataset = Dataset::new();
        let table = dataset.add_table(polygon_table(
            "parcels",
            vec![
                Geometry::polygon(&rect(0.0, 0.0, 10.0, 4.0)),
                Geometry::polygon(&rect(10.0, 0.0, 14.0, 4.0)),
            ],
        ));
        for tile_size in [1000.0, 3.0] {
            let check = NoGaps::new(&dataset, &[table], NoGapsOptions::default()).unwrap();
            assert!(run(&dataset, tile_size, check).is_empty(), "tile size {tile_size}");
        }
    }

    #[test]
    fn test_gap_between_tables() {
        let mut dataset = Dataset::new();
        let left = dataset.add_table(polygon_table(
            "left",
            vec![Geometry::polygon(&rect(0.0, 0.0, 10.0, 4.0))],
        ));
        let right = dataset.add_table(polygon_table(
            "right",
            vec![Geometry::polygon(&rect(10.45, 0.0, 14.0, 4.0))],
        ));
        let check = NoGaps::new(&dataset, &[left, right], NoGapsOptions::default()).unwrap();
        let errors = run(&dataset, 5.0, check);
        assert_eq!(errors.len(), 1);
        assert!((gap_area(&errors[0]) - 1.8).abs() < 1e-6);
    }

    #[test]
    fn test_hole_is_a_gap() {
        let mut dataset = Dataset::new();
        let ring = Geometry::Polygon(MultiPolygon::new(vec![Polygon::new(
            LineString::from(rect(0.0, 0.0, 10.0, 10.0)),
            vec![LineString::from(rect(4.0, 4.0, 6.0, 5.0))],
        )]));
        let table = dataset.add_table(polygon_table("parcels", vec![ring]));
        for tile_size in [1000.0, 4.5, 0.7] {
            let check = NoGaps::new(&dataset, &[table], NoGapsOptions::default()).unwrap();
            let errors = run(&dataset, tile_size, check);
            assert_eq!(errors.len(), 1, "tile size {tile_size}");
            assert!((gap_area(&errors[0]) - 2.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_sliver_limit_and_max_area() {
        // area 1.8, perimeter 8.9, ratio 44.0
        let (dataset, table) = sliver_dataset();
        let with = |sliver_limit: f64, max_area: f64| {
            let options = NoGapsOptions {
                sliver_limit,
                max_area,
                ..Default::default()
            };
            run(&dataset, 3.0, NoGaps::new(&dataset, &[table], options).unwrap())
        };

        let errors = with(40.0, 0.0);
        assert_eq!(codes(&errors), vec!["Gaps.Gap.SliverRatioTooLarge"]);
        assert_eq!(
            errors[0].description,
            "Gap found (area 1.80, sliver ratio 44.01 > 40.00, perimeter 8.90)"
        );
        assert!(with(50.0, 0.0).is_empty());

        let errors = with(0.0, 2.0);
        assert_eq!(codes(&errors), vec!["Gaps.Gap.AreaTooSmall"]);
        assert_eq!(errors[0].description, "Gap found (area 1.80 <= 2.00)");
        assert!(with(0.0, 1.0).is_empty());

        assert_eq!(
            codes(&with(40.0, 2.0)),
            vec!["Gaps.Gap.AreaTooSmallAndSliverRatioTooLarge"]
        );
        assert!(with(40.0, 1.0).is_empty());
    }

    #[test]
    fn test_areas_of_interest() {
        let (mut dataset, table) = sliver_dataset();
        let aoi = dataset.add_table(polygon_table(
            "aoi",
            vec![Geometry::polygon(&rect(0.0, 0.0, 14.0, 2.0))],
        ));
        let far = dataset.add_table(polygon_table(
            "far",
            vec![Geometry::polygon(&rect(0.0, 0.0, 5.0, 4.0))],
        ));

        for tile_size in [1000.0, 3.0] {
            let options = NoGapsOptions {
                area_of_interest_tables: vec![aoi],
                ..Default::default()
            };
            let check = NoGaps::new(&dataset, &[table], options).unwrap();
            let errors = run(&dataset, tile_size, check);
            assert_eq!(errors.len(), 1, "tile size {tile_size}");
            assert!((gap_area(&errors[0]) - 0.9).abs() < 1e-6);

            let options = NoGapsOptions {
                area_of_interest_tables: vec![far],
                ..Default::default()
            };
            let check = NoGaps::new(&dataset, &[table], options).unwrap();
            assert!(run(&dataset, tile_size, check).is_empty());
        }
    }

    #[test]
    fn test_gaps_below_tolerance() {
        let mut dataset = Dataset::new();
        let table = dataset.add_table(polygon_table(
            "parcels",
            vec![
                Geometry::polygon(&rect(0.0, 0.0, 10.0, 4.0)),
                Geometry::polygon(&rect(10.0005, 0.0, 14.0, 4.0)),
            ],
        ));
        let check = NoGaps::new(&dataset, &[table], NoGapsOptions::default()).unwrap();
        assert!(run(&dataset, 1000.0, check).is_empty());

        let options = NoGapsOptions {
            find_gaps_below_tolerance: true,
            ..Default::default()
        };
        let errors = run(&dataset, 1000.0, NoGaps::new(&dataset, &[table], options).unwrap());
        assert_eq!(errors.len(), 1);
        // the gap edges are only exact up to the coordinate resolution
        let epsilon = Tolerance::default().resolution * 4.0;
        assert!((gap_area(&errors[0]) - 0.002).abs() < epsilon, "{}", gap_area(&errors[0]));
    }

    #[test]
    fn test_subtiles() {
        let (dataset, table) = sliver_dataset();
        for options in [
            NoGapsOptions {
                subtile_width: 2.0,
                ..Default::default()
            },
            NoGapsOptions {
                tile_subdivision_count: 3,
                ..Default::default()
            },
        ] {
            let errors = run(&dataset, 1000.0, NoGaps::new(&dataset, &[table], options).unwrap());
            assert_eq!(errors.len(), 1);
            assert!((gap_area(&errors[0]) - 1.8).abs() < 1e-6);
        }
    }

    #[test]
    fn test_subtile_layout() {
        let tile = Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 10.0, y: 5.0 });
        let widths =
            |subtiles: Vec<Rect<f64>>| subtiles.iter().map(|r| r.width()).collect::<Vec<_>>();

        assert_eq!(widths(subtiles_by_width(tile, 3.0, 0.5)), vec![3.0, 3.0, 3.0, 1.0]);
        assert_eq!(widths(subtiles_by_width(tile, 4.0, 0.5)), vec![4.0, 4.0, 2.0]);
        assert_eq!(widths(subtiles_by_width(tile, 9.8, 0.5)), vec![10.0]);
        assert_eq!(widths(subtiles_by_count(tile, 1, 0.5)), vec![5.0, 5.0]);
        assert_eq!(widths(subtiles_by_count(tile, 0, 0.5)), vec![10.0]);
        assert_eq!(widths(subtiles_by_count(tile, 49, 0.5)), vec![10.0]);
    }

    #[test]
    fn test_completion() {
        let all_box = Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 20.0, y: 20.0 });
        let tile = Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 10.0, y: 10.0 });
        let gap = |x0, y0, x1, y1| MultiPolygon::new(vec![rect_polygon(Rect::new(
            Coord { x: x0, y: y0 },
            Coord { x: x1, y: y1 },
        ))]);

        assert!(is_completed(&gap(1.0, 1.0, 2.0, 2.0), tile, all_box, 0.001));
        assert!(!is_completed(&gap(9.0, 1.0, 10.0, 2.0), tile, all_box, 0.001));
        assert!(!is_completed(&gap(1.0, 9.0, 2.0, 10.0), tile, all_box, 0.001));

        let top_right = Rect::new(Coord { x: 10.0, y: 10.0 }, Coord { x: 20.0, y: 20.0 });
        assert!(is_completed(&gap(9.0, 9.0, 20.0, 20.0), top_right, all_box, 0.001));
    }

    #[test]
    fn test_invalid_configuration() {
        let (mut dataset, table) = sliver_dataset();
        let lines = dataset.add_table(FeatureTable::new(
            "lines",
            GeometryType::Polyline,
            Tolerance::default(),
        ));
        assert!(NoGaps::new(&dataset, &[], NoGapsOptions::default()).is_err());
        assert!(NoGaps::new(&dataset, &[lines], NoGapsOptions::default()).is_err());
        let negative = NoGapsOptions {
            sliver_limit: -1.0,
            ..Default::default()
        };
        assert!(NoGaps::new(&dataset, &[table], negative).is_err());
        let narrow = NoGapsOptions {
            subtile_width: 0.05,
            ..Default::default()
        };
        assert!(matches!(
            NoGaps::new(&dataset, &[table], narrow),
            Err(TopoError::InvalidConfiguration { .. })
        ));
        let aoi_lines = NoGapsOptions {
            area_of_interest_tables: vec![lines],
            ..Default::default()
        };
        assert!(NoGaps::new(&dataset, &[table], aoi_lines).is_err());
    }
}
