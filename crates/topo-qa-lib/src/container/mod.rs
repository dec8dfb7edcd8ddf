//! Tile-based execution of checks
//!
//! The [`TestContainer`] divides the verified extent into tiles and feeds every row to the
//! checks registered on its table. A row is passed to a check in the first tile (in scan order)
//! its envelope intersects, unless the check asks to see it again in every tile. While a tile is
//! processed, checks search neighbouring rows through the [`TileContext`], which answers from a
//! tile cache and falls back to whole-table indexes for searches reaching beyond it.

mod cache;
mod tiles;

use crate::feature::{Dataset, TableId, TableRow};
use crate::geometry::{expand_rect, rect_contains, rect_union, rects_intersect};
use crate::issue::{ErrorCollector, QaError};
use crate::{Result, TopoError};
use cache::{TableIndex, TileCache};
use geo::Rect;
use std::collections::HashMap;
use tiles::{TileGrid, TileRange};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration of a container run
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct ContainerConfig {
    /// Edge length of the square tiles, in dataset units.
    /// Default: 10000
    pub tile_size: f64,
    /// Keep error geometries in the returned issues.
    /// Default: true
    pub keep_error_geometry: bool,
    /// Drop issues identical to one reported before (same check, code, description, rows and
    /// error envelope).
    /// Default: true
    pub filter_duplicate_errors: bool,
    /// Verified extent; the union of all feature envelopes when unset.
    /// Default: None
    pub extent: Option<Rect<f64>>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            tile_size: 10000.0,
            keep_error_geometry: true,
            filter_duplicate_errors: true,
            extent: None,
        }
    }
}

impl ContainerConfig {
    fn validate(&self) -> Result<()> {
        if self.tile_size.is_nan() || self.tile_size <= 0.0 {
            return Err(TopoError::config(format!(
                "tile size must be positive, got {}",
                self.tile_size
            )));
        }
        Ok(())
    }
}

/// Progress of a tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TileState {
    /// Before the first tile
    Initial,
    /// After a tile that is not the last one
    Progressing,
    /// After the last tile
    Final,
}

/// Passed to [`ContainerCheck::complete_tile`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileInfo {
    pub state: TileState,
    /// The tile just completed; `None` for [`TileState::Initial`]
    pub current_box: Option<Rect<f64>>,
    /// The whole verified extent
    pub all_box: Rect<f64>,
}

/// Passed to [`ContainerCheck::begin_tile`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeginTileParameters {
    pub tile_box: Rect<f64>,
    pub all_box: Rect<f64>,
    /// Extent given to the run, if any
    pub test_run_extent: Option<Rect<f64>>,
}

/// Verification state of a feature within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FeatureState {
    /// Not yet seen by any tile, or outside the verified extent
    #[default]
    Pending,
    /// Seen, but some of the tiles it intersects are still to come
    PartiallyVerified,
    /// All tiles it intersects have been processed
    Verified,
}

/// Step reported to [`ContainerObserver::on_progress`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ProgressStep {
    TileProcessing,
    TileProcessed,
}

/// Callbacks invoked synchronously while a container runs
pub trait ContainerObserver {
    /// Called before and after each tile; `current` counts from 1
    fn on_progress(&mut self, _step: ProgressStep, _current: usize, _total: usize) {}

    /// Return false to skip a row for a check
    fn should_process(&mut self, _check: &str, _row: &TableRow) -> bool {
        true
    }
}

/// Observer that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ContainerObserver for NoopObserver {}

/// A check executed by the [`TestContainer`]
pub trait ContainerCheck: Send {
    /// Name used in issues and logs
    fn name(&self) -> &str;

    /// Tables whose rows are passed to [`ContainerCheck::execute_row`]
    fn tables(&self) -> &[TableId];

    /// Distance around a row within which the check searches for neighbours
    fn search_distance(&self) -> f64 {
        0.0
    }

    /// Pass rows of `table` in every tile they intersect instead of the first one only
    fn retest_rows_per_intersected_tile(&self, _table: TableId) -> bool {
        false
    }

    fn begin_tile(&mut self, _parameters: &BeginTileParameters) {}

    /// Check one row
    fn execute_row(
        &mut self,
        row: &TableRow,
        ctx: &TileContext<'_>,
        errors: &mut ErrorCollector,
    ) -> Result<()>;

    /// Called before the first tile and after each tile
    fn complete_tile(
        &mut self,
        _tile: &TileInfo,
        _ctx: &TileContext<'_>,
        _errors: &mut ErrorCollector,
    ) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct ArenaEntry {
    range: TileRange,
    first_tile: usize,
    state: FeatureState,
}

/// Per feature verification state, keyed by table and object id
#[derive(Debug, Default)]
struct FeatureArena {
    entries: HashMap<(TableId, i64), ArenaEntry>,
    /// Keys grouped by the last tile they intersect
    by_last_tile: Vec<Vec<(TableId, i64)>>,
    /// Keys grouped by the first tile they intersect
    by_first_tile: Vec<Vec<(TableId, i64)>>,
}

impl FeatureArena {
    fn build(dataset: &Dataset, tables: &[TableId], grid: &TileGrid) -> Self {
        let mut arena = FeatureArena {
            entries: HashMap::new(),
            by_last_tile: vec![Vec::new(); grid.count()],
            by_first_tile: vec![Vec::new(); grid.count()],
        };
        for &table in tables {
            let Ok(features) = dataset.table(table) else {
                continue;
            };
            for feature in features.features() {
                let Some(envelope) = feature.envelope() else {
                    continue;
                };
                if !rects_intersect(envelope, grid.all_box()) {
                    continue;
                }
                let range = grid.range(envelope);
                let (first_tile, last_tile) = (grid.first(&range), grid.last(&range));
                let key = (table, feature.oid);
                arena.entries.insert(
                    key,
                    ArenaEntry {
                        range,
                        first_tile,
                        state: FeatureState::Pending,
                    },
                );
                arena.by_first_tile[first_tile].push(key);
                arena.by_last_tile[last_tile].push(key);
            }
        }
        arena
    }

    fn get(&self, key: (TableId, i64)) -> Option<&ArenaEntry> {
        self.entries.get(&key)
    }

    fn state(&self, key: (TableId, i64)) -> FeatureState {
        self.entries
            .get(&key)
            .map(|e| e.state)
            .unwrap_or(FeatureState::Pending)
    }

    /// Advance the states after `tile` has been processed
    fn complete_tile(&mut self, tile: usize) {
        for key in &self.by_first_tile[tile] {
            if let Some(entry) = self.entries.get_mut(key) {
                entry.state = FeatureState::PartiallyVerified;
            }
        }
        for key in &self.by_last_tile[tile] {
            if let Some(entry) = self.entries.get_mut(key) {
                entry.state = FeatureState::Verified;
            }
        }
    }
}

/// Read access to the dataset while a tile is processed
pub struct TileContext<'a> {
    dataset: &'a Dataset,
    sources: &'a [TableIndex],
    cache: &'a TileCache,
    arena: &'a FeatureArena,
    current_box: Option<Rect<f64>>,
    all_box: Rect<f64>,
    test_run_extent: Option<Rect<f64>>,
}

impl<'a> TileContext<'a> {
    pub fn dataset(&self) -> &'a Dataset {
        self.dataset
    }

    /// Rows of `table` whose envelope intersects `area`, ordered by object id
    pub fn search(&self, table: TableId, area: Rect<f64>) -> Vec<TableRow> {
        let Ok(features) = self.dataset.table(table) else {
            return Vec::new();
        };
        let mut rows: Vec<TableRow> = self
            .cache
            .query(self.sources, table, area)
            .into_iter()
            .map(|i| TableRow {
                table,
                feature: features.features()[i].clone(),
            })
            .collect();
        rows.sort_by_key(|r| r.oid());
        rows
    }

    /// The tile being processed; `None` before the first tile
    pub fn current_tile(&self) -> Option<Rect<f64>> {
        self.current_box
    }

    pub fn all_box(&self) -> Rect<f64> {
        self.all_box
    }

    pub fn test_run_extent(&self) -> Option<Rect<f64>> {
        self.test_run_extent
    }

    /// True if `rect` is not fully inside the extent given to the run
    pub fn is_outside_test_run(&self, rect: Rect<f64>) -> bool {
        self.test_run_extent
            .is_some_and(|extent| !rect_contains(extent, rect))
    }

    pub fn feature_state(&self, table: TableId, oid: i64) -> FeatureState {
        self.arena.state((table, oid))
    }
}

/// Runs checks tile by tile over a dataset
pub struct TestContainer {
    dataset: Dataset,
    config: ContainerConfig,
    checks: Vec<Box<dyn ContainerCheck>>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl TestContainer {
    pub fn new(dataset: Dataset, config: ContainerConfig) -> Self {
        Self {
            dataset,
            config,
            checks: Vec::new(),
        }
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ContainerConfig {
        &mut self.config
    }

    /// Register a check; all its tables must belong to the dataset
    pub fn add_check(&mut self, check: Box<dyn ContainerCheck>) -> Result<()> {
        for &table in check.tables() {
            self.dataset.table(table)?;
        }
        self.checks.push(check);
        Ok(())
    }

    pub fn check_count(&self) -> usize {
        self.checks.len()
    }

    /// Run all checks over the configured extent
    pub fn execute(&mut self, observer: &mut dyn ContainerObserver) -> Result<Vec<QaError>> {
        let extent = self.config.extent;
        self.run(extent, observer)
    }

    /// Run all checks over `extent`
    pub fn execute_in(
        &mut self,
        extent: Rect<f64>,
        observer: &mut dyn ContainerObserver,
    ) -> Result<Vec<QaError>> {
        self.run(Some(extent), observer)
    }

    fn run(
        &mut self,
        extent: Option<Rect<f64>>,
        observer: &mut dyn ContainerObserver,
    ) -> Result<Vec<QaError>> {
        #[cfg(feature = "profiling")]
        profiling::scope!("container::run");

        self.config.validate()?;
        let Self {
            dataset,
            config,
            checks,
        } = self;
        let dataset: &Dataset = dataset;

        let mut involved: Vec<TableId> = checks.iter().flat_map(|c| c.tables()).copied().collect();
        involved.sort();
        involved.dedup();

        let all_box = match extent {
            Some(extent) => Some(extent),
            None => involved
                .iter()
                .filter_map(|&t| dataset.table(t).ok()?.extent())
                .reduce(rect_union),
        };
        let Some(all_box) = all_box else {
            tracing::info!("No features to verify");
            return Ok(Vec::new());
        };

        let sources = cache::build_source_indexes(dataset);
        let grid = TileGrid::new(all_box, config.tile_size);
        let mut arena = FeatureArena::build(dataset, &involved, &grid);
        let search_distance = checks
            .iter()
            .map(|c| c.search_distance())
            .filter(|d| d.is_finite())
            .fold(0.0_f64, f64::max);

        let resolution = involved
            .iter()
            .filter_map(|&t| dataset.table(t).ok())
            .map(|t| t.tolerance().resolution)
            .fold(f64::INFINITY, f64::min);
        let table_names = dataset.tables().iter().map(|t| t.name().to_string()).collect();
        let mut errors = ErrorCollector::new(
            table_names,
            config.keep_error_geometry,
            config.filter_duplicate_errors,
            if resolution.is_finite() { resolution } else { 0.0 },
        )
        .with_extent(extent);

        let tile_count = grid.count();
        tracing::info!(
            checks = checks.len(),
            tiles = tile_count,
            tile_size = config.tile_size,
            "Starting verification"
        );

        let mut cache = TileCache::default();
        {
            let ctx = TileContext {
                dataset,
                sources: &sources,
                cache: &cache,
                arena: &arena,
                current_box: None,
                all_box,
                test_run_extent: extent,
            };
            let info = TileInfo {
                state: TileState::Initial,
                current_box: None,
                all_box,
            };
            for check in checks.iter_mut() {
                errors.set_check(check.name());
                check.complete_tile(&info, &ctx, &mut errors)?;
            }
        }

        for tile in 0..tile_count {
            #[cfg(feature = "profiling")]
            profiling::scope!("container::tile");

            let tile_box = grid.tile_box(tile);
            observer.on_progress(ProgressStep::TileProcessing, tile + 1, tile_count);

            cache = TileCache::load(
                dataset,
                &sources,
                &involved,
                expand_rect(tile_box, search_distance),
            );
            let errors_before = errors.len();
            let mut rows_executed = 0usize;

            let ctx = TileContext {
                dataset,
                sources: &sources,
                cache: &cache,
                arena: &arena,
                current_box: Some(tile_box),
                all_box,
                test_run_extent: extent,
            };

            for check in checks.iter_mut() {
                errors.set_check(check.name());
                check.begin_tile(&BeginTileParameters {
                    tile_box,
                    all_box,
                    test_run_extent: extent,
                });

                let mut tables = check.tables().to_vec();
                tables.sort();
                tables.dedup();
                for table in tables {
                    let retest = check.retest_rows_per_intersected_tile(table);
                    for row in ctx.search(table, tile_box) {
                        let Some(entry) = arena.get(row.key()) else {
                            continue;
                        };
                        let due = entry.first_tile == tile
                            || (retest && grid.contains(&entry.range, tile));
                        if !due || !observer.should_process(check.name(), &row) {
                            continue;
                        }
                        tracing::trace!(check = check.name(), oid = row.oid(), "Executing row");
                        check.execute_row(&row, &ctx, &mut errors)?;
                        rows_executed += 1;
                    }
                }
            }

            arena.complete_tile(tile);
            let ctx = TileContext {
                dataset,
                sources: &sources,
                cache: &cache,
                arena: &arena,
                current_box: Some(tile_box),
                all_box,
                test_run_extent: extent,
            };
            let info = TileInfo {
                state: if tile + 1 < tile_count {
                    TileState::Progressing
                } else {
                    TileState::Final
                },
                current_box: Some(tile_box),
                all_box,
            };
            for check in checks.iter_mut() {
                errors.set_check(check.name());
                check.complete_tile(&info, &ctx, &mut errors)?;
            }

            tracing::debug!(
                tile = tile + 1,
                of = tile_count,
                cached_rows = cache.len(),
                rows = rows_executed,
                errors = errors.len() - errors_before,
                "Tile processed"
            );
            observer.on_progress(ProgressStep::TileProcessed, tile + 1, tile_count);
        }

        tracing::info!(errors = errors.len(), "Verification completed");
        Ok(errors.into_errors())
    }
}
