//! Source indexes and the per-tile feature cache

use crate::feature::{Dataset, FeatureTable, TableId};
use crate::geometry::rect_contains;
use crate::index::Quadtree;
use geo::Rect;
use rayon::prelude::*;

/// Index of feature positions within their table
pub(crate) type TableIndex = Quadtree<usize>;

fn envelopes(table: &FeatureTable) -> Vec<(Rect<f64>, usize)> {
    table
        .features()
        .iter()
        .enumerate()
        .filter_map(|(i, f)| f.envelope().map(|r| (r, i)))
        .collect()
}

/// Build one index per table of the dataset, in parallel
pub(crate) fn build_source_indexes(dataset: &Dataset) -> Vec<TableIndex> {
    #[cfg(feature = "profiling")]
    profiling::scope!("container::build_source_indexes");

    dataset
        .tables()
        .par_iter()
        .map(|table| Quadtree::from_items(envelopes(table)))
        .collect()
}

/// Features of the involved tables near the current tile
///
/// Queries fully inside the cached box are answered from the cache; everything else falls back
/// to the source index.
#[derive(Debug, Default)]
pub(crate) struct TileCache {
    cache_box: Option<Rect<f64>>,
    tables: Vec<Option<TableIndex>>,
}

impl TileCache {
    /// Load the features intersecting `cache_box` for the given tables
    pub fn load(
        dataset: &Dataset,
        sources: &[TableIndex],
        tables: &[TableId],
        cache_box: Rect<f64>,
    ) -> Self {
        #[cfg(feature = "profiling")]
        profiling::scope!("container::load_tile_cache");

        let mut cached: Vec<Option<TableIndex>> = vec![None; dataset.tables().len()];
        for &table in tables {
            let (Some(source), Ok(features)) = (sources.get(table.0), dataset.table(table)) else {
                continue;
            };
            let items: Vec<(Rect<f64>, usize)> = source
                .query(cache_box)
                .into_iter()
                .filter_map(|&i| features.features()[i].envelope().map(|r| (r, i)))
                .collect();
            tracing::trace!(table = features.name(), rows = items.len(), "Cached tile rows");

            let mut index = Quadtree::new(cache_box);
            for (rect, i) in items {
                index.insert(rect, i);
            }
            cached[table.0] = Some(index);
        }

        Self {
            cache_box: Some(cache_box),
            tables: cached,
        }
    }

    /// Number of cached rows
    pub fn len(&self) -> usize {
        self.tables.iter().flatten().map(|t| t.len()).sum()
    }

    /// Positions of the features of `table` whose envelope intersects `area`
    pub fn query(&self, sources: &[TableIndex], table: TableId, area: Rect<f64>) -> Vec<usize> {
        let cached = self
            .cache_box
            .filter(|b| rect_contains(*b, area))
            .and_then(|_| self.tables.get(table.0)?.as_ref());

        let index = match cached {
            Some(index) => index,
            None => match sources.get(table.0) {
                Some(index) => index,
                None => return Vec::new(),
            },
        };
        let mut found: Vec<usize> = index.query(area).into_iter().copied().collect();
        found.sort_unstable();
        found
    }
}
