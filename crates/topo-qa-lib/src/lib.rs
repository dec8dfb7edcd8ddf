//! Topo QA Library - Tile-based topological quality checks
//!
//! This library verifies line and polygon datasets for topological consistency: edge matching
//! across administrative borders, coincidence between networks, gaps in polygon mosaics,
//! connectivity of line groups, pseudo nodes, coverage by other tables and proximity of lines
//! that must keep a minimum distance.
//!
//! # Architecture
//!
//! - **[`geometry`]**: Tolerance model and planar helpers on top of `geo`
//! - **[`hull`]**: Segment hulls ("auras") and their parametric cut algorithm
//! - **[`coverage`]**: Segment parts and subcurves used for coverage accounting
//! - **[`TestContainer`]**: Tiling engine feeding rows to [`ContainerCheck`]s
//! - **[`checks`]**: The check implementations and their issue codes
//! - **[`QaError`]**: Immutable issue records returned by a run
//!
//! # Performance Characteristics
//!
//! - **Index Build**: O(N log N) per table, tables indexed in parallel
//! - **Tile Query**: O(log D + K) where D=depth, K=results
//! - **Memory**: one tile cache at a time, plus cross-tile state kept by the checks

pub mod checks;
pub mod container;
pub mod coverage;
pub mod expression;
mod feature;
pub mod geometry;
pub mod hull;
mod index;
mod issue;

// Public API exports
pub use container::{
    BeginTileParameters, ContainerCheck, ContainerConfig, ContainerObserver, FeatureState,
    NoopObserver, ProgressStep, TestContainer, TileContext, TileInfo, TileState,
};
pub use feature::{Dataset, Feature, FeatureTable, Geometry, GeometryType, TableId, TableRow, Value};
pub use geometry::Tolerance;
pub use index::Quadtree;
pub use issue::{ErrorCollector, InvolvedRow, IssueCode, QaError};

/// Error types for the library
#[derive(Debug, thiserror::Error)]
pub enum TopoError {
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    #[error("Invalid expression: {0}")]
    Expression(String),

    #[error("Unknown table id: {0}")]
    UnknownTable(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TopoError {
    /// Shorthand for a configuration error
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        TopoError::InvalidConfiguration {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TopoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that all public types are accessible
        let _: fn(Dataset, ContainerConfig) -> TestContainer = TestContainer::new;
        let _: fn() -> ContainerConfig = ContainerConfig::default;
    }

    #[test]
    fn test_config_error_message() {
        let err = TopoError::config("too many conditions");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: too many conditions"
        );
    }
}
