//! JSON scenario files
//!
//! A scenario lists the feature tables of a dataset and the checks to run on them. Tables are
//! referenced by name, coordinates are `[x, y]` pairs:
//!
//! ```json
//! {
//!   "container": { "tile_size": 500.0 },
//!   "tables": [
//!     { "name": "roads", "geometry_type": "Polyline", "xy_tolerance": 0.01,
//!       "features": [ { "oid": 1, "attributes": { "KIND": "main" },
//!                       "geometry": { "type": "polyline", "paths": [[[0, 0], [10, 0]]] } } ] }
//!   ],
//!   "checks": [ { "check": "pseudo_nodes", "tables": ["roads"] } ]
//! }
//! ```

use geo::{Coord, LineString, MultiLineString, MultiPolygon, Polygon};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use topo_qa_lib::checks::{
    BorderingLinesOptions, CoveredByOther, CoveredByOtherOptions, CrossingLinesOptions,
    EdgeMatchBorderingLines, EdgeMatchCrossingLines, EdgeMatchTables, FullCoincidence,
    FullCoincidenceOptions, GroupConnected, GroupConnectedOptions, NoGaps, NoGapsOptions,
    PseudoNodes, PseudoNodesOptions, ShapeAllowed, TopoNotNear, TopoNotNearOptions,
};
use topo_qa_lib::{
    ContainerCheck, ContainerConfig, Dataset, Feature, FeatureTable, Geometry, GeometryType,
    TableId, Tolerance, TopoError, Value,
};

/// Errors while loading or resolving a scenario
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("Cannot read scenario {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid scenario JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown table '{0}'")]
    UnknownTable(String),

    #[error("Duplicate table '{0}'")]
    DuplicateTable(String),

    #[error("Check #{index}: {source}")]
    Check { index: usize, source: TopoError },

    #[error(transparent)]
    Library(#[from] TopoError),
}

/// Coordinates of a feature geometry
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GeometrySpec {
    Point { coordinates: [f64; 2] },
    Multipoint { coordinates: Vec<[f64; 2]> },
    Polyline { paths: Vec<Vec<[f64; 2]>> },
    /// Polygons as lists of rings, the first ring of each polygon is its exterior
    Polygon { polygons: Vec<Vec<Vec<[f64; 2]>>> },
}

fn ring(coords: &[[f64; 2]]) -> LineString<f64> {
    LineString::new(coords.iter().map(|&[x, y]| Coord { x, y }).collect())
}

impl GeometrySpec {
    pub fn to_geometry(&self) -> Geometry {
        match self {
            GeometrySpec::Point { coordinates: [x, y] } => Geometry::point(*x, *y),
            GeometrySpec::Multipoint { coordinates } => Geometry::points(
                &coordinates
                    .iter()
                    .map(|&[x, y]| Coord { x, y })
                    .collect::<Vec<_>>(),
            ),
            GeometrySpec::Polyline { paths } => {
                Geometry::Polyline(MultiLineString::new(paths.iter().map(|p| ring(p)).collect()))
            }
            GeometrySpec::Polygon { polygons } => Geometry::Polygon(MultiPolygon::new(
                polygons
                    .iter()
                    .filter_map(|rings| {
                        let (exterior, interiors) = rings.split_first()?;
                        Some(Polygon::new(
                            ring(exterior),
                            interiors.iter().map(|r| ring(r)).collect(),
                        ))
                    })
                    .collect(),
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeatureSpec {
    pub oid: i64,
    pub geometry: GeometrySpec,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub geometry_type: GeometryType,
    /// Default: the library's default tolerance
    #[serde(default)]
    pub xy_tolerance: Option<f64>,
    #[serde(default)]
    pub features: Vec<FeatureSpec>,
}

/// One check and the names of the tables it runs on
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum CheckSpec {
    TopoNotNear {
        table: String,
        #[serde(default)]
        reference: Option<String>,
        near: f64,
        min_length: f64,
        #[serde(default)]
        options: TopoNotNearOptions,
    },
    EdgeMatchBorderingLines {
        line1: String,
        border1: String,
        line2: String,
        border2: String,
        search_distance: f64,
        #[serde(default)]
        options: BorderingLinesOptions,
    },
    EdgeMatchCrossingLines {
        line1: String,
        border1: String,
        line2: String,
        border2: String,
        search_distance: f64,
        #[serde(default)]
        options: CrossingLinesOptions,
    },
    FullCoincidence {
        table: String,
        references: Vec<String>,
        near: f64,
        #[serde(default)]
        options: FullCoincidenceOptions,
    },
    NoGaps {
        tables: Vec<String>,
        #[serde(default)]
        area_of_interest: Vec<String>,
        #[serde(default)]
        options: NoGapsOptions,
    },
    GroupConnected {
        tables: Vec<String>,
        group_by: Vec<String>,
        #[serde(default)]
        allowed_shape: ShapeAllowed,
        #[serde(default)]
        options: GroupConnectedOptions,
    },
    PseudoNodes {
        tables: Vec<String>,
        #[serde(default)]
        valid_pseudo_node_tables: Vec<String>,
        #[serde(default)]
        options: PseudoNodesOptions,
    },
    CoveredByOther {
        covering: Vec<String>,
        covered: Vec<String>,
        #[serde(default)]
        area_of_interest: Vec<String>,
        #[serde(default)]
        options: CoveredByOtherOptions,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub container: ContainerConfig,
    pub tables: Vec<TableSpec>,
    #[serde(default)]
    pub checks: Vec<CheckSpec>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let text = std::fs::read_to_string(path).map_err(|source| ScenarioError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let scenario: Scenario = serde_json::from_str(&text)?;
        tracing::info!(
            path = %path.display(),
            tables = scenario.tables.len(),
            checks = scenario.checks.len(),
            "Scenario loaded"
        );
        Ok(scenario)
    }

    /// Build the dataset; table ids follow the order of the tables in the scenario
    pub fn dataset(&self) -> Result<Dataset, ScenarioError> {
        let mut dataset = Dataset::new();
        for (i, spec) in self.tables.iter().enumerate() {
            if self.tables[..i].iter().any(|t| t.name.eq_ignore_ascii_case(&spec.name)) {
                return Err(ScenarioError::DuplicateTable(spec.name.clone()));
            }
            let tolerance = match spec.xy_tolerance {
                Some(t) => Tolerance::new(t)?,
                None => Tolerance::default(),
            };
            let mut table = FeatureTable::new(spec.name.clone(), spec.geometry_type, tolerance);
            for feature in &spec.features {
                let mut row = Feature::new(feature.oid, feature.geometry.to_geometry());
                for (field, value) in &feature.attributes {
                    row.set_attribute(field, value.clone());
                }
                table.add(row)?;
            }
            tracing::debug!(table = %spec.name, features = spec.features.len(), "Table loaded");
            dataset.add_table(table);
        }
        Ok(dataset)
    }

    fn table_id(&self, name: &str) -> Result<TableId, ScenarioError> {
        self.tables
            .iter()
            .position(|t| t.name.eq_ignore_ascii_case(name))
            .map(TableId)
            .ok_or_else(|| ScenarioError::UnknownTable(name.to_string()))
    }

    fn table_ids(&self, names: &[String]) -> Result<Vec<TableId>, ScenarioError> {
        names.iter().map(|n| self.table_id(n)).collect()
    }

    fn edge_match_tables(
        &self,
        line1: &str,
        border1: &str,
        line2: &str,
        border2: &str,
    ) -> Result<EdgeMatchTables, ScenarioError> {
        Ok(EdgeMatchTables::new(
            self.table_id(line1)?,
            self.table_id(border1)?,
            self.table_id(line2)?,
            self.table_id(border2)?,
        ))
    }

    /// Configure the checks against `dataset`
    pub fn checks(&self, dataset: &Dataset) -> Result<Vec<Box<dyn ContainerCheck>>, ScenarioError> {
        self.checks
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                self.check(dataset, spec).map_err(|e| match e {
                    ScenarioError::Library(source) => ScenarioError::Check { index, source },
                    other => other,
                })
            })
            .collect()
    }

    fn check(
        &self,
        dataset: &Dataset,
        spec: &CheckSpec,
    ) -> Result<Box<dyn ContainerCheck>, ScenarioError> {
        let check: Box<dyn ContainerCheck> = match spec {
            CheckSpec::TopoNotNear {
                table,
                reference,
                near,
                min_length,
                options,
            } => {
                let reference = reference.as_deref().map(|r| self.table_id(r)).transpose()?;
                Box::new(TopoNotNear::new(
                    dataset,
                    self.table_id(table)?,
                    reference,
                    *near,
                    *min_length,
                    options.clone(),
                )?)
            }
            CheckSpec::EdgeMatchBorderingLines {
                line1,
                border1,
                line2,
                border2,
                search_distance,
                options,
            } => Box::new(EdgeMatchBorderingLines::new(
                dataset,
                self.edge_match_tables(line1, border1, line2, border2)?,
                *search_distance,
                options.clone(),
            )?),
            CheckSpec::EdgeMatchCrossingLines {
                line1,
                border1,
                line2,
                border2,
                search_distance,
                options,
            } => Box::new(EdgeMatchCrossingLines::new(
                dataset,
                self.edge_match_tables(line1, border1, line2, border2)?,
                *search_distance,
                options.clone(),
            )?),
            CheckSpec::FullCoincidence {
                table,
                references,
                near,
                options,
            } => Box::new(FullCoincidence::new(
                dataset,
                self.table_id(table)?,
                &self.table_ids(references)?,
                *near,
                options.clone(),
            )?),
            CheckSpec::NoGaps {
                tables,
                area_of_interest,
                options,
            } => {
                let mut options = options.clone();
                options.area_of_interest_tables.extend(self.table_ids(area_of_interest)?);
                Box::new(NoGaps::new(dataset, &self.table_ids(tables)?, options)?)
            }
            CheckSpec::GroupConnected {
                tables,
                group_by,
                allowed_shape,
                options,
            } => {
                let group_by: Vec<&str> = group_by.iter().map(String::as_str).collect();
                Box::new(GroupConnected::new(
                    dataset,
                    &self.table_ids(tables)?,
                    &group_by,
                    *allowed_shape,
                    options.clone(),
                )?)
            }
            CheckSpec::PseudoNodes {
                tables,
                valid_pseudo_node_tables,
                options,
            } => {
                let mut options = options.clone();
                options
                    .valid_pseudo_node_tables
                    .extend(self.table_ids(valid_pseudo_node_tables)?);
                Box::new(PseudoNodes::new(dataset, &self.table_ids(tables)?, options)?)
            }
            CheckSpec::CoveredByOther {
                covering,
                covered,
                area_of_interest,
                options,
            } => {
                let mut options = options.clone();
                options.area_of_interest_tables.extend(self.table_ids(area_of_interest)?);
                Box::new(CoveredByOther::new(
                    dataset,
                    &self.table_ids(covering)?,
                    &self.table_ids(covered)?,
                    options,
                )?)
            }
        };
        Ok(check)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"{
        "container": { "tile_size": 50.0 },
        "tables": [
            { "name": "roads", "geometry_type": "Polyline",
              "features": [
                { "oid": 1, "attributes": { "kind": "main" },
                  "geometry": { "type": "polyline", "paths": [[[0, 0], [10, 0]]] } },
                { "oid": 2, "attributes": { "kind": "main" },
                  "geometry": { "type": "polyline", "paths": [[[10, 0], [20, 0]]] } }
              ] },
            { "name": "parcels", "geometry_type": "Polygon", "xy_tolerance": 0.01,
              "features": [
                { "oid": 1, "geometry": { "type": "polygon",
                  "polygons": [[[[0, 0], [10, 0], [10, 10], [0, 10], [0, 0]]]] } }
              ] }
        ],
        "checks": [
            { "check": "pseudo_nodes", "tables": ["roads"] },
            { "check": "covered_by_other", "covering": ["parcels"], "covered": ["roads"],
              "options": { "allowed_uncovered_percentage": 10.0 } }
        ]
    }"#;

    #[test]
    fn test_build_scenario() {
        let scenario: Scenario = serde_json::from_str(SCENARIO).unwrap();
        assert_eq!(scenario.container.tile_size, 50.0);
        let dataset = scenario.dataset().unwrap();
        let roads = dataset.table(TableId(0)).unwrap();
        assert_eq!(roads.features().len(), 2);
        assert_eq!(
            roads.features()[0].attribute("KIND"),
            &Value::Text("main".to_string())
        );
        assert_eq!(dataset.table(TableId(1)).unwrap().tolerance().xy_tolerance, 0.01);

        let checks = scenario.checks(&dataset).unwrap();
        assert_eq!(checks.len(), 2);
    }

    #[test]
    fn test_unknown_table() {
        let mut scenario: Scenario = serde_json::from_str(SCENARIO).unwrap();
        scenario.checks.push(CheckSpec::PseudoNodes {
            tables: vec!["rivers".to_string()],
            valid_pseudo_node_tables: Vec::new(),
            options: PseudoNodesOptions::default(),
        });
        let dataset = scenario.dataset().unwrap();
        assert!(matches!(
            scenario.checks(&dataset),
            Err(ScenarioError::UnknownTable(name)) if name == "rivers"
        ));
    }

    #[test]
    fn test_invalid_check_reports_index() {
        let mut scenario: Scenario = serde_json::from_str(SCENARIO).unwrap();
        scenario.checks.push(CheckSpec::GroupConnected {
            tables: vec!["parcels".to_string()],
            group_by: vec!["KIND".to_string()],
            allowed_shape: ShapeAllowed::default(),
            options: GroupConnectedOptions::default(),
        });
        let dataset = scenario.dataset().unwrap();
        assert!(matches!(
            scenario.checks(&dataset),
            Err(ScenarioError::Check { index: 2, .. })
        ));
    }

    #[test]
    fn test_duplicate_table() {
        let mut scenario: Scenario = serde_json::from_str(SCENARIO).unwrap();
        let mut copy = scenario.tables[0].clone();
        copy.name = "ROADS".to_string();
        scenario.tables.push(copy);
        assert!(matches!(scenario.dataset(), Err(ScenarioError::DuplicateTable(_))));
    }
}
