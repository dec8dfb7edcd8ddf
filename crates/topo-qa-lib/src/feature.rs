//! Feature model - tables of rows with a geometry and attribute values
//!
//! This is the read-only row provider the checks run against. Field names are stored in upper
//! case so that condition expressions can reference them case-insensitively.

use crate::geometry::{Tolerance, polygon_boundary};
use crate::{Result, TopoError};
use geo::{BoundingRect, Coord, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Rect};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Attribute value of a row
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(untagged))]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Null => None,
        }
    }

    /// Compare two values; `None` if either is null or the types are not comparable
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (a, b) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        }
    }

    /// Attribute equality as used when comparing rows: nulls are equal to each other
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (a, b) => a.compare(b) == Some(Ordering::Equal),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "<null>"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

/// Declared geometry type of a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum GeometryType {
    Point,
    Multipoint,
    Polyline,
    Polygon,
}

/// Geometry of a feature or an issue
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Geometry {
    Point(Point<f64>),
    MultiPoint(MultiPoint<f64>),
    Polyline(MultiLineString<f64>),
    Polygon(MultiPolygon<f64>),
}

impl Geometry {
    /// Single part polyline from coordinate pairs
    pub fn line(coords: &[(f64, f64)]) -> Self {
        Geometry::Polyline(MultiLineString::new(vec![LineString::from(coords.to_vec())]))
    }

    /// Single polygon (no holes) from the exterior ring coordinates
    pub fn polygon(exterior: &[(f64, f64)]) -> Self {
        Geometry::Polygon(MultiPolygon::new(vec![geo::Polygon::new(
            LineString::from(exterior.to_vec()),
            vec![],
        )]))
    }

    pub fn point(x: f64, y: f64) -> Self {
        Geometry::Point(Point::new(x, y))
    }

    /// Multipoint from coordinates
    pub fn points(coords: &[Coord<f64>]) -> Self {
        Geometry::MultiPoint(MultiPoint::new(
            coords.iter().map(|&c| Point::from(c)).collect(),
        ))
    }

    pub fn geometry_type(&self) -> GeometryType {
        match self {
            Geometry::Point(_) => GeometryType::Point,
            Geometry::MultiPoint(_) => GeometryType::Multipoint,
            Geometry::Polyline(_) => GeometryType::Polyline,
            Geometry::Polygon(_) => GeometryType::Polygon,
        }
    }

    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        match self {
            Geometry::Point(p) => Some(p.bounding_rect()),
            Geometry::MultiPoint(mp) => mp.bounding_rect(),
            Geometry::Polyline(lines) => lines.bounding_rect(),
            Geometry::Polygon(polygons) => polygons.bounding_rect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Geometry::Point(_) => false,
            Geometry::MultiPoint(mp) => mp.0.is_empty(),
            Geometry::Polyline(lines) => lines.0.iter().all(|l| l.0.len() < 2),
            Geometry::Polygon(polygons) => polygons.0.is_empty(),
        }
    }

    pub fn as_lines(&self) -> Option<&MultiLineString<f64>> {
        match self {
            Geometry::Polyline(lines) => Some(lines),
            _ => None,
        }
    }

    pub fn as_polygons(&self) -> Option<&MultiPolygon<f64>> {
        match self {
            Geometry::Polygon(polygons) => Some(polygons),
            _ => None,
        }
    }

    /// Linear view: polylines as they are, polygons as their boundary
    pub fn linear(&self) -> Option<MultiLineString<f64>> {
        match self {
            Geometry::Polyline(lines) => Some(lines.clone()),
            Geometry::Polygon(polygons) => Some(polygon_boundary(polygons)),
            _ => None,
        }
    }

    /// Point coordinates of point geometries
    pub fn point_coords(&self) -> Vec<Coord<f64>> {
        match self {
            Geometry::Point(p) => vec![p.0],
            Geometry::MultiPoint(mp) => mp.0.iter().map(|p| p.0).collect(),
            _ => Vec::new(),
        }
    }
}

/// A row of a feature table
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Feature {
    /// Object id, unique within its table
    pub oid: i64,
    pub geometry: Geometry,
    /// Attribute values keyed by upper-case field name
    #[cfg_attr(feature = "serde", serde(default))]
    attributes: BTreeMap<String, Value>,
}

impl Feature {
    pub fn new(oid: i64, geometry: Geometry) -> Self {
        Self {
            oid,
            geometry,
            attributes: BTreeMap::new(),
        }
    }

    /// Builder style attribute setter
    pub fn with_attribute(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set_attribute(field, value);
        self
    }

    pub fn set_attribute(&mut self, field: &str, value: impl Into<Value>) {
        self.attributes.insert(field.to_uppercase(), value.into());
    }

    /// Attribute value; missing fields read as null
    pub fn attribute(&self, field: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.attributes
            .get(&field.to_uppercase())
            .unwrap_or(&NULL)
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.attributes.contains_key(&field.to_uppercase())
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.attributes.iter()
    }

    pub fn envelope(&self) -> Option<Rect<f64>> {
        self.geometry.bounding_rect()
    }
}

/// Stable handle of a table within a [`Dataset`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TableId(pub usize);

/// A feature together with the table it belongs to
#[derive(Debug, Clone)]
pub struct TableRow {
    pub table: TableId,
    pub feature: Arc<Feature>,
}

impl TableRow {
    #[inline]
    pub fn oid(&self) -> i64 {
        self.feature.oid
    }

    /// Key identifying the row across tables
    #[inline]
    pub fn key(&self) -> (TableId, i64) {
        (self.table, self.feature.oid)
    }
}

impl PartialEq for TableRow {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for TableRow {}

/// A named set of features sharing a geometry type and a tolerance
#[derive(Debug, Clone)]
pub struct FeatureTable {
    name: String,
    geometry_type: GeometryType,
    tolerance: Tolerance,
    features: Vec<Arc<Feature>>,
}

impl FeatureTable {
    pub fn new(name: impl Into<String>, geometry_type: GeometryType, tolerance: Tolerance) -> Self {
        Self {
            name: name.into(),
            geometry_type,
            tolerance,
            features: Vec::new(),
        }
    }

    /// Add a feature, rejecting geometries of another type and duplicate object ids
    pub fn add(&mut self, feature: Feature) -> Result<()> {
        let actual = feature.geometry.geometry_type();
        let compatible = actual == self.geometry_type
            || (self.geometry_type == GeometryType::Multipoint && actual == GeometryType::Point);
        if !compatible {
            return Err(TopoError::InvalidGeometry(format!(
                "{:?} feature {} added to {:?} table '{}'",
                actual, feature.oid, self.geometry_type, self.name
            )));
        }
        if self.features.iter().any(|f| f.oid == feature.oid) {
            return Err(TopoError::InvalidGeometry(format!(
                "duplicate object id {} in table '{}'",
                feature.oid, self.name
            )));
        }
        self.features.push(Arc::new(feature));
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn geometry_type(&self) -> GeometryType {
        self.geometry_type
    }

    pub fn tolerance(&self) -> Tolerance {
        self.tolerance
    }

    pub fn features(&self) -> &[Arc<Feature>] {
        &self.features
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Union of all feature envelopes
    pub fn extent(&self) -> Option<Rect<f64>> {
        self.features
            .iter()
            .filter_map(|f| f.envelope())
            .reduce(crate::geometry::rect_union)
    }
}

/// All tables a verification runs against
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    tables: Vec<FeatureTable>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table and return its id
    pub fn add_table(&mut self, table: FeatureTable) -> TableId {
        self.tables.push(table);
        TableId(self.tables.len() - 1)
    }

    pub fn table(&self, id: TableId) -> Result<&FeatureTable> {
        self.tables.get(id.0).ok_or(TopoError::UnknownTable(id.0))
    }

    pub fn table_mut(&mut self, id: TableId) -> Result<&mut FeatureTable> {
        self.tables.get_mut(id.0).ok_or(TopoError::UnknownTable(id.0))
    }

    pub fn tables(&self) -> &[FeatureTable] {
        &self.tables
    }

    /// Look up a table by name (case-insensitive)
    pub fn table_id(&self, name: &str) -> Option<TableId> {
        self.tables
            .iter()
            .position(|t| t.name.eq_ignore_ascii_case(name))
            .map(TableId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_case_insensitive() {
        let feature = Feature::new(1, Geometry::point(0.0, 0.0)).with_attribute("State", "A");
        assert_eq!(feature.attribute("STATE"), &Value::from("A"));
        assert_eq!(feature.attribute("state"), &Value::from("A"));
        assert!(feature.attribute("missing").is_null());
    }

    #[test]
    fn test_value_compare() {
        assert_eq!(Value::Integer(2).compare(&Value::Float(2.0)), Some(Ordering::Equal));
        assert_eq!(Value::from("a").compare(&Value::from("b")), Some(Ordering::Less));
        assert_eq!(Value::Null.compare(&Value::Integer(1)), None);
        assert!(Value::Null.same_as(&Value::Null));
        assert!(!Value::Null.same_as(&Value::Integer(0)));
    }

    #[test]
    fn test_table_rejects_wrong_geometry_type() {
        let mut table = FeatureTable::new("lines", GeometryType::Polyline, Tolerance::default());
        assert!(table.add(Feature::new(1, Geometry::point(0.0, 0.0))).is_err());
        table
            .add(Feature::new(1, Geometry::line(&[(0.0, 0.0), (1.0, 1.0)])))
            .unwrap();
        assert!(
            table
                .add(Feature::new(1, Geometry::line(&[(2.0, 0.0), (1.0, 1.0)])))
                .is_err()
        );
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_polygon_linear_view() {
        let geometry =
            Geometry::polygon(&[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0), (0.0, 0.0)]);
        let boundary = geometry.linear().unwrap();
        assert_eq!(boundary.0.len(), 1);
        assert!((crate::geometry::multi_line_length(&boundary) - 16.0).abs() < 1e-12);
    }

    #[test]
    fn test_dataset_lookup() {
        let mut dataset = Dataset::new();
        let id = dataset.add_table(FeatureTable::new(
            "Borders",
            GeometryType::Polyline,
            Tolerance::default(),
        ));
        assert_eq!(dataset.table_id("borders"), Some(id));
        assert!(dataset.table(TableId(5)).is_err());
    }
}
