//! Edge matching of line data sets along a shared border
//!
//! Two line tables (class 1 and class 2) each come with a border table. Both borders describe
//! the same boundary seen from either side; they may be polylines or polygons, in which case the
//! polygon boundary is used. The checks verify that lines of one class meeting their border have
//! a counterpart of the other class at the same place, and that matching lines agree on their
//! attributes.
//!
//! Conditions use these aliases:
//!
//! | Condition | Aliases |
//! |-----------|---------|
//! | border match | `LINE.` (the line), `BORDER.` (its border) |
//! | line match, attribute constraint | `LINE1.` (class 1 row), `LINE2.` (class 2 row) |

mod bordering_lines;
mod crossing_lines;

pub use bordering_lines::{BorderingLinesOptions, EdgeMatchBorderingLines};
pub use crossing_lines::{CrossingLinesOptions, EdgeMatchCrossingLines};

use super::{distinct_tables, require_geometry_types, row_lines};
use crate::container::TileContext;
use crate::coverage::{SegmentParts, get_covered_subcurves, linear_intersection};
use crate::expression::{Predicate, RowContext, format_value};
use crate::feature::{Dataset, Feature, GeometryType, TableId, TableRow};
use crate::geometry::{Tolerance, expand_rect};
use crate::{Result, TopoError};
use geo::{Coord, MultiLineString};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Line and border tables of both classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EdgeMatchTables {
    pub line1: TableId,
    pub border1: TableId,
    pub line2: TableId,
    pub border2: TableId,
}

impl EdgeMatchTables {
    pub fn new(line1: TableId, border1: TableId, line2: TableId, border2: TableId) -> Self {
        Self {
            line1,
            border1,
            line2,
            border2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    One,
    Two,
}

impl Side {
    fn other(self) -> Side {
        match self {
            Side::One => Side::Two,
            Side::Two => Side::One,
        }
    }

    fn index(self) -> usize {
        match self {
            Side::One => 0,
            Side::Two => 1,
        }
    }
}

/// Condition texts shared by the edge match checks
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RuleTexts<'a> {
    pub border_match: [Option<&'a str>; 2],
    pub line_match: Option<&'a str>,
    pub attribute_constraint: Option<&'a str>,
    pub constraint_symmetric: bool,
    pub equal_attributes: Option<&'a str>,
    pub report_individually: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct EqualAttribute {
    field: String,
    label: String,
}

/// Parse `FIELD[:Label], ...`
fn parse_equal_attributes(text: Option<&str>) -> Result<Vec<EqualAttribute>> {
    let Some(text) = text else {
        return Ok(Vec::new());
    };
    let mut attributes = Vec::new();
    for entry in text.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (field, label) = match entry.split_once(':') {
            Some((field, label)) => (field.trim(), label.trim()),
            None => (entry, ""),
        };
        if field.is_empty() || field.contains(char::is_whitespace) {
            return Err(TopoError::config(format!(
                "invalid equal attribute entry '{entry}'"
            )));
        }
        let field = field.to_uppercase();
        let label = if label.is_empty() { field.clone() } else { label.to_string() };
        attributes.push(EqualAttribute { field, label });
    }
    Ok(attributes)
}

/// An attribute rule broken by a pair of matching lines
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ConstraintViolation {
    pub description: String,
    pub affected_component: String,
}

/// Tables, tolerance and conditions of an edge match check
#[derive(Debug, Clone)]
pub(crate) struct EdgeMatchRules {
    pub tables: EdgeMatchTables,
    pub all_tables: Vec<TableId>,
    pub tolerance: Tolerance,
    border_match: [Option<Predicate>; 2],
    line_match: Option<Predicate>,
    constraint: Option<Predicate>,
    constraint_symmetric: bool,
    equal_attributes: Vec<EqualAttribute>,
    report_individually: bool,
}

impl EdgeMatchRules {
    pub fn new(dataset: &Dataset, tables: EdgeMatchTables, texts: RuleTexts<'_>) -> Result<Self> {
        if tables.line1 == tables.line2 {
            return Err(TopoError::config(
                "line tables of class 1 and class 2 must be different",
            ));
        }
        require_geometry_types(
            dataset,
            &[tables.line1, tables.line2],
            &[GeometryType::Polyline],
            "line",
        )?;
        require_geometry_types(
            dataset,
            &[tables.border1, tables.border2],
            &[GeometryType::Polyline, GeometryType::Polygon],
            "border",
        )?;

        let all_tables =
            distinct_tables([tables.line1, tables.border1, tables.line2, tables.border2]);
        let mut tolerance = dataset.table(tables.line1)?.tolerance();
        for &table in &all_tables {
            let t = dataset.table(table)?.tolerance();
            if t.xy_tolerance > tolerance.xy_tolerance {
                tolerance = t;
            }
        }

        let border_match = [
            Predicate::parse_optional(texts.border_match[0], &["LINE", "BORDER"])?,
            Predicate::parse_optional(texts.border_match[1], &["LINE", "BORDER"])?,
        ];
        Ok(Self {
            tables,
            all_tables,
            tolerance,
            border_match,
            line_match: Predicate::parse_optional(texts.line_match, &["LINE1", "LINE2"])?,
            constraint: Predicate::parse_optional(texts.attribute_constraint, &["LINE1", "LINE2"])?,
            constraint_symmetric: texts.constraint_symmetric,
            equal_attributes: parse_equal_attributes(texts.equal_attributes)?,
            report_individually: texts.report_individually,
        })
    }

    pub fn xy_tolerance(&self) -> f64 {
        self.tolerance.xy_tolerance
    }

    pub fn side_of(&self, table: TableId) -> Option<Side> {
        if table == self.tables.line1 {
            Some(Side::One)
        } else if table == self.tables.line2 {
            Some(Side::Two)
        } else {
            None
        }
    }

    pub fn line_table(&self, side: Side) -> TableId {
        match side {
            Side::One => self.tables.line1,
            Side::Two => self.tables.line2,
        }
    }

    pub fn border_table(&self, side: Side) -> TableId {
        match side {
            Side::One => self.tables.border1,
            Side::Two => self.tables.border2,
        }
    }

    pub fn border_matches(&self, side: Side, line: &Feature, border: &Feature) -> bool {
        self.border_match[side.index()]
            .as_ref()
            .is_none_or(|p| p.evaluate(&RowContext::pair("LINE", line, "BORDER", border)))
    }

    /// Check the line match condition for `line` of class `side` and a line of the other class
    pub fn lines_match(&self, side: Side, line: &Feature, neighbor: &Feature) -> bool {
        let (line1, line2) = ordered(side, line, neighbor);
        self.line_match
            .as_ref()
            .is_none_or(|p| p.evaluate(&RowContext::pair("LINE1", line1, "LINE2", line2)))
    }

    /// Attribute rules broken by `line` of class `side` and the matching `neighbor`
    pub fn violations(
        &self,
        side: Side,
        line: &Feature,
        neighbor: &Feature,
    ) -> Vec<ConstraintViolation> {
        let (line1, line2) = ordered(side, line, neighbor);
        let mut violations = Vec::new();

        if let Some(constraint) = &self.constraint {
            let ctx = RowContext::pair("LINE1", line1, "LINE2", line2);
            let fulfilled = constraint.evaluate(&ctx)
                || (self.constraint_symmetric
                    && constraint.evaluate(&RowContext::pair("LINE1", line2, "LINE2", line1)));
            if !fulfilled {
                violations.push(ConstraintViolation {
                    description: format!(
                        "Constraint is not fulfilled ({})",
                        constraint.describe_values(&ctx)
                    ),
                    affected_component: constraint.affected_component(),
                });
            }
        }

        let unequal: Vec<(&EqualAttribute, String)> = self
            .equal_attributes
            .iter()
            .filter_map(|a| {
                let (v1, v2) = (line1.attribute(&a.field), line2.attribute(&a.field));
                (!v1.same_as(v2)).then(|| {
                    (a, format!("{}:{},{}", a.label, format_value(v1), format_value(v2)))
                })
            })
            .collect();

        if self.report_individually {
            violations.extend(unequal.into_iter().map(|(a, message)| ConstraintViolation {
                description: format!("Values are not equal ({message})"),
                affected_component: a.field.clone(),
            }));
            return violations;
        }

        if !unequal.is_empty() {
            let messages: Vec<&str> = unequal.iter().map(|(_, m)| m.as_str()).collect();
            violations.push(ConstraintViolation {
                description: format!("Values are not equal ({})", messages.join(";")),
                affected_component: unequal
                    .iter()
                    .map(|(a, _)| a.field.clone())
                    .collect::<Vec<_>>()
                    .join(","),
            });
        }
        if violations.len() <= 1 {
            return violations;
        }

        let description = violations
            .iter()
            .map(|v| v.description.as_str())
            .collect::<Vec<_>>()
            .join(". ");
        let mut fields: Vec<String> = violations
            .iter()
            .flat_map(|v| v.affected_component.split(','))
            .map(str::to_uppercase)
            .collect();
        fields.sort();
        fields.dedup();
        vec![ConstraintViolation {
            description,
            affected_component: fields.join(" "),
        }]
    }

    /// Border rows of class `side` within the xy tolerance of `area` that match `line`
    pub fn matching_borders(
        &self,
        ctx: &TileContext<'_>,
        side: Side,
        line: &Feature,
        area: geo::Rect<f64>,
    ) -> Vec<(TableRow, MultiLineString<f64>)> {
        ctx.search(self.border_table(side), expand_rect(area, self.xy_tolerance()))
            .into_iter()
            .filter(|border| self.border_matches(side, line, &border.feature))
            .filter_map(|border| {
                let lines = row_lines(&border)?;
                Some((border, lines))
            })
            .collect()
    }

    /// Parts of `lines` (the geometry of `row`, class `side`) running along a matching border
    pub fn along_border(
        &self,
        ctx: &TileContext<'_>,
        side: Side,
        row: &TableRow,
        lines: &MultiLineString<f64>,
    ) -> MultiLineString<f64> {
        let Some(envelope) = row.feature.envelope() else {
            return MultiLineString::new(Vec::new());
        };
        let mut parts = SegmentParts::new();
        for (_, border) in self.matching_borders(ctx, side, &row.feature, envelope) {
            let runs = linear_intersection(lines, &border, self.xy_tolerance());
            parts.extend(&SegmentParts::from_subcurves(&runs));
        }
        MultiLineString::new(
            get_covered_subcurves(lines, &parts)
                .iter()
                .map(|s| s.geometry(lines))
                .filter(|l| l.0.len() >= 2)
                .collect(),
        )
    }
}

fn ordered<'f>(side: Side, line: &'f Feature, neighbor: &'f Feature) -> (&'f Feature, &'f Feature) {
    match side {
        Side::One => (line, neighbor),
        Side::Two => (neighbor, line),
    }
}

/// Start and end points of every part
pub(crate) fn end_points(lines: &MultiLineString<f64>) -> Vec<Coord<f64>> {
    lines
        .0
        .iter()
        .filter_map(|l| Some([*l.0.first()?, *l.0.last()?]))
        .flatten()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{FeatureTable, Geometry};

    fn dataset() -> (Dataset, EdgeMatchTables) {
        let mut dataset = Dataset::new();
        let mut add = |name: &str, geometry_type| {
            dataset.add_table(FeatureTable::new(name, geometry_type, Tolerance::default()))
        };
        let line1 = add("line1", GeometryType::Polyline);
        let border1 = add("border1", GeometryType::Polygon);
        let line2 = add("line2", GeometryType::Polyline);
        let border2 = add("border2", GeometryType::Polyline);
        (dataset, EdgeMatchTables::new(line1, border1, line2, border2))
    }

    fn feature(oid: i64, text: &str, number: i64) -> Feature {
        Feature::new(oid, Geometry::line(&[(0.0, 0.0), (1.0, 0.0)]))
            .with_attribute("FLD_TEXT", text)
            .with_attribute("FLD_NUMBER", number)
    }

    #[test]
    fn test_parse_equal_attributes() {
        let attributes = parse_equal_attributes(Some("fld_text, FLD_NUMBER:Number,")).unwrap();
        assert_eq!(attributes.len(), 2);
        assert_eq!(attributes[0].field, "FLD_TEXT");
        assert_eq!(attributes[0].label, "FLD_TEXT");
        assert_eq!(attributes[1].label, "Number");
        let attributes = parse_equal_attributes(Some("road_class:")).unwrap();
        assert_eq!(attributes[0].label, "ROAD_CLASS");
        assert!(parse_equal_attributes(Some("A B")).is_err());
        assert!(parse_equal_attributes(None).unwrap().is_empty());
    }

    #[test]
    fn test_same_line_table_is_rejected() {
        let (dataset, tables) = dataset();
        let tables = EdgeMatchTables {
            line2: tables.line1,
            ..tables
        };
        assert!(matches!(
            EdgeMatchRules::new(&dataset, tables, RuleTexts::default()),
            Err(TopoError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_line_table_must_be_polyline() {
        let (dataset, tables) = dataset();
        let tables = EdgeMatchTables {
            line1: tables.border1,
            ..tables
        };
        assert!(EdgeMatchRules::new(&dataset, tables, RuleTexts::default()).is_err());
    }

    #[test]
    fn test_combined_violations() {
        let (dataset, tables) = dataset();
        let rules = EdgeMatchRules::new(
            &dataset,
            tables,
            RuleTexts {
                attribute_constraint: Some("LINE1.FLD_NUMBER = LINE2.FLD_NUMBER"),
                equal_attributes: Some("FLD_TEXT"),
                ..Default::default()
            },
        )
        .unwrap();

        let violations = rules.violations(Side::Two, &feature(2, "Y", 2), &feature(1, "X", 1));
        assert_eq!(violations.len(), 1);
        assert_eq!(
            violations[0].description,
            "Constraint is not fulfilled (LINE1.FLD_NUMBER:1;LINE2.FLD_NUMBER:2). \
             Values are not equal (FLD_TEXT:'X','Y')"
        );
        assert_eq!(violations[0].affected_component, "FLD_NUMBER FLD_TEXT");

        assert!(rules.violations(Side::One, &feature(1, "X", 1), &feature(2, "X", 1)).is_empty());
    }

    #[test]
    fn test_individual_and_symmetric_violations() {
        let (dataset, tables) = dataset();
        let rules = EdgeMatchRules::new(
            &dataset,
            tables,
            RuleTexts {
                attribute_constraint: Some("LINE1.FLD_NUMBER = LINE2.FLD_NUMBER + 1"),
                constraint_symmetric: true,
                equal_attributes: Some("FLD_TEXT:Text"),
                report_individually: true,
                ..Default::default()
            },
        )
        .unwrap();

        // 1 = 2 + 1 fails, the swapped order 2 = 1 + 1 holds
        let violations = rules.violations(Side::One, &feature(1, "X", 1), &feature(2, "Y", 2));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].description, "Values are not equal (Text:'X','Y')");
        assert_eq!(violations[0].affected_component, "FLD_TEXT");

        let violations = rules.violations(Side::One, &feature(1, "X", 1), &feature(2, "Y", 5));
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].affected_component, "FLD_NUMBER");
    }
}
