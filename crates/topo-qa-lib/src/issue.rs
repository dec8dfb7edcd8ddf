//! Issue records and their collection during a run

use crate::feature::{Geometry, TableId, TableRow};
use crate::geometry::rects_intersect;
use geo::Rect;
use std::collections::HashSet;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Dotted hierarchical issue code, e.g. `BorderingLines.Match.ConstraintsNotFulfilled`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct IssueCode(String);

impl IssueCode {
    /// Build a code from a check prefix and a local code
    pub fn new(prefix: &str, local: &str) -> Self {
        if prefix.is_empty() {
            IssueCode(local.to_string())
        } else {
            IssueCode(format!("{prefix}.{local}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Local part of the code, without the check prefix
    pub fn local(&self) -> &str {
        self.0.split_once('.').map(|(_, l)| l).unwrap_or(&self.0)
    }
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a source row involved in an issue
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InvolvedRow {
    pub table: String,
    pub oid: i64,
}

/// One reported issue
///
/// Created by a check through the [`ErrorCollector`] and never modified afterwards.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct QaError {
    /// Name of the check that reported the issue
    pub check: String,
    /// Human readable description
    pub description: String,
    pub issue_code: Option<IssueCode>,
    /// Rows involved, sorted by table name, then oid
    pub involved_rows: Vec<InvolvedRow>,
    /// Error geometry, dropped when the run does not keep error geometries
    pub geometry: Option<Geometry>,
    /// Attribute or component the issue refers to
    pub affected_component: Option<String>,
}

impl QaError {
    /// Envelope of the error geometry
    pub fn envelope(&self) -> Option<Rect<f64>> {
        self.geometry.as_ref().and_then(|g| g.bounding_rect())
    }
}

/// Rounded key used to detect duplicate reports
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DuplicateKey {
    check: String,
    code: Option<IssueCode>,
    description: String,
    rows: Vec<InvolvedRow>,
    envelope: Option<[i64; 4]>,
}

/// Collects issues reported by checks during one run
#[derive(Debug)]
pub struct ErrorCollector {
    errors: Vec<QaError>,
    seen: HashSet<DuplicateKey>,
    keep_geometry: bool,
    filter_duplicates: bool,
    /// Grid used to round envelopes for duplicate detection
    resolution: f64,
    table_names: Vec<String>,
    check: String,
    /// Issues entirely outside this extent are dropped
    extent: Option<Rect<f64>>,
}

impl ErrorCollector {
    /// Create a collector
    ///
    /// # Arguments
    /// * `table_names` - Table names indexed by [`TableId`]
    /// * `keep_geometry` - Keep error geometries in the reported issues
    /// * `filter_duplicates` - Drop issues equal to an earlier one
    /// * `resolution` - Coordinate resolution used to compare error geometries
    pub fn new(
        table_names: Vec<String>,
        keep_geometry: bool,
        filter_duplicates: bool,
        resolution: f64,
    ) -> Self {
        Self {
            errors: Vec::new(),
            seen: HashSet::new(),
            keep_geometry,
            filter_duplicates,
            resolution: resolution.max(f64::EPSILON),
            table_names,
            check: String::new(),
            extent: None,
        }
    }

    /// Drop issues whose geometry lies entirely outside `extent`
    pub fn with_extent(mut self, extent: Option<Rect<f64>>) -> Self {
        self.extent = extent;
        self
    }

    /// Set the name of the check whose issues are collected next
    pub fn set_check(&mut self, check: &str) {
        if self.check != check {
            self.check = check.to_string();
        }
    }

    fn table_name(&self, table: TableId) -> String {
        self.table_names
            .get(table.0)
            .cloned()
            .unwrap_or_else(|| format!("#{}", table.0))
    }

    /// Report an issue
    ///
    /// # Arguments
    /// * `description` - Human readable description
    /// * `rows` - Rows involved in the issue
    /// * `geometry` - Error geometry
    /// * `code` - Issue code
    /// * `affected_component` - Attribute the issue refers to
    ///
    /// Returns the number of issues added (0 for a filtered duplicate).
    pub fn report(
        &mut self,
        description: impl Into<String>,
        rows: &[&TableRow],
        geometry: Option<Geometry>,
        code: Option<IssueCode>,
        affected_component: Option<&str>,
    ) -> usize {
        let mut involved_rows: Vec<InvolvedRow> = rows
            .iter()
            .map(|row| InvolvedRow {
                table: self.table_name(row.table),
                oid: row.oid(),
            })
            .collect();
        involved_rows.sort();
        involved_rows.dedup();

        let error = QaError {
            check: self.check.clone(),
            description: description.into(),
            issue_code: code,
            involved_rows,
            geometry,
            affected_component: affected_component.map(str::to_string),
        };
        self.push(error)
    }

    fn push(&mut self, mut error: QaError) -> usize {
        if let (Some(extent), Some(envelope)) = (self.extent, error.envelope())
            && !rects_intersect(extent, envelope)
        {
            return 0;
        }
        if self.filter_duplicates {
            let key = self.duplicate_key(&error);
            if !self.seen.insert(key) {
                tracing::trace!(description = %error.description, "Dropping duplicate issue");
                return 0;
            }
        }
        if !self.keep_geometry {
            error.geometry = None;
        }
        tracing::trace!(
            check = %error.check,
            code = ?error.issue_code.as_ref().map(|c| c.as_str()),
            "Issue reported"
        );
        self.errors.push(error);
        1
    }

    fn duplicate_key(&self, error: &QaError) -> DuplicateKey {
        let round = |v: f64| (v / self.resolution).round() as i64;
        DuplicateKey {
            check: error.check.clone(),
            code: error.issue_code.clone(),
            description: error.description.clone(),
            rows: error.involved_rows.clone(),
            envelope: error.envelope().map(|r| {
                [
                    round(r.min().x),
                    round(r.min().y),
                    round(r.max().x),
                    round(r.max().y),
                ]
            }),
        }
    }

    /// Number of issues collected so far
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Issues in report order
    pub fn errors(&self) -> &[QaError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<QaError> {
        self.errors
    }
}
