//! SQL-like condition expressions evaluated against one or more rows
//!
//! Conditions such as `LINE.STATE = BORDER.STATE` are parsed once with nom and evaluated per
//! candidate pair. Field references are qualified with an alias (`LINE1.`, `G2.`, ...) when the
//! expression is evaluated over several rows; the aliases are validated at parse time.

use crate::feature::{Feature, Value};
use crate::{Result, TopoError};
use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while},
    character::complete::{char, digit0, digit1, multispace0, one_of, satisfy},
    combinator::{all_consuming, map, map_res, not, opt, recognize, success, value, verify},
    multi::{fold_many0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt::Write;

/// Words that cannot be used as field names
const RESERVED: [&str; 8] = ["AND", "OR", "NOT", "IS", "IN", "NULL", "TRUE", "FALSE"];

/// Field names resolving to the object id when the row has no such attribute
const OID_FIELDS: [&str; 2] = ["OBJECTID", "OID"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Field { alias: Option<String>, name: String },
    Not(Box<Expr>),
    Neg(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    IsNull { expr: Box<Expr>, negated: bool },
    In { expr: Box<Expr>, list: Vec<Expr>, negated: bool },
}

/// Rows an expression is evaluated against, bound to their aliases
#[derive(Debug, Clone, Default)]
pub struct RowContext<'a> {
    rows: SmallVec<[(Option<&'a str>, &'a Feature); 2]>,
}

impl<'a> RowContext<'a> {
    /// Context with a single unqualified row
    pub fn single(feature: &'a Feature) -> Self {
        let mut rows = SmallVec::new();
        rows.push((None, feature));
        Self { rows }
    }

    /// Context with two aliased rows
    pub fn pair(alias1: &'a str, row1: &'a Feature, alias2: &'a str, row2: &'a Feature) -> Self {
        Self::default().with(alias1, row1).with(alias2, row2)
    }

    /// Add an aliased row
    pub fn with(mut self, alias: &'a str, feature: &'a Feature) -> Self {
        self.rows.push((Some(alias), feature));
        self
    }

    fn resolve(&self, alias: Option<&str>) -> Option<&'a Feature> {
        match alias {
            None => self
                .rows
                .iter()
                .find(|(a, _)| a.is_none())
                .or_else(|| (self.rows.len() == 1).then(|| &self.rows[0]))
                .map(|(_, f)| *f),
            Some(alias) => self
                .rows
                .iter()
                .find(|(a, _)| a.is_some_and(|a| a.eq_ignore_ascii_case(alias)))
                .map(|(_, f)| *f),
        }
    }
}

/// A parsed expression producing a [`Value`]
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    text: String,
    root: Expr,
}

impl Expression {
    /// Parse an expression
    ///
    /// # Arguments
    /// * `text` - Expression text
    /// * `aliases` - Allowed row aliases; empty for expressions over a single unqualified row
    pub fn parse(text: &str, aliases: &[&str]) -> Result<Self> {
        let root = match all_consuming(delimited(multispace0, or_expr, multispace0))(text) {
            Ok((_, root)) => root,
            Err(nom::Err::Error(e) | nom::Err::Failure(e)) => {
                let position = text.len() - e.input.len();
                return Err(TopoError::Expression(format!(
                    "unexpected input at position {position} in '{text}'"
                )));
            }
            Err(nom::Err::Incomplete(_)) => {
                return Err(TopoError::Expression(format!("incomplete expression '{text}'")));
            }
        };

        let expression = Self {
            text: text.to_string(),
            root,
        };
        expression.validate_aliases(aliases)?;
        Ok(expression)
    }

    fn validate_aliases(&self, aliases: &[&str]) -> Result<()> {
        for (alias, name) in self.involved_fields() {
            match alias {
                Some(alias) if !aliases.iter().any(|a| a.eq_ignore_ascii_case(&alias)) => {
                    return Err(TopoError::Expression(format!(
                        "unknown alias '{alias}' in '{}' (expected one of {aliases:?})",
                        self.text
                    )));
                }
                None if !aliases.is_empty() => {
                    return Err(TopoError::Expression(format!(
                        "field '{name}' in '{}' must be qualified with one of {aliases:?}",
                        self.text
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Evaluate the expression
    pub fn evaluate(&self, ctx: &RowContext<'_>) -> Value {
        eval(&self.root, ctx)
    }

    /// Numeric result, `None` for null or non-numeric results
    pub fn evaluate_f64(&self, ctx: &RowContext<'_>) -> Option<f64> {
        self.evaluate(ctx).as_f64()
    }

    /// Referenced fields as `(alias, field)` in order of first occurrence
    pub fn involved_fields(&self) -> Vec<(Option<String>, String)> {
        let mut fields = Vec::new();
        collect_fields(&self.root, &mut fields);
        fields
    }

    /// Values of the referenced fields, formatted as `ALIAS.FIELD:'value';...`
    pub fn describe_values(&self, ctx: &RowContext<'_>) -> String {
        let mut text = String::new();
        for (i, (alias, name)) in self.involved_fields().iter().enumerate() {
            if i > 0 {
                text.push(';');
            }
            let value = field_value(ctx, alias.as_deref(), name);
            if let Some(alias) = alias {
                let _ = write!(text, "{alias}.");
            }
            let _ = write!(text, "{name}:{}", format_value(&value));
        }
        text
    }
}

/// A parsed boolean condition
///
/// Null results count as not fulfilled.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    expression: Expression,
}

impl Predicate {
    /// Parse a condition; see [`Expression::parse`]
    pub fn parse(text: &str, aliases: &[&str]) -> Result<Self> {
        Ok(Self {
            expression: Expression::parse(text, aliases)?,
        })
    }

    /// Parse an optional condition; blank text means no condition
    pub fn parse_optional(text: Option<&str>, aliases: &[&str]) -> Result<Option<Self>> {
        match text.map(str::trim) {
            None | Some("") => Ok(None),
            Some(text) => Self::parse(text, aliases).map(Some),
        }
    }

    pub fn text(&self) -> &str {
        self.expression.text()
    }

    pub fn evaluate(&self, ctx: &RowContext<'_>) -> bool {
        truth(&self.expression.evaluate(ctx)) == Some(true)
    }

    pub fn involved_fields(&self) -> Vec<(Option<String>, String)> {
        self.expression.involved_fields()
    }

    /// Unqualified names of the referenced fields, comma separated
    pub fn affected_component(&self) -> String {
        let mut names: Vec<String> = Vec::new();
        for (_, name) in self.involved_fields() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names.join(",")
    }

    pub fn describe_values(&self, ctx: &RowContext<'_>) -> String {
        self.expression.describe_values(ctx)
    }

    /// Split a conjunction into its top level terms
    pub fn conjuncts(&self) -> Vec<Predicate> {
        fn split(expr: &Expr, out: &mut Vec<Expr>) {
            match expr {
                Expr::And(a, b) => {
                    split(a, out);
                    split(b, out);
                }
                other => out.push(other.clone()),
            }
        }
        let mut terms = Vec::new();
        split(&self.expression.root, &mut terms);
        if terms.len() == 1 {
            return vec![self.clone()];
        }
        terms
            .into_iter()
            .map(|root| Predicate {
                expression: Expression {
                    text: render(&root),
                    root,
                },
            })
            .collect()
    }
}

/// Format a value the way issue descriptions show it
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "<null>".to_string(),
        Value::Text(s) => format!("'{s}'"),
        other => other.to_string(),
    }
}

fn field_value(ctx: &RowContext<'_>, alias: Option<&str>, name: &str) -> Value {
    let Some(feature) = ctx.resolve(alias) else {
        return Value::Null;
    };
    if !feature.has_field(name) && OID_FIELDS.contains(&name) {
        return Value::Integer(feature.oid);
    }
    feature.attribute(name).clone()
}

fn truth(value: &Value) -> Option<bool> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(*b),
        Value::Integer(i) => Some(*i != 0),
        Value::Float(f) => Some(*f != 0.0),
        Value::Text(_) => None,
    }
}

fn from_truth(t: Option<bool>) -> Value {
    t.map(Value::Bool).unwrap_or(Value::Null)
}

fn eval(expr: &Expr, ctx: &RowContext<'_>) -> Value {
    match expr {
        Expr::Literal(v) => v.clone(),
        Expr::Field { alias, name } => field_value(ctx, alias.as_deref(), name),
        Expr::Not(e) => from_truth(truth(&eval(e, ctx)).map(|b| !b)),
        Expr::Neg(e) => match eval(e, ctx) {
            Value::Integer(i) => Value::Integer(-i),
            v => v.as_f64().map(|f| Value::Float(-f)).unwrap_or(Value::Null),
        },
        Expr::And(a, b) => {
            let (a, b) = (truth(&eval(a, ctx)), truth(&eval(b, ctx)));
            match (a, b) {
                (Some(false), _) | (_, Some(false)) => Value::Bool(false),
                (Some(true), Some(true)) => Value::Bool(true),
                _ => Value::Null,
            }
        }
        Expr::Or(a, b) => {
            let (a, b) = (truth(&eval(a, ctx)), truth(&eval(b, ctx)));
            match (a, b) {
                (Some(true), _) | (_, Some(true)) => Value::Bool(true),
                (Some(false), Some(false)) => Value::Bool(false),
                _ => Value::Null,
            }
        }
        Expr::Compare(op, a, b) => {
            let ordering = eval(a, ctx).compare(&eval(b, ctx));
            from_truth(ordering.map(|o| match op {
                CompareOp::Eq => o == Ordering::Equal,
                CompareOp::Ne => o != Ordering::Equal,
                CompareOp::Lt => o == Ordering::Less,
                CompareOp::Le => o != Ordering::Greater,
                CompareOp::Gt => o == Ordering::Greater,
                CompareOp::Ge => o != Ordering::Less,
            }))
        }
        Expr::Arith(op, a, b) => arith(*op, eval(a, ctx), eval(b, ctx)),
        Expr::IsNull { expr, negated } => Value::Bool(eval(expr, ctx).is_null() != *negated),
        Expr::In {
            expr,
            list,
            negated,
        } => {
            let v = eval(expr, ctx);
            if v.is_null() {
                return Value::Null;
            }
            let found = list
                .iter()
                .any(|item| v.compare(&eval(item, ctx)) == Some(Ordering::Equal));
            Value::Bool(found != *negated)
        }
    }
}

fn arith(op: ArithOp, a: Value, b: Value) -> Value {
    if let (ArithOp::Add, Value::Text(a), Value::Text(b)) = (op, &a, &b) {
        return Value::Text(format!("{a}{b}"));
    }
    if let (Value::Integer(x), Value::Integer(y)) = (&a, &b) {
        let r = match op {
            ArithOp::Add => x.checked_add(*y),
            ArithOp::Sub => x.checked_sub(*y),
            ArithOp::Mul => x.checked_mul(*y),
            ArithOp::Div => None,
        };
        if let Some(r) = r {
            return Value::Integer(r);
        }
    }
    let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
        return Value::Null;
    };
    let r = match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div if y == 0.0 => return Value::Null,
        ArithOp::Div => x / y,
    };
    Value::Float(r)
}

fn collect_fields(expr: &Expr, out: &mut Vec<(Option<String>, String)>) {
    match expr {
        Expr::Literal(_) => {}
        Expr::Field { alias, name } => {
            let key = (alias.clone(), name.clone());
            if !out.contains(&key) {
                out.push(key);
            }
        }
        Expr::Not(e) | Expr::Neg(e) | Expr::IsNull { expr: e, .. } => collect_fields(e, out),
        Expr::And(a, b) | Expr::Or(a, b) | Expr::Compare(_, a, b) | Expr::Arith(_, a, b) => {
            collect_fields(a, out);
            collect_fields(b, out);
        }
        Expr::In { expr, list, .. } => {
            collect_fields(expr, out);
            for item in list {
                collect_fields(item, out);
            }
        }
    }
}

/// Render an expression back to text
fn render(expr: &Expr) -> String {
    match expr {
        Expr::Literal(v) => match v {
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Null => "NULL".to_string(),
            other => other.to_string(),
        },
        Expr::Field { alias: Some(a), name } => format!("{a}.{name}"),
        Expr::Field { alias: None, name } => name.clone(),
        Expr::Not(e) => format!("NOT {}", render(e)),
        Expr::Neg(e) => format!("-{}", render(e)),
        Expr::And(a, b) => format!("({} AND {})", render(a), render(b)),
        Expr::Or(a, b) => format!("({} OR {})", render(a), render(b)),
        Expr::Compare(op, a, b) => {
            let op = match op {
                CompareOp::Eq => "=",
                CompareOp::Ne => "<>",
                CompareOp::Lt => "<",
                CompareOp::Le => "<=",
                CompareOp::Gt => ">",
                CompareOp::Ge => ">=",
            };
            format!("{} {op} {}", render(a), render(b))
        }
        Expr::Arith(op, a, b) => {
            let op = match op {
                ArithOp::Add => "+",
                ArithOp::Sub => "-",
                ArithOp::Mul => "*",
                ArithOp::Div => "/",
            };
            format!("({} {op} {})", render(a), render(b))
        }
        Expr::IsNull { expr, negated } => {
            let not = if *negated { "NOT " } else { "" };
            format!("{} IS {not}NULL", render(expr))
        }
        Expr::In {
            expr,
            list,
            negated,
        } => {
            let not = if *negated { "NOT " } else { "" };
            let items: Vec<String> = list.iter().map(render).collect();
            format!("{} {not}IN ({})", render(expr), items.join(", "))
        }
    }
}

// --- grammar ---

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Case-insensitive keyword not followed by an identifier character
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    delimited(
        multispace0,
        terminated(tag_no_case(kw), not(satisfy(is_ident_char))),
        multispace0,
    )
}

fn symbol<'a>(s: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    delimited(multispace0, tag(s), multispace0)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c: char| c.is_alphabetic() || c == '_'),
        take_while(is_ident_char),
    ))(input)
}

fn unreserved_identifier(input: &str) -> IResult<&str, &str> {
    verify(identifier, |s: &str| {
        !RESERVED.iter().any(|r| r.eq_ignore_ascii_case(s))
    })(input)
}

fn field(input: &str) -> IResult<&str, Expr> {
    map(
        pair(unreserved_identifier, opt(preceded(char('.'), identifier))),
        |(first, second)| match second {
            Some(name) => Expr::Field {
                alias: Some(first.to_uppercase()),
                name: name.to_uppercase(),
            },
            None => Expr::Field {
                alias: None,
                name: first.to_uppercase(),
            },
        },
    )(input)
}

fn number(input: &str) -> IResult<&str, Expr> {
    alt((
        map_res(
            recognize(tuple((
                digit1,
                opt(pair(char('.'), digit0)),
                opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
            ))),
            |s: &str| {
                if s.contains(['.', 'e', 'E']) {
                    s.parse::<f64>().map(|f| Expr::Literal(Value::Float(f))).map_err(|_| ())
                } else {
                    s.parse::<i64>().map(|i| Expr::Literal(Value::Integer(i))).map_err(|_| ())
                }
            },
        ),
        map_res(recognize(pair(char('.'), digit1)), |s: &str| {
            s.parse::<f64>().map(|f| Expr::Literal(Value::Float(f)))
        }),
    ))(input)
}

/// Single-quoted string; `''` escapes a quote
fn string_literal(input: &str) -> IResult<&str, Expr> {
    let (mut rest, _) = char('\'')(input)?;
    let mut text = String::new();
    loop {
        let Some(pos) = rest.find('\'') else {
            return Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Char,
            )));
        };
        text.push_str(&rest[..pos]);
        rest = &rest[pos + 1..];
        if let Some(stripped) = rest.strip_prefix('\'') {
            text.push('\'');
            rest = stripped;
        } else {
            return Ok((rest, Expr::Literal(Value::Text(text))));
        }
    }
}

fn primary(input: &str) -> IResult<&str, Expr> {
    delimited(
        multispace0,
        alt((
            delimited(char('('), or_expr, preceded(multispace0, char(')'))),
            number,
            string_literal,
            value(Expr::Literal(Value::Null), keyword("NULL")),
            value(Expr::Literal(Value::Bool(true)), keyword("TRUE")),
            value(Expr::Literal(Value::Bool(false)), keyword("FALSE")),
            field,
        )),
        multispace0,
    )(input)
}

fn unary(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(symbol("-"), unary), |e| Expr::Neg(Box::new(e))),
        primary,
    ))(input)
}

fn multiplicative(input: &str) -> IResult<&str, Expr> {
    let (input, first) = unary(input)?;
    fold_many0(
        pair(
            alt((
                value(ArithOp::Mul, symbol("*")),
                value(ArithOp::Div, symbol("/")),
            )),
            unary,
        ),
        move || first.clone(),
        |acc, (op, e)| Expr::Arith(op, Box::new(acc), Box::new(e)),
    )(input)
}

fn additive(input: &str) -> IResult<&str, Expr> {
    let (input, first) = multiplicative(input)?;
    fold_many0(
        pair(
            alt((
                value(ArithOp::Add, symbol("+")),
                value(ArithOp::Sub, symbol("-")),
            )),
            multiplicative,
        ),
        move || first.clone(),
        |acc, (op, e)| Expr::Arith(op, Box::new(acc), Box::new(e)),
    )(input)
}

fn compare_op(input: &str) -> IResult<&str, CompareOp> {
    alt((
        value(CompareOp::Le, symbol("<=")),
        value(CompareOp::Ge, symbol(">=")),
        value(CompareOp::Ne, symbol("<>")),
        value(CompareOp::Ne, symbol("!=")),
        value(CompareOp::Eq, symbol("=")),
        value(CompareOp::Lt, symbol("<")),
        value(CompareOp::Gt, symbol(">")),
    ))(input)
}

fn comparison(input: &str) -> IResult<&str, Expr> {
    let (input, left) = additive(input)?;

    let is_null = preceded(
        keyword("IS"),
        terminated(map(opt(keyword("NOT")), |n| n.is_some()), keyword("NULL")),
    );
    let in_list = pair(
        map(opt(keyword("NOT")), |n| n.is_some()),
        preceded(
            keyword("IN"),
            delimited(
                symbol("("),
                separated_list1(symbol(","), additive),
                symbol(")"),
            ),
        ),
    );

    alt((
        map(is_null, |negated| Expr::IsNull {
            expr: Box::new(left.clone()),
            negated,
        }),
        map(in_list, |(negated, list)| Expr::In {
            expr: Box::new(left.clone()),
            list,
            negated,
        }),
        map(pair(compare_op, additive), |(op, right)| {
            Expr::Compare(op, Box::new(left.clone()), Box::new(right))
        }),
        success(left.clone()),
    ))(input)
}

fn not_expr(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(keyword("NOT"), not_expr), |e| Expr::Not(Box::new(e))),
        comparison,
    ))(input)
}

fn and_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = not_expr(input)?;
    fold_many0(
        preceded(keyword("AND"), not_expr),
        move || first.clone(),
        |acc, e| Expr::And(Box::new(acc), Box::new(e)),
    )(input)
}

fn or_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = and_expr(input)?;
    fold_many0(
        preceded(keyword("OR"), and_expr),
        move || first.clone(),
        |acc, e| Expr::Or(Box::new(acc), Box::new(e)),
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::Geometry;

    fn feature(state: &str) -> Feature {
        Feature::new(1, Geometry::point(0.0, 0.0))
            .with_attribute("STATE", state)
            .with_attribute("width", 2.5)
            .with_attribute("lanes", 2)
    }

    #[test]
    fn test_pair_condition() {
        let p = Predicate::parse("LINE.STATE = BORDER.STATE", &["LINE", "BORDER"]).unwrap();
        let (a, b, c) = (feature("A"), feature("A"), feature("B"));
        assert!(p.evaluate(&RowContext::pair("LINE", &a, "BORDER", &b)));
        assert!(!p.evaluate(&RowContext::pair("LINE", &a, "BORDER", &c)));
    }

    #[test]
    fn test_aliases_are_validated() {
        assert!(Predicate::parse("G3.STATE = 1", &["G1", "G2"]).is_err());
        assert!(Predicate::parse("STATE = 1", &["G1", "G2"]).is_err());
        assert!(Predicate::parse("line1.state <> line2.state", &["LINE1", "LINE2"]).is_ok());
    }

    #[test]
    fn test_syntax_errors() {
        let err = Predicate::parse("STATE = ", &[]).unwrap_err();
        assert!(matches!(err, TopoError::Expression(_)));
        assert!(Predicate::parse("STATE = 'A", &[]).is_err());
        assert!(Predicate::parse("(STATE = 'A'", &[]).is_err());
        assert!(Predicate::parse("AND = 1", &[]).is_err());
    }

    #[test]
    fn test_operators() {
        let f = feature("A");
        let ctx = RowContext::single(&f);
        let check = |text: &str| Predicate::parse(text, &[]).unwrap().evaluate(&ctx);

        assert!(check("state = 'A' and lanes >= 2"));
        assert!(check("STATE IN ('B', 'A')"));
        assert!(check("STATE NOT IN ('B')"));
        assert!(check("MISSING IS NULL"));
        assert!(check("STATE IS NOT NULL"));
        assert!(check("NOT STATE = 'B' OR 1 = 0"));
        assert!(check("WIDTH * 2 = 5"));
        assert!(check("LANES + 1 > 2.5"));
        assert!(check("-LANES < 0"));
        assert!(check("OBJECTID = 1"));
        // comparison with null is never fulfilled
        assert!(!check("MISSING = 1"));
        assert!(!check("MISSING <> 1"));
    }

    #[test]
    fn test_value_expression() {
        let f = feature("A");
        let e = Expression::parse("WIDTH / 2", &[]).unwrap();
        assert_eq!(e.evaluate_f64(&RowContext::single(&f)), Some(1.25));
        let text = Expression::parse("'it''s'", &[]).unwrap();
        assert_eq!(
            text.evaluate(&RowContext::single(&f)),
            Value::Text("it's".to_string())
        );
    }

    #[test]
    fn test_describe_values() {
        let p = Predicate::parse("LINE1.STATE = LINE2.STATE", &["LINE1", "LINE2"]).unwrap();
        let (a, b) = (feature("A"), feature("B"));
        let ctx = RowContext::pair("LINE1", &a, "LINE2", &b);
        assert_eq!(p.describe_values(&ctx), "LINE1.STATE:'A';LINE2.STATE:'B'");
        assert_eq!(p.affected_component(), "STATE");
    }

    #[test]
    fn test_conjuncts() {
        let p = Predicate::parse(
            "LINE1.STATE = LINE2.STATE AND LINE1.LANES = LINE2.LANES",
            &["LINE1", "LINE2"],
        )
        .unwrap();
        let terms = p.conjuncts();
        assert_eq!(terms.len(), 2);
        assert_eq!(terms[0].text(), "LINE1.STATE = LINE2.STATE");
        assert_eq!(terms[1].affected_component(), "LANES");
    }
}
