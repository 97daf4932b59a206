//! Expressions
//!
//! Predicates and projections are built from [`col`], [`val`] and the
//! comparison methods on [`Expr`]. [`raw`] injects an opaque expression the
//! engine evaluates by calling back into Rust; the JSON helpers are raw
//! expressions too, but their shape is fixed.

use std::fmt;
use std::ops::Not;
use std::sync::Arc;

use rowgate_core::{RawFragment, RawInspect};
use serde_json::Value as JsonValue;

use crate::query::SelectQuery;

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    NotIn,
    Like,
    Is,
    IsNot,
}

/// Evaluates an opaque expression against the current row
pub type RawEval = Arc<dyn Fn(&RowView<'_>) -> JsonValue + Send + Sync>;

#[derive(Clone)]
pub(crate) enum RawKind {
    Sql(RawEval),
    JsonObject(Box<SelectQuery>),
    JsonArray(Box<SelectQuery>),
}

/// An expression the gate cannot look into
#[derive(Clone)]
pub struct RawExpr {
    pub(crate) text: String,
    pub(crate) kind: RawKind,
}

impl RawExpr {
    /// Helper that produced the expression, `None` for free-form raw
    pub fn helper(&self) -> Option<&'static str> {
        match self.kind {
            RawKind::Sql(_) => None,
            RawKind::JsonObject(_) => Some("json_object_from"),
            RawKind::JsonArray(_) => Some("json_array_from"),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl fmt::Debug for RawExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawExpr")
            .field("text", &self.text)
            .field("helper", &self.helper())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    /// `table.column` or a bare `column`
    Column(String),
    Value(JsonValue),
    Compare(Box<Expr>, Op, Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    /// First column of the first row, or null
    Subquery(Box<SelectQuery>),
    Exists(Box<SelectQuery>),
    Raw(RawExpr),
}

/// Column reference
pub fn col(name: impl Into<String>) -> Expr {
    Expr::Column(name.into())
}

/// Literal value
pub fn val(value: impl Into<JsonValue>) -> Expr {
    Expr::Value(value.into())
}

/// Opaque expression evaluated by `eval`; `text` is only used for display
pub fn raw<F>(text: impl Into<String>, eval: F) -> Expr
where
    F: Fn(&RowView<'_>) -> JsonValue + Send + Sync + 'static,
{
    Expr::Raw(RawExpr {
        text: text.into(),
        kind: RawKind::Sql(Arc::new(eval)),
    })
}

/// The first row of `query` as a JSON object, or null
pub fn json_object_from(query: SelectQuery) -> Expr {
    Expr::Raw(RawExpr {
        text: "(select json_object(..) from (..) as obj)".to_string(),
        kind: RawKind::JsonObject(Box::new(query)),
    })
}

/// Every row of `query` as a JSON array of objects
pub fn json_array_from(query: SelectQuery) -> Expr {
    Expr::Raw(RawExpr {
        text: "(select json_arrayagg(..) from (..) as agg)".to_string(),
        kind: RawKind::JsonArray(Box::new(query)),
    })
}

pub fn exists(query: SelectQuery) -> Expr {
    Expr::Exists(Box::new(query))
}

#[allow(clippy::should_implement_trait)]
impl Expr {
    pub fn compare(self, op: Op, rhs: Expr) -> Expr {
        Expr::Compare(Box::new(self), op, Box::new(rhs))
    }

    pub fn eq(self, value: impl Into<JsonValue>) -> Expr {
        self.compare(Op::Eq, val(value))
    }

    pub fn ne(self, value: impl Into<JsonValue>) -> Expr {
        self.compare(Op::Ne, val(value))
    }

    pub fn lt(self, value: impl Into<JsonValue>) -> Expr {
        self.compare(Op::Lt, val(value))
    }

    pub fn lte(self, value: impl Into<JsonValue>) -> Expr {
        self.compare(Op::Lte, val(value))
    }

    pub fn gt(self, value: impl Into<JsonValue>) -> Expr {
        self.compare(Op::Gt, val(value))
    }

    pub fn gte(self, value: impl Into<JsonValue>) -> Expr {
        self.compare(Op::Gte, val(value))
    }

    pub fn like(self, pattern: impl Into<String>) -> Expr {
        self.compare(Op::Like, val(pattern.into()))
    }

    pub fn is_in<I, V>(self, values: I) -> Expr
    where
        I: IntoIterator<Item = V>,
        V: Into<JsonValue>,
    {
        let values = values.into_iter().map(Into::into).collect::<Vec<_>>();
        self.compare(Op::In, Expr::Value(JsonValue::Array(values)))
    }

    pub fn is_null(self) -> Expr {
        self.compare(Op::Is, Expr::Value(JsonValue::Null))
    }

    pub fn is_not_null(self) -> Expr {
        self.compare(Op::IsNot, Expr::Value(JsonValue::Null))
    }

    /// Compare with another column
    pub fn eq_col(self, column: impl Into<String>) -> Expr {
        self.compare(Op::Eq, col(column))
    }

    pub fn and(self, other: Expr) -> Expr {
        match self {
            Expr::And(mut all) => {
                all.push(other);
                Expr::And(all)
            }
            first => Expr::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Expr) -> Expr {
        match self {
            Expr::Or(mut any) => {
                any.push(other);
                Expr::Or(any)
            }
            first => Expr::Or(vec![first, other]),
        }
    }

    /// Name the expression in a projection
    pub fn as_(self, alias: impl Into<String>) -> Selection {
        Selection {
            expr: self,
            alias: Some(alias.into()),
        }
    }
}

impl Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

/// One projected value
#[derive(Debug, Clone)]
pub struct Selection {
    pub(crate) expr: Expr,
    pub(crate) alias: Option<String>,
}

impl Selection {
    /// Output key: the alias, else the column name without its table
    pub(crate) fn key(&self) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        match &self.expr {
            Expr::Column(name) => name.rsplit('.').next().unwrap_or(name).to_string(),
            _ => "?column?".to_string(),
        }
    }
}

impl RawInspect for Expr {
    fn visit_raw(&self, visit: &mut dyn FnMut(RawFragment<'_>)) {
        match self {
            Expr::Column(_) | Expr::Value(_) => {}
            Expr::Compare(lhs, _, rhs) => {
                lhs.visit_raw(visit);
                rhs.visit_raw(visit);
            }
            Expr::And(all) | Expr::Or(all) => all.visit_raw(visit),
            Expr::Not(inner) => inner.visit_raw(visit),
            Expr::Subquery(query) | Expr::Exists(query) => query.visit_raw(visit),
            Expr::Raw(raw) => {
                visit(RawFragment {
                    helper: raw.helper(),
                    text: &raw.text,
                });
                if let RawKind::JsonObject(query) | RawKind::JsonArray(query) = &raw.kind {
                    query.visit_raw(visit);
                }
            }
        }
    }
}

impl RawInspect for Selection {
    fn visit_raw(&self, visit: &mut dyn FnMut(RawFragment<'_>)) {
        self.expr.visit_raw(visit);
    }
}

static NULL: JsonValue = JsonValue::Null;

/// Row bindings visible while evaluating an expression: the current
/// query's tables, then the enclosing query's
pub struct RowView<'a> {
    pub(crate) bindings: &'a [(String, JsonValue)],
    pub(crate) parent: Option<&'a RowView<'a>>,
}

impl<'a> RowView<'a> {
    pub(crate) fn new(bindings: &'a [(String, JsonValue)], parent: Option<&'a RowView<'a>>) -> Self {
        Self { bindings, parent }
    }

    /// Value of `table.column` or of the first bound table having `column`
    pub fn get(&self, column: &str) -> Option<&JsonValue> {
        let found = match column.split_once('.') {
            Some((table, field)) => self
                .bindings
                .iter()
                .find(|(name, _)| name == table)
                .map(|(_, row)| row.get(field).unwrap_or(&NULL)),
            None => self.bindings.iter().find_map(|(_, row)| row.get(column)),
        };
        found.or_else(|| self.parent.and_then(|parent| parent.get(column)))
    }
}

/// SQL-style `LIKE` with `%` and `_`
///
/// Greedy scan remembering the last `%`; a mismatch retries from there with
/// one more character absorbed, so matching stays linear in practice.
pub(crate) fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    let (mut t, mut p) = (0, 0);
    // position after the last `%` and the text index it was tried at
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('%') => {
                p += 1;
                star = Some((p, t));
            }
            Some('_') => {
                t += 1;
                p += 1;
            }
            Some(c) if *c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match star {
                Some((after, from)) => {
                    p = after;
                    t = from + 1;
                    star = Some((after, t));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|c| *c == '%')
}
