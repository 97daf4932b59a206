//! Query evaluation over in-memory tables

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::{Map, Value as JsonValue};

use crate::error::{DbError, Result};
use crate::expr::{like, Expr, Op, RawKind, RowView};
use crate::query::{
    Cte, Db, DeleteQuery, InsertQuery, JoinKind, Order, SelectQuery, Source, UpdateQuery,
};
use crate::store::Tables;

/// Rows of the common table expressions in scope, by name
type CteRows = HashMap<String, Vec<JsonValue>>;

type Bindings = Vec<(String, JsonValue)>;

struct Env<'a> {
    tables: &'a Tables,
    ctes: &'a CteRows,
}

fn check_schema(db: &Db) -> Result<()> {
    match &db.schema {
        Some(schema) if schema != db.store().schema() => Err(DbError::UnknownSchema(schema.clone())),
        _ => Ok(()),
    }
}

fn materialize(defs: &[Cte], tables: &Tables, outer: &CteRows) -> Result<CteRows> {
    let mut ctes = outer.clone();
    for cte in defs {
        let rows = run_select(&cte.query, &Env { tables, ctes: &ctes }, None)?;
        ctes.insert(cte.name.clone(), rows);
    }
    Ok(ctes)
}

/// Every source of one query needs its own runtime name, or later sources
/// would be unreachable behind the first
fn check_runtime_names(query: &SelectQuery) -> Result<()> {
    let sources = query.from.iter().chain(query.joins.iter().map(|join| &join.source));
    let mut seen: Vec<&str> = Vec::new();
    for source in sources {
        if seen.contains(&source.runtime.as_str()) {
            return Err(DbError::DuplicateTableName(source.runtime.clone()));
        }
        seen.push(&source.runtime);
    }
    Ok(())
}

fn source_rows(source: &Source, env: &Env<'_>) -> Result<Vec<JsonValue>> {
    if let Some(rows) = env.ctes.get(&source.table) {
        return Ok(rows.clone());
    }
    Ok(env.tables.get(&source.table)?.rows.clone())
}

pub(crate) fn select(query: &SelectQuery, tables: &Tables) -> Result<Vec<JsonValue>> {
    run_select(query, &Env { tables, ctes: &CteRows::new() }, None)
}

fn run_select(query: &SelectQuery, env: &Env<'_>, parent: Option<&RowView<'_>>) -> Result<Vec<JsonValue>> {
    check_schema(&query.db)?;
    check_runtime_names(query)?;
    let local_ctes;
    let local_env;
    let env = if query.db.ctes.is_empty() {
        env
    } else {
        local_ctes = materialize(&query.db.ctes, env.tables, env.ctes)?;
        local_env = Env {
            tables: env.tables,
            ctes: &local_ctes,
        };
        &local_env
    };

    let mut combos: Vec<Bindings> = vec![Vec::new()];
    for source in &query.from {
        let rows = source_rows(source, env)?;
        combos = combos
            .into_iter()
            .flat_map(|combo| {
                rows.iter().map(move |row| {
                    let mut next = combo.clone();
                    next.push((source.runtime.clone(), row.clone()));
                    next
                })
            })
            .collect();
    }

    for join in &query.joins {
        let rows = source_rows(&join.source, env)?;
        let mut joined = Vec::new();
        for combo in combos {
            let mut matched = false;
            for row in &rows {
                let mut candidate = combo.clone();
                candidate.push((join.source.runtime.clone(), row.clone()));
                let keep = match &join.on {
                    Some(on) => truthy(&eval(on, &RowView::new(&candidate, parent), env)?),
                    None => true,
                };
                if keep {
                    matched = true;
                    joined.push(candidate);
                }
            }
            if !matched && join.kind == JoinKind::Left {
                let mut padded = combo;
                padded.push((join.source.runtime.clone(), JsonValue::Null));
                joined.push(padded);
            }
        }
        combos = joined;
    }

    let mut kept = Vec::new();
    for combo in combos {
        if matches_all(&query.wheres, &RowView::new(&combo, parent), env)? {
            kept.push(combo);
        }
    }

    if !query.order_by.is_empty() {
        let mut keyed = Vec::with_capacity(kept.len());
        for combo in kept {
            let view = RowView::new(&combo, parent);
            let keys = query
                .order_by
                .iter()
                .map(|(expr, _)| eval(expr, &view, env))
                .collect::<Result<Vec<_>>>()?;
            keyed.push((keys, combo));
        }
        keyed.sort_by(|(a, _), (b, _)| {
            a.iter()
                .zip(b)
                .zip(&query.order_by)
                .map(|((a, b), (_, order))| match order {
                    Order::Asc => sort_order(a, b),
                    Order::Desc => sort_order(b, a),
                })
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        kept = keyed.into_iter().map(|(_, combo)| combo).collect();
    }

    let skipped = kept.into_iter().skip(query.offset.unwrap_or(0));
    let limited: Vec<Bindings> = match query.limit {
        Some(limit) => skipped.take(limit).collect(),
        None => skipped.collect(),
    };

    limited
        .iter()
        .map(|combo| project(query, &RowView::new(combo, parent), combo, env))
        .collect()
}

fn project(query: &SelectQuery, view: &RowView<'_>, combo: &Bindings, env: &Env<'_>) -> Result<JsonValue> {
    let mut out = Map::new();
    if query.select_all || query.selections.is_empty() {
        for (_, row) in combo {
            if let JsonValue::Object(fields) = row {
                for (key, value) in fields {
                    out.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
        }
    }
    for selection in &query.selections {
        out.insert(selection.key(), eval(&selection.expr, view, env)?);
    }
    Ok(JsonValue::Object(out))
}

fn matches_all(wheres: &[Expr], view: &RowView<'_>, env: &Env<'_>) -> Result<bool> {
    for expr in wheres {
        if !truthy(&eval(expr, view, env)?) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn eval(expr: &Expr, view: &RowView<'_>, env: &Env<'_>) -> Result<JsonValue> {
    Ok(match expr {
        Expr::Column(name) => view.get(name).cloned().unwrap_or(JsonValue::Null),
        Expr::Value(value) => value.clone(),
        Expr::Compare(lhs, op, rhs) => {
            let lhs = eval(lhs, view, env)?;
            let rhs = eval(rhs, view, env)?;
            JsonValue::Bool(compare(&lhs, *op, &rhs))
        }
        Expr::And(all) => {
            let mut result = true;
            for e in all {
                if !truthy(&eval(e, view, env)?) {
                    result = false;
                    break;
                }
            }
            JsonValue::Bool(result)
        }
        Expr::Or(any) => {
            let mut result = false;
            for e in any {
                if truthy(&eval(e, view, env)?) {
                    result = true;
                    break;
                }
            }
            JsonValue::Bool(result)
        }
        Expr::Not(inner) => JsonValue::Bool(!truthy(&eval(inner, view, env)?)),
        Expr::Subquery(query) => run_select(query, env, Some(view))?
            .into_iter()
            .next()
            .and_then(|row| match row {
                JsonValue::Object(fields) => fields.into_iter().next().map(|(_, v)| v),
                _ => None,
            })
            .unwrap_or(JsonValue::Null),
        Expr::Exists(query) => JsonValue::Bool(!run_select(query, env, Some(view))?.is_empty()),
        Expr::Raw(raw) => match &raw.kind {
            RawKind::Sql(f) => f(view),
            RawKind::JsonObject(query) => run_select(query, env, Some(view))?
                .into_iter()
                .next()
                .unwrap_or(JsonValue::Null),
            RawKind::JsonArray(query) => JsonValue::Array(run_select(query, env, Some(view))?),
        },
    })
}

fn truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => true,
    }
}

fn loose_eq(lhs: &JsonValue, rhs: &JsonValue) -> bool {
    match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
        _ => lhs == rhs,
    }
}

fn partial_order(lhs: &JsonValue, rhs: &JsonValue) -> Option<Ordering> {
    match (lhs, rhs) {
        (JsonValue::Number(a), JsonValue::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (JsonValue::String(a), JsonValue::String(b)) => Some(a.cmp(b)),
        (JsonValue::Bool(a), JsonValue::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Nulls first, incomparable values keep their order
fn sort_order(lhs: &JsonValue, rhs: &JsonValue) -> Ordering {
    match (lhs.is_null(), rhs.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => partial_order(lhs, rhs).unwrap_or(Ordering::Equal),
    }
}

fn compare(lhs: &JsonValue, op: Op, rhs: &JsonValue) -> bool {
    match op {
        Op::Is => lhs == rhs,
        Op::IsNot => lhs != rhs,
        _ if lhs.is_null() || rhs.is_null() => false,
        Op::Eq => loose_eq(lhs, rhs),
        Op::Ne => !loose_eq(lhs, rhs),
        Op::Lt => partial_order(lhs, rhs) == Some(Ordering::Less),
        Op::Lte => matches!(partial_order(lhs, rhs), Some(Ordering::Less | Ordering::Equal)),
        Op::Gt => partial_order(lhs, rhs) == Some(Ordering::Greater),
        Op::Gte => matches!(partial_order(lhs, rhs), Some(Ordering::Greater | Ordering::Equal)),
        Op::In => rhs
            .as_array()
            .is_some_and(|values| values.iter().any(|v| loose_eq(lhs, v))),
        Op::NotIn => rhs
            .as_array()
            .is_some_and(|values| !values.iter().any(|v| loose_eq(lhs, v))),
        Op::Like => match (lhs.as_str(), rhs.as_str()) {
            (Some(text), Some(pattern)) => like(text, pattern),
            _ => false,
        },
    }
}

/// Indices of the rows of `source` matching every predicate
fn matching_rows(db: &Db, source: &Source, wheres: &[Expr], tables: &Tables) -> Result<Vec<usize>> {
    check_schema(db)?;
    let ctes = materialize(&db.ctes, tables, &CteRows::new())?;
    let env = Env { tables, ctes: &ctes };
    let mut hits = Vec::new();
    for (index, row) in tables.get(&source.table)?.rows.iter().enumerate() {
        let bindings = [(source.runtime.clone(), row.clone())];
        if matches_all(wheres, &RowView::new(&bindings, None), &env)? {
            hits.push(index);
        }
    }
    Ok(hits)
}

pub(crate) fn insert(query: &InsertQuery, tables: &mut Tables) -> Result<u64> {
    check_schema(&query.db)?;
    let rows = match &query.expression {
        Some(select) => {
            let ctes = materialize(&query.db.ctes, tables, &CteRows::new())?;
            let selected = run_select(select, &Env { tables, ctes: &ctes }, None)?;
            if query.columns.is_empty() {
                selected
            } else {
                selected
                    .iter()
                    .map(|row| {
                        let fields = query
                            .columns
                            .iter()
                            .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(JsonValue::Null)))
                            .collect::<Map<_, _>>();
                        JsonValue::Object(fields)
                    })
                    .collect()
            }
        }
        None => query.rows.clone(),
    };

    let table = tables.get_mut(&query.table)?;
    let mut written = 0;
    for row in rows {
        if !row.is_object() {
            return Err(DbError::InvalidRow {
                table: query.table.clone(),
                message: "rows must be JSON objects".to_string(),
            });
        }
        if let Some(key) = &table.primary_key {
            let value = row.get(key).cloned().unwrap_or(JsonValue::Null);
            if value.is_null() {
                return Err(DbError::InvalidRow {
                    table: query.table.clone(),
                    message: format!("missing primary key `{key}`"),
                });
            }
            if table.rows.iter().any(|existing| existing.get(key) == Some(&value)) {
                return Err(DbError::DuplicateKey {
                    table: query.table.clone(),
                    key: value.to_string(),
                });
            }
        }
        table.rows.push(row);
        written += 1;
    }
    Ok(written)
}

pub(crate) fn update(query: &UpdateQuery, tables: &mut Tables) -> Result<u64> {
    let Some(JsonValue::Object(values)) = &query.values else {
        return Err(DbError::InvalidRow {
            table: query.source.table.clone(),
            message: "update needs an object of values".to_string(),
        });
    };
    let hits = matching_rows(&query.db, &query.source, &query.wheres, tables)?;
    let table = tables.get_mut(&query.source.table)?;
    for &index in &hits {
        if let Some(JsonValue::Object(row)) = table.rows.get_mut(index) {
            for (key, value) in values {
                row.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(hits.len() as u64)
}

pub(crate) fn delete(query: &DeleteQuery, tables: &mut Tables) -> Result<u64> {
    let hits = matching_rows(&query.db, &query.source, &query.wheres, tables)?;
    let table = tables.get_mut(&query.source.table)?;
    let mut index = 0;
    table.rows.retain(|_| {
        let keep = hits.binary_search(&index).is_err();
        index += 1;
        keep
    });
    Ok(hits.len() as u64)
}
