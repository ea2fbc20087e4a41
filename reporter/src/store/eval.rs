//! Evaluation of filters, expressions and stages over JSON documents.
//!
//! Follows the document store's semantics where reports depend on them: a missing field is
//! distinct from `null`, group output keeps first-seen order, sorts are stable and arithmetic
//! on integers stays integral except for division and averages.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::{Map, Number, Value};
use trends_model::fields;

use super::{StoreError, StoreResult};
use crate::pipeline::{Accumulator, Expr, Filter, Group, Projected, Projection, Stage, Update};

/// The value at a dotted path, without descending into arrays.
pub fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(document, |value, segment| value.as_object()?.get(segment))
}

/// Every value reachable at a dotted path, descending into arrays of documents on the way.
fn values_at<'a>(document: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![document];
    for segment in path.split('.') {
        current = current
            .into_iter()
            .flat_map(|value| match value {
                Value::Object(map) => map.get(segment).into_iter().collect::<Vec<_>>(),
                Value::Array(items) => items
                    .iter()
                    .filter_map(|item| item.as_object()?.get(segment))
                    .collect(),
                _ => Vec::new(),
            })
            .collect();
    }
    current
}

/// Set the value at a dotted path, creating intermediate documents.
pub fn set_path(document: &mut Value, path: &str, value: Value) {
    let mut current = document;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

fn remove_path(document: &mut Value, path: &str) {
    let (parent, last) = match path.rsplit_once('.') {
        Some((parent, last)) => (lookup_mut(document, parent), last),
        None => (Some(document), path),
    };
    if let Some(Value::Object(map)) = parent {
        map.shift_remove(last);
    }
}

fn lookup_mut<'a>(document: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    path.split('.')
        .try_fold(document, |value, segment| value.as_object_mut()?.get_mut(segment))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(value: &Value) -> Option<Num> {
        let Value::Number(number) = value else {
            return None;
        };
        match number.as_i64() {
            Some(i) => Some(Num::Int(i)),
            None => number.as_f64().map(Num::Float),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    fn add(self, other: Num) -> Num {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => a
                .checked_add(b)
                .map(Num::Int)
                .unwrap_or(Num::Float(a as f64 + b as f64)),
            (a, b) => Num::Float(a.as_f64() + b.as_f64()),
        }
    }

    fn multiply(self, other: Num) -> Num {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => a
                .checked_mul(b)
                .map(Num::Int)
                .unwrap_or(Num::Float(a as f64 * b as f64)),
            (a, b) => Num::Float(a.as_f64() * b.as_f64()),
        }
    }

    fn into_value(self) -> Value {
        match self {
            Num::Int(i) => Value::from(i),
            Num::Float(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        }
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

/// Total order over optional values: missing and `null` first, then numbers, strings,
/// documents, arrays and booleans.
pub fn compare(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    let by_type = type_rank(left).cmp(&type_rank(right));
    if by_type != Ordering::Equal {
        return by_type;
    }
    match (left, right) {
        (Some(Value::Number(_)), Some(Value::Number(_))) => {
            let left = left.and_then(Num::of).map(Num::as_f64).unwrap_or_default();
            let right = right.and_then(Num::of).map(Num::as_f64).unwrap_or_default();
            left.partial_cmp(&right).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(l)), Some(Value::String(r))) => l.cmp(r),
        (Some(Value::Bool(l)), Some(Value::Bool(r))) => l.cmp(r),
        (Some(Value::Array(l)), Some(Value::Array(r))) => l
            .iter()
            .zip(r.iter())
            .map(|(l, r)| compare(Some(l), Some(r)))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| l.len().cmp(&r.len())),
        (Some(Value::Object(l)), Some(Value::Object(r))) => l
            .iter()
            .zip(r.iter())
            .map(|((lk, lv), (rk, rv))| lk.cmp(rk).then_with(|| compare(Some(lv), Some(rv))))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| l.len().cmp(&r.len())),
        _ => Ordering::Equal,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (Num::of(left), Num::of(right)) {
        (Some(l), Some(r)) => l.as_f64() == r.as_f64(),
        _ => left == right,
    }
}

/// Whether `document` satisfies `filter`.
pub fn matches(filter: &Filter, document: &Value) -> bool {
    match filter {
        Filter::Eq(field, expected) => {
            let found = values_at(document, field);
            if found.is_empty() {
                return expected.is_null();
            }
            found.into_iter().any(|value| match value {
                Value::Array(items) if !expected.is_array() => {
                    items.iter().any(|item| values_equal(item, expected))
                }
                value => values_equal(value, expected),
            })
        }
        Filter::Range {
            field,
            lower,
            upper,
        } => values_at(document, field).into_iter().any(|value| {
            let above = lower.as_ref().map_or(true, |bound| {
                type_rank(Some(value)) == type_rank(Some(&bound.value))
                    && match compare(Some(value), Some(&bound.value)) {
                        Ordering::Greater => true,
                        Ordering::Equal => bound.inclusive,
                        Ordering::Less => false,
                    }
            });
            let below = upper.as_ref().map_or(true, |bound| {
                type_rank(Some(value)) == type_rank(Some(&bound.value))
                    && match compare(Some(value), Some(&bound.value)) {
                        Ordering::Less => true,
                        Ordering::Equal => bound.inclusive,
                        Ordering::Greater => false,
                    }
            });
            above && below
        }),
        Filter::In(field, candidates) => values_at(document, field).into_iter().any(|value| {
            candidates
                .iter()
                .any(|candidate| values_equal(value, candidate))
        }),
        Filter::Exists(field, exists) => values_at(document, field).is_empty() != *exists,
        Filter::ElemMatch(field, inner) => match lookup(document, field) {
            Some(Value::Array(items)) => items.iter().any(|item| matches(inner, item)),
            _ => false,
        },
        Filter::Or(clauses) => clauses.iter().any(|clause| matches(clause, document)),
        Filter::And(clauses) => clauses.iter().all(|clause| matches(clause, document)),
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(value) => Num::of(value).map_or(true, |n| n.as_f64() != 0.0),
    }
}

/// Numeric operands of an arithmetic expression, or `None` when any of them is null or missing.
fn numeric_operands(
    operator: &'static str,
    operands: &[Expr],
    document: &Value,
) -> StoreResult<Option<Vec<Num>>> {
    let mut numbers = Vec::with_capacity(operands.len());
    for operand in operands {
        match evaluate(operand, document)? {
            None | Some(Value::Null) => return Ok(None),
            Some(value) => match Num::of(&value) {
                Some(n) => numbers.push(n),
                None => {
                    return Err(StoreError::evaluation(
                        operator,
                        format!("only numbers are supported, found {value}"),
                    ))
                }
            },
        }
    }
    Ok(Some(numbers))
}

/// The value of `expr` for `document`; `None` when it refers to a missing field.
pub fn evaluate(expr: &Expr, document: &Value) -> StoreResult<Option<Value>> {
    Ok(match expr {
        Expr::Field(path) => lookup(document, path).cloned(),
        Expr::Literal(value) => Some(value.clone()),
        Expr::Add(operands) => Some(
            numeric_operands("$add", operands, document)?
                .map(|numbers| numbers.into_iter().fold(Num::Int(0), Num::add).into_value())
                .unwrap_or(Value::Null),
        ),
        Expr::Multiply(operands) => Some(
            numeric_operands("$multiply", operands, document)?
                .map(|numbers| {
                    numbers
                        .into_iter()
                        .fold(Num::Int(1), Num::multiply)
                        .into_value()
                })
                .unwrap_or(Value::Null),
        ),
        Expr::Divide(dividend, divisor) => {
            let operands = [dividend.as_ref().clone(), divisor.as_ref().clone()];
            match numeric_operands("$divide", &operands, document)?.as_deref() {
                Some([dividend, divisor]) => {
                    if divisor.as_f64() == 0.0 {
                        return Err(StoreError::evaluation("$divide", "division by zero"));
                    }
                    Some(Num::Float(dividend.as_f64() / divisor.as_f64()).into_value())
                }
                _ => Some(Value::Null),
            }
        }
        Expr::Cond {
            test,
            then,
            otherwise,
        } => {
            if truthy(evaluate(test, document)?.as_ref()) {
                evaluate(then, document)?
            } else {
                evaluate(otherwise, document)?
            }
        }
        Expr::Eq(left, right) => {
            let left = evaluate(left, document)?;
            let right = evaluate(right, document)?;
            let equal = match (&left, &right) {
                (Some(l), Some(r)) => values_equal(l, r),
                (None, None) => true,
                _ => false,
            };
            Some(Value::Bool(equal))
        }
    })
}

enum AccumulatorState {
    Sum(Num),
    Avg { total: f64, count: usize },
    Push(Vec<Value>),
    First(Option<Value>),
    Max(Option<Value>),
}

impl AccumulatorState {
    fn new(accumulator: &Accumulator) -> Self {
        match accumulator {
            Accumulator::Sum(_) => AccumulatorState::Sum(Num::Int(0)),
            Accumulator::Avg(_) => AccumulatorState::Avg { total: 0.0, count: 0 },
            Accumulator::Push(_) => AccumulatorState::Push(Vec::new()),
            Accumulator::First(_) => AccumulatorState::First(None),
            Accumulator::Max(_) => AccumulatorState::Max(None),
        }
    }

    fn add(&mut self, value: Option<Value>, first_seen: bool) {
        match self {
            AccumulatorState::Sum(total) => {
                if let Some(n) = value.as_ref().and_then(Num::of) {
                    *total = total.add(n);
                }
            }
            AccumulatorState::Avg { total, count } => {
                if let Some(n) = value.as_ref().and_then(Num::of) {
                    *total += n.as_f64();
                    *count += 1;
                }
            }
            AccumulatorState::Push(values) => values.extend(value),
            AccumulatorState::First(first) => {
                if first_seen {
                    *first = Some(value.unwrap_or(Value::Null));
                }
            }
            AccumulatorState::Max(max) => {
                if value.as_ref().is_some_and(|v| !v.is_null())
                    && compare(value.as_ref(), max.as_ref()).is_gt()
                {
                    *max = value;
                }
            }
        }
    }

    fn finish(self) -> Value {
        match self {
            AccumulatorState::Sum(total) => total.into_value(),
            AccumulatorState::Avg { count: 0, .. } => Value::Null,
            AccumulatorState::Avg { total, count } => {
                Num::Float(total / count as f64).into_value()
            }
            AccumulatorState::Push(values) => Value::Array(values),
            AccumulatorState::First(first) => first.unwrap_or(Value::Null),
            AccumulatorState::Max(max) => max.unwrap_or(Value::Null),
        }
    }
}

fn accumulated_expr(accumulator: &Accumulator) -> &Expr {
    match accumulator {
        Accumulator::Sum(e)
        | Accumulator::Avg(e)
        | Accumulator::Push(e)
        | Accumulator::First(e)
        | Accumulator::Max(e) => e,
    }
}

fn group_id(group: &Group, document: &Value) -> StoreResult<Value> {
    if group.id.is_empty() {
        return Ok(Value::Null);
    }
    let mut id = Map::new();
    for (name, expr) in &group.id {
        if let Some(value) = evaluate(expr, document)? {
            id.insert(name.clone(), value);
        }
    }
    Ok(Value::Object(id))
}

fn apply_group(group: &Group, documents: Vec<Value>) -> StoreResult<Vec<Value>> {
    let mut order: Vec<(Value, Vec<AccumulatorState>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for document in &documents {
        let id = group_id(group, document)?;
        let key = id.to_string();
        let (slot, first_seen) = match index.get(&key) {
            Some(slot) => (*slot, false),
            None => {
                let states = group
                    .fields
                    .iter()
                    .map(|(_, accumulator)| AccumulatorState::new(accumulator))
                    .collect();
                order.push((id, states));
                index.insert(key, order.len() - 1);
                (order.len() - 1, true)
            }
        };

        for ((_, accumulator), state) in group.fields.iter().zip(order[slot].1.iter_mut()) {
            state.add(evaluate(accumulated_expr(accumulator), document)?, first_seen);
        }
    }

    Ok(order
        .into_iter()
        .map(|(id, states)| {
            let mut output = Map::new();
            output.insert(fields::ID.to_string(), id);
            for ((name, _), state) in group.fields.iter().zip(states) {
                output.insert(name.clone(), state.finish());
            }
            Value::Object(output)
        })
        .collect())
}

fn apply_projection(projection: &Projection, document: &Value) -> StoreResult<Value> {
    let mut output = Map::new();
    if !projection.exclude_id {
        if let Some(id) = document.get(fields::ID) {
            output.insert(fields::ID.to_string(), id.clone());
        }
    }
    for (name, projected) in &projection.fields {
        let value = match projected {
            Projected::Include => lookup(document, name).cloned(),
            Projected::Expr(expr) => evaluate(expr, document)?,
        };
        if let Some(value) = value {
            output.insert(name.clone(), value);
        }
    }
    Ok(Value::Object(output))
}

fn unwind(path: &str, documents: Vec<Value>) -> Vec<Value> {
    let mut output = Vec::with_capacity(documents.len());
    for document in documents {
        match lookup(&document, path) {
            Some(Value::Array(items)) => {
                for item in items.clone() {
                    let mut copy = document.clone();
                    set_path(&mut copy, path, item);
                    output.push(copy);
                }
            }
            None | Some(Value::Null) => {}
            Some(_) => output.push(document),
        }
    }
    output
}

pub fn sort(documents: &mut [Value], keys: &[(String, i32)]) {
    documents.sort_by(|left, right| {
        keys.iter()
            .map(|(field, direction)| {
                let order = compare(lookup(left, field), lookup(right, field));
                if *direction < 0 {
                    order.reverse()
                } else {
                    order
                }
            })
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    });
}

/// Run `stages` over `documents`, in order.
pub fn run(stages: &[Stage], mut documents: Vec<Value>) -> StoreResult<Vec<Value>> {
    for stage in stages {
        documents = match stage {
            Stage::Match(filter) => documents
                .into_iter()
                .filter(|document| matches(filter, document))
                .collect(),
            Stage::Unwind(path) => unwind(path, documents),
            Stage::Group(group) => apply_group(group, documents)?,
            Stage::Project(projection) => documents
                .iter()
                .map(|document| apply_projection(projection, document))
                .collect::<StoreResult<_>>()?,
            Stage::Sort(keys) => {
                sort(&mut documents, keys);
                documents
            }
            Stage::Limit(limit) => {
                documents.truncate(*limit);
                documents
            }
        };
    }
    Ok(documents)
}

/// Apply `update` to `document` in place.
pub fn apply_update(update: &Update, document: &mut Value, inserting: bool) -> StoreResult<()> {
    for (field, value) in &update.set {
        set_path(document, field, value.clone());
    }
    if inserting {
        for (field, value) in &update.set_on_insert {
            set_path(document, field, value.clone());
        }
    }
    for (field, by) in &update.inc {
        let by = Num::of(by)
            .ok_or_else(|| StoreError::evaluation("$inc", format!("{by} is not a number")))?;
        let current = match lookup(document, field) {
            None | Some(Value::Null) => Num::Int(0),
            Some(value) => Num::of(value).ok_or_else(|| {
                StoreError::evaluation("$inc", format!("{field} holds {value}, not a number"))
            })?,
        };
        set_path(document, field, current.add(by).into_value());
    }
    for field in &update.unset {
        remove_path(document, field);
    }
    Ok(())
}

/// A new document holding the equalities of an upsert filter.
pub fn seed_from_filter(filter: &Filter) -> Value {
    let mut document = Value::Object(Map::new());
    for (field, value) in filter.equalities() {
        set_path(&mut document, field, value.clone());
    }
    document
}
