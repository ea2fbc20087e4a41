use serde_json::{json, Map, Value};
use trends_model::fields;

use super::expr::Expr;
use super::filter::Filter;

/// A group accumulator.
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    Sum(Expr),
    Avg(Expr),
    /// Collect every value into an array, in input order.
    Push(Expr),
    First(Expr),
    Max(Expr),
}

impl Accumulator {
    pub fn to_json(&self) -> Value {
        match self {
            Accumulator::Sum(e) => json!({ "$sum": e.to_json() }),
            Accumulator::Avg(e) => json!({ "$avg": e.to_json() }),
            Accumulator::Push(e) => json!({ "$push": e.to_json() }),
            Accumulator::First(e) => json!({ "$first": e.to_json() }),
            Accumulator::Max(e) => json!({ "$max": e.to_json() }),
        }
    }
}

/// A `$group` stage: a compound `_id` and one accumulator per output field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Group {
    pub id: Vec<(String, Expr)>,
    pub fields: Vec<(String, Accumulator)>,
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `_id.<name>` taken from `path`.
    pub fn key(mut self, name: &str, path: &str) -> Self {
        self.id.push((name.to_string(), Expr::field(path)));
        self
    }

    pub fn sum(mut self, name: &str, path: &str) -> Self {
        self.fields
            .push((name.to_string(), Accumulator::Sum(Expr::field(path))));
        self
    }

    pub fn push(mut self, name: &str, path: &str) -> Self {
        self.fields
            .push((name.to_string(), Accumulator::Push(Expr::field(path))));
        self
    }

    pub fn accumulate(mut self, name: &str, accumulator: Accumulator) -> Self {
        self.fields.push((name.to_string(), accumulator));
        self
    }

    pub fn to_json(&self) -> Value {
        let mut group = Map::new();
        let id = if self.id.is_empty() {
            Value::Null
        } else {
            Value::Object(
                self.id
                    .iter()
                    .map(|(name, expr)| (name.clone(), expr.to_json()))
                    .collect(),
            )
        };
        group.insert(fields::ID.to_string(), id);
        for (name, accumulator) in &self.fields {
            group.insert(name.clone(), accumulator.to_json());
        }
        Value::Object(group)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projected {
    /// Keep the field as it is.
    Include,
    Expr(Expr),
}

/// A `$project` stage. `_id` is kept unless excluded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    pub fields: Vec<(String, Projected)>,
    pub exclude_id: bool,
}

impl Projection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include(mut self, name: &str) -> Self {
        self.fields.push((name.to_string(), Projected::Include));
        self
    }

    /// Output `name` holding the value at `path`.
    pub fn rename(self, name: &str, path: &str) -> Self {
        self.expr(name, Expr::field(path))
    }

    pub fn expr(mut self, name: &str, expr: Expr) -> Self {
        self.fields.push((name.to_string(), Projected::Expr(expr)));
        self
    }

    pub fn without_id(mut self) -> Self {
        self.exclude_id = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn to_json(&self) -> Value {
        let mut projection = Map::new();
        if self.exclude_id {
            projection.insert(fields::ID.to_string(), json!(0));
        }
        for (name, projected) in &self.fields {
            let value = match projected {
                Projected::Include => json!(1),
                Projected::Expr(Expr::Literal(value)) => json!({ "$literal": value }),
                Projected::Expr(expr) => expr.to_json(),
            };
            projection.insert(name.clone(), value);
        }
        Value::Object(projection)
    }
}

/// Sort keys, `1` ascending and `-1` descending, applied in order.
pub type SortSpec = Vec<(String, i32)>;

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Filter),
    /// One output document per element of the array at the path. Documents whose array is
    /// missing or empty are dropped, and a value that is not an array passes through as it is.
    Unwind(String),
    Group(Group),
    Project(Projection),
    Sort(SortSpec),
    Limit(usize),
}

impl Stage {
    pub fn sort_by(field: &str, direction: i32) -> Self {
        Stage::Sort(vec![(field.to_string(), direction)])
    }

    pub fn to_json(&self) -> Value {
        match self {
            Stage::Match(filter) => json!({ "$match": filter.to_json() }),
            Stage::Unwind(path) => json!({ "$unwind": fields::reference(path) }),
            Stage::Group(group) => json!({ "$group": group.to_json() }),
            Stage::Project(projection) => json!({ "$project": projection.to_json() }),
            Stage::Sort(keys) => {
                let keys: Map<String, Value> = keys
                    .iter()
                    .map(|(field, direction)| (field.clone(), json!(direction)))
                    .collect();
                json!({ "$sort": keys })
            }
            Stage::Limit(n) => json!({ "$limit": n }),
        }
    }
}

/// An ordered list of aggregation stages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stage: Stage) -> &mut Self {
        self.stages.push(stage);
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn to_json(&self) -> Value {
        Value::Array(self.stages.iter().map(Stage::to_json).collect())
    }
}

impl From<Vec<Stage>> for Pipeline {
    fn from(stages: Vec<Stage>) -> Self {
        Self { stages }
    }
}

/// A plain query: filter, sort, limit and an optional list of fields to return.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    pub filter: Filter,
    pub sort: SortSpec,
    pub limit: Option<usize>,
    pub projection: Option<Vec<String>>,
}

impl FindQuery {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    pub fn sort(mut self, field: &str, direction: i32) -> Self {
        self.sort.push((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn project(mut self, fields: &[&str]) -> Self {
        self.projection = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_group_with_compound_id() {
        let group = Group::new()
            .key("appId", "appId")
            .key("date", "createdOn.date")
            .sum("usrCpu", "data.summary.usrCpu");

        assert_eq!(
            json!({"$group": {
                "_id": {"appId": "$appId", "date": "$createdOn.date"},
                "usrCpu": {"$sum": "$data.summary.usrCpu"}
            }}),
            Stage::Group(group).to_json()
        );
    }

    #[test]
    fn renders_projection_literals() {
        let projection = Projection::new()
            .include("usrCpu")
            .rename("appId", "_id.appId")
            .expr("one", Expr::literal(1))
            .without_id();

        assert_eq!(
            json!({"_id": 0, "usrCpu": 1, "appId": "$_id.appId", "one": {"$literal": 1}}),
            projection.to_json()
        );
    }

    #[test]
    fn renders_pipeline_in_order() {
        let mut pipeline = Pipeline::new();
        pipeline
            .push(Stage::Unwind("data.summary".to_string()))
            .push(Stage::sort_by("date", 1))
            .push(Stage::Limit(5));

        assert_eq!(
            json!([{"$unwind": "$data.summary"}, {"$sort": {"date": 1}}, {"$limit": 5}]),
            pipeline.to_json()
        );
    }
}
