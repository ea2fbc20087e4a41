use serde_json::{json, Map, Value};

/// One side of a range condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Bound {
    pub value: Value,
    pub inclusive: bool,
}

/// A document predicate, rendered in the store's query syntax by [Filter::to_json].
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Range {
        field: String,
        lower: Option<Bound>,
        upper: Option<Bound>,
    },
    In(String, Vec<Value>),
    Exists(String, bool),
    /// Some element of the array at `field` matches the inner filter, whose fields are relative
    /// to the element.
    ElemMatch(String, Box<Filter>),
    Or(Vec<Filter>),
    And(Vec<Filter>),
}

impl Default for Filter {
    fn default() -> Self {
        Filter::all()
    }
}

impl Filter {
    /// Matches every document.
    pub fn all() -> Self {
        Filter::And(Vec::new())
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::range(field, Some(exclusive(value)), None)
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::range(field, Some(inclusive(value)), None)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::range(field, None, Some(exclusive(value)))
    }

    pub fn range(field: impl Into<String>, lower: Option<Bound>, upper: Option<Bound>) -> Self {
        Filter::Range {
            field: field.into(),
            lower,
            upper,
        }
    }

    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::In(field.into(), values)
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Filter::Exists(field.into(), true)
    }

    pub fn elem_match(field: impl Into<String>, inner: Filter) -> Self {
        Filter::ElemMatch(field.into(), Box::new(inner))
    }

    /// `field` equals any of `values`.
    pub fn any_of<I, V>(field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::Or(
            values
                .into_iter()
                .map(|value| Filter::eq(field, value))
                .collect(),
        )
    }

    /// Conjunction of `self` and `other`, flattening nested conjunctions.
    pub fn and(self, other: Filter) -> Self {
        let mut clauses = match self {
            Filter::And(clauses) => clauses,
            single => vec![single],
        };
        match other {
            Filter::And(more) => clauses.extend(more),
            single => clauses.push(single),
        }
        Filter::And(clauses)
    }

    /// The field equalities that hold for every matching document.
    ///
    /// Used to seed a document created by an upsert.
    pub fn equalities(&self) -> Vec<(&str, &Value)> {
        match self {
            Filter::Eq(field, value) => vec![(field.as_str(), value)],
            Filter::And(clauses) => clauses.iter().flat_map(Filter::equalities).collect(),
            _ => Vec::new(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Filter::Eq(field, value) => json!({ field: value }),
            Filter::Range {
                field,
                lower,
                upper,
            } => {
                let mut condition = Map::new();
                if let Some(lower) = lower {
                    let op = if lower.inclusive { "$gte" } else { "$gt" };
                    condition.insert(op.to_string(), lower.value.clone());
                }
                if let Some(upper) = upper {
                    let op = if upper.inclusive { "$lte" } else { "$lt" };
                    condition.insert(op.to_string(), upper.value.clone());
                }
                json!({ field: condition })
            }
            Filter::In(field, values) => json!({ field: { "$in": values } }),
            Filter::Exists(field, exists) => json!({ field: { "$exists": exists } }),
            Filter::ElemMatch(field, inner) => json!({ field: { "$elemMatch": inner.to_json() } }),
            Filter::Or(clauses) => {
                json!({ "$or": clauses.iter().map(Filter::to_json).collect::<Vec<_>>() })
            }
            Filter::And(clauses) => match clauses.as_slice() {
                [] => json!({}),
                [single] => single.to_json(),
                _ => json!({ "$and": clauses.iter().map(Filter::to_json).collect::<Vec<_>>() }),
            },
        }
    }
}

pub fn inclusive(value: impl Into<Value>) -> Bound {
    Bound {
        value: value.into(),
        inclusive: true,
    }
}

pub fn exclusive(value: impl Into<Value>) -> Bound {
    Bound {
        value: value.into(),
        inclusive: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_date_window() {
        let filter = Filter::eq("category", "/csap/reports/host/daily").and(Filter::range(
            "createdOn.date",
            Some(exclusive("2024-03-03")),
            Some(inclusive("2024-03-05")),
        ));

        assert_eq!(
            json!({"$and": [
                {"category": "/csap/reports/host/daily"},
                {"createdOn.date": {"$gt": "2024-03-03", "$lte": "2024-03-05"}}
            ]}),
            filter.to_json()
        );
    }

    #[test]
    fn empty_conjunction_matches_everything() {
        assert_eq!(json!({}), Filter::all().to_json());
        assert_eq!(json!({"host": "h1"}), Filter::all().and(Filter::eq("host", "h1")).to_json());
    }

    #[test]
    fn equalities_skip_non_equality_clauses() {
        let filter = Filter::eq("host", "h1")
            .and(Filter::gt("revision", 1))
            .and(Filter::eq("createdOn.date", "2024-03-05"));

        let equalities = filter.equalities();
        assert_eq!(2, equalities.len());
        assert_eq!(("createdOn.date", &json!("2024-03-05")), equalities[1]);
    }

    #[test]
    fn renders_service_elem_match() {
        let filter = Filter::elem_match(
            "data.summary",
            Filter::any_of("serviceName", ["billing", "search"]),
        );
        assert_eq!(
            json!({"data.summary": {"$elemMatch": {"$or": [
                {"serviceName": "billing"},
                {"serviceName": "search"}
            ]}}}),
            filter.to_json()
        );
    }
}
