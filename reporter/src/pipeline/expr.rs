use serde_json::{json, Value};
use trends_model::fields;

/// An aggregation expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A field path, rendered as `$path`.
    Field(String),
    Literal(Value),
    Add(Vec<Expr>),
    Multiply(Vec<Expr>),
    Divide(Box<Expr>, Box<Expr>),
    Cond {
        test: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Eq(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn field(path: impl Into<String>) -> Self {
        Expr::Field(path.into())
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn divide(dividend: Expr, divisor: Expr) -> Self {
        Expr::Divide(Box::new(dividend), Box::new(divisor))
    }

    pub fn equals(left: Expr, right: Expr) -> Self {
        Expr::Eq(Box::new(left), Box::new(right))
    }

    pub fn cond(test: Expr, then: Expr, otherwise: Expr) -> Self {
        Expr::Cond {
            test: Box::new(test),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    /// `field`, or `replacement` where `field` is 0.
    pub fn zero_to(field: &str, replacement: i64) -> Self {
        Expr::cond(
            Expr::equals(Expr::field(field), Expr::literal(0)),
            Expr::literal(replacement),
            Expr::field(field),
        )
    }

    pub fn to_json(&self) -> Value {
        match self {
            Expr::Field(path) => Value::String(fields::reference(path)),
            Expr::Literal(value) => value.clone(),
            Expr::Add(operands) => json!({ "$add": render_all(operands) }),
            Expr::Multiply(operands) => json!({ "$multiply": render_all(operands) }),
            Expr::Divide(dividend, divisor) => {
                json!({ "$divide": [dividend.to_json(), divisor.to_json()] })
            }
            Expr::Cond {
                test,
                then,
                otherwise,
            } => json!({ "$cond": [test.to_json(), then.to_json(), otherwise.to_json()] }),
            Expr::Eq(left, right) => json!({ "$eq": [left.to_json(), right.to_json()] }),
        }
    }
}

fn render_all(operands: &[Expr]) -> Vec<Value> {
    operands.iter().map(Expr::to_json).collect()
}
