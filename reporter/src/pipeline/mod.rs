//! A small typed DSL for store queries, and the report pipelines built with it.
//!
//! Stages are plain data: the in-memory store evaluates them directly and the Mongo backend
//! renders them with [Pipeline::to_json].

pub mod expr;
pub mod filter;
pub mod health;
pub mod host;
pub mod stage;
pub mod summary;
pub mod trending;
pub mod update;

pub use expr::Expr;
pub use filter::{Bound, Filter};
pub use stage::{Accumulator, FindQuery, Group, Pipeline, Projected, Projection, SortSpec, Stage};
pub use update::{Update, UpsertOptions};

use trends_model::fields;
use trends_model::query::Divisor;

/// `$add` over every metric field.
pub(crate) fn metric_total(metrics: &[String]) -> Expr {
    Expr::Add(metrics.iter().map(Expr::field).collect())
}

/// The right hand side of a divide-by projection, or `None` for a malformed divisor.
///
/// A sample count of 0 divides as 1.
pub(crate) fn divisor_operand(divisor: &Divisor) -> Option<Expr> {
    match divisor {
        Divisor::NumberOfSamples => Some(Expr::zero_to(fields::NUMBER_OF_SAMPLES, 1)),
        Divisor::Constant(value) => Some(Expr::literal(*value)),
        Divisor::Malformed(raw) => {
            log::debug!("Skipping divisor that is neither a field nor a number: {raw}");
            None
        }
    }
}

/// A projection replacing `target` with `dividend / divisor`, keeping `carried` as they are.
pub(crate) fn divide_projection<'a>(
    target: &str,
    dividend: Expr,
    divisor: Expr,
    carried: impl IntoIterator<Item = &'a str>,
) -> Stage {
    let projection = carried
        .into_iter()
        .filter(|field| *field != target)
        .fold(Projection::new(), Projection::include)
        .expr(target, Expr::divide(dividend, divisor));
    Stage::Project(projection)
}

/// Fields kept by the per-metric divide projections of host level pipelines.
pub(crate) const HOST_DIVIDE_CARRIED: [&str; 6] = [
    fields::APP_ID,
    fields::PROJECT,
    fields::LIFECYCLE,
    fields::HOST,
    fields::NUMBER_OF_SAMPLES,
    fields::DATE,
];

/// One projection per metric and divisor, each dividing that metric in place.
///
/// Sibling metrics and [HOST_DIVIDE_CARRIED] pass through unchanged.
pub(crate) fn push_host_divisions(pipeline: &mut Pipeline, metrics: &[String], divisors: &[Divisor]) {
    for metric in metrics {
        for divisor in divisors {
            let Some(divisor) = divisor_operand(divisor) else {
                continue;
            };
            let carried = metrics
                .iter()
                .map(String::as_str)
                .filter(|other| !other.eq_ignore_ascii_case(metric))
                .chain(HOST_DIVIDE_CARRIED);
            pipeline.push(divide_projection(metric, Expr::field(metric), divisor, carried));
        }
    }
}

/// Append the secondary sort on project name used when no project was requested.
pub(crate) fn push_project_sort(pipeline: &mut Pipeline, project: Option<&str>) {
    if trends_model::query::non_blank(project).is_none() {
        pipeline.push(Stage::sort_by(fields::PROJECT, 1));
    }
}
