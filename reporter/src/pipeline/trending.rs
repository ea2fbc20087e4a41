//! Category trend pipeline.
//!
//! Turns a [TrendingQuery] into one output row per appId/project/lifecycle (and per host or
//! service, depending on the grouping), each holding parallel `date[]` and `<metric>[]` arrays.

use trends_model::fields::{self, group_key, path};
use trends_model::query::{Divisor, TrendingQuery};

use super::filter::Filter;
use super::{
    divide_projection, divisor_operand, metric_total, push_project_sort, Expr, Group, Pipeline,
    Projection, Stage, HOST_DIVIDE_CARRIED,
};
use crate::clock::Clock;
use crate::normalize;

pub fn category_trend(query: &TrendingQuery, clock: &Clock) -> Pipeline {
    let metrics = query.metrics.as_slice();
    let by_host = query.by_host();
    let filtered = !query.services.is_empty();

    let mut pipeline = Pipeline::new();
    pipeline
        .push(Stage::Match(normalize::trending_filter(query, clock)))
        .push(Stage::Unwind(fields::DATA_SUMMARY.to_string()));

    if filtered {
        pipeline.push(Stage::Match(Filter::any_of(
            &summary_field(fields::SERVICE_NAME),
            query.services.names().iter().cloned(),
        )));
    }

    if query.all_vm_total() {
        push_host_totals(&mut pipeline, query);
    } else if by_host {
        pipeline.push(Stage::Group(sum_summaries(
            scope_group().key(fields::HOST, fields::HOST),
            metrics,
            true,
        )));
    } else {
        let mut group = Group::new();
        if !query.services.is_multiple() {
            group = group.key(fields::SERVICE_NAME, &summary_field(fields::SERVICE_NAME));
        }
        group = group
            .key(fields::APP_ID, fields::APP_ID)
            .key(fields::PROJECT, fields::PROJECT)
            .key(fields::LIFECYCLE, fields::LIFECYCLE)
            .key(fields::DATE, fields::CREATED_ON_DATE);
        pipeline.push(Stage::Group(sum_summaries(
            group,
            metrics,
            query.divides_by_samples(),
        )));
    }

    pipeline.push(Stage::Project(flatten_group(query)));
    pipeline.push(Stage::Project(
        row_fields(metrics, by_host)
            .expr(fields::NUMBER_OF_SAMPLES, Expr::zero_to(fields::NUMBER_OF_SAMPLES, 1)),
    ));

    if !query.all_vm_total() {
        push_divisions(&mut pipeline, query);
    }

    if !filtered {
        push_lifecycle_totals(&mut pipeline, metrics, by_host);
    }

    pipeline.push(Stage::sort_by(fields::DATE, 1));
    pipeline.push(Stage::Group(output_group(query)));
    pipeline.push(Stage::Project(output_projection(query)));
    push_project_sort(&mut pipeline, query.project.as_deref());

    log::debug!("Category trend pipeline: {}", pipeline.to_json());
    pipeline
}

fn summary_field(field: &str) -> String {
    path(fields::DATA_SUMMARY, field)
}

/// `_id` of appId, project, lifecycle and date.
fn scope_group() -> Group {
    Group::new()
        .key(fields::APP_ID, fields::APP_ID)
        .key(fields::PROJECT, fields::PROJECT)
        .key(fields::LIFECYCLE, fields::LIFECYCLE)
        .key(fields::DATE, fields::CREATED_ON_DATE)
}

fn sum_summaries(group: Group, metrics: &[String], with_samples: bool) -> Group {
    let group = metrics
        .iter()
        .fold(group, |group, metric| group.sum(metric, &summary_field(metric)));
    if with_samples {
        group.sum(
            fields::NUMBER_OF_SAMPLES,
            &summary_field(fields::NUMBER_OF_SAMPLES),
        )
    } else {
        group
    }
}

/// Sum each host's samples first, weight each metric by its container count, then add the
/// hosts together.
fn push_host_totals(pipeline: &mut Pipeline, query: &TrendingQuery) {
    let metrics = query.metrics.as_slice();

    let per_host = Group::new()
        .key(fields::SERVICE_NAME, &summary_field(fields::SERVICE_NAME))
        .key(fields::APP_ID, fields::APP_ID)
        .key(fields::PROJECT, fields::PROJECT)
        .key(fields::LIFECYCLE, fields::LIFECYCLE)
        .key(fields::HOST, fields::HOST)
        .key(fields::DATE, fields::CREATED_ON_DATE);
    let per_host = sum_summaries(per_host, metrics, true).sum(
        fields::COUNT_CSAP_MEAN,
        &summary_field(fields::COUNT_CSAP_MEAN),
    );
    pipeline.push(Stage::Group(per_host));

    let mut ensure = Projection::new();
    for field in [
        fields::APP_ID,
        fields::LIFECYCLE,
        fields::PROJECT,
        fields::SERVICE_NAME,
        fields::DATE,
    ] {
        ensure = ensure.include(field);
    }
    for metric in metrics {
        ensure = ensure.include(metric);
    }
    pipeline.push(Stage::Project(
        ensure
            .expr(fields::NUMBER_OF_SAMPLES, Expr::zero_to(fields::NUMBER_OF_SAMPLES, 1))
            .expr(fields::COUNT_CSAP_MEAN, Expr::zero_to(fields::COUNT_CSAP_MEAN, 1)),
    ));

    for metric in metrics {
        for divisor in &query.divide_by {
            let Some(operand) = divisor_operand(divisor) else {
                continue;
            };
            let dividend = if *divisor == Divisor::NumberOfSamples {
                Expr::Multiply(vec![
                    Expr::field(metric),
                    Expr::field(fields::COUNT_CSAP_MEAN),
                ])
            } else {
                Expr::field(metric)
            };
            let carried = metrics
                .iter()
                .map(String::as_str)
                .filter(|other| !other.eq_ignore_ascii_case(metric))
                .chain(HOST_DIVIDE_CARRIED)
                .chain([fields::COUNT_CSAP_MEAN]);
            pipeline.push(divide_projection(metric, dividend, operand, carried));
        }
    }

    let across_hosts = [
        fields::SERVICE_NAME,
        fields::APP_ID,
        fields::PROJECT,
        fields::LIFECYCLE,
        fields::DATE,
    ]
    .into_iter()
    .fold(Group::new(), |group, key| group.key(key, &group_key(key)));
    let across_hosts = metrics
        .iter()
        .fold(across_hosts, |group, metric| group.sum(metric, metric))
        .sum(fields::NUMBER_OF_SAMPLES, fields::NUMBER_OF_SAMPLES);
    pipeline.push(Stage::Group(across_hosts));
}

/// Lift the group keys to top level fields and add `total` when several metrics are requested.
fn flatten_group(query: &TrendingQuery) -> Projection {
    let metrics = query.metrics.as_slice();
    let mut projection = metrics
        .iter()
        .fold(Projection::new(), |projection, metric| projection.include(metric));
    if metrics.len() > 1 {
        projection = projection.expr(fields::TOTAL, metric_total(metrics));
    }
    for field in [
        fields::APP_ID,
        fields::LIFECYCLE,
        fields::PROJECT,
        fields::SERVICE_NAME,
        fields::DATE,
    ] {
        projection = projection.rename(field, &group_key(field));
    }
    if query.by_host() {
        projection = projection.rename(fields::HOST, &group_key(fields::HOST));
    }
    if query.divides_by_samples() {
        projection = projection.include(fields::NUMBER_OF_SAMPLES);
    }
    projection.without_id()
}

/// Keep the identifying fields of a flattened row and its metrics.
fn row_fields(metrics: &[String], by_host: bool) -> Projection {
    let mut projection = [
        fields::APP_ID,
        fields::LIFECYCLE,
        fields::PROJECT,
        fields::SERVICE_NAME,
        fields::DATE,
    ]
    .into_iter()
    .fold(Projection::new(), Projection::include);
    if by_host {
        projection = projection.include(fields::HOST);
    }
    for metric in metrics {
        projection = projection.include(metric);
    }
    if metrics.len() > 1 {
        projection = projection.include(fields::TOTAL);
    }
    projection
}

/// Divide the single metric, or `total` when there are several.
fn push_divisions(pipeline: &mut Pipeline, query: &TrendingQuery) {
    let metrics = query.metrics.as_slice();
    let Some(target) = dividend_for(metrics) else {
        return;
    };

    for divisor in &query.divide_by {
        let Some(operand) = divisor_operand(divisor) else {
            continue;
        };
        let mut carried: Vec<&str> = if metrics.len() > 1 {
            metrics.iter().map(String::as_str).collect()
        } else {
            Vec::new()
        };
        carried.extend([
            fields::APP_ID,
            fields::LIFECYCLE,
            fields::PROJECT,
            fields::SERVICE_NAME,
            fields::NUMBER_OF_SAMPLES,
            fields::DATE,
        ]);
        if query.by_host() {
            carried.push(fields::HOST);
        }
        pipeline.push(divide_projection(target, Expr::field(target), operand, carried));
    }
}

/// The field a divide-by applies to: the only metric, or `total`.
pub(crate) fn dividend_for(metrics: &[String]) -> Option<&str> {
    match metrics {
        [] => None,
        [metric] => Some(metric.as_str()),
        _ => Some(fields::TOTAL),
    }
}

/// Without a service filter, rows of every service are added together per lifecycle and day.
fn push_lifecycle_totals(pipeline: &mut Pipeline, metrics: &[String], by_host: bool) {
    let mut group = [
        fields::APP_ID,
        fields::PROJECT,
        fields::LIFECYCLE,
        fields::DATE,
    ]
    .into_iter()
    .fold(Group::new(), |group, key| group.key(key, key));
    if by_host {
        group = group.key(fields::HOST, fields::HOST);
    }
    group = metrics
        .iter()
        .fold(group, |group, metric| group.sum(metric, metric));
    if metrics.len() > 1 {
        group = group.sum(fields::TOTAL, fields::TOTAL);
    }
    pipeline.push(Stage::Group(group));

    let mut projection = metrics
        .iter()
        .fold(Projection::new(), |projection, metric| projection.include(metric));
    if metrics.len() > 1 {
        projection = projection.include(fields::TOTAL);
    }
    for field in [
        fields::APP_ID,
        fields::LIFECYCLE,
        fields::PROJECT,
        fields::DATE,
    ] {
        projection = projection.rename(field, &group_key(field));
    }
    if by_host {
        projection = projection.rename(fields::HOST, &group_key(fields::HOST));
    }
    pipeline.push(Stage::Project(projection.without_id()));
}

/// Collect the daily rows of each report line into arrays, in date order.
pub(crate) fn push_daily_arrays(group: Group, metrics: &[String]) -> Group {
    let group = metrics
        .iter()
        .fold(group.push(fields::DATE, fields::DATE), |group, metric| {
            group.push(metric, metric)
        });
    if metrics.len() > 1 {
        group.push(fields::TOTAL, fields::TOTAL)
    } else {
        group
    }
}

fn output_group(query: &TrendingQuery) -> Group {
    let mut group = Group::new();
    if !query.services.is_empty() {
        group = group.key(fields::SERVICE_NAME, fields::SERVICE_NAME);
    }
    group = group
        .key(fields::APP_ID, fields::APP_ID)
        .key(fields::PROJECT, fields::PROJECT)
        .key(fields::LIFECYCLE, fields::LIFECYCLE);
    if query.by_host() {
        group = group.key(fields::HOST, fields::HOST);
    }
    push_daily_arrays(group, &query.metrics)
}

/// The output row: scope fields renamed out of `_id`, plus the arrays.
pub(crate) fn output_row(metrics: &[String], by_host: bool) -> Projection {
    let mut projection = metrics
        .iter()
        .fold(Projection::new(), |projection, metric| projection.include(metric));
    if metrics.len() > 1 {
        projection = projection.include(fields::TOTAL);
    }
    projection = projection
        .rename(fields::APP_ID, &group_key(fields::APP_ID))
        .rename(fields::LIFECYCLE, &group_key(fields::LIFECYCLE))
        .rename(fields::PROJECT, &group_key(fields::PROJECT))
        .include(fields::DATE);
    if by_host {
        projection = projection.rename(fields::HOST, &group_key(fields::HOST));
    }
    projection.without_id()
}

fn output_projection(query: &TrendingQuery) -> Projection {
    let projection = output_row(&query.metrics, query.by_host());
    if query.services.is_empty() {
        projection
    } else {
        projection.rename(fields::SERVICE_NAME, &group_key(fields::SERVICE_NAME))
    }
}
