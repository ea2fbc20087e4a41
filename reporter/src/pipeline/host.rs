//! Host daily trend pipeline over `/csap/reports/host/daily`.
//!
//! Host reports hold a single summary object per host and day, so nothing is unwound.

use trends_model::fields::{self, group_key, path};
use trends_model::query::TrendingQuery;

use super::trending::{dividend_for, output_row, push_daily_arrays};
use super::{
    divide_projection, divisor_operand, metric_total, push_host_divisions, push_project_sort,
    Expr, Group, Pipeline, Projection, Stage,
};
use crate::clock::Clock;
use crate::normalize;

/// Daily host metrics, restricted to `hosts` when the list is not empty.
pub fn host_trend(query: &TrendingQuery, clock: &Clock, hosts: &[String]) -> Pipeline {
    let metrics = query.metrics.as_slice();
    let per_host = query.by_host();

    let mut filter = normalize::scoped_window(query, clock);
    if let Some(hosts) = normalize::hosts_filter(hosts) {
        filter = filter.and(hosts);
    }

    let mut pipeline = Pipeline::new();
    pipeline.push(Stage::Match(filter));

    if query.all_vm_total() || per_host {
        pipeline.push(Stage::Group(host_days(metrics)));
        push_host_divisions(&mut pipeline, metrics, &query.divide_by);
        if !per_host {
            pipeline.push(Stage::Group(lifecycle_days(metrics)));
        }
    } else {
        let group = [fields::APP_ID, fields::PROJECT, fields::LIFECYCLE]
            .into_iter()
            .fold(Group::new(), |group, key| group.key(key, key))
            .key(fields::DATE, fields::CREATED_ON_DATE);
        let mut group = metrics.iter().fold(group, |group, metric| {
            group.sum(metric, &path(fields::DATA_SUMMARY, metric))
        });
        if query.divides_by_samples() {
            group = group.sum(
                fields::NUMBER_OF_SAMPLES,
                &path(fields::DATA_SUMMARY, fields::NUMBER_OF_SAMPLES),
            );
        }
        pipeline.push(Stage::Group(group));
    }

    let mut flattened = metrics
        .iter()
        .fold(Projection::new(), |projection, metric| projection.include(metric));
    if metrics.len() > 1 {
        flattened = flattened.expr(fields::TOTAL, metric_total(metrics));
    }
    for field in [fields::APP_ID, fields::LIFECYCLE, fields::PROJECT, fields::DATE] {
        flattened = flattened.rename(field, &group_key(field));
    }
    if per_host {
        flattened = flattened.rename(fields::HOST, &group_key(fields::HOST));
    }
    if query.divides_by_samples() {
        flattened = flattened.include(fields::NUMBER_OF_SAMPLES);
    }
    pipeline.push(Stage::Project(flattened.without_id()));

    if !query.all_vm_total() && !per_host {
        if let Some(target) = dividend_for(metrics) {
            // The summed metrics travel with `total`.
            let siblings: &[String] = if metrics.len() > 1 { metrics } else { &[] };
            for divisor in &query.divide_by {
                let Some(operand) = divisor_operand(divisor) else {
                    continue;
                };
                let carried = siblings
                    .iter()
                    .map(String::as_str)
                    .chain([
                        fields::APP_ID,
                        fields::LIFECYCLE,
                        fields::PROJECT,
                        fields::NUMBER_OF_SAMPLES,
                        fields::DATE,
                    ]);
                pipeline.push(divide_projection(target, Expr::field(target), operand, carried));
            }
        }
    }

    pipeline.push(Stage::sort_by(fields::DATE, 1));

    let mut rows = [fields::APP_ID, fields::PROJECT, fields::LIFECYCLE]
        .into_iter()
        .fold(Group::new(), |group, key| group.key(key, key));
    if per_host {
        rows = rows.key(fields::HOST, fields::HOST);
    }
    pipeline.push(Stage::Group(push_daily_arrays(rows, metrics)));
    pipeline.push(Stage::Project(output_row(metrics, per_host)));
    push_project_sort(&mut pipeline, query.project.as_deref());

    log::debug!("Host trend pipeline: {}", pipeline.to_json());
    pipeline
}

/// Per host and day: summed metrics and sample counts.
pub fn host_days(metrics: &[String]) -> Group {
    let group = [fields::APP_ID, fields::PROJECT, fields::LIFECYCLE]
        .into_iter()
        .fold(Group::new(), |group, key| group.key(key, key))
        .key(fields::DATE, fields::CREATED_ON_DATE)
        .key(fields::HOST, fields::HOST);
    metrics
        .iter()
        .fold(group, |group, metric| {
            group.sum(metric, &path(fields::DATA_SUMMARY, metric))
        })
        .sum(
            fields::NUMBER_OF_SAMPLES,
            &path(fields::DATA_SUMMARY, fields::NUMBER_OF_SAMPLES),
        )
}

/// Add the per-host rows of [host_days] together per lifecycle and day.
fn lifecycle_days(metrics: &[String]) -> Group {
    let group = [
        fields::APP_ID,
        fields::PROJECT,
        fields::LIFECYCLE,
        fields::DATE,
    ]
    .into_iter()
    .fold(Group::new(), |group, key| group.key(key, &group_key(key)));
    metrics
        .iter()
        .fold(group, |group, metric| group.sum(metric, metric))
        .sum(fields::NUMBER_OF_SAMPLES, fields::NUMBER_OF_SAMPLES)
}
