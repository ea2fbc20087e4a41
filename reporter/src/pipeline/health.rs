//! Unhealthy event counts per day, from the daily health documents.

use trends_model::fields::{self, group_key, path};
use trends_model::query::TrendingQuery;

use super::{push_project_sort, Group, Pipeline, Projection, Stage};
use crate::clock::Clock;
use crate::normalize;

/// One row per lifecycle, or per host when grouped per host, with `date[]` and
/// `UnHealthyCount[]`.
pub fn health_trend(query: &TrendingQuery, clock: &Clock, hosts: &[String]) -> Pipeline {
    let per_host = query.by_host();

    let mut filter = normalize::scoped_window(query, clock);
    if let Some(hosts) = normalize::hosts_filter(hosts) {
        filter = filter.and(hosts);
    }

    let mut daily = [fields::APP_ID, fields::PROJECT, fields::LIFECYCLE]
        .into_iter()
        .fold(Group::new(), |group, key| group.key(key, key))
        .key(fields::DATE, fields::CREATED_ON_DATE);
    if per_host {
        daily = daily.key(fields::HOST, fields::HOST);
    }
    let daily = daily.sum(
        fields::UNHEALTHY_COUNT,
        &path(fields::DATA, fields::UNHEALTHY_EVENT_COUNT),
    );

    let mut rows = [fields::APP_ID, fields::PROJECT, fields::LIFECYCLE]
        .into_iter()
        .fold(Group::new(), |group, key| group.key(key, &group_key(key)));
    if per_host {
        rows = rows.key(fields::HOST, &group_key(fields::HOST));
    }
    let rows = rows
        .push(fields::DATE, &group_key(fields::DATE))
        .push(fields::UNHEALTHY_COUNT, fields::UNHEALTHY_COUNT);

    let mut output = Projection::new()
        .rename(fields::APP_ID, &group_key(fields::APP_ID))
        .rename(fields::LIFECYCLE, &group_key(fields::LIFECYCLE))
        .rename(fields::PROJECT, &group_key(fields::PROJECT))
        .include(fields::DATE)
        .include(fields::UNHEALTHY_COUNT);
    if per_host {
        output = output.rename(fields::HOST, &group_key(fields::HOST));
    }

    let mut pipeline = Pipeline::new();
    pipeline
        .push(Stage::Match(filter))
        .push(Stage::Group(daily))
        .push(Stage::sort_by(&group_key(fields::DATE), 1))
        .push(Stage::Group(rows))
        .push(Stage::Project(output.without_id()));
    push_project_sort(&mut pipeline, query.project.as_deref());

    log::debug!("Health report pipeline: {}", pipeline.to_json());
    pipeline
}
