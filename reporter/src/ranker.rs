//! Top and bottom host selection.
//!
//! A ranking pass sums a metric per host over the window, sorts hosts by that total and keeps the
//! first `count` of every application group. The resulting hosts become the allow-list of a
//! second, restricted report pass.

use itertools::Itertools;
use serde_json::Value;
use trends_model::category::{self, HEALTH_REPORT, HOST_DAILY_REPORT};
use trends_model::fields::{self, group_key, path};
use trends_model::query::{non_blank, Divisor, HostRanking, RankDirection, TrendingQuery};

use crate::clock::Clock;
use crate::normalize;
use crate::pipeline::{
    metric_total, push_host_divisions, Filter, Group, Pipeline, Projection, Stage,
};
use crate::store::{Collection, Store, StoreResult};

/// What hosts are ranked on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankQuery {
    pub app_id: Option<String>,
    pub project: Option<String>,
    pub lifecycle: Option<String>,
    pub category: String,
    /// Summed together into the ranked `total`.
    pub metrics: Vec<String>,
    pub divide_by: Vec<Divisor>,
    /// Only rank this service's entries of the summary list.
    pub service: Option<String>,
    /// The category keeps a list of per-service summaries that must be unwound.
    pub unwind: bool,
    pub num_days: u32,
    pub date_offset: i32,
}

impl RankQuery {
    /// Rank on the scope and window of a trending request.
    pub fn within(query: &TrendingQuery, metrics: Vec<String>, divide_by: Vec<Divisor>) -> Self {
        Self {
            app_id: query.app_id.clone(),
            project: query.project.clone(),
            lifecycle: query.lifecycle.clone(),
            category: query.category.clone(),
            metrics,
            divide_by,
            service: None,
            unwind: false,
            num_days: query.day_count(),
            date_offset: query.date_offset,
        }
    }

    /// Host daily metrics, averaged per sample.
    pub fn host_metrics(query: &TrendingQuery) -> Self {
        Self {
            category: HOST_DAILY_REPORT.to_string(),
            ..Self::within(query, query.metrics.clone(), vec![Divisor::NumberOfSamples])
        }
    }

    /// Unhealthy event counts.
    pub fn unhealthy_events(query: &TrendingQuery) -> Self {
        Self {
            category: HEALTH_REPORT.to_string(),
            ..Self::within(
                query,
                vec![fields::UNHEALTHY_EVENT_COUNT.to_string()],
                Vec::new(),
            )
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MetricIdError {
    #[error("At least one metric id is required")]
    Empty,
    #[error("Unsupported metric id: {0}")]
    Unsupported(String),
}

/// Ranking parameters encoded in dashboard metric ids.
///
/// | id | category | metric | service |
/// |----|----------|--------|---------|
/// | `vm.<metric>` | host daily | `<metric>` | |
/// | `process.<metric>_<service>` | process daily | `<metric>` | `<service>` |
/// | `jmx.<metric>_<service>` | jmx daily | `<metric>` | `<service>` |
/// | `jmxCustom.<service>.<metric>` | custom jmx daily | `<metric>` | `<service>` |
/// | `health.<metric>` | health | `<metric>` | |
///
/// `vm.coresActive` ranks on `totalUsrCpu + totalSysCpu`. The kind of the first id decides
/// category, service and divisor for all of them.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSelector {
    pub category: &'static str,
    pub metrics: Vec<String>,
    pub service: Option<String>,
    pub unwind: bool,
    pub divide_by: Vec<Divisor>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum MetricKind {
    Vm,
    Process,
    Jmx,
    JmxCustom,
    Health,
}

impl MetricKind {
    fn of(id: &str) -> Option<Self> {
        let kind = match id.split_once('.')?.0 {
            "vm" => MetricKind::Vm,
            "process" => MetricKind::Process,
            "jmx" => MetricKind::Jmx,
            "jmxCustom" => MetricKind::JmxCustom,
            "health" => MetricKind::Health,
            _ => return None,
        };
        Some(kind)
    }

    fn category(self) -> &'static str {
        match self {
            MetricKind::Vm => HOST_DAILY_REPORT,
            MetricKind::Process => "/csap/reports/process/daily",
            MetricKind::Jmx => "/csap/reports/jmx/daily",
            MetricKind::JmxCustom => "/csap/reports/jmxCustom/daily",
            MetricKind::Health => HEALTH_REPORT,
        }
    }

    /// The metric name inside the report, if the id names one.
    fn metric(self, id: &str) -> Option<String> {
        let (_, rest) = id.split_once('.')?;
        let metric = match self {
            MetricKind::Vm | MetricKind::Health => rest,
            MetricKind::Process | MetricKind::Jmx => {
                rest.split_once('_').map_or(rest, |(metric, _)| metric)
            }
            MetricKind::JmxCustom => rest.split('.').nth(1)?,
        };
        non_blank(Some(metric)).map(str::to_string)
    }

    fn service(self, id: &str) -> Option<String> {
        let service = match self {
            MetricKind::Process | MetricKind::Jmx => id.split_once('_')?.1,
            MetricKind::JmxCustom => {
                let segments: Vec<&str> = id.split('.').collect();
                if segments.len() < 3 {
                    return None;
                }
                segments[1]
            }
            MetricKind::Vm | MetricKind::Health => return None,
        };
        non_blank(Some(service)).map(str::to_string)
    }
}

impl MetricSelector {
    pub fn parse(ids: &[String]) -> Result<Self, MetricIdError> {
        let first = ids.first().ok_or(MetricIdError::Empty)?;
        let kind = MetricKind::of(first).ok_or_else(|| MetricIdError::Unsupported(first.clone()))?;

        let metrics = if kind == MetricKind::Vm && first.contains("coresActive") {
            vec!["totalUsrCpu".to_string(), "totalSysCpu".to_string()]
        } else {
            ids.iter().filter_map(|id| kind.metric(id)).collect()
        };
        if metrics.is_empty() {
            return Err(MetricIdError::Unsupported(first.clone()));
        }

        Ok(Self {
            category: kind.category(),
            metrics,
            service: kind.service(first),
            unwind: !matches!(kind, MetricKind::Vm | MetricKind::Health),
            divide_by: match kind {
                MetricKind::Health => Vec::new(),
                _ => vec![Divisor::NumberOfSamples],
            },
        })
    }

    /// Rank within the given scope and window.
    pub fn into_query(
        self,
        app_id: Option<String>,
        project: Option<String>,
        lifecycle: Option<String>,
        num_days: u32,
        date_offset: i32,
    ) -> RankQuery {
        RankQuery {
            app_id,
            project,
            lifecycle,
            category: self.category.to_string(),
            metrics: self.metrics,
            divide_by: self.divide_by,
            service: self.service,
            unwind: self.unwind,
            num_days,
            date_offset,
        }
    }
}

/// Hosts of every group with their totals, sorted by `direction`.
pub fn ranking_pipeline(query: &RankQuery, direction: RankDirection, clock: &Clock) -> Pipeline {
    let source = category::report_path(&query.category);
    let service = non_blank(query.service.as_deref());
    let project = non_blank(query.project.as_deref()).is_some();
    let lifecycle = non_blank(query.lifecycle.as_deref()).is_some();

    let filter = normalize::scope_filter(
        query.app_id.as_deref(),
        query.project.as_deref(),
        query.lifecycle.as_deref(),
        Some(query.category.as_str()),
    )
    .and(normalize::date_window(clock, query.num_days, query.date_offset));

    let mut pipeline = Pipeline::new();
    pipeline.push(Stage::Match(filter));
    if query.unwind {
        pipeline.push(Stage::Unwind(source.to_string()));
        if let Some(service) = service {
            pipeline.push(Stage::Match(Filter::eq(
                path(source, fields::SERVICE_NAME),
                service,
            )));
        }
    }

    let mut per_host = Group::new().key(fields::APP_ID, fields::APP_ID);
    let mut flattened = Projection::new()
        .expr(fields::TOTAL, metric_total(&query.metrics))
        .rename(fields::APP_ID, &group_key(fields::APP_ID))
        .rename(fields::HOST, &group_key(fields::HOST))
        .include(fields::NUMBER_OF_SAMPLES);
    let mut hosts = Group::new().key(fields::APP_ID, fields::APP_ID);
    if service.is_some() {
        per_host = per_host.key(fields::SERVICE_NAME, &path(source, fields::SERVICE_NAME));
        flattened = flattened.rename(fields::SERVICE_NAME, &group_key(fields::SERVICE_NAME));
    }
    for (field, given) in [(fields::PROJECT, project), (fields::LIFECYCLE, lifecycle)] {
        if given {
            per_host = per_host.key(field, field);
            flattened = flattened.rename(field, &group_key(field));
            hosts = hosts.key(field, field);
        }
    }
    let per_host = query
        .metrics
        .iter()
        .fold(per_host.key(fields::HOST, fields::HOST), |group, metric| {
            group.sum(metric, &path(source, metric))
        })
        .sum(
            fields::NUMBER_OF_SAMPLES,
            &path(source, fields::NUMBER_OF_SAMPLES),
        );

    pipeline
        .push(Stage::Group(per_host))
        .push(Stage::Project(flattened.without_id()));
    push_host_divisions(&mut pipeline, &[fields::TOTAL.to_string()], &query.divide_by);
    pipeline
        .push(Stage::sort_by(fields::TOTAL, direction.sort_order()))
        .push(Stage::Group(
            hosts
                .push(fields::HOST, fields::HOST)
                .push(fields::TOTAL, fields::TOTAL),
        ));

    log::debug!("Host ranking pipeline: {}", pipeline.to_json());
    pipeline
}

/// The first `count` hosts of every group, in group order. A count of 0 keeps every host.
pub fn ranked_hosts(rows: &[Value], count: usize) -> Vec<String> {
    rows.iter()
        .filter_map(|row| row.get(fields::HOST)?.as_array())
        .flat_map(|hosts| {
            let keep = if count == 0 { hosts.len() } else { count };
            hosts.iter().take(keep)
        })
        .filter_map(|host| host.as_str().map(str::to_string))
        .collect()
}

/// Hosts ranked by `ranking`.
pub async fn rank_hosts(
    store: &dyn Store,
    query: &RankQuery,
    ranking: HostRanking,
    clock: &Clock,
) -> StoreResult<Vec<String>> {
    let pipeline = ranking_pipeline(query, ranking.direction, clock);
    let rows = store.execute(Collection::Events, &pipeline).await?;
    let hosts = ranked_hosts(&rows, ranking.count);
    log::debug!("{} {} hosts: {hosts:?}", ranking.direction, ranking.count);
    Ok(hosts)
}

/// The union of the `top` highest and `low` lowest hosts. Empty when neither is requested,
/// which leaves the report unrestricted.
pub async fn allow_list(
    store: &dyn Store,
    query: &RankQuery,
    top: usize,
    low: usize,
    clock: &Clock,
) -> StoreResult<Vec<String>> {
    let mut hosts = Vec::new();
    for (direction, count) in [(RankDirection::Top, top), (RankDirection::Low, low)] {
        if count > 0 {
            hosts.extend(rank_hosts(store, query, HostRanking { direction, count }, clock).await?);
        }
    }
    Ok(hosts.into_iter().unique().collect())
}
